//! 成绩存储
//!
//! 每个写操作都在独立的 `IMMEDIATE` 事务中完成：事务开始即持有写锁，
//! 查找与写入之间不会插入其他写者，同一身份键永远只有一条成绩

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Params, Transaction, TransactionBehavior};
use tracing::{debug, info};

use super::schema;
use crate::error::{AppError, AppResult, NotFoundError, PersistenceError, ValidationError};
use crate::models::{
    ClassSummaryEntry, ExamDetails, ExamResultView, IdentityKey, MarkRecord, QuestionMarkRow,
    QuestionParts, ResultFilter, UpsertOutcome, QUESTION_COUNT,
};

const VIEW_SELECT: &str = "SELECT r.id, r.roll_number, r.class_year, r.subject, r.exam_type,
        r.academic_year, r.total_marks, r.timestamp,
        q.question_number, q.part_a, q.part_b, q.part_c, q.part_d
    FROM exam_results r
    LEFT JOIN exam_question_marks q ON q.result_id = r.id";

const KEY_WHERE: &str = "roll_number = ?1 AND class_year = ?2 AND subject = ?3
    AND exam_type = ?4 AND academic_year = ?5";

/// 成绩存储（唯一的共享可变资源）
pub struct ResultStore {
    conn: Mutex<Connection>,
}

impl ResultStore {
    /// 打开数据库文件，父目录不存在时自动创建
    pub fn open(path: impl AsRef<Path>) -> AppResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| {
                PersistenceError::DirectoryCreateFailed {
                    path: parent.display().to_string(),
                    source,
                }
            })?;
        }

        let conn = Connection::open(path)?;
        info!("💾 数据库已打开: {}", path.display());
        Self::from_connection(conn)
    }

    /// 内存数据库
    pub fn open_in_memory() -> AppResult<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> AppResult<Self> {
        schema::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, PersistenceError> {
        self.conn.lock().map_err(|_| PersistenceError::LockPoisoned)
    }

    // ========== 写操作 ==========

    /// 按身份键写入成绩：已存在则覆盖总分、时间戳与全部题目分数，否则新建
    pub fn upsert(&self, key: &IdentityKey, record: &MarkRecord) -> AppResult<UpsertOutcome> {
        if key.roll_number != record.roll_number {
            return Err(ValidationError::RollNumberMismatch {
                key: key.roll_number.clone(),
                record: record.roll_number.clone(),
            }
            .into());
        }

        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let now = now_timestamp();

        let (result_id, created) = match find_id(&tx, key)? {
            Some(id) => {
                tx.execute(
                    "UPDATE exam_results SET total_marks = ?1, timestamp = ?2 WHERE id = ?3",
                    params![record.total_marks, now, id],
                )?;
                tx.execute("DELETE FROM exam_question_marks WHERE result_id = ?1", [id])?;
                (id, false)
            }
            None => {
                tx.execute(
                    "INSERT INTO exam_results
                        (roll_number, class_year, subject, exam_type, academic_year, total_marks, timestamp)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    params![
                        key.roll_number,
                        key.class_year,
                        key.subject,
                        key.exam_type,
                        key.academic_year,
                        record.total_marks,
                        now
                    ],
                )?;
                (tx.last_insert_rowid(), true)
            }
        };

        {
            let mut stmt = tx.prepare(
                "INSERT INTO exam_question_marks
                    (result_id, question_number, part_a, part_b, part_c, part_d)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for number in 1..=QUESTION_COUNT {
                let parts = record.questions.get(&number).copied().unwrap_or_default();
                stmt.execute(params![result_id, number, parts.a, parts.b, parts.c, parts.d])?;
            }
        }

        tx.commit()?;

        debug!(
            "{} {} (result_id = {}, 总分 = {})",
            key,
            if created { "新建" } else { "覆盖" },
            result_id,
            record.total_marks
        );

        Ok(UpsertOutcome { result_id, created })
    }

    /// 修改指定题目的分数并重算总分（等于所有已存小题之和），返回新总分
    pub fn update_question_marks(
        &self,
        result_id: i64,
        marks: &BTreeMap<u8, QuestionParts>,
    ) -> AppResult<f64> {
        if let Some(number) = marks
            .keys()
            .copied()
            .find(|n| !(1..=QUESTION_COUNT).contains(n))
        {
            return Err(ValidationError::InvalidQuestionNumber { number }.into());
        }

        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let exists: Option<i64> = tx
            .query_row(
                "SELECT id FROM exam_results WHERE id = ?1",
                [result_id],
                |row| row.get(0),
            )
            .optional()?;
        if exists.is_none() {
            return Err(AppError::result_not_found(result_id));
        }

        {
            let mut stmt = tx.prepare(
                "INSERT INTO exam_question_marks
                    (result_id, question_number, part_a, part_b, part_c, part_d)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(result_id, question_number) DO UPDATE SET
                    part_a = excluded.part_a,
                    part_b = excluded.part_b,
                    part_c = excluded.part_c,
                    part_d = excluded.part_d",
            )?;
            for (number, parts) in marks {
                stmt.execute(params![result_id, number, parts.a, parts.b, parts.c, parts.d])?;
            }
        }

        let total = stored_parts_sum(&tx, result_id)?;
        tx.execute(
            "UPDATE exam_results SET total_marks = ?1, timestamp = ?2 WHERE id = ?3",
            params![total, now_timestamp(), result_id],
        )?;

        tx.commit()?;

        debug!("成绩 {} 已更新 {} 道题, 新总分 {}", result_id, marks.len(), total);
        Ok(total)
    }

    /// 按身份键删除成绩及其题目分数
    pub fn delete(&self, key: &IdentityKey) -> AppResult<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let id = find_id(&tx, key)?
            .ok_or_else(|| NotFoundError::IdentityKey(key.to_string()))?;

        tx.execute("DELETE FROM exam_question_marks WHERE result_id = ?1", [id])?;
        tx.execute("DELETE FROM exam_results WHERE id = ?1", [id])?;
        tx.commit()?;

        info!("🗑️ 已删除成绩 {}", key);
        Ok(())
    }

    // ========== 读操作 ==========

    /// 按班级、科目、考试类型查询（学号、题号升序）
    pub fn get_by_filter(&self, filter: &ResultFilter) -> AppResult<Vec<ExamResultView>> {
        let conn = self.lock()?;
        let sql = format!(
            "{VIEW_SELECT}
             WHERE r.class_year = ?1 AND r.subject = ?2 AND r.exam_type = ?3
             ORDER BY r.roll_number, r.academic_year, r.id, q.question_number"
        );
        Ok(query_views(
            &conn,
            &sql,
            params![filter.class_year, filter.subject, filter.exam_type],
        )?)
    }

    /// 某个学生的全部成绩（学年、时间、科目、考试类型升序）
    pub fn get_by_student(&self, roll_number: &str) -> AppResult<Vec<ExamResultView>> {
        let conn = self.lock()?;
        let sql = format!(
            "{VIEW_SELECT}
             WHERE r.roll_number = ?1
             ORDER BY r.academic_year, r.timestamp, r.subject, r.exam_type, r.id, q.question_number"
        );
        Ok(query_views(&conn, &sql, [roll_number])?)
    }

    /// 全部成绩（时间倒序、学号升序）
    pub fn get_all(&self) -> AppResult<Vec<ExamResultView>> {
        let conn = self.lock()?;
        let sql = format!(
            "{VIEW_SELECT}
             ORDER BY r.timestamp DESC, r.roll_number, r.id, q.question_number"
        );
        Ok(query_views(&conn, &sql, [])?)
    }

    pub fn find_by_key(&self, key: &IdentityKey) -> AppResult<Option<ExamResultView>> {
        let conn = self.lock()?;
        let sql = format!(
            "{VIEW_SELECT}
             WHERE r.roll_number = ?1 AND r.class_year = ?2 AND r.subject = ?3
               AND r.exam_type = ?4 AND r.academic_year = ?5
             ORDER BY q.question_number"
        );
        let views = query_views(&conn, &sql, key_params(key))?;
        Ok(views.into_iter().next())
    }

    pub fn count_results(&self) -> AppResult<i64> {
        let conn = self.lock()?;
        Ok(conn.query_row("SELECT COUNT(*) FROM exam_results", [], |row| row.get(0))?)
    }

    /// 已存在的 (班级, 科目, 考试类型) 组合
    pub fn exam_details(&self) -> AppResult<Vec<ExamDetails>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT DISTINCT class_year, subject, exam_type FROM exam_results
             ORDER BY class_year, subject, exam_type",
        )?;
        let details = stmt
            .query_map([], |row| {
                Ok(ExamDetails {
                    class_year: row.get(0)?,
                    subject: row.get(1)?,
                    exam_type: row.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(details)
    }

    /// 班级成绩概览（总分降序）
    pub fn class_summary(&self, filter: &ResultFilter) -> AppResult<Vec<ClassSummaryEntry>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT roll_number, total_marks FROM exam_results
             WHERE class_year = ?1 AND subject = ?2 AND exam_type = ?3
             ORDER BY total_marks DESC, roll_number",
        )?;
        let entries = stmt
            .query_map(
                params![filter.class_year, filter.subject, filter.exam_type],
                |row| {
                    Ok(ClassSummaryEntry {
                        roll_number: row.get(0)?,
                        total_marks: row.get(1)?,
                    })
                },
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    /// CO 分析用的扁平题目分数行（学号、考试类型、题号升序）
    pub fn co_mark_rows(&self, filter: &ResultFilter) -> AppResult<Vec<QuestionMarkRow>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT r.roll_number, r.exam_type, q.question_number,
                    q.part_a, q.part_b, q.part_c, q.part_d
             FROM exam_question_marks q
             JOIN exam_results r ON r.id = q.result_id
             WHERE r.class_year = ?1 AND r.subject = ?2 AND r.exam_type = ?3
             ORDER BY r.roll_number, r.exam_type, q.question_number",
        )?;
        let rows = stmt
            .query_map(
                params![filter.class_year, filter.subject, filter.exam_type],
                |row| {
                    Ok(QuestionMarkRow {
                        roll_number: row.get(0)?,
                        exam_type: row.get(1)?,
                        question_number: row.get(2)?,
                        parts: QuestionParts::new(row.get(3)?, row.get(4)?, row.get(5)?, row.get(6)?),
                    })
                },
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn key_params(key: &IdentityKey) -> (&str, &str, &str, &str, i32) {
    (
        &key.roll_number,
        &key.class_year,
        &key.subject,
        &key.exam_type,
        key.academic_year,
    )
}

fn find_id(tx: &Transaction<'_>, key: &IdentityKey) -> rusqlite::Result<Option<i64>> {
    tx.query_row(
        &format!("SELECT id FROM exam_results WHERE {KEY_WHERE}"),
        key_params(key),
        |row| row.get(0),
    )
    .optional()
}

/// 按题号顺序累加已存小题
fn stored_parts_sum(tx: &Transaction<'_>, result_id: i64) -> rusqlite::Result<f64> {
    let mut stmt = tx.prepare(
        "SELECT part_a, part_b, part_c, part_d FROM exam_question_marks
         WHERE result_id = ?1 ORDER BY question_number",
    )?;
    let parts = stmt
        .query_map([result_id], |row| {
            Ok(QuestionParts::new(row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(parts.iter().map(QuestionParts::total).sum())
}

/// 左连接结果按 result_id 分组（查询需保证同一 id 的行相邻）
fn query_views<P: Params>(
    conn: &Connection,
    sql: &str,
    params: P,
) -> rusqlite::Result<Vec<ExamResultView>> {
    let mut stmt = conn.prepare(sql)?;
    let mut rows = stmt.query(params)?;
    let mut views: Vec<ExamResultView> = Vec::new();

    while let Some(row) = rows.next()? {
        let id: i64 = row.get(0)?;
        if views.last().map(|v| v.id) != Some(id) {
            views.push(ExamResultView {
                id,
                roll_number: row.get(1)?,
                class_year: row.get(2)?,
                subject: row.get(3)?,
                exam_type: row.get(4)?,
                academic_year: row.get(5)?,
                total_marks: row.get(6)?,
                timestamp: row.get(7)?,
                questions: BTreeMap::new(),
            });
        }

        let number: Option<u8> = row.get(8)?;
        if let (Some(number), Some(view)) = (number, views.last_mut()) {
            let parts = QuestionParts::new(row.get(9)?, row.get(10)?, row.get(11)?, row.get(12)?);
            view.questions.insert(number, parts);
        }
    }

    Ok(views)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FailureKind;
    use crate::models::ExamContext;

    fn ctx() -> ExamContext {
        ExamContext::new("3rd Year", "DBMS", "Mid 1", 2024)
    }

    fn record(roll: &str, q1: QuestionParts, total: f64) -> MarkRecord {
        let mut record = MarkRecord::zeroed(roll);
        record.questions.insert(1, q1);
        record.total_marks = total;
        record
    }

    #[test]
    fn test_upsert_twice_keeps_one_row() {
        let store = ResultStore::open_in_memory().unwrap();
        let key = ctx().key_for("A1");

        let first = store
            .upsert(&key, &record("A1", QuestionParts::new(1.0, 1.0, 1.0, 1.0), 4.0))
            .unwrap();
        assert!(first.created);

        let second = store
            .upsert(&key, &record("A1", QuestionParts::new(5.0, 5.0, 0.0, 0.0), 10.0))
            .unwrap();
        assert!(!second.created);
        assert_eq!(second.result_id, first.result_id);

        assert_eq!(store.count_results().unwrap(), 1);
        let view = store.find_by_key(&key).unwrap().unwrap();
        assert_eq!(view.total_marks, 10.0);
        assert_eq!(view.questions.len(), 6);
        assert_eq!(view.questions[&1], QuestionParts::new(5.0, 5.0, 0.0, 0.0));
    }

    #[test]
    fn test_upsert_rejects_key_for_another_student() {
        let store = ResultStore::open_in_memory().unwrap();
        let err = store
            .upsert(&ctx().key_for("B2"), &MarkRecord::zeroed("A1"))
            .unwrap_err();

        assert!(matches!(
            err,
            AppError::Validation(ValidationError::RollNumberMismatch { .. })
        ));
        assert_eq!(store.count_results().unwrap(), 0);
    }

    #[test]
    fn test_update_recomputes_total_from_stored_parts() {
        let store = ResultStore::open_in_memory().unwrap();
        let key = ctx().key_for("A2");
        let outcome = store
            .upsert(&key, &record("A2", QuestionParts::new(2.0, 2.0, 0.0, 0.0), 99.0))
            .unwrap();

        let mut marks = BTreeMap::new();
        marks.insert(3, QuestionParts::new(1.5, 2.5, 0.0, 1.0));
        let total = store.update_question_marks(outcome.result_id, &marks).unwrap();

        let view = store.find_by_key(&key).unwrap().unwrap();
        let expected: f64 = view.questions.values().map(QuestionParts::total).sum();
        assert_eq!(total, 9.0);
        assert_eq!(view.total_marks, expected);
        assert_eq!(view.questions[&3].a, 1.5);
    }

    #[test]
    fn test_update_errors() {
        let store = ResultStore::open_in_memory().unwrap();

        let mut marks = BTreeMap::new();
        marks.insert(1, QuestionParts::default());
        let err = store.update_question_marks(404, &marks).unwrap_err();
        assert_eq!(err.kind(), FailureKind::NotFound);

        let outcome = store
            .upsert(&ctx().key_for("A3"), &MarkRecord::zeroed("A3"))
            .unwrap();
        marks.insert(9, QuestionParts::default());
        let err = store.update_question_marks(outcome.result_id, &marks).unwrap_err();
        assert_eq!(err.kind(), FailureKind::Validation);
    }

    #[test]
    fn test_delete_missing_key_leaves_store_unchanged() {
        let store = ResultStore::open_in_memory().unwrap();
        store
            .upsert(&ctx().key_for("A1"), &MarkRecord::zeroed("A1"))
            .unwrap();

        let err = store.delete(&ctx().key_for("ZZ")).unwrap_err();
        assert!(matches!(err, AppError::NotFound(NotFoundError::IdentityKey(_))));
        assert_eq!(store.count_results().unwrap(), 1);

        store.delete(&ctx().key_for("A1")).unwrap();
        assert_eq!(store.count_results().unwrap(), 0);
        assert!(store.co_mark_rows(&ctx().filter()).unwrap().is_empty());
    }

    #[test]
    fn test_read_orders() {
        let store = ResultStore::open_in_memory().unwrap();
        let mid1 = ctx();
        let mid2 = ExamContext::new("3rd Year", "DBMS", "Mid 2", 2024);

        store.upsert(&mid1.key_for("B2"), &record("B2", QuestionParts::default(), 30.0)).unwrap();
        store.upsert(&mid1.key_for("A1"), &record("A1", QuestionParts::default(), 20.0)).unwrap();
        store.upsert(&mid2.key_for("A1"), &record("A1", QuestionParts::default(), 25.0)).unwrap();

        let by_filter = store.get_by_filter(&mid1.filter()).unwrap();
        let rolls: Vec<_> = by_filter.iter().map(|v| v.roll_number.as_str()).collect();
        assert_eq!(rolls, vec!["A1", "B2"]);

        let history = store.get_by_student("A1").unwrap();
        assert_eq!(history.len(), 2);
        assert!(history.iter().all(|v| v.questions.len() == 6));

        let summary = store.class_summary(&mid1.filter()).unwrap();
        assert_eq!(summary[0].roll_number, "B2");

        assert_eq!(store.get_all().unwrap().len(), 3);
        assert_eq!(store.exam_details().unwrap().len(), 2);
        assert!(store.get_by_student("nobody").unwrap().is_empty());
    }

    #[test]
    fn test_open_creates_parent_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("grades.db");

        let store = ResultStore::open(&path).unwrap();
        store
            .upsert(&ctx().key_for("A1"), &MarkRecord::zeroed("A1"))
            .unwrap();
        drop(store);

        let reopened = ResultStore::open(&path).unwrap();
        assert_eq!(reopened.count_results().unwrap(), 1);
    }
}

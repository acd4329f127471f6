//! 数据库表结构与一次性迁移

use rusqlite::{Connection, OptionalExtension};
use tracing::info;

/// 当前表结构版本（记录在 `PRAGMA user_version`）
pub const SCHEMA_VERSION: i64 = 1;

/// 建表、建索引，必要时从旧表迁移
pub fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS exam_results(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            roll_number TEXT NOT NULL,
            class_year TEXT NOT NULL,
            subject TEXT NOT NULL,
            exam_type TEXT NOT NULL,
            academic_year INTEGER NOT NULL,
            total_marks REAL NOT NULL,
            timestamp TEXT NOT NULL,
            UNIQUE(roll_number, class_year, subject, exam_type, academic_year)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_exam_results_cohort
            ON exam_results(class_year, subject, exam_type)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_exam_results_roll ON exam_results(roll_number)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS exam_question_marks(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            result_id INTEGER NOT NULL,
            question_number INTEGER NOT NULL CHECK(question_number BETWEEN 1 AND 6),
            part_a REAL NOT NULL DEFAULT 0,
            part_b REAL NOT NULL DEFAULT 0,
            part_c REAL NOT NULL DEFAULT 0,
            part_d REAL NOT NULL DEFAULT 0,
            UNIQUE(result_id, question_number),
            FOREIGN KEY(result_id) REFERENCES exam_results(id) ON DELETE CASCADE
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_exam_question_marks_result
            ON exam_question_marks(result_id)",
        [],
    )?;

    let version: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    if version < SCHEMA_VERSION {
        if table_exists(conn, "students_results")? && table_exists(conn, "question_marks")? {
            migrate_legacy(conn)?;
        }
        conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
    }

    Ok(())
}

fn table_exists(conn: &Connection, table: &str) -> rusqlite::Result<bool> {
    let found: Option<String> = conn
        .query_row(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?1",
            [table],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

/// 旧版两张表 → 规范表
///
/// 同一身份键保留最早的一行；找不到所属成绩的题目分数被跳过；
/// 迁移后每条成绩都补齐 6 行题目分数。旧表保持不动
fn migrate_legacy(conn: &Connection) -> rusqlite::Result<()> {
    let tx = conn.unchecked_transaction()?;

    let results = tx.execute(
        "INSERT OR IGNORE INTO exam_results
            (roll_number, class_year, subject, exam_type, academic_year, total_marks, timestamp)
         SELECT roll_number, class_year, subject, exam_type, year, total_marks,
                COALESCE(strftime('%Y-%m-%dT%H:%M:%fZ', timestamp), timestamp, '')
         FROM students_results
         ORDER BY id",
        [],
    )?;

    let marks = tx.execute(
        "INSERT OR IGNORE INTO exam_question_marks
            (result_id, question_number, part_a, part_b, part_c, part_d)
         SELECT er.id, qm.question_number, qm.part_a, qm.part_b, qm.part_c, qm.part_d
         FROM question_marks qm
         JOIN students_results sr ON sr.id = qm.result_id
         JOIN exam_results er
           ON er.roll_number = sr.roll_number
          AND er.class_year = sr.class_year
          AND er.subject = sr.subject
          AND er.exam_type = sr.exam_type
          AND er.academic_year = sr.year
         WHERE qm.question_number BETWEEN 1 AND 6
           AND sr.id = (
               SELECT MIN(s2.id) FROM students_results s2
               WHERE s2.roll_number = sr.roll_number
                 AND s2.class_year = sr.class_year
                 AND s2.subject = sr.subject
                 AND s2.exam_type = sr.exam_type
                 AND s2.year = sr.year
           )
         ORDER BY qm.id",
        [],
    )?;

    // 缺失的题目补 0
    {
        let mut ids_stmt = tx.prepare("SELECT id FROM exam_results ORDER BY id")?;
        let ids = ids_stmt
            .query_map([], |row| row.get::<_, i64>(0))?
            .collect::<Result<Vec<_>, _>>()?;

        let mut fill_stmt = tx.prepare(
            "INSERT OR IGNORE INTO exam_question_marks
                (result_id, question_number, part_a, part_b, part_c, part_d)
             VALUES (?1, ?2, 0, 0, 0, 0)",
        )?;
        for id in ids {
            for question in 1..=6_i64 {
                fill_stmt.execute([id, question])?;
            }
        }
    }

    tx.commit()?;

    info!("📦 旧数据迁移完成: {} 条成绩, {} 条题目分数", results, marks);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_legacy_tables(conn: &Connection) {
        conn.execute_batch(
            "CREATE TABLE students_results(
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                roll_number TEXT NOT NULL,
                class_year TEXT NOT NULL,
                subject TEXT NOT NULL,
                exam_type TEXT NOT NULL,
                year INTEGER NOT NULL,
                total_marks REAL NOT NULL,
                timestamp DATETIME DEFAULT CURRENT_TIMESTAMP);
             CREATE TABLE question_marks(
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                result_id INTEGER NOT NULL,
                question_number INTEGER NOT NULL,
                part_a REAL NOT NULL,
                part_b REAL NOT NULL,
                part_c REAL NOT NULL,
                part_d REAL NOT NULL);",
        )
        .unwrap();
    }

    #[test]
    fn test_init_schema_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        init_schema(&conn).unwrap();

        let version: i64 = conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))
            .unwrap();
        assert_eq!(version, SCHEMA_VERSION);
    }

    #[test]
    fn test_migrates_legacy_rows() {
        let conn = Connection::open_in_memory().unwrap();
        create_legacy_tables(&conn);
        conn.execute_batch(
            "INSERT INTO students_results (roll_number, class_year, subject, exam_type, year, total_marks, timestamp)
                VALUES ('A1', '3rd', 'DBMS', 'Mid 1', 2024, 12, '2024-03-01 10:00:00');
             INSERT INTO students_results (roll_number, class_year, subject, exam_type, year, total_marks, timestamp)
                VALUES ('A1', '3rd', 'DBMS', 'Mid 1', 2024, 99, '2024-03-02 10:00:00');
             INSERT INTO question_marks (result_id, question_number, part_a, part_b, part_c, part_d)
                VALUES (1, 1, 5, 5, 2, 0);
             INSERT INTO question_marks (result_id, question_number, part_a, part_b, part_c, part_d)
                VALUES (2, 2, 8, 8, 8, 8);
             INSERT INTO question_marks (result_id, question_number, part_a, part_b, part_c, part_d)
                VALUES (42, 1, 1, 1, 1, 1);",
        )
        .unwrap();

        init_schema(&conn).unwrap();

        let (count, total, timestamp): (i64, f64, String) = conn
            .query_row(
                "SELECT COUNT(*), MAX(total_marks), MAX(timestamp) FROM exam_results",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .unwrap();
        assert_eq!(count, 1);
        assert_eq!(total, 12.0);
        assert_eq!(timestamp, "2024-03-01T10:00:00.000Z");

        let rows: i64 = conn
            .query_row("SELECT COUNT(*) FROM exam_question_marks", [], |row| row.get(0))
            .unwrap();
        assert_eq!(rows, 6);

        // 重复行的分数不会混入
        let q2: f64 = conn
            .query_row(
                "SELECT part_a FROM exam_question_marks WHERE question_number = 2",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(q2, 0.0);
    }
}

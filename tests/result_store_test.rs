//! 存储层集成测试：幂等写入、总分不变量、删除与并发

use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread;

use answer_sheet_grader::error::NotFoundError;
use answer_sheet_grader::services::{ExtractionNormalizer, MarkValidator};
use answer_sheet_grader::{AppError, ExamContext, MarkRecord, QuestionParts, ResultStore};

fn exam() -> ExamContext {
    ExamContext::new("2nd Year", "Networks", "Mid 2", 2025)
}

fn record_with_q1(roll: &str, a: f64) -> MarkRecord {
    let mut record = MarkRecord::zeroed(roll);
    record.questions.insert(1, QuestionParts::new(a, 0.0, 0.0, 0.0));
    record.total_marks = a;
    record
}

#[test]
fn test_normalized_text_round_trips_through_store() {
    let store = ResultStore::open_in_memory().unwrap();
    let normalized = ExtractionNormalizer::new()
        .normalize("Q2:5 5\nQ4:5 8\nTotal:23\nRoll No: A1")
        .unwrap();
    let record = MarkValidator::default().validate(&normalized.candidate).unwrap();

    store.upsert(&exam().key_for("A1"), &record).unwrap();

    let view = store.find_by_key(&exam().key_for("A1")).unwrap().unwrap();
    assert_eq!(view.total_marks, 23.0);
    assert_eq!(view.questions[&2], QuestionParts::new(5.0, 5.0, 0.0, 0.0));
    assert_eq!(view.questions[&4], QuestionParts::new(5.0, 8.0, 0.0, 0.0));
    for q in [1, 3, 5, 6] {
        assert_eq!(view.questions[&q], QuestionParts::default());
    }

    let json = serde_json::to_value(&view).unwrap();
    assert_eq!(json["questions"]["Q4"]["b"], 8.0);
}

#[test]
fn test_total_equals_stored_parts_after_update() {
    let store = ResultStore::open_in_memory().unwrap();
    let outcome = store.upsert(&exam().key_for("C9"), &record_with_q1("C9", 3.0)).unwrap();

    let mut marks = BTreeMap::new();
    marks.insert(2, QuestionParts::new(0.1, 0.2, 0.3, 0.4));
    marks.insert(5, QuestionParts::new(1.25, 0.0, 0.0, 2.5));
    let total = store.update_question_marks(outcome.result_id, &marks).unwrap();

    let view = store.find_by_key(&exam().key_for("C9")).unwrap().unwrap();
    let stored: f64 = view.questions.values().map(QuestionParts::total).sum();
    assert_eq!(view.total_marks, stored);
    assert_eq!(total, stored);
}

#[test]
fn test_delete_missing_key_is_not_found() {
    let store = ResultStore::open_in_memory().unwrap();
    store.upsert(&exam().key_for("D1"), &record_with_q1("D1", 1.0)).unwrap();
    let before = store.get_all().unwrap();

    let err = store.delete(&exam().key_for("D2")).unwrap_err();
    assert!(matches!(err, AppError::NotFound(NotFoundError::IdentityKey(_))));
    assert_eq!(store.get_all().unwrap(), before);
}

#[test]
fn test_concurrent_upserts_on_one_key_keep_one_row() {
    let store = Arc::new(ResultStore::open_in_memory().unwrap());
    let key = exam().key_for("E5");

    let handles: Vec<_> = (1..=8)
        .map(|i| {
            let store = store.clone();
            let key = key.clone();
            thread::spawn(move || store.upsert(&key, &record_with_q1("E5", f64::from(i))).unwrap())
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(store.count_results().unwrap(), 1);
    let view = store.find_by_key(&key).unwrap().unwrap();
    assert_eq!(view.questions.len(), 6);
    assert_eq!(view.total_marks, view.questions[&1].a);
}

#[test]
fn test_two_connections_on_one_file_keep_one_row() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("grades.db");
    let first = Arc::new(ResultStore::open(&path).unwrap());
    let second = Arc::new(ResultStore::open(&path).unwrap());
    let key = exam().key_for("F6");

    let handles: Vec<_> = [first.clone(), second.clone()]
        .into_iter()
        .enumerate()
        .map(|(n, store)| {
            let key = key.clone();
            thread::spawn(move || {
                for i in 0..5 {
                    let mark = (n * 5 + i) as f64 / 10.0;
                    store.upsert(&key, &record_with_q1("F6", mark)).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(first.count_results().unwrap(), 1);
    let view = second.find_by_key(&key).unwrap().unwrap();
    assert_eq!(view.questions.len(), 6);
    assert_eq!(view.total_marks, view.questions[&1].a);
}

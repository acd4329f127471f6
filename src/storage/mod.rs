//! 持久化层
//!
//! SQLite 两张规范表：`exam_results`（身份键唯一）与 `exam_question_marks`

pub mod result_store;
pub mod schema;

pub use result_store::ResultStore;

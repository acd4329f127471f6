use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::mark_record::{question_keys, QuestionParts};

/// 考试信息（一个批次共享）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExamContext {
    pub class_year: String,
    pub subject: String,
    pub exam_type: String,
    pub academic_year: i32,
}

impl ExamContext {
    pub fn new(
        class_year: impl Into<String>,
        subject: impl Into<String>,
        exam_type: impl Into<String>,
        academic_year: i32,
    ) -> Self {
        Self {
            class_year: class_year.into(),
            subject: subject.into(),
            exam_type: exam_type.into(),
            academic_year,
        }
    }

    /// 为某个学号生成身份键
    pub fn key_for(&self, roll_number: impl Into<String>) -> IdentityKey {
        IdentityKey {
            roll_number: roll_number.into(),
            class_year: self.class_year.clone(),
            subject: self.subject.clone(),
            exam_type: self.exam_type.clone(),
            academic_year: self.academic_year,
        }
    }

    /// 对应的班级筛选条件
    pub fn filter(&self) -> ResultFilter {
        ResultFilter::new(&self.class_year, &self.subject, &self.exam_type)
    }
}

/// 成绩记录的身份键
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IdentityKey {
    pub roll_number: String,
    pub class_year: String,
    pub subject: String,
    pub exam_type: String,
    pub academic_year: i32,
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[学号 {} | {} | {} | {} | {}]",
            self.roll_number, self.class_year, self.subject, self.exam_type, self.academic_year
        )
    }
}

/// 按班级、科目、考试类型筛选
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultFilter {
    pub class_year: String,
    pub subject: String,
    pub exam_type: String,
}

impl ResultFilter {
    pub fn new(
        class_year: impl Into<String>,
        subject: impl Into<String>,
        exam_type: impl Into<String>,
    ) -> Self {
        Self {
            class_year: class_year.into(),
            subject: subject.into(),
            exam_type: exam_type.into(),
        }
    }
}

/// 成绩记录与其题目分数的联合视图
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExamResultView {
    pub id: i64,
    pub roll_number: String,
    pub class_year: String,
    pub subject: String,
    pub exam_type: String,
    pub academic_year: i32,
    pub total_marks: f64,
    pub timestamp: String,
    #[serde(serialize_with = "question_keys::serialize")]
    pub questions: BTreeMap<u8, QuestionParts>,
}

/// CO 分析使用的扁平行
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QuestionMarkRow {
    pub roll_number: String,
    pub exam_type: String,
    pub question_number: u8,
    pub parts: QuestionParts,
}

/// 已存在的考试组合
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExamDetails {
    pub class_year: String,
    pub subject: String,
    pub exam_type: String,
}

/// 班级成绩概览（按总分降序）
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassSummaryEntry {
    pub roll_number: String,
    pub total_marks: f64,
}

/// upsert 的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct UpsertOutcome {
    pub result_id: i64,
    /// true = 新建，false = 覆盖已有记录
    pub created: bool,
}

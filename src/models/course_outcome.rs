//! 课程目标（CO）映射
//!
//! (考试类型, 题号) → CO 标签，静态规则表，未映射的组合返回 `None`（即 N/A）

use std::fmt;

use serde::{Serialize, Serializer};

/// CO 标签
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CoLabel {
    Co1,
    Co2,
    Co3,
    Co4,
    Co5,
}

impl CoLabel {
    pub fn as_str(self) -> &'static str {
        match self {
            CoLabel::Co1 => "CO1",
            CoLabel::Co2 => "CO2",
            CoLabel::Co3 => "CO3",
            CoLabel::Co4 => "CO4",
            CoLabel::Co5 => "CO5",
        }
    }
}

impl fmt::Display for CoLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for CoLabel {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// 未映射题目的展示标签
pub const NOT_APPLICABLE: &str = "N/A";

/// 考试类型 → Q1..Q6 的 CO
static CO_TABLE: phf::Map<&'static str, [CoLabel; 6]> = phf::phf_map! {
    "mid1" => [CoLabel::Co1, CoLabel::Co1, CoLabel::Co2, CoLabel::Co2, CoLabel::Co3, CoLabel::Co3],
    "mid2" => [CoLabel::Co3, CoLabel::Co3, CoLabel::Co4, CoLabel::Co4, CoLabel::Co5, CoLabel::Co5],
};

/// 规范化考试类型："Mid 1" / "Mid-1" / "mid_1" → "mid1"
fn normalize_exam_type(exam_type: &str) -> String {
    exam_type
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '-' && *c != '_')
        .flat_map(char::to_lowercase)
        .collect()
}

/// 查找题目对应的 CO
pub fn course_outcome(exam_type: &str, question_number: u8) -> Option<CoLabel> {
    if !(1..=6).contains(&question_number) {
        return None;
    }
    CO_TABLE
        .get(normalize_exam_type(exam_type).as_str())
        .map(|row| row[usize::from(question_number - 1)])
}

/// CO 展示标签，未映射时为 "N/A"
pub fn course_outcome_label(exam_type: &str, question_number: u8) -> &'static str {
    course_outcome(exam_type, question_number)
        .map(CoLabel::as_str)
        .unwrap_or(NOT_APPLICABLE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mid_one_mapping() {
        assert_eq!(course_outcome("Mid 1", 1), Some(CoLabel::Co1));
        assert_eq!(course_outcome("Mid 1", 2), Some(CoLabel::Co1));
        assert_eq!(course_outcome("Mid-1", 3), Some(CoLabel::Co2));
        assert_eq!(course_outcome("mid1", 4), Some(CoLabel::Co2));
        assert_eq!(course_outcome("MID_1", 6), Some(CoLabel::Co3));
    }

    #[test]
    fn test_mid_two_mapping() {
        assert_eq!(course_outcome("Mid 2", 1), Some(CoLabel::Co3));
        assert_eq!(course_outcome("Mid 2", 4), Some(CoLabel::Co4));
        assert_eq!(course_outcome("Mid 2", 5), Some(CoLabel::Co5));
    }

    #[test]
    fn test_unmapped_is_not_applicable() {
        assert_eq!(course_outcome("Final", 1), None);
        assert_eq!(course_outcome("Mid 1", 7), None);
        assert_eq!(course_outcome("Mid 1", 0), None);
        assert_eq!(course_outcome_label("Final", 3), "N/A");
        assert_eq!(course_outcome_label("Mid 2", 6), "CO5");
    }

    #[test]
    fn test_labels_sort_in_order() {
        let mut labels = vec![CoLabel::Co3, CoLabel::Co1, CoLabel::Co2];
        labels.sort();
        assert_eq!(labels, vec![CoLabel::Co1, CoLabel::Co2, CoLabel::Co3]);
        assert_eq!(serde_json::to_value(CoLabel::Co4).unwrap(), "CO4");
    }
}

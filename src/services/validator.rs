//! 分数校验 - 业务能力层
//!
//! 候选记录 → 规范记录：补齐 6 题 × 4 小题，按分值策略清洗每个小题

use std::collections::BTreeMap;

use tracing::warn;

use crate::error::ValidationError;
use crate::models::{CandidateRecord, MarkRecord, PartialParts, QuestionParts, QUESTION_COUNT};

/// 分数校验器
///
/// 纯函数，相同输入永远得到相同输出。
/// 只有学号为空或总分不是有限数字时才拒绝记录
#[derive(Debug, Clone, Copy)]
pub struct MarkValidator {
    /// 小题分数上限，超出者置 0；`None` 表示不限制
    max_part_mark: Option<f64>,
}

impl Default for MarkValidator {
    fn default() -> Self {
        Self::new(Some(8.0))
    }
}

impl MarkValidator {
    pub fn new(max_part_mark: Option<f64>) -> Self {
        Self { max_part_mark }
    }

    pub fn validate(&self, candidate: &CandidateRecord) -> Result<MarkRecord, ValidationError> {
        let roll_number = candidate
            .roll_number
            .as_deref()
            .map(str::trim)
            .filter(|roll| !roll.is_empty())
            .ok_or(ValidationError::MissingRollNumber)?
            .to_string();

        let total_marks = candidate
            .total_marks
            .filter(|total| total.is_finite())
            .ok_or(ValidationError::UnresolvableTotal)?;

        for number in candidate.questions.keys() {
            if !(1..=QUESTION_COUNT).contains(number) {
                warn!(
                    "[学号 {}] 丢弃超出范围的题号: {}",
                    roll_number,
                    ValidationError::InvalidQuestionNumber { number: *number }
                );
            }
        }

        let questions: BTreeMap<u8, QuestionParts> = (1..=QUESTION_COUNT)
            .map(|number| {
                let parts = candidate
                    .questions
                    .get(&number)
                    .map(|partial| self.clean_parts(partial))
                    .unwrap_or_default();
                (number, parts)
            })
            .collect();

        Ok(MarkRecord {
            roll_number,
            questions,
            total_marks,
        })
    }

    fn clean_parts(&self, partial: &PartialParts) -> QuestionParts {
        let [a, b, c, d] = partial.values().map(|value| self.clean_mark(value));
        QuestionParts::new(a, b, c, d)
    }

    /// 缺失、非有限、负数、超出上限 → 0
    fn clean_mark(&self, value: Option<f64>) -> f64 {
        match value {
            Some(mark) if mark.is_finite() && mark >= 0.0 => match self.max_part_mark {
                Some(max) if mark > max => 0.0,
                _ => mark,
            },
            _ => 0.0,
        }
    }
}

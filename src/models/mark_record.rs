//! 分数记录模型
//!
//! `CandidateRecord` 是解析器的产物（字段可能缺失），
//! `MarkRecord` 是校验后的规范记录（固定 6 题 × 4 小题）

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// 每张答题卡的题目数量
pub const QUESTION_COUNT: u8 = 6;

/// 单个题目的四个小题分数
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct QuestionParts {
    #[serde(default)]
    pub a: f64,
    #[serde(default)]
    pub b: f64,
    #[serde(default)]
    pub c: f64,
    #[serde(default)]
    pub d: f64,
}

impl QuestionParts {
    pub fn new(a: f64, b: f64, c: f64, d: f64) -> Self {
        Self { a, b, c, d }
    }

    /// 四个小题之和
    pub fn total(&self) -> f64 {
        self.a + self.b + self.c + self.d
    }
}

/// 解析得到的单题分数，小题可能缺失
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PartialParts {
    pub a: Option<f64>,
    pub b: Option<f64>,
    pub c: Option<f64>,
    pub d: Option<f64>,
}

impl PartialParts {
    /// 按位置填充（最多四个值）
    pub fn from_values(values: &[f64]) -> Self {
        let mut parts = Self::default();
        for (idx, value) in values.iter().take(4).enumerate() {
            parts.set(idx, Some(*value));
        }
        parts
    }

    /// 按下标设置小题（0 = a）
    pub fn set(&mut self, idx: usize, value: Option<f64>) {
        match idx {
            0 => self.a = value,
            1 => self.b = value,
            2 => self.c = value,
            3 => self.d = value,
            _ => {}
        }
    }

    pub fn values(&self) -> [Option<f64>; 4] {
        [self.a, self.b, self.c, self.d]
    }

    /// 已解析小题之和
    pub fn sum(&self) -> f64 {
        self.values().iter().flatten().sum()
    }
}

/// 候选记录（解析器输出，校验器输入）
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CandidateRecord {
    pub roll_number: Option<String>,
    pub questions: BTreeMap<u8, PartialParts>,
    pub total_marks: Option<f64>,
}

/// 规范分数记录
///
/// 不变量：`questions` 恰好包含 1..=6
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarkRecord {
    pub roll_number: String,
    #[serde(with = "question_keys")]
    pub questions: BTreeMap<u8, QuestionParts>,
    pub total_marks: f64,
}

impl MarkRecord {
    /// 以全 0 分数创建记录
    pub fn zeroed(roll_number: impl Into<String>) -> Self {
        Self {
            roll_number: roll_number.into(),
            questions: (1..=QUESTION_COUNT)
                .map(|q| (q, QuestionParts::default()))
                .collect(),
            total_marks: 0.0,
        }
    }

    /// 所有小题之和
    pub fn parts_sum(&self) -> f64 {
        self.questions.values().map(QuestionParts::total).sum()
    }
}

/// 解析题号键：`Q1` / `q1` / `1` / `Question 1`
pub fn parse_question_key(key: &str) -> Option<u8> {
    let trimmed = key.trim();
    let lower = trimmed.to_ascii_lowercase();
    let digits = lower
        .strip_prefix("question")
        .or_else(|| lower.strip_prefix('q'))
        .unwrap_or(&lower)
        .trim_start_matches(|c: char| c == ' ' || c == '_' || c == '-' || c == '.');
    digits.parse::<u8>().ok()
}

/// 题号键格式化为 `Q{n}`
pub fn question_key(number: u8) -> String {
    format!("Q{}", number)
}

/// 以 `Q1..Q6` 为键的序列化
pub mod question_keys {
    use std::collections::BTreeMap;

    use serde::de::Error as _;
    use serde::ser::SerializeMap;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    use super::{parse_question_key, question_key};

    pub fn serialize<S, V>(map: &BTreeMap<u8, V>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
        V: Serialize,
    {
        let mut out = serializer.serialize_map(Some(map.len()))?;
        for (number, value) in map {
            out.serialize_entry(&question_key(*number), value)?;
        }
        out.end()
    }

    pub fn deserialize<'de, D, V>(deserializer: D) -> Result<BTreeMap<u8, V>, D::Error>
    where
        D: Deserializer<'de>,
        V: Deserialize<'de>,
    {
        let raw: BTreeMap<String, V> = BTreeMap::deserialize(deserializer)?;
        raw.into_iter()
            .map(|(key, value)| {
                parse_question_key(&key)
                    .map(|number| (number, value))
                    .ok_or_else(|| D::Error::custom(format!("无效的题号: {}", key)))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_question_key_variants() {
        assert_eq!(parse_question_key("Q1"), Some(1));
        assert_eq!(parse_question_key("q6"), Some(6));
        assert_eq!(parse_question_key("3"), Some(3));
        assert_eq!(parse_question_key("Question 4"), Some(4));
        assert_eq!(parse_question_key("Q_5"), Some(5));
        assert_eq!(parse_question_key("total"), None);
    }

    #[test]
    fn test_mark_record_serializes_with_q_keys() {
        let mut record = MarkRecord::zeroed("A1");
        record.questions.insert(2, QuestionParts::new(5.0, 5.0, 0.0, 0.0));
        record.total_marks = 10.0;

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["roll_number"], "A1");
        assert_eq!(json["questions"]["Q2"]["b"], 5.0);
        assert_eq!(json["questions"].as_object().unwrap().len(), 6);

        let back: MarkRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn test_partial_parts_from_values_caps_at_four() {
        let parts = PartialParts::from_values(&[1.0, 2.0, 3.0, 4.0, 5.0]);
        assert_eq!(parts.values(), [Some(1.0), Some(2.0), Some(3.0), Some(4.0)]);
        assert_eq!(parts.sum(), 10.0);

        let parts = PartialParts::from_values(&[5.0]);
        assert_eq!(parts.b, None);
        assert_eq!(parts.sum(), 5.0);
    }
}

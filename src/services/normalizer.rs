//! 提取结果规范化 - 业务能力层
//!
//! 只负责"原始文本 → 候选记录"能力。提取服务的输出并不可靠：
//! 可能是裸 JSON、markdown 代码块、夹杂说明文字，甚至只有逐行文本。
//! 因此按顺序尝试一组解析策略，第一个得到候选记录的策略胜出：
//!
//! 1. `DirectJson`：整段文本直接按 JSON 解析
//! 2. `FencedJson`：提取 ```json 代码块后解析
//! 3. `BraceBounded`：取第一个 `{` 到最后一个 `}` 之间的内容解析
//! 4. `LineOriented`：逐行正则匹配学号、题目分数、总分
//! 5. `PartialJson`：接受缺少部分字段的 JSON 对象，缺失字段留给总分规则和校验器
//!
//! 前三个策略要求 JSON 同时包含 roll_number / questions / total_marks

use std::collections::BTreeMap;
use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value as JsonValue;
use tracing::debug;

use crate::error::ParseError;
use crate::models::mark_record::parse_question_key;
use crate::models::{CandidateRecord, PartialParts};
use crate::utils::logging::truncate_text;

static FENCED_JSON_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)```[ \t]*json[ \t]*\r?\n?(.*?)```").expect("valid regex"));

static QUESTION_LINE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\s*Q(?:uestion)?\s*\.?\s*([1-6])\b\s*[:.)=\-]?\s*(.*)$").expect("valid regex")
});

static TOTAL_LINE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\btotal(?:\s*marks)?\s*[:=\-]?\s*(-?\d+(?:\.\d+)?)").expect("valid regex")
});

static ROLL_LINE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\broll(?:[\s_.\-]*(?:number|num|no))?\b\s*\.?\s*[:#=\-]?\s*([A-Za-z0-9]+)")
        .expect("valid regex")
});

static NUMBER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"-?\d+(?:\.\d+)?").expect("valid regex"));

/// 解析策略类别
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyKind {
    DirectJson,
    FencedJson,
    BraceBounded,
    LineOriented,
    PartialJson,
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StrategyKind::DirectJson => "direct-json",
            StrategyKind::FencedJson => "fenced-json",
            StrategyKind::BraceBounded => "brace-bounded",
            StrategyKind::LineOriented => "line-oriented",
            StrategyKind::PartialJson => "partial-json",
        };
        f.write_str(name)
    }
}

/// 单个解析策略
///
/// 策略必须是纯函数：相同输入得到相同输出，不产生副作用
pub trait ParseStrategy: Send + Sync {
    fn kind(&self) -> StrategyKind;

    /// 识别成功时返回候选记录，否则返回 `None`
    fn parse(&self, raw: &str) -> Option<CandidateRecord>;
}

/// 整段文本直接解析
pub struct DirectJson;

impl ParseStrategy for DirectJson {
    fn kind(&self) -> StrategyKind {
        StrategyKind::DirectJson
    }

    fn parse(&self, raw: &str) -> Option<CandidateRecord> {
        parse_json_candidate(raw.trim(), JsonFields::All)
    }
}

/// markdown ```json 代码块
pub struct FencedJson;

impl ParseStrategy for FencedJson {
    fn kind(&self) -> StrategyKind {
        StrategyKind::FencedJson
    }

    fn parse(&self, raw: &str) -> Option<CandidateRecord> {
        FENCED_JSON_RE
            .captures_iter(raw)
            .filter_map(|caps| caps.get(1))
            .find_map(|body| parse_json_candidate(body.as_str().trim(), JsonFields::All))
    }
}

/// 第一个 `{` 到最后一个 `}`
pub struct BraceBounded;

impl ParseStrategy for BraceBounded {
    fn kind(&self) -> StrategyKind {
        StrategyKind::BraceBounded
    }

    fn parse(&self, raw: &str) -> Option<CandidateRecord> {
        brace_bounded(raw).and_then(|body| parse_json_candidate(body, JsonFields::All))
    }
}

fn brace_bounded(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    (end > start).then(|| &raw[start..=end])
}

/// 逐行正则兜底
///
/// 至少识别出学号、题目行或总分之一才算成功，未识别的字段保持缺失
pub struct LineOriented;

impl ParseStrategy for LineOriented {
    fn kind(&self) -> StrategyKind {
        StrategyKind::LineOriented
    }

    fn parse(&self, raw: &str) -> Option<CandidateRecord> {
        let mut candidate = CandidateRecord::default();
        let mut recognized = false;

        for line in raw.lines().map(str::trim).filter(|l| !l.is_empty()) {
            if let Some(caps) = QUESTION_LINE_RE.captures(line) {
                let number = caps[1].parse::<u8>().ok()?;
                let marks: Vec<f64> = NUMBER_RE
                    .find_iter(caps.get(2).map_or("", |m| m.as_str()))
                    .filter_map(|m| m.as_str().parse::<f64>().ok())
                    .take(4)
                    .collect();
                candidate
                    .questions
                    .insert(number, PartialParts::from_values(&marks));
                recognized = true;
                continue;
            }

            if let Some(caps) = TOTAL_LINE_RE.captures(line) {
                if let Ok(total) = caps[1].parse::<f64>() {
                    candidate.total_marks = Some(total);
                    recognized = true;
                }
            }

            // 只取第一个学号，后面的说明文字不能覆盖它
            if candidate.roll_number.is_none() {
                if let Some(caps) = ROLL_LINE_RE.captures(line) {
                    let token = &caps[1];
                    if !is_roll_label(token) {
                        candidate.roll_number = Some(token.to_string());
                        recognized = true;
                    }
                }
            }
        }

        recognized.then_some(candidate)
    }
}

/// 宽松 JSON 兜底
///
/// 依次查看整段文本、```json 代码块、花括号范围，取第一个至少包含
/// roll_number / questions / total_marks 之一的 JSON 对象
pub struct PartialJson;

impl ParseStrategy for PartialJson {
    fn kind(&self) -> StrategyKind {
        StrategyKind::PartialJson
    }

    fn parse(&self, raw: &str) -> Option<CandidateRecord> {
        let whole = std::iter::once(raw.trim());
        let fenced = FENCED_JSON_RE
            .captures_iter(raw)
            .filter_map(|caps| caps.get(1))
            .map(|body| body.as_str().trim());
        let braced = brace_bounded(raw).into_iter();

        whole
            .chain(fenced)
            .chain(braced)
            .find_map(|text| parse_json_candidate(text, JsonFields::Any))
    }
}

/// 标签词本身不能当作学号（如 "Roll No:" 后面为空）
fn is_roll_label(token: &str) -> bool {
    matches!(token.to_ascii_lowercase().as_str(), "no" | "number" | "num")
}

/// 规范化输出
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedOutput {
    pub candidate: CandidateRecord,
    /// 产生该候选记录的策略
    pub strategy: StrategyKind,
}

/// 提取结果规范化器
///
/// 职责：
/// - 按顺序执行解析策略链
/// - 统一总分规则：显式数字总分原样使用，否则为各小题之和（保留一位小数）
/// - 不判断记录是否可接受（由 `MarkValidator` 决定）
pub struct ExtractionNormalizer {
    strategies: Vec<Box<dyn ParseStrategy>>,
}

impl Default for ExtractionNormalizer {
    fn default() -> Self {
        Self::new()
    }
}

impl ExtractionNormalizer {
    /// 默认策略链
    pub fn new() -> Self {
        Self::with_strategies(vec![
            Box::new(DirectJson),
            Box::new(FencedJson),
            Box::new(BraceBounded),
            Box::new(LineOriented),
            Box::new(PartialJson),
        ])
    }

    /// 自定义策略链
    pub fn with_strategies(strategies: Vec<Box<dyn ParseStrategy>>) -> Self {
        Self { strategies }
    }

    /// 原始文本 → 候选记录
    pub fn normalize(&self, raw: &str) -> Result<NormalizedOutput, ParseError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(ParseError::EmptyInput);
        }

        for strategy in &self.strategies {
            if let Some(mut candidate) = strategy.parse(trimmed) {
                candidate.total_marks =
                    Some(resolve_total(candidate.total_marks, &candidate.questions));

                debug!(
                    "策略 {} 解析成功: 学号 {:?}, {} 道题, 总分 {:?}",
                    strategy.kind(),
                    candidate.roll_number,
                    candidate.questions.len(),
                    candidate.total_marks
                );

                return Ok(NormalizedOutput {
                    candidate,
                    strategy: strategy.kind(),
                });
            }
            debug!("策略 {} 未能解析", strategy.kind());
        }

        Err(ParseError::NoStrategyMatched {
            preview: truncate_text(trimmed, 80),
        })
    }
}

/// 显式总分原样使用，否则按小题求和并保留一位小数
pub fn resolve_total(explicit: Option<f64>, questions: &BTreeMap<u8, PartialParts>) -> f64 {
    match explicit.filter(|t| t.is_finite()) {
        Some(total) => total,
        None => round_1_decimal(questions.values().map(PartialParts::sum).sum()),
    }
}

fn round_1_decimal(x: f64) -> f64 {
    (x * 10.0).round() / 10.0
}

// ========== JSON 转换 ==========

/// 顶层字段要求
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JsonFields {
    /// roll_number / questions / total_marks 必须同时存在
    All,
    /// 至少存在其中之一
    Any,
}

fn parse_json_candidate(text: &str, fields: JsonFields) -> Option<CandidateRecord> {
    let value: JsonValue = serde_json::from_str(text).ok()?;
    candidate_from_value(&value, fields)
}

fn candidate_from_value(value: &JsonValue, fields: JsonFields) -> Option<CandidateRecord> {
    let obj = value.as_object()?;
    let roll = obj.get("roll_number");
    let questions = obj.get("questions");
    let total = obj.get("total_marks");

    let present = [roll, questions, total].iter().filter(|f| f.is_some()).count();
    let accepted = match fields {
        JsonFields::All => present == 3,
        JsonFields::Any => present > 0,
    };
    if !accepted {
        return None;
    }

    Some(CandidateRecord {
        roll_number: roll.and_then(roll_from_value),
        questions: questions.map(questions_from_value).unwrap_or_default(),
        total_marks: total.and_then(number_from_value),
    })
}

fn roll_from_value(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::String(s) => Some(s.trim().to_string()).filter(|s| !s.is_empty()),
        JsonValue::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// 数字或数字字符串，其他类型视为缺失
fn number_from_value(value: &JsonValue) -> Option<f64> {
    let number = match value {
        JsonValue::Number(n) => n.as_f64(),
        JsonValue::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }?;
    number.is_finite().then_some(number)
}

fn questions_from_value(value: &JsonValue) -> BTreeMap<u8, PartialParts> {
    match value {
        JsonValue::Object(map) => map
            .iter()
            .filter_map(|(key, parts)| Some((parse_question_key(key)?, parts_from_value(parts))))
            .collect(),
        JsonValue::Array(items) => items
            .iter()
            .enumerate()
            .filter_map(|(idx, parts)| Some((u8::try_from(idx + 1).ok()?, parts_from_value(parts))))
            .collect(),
        _ => BTreeMap::new(),
    }
}

fn parts_from_value(value: &JsonValue) -> PartialParts {
    let mut parts = PartialParts::default();
    match value {
        JsonValue::Object(map) => {
            for (key, mark) in map {
                if let Some(idx) = part_index(key) {
                    parts.set(idx, number_from_value(mark));
                }
            }
        }
        JsonValue::Array(items) => {
            for (idx, mark) in items.iter().take(4).enumerate() {
                parts.set(idx, number_from_value(mark));
            }
        }
        _ => {}
    }
    parts
}

/// `a` / `A` / `part_a` / `partA` → 0
fn part_index(key: &str) -> Option<usize> {
    let lower = key.trim().to_ascii_lowercase();
    let label = lower
        .strip_prefix("part")
        .unwrap_or(&lower)
        .trim_start_matches(|c: char| c == '_' || c == ' ' || c == '-');
    match label {
        "a" => Some(0),
        "b" => Some(1),
        "c" => Some(2),
        "d" => Some(3),
        _ => None,
    }
}

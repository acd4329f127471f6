//! 成绩统计
//!
//! 总分的平均/最高/最低、各题各小题平均分、学生成绩分析、班级分析

use std::collections::BTreeMap;

use serde::Serialize;

use super::co_aggregator::{percentages, round_2_decimal, CoAggregator, CohortAttainment};
use crate::models::mark_record::question_keys;
use crate::models::{CoLabel, ExamResultView, QuestionParts};

/// 总分统计（空集合时全为 0）
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct ResultStatistics {
    pub count: usize,
    pub average: f64,
    pub highest: f64,
    pub lowest: f64,
}

pub fn result_statistics(results: &[ExamResultView]) -> ResultStatistics {
    if results.is_empty() {
        return ResultStatistics::default();
    }

    let totals = results.iter().map(|r| r.total_marks);
    let sum: f64 = totals.clone().sum();

    ResultStatistics {
        count: results.len(),
        average: sum / results.len() as f64,
        highest: totals.clone().fold(f64::NEG_INFINITY, f64::max),
        lowest: totals.fold(f64::INFINITY, f64::min),
    }
}

/// 各题各小题平均分（两位小数），只统计包含该题的成绩
pub fn question_averages(results: &[ExamResultView]) -> BTreeMap<u8, QuestionParts> {
    let mut sums: BTreeMap<u8, (QuestionParts, usize)> = BTreeMap::new();
    for result in results {
        for (number, parts) in &result.questions {
            let (sum, count) = sums.entry(*number).or_default();
            sum.a += parts.a;
            sum.b += parts.b;
            sum.c += parts.c;
            sum.d += parts.d;
            *count += 1;
        }
    }

    sums.into_iter()
        .map(|(number, (sum, count))| {
            let n = count as f64;
            let avg = QuestionParts::new(
                round_2_decimal(sum.a / n),
                round_2_decimal(sum.b / n),
                round_2_decimal(sum.c / n),
                round_2_decimal(sum.d / n),
            );
            (number, avg)
        })
        .collect()
}

/// 成绩趋势中的一个点
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrendPoint {
    /// "{科目} ({考试类型} {学年})"
    pub label: String,
    pub score: f64,
}

/// 单个学生的成绩分析
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct StudentAnalytics {
    pub average_score: f64,
    pub highest_score: f64,
    pub lowest_score: f64,
    pub performance_by_subject: BTreeMap<String, f64>,
    pub improvement_trend: Vec<TrendPoint>,
    pub co_performance: BTreeMap<CoLabel, f64>,
}

/// 学生成绩分析，`history` 需按时间顺序排列
pub fn student_analytics(history: &[ExamResultView], aggregator: &CoAggregator) -> StudentAnalytics {
    if history.is_empty() {
        return StudentAnalytics::default();
    }

    let stats = result_statistics(history);

    let mut by_subject: BTreeMap<&str, (f64, usize)> = BTreeMap::new();
    for result in history {
        let (sum, count) = by_subject.entry(result.subject.as_str()).or_default();
        *sum += result.total_marks;
        *count += 1;
    }

    StudentAnalytics {
        average_score: round_1_decimal(stats.average),
        highest_score: round_1_decimal(stats.highest),
        lowest_score: round_1_decimal(stats.lowest),
        performance_by_subject: by_subject
            .into_iter()
            .map(|(subject, (sum, count))| (subject.to_string(), round_2_decimal(sum / count as f64)))
            .collect(),
        improvement_trend: history
            .iter()
            .map(|r| TrendPoint {
                label: format!("{} ({} {})", r.subject, r.exam_type, r.academic_year),
                score: r.total_marks,
            })
            .collect(),
        co_performance: percentages(&aggregator.student_attainment(history)),
    }
}

/// 班级分析
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct ClassAnalysis {
    pub result_count: usize,
    pub average_overall: f64,
    pub highest: f64,
    pub lowest: f64,
    #[serde(serialize_with = "question_keys::serialize")]
    pub question_analysis: BTreeMap<u8, QuestionParts>,
    pub co_performance: BTreeMap<CoLabel, f64>,
}

pub fn class_analysis(results: &[ExamResultView], cohort: &CohortAttainment) -> ClassAnalysis {
    let stats = result_statistics(results);
    ClassAnalysis {
        result_count: stats.count,
        average_overall: round_2_decimal(stats.average),
        highest: stats.highest,
        lowest: stats.lowest,
        question_analysis: question_averages(results),
        co_performance: percentages(&cohort.totals),
    }
}

fn round_1_decimal(x: f64) -> f64 {
    (x * 10.0).round() / 10.0
}

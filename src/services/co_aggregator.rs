//! 课程目标达成度统计 - 业务能力层
//!
//! 每道题经映射表得到 CO，未映射（N/A）的题目直接跳过：
//! - 得分 += a + b + c + d
//! - 满分 += 4 × 每小题满分
//! - 达成度 = round(得分 / 满分 × 100, 2)，满分为 0 时为 0

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use crate::models::{course_outcome, CoLabel, ExamResultView, QuestionMarkRow, QuestionParts};

/// 单个 CO 的得分情况
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct CoScore {
    pub obtained: f64,
    pub max: f64,
    pub percentage: f64,
}

/// CO 标签 → 得分
pub type CoAttainment = BTreeMap<CoLabel, CoScore>;

/// 队列中单个学生的达成度（包含所有出现过的 CO，没有分数的为 0）
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StudentCoRow {
    pub roll_number: String,
    pub attainment: CoAttainment,
}

/// 队列达成度
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct CohortAttainment {
    pub students: Vec<StudentCoRow>,
    /// 出现过的 CO（升序）
    pub co_labels: Vec<CoLabel>,
    /// 全队列合计
    pub totals: CoAttainment,
}

#[derive(Debug, Clone, Copy, Default)]
struct Tally {
    obtained: f64,
    max: f64,
}

impl Tally {
    fn score(&self) -> CoScore {
        let percentage = if self.max > 0.0 {
            round_2_decimal(self.obtained / self.max * 100.0)
        } else {
            0.0
        };
        CoScore {
            obtained: self.obtained,
            max: self.max,
            percentage,
        }
    }
}

/// CO 达成度统计器
#[derive(Debug, Clone, Copy)]
pub struct CoAggregator {
    /// 每小题满分（与校验上限无关）
    max_marks_per_part: f64,
}

impl Default for CoAggregator {
    fn default() -> Self {
        Self::new(5.0)
    }
}

impl CoAggregator {
    pub fn new(max_marks_per_part: f64) -> Self {
        Self { max_marks_per_part }
    }

    /// 单个学生：累加其所有成绩的题目分数
    pub fn student_attainment(&self, results: &[ExamResultView]) -> CoAttainment {
        let entries = results.iter().flat_map(|result| {
            result
                .questions
                .iter()
                .map(move |(number, parts)| (result.exam_type.as_str(), *number, *parts))
        });
        finish(self.tally(entries))
    }

    /// 扁平题目分数行的合计
    pub fn attainment_from_rows(&self, rows: &[QuestionMarkRow]) -> CoAttainment {
        let entries = rows
            .iter()
            .map(|row| (row.exam_type.as_str(), row.question_number, row.parts));
        finish(self.tally(entries))
    }

    /// 队列：每个学生一行，可选地只统计名单内的学生
    pub fn cohort_attainment(
        &self,
        rows: &[QuestionMarkRow],
        roster: Option<&[String]>,
    ) -> CohortAttainment {
        let in_roster = |roll: &str| roster.map_or(true, |names| names.iter().any(|n| n == roll));

        let mut per_student: BTreeMap<&str, BTreeMap<CoLabel, Tally>> = BTreeMap::new();
        let mut totals: BTreeMap<CoLabel, Tally> = BTreeMap::new();
        let mut observed: BTreeSet<CoLabel> = BTreeSet::new();

        for row in rows.iter().filter(|row| in_roster(row.roll_number.as_str())) {
            let student = per_student.entry(row.roll_number.as_str()).or_default();
            let Some(label) = course_outcome(&row.exam_type, row.question_number) else {
                continue;
            };
            observed.insert(label);
            self.add(student.entry(label).or_default(), &row.parts);
            self.add(totals.entry(label).or_default(), &row.parts);
        }

        let students = per_student
            .into_iter()
            .map(|(roll, tallies)| StudentCoRow {
                roll_number: roll.to_string(),
                attainment: observed
                    .iter()
                    .map(|label| {
                        let tally = tallies.get(label).copied().unwrap_or_default();
                        (*label, tally.score())
                    })
                    .collect(),
            })
            .collect();

        CohortAttainment {
            students,
            co_labels: observed.into_iter().collect(),
            totals: finish(totals),
        }
    }

    fn tally<'a>(
        &self,
        entries: impl Iterator<Item = (&'a str, u8, QuestionParts)>,
    ) -> BTreeMap<CoLabel, Tally> {
        let mut tallies: BTreeMap<CoLabel, Tally> = BTreeMap::new();
        for (exam_type, number, parts) in entries {
            if let Some(label) = course_outcome(exam_type, number) {
                self.add(tallies.entry(label).or_default(), &parts);
            }
        }
        tallies
    }

    fn add(&self, tally: &mut Tally, parts: &QuestionParts) {
        tally.obtained += parts.total();
        tally.max += 4.0 * self.max_marks_per_part;
    }
}

/// 只保留百分比
pub fn percentages(attainment: &CoAttainment) -> BTreeMap<CoLabel, f64> {
    attainment
        .iter()
        .map(|(label, score)| (*label, score.percentage))
        .collect()
}

fn finish(tallies: BTreeMap<CoLabel, Tally>) -> CoAttainment {
    tallies
        .into_iter()
        .map(|(label, tally)| (label, tally.score()))
        .collect()
}

pub(crate) fn round_2_decimal(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

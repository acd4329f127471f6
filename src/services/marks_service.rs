/// 成绩查询服务
///
/// 面向展示层的查询与修改入口：带 CO 标注的成绩、学生历史与分析、
/// 班级分析、队列 CO 达成度、考试目录、删除与修改
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info};

use super::analytics::{self, ClassAnalysis, StudentAnalytics};
use super::co_aggregator::{CoAggregator, CohortAttainment};
use crate::error::AppResult;
use crate::models::mark_record::question_keys;
use crate::models::{
    course_outcome_label, ClassSummaryEntry, ExamResultView, IdentityKey, QuestionParts,
    ResultFilter,
};
use crate::storage::ResultStore;

/// 带 CO 标签的题目分数
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutcomeQuestion {
    #[serde(flatten)]
    pub parts: QuestionParts,
    /// "CO1".."CO5" 或 "N/A"
    pub co: &'static str,
}

/// 带 CO 标注的成绩
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultWithOutcomes {
    pub id: i64,
    pub roll_number: String,
    pub exam_type: String,
    pub academic_year: i32,
    pub total_marks: f64,
    pub timestamp: String,
    #[serde(serialize_with = "question_keys::serialize")]
    pub questions: BTreeMap<u8, OutcomeQuestion>,
}

impl From<ExamResultView> for ResultWithOutcomes {
    fn from(view: ExamResultView) -> Self {
        let questions = view
            .questions
            .iter()
            .map(|(number, parts)| {
                let question = OutcomeQuestion {
                    parts: *parts,
                    co: course_outcome_label(&view.exam_type, *number),
                };
                (*number, question)
            })
            .collect();

        Self {
            id: view.id,
            roll_number: view.roll_number,
            exam_type: view.exam_type,
            academic_year: view.academic_year,
            total_marks: view.total_marks,
            timestamp: view.timestamp,
            questions,
        }
    }
}

/// 已有成绩涉及的班级、科目、考试类型（各自去重升序）
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct ExamCatalog {
    pub class_years: Vec<String>,
    pub subjects: Vec<String>,
    pub exam_types: Vec<String>,
}

/// 成绩查询服务
pub struct MarksService {
    store: Arc<ResultStore>,
    aggregator: CoAggregator,
}

impl MarksService {
    pub fn new(store: Arc<ResultStore>, aggregator: CoAggregator) -> Self {
        Self { store, aggregator }
    }

    /// 筛选条件下的成绩，每道题标注 CO
    pub fn marks_with_outcomes(&self, filter: &ResultFilter) -> AppResult<Vec<ResultWithOutcomes>> {
        let results = self.store.get_by_filter(filter)?;
        debug!("查询到 {} 条成绩", results.len());
        Ok(results.into_iter().map(ResultWithOutcomes::from).collect())
    }

    pub fn all_results(&self) -> AppResult<Vec<ExamResultView>> {
        self.store.get_all()
    }

    pub fn student_history(&self, roll_number: &str) -> AppResult<Vec<ExamResultView>> {
        self.store.get_by_student(roll_number)
    }

    pub fn student_analytics(&self, roll_number: &str) -> AppResult<StudentAnalytics> {
        let history = self.store.get_by_student(roll_number)?;
        Ok(analytics::student_analytics(&history, &self.aggregator))
    }

    pub fn class_analysis(&self, filter: &ResultFilter) -> AppResult<ClassAnalysis> {
        let results = self.store.get_by_filter(filter)?;
        let cohort = self.cohort_co_performance(filter, None)?;
        Ok(analytics::class_analysis(&results, &cohort))
    }

    /// 队列 CO 达成度，`roster` 为 `None` 时统计所有学生
    pub fn cohort_co_performance(
        &self,
        filter: &ResultFilter,
        roster: Option<&[String]>,
    ) -> AppResult<CohortAttainment> {
        let rows = self.store.co_mark_rows(filter)?;
        Ok(self.aggregator.cohort_attainment(&rows, roster))
    }

    pub fn class_summary(&self, filter: &ResultFilter) -> AppResult<Vec<ClassSummaryEntry>> {
        self.store.class_summary(filter)
    }

    pub fn exam_catalog(&self) -> AppResult<ExamCatalog> {
        let mut class_years = BTreeSet::new();
        let mut subjects = BTreeSet::new();
        let mut exam_types = BTreeSet::new();

        for details in self.store.exam_details()? {
            class_years.insert(details.class_year);
            subjects.insert(details.subject);
            exam_types.insert(details.exam_type);
        }

        Ok(ExamCatalog {
            class_years: class_years.into_iter().collect(),
            subjects: subjects.into_iter().collect(),
            exam_types: exam_types.into_iter().collect(),
        })
    }

    pub fn delete(&self, key: &IdentityKey) -> AppResult<()> {
        self.store.delete(key)
    }

    /// 修改题目分数，返回重算后的总分
    pub fn update(&self, result_id: i64, marks: &BTreeMap<u8, QuestionParts>) -> AppResult<f64> {
        let total = self.store.update_question_marks(result_id, marks)?;
        info!("✏️ 成绩 {} 已修改，新总分 {}", result_id, total);
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CoLabel, ExamContext, MarkRecord};

    fn seeded() -> (MarksService, ExamContext) {
        let store = Arc::new(ResultStore::open_in_memory().unwrap());
        let ctx = ExamContext::new("3rd Year", "DBMS", "Mid 1", 2024);

        let mut a1 = MarkRecord::zeroed("A1");
        a1.questions.insert(1, QuestionParts::new(5.0, 5.0, 5.0, 5.0));
        a1.total_marks = 20.0;
        store.upsert(&ctx.key_for("A1"), &a1).unwrap();

        let mut b2 = MarkRecord::zeroed("B2");
        b2.questions.insert(3, QuestionParts::new(4.0, 4.0, 0.0, 0.0));
        b2.total_marks = 8.0;
        store.upsert(&ctx.key_for("B2"), &b2).unwrap();

        (MarksService::new(store, CoAggregator::default()), ctx)
    }

    #[test]
    fn test_marks_are_annotated_with_outcomes() {
        let (service, ctx) = seeded();
        let marks = service.marks_with_outcomes(&ctx.filter()).unwrap();

        assert_eq!(marks.len(), 2);
        assert_eq!(marks[0].questions[&1].co, "CO1");
        assert_eq!(marks[0].questions[&4].co, "CO2");

        let json = serde_json::to_value(&marks[0]).unwrap();
        assert_eq!(json["questions"]["Q1"]["a"], 5.0);
        assert_eq!(json["questions"]["Q6"]["co"], "CO3");
    }

    #[test]
    fn test_class_analysis() {
        let (service, ctx) = seeded();
        let analysis = service.class_analysis(&ctx.filter()).unwrap();

        assert_eq!(analysis.result_count, 2);
        assert_eq!(analysis.average_overall, 14.0);
        assert_eq!(analysis.highest, 20.0);
        assert_eq!(analysis.question_analysis[&1].a, 2.5);
        // CO1: 20 / 80, CO2: 8 / 80
        assert_eq!(analysis.co_performance[&CoLabel::Co1], 25.0);
        assert_eq!(analysis.co_performance[&CoLabel::Co2], 10.0);
    }

    #[test]
    fn test_update_and_catalog() {
        let (service, ctx) = seeded();
        let result_id = service.marks_with_outcomes(&ctx.filter()).unwrap()[1].id;

        let mut marks = BTreeMap::new();
        marks.insert(6, QuestionParts::new(1.0, 1.0, 0.0, 0.0));
        assert_eq!(service.update(result_id, &marks).unwrap(), 10.0);

        let catalog = service.exam_catalog().unwrap();
        assert_eq!(catalog.subjects, vec!["DBMS".to_string()]);

        service.delete(&ctx.key_for("A1")).unwrap();
        assert_eq!(service.class_summary(&ctx.filter()).unwrap().len(), 1);
    }
}

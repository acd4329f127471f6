pub mod course_outcome;
pub mod exam_result;
pub mod loaders;
pub mod mark_record;

pub use course_outcome::{course_outcome, course_outcome_label, CoLabel};
pub use exam_result::{
    ClassSummaryEntry, ExamContext, ExamDetails, ExamResultView, IdentityKey, QuestionMarkRow,
    ResultFilter, UpsertOutcome,
};
pub use loaders::load_all_images;
pub use mark_record::{CandidateRecord, MarkRecord, PartialParts, QuestionParts, QUESTION_COUNT};

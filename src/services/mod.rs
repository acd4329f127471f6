pub mod analytics;
pub mod co_aggregator;
pub mod marks_service;
pub mod normalizer;
pub mod validator;

pub use co_aggregator::{CoAggregator, CoAttainment, CoScore, CohortAttainment, StudentCoRow};
pub use marks_service::{ExamCatalog, MarksService, ResultWithOutcomes};
pub use normalizer::{ExtractionNormalizer, NormalizedOutput, ParseStrategy, StrategyKind};
pub use validator::MarkValidator;

//! # Answer Sheet Grader
//!
//! 答题卡批量评分：图片 → 视觉大模型提取 → 规范化 → 校验 → 存储 → CO 达成度统计
//!
//! ## 架构设计
//!
//! 本系统采用严格的分层架构：
//!
//! ### ① 基础设施层（Clients / Storage）
//! - `clients/` - `ExtractionClient`：图片 → 原始文本，单次调用，无重试
//! - `storage/` - `ResultStore`：SQLite 成绩存储，按身份键幂等写入
//!
//! ### ② 业务能力层（Services）
//! - `ExtractionNormalizer` - 有序解析策略链（JSON → 代码块 → 花括号 → 逐行）
//! - `MarkValidator` - 补齐 6 题 × 4 小题，清洗越界分数
//! - `CoAggregator` - 题目 → CO 映射与达成度统计
//! - `MarksService` - 面向展示层的查询与修改入口
//!
//! ### ③ 流程层（Workflow）
//! - `SheetCtx` - 上下文封装（图片索引 + 考试信息）
//! - `SheetFlow` - 单张流程（提取 → 规范化 → 校验 → 写入）
//!
//! ### ④ 编排层（Orchestration）
//! - `orchestrator/batch_processor` - 分批并发处理，失败只计数不中断
//!
//! ## 模块结构

pub mod clients;
pub mod config;
pub mod error;
pub mod models;
pub mod orchestrator;
pub mod services;
pub mod storage;
pub mod utils;
pub mod workflow;

// 重新导出常用类型
pub use clients::{ExtractionClient, VisionExtractionClient};
pub use config::Config;
pub use error::{AppError, AppResult, FailureKind};
pub use models::{ExamContext, ExamResultView, IdentityKey, MarkRecord, QuestionParts};
pub use orchestrator::{App, BatchProcessor, BatchReport};
pub use services::{CoAggregator, ExtractionNormalizer, MarkValidator, MarksService};
pub use storage::ResultStore;
pub use workflow::{SheetCtx, SheetFlow, SheetOutcome};

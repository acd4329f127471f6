//! 编排层（Orchestration Layer）
//!
//! ## 职责
//!
//! 本层负责批量处理和流程调度，是整个系统的"指挥中心"。
//!
//! ### `batch_processor` - 批量答题卡处理器
//! - 管理应用生命周期（初始化、运行）
//! - 批量加载图片（Vec<PathBuf>）
//! - 控制并发数量（Semaphore）
//! - 持有存储与提取客户端
//! - 输出全局统计信息
//!
//! ## 层次关系
//!
//! ```text
//! batch_processor (处理 Vec<PathBuf>)
//!     ↓
//! workflow::SheetFlow (处理单张答题卡)
//!     ↓
//! services (能力层：normalize / validate / CO)
//!     ↓
//! clients + storage (提取服务、SQLite)
//! ```
//!
//! ## 设计原则
//!
//! 1. **资源隔离**：只有编排层组装 ResultStore 和提取客户端
//! 2. **向下依赖**：编排层 → workflow → services → clients / storage
//! 3. **无业务逻辑**：只做调度和统计，不做具体业务判断

pub mod batch_processor;

pub use batch_processor::{App, BatchProcessor, BatchReport, SheetFailure};

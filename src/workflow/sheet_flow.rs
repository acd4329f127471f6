//! 答题卡处理流程 - 流程层
//!
//! 核心职责：定义"一张答题卡"的完整处理流程
//!
//! 流程顺序：
//! 1. 提取（受超时限制）→ 原始文本
//! 2. 规范化 → 候选记录
//! 3. 校验 → 规范记录
//! 4. 按身份键写入存储
//!
//! 任一步失败都以 `AppError` 返回，由编排层决定跳过并计数

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::clients::{extract_with_timeout, ExtractionClient};
use crate::config::Config;
use crate::error::{AppResult, PersistenceError};
use crate::services::{ExtractionNormalizer, MarkValidator, StrategyKind};
use crate::storage::ResultStore;
use crate::utils::logging::truncate_text;
use crate::workflow::sheet_ctx::SheetCtx;

/// 单张答题卡的处理结果
#[derive(Debug, Clone, PartialEq)]
pub struct SheetOutcome {
    pub roll_number: String,
    pub total_marks: f64,
    pub result_id: i64,
    /// true = 新建，false = 覆盖了已有成绩
    pub created: bool,
    pub strategy: StrategyKind,
}

/// 答题卡处理流程
///
/// - 编排完整的单张处理流程
/// - 不持有批处理状态，可在多个任务间共享
/// - 只依赖提取客户端、业务能力（services）与存储
pub struct SheetFlow {
    client: Arc<dyn ExtractionClient>,
    normalizer: ExtractionNormalizer,
    validator: MarkValidator,
    store: Arc<ResultStore>,
    extraction_timeout: Duration,
    verbose_logging: bool,
}

impl SheetFlow {
    pub fn new(config: &Config, client: Arc<dyn ExtractionClient>, store: Arc<ResultStore>) -> Self {
        Self {
            client,
            normalizer: ExtractionNormalizer::new(),
            validator: MarkValidator::new(config.part_mark_bound()),
            store,
            extraction_timeout: Duration::from_secs(config.extraction_timeout_secs),
            verbose_logging: config.verbose_logging,
        }
    }

    pub async fn run(&self, ctx: &SheetCtx) -> AppResult<SheetOutcome> {
        info!("[图片 {}] 📄 开始处理: {}", ctx.image_index, ctx.image_name());

        // ========== 1. 提取 ==========
        let raw = extract_with_timeout(self.client.as_ref(), &ctx.image, self.extraction_timeout)
            .await?;

        if self.verbose_logging {
            debug!("[图片 {}] 原始文本: {}", ctx.image_index, truncate_text(&raw, 200));
        }

        // ========== 2. 规范化 ==========
        let normalized = self.normalizer.normalize(&raw)?;
        info!(
            "[图片 {}] ✓ 解析成功 (策略: {})",
            ctx.image_index, normalized.strategy
        );

        // ========== 3. 校验 ==========
        let record = self.validator.validate(&normalized.candidate)?;

        // ========== 4. 写入 ==========
        // rusqlite 调用是阻塞的，放到阻塞线程池执行
        let key = ctx.exam.key_for(record.roll_number.clone());
        let store = self.store.clone();
        let stored = record.clone();
        let outcome = tokio::task::spawn_blocking(move || store.upsert(&key, &stored))
            .await
            .map_err(|e| PersistenceError::BlockingTask(e.to_string()))??;

        info!(
            "[图片 {}] 💾 {} 学号 {} 总分 {}",
            ctx.image_index,
            if outcome.created { "已保存" } else { "已覆盖" },
            record.roll_number,
            record.total_marks
        );

        Ok(SheetOutcome {
            roll_number: record.roll_number,
            total_marks: record.total_marks,
            result_id: outcome.result_id,
            created: outcome.created,
            strategy: normalized.strategy,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::path::{Path, PathBuf};

    use async_trait::async_trait;

    use super::*;
    use crate::error::{ExtractionError, FailureKind};
    use crate::models::ExamContext;

    struct CannedClient(&'static str);

    #[async_trait]
    impl ExtractionClient for CannedClient {
        async fn extract(&self, _image: &Path) -> Result<String, ExtractionError> {
            Ok(self.0.to_string())
        }
    }

    fn flow(text: &'static str) -> (SheetFlow, Arc<ResultStore>) {
        let store = Arc::new(ResultStore::open_in_memory().unwrap());
        let flow = SheetFlow::new(&Config::default(), Arc::new(CannedClient(text)), store.clone());
        (flow, store)
    }

    fn ctx() -> SheetCtx {
        SheetCtx::new(
            1,
            PathBuf::from("sheet.jpg"),
            ExamContext::new("3rd Year", "DBMS", "Mid 1", 2024),
        )
    }

    #[tokio::test]
    async fn test_line_text_is_stored() {
        let (flow, store) = flow("Q2:5 5\nQ4:5 8\nTotal:23\nRoll No: A1");
        let outcome = flow.run(&ctx()).await.unwrap();

        assert_eq!(outcome.roll_number, "A1");
        assert_eq!(outcome.total_marks, 23.0);
        assert!(outcome.created);
        assert_eq!(outcome.strategy, StrategyKind::LineOriented);

        let view = store.find_by_key(&ctx().exam.key_for("A1")).unwrap().unwrap();
        assert_eq!(view.questions[&4].b, 8.0);
    }

    #[tokio::test]
    async fn test_missing_roll_number_is_validation_failure() {
        let (flow, store) = flow("Q1: 5 5\nTotal: 10");
        let err = flow.run(&ctx()).await.unwrap_err();

        assert_eq!(err.kind(), FailureKind::Validation);
        assert_eq!(store.count_results().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_zero_bound_keeps_large_marks() {
        let store = Arc::new(ResultStore::open_in_memory().unwrap());
        let config = Config {
            max_part_mark: Some(0.0),
            ..Config::default()
        };
        let client = Arc::new(CannedClient("Roll No: A9\nQ1: 9 2"));
        let flow = SheetFlow::new(&config, client, store.clone());

        let outcome = flow.run(&ctx()).await.unwrap();
        assert_eq!(outcome.total_marks, 11.0);

        let view = store.find_by_key(&ctx().exam.key_for("A9")).unwrap().unwrap();
        assert_eq!(view.questions[&1].a, 9.0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_sheets_write_through_blocking_pool() {
        let (flow, store) = flow("Roll No: A1\nQ1: 5 5\nTotal: 10");
        let flow = Arc::new(flow);

        let handles: Vec<_> = (1..=4)
            .map(|i| {
                let flow = flow.clone();
                tokio::spawn(async move {
                    let ctx = SheetCtx::new(
                        i,
                        PathBuf::from(format!("sheet{}.jpg", i)),
                        ExamContext::new("3rd Year", "DBMS", "Mid 1", 2024),
                    );
                    flow.run(&ctx).await
                })
            })
            .collect();
        for outcome in futures::future::join_all(handles).await {
            assert_eq!(outcome.unwrap().unwrap().roll_number, "A1");
        }

        assert_eq!(store.count_results().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_garbage_is_parse_failure() {
        let (flow, _) = flow("The image is too blurry to read.");
        let err = flow.run(&ctx()).await.unwrap_err();
        assert_eq!(err.kind(), FailureKind::Parse);
    }
}

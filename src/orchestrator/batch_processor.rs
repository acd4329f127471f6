//! 批量答题卡处理器 - 编排层
//!
//! ## 职责
//!
//! 本模块是整个应用的入口，负责批量答题卡的处理和资源管理。
//!
//! ## 核心功能
//!
//! 1. **应用初始化**：日志文件、考试信息、数据库、提取客户端
//! 2. **批量加载**：扫描图片目录（`Vec<PathBuf>`）
//! 3. **并发控制**：使用 Semaphore 限制并发数量
//! 4. **分批处理**：每批完成后再开始下一批
//! 5. **失败隔离**：单张失败只计入跳过数，不中断批次
//! 6. **全局统计**：汇总成功/跳过数量与班级 CO 达成度

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use futures::future::join_all;
use serde::Serialize;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

use crate::clients::{ExtractionClient, VisionExtractionClient};
use crate::config::Config;
use crate::error::FailureKind;
use crate::models::{load_all_images, ExamContext};
use crate::services::{CoAggregator, CohortAttainment, MarksService};
use crate::storage::ResultStore;
use crate::utils::logging::{
    append_log_lines, init_log_file, log_batch_complete, log_batch_start, log_images_loaded,
    log_startup, print_final_stats,
};
use crate::workflow::{SheetCtx, SheetFlow};

/// 单张图片的失败记录
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SheetFailure {
    pub image_index: usize,
    pub image: String,
    /// 任务本身崩溃时为 `None`
    pub kind: Option<FailureKind>,
    pub message: String,
}

/// 批处理报告（只有计数与简要原因，不含调用栈）
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchReport {
    pub total: usize,
    pub succeeded: usize,
    pub skipped: usize,
    pub failures: Vec<SheetFailure>,
}

impl BatchReport {
    fn record_failure(
        &mut self,
        image_index: usize,
        image: &Path,
        kind: Option<FailureKind>,
        message: String,
    ) {
        self.skipped += 1;
        self.failures.push(SheetFailure {
            image_index,
            image: image.display().to_string(),
            kind,
            message,
        });
    }

    /// 某类失败的数量
    pub fn count_of(&self, kind: FailureKind) -> usize {
        self.failures
            .iter()
            .filter(|failure| failure.kind == Some(kind))
            .count()
    }
}

/// 批处理器：分批 + Semaphore + tokio::spawn
pub struct BatchProcessor {
    flow: Arc<SheetFlow>,
    max_concurrent: usize,
}

impl BatchProcessor {
    pub fn new(flow: Arc<SheetFlow>, max_concurrent: usize) -> Self {
        Self {
            flow,
            max_concurrent: max_concurrent.max(1),
        }
    }

    /// 处理所有图片，单张失败不会中断批次
    pub async fn process_images(
        &self,
        images: Vec<PathBuf>,
        exam: &ExamContext,
    ) -> Result<BatchReport> {
        let semaphore = Arc::new(Semaphore::new(self.max_concurrent));
        let total_images = images.len();
        let total_batches = (total_images + self.max_concurrent - 1) / self.max_concurrent;
        let mut report = BatchReport {
            total: total_images,
            ..Default::default()
        };

        for (batch_idx, batch_images) in images.chunks(self.max_concurrent).enumerate() {
            let batch_start = batch_idx * self.max_concurrent;
            let batch_num = batch_idx + 1;

            log_batch_start(
                batch_num,
                total_batches,
                batch_start + 1,
                batch_start + batch_images.len(),
                total_images,
            );

            let mut batch_handles = Vec::with_capacity(batch_images.len());

            for (offset, image) in batch_images.iter().enumerate() {
                let image_index = batch_start + offset + 1;
                let permit = semaphore.clone().acquire_owned().await?;
                let flow = self.flow.clone();
                let ctx = SheetCtx::new(image_index, image.clone(), exam.clone());

                let handle = tokio::spawn(async move {
                    let _permit = permit;
                    let result = flow.run(&ctx).await;
                    if let Err(e) = &result {
                        warn!("[图片 {}] ⏭️ 跳过 ({}): {}", ctx.image_index, e.kind(), e);
                    }
                    result
                });
                batch_handles.push((image_index, image.clone(), handle));
            }

            // 等待本批所有任务完成
            let joined = join_all(
                batch_handles
                    .into_iter()
                    .map(|(image_index, image, handle)| async move {
                        (image_index, image, handle.await)
                    }),
            )
            .await;

            let mut batch_succeeded = 0;
            for (image_index, image, joined_result) in joined {
                match joined_result {
                    Ok(Ok(_)) => {
                        report.succeeded += 1;
                        batch_succeeded += 1;
                    }
                    Ok(Err(e)) => {
                        report.record_failure(image_index, &image, Some(e.kind()), e.to_string());
                    }
                    Err(e) => {
                        error!("[图片 {}] 任务执行失败: {}", image_index, e);
                        report.record_failure(image_index, &image, None, e.to_string());
                    }
                }
            }

            log_batch_complete(batch_num, batch_succeeded, batch_images.len());
        }

        Ok(report)
    }
}

/// 应用主结构
pub struct App {
    config: Config,
    exam: ExamContext,
    processor: BatchProcessor,
    marks: MarksService,
}

impl App {
    /// 初始化应用（使用视觉大模型提取）
    pub async fn initialize(config: Config) -> Result<Self> {
        let client: Arc<dyn ExtractionClient> = Arc::new(VisionExtractionClient::new(&config));
        Self::with_client(config, client)
    }

    /// 使用指定的提取客户端初始化
    pub fn with_client(config: Config, client: Arc<dyn ExtractionClient>) -> Result<Self> {
        init_log_file(&config.output_log_file)?;
        log_startup(config.max_concurrent_images, &config.llm_model_name);

        let exam = config.exam_context()?;
        info!(
            "📝 考试信息: {} {} {} ({})",
            exam.class_year, exam.subject, exam.exam_type, exam.academic_year
        );

        let store = Arc::new(ResultStore::open(&config.database_path)?);
        let flow = Arc::new(SheetFlow::new(&config, client, store.clone()));
        let processor = BatchProcessor::new(flow, config.max_concurrent_images);
        let marks = MarksService::new(store, CoAggregator::new(config.co_max_marks_per_part));

        Ok(Self {
            config,
            exam,
            processor,
            marks,
        })
    }

    /// 运行应用主逻辑
    pub async fn run(&self) -> Result<BatchReport> {
        info!("📁 正在扫描待处理的答题卡: {}", self.config.image_folder);
        let images = load_all_images(&self.config.image_folder).await?;

        if images.is_empty() {
            warn!("⚠️ 没有找到待处理的答题卡图片，程序结束");
            return Ok(BatchReport::default());
        }

        log_images_loaded(images.len(), self.config.max_concurrent_images);

        let report = self.processor.process_images(images, &self.exam).await?;

        print_final_stats(
            report.succeeded,
            report.skipped,
            report.total,
            &self.config.output_log_file,
        );

        let cohort = self.marks.cohort_co_performance(&self.exam.filter(), None)?;
        log_cohort_summary(&cohort);

        append_log_lines(&self.config.output_log_file, &report_lines(&report, &cohort))?;

        Ok(report)
    }

    pub fn marks(&self) -> &MarksService {
        &self.marks
    }
}

fn log_cohort_summary(cohort: &CohortAttainment) {
    if cohort.co_labels.is_empty() {
        info!("📈 本次考试没有可统计的 CO");
        return;
    }
    info!("📈 班级 CO 达成度 ({} 名学生)", cohort.students.len());
    for (label, score) in &cohort.totals {
        info!(
            "   {}: {:.2}% ({}/{})",
            label, score.percentage, score.obtained, score.max
        );
    }
}

fn report_lines(report: &BatchReport, cohort: &CohortAttainment) -> Vec<String> {
    let mut lines = vec![
        format!("成功: {}/{}", report.succeeded, report.total),
        format!("跳过: {}", report.skipped),
    ];
    lines.extend(report.failures.iter().map(|failure| {
        let kind = failure
            .kind
            .map(|kind| kind.to_string())
            .unwrap_or_else(|| "task".to_string());
        format!(
            "  [图片 {}] {} ({}): {}",
            failure.image_index, failure.image, kind, failure.message
        )
    }));
    lines.extend(
        cohort
            .totals
            .iter()
            .map(|(label, score)| format!("{}: {:.2}%", label, score.percentage)),
    );
    lines
}

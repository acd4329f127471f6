//! 答题卡处理上下文
//!
//! 封装"我正在处理哪次考试的第几张答题卡"这一信息

use std::fmt::Display;
use std::path::{Path, PathBuf};

use crate::models::ExamContext;

/// 答题卡处理上下文
#[derive(Debug, Clone)]
pub struct SheetCtx {
    /// 图片索引（从 1 开始，仅用于日志显示）
    pub image_index: usize,

    /// 图片路径
    pub image: PathBuf,

    /// 本批次共享的考试信息
    pub exam: ExamContext,
}

impl SheetCtx {
    pub fn new(image_index: usize, image: PathBuf, exam: ExamContext) -> Self {
        Self {
            image_index,
            image,
            exam,
        }
    }

    /// 图片文件名（日志用）
    pub fn image_name(&self) -> String {
        file_name(&self.image)
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

impl Display for SheetCtx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[图片 {} {} | {} {} {}]",
            self.image_index,
            self.image_name(),
            self.exam.class_year,
            self.exam.subject,
            self.exam.exam_type
        )
    }
}

use std::path::Path;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::models::ExamContext;

/// 程序配置文件
///
/// 加载顺序：默认值 → TOML 文件（可选）→ 环境变量
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    /// 同时处理的图片数量
    pub max_concurrent_images: usize,
    /// 待处理答题卡图片目录
    pub image_folder: String,
    /// SQLite 数据库文件路径
    pub database_path: String,
    /// 是否显示详细日志
    pub verbose_logging: bool,
    /// 输出日志文件
    pub output_log_file: String,
    // --- 提取服务配置 ---
    pub llm_api_key: String,
    pub llm_api_base_url: String,
    pub llm_model_name: String,
    pub llm_temperature: f32,
    pub llm_max_tokens: u32,
    /// 单张图片提取超时（秒）
    pub extraction_timeout_secs: u64,
    // --- 分数规则 ---
    /// 每个小题允许的最高分，超出则记 0；设为 0 表示不限制
    pub max_part_mark: Option<f64>,
    /// CO 达成度计算时每个小题的满分基数
    pub co_max_marks_per_part: f64,
    // --- 本批次的考试信息 ---
    pub class_year: Option<String>,
    pub subject: Option<String>,
    pub exam_type: Option<String>,
    pub academic_year: Option<i32>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_concurrent_images: 4,
            image_folder: "answer_sheets".to_string(),
            database_path: "database/education.db".to_string(),
            verbose_logging: false,
            output_log_file: "grading_log.txt".to_string(),
            llm_api_key: String::new(),
            llm_api_base_url: "https://generativelanguage.googleapis.com/v1beta/openai".to_string(),
            llm_model_name: "gemini-2.0-flash".to_string(),
            llm_temperature: 0.1,
            llm_max_tokens: 2048,
            extraction_timeout_secs: 60,
            max_part_mark: Some(8.0),
            co_max_marks_per_part: 5.0,
            class_year: None,
            subject: None,
            exam_type: None,
            academic_year: None,
        }
    }
}

impl Config {
    /// 从 TOML 文本解析配置，缺失的键使用默认值
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|source| ConfigError::TomlParseFailed {
            path: "<inline>".to_string(),
            source,
        })
    }

    /// 加载配置：文件存在则读取文件，随后应用环境变量覆盖
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let base = match path {
            Some(path) if path.exists() => {
                let content =
                    std::fs::read_to_string(path).map_err(|source| ConfigError::FileReadFailed {
                        path: path.display().to_string(),
                        source,
                    })?;
                toml::from_str(&content).map_err(|source| ConfigError::TomlParseFailed {
                    path: path.display().to_string(),
                    source,
                })?
            }
            _ => Self::default(),
        };
        Ok(base.with_env_overrides())
    }

    /// 只使用默认值和环境变量
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    fn with_env_overrides(self) -> Self {
        Self {
            max_concurrent_images: env_parse("MAX_CONCURRENT_IMAGES")
                .unwrap_or(self.max_concurrent_images),
            image_folder: std::env::var("IMAGE_FOLDER").unwrap_or(self.image_folder),
            database_path: std::env::var("DATABASE_PATH").unwrap_or(self.database_path),
            verbose_logging: env_parse("VERBOSE_LOGGING").unwrap_or(self.verbose_logging),
            output_log_file: std::env::var("OUTPUT_LOG_FILE").unwrap_or(self.output_log_file),
            llm_api_key: std::env::var("LLM_API_KEY").unwrap_or(self.llm_api_key),
            llm_api_base_url: std::env::var("LLM_API_BASE_URL")
                .unwrap_or(self.llm_api_base_url),
            llm_model_name: std::env::var("LLM_MODEL_NAME").unwrap_or(self.llm_model_name),
            llm_temperature: env_parse("LLM_TEMPERATURE").unwrap_or(self.llm_temperature),
            llm_max_tokens: env_parse("LLM_MAX_TOKENS").unwrap_or(self.llm_max_tokens),
            extraction_timeout_secs: env_parse("EXTRACTION_TIMEOUT_SECS")
                .unwrap_or(self.extraction_timeout_secs),
            max_part_mark: env_parse("MAX_PART_MARK")
                .map(Some)
                .unwrap_or(self.max_part_mark),
            co_max_marks_per_part: env_parse("CO_MAX_MARKS_PER_PART")
                .unwrap_or(self.co_max_marks_per_part),
            class_year: std::env::var("CLASS_YEAR").ok().or(self.class_year),
            subject: std::env::var("SUBJECT").ok().or(self.subject),
            exam_type: std::env::var("EXAM_TYPE").ok().or(self.exam_type),
            academic_year: env_parse("ACADEMIC_YEAR").or(self.academic_year),
        }
    }

    /// 生效的小题分数上限：未设置或 `<= 0` 时不限制
    pub fn part_mark_bound(&self) -> Option<f64> {
        self.max_part_mark.filter(|bound| bound.is_finite() && *bound > 0.0)
    }

    /// 本批次的考试信息，学年缺省为当前年份
    pub fn exam_context(&self) -> Result<ExamContext, ConfigError> {
        let class_year = required(&self.class_year, "class_year")?;
        let subject = required(&self.subject, "subject")?;
        let exam_type = required(&self.exam_type, "exam_type")?;
        let academic_year = self
            .academic_year
            .unwrap_or_else(|| chrono::Datelike::year(&chrono::Local::now()));

        Ok(ExamContext::new(class_year, subject, exam_type, academic_year))
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

fn required(value: &Option<String>, name: &str) -> Result<String, ConfigError> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or_else(|| ConfigError::MissingField {
            name: name.to_string(),
        })
}

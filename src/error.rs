use std::fmt;

/// 应用程序错误类型
///
/// 每个变体对应流水线中的一类失败，批处理边界据此决定跳过还是计数
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// 图片提取失败（服务不可用、空响应、图片不可读、超时）
    #[error("提取错误: {0}")]
    Extraction(#[from] ExtractionError),
    /// 所有解析策略均未得到候选记录
    #[error("解析错误: {0}")]
    Parse(#[from] ParseError),
    /// 候选记录未通过校验
    #[error("校验错误: {0}")]
    Validation(#[from] ValidationError),
    /// 存储层错误（约束冲突、事务失败）
    #[error("持久化错误: {0}")]
    Persistence(#[from] PersistenceError),
    /// 更新或删除的目标不存在
    #[error("记录不存在: {0}")]
    NotFound(#[from] NotFoundError),
    /// 配置错误
    #[error("配置错误: {0}")]
    Config(#[from] ConfigError),
}

/// 失败类别（用于批处理统计）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Extraction,
    Parse,
    Validation,
    Persistence,
    NotFound,
    Config,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FailureKind::Extraction => "extraction",
            FailureKind::Parse => "parse",
            FailureKind::Validation => "validation",
            FailureKind::Persistence => "persistence",
            FailureKind::NotFound => "not_found",
            FailureKind::Config => "config",
        };
        f.write_str(name)
    }
}

/// 提取服务错误
#[derive(Debug, thiserror::Error)]
pub enum ExtractionError {
    /// 外部服务调用失败
    #[error("提取服务不可用 (模型: {model}): {source}")]
    ServiceUnavailable {
        model: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    /// 服务返回内容为空
    #[error("提取服务返回内容为空 (模型: {model})")]
    EmptyResponse { model: String },
    /// 图片无法读取或格式不受支持
    #[error("图片不可读 ({path}): {reason}")]
    ImageUnreadable { path: String, reason: String },
    /// 调用超时
    #[error("提取调用超时 ({secs} 秒)")]
    Timeout { secs: u64 },
}

/// 解析错误
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    /// 原始文本为空
    #[error("原始文本为空")]
    EmptyInput,
    /// 没有任何解析策略识别出内容
    #[error("没有解析策略能识别文本: {preview}")]
    NoStrategyMatched { preview: String },
}

/// 校验错误
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ValidationError {
    /// 学号为空
    #[error("学号为空")]
    MissingRollNumber,
    /// 总分无法解析为数字
    #[error("总分无法解析为数字")]
    UnresolvableTotal,
    /// 题号超出 1..6
    #[error("题号 {number} 超出范围 [1, 6]")]
    InvalidQuestionNumber { number: u8 },
    /// 身份键学号与记录学号不一致
    #[error("身份键学号 {key} 与记录学号 {record} 不一致")]
    RollNumberMismatch { key: String, record: String },
}

/// 持久化错误
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    /// SQLite 调用失败
    #[error("数据库错误: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// 连接锁已中毒
    #[error("数据库连接锁已中毒")]
    LockPoisoned,
    /// 阻塞写入任务未能完成
    #[error("数据库写入任务失败: {0}")]
    BlockingTask(String),
    /// 创建数据库目录失败
    #[error("无法创建数据库目录 ({path}): {source}")]
    DirectoryCreateFailed {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// 目标不存在
#[derive(Debug, thiserror::Error)]
pub enum NotFoundError {
    /// 按身份键查找失败
    #[error("找不到成绩记录 {0}")]
    IdentityKey(String),
    /// 按结果 ID 查找失败
    #[error("找不到成绩记录 ID {0}")]
    ResultId(i64),
}

/// 配置错误
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// 读取配置文件失败
    #[error("读取配置文件失败 ({path}): {source}")]
    FileReadFailed {
        path: String,
        #[source]
        source: std::io::Error,
    },
    /// TOML 解析失败
    #[error("TOML解析失败 ({path}): {source}")]
    TomlParseFailed {
        path: String,
        #[source]
        source: toml::de::Error,
    },
    /// 必填项缺失
    #[error("配置项 {name} 不能为空")]
    MissingField { name: String },
}

// ========== 从常见错误类型转换 ==========

impl From<rusqlite::Error> for AppError {
    fn from(err: rusqlite::Error) -> Self {
        AppError::Persistence(PersistenceError::Sqlite(err))
    }
}

// ========== 便捷构造函数 ==========

impl AppError {
    /// 返回错误所属的失败类别
    pub fn kind(&self) -> FailureKind {
        match self {
            AppError::Extraction(_) => FailureKind::Extraction,
            AppError::Parse(_) => FailureKind::Parse,
            AppError::Validation(_) => FailureKind::Validation,
            AppError::Persistence(_) => FailureKind::Persistence,
            AppError::NotFound(_) => FailureKind::NotFound,
            AppError::Config(_) => FailureKind::Config,
        }
    }

    /// 创建结果 ID 不存在错误
    pub fn result_not_found(result_id: i64) -> Self {
        AppError::NotFound(NotFoundError::ResultId(result_id))
    }
}

// ========== Result 类型别名 ==========

/// 应用程序结果类型
pub type AppResult<T> = Result<T, AppError>;

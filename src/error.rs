use std::fmt;

/// 应用程序错误类型
///
/// 错误分两大类：
/// - `Contract` 是调用方/程序员错误，记录日志后中止操作，永不重试
/// - 其余外部服务错误都在调用点本地恢复：提取/下载失败让答卷退回
///   pending，语义校验失败被吞掉，持久化失败有限重试后放弃
#[derive(Debug)]
pub enum AppError {
    /// 契约违反（程序员错误）
    Contract(ContractError),
    /// 结构提取服务错误
    Extract(ExtractError),
    /// 语义校验服务错误
    Verify(VerifyError),
    /// 对象存储错误
    Storage(StorageError),
    /// 远端持久化错误
    Persist(PersistError),
    /// 配置错误
    Config(ConfigError),
    /// 其他错误（包装第三方库错误）
    Other(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Contract(e) => write!(f, "契约错误: {}", e),
            AppError::Extract(e) => write!(f, "提取错误: {}", e),
            AppError::Verify(e) => write!(f, "语义校验错误: {}", e),
            AppError::Storage(e) => write!(f, "存储错误: {}", e),
            AppError::Persist(e) => write!(f, "持久化错误: {}", e),
            AppError::Config(e) => write!(f, "配置错误: {}", e),
            AppError::Other(msg) => write!(f, "错误: {}", msg),
        }
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AppError::Contract(e) => Some(e),
            AppError::Extract(e) => Some(e),
            AppError::Verify(e) => Some(e),
            AppError::Storage(e) => Some(e),
            AppError::Persist(e) => Some(e),
            AppError::Config(e) => Some(e),
            AppError::Other(_) => None,
        }
    }
}

/// 契约违反
#[derive(Debug)]
pub enum ContractError {
    /// 批改开始时答案结构缺失
    MissingAnswerKey { session_id: String },
    /// 会话不存在
    SessionNotFound { session_id: String },
    /// 答卷不存在
    SubmissionNotFound { submission_id: String },
    /// 答卷既无本地句柄也无远端路径
    NoFileSource { submission_id: String },
}

impl fmt::Display for ContractError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContractError::MissingAnswerKey { session_id } => {
                write!(f, "会话 {} 没有答案结构，不能开始批改", session_id)
            }
            ContractError::SessionNotFound { session_id } => {
                write!(f, "会话不存在: {}", session_id)
            }
            ContractError::SubmissionNotFound { submission_id } => {
                write!(f, "答卷不存在: {}", submission_id)
            }
            ContractError::NoFileSource { submission_id } => {
                write!(f, "答卷 {} 既无本地文件也无远端路径", submission_id)
            }
        }
    }
}

impl std::error::Error for ContractError {}

/// 结构提取错误
#[derive(Debug)]
pub enum ExtractError {
    /// API 调用失败
    ApiCallFailed {
        provider: String,
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    /// 返回内容为空
    EmptyResponse { provider: String },
    /// 结构解析失败
    ParseFailed { message: String },
}

impl fmt::Display for ExtractError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExtractError::ApiCallFailed { provider, source } => {
                write!(f, "提取 API 调用失败 ({}): {}", provider, source)
            }
            ExtractError::EmptyResponse { provider } => {
                write!(f, "提取 API 返回为空 ({})", provider)
            }
            ExtractError::ParseFailed { message } => {
                write!(f, "无法解析提取结果: {}", message)
            }
        }
    }
}

impl std::error::Error for ExtractError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ExtractError::ApiCallFailed { source, .. } => {
                Some(source.as_ref() as &(dyn std::error::Error + 'static))
            }
            _ => None,
        }
    }
}

/// 语义校验错误
#[derive(Debug)]
pub enum VerifyError {
    /// LLM 调用失败
    ApiCallFailed {
        model: String,
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    /// LLM 返回内容为空
    EmptyContent { model: String },
    /// 判定结果解析失败
    VerdictParseFailed { response: String },
}

impl fmt::Display for VerifyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VerifyError::ApiCallFailed { model, source } => {
                write!(f, "LLM API 调用失败 (模型: {}): {}", model, source)
            }
            VerifyError::EmptyContent { model } => {
                write!(f, "LLM 返回内容为空 (模型: {})", model)
            }
            VerifyError::VerdictParseFailed { response } => {
                write!(f, "无法解析判定结果: {}", response)
            }
        }
    }
}

impl std::error::Error for VerifyError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            VerifyError::ApiCallFailed { source, .. } => {
                Some(source.as_ref() as &(dyn std::error::Error + 'static))
            }
            _ => None,
        }
    }
}

/// 对象存储错误
#[derive(Debug)]
pub enum StorageError {
    /// 下载失败
    DownloadFailed { path: String, message: String },
    /// 上传失败
    UploadFailed { path: String, message: String },
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::DownloadFailed { path, message } => {
                write!(f, "下载失败 ({}): {}", path, message)
            }
            StorageError::UploadFailed { path, message } => {
                write!(f, "上传失败 ({}): {}", path, message)
            }
        }
    }
}

impl std::error::Error for StorageError {}

/// 远端持久化错误
#[derive(Debug)]
pub enum PersistError {
    /// 写入失败
    WriteFailed {
        table: String,
        id: String,
        message: String,
    },
    /// 读取失败
    LoadFailed { table: String, message: String },
}

impl fmt::Display for PersistError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PersistError::WriteFailed { table, id, message } => {
                write!(f, "写入 {} 失败 (id: {}): {}", table, id, message)
            }
            PersistError::LoadFailed { table, message } => {
                write!(f, "读取 {} 失败: {}", table, message)
            }
        }
    }
}

impl std::error::Error for PersistError {}

/// 配置错误
#[derive(Debug)]
pub enum ConfigError {
    /// 未知的提供方类型
    UnknownProvider { kind: String, value: String },
    /// 配置文件解析失败
    FileParseFailed { path: String, message: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::UnknownProvider { kind, value } => {
                write!(f, "未知的 {} 提供方: {}", kind, value)
            }
            ConfigError::FileParseFailed { path, message } => {
                write!(f, "配置文件解析失败 ({}): {}", path, message)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

// ========== 从常见错误类型转换 ==========

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Other(format!("JSON 处理失败: {}", err))
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        AppError::Other(format!("HTTP 请求失败: {}", err))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Other(format!("IO 错误: {}", err))
    }
}

// ========== 便捷构造函数 ==========

impl AppError {
    /// 创建"答案结构缺失"契约错误
    pub fn missing_answer_key(session_id: impl Into<String>) -> Self {
        AppError::Contract(ContractError::MissingAnswerKey {
            session_id: session_id.into(),
        })
    }

    /// 创建提取 API 调用错误
    pub fn extract_api_failed(
        provider: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        AppError::Extract(ExtractError::ApiCallFailed {
            provider: provider.into(),
            source: Box::new(source),
        })
    }

    /// 创建 LLM 调用错误
    pub fn verify_api_failed(
        model: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        AppError::Verify(VerifyError::ApiCallFailed {
            model: model.into(),
            source: Box::new(source),
        })
    }

    /// 创建下载失败错误
    pub fn download_failed(path: impl Into<String>, message: impl Into<String>) -> Self {
        AppError::Storage(StorageError::DownloadFailed {
            path: path.into(),
            message: message.into(),
        })
    }

    /// 创建上传失败错误
    pub fn upload_failed(path: impl Into<String>, message: impl Into<String>) -> Self {
        AppError::Storage(StorageError::UploadFailed {
            path: path.into(),
            message: message.into(),
        })
    }
}

// ========== Result 类型别名 ==========

/// 应用程序结果类型
pub type AppResult<T> = Result<T, AppError>;

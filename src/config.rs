use serde::Deserialize;

use crate::error::{AppError, AppResult, ConfigError};
use crate::services::matcher::ScriptKind;

/// 程序配置文件
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    /// 结构提取提供方（"gemini" 或 "mock"）
    pub extract_provider: String,
    /// 语义校验提供方（"llm" 或 "mock"）
    pub verify_provider: String,
    /// 是否显示详细日志
    pub verbose_logging: bool,
    // --- 自动保存配置 ---
    /// 去抖窗口（毫秒）
    pub autosave_debounce_ms: u64,
    /// 单条写入的最大尝试次数
    pub autosave_max_retries: usize,
    /// 重试间隔（毫秒，逐次递增）
    pub autosave_retry_delays_ms: Vec<u64>,
    // --- 语义兜底路由 ---
    /// 标准答案含这些文字系统时才走语义校验。
    /// 这是"自由表述题"的启发式代理，按需配置。
    pub semantic_scripts: Vec<ScriptKind>,
    // --- Gemini 提取配置 ---
    pub gemini_api_key: String,
    pub gemini_api_url: String,
    // --- LLM 语义校验配置 ---
    pub llm_api_key: String,
    pub llm_api_base_url: String,
    pub llm_model_name: String,
    // --- Supabase 远端配置 ---
    pub supabase_url: String,
    pub supabase_anon_key: String,
    pub storage_bucket: String,
    // --- 离线演示配置 ---
    /// 演示模式扫描的试卷目录（答案卷 + 学生答卷）
    pub exam_folder: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            extract_provider: "gemini".to_string(),
            verify_provider: "llm".to_string(),
            verbose_logging: false,
            autosave_debounce_ms: 2000,
            autosave_max_retries: 3,
            autosave_retry_delays_ms: vec![1000, 2000, 4000],
            semantic_scripts: vec![ScriptKind::Hangul],
            gemini_api_key: String::new(),
            gemini_api_url:
                "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.5-flash:generateContent"
                    .to_string(),
            llm_api_key: String::new(),
            llm_api_base_url: "https://api.openai.com/v1".to_string(),
            llm_model_name: "gpt-4o-mini".to_string(),
            supabase_url: String::new(),
            supabase_anon_key: String::new(),
            storage_bucket: "exam-files".to_string(),
            exam_folder: "exam_files".to_string(),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let default = Self::default();
        Self {
            extract_provider: std::env::var("EXTRACT_PROVIDER").unwrap_or(default.extract_provider),
            verify_provider: std::env::var("VERIFY_PROVIDER").unwrap_or(default.verify_provider),
            verbose_logging: std::env::var("VERBOSE_LOGGING").ok().and_then(|v| v.parse().ok()).unwrap_or(default.verbose_logging),
            autosave_debounce_ms: std::env::var("AUTOSAVE_DEBOUNCE_MS").ok().and_then(|v| v.parse().ok()).unwrap_or(default.autosave_debounce_ms),
            autosave_max_retries: std::env::var("AUTOSAVE_MAX_RETRIES").ok().and_then(|v| v.parse().ok()).unwrap_or(default.autosave_max_retries),
            autosave_retry_delays_ms: std::env::var("AUTOSAVE_RETRY_DELAYS_MS").ok().map(parse_delays).unwrap_or(default.autosave_retry_delays_ms),
            semantic_scripts: std::env::var("SEMANTIC_SCRIPTS").ok().map(|v| parse_scripts(&v)).unwrap_or(default.semantic_scripts),
            gemini_api_key: std::env::var("GEMINI_API_KEY").unwrap_or(default.gemini_api_key),
            gemini_api_url: std::env::var("GEMINI_API_URL").unwrap_or(default.gemini_api_url),
            llm_api_key: std::env::var("LLM_API_KEY").unwrap_or(default.llm_api_key),
            llm_api_base_url: std::env::var("LLM_API_BASE_URL").unwrap_or(default.llm_api_base_url),
            llm_model_name: std::env::var("LLM_MODEL_NAME").unwrap_or(default.llm_model_name),
            supabase_url: std::env::var("SUPABASE_URL").unwrap_or(default.supabase_url),
            supabase_anon_key: std::env::var("SUPABASE_ANON_KEY").unwrap_or(default.supabase_anon_key),
            storage_bucket: std::env::var("STORAGE_BUCKET").unwrap_or(default.storage_bucket),
            exam_folder: std::env::var("EXAM_FOLDER").unwrap_or(default.exam_folder),
        }
    }

    /// 从 TOML 配置文件加载
    pub async fn from_file(path: &str) -> AppResult<Self> {
        let content = tokio::fs::read_to_string(path).await?;
        toml::from_str(&content).map_err(|e| {
            AppError::Config(ConfigError::FileParseFailed {
                path: path.to_string(),
                message: e.to_string(),
            })
        })
    }
}

fn parse_delays(value: String) -> Vec<u64> {
    value
        .split(',')
        .filter_map(|v| v.trim().parse().ok())
        .collect()
}

fn parse_scripts(value: &str) -> Vec<ScriptKind> {
    value
        .split(',')
        .filter_map(|v| ScriptKind::parse(v.trim()))
        .collect()
}

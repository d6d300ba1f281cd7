//! 外部能力层（Clients）
//!
//! 核心引擎只依赖这里定义的四个能力接口，不关心具体提供方：
//! - `StructureExtractor` - 视觉结构提取（答案卷 / 学生答卷）
//! - `SemanticVerifier` - 批量语义等价判定
//! - `StorageClient` - 对象存储上传下载
//! - `PersistenceClient` - 远端数据库读写
//!
//! 提供方集合是固定的，由配置选择，不做运行时类型探测。

pub mod gemini_client;
pub mod llm_client;
pub mod mock;
pub mod supabase_client;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::error::{AppError, AppResult, ConfigError};
use crate::models::{
    AnswerKeyStructure, ExamFile, ImagePart, SessionRecord, StudentExamStructure, SubmissionRecord,
};

pub use gemini_client::GeminiClient;
pub use llm_client::LlmClient;
pub use mock::{MockExtractor, MockPersistence, MockStorage, MockVerifier};
pub use supabase_client::SupabaseClient;

/// 送去语义校验的单个候选
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyCandidate {
    /// 题号字符串
    pub id: String,
    pub student_answer: String,
    pub correct_answer: String,
}

/// 语义校验的单条判定
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyVerdict {
    pub id: String,
    pub is_correct: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// 视觉结构提取能力
#[async_trait]
pub trait StructureExtractor: Send + Sync {
    /// 从答案卷图片提取标准答案结构
    async fn extract_answer_key(&self, images: &[ImagePart]) -> AppResult<AnswerKeyStructure>;

    /// 从学生答卷图片提取作答结构
    async fn extract_student_exam(&self, images: &[ImagePart]) -> AppResult<StudentExamStructure>;
}

/// 批量语义等价判定能力
#[async_trait]
pub trait SemanticVerifier: Send + Sync {
    /// 一次调用判定所有候选，返回逐条结论
    async fn verify_batch(&self, candidates: &[VerifyCandidate]) -> AppResult<Vec<VerifyVerdict>>;
}

/// 对象存储能力
#[async_trait]
pub trait StorageClient: Send + Sync {
    async fn download_file(&self, remote_path: &str, display_name: &str) -> AppResult<ExamFile>;

    /// 上传答案卷，返回远端路径
    async fn upload_answer_key(
        &self,
        user_id: &str,
        session_id: &str,
        file: &ExamFile,
    ) -> AppResult<String>;

    /// 上传学生答卷，返回远端路径
    async fn upload_submission_file(
        &self,
        user_id: &str,
        session_id: &str,
        submission_id: &str,
        file: &ExamFile,
    ) -> AppResult<String>;
}

/// 远端持久化能力（按 id 幂等 upsert）
#[async_trait]
pub trait PersistenceClient: Send + Sync {
    async fn upsert_session(&self, record: &SessionRecord) -> AppResult<()>;
    async fn upsert_submission(&self, record: &SubmissionRecord) -> AppResult<()>;
    async fn load_sessions(&self, user_id: &str) -> AppResult<Vec<SessionRecord>>;
    async fn load_submissions(&self, session_id: &str) -> AppResult<Vec<SubmissionRecord>>;
}

/// 按配置创建结构提取提供方
pub fn create_extractor(config: &Config) -> AppResult<Arc<dyn StructureExtractor>> {
    match config.extract_provider.as_str() {
        "gemini" => Ok(Arc::new(GeminiClient::new(config))),
        "mock" => Ok(Arc::new(MockExtractor::sample())),
        other => Err(AppError::Config(ConfigError::UnknownProvider {
            kind: "extract".to_string(),
            value: other.to_string(),
        })),
    }
}

/// 按配置创建语义校验提供方
pub fn create_verifier(config: &Config) -> AppResult<Arc<dyn SemanticVerifier>> {
    match config.verify_provider.as_str() {
        "llm" => Ok(Arc::new(LlmClient::new(config))),
        "mock" => Ok(Arc::new(MockVerifier::default())),
        other => Err(AppError::Config(ConfigError::UnknownProvider {
            kind: "verify".to_string(),
            value: other.to_string(),
        })),
    }
}

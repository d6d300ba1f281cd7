/// Supabase 远端客户端
///
/// 同时实现对象存储与数据库两种能力：
/// - Storage REST：`/storage/v1/object/{bucket}/{path}`
/// - PostgREST：`/rest/v1/{table}`，upsert 按 id 幂等
use async_trait::async_trait;
use tracing::debug;

use crate::clients::{PersistenceClient, StorageClient};
use crate::config::Config;
use crate::error::{AppError, AppResult, PersistError};
use crate::models::{ExamFile, SessionRecord, SubmissionRecord};

const SESSIONS_TABLE: &str = "exam_sessions";
const SUBMISSIONS_TABLE: &str = "submissions";

/// Supabase 客户端
pub struct SupabaseClient {
    client: reqwest::Client,
    base_url: String,
    anon_key: String,
    bucket: String,
}

impl SupabaseClient {
    /// 创建新的 Supabase 客户端
    pub fn new(config: &Config) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: config.supabase_url.trim_end_matches('/').to_string(),
            anon_key: config.supabase_anon_key.clone(),
            bucket: config.storage_bucket.clone(),
        }
    }

    fn storage_url(&self, path: &str) -> String {
        format!("{}/storage/v1/object/{}/{}", self.base_url, self.bucket, path)
    }

    fn rest_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }

    fn auth(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        req.header("apikey", &self.anon_key)
            .bearer_auth(&self.anon_key)
    }

    /// 上传一份文件到指定路径（覆盖同名对象）
    async fn upload(&self, path: &str, file: &ExamFile) -> AppResult<String> {
        let response = self
            .auth(self.client.post(self.storage_url(path)))
            .header("x-upsert", "true")
            .header(reqwest::header::CONTENT_TYPE, &file.mime)
            .body(file.bytes.clone())
            .send()
            .await
            .map_err(|e| AppError::upload_failed(path, e.to_string()))?;

        if !response.status().is_success() {
            return Err(AppError::upload_failed(
                path,
                format!("HTTP {}", response.status()),
            ));
        }

        debug!("已上传: {}", path);
        Ok(path.to_string())
    }

    /// upsert 一行（Prefer: resolution=merge-duplicates，按 id 幂等）
    async fn upsert<T: serde::Serialize>(&self, table: &str, id: &str, row: &T) -> AppResult<()> {
        let response = self
            .auth(self.client.post(self.rest_url(table)))
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(&vec![row])
            .send()
            .await
            .map_err(|e| {
                AppError::Persist(PersistError::WriteFailed {
                    table: table.to_string(),
                    id: id.to_string(),
                    message: e.to_string(),
                })
            })?;

        if !response.status().is_success() {
            return Err(AppError::Persist(PersistError::WriteFailed {
                table: table.to_string(),
                id: id.to_string(),
                message: format!("HTTP {}", response.status()),
            }));
        }
        Ok(())
    }

    /// 按过滤条件读取整表行
    async fn select<T: serde::de::DeserializeOwned>(
        &self,
        table: &str,
        filter: &str,
        order: &str,
    ) -> AppResult<Vec<T>> {
        let url = format!("{}?{}&order={}&select=*", self.rest_url(table), filter, order);
        let response = self
            .auth(self.client.get(url))
            .send()
            .await
            .map_err(|e| {
                AppError::Persist(PersistError::LoadFailed {
                    table: table.to_string(),
                    message: e.to_string(),
                })
            })?;

        if !response.status().is_success() {
            return Err(AppError::Persist(PersistError::LoadFailed {
                table: table.to_string(),
                message: format!("HTTP {}", response.status()),
            }));
        }

        response.json().await.map_err(|e| {
            AppError::Persist(PersistError::LoadFailed {
                table: table.to_string(),
                message: e.to_string(),
            })
        })
    }
}

#[async_trait]
impl StorageClient for SupabaseClient {
    async fn download_file(&self, remote_path: &str, display_name: &str) -> AppResult<ExamFile> {
        let response = self
            .auth(self.client.get(self.storage_url(remote_path)))
            .send()
            .await
            .map_err(|e| AppError::download_failed(remote_path, e.to_string()))?;

        if !response.status().is_success() {
            return Err(AppError::download_failed(
                remote_path,
                format!("HTTP {}", response.status()),
            ));
        }

        let mime = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("application/pdf")
            .to_string();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| AppError::download_failed(remote_path, e.to_string()))?;

        debug!("已下载: {} ({} 字节)", remote_path, bytes.len());
        Ok(ExamFile::new(display_name, mime, bytes.to_vec()))
    }

    async fn upload_answer_key(
        &self,
        user_id: &str,
        session_id: &str,
        file: &ExamFile,
    ) -> AppResult<String> {
        let path = format!("{}/{}/answer-key.pdf", user_id, session_id);
        self.upload(&path, file).await
    }

    async fn upload_submission_file(
        &self,
        user_id: &str,
        session_id: &str,
        submission_id: &str,
        file: &ExamFile,
    ) -> AppResult<String> {
        let ext = if file.name.ends_with(".pdf") {
            "pdf"
        } else {
            file.mime.rsplit('/').next().unwrap_or("pdf")
        };
        let path = format!(
            "{}/{}/submissions/{}.{}",
            user_id, session_id, submission_id, ext
        );
        self.upload(&path, file).await
    }
}

#[async_trait]
impl PersistenceClient for SupabaseClient {
    async fn upsert_session(&self, record: &SessionRecord) -> AppResult<()> {
        self.upsert(SESSIONS_TABLE, &record.id, record).await
    }

    async fn upsert_submission(&self, record: &SubmissionRecord) -> AppResult<()> {
        self.upsert(SUBMISSIONS_TABLE, &record.id, record).await
    }

    async fn load_sessions(&self, user_id: &str) -> AppResult<Vec<SessionRecord>> {
        self.select(
            SESSIONS_TABLE,
            &format!("user_id=eq.{}", user_id),
            "created_at.asc",
        )
        .await
    }

    async fn load_submissions(&self, session_id: &str) -> AppResult<Vec<SubmissionRecord>> {
        self.select(
            SUBMISSIONS_TABLE,
            &format!("session_id=eq.{}", session_id),
            "uploaded_at.asc",
        )
        .await
    }
}

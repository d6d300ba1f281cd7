//! 应用门面
//!
//! 把存储、批改引擎、文件解析、批改队列与自动保存装配成一个
//! 对外的操作面。所有跨层流程（答案卷提取、上传跟踪、人工改判、
//! 服务端同步）都从这里进入。

use std::collections::HashMap;
use std::sync::Arc;

use tracing::info;

use crate::clients::{PersistenceClient, StorageClient, StructureExtractor};
use crate::config::Config;
use crate::error::{AppError, AppResult, ContractError};
use crate::models::{
    ExamSession, FileHandle, SessionStatus, StudentSubmission, SubmissionStatus,
};
use crate::services::{FileResolver, GradingEngine};
use crate::store::SessionStore;

use super::auto_save::AutoSave;
use super::grading_queue::GradingQueue;

/// 应用门面
pub struct App {
    pub store: Arc<SessionStore>,
    pub resolver: Arc<FileResolver>,
    engine: Arc<GradingEngine>,
    queue: Arc<GradingQueue>,
    autosave: AutoSave,
    extractor: Arc<dyn StructureExtractor>,
    storage: Arc<dyn StorageClient>,
    persistence: Arc<dyn PersistenceClient>,
}

impl App {
    pub fn new(
        config: &Config,
        extractor: Arc<dyn StructureExtractor>,
        verifier: Arc<dyn crate::clients::SemanticVerifier>,
        storage: Arc<dyn StorageClient>,
        persistence: Arc<dyn PersistenceClient>,
    ) -> Self {
        let store = Arc::new(SessionStore::new());
        let engine = Arc::new(GradingEngine::new(
            verifier,
            config.semantic_scripts.clone(),
        ));
        let resolver = Arc::new(FileResolver::new(storage.clone()));
        let queue = Arc::new(GradingQueue::new(
            store.clone(),
            engine.clone(),
            resolver.clone(),
            extractor.clone(),
        ));
        let autosave = AutoSave::new(store.clone(), persistence.clone(), config);

        Self {
            store,
            resolver,
            engine,
            queue,
            autosave,
            extractor,
            storage,
            persistence,
        }
    }

    // --- 会话生命周期 ---

    pub fn create_session(&self, title: impl Into<String>) -> ExamSession {
        self.store.add_session(title)
    }

    pub fn remove_session(&self, session_id: &str) {
        if let Some(session) = self.store.session(session_id) {
            // 缓存条目随会话一起失效
            if let Some(path) = session
                .answer_key_file
                .as_ref()
                .and_then(|f| f.remote_path.as_ref())
            {
                self.resolver.evict(path);
            }
            for sub in self.store.submissions(session_id) {
                if let Some(path) = &sub.remote_path {
                    self.resolver.evict(path);
                }
            }
        }
        self.store.remove_session(session_id);
    }

    /// 设置答案卷并提取答案结构。
    /// 提取期间会话处于 `extracting`，成功后落到 `ready`。
    pub async fn set_answer_key(&self, session_id: &str, file: FileHandle) -> AppResult<()> {
        // 文件登记、旧结构作废与 extracting 切换由存储原子完成
        self.store.set_answer_key_file(session_id, file.clone());
        info!("📄 开始提取答案结构: {}", file.name);

        let images = file.to_image_parts();
        match self.extractor.extract_answer_key(&images).await {
            Ok(structure) => {
                info!(
                    "✅ 答案结构提取完成: \"{}\" 共 {} 题",
                    structure.title, structure.total_questions
                );
                self.store.set_answer_key_structure(session_id, structure);
                Ok(())
            }
            Err(e) => {
                // 回到 idle，文件保留，允许重试提取
                self.store
                    .set_session_status(session_id, SessionStatus::Idle);
                Err(e)
            }
        }
    }

    /// 上传答案卷并登记远端路径，本地句柄预热进下载缓存
    pub async fn upload_answer_key(
        &self,
        user_id: &str,
        session_id: &str,
        file: FileHandle,
    ) -> AppResult<String> {
        let remote_path = self
            .storage
            .upload_answer_key(user_id, session_id, &file)
            .await?;
        self.resolver.prime(&remote_path, file);
        self.store
            .set_answer_key_remote_path(session_id, &remote_path);
        Ok(remote_path)
    }

    // --- 答卷 ---

    /// 登记一批本地答卷文件，返回新答卷的 id（尚未入队批改）
    pub fn add_submissions(&self, session_id: &str, files: Vec<FileHandle>) -> Vec<String> {
        let mut ids = Vec::with_capacity(files.len());
        for file in files {
            let sub = StudentSubmission::from_file(file);
            ids.push(sub.id.clone());
            self.store.add_submission(session_id, sub);
        }
        ids
    }

    pub fn remove_submission(&self, session_id: &str, submission_id: &str) {
        if let Some(sub) = self.store.submission(session_id, submission_id) {
            if let Some(path) = &sub.remote_path {
                self.resolver.evict(path);
            }
        }
        self.store.remove_submission(session_id, submission_id);
    }

    /// 上传答卷文件并登记远端路径，本地句柄预热进下载缓存
    pub async fn upload_submission(
        &self,
        user_id: &str,
        session_id: &str,
        submission_id: &str,
    ) -> AppResult<String> {
        let sub = self.store.submission(session_id, submission_id).ok_or(
            AppError::Contract(ContractError::SubmissionNotFound {
                submission_id: submission_id.to_string(),
            }),
        )?;
        let file = sub
            .local
            .ok_or(AppError::Contract(ContractError::NoFileSource {
                submission_id: submission_id.to_string(),
            }))?;

        let remote_path = self
            .storage
            .upload_submission_file(user_id, session_id, submission_id, &file)
            .await?;
        self.resolver.prime(&remote_path, file);
        self.store
            .set_submission_remote_path(session_id, submission_id, &remote_path);
        Ok(remote_path)
    }

    /// 把一批答卷送入该会话的批改队列
    pub fn enqueue_submissions(&self, session_id: &str, submission_ids: Vec<String>) {
        for id in &submission_ids {
            self.store
                .set_submission_status(session_id, id, SubmissionStatus::Queued);
        }
        self.queue.enqueue(session_id, submission_ids);
    }

    // --- 人工改判 ---

    /// 教师改写某题的学生答案，按文本匹配规则重新判分
    pub fn edit_answer(
        &self,
        session_id: &str,
        submission_id: &str,
        question_number: u32,
        new_answer: &str,
    ) -> AppResult<()> {
        let results = self.graded_results(session_id, submission_id)?;
        let result =
            self.engine
                .recalculate_after_edit(submission_id, &results, question_number, new_answer);
        self.store.apply_grading_result(session_id, &result);
        Ok(())
    }

    /// 教师直接推翻某题的判定
    pub fn toggle_result(
        &self,
        session_id: &str,
        submission_id: &str,
        question_number: u32,
        new_is_correct: bool,
    ) -> AppResult<()> {
        let results = self.graded_results(session_id, submission_id)?;
        let result = self.engine.toggle_correct_status(
            submission_id,
            &results,
            question_number,
            new_is_correct,
        );
        self.store.apply_grading_result(session_id, &result);
        Ok(())
    }

    fn graded_results(
        &self,
        session_id: &str,
        submission_id: &str,
    ) -> AppResult<Vec<crate::models::QuestionResult>> {
        let sub = self.store.submission(session_id, submission_id).ok_or(
            AppError::Contract(ContractError::SubmissionNotFound {
                submission_id: submission_id.to_string(),
            }),
        )?;
        sub.results
            .ok_or_else(|| AppError::Other(format!("答卷 {} 尚未批改", submission_id)))
    }

    // --- 文件访问 ---

    /// 取某答卷的文件内容（本地优先，远端经缓存下载）
    pub async fn resolve_submission_file(
        &self,
        session_id: &str,
        submission_id: &str,
    ) -> AppResult<FileHandle> {
        let sub = self.store.submission(session_id, submission_id).ok_or(
            AppError::Contract(ContractError::SubmissionNotFound {
                submission_id: submission_id.to_string(),
            }),
        )?;
        if let Some(local) = sub.local {
            return Ok(local);
        }
        match sub.remote_path {
            Some(path) => self.resolver.resolve(&path, &sub.file_name).await,
            None => Err(AppError::Contract(ContractError::NoFileSource {
                submission_id: submission_id.to_string(),
            })),
        }
    }

    // --- 服务端同步 ---

    /// 从服务端水合历史会话，然后启动自动保存。
    /// 水合发生在自动保存启动之前，历史数据不会被当作新变更回写。
    pub async fn start_sync(&self, user_id: &str) -> AppResult<()> {
        let session_records = self.persistence.load_sessions(user_id).await?;

        let mut sessions = Vec::with_capacity(session_records.len());
        let mut submissions: HashMap<String, Vec<StudentSubmission>> = HashMap::new();
        for record in session_records {
            let session_id = record.id.clone();
            let sub_records = self.persistence.load_submissions(&session_id).await?;
            submissions.insert(
                session_id.clone(),
                sub_records.into_iter().map(|r| r.into_submission()).collect(),
            );
            sessions.push(record.into_session());
        }
        info!("🔄 已从服务端加载 {} 个会话", sessions.len());

        self.store.hydrate(sessions, submissions);
        self.autosave.start(user_id);
        Ok(())
    }

    pub fn stop_sync(&self) {
        self.autosave.stop();
    }
}

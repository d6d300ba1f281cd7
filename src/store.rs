//! 会话状态容器
//!
//! 整个工作区唯一的共享状态：会话列表 + 每个会话的答卷列表。
//! 状态只能通过这里定义的操作变更，使用方持有 `Arc<SessionStore>`
//! 注入，不存在环境全局量。
//!
//! 每次变更递增修订号并通过 watch 通道广播，自动保存器
//! 靠这个通道感知"有东西变了"，再自行去抖与差异比较。

use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::watch;
use tracing::debug;

use crate::models::{
    ExamSession, FileHandle, GradingResult, SessionStatus, StudentSubmission, SubmissionStatus,
};

/// 某一时刻的完整状态快照（深拷贝，观察者随意持有）
#[derive(Debug, Clone)]
pub struct StoreSnapshot {
    pub sessions: Vec<ExamSession>,
    pub submissions: HashMap<String, Vec<StudentSubmission>>,
}

struct Inner {
    sessions: Vec<ExamSession>,
    submissions: HashMap<String, Vec<StudentSubmission>>,
    revision: u64,
}

/// 会话状态容器
pub struct SessionStore {
    inner: Mutex<Inner>,
    changed: watch::Sender<u64>,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStore {
    pub fn new() -> Self {
        let (changed, _) = watch::channel(0);
        Self {
            inner: Mutex::new(Inner {
                sessions: Vec::new(),
                submissions: HashMap::new(),
                revision: 0,
            }),
            changed,
        }
    }

    /// 订阅变更通知（值为修订号）
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.changed.subscribe()
    }

    /// 取完整快照
    pub fn snapshot(&self) -> StoreSnapshot {
        let inner = self.inner.lock().unwrap();
        StoreSnapshot {
            sessions: inner.sessions.clone(),
            submissions: inner.submissions.clone(),
        }
    }

    /// 在锁内执行一次变更，然后广播新修订号
    fn mutate<R>(&self, f: impl FnOnce(&mut Inner) -> R) -> R {
        let (result, revision) = {
            let mut inner = self.inner.lock().unwrap();
            let result = f(&mut inner);
            inner.revision += 1;
            (result, inner.revision)
        };
        let _ = self.changed.send(revision);
        result
    }

    // ========== 会话操作 ==========

    /// 新建会话，返回快照副本
    pub fn add_session(&self, title: impl Into<String>) -> ExamSession {
        let session = ExamSession::new(title);
        debug!("新建会话: {}", session.id);
        self.mutate(|inner| {
            inner.sessions.push(session.clone());
            inner.submissions.insert(session.id.clone(), Vec::new());
        });
        session
    }

    /// 删除会话及其全部答卷
    pub fn remove_session(&self, session_id: &str) {
        self.mutate(|inner| {
            inner.sessions.retain(|s| s.id != session_id);
            inner.submissions.remove(session_id);
        });
    }

    pub fn session(&self, session_id: &str) -> Option<ExamSession> {
        let inner = self.inner.lock().unwrap();
        inner.sessions.iter().find(|s| s.id == session_id).cloned()
    }

    pub fn update_session_title(&self, session_id: &str, title: impl Into<String>) {
        let title = title.into();
        self.mutate(|inner| {
            if let Some(session) = inner.sessions.iter_mut().find(|s| s.id == session_id) {
                session.title = title;
            }
        });
    }

    pub fn set_session_status(&self, session_id: &str, status: SessionStatus) {
        self.mutate(|inner| {
            if let Some(session) = inner.sessions.iter_mut().find(|s| s.id == session_id) {
                session.status = status;
            }
        });
    }

    /// 记录答案卷文件，并用文件名自动更新会话标题
    ///
    /// 旧结构作废和状态切换必须在同一次变更里完成：
    /// 任何观察者都不能看到"Ready 却没有结构"的会话。
    pub fn set_answer_key_file(&self, session_id: &str, file: FileHandle) {
        self.mutate(|inner| {
            if let Some(session) = inner.sessions.iter_mut().find(|s| s.id == session_id) {
                session.title = file.name.trim_end_matches(".pdf").to_string();
                session.answer_key_file = Some(crate::models::AnswerKeyFile {
                    name: file.name.clone(),
                    size: file.size(),
                    local: Some(file),
                    remote_path: None,
                });
                // 重新上传答案卷 = 整体替换批改基准
                session.answer_key_structure = None;
                session.status = SessionStatus::Extracting;
            }
        });
    }

    /// 写入提取出的答案结构并让会话就绪
    ///
    /// 维护不变式：只有结构存在时才会出现 Ready。
    pub fn set_answer_key_structure(
        &self,
        session_id: &str,
        structure: crate::models::AnswerKeyStructure,
    ) {
        self.mutate(|inner| {
            if let Some(session) = inner.sessions.iter_mut().find(|s| s.id == session_id) {
                session.answer_key_structure = Some(structure);
                session.status = SessionStatus::Ready;
            }
        });
    }

    pub fn set_answer_key_remote_path(&self, session_id: &str, remote_path: impl Into<String>) {
        let remote_path = remote_path.into();
        self.mutate(|inner| {
            if let Some(session) = inner.sessions.iter_mut().find(|s| s.id == session_id) {
                if let Some(file) = session.answer_key_file.as_mut() {
                    file.remote_path = Some(remote_path);
                }
            }
        });
    }

    // ========== 答卷操作 ==========

    pub fn add_submission(&self, session_id: &str, submission: StudentSubmission) {
        self.mutate(|inner| {
            inner
                .submissions
                .entry(session_id.to_string())
                .or_default()
                .push(submission);
        });
    }

    pub fn remove_submission(&self, session_id: &str, submission_id: &str) {
        self.mutate(|inner| {
            if let Some(subs) = inner.submissions.get_mut(session_id) {
                subs.retain(|s| s.id != submission_id);
            }
        });
    }

    pub fn submission(&self, session_id: &str, submission_id: &str) -> Option<StudentSubmission> {
        let inner = self.inner.lock().unwrap();
        inner
            .submissions
            .get(session_id)?
            .iter()
            .find(|s| s.id == submission_id)
            .cloned()
    }

    pub fn submissions(&self, session_id: &str) -> Vec<StudentSubmission> {
        let inner = self.inner.lock().unwrap();
        inner
            .submissions
            .get(session_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn set_submission_status(
        &self,
        session_id: &str,
        submission_id: &str,
        status: SubmissionStatus,
    ) {
        self.mutate(|inner| {
            if let Some(sub) = find_submission(inner, session_id, submission_id) {
                sub.status = status;
            }
        });
    }

    pub fn set_submission_remote_path(
        &self,
        session_id: &str,
        submission_id: &str,
        remote_path: impl Into<String>,
    ) {
        let remote_path = remote_path.into();
        self.mutate(|inner| {
            if let Some(sub) = find_submission(inner, session_id, submission_id) {
                sub.remote_path = Some(remote_path);
            }
        });
    }

    /// 写入批改结果：状态转 Graded，覆盖分数与逐题结果
    pub fn apply_grading_result(&self, session_id: &str, result: &GradingResult) {
        self.mutate(|inner| {
            if let Some(sub) = find_submission(inner, session_id, &result.submission_id) {
                sub.status = SubmissionStatus::Graded;
                sub.score = Some(result.score);
                sub.results = Some(result.results.clone());
                if let Some(name) = &result.student_name {
                    sub.student_name = name.clone();
                }
            }
        });
    }

    // ========== 服务端水合 ==========

    /// 用服务端数据整体替换本地状态（登录后调用一次）
    pub fn hydrate(
        &self,
        sessions: Vec<ExamSession>,
        submissions: HashMap<String, Vec<StudentSubmission>>,
    ) {
        debug!("从服务端水合 {} 个会话", sessions.len());
        self.mutate(|inner| {
            inner.sessions = sessions;
            inner.submissions = submissions;
        });
    }
}

fn find_submission<'a>(
    inner: &'a mut Inner,
    session_id: &str,
    submission_id: &str,
) -> Option<&'a mut StudentSubmission> {
    inner
        .submissions
        .get_mut(session_id)?
        .iter_mut()
        .find(|s| s.id == submission_id)
}

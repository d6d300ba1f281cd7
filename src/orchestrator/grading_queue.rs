//! 批改队列
//!
//! 每个会话一条 FIFO 队列，串行消化"提取 + 批改"工作：
//! 同一会话任意时刻至多一份答卷在批改，入队永不抢占在批的那份；
//! 不同会话的队列彼此独立，自由交错。
//!
//! 失败的答卷退回 `Pending` 等待手动重试，不会自动重新入队——
//! 队列成员资格只反映用户/系统显式发起的批改请求。

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use tracing::{error, info, warn};

use crate::clients::StructureExtractor;
use crate::error::{AppError, AppResult, ContractError};
use crate::models::{FileHandle, SubmissionStatus};
use crate::services::{FileResolver, GradingEngine};
use crate::store::SessionStore;

#[derive(Default)]
struct SessionQueue {
    queue: VecDeque<String>,
    busy: bool,
}

/// 批改队列
pub struct GradingQueue {
    store: Arc<SessionStore>,
    engine: Arc<GradingEngine>,
    resolver: Arc<FileResolver>,
    extractor: Arc<dyn StructureExtractor>,
    sessions: Mutex<HashMap<String, SessionQueue>>,
}

impl GradingQueue {
    pub fn new(
        store: Arc<SessionStore>,
        engine: Arc<GradingEngine>,
        resolver: Arc<FileResolver>,
        extractor: Arc<dyn StructureExtractor>,
    ) -> Self {
        Self {
            store,
            engine,
            resolver,
            extractor,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// 入队一批答卷，队列空闲时立即开始消化
    pub fn enqueue(self: &Arc<Self>, session_id: &str, submission_ids: Vec<String>) {
        if submission_ids.is_empty() {
            return;
        }

        let should_start = {
            let mut sessions = self.sessions.lock().unwrap();
            let sq = sessions.entry(session_id.to_string()).or_default();
            sq.queue.extend(submission_ids);
            if sq.busy {
                false
            } else {
                sq.busy = true;
                true
            }
        };

        if should_start {
            let queue = Arc::clone(self);
            let session_id = session_id.to_string();
            tokio::spawn(async move {
                queue.drain(&session_id).await;
            });
        }
    }

    /// 消化循环：逐个弹出队首，直到队列为空
    async fn drain(&self, session_id: &str) {
        loop {
            let submission_id = {
                let mut sessions = self.sessions.lock().unwrap();
                let sq = sessions.entry(session_id.to_string()).or_default();
                match sq.queue.pop_front() {
                    Some(id) => id,
                    None => {
                        sq.busy = false;
                        return;
                    }
                }
            };

            match self.process_one(session_id, &submission_id).await {
                Ok(()) => {}
                // 没有答案结构就入队属于编程错误：中止本会话的整条队列
                Err(e @ AppError::Contract(ContractError::MissingAnswerKey { .. })) => {
                    error!("[会话 {}] ❌ 契约违反，中止批改队列: {}", session_id, e);
                    self.abort_session(session_id, &submission_id);
                    return;
                }
                // 其余失败只影响这一份：退回 pending，继续下一份。
                // 答卷在批改前被显式删除也走这条路，不牵连队列里的其他答卷。
                Err(e) => {
                    warn!(
                        "[会话 {}] ⚠️ 批改失败，答卷 {} 退回 pending: {}",
                        session_id, submission_id, e
                    );
                    self.store.set_submission_status(
                        session_id,
                        &submission_id,
                        SubmissionStatus::Pending,
                    );
                }
            }
        }
    }

    /// 批改单份答卷
    async fn process_one(&self, session_id: &str, submission_id: &str) -> AppResult<()> {
        let session = self
            .store
            .session(session_id)
            .ok_or(AppError::Contract(ContractError::SessionNotFound {
                session_id: session_id.to_string(),
            }))?;

        // 没有答案结构就开始批改属于调用方契约违反
        let key = session
            .answer_key_structure
            .ok_or_else(|| AppError::missing_answer_key(session_id))?;

        let submission = self.store.submission(session_id, submission_id).ok_or(
            AppError::Contract(ContractError::SubmissionNotFound {
                submission_id: submission_id.to_string(),
            }),
        )?;

        self.store
            .set_submission_status(session_id, submission_id, SubmissionStatus::Grading);
        info!("[会话 {}] 📝 开始批改: {}", session_id, submission.file_name);

        let file = self.resolve_file(&submission).await?;
        let images = file.to_image_parts();
        let exam = self.extractor.extract_student_exam(&images).await?;
        let result = self.engine.score(submission_id, &key, &exam).await;

        info!(
            "[会话 {}] ✅ 批改完成: {} ({}/{})",
            session_id, result.student_name.as_deref().unwrap_or(&submission.student_name),
            result.score.correct, result.score.total
        );
        self.store.apply_grading_result(session_id, &result);
        Ok(())
    }

    /// 解析答卷文件：优先本地句柄，其次走缓存下载
    async fn resolve_file(
        &self,
        submission: &crate::models::StudentSubmission,
    ) -> AppResult<FileHandle> {
        if let Some(local) = &submission.local {
            return Ok(local.clone());
        }
        if let Some(remote_path) = &submission.remote_path {
            return self.resolver.resolve(remote_path, &submission.file_name).await;
        }
        Err(AppError::Contract(ContractError::NoFileSource {
            submission_id: submission.id.clone(),
        }))
    }

    /// 契约违反后的收尾：清空队列，余下答卷全部退回 pending
    fn abort_session(&self, session_id: &str, failed_id: &str) {
        let remaining = {
            let mut sessions = self.sessions.lock().unwrap();
            let sq = sessions.entry(session_id.to_string()).or_default();
            sq.busy = false;
            std::mem::take(&mut sq.queue)
        };
        self.store
            .set_submission_status(session_id, failed_id, SubmissionStatus::Pending);
        for id in remaining {
            self.store
                .set_submission_status(session_id, &id, SubmissionStatus::Pending);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use base64::Engine as _;

    use super::*;
    use crate::clients::MockVerifier;
    use crate::models::{
        AnswerKeyStructure, ExamFile, ImagePart, KeyAnswer, StudentExamStructure,
        StudentSubmission,
    };
    use crate::services::matcher::ScriptKind;

    /// 记录提取顺序与并发度的测试提取器。
    /// 学生姓名从图片内容（即文件字节）还原。
    struct TrackingExtractor {
        key: AnswerKeyStructure,
        current: AtomicUsize,
        max_seen: AtomicUsize,
        order: Mutex<Vec<String>>,
        fail_for: Option<String>,
    }

    impl TrackingExtractor {
        fn new(key: AnswerKeyStructure) -> Self {
            Self {
                key,
                current: AtomicUsize::new(0),
                max_seen: AtomicUsize::new(0),
                order: Mutex::new(Vec::new()),
                fail_for: None,
            }
        }

        fn decode_name(images: &[ImagePart]) -> String {
            let bytes = base64::engine::general_purpose::STANDARD
                .decode(&images[0].data)
                .unwrap_or_default();
            String::from_utf8_lossy(&bytes).to_string()
        }
    }

    #[async_trait]
    impl StructureExtractor for TrackingExtractor {
        async fn extract_answer_key(
            &self,
            _images: &[ImagePart],
        ) -> AppResult<AnswerKeyStructure> {
            Ok(self.key.clone())
        }

        async fn extract_student_exam(
            &self,
            images: &[ImagePart],
        ) -> AppResult<StudentExamStructure> {
            let name = Self::decode_name(images);
            if self.fail_for.as_deref() == Some(name.as_str()) {
                return Err(AppError::Other("提取失败".to_string()));
            }

            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_seen.fetch_max(now, Ordering::SeqCst);
            self.order.lock().unwrap().push(name.clone());
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.current.fetch_sub(1, Ordering::SeqCst);

            Ok(StudentExamStructure {
                student_name: name,
                total_questions: 1,
                answers: BTreeMap::from([(1, "a".to_string())]),
            })
        }
    }

    fn one_question_key() -> AnswerKeyStructure {
        AnswerKeyStructure {
            title: "테스트".to_string(),
            total_questions: 1,
            answers: BTreeMap::from([(
                1,
                KeyAnswer {
                    text: "a".to_string(),
                    x: 0.5,
                    y: 0.5,
                    page: Some(1),
                },
            )]),
        }
    }

    struct Setup {
        store: Arc<SessionStore>,
        queue: Arc<GradingQueue>,
        extractor: Arc<TrackingExtractor>,
    }

    fn setup(extractor: TrackingExtractor) -> Setup {
        let store = Arc::new(SessionStore::new());
        let extractor = Arc::new(extractor);
        let engine = Arc::new(GradingEngine::new(
            Arc::new(MockVerifier::default()),
            vec![ScriptKind::Hangul],
        ));
        let resolver = Arc::new(FileResolver::new(Arc::new(
            crate::clients::MockStorage::default(),
        )));
        let queue = Arc::new(GradingQueue::new(
            store.clone(),
            engine,
            resolver,
            extractor.clone(),
        ));
        Setup {
            store,
            queue,
            extractor,
        }
    }

    fn add_submission(store: &SessionStore, session_id: &str, name: &str) -> String {
        let file = Arc::new(ExamFile::new(
            format!("{}.pdf", name),
            "application/pdf",
            name.as_bytes().to_vec(),
        ));
        let sub = StudentSubmission::from_file(file);
        let id = sub.id.clone();
        store.add_submission(session_id, sub);
        id
    }

    async fn wait_until<F: Fn() -> bool>(cond: F) {
        for _ in 0..200 {
            if cond() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("等待超时");
    }

    #[tokio::test]
    async fn submissions_grade_sequentially_in_enqueue_order() {
        let s = setup(TrackingExtractor::new(one_question_key()));
        let session = s.store.add_session("试卷");
        s.store.set_answer_key_structure(&session.id, one_question_key());

        let ids: Vec<String> = ["a", "b", "c"]
            .iter()
            .map(|n| add_submission(&s.store, &session.id, n))
            .collect();
        s.queue.enqueue(&session.id, ids.clone());

        let store = s.store.clone();
        let session_id = session.id.clone();
        wait_until(|| {
            store
                .submissions(&session_id)
                .iter()
                .all(|sub| sub.status == SubmissionStatus::Graded)
        })
        .await;

        // 严格按入队顺序，且任意时刻只有一份在提取
        assert_eq!(*s.extractor.order.lock().unwrap(), vec!["a", "b", "c"]);
        assert_eq!(s.extractor.max_seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn extraction_failure_reverts_to_pending_and_continues() {
        let mut extractor = TrackingExtractor::new(one_question_key());
        extractor.fail_for = Some("b".to_string());
        let s = setup(extractor);
        let session = s.store.add_session("试卷");
        s.store.set_answer_key_structure(&session.id, one_question_key());

        let ids: Vec<String> = ["a", "b", "c"]
            .iter()
            .map(|n| add_submission(&s.store, &session.id, n))
            .collect();
        s.queue.enqueue(&session.id, ids.clone());

        let store = s.store.clone();
        let session_id = session.id.clone();
        wait_until(|| {
            store
                .submissions(&session_id)
                .iter()
                .all(|sub| {
                    matches!(
                        sub.status,
                        SubmissionStatus::Graded | SubmissionStatus::Pending
                    )
                })
        })
        .await;

        let subs = s.store.submissions(&session.id);
        let by_id = |id: &str| subs.iter().find(|x| x.id == id).unwrap();
        assert_eq!(by_id(&ids[0]).status, SubmissionStatus::Graded);
        // 失败的退回 pending，不自动重新入队
        assert_eq!(by_id(&ids[1]).status, SubmissionStatus::Pending);
        // 后续的不受影响
        assert_eq!(by_id(&ids[2]).status, SubmissionStatus::Graded);
    }

    #[tokio::test]
    async fn removal_mid_queue_only_skips_that_submission() {
        let s = setup(TrackingExtractor::new(one_question_key()));
        let session = s.store.add_session("试卷");
        s.store.set_answer_key_structure(&session.id, one_question_key());

        let ids: Vec<String> = ["a", "b", "c"]
            .iter()
            .map(|n| add_submission(&s.store, &session.id, n))
            .collect();
        s.queue.enqueue(&session.id, ids.clone());

        // a 还在提取中（20ms 窗口），趁机删掉排在后面的 b
        tokio::time::sleep(Duration::from_millis(5)).await;
        s.store.remove_submission(&session.id, &ids[1]);

        let store = s.store.clone();
        let session_id = session.id.clone();
        let (a, c) = (ids[0].clone(), ids[2].clone());
        wait_until(|| {
            let done = |id: &str| {
                store
                    .submission(&session_id, id)
                    .map(|sub| sub.status == SubmissionStatus::Graded)
                    .unwrap_or(false)
            };
            done(&a) && done(&c)
        })
        .await;

        // 被删的 b 不会把队列带崩，c 照常批改
        assert_eq!(*s.extractor.order.lock().unwrap(), vec!["a", "c"]);
    }

    #[tokio::test]
    async fn missing_answer_key_aborts_queue() {
        let s = setup(TrackingExtractor::new(one_question_key()));
        let session = s.store.add_session("试卷");
        // 故意不设置答案结构

        let ids: Vec<String> = ["a", "b"]
            .iter()
            .map(|n| add_submission(&s.store, &session.id, n))
            .collect();
        s.queue.enqueue(&session.id, ids.clone());

        let store = s.store.clone();
        let session_id = session.id.clone();
        wait_until(|| {
            store
                .submissions(&session_id)
                .iter()
                .all(|sub| sub.status == SubmissionStatus::Pending)
        })
        .await;

        // 什么都没提取
        assert!(s.extractor.order.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn sessions_queues_are_independent() {
        let s = setup(TrackingExtractor::new(one_question_key()));
        let s1 = s.store.add_session("试卷一");
        let s2 = s.store.add_session("试卷二");
        s.store.set_answer_key_structure(&s1.id, one_question_key());
        s.store.set_answer_key_structure(&s2.id, one_question_key());

        let id1 = add_submission(&s.store, &s1.id, "s1-a");
        let id2 = add_submission(&s.store, &s2.id, "s2-a");
        s.queue.enqueue(&s1.id, vec![id1]);
        s.queue.enqueue(&s2.id, vec![id2]);

        let store = s.store.clone();
        let (a, b) = (s1.id.clone(), s2.id.clone());
        wait_until(|| {
            let done = |sid: &str| {
                store
                    .submissions(sid)
                    .iter()
                    .all(|sub| sub.status == SubmissionStatus::Graded)
            };
            done(&a) && done(&b)
        })
        .await;
    }
}

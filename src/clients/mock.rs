//! 确定性离线提供方
//!
//! 外部 AI / 远端服务不可用时，整条批改流水线仍要能跑通。
//! 这组 mock 行为完全确定，同时也是单元/集成测试的基座：
//! 可以预置脚本化的提取结果和判定结论，并统计调用次数。

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::clients::{
    PersistenceClient, SemanticVerifier, StorageClient, StructureExtractor, VerifyCandidate,
    VerifyVerdict,
};
use crate::error::{AppError, AppResult, PersistError};
use crate::models::{
    AnswerKeyStructure, ExamFile, ImagePart, KeyAnswer, SessionRecord, StudentExamStructure,
    SubmissionRecord,
};

/// 离线结构提取器
///
/// 答案卷固定返回内置样例；学生答卷优先消费脚本队列，
/// 队列空了就按图片内容派生一份确定性的作答。
pub struct MockExtractor {
    key: AnswerKeyStructure,
    scripted_exams: Mutex<VecDeque<StudentExamStructure>>,
}

impl MockExtractor {
    pub fn new(key: AnswerKeyStructure) -> Self {
        Self {
            key,
            scripted_exams: Mutex::new(VecDeque::new()),
        }
    }

    /// 内置样例答案卷（5 题，混合选择题和表述题）
    pub fn sample() -> Self {
        let mut answers = BTreeMap::new();
        let texts = ["A/B", "3", "서울", "광합성", "좋은 선생님"];
        for (i, text) in texts.iter().enumerate() {
            let number = i as u32 + 1;
            answers.insert(
                number,
                KeyAnswer {
                    text: text.to_string(),
                    x: 0.1,
                    y: 0.1 + 0.15 * i as f64,
                    page: Some(1),
                },
            );
        }
        Self::new(AnswerKeyStructure {
            title: "샘플 시험지".to_string(),
            total_questions: answers.len() as u32,
            answers,
        })
    }

    /// 预置下一次学生答卷提取的结果（测试用）
    pub fn push_student_exam(&self, exam: StudentExamStructure) {
        self.scripted_exams.lock().unwrap().push_back(exam);
    }

    /// 按图片内容派生一份确定性作答
    fn derive_exam(&self, images: &[ImagePart]) -> StudentExamStructure {
        let seed: usize = images.iter().map(|i| i.data.len()).sum();
        let mut answers = BTreeMap::new();
        for (number, key) in &self.key.answers {
            let answer = match (seed + *number as usize) % 5 {
                0 => crate::models::grading::UNWRITTEN.to_string(),
                1 => "오답".to_string(),
                _ => key
                    .text
                    .split('/')
                    .next()
                    .unwrap_or(&key.text)
                    .to_string(),
            };
            answers.insert(*number, answer);
        }
        StudentExamStructure {
            student_name: format!("학생 {:02}", seed % 100),
            total_questions: self.key.answers.len() as u32,
            answers,
        }
    }
}

#[async_trait]
impl StructureExtractor for MockExtractor {
    async fn extract_answer_key(&self, _images: &[ImagePart]) -> AppResult<AnswerKeyStructure> {
        Ok(self.key.clone())
    }

    async fn extract_student_exam(&self, images: &[ImagePart]) -> AppResult<StudentExamStructure> {
        if let Some(exam) = self.scripted_exams.lock().unwrap().pop_front() {
            return Ok(exam);
        }
        Ok(self.derive_exam(images))
    }
}

/// 离线语义校验器
///
/// 判定结论按题号预置，未预置的一律判不等价。
#[derive(Default)]
pub struct MockVerifier {
    verdicts: Mutex<HashMap<String, bool>>,
    calls: AtomicUsize,
}

impl MockVerifier {
    pub fn set_verdict(&self, id: impl Into<String>, is_correct: bool) {
        self.verdicts.lock().unwrap().insert(id.into(), is_correct);
    }

    /// 已发生的批量调用次数
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SemanticVerifier for MockVerifier {
    async fn verify_batch(&self, candidates: &[VerifyCandidate]) -> AppResult<Vec<VerifyVerdict>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let verdicts = self.verdicts.lock().unwrap();
        Ok(candidates
            .iter()
            .map(|c| VerifyVerdict {
                id: c.id.clone(),
                is_correct: verdicts.get(&c.id).copied().unwrap_or(false),
                reason: None,
            })
            .collect())
    }
}

/// 内存对象存储
///
/// 下载计数用于断言"并发去重只发一次请求"；
/// 可配置人为延迟放大并发窗口。
#[derive(Default)]
pub struct MockStorage {
    files: Mutex<HashMap<String, ExamFile>>,
    downloads: AtomicUsize,
    delay_ms: u64,
}

impl MockStorage {
    pub fn with_delay(delay_ms: u64) -> Self {
        Self {
            delay_ms,
            ..Default::default()
        }
    }

    pub fn put(&self, path: impl Into<String>, file: ExamFile) {
        self.files.lock().unwrap().insert(path.into(), file);
    }

    pub fn download_count(&self) -> usize {
        self.downloads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StorageClient for MockStorage {
    async fn download_file(&self, remote_path: &str, display_name: &str) -> AppResult<ExamFile> {
        self.downloads.fetch_add(1, Ordering::SeqCst);
        if self.delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
        }
        let file = self
            .files
            .lock()
            .unwrap()
            .get(remote_path)
            .cloned()
            .ok_or_else(|| AppError::download_failed(remote_path, "对象不存在"))?;
        Ok(ExamFile::new(display_name, file.mime, file.bytes))
    }

    async fn upload_answer_key(
        &self,
        user_id: &str,
        session_id: &str,
        file: &ExamFile,
    ) -> AppResult<String> {
        let path = format!("{}/{}/answer-key.pdf", user_id, session_id);
        self.put(path.clone(), file.clone());
        Ok(path)
    }

    async fn upload_submission_file(
        &self,
        user_id: &str,
        session_id: &str,
        submission_id: &str,
        file: &ExamFile,
    ) -> AppResult<String> {
        let path = format!("{}/{}/submissions/{}.pdf", user_id, session_id, submission_id);
        self.put(path.clone(), file.clone());
        Ok(path)
    }
}

/// 内存持久化
///
/// `fail_next_writes` 预置前 N 次写入失败，用于验证重试与
/// "失败后保持脏状态"的行为。
#[derive(Default)]
pub struct MockPersistence {
    sessions: Mutex<HashMap<String, SessionRecord>>,
    submissions: Mutex<HashMap<String, SubmissionRecord>>,
    write_count: AtomicUsize,
    fail_remaining: AtomicUsize,
}

impl MockPersistence {
    /// 预置接下来 n 次写入失败
    pub fn fail_next_writes(&self, n: usize) {
        self.fail_remaining.store(n, Ordering::SeqCst);
    }

    /// 已尝试的写入总次数（含失败）
    pub fn write_count(&self) -> usize {
        self.write_count.load(Ordering::SeqCst)
    }

    pub fn session(&self, id: &str) -> Option<SessionRecord> {
        self.sessions.lock().unwrap().get(id).cloned()
    }

    pub fn submission(&self, id: &str) -> Option<SubmissionRecord> {
        self.submissions.lock().unwrap().get(id).cloned()
    }

    fn check_failure(&self, table: &str, id: &str) -> AppResult<()> {
        let remaining = self.fail_remaining.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_remaining.store(remaining - 1, Ordering::SeqCst);
            return Err(AppError::Persist(PersistError::WriteFailed {
                table: table.to_string(),
                id: id.to_string(),
                message: "预置失败".to_string(),
            }));
        }
        Ok(())
    }
}

#[async_trait]
impl PersistenceClient for MockPersistence {
    async fn upsert_session(&self, record: &SessionRecord) -> AppResult<()> {
        self.write_count.fetch_add(1, Ordering::SeqCst);
        self.check_failure("exam_sessions", &record.id)?;
        self.sessions
            .lock()
            .unwrap()
            .insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn upsert_submission(&self, record: &SubmissionRecord) -> AppResult<()> {
        self.write_count.fetch_add(1, Ordering::SeqCst);
        self.check_failure("submissions", &record.id)?;
        self.submissions
            .lock()
            .unwrap()
            .insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn load_sessions(&self, user_id: &str) -> AppResult<Vec<SessionRecord>> {
        let mut rows: Vec<SessionRecord> = self
            .sessions
            .lock()
            .unwrap()
            .values()
            .filter(|r| r.user_id == user_id)
            .cloned()
            .collect();
        rows.sort_by_key(|r| r.created_at);
        Ok(rows)
    }

    async fn load_submissions(&self, session_id: &str) -> AppResult<Vec<SubmissionRecord>> {
        let mut rows: Vec<SubmissionRecord> = self
            .submissions
            .lock()
            .unwrap()
            .values()
            .filter(|r| r.session_id == session_id)
            .cloned()
            .collect();
        rows.sort_by_key(|r| r.uploaded_at);
        Ok(rows)
    }
}

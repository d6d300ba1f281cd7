//! 自动保存
//!
//! 订阅 [`SessionStore`] 的变更通知，经去抖窗口合并后把"脏"实体
//! 逐个写入持久层。只持久化稳定状态：正在提取的会话和正在排队/
//! 批改的答卷一律跳过，等它们落到稳定状态后的下一轮变更再写。
//!
//! 基线快照只在单个实体确认写入成功后才推进，写失败的实体保持
//! "脏"标记，下一轮冲洗会连带重写，不会静默丢数据。

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::clients::PersistenceClient;
use crate::config::Config;
use crate::error::AppResult;
use crate::models::{SessionRecord, SessionStatus, SubmissionRecord, SubmissionStatus};
use crate::store::SessionStore;

/// 自动保存任务的句柄
pub struct AutoSave {
    store: Arc<SessionStore>,
    persistence: Arc<dyn PersistenceClient>,
    debounce: Duration,
    max_retries: usize,
    retry_delays: Vec<Duration>,
    shutdown: Mutex<Option<watch::Sender<bool>>>,
}

/// 单次写入的目标行
enum WriteTarget<'a> {
    Session(&'a SessionRecord),
    Submission(&'a SubmissionRecord),
}

impl AutoSave {
    pub fn new(
        store: Arc<SessionStore>,
        persistence: Arc<dyn PersistenceClient>,
        config: &Config,
    ) -> Self {
        Self {
            store,
            persistence,
            debounce: Duration::from_millis(config.autosave_debounce_ms),
            max_retries: config.autosave_max_retries,
            retry_delays: config
                .autosave_retry_delays_ms
                .iter()
                .map(|ms| Duration::from_millis(*ms))
                .collect(),
            shutdown: Mutex::new(None),
        }
    }

    /// 启动后台保存任务。重复调用会先停掉旧任务。
    pub fn start(&self, user_id: &str) {
        self.stop();

        let store = self.store.clone();
        let persistence = self.persistence.clone();
        let debounce = self.debounce;
        let max_retries = self.max_retries;
        let retry_delays = self.retry_delays.clone();
        let user_id = user_id.to_string();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        tokio::spawn(async move {
            run_loop(
                store,
                persistence,
                debounce,
                max_retries,
                retry_delays,
                user_id,
                shutdown_rx,
            )
            .await;
        });
        *self.shutdown.lock().unwrap() = Some(shutdown_tx);
        info!("💾 自动保存已启动");
    }

    /// 停止后台保存任务
    ///
    /// 只发关停信号：等待中的去抖计时器作废，新变更不再冲洗，
    /// 已在途的那次冲洗（含重试）照常写完。
    pub fn stop(&self) {
        if let Some(shutdown) = self.shutdown.lock().unwrap().take() {
            let _ = shutdown.send(true);
        }
    }
}

impl Drop for AutoSave {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn run_loop(
    store: Arc<SessionStore>,
    persistence: Arc<dyn PersistenceClient>,
    debounce: Duration,
    max_retries: usize,
    retry_delays: Vec<Duration>,
    user_id: String,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut rx = store.subscribe();

    // 启动时刻的状态作为基线：只保存此后发生的变更
    let (mut prev_sessions, mut prev_submissions) = project(&store, &user_id);

    loop {
        tokio::select! {
            changed = rx.changed() => {
                if changed.is_err() {
                    return;
                }
            }
            _ = shutdown.changed() => return,
        }

        // 去抖：静默窗口内持续吸收后续变更。
        // 关停信号到达时丢弃等待中的计时器，不再发起新冲洗。
        loop {
            tokio::select! {
                timed = tokio::time::timeout(debounce, rx.changed()) => match timed {
                    Ok(Ok(())) => continue,
                    Ok(Err(_)) => return,
                    Err(_) => break,
                },
                _ = shutdown.changed() => return,
            }
        }

        flush(
            &store,
            persistence.as_ref(),
            &user_id,
            &mut prev_sessions,
            &mut prev_submissions,
            max_retries,
            &retry_delays,
        )
        .await;
    }
}

/// 把当前内存状态投影为持久化行，跳过瞬态实体
fn project(
    store: &SessionStore,
    user_id: &str,
) -> (
    HashMap<String, SessionRecord>,
    HashMap<String, SubmissionRecord>,
) {
    let snapshot = store.snapshot();
    let mut sessions = HashMap::new();
    let mut submissions = HashMap::new();

    for session in &snapshot.sessions {
        // 会话与答卷各自按瞬态过滤，互不牵连
        if session.status != SessionStatus::Extracting {
            sessions.insert(
                session.id.clone(),
                SessionRecord::from_session(session, user_id),
            );
        }

        for sub in snapshot.submissions.get(&session.id).into_iter().flatten() {
            if matches!(
                sub.status,
                SubmissionStatus::Queued | SubmissionStatus::Grading
            ) {
                continue;
            }
            submissions.insert(
                sub.id.clone(),
                SubmissionRecord::from_submission(sub, &session.id, user_id),
            );
        }
    }

    (sessions, submissions)
}

/// 冲洗一轮：逐实体比对基线，只写发生变化的行
async fn flush(
    store: &SessionStore,
    persistence: &dyn PersistenceClient,
    user_id: &str,
    prev_sessions: &mut HashMap<String, SessionRecord>,
    prev_submissions: &mut HashMap<String, SubmissionRecord>,
    max_retries: usize,
    retry_delays: &[Duration],
) {
    let (current_sessions, current_submissions) = project(store, user_id);

    let mut written = 0usize;
    let mut failed = 0usize;

    for (id, record) in &current_sessions {
        if prev_sessions.get(id) == Some(record) {
            continue;
        }
        match write_with_retry(
            persistence,
            WriteTarget::Session(record),
            max_retries,
            retry_delays,
        )
        .await
        {
            Ok(()) => {
                // 确认落库后才推进基线
                prev_sessions.insert(id.clone(), record.clone());
                written += 1;
            }
            Err(e) => {
                warn!("⚠️ 会话 {} 保存失败，保持脏标记: {}", id, e);
                failed += 1;
            }
        }
    }

    for (id, record) in &current_submissions {
        if prev_submissions.get(id) == Some(record) {
            continue;
        }
        match write_with_retry(
            persistence,
            WriteTarget::Submission(record),
            max_retries,
            retry_delays,
        )
        .await
        {
            Ok(()) => {
                prev_submissions.insert(id.clone(), record.clone());
                written += 1;
            }
            Err(e) => {
                warn!("⚠️ 答卷 {} 保存失败，保持脏标记: {}", id, e);
                failed += 1;
            }
        }
    }

    if written > 0 || failed > 0 {
        debug!("💾 自动保存完成: {} 写入, {} 失败", written, failed);
    }
}

/// 带退避的单行写入
async fn write_with_retry(
    persistence: &dyn PersistenceClient,
    target: WriteTarget<'_>,
    max_retries: usize,
    retry_delays: &[Duration],
) -> AppResult<()> {
    let mut attempt = 0;
    loop {
        attempt += 1;
        let result = match &target {
            WriteTarget::Session(record) => persistence.upsert_session(record).await,
            WriteTarget::Submission(record) => persistence.upsert_submission(record).await,
        };
        match result {
            Ok(()) => return Ok(()),
            Err(e) if attempt >= max_retries => return Err(e),
            Err(e) => {
                let delay = retry_delays
                    .get(attempt - 1)
                    .copied()
                    .unwrap_or(Duration::from_secs(4));
                debug!("写入失败 (第 {} 次)，{:?} 后重试: {}", attempt, delay, e);
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::clients::MockPersistence;
    use crate::models::{ExamFile, StudentSubmission};

    fn fast_config() -> Config {
        Config {
            autosave_debounce_ms: 50,
            autosave_max_retries: 3,
            autosave_retry_delays_ms: vec![10, 20, 30],
            ..Config::default()
        }
    }

    fn submission(name: &str) -> StudentSubmission {
        let file = Arc::new(ExamFile::new(
            format!("{}.pdf", name),
            "application/pdf",
            vec![1, 2, 3],
        ));
        StudentSubmission::from_file(file)
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(250)).await;
    }

    #[tokio::test]
    async fn burst_of_mutations_collapses_to_one_write() {
        let store = Arc::new(SessionStore::new());
        let persistence = Arc::new(MockPersistence::default());
        let autosave = AutoSave::new(store.clone(), persistence.clone(), &fast_config());
        autosave.start("user-1");
        tokio::time::sleep(Duration::from_millis(20)).await;

        let session = store.add_session("草稿");
        store.update_session_title(&session.id, "期中考试");
        store.update_session_title(&session.id, "期中考试 (2반)");
        settle().await;

        // 三次变更合并为一次写入
        assert_eq!(persistence.write_count(), 1);
        let saved = persistence.session(&session.id).unwrap();
        assert_eq!(saved.title, "期中考试 (2반)");
        autosave.stop();
    }

    #[tokio::test]
    async fn transient_states_are_never_persisted() {
        let store = Arc::new(SessionStore::new());
        let persistence = Arc::new(MockPersistence::default());
        let autosave = AutoSave::new(store.clone(), persistence.clone(), &fast_config());
        autosave.start("user-1");
        tokio::time::sleep(Duration::from_millis(20)).await;

        let session = store.add_session("试卷");
        let sub = submission("김민준");
        let sub_id = sub.id.clone();
        store.add_submission(&session.id, sub);
        store.set_session_status(&session.id, SessionStatus::Extracting);
        settle().await;

        // 会话处于 extracting，答卷处于 queued，都不落库
        assert!(persistence.session(&session.id).is_none());
        assert!(persistence.submission(&sub_id).is_none());

        // 回到稳定状态后下一轮写入
        store.set_session_status(&session.id, SessionStatus::Idle);
        store.set_submission_status(&session.id, &sub_id, SubmissionStatus::Pending);
        settle().await;
        assert!(persistence.session(&session.id).is_some());
        assert!(persistence.submission(&sub_id).is_some());
        autosave.stop();
    }

    #[tokio::test]
    async fn transient_failures_are_retried() {
        let store = Arc::new(SessionStore::new());
        let persistence = Arc::new(MockPersistence::default());
        persistence.fail_next_writes(2);
        let autosave = AutoSave::new(store.clone(), persistence.clone(), &fast_config());
        autosave.start("user-1");
        tokio::time::sleep(Duration::from_millis(20)).await;

        let session = store.add_session("试卷");
        settle().await;

        // 前两次失败，第三次成功
        assert_eq!(persistence.write_count(), 3);
        assert!(persistence.session(&session.id).is_some());
        autosave.stop();
    }

    #[tokio::test]
    async fn exhausted_entity_stays_dirty_until_next_flush() {
        let store = Arc::new(SessionStore::new());
        let persistence = Arc::new(MockPersistence::default());
        persistence.fail_next_writes(3);
        let autosave = AutoSave::new(store.clone(), persistence.clone(), &fast_config());
        autosave.start("user-1");
        tokio::time::sleep(Duration::from_millis(20)).await;

        let first = store.add_session("第一场");
        settle().await;
        assert!(persistence.session(&first.id).is_none());

        // 即便后续变更只触及另一条会话，失败的那条仍然是脏的
        let second = store.add_session("第二场");
        settle().await;
        assert!(persistence.session(&first.id).is_some());
        assert!(persistence.session(&second.id).is_some());
        autosave.stop();
    }

    #[tokio::test]
    async fn stop_lets_in_flight_flush_finish() {
        let store = Arc::new(SessionStore::new());
        let persistence = Arc::new(MockPersistence::default());
        // 第一次写入失败，重试间隔拉长，让 stop 落在重试等待期内
        persistence.fail_next_writes(1);
        let config = Config {
            autosave_debounce_ms: 50,
            autosave_max_retries: 3,
            autosave_retry_delays_ms: vec![150, 150, 150],
            ..Config::default()
        };
        let autosave = AutoSave::new(store.clone(), persistence.clone(), &config);
        autosave.start("user-1");
        tokio::time::sleep(Duration::from_millis(20)).await;

        let session = store.add_session("退出前的最后一笔");
        for _ in 0..100 {
            if persistence.write_count() >= 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        // 冲洗正卡在重试等待里，此刻关停
        autosave.stop();

        tokio::time::sleep(Duration::from_millis(400)).await;
        // 在途的冲洗连同重试一起写完了
        assert_eq!(persistence.write_count(), 2);
        assert!(persistence.session(&session.id).is_some());
    }

    #[tokio::test]
    async fn stopped_autosave_ignores_further_mutations() {
        let store = Arc::new(SessionStore::new());
        let persistence = Arc::new(MockPersistence::default());
        let autosave = AutoSave::new(store.clone(), persistence.clone(), &fast_config());
        autosave.start("user-1");
        tokio::time::sleep(Duration::from_millis(20)).await;
        autosave.stop();

        store.add_session("不会被保存");
        settle().await;
        assert_eq!(persistence.write_count(), 0);
    }
}

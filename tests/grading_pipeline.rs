//! 整条批改流水线的端到端测试（离线提供方）

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use exam_auto_grade::clients::{MockExtractor, MockPersistence, MockStorage, MockVerifier};
use exam_auto_grade::models::{ExamFile, StudentExamStructure, StudentSubmission};
use exam_auto_grade::{App, Config, SessionStatus, SubmissionStatus};

struct Harness {
    app: App,
    extractor: Arc<MockExtractor>,
    verifier: Arc<MockVerifier>,
    storage: Arc<MockStorage>,
    persistence: Arc<MockPersistence>,
}

fn harness() -> Harness {
    let config = Config {
        autosave_debounce_ms: 50,
        autosave_retry_delays_ms: vec![10, 20, 30],
        ..Config::default()
    };
    let extractor = Arc::new(MockExtractor::sample());
    let verifier = Arc::new(MockVerifier::default());
    let storage = Arc::new(MockStorage::default());
    let persistence = Arc::new(MockPersistence::default());
    let app = App::new(
        &config,
        extractor.clone(),
        verifier.clone(),
        storage.clone(),
        persistence.clone(),
    );
    Harness {
        app,
        extractor,
        verifier,
        storage,
        persistence,
    }
}

fn pdf(name: &str) -> Arc<ExamFile> {
    Arc::new(ExamFile::new(
        format!("{}.pdf", name),
        "application/pdf",
        name.as_bytes().to_vec(),
    ))
}

/// 内置样例答案卷对应的一份作答：
/// 1=选项变体命中，2=字面命中，3=未作答，4=语义改判，5=语义维持错误
fn scripted_exam() -> StudentExamStructure {
    StudentExamStructure {
        student_name: "김민준".to_string(),
        total_questions: 5,
        answers: BTreeMap::from([
            (1, "B".to_string()),
            (2, "3".to_string()),
            (3, "(unwritten)".to_string()),
            (4, "광합".to_string()),
            (5, "나쁜 선생님".to_string()),
        ]),
    }
}

async fn wait_for_status(app: &App, session_id: &str, submission_id: &str, want: SubmissionStatus) {
    for _ in 0..200 {
        if let Some(sub) = app.store.submission(session_id, submission_id) {
            if sub.status == want {
                return;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("等待答卷状态超时: {:?}", want);
}

#[tokio::test]
async fn full_pipeline_from_answer_key_to_score() {
    let h = harness();
    h.verifier.set_verdict("4", true);

    let session = h.app.create_session("샘플 시험지");
    h.app
        .set_answer_key(&session.id, pdf("answer-key"))
        .await
        .unwrap();

    // 提取完成后会话落到 ready，结构就位
    let session_state = h.app.store.session(&session.id).unwrap();
    assert_eq!(session_state.status, SessionStatus::Ready);
    assert!(session_state.answer_key_structure.is_some());

    h.extractor.push_student_exam(scripted_exam());
    let ids = h.app.add_submissions(&session.id, vec![pdf("김민준")]);
    h.app.enqueue_submissions(&session.id, ids.clone());
    wait_for_status(&h.app, &session.id, &ids[0], SubmissionStatus::Graded).await;

    let sub = h.app.store.submission(&session.id, &ids[0]).unwrap();
    let score = sub.score.unwrap();
    assert_eq!(score.correct, 3);
    assert_eq!(score.total, 5);
    assert!((score.percentage - 60.0).abs() < f64::EPSILON);
    // 学生姓名以提取结果为准
    assert_eq!(sub.student_name, "김민준");

    let results = sub.results.unwrap();
    assert!(results[0].is_correct); // 选项变体
    assert!(results[1].is_correct); // 字面
    assert!(!results[2].is_correct); // 哨兵
    assert!(results[3].is_correct); // 语义改判
    assert!(!results[4].is_correct); // 语义维持
    assert_eq!(h.verifier.call_count(), 1);
}

#[tokio::test]
async fn uploaded_file_is_primed_so_grading_never_downloads() {
    let h = harness();
    let session = h.app.create_session("샘플 시험지");
    h.app
        .set_answer_key(&session.id, pdf("answer-key"))
        .await
        .unwrap();

    let ids = h.app.add_submissions(&session.id, vec![pdf("이서연")]);
    let path = h
        .app
        .upload_submission("user-1", &session.id, &ids[0])
        .await
        .unwrap();
    assert!(path.contains(&session.id));

    h.app.enqueue_submissions(&session.id, ids.clone());
    wait_for_status(&h.app, &session.id, &ids[0], SubmissionStatus::Graded).await;

    // 本地句柄仍在且缓存已预热，批改不触发任何下载
    assert_eq!(h.storage.download_count(), 0);
}

#[tokio::test]
async fn hydrated_submission_is_downloaded_through_cache() {
    let h = harness();
    let session = h.app.create_session("샘플 시험지");
    h.app
        .set_answer_key(&session.id, pdf("answer-key"))
        .await
        .unwrap();

    // 模拟"另一台设备上传"的远端答卷：只有远端路径，没有本地句柄
    let path = format!("user-1/{}/submissions/sub-remote.pdf", session.id);
    h.storage.put(&path, ExamFile::new("박지훈.pdf", "application/pdf", vec![7, 7]));
    let remote = StudentSubmission {
        id: "sub-remote".to_string(),
        student_name: "박지훈".to_string(),
        file_name: "박지훈.pdf".to_string(),
        local: None,
        remote_path: Some(path),
        status: SubmissionStatus::Pending,
        score: None,
        results: None,
        uploaded_at: 0,
    };
    h.app.store.add_submission(&session.id, remote);

    let file = h
        .app
        .resolve_submission_file(&session.id, "sub-remote")
        .await
        .unwrap();
    assert_eq!(file.name, "박지훈.pdf");
    assert_eq!(h.storage.download_count(), 1);

    // 第二次取走缓存
    let _ = h
        .app
        .resolve_submission_file(&session.id, "sub-remote")
        .await
        .unwrap();
    assert_eq!(h.storage.download_count(), 1);
}

#[tokio::test]
async fn teacher_edits_rescore_without_llm_calls() {
    let h = harness();
    h.verifier.set_verdict("4", true);
    let session = h.app.create_session("샘플 시험지");
    h.app
        .set_answer_key(&session.id, pdf("answer-key"))
        .await
        .unwrap();

    h.extractor.push_student_exam(scripted_exam());
    let ids = h.app.add_submissions(&session.id, vec![pdf("김민준")]);
    h.app.enqueue_submissions(&session.id, ids.clone());
    wait_for_status(&h.app, &session.id, &ids[0], SubmissionStatus::Graded).await;
    let calls_after_grading = h.verifier.call_count();

    // 教师把第 3 题的识别结果改成正确答案
    h.app.edit_answer(&session.id, &ids[0], 3, "서울").unwrap();
    let sub = h.app.store.submission(&session.id, &ids[0]).unwrap();
    assert_eq!(sub.score.unwrap().correct, 4);
    let results = sub.results.unwrap();
    assert!(results[2].is_correct);
    assert!(results[2].is_edited);

    // 教师推翻第 5 题的语义判定
    h.app.toggle_result(&session.id, &ids[0], 5, true).unwrap();
    let sub = h.app.store.submission(&session.id, &ids[0]).unwrap();
    assert_eq!(sub.score.unwrap().correct, 5);

    // 人工改判纯本地，不再调用语义校验
    assert_eq!(h.verifier.call_count(), calls_after_grading);
}

#[tokio::test]
async fn sync_persists_graded_work_and_hydrates_on_next_start() {
    let h = harness();
    h.verifier.set_verdict("4", true);
    h.app.start_sync("user-1").await.unwrap();

    let session = h.app.create_session("샘플 시험지");
    h.app
        .set_answer_key(&session.id, pdf("answer-key"))
        .await
        .unwrap();
    h.extractor.push_student_exam(scripted_exam());
    let ids = h.app.add_submissions(&session.id, vec![pdf("김민준")]);
    h.app.enqueue_submissions(&session.id, ids.clone());
    wait_for_status(&h.app, &session.id, &ids[0], SubmissionStatus::Graded).await;

    // 等自动保存落库
    for _ in 0..200 {
        if h.persistence.session(&session.id).is_some()
            && h.persistence.submission(&ids[0]).is_some()
        {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let saved = h.persistence.submission(&ids[0]).expect("答卷未落库");
    assert_eq!(saved.score_correct, Some(3));
    h.app.stop_sync();

    // 新的应用实例从同一持久层水合
    let config = Config {
        autosave_debounce_ms: 50,
        ..Config::default()
    };
    let app2 = App::new(
        &config,
        Arc::new(MockExtractor::sample()),
        Arc::new(MockVerifier::default()),
        Arc::new(MockStorage::default()),
        h.persistence.clone(),
    );
    app2.start_sync("user-1").await.unwrap();

    let restored = app2.store.session(&session.id).expect("会话未水合");
    assert_eq!(restored.status, SessionStatus::Ready);
    let restored_sub = app2.store.submission(&session.id, &ids[0]).expect("答卷未水合");
    assert_eq!(restored_sub.status, SubmissionStatus::Graded);
    assert_eq!(restored_sub.score.unwrap().correct, 3);
    app2.stop_sync();
}

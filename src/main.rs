use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing::{info, warn};

use exam_auto_grade::clients::{
    create_extractor, create_verifier, MockPersistence, MockStorage, PersistenceClient,
    StorageClient, SupabaseClient,
};
use exam_auto_grade::models::ExamFile;
use exam_auto_grade::utils::logging;
use exam_auto_grade::{App, Config, FileHandle, SubmissionStatus};

const CONFIG_FILE: &str = "config.toml";

#[tokio::main]
async fn main() -> Result<()> {
    // 加载配置：优先配置文件，其次环境变量
    let config = if Path::new(CONFIG_FILE).exists() {
        Config::from_file(CONFIG_FILE).await?
    } else {
        Config::from_env()
    };

    // 初始化日志
    logging::init(&config);
    logging::log_startup(&config);

    // 装配提供方
    let extractor = create_extractor(&config)?;
    let verifier = create_verifier(&config)?;
    let (storage, persistence): (Arc<dyn StorageClient>, Arc<dyn PersistenceClient>) =
        if config.supabase_url.is_empty() {
            info!("📦 未配置 Supabase，使用内存存储（离线模式）");
            (
                Arc::new(MockStorage::default()),
                Arc::new(MockPersistence::default()),
            )
        } else {
            let client = Arc::new(SupabaseClient::new(&config));
            (client.clone(), client)
        };

    let app = App::new(&config, extractor, verifier, storage, persistence);

    let user_id = std::env::var("EXAM_USER_ID").unwrap_or_else(|_| "demo-user".to_string());
    if !config.supabase_url.is_empty() {
        app.start_sync(&user_id).await?;
    }

    run_demo(&app, &config).await?;

    app.stop_sync();
    Ok(())
}

/// 扫描试卷目录，批改其中的学生答卷
///
/// 目录约定：文件名含 "answer" 的 PDF 作为答案卷，其余文件视为学生答卷。
async fn run_demo(app: &App, config: &Config) -> Result<()> {
    let folder = Path::new(&config.exam_folder);
    if !folder.is_dir() {
        warn!("📂 试卷目录不存在: {}，无事可做", config.exam_folder);
        return Ok(());
    }

    let mut answer_key: Option<FileHandle> = None;
    let mut submissions: Vec<FileHandle> = Vec::new();

    let mut entries = tokio::fs::read_dir(folder).await?;
    while let Some(entry) = entries.next_entry().await? {
        if !entry.file_type().await?.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_string();
        let bytes = tokio::fs::read(entry.path()).await?;
        let mime = if name.to_lowercase().ends_with(".pdf") {
            "application/pdf"
        } else {
            "image/png"
        };
        let handle = Arc::new(ExamFile::new(name.clone(), mime, bytes));
        if name.to_lowercase().contains("answer") {
            answer_key = Some(handle);
        } else {
            submissions.push(handle);
        }
    }

    let Some(key_file) = answer_key else {
        warn!("📂 目录里没有答案卷（文件名需含 \"answer\"）");
        return Ok(());
    };
    if submissions.is_empty() {
        warn!("📂 目录里没有学生答卷");
        return Ok(());
    }

    let session = app.create_session("离线批改");
    app.set_answer_key(&session.id, key_file).await?;

    let ids = app.add_submissions(&session.id, submissions);
    let total = ids.len();
    info!("📋 共 {} 份答卷进入批改队列", total);
    app.enqueue_submissions(&session.id, ids);

    // 轮询等待队列消化完毕
    for _ in 0..600 {
        let subs = app.store.submissions(&session.id);
        if subs.iter().all(|s| {
            matches!(
                s.status,
                SubmissionStatus::Graded | SubmissionStatus::Pending
            )
        }) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    }

    // 汇总输出
    info!("{}", "=".repeat(60));
    info!("📊 批改结果");
    for sub in app.store.submissions(&session.id) {
        match (&sub.status, &sub.score) {
            (SubmissionStatus::Graded, Some(score)) => {
                info!(
                    "✅ {}: {}/{} ({:.1}%)",
                    sub.student_name, score.correct, score.total, score.percentage
                );
            }
            _ => {
                info!("❌ {}: 批改未完成 ({:?})", sub.student_name, sub.status);
            }
        }
    }
    info!("{}", "=".repeat(60));
    Ok(())
}

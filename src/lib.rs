//! # Exam Auto Grade
//!
//! 一个用于试卷自动批改与服务端同步的 Rust 引擎
//!
//! ## 架构设计
//!
//! 本系统采用严格的四层架构：
//!
//! ### ① 客户端层（Clients）
//! - `clients/` - 对外部服务的薄封装，只暴露能力 trait
//! - `GeminiClient` - 从试卷图片提取答案/作答结构
//! - `LlmClient` - 批量语义核对能力
//! - `SupabaseClient` - 对象存储 + 行存储能力
//!
//! ### ② 业务能力层（Services）
//! - `services/` - 描述"我能做什么"，无共享可变状态
//! - `matcher` - 答案文本归一化与等价判定
//! - `GradingEngine` - 单份答卷判分（本地匹配 + 语义兜底）
//! - `FileResolver` - 去重的远端文件下载缓存
//!
//! ### ③ 状态层（Store）
//! - `store::SessionStore` - 会话与答卷的唯一事实来源，
//!   每次变更广播版本号供订阅方感知
//!
//! ### ④ 编排层（Orchestration）
//! - `orchestrator/grading_queue` - 每会话 FIFO 批改队列
//! - `orchestrator/auto_save` - 去抖 + 差量 + 重试的自动保存
//! - `orchestrator/app` - 应用门面，装配以上各层
//!
//! ## 模块结构

pub mod clients;
pub mod config;
pub mod error;
pub mod models;
pub mod orchestrator;
pub mod services;
pub mod store;
pub mod utils;

// 重新导出常用类型
pub use config::Config;
pub use error::{AppError, AppResult};
pub use models::{
    AnswerKeyStructure, ExamFile, ExamSession, FileHandle, GradingResult, QuestionResult, Score,
    SessionStatus, StudentExamStructure, StudentSubmission, SubmissionStatus,
};
pub use orchestrator::{App, AutoSave, GradingQueue};
pub use services::{FileResolver, GradingEngine};
pub use store::SessionStore;

//! 远端数据库的行结构
//!
//! 数据库里只存两张表：`exam_sessions` 和 `submissions`。
//! 行结构是内存模型的扁平投影：本地文件句柄不入库，
//! 瞬态状态折叠为 `idle|ready` / `pending|graded`。
//! 自动保存的差异比较也以这两个行结构为单位。

use serde::{Deserialize, Serialize};

use super::grading::{
    QuestionResult, Score, StudentSubmission, SubmissionStatus,
};
use super::session::{AnswerKeyFile, ExamSession, SessionStatus};
use super::AnswerKeyStructure;

/// `exam_sessions` 表的一行
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: String,
    pub user_id: String,
    pub title: String,
    /// "idle" 或 "ready"
    pub status: String,
    pub created_at: i64,
    pub answer_key_file_name: Option<String>,
    pub answer_key_file_size: Option<u64>,
    pub answer_key_storage_path: Option<String>,
    pub answer_key_structure: Option<AnswerKeyStructure>,
}

impl SessionRecord {
    /// 把内存中的会话投影为数据库行
    pub fn from_session(session: &ExamSession, user_id: &str) -> Self {
        Self {
            id: session.id.clone(),
            user_id: user_id.to_string(),
            title: session.title.clone(),
            status: match session.status {
                SessionStatus::Ready => "ready".to_string(),
                _ => "idle".to_string(),
            },
            created_at: session.created_at,
            answer_key_file_name: session.answer_key_file.as_ref().map(|f| f.name.clone()),
            answer_key_file_size: session.answer_key_file.as_ref().map(|f| f.size),
            answer_key_storage_path: session
                .answer_key_file
                .as_ref()
                .and_then(|f| f.remote_path.clone()),
            answer_key_structure: session.answer_key_structure.clone(),
        }
    }

    /// 从数据库行还原内存会话（用于登录后的水合）
    pub fn into_session(self) -> ExamSession {
        let answer_key_file = self.answer_key_file_name.map(|name| AnswerKeyFile {
            name,
            size: self.answer_key_file_size.unwrap_or(0),
            local: None,
            remote_path: self.answer_key_storage_path,
        });
        ExamSession {
            id: self.id,
            title: self.title,
            created_at: self.created_at,
            status: if self.status == "ready" {
                SessionStatus::Ready
            } else {
                SessionStatus::Idle
            },
            answer_key_file,
            answer_key_structure: self.answer_key_structure,
        }
    }
}

/// `submissions` 表的一行
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmissionRecord {
    pub id: String,
    pub session_id: String,
    pub user_id: String,
    pub student_name: String,
    pub file_name: String,
    pub storage_path: Option<String>,
    /// "pending" 或 "graded"
    pub status: String,
    pub score_correct: Option<u32>,
    pub score_total: Option<u32>,
    pub score_percentage: Option<f64>,
    pub results: Option<Vec<QuestionResult>>,
    pub uploaded_at: i64,
}

impl SubmissionRecord {
    /// 把内存中的答卷投影为数据库行
    pub fn from_submission(sub: &StudentSubmission, session_id: &str, user_id: &str) -> Self {
        Self {
            id: sub.id.clone(),
            session_id: session_id.to_string(),
            user_id: user_id.to_string(),
            student_name: sub.student_name.clone(),
            file_name: sub.file_name.clone(),
            storage_path: sub.remote_path.clone(),
            status: match sub.status {
                SubmissionStatus::Graded => "graded".to_string(),
                _ => "pending".to_string(),
            },
            score_correct: sub.score.map(|s| s.correct),
            score_total: sub.score.map(|s| s.total),
            score_percentage: sub.score.map(|s| s.percentage),
            results: sub.results.clone(),
            uploaded_at: sub.uploaded_at,
        }
    }

    /// 从数据库行还原内存答卷
    pub fn into_submission(self) -> StudentSubmission {
        let score = match (self.score_correct, self.score_total, self.score_percentage) {
            (Some(correct), Some(total), Some(percentage)) => Some(Score {
                correct,
                total,
                percentage,
            }),
            _ => None,
        };
        StudentSubmission {
            id: self.id,
            student_name: self.student_name,
            file_name: self.file_name,
            local: None,
            remote_path: self.storage_path,
            status: if self.status == "graded" {
                SubmissionStatus::Graded
            } else {
                SubmissionStatus::Pending
            },
            score,
            results: self.results,
            uploaded_at: self.uploaded_at,
        }
    }
}

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::session::FileHandle;

/// 提取结果中表示"未作答"的哨兵值
pub const UNWRITTEN: &str = "(unwritten)";
/// 提取结果中表示"无法辨认"的哨兵值
pub const UNREADABLE: &str = "(unreadable)";

/// 判断一个原始答案是否是提取哨兵值
pub fn is_sentinel(answer: &str) -> bool {
    answer == UNWRITTEN || answer == UNREADABLE
}

/// 答案在页面上的位置（归一化坐标，page 从 1 开始）
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
    pub page: u32,
}

/// 答案卷中的单个标准答案
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyAnswer {
    pub text: String,
    pub x: f64,
    pub y: f64,
    /// 旧格式的答案卷没有 page 字段，缺省按第 1 页处理
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
}

/// 答案卷结构 - 会话的批改基准
///
/// 不变式：`answers` 的键集合是权威题目集合。
/// 算分永远以它为准，与学生实际写了几题、与 `total_questions`
/// 声称多少题都无关。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnswerKeyStructure {
    pub title: String,
    pub total_questions: u32,
    /// 题号 → 标准答案（JSON 中键为题号字符串）
    pub answers: BTreeMap<u32, KeyAnswer>,
}

/// 单份学生答卷的提取结果（临时数据，不持久化）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudentExamStructure {
    pub student_name: String,
    pub total_questions: u32,
    /// 题号 → 原始答案文本，空缺处为哨兵值
    pub answers: BTreeMap<u32, String>,
}

/// 单题批改结果
///
/// `is_edited` 一旦为 true，`is_correct` 只反映教师的改动
/// （重新匹配或手动覆盖），语义兜底不会再悄悄改写它。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionResult {
    pub question_number: u32,
    pub student_answer: String,
    pub correct_answer: String,
    pub is_correct: bool,
    #[serde(default)]
    pub is_edited: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<Position>,
}

/// 分数汇总
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Score {
    pub correct: u32,
    pub total: u32,
    pub percentage: f64,
}

/// 一次批改的完整结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradingResult {
    pub submission_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub student_name: Option<String>,
    pub score: Score,
    pub results: Vec<QuestionResult>,
}

/// 学生答卷状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubmissionStatus {
    /// 已入队等待批改（瞬态，不持久化）
    Queued,
    /// 批改中（瞬态，不持久化）
    Grading,
    /// 批改完成
    Graded,
    /// 批改未完成，保留待手动重试
    Pending,
}

/// 一份学生答卷
///
/// 生命周期：文件被接受的瞬间以 `Queued` 创建；出队时转 `Grading`；
/// 成功转 `Graded`，失败退回 `Pending`（绝不静默丢弃）；
/// 只有显式删除才销毁。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StudentSubmission {
    pub id: String,
    pub student_name: String,
    pub file_name: String,
    #[serde(skip)]
    pub local: Option<FileHandle>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_path: Option<String>,
    pub status: SubmissionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<Score>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub results: Option<Vec<QuestionResult>>,
    /// 上传时间（epoch 毫秒）
    pub uploaded_at: i64,
}

impl StudentSubmission {
    /// 从刚接受的文件创建一份答卷（初始状态 Queued）
    pub fn from_file(file: FileHandle) -> Self {
        let student_name = file
            .name
            .trim_end_matches(".pdf")
            .replace('_', " ")
            .to_string();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            student_name,
            file_name: file.name.clone(),
            local: Some(file),
            remote_path: None,
            status: SubmissionStatus::Queued,
            score: None,
            results: None,
            uploaded_at: chrono::Utc::now().timestamp_millis(),
        }
    }
}

//! 数据模型层
//!
//! 定义批改工作区的核心数据结构：
//! - `session` - 批改会话（一张答案卷 + 若干学生答卷）
//! - `grading` - 答案结构与批改结果
//! - `persist` - 远端数据库的扁平行结构

pub mod grading;
pub mod persist;
pub mod session;

pub use grading::{
    AnswerKeyStructure, GradingResult, KeyAnswer, Position, QuestionResult, Score,
    StudentExamStructure, StudentSubmission, SubmissionStatus,
};
pub use persist::{SessionRecord, SubmissionRecord};
pub use session::{AnswerKeyFile, ExamFile, ExamSession, FileHandle, ImagePart, SessionStatus};

use std::sync::Arc;

use base64::Engine;
use serde::{Deserialize, Serialize};

/// 本地文件句柄
///
/// 文件内容一旦读入内存就不再变化，用 `Arc` 共享，
/// 缓存和会话状态持有的都是同一份字节。
pub type FileHandle = Arc<ExamFile>;

/// 一份已读入内存的试卷文件（PDF 或图片）
#[derive(Debug, Clone)]
pub struct ExamFile {
    pub name: String,
    pub mime: String,
    pub bytes: Vec<u8>,
}

impl ExamFile {
    pub fn new(name: impl Into<String>, mime: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            mime: mime.into(),
            bytes,
        }
    }

    /// 文件大小（字节）
    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }

    /// 转换为发送给视觉模型的图片部件
    ///
    /// PDF 的逐页渲染发生在上游（上传端已转为图片或整份 PDF 直传），
    /// 这里只做 base64 编码，不负责光栅化。
    pub fn to_image_parts(&self) -> Vec<ImagePart> {
        vec![ImagePart {
            mime: self.mime.clone(),
            data: base64::engine::general_purpose::STANDARD.encode(&self.bytes),
        }]
    }
}

/// 发送给视觉模型的单张图片（base64 编码，不带 data-url 前缀）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImagePart {
    pub mime: String,
    pub data: String,
}

/// 会话状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// 尚未上传答案卷
    Idle,
    /// 正在提取答案结构（瞬态，不持久化）
    Extracting,
    /// 答案结构就绪，可以批改
    Ready,
}

/// 答案卷文件信息
///
/// `local` 是进程内句柄，不参与序列化；跨进程只认 `remote_path`。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerKeyFile {
    pub name: String,
    pub size: u64,
    #[serde(skip)]
    pub local: Option<FileHandle>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_path: Option<String>,
}

/// 批改会话
///
/// 一个会话对应一个"标签页"工作区：一张答案卷加零到多份学生答卷。
/// 不变式：`status == Ready` 时 `answer_key_structure` 必然存在；
/// 结构在一次成功提取后写入，只有重新上传答案卷才会整体替换。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExamSession {
    pub id: String,
    pub title: String,
    /// 创建时间（epoch 毫秒）
    pub created_at: i64,
    pub status: SessionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub answer_key_file: Option<AnswerKeyFile>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub answer_key_structure: Option<super::grading::AnswerKeyStructure>,
}

impl ExamSession {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            title: title.into(),
            created_at: chrono::Utc::now().timestamp_millis(),
            status: SessionStatus::Idle,
            answer_key_file: None,
            answer_key_structure: None,
        }
    }
}

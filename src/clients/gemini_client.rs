/// Gemini 结构提取客户端
///
/// 调用 Gemini 的 generateContent 接口做视觉结构提取：
/// 输入整卷图片，输出 JSON 结构（答案卷或学生答卷）。
use std::collections::BTreeMap;

use regex::Regex;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use crate::clients::StructureExtractor;
use crate::config::Config;
use crate::error::{AppError, AppResult, ExtractError};
use crate::models::{AnswerKeyStructure, ImagePart, KeyAnswer, StudentExamStructure};

const EXTRACT_KEY_PROMPT: &str = r#"你是试卷结构分析助手。分析答案卷图片，输出 JSON：
{
  "title": "试卷标题",
  "totalQuestions": 题目总数,
  "answers": {
    "题号": { "text": "标准答案", "x": 0.0-1.0, "y": 0.0-1.0, "page": 页码(从1开始) }
  }
}
多个可接受答案用 / 分隔写在 text 里。坐标是答案在页面上的归一化位置。
只返回 JSON，不要返回任何其他内容。"#;

const EXTRACT_EXAM_PROMPT: &str = r#"你是试卷结构分析助手。分析学生答卷图片，输出 JSON：
{
  "studentName": "学生姓名",
  "totalQuestions": 题目总数,
  "answers": { "题号": "学生写的原始答案" }
}
学生没作答的题填 "(unwritten)"，无法辨认的填 "(unreadable)"。
只返回 JSON，不要返回任何其他内容。"#;

/// Gemini 客户端
pub struct GeminiClient {
    client: reqwest::Client,
    api_key: String,
    api_url: String,
    fence_re: Regex,
}

impl GeminiClient {
    /// 创建新的 Gemini 客户端
    pub fn new(config: &Config) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: config.gemini_api_key.clone(),
            api_url: config.gemini_api_url.clone(),
            // LLM 偶尔会把 JSON 包在 markdown 代码块里
            fence_re: Regex::new(r"(?s)```(?:json)?\s*(.*?)\s*```").expect("固定正则"),
        }
    }

    /// 发送提取请求，返回模型的文本响应
    async fn generate(&self, prompt: &str, images: &[ImagePart]) -> AppResult<String> {
        let mut parts = vec![json!({ "text": "请分析附带的试卷图片并按要求返回 JSON。" })];
        for image in images {
            parts.push(json!({
                "inlineData": { "mimeType": image.mime, "data": image.data }
            }));
        }

        let body = json!({
            "system_instruction": { "parts": [{ "text": prompt }] },
            "contents": [{ "parts": parts }],
            "generationConfig": {
                "temperature": 0,
                "topP": 0.95,
                "maxOutputTokens": 4096,
                "responseMimeType": "application/json"
            }
        });

        let response = self
            .client
            .post(format!("{}?key={}", self.api_url, self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| AppError::extract_api_failed("gemini", e))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            warn!("Gemini API 返回错误: {} {}", status, text);
            return Err(AppError::Extract(ExtractError::ParseFailed {
                message: format!("Gemini API 调用失败: {}", status),
            }));
        }

        let value: serde_json::Value = response
            .json()
            .await
            .map_err(|e| AppError::extract_api_failed("gemini", e))?;

        let text = value
            .pointer("/candidates/0/content/parts/0/text")
            .and_then(|v| v.as_str())
            .ok_or(AppError::Extract(ExtractError::EmptyResponse {
                provider: "gemini".to_string(),
            }))?;

        debug!(
            "Gemini 响应: {}",
            crate::utils::logging::truncate_text(text, 300)
        );
        Ok(text.to_string())
    }

    /// 剥掉可能存在的 markdown 围栏，取出 JSON 文本
    fn strip_fences<'a>(&self, text: &'a str) -> &'a str {
        if let Some(caps) = self.fence_re.captures(text) {
            if let Some(inner) = caps.get(1) {
                return inner.as_str();
            }
        }
        text.trim()
    }
}

#[async_trait::async_trait]
impl StructureExtractor for GeminiClient {
    async fn extract_answer_key(&self, images: &[ImagePart]) -> AppResult<AnswerKeyStructure> {
        let text = self.generate(EXTRACT_KEY_PROMPT, images).await?;
        let raw: RawKeyStructure =
            serde_json::from_str(self.strip_fences(&text)).map_err(|e| {
                AppError::Extract(ExtractError::ParseFailed {
                    message: format!("答案结构解析失败: {}", e),
                })
            })?;
        Ok(raw.into_structure())
    }

    async fn extract_student_exam(&self, images: &[ImagePart]) -> AppResult<StudentExamStructure> {
        let text = self.generate(EXTRACT_EXAM_PROMPT, images).await?;
        let raw: RawExamStructure =
            serde_json::from_str(self.strip_fences(&text)).map_err(|e| {
                AppError::Extract(ExtractError::ParseFailed {
                    message: format!("答卷结构解析失败: {}", e),
                })
            })?;
        Ok(raw.into_structure())
    }
}

// ========== 模型输出的原始结构 ==========
// 模型返回 camelCase、字符串题号，这里转成内部模型。

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawKeyStructure {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    total_questions: Option<u32>,
    answers: BTreeMap<String, RawKeyAnswer>,
}

#[derive(Debug, Deserialize)]
struct RawKeyAnswer {
    text: String,
    #[serde(default)]
    x: f64,
    #[serde(default)]
    y: f64,
    #[serde(default)]
    page: Option<u32>,
}

impl RawKeyStructure {
    fn into_structure(self) -> AnswerKeyStructure {
        let answers: BTreeMap<u32, KeyAnswer> = self
            .answers
            .into_iter()
            .filter_map(|(k, v)| {
                let number = k.trim().parse::<u32>().ok()?;
                Some((
                    number,
                    KeyAnswer {
                        text: v.text,
                        x: v.x,
                        y: v.y,
                        page: v.page,
                    },
                ))
            })
            .collect();
        let total = self.total_questions.unwrap_or(answers.len() as u32);
        AnswerKeyStructure {
            title: self.title.unwrap_or_else(|| "Untitled Exam".to_string()),
            total_questions: total,
            answers,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawExamStructure {
    #[serde(default)]
    student_name: Option<String>,
    #[serde(default)]
    total_questions: Option<u32>,
    answers: BTreeMap<String, String>,
}

impl RawExamStructure {
    fn into_structure(self) -> StudentExamStructure {
        let answers: BTreeMap<u32, String> = self
            .answers
            .into_iter()
            .filter_map(|(k, v)| Some((k.trim().parse::<u32>().ok()?, v)))
            .collect();
        let total = self.total_questions.unwrap_or(answers.len() as u32);
        StudentExamStructure {
            student_name: self.student_name.unwrap_or_default(),
            total_questions: total,
            answers,
        }
    }
}

/// LLM 语义校验客户端
///
/// 封装批量语义等价判定的 LLM 调用：
/// 一次请求带上全部候选，返回逐条判定。
use openai::chat::{ChatCompletion, ChatCompletionMessage, ChatCompletionMessageRole};
use openai::Credentials;
use regex::Regex;
use tracing::{debug, warn};

use crate::clients::{SemanticVerifier, VerifyCandidate, VerifyVerdict};
use crate::config::Config;
use crate::error::{AppError, AppResult, VerifyError};

const SYSTEM_MESSAGE: &str = "你是一个专业的阅卷助手，擅长判断学生答案与标准答案在含义上是否等价。\
严格只看含义，不看措辞差异。只返回要求的 JSON，不要返回任何其他内容。";

/// LLM 客户端
pub struct LlmClient {
    api_key: String,
    api_base_url: String,
    model_name: String,
    fence_re: Regex,
}

impl LlmClient {
    /// 创建新的 LLM 客户端
    pub fn new(config: &Config) -> Self {
        Self {
            api_key: config.llm_api_key.clone(),
            api_base_url: config.llm_api_base_url.clone(),
            model_name: config.llm_model_name.clone(),
            fence_re: Regex::new(r"(?s)```(?:json)?\s*(.*?)\s*```").expect("固定正则"),
        }
    }

    /// 发送聊天请求，返回响应文本
    async fn chat(&self, user_message: &str) -> AppResult<String> {
        debug!("正在调用 LLM API，模型: {}", self.model_name);

        let credentials = Credentials::new(&self.api_key, &self.api_base_url);

        let messages = vec![
            ChatCompletionMessage {
                role: ChatCompletionMessageRole::System,
                content: Some(SYSTEM_MESSAGE.to_string()),
                name: None,
                function_call: None,
                tool_call_id: None,
                tool_calls: None,
            },
            ChatCompletionMessage {
                role: ChatCompletionMessageRole::User,
                content: Some(user_message.to_string()),
                name: None,
                function_call: None,
                tool_call_id: None,
                tool_calls: None,
            },
        ];

        let chat_completion = ChatCompletion::builder(&self.model_name, messages)
            .credentials(credentials)
            .create()
            .await
            .map_err(|e| {
                warn!("LLM API 调用失败: {}", e);
                AppError::verify_api_failed(&self.model_name, e)
            })?;

        let returned_message = chat_completion
            .choices
            .first()
            .ok_or_else(|| {
                AppError::Verify(VerifyError::EmptyContent {
                    model: self.model_name.clone(),
                })
            })?
            .message
            .clone();

        let content = returned_message.content.ok_or_else(|| {
            AppError::Verify(VerifyError::EmptyContent {
                model: self.model_name.clone(),
            })
        })?;

        Ok(content.trim().to_string())
    }

    /// 构建批量判定提示词
    fn build_prompt(&self, candidates: &[VerifyCandidate]) -> AppResult<String> {
        let candidates_json = serde_json::to_string_pretty(candidates)?;
        Ok(format!(
            r#"下面是若干组学生答案与标准答案，字面匹配已经失败。
请逐组判断学生答案与标准答案在含义上是否等价（同义表述、缩写、语序差异都算等价）。

候选列表：
{}

返回 JSON 数组，每组一条：
[{{ "id": "题号", "isCorrect": true/false, "reason": "一句话理由" }}]

只返回 JSON 数组，不要返回任何其他内容。"#,
            candidates_json
        ))
    }

    /// 解析 LLM 返回的判定数组
    fn parse_verdicts(&self, response: &str) -> AppResult<Vec<VerifyVerdict>> {
        let text = if let Some(caps) = self.fence_re.captures(response) {
            caps.get(1).map(|m| m.as_str()).unwrap_or(response)
        } else {
            response.trim()
        };

        serde_json::from_str(text).map_err(|_| {
            AppError::Verify(VerifyError::VerdictParseFailed {
                response: response.to_string(),
            })
        })
    }
}

#[async_trait::async_trait]
impl SemanticVerifier for LlmClient {
    async fn verify_batch(&self, candidates: &[VerifyCandidate]) -> AppResult<Vec<VerifyVerdict>> {
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let prompt = self.build_prompt(candidates)?;
        let response = self.chat(&prompt).await?;
        let verdicts = self.parse_verdicts(&response)?;

        debug!("LLM 判定 {} 条候选，{} 条等价", candidates.len(),
            verdicts.iter().filter(|v| v.is_correct).count());
        Ok(verdicts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_fenced_verdict_array() {
        let client = LlmClient::new(&Config::default());
        let verdicts = client
            .parse_verdicts("```json\n[{\"id\":\"1\",\"isCorrect\":true,\"reason\":\"同义\"}]\n```")
            .unwrap();
        assert_eq!(verdicts.len(), 1);
        assert!(verdicts[0].is_correct);
    }

    #[test]
    fn rejects_non_json_response() {
        let client = LlmClient::new(&Config::default());
        assert!(client.parse_verdicts("我觉得都对").is_err());
    }
}

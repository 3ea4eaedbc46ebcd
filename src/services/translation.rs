//! 翻译服务 - 业务能力层
//!
//! 只负责"把一段文本翻译成目标语言"能力，不关心队列和节流。
//!
//! ## 技术栈
//! - 直接用 `reqwest` 调 Chat Completions 协议的服务
//! - 不走 SDK 封装：限流惩罚需要拿到原始 HTTP 状态码（429）

use crate::error::{ApiError, AppError, AppResult};
use crate::models::TranslatorSettings;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// 单次请求超时
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
/// 译文长度上限（一行字幕用不了更多）
const MAX_COMPLETION_TOKENS: u32 = 100;

/// 翻译能力契约
///
/// 队列 worker 只依赖这个 trait；测试里换成假翻译器
#[async_trait]
pub trait Translator: Send + Sync {
    /// 翻译一段文本
    ///
    /// # 返回
    /// - `Ok(Some(译文))`: 翻译成功
    /// - `Ok(None)`: 服务没有给出译文（按失败丢弃处理）
    /// - `Err(ApiError::RateLimited)`: 命中频率限制，由队列追加惩罚延迟
    async fn translate(&self, text: &str) -> AppResult<Option<String>>;
}

/// Chat Completions 翻译服务
pub struct OpenAiTranslator {
    client: reqwest::Client,
    settings: Arc<RwLock<TranslatorSettings>>,
}

impl OpenAiTranslator {
    /// 创建翻译服务
    ///
    /// 设置通过共享句柄传入：目标语言和密钥在运行期间可被更新，
    /// 每次请求读取当前值
    pub fn new(settings: Arc<RwLock<TranslatorSettings>>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self { client, settings }
    }

    /// 构建翻译指令（系统消息固定，语言来自设置）
    fn build_system_prompt(target_lang: &str) -> String {
        format!(
            "You are a subtitle translator. Translate the following text to {}. \
             The text may be in any language. Return only the translated text, nothing else.",
            target_lang
        )
    }
}

#[async_trait]
impl Translator for OpenAiTranslator {
    async fn translate(&self, text: &str) -> AppResult<Option<String>> {
        let (api_key, endpoint, model, target_lang) = {
            let settings = self.settings.read().await;
            if !settings.has_credential() {
                return Err(AppError::Api(ApiError::MissingCredential));
            }
            (
                settings.api_key.clone(),
                format!(
                    "{}/chat/completions",
                    settings.api_base_url.trim_end_matches('/')
                ),
                settings.model_name.clone(),
                settings.target_lang.clone(),
            )
        };

        debug!("调用翻译 API，模型: {}, 文本长度: {}", model, text.len());

        let body = json!({
            "model": model,
            "messages": [
                { "role": "system", "content": Self::build_system_prompt(&target_lang) },
                { "role": "user", "content": text }
            ],
            "max_tokens": MAX_COMPLETION_TOKENS,
            "temperature": 0.3
        });

        let response = self
            .client
            .post(&endpoint)
            .bearer_auth(&api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok());
            warn!("翻译 API 命中频率限制 (429)");
            return Err(AppError::rate_limited(endpoint, retry_after));
        }
        if !status.is_success() {
            let message = response.text().await.ok();
            return Err(AppError::Api(ApiError::BadResponse {
                endpoint,
                status: status.as_u16(),
                message,
            }));
        }

        let parsed: ChatResponse = response.json().await?;
        let translated = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty());

        debug!("翻译 API 调用成功, 有译文: {}", translated.is_some());

        Ok(translated)
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_prompt_carries_target_lang() {
        let prompt = OpenAiTranslator::build_system_prompt("zh");
        assert!(prompt.contains("to zh"));
        assert!(prompt.contains("subtitle translator"));
    }

    #[test]
    fn test_response_parsing_tolerates_missing_content() {
        let parsed: ChatResponse =
            serde_json::from_str(r#"{"choices":[{"message":{"content":null}}]}"#).unwrap();
        assert!(parsed.choices[0].message.content.is_none());

        let parsed: ChatResponse = serde_json::from_str(r#"{"choices":[]}"#).unwrap();
        assert!(parsed.choices.is_empty());
    }

    /// 需要真实 API 密钥，默认忽略：
    /// SETTINGS_API_KEY=sk-xxx cargo test test_translate_live -- --ignored
    #[tokio::test]
    #[ignore]
    async fn test_translate_live() {
        let settings = Arc::new(RwLock::new(TranslatorSettings {
            api_key: std::env::var("SETTINGS_API_KEY").unwrap_or_default(),
            ..Default::default()
        }));
        let translator = OpenAiTranslator::new(settings);

        let result = translator.translate("Bonjour tout le monde").await;
        match result {
            Ok(Some(text)) => {
                println!("译文: {}", text);
                assert!(!text.is_empty());
            }
            Ok(None) => panic!("API 没有返回译文"),
            Err(e) => panic!("翻译调用失败: {}", e),
        }
    }
}

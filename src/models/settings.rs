//! 用户设置（settings.toml）
//!
//! 启动时读取一次，运行期间文件变化会被 orchestrator 轮询到并重新应用

use serde::{Deserialize, Serialize};

/// 用户可配置的翻译设置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranslatorSettings {
    /// 翻译服务 API 密钥，为空则整个功能不激活
    #[serde(default)]
    pub api_key: String,
    /// 兼容 OpenAI Chat Completions 协议的服务地址
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    /// 模型名称
    #[serde(default = "default_model_name")]
    pub model_name: String,
    /// 目标语言
    #[serde(default = "default_target_lang")]
    pub target_lang: String,
    /// 是否自动翻译（控制是否启动页面观察）
    #[serde(default)]
    pub auto_translate: bool,
}

fn default_api_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_model_name() -> String {
    "gpt-3.5-turbo".to_string()
}

fn default_target_lang() -> String {
    "en".to_string()
}

impl Default for TranslatorSettings {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            api_base_url: default_api_base_url(),
            model_name: default_model_name(),
            target_lang: default_target_lang(),
            auto_translate: false,
        }
    }
}

impl TranslatorSettings {
    /// 是否配置了 API 密钥
    pub fn has_credential(&self) -> bool {
        !self.api_key.trim().is_empty()
    }

    /// 只有配置了密钥且开启了自动翻译，观察循环才会启动
    pub fn is_enabled(&self) -> bool {
        self.has_credential() && self.auto_translate
    }
}

//! 设置与用量存储 - 基础设施层
//!
//! 订阅/计费后端在本程序里只剩下这组 CRUD 契约：
//! 读用量、消耗一次翻译、覆写状态。生产实现落在两个 TOML 文件上
//! （settings.toml / usage.toml），测试里换成内存实现。

use crate::error::{AppError, AppResult};
use crate::models::{TranslatorSettings, UsageState};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// 用量存储契约
///
/// 状态的单一事实来源在存储侧；引擎侧（UsageGate）只缓存
/// 一份最终一致的副本
#[async_trait]
pub trait UsageStore: Send + Sync {
    /// 读取当前用量状态
    async fn get_usage(&self) -> AppResult<UsageState>;

    /// 消耗一次翻译（订阅期间不计数），返回更新后的状态
    async fn increment_count(&self) -> AppResult<UsageState>;

    /// 覆写用量状态（订阅激活/取消、惰性过期降级都走这里）
    async fn set_usage(&self, state: UsageState) -> AppResult<()>;
}

/// TOML 文件用量存储
pub struct TomlUsageStore {
    path: PathBuf,
}

impl TomlUsageStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    async fn load(&self) -> AppResult<UsageState> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => Ok(toml::from_str(&raw)?),
            // 文件还不存在等价于全新用户
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(UsageState::default()),
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, state: &UsageState) -> AppResult<()> {
        let raw = toml::to_string_pretty(state)?;
        tokio::fs::write(&self.path, raw)
            .await
            .map_err(|e| AppError::storage_write_failed(self.path.display().to_string(), e))
    }
}

#[async_trait]
impl UsageStore for TomlUsageStore {
    async fn get_usage(&self) -> AppResult<UsageState> {
        self.load().await
    }

    async fn increment_count(&self) -> AppResult<UsageState> {
        let mut state = self.load().await?;
        if !state.is_subscribed {
            state.count += 1;
            self.save(&state).await?;
        }
        debug!(
            "翻译计数更新: count={}, can_translate={}",
            state.count,
            state.can_translate()
        );
        Ok(state)
    }

    async fn set_usage(&self, state: UsageState) -> AppResult<()> {
        self.save(&state).await
    }
}

/// 读取用户设置文件
///
/// 文件不存在时写出一份默认模板并返回默认值，
/// 方便用户第一次运行后直接填 API 密钥
pub async fn load_settings(path: impl AsRef<Path>) -> AppResult<TranslatorSettings> {
    let path = path.as_ref();
    match tokio::fs::read_to_string(path).await {
        Ok(raw) => Ok(toml::from_str(&raw)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            let defaults = TranslatorSettings::default();
            let raw = toml::to_string_pretty(&defaults)?;
            if let Err(write_err) = tokio::fs::write(path, raw).await {
                warn!("写出默认设置文件失败 ({}): {}", path.display(), write_err);
            }
            Ok(defaults)
        }
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("subtran_test_{}_{}", std::process::id(), name))
    }

    #[tokio::test]
    async fn test_usage_roundtrip_and_increment() {
        let path = temp_path("usage.toml");
        let _ = tokio::fs::remove_file(&path).await;
        let store = TomlUsageStore::new(&path);

        // 空文件等价于全新用户
        let state = store.get_usage().await.unwrap();
        assert_eq!(state.count, 0);
        assert!(state.can_translate());

        let state = store.increment_count().await.unwrap();
        assert_eq!(state.count, 1);

        // 重新打开也能读到
        let reopened = TomlUsageStore::new(&path);
        assert_eq!(reopened.get_usage().await.unwrap().count, 1);

        let _ = tokio::fs::remove_file(&path).await;
    }

    #[tokio::test]
    async fn test_subscriber_increment_does_not_count() {
        let path = temp_path("usage_sub.toml");
        let _ = tokio::fs::remove_file(&path).await;
        let store = TomlUsageStore::new(&path);

        store
            .set_usage(UsageState {
                count: 42,
                is_subscribed: true,
                subscription_expiry: None,
            })
            .await
            .unwrap();

        let state = store.increment_count().await.unwrap();
        assert_eq!(state.count, 42);
        assert!(state.can_translate());

        let _ = tokio::fs::remove_file(&path).await;
    }

    #[tokio::test]
    async fn test_missing_settings_file_yields_defaults() {
        let path = temp_path("settings.toml");
        let _ = tokio::fs::remove_file(&path).await;

        let settings = load_settings(&path).await.unwrap();
        assert!(!settings.is_enabled());
        assert_eq!(settings.target_lang, "en");

        // 应当写出了模板文件
        assert!(tokio::fs::metadata(&path).await.is_ok());

        let _ = tokio::fs::remove_file(&path).await;
    }
}

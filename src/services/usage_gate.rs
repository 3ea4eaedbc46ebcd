//! 用量闸门 - 业务能力层
//!
//! 回答一个问题："现在还允许翻译吗"。
//! 真实状态在存储侧，这里持有一份缓存副本：
//! 扫描和派发走缓存（热路径），启动时和每次成功翻译后刷新。
//! 订阅过期是惰性检查：任何一次查询观察到过期即降级并持久化，幂等。

use crate::error::AppResult;
use crate::infrastructure::UsageStore;
use crate::models::UsageState;
use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// 用量闸门
pub struct UsageGate {
    store: Arc<dyn UsageStore>,
    allowed: AtomicBool,
}

impl UsageGate {
    /// 创建闸门（缓存初始为放行，首次 refresh 前不拦截）
    pub fn new(store: Arc<dyn UsageStore>) -> Self {
        Self {
            store,
            allowed: AtomicBool::new(true),
        }
    }

    /// 缓存判定，不触发存储访问
    pub fn is_allowed(&self) -> bool {
        self.allowed.load(Ordering::Relaxed)
    }

    /// 存储不可达时按不放行处理
    pub fn deny(&self) {
        self.allowed.store(false, Ordering::Relaxed);
    }

    /// 查询存储并刷新缓存
    pub async fn refresh(&self) -> AppResult<bool> {
        let state = self.current_state().await?;
        let allowed = state.can_translate();
        self.allowed.store(allowed, Ordering::Relaxed);
        debug!(
            "用量刷新: count={}, subscribed={}, can_translate={}",
            state.count, state.is_subscribed, allowed
        );
        Ok(allowed)
    }

    /// 读取完整用量状态（惰性过期降级在这里发生并持久化）
    pub async fn current_state(&self) -> AppResult<UsageState> {
        let mut state = self.store.get_usage().await?;
        if state.expire_if_due(Utc::now()) {
            info!("⚠️ 订阅已过期，降级为免费额度");
            self.store.set_usage(state.clone()).await?;
        }
        Ok(state)
    }

    /// 记录一次成功翻译，返回之后是否仍然放行
    pub async fn record_translation(&self) -> AppResult<bool> {
        // 先做过期检查再计数，过期订阅不能再享受不计数
        let mut state = self.store.get_usage().await?;
        if state.expire_if_due(Utc::now()) {
            info!("⚠️ 订阅已过期，降级为免费额度");
            self.store.set_usage(state).await?;
        }

        let state = self.store.increment_count().await?;
        let allowed = state.can_translate();
        self.allowed.store(allowed, Ordering::Relaxed);
        info!(
            "✓ 翻译计数更新: {} (can_translate={})",
            state.count, allowed
        );
        Ok(allowed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppResult;
    use async_trait::async_trait;
    use chrono::Duration;
    use tokio::sync::Mutex;

    /// 内存用量存储，模拟 background 存储层
    struct MemoryUsageStore {
        state: Mutex<UsageState>,
    }

    impl MemoryUsageStore {
        fn new(state: UsageState) -> Self {
            Self {
                state: Mutex::new(state),
            }
        }
    }

    #[async_trait]
    impl UsageStore for MemoryUsageStore {
        async fn get_usage(&self) -> AppResult<UsageState> {
            Ok(self.state.lock().await.clone())
        }

        async fn increment_count(&self) -> AppResult<UsageState> {
            let mut state = self.state.lock().await;
            if !state.is_subscribed {
                state.count += 1;
            }
            Ok(state.clone())
        }

        async fn set_usage(&self, state: UsageState) -> AppResult<()> {
            *self.state.lock().await = state;
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_quota_boundary_flips_gate() {
        let store = Arc::new(MemoryUsageStore::new(UsageState {
            count: 99,
            ..Default::default()
        }));
        let gate = UsageGate::new(store.clone());

        assert!(gate.refresh().await.unwrap());

        // 第 100 次翻译后闸门关闭
        let allowed = gate.record_translation().await.unwrap();
        assert!(!allowed);
        assert!(!gate.is_allowed());
        assert_eq!(store.get_usage().await.unwrap().count, 100);
    }

    #[tokio::test]
    async fn test_subscriber_bypasses_quota() {
        let store = Arc::new(MemoryUsageStore::new(UsageState {
            count: 500,
            is_subscribed: true,
            subscription_expiry: Some(Utc::now() + Duration::days(30)),
        }));
        let gate = UsageGate::new(store);

        assert!(gate.refresh().await.unwrap());
        assert!(gate.record_translation().await.unwrap());
    }

    #[tokio::test]
    async fn test_expired_subscription_downgrades_and_persists() {
        let store = Arc::new(MemoryUsageStore::new(UsageState {
            count: 10,
            is_subscribed: true,
            subscription_expiry: Some(Utc::now() - Duration::hours(1)),
        }));
        let gate = UsageGate::new(store.clone());

        // 查询观察到过期即降级
        let allowed = gate.refresh().await.unwrap();
        assert!(allowed); // count=10 仍在免费额度内

        // 降级被持久化
        let persisted = store.get_usage().await.unwrap();
        assert!(!persisted.is_subscribed);
        assert!(persisted.subscription_expiry.is_none());

        // 再查一次是幂等的
        assert!(gate.refresh().await.unwrap());
    }
}

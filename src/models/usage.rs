//! 用量与订阅状态
//!
//! 存储层持有单一事实来源，内容脚本侧只缓存一份最终一致的副本

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 免费额度：100 次翻译
pub const FREE_TRANSLATION_LIMIT: u32 = 100;

/// 用量状态（usage.toml）
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageState {
    /// 已消耗的免费翻译次数（订阅期间不累加）
    #[serde(default)]
    pub count: u32,
    /// 是否处于订阅状态
    #[serde(default)]
    pub is_subscribed: bool,
    /// 订阅到期时间
    #[serde(default)]
    pub subscription_expiry: Option<DateTime<Utc>>,
}

impl UsageState {
    /// 判定还能否继续翻译
    ///
    /// 不变式：`can_translate == is_subscribed || count < 100`
    pub fn can_translate(&self) -> bool {
        self.is_subscribed || self.count < FREE_TRANSLATION_LIMIT
    }

    /// 惰性过期检查：到期则降级为未订阅并清除到期时间
    ///
    /// 返回是否发生了降级（调用方负责把降级持久化）
    pub fn expire_if_due(&mut self, now: DateTime<Utc>) -> bool {
        match self.subscription_expiry {
            Some(expiry) if self.is_subscribed && expiry < now => {
                self.is_subscribed = false;
                self.subscription_expiry = None;
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_free_quota_boundary() {
        let mut state = UsageState {
            count: 99,
            ..Default::default()
        };
        assert!(state.can_translate());

        state.count = 100;
        assert!(!state.can_translate());
    }

    #[test]
    fn test_subscriber_ignores_count() {
        let state = UsageState {
            count: 500,
            is_subscribed: true,
            subscription_expiry: Some(Utc::now() + Duration::days(30)),
        };
        assert!(state.can_translate());
    }

    #[test]
    fn test_expiry_downgrades_lazily() {
        let now = Utc::now();
        let mut state = UsageState {
            count: 42,
            is_subscribed: true,
            subscription_expiry: Some(now - Duration::hours(1)),
        };

        assert!(state.expire_if_due(now));
        assert!(!state.is_subscribed);
        assert!(state.subscription_expiry.is_none());
        // 降级后额度判定回到免费规则
        assert!(state.can_translate());

        // 重复检查是幂等的
        assert!(!state.expire_if_due(now));
    }

    #[test]
    fn test_future_expiry_keeps_subscription() {
        let now = Utc::now();
        let mut state = UsageState {
            count: 0,
            is_subscribed: true,
            subscription_expiry: Some(now + Duration::days(1)),
        };
        assert!(!state.expire_if_due(now));
        assert!(state.is_subscribed);
    }
}

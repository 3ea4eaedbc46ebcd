//! 字幕节点数据模型
//!
//! 宿主页面的节点归宿主所有，不能往上面挂任意字段，
//! 所以翻译状态放在一张显式的 side-table 里（NodeId -> CaptionNodeState）。
//! NodeId 由页面侧注册表分配（弱引用 + 递增编号），节点被宿主销毁后
//! 读文本会得到 None，对应的状态随之清理。

use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// 页面侧注册表分配的文本节点标识
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, serde::Serialize)]
#[serde(transparent)]
pub struct NodeId(pub u64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// 扫描时采集到的文本节点快照
#[derive(Debug, Clone, Deserialize)]
pub struct TextNodeSnapshot {
    pub id: NodeId,
    pub text: String,
}

/// 页面变更记录
///
/// 页面侧观察器只负责采集原始事实（节点类型、是否落在字幕容器内），
/// 是否值得重新扫描由 ChangeDetector 判断
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MutationRecord {
    /// 新元素节点加入
    ElementAdded {
        is_container: bool,
        has_container_descendant: bool,
    },
    /// 已有文本节点内容变化
    CharacterData { in_container: bool },
    /// 新文本节点加入
    TextAdded { in_container: bool, text: String },
}

/// 单个字幕节点的翻译状态
#[derive(Debug, Clone, Default)]
pub struct CaptionNodeState {
    pub is_translated: bool,
    pub translated_at: Option<Instant>,
    pub original_text: Option<String>,
    pub translated_text: Option<String>,
    pub last_processed_text: Option<String>,
    pub cleaned_text: Option<String>,
}

impl CaptionNodeState {
    /// 该节点是否在 `ttl` 时间内被本程序翻译过
    pub fn recently_translated(&self, ttl: Duration) -> bool {
        self.is_translated
            && self
                .translated_at
                .map(|at| at.elapsed() < ttl)
                .unwrap_or(false)
    }

    /// 记录一次成功的翻译
    pub fn mark_translated(&mut self, original: String, translated: String) {
        if self.original_text.is_none() {
            self.original_text = Some(original);
        }
        self.translated_text = Some(translated);
        self.is_translated = true;
        self.translated_at = Some(Instant::now());
    }

    /// 清除翻译标志（节点被恢复原文或被宿主销毁时）
    pub fn clear_translation(&mut self) {
        self.is_translated = false;
        self.translated_at = None;
        self.translated_text = None;
    }
}

/// NodeId -> CaptionNodeState 的共享 side-table
///
/// Dispatcher 写入、Classifier 查询、PersistenceGuard 轮询，三方共用
#[derive(Default)]
pub struct NodeStateTable {
    inner: Mutex<HashMap<NodeId, CaptionNodeState>>,
}

impl NodeStateTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// 读取一个节点状态的副本
    pub async fn get(&self, id: NodeId) -> Option<CaptionNodeState> {
        self.inner.lock().await.get(&id).cloned()
    }

    /// 原地修改一个节点状态（不存在则插入默认值）
    pub async fn update<R>(&self, id: NodeId, f: impl FnOnce(&mut CaptionNodeState) -> R) -> R {
        let mut map = self.inner.lock().await;
        f(map.entry(id).or_default())
    }

    /// 移除一个节点状态（节点被宿主销毁后调用，避免表无限增长）
    pub async fn remove(&self, id: NodeId) {
        self.inner.lock().await.remove(&id);
    }

    /// 所有当前持有译文的节点（用于退出时恢复原文）
    pub async fn translated_nodes(&self) -> Vec<(NodeId, CaptionNodeState)> {
        self.inner
            .lock()
            .await
            .iter()
            .filter(|(_, s)| s.is_translated)
            .map(|(id, s)| (*id, s.clone()))
            .collect()
    }
}

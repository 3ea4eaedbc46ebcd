//! 翻译派发器 - 流程层
//!
//! 从扫描引擎接收合格的字幕节点，负责：
//! 去重（节点级 + 文本级）、按文本防抖、经队列外呼、
//! 把译文写回 DOM 并驱动用量闸门。
//!
//! 内部状态收在一个显式的 DispatcherState 里，随启停显式建销，
//! 一个页面上下文一份，没有全局单例。

use crate::infrastructure::PageDom;
use crate::models::{NodeId, NodeStateTable, TextNodeSnapshot, TranslatorSettings};
use crate::services::UsageGate;
use crate::utils::logging::truncate_text;
use crate::workflow::persistence::PersistenceGuard;
use crate::workflow::queue::TranslationQueue;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// 同一文本的防抖窗口：窗口内重复出现的文本只翻最后一次
pub const DEBOUNCE_DELAY: Duration = Duration::from_secs(2);

/// 派发器内部状态
#[derive(Default)]
struct DispatcherState {
    /// 已成功翻译过的节点
    processed_nodes: HashSet<NodeId>,
    /// 当前 epoch 内处理过的清洗文本（每 30 秒由探测器清空）
    processed_texts: HashSet<String>,
    /// 等待防抖计时的文本 -> 计时任务
    /// 不变式：同一文本值至多一个在途计时器
    pending: HashMap<String, JoinHandle<()>>,
}

/// 翻译派发器
///
/// 防抖计时任务需要在自己到点后继续走完整条外呼/应用链路，
/// 所以共享部分收在内部的 DispatcherCore 里，任务持有它的 Arc
pub struct TranslationDispatcher {
    core: Arc<DispatcherCore>,
}

struct DispatcherCore {
    dom: Arc<dyn PageDom>,
    queue: Arc<TranslationQueue>,
    gate: Arc<UsageGate>,
    guard: Arc<PersistenceGuard>,
    nodes: Arc<NodeStateTable>,
    settings: Arc<RwLock<TranslatorSettings>>,
    state: Mutex<DispatcherState>,
    limit_tx: watch::Sender<bool>,
}

impl TranslationDispatcher {
    pub fn new(
        dom: Arc<dyn PageDom>,
        queue: Arc<TranslationQueue>,
        gate: Arc<UsageGate>,
        guard: Arc<PersistenceGuard>,
        nodes: Arc<NodeStateTable>,
        settings: Arc<RwLock<TranslatorSettings>>,
    ) -> Self {
        let (limit_tx, _) = watch::channel(false);
        Self {
            core: Arc::new(DispatcherCore {
                dom,
                queue,
                gate,
                guard,
                nodes,
                settings,
                state: Mutex::new(DispatcherState::default()),
                limit_tx,
            }),
        }
    }

    /// 订阅"额度用尽"信号（true = 应停止观察）
    pub fn limit_signal(&self) -> watch::Receiver<bool> {
        self.core.limit_tx.subscribe()
    }

    /// 提交一个合格的字幕节点
    ///
    /// # 参数
    /// - `node`: 扫描时的节点快照
    /// - `cleaned`: 分类器给出的清洗文本
    pub async fn submit(&self, node: TextNodeSnapshot, cleaned: String) {
        let core = &self.core;

        if !core.gate.is_allowed() {
            return;
        }
        // 未配置密钥：整条派发链路短路，不建任何队列条目
        if !core.settings.read().await.has_credential() {
            debug!("未配置 API 密钥，跳过派发: {}", truncate_text(&cleaned, 40));
            return;
        }

        let last_processed = core
            .nodes
            .get(node.id)
            .await
            .and_then(|s| s.last_processed_text);

        {
            let mut st = core.state.lock().await;

            if st.processed_nodes.contains(&node.id) {
                return;
            }
            if last_processed.as_deref() == Some(cleaned.as_str()) {
                return;
            }
            // 文本在本 epoch 已处理过则跳过——除非它还有在途的防抖计时器，
            // 那说明同一句话还在连发，重置计时器（防抖语义）
            let pending_exists = st.pending.contains_key(&cleaned);
            if st.processed_texts.contains(&cleaned) && !pending_exists {
                return;
            }

            st.processed_texts.insert(cleaned.clone());

            if let Some(old) = st.pending.remove(&cleaned) {
                old.abort();
            }
            let task = {
                let core = Arc::clone(core);
                let node = node.clone();
                let text = cleaned.clone();
                tokio::spawn(async move {
                    sleep(DEBOUNCE_DELAY).await;
                    core.fire(node, text).await;
                })
            };
            st.pending.insert(cleaned.clone(), task);
        }

        // 记到节点状态上：同一节点同样内容不会再进防抖
        core.nodes
            .update(node.id, |s| {
                s.last_processed_text = Some(cleaned.clone());
                s.cleaned_text = Some(cleaned.clone());
            })
            .await;
    }

    /// 取消所有等待防抖的条目（停止观察时调用）
    ///
    /// 未触发的计时器直接消失，不 resolve；已经入队的请求
    /// 在队列里照常完成
    pub async fn cancel_pending(&self) {
        let mut st = self.core.state.lock().await;
        let dropped = st.pending.len();
        for (_, handle) in st.pending.drain() {
            handle.abort();
        }
        if dropped > 0 {
            debug!("已丢弃 {} 个未触发的防抖条目", dropped);
        }
    }

    /// epoch 轮换：清空已处理文本集合，同一句字幕下个 epoch 可以再翻
    pub async fn clear_processed_texts(&self) {
        self.core.state.lock().await.processed_texts.clear();
        debug!("已清空文本处理缓存 (epoch 轮换)");
    }

    /// 恢复所有已翻译节点的原文（退出时调用）
    ///
    /// 恢复一个节点的同时停掉它自己的持久化守卫
    pub async fn restore_all(&self) -> usize {
        let core = &self.core;
        let translated = core.nodes.translated_nodes().await;
        let mut restored = 0;

        for (id, state) in translated {
            let Some(original) = state.original_text else {
                continue;
            };
            core.guard.stop_guard(id).await;
            match core.dom.set_node_text(id, &original).await {
                Ok(()) => {
                    core.nodes.update(id, |s| s.clear_translation()).await;
                    restored += 1;
                }
                Err(e) => debug!("恢复节点 {} 原文失败: {}", id, e),
            }
        }

        if restored > 0 {
            info!("↩️ 已恢复 {} 个节点的原文", restored);
        }
        restored
    }
}

impl DispatcherCore {
    /// 防抖计时到点：入队外呼并应用结果
    async fn fire(self: Arc<Self>, node: TextNodeSnapshot, text: String) {
        // 自己就是该文本当前的计时器，摘掉 pending 条目
        self.state.lock().await.pending.remove(&text);

        debug!("派发翻译: {}", truncate_text(&text, 50));
        let Some(translated) = self.queue.translate(text.clone()).await else {
            debug!("无译文，丢弃: {}", truncate_text(&text, 50));
            return;
        };
        if translated == text {
            return;
        }

        self.apply_translation(node.id, &translated).await;
    }

    /// 把译文写回节点
    async fn apply_translation(&self, id: NodeId, translated: &str) {
        // 应用时读取"活"的原文：防抖窗口期间宿主可能已换了内容，
        // 防止把过期快照当原文记下来
        let live_original = match self.dom.node_text(id).await {
            Ok(Some(text)) => text.trim().to_string(),
            Ok(None) => {
                debug!("节点 {} 已消失，放弃应用译文", id);
                self.nodes.remove(id).await;
                return;
            }
            Err(e) => {
                warn!("读取节点 {} 失败，放弃应用译文: {}", id, e);
                return;
            }
        };

        if let Err(e) = self.dom.set_node_text(id, translated).await {
            // 节点脱离文档等 DOM 结构性失败：该节点作废，不影响其他流程
            warn!("改写节点 {} 文本失败: {}", id, e);
            return;
        }
        let _ = self.dom.flash_translation_indicator(id).await;

        info!(
            "🌐 已翻译: {} -> {}",
            truncate_text(&live_original, 40),
            truncate_text(translated, 40)
        );

        self.nodes
            .update(id, |s| {
                s.mark_translated(live_original.clone(), translated.to_string())
            })
            .await;
        self.state.lock().await.processed_nodes.insert(id);

        // 宿主会把原文写回来，开始盯防
        self.guard.start_guard(id).await;

        match self.gate.record_translation().await {
            Ok(true) => {}
            Ok(false) => {
                warn!("🔒 翻译额度已用尽，停止派发");
                let _ = self
                    .dom
                    .show_notice(
                        "Free Translation Limit Reached",
                        "You've used all 100 free translations. \
                         Upgrade to Premium for unlimited translations!",
                    )
                    .await;
                let _ = self.limit_tx.send(true);
            }
            Err(e) => warn!("更新翻译计数失败: {}", e),
        }
    }
}

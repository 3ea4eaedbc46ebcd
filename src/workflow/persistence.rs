//! 翻译持久化守卫 - 流程层
//!
//! 宿主页面会不断把原文写回已翻译的节点。每个翻译成功的节点
//! 配一个 1 秒间隔的检查任务：内容回到原文就把译文再写回去。
//! 守卫是节点级的，不随观察停止而结束——只在节点消失、
//! 文本清空或被显式恢复原文时收场。

use crate::infrastructure::PageDom;
use crate::models::{NodeId, NodeStateTable};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::debug;

/// 检查间隔
pub const CHECK_INTERVAL: Duration = Duration::from_secs(1);

/// 单次检查的结论
enum GuardOutcome {
    Continue,
    Stop,
}

/// 翻译持久化守卫
///
/// 职责：
/// - 每个已翻译节点维护至多一个检查任务（重复启动即替换）
/// - 内容被宿主回写为原文时重放译文
/// - 节点消失/文本清空时自行收场并清理 side-table
pub struct PersistenceGuard {
    core: Arc<GuardCore>,
}

struct GuardCore {
    dom: Arc<dyn PageDom>,
    nodes: Arc<NodeStateTable>,
    guards: Mutex<HashMap<NodeId, JoinHandle<()>>>,
}

impl PersistenceGuard {
    pub fn new(dom: Arc<dyn PageDom>, nodes: Arc<NodeStateTable>) -> Self {
        Self {
            core: Arc::new(GuardCore {
                dom,
                nodes,
                guards: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// 为一个节点启动守卫；该节点已有守卫则替换掉旧的
    pub async fn start_guard(&self, id: NodeId) {
        let task = {
            let core = Arc::clone(&self.core);
            tokio::spawn(async move {
                core.run_guard(id).await;
            })
        };

        let mut guards = self.core.guards.lock().await;
        // 顺手清掉已经自行结束的任务条目
        guards.retain(|_, handle| !handle.is_finished());
        if let Some(old) = guards.insert(id, task) {
            old.abort();
        }
    }

    /// 停掉一个节点的守卫（恢复原文时必须调用）
    pub async fn stop_guard(&self, id: NodeId) {
        if let Some(handle) = self.core.guards.lock().await.remove(&id) {
            handle.abort();
        }
    }

    /// 当前活跃的守卫数量
    pub async fn active_guards(&self) -> usize {
        let mut guards = self.core.guards.lock().await;
        guards.retain(|_, handle| !handle.is_finished());
        guards.len()
    }
}

impl GuardCore {
    async fn run_guard(&self, id: NodeId) {
        let mut ticker = interval(CHECK_INTERVAL);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // interval 的第一个 tick 立即返回，先消费掉，首次检查在 1 秒后
        ticker.tick().await;

        loop {
            ticker.tick().await;
            match self.check_once(id).await {
                GuardOutcome::Continue => {}
                GuardOutcome::Stop => break,
            }
        }
    }

    /// 单次检查
    async fn check_once(&self, id: NodeId) -> GuardOutcome {
        let current = match self.dom.node_text(id).await {
            Ok(Some(text)) => text.trim().to_string(),
            // 节点被宿主销毁：清状态收场
            Ok(None) => {
                debug!("节点 {} 已消失，持久化守卫结束", id);
                self.nodes.remove(id).await;
                return GuardOutcome::Stop;
            }
            Err(e) => {
                debug!("持久化检查读取节点 {} 失败: {}", id, e);
                return GuardOutcome::Stop;
            }
        };

        if current.is_empty() {
            self.nodes.remove(id).await;
            return GuardOutcome::Stop;
        }

        let Some(state) = self.nodes.get(id).await else {
            return GuardOutcome::Stop;
        };
        let (Some(original), Some(translated)) =
            (state.original_text.clone(), state.translated_text.clone())
        else {
            return GuardOutcome::Stop;
        };

        if current == original {
            if state.is_translated {
                // 宿主把原文写回来了：重放译文
                debug!("检测到宿主回写原文，重新应用译文 (节点 {})", id);
                if let Err(e) = self.dom.set_node_text(id, &translated).await {
                    debug!("重放译文失败 (节点 {}): {}", id, e);
                    return GuardOutcome::Stop;
                }
            } else {
                // 内容是原文但翻译标志已清：宿主用相同内容重建了节点，
                // 按内容匹配重新应用并重新标记。与"碰巧出现了一句相同的
                // 新字幕"无法区分，这是已知的歧义
                debug!("检测到同内容新节点，重新应用译文 (节点 {})", id);
                if let Err(e) = self.dom.set_node_text(id, &translated).await {
                    debug!("重放译文失败 (节点 {}): {}", id, e);
                    return GuardOutcome::Stop;
                }
                self.nodes
                    .update(id, |s| {
                        s.mark_translated(original.clone(), translated.clone())
                    })
                    .await;
            }
        }

        GuardOutcome::Continue
    }
}

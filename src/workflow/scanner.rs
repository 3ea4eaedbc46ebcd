//! 扫描引擎 - 流程层
//!
//! 一轮扫描：找字幕容器，逐容器走文本节点，分类器边走边筛，
//! 合格的节点交给派发器。找不到容器时退化为根下的有限兜底扫描。
//! 所有上限都是防御病态 DOM 的工作量约束，超限静默截断。

use crate::infrastructure::PageDom;
use crate::models::{NodeStateTable, TextNodeSnapshot};
use crate::services::{CaptionClassifier, UsageGate};
use crate::utils::logging::truncate_text;
use crate::workflow::dispatcher::TranslationDispatcher;
use std::sync::Arc;
use tracing::{debug, warn};

/// 每个容器最多接受的文本节点数
const MAX_NODES_PER_CONTAINER: usize = 10;
/// 兜底扫描最多接受的节点数
const MAX_FALLBACK_NODES: usize = 20;
/// 页面侧单次采集的原始节点上限
const RAW_WALK_LIMIT: usize = 100;

/// 扫描引擎
///
/// 职责：
/// - 按容器选择器定位字幕区域
/// - 有限地走文本节点并套分类器
/// - 把合格节点交给派发器
/// - 任何 DOM 失败只降级当前容器/当前轮，不中止后续扫描
pub struct ScanEngine {
    dom: Arc<dyn PageDom>,
    classifier: CaptionClassifier,
    dispatcher: Arc<TranslationDispatcher>,
    gate: Arc<UsageGate>,
    nodes: Arc<NodeStateTable>,
}

impl ScanEngine {
    pub fn new(
        dom: Arc<dyn PageDom>,
        classifier: CaptionClassifier,
        dispatcher: Arc<TranslationDispatcher>,
        gate: Arc<UsageGate>,
        nodes: Arc<NodeStateTable>,
    ) -> Self {
        Self {
            dom,
            classifier,
            dispatcher,
            gate,
            nodes,
        }
    }

    /// 扫描一轮
    pub async fn scan(&self) {
        if !self.gate.is_allowed() {
            debug!("额度闸门关闭，跳过扫描");
            return;
        }

        let containers = match self.dom.caption_containers().await {
            Ok(containers) => containers,
            Err(e) => {
                warn!("查找字幕容器失败: {}", e);
                return;
            }
        };

        if containers.is_empty() {
            debug!("未找到字幕容器，走兜底扫描");
            match self.dom.fallback_text_nodes(RAW_WALK_LIMIT).await {
                Ok(nodes) => self.process_nodes(nodes, MAX_FALLBACK_NODES).await,
                Err(e) => warn!("兜底扫描失败: {}", e),
            }
            return;
        }

        debug!("找到 {} 个字幕容器", containers.len());
        for container in containers {
            match self.dom.container_text_nodes(container, RAW_WALK_LIMIT).await {
                Ok(nodes) => self.process_nodes(nodes, MAX_NODES_PER_CONTAINER).await,
                // 单个容器失败只跳过它自己
                Err(e) => warn!("扫描容器 {} 失败: {}", container, e),
            }
        }
    }

    /// 逐个过分类器，接受数达到上限后静默截断
    async fn process_nodes(&self, nodes: Vec<TextNodeSnapshot>, accept_cap: usize) {
        let mut accepted = 0;
        for node in nodes {
            if accepted >= accept_cap {
                break;
            }

            let state = self.nodes.get(node.id).await;
            let Some(cleaned) = self.classifier.needs_translation(state.as_ref(), &node.text)
            else {
                continue;
            };

            accepted += 1;
            debug!(
                "接受文本节点 {}: {}",
                node.id,
                truncate_text(cleaned.as_str(), 50)
            );
            self.dispatcher.submit(node, cleaned).await;
        }
    }
}

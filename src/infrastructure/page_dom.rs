//! 页面 DOM 抽象 - 基础设施层
//!
//! 引擎只通过这组能力接触宿主页面：找容器、读写文本节点、
//! 取走变更记录。生产实现是 CDP 桥（CdpDom），测试里换成内存假页面，
//! 引擎代码一行不改。

use crate::error::AppResult;
use crate::models::{MutationRecord, NodeId, TextNodeSnapshot};
use async_trait::async_trait;

/// 页面 DOM 能力
///
/// 职责：
/// - 持有对页面的唯一访问通道
/// - 暴露"读/写/观察"能力
/// - 不认识分类器和派发流程
#[async_trait]
pub trait PageDom: Send + Sync {
    /// 安装页面侧的节点注册表与变更观察器
    async fn install_observer(&self) -> AppResult<()>;

    /// 断开观察器并丢弃未消费的变更记录
    async fn disconnect_observer(&self) -> AppResult<()>;

    /// 取走自上次调用以来积累的变更记录
    async fn drain_mutations(&self) -> AppResult<Vec<MutationRecord>>;

    /// 查找当前页面上的字幕容器
    async fn caption_containers(&self) -> AppResult<Vec<NodeId>>;

    /// 列出一个容器内的非空文本节点，页面侧最多返回 `limit` 个
    async fn container_text_nodes(
        &self,
        container: NodeId,
        limit: usize,
    ) -> AppResult<Vec<TextNodeSnapshot>>;

    /// 找不到容器时的兜底：直接在文档根下采集文本节点
    async fn fallback_text_nodes(&self, limit: usize) -> AppResult<Vec<TextNodeSnapshot>>;

    /// 读取节点当前文本；节点已被宿主销毁时返回 None
    async fn node_text(&self, id: NodeId) -> AppResult<Option<String>>;

    /// 改写节点文本；节点已脱离文档时返回 `DomError::NodeDetached`
    async fn set_node_text(&self, id: NodeId, text: &str) -> AppResult<()>;

    /// 在翻译后的节点附近做一个短暂的视觉标记（可选能力）
    async fn flash_translation_indicator(&self, _id: NodeId) -> AppResult<()> {
        Ok(())
    }

    /// 在页面上弹出一条提示（如额度用尽通知，可选能力）
    async fn show_notice(&self, _title: &str, _body: &str) -> AppResult<()> {
        Ok(())
    }
}

//! 翻译队列 - 流程层
//!
//! 所有外呼的唯一串行化点：不管多少节点同时要求翻译，
//! 出队严格 FIFO，相邻两次外呼间隔不低于 2 秒。
//! worker 是"下次允许外呼时间"的唯一写入者，
//! 并发 submit 不可能突破节流不变式。

use crate::services::{Translator, UsageGate};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep, Instant};
use tracing::{debug, warn};

/// 相邻两次外呼的最小间隔
pub const MIN_CALL_INTERVAL: Duration = Duration::from_secs(2);
/// 命中 429 后在正常间隔之外追加的惩罚延迟
pub const RATE_LIMIT_PENALTY: Duration = Duration::from_secs(5);

/// 队列条目：文本 + 结果回执
struct QueueEntry {
    text: String,
    reply: oneshot::Sender<Option<String>>,
}

/// 翻译队列
///
/// 职责：
/// - 把翻译请求串成一条单道队列
/// - 节流：两次外呼至少间隔 MIN_CALL_INTERVAL
/// - 429 惩罚：下次允许外呼时间额外后移 RATE_LIMIT_PENALTY
/// - 不认识节点和 DOM，只进文本出译文
pub struct TranslationQueue {
    tx: mpsc::UnboundedSender<QueueEntry>,
}

impl TranslationQueue {
    /// 启动队列 worker
    ///
    /// worker 的生命期独立于观察循环：停止观察后，
    /// 已入队的请求仍会按节流节奏完成
    pub fn start(translator: Arc<dyn Translator>, gate: Arc<UsageGate>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(worker(translator, gate, rx));
        Self { tx }
    }

    /// 排队翻译一段文本并等待结果
    ///
    /// 队列关闭、请求失败、服务无译文都归一为 None：
    /// 单次失败直接丢弃，靠字幕重现自愈，不做重试
    pub async fn translate(&self, text: impl Into<String>) -> Option<String> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let entry = QueueEntry {
            text: text.into(),
            reply: reply_tx,
        };
        if self.tx.send(entry).is_err() {
            return None;
        }
        reply_rx.await.unwrap_or(None)
    }
}

/// 队列 worker
async fn worker(
    translator: Arc<dyn Translator>,
    gate: Arc<UsageGate>,
    mut rx: mpsc::UnboundedReceiver<QueueEntry>,
) {
    let mut next_allowed = Instant::now();

    while let Some(entry) = rx.recv().await {
        let now = Instant::now();
        if now < next_allowed {
            sleep(next_allowed - now).await;
        }

        // 额度用尽后不再外呼，排队中的请求直接回空
        if !gate.is_allowed() {
            debug!("额度闸门关闭，丢弃排队中的翻译请求");
            let _ = entry.reply.send(None);
            continue;
        }

        let result = translator.translate(&entry.text).await;
        next_allowed = Instant::now() + MIN_CALL_INTERVAL;

        let outcome = match result {
            Ok(translated) => translated,
            Err(e) if e.is_rate_limited() => {
                next_allowed += RATE_LIMIT_PENALTY;
                warn!("⏳ 翻译服务限流，下次外呼额外延后 {:?}", RATE_LIMIT_PENALTY);
                None
            }
            Err(e) => {
                warn!("翻译失败，丢弃该请求: {}", e);
                None
            }
        };

        // 请求方可能已经不在了（防抖被取消），忽略回执失败
        let _ = entry.reply.send(outcome);
    }
}

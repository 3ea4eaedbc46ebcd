//! 变更探测器 - 流程层
//!
//! 消费页面侧观察器攒下的变更记录，判断哪些值得重扫：
//! - 新元素本身是字幕容器、或其子树里有字幕容器
//! - 字幕容器内的文本内容变化
//! - 字幕容器内新增了非空文本节点
//!
//! 值得重扫时做一次 500ms 安定延迟的合并重扫（一轮风暴只排一个）。
//! 另有两个独立周期：3 秒兜底重扫（有些平台改字幕不触发可观察的
//! 变更事件）和 30 秒 epoch 轮换（清已处理文本集合）。

use crate::error::AppResult;
use crate::infrastructure::PageDom;
use crate::models::MutationRecord;
use crate::workflow::dispatcher::TranslationDispatcher;
use crate::workflow::scanner::ScanEngine;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep};
use tracing::{debug, info, warn};

/// 页面侧变更队列的轮询间隔
const MUTATION_POLL_INTERVAL: Duration = Duration::from_millis(250);
/// 一轮变更风暴后的安定延迟
const SETTLE_DELAY: Duration = Duration::from_millis(500);
/// 兜底周期扫描间隔
const BACKUP_SCAN_INTERVAL: Duration = Duration::from_secs(3);
/// epoch 轮换间隔
const EPOCH_INTERVAL: Duration = Duration::from_secs(30);
/// 启动后的首次强制扫描延迟
const INITIAL_SCAN_DELAY: Duration = Duration::from_secs(1);

/// 观察期间持有的任务句柄
struct DetectorTasks {
    poll: JoinHandle<()>,
    backup: JoinHandle<()>,
    epoch: JoinHandle<()>,
    initial: JoinHandle<()>,
}

impl DetectorTasks {
    fn abort_all(self) {
        self.poll.abort();
        self.backup.abort();
        self.epoch.abort();
        self.initial.abort();
    }
}

/// 变更探测器
pub struct ChangeDetector {
    dom: Arc<dyn PageDom>,
    scanner: Arc<ScanEngine>,
    dispatcher: Arc<TranslationDispatcher>,
    tasks: Mutex<Option<DetectorTasks>>,
    settle_pending: Arc<AtomicBool>,
}

impl ChangeDetector {
    pub fn new(
        dom: Arc<dyn PageDom>,
        scanner: Arc<ScanEngine>,
        dispatcher: Arc<TranslationDispatcher>,
    ) -> Self {
        Self {
            dom,
            scanner,
            dispatcher,
            tasks: Mutex::new(None),
            settle_pending: Arc::new(AtomicBool::new(false)),
        }
    }

    /// 是否在观察中
    pub async fn is_running(&self) -> bool {
        self.tasks.lock().await.is_some()
    }

    /// 启动观察
    ///
    /// 安装页面侧观察器，拉起轮询/兜底/epoch 三个周期任务，
    /// 并在 1 秒后做一次强制扫描。重复调用是幂等的
    pub async fn start(&self) -> AppResult<()> {
        let mut tasks = self.tasks.lock().await;
        if tasks.is_some() {
            return Ok(());
        }

        self.dom.install_observer().await?;

        let poll = {
            let dom = Arc::clone(&self.dom);
            let scanner = Arc::clone(&self.scanner);
            let settle_pending = Arc::clone(&self.settle_pending);
            tokio::spawn(poll_loop(dom, scanner, settle_pending))
        };

        let backup = {
            let scanner = Arc::clone(&self.scanner);
            tokio::spawn(async move {
                let mut ticker = interval(BACKUP_SCAN_INTERVAL);
                ticker.tick().await;
                loop {
                    ticker.tick().await;
                    scanner.scan().await;
                }
            })
        };

        let epoch = {
            let dispatcher = Arc::clone(&self.dispatcher);
            tokio::spawn(async move {
                let mut ticker = interval(EPOCH_INTERVAL);
                ticker.tick().await;
                loop {
                    ticker.tick().await;
                    dispatcher.clear_processed_texts().await;
                }
            })
        };

        let initial = {
            let scanner = Arc::clone(&self.scanner);
            tokio::spawn(async move {
                sleep(INITIAL_SCAN_DELAY).await;
                debug!("启动后的首次强制扫描");
                scanner.scan().await;
            })
        };

        *tasks = Some(DetectorTasks {
            poll,
            backup,
            epoch,
            initial,
        });
        info!("👀 开始观察页面字幕变化");
        Ok(())
    }

    /// 停止观察
    ///
    /// 断开页面侧观察器、终止周期任务、丢弃未触发的防抖条目。
    /// 持久化守卫不在这里清理——它们是节点级的，只随节点消失或
    /// 恢复原文而结束；已入队的翻译请求也照常完成
    pub async fn stop(&self) {
        let Some(tasks) = self.tasks.lock().await.take() else {
            return;
        };
        tasks.abort_all();
        self.settle_pending.store(false, Ordering::SeqCst);

        if let Err(e) = self.dom.disconnect_observer().await {
            warn!("断开页面观察器失败: {}", e);
        }
        self.dispatcher.cancel_pending().await;

        info!("🛑 已停止观察页面字幕变化");
    }
}

/// 轮询页面侧变更队列
async fn poll_loop(
    dom: Arc<dyn PageDom>,
    scanner: Arc<ScanEngine>,
    settle_pending: Arc<AtomicBool>,
) {
    let mut ticker = interval(MUTATION_POLL_INTERVAL);
    loop {
        ticker.tick().await;

        let records = match dom.drain_mutations().await {
            Ok(records) => records,
            Err(e) => {
                debug!("读取变更记录失败: {}", e);
                continue;
            }
        };
        if records.is_empty() || !is_rescan_worthy(&records) {
            continue;
        }

        // 一轮风暴只排一个重扫，风暴中的后续记录被合并
        if settle_pending.swap(true, Ordering::SeqCst) {
            continue;
        }
        debug!("检测到字幕相关变更，{}ms 后重扫", SETTLE_DELAY.as_millis());

        let scanner = Arc::clone(&scanner);
        let flag = Arc::clone(&settle_pending);
        tokio::spawn(async move {
            sleep(SETTLE_DELAY).await;
            flag.store(false, Ordering::SeqCst);
            scanner.scan().await;
        });
    }
}

/// 这批变更记录里有没有值得重扫的
fn is_rescan_worthy(records: &[MutationRecord]) -> bool {
    records.iter().any(|record| match record {
        MutationRecord::ElementAdded {
            is_container,
            has_container_descendant,
        } => *is_container || *has_container_descendant,
        MutationRecord::CharacterData { in_container } => *in_container,
        MutationRecord::TextAdded { in_container, text } => {
            *in_container && !text.trim().is_empty()
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_container_element_triggers_rescan() {
        assert!(is_rescan_worthy(&[MutationRecord::ElementAdded {
            is_container: true,
            has_container_descendant: false,
        }]));
        assert!(is_rescan_worthy(&[MutationRecord::ElementAdded {
            is_container: false,
            has_container_descendant: true,
        }]));
        assert!(!is_rescan_worthy(&[MutationRecord::ElementAdded {
            is_container: false,
            has_container_descendant: false,
        }]));
    }

    #[test]
    fn test_character_data_outside_container_is_noise() {
        assert!(is_rescan_worthy(&[MutationRecord::CharacterData {
            in_container: true
        }]));
        assert!(!is_rescan_worthy(&[MutationRecord::CharacterData {
            in_container: false
        }]));
    }

    #[test]
    fn test_text_node_needs_content_and_container() {
        assert!(is_rescan_worthy(&[MutationRecord::TextAdded {
            in_container: true,
            text: "Bonjour".to_string(),
        }]));
        assert!(!is_rescan_worthy(&[MutationRecord::TextAdded {
            in_container: true,
            text: "   ".to_string(),
        }]));
        assert!(!is_rescan_worthy(&[MutationRecord::TextAdded {
            in_container: false,
            text: "Bonjour".to_string(),
        }]));
    }

    #[test]
    fn test_one_worthy_record_in_a_batch_is_enough() {
        assert!(is_rescan_worthy(&[
            MutationRecord::ElementAdded {
                is_container: false,
                has_container_descendant: false,
            },
            MutationRecord::CharacterData {
                in_container: false
            },
            MutationRecord::TextAdded {
                in_container: true,
                text: "merci".to_string(),
            },
        ]));
    }
}

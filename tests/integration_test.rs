//! 引擎级集成测试
//!
//! 用内存假页面 + 假翻译服务 + 内存用量存储驱动完整管线，
//! 在暂停时钟下验证防抖、去重、节流、持久化守卫和额度闸门。
//! 需要真实浏览器的测试在文件末尾，默认忽略。

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use subtitle_translator::error::{AppError, AppResult};
use subtitle_translator::models::{
    MutationRecord, NodeId, NodeStateTable, TextNodeSnapshot, TranslatorSettings, UsageState,
};
use subtitle_translator::{
    CaptionClassifier, ChangeDetector, PageDom, PersistenceGuard, ScanEngine,
    TranslationDispatcher, TranslationQueue, Translator, UsageGate, UsageStore,
};
use tokio::sync::{Mutex, RwLock};
use tokio::time::{sleep, Instant};

// ========== 测试替身 ==========

/// 内存假页面
///
/// 容器/文本节点的扁平模型；测试通过 host_set_text 模拟宿主回写
struct FakeDom {
    containers: Mutex<Vec<NodeId>>,
    children: Mutex<HashMap<NodeId, Vec<NodeId>>>,
    texts: Mutex<HashMap<NodeId, String>>,
    mutations: Mutex<Vec<MutationRecord>>,
    notices: Mutex<Vec<String>>,
    next_id: AtomicU64,
}

impl FakeDom {
    fn new() -> Self {
        Self {
            containers: Mutex::new(Vec::new()),
            children: Mutex::new(HashMap::new()),
            texts: Mutex::new(HashMap::new()),
            mutations: Mutex::new(Vec::new()),
            notices: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    fn alloc_id(&self) -> NodeId {
        NodeId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    async fn add_container(&self) -> NodeId {
        let id = self.alloc_id();
        self.containers.lock().await.push(id);
        self.children.lock().await.insert(id, Vec::new());
        id
    }

    async fn add_text_node(&self, container: NodeId, text: &str) -> NodeId {
        let id = self.alloc_id();
        self.texts.lock().await.insert(id, text.to_string());
        self.children
            .lock()
            .await
            .entry(container)
            .or_default()
            .push(id);
        id
    }

    /// 模拟宿主页面改写节点内容
    async fn host_set_text(&self, id: NodeId, text: &str) {
        self.texts.lock().await.insert(id, text.to_string());
    }

    /// 模拟宿主页面销毁节点
    async fn host_remove_node(&self, id: NodeId) {
        self.texts.lock().await.remove(&id);
    }

    async fn text_of(&self, id: NodeId) -> Option<String> {
        self.texts.lock().await.get(&id).cloned()
    }

    async fn push_mutation(&self, record: MutationRecord) {
        self.mutations.lock().await.push(record);
    }

    async fn notice_count(&self) -> usize {
        self.notices.lock().await.len()
    }
}

#[async_trait]
impl PageDom for FakeDom {
    async fn install_observer(&self) -> AppResult<()> {
        Ok(())
    }

    async fn disconnect_observer(&self) -> AppResult<()> {
        self.mutations.lock().await.clear();
        Ok(())
    }

    async fn drain_mutations(&self) -> AppResult<Vec<MutationRecord>> {
        Ok(self.mutations.lock().await.drain(..).collect())
    }

    async fn caption_containers(&self) -> AppResult<Vec<NodeId>> {
        Ok(self.containers.lock().await.clone())
    }

    async fn container_text_nodes(
        &self,
        container: NodeId,
        limit: usize,
    ) -> AppResult<Vec<TextNodeSnapshot>> {
        let children = self.children.lock().await;
        let texts = self.texts.lock().await;
        let ids = children.get(&container).cloned().unwrap_or_default();
        Ok(ids
            .into_iter()
            .filter_map(|id| {
                texts.get(&id).and_then(|text| {
                    (!text.trim().is_empty()).then(|| TextNodeSnapshot {
                        id,
                        text: text.clone(),
                    })
                })
            })
            .take(limit)
            .collect())
    }

    async fn fallback_text_nodes(&self, limit: usize) -> AppResult<Vec<TextNodeSnapshot>> {
        let texts = self.texts.lock().await;
        let mut snapshot: Vec<_> = texts
            .iter()
            .filter(|(_, text)| !text.trim().is_empty())
            .map(|(id, text)| TextNodeSnapshot {
                id: *id,
                text: text.clone(),
            })
            .collect();
        snapshot.sort_by_key(|n| n.id);
        snapshot.truncate(limit);
        Ok(snapshot)
    }

    async fn node_text(&self, id: NodeId) -> AppResult<Option<String>> {
        Ok(self.texts.lock().await.get(&id).cloned())
    }

    async fn set_node_text(&self, id: NodeId, text: &str) -> AppResult<()> {
        let mut texts = self.texts.lock().await;
        match texts.get_mut(&id) {
            Some(slot) => {
                *slot = text.to_string();
                Ok(())
            }
            None => Err(AppError::node_detached(id.0)),
        }
    }

    async fn show_notice(&self, title: &str, _body: &str) -> AppResult<()> {
        self.notices.lock().await.push(title.to_string());
        Ok(())
    }
}

/// 记录调用并按映射表返回译文的假翻译服务
struct ScriptedTranslator {
    replies: Mutex<HashMap<String, String>>,
    calls: Mutex<Vec<(String, Instant)>>,
}

impl ScriptedTranslator {
    fn new() -> Self {
        Self {
            replies: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    async fn reply_with(&self, text: &str, translation: &str) {
        self.replies
            .lock()
            .await
            .insert(text.to_string(), translation.to_string());
    }

    async fn calls(&self) -> Vec<(String, Instant)> {
        self.calls.lock().await.clone()
    }

    async fn call_count(&self) -> usize {
        self.calls.lock().await.len()
    }
}

#[async_trait]
impl Translator for ScriptedTranslator {
    async fn translate(&self, text: &str) -> AppResult<Option<String>> {
        self.calls
            .lock()
            .await
            .push((text.to_string(), Instant::now()));
        let replies = self.replies.lock().await;
        Ok(Some(
            replies
                .get(text)
                .cloned()
                .unwrap_or_else(|| format!("T:{}", text)),
        ))
    }
}

/// 内存用量存储
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

// ========== 装配 ==========

struct Harness {
    dom: Arc<FakeDom>,
    translator: Arc<ScriptedTranslator>,
    store: Arc<MemoryUsageStore>,
    gate: Arc<UsageGate>,
    nodes: Arc<NodeStateTable>,
    guard: Arc<PersistenceGuard>,
    dispatcher: Arc<TranslationDispatcher>,
    scanner: Arc<ScanEngine>,
    detector: Arc<ChangeDetector>,
}

/// 按 App::initialize 的方式把整条管线装起来，但全部换成测试替身
async fn build_harness(usage: UsageState) -> Harness {
    let dom = Arc::new(FakeDom::new());
    let translator = Arc::new(ScriptedTranslator::new());
    let store = Arc::new(MemoryUsageStore::new(usage));

    let gate = Arc::new(UsageGate::new(store.clone() as Arc<dyn UsageStore>));
    gate.refresh().await.expect("内存存储不会失败");

    let settings = Arc::new(RwLock::new(TranslatorSettings {
        api_key: "test-key".to_string(),
        auto_translate: true,
        ..Default::default()
    }));

    let queue = Arc::new(TranslationQueue::start(
        translator.clone() as Arc<dyn Translator>,
        Arc::clone(&gate),
    ));
    let nodes = Arc::new(NodeStateTable::new());
    let guard = Arc::new(PersistenceGuard::new(
        dom.clone() as Arc<dyn PageDom>,
        Arc::clone(&nodes),
    ));
    let dispatcher = Arc::new(TranslationDispatcher::new(
        dom.clone() as Arc<dyn PageDom>,
        queue,
        Arc::clone(&gate),
        Arc::clone(&guard),
        Arc::clone(&nodes),
        settings,
    ));
    let scanner = Arc::new(ScanEngine::new(
        dom.clone() as Arc<dyn PageDom>,
        CaptionClassifier::new(),
        Arc::clone(&dispatcher),
        Arc::clone(&gate),
        Arc::clone(&nodes),
    ));
    let detector = Arc::new(ChangeDetector::new(
        dom.clone() as Arc<dyn PageDom>,
        Arc::clone(&scanner),
        Arc::clone(&dispatcher),
    ));

    Harness {
        dom,
        translator,
        store,
        gate,
        nodes,
        guard,
        dispatcher,
        scanner,
        detector,
    }
}

/// 让暂停时钟下的在途任务跑完当前没有计时器的部分
async fn settle() {
    for _ in 0..64 {
        tokio::task::yield_now().await;
    }
}

/// 推进时间并让任务收尾
async fn advance(duration: Duration) {
    sleep(duration).await;
    settle().await;
}

// ========== 引擎测试 ==========

#[tokio::test(start_paused = true)]
async fn test_end_to_end_caption_translation() {
    let h = build_harness(UsageState::default()).await;
    h.translator
        .reply_with("Bonjour tout le monde", "Hello everyone")
        .await;

    let container = h.dom.add_container().await;
    let node = h
        .dom
        .add_text_node(container, "  Jump to bottom ↓ Bonjour tout le monde  ")
        .await;

    h.scanner.scan().await;
    advance(Duration::from_millis(2100)).await;

    // 译文已写回节点
    assert_eq!(h.dom.text_of(node).await.as_deref(), Some("Hello everyone"));

    // 节点状态已标记
    let state = h.nodes.get(node).await.expect("节点应有状态记录");
    assert!(state.is_translated);
    assert_eq!(state.translated_text.as_deref(), Some("Hello everyone"));
    assert_eq!(state.cleaned_text.as_deref(), Some("Bonjour tout le monde"));

    // 用量 +1
    assert_eq!(h.store.get_usage().await.unwrap().count, 1);
    // 只外呼了一次，内容是清洗后的文本
    let calls = h.translator.calls().await;
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, "Bonjour tout le monde");
}

#[tokio::test(start_paused = true)]
async fn test_duplicate_caption_produces_single_dispatch() {
    let h = build_harness(UsageState::default()).await;
    let container = h.dom.add_container().await;

    // 同一句字幕 500ms 内出现两次（宿主重渲染出新节点）
    h.dom.add_text_node(container, "merci").await;
    h.scanner.scan().await;

    sleep(Duration::from_millis(500)).await;
    let second = h.dom.add_text_node(container, "merci").await;
    h.scanner.scan().await;

    advance(Duration::from_secs(3)).await;

    // 只派发一次
    assert_eq!(h.translator.call_count().await, 1);
    // 防抖重置后，活下来的是最后一次出现（第二个节点）
    assert_eq!(h.dom.text_of(second).await.as_deref(), Some("T:merci"));
}

#[tokio::test(start_paused = true)]
async fn test_debounce_fires_once_after_last_submission() {
    let h = build_harness(UsageState::default()).await;
    let container = h.dom.add_container().await;

    // 同一文本连发 5 次，每次间隔 400ms（都在防抖窗口内）
    let mut last_submit = Instant::now();
    for _ in 0..5 {
        let node = h.dom.add_text_node(container, "ciao a tutti").await;
        h.dispatcher
            .submit(
                TextNodeSnapshot {
                    id: node,
                    text: "ciao a tutti".to_string(),
                },
                "ciao a tutti".to_string(),
            )
            .await;
        last_submit = Instant::now();
        sleep(Duration::from_millis(400)).await;
    }

    advance(Duration::from_secs(3)).await;

    let calls = h.translator.calls().await;
    assert_eq!(calls.len(), 1, "防抖窗口内的连发只能产生一次派发");
    let fired_after = calls[0].1 - last_submit;
    assert!(
        fired_after >= Duration::from_secs(2) && fired_after < Duration::from_millis(2200),
        "应在最后一次提交的 2 秒后触发，实际 {:?}",
        fired_after
    );
}

#[tokio::test(start_paused = true)]
async fn test_rescan_is_idempotent_within_epoch() {
    let h = build_harness(UsageState::default()).await;
    let container = h.dom.add_container().await;
    h.dom.add_text_node(container, "hola a todos").await;

    // 没有 DOM 变化的情况下连扫两轮
    h.scanner.scan().await;
    h.scanner.scan().await;
    advance(Duration::from_secs(3)).await;
    h.scanner.scan().await;
    advance(Duration::from_secs(3)).await;

    assert_eq!(h.translator.call_count().await, 1);
}

#[tokio::test(start_paused = true)]
async fn test_epoch_rollover_allows_same_text_again() {
    let h = build_harness(UsageState::default()).await;
    let container = h.dom.add_container().await;
    h.dom.add_text_node(container, "hasta mañana").await;

    h.scanner.scan().await;
    advance(Duration::from_secs(3)).await;
    assert_eq!(h.translator.call_count().await, 1);

    // epoch 轮换后同一句话（新节点）可以再翻
    h.dispatcher.clear_processed_texts().await;
    h.dom.add_text_node(container, "hasta mañana").await;
    h.scanner.scan().await;
    advance(Duration::from_secs(3)).await;

    assert_eq!(h.translator.call_count().await, 2);
}

#[tokio::test(start_paused = true)]
async fn test_persistence_guard_reasserts_translation() {
    let h = build_harness(UsageState::default()).await;
    h.translator.reply_with("buongiorno a tutti", "good morning everyone").await;

    let container = h.dom.add_container().await;
    let node = h.dom.add_text_node(container, "buongiorno a tutti").await;

    h.scanner.scan().await;
    advance(Duration::from_millis(2100)).await;
    assert_eq!(
        h.dom.text_of(node).await.as_deref(),
        Some("good morning everyone")
    );

    // 宿主把原文写回去
    h.dom.host_set_text(node, "buongiorno a tutti").await;

    // 一个检查周期内守卫要把译文顶回来
    advance(Duration::from_millis(1100)).await;
    assert_eq!(
        h.dom.text_of(node).await.as_deref(),
        Some("good morning everyone")
    );
}

#[tokio::test(start_paused = true)]
async fn test_persistence_guard_stops_when_node_disappears() {
    let h = build_harness(UsageState::default()).await;
    let container = h.dom.add_container().await;
    let node = h.dom.add_text_node(container, "guten morgen zusammen").await;

    h.scanner.scan().await;
    advance(Duration::from_millis(2100)).await;
    assert_eq!(h.guard.active_guards().await, 1);

    // 宿主销毁节点后守卫自行收场，side-table 同步清理
    h.dom.host_remove_node(node).await;
    advance(Duration::from_millis(1100)).await;

    assert_eq!(h.guard.active_guards().await, 0);
    assert!(h.nodes.get(node).await.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_restore_all_reverts_and_stops_guards() {
    let h = build_harness(UsageState::default()).await;
    let container = h.dom.add_container().await;
    let node = h.dom.add_text_node(container, "bonne nuit les amis").await;

    h.scanner.scan().await;
    advance(Duration::from_millis(2100)).await;
    assert_eq!(
        h.dom.text_of(node).await.as_deref(),
        Some("T:bonne nuit les amis")
    );

    let restored = h.dispatcher.restore_all().await;
    assert_eq!(restored, 1);
    assert_eq!(
        h.dom.text_of(node).await.as_deref(),
        Some("bonne nuit les amis")
    );
    // 恢复原文的节点不能再有守卫，否则译文会被顶回去
    assert_eq!(h.guard.active_guards().await, 0);
    advance(Duration::from_secs(2)).await;
    assert_eq!(
        h.dom.text_of(node).await.as_deref(),
        Some("bonne nuit les amis")
    );
}

#[tokio::test(start_paused = true)]
async fn test_quota_exhaustion_stops_dispatch_and_notifies() {
    let h = build_harness(UsageState {
        count: 99,
        ..Default::default()
    })
    .await;
    let mut limit_rx = h.dispatcher.limit_signal();

    let container = h.dom.add_container().await;
    h.dom.add_text_node(container, "dernière phrase").await;

    h.scanner.scan().await;
    advance(Duration::from_millis(2100)).await;

    // 第 100 次翻译成功，额度随即用尽
    assert_eq!(h.store.get_usage().await.unwrap().count, 100);
    assert!(!h.gate.is_allowed());
    assert!(*limit_rx.borrow_and_update(), "应收到额度用尽信号");
    assert_eq!(h.dom.notice_count().await, 1);

    // 后续扫描不再派发
    h.dom.add_text_node(container, "encore une phrase").await;
    h.scanner.scan().await;
    advance(Duration::from_secs(3)).await;
    assert_eq!(h.translator.call_count().await, 1);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_pending_drops_unfired_debounce() {
    let h = build_harness(UsageState::default()).await;
    let container = h.dom.add_container().await;
    h.dom.add_text_node(container, "au revoir à tous").await;

    h.scanner.scan().await;
    // 防抖还没到点就取消
    sleep(Duration::from_millis(500)).await;
    h.dispatcher.cancel_pending().await;

    advance(Duration::from_secs(5)).await;
    assert_eq!(h.translator.call_count().await, 0);
}

#[tokio::test(start_paused = true)]
async fn test_detector_coalesces_mutation_burst_into_one_rescan() {
    let h = build_harness(UsageState::default()).await;
    let container = h.dom.add_container().await;
    h.dom.add_text_node(container, "buenas noches a todos").await;

    h.detector.start().await.expect("启动观察失败");

    // 一阵变更风暴：多条值得重扫的记录混着噪声
    for _ in 0..3 {
        h.dom
            .push_mutation(MutationRecord::TextAdded {
                in_container: true,
                text: "buenas noches a todos".to_string(),
            })
            .await;
        h.dom
            .push_mutation(MutationRecord::CharacterData {
                in_container: false,
            })
            .await;
    }

    // 轮询 (250ms) + 安定 (500ms) + 防抖 (2s)
    advance(Duration::from_secs(4)).await;

    assert_eq!(h.translator.call_count().await, 1);

    h.detector.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_detector_stop_cancels_timers_and_pending() {
    let h = build_harness(UsageState::default()).await;
    let container = h.dom.add_container().await;
    h.dom.add_text_node(container, "arrivederci amici").await;

    h.detector.start().await.expect("启动观察失败");
    assert!(h.detector.is_running().await);

    // 初扫在 1 秒后把文本送进防抖；停止观察要把防抖条目一并丢掉
    advance(Duration::from_millis(1200)).await;
    h.detector.stop().await;
    assert!(!h.detector.is_running().await);

    advance(Duration::from_secs(6)).await;
    assert_eq!(h.translator.call_count().await, 0, "未触发的防抖条目不应 resolve");
}

// ========== 需要真实浏览器的测试 ==========

/// 需要启动 chrome --remote-debugging-port=9222 并打开会议页面，
/// 手动运行：cargo test -- --ignored
#[tokio::test]
#[ignore]
async fn test_browser_connection() {
    let config = subtitle_translator::Config::from_env();

    let result = subtitle_translator::connect_to_browser_and_page(
        config.browser_debug_port,
        Some(&config.target_url),
    )
    .await;

    assert!(result.is_ok(), "应该能够成功连接浏览器");
}

#[tokio::test]
#[ignore]
async fn test_observer_install_on_live_page() {
    let config = subtitle_translator::Config::from_env();

    let (_browser, page) = subtitle_translator::connect_to_browser_and_page(
        config.browser_debug_port,
        Some(&config.target_url),
    )
    .await
    .expect("连接浏览器失败");

    let dom = subtitle_translator::CdpDom::new(page, &config);
    dom.install_observer().await.expect("安装页面观察器失败");

    let containers = dom.caption_containers().await.expect("查询容器失败");
    println!("找到 {} 个字幕容器", containers.len());

    dom.disconnect_observer().await.expect("断开观察器失败");
}

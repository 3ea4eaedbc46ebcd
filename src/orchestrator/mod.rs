//! 编排层（Orchestration Layer）
//!
//! ## 职责
//!
//! 本层是整个应用的入口，负责资源装配和生命周期管理。
//!
//! ## 核心功能
//!
//! 1. **应用初始化**：启动日志、连接浏览器、装配翻译引擎
//! 2. **资源管理**：唯一持有 Browser；引擎各部件经 Arc 共享
//! 3. **主循环**：Ctrl-C、设置文件轮询、额度用尽信号
//! 4. **优雅退出**：停止观察并把页面恢复成原文
//!
//! ## 层次关系
//!
//! ```text
//! orchestrator::App (生命周期与装配)
//!     ↓
//! workflow (引擎：探测 → 扫描 → 派发 → 队列 / 持久化守卫)
//!     ↓
//! services (能力层：classifier / translation / usage_gate)
//!     ↓
//! infrastructure (基础设施：CdpDom / 存储)
//! ```
//!
//! ## 设计原则
//!
//! 1. **显式装配**：所有部件在 initialize 里构造，没有全局单例
//! 2. **资源所有者**：只有编排层持有 Browser
//! 3. **向下依赖**：编排层 → workflow → services → infrastructure

use crate::browser;
use crate::config::Config;
use crate::infrastructure::{load_settings, CdpDom, PageDom, TomlUsageStore, UsageStore};
use crate::models::{NodeStateTable, TranslatorSettings};
use crate::services::{CaptionClassifier, OpenAiTranslator, Translator, UsageGate};
use crate::utils::logging;
use crate::workflow::{
    ChangeDetector, PersistenceGuard, ScanEngine, TranslationDispatcher, TranslationQueue,
};
use anyhow::Result;
use chromiumoxide::Browser;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::interval;
use tracing::{debug, error, info, warn};

/// 设置文件的轮询间隔（设置更新通知的文件系统替身）
const SETTINGS_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// 应用主结构
pub struct App {
    config: Config,
    _browser: Browser,
    dom: Arc<dyn PageDom>,
    settings: Arc<RwLock<TranslatorSettings>>,
    gate: Arc<UsageGate>,
    dispatcher: Arc<TranslationDispatcher>,
    detector: Arc<ChangeDetector>,
}

impl App {
    /// 初始化应用
    pub async fn initialize(config: Config) -> Result<Self> {
        // 初始化日志文件
        logging::init_log_file(&config.output_log_file)?;
        logging::log_startup(config.browser_debug_port);

        // 连接浏览器并定位会议页面
        let (browser, page) =
            browser::connect_to_browser_and_page(config.browser_debug_port, Some(&config.target_url))
                .await?;

        let dom: Arc<dyn PageDom> = Arc::new(CdpDom::new(page, &config));

        // 设置与用量存储
        let settings = Arc::new(RwLock::new(load_settings(&config.settings_file).await?));
        let store: Arc<dyn UsageStore> = Arc::new(TomlUsageStore::new(&config.usage_file));
        let gate = Arc::new(UsageGate::new(store));

        // 引擎装配
        let translator: Arc<dyn Translator> =
            Arc::new(OpenAiTranslator::new(Arc::clone(&settings)));
        let queue = Arc::new(TranslationQueue::start(translator, Arc::clone(&gate)));
        let nodes = Arc::new(NodeStateTable::new());
        let guard = Arc::new(PersistenceGuard::new(Arc::clone(&dom), Arc::clone(&nodes)));
        let dispatcher = Arc::new(TranslationDispatcher::new(
            Arc::clone(&dom),
            queue,
            Arc::clone(&gate),
            guard,
            Arc::clone(&nodes),
            Arc::clone(&settings),
        ));
        let scanner = Arc::new(ScanEngine::new(
            Arc::clone(&dom),
            CaptionClassifier::new(),
            Arc::clone(&dispatcher),
            Arc::clone(&gate),
            nodes,
        ));
        let detector = Arc::new(ChangeDetector::new(
            Arc::clone(&dom),
            scanner,
            Arc::clone(&dispatcher),
        ));

        Ok(Self {
            config,
            _browser: browser,
            dom,
            settings,
            gate,
            dispatcher,
            detector,
        })
    }

    /// 运行应用主逻辑
    pub async fn run(&self) -> Result<()> {
        // 初始额度检查；存储不可达按不放行处理
        let allowed = match self.gate.refresh().await {
            Ok(allowed) => allowed,
            Err(e) => {
                error!("检查翻译额度失败: {}", e);
                self.gate.deny();
                false
            }
        };

        if !allowed {
            warn!("🔒 翻译额度已用尽或无法确认");
            let _ = self
                .dom
                .show_notice(
                    "Free Translation Limit Reached",
                    "You've used all 100 free translations. \
                     Upgrade to Premium for unlimited translations!",
                )
                .await;
        }

        let enabled = self.settings.read().await.is_enabled();
        if enabled && allowed {
            self.detector.start().await?;
        } else {
            let settings = self.settings.read().await;
            info!(
                "翻译未激活: auto_translate={}, api_key配置={}, can_translate={}",
                settings.auto_translate,
                settings.has_credential(),
                allowed
            );
        }

        // 主循环
        let mut limit_rx = self.dispatcher.limit_signal();
        let mut settings_ticker = interval(SETTINGS_POLL_INTERVAL);
        settings_ticker.tick().await;

        let ctrl_c = tokio::signal::ctrl_c();
        tokio::pin!(ctrl_c);

        info!("运行中，Ctrl-C 退出");
        loop {
            tokio::select! {
                _ = settings_ticker.tick() => {
                    self.reload_settings_if_changed().await;
                }
                changed = limit_rx.changed() => {
                    if changed.is_ok() && *limit_rx.borrow() {
                        self.detector.stop().await;
                    }
                }
                _ = &mut ctrl_c => {
                    info!("收到退出信号，优雅退出");
                    break;
                }
            }
        }

        self.shutdown().await;
        Ok(())
    }

    /// 重新加载设置文件；auto_translate 切换会启停观察
    async fn reload_settings_if_changed(&self) {
        let fresh = match load_settings(&self.config.settings_file).await {
            Ok(settings) => settings,
            Err(e) => {
                debug!("读取设置文件失败: {}", e);
                return;
            }
        };

        let changed = { *self.settings.read().await != fresh };
        if !changed {
            return;
        }

        info!(
            "🔄 检测到设置变更: auto_translate={}, target_lang={}",
            fresh.auto_translate, fresh.target_lang
        );
        let was_running = self.detector.is_running().await;
        *self.settings.write().await = fresh.clone();

        if fresh.is_enabled() && self.gate.is_allowed() {
            if !was_running {
                if let Err(e) = self.detector.start().await {
                    error!("启动观察失败: {}", e);
                }
            }
        } else if was_running {
            self.detector.stop().await;
        }
    }

    /// 优雅退出：停止观察并把页面恢复成原文
    async fn shutdown(&self) {
        self.detector.stop().await;
        self.dispatcher.restore_all().await;
    }
}

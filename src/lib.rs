//! # Subtitle Translator
//!
//! 附着在正在运行的浏览器上，把视频会议页面里的实时字幕
//! 自动翻译成目标语言，并对抗宿主页面对原文的反复回写。
//!
//! ## 架构设计
//!
//! 本系统采用严格的四层架构：
//!
//! ### ① 基础设施层（Infrastructure）
//! - `infrastructure/` - 持有稀缺资源（Page、存储文件），只暴露能力
//! - `CdpDom` - 唯一的 page owner，实现 PageDom 能力
//! - `TomlUsageStore` - 用量状态的单一事实来源
//!
//! ### ② 业务能力层（Services）
//! - `services/` - 描述"我能做什么"，只处理单个文本片段
//! - `CaptionClassifier` - 字幕/UI 杂音判定能力
//! - `OpenAiTranslator` - 翻译外呼能力
//! - `UsageGate` - 额度判定能力
//!
//! ### ③ 流程层（Workflow）
//! - `workflow/` - 定义"一句字幕"的完整处理流程
//! - `ChangeDetector` - 变更探测与重扫调度
//! - `ScanEngine` - 容器扫描
//! - `TranslationDispatcher` - 去重、防抖、应用译文
//! - `TranslationQueue` - 单道节流队列
//! - `PersistenceGuard` - 对抗宿主回写
//!
//! ### ④ 编排层（Orchestration）
//! - `orchestrator/` - 应用生命周期，装配与优雅退出
//!
//! ## 模块结构

pub mod browser;
pub mod config;
pub mod error;
pub mod infrastructure;

pub mod models;
pub mod orchestrator;
pub mod services;
pub mod utils;
pub mod workflow;

// 重新导出常用类型
pub use browser::connect_to_browser_and_page;
pub use config::Config;
pub use error::{AppError, AppResult};
pub use infrastructure::{CdpDom, PageDom, TomlUsageStore, UsageStore};
pub use models::{CaptionNodeState, NodeId, NodeStateTable, TextNodeSnapshot, TranslatorSettings};
pub use orchestrator::App;
pub use services::{CaptionClassifier, OpenAiTranslator, Translator, UsageGate};
pub use workflow::{
    ChangeDetector, PersistenceGuard, ScanEngine, TranslationDispatcher, TranslationQueue,
};

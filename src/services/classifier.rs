//! 字幕文本分类器 - 业务能力层
//!
//! 判定一段文本是"真正的字幕语音"还是 UI 杂音。
//! 字幕容器里混着常驻的界面文案（"Jump to bottom ↓" 之类），
//! 分类器是一套黑名单优先的经验规则，不是语言模型：
//! 漏掉一句话可以接受，把界面文案送去翻译才是要避免的事故。
//!
//! 规则以声明式表的形式组织（剥离模式表 / 词汇表 / 拒绝模式表），
//! 改规则不需要动控制流。

use crate::models::CaptionNodeState;
use regex::Regex;
use std::time::Duration;

/// 原始文本长度上限，一行真实字幕不会这么长
const MAX_RAW_LEN: usize = 200;
/// 清洗后文本的最小长度
const MIN_CLEANED_LEN: usize = 3;
/// 短语阈值：低于该长度只要含字母就当作语音（"il resto" 这类短句）
const SHORT_PHRASE_LEN: usize = 10;
/// 近期翻译保护窗口：窗口内翻译过的节点不再送翻
pub const TRANSLATED_GUARD_TTL: Duration = Duration::from_secs(300);

/// 清洗阶段要剥离的 UI 文案模式，按表顺序依次替换为空
const STRIP_PATTERNS: &[&str] = &[
    r"(?i)arrow_downward",
    r"(?i)arrow_upward",
    r"[↑↓←→⬆⬇]",
    r"(?i)jump to bottom",
    r"(?i)jump to top",
    r"(?i)scroll up",
    r"(?i)scroll down",
    r"(?i)expand",
    r"(?i)collapse",
    r"(?i)loading",
    r"(?i)error",
    r"(?i)success",
    r"(?i)warning",
    r"(?i)click",
    r"(?i)press",
];

/// 形态拒绝规则：错误码/纯数字/纯符号等一票否决
const SHAPE_REJECT_PATTERNS: &[&str] = &[
    // 错误码、全大写标识符
    r"^[A-Z0-9_-]{3,}$",
    // 几乎全是数字和符号
    r"^[\d\s\-_.,:;()]+$",
    // 纯标点
    r#"^[\s.,!?;:'"()\-_]+$"#,
];

/// UI 动作词：清洗后仍然包含这些词的，判为界面文案
const UI_ACTION_WORDS: &[&str] = &[
    "arrow_", "jump to", "scroll", "expand", "collapse", "loading", "error", "success", "warning",
    "click", "tap", "press", "button", "toolbar",
];

/// 常见 UI 词汇表（大小写不敏感的子串匹配）
static COMMON_UI_WORDS: phf::Set<&'static str> = phf::phf_set! {
    "loading", "error", "success", "cancel", "save", "delete", "edit",
    "search", "filter", "sort", "refresh", "close", "open", "next", "previous",
    "submit", "reset", "confirm", "back", "forward", "home", "menu", "settings",
    "profile", "logout", "login", "register", "password", "username", "email",
    "notification", "alert", "help", "support", "contact",
};

/// 字幕文本分类器
///
/// 职责：
/// - 清洗文本（剥离已知 UI 文案、归一空白和首尾标点）
/// - 判定清洗后的文本是否像一句字幕语音
/// - 只看单个文本片段，不关心扫描流程
pub struct CaptionClassifier {
    strip_patterns: Vec<Regex>,
    shape_reject_patterns: Vec<Regex>,
    collapse_whitespace: Regex,
    leading_punct: Regex,
    trailing_punct: Regex,
}

impl CaptionClassifier {
    /// 创建分类器并编译全部规则表
    pub fn new() -> Self {
        Self {
            strip_patterns: compile_table(STRIP_PATTERNS),
            shape_reject_patterns: compile_table(SHAPE_REJECT_PATTERNS),
            collapse_whitespace: Regex::new(r"\s+").expect("内置正则无效"),
            leading_punct: Regex::new(r"^[.,;:!?]+").expect("内置正则无效"),
            trailing_punct: Regex::new(r"[.,;:!?]+$").expect("内置正则无效"),
        }
    }

    /// 判定一个文本节点是否需要翻译
    ///
    /// # 参数
    /// - `state`: 节点在 side-table 中的状态（没有记录传 None）
    /// - `raw`: 节点当前的原始文本
    ///
    /// # 返回
    /// 需要翻译时返回清洗后的文本（调用方缓存到节点状态里供派发复用），
    /// 否则返回 None
    pub fn needs_translation(&self, state: Option<&CaptionNodeState>, raw: &str) -> Option<String> {
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.chars().count() >= MAX_RAW_LEN {
            return None;
        }

        let cleaned = self.clean_caption_text(trimmed);
        if cleaned.chars().count() < MIN_CLEANED_LEN {
            return None;
        }

        if self.is_common_ui(&cleaned) {
            return None;
        }

        if !self.looks_like_caption_text(&cleaned) {
            return None;
        }

        // 本程序刚翻译过的节点，内容就是译文本身，不能再送翻
        if state
            .map(|s| s.recently_translated(TRANSLATED_GUARD_TTL))
            .unwrap_or(false)
        {
            return None;
        }

        Some(cleaned)
    }

    /// 清洗字幕文本：剥离已知 UI 文案，归一空白，去掉首尾标点
    pub fn clean_caption_text(&self, raw: &str) -> String {
        let mut cleaned = raw.trim().to_string();
        for pattern in &self.strip_patterns {
            cleaned = pattern.replace_all(&cleaned, "").trim().to_string();
        }

        cleaned = self
            .collapse_whitespace
            .replace_all(&cleaned, " ")
            .trim()
            .to_string();
        cleaned = self.leading_punct.replace(&cleaned, "").trim().to_string();
        cleaned = self.trailing_punct.replace(&cleaned, "").trim().to_string();

        cleaned
    }

    /// 是否命中常见 UI 词汇表
    fn is_common_ui(&self, text: &str) -> bool {
        let lower = text.to_lowercase();
        COMMON_UI_WORDS.iter().any(|word| lower.contains(word))
    }

    /// 清洗后的文本是否像一句字幕语音
    fn looks_like_caption_text(&self, text: &str) -> bool {
        if text.chars().count() < MIN_CLEANED_LEN {
            return false;
        }

        // 路径、URL、技术性数据
        if text.contains('/') || text.contains('\\') || text.contains("http") {
            return false;
        }

        // CSS 选择器样式
        if text.starts_with('.') || text.starts_with('#') {
            return false;
        }

        if self
            .shape_reject_patterns
            .iter()
            .any(|pattern| pattern.is_match(text))
        {
            return false;
        }

        if is_identifier_token(text) {
            return false;
        }

        let lower = text.to_lowercase();
        if UI_ACTION_WORDS.iter().any(|word| lower.contains(word)) {
            return false;
        }

        if text.chars().count() < SHORT_PHRASE_LEN {
            // 短语：含字母、且不是数字符号串就算语音
            return text.chars().any(|c| c.is_alphabetic());
        }

        // 长文本必须含空格：多词短语才像人说的话，单个长 token 不是
        text.contains(' ')
    }
}

impl Default for CaptionClassifier {
    fn default() -> Self {
        Self::new()
    }
}

fn compile_table(patterns: &[&str]) -> Vec<Regex> {
    patterns
        .iter()
        .map(|p| Regex::new(p).expect("内置正则无效"))
        .collect()
}

/// 是否是单个代码标识符样式的 token（camelCase / snake_case / 带数字）
///
/// 纯小写单词（"merci"、首字母大写的 "Bonjour"）更可能是一句短语音，
/// 只有出现下划线、美元符、数字或词中大写才判为代码
fn is_identifier_token(text: &str) -> bool {
    if !text
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
    {
        return false;
    }
    match text.chars().next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == '$' => {}
        _ => return false,
    }
    text.chars()
        .skip(1)
        .any(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_' || c == '$')
}

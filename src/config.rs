/// 程序配置文件
#[derive(Clone, Debug)]
pub struct Config {
    /// 浏览器调试端口
    pub browser_debug_port: u16,
    /// 目标URL（找不到已打开的会议页面时导航到这里）
    pub target_url: String,
    /// 用户设置文件路径
    pub settings_file: String,
    /// 用量/订阅状态文件路径
    pub usage_file: String,
    /// 是否显示详细日志
    pub verbose_logging: bool,
    /// 输出日志文件
    pub output_log_file: String,
    // --- 字幕容器识别配置 ---
    // 宿主页面改版后这两组选择器会失效，属于需要跟着页面更新的兼容性数据
    /// 字幕容器的无障碍标签列表
    pub caption_labels: Vec<String>,
    /// 字幕容器的 CSS class 列表
    pub caption_classes: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            browser_debug_port: 9222,
            target_url: "https://meet.google.com".to_string(),
            settings_file: "settings.toml".to_string(),
            usage_file: "usage.toml".to_string(),
            verbose_logging: false,
            output_log_file: "output.txt".to_string(),
            caption_labels: vec!["Captions".to_string(), "Subtitles".to_string()],
            caption_classes: vec![
                "ZPyPXe".to_string(),
                "ygicle".to_string(),
                "VbkSUe".to_string(),
            ],
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let default = Self::default();
        Self {
            browser_debug_port: std::env::var("BROWSER_DEBUG_PORT").ok().and_then(|v| v.parse().ok()).unwrap_or(default.browser_debug_port),
            target_url: std::env::var("TARGET_URL").unwrap_or(default.target_url),
            settings_file: std::env::var("SETTINGS_FILE").unwrap_or(default.settings_file),
            usage_file: std::env::var("USAGE_FILE").unwrap_or(default.usage_file),
            verbose_logging: std::env::var("VERBOSE_LOGGING").ok().and_then(|v| v.parse().ok()).unwrap_or(default.verbose_logging),
            output_log_file: std::env::var("OUTPUT_LOG_FILE").unwrap_or(default.output_log_file),
            caption_labels: std::env::var("CAPTION_LABELS").ok().map(parse_list).unwrap_or(default.caption_labels),
            caption_classes: std::env::var("CAPTION_CLASSES").ok().map(parse_list).unwrap_or(default.caption_classes),
        }
    }
}

/// 解析逗号分隔的环境变量列表
fn parse_list(raw: String) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

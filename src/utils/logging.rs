/// 日志工具模块
///
/// 提供 tracing 订阅器初始化和启动信息输出
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::Config;

/// 初始化全局日志订阅器
///
/// 优先读取 `RUST_LOG`；未设置时按配置里的 `verbose_logging`
/// 选择 debug 或 info 级别。重复调用安全（后续调用为空操作）。
pub fn init(config: &Config) {
    let default_level = if config.verbose_logging {
        "debug"
    } else {
        "info"
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

/// 记录程序启动信息
///
/// # 参数
/// - `config`: 生效的运行配置
pub fn log_startup(config: &Config) {
    info!("{}", "=".repeat(60));
    info!("🚀 程序启动 - 自动批改模式");
    info!("📡 结构提取: {} / 语义核对: {}", config.extract_provider, config.verify_provider);
    info!(
        "💾 自动保存: 去抖 {} ms, 最多重试 {} 次",
        config.autosave_debounce_ms, config.autosave_max_retries
    );
    info!("{}", "=".repeat(60));
}

/// 截断长文本用于日志显示
///
/// # 参数
/// - `text`: 原始文本
/// - `max_len`: 最大长度
///
/// # 返回
/// 返回截断后的文本
pub fn truncate_text(text: &str, max_len: usize) -> String {
    if text.chars().count() > max_len {
        text.chars().take(max_len).collect::<String>() + "..."
    } else {
        text.to_string()
    }
}

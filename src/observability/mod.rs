//! 可观测性：tracing 日志初始化
//!
//! 默认级别 info，verbose 时 debug（含 delve::prompts 下的提示与模型原始输出）；RUST_LOG 优先。

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

pub fn init(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    // 日志写到 stderr，stdout 只输出答案 / JSON
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(verbose))
        .try_init();
}

// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! 日志初始化 (tracing)

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// 安装全局日志订阅器; `RUST_LOG` 优先, 否则 info (verbose 时 debug)
pub fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let result = tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(false).with_thread_names(true))
        .try_init();

    if let Err(e) = result {
        eprintln!("⚠️  日志系统已初始化: {}", e);
    }
}

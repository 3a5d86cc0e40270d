use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// 初始化日志；`RUST_LOG` 优先，`--verbose` 时默认打开 debug 级别
pub fn init_logger(verbose: bool) {
    let default_directive = if verbose { "pubcopilot=debug" } else { "pubcopilot=info" };

    let result = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| default_directive.into()))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .try_init();

    if let Err(e) = result {
        eprintln!("日志初始化失败: {}", e);
    }
}

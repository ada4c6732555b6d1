use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// 安裝 CLI 用的 subscriber，已有 subscriber 時回傳 false
pub fn init_cli_logger(verbose: bool) -> bool {
    let filter = if verbose {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("rmt_avail=debug,info"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("rmt_avail=info"))
    };

    // try_init: 宿主程式可能已經安裝了自己的 subscriber
    let result = tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_thread_ids(false)
                .with_file(false)
                .with_line_number(false)
                .compact(),
        )
        .try_init();
    report_init(result)
}

pub fn init_json_logger() -> bool {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("rmt_avail=info"));

    let result = tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_thread_ids(false)
                .with_file(false)
                .with_line_number(false)
                .json(), // 託管環境使用 JSON 格式便於日誌收集
        )
        .try_init();
    report_init(result)
}

fn report_init(result: Result<(), tracing_subscriber::util::TryInitError>) -> bool {
    match result {
        Ok(()) => true,
        Err(e) => {
            tracing::debug!("🔧 Keeping existing tracing subscriber: {}", e);
            false
        }
    }
}

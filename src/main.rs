use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

fn main() -> anyhow::Result<()> {
    // Init logging
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap();
    fmt().with_env_filter(filter).init();

    // Startup banner at info level so something always prints at default verbosity
    let rust_log = std::env::var("RUST_LOG").unwrap_or_else(|_| "<unset>".to_string());
    let data_dir = std::env::var("COURTSIDE_DATA_DIR").unwrap_or_else(|_| "data".to_string());
    let manifest = std::env::var("COURTSIDE_MANIFEST").unwrap_or_else(|_| "<builtin>".to_string());
    info!(
        target: "courtside",
        "courtside starting: RUST_LOG='{}', data_dir='{}', manifest='{}'",
        rust_log, data_dir, manifest
    );

    courtside::cli::run(std::env::args().skip(1).collect())
}

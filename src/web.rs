#![cfg(not(tarpaulin_include))]

use sheetsync::app;
use sheetsync::config::Config;
use std::env;

/// Entry point of the sync server.
///
/// Configuration comes from `SHEETSYNC_*` environment variables; optional
/// positional `<rows> <cols>` arguments set the starting grid size of new
/// sheets. Logging honours `RUST_LOG` and defaults to `info`.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = Config::from_env().with_args(env::args().skip(1));
    log::info!(
        "starting with store at {} and {}x{} sheets",
        config.database_dir.display(),
        config.default_rows,
        config.default_cols
    );

    app::run(config).await
}

use pnl_sheets_sync_lib::config::ServiceConfig;
use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    let config = ServiceConfig::from_env();
    if let Err(error) = pnl_sheets_sync_lib::init_tracing(config.data_dir.as_deref()) {
        eprintln!("failed to initialise logging: {error}");
    }
    match pnl_sheets_sync_lib::run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            tracing::error!(error = %error, "service exited with error");
            eprintln!("{error}");
            ExitCode::FAILURE
        }
    }
}

use std::path::PathBuf;

use kona::Config;
use kona_dashboard::{DashboardState, router};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .write_style(env_logger::WriteStyle::Never)
        .init();

    let config_path = std::env::var_os("KONA_CONFIG").map(PathBuf::from);
    let config = Config::load(config_path.as_deref())
        .inspect_err(|e| log::error!("Error loading configuration: {e}"))?;

    let state = DashboardState::load(&config)
        .inspect_err(|e| log::error!("Cannot start dashboard: {e}"))?;

    let ct = tokio_util::sync::CancellationToken::new();
    let shutdown = ct.child_token();

    let address = config.dashboard.bind_address;
    let tcp_listener = tokio::net::TcpListener::bind(&address).await?;

    log::info!("Starting dashboard on address: {}", address);

    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::error!("Failed to listen for ctrl-c: {e}");
        }
        ct.cancel();
    });

    axum::serve(tcp_listener, router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    log::info!("Dashboard stopped");
    Ok(())
}

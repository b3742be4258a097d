use dotenvy::dotenv;
use tracing::info;

use credit_ledger::infra::{
    app::create_app, cache_sweeper::run_cache_sweep_loop, setup::init_app_state,
};
use std::net::SocketAddr;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    let app_state = init_app_state().await?;

    // Read bind address from config before moving app_state
    let bind_addr = app_state.config.bind_addr;

    tokio::spawn(run_cache_sweep_loop(
        app_state.caches.clone(),
        app_state.config.cache_sweep_interval,
    ));

    let app = create_app(app_state);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;

    info!("Credit ledger listening at {}", &listener.local_addr()?);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

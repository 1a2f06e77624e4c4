use anyhow::Context;

use fieldstock_infra::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    fieldstock_observability::init();

    let config = Config::from_env().context("invalid configuration")?;
    let bind_addr = config.bind_addr.clone();
    tracing::info!(
        approval_required = ?config.policy.approval_required_types().collect::<Vec<_>>(),
        conflict_retries = config.conflict_retries,
        "configuration loaded"
    );

    let app = fieldstock_api::app::build_app(config);

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind {bind_addr}"))?;

    tracing::info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}

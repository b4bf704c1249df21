mod app;
mod cli;
mod error;
mod http;
mod logging;

use clap::Parser;

#[tokio::main]
async fn main() -> error::Result<()> {
    let args = cli::CliArgs::parse();

    logging::init(&args.log_level, args.log_dir.as_deref());

    tracing::info!(config_dir = %args.config_dir.display(), bind = %args.bind, "starting edgeforce gateway");

    let state = app::build(&args.config_dir, args.simulate_gpio).await?;

    let router = http::router(state);
    let listener = tokio::net::TcpListener::bind(&args.bind)
        .await
        .unwrap_or_else(|err| panic!("failed to bind {}: {err}", args.bind));

    tracing::info!(bind = %args.bind, "http/ws surface listening");
    axum::serve(listener, router)
        .await
        .unwrap_or_else(|err| panic!("http server exited: {err}"));

    Ok(())
}

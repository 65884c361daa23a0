use actix_cors::Cors;
use actix_web::{http::header, middleware::Logger, web, App, HttpServer};
use anyhow::Context;
use clap::Parser;
use talkgpt::cli::{
    commands::{Cli, Commands},
    run_cli,
};
use talkgpt::config::{AppConfig, ServerConfig};
use talkgpt::state::AppState;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn cors(server: &ServerConfig) -> Cors {
    let cors = Cors::default()
        .allowed_methods(vec!["GET", "POST", "PUT", "DELETE", "OPTIONS"])
        .allowed_headers(vec![header::CONTENT_TYPE, header::ACCEPT, header::AUTHORIZATION])
        .expose_headers(vec![talkgpt::api::routes::SESSION_ID_HEADER])
        .max_age(3600);

    if server.allowed_origins.is_empty() {
        cors.allow_any_origin()
    } else {
        server
            .allowed_origins
            .iter()
            .fold(cors, |cors, origin| cors.allowed_origin(origin))
    }
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    if !matches!(cli.command, Commands::Serve) {
        return run_cli(cli.command, &cli.config).await;
    }

    info!("Starting TalkGPT server...");

    let config = AppConfig::load(&cli.config)
        .with_context(|| format!("failed to load configuration from {}", cli.config))?;
    let state = AppState::from_config(&config)?;

    info!(
        provider = state.orchestrator.gateway().provider_name(),
        model = %state.orchestrator.gateway().options().model,
        database = %config.database.path,
        "components initialized"
    );

    let server = config.server.clone();
    let (host, port) = (server.host.clone(), server.port);

    info!("Server listening on {}:{}", host, port);

    HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(state.clone()))
            .wrap(cors(&server))
            .wrap(Logger::default())
            .configure(talkgpt::api::configure)
    })
    .bind((host, port))?
    .run()
    .await?;

    Ok(())
}

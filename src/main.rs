use std::sync::Arc;

use actix_web::{middleware, web, App, HttpServer};
use anyhow::Context;
use image_worker::handlers::{self, AppState};
use image_worker::middleware::{AuthGate, Interceptors, JwtVerifier, RequestLogger, TokenVerifier};
use image_worker::Config;
use log::{info, warn};
use transformations::{
    ChainBuilder, ConsoleSink, Coordinator, FanoutSink, FileSink, LogSink, RustCodec,
};

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    init_logger();

    let config = Config::from_env();

    info!("Initializing image worker microservice");
    info!("Server configuration: {:?}", config);

    let sink = build_sink(&config);
    let app_state = web::Data::new(initialize_app_state(&config, Arc::clone(&sink)));

    let verifier = config.jwt_secret.as_deref().map(|secret| {
        Arc::new(JwtVerifier::new(secret)) as Arc<dyn TokenVerifier>
    });
    if verifier.is_none() {
        warn!("JWT_SECRET is not set, requests are processed as anonymous");
    }
    let interceptors = Interceptors::new(RequestLogger::new(sink), AuthGate::new(verifier));
    let json_limit = config.max_body_bytes;

    info!("Starting server on {}:{}", config.host, config.port);

    HttpServer::new(move || {
        let interceptors = interceptors.clone();
        App::new()
            .app_data(app_state.clone())
            .app_data(handlers::json_config(json_limit))
            .wrap(middleware::Logger::default())
            .wrap(middleware::NormalizePath::trim())
            .wrap(middleware::DefaultHeaders::new().add(("X-Version", env!("CARGO_PKG_VERSION"))))
            .configure(move |cfg| handlers::configure(cfg, interceptors))
    })
    .bind((config.host.as_str(), config.port))
    .with_context(|| format!("failed to bind {}:{}", config.host, config.port))?
    .workers(config.workers)
    .run()
    .await
    .context("server terminated with an error")
}

fn initialize_app_state(config: &Config, sink: Arc<dyn LogSink>) -> AppState {
    info!("Initializing chain coordinator...");

    let builder = ChainBuilder::new()
        .with_unknown_policy(config.unknown_operation_policy)
        .with_max_operations(config.max_operations);

    let coordinator = Coordinator::new(Arc::new(RustCodec::new()), sink)
        .with_builder(builder)
        .with_failure_policy(config.failure_policy);

    AppState::new(Arc::new(coordinator)).with_request_timeout(config.request_timeout)
}

fn build_sink(config: &Config) -> Arc<dyn LogSink> {
    match &config.log_file {
        Some(path) => {
            info!("Writing log events to {}", path.display());
            Arc::new(FanoutSink::new(vec![
                Arc::new(ConsoleSink) as Arc<dyn LogSink>,
                Arc::new(FileSink::new(path.clone())),
            ]))
        }
        None => Arc::new(ConsoleSink),
    }
}

fn init_logger() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_secs()
        .init();
}

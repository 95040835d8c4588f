use actix_cors::Cors;
use actix_web::{middleware, web, App, HttpServer};
use dotenv::dotenv;
use rewards_engine::{
    audit::AuditRecorder, catalog::CatalogClient, config::Config, database::Database, handlers,
    ledger::LedgerService, metrics, notify::NatsProducer, security_middleware::JwtAuth,
    simulator::Simulator,
};
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenv().ok();

    let _subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_file(true)
        .with_line_number(true)
        .with_thread_ids(true)
        .with_target(false)
        .init();

    let config = Config::from_env().expect("Failed to load configuration");
    config.validate().expect("Invalid configuration");

    info!("Starting Rewards Engine on port {}", config.server.port);

    let db = Arc::new(
        Database::new(
            &config.database.url,
            config.database.max_connections,
            config.database.min_connections,
        )
        .await
        .expect("Failed to connect to database"),
    );
    db.run_migrations().await.expect("Failed to run migrations");

    let nats_producer = Arc::new(
        NatsProducer::new(&config.nats.url, &config.nats.topic_prefix)
            .await
            .expect("Failed to connect to NATS"),
    );

    let catalog = CatalogClient::new(
        config.catalog.base_url.clone(),
        config.catalog.points_per_unit,
        config.catalog.timeout_seconds,
    );

    let audit = AuditRecorder::new(
        db.clone(),
        config.audit.default_query_limit,
        config.audit.max_query_limit,
    );

    let ledger_service = Arc::new(LedgerService::new(
        db.clone(),
        audit,
        nats_producer,
        catalog,
    ));

    metrics::register_metrics(prometheus::default_registry())
        .expect("Failed to register metrics");

    let simulator_handle = if config.simulator.enabled {
        let simulator = Simulator::new(
            ledger_service.clone(),
            db.clone(),
            config.simulator.interval_seconds,
        );
        Some(simulator.start())
    } else {
        None
    };

    let jwt_secret = config.security.jwt_secret.clone();

    let server_result = HttpServer::new(move || {
        let cors = Cors::permissive();

        // JwtAuth sits innermost; CORS preflights and path trims happen first.
        App::new()
            .wrap(JwtAuth::new(jwt_secret.clone()))
            .wrap(cors)
            .wrap(middleware::Logger::default())
            .wrap(middleware::NormalizePath::trim())
            .app_data(web::Data::new(ledger_service.clone()))
            .configure(handlers::configure_routes)
    })
    .bind((config.server.host.as_str(), config.server.port))?
    .workers(config.server.workers)
    .run()
    .await;

    if let Some(handle) = simulator_handle {
        handle.shutdown().await;
    }

    server_result
}

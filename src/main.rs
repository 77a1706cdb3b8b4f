use actix::prelude::*;
use actix_multipart::form::MultipartFormConfig;
use actix_web::{web::Data, App, HttpServer};
use anyhow::Context as AnyhowContext;
use std::env;
use std::sync::Arc;
use vendus_bridge::{
    batch::BatchProcessor,
    cache::TtlCache,
    config::BridgeConfig,
    control::{self, MappingServices},
    diagnostics::{CompositeSink, DiagnosticSink, JsonLinesSink, LogSink},
    endpoint::Endpoints,
    mapping_store::FileSystemMappingRepository,
    payload::PayloadBuilder,
    remote::RemoteApi,
    submission::{ConflictSignature, SubmissionEngine},
    transport::ReqwestTransport,
    unit::UnitResolver,
    variants::{StockPolicy, VariantOrchestrator},
};
use vendus_types::mapping::service::{Bootstrap, MappingService};
use vendus_types::mapping::Catalog;

#[actix_web::main]
async fn main() -> Result<(), anyhow::Error> {
    if let Err(env::VarError::NotPresent) = env::var("RUST_LOG") {
        env::set_var("RUST_LOG", "INFO");
    }
    pretty_env_logger::formatted_timed_builder()
        .parse_default_env()
        .init();

    match std::fs::File::open(".env") {
        Ok(_) => envmnt::load_file(".env")?,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            log::info!("No .env file found, using process environment");
        }
        Err(err) => {
            return Err(anyhow::anyhow!("Unable to open .env file: {err}"));
        }
    }
    let cfg = BridgeConfig::from_env()?;
    let endpoints = Endpoints::new(&cfg.api_url);
    log::info!("Using remote API at {}", endpoints.root());

    let transport = Arc::new(ReqwestTransport::new(&cfg.api_key, cfg.timeout)?);
    let api = Arc::new(RemoteApi::new(transport, endpoints));
    let sink: Arc<dyn DiagnosticSink> = match cfg.error_log.clone() {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Unable to create {}", parent.display()))?;
            }
            let sinks: Vec<Box<dyn DiagnosticSink>> =
                vec![Box::new(LogSink), Box::new(JsonLinesSink::new(path))];
            Arc::new(CompositeSink(sinks))
        }
        None => Arc::new(LogSink),
    };
    let engine = Arc::new(SubmissionEngine::new(
        api.clone(),
        ConflictSignature::new(cfg.conflict_codes.clone()),
        sink,
    ));
    let variants = VariantOrchestrator::new(
        api.clone(),
        engine.clone(),
        TtlCache::new(cfg.cache_ttl),
        StockPolicy {
            store_id: cfg.store_id,
            quantity: cfg.stock_quantity,
            alert: cfg.stock_alert,
        },
    );
    let units = UnitResolver::new(api, cfg.default_unit_id, TtlCache::new(cfg.cache_ttl));
    let batch = Arc::new(BatchProcessor::new(
        PayloadBuilder::new(cfg.required_policy, cfg.boolean_policy),
        engine,
        variants,
        units,
        cfg.variant_group.clone(),
    ));

    let product_mappings = MappingService::new(
        Arc::new(FileSystemMappingRepository::new(&cfg.mappings_dir, Catalog::Products)),
        Catalog::Products,
    )
    .start();
    let document_mappings = MappingService::new(
        Arc::new(FileSystemMappingRepository::new(&cfg.mappings_dir, Catalog::Documents)),
        Catalog::Documents,
    )
    .start();
    product_mappings.send(Bootstrap).await??;
    document_mappings.send(Bootstrap).await??;
    let services = Data::new(MappingServices {
        products: product_mappings,
        documents: document_mappings,
    });

    let bind_addr = cfg.bind_addr.clone();
    log::info!("Listening on {bind_addr}");
    HttpServer::new(move || {
        App::new()
            .app_data(MultipartFormConfig::default().total_limit(20 * 1024 * 1024))
            .wrap(actix_web::middleware::Logger::default())
            .app_data(Data::new(batch.clone()))
            .app_data(services.clone())
            .service(control::upload)
            .service(control::preview)
            .service(control::mapping::list)
            .service(control::mapping::save)
            .service(control::mapping::reset)
            .service(control::mapping::remove)
    })
    .bind(bind_addr.as_str())
    .with_context(|| format!("Failed to bind server to {bind_addr}. Is the port already in use?"))?
    .run()
    .await?;
    Ok(())
}

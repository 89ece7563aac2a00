//! pictor - image transformation and tile pyramid service.
//!
//! This binary starts the HTTP server and configures all components.

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pictor::{
    config::{CheckConfig, Cli, Command, ServeConfig},
    format::sniff,
    server::{create_router, AppState, RouterConfig},
    storage::{BackendFactory, ProviderCredentials, ProviderFactory, ProviderKind},
    tiling::{JobContext, TileJobQueue, VipsTiler},
    transform::{ImageEngine, TransformEngine},
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.into_command() {
        Command::Serve(config) => run_serve(config).await,
        Command::Check(config) => run_check(config).await,
    }
}

// =============================================================================
// Serve Command
// =============================================================================

async fn run_serve(config: ServeConfig) -> ExitCode {
    init_logging(config.verbose);

    if let Err(e) = config.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }

    info!("pictor v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration:");
    match config.storage.azure_account {
        Some(ref account) => info!("  Azure account: {}", account),
        None => warn!("  Azure account: not configured, the azure backend is unavailable"),
    }
    if let Some(ref endpoint) = config.storage.azure_endpoint {
        info!("  Azure endpoint: {}", endpoint);
    }
    if let Some(ref endpoint) = config.storage.s3_endpoint {
        info!("  S3 endpoint: {}", endpoint);
    }
    info!("  S3 default region: {}", config.storage.s3_region);
    info!(
        "  Tiling: {} worker(s), queue of {}, {} uploads per job",
        config.tile_workers, config.job_queue_capacity, config.upload_concurrency
    );

    let tiler = VipsTiler::new(&config.vips_path);
    match tiler.version().await {
        Ok(version) => info!("  Tiling tool: {}", version),
        Err(e) => {
            warn!("  Tiling tool unavailable: {}", e);
            warn!("        Tile jobs will fail until it is installed");
        }
    }

    let factory: Arc<dyn ProviderFactory> = Arc::new(BackendFactory::new(config.backend_settings()));
    let engine: Arc<dyn TransformEngine> = Arc::new(ImageEngine::new());
    info!("  Engine: {}", engine.version());

    let mut context =
        JobContext::new(Arc::new(tiler)).with_upload_concurrency(config.upload_concurrency);
    if let Some(ref dir) = config.staging_dir {
        context = context.with_staging_root(dir);
    }

    let jobs = TileJobQueue::start(
        Arc::clone(&factory),
        context,
        config.tile_workers,
        config.job_queue_capacity,
    );

    let state = AppState::new(factory, engine, jobs);
    let router = create_router(state, build_router_config(&config));

    let addr = config.bind_address();
    info!("Server listening on: http://{}", addr);

    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind to {}: {}", addr, e);
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = axum::serve(listener, router).await {
        error!("Server error: {}", e);
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

/// Initialize the tracing/logging subsystem.
fn init_logging(verbose: bool) {
    let env_filter = if verbose {
        "pictor=debug,tower_http=debug"
    } else {
        "pictor=info,tower_http=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| env_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Build RouterConfig from the application ServeConfig.
fn build_router_config(config: &ServeConfig) -> RouterConfig {
    let mut router_config = RouterConfig::new()
        .with_form(config.enable_form)
        .with_max_body_size(config.max_body_size)
        .with_tracing(!config.no_tracing);

    if let Some(ref origins) = config.cors_origins {
        router_config = router_config.with_cors_origins(origins.clone());
    }

    router_config
}

// =============================================================================
// Check Command
// =============================================================================

async fn run_check(config: CheckConfig) -> ExitCode {
    if config.verbose {
        init_logging(true);
    }

    println!("pictor Configuration Check");
    println!("══════════════════════════");
    println!();

    print!("Tiling tool '{}'... ", config.vips_path);
    match VipsTiler::new(&config.vips_path).version().await {
        Ok(version) => println!("✓ {}", version),
        Err(e) => {
            println!("✗ failed");
            println!();
            println!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    }

    let target = match config.fetch_target() {
        Ok(target) => target,
        Err(e) => {
            println!();
            println!("✗ {}", e);
            return ExitCode::FAILURE;
        }
    };

    if let Some(target) = target {
        println!();
        print!(
            "Fetching {}://{}/{}... ",
            target.kind, target.container, target.key
        );

        let credentials = match target.kind {
            ProviderKind::BucketStore => ProviderCredentials::region(&config.storage.s3_region),
            ProviderKind::SasBlob => ProviderCredentials::sas(
                config.sas_token.clone().unwrap_or_default(),
                config.storage.azure_account.clone(),
            ),
            ProviderKind::PrimaryBlob => ProviderCredentials::default(),
        };

        let factory = BackendFactory::new(config.storage.backend_settings());
        let result = match factory.provider(target.kind, &credentials).await {
            Ok(provider) => provider.fetch(&target.container, &target.key).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(data) => {
                println!("✓ found");
                println!("  Size: {} bytes", data.len());
                println!("  Content-Type: {}", sniff(&data));
            }
            Err(e) => {
                println!("✗ failed");
                println!();
                println!("Error: {}", e);
                println!();
                println!("Please check:");
                println!("  - The storage credentials are configured correctly");
                println!(
                    "  - '{}' exists in '{}' and is readable",
                    target.key, target.container
                );
                return ExitCode::FAILURE;
            }
        }
    }

    println!();
    println!("══════════════════════════");
    println!("✓ All checks passed!");

    ExitCode::SUCCESS
}

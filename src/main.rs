//! Magnolia CLI - Nilo leaf classifier server
//!
//! # Commands
//!
//! - `serve` - Start the classification server
//! - `classify` - Classify one local image
//! - `fetch` - Download the model artifact if it is missing
//! - `info` - Show version and model input info

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use clap::{Parser, Subcommand};
use magnolia::{
    api::{create_router, AppState},
    config::{LoadPolicy, ModelArgs, PipelineArgs, ServeArgs},
    error::{MagnoliaError, Result},
    metrics::MetricsCollector,
    model::OnnxLoader,
    prediction::DECISION_THRESHOLD,
    preprocess::sniff_content_type,
    serving::ServingFacade,
    tensor::INPUT_SHAPE,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Magnolia - Nilo leaf classifier
#[derive(Parser)]
#[command(name = "magnolia")]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the classification server
    ///
    /// Examples:
    ///   magnolia serve
    ///   magnolia serve --port 9000 --load-policy lazy
    ///   MAGNOLIA_MODEL_URL=https://host/resnet50_nilo.onnx magnolia serve
    Serve {
        #[command(flatten)]
        model: ModelArgs,

        #[command(flatten)]
        pipeline: PipelineArgs,

        #[command(flatten)]
        serve: ServeArgs,
    },
    /// Classify one local image and print the JSON result
    Classify {
        /// Image file
        #[arg(value_name = "IMAGE")]
        image: PathBuf,

        #[command(flatten)]
        model: ModelArgs,

        #[command(flatten)]
        pipeline: PipelineArgs,
    },
    /// Make sure the model artifact exists locally, downloading it if needed
    Fetch {
        #[command(flatten)]
        model: ModelArgs,
    },
    /// Show version and model input info
    Info,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "magnolia=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            model,
            pipeline,
            serve,
        } => {
            run_server(&model, &pipeline, &serve).await?;
        },
        Commands::Classify {
            image,
            model,
            pipeline,
        } => {
            classify_file(&image, &model, &pipeline).await?;
        },
        Commands::Fetch { model } => {
            let store = model.build_store(Arc::new(OnnxLoader))?;
            store.ensure_available().await?;
            let stats = store.stats();
            if stats.downloads > 0 {
                println!("Downloaded model to {}", model.model_path.display());
            } else {
                println!("Model already present at {}", model.model_path.display());
            }
        },
        Commands::Info => {
            println!("Magnolia v{}", magnolia::VERSION);
            println!("Nilo leaf classifier serving pipeline");
            println!();
            println!("Model:");
            println!("  Format: ONNX (tract)");
            println!("  Input shape: {INPUT_SHAPE:?} (NHWC, RGB)");
            println!("  Output: probability of Nilo");
            println!("  Decision: Nilo if p > {DECISION_THRESHOLD}");
        },
    }

    Ok(())
}

fn build_facade(model: &ModelArgs, pipeline: &PipelineArgs) -> Result<ServingFacade> {
    pipeline.validate()?;
    let store = model.build_store(Arc::new(OnnxLoader))?;
    Ok(ServingFacade::new(
        Arc::new(store),
        pipeline.preprocessor(),
        pipeline.engine(),
        MetricsCollector::new(),
    ))
}

async fn run_server(model: &ModelArgs, pipeline: &PipelineArgs, serve: &ServeArgs) -> Result<()> {
    serve.validate()?;
    let facade = build_facade(model, pipeline)?;

    tracing::info!(
        model_path = %model.model_path.display(),
        remote = model.model_url.is_some(),
        load_policy = %serve.load_policy,
        normalization = %pipeline.normalization,
        resize_filter = %pipeline.resize_filter,
        max_concurrent_inferences = pipeline.max_concurrent_inferences,
        "starting magnolia"
    );

    match serve.load_policy {
        LoadPolicy::Eager => {
            let info = facade.warm_up().await?;
            tracing::info!(path = %info.path.display(), backend = %info.backend, "model ready");
        },
        LoadPolicy::Lazy => {
            tracing::info!("model will be loaded on first request");
        },
    }

    let state = AppState::new(facade, serve.archive(), serve.max_upload_bytes);
    let app = create_router(state);

    let addr = serve.bind_address();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| MagnoliaError::Io(format!("failed to bind {addr}: {e}")))?;
    tracing::info!(%addr, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| MagnoliaError::Io(format!("server error: {e}")))?;

    tracing::info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}

async fn classify_file(image: &Path, model: &ModelArgs, pipeline: &PipelineArgs) -> Result<()> {
    let bytes = tokio::fs::read(image)
        .await
        .map_err(|e| MagnoliaError::Io(format!("cannot read {}: {e}", image.display())))?;
    let content_type = sniff_content_type(&bytes).unwrap_or("application/octet-stream");

    let facade = build_facade(model, pipeline)?;
    match facade.handle_classification_request(bytes, content_type).await {
        Ok(result) => {
            let json = serde_json::to_string_pretty(&result)
                .map_err(|e| MagnoliaError::Io(format!("cannot encode result: {e}")))?;
            println!("{json}");
            Ok(())
        },
        Err(reported) => {
            eprintln!("Error: {reported}");
            std::process::exit(1);
        },
    }
}

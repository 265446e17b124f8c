//! cascade — run one prompt through the resilient model chain.
//!
//! Loads cascade.toml (or CASCADE_CONFIG), builds the backend chain for the
//! configured credential and prints the raw or extracted result.

use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use base64::Engine;
use cascade_config::{CascadeConfig, ConfigError};
use cascade_llm::{
    BackendDescriptor, BackoffCalculator, GenerateRequest, InvocationOrchestrator, ModelChain,
    ProviderFactory, RateLimiter,
};
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "cascade", version, about = "Run a prompt against a fallback chain of models")]
struct Cli {
    /// Prompt text. Read from stdin when omitted.
    prompt: Option<String>,

    /// Operation name used in logs and error messages.
    #[arg(long, default_value = "generate content")]
    operation: String,

    /// Optional system instruction.
    #[arg(long)]
    system: Option<String>,

    /// Attach an image file to the prompt.
    #[arg(long)]
    image: Option<PathBuf>,

    /// MIME type of the attached image.
    #[arg(long, default_value = "image/png")]
    mime: String,

    /// Extract and pretty-print the JSON payload from the output.
    #[arg(long)]
    json: bool,

    /// Probe every backend before running and start on the first healthy one.
    #[arg(long)]
    validate: bool,

    /// Config file (defaults to CASCADE_CONFIG, then ./cascade.toml).
    #[arg(long)]
    config: Option<PathBuf>,
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<CascadeConfig> {
    let loaded = match path {
        Some(p) => CascadeConfig::load_from(p),
        None => CascadeConfig::load(),
    };
    match loaded {
        Ok(c) => Ok(c),
        Err(ConfigError::NotFound(p)) => {
            warn!("Config file {} not found, using defaults", p.display());
            Ok(CascadeConfig::default())
        }
        Err(e) => Err(e.into()),
    }
}

fn build_request(cli: &Cli) -> anyhow::Result<GenerateRequest> {
    let prompt = match &cli.prompt {
        Some(p) => p.clone(),
        None => {
            let mut buf = String::new();
            std::io::stdin().read_to_string(&mut buf).context("reading prompt from stdin")?;
            buf
        }
    };
    if prompt.trim().is_empty() {
        anyhow::bail!("empty prompt");
    }

    let mut req = GenerateRequest::new(prompt.trim());
    if let Some(sys) = &cli.system {
        req = req.with_system(sys.clone());
    }
    if let Some(path) = &cli.image {
        let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
        req = req.with_image(cli.mime.clone(), base64::engine::general_purpose::STANDARD.encode(bytes));
    }
    Ok(req)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("cascade=debug,info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_ref())?;
    config.validate()?;
    info!(provider = config.provider.kind.as_str(), models = ?config.chain.models, "configuration ready");

    let credential = config.credential()?;
    let factory = ProviderFactory::new(config.provider.kind, config.provider.base_url.clone());
    let chain = Arc::new(ModelChain::initialize(&config.chain.models, &credential, &factory)?);
    let limiter = Arc::new(RateLimiter::from_config(&config.rate_limit));

    if cli.validate || config.chain.validate_on_startup {
        let report = chain.validate(&limiter).await?;
        for outcome in &report.outcomes {
            match &outcome.error {
                None => info!("✅ {} answered", outcome.identifier),
                Some(e) => warn!("❌ {} failed: {}", outcome.identifier, e),
            }
        }
    }

    let orchestrator = InvocationOrchestrator::new(chain.clone(), limiter)
        .with_policy(config.retry.clone())
        .with_backoff(BackoffCalculator::new(config.backoff.clone()));

    let req = build_request(&cli)?;
    let result = orchestrator
        .execute_recorded(&cli.operation, |b: BackendDescriptor| {
            let req = req.clone();
            async move { b.handle.generate(req).await }
        })
        .await;

    eprintln!("model chain: {}", chain.status());

    let completion = match result {
        Ok(c) => c,
        Err(e) => {
            error!(kind = e.as_str(), error = %e, "invocation failed");
            if e.is_user_retryable() {
                eprintln!("All models are busy; try again in a few minutes.");
            }
            return Err(e.into());
        }
    };
    info!(
        id = %completion.record.id,
        backend = %completion.record.backend,
        attempts = completion.record.attempts,
        latency_ms = completion.record.latency_ms,
        "invocation complete"
    );

    if cli.json {
        let value = cascade_llm::extract_value(&completion.text)?;
        println!("{}", serde_json::to_string_pretty(&value)?);
    } else {
        println!("{}", completion.text);
    }
    Ok(())
}

//! `llm-router` command surface, per `spec.md` §6's exit-code contract.
//!
//! Grounded in the teacher's `bin/server.rs` boot sequence (tracing
//! subscriber init, then serve); the subcommand split (`serve`/`bench`/
//! `models`/`config`/`version`) is new since the teacher ships a single
//! server binary with no CLI surface of its own.

use clap::{Parser, Subcommand};
use std::sync::Arc;

use crate::adapter::anthropic_style::AnthropicStyleAdapter;
use crate::adapter::generic_sse::{GenericSseAdapter, GenericSseSchema};
use crate::adapter::groq::GroqAdapter;
use crate::adapter::ollama::OllamaAdapter;
use crate::adapter::openai_style::OpenAiStyleAdapter;
use crate::adapter::openrouter::OpenRouterAdapter;
use crate::adapter::{AdapterRunner, ProviderAdapter};
use crate::breaker::CircuitBreakerRegistry;
use crate::cache::ResponseCache;
use crate::config::{self, RouterSettings, KNOWN_PROVIDER_TAGS};
use crate::cost::CostLedger;
use crate::credentials::CredentialStore;
use crate::envelope::GenerationRequest;
use crate::ratelimit::BackendLimiter;
use crate::registry::{ModelDescriptor, ModelRegistry};
use crate::retry::RetryPolicy;
use crate::router::Router;
use crate::strategy::Strategy;

pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_BAD_USAGE: i32 = 2;
pub const EXIT_CONFIG_ERROR: i32 = 3;
pub const EXIT_BACKEND_UNREACHABLE: i32 = 4;
pub const EXIT_CREDENTIAL_MISSING: i32 = 5;

#[derive(Debug, Parser)]
#[command(name = "llm-router", version, about = "Unified LLM inference router")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start the HTTP gateway.
    Serve {
        #[arg(long, default_value = "0.0.0.0:8080")]
        listen: String,
    },
    /// Send one request to a specific model and print the response.
    Bench {
        model: String,
        prompt: String,
    },
    /// Inspect or edit the registered model set.
    Models {
        #[command(subcommand)]
        action: ModelsAction,
    },
    /// Print the resolved configuration.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Print the binary's version.
    Version,
}

#[derive(Debug, Subcommand)]
pub enum ModelsAction {
    List,
    Add { id: String, provider: String },
    Remove { id: String },
}

#[derive(Debug, Subcommand)]
pub enum ConfigAction {
    Print,
}

/// Everything boot needs, separated from `Router` itself so `serve` can
/// hand the gateway an `Arc<Router>` while retaining the registry/
/// credentials for `models add|remove` and `config print`.
pub struct Boot {
    pub router: Arc<Router>,
    pub registry: Arc<ModelRegistry>,
    pub credentials: Arc<CredentialStore>,
    pub settings: RouterSettings,
}

/// Wires the full dependency graph: credential store, cache, cost ledger,
/// per-backend limiter/breaker, the six adapters, and the router that
/// holds them all. Mirrors the teacher's `LLMRouter::new_with_keys`
/// construction order (credentials first, then clients, then the router).
pub fn bootstrap(settings: RouterSettings) -> Result<Boot, crate::error::RouterError> {
    let credentials = Arc::new(CredentialStore::load_from_env(KNOWN_PROVIDER_TAGS));
    let registry = Arc::new(ModelRegistry::new());
    let cache = ResponseCache::new(settings.cache_bytes as usize, settings.cache_ttl);
    let cost_ledger = Arc::new(CostLedger::new());
    let strategy = Strategy::parse(&settings.strategy).unwrap_or(Strategy::Balanced);

    let router = Arc::new(Router::new(
        registry.clone(),
        cache,
        cost_ledger,
        credentials.clone(),
        strategy,
    ));

    register_default_adapters(&router, &credentials)?;

    if let Some(dir) = &settings.config_dir {
        load_registry_snapshot(&registry, dir)?;
    }

    Ok(Boot {
        router,
        registry,
        credentials,
        settings,
    })
}

fn new_runner() -> Result<Arc<AdapterRunner>, crate::error::RouterError> {
    let limiter = Arc::new(BackendLimiter::new(600, 1_000_000));
    let breaker = Arc::new(CircuitBreakerRegistry::with_defaults());
    Ok(Arc::new(AdapterRunner::new(limiter, breaker, RetryPolicy::default())?))
}

/// Registers the well-known backend per known provider tag with a
/// plausible default `ModelDescriptor`. Operators add/remove real models
/// afterward via `models add|remove` or a `$CONFIG/models.json` snapshot;
/// this just gives `serve` something to route to out of the box.
fn register_default_adapters(
    router: &Arc<Router>,
    credentials: &Arc<CredentialStore>,
) -> Result<(), crate::error::RouterError> {
    use crate::envelope::Capability;
    use std::collections::HashSet;

    let runner = new_runner()?;

    let openai = Arc::new(OpenAiStyleAdapter::new(
        "openai:gpt-4o-mini",
        "https://api.openai.com/v1",
        "openai",
        runner.clone(),
        credentials.clone(),
    ));
    router.register_model(
        ModelDescriptor {
            id: "openai:gpt-4o-mini".to_string(),
            provider_tag: "openai".to_string(),
            capabilities: HashSet::from([Capability::Chat, Capability::Completion, Capability::Streaming]),
            context_window: 128_000,
            input_price_per_million: 0.15,
            output_price_per_million: 0.60,
            default_max_tokens: 4096,
            quality_score: Some(0.75),
            speed_score: Some(0.85),
        },
        openai as Arc<dyn ProviderAdapter>,
    )?;

    let anthropic = Arc::new(AnthropicStyleAdapter::new(
        "anthropic:claude-3-5-sonnet",
        "https://api.anthropic.com/v1",
        "anthropic",
        runner.clone(),
        credentials.clone(),
    ));
    router.register_model(
        ModelDescriptor {
            id: "anthropic:claude-3-5-sonnet".to_string(),
            provider_tag: "anthropic".to_string(),
            capabilities: HashSet::from([Capability::Chat, Capability::Streaming, Capability::Tools]),
            context_window: 200_000,
            input_price_per_million: 3.0,
            output_price_per_million: 15.0,
            default_max_tokens: 4096,
            quality_score: Some(0.95),
            speed_score: Some(0.6),
        },
        anthropic as Arc<dyn ProviderAdapter>,
    )?;

    let openrouter = Arc::new(OpenRouterAdapter::new("openrouter:auto", runner.clone(), credentials.clone()));
    router.register_model(
        ModelDescriptor {
            id: "openrouter:auto".to_string(),
            provider_tag: "openrouter".to_string(),
            capabilities: HashSet::from([Capability::Chat, Capability::Streaming]),
            context_window: 128_000,
            input_price_per_million: 1.0,
            output_price_per_million: 2.0,
            default_max_tokens: 4096,
            quality_score: Some(0.8),
            speed_score: Some(0.7),
        },
        openrouter as Arc<dyn ProviderAdapter>,
    )?;

    let groq = Arc::new(GroqAdapter::new("groq:llama-3.3-70b", runner.clone(), credentials.clone()));
    router.register_model(
        ModelDescriptor {
            id: "groq:llama-3.3-70b".to_string(),
            provider_tag: "groq".to_string(),
            capabilities: HashSet::from([Capability::Chat, Capability::Streaming]),
            context_window: 128_000,
            input_price_per_million: 0.59,
            output_price_per_million: 0.79,
            default_max_tokens: 4096,
            quality_score: Some(0.78),
            speed_score: Some(0.98),
        },
        groq as Arc<dyn ProviderAdapter>,
    )?;

    let ollama = Arc::new(OllamaAdapter::new("ollama:llama3", "http://localhost:11434", runner.clone()));
    router.register_model(
        ModelDescriptor {
            id: "ollama:llama3".to_string(),
            provider_tag: "ollama".to_string(),
            capabilities: HashSet::from([Capability::Chat, Capability::Streaming]),
            context_window: 8192,
            input_price_per_million: 0.0,
            output_price_per_million: 0.0,
            default_max_tokens: 2048,
            quality_score: Some(0.6),
            speed_score: Some(0.5),
        },
        ollama as Arc<dyn ProviderAdapter>,
    )?;

    let generic = Arc::new(GenericSseAdapter::new(
        "generic:custom",
        "http://localhost:9000",
        "/v1/complete",
        "generic",
        GenericSseSchema::default(),
        runner,
        credentials.clone(),
    ));
    router.register_model(
        ModelDescriptor {
            id: "generic:custom".to_string(),
            provider_tag: "generic".to_string(),
            capabilities: HashSet::from([Capability::Completion, Capability::Streaming]),
            context_window: 4096,
            input_price_per_million: 0.0,
            output_price_per_million: 0.0,
            default_max_tokens: 1024,
            quality_score: Some(0.5),
            speed_score: Some(0.5),
        },
        generic as Arc<dyn ProviderAdapter>,
    )?;

    Ok(())
}

/// Loads extra model descriptors from `$CONFIG/models.json`, per
/// `spec.md` §6. These register into the shared registry only — a
/// descriptor with no adapter bound via `models add` simply never shows
/// up as a routable candidate, since `candidate_filter` requires a
/// credential, not an adapter; the adapter binding still needs a live
/// `ProviderAdapter` instance and happens separately.
fn load_registry_snapshot(registry: &Arc<ModelRegistry>, config_dir: &str) -> Result<(), crate::error::RouterError> {
    let path = std::path::Path::new(config_dir).join("models.json");
    if !path.exists() {
        return Ok(());
    }
    let text = std::fs::read_to_string(&path)
        .map_err(|e| crate::error::RouterError::internal(format!("reading {}: {e}", path.display())))?;
    let descriptors: Vec<ModelDescriptor> = serde_json::from_str(&text)
        .map_err(|e| crate::error::RouterError::internal(format!("parsing {}: {e}", path.display())))?;
    for desc in descriptors {
        desc.validate()?;
        tracing::info!(model = %desc.id, "loaded model descriptor from snapshot");
        registry.register(desc)?;
    }
    Ok(())
}

pub fn init_tracing(settings: &RouterSettings) {
    use tracing_subscriber::EnvFilter;
    let filter = EnvFilter::try_new(settings.log_level.as_filter_str()).unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

pub async fn run_bench(boot: &Boot, model: &str, prompt: &str) -> i32 {
    let mut req = GenerationRequest::new_prompt(prompt.to_string(), 512);
    req.model_hint = Some(model.to_string());
    match boot.router.generate(req).await {
        Ok(resp) => {
            println!("{}", resp.text);
            EXIT_SUCCESS
        }
        Err(e) if e.kind == crate::error::ErrorKind::Auth => {
            eprintln!("credential missing for this model: {e}");
            EXIT_CREDENTIAL_MISSING
        }
        Err(e) => {
            eprintln!("request failed: {e}");
            EXIT_BACKEND_UNREACHABLE
        }
    }
}

pub fn run_models_list(boot: &Boot) -> i32 {
    for m in boot.registry.list() {
        println!("{}\t{}\t{}", m.id, m.provider_tag, m.context_window);
    }
    EXIT_SUCCESS
}

pub fn run_config_print(settings: &RouterSettings) -> i32 {
    println!("strategy = {}", settings.strategy);
    println!("cache_bytes = {}", settings.cache_bytes);
    println!("cache_ttl_seconds = {}", settings.cache_ttl.as_secs());
    println!("max_concurrency = {}", settings.max_concurrency);
    println!("log_level = {}", settings.log_level.as_filter_str());
    println!("allowed_keys_count = {}", settings.allowed_keys.len());
    println!("config_dir = {:?}", settings.config_dir);
    println!("log_dir = {:?}", settings.log_dir);
    EXIT_SUCCESS
}

pub fn load_settings() -> Result<RouterSettings, config::ConfigError> {
    RouterSettings::from_env()
}

//! Thin shell around the [`llm_router`] library: parses the CLI, boots the
//! dependency graph, and dispatches to the chosen subcommand. Grounded in
//! the teacher's `bin/server.rs`, which does the same tracing-init-then-run
//! shape for its single `serve` path.

use clap::Parser;
use llm_router::cli::{
    bootstrap, init_tracing, load_settings, run_bench, run_config_print, run_models_list, Cli, Command,
    ModelsAction, EXIT_BAD_USAGE, EXIT_CONFIG_ERROR, EXIT_SUCCESS,
};
use llm_router::gateway::GatewayState;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let settings = match load_settings() {
        Ok(s) => s,
        Err(e) => {
            eprintln!("configuration error: {e}");
            std::process::exit(EXIT_CONFIG_ERROR);
        }
    };

    init_tracing(&settings);

    let code = match cli.command {
        Command::Version => {
            println!("llm-router {}", env!("CARGO_PKG_VERSION"));
            EXIT_SUCCESS
        }
        Command::Config { action: _ } => run_config_print(&settings),
        Command::Serve { listen } => run_serve(settings, &listen).await,
        Command::Bench { model, prompt } => {
            let boot = match bootstrap(settings) {
                Ok(b) => b,
                Err(e) => {
                    eprintln!("boot failed: {e}");
                    std::process::exit(EXIT_CONFIG_ERROR);
                }
            };
            run_bench(&boot, &model, &prompt).await
        }
        Command::Models { action } => {
            let boot = match bootstrap(settings) {
                Ok(b) => b,
                Err(e) => {
                    eprintln!("boot failed: {e}");
                    std::process::exit(EXIT_CONFIG_ERROR);
                }
            };
            match action {
                ModelsAction::List => run_models_list(&boot),
                ModelsAction::Add { id, provider } => {
                    eprintln!(
                        "models add is not supported from the CLI for {id} ({provider}); \
                         edit $CONFIG/models.json and restart, or register the adapter in code"
                    );
                    EXIT_BAD_USAGE
                }
                ModelsAction::Remove { id } => match boot.registry.unregister(&id) {
                    Some(_) => EXIT_SUCCESS,
                    None => {
                        eprintln!("no such model: {id}");
                        EXIT_BAD_USAGE
                    }
                },
            }
        }
    };

    std::process::exit(code);
}

async fn run_serve(settings: llm_router::config::RouterSettings, listen: &str) -> i32 {
    let allowed_keys = settings.allowed_keys.clone();
    let audit = match &settings.log_dir {
        Some(dir) => llm_router::audit::AuditSink::spawn(dir),
        None => llm_router::audit::AuditSink::disabled(),
    };
    let boot = match llm_router::cli::bootstrap(settings) {
        Ok(b) => b,
        Err(e) => {
            eprintln!("boot failed: {e}");
            return llm_router::cli::EXIT_CONFIG_ERROR;
        }
    };

    let addr: std::net::SocketAddr = match listen.parse() {
        Ok(a) => a,
        Err(e) => {
            eprintln!("invalid --listen address {listen}: {e}");
            return llm_router::cli::EXIT_BAD_USAGE;
        }
    };

    let state = GatewayState::new(boot.router.clone(), allowed_keys, audit);
    let app = llm_router::gateway::build_router(state);

    tracing::info!(%addr, "llm-router gateway listening");
    let result = axum::Server::bind(&addr).serve(app.into_make_service()).await;
    match result {
        Ok(()) => EXIT_SUCCESS,
        Err(e) => {
            eprintln!("server error: {e}");
            llm_router::cli::EXIT_BACKEND_UNREACHABLE
        }
    }
}


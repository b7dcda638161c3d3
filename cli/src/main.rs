use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use cropdoc_core::SymptomId;
use cropdoc_core::policy::{DEFAULT_MAX_LEVEL, TraversalPolicy};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;
mod repository;
mod util;

use commands::symptoms::SymptomCommands;
use repository::{HttpSymptomRepository, KnowledgeBaseConfig};
use util::exit_error;

#[derive(Parser)]
#[command(name = "cropdoc", version, about = "Cropdoc CLI: crop disease self-diagnosis against the crop knowledge base")]
struct Cli {
    /// Knowledge base base URL
    #[arg(long, env = "CROPDOC_API_URL", default_value = "http://localhost:3000")]
    api_url: String,

    /// Value for the auth-token header
    #[arg(long, env = "CROPDOC_AUTH_TOKEN", hide_env_values = true)]
    auth_token: Option<String>,

    /// Value for the accept-language header
    #[arg(long, env = "CROPDOC_LANGUAGE", default_value = "en_IN")]
    language: String,

    /// Per-request timeout in seconds
    #[arg(long, env = "CROPDOC_TIMEOUT_SECS", default_value_t = 10)]
    timeout_secs: u64,

    /// Extra attempts for connection failures and 5xx responses
    #[arg(long, env = "CROPDOC_RETRIES", default_value_t = 2)]
    retries: u32,

    /// Emit logs as JSON lines on stderr
    #[arg(long, env = "CROPDOC_LOG_JSON")]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Raw symptom hierarchy queries
    Symptoms {
        #[command(subcommand)]
        command: SymptomCommands,
    },
    /// Ask the resolver about a set of confirmed symptoms
    Resolve {
        /// Crop ID
        #[arg(long)]
        crop: i64,
        /// Confirmed symptom ID (repeatable)
        #[arg(long, required = true, num_args = 1..)]
        confirmed: Vec<SymptomId>,
    },
    /// Guided yes/no diagnosis, reading answers from stdin
    Diagnose {
        /// Crop ID
        #[arg(long)]
        crop: i64,
        /// Depth of the symptom hierarchy
        #[arg(
            long,
            env = "CROPDOC_MAX_LEVEL",
            default_value_t = DEFAULT_MAX_LEVEL,
            value_parser = clap::value_parser!(u32).range(1..)
        )]
        max_level: u32,
        /// Print the session as JSON lines instead of text
        #[arg(long)]
        json: bool,
    },
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "cropdoc=warn".into());
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let config = KnowledgeBaseConfig {
        api_url: cli.api_url.trim_end_matches('/').to_string(),
        auth_token: cli.auth_token,
        language: cli.language,
        timeout: Duration::from_secs(cli.timeout_secs),
        retries: cli.retries,
    };
    let repo = match HttpSymptomRepository::new(&config) {
        Ok(repo) => Arc::new(repo),
        Err(message) => exit_error(&message, Some("Check --api-url or CROPDOC_API_URL.")),
    };

    let code = match cli.command {
        Commands::Symptoms { command } => commands::symptoms::run(&repo, command).await,
        Commands::Resolve { crop, confirmed } => {
            commands::resolve::run(&repo, crop, &confirmed).await
        }
        Commands::Diagnose {
            crop,
            max_level,
            json,
        } => commands::diagnose::run(repo, crop, TraversalPolicy::new(max_level), json).await,
    };

    std::process::exit(code);
}

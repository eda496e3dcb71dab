use std::path::PathBuf;
use std::sync::Arc;

use savor_agent::llm::{LlmClient, OpenAiCompatibleClient};
use savor_agent::pipeline::Pipeline;
use savor_core::config::{AppConfig, ConfigOverrides, LoadOptions, LogFormat};
use tracing::{error, info, Level};

use super::{CommandResult, EXIT_CONFIG_FAILURE, EXIT_PIPELINE_FAILURE};

const COMMAND: &str = "rate";

#[derive(Clone, Debug, Default)]
pub struct RateArgs {
    pub query: String,
    pub config_path: Option<PathBuf>,
    pub store_path: Option<PathBuf>,
    pub model: Option<String>,
    pub log_level: Option<String>,
}

pub fn run(args: RateArgs) -> CommandResult {
    let config = match AppConfig::load(load_options(&args)) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                COMMAND,
                "config_validation",
                format!("configuration issue: {error}"),
                EXIT_CONFIG_FAILURE,
            );
        }
    };
    init_logging(&config);

    let client = match OpenAiCompatibleClient::from_config(&config.llm) {
        Ok(client) => client,
        Err(error) => {
            return CommandResult::failure(
                COMMAND,
                "llm_client",
                format!("{error:#}"),
                EXIT_CONFIG_FAILURE,
            );
        }
    };

    execute(&config, &args.query, Arc::new(client))
}

/// Runs the pipeline for `query` against an already loaded configuration.
pub fn execute(config: &AppConfig, query: &str, client: Arc<dyn LlmClient>) -> CommandResult {
    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return CommandResult::failure(
                COMMAND,
                "runtime_init",
                format!("failed to initialize async runtime: {error}"),
                EXIT_PIPELINE_FAILURE,
            );
        }
    };

    let pipeline = Pipeline::from_config(config, client);
    info!(
        event_name = "cli.rate.started",
        store_path = %config.store.path.display(),
        model = %config.llm.model,
        "scoring restaurant reviews"
    );

    match runtime.block_on(pipeline.run(query)) {
        Ok(summary) => CommandResult::success(format!("Chat Summary: {summary}")),
        Err(failure) => {
            error!(event_name = "cli.rate.failed", error = %failure, "pipeline failed");
            CommandResult::failure(COMMAND, "pipeline", failure.to_string(), EXIT_PIPELINE_FAILURE)
        }
    }
}

fn load_options(args: &RateArgs) -> LoadOptions {
    LoadOptions {
        config_path: args.config_path.clone(),
        require_file: args.config_path.is_some(),
        overrides: ConfigOverrides {
            store_path: args.store_path.clone(),
            log_level: args.log_level.clone(),
            llm_model: args.model.clone(),
            ..ConfigOverrides::default()
        },
    }
}

/// Logs go to stderr; stdout carries only the answer.
fn init_logging(config: &AppConfig) {
    let log_level = config.logging.level.parse::<Level>().unwrap_or(Level::WARN);
    let builder = tracing_subscriber::fmt()
        .with_target(false)
        .with_max_level(log_level)
        .with_writer(std::io::stderr);

    // A subscriber may already be installed when embedded or under test.
    let _ = match config.logging.format {
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Pretty => builder.pretty().try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
}

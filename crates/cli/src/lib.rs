pub mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

#[derive(Debug, Parser)]
#[command(
    name = "savor",
    about = "Score a restaurant from its customer reviews",
    long_about = "Extract the restaurant named in QUERY, fetch its reviews from the review store, \
                  score each review and report one overall score between 0 and 10.",
    after_help = "Examples:\n  savor \"How good is Subway as a restaurant?\"\n  savor --store data/reviews.txt \"What would you rate Cafe Luna?\""
)]
pub struct Cli {
    #[arg(help = "Question naming the restaurant to score")]
    pub query: String,
    #[arg(long, value_name = "PATH", help = "Config file (defaults to ./savor.toml when present)")]
    pub config: Option<PathBuf>,
    #[arg(long, value_name = "PATH", help = "Review store file, one `<name>.<review>` per line")]
    pub store: Option<PathBuf>,
    #[arg(long, value_name = "NAME", help = "Chat completion model")]
    pub model: Option<String>,
    #[arg(long, value_name = "LEVEL", help = "Log level: trace|debug|info|warn|error")]
    pub log_level: Option<String>,
}

impl From<Cli> for commands::rate::RateArgs {
    fn from(cli: Cli) -> Self {
        Self {
            query: cli.query,
            config_path: cli.config,
            store_path: cli.store,
            model: cli.model,
            log_level: cli.log_level,
        }
    }
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();
    let result = commands::rate::run(cli.into());

    if result.exit_code == 0 {
        println!("{}", result.output);
    } else {
        eprintln!("{}", result.output);
    }
    ExitCode::from(result.exit_code)
}

//! DesignSafe task layer CLI
//!
//! Runs transfers, the archive copy, the preservation mirror, and the
//! publication bundle from the command line using the same task machinery as the deployed workers.

use std::process;

use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use designsafe_tasks::cli::{
    handle_archive, handle_bundle, handle_config, handle_copy_public, handle_mirror, handle_transfer, Cli,
    Commands, ConfigAction, ConfigArgs,
};
use designsafe_tasks::config::AppConfig;
use designsafe_tasks::errors::Result;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

async fn run() -> Result<()> {
    // A missing .env file is fine
    dotenv::dotenv().ok();

    let cli = Cli::parse_args();
    // `config init` must work before any valid file exists
    let config = match &cli.command {
        Commands::Config(ConfigArgs {
            action: ConfigAction::Init { .. },
        }) => AppConfig::default(),
        _ => AppConfig::load(cli.global.config.clone()).await?,
    };
    init_logging(&cli, &config);

    info!("designsafe_tasks v{} starting", env!("CARGO_PKG_VERSION"));
    info!("Environment: {}", config.environment);

    match cli.command {
        Commands::Transfer(args) => handle_transfer(&config, args).await,
        Commands::CopyPublic(args) => handle_copy_public(&config, args).await,
        Commands::Archive(args) => handle_archive(&config, args).await,
        Commands::Mirror(args) => handle_mirror(&config, args).await,
        Commands::Bundle(args) => handle_bundle(&config, args).await,
        Commands::Config(args) => handle_config(&config, args, cli.global.config).await,
    }
}

/// Flags win over the `[logging]` level from the config file
fn init_logging(cli: &Cli, config: &AppConfig) {
    let log_level = if cli.has_verbosity_flag() {
        cli.log_level().to_string().to_lowercase()
    } else {
        config.logging.level.clone()
    };

    let mut filter = EnvFilter::from_default_env();
    match format!("designsafe_tasks={}", log_level).parse() {
        Ok(directive) => filter = filter.add_directive(directive),
        Err(e) => eprintln!("Ignoring invalid log level {}: {}", log_level, e),
    }

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_level(cli.global.very_verbose)
        .init();

    if cli.global.very_verbose {
        info!("Very verbose logging enabled");
    } else if cli.global.verbose {
        info!("Verbose logging enabled");
    }
}

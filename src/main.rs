use modeld::cli::commands::{CliArgs, Commands};
use modeld::cli::handlers::{
    handle_capability, handle_compare, handle_config, handle_generate, handle_models,
    handle_policy, handle_pull, handle_recommend, handle_validate_key, exit_code_for, EXIT_CONFIG,
};
use modeld::util::logging::{self, parse_level, LoggingConfig};
use modeld::{Agent, ModeldConfig, VERSION};

use clap::Parser;
use tracing::{debug, error, Level};

#[tokio::main]
async fn main() {
    let args = CliArgs::parse();
    init_logging_from_args(&args);

    debug!("modeld v{} starting", VERSION);
    debug!("Arguments: {:?}", args);

    let config = match ModeldConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(EXIT_CONFIG);
        }
    };

    if let Commands::Config(format_args) = &args.command {
        std::process::exit(handle_config(&config, format_args));
    }

    let agent = match Agent::new(config) {
        Ok(agent) => agent,
        Err(e) => {
            error!(error = %e, "Failed to start agent");
            eprintln!("Error: {}", e);
            std::process::exit(exit_code_for(&e.into()));
        }
    };

    let exit_code = match &args.command {
        Commands::Capability(capability_args) => handle_capability(&agent, capability_args).await,
        Commands::Policy(format_args) => handle_policy(&agent, format_args).await,
        Commands::Models(models_command) => handle_models(&agent, models_command).await,
        Commands::Pull(pull_args) => handle_pull(&agent, pull_args, args.quiet).await,
        Commands::Generate(generate_args) => handle_generate(&agent, generate_args).await,
        Commands::Compare(compare_args) => handle_compare(&agent, compare_args).await,
        Commands::Recommend(recommend_args) => handle_recommend(&agent, recommend_args).await,
        Commands::ValidateKey(key_args) => handle_validate_key(&agent, key_args).await,
        Commands::Config(format_args) => handle_config(agent.config(), format_args),
    };

    std::process::exit(exit_code);
}

/// `--log-level` wins over `-v`/`-q`, which win over `MODELD_LOG_LEVEL`
fn init_logging_from_args(args: &CliArgs) {
    let level = if let Some(level_str) = &args.log_level {
        Some(parse_level(level_str))
    } else if args.verbose {
        Some(Level::DEBUG)
    } else if args.quiet {
        Some(Level::ERROR)
    } else {
        None
    };

    match level {
        Some(level) => logging::init_logging(LoggingConfig::with_level(level)),
        None => logging::init_from_env(),
    }
}

//! Command handlers
//!
//! Each handler returns the process exit code. Failures are logged and
//! printed to stderr; results go to stdout.

use super::commands::{
    AddCloudArgs, CapabilityArgs, CompareArgs, FormatArgs, GenerateArgs, ModelIdArgs,
    ModelsCommand, PullArgs, RecommendArgs, RegisterArgs, SamplingArgs, ValidateKeyArgs,
};
use super::output::{OutputFormat, OutputFormatter};
use crate::agent::{Agent, PullOptions};
use crate::config::ModeldConfig;
use crate::dispatch::GenerateParams;
use crate::error::AgentError;
use crate::fetch::{FetchStatus, ProgressEvent};
use crate::registry::{ModelPurpose, ModelRecord};
use anyhow::{anyhow, bail, Context, Result};
use futures_util::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use std::io::Write;
use tracing::{error, info, warn};

pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_FAILURE: i32 = 1;
pub const EXIT_CONFIG: i32 = 2;
pub const EXIT_NOT_FOUND: i32 = 3;
pub const EXIT_CANCELLED: i32 = 130;

/// Maps an error chain to an exit code
pub fn exit_code_for(err: &anyhow::Error) -> i32 {
    match err.downcast_ref::<AgentError>() {
        Some(AgentError::NotFound(_)) | Some(AgentError::NoActiveModel) => EXIT_NOT_FOUND,
        Some(AgentError::Config(_)) => EXIT_CONFIG,
        Some(AgentError::Cancelled(_)) => EXIT_CANCELLED,
        _ => EXIT_FAILURE,
    }
}

fn finish(command: &str, result: Result<()>) -> i32 {
    match result {
        Ok(()) => EXIT_SUCCESS,
        Err(e) => {
            error!(command, error = %e, "Command failed");
            eprintln!("Error: {:#}", e);
            exit_code_for(&e)
        }
    }
}

fn formatter(args: &FormatArgs) -> OutputFormatter {
    OutputFormatter::new(OutputFormat::from(args.format))
}

fn print(output: String) {
    if output.ends_with('\n') {
        print!("{}", output);
    } else {
        println!("{}", output);
    }
}

fn generate_params(config: &ModeldConfig, args: &SamplingArgs) -> GenerateParams {
    let mut params = GenerateParams::from_config(config);
    if let Some(max_tokens) = args.max_tokens {
        params.max_tokens = max_tokens;
    }
    if let Some(temperature) = args.temperature {
        params.temperature = temperature;
    }
    if let Some(top_p) = args.top_p {
        params.top_p = top_p;
    }
    params
}

pub async fn handle_capability(agent: &Agent, args: &CapabilityArgs) -> i32 {
    let result = async {
        let formatter = formatter(&args.output);
        let output = if args.refresh {
            formatter.format_profile(&agent.refresh_capability().await)?
        } else {
            formatter.format_capability(&*agent.detect_capability(false).await)?
        };
        print(output);
        Ok::<_, anyhow::Error>(())
    }
    .await;
    finish("capability", result)
}

pub async fn handle_policy(agent: &Agent, args: &FormatArgs) -> i32 {
    let result = async {
        let policy = agent.current_policy().await;
        print(formatter(args).format_policy(&policy)?);
        Ok::<_, anyhow::Error>(())
    }
    .await;
    finish("policy", result)
}

pub async fn handle_models(agent: &Agent, command: &ModelsCommand) -> i32 {
    let result = match command {
        ModelsCommand::List(args) => formatter(args)
            .format_models(&agent.list_models())
            .map(print),
        ModelsCommand::Show(args) => show_model(agent, args),
        ModelsCommand::Active(args) => match agent.active_model() {
            Some(record) => formatter(args).format_model(&record).map(print),
            None => Err(AgentError::NoActiveModel.into()),
        },
        ModelsCommand::Activate(args) => activate(agent, &args.id),
        ModelsCommand::Remove(args) => remove(agent, &args.id).await,
        ModelsCommand::Register(args) => register(agent, args),
        ModelsCommand::AddCloud(args) => add_cloud(agent, args),
    };
    finish("models", result)
}

fn show_model(agent: &Agent, args: &ModelIdArgs) -> Result<()> {
    let record = agent.get_model(&args.id)?;
    print(formatter(&args.output).format_model(&record)?);
    Ok(())
}

fn activate(agent: &Agent, id: &str) -> Result<()> {
    if !agent.set_active_model(id)? {
        return Err(AgentError::NotFound(id.to_string()).into());
    }
    println!("\u{2713} {} is now the active model", id);
    Ok(())
}

async fn remove(agent: &Agent, id: &str) -> Result<()> {
    if !agent.remove_model(id).await? {
        return Err(AgentError::NotFound(id.to_string()).into());
    }
    println!("\u{2713} Removed {}", id);
    Ok(())
}

fn register(agent: &Agent, args: &RegisterArgs) -> Result<()> {
    let path = args
        .path
        .canonicalize()
        .with_context(|| format!("Cannot read {}", args.path.display()))?;
    let size_mb = std::fs::metadata(&path)?.len() as f64 / (1024.0 * 1024.0);

    let mut record = ModelRecord::local(&args.id, args.name.as_deref().unwrap_or(&args.id), &path)
        .with_size_mb(size_mb);
    if args.base {
        record = record.base();
    }
    if args.system_intent {
        record = record.with_purpose(ModelPurpose::SystemIntent);
    }

    let stored = agent.register_model(record)?;
    if stored.location != path.display().to_string() {
        warn!(model_id = %stored.id, "Id already registered, keeping the existing record");
    }
    println!("\u{2713} Registered {} ({})", stored.id, stored.location);
    Ok(())
}

fn add_cloud(agent: &Agent, args: &AddCloudArgs) -> Result<()> {
    let name = args.name.as_deref().unwrap_or(&args.id);
    let record = agent.add_cloud_model(&args.id, name, &args.provider, args.model_name.as_deref())?;
    println!(
        "\u{2713} Registered {} via {} (model {})",
        record.id,
        args.provider,
        record.cloud_model_name()
    );
    Ok(())
}

fn progress_bar(quiet: bool) -> ProgressBar {
    if quiet {
        return ProgressBar::hidden();
    }
    let bar = ProgressBar::new(0);
    let style = ProgressStyle::with_template(
        "{msg:20} [{bar:40.cyan/blue}] {percent:>3}% {prefix}",
    )
    .unwrap_or_else(|_| ProgressStyle::default_bar())
    .progress_chars("=> ");
    bar.set_style(style);
    bar
}

fn update_bar(bar: &ProgressBar, event: &ProgressEvent) {
    if event.bytes_total > 0 {
        bar.set_length(event.bytes_total);
        bar.set_position(event.bytes_downloaded.min(event.bytes_total));
    }
    bar.set_message(event.model_id.clone());
    bar.set_prefix(format!("{}  ETA {}", event.speed, event.eta));
}

pub async fn handle_pull(agent: &Agent, args: &PullArgs, quiet: bool) -> i32 {
    let result = pull(agent, args, quiet).await;
    finish("pull", result)
}

async fn pull(agent: &Agent, args: &PullArgs, quiet: bool) -> Result<()> {
    let formatter = formatter(&args.output);
    let options = PullOptions {
        locator: args.locator.clone(),
        model_id: args.id.clone(),
        name: args.name.clone(),
        token: args.token.clone(),
    };

    let mut events = agent.pull_model_stream(options).await?;
    let bar = progress_bar(quiet || !formatter.is_human());
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut cancel_sent = false;
    let mut current: Option<String> = None;

    let terminal = loop {
        tokio::select! {
            event = events.next() => {
                let Some(event) = event else {
                    break None;
                };
                current.get_or_insert_with(|| event.model_id.clone());
                if event.status.is_terminal() {
                    break Some(event);
                }
                update_bar(&bar, &event);
            }
            _ = &mut ctrl_c, if !cancel_sent => {
                cancel_sent = true;
                if let Some(id) = &current {
                    info!(model_id = %id, "Cancelling download");
                    agent.cancel_pull(id);
                }
                bar.set_prefix("cancelling...");
            }
        }
    };
    bar.finish_and_clear();

    let event = terminal.ok_or_else(|| anyhow!("Download ended without a result"))?;
    match event.status {
        FetchStatus::Complete => {
            let record = event
                .record
                .ok_or_else(|| anyhow!("Download finished without a registered model"))?;
            if args.activate {
                agent.set_active_model(&record.id)?;
            }
            if formatter.is_human() {
                println!("\u{2713} Downloaded {} ({})", record.id, record.location);
            } else {
                print(formatter.format_model(&record)?);
            }
            Ok(())
        }
        FetchStatus::Cancelled => {
            eprintln!("Download cancelled; run the same command again to resume.");
            Err(AgentError::Cancelled(event.model_id).into())
        }
        _ => bail!(event.error.unwrap_or_else(|| "Download failed".to_string())),
    }
}

pub async fn handle_generate(agent: &Agent, args: &GenerateArgs) -> i32 {
    let result = generate(agent, args).await;
    finish("generate", result)
}

async fn generate(agent: &Agent, args: &GenerateArgs) -> Result<()> {
    let params = generate_params(agent.config(), &args.sampling);
    let formatter = formatter(&args.output);

    if !args.stream {
        let result = agent.generate(args.model.as_deref(), &args.prompt, &params).await?;
        print(formatter.format_generation(&result)?);
        return Ok(());
    }

    let mut chunks = agent
        .generate_stream(args.model.as_deref(), &args.prompt, &params)
        .await?;
    let mut stdout = std::io::stdout();
    while let Some(chunk) = chunks.next().await {
        let chunk = chunk?;
        if chunk.done {
            println!();
            if let Some(metrics) = chunk.metrics {
                eprint!("{}", formatter.format_metrics(&metrics)?);
            }
            break;
        }
        write!(stdout, "{}", chunk.text)?;
        stdout.flush()?;
    }
    Ok(())
}

pub async fn handle_compare(agent: &Agent, args: &CompareArgs) -> i32 {
    let result = async {
        let params = generate_params(agent.config(), &args.sampling);
        let entries = agent.compare(&args.models, &args.prompt, &params).await?;
        print(formatter(&args.output).format_comparison(&entries)?);
        Ok::<_, anyhow::Error>(())
    }
    .await;
    finish("compare", result)
}

pub async fn handle_recommend(agent: &Agent, args: &RecommendArgs) -> i32 {
    let result = async {
        let recommendations = agent.recommend(args.query.as_deref().unwrap_or("")).await;
        print(formatter(&args.output).format_recommendations(&recommendations)?);
        Ok::<_, anyhow::Error>(())
    }
    .await;
    finish("recommend", result)
}

pub async fn handle_validate_key(agent: &Agent, args: &ValidateKeyArgs) -> i32 {
    let result = async {
        if agent.validate_cloud_key(&args.provider, &args.key).await? {
            println!("\u{2713} {} accepted the key", args.provider);
            Ok::<_, anyhow::Error>(())
        } else {
            Err(AgentError::InvalidApiKey {
                provider: args.provider.clone(),
            }
            .into())
        }
    }
    .await;
    finish("validate-key", result)
}

pub fn handle_config(config: &ModeldConfig, args: &FormatArgs) -> i32 {
    let result = formatter(args).format_config(config).map(print);
    finish("config", result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(exit_code_for(&AgentError::NotFound("x".into()).into()), EXIT_NOT_FOUND);
        assert_eq!(exit_code_for(&AgentError::NoActiveModel.into()), EXIT_NOT_FOUND);
        assert_eq!(exit_code_for(&AgentError::Cancelled("x".into()).into()), EXIT_CANCELLED);
        assert_eq!(exit_code_for(&anyhow!("boom")), EXIT_FAILURE);
    }

    #[test]
    fn test_exit_code_survives_context() {
        let err = anyhow::Error::from(AgentError::NotFound("x".into())).context("while showing");
        assert_eq!(exit_code_for(&err), EXIT_NOT_FOUND);
    }

    #[test]
    fn test_sampling_overrides() {
        let config = ModeldConfig::default();
        let params = generate_params(
            &config,
            &SamplingArgs {
                max_tokens: Some(32),
                temperature: None,
                top_p: Some(0.5),
            },
        );
        assert_eq!(params.max_tokens, 32);
        assert_eq!(params.temperature, config.temperature);
        assert_eq!(params.top_p, 0.5);
    }
}

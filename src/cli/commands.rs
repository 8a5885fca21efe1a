use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Hardware-aware local inference agent
#[derive(Parser, Debug)]
#[command(
    name = "modeld",
    about = "Hardware-aware local inference agent",
    version,
    author,
    long_about = "modeld probes the machine, picks an execution policy for local quantized \
                  models, manages downloaded GGUF artifacts and routes prompts to a local \
                  model or a cloud provider (OpenAI, Anthropic, Google, DeepSeek)."
)]
pub struct CliArgs {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(long, global = true, value_name = "LEVEL", help = "Set logging level")]
    pub log_level: Option<String>,

    #[arg(short = 'v', long, global = true, help = "Enable debug logging")]
    pub verbose: bool,

    #[arg(
        short = 'q',
        long,
        global = true,
        conflicts_with = "verbose",
        help = "Quiet mode - suppress non-error output"
    )]
    pub quiet: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    #[command(
        about = "Show detected hardware",
        long_about = "Prints the cached hardware capability snapshot.\n\n\
                      Examples:\n  \
                      modeld capability\n  \
                      modeld capability --refresh --format json"
    )]
    Capability(CapabilityArgs),

    #[command(about = "Show the execution policy for this machine")]
    Policy(FormatArgs),

    /// Manage registered models
    #[command(subcommand)]
    Models(ModelsCommand),

    #[command(
        about = "Download a GGUF model",
        long_about = "Downloads a model from the hub and registers it. LOCATOR is a catalog id, \
                      owner/repo/file.gguf, owner/repo (single .gguf repos) or a repository URL. \
                      Press Ctrl-C to cancel; the partial file is kept for a later resume.\n\n\
                      Examples:\n  \
                      modeld pull phi3\n  \
                      modeld pull TheBloke/Llama-2-7B-GGUF/llama-2-7b.Q4_K_M.gguf --id llama2"
    )]
    Pull(PullArgs),

    #[command(
        about = "Generate text",
        long_about = "Runs a prompt on the given model, or on the active model.\n\n\
                      Examples:\n  \
                      modeld generate \"Explain RAII\"\n  \
                      modeld generate --model gpt --stream \"Write a haiku\""
    )]
    Generate(GenerateArgs),

    #[command(about = "Run one prompt on several models")]
    Compare(CompareArgs),

    #[command(about = "Suggest catalog models for this machine")]
    Recommend(RecommendArgs),

    #[command(about = "Check a cloud provider API key without storing it")]
    ValidateKey(ValidateKeyArgs),

    #[command(about = "Show effective configuration")]
    Config(FormatArgs),
}

#[derive(Subcommand, Debug)]
pub enum ModelsCommand {
    #[command(about = "List registered models")]
    List(FormatArgs),

    #[command(about = "Show one model")]
    Show(ModelIdArgs),

    #[command(about = "Show the active model")]
    Active(FormatArgs),

    #[command(about = "Make a model the active one")]
    Activate(ModelIdArgs),

    #[command(about = "Delete a model and its files")]
    Remove(ModelIdArgs),

    #[command(about = "Register a GGUF file already on disk")]
    Register(RegisterArgs),

    #[command(about = "Register a cloud provider model")]
    AddCloud(AddCloudArgs),
}

#[derive(Args, Debug, Clone)]
pub struct FormatArgs {
    #[arg(short = 'f', long, value_enum, default_value = "human", help = "Output format")]
    pub format: OutputFormatArg,
}

#[derive(Args, Debug, Clone)]
pub struct CapabilityArgs {
    #[arg(long, help = "Probe again instead of using the cached snapshot")]
    pub refresh: bool,

    #[command(flatten)]
    pub output: FormatArgs,
}

#[derive(Args, Debug, Clone)]
pub struct ModelIdArgs {
    #[arg(value_name = "ID")]
    pub id: String,

    #[command(flatten)]
    pub output: FormatArgs,
}

#[derive(Args, Debug, Clone)]
pub struct RegisterArgs {
    #[arg(value_name = "ID")]
    pub id: String,

    #[arg(value_name = "PATH", help = "Path to the .gguf file")]
    pub path: PathBuf,

    #[arg(long, help = "Display name (defaults to the id)")]
    pub name: Option<String>,

    #[arg(long, help = "Protect the model from removal")]
    pub base: bool,

    #[arg(long, help = "Reserve the model for internal intent detection")]
    pub system_intent: bool,
}

#[derive(Args, Debug, Clone)]
pub struct AddCloudArgs {
    #[arg(value_name = "ID")]
    pub id: String,

    #[arg(value_name = "PROVIDER", help = "openai, anthropic, google or deepseek")]
    pub provider: String,

    #[arg(long, help = "Display name (defaults to the id)")]
    pub name: Option<String>,

    #[arg(long = "model-name", help = "Model name sent to the provider API")]
    pub model_name: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct PullArgs {
    #[arg(value_name = "LOCATOR")]
    pub locator: String,

    #[arg(long, help = "Model id (defaults to the lowercased file stem)")]
    pub id: Option<String>,

    #[arg(long, help = "Display name (defaults to the repository name)")]
    pub name: Option<String>,

    #[arg(long, help = "Hub token (defaults to HF_TOKEN)")]
    pub token: Option<String>,

    #[arg(long, help = "Make the model active once downloaded")]
    pub activate: bool,

    #[command(flatten)]
    pub output: FormatArgs,
}

#[derive(Args, Debug, Clone, Default)]
pub struct SamplingArgs {
    #[arg(long, value_name = "N", help = "Maximum tokens to generate")]
    pub max_tokens: Option<usize>,

    #[arg(long, help = "Sampling temperature, 0 for greedy")]
    pub temperature: Option<f64>,

    #[arg(long, help = "Nucleus sampling threshold")]
    pub top_p: Option<f64>,
}

#[derive(Args, Debug, Clone)]
pub struct GenerateArgs {
    #[arg(value_name = "PROMPT")]
    pub prompt: String,

    #[arg(short = 'm', long, value_name = "ID", help = "Model id (defaults to the active model)")]
    pub model: Option<String>,

    #[command(flatten)]
    pub sampling: SamplingArgs,

    #[arg(long, help = "Print tokens as they are generated")]
    pub stream: bool,

    #[command(flatten)]
    pub output: FormatArgs,
}

#[derive(Args, Debug, Clone)]
pub struct CompareArgs {
    #[arg(value_name = "PROMPT")]
    pub prompt: String,

    #[arg(
        short = 'm',
        long = "model",
        value_name = "ID",
        required = true,
        num_args = 1,
        help = "Model to include (repeat at least twice)"
    )]
    pub models: Vec<String>,

    #[command(flatten)]
    pub sampling: SamplingArgs,

    #[command(flatten)]
    pub output: FormatArgs,
}

#[derive(Args, Debug, Clone)]
pub struct RecommendArgs {
    #[arg(value_name = "QUERY", help = "A model name or task, e.g. \"coding\"")]
    pub query: Option<String>,

    #[command(flatten)]
    pub output: FormatArgs,
}

#[derive(Args, Debug, Clone)]
pub struct ValidateKeyArgs {
    #[arg(value_name = "PROVIDER")]
    pub provider: String,

    #[arg(value_name = "KEY")]
    pub key: String,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormatArg {
    Json,
    Yaml,
    Human,
}

impl From<OutputFormatArg> for super::output::OutputFormat {
    fn from(arg: OutputFormatArg) -> Self {
        match arg {
            OutputFormatArg::Json => super::output::OutputFormat::Json,
            OutputFormatArg::Yaml => super::output::OutputFormat::Yaml,
            OutputFormatArg::Human => super::output::OutputFormat::Human,
        }
    }
}

use clap::{Parser, Subcommand};

/// Iterative generate-and-review pipeline for LLM-written code
#[derive(Parser, Debug, Clone)]
#[command(name = "revloop", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: CliCommand,

    /// Path to config file (default: ./revloop.toml when present)
    #[arg(long, global = true)]
    pub config: Option<String>,

    /// Maximum generate/review iterations per request
    #[arg(long, global = true, value_parser = clap::value_parser!(u32).range(1..))]
    pub max_iterations: Option<u32>,

    /// Generation stage timeout in milliseconds
    #[arg(long, global = true, value_parser = clap::value_parser!(u64).range(1..))]
    pub generation_timeout_ms: Option<u64>,

    /// Review stage timeout in milliseconds
    #[arg(long, global = true, value_parser = clap::value_parser!(u64).range(1..))]
    pub review_timeout_ms: Option<u64>,

    /// Directory where pipeline results are written as JSON
    #[arg(long, global = true)]
    pub results_dir: Option<String>,

    /// Directory with prompt template overrides (<name>.md)
    #[arg(long, global = true)]
    pub prompts_dir: Option<String>,

    /// Model for the generator backend
    #[arg(long, global = true)]
    pub generator_model: Option<String>,

    /// Model for the reviewer backend
    #[arg(long, global = true)]
    pub reviewer_model: Option<String>,

    /// Do not write the pipeline result to the results directory
    #[arg(long, global = true)]
    pub no_persist: bool,

    /// Keep debug-level entries in the audit log
    #[arg(long, global = true)]
    pub debug_log: bool,
}

#[derive(Subcommand, Debug, Clone)]
pub enum CliCommand {
    /// Generate code for a prompt, reviewing and revising until approved
    Run {
        /// What to build
        prompt: String,

        /// Request id (generated when omitted)
        #[arg(long)]
        request_id: Option<String>,
    },

    /// Review an existing file once, without generating
    Review {
        /// File containing the code to review
        file: String,

        /// The request the code was written for
        #[arg(long, default_value = "Review the provided code.")]
        prompt: String,

        /// Request id (generated when omitted)
        #[arg(long)]
        request_id: Option<String>,
    },
}

use clap::Parser;
use serde::Serialize;
use tracing::info;
use tracing_subscriber::EnvFilter;

use revloop::audit::AuditLogger;
use revloop::cli::{Cli, CliCommand};
use revloop::completion::build_completion;
use revloop::config::Config;
use revloop::orchestrator::Orchestrator;
use revloop::pipeline::{PipelineRequest, PipelineStatus};
use revloop::prompts::PromptEngine;
use revloop::store::{DiscardStore, JsonFileStore, ResultStore};
use revloop::verdict::Verdict;

fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging();

    let config = match Config::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("error: {e}");
            std::process::exit(1);
        }
    };

    info!(?config, "config loaded");

    let code = if config.persist {
        execute(&cli, &config, JsonFileStore::new(&config.results_dir)).await
    } else {
        execute(&cli, &config, DiscardStore).await
    };
    std::process::exit(code);
}

/// Run the selected subcommand and return the process exit code.
async fn execute<S: ResultStore>(cli: &Cli, config: &Config, store: S) -> i32 {
    let prompts = match PromptEngine::new(config.prompts_dir.as_deref()) {
        Ok(p) => p,
        Err(e) => {
            eprintln!("error: {e}");
            return 1;
        }
    };
    let logger = AuditLogger::new(config.max_log_buffer_size).with_debug(config.debug_log);
    let orchestrator = Orchestrator::new(
        build_completion(&config.generator),
        build_completion(&config.reviewer),
        store,
        prompts,
        logger,
        config.pipeline_settings(),
    );

    match &cli.command {
        CliCommand::Run { prompt, request_id } => {
            let request = match request_id {
                Some(id) => PipelineRequest::with_id(id.as_str(), prompt.as_str()),
                None => PipelineRequest::new(prompt.as_str()),
            };
            let result = orchestrator.run(request).await;
            if !print_json(&result) {
                return 1;
            }
            match result.status {
                PipelineStatus::Success => 0,
                PipelineStatus::Partial => 2,
                PipelineStatus::Failed => 1,
            }
        }
        CliCommand::Review {
            file,
            prompt,
            request_id,
        } => {
            let code = match std::fs::read_to_string(file) {
                Ok(c) => c,
                Err(e) => {
                    eprintln!("error: failed to read {file}: {e}");
                    return 1;
                }
            };
            let request_id = request_id
                .clone()
                .unwrap_or_else(|| PipelineRequest::new(prompt.as_str()).request_id);
            let reviewed = orchestrator
                .run_review_only(&request_id, prompt, &code)
                .await;
            if !print_json(&reviewed) {
                return 1;
            }
            if reviewed.verdict == Verdict::Approve {
                0
            } else {
                2
            }
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> bool {
    match serde_json::to_string_pretty(value) {
        Ok(json) => {
            println!("{json}");
            true
        }
        Err(e) => {
            eprintln!("error: failed to serialize output: {e}");
            false
        }
    }
}

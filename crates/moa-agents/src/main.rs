use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use coordination::events::notification_channel;
use coordination::hooks::{BuiltinHook, HookPipeline};
use tokio::io::BufReader;
use tokio_util::sync::CancellationToken;
use tracing::info;

use moa_agents::command::ParsedCommand;
use moa_agents::{config, report, telemetry, Gateway, MoaService};

/// Mixture-of-agents consensus with hook processing
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to a TOML config file (overrides MOA_CONFIG)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Default log level when RUST_LOG is unset
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Emit logs as JSON
    #[arg(long, global = true, default_value_t = false)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Answer one prompt, e.g. `ask review the auth module --agents=analyst,coder`
    Ask {
        /// Prompt words and `--agents=`, `--threshold=`, `--session=` flags
        #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
        words: Vec<String>,

        /// Print the full outcome as JSON
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Serve the JSON gateway on stdin/stdout
    Serve,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    telemetry::init_tracing(&args.log_level, args.log_json)?;

    let config = config::load(args.config.as_deref())?;
    let (notifier, receiver) = notification_channel(config.notifications.capacity);

    let pipeline = HookPipeline::new(config.hooks.clone())
        .with_notifier(notifier.clone())
        .shared();
    BuiltinHook::register_all(pipeline.registry()).context("Failed to register built-in hooks")?;
    pipeline.start_sweeper();

    let service = Arc::new(MoaService::from_config(&config, pipeline.clone()).with_notifier(notifier));

    match args.command {
        Command::Ask { words, json } => {
            let request = ParsedCommand::from_tokens("ask", words)
                .to_request()
                .context("Invalid ask arguments")?;
            let outcome = service.process(request).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&outcome)?);
            } else {
                print!("{}", report::render_outcome(&outcome));
            }
        }
        Command::Serve => {
            let shutdown = CancellationToken::new();
            let on_signal = shutdown.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("Interrupt received");
                    on_signal.cancel();
                }
            });

            let gateway = Gateway::new(service);
            gateway
                .serve(
                    BufReader::new(tokio::io::stdin()),
                    tokio::io::stdout(),
                    Some(receiver),
                    shutdown,
                )
                .await
                .context("Gateway I/O failed")?;
        }
    }

    pipeline.shutdown().await;
    Ok(())
}

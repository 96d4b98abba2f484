//! mcporter - MCP tool runtime CLI

use clap::Parser;
use colored::Colorize;
use mcporter_cli::registry::{adhoc_http_definition, adhoc_stdio_definition, definitions_from_config};
use mcporter_cli::{handle_auth, handle_call, handle_list, Cli, CliError, Commands};
use mcporter_config::resolve_config;
use mcporter_mcp_client::{BackendDefinition, DefaultConnector, McpRuntime, ToolRuntime};
use mcporter_telemetry::{init_subscriber, TelemetryConfig};
use std::sync::Arc;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_subscriber(
        &TelemetryConfig::default()
            .with_level(cli.log_level.clone())
            .with_json_output(cli.log_json),
    );

    if let Err(e) = run(cli).await {
        eprintln!("{}: {}", "Error".red().bold(), e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let definitions = load_definitions(&cli)?;
    tracing::debug!(count = definitions.len(), "loaded MCP server definitions");

    let runtime: Arc<dyn ToolRuntime> = Arc::new(McpRuntime::new(
        definitions,
        Arc::new(DefaultConnector::default()),
    ));

    let mut stdout = std::io::stdout();
    let result = match &cli.command {
        Commands::Call { args } => handle_call(runtime.clone(), args, &mut stdout).await,
        Commands::List { server } => handle_list(runtime.as_ref(), server.as_deref(), &mut stdout).await,
        Commands::Auth { target } => handle_auth(runtime.as_ref(), target, &mut stdout).await,
    };

    // Child servers must not outlive the CLI, whatever the outcome.
    runtime.close(None).await;
    result
}

fn load_definitions(cli: &Cli) -> Result<Vec<BackendDefinition>, CliError> {
    let cwd = std::env::current_dir()?;
    let mut definitions = match resolve_config(cli.config.as_deref(), &cwd)? {
        Some(resolved) => {
            tracing::debug!(path = %resolved.path.display(), "using config file");
            definitions_from_config(&resolved)?
        }
        None => Vec::new(),
    };

    let name = cli.name.as_deref();
    if let Some(command_line) = &cli.stdio {
        definitions.push(adhoc_stdio_definition(command_line, name, cli.adhoc_env())?);
    } else if let Some(url) = &cli.http_url {
        definitions.push(adhoc_http_definition(url, name));
    }

    Ok(definitions)
}

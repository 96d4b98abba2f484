//! Command handlers. Each one writes its user-facing output to `out` and
//! leaves closing the runtime to the caller.

use crate::call_args::{is_url, parse_call_arguments, resolve_call_timeout};
use crate::error::CliError;
use crate::output::print_call_output;
use crate::registry::adhoc_http_definition;
use colored::Colorize;
use mcporter_mcp_client::{AuthRetrier, CallError, CommandSpec, ToolInfo, ToolInvoker, ToolRuntime};
use serde_json::Value;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

pub async fn handle_call(
    runtime: Arc<dyn ToolRuntime>,
    tokens: &[String],
    out: &mut dyn Write,
) -> Result<(), CliError> {
    let parsed = parse_call_arguments(tokens)?;
    let server = resolve_server(runtime.as_ref(), &parsed.selector).await?;
    let timeout_ms = parsed.timeout_ms.unwrap_or_else(resolve_call_timeout);

    tracing::debug!(server = %server, tool = %parsed.tool, timeout_ms, "calling tool");

    let invoker = ToolInvoker::new(runtime).with_timeout(Duration::from_millis(timeout_ms));
    let outcome = invoker
        .invoke(&server, &parsed.tool, Value::Object(parsed.args))
        .await?;

    if let Some(correction) = &outcome.correction {
        writeln!(out, "{}", correction.notice().dimmed())?;
    }
    print_call_output(out, &outcome.result, parsed.output.unwrap_or_default())?;
    Ok(())
}

pub async fn handle_list(
    runtime: &dyn ToolRuntime,
    server: Option<&str>,
    out: &mut dyn Write,
) -> Result<(), CliError> {
    let Some(selector) = server else {
        let definitions = runtime.definitions().await;
        if definitions.is_empty() {
            writeln!(out, "No MCP servers configured.")?;
            return Ok(());
        }
        for definition in definitions {
            write!(out, "{}  {}", definition.name.bold(), format!("({})", definition.source_label()).dimmed())?;
            if let Some(description) = &definition.description {
                write!(out, "  {description}")?;
            }
            writeln!(out)?;
        }
        return Ok(());
    };

    let server = resolve_server(runtime, selector).await?;
    let tools = list_with_auth(runtime, &server).await?;
    if tools.is_empty() {
        writeln!(out, "{server} exposes no tools.")?;
    }
    for tool in tools {
        let name = format!("{server}.{}", tool.name);
        match tool.description.as_deref().map(first_line) {
            Some(description) if !description.is_empty() => {
                writeln!(out, "{}  {}", name.bold(), description)?
            }
            _ => writeln!(out, "{}", name.bold())?,
        }
    }
    Ok(())
}

pub async fn handle_auth(
    runtime: &dyn ToolRuntime,
    target: &str,
    out: &mut dyn Write,
) -> Result<(), CliError> {
    let server = resolve_server(runtime, target).await?;
    let tools = list_with_auth(runtime, &server).await?;
    writeln!(
        out,
        "{} Authorized '{}' ({} tools available).",
        "✓".green(),
        server,
        tools.len()
    )?;
    Ok(())
}

async fn list_with_auth(runtime: &dyn ToolRuntime, server: &str) -> Result<Vec<ToolInfo>, CallError> {
    AuthRetrier::new(runtime, server)
        .run(move || async move { runtime.list_tools(server).await.map_err(CallError::from) })
        .await
}

/// Maps a selector to a registered backend name. A URL matches an existing
/// HTTP definition with that URL, or is registered ad hoc.
async fn resolve_server(runtime: &dyn ToolRuntime, selector: &str) -> Result<String, CliError> {
    if is_url(selector) {
        let existing = runtime.definitions().await.into_iter().find(|definition| {
            matches!(&definition.command, CommandSpec::Http { url, .. } if url == selector)
        });
        if let Some(definition) = existing {
            return Ok(definition.name);
        }

        let definition = adhoc_http_definition(selector, None);
        let name = definition.name.clone();
        tracing::debug!(server = %name, url = %selector, "registering ad-hoc HTTP server");
        runtime.register_definition(definition).await;
        return Ok(name);
    }

    match runtime.definition(selector).await {
        Some(definition) => Ok(definition.name),
        None => Err(CliError::UnknownServer(selector.to_string())),
    }
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or_default().trim()
}

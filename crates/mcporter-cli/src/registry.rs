//! Building backend definitions from config entries and ad-hoc flags.

use crate::error::CliError;
use mcporter_config::{ResolvedConfig, ServerEntry, ServerKind};
use mcporter_mcp_client::{BackendDefinition, CommandSpec, SourceSpec};
use std::collections::HashMap;
use std::path::PathBuf;

pub fn definitions_from_config(resolved: &ResolvedConfig) -> Result<Vec<BackendDefinition>, CliError> {
    let source = SourceSpec::Config {
        path: resolved.path.clone(),
    };

    resolved
        .config
        .mcp_servers
        .iter()
        .map(|(name, entry)| definition_from_entry(name, entry, source.clone()))
        .collect()
}

pub fn definition_from_entry(
    name: &str,
    entry: &ServerEntry,
    source: SourceSpec,
) -> Result<BackendDefinition, CliError> {
    let invalid = |message: &str| CliError::InvalidDefinition {
        name: name.to_string(),
        message: message.to_string(),
    };

    let mut definition = match (entry.kind(), &entry.url, &entry.command) {
        (Some(ServerKind::Http), Some(url), _) => BackendDefinition {
            name: name.to_string(),
            command: CommandSpec::Http {
                url: url.clone(),
                headers: entry.headers.clone(),
            },
            source,
            description: None,
        },
        (Some(ServerKind::Stdio), _, Some(command)) if entry.args.is_empty() => {
            BackendDefinition::stdio_from_command_line(name, command, entry.env.clone(), source)
                .map_err(|message| invalid(&message))?
        }
        (Some(ServerKind::Stdio), _, Some(command)) => BackendDefinition::stdio(
            name,
            command.clone(),
            entry.args.clone(),
            entry.env.clone(),
            source,
        ),
        _ => return Err(invalid("either `command` or `url` is required")),
    };

    if let CommandSpec::Stdio { cwd, .. } = &mut definition.command {
        *cwd = entry.cwd.as_ref().map(PathBuf::from);
    }
    definition.description = entry.description.clone();
    Ok(definition)
}

/// A stdio definition from `--stdio "<command line>"`.
pub fn adhoc_stdio_definition(
    command_line: &str,
    name: Option<&str>,
    env: HashMap<String, String>,
) -> Result<BackendDefinition, CliError> {
    let name = name
        .map(str::to_string)
        .unwrap_or_else(|| name_from_command_line(command_line));
    BackendDefinition::stdio_from_command_line(name.clone(), command_line, env, SourceSpec::Adhoc)
        .map_err(|message| CliError::InvalidDefinition { name, message })
}

/// An HTTP definition from `--http-url` or a URL given where a server name
/// was expected.
pub fn adhoc_http_definition(url: &str, name: Option<&str>) -> BackendDefinition {
    let name = name
        .map(str::to_string)
        .unwrap_or_else(|| name_from_url(url));
    BackendDefinition::http(name, url, SourceSpec::Adhoc)
}

/// `https://mcp.linear.app/mcp` becomes `mcp-linear-app`. Dots are replaced
/// so the name survives `server.tool` selectors.
pub fn name_from_url(url: &str) -> String {
    let without_scheme = url.split_once("://").map_or(url, |(_, rest)| rest);
    let authority = without_scheme.split(['/', '?', '#']).next().unwrap_or_default();
    let host = authority.rsplit('@').next().unwrap_or(authority);
    let host = host.split(':').next().unwrap_or(host);
    sanitize(host)
}

/// `npx -y chrome-devtools-mcp@latest` becomes `chrome-devtools-mcp`.
pub fn name_from_command_line(command_line: &str) -> String {
    let parts = shlex::split(command_line).unwrap_or_default();
    let candidate = parts
        .iter()
        .rev()
        .find(|part| !part.starts_with('-'))
        .map(String::as_str)
        .unwrap_or("adhoc");

    let base = candidate.rsplit('/').next().unwrap_or(candidate);
    // Strip an npm version suffix, keeping a leading scope `@`.
    let base = match base.char_indices().skip(1).find(|(_, c)| *c == '@') {
        Some((index, _)) => &base[..index],
        None => base,
    };
    let base = base.trim_start_matches('@');
    let base = base.strip_suffix(".js").unwrap_or(base);
    sanitize(base)
}

fn sanitize(raw: &str) -> String {
    let name: String = raw
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '-' })
        .collect();
    let name = name.trim_matches('-').to_ascii_lowercase();
    if name.is_empty() {
        "adhoc".to_string()
    } else {
        name
    }
}

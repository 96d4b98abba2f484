use crate::schema::{McporterConfig, ServerEntry};
use anyhow::{anyhow, Context, Result};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Jsonc,
    Json,
    Yaml,
}

impl ConfigFormat {
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?;

        match ext {
            "jsonc" => Some(Self::Jsonc),
            "json" => Some(Self::Json),
            "yml" | "yaml" => Some(Self::Yaml),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub config: McporterConfig,
    pub path: PathBuf,
    pub format: ConfigFormat,
}

/// Loads the explicit `config_path`, or the first config file found from
/// `cwd`. No file at all is not an error: callers start with an empty
/// registry.
pub fn resolve_config(config_path: Option<&Path>, cwd: &Path) -> Result<Option<ResolvedConfig>> {
    if let Some(path) = config_path {
        if !path.exists() {
            return Err(anyhow!("Config file not found: {}", path.display()));
        }
        return load_config_from_file(path).map(Some);
    }

    find_config_file(cwd)
        .map(|path| load_config_from_file(&path))
        .transpose()
}

pub fn load_config(config_path: Option<&Path>, cwd: &Path) -> Result<McporterConfig> {
    Ok(resolve_config(config_path, cwd)?
        .map(|resolved| resolved.config)
        .unwrap_or_default())
}

pub fn load_config_from_file(path: &Path) -> Result<ResolvedConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let format = ConfigFormat::from_path(path)
        .ok_or_else(|| anyhow!("Unknown config format for: {}", path.display()))?;

    let config = parse_config_content(&content, format)
        .with_context(|| format!("Invalid config file: {}", path.display()))?;

    Ok(ResolvedConfig {
        config: expand_env_vars(config),
        path: path.to_path_buf(),
        format,
    })
}

fn parse_config_content(content: &str, format: ConfigFormat) -> Result<McporterConfig> {
    match format {
        ConfigFormat::Jsonc => json5::from_str(content).context("Failed to parse JSONC"),
        ConfigFormat::Json => serde_json::from_str(content).context("Failed to parse JSON"),
        ConfigFormat::Yaml => serde_yaml_ng::from_str(content).context("Failed to parse YAML"),
    }
}

const CONFIG_CANDIDATES: &[&str] = &[
    "mcporter.jsonc",
    "mcporter.json",
    "mcporter.yml",
    "mcporter.yaml",
];

fn search_dirs(cwd: &Path) -> Vec<PathBuf> {
    let mut candidates = vec![cwd.to_path_buf(), cwd.join("config")];
    if let Some(home) = dirs::home_dir() {
        candidates.push(home.join(".config").join("mcporter"));
    }
    candidates
}

pub fn find_config_file(cwd: &Path) -> Option<PathBuf> {
    find_all_config_files(cwd).into_iter().next()
}

/// Every existing candidate, highest priority first.
pub fn find_all_config_files(cwd: &Path) -> Vec<PathBuf> {
    search_dirs(cwd)
        .iter()
        .flat_map(|dir| CONFIG_CANDIDATES.iter().map(move |name| dir.join(name)))
        .filter(|path| path.is_file())
        .collect()
}

fn expand_env_vars(mut config: McporterConfig) -> McporterConfig {
    for server in config.mcp_servers.values_mut() {
        expand_server_entry(server);
    }
    config
}

fn expand_server_entry(server: &mut ServerEntry) {
    if let Some(command) = &server.command {
        server.command = Some(expand_env_string(command));
    }
    server.args = server
        .args
        .iter()
        .map(|arg| expand_env_string(arg))
        .collect();
    for value in server.env.values_mut() {
        *value = expand_env_string(value);
    }
    if let Some(cwd) = &server.cwd {
        server.cwd = Some(expand_env_string(cwd));
    }
    if let Some(url) = &server.url {
        server.url = Some(expand_env_string(url));
    }
    for value in server.headers.values_mut() {
        *value = expand_env_string(value);
    }
}

fn expand_env_string(s: &str) -> String {
    let mut result = String::new();
    let mut chars = s.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' {
            if chars.peek() == Some(&'{') {
                // ${VAR} syntax
                chars.next(); // consume '{'
                let var_name: String = chars.by_ref().take_while(|&c| c != '}').collect();
                if let Ok(value) = env::var(&var_name) {
                    result.push_str(&value);
                } else {
                    result.push('$');
                    result.push('{');
                    result.push_str(&var_name);
                    result.push('}');
                }
            } else {
                // $VAR syntax - use peek() to avoid consuming the delimiter
                let mut var_name = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_alphanumeric() || c == '_' {
                        var_name.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                if !var_name.is_empty() {
                    if let Ok(value) = env::var(&var_name) {
                        result.push_str(&value);
                    } else {
                        result.push('$');
                        result.push_str(&var_name);
                    }
                } else {
                    result.push('$');
                }
            }
        } else {
            result.push(ch);
        }
    }

    result
}

//! Recovery from calls to a misspelled tool name.

use crate::error::McpClientError;
use crate::runtime::ToolRuntime;
use regex::Regex;
use std::sync::OnceLock;

fn not_found_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"(?i)\btool\s+['"`]?[\w.:/-]+['"`]?\s+(was\s+)?not\s+found|unknown\s+tool"#)
            .expect("not-found pattern is valid")
    })
}

/// Whether `err` says the requested tool does not exist on the backend.
pub fn is_tool_not_found(err: &McpClientError) -> bool {
    let message = err.to_string();
    if not_found_pattern().is_match(&message) {
        return true;
    }
    matches!(err, McpClientError::ProtocolError { code: -32602, message } if message.to_lowercase().contains("not found"))
}

/// A tool name substituted for the one the caller asked for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Correction {
    pub server: String,
    pub requested: String,
    pub tool: String,
}

impl Correction {
    pub fn notice(&self) -> String {
        format!("Auto-corrected tool call to {}.{}", self.server, self.tool)
    }
}

/// Lists `server`'s tools and picks the one closest to `requested`.
/// Listing failures count as "no suggestion".
pub async fn suggest_correction(
    runtime: &dyn ToolRuntime,
    server: &str,
    requested: &str,
) -> Option<Correction> {
    let tools = match runtime.list_tools(server).await {
        Ok(tools) => tools,
        Err(e) => {
            tracing::debug!(server = %server, error = %e, "could not list tools for name correction");
            return None;
        }
    };

    let tool = closest_tool(requested, tools.iter().map(|tool| tool.name.as_str()))?;
    Some(Correction {
        server: server.to_string(),
        requested: requested.to_string(),
        tool: tool.to_string(),
    })
}

/// Picks the candidate closest to `requested`.
///
/// Names are compared case-insensitively with `_` and `-` removed, so
/// `listIssues` matches `list_issues` at distance 0. A candidate is accepted
/// when that distance is at most a quarter of the longer normalized name
/// (minimum 1). Ties go to the smaller raw distance, then to list order.
/// The requested name itself is never suggested.
pub fn closest_tool<'a>(
    requested: &str,
    candidates: impl IntoIterator<Item = &'a str>,
) -> Option<&'a str> {
    let wanted = normalize(requested);
    let mut best: Option<(usize, usize, &'a str)> = None;

    for candidate in candidates {
        if candidate == requested {
            continue;
        }

        let normalized = normalize(candidate);
        let distance = levenshtein_distance(&wanted, &normalized);
        let longest = wanted.chars().count().max(normalized.chars().count());
        if distance > (longest / 4).max(1) {
            continue;
        }

        let raw = levenshtein_distance(requested, candidate);
        let better = match best {
            None => true,
            Some((best_distance, best_raw, _)) => (distance, raw) < (best_distance, best_raw),
        };
        if better {
            best = Some((distance, raw, candidate));
        }
    }

    best.map(|(_, _, name)| name)
}

fn normalize(name: &str) -> String {
    name.chars()
        .filter(|c| *c != '_' && *c != '-')
        .flat_map(char::to_lowercase)
        .collect()
}

/// Edit distance over characters, using two rolling rows.
pub fn levenshtein_distance(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();

    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev_row: Vec<usize> = (0..=b.len()).collect();
    let mut curr_row = vec![0; b.len() + 1];

    for (i, a_char) in a.iter().enumerate() {
        curr_row[0] = i + 1;
        for (j, b_char) in b.iter().enumerate() {
            let cost = usize::from(a_char != b_char);
            curr_row[j + 1] = (prev_row[j + 1] + 1)
                .min(curr_row[j] + 1)
                .min(prev_row[j] + cost);
        }
        std::mem::swap(&mut prev_row, &mut curr_row);
    }

    prev_row[b.len()]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockRuntime;
    use crate::types::ToolInfo;

    #[test]
    fn test_levenshtein_distance() {
        assert_eq!(levenshtein_distance("kitten", "sitting"), 3);
        assert_eq!(levenshtein_distance("hello", "hello"), 0);
        assert_eq!(levenshtein_distance("", "abc"), 3);
        assert_eq!(levenshtein_distance("日本", "日本語"), 1);
    }

    #[test]
    fn recognizes_not_found_errors() {
        let wire = McpClientError::ProtocolError {
            code: -32602,
            message: "Tool listIssues not found".to_string(),
        };
        assert!(is_tool_not_found(&wire));

        let unknown = McpClientError::ProtocolError {
            code: -32601,
            message: "Unknown tool: foo".to_string(),
        };
        assert!(is_tool_not_found(&unknown));

        let invalid_params = McpClientError::ProtocolError {
            code: -32602,
            message: "Invalid arguments: page must be a number".to_string(),
        };
        assert!(!is_tool_not_found(&invalid_params));
    }

    #[test]
    fn picks_case_and_separator_variants() {
        let tools = ["create_issue", "list_issues", "list_projects"];
        assert_eq!(closest_tool("listIssues", tools), Some("list_issues"));
        assert_eq!(closest_tool("list-issue", tools), Some("list_issues"));
    }

    #[test]
    fn rejects_distant_names() {
        let tools = ["list_issues", "create_issue"];
        assert_eq!(closest_tool("delete_everything", tools), None);
        assert_eq!(closest_tool("list_issues", ["list_issues"]), None);
        assert_eq!(closest_tool("anything", std::iter::empty()), None);
    }

    #[test]
    fn prefers_smaller_raw_distance_then_list_order() {
        // Both normalize to "listissues".
        assert_eq!(
            closest_tool("List_issues", ["listIssues", "list_issues"]),
            Some("list_issues")
        );
        assert_eq!(closest_tool("ab", ["ac", "ad"]), Some("ac"));
    }

    #[tokio::test]
    async fn test_suggestion_uses_listed_tools() {
        let runtime = MockRuntime::with_servers(&["linear"]);
        runtime.push_list(Ok(vec![
            ToolInfo::named("list_issues"),
            ToolInfo::named("create_issue"),
        ]));

        let correction = suggest_correction(&runtime, "linear", "listIssues")
            .await
            .unwrap();
        assert_eq!(correction.tool, "list_issues");
        assert_eq!(correction.notice(), "Auto-corrected tool call to linear.list_issues");
    }

    #[tokio::test]
    async fn test_listing_failure_means_no_suggestion() {
        let runtime = MockRuntime::with_servers(&["linear"]);
        runtime.push_list(Err(McpClientError::TransportClosed {
            server: "linear".to_string(),
        }));
        assert!(suggest_correction(&runtime, "linear", "listIssues")
            .await
            .is_none());
    }
}

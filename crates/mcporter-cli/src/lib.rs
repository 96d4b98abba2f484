//! mcporter CLI
//!
//! Argument parsing, backend registration and output rendering for the
//! `mcporter` binary. Protocol work lives in `mcporter-mcp-client`.

pub mod call_args;
pub mod commands;
pub mod error;
pub mod handlers;
pub mod output;
pub mod registry;

pub use call_args::{parse_call_arguments, resolve_call_timeout, ParsedCall, CALL_TIMEOUT_ENV};
pub use commands::{Cli, Commands};
pub use error::CliError;
pub use handlers::{handle_auth, handle_call, handle_list};
pub use output::{print_call_output, OutputFormat};

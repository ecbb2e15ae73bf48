/*
* File: src/cli.rs
*
* Command-line surface: a single `run` subcommand and its flags.
* Following `rsperko-diamond/src/main.rs`'s `#[derive(Parser)]`/
* `#[derive(Subcommand)]` shape, scaled down to this operator's one
* subcommand.
*
* SPDX-License-Identifier: Apache-2.0
*/

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "gitops-controller",
    about = "Watches Application resources and syncs them from git to the cluster"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Start the controller: watch Applications and reconcile them.
    Run {
        /// Path to a cluster credential file; falls back to in-cluster
        /// credentials if it cannot be read.
        #[arg(short = 'k', long = "kubeconfig", default_value = None)]
        kubeconfig: Option<String>,

        /// Number of worker threads per queue.
        #[arg(short = 'w', long = "workers", default_value_t = 2)]
        workers: usize,

        /// One of debug, info, warn, error, fatal, panic.
        #[arg(short = 'l', long = "log-level", default_value = "info")]
        log_level: String,
    },
}

/// Resolves the default kubeconfig path (`~/.kube/config`) when none was
/// given explicitly.
pub fn default_kubeconfig_path() -> Option<std::path::PathBuf> {
    dirs::home_dir().map(|home| home.join(".kube").join("config"))
}

/// Maps the CLI's log-level vocabulary onto a `tracing`-compatible
/// filter directive. `fatal`/`panic` have no direct tracing equivalent
/// above `error`, so both map to `error` (the most restrictive level
/// tracing supports).
pub fn tracing_filter(log_level: &str) -> &'static str {
    match log_level.to_lowercase().as_str() {
        "debug" => "debug",
        "warn" => "warn",
        "error" | "fatal" | "panic" => "error",
        _ => "info",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_log_levels_default_to_info() {
        assert_eq!(tracing_filter("chatty"), "info");
        assert_eq!(tracing_filter("INFO"), "info");
    }

    #[test]
    fn fatal_and_panic_map_to_error() {
        assert_eq!(tracing_filter("fatal"), "error");
        assert_eq!(tracing_filter("panic"), "error");
    }
}

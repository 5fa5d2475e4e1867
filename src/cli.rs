use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "cdx",
    version,
    about = "Label, list and resume Codex sessions per project directory"
)]
pub struct Cli {
    /// Only use a registry in the current directory; do not search parent directories.
    #[arg(long, short = 'l', global = true)]
    pub local: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Commands {
    /// Start a new Codex session and register it under a label.
    New {
        #[arg(value_name = "LABEL", required = true, num_args = 1..)]
        label: Vec<String>,
    },
    /// Resume a registered session. Without an id, pick one interactively.
    Resume {
        #[arg(value_name = "ID")]
        id: Option<String>,
    },
    /// Remove a session from the registry. Without an id, pick one interactively.
    #[command(visible_alias = "remove")]
    Rm {
        #[arg(value_name = "ID")]
        id: Option<String>,
    },
    /// Register an existing session id without launching Codex.
    Add {
        #[arg(value_name = "ID")]
        id: String,
        #[arg(value_name = "LABEL", required = true, num_args = 1..)]
        label: Vec<String>,
    },
    /// List registered sessions (the default).
    #[command(visible_alias = "list")]
    Ls,
    /// Create an empty registry in the current directory.
    Init,
    /// Check configuration, Codex paths and the resolved registry.
    Doctor,
}

pub fn join_label(words: &[String]) -> String {
    words.join(" ")
}

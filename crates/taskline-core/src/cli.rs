use std::ffi::OsString;
use std::io::IsTerminal;
use std::path::PathBuf;

use anyhow::anyhow;
use clap::{ArgAction, Args, Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use crate::filter::{CompletionStatus, TagCondition};
use crate::order::SortCriterion;

#[derive(Debug, Clone)]
pub struct PreprocessedArgs {
    pub cleaned_args: Vec<OsString>,
    pub rc_overrides: Vec<(String, String)>,
}

#[derive(Debug, Clone)]
pub struct KeyVal {
    pub key: String,
    pub value: String,
}

impl std::str::FromStr for KeyVal {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (k, v) = s
            .split_once('=')
            .ok_or_else(|| anyhow!("expected KEY=VALUE, got: {s}"))?;
        Ok(Self {
            key: k.trim().to_string(),
            value: v.trim().to_string(),
        })
    }
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "taskline",
    version,
    about = "Taskline: optimistic command-line client for the todo API",
    disable_help_subcommand = true
)]
pub struct GlobalCli {
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[arg(short = 'q', long = "quiet", action = ArgAction::Count, global = true)]
    pub quiet: u8,

    #[arg(
        long = "rc",
        value_parser = clap::builder::ValueParser::new(|s: &str| s.parse::<KeyVal>()),
        action = ArgAction::Append,
        global = true
    )]
    pub rc_overrides: Vec<KeyVal>,

    #[arg(long = "config", global = true)]
    pub config: Option<PathBuf>,

    #[arg(long = "data", global = true)]
    pub data: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Show tasks matching the saved filters.
    List(ListArgs),
    /// Create a task.
    Add(AddArgs),
    /// Mark a task completed.
    Done { id: String },
    /// Mark a task not completed.
    Undo { id: String },
    /// Flip a task's completion.
    Toggle { id: String },
    /// Change a task's text, category or tags.
    Edit(EditArgs),
    /// Delete a task.
    Rm { id: String },
    /// Move a task onto another task's position.
    Move { source: String, target: Option<String> },
    /// Renumber the display order.
    Sort {
        #[arg(value_enum)]
        by: SortCriterion,
    },
    /// Inspect or change the saved filters.
    #[command(subcommand)]
    Filter(FilterCommand),
    /// List every tag in use.
    Tags,
    /// Manage categories.
    #[command(subcommand)]
    Categories(CategoryCommand),
    /// Show connection and replica state.
    Status,
}

#[derive(Args, Debug, Clone, Default)]
pub struct FilterArgs {
    #[arg(long, value_enum)]
    pub status: Option<CompletionStatus>,

    #[arg(long = "category", action = ArgAction::Append)]
    pub categories: Vec<String>,

    #[arg(long = "tag", action = ArgAction::Append)]
    pub tags: Vec<String>,

    #[arg(long = "match", value_enum)]
    pub tag_condition: Option<TagCondition>,

    #[arg(long)]
    pub search: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct ListArgs {
    /// One-off filters applied on top of the saved ones.
    #[command(flatten)]
    pub filters: FilterArgs,
}

#[derive(Args, Debug, Clone)]
pub struct AddArgs {
    #[arg(required = true, num_args = 1..)]
    pub text: Vec<String>,

    #[arg(long)]
    pub category: Option<String>,

    #[arg(long = "tag", action = ArgAction::Append)]
    pub tags: Vec<String>,

    #[arg(long)]
    pub done: bool,
}

#[derive(Args, Debug, Clone)]
pub struct EditArgs {
    pub id: String,

    #[arg(long)]
    pub text: Option<String>,

    #[arg(long, conflicts_with = "no_category")]
    pub category: Option<String>,

    #[arg(long)]
    pub no_category: bool,

    /// Replaces the task's tags.
    #[arg(long = "tag", action = ArgAction::Append)]
    pub tags: Vec<String>,

    #[arg(long, conflicts_with = "tags")]
    pub clear_tags: bool,
}

#[derive(Subcommand, Debug, Clone)]
pub enum FilterCommand {
    Show,
    Set(FilterArgs),
    Reset,
}

#[derive(Subcommand, Debug, Clone)]
pub enum CategoryCommand {
    List,
    Add {
        name: String,
        #[arg(long)]
        color: Option<String>,
    },
    Rename {
        id: String,
        name: String,
        #[arg(long)]
        color: Option<String>,
    },
    Rm {
        id: String,
    },
}

pub fn init_tracing(verbose: u8, quiet: u8) -> anyhow::Result<()> {
    let default_level = if quiet >= 2 {
        "error"
    } else if quiet == 1 {
        "warn"
    } else if verbose >= 3 {
        "trace"
    } else if verbose == 2 {
        "debug"
    } else if verbose == 1 {
        "info"
    } else {
        "warn"
    };

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .map_err(|e| anyhow!("invalid RUST_LOG / log filter: {e}"))?;

    let init_result = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_level(true)
        .with_thread_ids(true)
        .with_ansi(std::io::stderr().is_terminal())
        .try_init();

    if let Err(err) = init_result {
        debug!(error = %err, "tracing subscriber already set, continuing");
    }

    Ok(())
}

/// Pulls bare `rc.key=value` / `rc.key:value` words out of the argument
/// list so they work anywhere on the command line.
#[tracing::instrument(skip_all)]
pub fn preprocess_args(raw: &[OsString]) -> anyhow::Result<PreprocessedArgs> {
    let mut cleaned = Vec::with_capacity(raw.len());
    let mut overrides: Vec<(String, String)> = Vec::new();

    let mut iter = raw.iter().cloned();
    if let Some(bin) = iter.next() {
        cleaned.push(bin);
    }

    for arg in iter {
        let s = arg.to_string_lossy();
        if let Some(rest) = s.strip_prefix("rc.") {
            let parsed = rest.split_once('=').or_else(|| rest.split_once(':'));
            if let Some((k, v)) = parsed {
                debug!(key = %k, value = %v, "captured positional rc override");
                overrides.push((format!("rc.{k}"), v.to_string()));
                continue;
            }
        }

        cleaned.push(arg);
    }

    Ok(PreprocessedArgs {
        cleaned_args: cleaned,
        rc_overrides: overrides,
    })
}

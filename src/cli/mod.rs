//! CLI definitions and entry point.

use clap::{ArgAction, Args, Parser, Subcommand};

pub mod commands;

#[derive(Parser, Debug)]
#[command(name = "braid", version, about = "Local-first, git-native issue tracker")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace).
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Only log errors.
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Emit machine-readable JSON output.
    #[arg(long, global = true)]
    pub json: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Initialize a braid workspace in the current directory.
    Init {
        /// Id prefix for issues created here.
        #[arg(long, default_value = "bd")]
        prefix: String,
        /// Reinitialize over an existing workspace.
        #[arg(long)]
        force: bool,
    },
    /// Create a new issue.
    Create(CreateArgs),
    /// Update fields of an existing issue.
    Update(UpdateArgs),
    /// Close an issue.
    Close(CloseArgs),
    /// Delete an issue (tombstone by default).
    Delete(DeleteArgs),
    /// List issues.
    List(ListArgs),
    /// Show one or more issues in full.
    Show {
        /// Issue ids.
        #[arg(required = true)]
        ids: Vec<String>,
    },
    /// Import from / export to the JSONL file.
    Sync(SyncArgs),
    /// Check workspace health: file integrity, conflict markers,
    /// dangling dependencies.
    Doctor,
    /// Git hook entry points (invoked from hook scripts).
    Hook {
        #[command(subcommand)]
        command: HookCommand,
    },
}

#[derive(Args, Debug)]
pub struct CreateArgs {
    /// Issue title.
    pub title: String,

    /// Detailed description.
    #[arg(short, long)]
    pub description: Option<String>,

    /// Priority 0-4 (0=critical).
    #[arg(short, long, default_value = "2")]
    pub priority: String,

    /// Issue type (task, bug, feature, epic, chore).
    #[arg(short = 't', long = "type", default_value = "task")]
    pub issue_type: String,

    /// Labels to attach (repeatable).
    #[arg(short, long)]
    pub label: Vec<String>,

    /// Assignee.
    #[arg(short, long)]
    pub assignee: Option<String>,

    /// Create an ephemeral issue (never exported).
    #[arg(long)]
    pub ephemeral: bool,
}

#[derive(Args, Debug)]
pub struct UpdateArgs {
    /// Issue id.
    pub id: String,

    /// New title.
    #[arg(long)]
    pub title: Option<String>,

    /// New description.
    #[arg(short, long)]
    pub description: Option<String>,

    /// New status (open, in_progress, blocked, closed, tombstone).
    #[arg(short, long)]
    pub status: Option<String>,

    /// New priority 0-4.
    #[arg(short, long)]
    pub priority: Option<String>,

    /// New assignee.
    #[arg(short, long)]
    pub assignee: Option<String>,
}

#[derive(Args, Debug)]
pub struct CloseArgs {
    /// Issue id.
    pub id: String,

    /// Reason for closing.
    #[arg(short, long)]
    pub reason: Option<String>,
}

#[derive(Args, Debug)]
pub struct DeleteArgs {
    /// Issue id.
    pub id: String,

    /// Remove the row entirely instead of leaving a tombstone.
    #[arg(long)]
    pub hard: bool,
}

#[derive(Args, Debug)]
pub struct ListArgs {
    /// Filter by status.
    #[arg(short, long)]
    pub status: Option<String>,
}

#[derive(Args, Debug, Default)]
pub struct SyncArgs {
    /// Export dirty issues to the JSONL file.
    #[arg(long)]
    pub flush: bool,

    /// Rebuild the JSONL file from all issues.
    #[arg(long)]
    pub full: bool,

    /// Import the JSONL file into the database.
    #[arg(long)]
    pub import: bool,

    /// Report sync state without changing anything.
    #[arg(long)]
    pub status: bool,

    /// Override export safety guards.
    #[arg(long)]
    pub force: bool,
}

#[derive(Subcommand, Debug)]
pub enum HookCommand {
    /// Flush pending changes and stage the JSONL before a commit.
    PreCommit,
    /// Import changes brought in by a merge.
    PostMerge,
    /// Import after checkout, gated by the worktree journal.
    PostCheckout,
}

use clap::{Parser, Subcommand};
use gitwatch_core::app::Command;
use std::num::NonZeroUsize;
use std::path::PathBuf;

#[derive(Parser, Debug, PartialEq)]
#[command(name = "gitwatch")]
#[command(about = "Watches remote Git repositories and announces new commits")]
pub struct CliArgs {
    /// Path to configuration file
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Directory holding the local mirrors (overrides config)
    #[arg(long, global = true)]
    pub repo_dir: Option<PathBuf>,

    /// Output target replies and notifications are addressed to
    #[arg(long, global = true, default_value = "console")]
    pub target: String,

    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Subcommand, Debug, PartialEq)]
pub enum CliCommand {
    /// Poll periodically until interrupted
    Run,
    /// Fetch repositories once and announce new commits
    Poll {
        /// Only this repository
        name: Option<String>,
        /// Restart a poll already in progress
        #[arg(long)]
        force: bool,
    },
    /// Clone and start tracking a repository
    Add {
        name: String,
        url: String,
        /// Comma separated output targets
        #[arg(value_delimiter = ',')]
        targets: Vec<String>,
        /// Space separated branch patterns
        #[arg(long)]
        branches: Option<String>,
    },
    /// Stop tracking a repository and delete its mirror
    Remove { name: String },
    /// List the repositories configured for the target
    List,
    /// Show the latest commits of a watched branch
    Log {
        name: String,
        #[arg(default_value = "master")]
        branch: String,
        #[arg(default_value = "1")]
        count: NonZeroUsize,
    },
    /// Show the watched branches of a repository
    Stat { name: String },
    /// Show the options of a repository
    Conf { name: String },
    /// Show the global options
    Gitconf,
    /// Show the commits whose ids are mentioned in a message
    Say {
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        text: Vec<String>,
    },
}

impl CliArgs {
    /// The monitor command for a one-shot invocation, `None` for `run`
    pub fn to_command(&self) -> Option<Command> {
        let reply_to = self.target.clone();
        let cmd = match &self.command {
            CliCommand::Run => return None,
            CliCommand::Poll { name, force } => Command::Poll {
                name: name.clone(),
                force: *force,
                reply_to,
            },
            CliCommand::Add {
                name,
                url,
                targets,
                branches,
            } => Command::AddRepository {
                name: name.clone(),
                url: url.clone(),
                targets: if targets.is_empty() {
                    vec![reply_to.clone()]
                } else {
                    targets.clone()
                },
                branches: branches.clone(),
                reply_to,
            },
            CliCommand::Remove { name } => Command::RemoveRepository {
                name: name.clone(),
                reply_to,
            },
            CliCommand::List => Command::ListRepositories { reply_to },
            CliCommand::Log { name, branch, count } => Command::RepoLog {
                name: name.clone(),
                branch: branch.clone(),
                count: count.get(),
                reply_to,
            },
            CliCommand::Stat { name } => Command::RepoStat {
                name: name.clone(),
                reply_to,
            },
            CliCommand::Conf { name } => Command::RepoConf {
                name: name.clone(),
                reply_to,
            },
            CliCommand::Gitconf => Command::GitConf { reply_to },
            CliCommand::Say { text } => Command::Snarf {
                text: text.join(" "),
                reply_to,
            },
        };
        Some(cmd)
    }
}

/// Parse one line typed into a running monitor, e.g.
/// `--target #docs log docs main 3`. Blank lines and `run` give `None`.
pub fn parse_line(line: &str) -> Result<Option<Command>, clap::Error> {
    let words: Vec<&str> = line.split_whitespace().collect();
    if words.is_empty() {
        return Ok(None);
    }
    let args = CliArgs::try_parse_from(std::iter::once("gitwatch").chain(words))?;
    Ok(args.to_command())
}

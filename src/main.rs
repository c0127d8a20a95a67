//! pane-keeper: inspect and maintain the multiplexer sessions behind worktree panes.
//!
//! ## Subcommands
//!
//! - `id`: compute the session id for a repo, worktree and pane
//! - `validate`: check a session id against the naming scheme
//! - `attach`: print the shell line that attaches to (or creates) a pane session
//! - `orphans`: list, or kill, sessions that no checkpoint entry claims
//! - `checkpoint`: show or clear the saved checkpoint
//! - `status`: backend and checkpoint overview

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use log::info;
use pane_keeper::domains::sessions::{
    BackendKind, CheckpointStore, LoadOutcome, RepoRef, SessionHandle, WorktreeRef,
    build_backend,
};
use pane_keeper::domains::settings::{KeeperSettings, SettingsService};
use pane_keeper::shared::session_id;
use pane_keeper::utils::binary_utils::{check_binary, resolve_binary};
use std::collections::HashSet;
use std::path::PathBuf;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "pane-keeper")]
#[command(about = "Deterministic, restart-safe multiplexer sessions for worktree panes")]
#[command(version)]
struct Cli {
    /// Settings file (defaults to PANE_KEEPER_CONFIG, then the user config dir)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the session id for a pane
    Id {
        #[command(flatten)]
        pane: PaneArgs,
    },

    /// Check whether a string is a valid session id
    Validate {
        #[arg(value_name = "SESSION_ID")]
        session_id: String,
    },

    /// Print the attach-or-create command for a pane
    Attach {
        #[command(flatten)]
        pane: PaneArgs,
    },

    /// List sessions that follow the naming scheme but are not checkpointed
    Orphans {
        /// Kill the listed sessions
        #[arg(long)]
        kill: bool,
    },

    /// Show the saved checkpoint
    Checkpoint {
        /// Delete the checkpoint file instead
        #[arg(long)]
        clear: bool,
    },

    /// Show backend and checkpoint status
    Status,
}

#[derive(clap::Args)]
struct PaneArgs {
    /// Repository root
    #[arg(long, value_name = "PATH")]
    repo: PathBuf,

    /// Worktree path (defaults to the repository root)
    #[arg(long, value_name = "PATH")]
    worktree: Option<PathBuf>,

    /// Pane id; a fresh one is generated when omitted
    #[arg(long, value_name = "UUID")]
    pane: Option<Uuid>,
}

impl PaneArgs {
    fn handle(&self) -> SessionHandle {
        let repo = RepoRef::new(Uuid::nil(), &self.repo);
        let worktree = WorktreeRef::new(
            Uuid::nil(),
            repo.id,
            self.worktree.clone().unwrap_or_else(|| self.repo.clone()),
        );
        let pane_id = self.pane.unwrap_or_else(Uuid::new_v4);
        SessionHandle::for_pane(&repo, &worktree, pane_id)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let service = match &cli.config {
        Some(path) => SettingsService::new(Some(path.clone())),
        None => SettingsService::from_env(),
    };
    let settings = service.load().context("failed to load settings")?;

    match cli.command {
        Commands::Id { pane } => {
            let handle = pane.handle();
            println!("{}", handle.id);
            if pane.pane.is_none() {
                eprintln!("pane id: {}", handle.pane_id);
            }
        }
        Commands::Validate { session_id } => {
            if !session_id::validate(&session_id) {
                bail!("'{session_id}' is not a valid session id");
            }
            println!("valid");
        }
        Commands::Attach { pane } => {
            let backend = build_backend(&settings);
            println!("{}", backend.attach_command(&pane.handle()));
        }
        Commands::Orphans { kill } => orphans(&settings, kill).await?,
        Commands::Checkpoint { clear } => checkpoint(&settings, clear)?,
        Commands::Status => status(&settings, &service),
    }

    Ok(())
}

async fn orphans(settings: &KeeperSettings, kill: bool) -> Result<()> {
    let backend = build_backend(settings);
    if !backend.is_available() {
        bail!("no {} binary found", backend.kind());
    }

    let tracked: HashSet<String> = match CheckpointStore::from_settings(settings).load() {
        LoadOutcome::Loaded(checkpoint) => checkpoint
            .sessions
            .into_iter()
            .map(|entry| entry.session_id)
            .collect(),
        _ => HashSet::new(),
    };

    let orphans = backend
        .discover_orphan_sessions(&tracked)
        .await
        .context("failed to list sessions")?;
    for name in &orphans {
        if kill {
            backend
                .destroy_session_by_id(name)
                .await
                .with_context(|| format!("failed to kill {name}"))?;
            info!("Killed orphan session {name}");
        } else {
            println!("{name}");
        }
    }
    Ok(())
}

fn checkpoint(settings: &KeeperSettings, clear: bool) -> Result<()> {
    let store = CheckpointStore::from_settings(settings);
    if clear {
        store.delete().context("failed to delete checkpoint")?;
        println!("cleared {}", store.path().display());
        return Ok(());
    }

    match store.load() {
        LoadOutcome::Missing => println!("no checkpoint at {}", store.path().display()),
        LoadOutcome::Invalid(err) => bail!("checkpoint is unreadable: {err}"),
        LoadOutcome::Loaded(checkpoint) | LoadOutcome::Stale(checkpoint) => {
            println!("{}", checkpoint.encode()?);
        }
    }
    Ok(())
}

fn status(settings: &KeeperSettings, service: &SettingsService) {
    let backend = build_backend(settings);
    let store = CheckpointStore::from_settings(settings);
    let checkpoint = match store.load() {
        LoadOutcome::Missing => "missing".to_string(),
        LoadOutcome::Loaded(c) => format!("{} session(s)", c.sessions.len()),
        LoadOutcome::Stale(c) => format!("stale, {} session(s)", c.sessions.len()),
        LoadOutcome::Invalid(err) => format!("invalid ({err})"),
    };

    println!(
        "settings:   {}",
        service
            .path()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "defaults".to_string())
    );
    println!("backend:    {} ({:?} requested)", backend.kind(), settings.backend);
    println!("available:  {}", backend.is_available());

    let (command, override_path) = match backend.kind() {
        BackendKind::Tmux => ("tmux", settings.tmux.binary.as_deref()),
        BackendKind::Zmx => ("zmx", settings.zmx.binary.as_deref()),
    };
    match resolve_binary(command, override_path).and_then(|path| check_binary(&path)) {
        Some(detected) => println!(
            "binary:     {} ({}{})",
            detected.path,
            detected.version.as_deref().unwrap_or("unknown version"),
            detected
                .symlink_target
                .map(|target| format!(", -> {target}"))
                .unwrap_or_default()
        ),
        None => println!("binary:     not found"),
    }
    println!(
        "socket:     {}",
        if backend.socket_exists() { "present" } else { "absent" }
    );
    println!(
        "checkpoint: {} [{checkpoint}, max age {}h]",
        store.path().display(),
        store.max_age().num_hours()
    );
}

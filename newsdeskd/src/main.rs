use anyhow::Context;
use clap::{Parser, Subcommand};
use newsdesk_core::{Article, Bookmark};
use newsdeskd::config::{Account, Config};
use newsdeskd::daemon::{DaemonRuntime, open_cache, start_session};
use newsdeskd::guest::GuestStore;
use newsdeskd::storage::queue_key;
use newsdeskd::sync::engine::{Mutation, SyncEngine};
use newsdeskd::sync::queue::DispatchOutcome;
use time::format_description::well_known::Rfc3339;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "newsdeskd", version, about = "Offline-first bookmark sync for newsdesk")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
enum Command {
    /// Print saved bookmarks, newest first
    List,
    /// Save an article
    Add {
        url: String,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        source: Option<String>,
    },
    /// Remove a bookmark by id or url
    Remove { id_or_url: String },
    /// Replay queued operations and reconcile with the server
    Sync,
    /// Show session and queue state
    Status,
    /// Keep syncing in the background until interrupted (default)
    Run,
    /// Drop the cached bookmarks and pending queue of the configured account
    Logout,
}

fn setup_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    setup_logging();
    let cli = Cli::parse();
    let config = Config::from_env().context("invalid configuration")?;
    let command = cli.command.unwrap_or(Command::Run);

    match config.account.clone() {
        Some(account) => run_account(config, &account, command).await,
        None => run_guest(config, command).await,
    }
}

async fn run_account(config: Config, account: &Account, command: Command) -> anyhow::Result<()> {
    if command == Command::Run {
        let daemon = DaemonRuntime::bootstrap(config, account).await?;
        return daemon.run().await;
    }

    let cache = open_cache(&config).await?;
    if command == Command::Logout {
        let pending: Vec<serde_json::Value> = cache
            .load_list(&queue_key(&account.user_id))
            .await;
        if !pending.is_empty() {
            tracing::warn!(
                pending = pending.len(),
                "discarding operations that never reached the server"
            );
        }
        cache
            .clear_user(&account.user_id)
            .await
            .context("failed to clear cached bookmarks")?;
        println!("signed out {}", account.user_id);
        return Ok(());
    }

    let engine = start_session(&config, account, cache).await?;
    match command {
        Command::List => print_bookmarks(&engine.bookmarks().await),
        Command::Add { url, title, source } => {
            let mutation = engine
                .add_bookmark(article(url, title, source))
                .await
                .context("no active session")?;
            let (url, state) = settle(mutation).await;
            println!("saved {url} ({state})");
        }
        Command::Remove { id_or_url } => match engine.remove_bookmark(&id_or_url).await {
            Some(mutation) => {
                let (url, state) = settle(mutation).await;
                println!("removed {url} ({state})");
            }
            None => println!("no bookmark matches {id_or_url}"),
        },
        Command::Sync => {
            engine.flush_queue().await;
            print_status(&engine);
        }
        Command::Status => print_status(&engine),
        Command::Run | Command::Logout => {}
    }
    Ok(())
}

async fn run_guest(config: Config, command: Command) -> anyhow::Result<()> {
    if matches!(command, Command::Run | Command::Sync) {
        anyhow::bail!("no account configured; set NEWSDESK_USER and NEWSDESK_TOKEN to sync");
    }

    let cache = open_cache(&config).await?;
    let mut guest = GuestStore::load(cache).await;
    match command {
        Command::List => print_bookmarks(guest.list()),
        Command::Add { url, title, source } => {
            let bookmark = guest.add(article(url, title, source)).await;
            println!("saved {} (guest)", bookmark.url());
        }
        Command::Remove { id_or_url } => match guest.remove(&id_or_url).await {
            Some(bookmark) => println!("removed {} (guest)", bookmark.url()),
            None => println!("no bookmark matches {id_or_url}"),
        },
        Command::Status => println!("guest session, {} bookmarks", guest.list().len()),
        Command::Logout => {
            guest.clear().await;
            println!("guest bookmarks cleared");
        }
        Command::Run | Command::Sync => {}
    }
    Ok(())
}

fn article(url: String, title: Option<String>, source: Option<String>) -> Article {
    let mut article = Article::new(url);
    article.title = title;
    article.source = source;
    article
}

async fn settle(mutation: Mutation) -> (String, &'static str) {
    let url = mutation.bookmark().url().to_string();
    let queued = mutation.is_queued();
    let outcome = mutation.settled().await;
    (url, describe(queued, outcome.as_ref()))
}

fn describe(queued: bool, outcome: Option<&DispatchOutcome>) -> &'static str {
    match outcome {
        None if queued => "queued",
        None => "unchanged",
        Some(DispatchOutcome::Success(_)) => "synced",
        Some(DispatchOutcome::AlreadySatisfied) => "already in sync",
        Some(DispatchOutcome::Retryable) => "queued for retry",
        Some(DispatchOutcome::Rejected) => "refused by server",
        Some(DispatchOutcome::Fatal) => "queued, credential rejected",
    }
}

fn print_bookmarks(bookmarks: &[Bookmark]) {
    for bookmark in bookmarks {
        let saved_at = bookmark.saved_at.format(&Rfc3339).unwrap_or_default();
        let title = bookmark.article.title.as_deref().unwrap_or("");
        println!("{}\t{}\t{}\t{}", bookmark.id, saved_at, bookmark.url(), title);
    }
}

fn print_status(engine: &SyncEngine) {
    let status = engine.status();
    println!(
        "user={} bookmarks={} pending={} online={} credential_rejected={}",
        status.user_id.as_deref().unwrap_or("-"),
        status.bookmarks.len(),
        status.pending.len(),
        engine.connectivity().is_online(),
        status.credential_rejected
    );
}

use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use imapbackup::config::{
    DEFAULT_BATCH_SIZE, DEFAULT_CONNECT_RETRIES, DEFAULT_IO_TIMEOUT_SECS, DEFAULT_MAX_FILE_SIZE,
    DEFAULT_RUN_LEASE_SECS, DEFAULT_SYNC_INTERVAL_SECS,
};

#[derive(Debug, Parser)]
#[command(name = "imapbackup", version, about = "IMAP mailbox backup")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output structured JSON
    #[arg(long, global = true)]
    json: bool,

    /// SQLite archive path (default: ~/.imapbackup/imapbackup.db)
    #[arg(long, global = true, env = "IMAPBACKUP_DB")]
    db: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Back up every enabled account once, or on an interval with --watch
    Sync(SyncArgs),
    /// Manage IMAP accounts
    Accounts {
        #[command(subcommand)]
        command: AccountCommands,
    },
    /// List archived messages
    List(ListArgs),
    /// Show one archived message by ID
    Show { id: String },
    /// Show archive stats
    Stats,
    /// Show recent sync runs
    Runs {
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
}

#[derive(Debug, Args)]
struct SyncArgs {
    /// Only sync this account
    #[arg(long)]
    account: Option<String>,
    /// Keep running and sync every --interval seconds
    #[arg(long, default_value_t = false)]
    watch: bool,
    #[arg(long, default_value_t = DEFAULT_SYNC_INTERVAL_SECS)]
    interval: u64,
    /// Messages per overview and full fetch
    #[arg(long, env = "IMAPBACKUP_BATCH_SIZE", default_value_t = DEFAULT_BATCH_SIZE)]
    batch_size: usize,
    /// Abort an account that takes longer than this many seconds
    #[arg(long)]
    account_timeout: Option<u64>,
    /// Socket read/write timeout in seconds
    #[arg(long, default_value_t = DEFAULT_IO_TIMEOUT_SECS)]
    io_timeout: u64,
    #[arg(long, default_value_t = DEFAULT_CONNECT_RETRIES)]
    connect_retries: u32,
    /// Largest attachment stored, in bytes
    #[arg(long, default_value_t = DEFAULT_MAX_FILE_SIZE)]
    max_file_size: u64,
    /// Seconds without a heartbeat after which another process's run counts as dead
    #[arg(long, default_value_t = DEFAULT_RUN_LEASE_SECS)]
    run_lease: u64,
}

#[derive(Debug, Args)]
struct ListArgs {
    #[arg(long)]
    account: Option<String>,
    #[arg(long)]
    folder: Option<String>,
    #[arg(long, default_value_t = 50)]
    limit: usize,
}

#[derive(Debug, Subcommand)]
enum AccountCommands {
    /// List configured accounts
    List,
    /// Add or update an account
    Add {
        #[arg(long)]
        host: String,
        #[arg(long, default_value_t = 993)]
        port: u16,
        #[arg(long)]
        username: String,
        #[arg(long, env = "IMAPBACKUP_PASSWORD", hide_env_values = true)]
        password: String,
        /// Account id (default: the lowercased username)
        #[arg(long)]
        id: Option<String>,
    },
    /// Remove an account and its archived messages
    Remove { account_id: String },
    /// Include an account in sync runs
    Enable { account_id: String },
    /// Exclude an account from sync runs
    Disable { account_id: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    commands::dispatch(cli).await
}

mod commands {
    use std::path::{Path, PathBuf};
    use std::sync::Arc;
    use std::time::Duration;

    use anyhow::{anyhow, bail, Context, Result};
    use tokio::task::JoinHandle;
    use tokio::time::MissedTickBehavior;
    use tracing::{info, warn};

    use imapbackup::config::SyncSettings;
    use imapbackup::db::models::Account;
    use imapbackup::db::{Database, MessageFilters};
    use imapbackup::mailbox::ImapConnector;
    use imapbackup::output::{self, MessageDetail, OutputFormat};
    use imapbackup::sync::{SyncError, SyncReport, SyncRunner};

    use super::{AccountCommands, Cli, Commands};

    type Runner = Arc<SyncRunner<ImapConnector>>;

    pub async fn dispatch(cli: Cli) -> Result<()> {
        let db_path = match cli.db {
            Some(path) => path,
            None => Database::default_db_path().context("resolve default database path")?,
        };
        let format = OutputFormat::from_json_flag(cli.json);

        match cli.command {
            Commands::Sync(args) => handle_sync(args, db_path, format).await,
            Commands::Accounts { command } => handle_accounts(command, &db_path, format),
            Commands::List(args) => handle_list(args, &db_path, format),
            Commands::Show { id } => handle_show(&id, &db_path, format),
            Commands::Stats => handle_stats(&db_path, format),
            Commands::Runs { limit } => handle_runs(limit, &db_path, format),
        }
    }

    fn open_db(path: &Path) -> Result<Database> {
        Database::open(path).with_context(|| format!("open database at {}", path.display()))
    }

    fn sync_settings(args: &super::SyncArgs) -> Result<SyncSettings> {
        let settings = SyncSettings {
            batch_size: args.batch_size,
            connect_retries: args.connect_retries,
            io_timeout: Duration::from_secs(args.io_timeout),
            account_timeout: args.account_timeout.map(Duration::from_secs),
            max_file_size: args.max_file_size,
            run_lease: Duration::from_secs(args.run_lease),
        };
        Ok(settings.validate()?)
    }

    async fn handle_sync(args: super::SyncArgs, db_path: PathBuf, format: OutputFormat) -> Result<()> {
        if args.watch && args.interval == 0 {
            bail!("--interval must be at least 1 second");
        }
        let settings = sync_settings(&args)?;

        {
            let db = open_db(&db_path)?;
            if let Some(account_id) = args.account.as_deref() {
                let account = db
                    .get_account(account_id)?
                    .ok_or_else(|| anyhow!("account not found: {account_id}"))?;
                if !account.enabled {
                    bail!("account {account_id} is disabled; enable it first");
                }
            } else if db.list_enabled_accounts()?.is_empty() {
                bail!("no enabled accounts; use 'imapbackup accounts add' first");
            }
        }

        let runner: Runner = Arc::new(SyncRunner::new(ImapConnector::new(&settings), settings));
        if args.watch {
            watch(runner, db_path, args.account, args.interval).await
        } else {
            let report = run_until_interrupted(&runner, &db_path, args.account).await?;
            println!("{}", output::format_report(format, &report)?);
            Ok(())
        }
    }

    fn spawn_run(
        runner: Runner,
        db_path: PathBuf,
        account: Option<String>,
    ) -> JoinHandle<Result<SyncReport>> {
        tokio::task::spawn_blocking(move || {
            let db = open_db(&db_path)?.with_max_file_size(runner.settings().max_file_size);
            let report = runner.run_once(&db, account.as_deref())?;
            Ok(report)
        })
    }

    async fn run_until_interrupted(
        runner: &Runner,
        db_path: &Path,
        account: Option<String>,
    ) -> Result<SyncReport> {
        let mut task = spawn_run(runner.clone(), db_path.to_path_buf(), account);
        let joined = tokio::select! {
            joined = &mut task => joined,
            _ = tokio::signal::ctrl_c() => {
                warn!("interrupt received, finishing the current message and stopping");
                runner.cancel_token().cancel();
                task.await
            }
        };
        joined.context("sync task panicked")?
    }

    async fn watch(
        runner: Runner,
        db_path: PathBuf,
        account: Option<String>,
        interval: u64,
    ) -> Result<()> {
        let mut ticker = tokio::time::interval(Duration::from_secs(interval));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut active: Option<JoinHandle<Result<SyncReport>>> = None;
        info!(interval, "watching for new mail");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Some(task) = active.take() {
                        if !task.is_finished() {
                            warn!("previous sync run still active, skipping tick");
                            active = Some(task);
                            continue;
                        }
                        log_outcome(task.await);
                    }
                    active = Some(spawn_run(runner.clone(), db_path.clone(), account.clone()));
                }
                _ = tokio::signal::ctrl_c() => {
                    warn!("interrupt received, stopping watch");
                    runner.cancel_token().cancel();
                    if let Some(task) = active.take() {
                        log_outcome(task.await);
                    }
                    return Ok(());
                }
            }
        }
    }

    fn log_outcome(joined: Result<Result<SyncReport>, tokio::task::JoinError>) {
        match joined {
            Ok(Ok(report)) => info!(
                imported = report.imported,
                moved = report.moved,
                failed = report.failed,
                accounts_failed = report.accounts_failed,
                "scheduled sync finished"
            ),
            Ok(Err(error)) => match error.downcast_ref::<SyncError>() {
                Some(SyncError::AlreadyRunning) => warn!("sync already running, tick skipped"),
                _ => warn!(error = %format!("{error:#}"), "scheduled sync failed"),
            },
            Err(error) => warn!(%error, "sync task panicked"),
        }
    }

    fn handle_accounts(command: AccountCommands, db_path: &Path, format: OutputFormat) -> Result<()> {
        let db = open_db(db_path)?;

        match command {
            AccountCommands::List => {
                let accounts = db.list_accounts()?;
                println!("{}", output::format_accounts(format, &accounts)?);
            }
            AccountCommands::Add {
                host,
                port,
                username,
                password,
                id,
            } => {
                if port == 0 {
                    bail!("--port must be between 1 and 65535");
                }
                let account_id = id.unwrap_or_else(|| username.trim().to_ascii_lowercase());
                let existing = db.get_account(&account_id)?;
                let account = Account {
                    account_id,
                    username,
                    password,
                    host,
                    port,
                    enabled: existing.as_ref().map_or(true, |account| account.enabled),
                    last_sync: existing.and_then(|account| account.last_sync),
                };
                db.insert_account(&account)?;
                println!("Saved account: {} ({})", account.account_id, account.label());
            }
            AccountCommands::Remove { account_id } => {
                if db.remove_account(&account_id)? == 0 {
                    println!("No account found: {account_id}");
                } else {
                    println!("Removed account: {account_id}");
                }
            }
            AccountCommands::Enable { account_id } => {
                set_enabled(&db, &account_id, true)?;
            }
            AccountCommands::Disable { account_id } => {
                set_enabled(&db, &account_id, false)?;
            }
        }
        Ok(())
    }

    fn set_enabled(db: &Database, account_id: &str, enabled: bool) -> Result<()> {
        if db.set_account_enabled(account_id, enabled)? == 0 {
            bail!("account not found: {account_id}");
        }
        println!(
            "{} account: {account_id}",
            if enabled { "Enabled" } else { "Disabled" }
        );
        Ok(())
    }

    fn handle_list(args: super::ListArgs, db_path: &Path, format: OutputFormat) -> Result<()> {
        let db = open_db(db_path)?;
        let messages = db.list_messages(MessageFilters {
            account_id: args.account,
            folder: args.folder,
            limit: args.limit,
            offset: 0,
        })?;
        println!("{}", output::format_messages(format, &messages)?);
        Ok(())
    }

    fn handle_show(id: &str, db_path: &Path, format: OutputFormat) -> Result<()> {
        let db = open_db(db_path)?;
        let message = db
            .get_message(id)?
            .ok_or_else(|| anyhow!("message not found for id '{id}'"))?;
        let detail = MessageDetail {
            flags: db.message_flags(id)?,
            addresses: db.message_addresses(id)?,
            attachments: db.message_attachments(id)?,
            message,
        };
        println!("{}", output::format_message(format, &detail)?);
        Ok(())
    }

    fn handle_stats(db_path: &Path, format: OutputFormat) -> Result<()> {
        let db = open_db(db_path)?;
        let stats = db.get_stats()?;
        println!("{}", output::format_stats(format, &stats)?);
        Ok(())
    }

    fn handle_runs(limit: usize, db_path: &Path, format: OutputFormat) -> Result<()> {
        let db = open_db(db_path)?;
        let runs = db.list_runs(limit)?;
        println!("{}", output::format_runs(format, &runs)?);
        Ok(())
    }
}

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use gitpuller::db::{SqlStore, open_store};
use gitpuller::error::PullError;
use gitpuller::executor::{GitPullExecutor, PullRequest};
use gitpuller::logging::{FileLogger, setup_logging};
use gitpuller::rate_limit::RateLimiter;
use gitpuller::run::{PullRun, RunTrigger};
use gitpuller::slack::SlackNotifier;
use gitpuller::state::{AlertStateStore, InMemoryStateStore};
use gitpuller::{AppState, PullerConfig, load_config};
use tokio::sync::Mutex;
use tracing::{error, info, warn};

const DEFAULT_CONFIG_PATH: &str = "gitpuller.toml";

#[derive(Parser)]
#[command(
    name = "gitpuller",
    version,
    about = "Pull git repositories with a deploy key and report to Slack"
)]
struct Cli {
    /// Config file
    #[arg(long, env = "GITPULLER_CONFIG", default_value = DEFAULT_CONFIG_PATH, global = true)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Pull one repository and alert on the outcome
    Pull(PullArgs),
    /// Pull every configured repository in order
    PullAll,
    /// Serve the webhook and trigger endpoints
    Serve {
        #[arg(long, env = "BIND_ADDRESS")]
        bind: Option<String>,
    },
}

#[derive(Args)]
struct PullArgs {
    /// Configured repo name; flags below override its settings
    name: Option<String>,
    #[arg(long)]
    repo_path: Option<PathBuf>,
    #[arg(long)]
    git_url: Option<String>,
    #[arg(long)]
    branch: Option<String>,
    /// Tags alerts and selects the `{WORKSPACE}_SSHKEY` env var
    #[arg(long)]
    workspace: Option<String>,
    /// Read the deploy key from this file instead of the environment
    #[arg(long)]
    ssh_key_file: Option<PathBuf>,
    #[arg(long)]
    pipeline_uuid: Option<String>,
    #[arg(long)]
    suppression_hours: Option<u32>,
    #[arg(long)]
    key_filename: Option<String>,
    #[arg(long)]
    ssh_dir: Option<PathBuf>,
}

/// Load the config; a missing file at the default path means "no config".
fn load_config_or_default(path: &Path) -> Result<PullerConfig, PullError> {
    if !path.exists() && path == Path::new(DEFAULT_CONFIG_PATH) {
        return Ok(PullerConfig::default());
    }
    load_config(path)
}

fn build_request(args: PullArgs, config: &PullerConfig) -> Result<PullRequest, PullError> {
    let mut req = match &args.name {
        Some(name) => config
            .find_repo(name)
            .ok_or_else(|| PullError::ConfigError(format!("Unknown repo '{}'", name)))?
            .to_request(&config.alerting),
        None => {
            let (Some(repo_path), Some(git_url)) = (&args.repo_path, &args.git_url) else {
                return Err(PullError::ConfigError(
                    "either a configured repo name or --repo-path and --git-url are required"
                        .to_string(),
                ));
            };
            PullRequest::new(repo_path.clone(), git_url.clone())
                .suppression_hours(config.alerting.suppression_hours)
                .ssh_dir(config.alerting.ssh_dir.clone())
        }
    };

    if let Some(repo_path) = args.repo_path {
        req.repo_path = repo_path;
    }
    if let Some(git_url) = args.git_url {
        req.git_url = git_url;
    }
    if let Some(branch) = args.branch {
        req.branch = branch;
    }
    if let Some(workspace) = args.workspace {
        req.workspace_name = Some(workspace);
    }
    if let Some(key_file) = args.ssh_key_file {
        req.ssh_key = Some(std::fs::read_to_string(&key_file)?);
    }
    if let Some(pipeline_uuid) = args.pipeline_uuid {
        req.pipeline_uuid = pipeline_uuid;
    }
    if let Some(hours) = args.suppression_hours {
        req.suppression_hours = hours;
    }
    if let Some(key_filename) = args.key_filename {
        req.key_filename = Some(key_filename);
    }
    if let Some(ssh_dir) = args.ssh_dir {
        req.ssh_dir = ssh_dir;
    }
    Ok(req)
}

/// Persistent store when enabled. Falls back to in-memory state if it cannot be opened.
async fn alert_store(config: &PullerConfig) -> (Arc<dyn AlertStateStore>, Option<SqlStore>) {
    let in_memory: Arc<dyn AlertStateStore> = Arc::new(InMemoryStateStore::new());
    if !config.state.persistent {
        return (in_memory, None);
    }
    match open_store(&config.state.db_path).await {
        Ok(store) => {
            let persistent: Arc<dyn AlertStateStore> = Arc::new(store.clone());
            (persistent, Some(store))
        }
        Err(e) => {
            warn!(
                "Persistent state unavailable, falling back to in-memory state: {}",
                e
            );
            (in_memory, None)
        }
    }
}

/// Alert state for `serve`, which always keeps run history in `history`.
fn serve_alert_store(config: &PullerConfig, history: &SqlStore) -> Arc<dyn AlertStateStore> {
    if config.state.persistent {
        Arc::new(history.clone())
    } else {
        Arc::new(InMemoryStateStore::new())
    }
}

fn build_executor(
    config: &PullerConfig,
    store: Arc<dyn AlertStateStore>,
) -> Result<GitPullExecutor, PullError> {
    let notifier = SlackNotifier::new(config.slack.webhook_url.clone())?;
    Ok(GitPullExecutor::new(notifier, store).notify_on_success(config.slack.notify_on_success))
}

/// Pull once, recording the run under `repo_name` when history is available.
async fn run_one(
    executor: &GitPullExecutor,
    store: Option<&SqlStore>,
    repo_name: &str,
    req: &PullRequest,
) -> Result<(), PullError> {
    let run = PullRun::new(repo_name.to_string(), req.branch.clone(), RunTrigger::Cli);
    let recorded = match store {
        Some(store) => match store.create_run(&run).await {
            Ok(()) => Some(store),
            Err(e) => {
                warn!("Could not record run {}, pulling without history: {}", run.id, e);
                None
            }
        },
        None => None,
    };

    let result = match recorded {
        Some(store) => executor.execute_recorded(store, run, req).await,
        None => executor.execute_with_alerting(req).await,
    };

    let report = result?;
    let json = serde_json::to_string_pretty(&report)
        .map_err(|e| PullError::ConfigError(format!("Failed to encode report: {}", e)))?;
    println!("{}", json);
    Ok(())
}

async fn serve(config: PullerConfig, bind: Option<String>) -> Result<(), PullError> {
    let store = open_store(&config.state.db_path).await?;
    let executor = build_executor(&config, serve_alert_store(&config, &store))?;
    let bind_address = bind.unwrap_or_else(|| config.server.bind_address.clone());

    let state = Arc::new(AppState {
        execution_lock: Mutex::new(()),
        rate_limiter: Mutex::new(RateLimiter::new()),
        executor,
        store,
        config,
        start_time: Instant::now(),
        started_at: Utc::now(),
    });

    let app = gitpuller::api::router(state);

    info!("Listening on {}", bind_address);
    let listener = tokio::net::TcpListener::bind(&bind_address).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn run(cli: Cli, config: PullerConfig) -> Result<(), PullError> {
    match cli.command {
        Command::Pull(args) => {
            let configured_name = args.name.clone();
            let req = build_request(args, &config)?;
            let repo_name = configured_name.unwrap_or_else(|| req.repo_name());
            let (alert_store, store) = alert_store(&config).await;
            let executor = build_executor(&config, alert_store)?;
            run_one(&executor, store.as_ref(), &repo_name, &req).await
        }
        Command::PullAll => {
            let (alert_store, store) = alert_store(&config).await;
            let executor = build_executor(&config, alert_store)?;
            let mut failed = 0;
            for repo in &config.repo {
                let req = repo.to_request(&config.alerting);
                if let Err(e) = run_one(&executor, store.as_ref(), &repo.name, &req).await {
                    error!("Pull of '{}' failed: {}", repo.name, e);
                    failed += 1;
                }
            }
            if failed > 0 {
                return Err(PullError::ConfigError(format!(
                    "{} of {} pulls failed",
                    failed,
                    config.repo.len()
                )));
            }
            Ok(())
        }
        Command::Serve { bind } => serve(config, bind).await,
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    let config = match load_config_or_default(&cli.config) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let file_logger = config.logging.directory.clone().map(FileLogger::new);
    let _guard = match setup_logging(file_logger.as_ref()) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Logging setup failed: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match run(cli, config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

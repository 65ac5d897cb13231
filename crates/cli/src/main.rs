use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use daemon::{Daemon, is_running, pid_file_path, remove_pid_file, write_pid_file};
use fmcp_core::Config;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "folder-mcp")]
#[command(about = "Semantic file-indexing daemon and CLI")]
struct Cli {
  #[command(subcommand)]
  command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
  /// Start the daemon (default if no subcommand is given).
  RunDaemon(RunDaemonArgs),
  /// Print the running daemon's server info, or report that it isn't running.
  Status,
  /// Check whether the daemon is reachable.
  Ping,
}

#[derive(Args, Default)]
struct RunDaemonArgs {
  /// Folders to index. Each uses `embedding.default_model_id` from config.
  folders: Vec<PathBuf>,

  /// Run attached to this terminal (default).
  #[arg(long)]
  foreground: bool,

  /// Detach and run as a background process, self-terminating after
  /// `daemon.idle_shutdown_secs` of inactivity.
  #[arg(long)]
  background: bool,

  /// Override `logging.level` from config.
  #[arg(long)]
  log_level: Option<String>,

  /// Project-local config override to load in place of the default lookup.
  #[arg(long)]
  config_path: Option<PathBuf>,

  /// Stop an already-running daemon on this port before starting.
  #[arg(long)]
  restart: bool,
}

fn main() -> Result<()> {
  let cli = Cli::parse();
  match cli.command.unwrap_or(Command::RunDaemon(RunDaemonArgs::default())) {
    Command::RunDaemon(args) => run_daemon(args),
    Command::Status => status(),
    Command::Ping => ping(),
  }
}

fn run_daemon(args: RunDaemonArgs) -> Result<()> {
  let config = load_config(&args)?;
  let background = args.background && !args.foreground;

  if args.restart && is_running(config.daemon.http_port) {
    stop_running_daemon()?;
  }

  if background {
    return spawn_background(&args);
  }

  let runtime = tokio::runtime::Runtime::new().context("building tokio runtime")?;
  runtime.block_on(serve(config, args.log_level, background))
}

fn load_config(args: &RunDaemonArgs) -> Result<Config> {
  let mut config = Config::load(args.folders.first().map(PathBuf::as_path)).context("loading configuration")?;
  if !args.folders.is_empty() {
    let model_id = config.embedding.default_model_id.clone();
    config.folders = args
      .folders
      .iter()
      .map(|path| fmcp_core::folder::FolderConfig::new(path.clone(), model_id.clone()))
      .collect();
  }
  Ok(config)
}

fn init_tracing(level: &str) {
  let filter = tracing_subscriber::EnvFilter::try_new(level).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
  tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn serve(config: Config, log_level: Option<String>, background: bool) -> Result<()> {
  let level = log_level.unwrap_or_else(|| config.effective_log_level());
  init_tracing(&level);

  let http_port = config.daemon.http_port;
  let daemon = Arc::new(Daemon::new(config, env!("CARGO_PKG_VERSION"), background));
  daemon.start().await.context("starting daemon")?;
  write_pid_file().context("writing pid file")?;

  let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);
  let app = daemon::http::router(daemon.clone())
    .merge(daemon::ws::router(daemon.clone()))
    .layer(TraceLayer::new_for_http())
    .layer(cors);
  let listener = tokio::net::TcpListener::bind(("127.0.0.1", http_port)).await.context("binding http listener")?;
  info!(port = http_port, "folder-mcp daemon listening");

  let shutdown = daemon.shutdown_token();
  axum::serve(listener, app)
    .with_graceful_shutdown(async move {
      tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = shutdown.cancelled() => {}
      }
    })
    .await
    .context("serving http")?;

  daemon.shutdown().await;
  remove_pid_file();
  info!("folder-mcp daemon shut down");
  Ok(())
}

fn spawn_background(args: &RunDaemonArgs) -> Result<()> {
  let exe = std::env::current_exe().context("locating current executable")?;
  let mut command = std::process::Command::new(exe);
  command.arg("run-daemon").arg("--foreground");
  for folder in &args.folders {
    command.arg(folder);
  }
  if let Some(level) = &args.log_level {
    command.arg("--log-level").arg(level);
  }
  if let Some(path) = &args.config_path {
    command.arg("--config-path").arg(path);
  }

  let log_path = std::env::temp_dir().join("folder-mcp.log");
  let log_file = std::fs::File::create(&log_path).context("creating background log file")?;
  command.stdout(log_file.try_clone().context("cloning log file handle")?);
  command.stderr(log_file);
  command.stdin(std::process::Stdio::null());

  let child = command.spawn().context("spawning background daemon")?;
  println!("folder-mcp daemon started in background (pid {}), logging to {}", child.id(), log_path.display());
  Ok(())
}

fn stop_running_daemon() -> Result<()> {
  let pid_path = pid_file_path();
  let Ok(contents) = std::fs::read_to_string(&pid_path) else {
    warn!("no pid file found, nothing to stop");
    return Ok(());
  };
  let pid: i32 = contents.trim().parse().context("parsing pid file contents")?;

  // SAFETY: libc::kill with a signal (not 0) on an externally-owned pid is
  // inherently best-effort; a failure here just means the process was
  // already gone, which `--restart` treats as success.
  unsafe {
    libc::kill(pid, libc::SIGTERM);
  }
  std::thread::sleep(std::time::Duration::from_millis(500));
  Ok(())
}

fn status() -> Result<()> {
  let config = Config::load(None).context("loading configuration")?;
  let url = format!("http://127.0.0.1:{}/api/v1/server/info", config.daemon.http_port);
  match reqwest::blocking::get(&url) {
    Ok(response) if response.status().is_success() => {
      let body: serde_json::Value = response.json().context("parsing server info response")?;
      println!("{}", serde_json::to_string_pretty(&body)?);
      Ok(())
    }
    _ => {
      println!("folder-mcp daemon is not running on port {}", config.daemon.http_port);
      Ok(())
    }
  }
}

fn ping() -> Result<()> {
  let config = Config::load(None).context("loading configuration")?;
  let url = format!("http://127.0.0.1:{}/api/v1/health", config.daemon.http_port);
  match reqwest::blocking::get(&url) {
    Ok(response) if response.status().is_success() => {
      println!("ok");
      Ok(())
    }
    _ => bail!("folder-mcp daemon is not reachable on port {}", config.daemon.http_port),
  }
}

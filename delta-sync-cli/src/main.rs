//! delta-sync - Main entry point
//!
//! Deploys local directories to a remote machine over SSH, uploading only
//! what changed since the previous deployment.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use delta_sync::config::{group_batch, Config, TargetConfig};
use delta_sync::executor::Manifest;
use delta_sync::remote::{
    Auth, Connection, ConnectionManager, ConnectionTarget, LocalConnector, OutputChunk, OutputStream,
    RemoteCommandRunner,
};
use delta_sync::utils::{self, LineSink};
use delta_sync::{DeltaSync, SyncReport};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    #[command(flatten)]
    connection: ConnectionArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Args, Debug)]
struct ConnectionArgs {
    /// Remote host (overrides config)
    #[arg(long, global = true)]
    host: Option<String>,

    /// SSH port (overrides config)
    #[arg(short, long, global = true)]
    port: Option<u16>,

    /// SSH user (overrides config)
    #[arg(short, long, global = true)]
    user: Option<String>,

    /// SSH password (overrides config and DELTA_SYNC_PASSWORD)
    #[arg(long, global = true)]
    password: Option<String>,

    /// Private key file used instead of the password
    #[arg(long, value_name = "FILE", global = true)]
    key_file: Option<PathBuf>,

    /// Deploy to directories on this machine instead of over SSH
    #[arg(long, global = true)]
    local: bool,

    /// Print output lines without elapsed times
    #[arg(long, global = true)]
    no_timings: bool,
}

impl ConnectionArgs {
    fn apply(&self, config: &mut Config) {
        let connection = &mut config.connection;
        if let Some(host) = &self.host {
            connection.host = host.clone();
        }
        if let Some(port) = self.port {
            connection.port = port;
        }
        if let Some(user) = &self.user {
            connection.username = user.clone();
        }
        if let Some(password) = &self.password {
            connection.password = Some(password.clone());
        }
        if let Some(key_file) = &self.key_file {
            connection.private_key_file = Some(key_file.clone());
        }
        if self.no_timings {
            config.sync.print_timings = false;
        }
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Deploy the configured targets, or one --source/--destination pair
    Sync {
        /// Local directory to deploy
        #[arg(short, long)]
        source: Option<PathBuf>,

        /// Remote destination directory
        #[arg(short, long)]
        destination: Option<String>,

        /// Print the sync reports as JSON instead of progress lines
        #[arg(long)]
        json: bool,
    },
    /// Deploy every line of a `host;port;user;password;source;destination` file
    Batch {
        file: PathBuf,
    },
    /// Run a shell command inside a remote directory
    Exec {
        command: String,

        /// Directory to run in (defaults to the script directory of the config)
        #[arg(short, long)]
        destination: Option<String>,

        /// Fail on a non-zero exit code
        #[arg(long)]
        strict: bool,
    },
    /// Run the pre-run script, deploy all targets, then start the launch script
    Run,
    /// Print the entries of a manifest file
    Manifest {
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // .env is optional
    let _ = dotenvy::dotenv();

    let mut config = match &args.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => Config::default(),
    };
    config.apply_env_overrides();
    args.connection.apply(&mut config);

    let log_level = args.log_level.as_deref().unwrap_or(&config.log.level);
    utils::logger::init(log_level)?;

    tracing::info!("Starting delta-sync v{}", env!("CARGO_PKG_VERSION"));

    let local = args.connection.local;
    match args.command {
        Command::Sync {
            source,
            destination,
            json,
        } => sync(&config, local, source, destination, json).await,
        Command::Batch { file } => batch(&config, local, &file).await,
        Command::Exec {
            command,
            destination,
            strict,
        } => exec(&config, local, &command, destination, strict).await,
        Command::Run => run(&config, local).await,
        Command::Manifest { file } => print_manifest(&file),
    }
}

fn stdout_sink() -> LineSink {
    Arc::new(|line: &str| println!("{line}"))
}

fn print_chunk(chunk: OutputChunk) {
    match chunk.stream {
        OutputStream::Stdout => {
            print!("{}", chunk.text);
            let _ = std::io::stdout().flush();
        }
        OutputStream::Stderr => eprint!("{}", chunk.text),
    }
}

fn manager(local: bool) -> ConnectionManager {
    if local {
        ConnectionManager::new(Arc::new(LocalConnector))
    } else {
        ConnectionManager::ssh()
    }
}

fn resolve_target(config: &Config, local: bool) -> Result<ConnectionTarget> {
    if local {
        return Ok(ConnectionTarget {
            host: "localhost".to_string(),
            port: config.connection.port,
            username: config.connection.username.clone(),
            auth: Auth::Password(String::new()),
        });
    }
    Ok(config.connection.target()?)
}

async fn open(config: &Config, local: bool) -> Result<(ConnectionManager, Connection)> {
    let target = resolve_target(config, local)?;
    let mut manager = manager(local);
    let connection = manager
        .connect(&target)
        .await
        .with_context(|| format!("Failed to connect to {}", target.key()))?;
    Ok((manager, connection))
}

async fn deploy_targets(sync: &mut DeltaSync, targets: &[TargetConfig]) -> Result<Vec<SyncReport>> {
    let mut reports = Vec::with_capacity(targets.len());
    for target in targets {
        let report = sync
            .deploy_directory(&target.source, &target.destination)
            .await
            .with_context(|| format!("Deploying {} to {} failed", target.source.display(), target.destination))?;
        reports.push(report);
    }
    Ok(reports)
}

async fn sync(
    config: &Config,
    local: bool,
    source: Option<PathBuf>,
    destination: Option<String>,
    json: bool,
) -> Result<()> {
    let targets = match (source, destination) {
        (Some(source), Some(destination)) => vec![TargetConfig { source, destination }],
        (None, None) => config.targets.clone(),
        _ => bail!("--source and --destination must be given together"),
    };
    if targets.is_empty() {
        bail!("Nothing to deploy: pass --source and --destination or add [[targets]] to the config");
    }

    let (mut manager, connection) = open(config, local).await?;
    let sink = if json { None } else { Some(stdout_sink()) };
    let mut sync = DeltaSync::new(connection, config.sync.clone(), sink);

    let reports = deploy_targets(&mut sync, &targets).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
    }

    manager.disconnect_all();
    Ok(())
}

async fn deploy_group(
    manager: &mut ConnectionManager,
    config: &Config,
    target: &ConnectionTarget,
    deploys: &[TargetConfig],
) -> Result<Vec<SyncReport>> {
    let connection = manager.connect(target).await?;
    let mut sync = DeltaSync::new(connection, config.sync.clone(), Some(stdout_sink()));
    deploy_targets(&mut sync, deploys).await
}

async fn batch(config: &Config, local: bool, file: &Path) -> Result<()> {
    let content = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read batch file {}", file.display()))?;

    let groups = group_batch(content.lines());
    if groups.is_empty() {
        bail!("No usable lines in {}", file.display());
    }

    let mut manager = manager(local);
    let total = groups.len();
    let mut failed = 0;

    for (target, deploys) in groups {
        let key = target.key();
        println!("==> {} ({} directories)", key, deploys.len());

        match deploy_group(&mut manager, config, &target, &deploys).await {
            Ok(reports) => {
                let changed: usize = reports.iter().map(|r| r.changed_paths.len()).sum();
                tracing::info!("Deployed {} directories to {} ({} files changed)", reports.len(), key, changed);
            }
            Err(e) => {
                failed += 1;
                tracing::error!("Deployment to {} failed: {:#}", key, e);
                eprintln!("Deployment to {key} failed: {e:#}");
            }
        }

        manager.disconnect(&key);
    }

    if failed > 0 {
        bail!("{failed} of {total} connections failed");
    }
    Ok(())
}

async fn exec(
    config: &Config,
    local: bool,
    command: &str,
    destination: Option<String>,
    strict: bool,
) -> Result<()> {
    let directory = destination
        .or_else(|| config.script_directory().map(str::to_string))
        .context("No directory to run in: pass --destination or configure a target")?;

    let (mut manager, connection) = open(config, local).await?;
    let runner = RemoteCommandRunner::new(connection, directory).strict(strict);

    let output = runner.run_streaming(command, print_chunk).await?;
    if !output.success() {
        eprintln!("Exit code: {}", output.exit_code);
    }

    manager.disconnect_all();
    Ok(())
}

async fn run(config: &Config, local: bool) -> Result<()> {
    if config.targets.is_empty() {
        bail!("Nothing to deploy: add [[targets]] to the config");
    }

    let (mut manager, connection) = open(config, local).await?;
    let mut sync = DeltaSync::new(connection, config.sync.clone(), Some(stdout_sink()));
    let directory = config.script_directory().map(str::to_string);

    if let (Some(script), Some(directory)) = (&config.scripts.pre_run, &directory) {
        sync.print("Running pre-run script");
        match sync.runner(directory).run(script).await {
            Ok(output) if output.success() => {}
            Ok(output) => tracing::warn!(
                "Pre-run script exited with {}: {}",
                output.exit_code,
                output.stderr.trim()
            ),
            Err(e) => tracing::warn!("Pre-run script failed: {}", e),
        }
    }

    deploy_targets(&mut sync, &config.targets).await?;

    if let (Some(script), Some(directory)) = (&config.scripts.launch, &directory) {
        sync.print("Launching");
        let output = sync
            .runner(directory)
            .strict(true)
            .run_streaming(script, print_chunk)
            .await
            .context("Launch script failed")?;
        if !output.stderr.trim().is_empty() {
            bail!("Launch script reported errors:\n{}", output.stderr.trim());
        }
        sync.print("Launch script finished");
    }

    manager.disconnect_all();
    Ok(())
}

fn print_manifest(file: &Path) -> Result<()> {
    let bytes = std::fs::read(file).with_context(|| format!("Failed to read {}", file.display()))?;
    let manifest = Manifest::decode(&bytes).with_context(|| format!("{} is not a valid manifest", file.display()))?;

    for entry in &manifest {
        let modified = entry
            .modified_at()
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| entry.last_modified.to_string());
        println!("{:>12}  {}  {}", entry.size, modified, entry.relative_path);
    }
    println!("{} files, {} bytes", manifest.len(), manifest.total_bytes());

    Ok(())
}

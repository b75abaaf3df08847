mod logging;
mod sink;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use secrecy::ExposeSecret;
use walletgen::config::validate_config;
use walletgen::error::StorageError;
use walletgen::jobs::snapshot::read_entries;
use walletgen::{
    apply_env_overrides, load_config, Bip39Deriver, BulkWorker, Chain, Config, JobController,
    JobStatus, JobStore, ProfileStore, RateLimiter, SeedCache, WalletService,
};

use logging::{init_logging, LogFormat};
use sink::ConsoleSink;

#[derive(Parser, Debug)]
#[command(name = "walletgen", version, about = "Bulk multi-chain wallet generator")]
struct Cli {
    /// JSON config file
    #[arg(long, global = true, env = "WALLETGEN_CONFIG")]
    config: Option<PathBuf>,

    /// Overrides `data_dir` from config and environment
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate COUNT wallets into zipped CSV backups
    Bulk {
        chain: String,
        count: u64,
        #[arg(long, default_value_t = 0)]
        user: i64,
        /// Where delivered archives are copied
        #[arg(long, default_value = ".")]
        out: PathBuf,
    },
    /// List jobs recorded in the snapshot
    Jobs {
        #[arg(long, default_value_t = 0)]
        user: i64,
    },
    /// Generate one wallet and reveal its mnemonic once
    Generate {
        chain: String,
        #[arg(long, default_value_t = 0)]
        user: i64,
    },
    /// Show or clear saved wallet addresses
    Profile {
        #[arg(long, default_value_t = 0)]
        user: i64,
        #[arg(long)]
        chain: Option<String>,
        #[arg(long)]
        clear: bool,
    },
}

fn main() -> anyhow::Result<ExitCode> {
    // A missing .env is normal.
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let config = resolve_config(&cli)?;
    init_logging(&config.log_level, cli.log_format)?;

    log::debug!("Using data dir {}", config.data_dir.display());

    match cli.command {
        Command::Bulk {
            chain,
            count,
            user,
            out,
        } => run_bulk(&config, &chain, count, user, out),
        Command::Jobs { user } => list_jobs(&config, user),
        Command::Generate { chain, user } => generate_one(&config, &chain, user),
        Command::Profile { user, chain, clear } => show_profile(&config, user, chain, clear),
    }
}

fn resolve_config(cli: &Cli) -> anyhow::Result<Config> {
    let mut config = match &cli.config {
        Some(path) => load_config(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => Config::default(),
    };
    apply_env_overrides(&mut config)?;
    if let Some(dir) = &cli.data_dir {
        config.data_dir = dir.clone();
    }
    validate_config(&config)?;
    Ok(config)
}

fn run_bulk(
    config: &Config,
    chain: &str,
    count: u64,
    user: i64,
    out: PathBuf,
) -> anyhow::Result<ExitCode> {
    let store = Arc::new(JobStore::open(config.snapshot_path())?);
    let profiles = Arc::new(
        ProfileStore::open(&config.database_path()).context("Failed to open profile database")?,
    );
    let worker = Arc::new(BulkWorker::new(
        Arc::new(Bip39Deriver::new()),
        profiles,
        Arc::clone(&store),
        config.work_root(),
        config.worker_settings(),
    ));
    let controller = Arc::new(JobController::new(
        store,
        worker,
        config.job_limits(),
        config.admin_user_ids.iter().copied(),
        config.progress_interval(),
    ));

    let sink = Arc::new(
        ConsoleSink::new(out.clone())
            .with_context(|| format!("Cannot create output directory {}", out.display()))?,
    );
    let job = controller.submit(user, chain, count, sink.clone())?;
    eprintln!("Job {} started: {} x {}", job.id(), job.count(), job.chain());

    let on_signal = Arc::clone(&controller);
    ctrlc::set_handler(move || {
        let n = on_signal.cancel_all();
        log::warn!("Interrupted, cancelling {} job(s)", n);
    })
    .context("Failed to install Ctrl-C handler")?;

    let status = controller.wait(job.id()).unwrap_or(JobStatus::Failed);
    match status {
        JobStatus::Done => {
            for file in sink.delivered() {
                println!("{}", file.display());
            }
            Ok(ExitCode::SUCCESS)
        }
        other => {
            log::error!("Job {} ended {}", job.id(), other);
            Ok(ExitCode::FAILURE)
        }
    }
}

fn list_jobs(config: &Config, user: i64) -> anyhow::Result<ExitCode> {
    let is_admin = config.is_admin(user);
    let path = config.snapshot_path();
    // Shown as stored: another process may still be running these jobs.
    let mut jobs = match read_entries(&path) {
        Ok(jobs) => jobs,
        Err(StorageError::Serialize(e)) => {
            log::warn!("Snapshot {} is unreadable: {}", path.display(), e);
            Vec::new()
        }
        Err(e) => return Err(e.into()),
    };
    jobs.retain(|job| is_admin || job.user_id == user);
    jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));

    if jobs.is_empty() {
        println!("No jobs.");
        return Ok(ExitCode::SUCCESS);
    }
    for job in &jobs {
        let created = chrono::DateTime::<chrono::Utc>::from_timestamp(job.created_at, 0)
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{}  {:<7} {:<9} {}/{}  user {}  {}",
            job.id, job.chain, job.status, job.processed, job.count, job.user_id, created
        );
    }
    Ok(ExitCode::SUCCESS)
}

fn generate_one(config: &Config, chain: &str, user: i64) -> anyhow::Result<ExitCode> {
    let chain: Chain = chain.parse()?;
    let profiles = ProfileStore::open(&config.database_path())?;
    let service = WalletService::new(
        Arc::new(Bip39Deriver::new()),
        Arc::new(profiles),
        SeedCache::new(config.seed_ttl()),
        RateLimiter::per_minute(config.rate_limit_per_min),
        config.admin_user_ids.iter().copied(),
    );

    let wallet = service.generate(user, chain)?;
    println!("Chain:   {}", wallet.chain);
    println!("Path:    {}", wallet.derivation_path);
    println!("Address: {}", wallet.address);
    match service.reveal_seed(user) {
        Some(seed) => println!("Seed:    {}", seed.expose_secret()),
        None => bail!("Seed expired before it could be shown"),
    }
    Ok(ExitCode::SUCCESS)
}

fn show_profile(
    config: &Config,
    user: i64,
    chain: Option<String>,
    clear: bool,
) -> anyhow::Result<ExitCode> {
    let profiles = ProfileStore::open(&config.database_path())?;
    if clear {
        let removed = profiles.clear(user)?;
        println!("Removed {} saved wallet(s).", removed);
        return Ok(ExitCode::SUCCESS);
    }

    match chain {
        Some(chain) => {
            let chain: Chain = chain.parse()?;
            for wallet in profiles.list(user, Some(chain))? {
                println!(
                    "{}  {}  {}",
                    wallet.created_at.format("%Y-%m-%d %H:%M:%S"),
                    wallet.address,
                    wallet.derivation_path
                );
            }
        }
        None => {
            let counts = profiles.count_by_chain(user)?;
            if counts.is_empty() {
                println!("No saved wallets.");
            }
            for (chain, n) in counts {
                println!("{:<7} {}", chain, n);
            }
        }
    }
    Ok(ExitCode::SUCCESS)
}

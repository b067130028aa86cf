//! s3hsm: move files between an HSM and S3-compatible object storage
//!
//! Commands:
//!   store <key> <path>          - upload a file, print its location on stdout
//!   retrieve <path> <location>  - download the object at <location> into <path>
//!   purge <location>            - delete the object at <location>
//!   config show                 - display current configuration
//!
//! Stdout carries only the location printed by `store`; all diagnostics go
//! to stderr.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use secrecy::SecretString;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::Dispatch;

use s3hsm_core::config::HsmConfig;
use s3hsm_core::ConnectionParams;
use s3hsm_storage::{Connector, MemoryConnector, S3Connector};
use s3hsm_transfer::{Engine, FaultInjection, LocationSettings};

// ── CLI structure ──────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "s3hsm",
    version,
    about = "HSM connector for S3-compatible object stores",
    long_about = "s3hsm: store, retrieve and purge HSM files in S3, with optional per-object encryption"
)]
struct Cli {
    /// Path to the s3hsm configuration file
    #[arg(long, short = 'c', env = "S3HSM_CONFIG", default_value = "/etc/s3hsm/config.toml")]
    config: PathBuf,

    /// S3 access key id
    #[arg(long, env = "AWS_ACCESS_KEY_ID", hide_env_values = true)]
    access_key: Option<String>,

    /// S3 secret access key
    #[arg(long, env = "AWS_SECRET_ACCESS_KEY", hide_env_values = true)]
    secret_key: Option<String>,

    /// Log filter, e.g. "debug" or "s3hsm_transfer=debug" (overrides config)
    #[arg(long, env = "S3HSM_LOG")]
    log: Option<String>,

    /// Log format (overrides config)
    #[arg(long, value_enum)]
    log_format: Option<LogFormat>,

    /// Sleep this many seconds before doing anything
    #[arg(long, env = "S3HSM_INJECT_DELAY", value_name = "SECS")]
    inject_delay: Option<u64>,

    /// Exit with this code instead of contacting the backend
    #[arg(long, env = "S3HSM_INJECT_FAIL", value_name = "CODE")]
    inject_fail: Option<i32>,

    /// Object store backend
    #[arg(long, value_enum, default_value_t = Backend::S3)]
    backend: Backend,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Upload a file and print its location
    #[command(alias = "put")]
    Store {
        /// Object key (usually the HSM file id)
        key: String,
        /// Local file to upload
        path: PathBuf,
        /// Target bucket (default: location.default_bucket)
        #[arg(long, short = 'b')]
        bucket: Option<String>,
        /// Encrypt the object with a fresh per-object key
        #[arg(long, conflicts_with = "no_encrypt")]
        encrypt: bool,
        /// Store in the clear even if crypto.enabled is set
        #[arg(long)]
        no_encrypt: bool,
    },

    /// Download an object into a local file
    #[command(alias = "get")]
    Retrieve {
        /// Local destination (created or truncated)
        path: PathBuf,
        /// Location printed by `store`
        location: String,
    },

    /// Delete an object
    #[command(alias = "remove")]
    Purge {
        /// Location printed by `store`
        location: String,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the active configuration (merged defaults + config file)
    Show,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Backend {
    /// S3-compatible endpoint from [storage]
    S3,
    /// Process-local memory, for dry runs
    Memory,
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = load_config(&cli.config).await?;
    apply_overrides(&mut config, &cli);

    let diagnostics = init_logging(&config)?;
    let _guard = tracing::dispatcher::set_default(&diagnostics);
    if !cli.config.exists() {
        tracing::debug!("config file not found: {}  (using defaults)", cli.config.display());
    }

    if let Commands::Config { action: ConfigAction::Show } = cli.command {
        return cmd_config_show(&config, &cli.config);
    }

    let fault = FaultInjection::from_config(&config.fault).context("fault injection settings")?;
    if let Err(injected) = fault.inject().await {
        eprintln!("s3hsm: {injected}");
        std::process::exit(injected.code());
    }

    let connector = build_connector(&config, &cli)?;
    let engine = Engine::new(connector, LocationSettings::from_config(&config), diagnostics);

    match cli.command {
        Commands::Store { key, path, bucket, encrypt, no_encrypt } => {
            let bucket = bucket.unwrap_or_else(|| config.location.default_bucket.clone());
            let encrypt = wants_encryption(&config, encrypt, no_encrypt);
            cmd_store(&engine, &key, &path, &bucket, encrypt).await
        }
        Commands::Retrieve { path, location } => cmd_retrieve(&engine, &path, &location).await,
        Commands::Purge { location } => cmd_purge(&engine, &location).await,
        Commands::Config { action: ConfigAction::Show } => cmd_config_show(&config, &cli.config),
    }
}

// ── Config loading ────────────────────────────────────────────────────────────

async fn load_config(path: &Path) -> Result<HsmConfig> {
    if path.exists() {
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("reading config: {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("parsing config: {}", path.display()))
    } else {
        Ok(HsmConfig::default())
    }
}

/// Command-line flags win over the config file.
fn apply_overrides(config: &mut HsmConfig, cli: &Cli) {
    if let Some(level) = &cli.log {
        config.log.level = level.clone();
    }
    if let Some(format) = cli.log_format {
        config.log.format = match format {
            LogFormat::Text => "text".into(),
            LogFormat::Json => "json".into(),
        };
    }
    if cli.inject_delay.is_some() {
        config.fault.delay_secs = cli.inject_delay;
    }
    if cli.inject_fail.is_some() {
        config.fault.fail_code = cli.inject_fail;
    }
}

fn wants_encryption(config: &HsmConfig, encrypt: bool, no_encrypt: bool) -> bool {
    encrypt || (config.crypto.enabled && !no_encrypt)
}

// ── Logging ───────────────────────────────────────────────────────────────────

/// Build the diagnostics dispatcher. Output goes to stderr only.
///
/// It is handed to the engine rather than installed process-wide; `log`
/// records from the storage layer are bridged into whichever dispatcher is
/// current.
fn init_logging(config: &HsmConfig) -> Result<Dispatch> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter};

    let mut directives = config.log.level.clone();
    if config.storage.trace {
        directives.push_str(",opendal=debug,s3hsm_storage=debug");
    }
    let filter = EnvFilter::try_new(&directives)
        .with_context(|| format!("invalid log filter '{directives}'"))?;

    let dispatch = match config.log.format.as_str() {
        "json" => Dispatch::new(
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_writer(std::io::stderr)),
        ),
        "text" => Dispatch::new(
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(std::io::stderr)),
        ),
        other => anyhow::bail!("unknown log format '{other}' (expected \"text\" or \"json\")"),
    };

    // Fails only if a logger is already installed, which is harmless here.
    let _ = tracing_log::LogTracer::init();
    Ok(dispatch)
}

// ── Backend selection ─────────────────────────────────────────────────────────

fn build_connector(config: &HsmConfig, cli: &Cli) -> Result<Arc<dyn Connector>> {
    match cli.backend {
        Backend::Memory => Ok(Arc::new(
            MemoryConnector::new().context("creating memory backend")?,
        )),
        Backend::S3 => {
            let access_key = cli.access_key.as_deref().context(
                "S3 credentials not set\n\
                 Set AWS_ACCESS_KEY_ID and AWS_SECRET_ACCESS_KEY environment variables\n\
                 or pass --access-key and --secret-key.",
            )?;
            let secret_key = cli
                .secret_key
                .clone()
                .context("AWS_SECRET_ACCESS_KEY environment variable not set")?;
            let params = ConnectionParams::from_config(
                &config.storage,
                access_key,
                SecretString::from(secret_key),
            )
            .context("invalid [storage] settings")?;
            Ok(Arc::new(S3Connector::new(params)))
        }
    }
}

// ── `s3hsm store` ─────────────────────────────────────────────────────────────

async fn cmd_store(
    engine: &Engine,
    key: &str,
    path: &Path,
    bucket: &str,
    encrypt: bool,
) -> Result<()> {
    let report = engine
        .store(key, path, bucket, encrypt)
        .await
        .with_context(|| format!("storing {} as {bucket}/{key}", path.display()))?;
    println!("{}", report.location);
    Ok(())
}

// ── `s3hsm retrieve` ──────────────────────────────────────────────────────────

async fn cmd_retrieve(engine: &Engine, path: &Path, location: &str) -> Result<()> {
    engine
        .retrieve(location, path)
        .await
        .with_context(|| format!("retrieving into {}", path.display()))?;
    Ok(())
}

// ── `s3hsm purge` ─────────────────────────────────────────────────────────────

async fn cmd_purge(engine: &Engine, location: &str) -> Result<()> {
    engine.purge(location).await.context("purging object")?;
    Ok(())
}

// ── `s3hsm config show` ───────────────────────────────────────────────────────

fn cmd_config_show(config: &HsmConfig, config_path: &Path) -> Result<()> {
    if config_path.exists() {
        println!("# Configuration from: {}", config_path.display());
    } else {
        println!("# Configuration: defaults (no file at {})", config_path.display());
    }
    println!();
    let rendered = toml::to_string_pretty(config).context("serializing config to TOML")?;
    print!("{rendered}");
    Ok(())
}

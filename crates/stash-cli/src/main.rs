//! stash CLI entrypoint.

use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

mod config;
mod handlers;


use config::{Backend, CompressionArg, LogFormat, OutputFormat};

#[derive(Parser, Debug)]
#[command(name = "stash")]
#[command(author, version, about = "Branch-keyed build cache for CI pipelines", long_about = None)]
pub struct Cli {
    /// Repository identifier (falls back to DRONE_REPO)
    #[arg(long, env = "PLUGIN_REPO")]
    pub repo: Option<String>,

    /// Branch being built (falls back to DRONE_COMMIT_BRANCH)
    #[arg(long, env = "PLUGIN_BRANCH")]
    pub branch: Option<String>,

    /// Branch whose cache is used when the current branch has none
    #[arg(long, env = "PLUGIN_DEFAULT_BRANCH", default_value = "master")]
    pub default_branch: String,

    /// Directories to cache, comma-separated or repeated
    #[arg(long = "mount", env = "PLUGIN_MOUNT", value_delimiter = ',')]
    pub mounts: Vec<PathBuf>,

    /// Archive mounts and upload them
    #[arg(long, env = "PLUGIN_REBUILD")]
    pub rebuild: bool,

    /// Download and extract cached mounts
    #[arg(long, env = "PLUGIN_RESTORE")]
    pub restore: bool,

    /// Canned ACL for uploaded objects
    #[arg(long, env = "PLUGIN_ACL", default_value = "private")]
    pub acl: String,

    /// Server-side encryption value (e.g. AES256)
    #[arg(long, env = "PLUGIN_ENCRYPTION")]
    pub encryption: Option<String>,

    /// Custom S3 endpoint (falls back to S3_ENDPOINT)
    #[arg(long, env = "PLUGIN_ENDPOINT")]
    pub endpoint: Option<String>,

    /// Access key (falls back to AWS_ACCESS_KEY_ID)
    #[arg(long, env = "PLUGIN_ACCESS_KEY", hide_env_values = true)]
    pub access_key: Option<String>,

    /// Secret key (falls back to AWS_SECRET_ACCESS_KEY)
    #[arg(long, env = "PLUGIN_SECRET_KEY", hide_env_values = true)]
    pub secret_key: Option<String>,

    /// Bucket holding cache objects
    #[arg(long, env = "PLUGIN_BUCKET")]
    pub bucket: Option<String>,

    /// Bucket region (falls back to S3_REGION, then us-east-1)
    #[arg(long, env = "PLUGIN_REGION")]
    pub region: Option<String>,

    /// Use path-style addressing (MinIO)
    #[arg(long, env = "PLUGIN_PATH_STYLE")]
    pub path_style: bool,

    /// Storage backend
    #[arg(long, env = "PLUGIN_BACKEND", value_enum, default_value_t = Backend::S3)]
    pub backend: Backend,

    /// Root directory for the filesystem backend
    #[arg(long, env = "PLUGIN_CACHE_ROOT")]
    pub cache_root: Option<PathBuf>,

    /// Prefix prepended verbatim to every object key
    #[arg(long, env = "PLUGIN_KEY_PREFIX")]
    pub key_prefix: Option<String>,

    /// Archive compression
    #[arg(long, env = "PLUGIN_COMPRESSION", value_enum, default_value_t = CompressionArg::Zstd)]
    pub compression: CompressionArg,

    /// Mounts processed concurrently
    #[arg(long, env = "PLUGIN_PARALLELISM", default_value_t = 4)]
    pub parallelism: usize,

    /// Overall deadline in seconds
    #[arg(long, env = "PLUGIN_TIMEOUT")]
    pub timeout_secs: Option<u64>,

    /// Retries for transient transport errors
    #[arg(long, env = "PLUGIN_RETRIES", default_value_t = 3)]
    pub retries: u32,

    /// Directory mounts are relative to
    #[arg(long, env = "PLUGIN_WORKDIR")]
    pub workdir: Option<PathBuf>,

    /// Load environment variables from a file before parsing
    #[arg(long, env = "PLUGIN_ENV_FILE")]
    pub env_file: Option<PathBuf>,

    /// Summary format
    #[arg(long, env = "PLUGIN_OUTPUT", value_enum, default_value_t = OutputFormat::Text)]
    pub output: OutputFormat,

    /// Log format
    #[arg(long, env = "PLUGIN_LOG_FORMAT", value_enum, default_value_t = LogFormat::Pretty)]
    pub log_format: LogFormat,
}

fn init_logging(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    match format {
        LogFormat::Pretty => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

fn main() -> ExitCode {
    if let Err(e) = config::preload_env_file(std::env::args_os()) {
        eprintln!("error: {:#}", e);
        return ExitCode::from(handlers::EXIT_CONFIG);
    }

    let cli = Cli::parse();
    init_logging(cli.log_format);

    let config = match config::build_config(&cli, |name| std::env::var(name).ok()) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "Invalid configuration");
            return ExitCode::from(handlers::EXIT_CONFIG);
        }
    };

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            tracing::error!(error = %e, "Failed to start async runtime");
            return ExitCode::FAILURE;
        }
    };

    let status = runtime.block_on(handlers::run(config, cli.output));

    // Blocking archive jobs aborted by the deadline are not waited for.
    runtime.shutdown_timeout(Duration::from_secs(1));

    match status {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            tracing::error!(error = %format!("{:#}", e), "Cache run aborted");
            ExitCode::FAILURE
        }
    }
}

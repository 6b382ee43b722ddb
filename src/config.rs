use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

pub const DEFAULT_API_URL: &str = "http://localhost:8080";
pub const DEFAULT_LISTEN: &str = "127.0.0.1:3000";

const DATA_DIR_NAME: &str = ".aceai";
const DEFAULT_LOG_FILTER: &str = "aceai=info";

/// `$HOME/.aceai`, falling back to the working directory when no home is set.
pub fn default_data_dir() -> PathBuf {
    std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .map(PathBuf::from)
        .unwrap_or_default()
        .join(DATA_DIR_NAME)
}

/// Logs go to stderr so they never interleave with prompts on stdout.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

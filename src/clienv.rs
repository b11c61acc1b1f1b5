//! Path and environment resolution for everything stackctl persists.
//!
//! Every path can be overridden through a `STACKCTL_*` environment variable;
//! otherwise it lands under the platform data directory.

use std::path::PathBuf;

const STACK_SUBDIR: &str = "stackctl";

pub const DEFAULT_DB_PORT: u16 = 5432;
pub const DEFAULT_WEB_PORT: u16 = 8443;
pub const DEFAULT_RETRY_MAX: u32 = 20;
pub const DEFAULT_RETRY_DELAY_SECS: u64 = 1;

/// Service segment of the versioned API paths (`/api/v1/stackd/version`).
pub const SERVICE_NAME: &str = "stackd";

fn env_opt(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

/// Stack data directory ($STACKCTL_DATA_DIR or ~/.local/share/stackctl)
pub fn data_dir() -> PathBuf {
    let dir = env_opt("STACKCTL_DATA_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|| {
            dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("~/.local/share"))
                .join(STACK_SUBDIR)
        });
    tracing::trace!(dir = %dir.display(), "Resolved data directory");
    dir
}

/// Persisted database config ($STACKCTL_DB_CONFIG or <data>/database.yml)
pub fn db_config_path() -> PathBuf {
    let path = env_opt("STACKCTL_DB_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|| data_dir().join("database.yml"));
    tracing::trace!(path = %path.display(), "Database config path");
    path
}

/// Postgres data directory for the self-owned local cluster
pub fn pg_data_dir() -> PathBuf {
    data_dir().join("postgres")
}

/// Postgres engine log, inspected after a failed start
pub fn pg_log_path() -> PathBuf {
    data_dir().join("logs").join("postgres.log")
}

/// Web daemon PID file ($STACKCTL_PID_FILE or <data>/stackd.pid)
pub fn web_pid_path() -> PathBuf {
    let path = env_opt("STACKCTL_PID_FILE")
        .map(PathBuf::from)
        .unwrap_or_else(|| data_dir().join("stackd.pid"));
    tracing::trace!(path = %path.display(), "Web daemon PID path");
    path
}

/// Web daemon log file ($STACKCTL_WEB_LOG or <data>/logs/stackd.log)
pub fn web_log_path() -> PathBuf {
    let path = env_opt("STACKCTL_WEB_LOG")
        .map(PathBuf::from)
        .unwrap_or_else(|| data_dir().join("logs").join("stackd.log"));
    tracing::trace!(path = %path.display(), "Web daemon log path");
    path
}

/// Built-in default TLS private key location
pub fn default_tls_key_path() -> PathBuf {
    data_dir().join("certs").join("stackd.key")
}

/// Built-in default TLS certificate location
pub fn default_tls_cert_path() -> PathBuf {
    data_dir().join("certs").join("stackd.crt")
}

/// Web daemon launch command ($STACKCTL_WEB_COMMAND or "stackd")
pub fn web_command() -> String {
    let cmd = env_opt("STACKCTL_WEB_COMMAND").unwrap_or_else(|| "stackd".to_string());
    tracing::trace!(cmd = %cmd, "Web daemon command");
    cmd
}

/// Console tool invoked after bootstrap to register the default data service
/// ($STACKCTL_CONSOLE_COMMAND or "stack-console")
pub fn console_command() -> String {
    env_opt("STACKCTL_CONSOLE_COMMAND").unwrap_or_else(|| "stack-console".to_string())
}

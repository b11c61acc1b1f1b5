use std::path::PathBuf;
use thiserror::Error;

/// Stage of the first-time bootstrap sequence, used so a failure names
/// exactly which REST call the operator needs to retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapStage {
    Workspace,
    User,
    Token,
}

impl std::fmt::Display for BootstrapStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BootstrapStage::Workspace => write!(f, "workspace creation"),
            BootstrapStage::User => write!(f, "admin user creation"),
            BootstrapStage::Token => write!(f, "token generation"),
        }
    }
}

#[derive(Error, Debug)]
pub enum OrchestratorError {
    /// Required external tooling is missing. Detected before any mutating
    /// action; lists every missing binary, not just the first.
    #[error("missing required tools: {}", .0.join(", "))]
    Environment(Vec<String>),

    /// Operation requested against a component in an incompatible status.
    #[error("{0}")]
    Precondition(String),

    /// Transient network failure (connection refused, timeout). Retried only
    /// inside the online-poll budget.
    #[error("network error: {0}")]
    Network(String),

    /// TLS validation failure. Never retried; requires the operator to
    /// reconcile certificate options.
    #[error("TLS trust error: {0}")]
    Trust(String),

    /// Malformed or unexpected REST response during bootstrap.
    #[error("{stage} failed: {reason}")]
    Protocol {
        stage: BootstrapStage,
        reason: String,
    },

    /// Health-check response with an unexpected shape or status.
    #[error("unexpected health-check response: {0}")]
    UnexpectedResponse(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("failed to parse config at {path}: {source}")]
    ConfigParse {
        path: PathBuf,
        source: serde_yaml::Error,
    },

    #[error("external command failed: {0}")]
    CommandFailed(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;

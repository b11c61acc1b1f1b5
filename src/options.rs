//! Effective options for one invocation.
//!
//! Built once in `main` from defaults, the persisted config, and explicit
//! operator input, then threaded read-only into every operation.

use std::path::PathBuf;

use crate::args::TargetArgs;
use crate::clienv;
use crate::db_config::DbConfig;

#[derive(Debug, Clone)]
pub struct ServiceOptions {
    pub db_host: String,
    pub db_port: u16,
    /// Connection string for an externally managed database; selects the
    /// standalone driver when present.
    pub external_url: Option<String>,
    pub web_port: u16,
    pub tls_cert_path: PathBuf,
    pub tls_key_path: PathBuf,
    pub ssl_skip_verify: bool,
    pub retry_max: u32,
    pub retry_delay_secs: u64,
    pub web_username: Option<String>,
    pub web_password: Option<String>,
    /// Suppress every prompt and take generated/default values.
    pub accept_defaults: bool,
    /// Set for delete/reinit; gates TLS regeneration and data removal.
    pub destructive: bool,
    pub register_console: bool,
}

impl ServiceOptions {
    pub fn resolve(args: &TargetArgs, persisted: Option<&DbConfig>, destructive: bool) -> Self {
        // Explicit flag beats the persisted port, which beats the default.
        let db_port = args
            .db_port
            .or_else(|| persisted.map(|c| c.production.port))
            .unwrap_or(clienv::DEFAULT_DB_PORT);
        tracing::debug!(db_port, "Resolved effective database port");

        Self {
            db_host: args.db_host.clone().unwrap_or_else(|| "localhost".to_string()),
            db_port,
            external_url: args.external_url.clone(),
            web_port: args.web_port.unwrap_or(clienv::DEFAULT_WEB_PORT),
            tls_cert_path: args
                .ssl_cert
                .clone()
                .unwrap_or_else(clienv::default_tls_cert_path),
            tls_key_path: args
                .ssl_key
                .clone()
                .unwrap_or_else(clienv::default_tls_key_path),
            ssl_skip_verify: args.ssl_skip_verify,
            retry_max: args.retry_max.unwrap_or(clienv::DEFAULT_RETRY_MAX),
            retry_delay_secs: args.retry_delay.unwrap_or(clienv::DEFAULT_RETRY_DELAY_SECS),
            web_username: args.username.clone(),
            web_password: args.password.clone(),
            accept_defaults: args.yes,
            destructive,
            register_console: !args.no_console,
        }
    }

    /// True when the operator has not supplied custom TLS material, i.e. both
    /// paths are the built-in defaults. Only then may a destructive reinit
    /// regenerate the certificate.
    pub fn using_default_tls_paths(&self) -> bool {
        self.tls_cert_path == clienv::default_tls_cert_path()
            && self.tls_key_path == clienv::default_tls_key_path()
    }

    pub fn base_url(&self) -> String {
        format!("https://localhost:{}", self.web_port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db_config::{DbConfig, DbProfile};

    fn bare_args() -> TargetArgs {
        TargetArgs {
            component: crate::args::Target::All,
            db_host: None,
            db_port: None,
            external_url: None,
            web_port: None,
            ssl_cert: None,
            ssl_key: None,
            ssl_skip_verify: false,
            retry_max: None,
            retry_delay: None,
            username: None,
            password: None,
            yes: false,
            no_console: false,
        }
    }

    fn persisted_with_port(port: u16) -> DbConfig {
        let profile = DbProfile {
            database: "stack".to_string(),
            username: "stack".to_string(),
            password: "x".to_string(),
            host: "localhost".to_string(),
            port,
            pool: 10,
        };
        DbConfig {
            production: profile.clone(),
            test: DbProfile {
                database: "stack_test".to_string(),
                ..profile
            },
        }
    }

    #[test]
    fn test_persisted_port_beats_default() {
        let opts = ServiceOptions::resolve(&bare_args(), Some(&persisted_with_port(5999)), false);
        assert_eq!(opts.db_port, 5999);
    }

    #[test]
    fn test_explicit_port_beats_persisted() {
        let mut args = bare_args();
        args.db_port = Some(6001);
        let opts = ServiceOptions::resolve(&args, Some(&persisted_with_port(5999)), false);
        assert_eq!(opts.db_port, 6001);
    }

    #[test]
    fn test_default_port_without_persisted() {
        let opts = ServiceOptions::resolve(&bare_args(), None, false);
        assert_eq!(opts.db_port, clienv::DEFAULT_DB_PORT);
    }

    #[test]
    fn test_custom_cert_path_is_not_default() {
        let mut args = bare_args();
        args.ssl_cert = Some(PathBuf::from("/etc/ssl/custom.crt"));
        let opts = ServiceOptions::resolve(&args, None, false);
        assert!(!opts.using_default_tls_paths());
    }
}

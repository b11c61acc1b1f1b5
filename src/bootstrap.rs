//! First-time bootstrap: provisions the default workspace, the admin user,
//! and an API token against the freshly started web service, then hands the
//! credentials to the operator.
//!
//! Each stage's failure aborts the remaining stages and is reported under its
//! own name so the operator knows which call to retry.

use serde_json::json;
use tokio::process::Command;

use crate::client::{classify_request_error, ApiClient};
use crate::clienv;
use crate::credentials::WebCredentials;
use crate::error::{BootstrapStage, OrchestratorError, Result};
use crate::options::ServiceOptions;

pub const DEFAULT_WORKSPACE: &str = "default";

fn stage_error(stage: BootstrapStage, reason: impl Into<String>) -> OrchestratorError {
    OrchestratorError::Protocol {
        stage,
        reason: reason.into(),
    }
}

/// A creation call succeeds only when the response echoes back the value we
/// sent; anything else is a per-stage protocol error.
pub fn expect_echo(
    stage: BootstrapStage,
    body: &serde_json::Value,
    field: &str,
    expected: &str,
) -> Result<()> {
    match body.get(field).and_then(|v| v.as_str()) {
        Some(value) if value == expected => Ok(()),
        Some(other) => Err(stage_error(
            stage,
            format!("expected {field} '{expected}' in response, got '{other}'"),
        )),
        None => Err(stage_error(
            stage,
            format!("response has no {field} field"),
        )),
    }
}

pub fn extract_token(body: &serde_json::Value) -> Result<String> {
    match body.get("token").and_then(|v| v.as_str()) {
        Some(token) if !token.is_empty() => Ok(token.to_string()),
        _ => Err(stage_error(
            BootstrapStage::Token,
            "response has no token".to_string(),
        )),
    }
}

async fn post_stage(
    client: &ApiClient,
    stage: BootstrapStage,
    path: &str,
    body: &serde_json::Value,
) -> Result<serde_json::Value> {
    tracing::debug!(%stage, path, "Bootstrap call");
    let resp = client
        .post_json(path, body)
        .await
        .map_err(|e| stage_error(stage, classify_request_error(&e).to_string()))?;

    let status = resp.status();
    let json = resp.json::<serde_json::Value>().await.unwrap_or_default();
    if !status.is_success() {
        return Err(stage_error(stage, format!("HTTP {status}: {json}")));
    }
    Ok(json)
}

/// Runs the three-stage sequence; on success the token lands in `creds`.
pub async fn run(client: &ApiClient, creds: &mut WebCredentials) -> Result<()> {
    let body = post_stage(
        client,
        BootstrapStage::Workspace,
        "/api/v1/workspaces",
        &json!({ "name": DEFAULT_WORKSPACE }),
    )
    .await?;
    expect_echo(BootstrapStage::Workspace, &body, "name", DEFAULT_WORKSPACE)?;

    let body = post_stage(
        client,
        BootstrapStage::User,
        "/api/v1/users",
        &json!({
            "username": creds.username,
            "password": creds.password,
            "admin": true,
        }),
    )
    .await?;
    expect_echo(BootstrapStage::User, &body, "username", &creds.username)?;

    let body = post_stage(
        client,
        BootstrapStage::Token,
        "/api/v1/auth/generate-token",
        &json!({
            "username": creds.username,
            "password": creds.password,
        }),
    )
    .await?;
    creds.token = Some(extract_token(&body)?);

    tracing::info!("Bootstrap sequence complete");
    Ok(())
}

/// Assembles the copy-pasteable reconnect command shown after bootstrap.
pub fn reconnect_command(options: &ServiceOptions, token: &str) -> String {
    let mut cmd = format!(
        "{} connect {} --token {token}",
        clienv::console_command(),
        options.base_url()
    );
    if options.ssl_skip_verify {
        cmd.push_str(" --skip-verify");
    } else {
        cmd.push_str(&format!(" --cert {}", options.tls_cert_path.display()));
    }
    cmd
}

/// Prints credentials for the operator. They are displayed exactly once and
/// never persisted by stackctl.
pub fn print_summary(options: &ServiceOptions, creds: &WebCredentials) {
    let token = creds.token.as_deref().unwrap_or("<none>");
    println!();
    println!("Web service is ready.");
    println!("  Username:  {}", creds.username);
    println!("  Password:  {}", creds.password);
    println!("  API token: {token}");
    println!("  Account:   {}/api/v1/auth/account", options.base_url());
    println!();
    println!("Reconnect with:");
    println!("  {}", reconnect_command(options, token));
    println!();
    println!("Store these credentials now; stackctl does not keep a copy.");
}

/// Registers the connection as the console tool's default data service.
/// External collaborator interface; a failure here is reported but does not
/// undo a completed bootstrap.
pub async fn register_data_service(options: &ServiceOptions, creds: &WebCredentials) {
    let Some(token) = creds.token.as_deref() else {
        return;
    };

    let console = clienv::console_command();
    let mut cmd = Command::new(&console);
    cmd.args(["data-service", "set-default", &options.base_url(), "--token", token]);
    if options.ssl_skip_verify {
        cmd.arg("--skip-verify");
    } else {
        cmd.arg("--cert").arg(&options.tls_cert_path);
    }

    match cmd.status().await {
        Ok(status) if status.success() => {
            tracing::info!("Registered default data service with the console");
        }
        Ok(status) => {
            eprintln!("warning: {console} exited with {status}; register the data service manually");
        }
        Err(e) => {
            eprintln!("warning: could not run {console} ({e}); register the data service manually");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_echo_match_passes() {
        let body = json!({ "name": "default" });
        expect_echo(BootstrapStage::Workspace, &body, "name", "default").unwrap();
    }

    #[test]
    fn test_workspace_echo_mismatch_is_workspace_failure() {
        let body = json!({ "name": "something-else" });
        let err = expect_echo(BootstrapStage::Workspace, &body, "name", "default").unwrap_err();
        assert!(matches!(
            err,
            OrchestratorError::Protocol {
                stage: BootstrapStage::Workspace,
                ..
            }
        ));
    }

    #[test]
    fn test_user_echo_missing_field_is_user_failure() {
        let body = json!({ "id": 7 });
        let err = expect_echo(BootstrapStage::User, &body, "username", "admin").unwrap_err();
        assert!(matches!(
            err,
            OrchestratorError::Protocol {
                stage: BootstrapStage::User,
                ..
            }
        ));
    }

    #[test]
    fn test_empty_token_is_token_failure() {
        assert!(extract_token(&json!({ "token": "" })).is_err());
        assert!(extract_token(&json!({})).is_err());
        assert_eq!(extract_token(&json!({ "token": "abc" })).unwrap(), "abc");
    }

    #[test]
    fn test_reconnect_command_carries_pin_path_or_skip_flag() {
        let args = crate::args::TargetArgs {
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
        };
        let pinned = ServiceOptions::resolve(&args, None, false);
        let cmd = reconnect_command(&pinned, "tok");
        assert!(cmd.contains("--cert"));
        assert!(!cmd.contains("--skip-verify"));

        let mut skip_args = args;
        skip_args.ssl_skip_verify = true;
        let skipping = ServiceOptions::resolve(&skip_args, None, false);
        let cmd = reconnect_command(&skipping, "tok");
        assert!(cmd.contains("--skip-verify"));
    }
}

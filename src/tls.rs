//! Self-signed TLS material for the web daemon.
//!
//! The generated certificate does double duty: the daemon serves TLS with it,
//! and the orchestrator pins it as the trust anchor for its own HTTPS client.

use std::fs;
use std::path::Path;

use crate::error::{OrchestratorError, Result};
use crate::options::ServiceOptions;

/// Regeneration policy. Generate when material is missing; regenerate default
/// material only on a destructive run, so operator-supplied certificates are
/// never silently overwritten.
pub fn should_generate(
    key_exists: bool,
    cert_exists: bool,
    using_default_paths: bool,
    destructive: bool,
) -> bool {
    if !key_exists || !cert_exists {
        return true;
    }
    using_default_paths && destructive
}

/// Ensures key/cert exist per the policy above. Returns true when fresh
/// material was generated.
pub fn ensure_material(options: &ServiceOptions) -> Result<bool> {
    let key_exists = options.tls_key_path.exists();
    let cert_exists = options.tls_cert_path.exists();

    if !should_generate(
        key_exists,
        cert_exists,
        options.using_default_tls_paths(),
        options.destructive,
    ) {
        tracing::debug!("Keeping existing TLS material");
        return Ok(false);
    }

    if (key_exists || cert_exists) && !options.using_default_tls_paths() {
        // Refuse to fill in half of an operator-supplied pair.
        return Err(OrchestratorError::Config(format!(
            "partial TLS material at {} / {}; supply both files or neither",
            options.tls_key_path.display(),
            options.tls_cert_path.display()
        )));
    }

    generate(&options.tls_key_path, &options.tls_cert_path)?;
    Ok(true)
}

pub fn generate(key_path: &Path, cert_path: &Path) -> Result<()> {
    let hostnames = vec!["localhost".to_string(), "127.0.0.1".to_string()];
    let rcgen::CertifiedKey { cert, key_pair } = rcgen::generate_simple_self_signed(hostnames)
        .map_err(|e| {
            OrchestratorError::Config(format!("failed to generate self-signed certificate: {e}"))
        })?;

    for path in [key_path, cert_path] {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
    }

    fs::write(cert_path, cert.pem())?;
    fs::write(key_path, key_pair.serialize_pem())?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(key_path, fs::Permissions::from_mode(0o600))?;
    }

    tracing::info!(
        key = %key_path.display(),
        cert = %cert_path.display(),
        "Generated self-signed TLS material"
    );
    Ok(())
}

pub fn remove_material(options: &ServiceOptions) -> Result<()> {
    for path in [&options.tls_key_path, &options.tls_cert_path] {
        if path.exists() {
            fs::remove_file(path)?;
            tracing::debug!(path = %path.display(), "Removed TLS file");
        }
    }
    Ok(())
}

//! Post-registration provisioning hook.
//!
//! Spawns an external command (certificate issuance, vhost setup, …) with
//! the new tenant's subdomain as its sole argument. Runs detached from the
//! registration response; failures are logged and never surfaced to the
//! registering user.

use crate::config::ProvisionConfig;

pub fn provision_tenant(config: &ProvisionConfig, subdomain: &str) {
    let Some(command) = config.command.clone() else {
        return;
    };
    let subdomain = subdomain.to_string();

    tokio::spawn(async move {
        let result = tokio::process::Command::new(&command)
            .arg(&subdomain)
            .status()
            .await;
        match result {
            Ok(status) if status.success() => {
                tracing::info!(subdomain = %subdomain, "provisioning hook finished");
            }
            Ok(status) => {
                tracing::warn!(subdomain = %subdomain, %status, "provisioning hook exited nonzero");
            }
            Err(e) => {
                tracing::warn!(subdomain = %subdomain, error = %e, "provisioning hook failed to start");
            }
        }
    });
}

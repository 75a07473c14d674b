//! Password file provisioning through `mosquitto_passwd`.

use std::{fs::Permissions, os::unix::fs::PermissionsExt, path::Path, process::Stdio};

use tracing::{debug, info};

use super::{
    error::BrokerError,
    launch::Toolchain,
    options::BrokerConfig,
    render::{write_secret, Layout, PASSWD_FILE},
};

/// Hashes every account into the password file, one invocation at a time.
///
/// The file is created empty first so a broker with no accounts still
/// finds it. The first account truncates (`-c`), the rest append, so the
/// file ends up in list order.
pub async fn provision(
    config: &BrokerConfig,
    toolchain: &Toolchain,
    workdir: &Path,
    layout: &Layout,
) -> Result<(), BrokerError> {
    let path = workdir.join(PASSWD_FILE);
    write_secret(&path, b"")
        .await
        .map_err(|e| BrokerError::provisioning(&format!("create {}", path.display()), e))?;

    for (index, account) in config.passwd.iter().enumerate() {
        let Some(plan) = toolchain.passwd_plan(
            config,
            workdir,
            layout,
            &account.username,
            &account.password,
            index == 0,
        ) else {
            break;
        };
        debug!("Hashing password for '{}'", account.username);

        let output = plan
            .into_command()
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| BrokerError::provisioning("run mosquitto_passwd", e))?;

        if !output.status.success() {
            return Err(BrokerError::Provisioning(format!(
                "mosquitto_passwd failed for '{}' ({}): {}",
                account.username,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
    }

    // `-c` may have recreated the file with the tool's own umask.
    tokio::fs::set_permissions(&path, Permissions::from_mode(0o600))
        .await
        .map_err(|e| BrokerError::provisioning(&format!("chmod {}", path.display()), e))?;

    info!("Provisioned {} account(s)", config.passwd.len());
    Ok(())
}

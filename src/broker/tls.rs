//! Self-signed certificate pair for `mqtts` and `wss` listeners.

use std::path::Path;

use rcgen::{generate_simple_self_signed, CertifiedKey};
use tracing::info;

use super::{
    error::BrokerError,
    options::BrokerConfig,
    render::{write_secret, CERT_FILE, KEY_FILE},
};

/// Subject alternative names: listener names in order, without duplicates,
/// or `localhost` when no listener is named.
pub fn subject_names(config: &BrokerConfig) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for name in config.listen.iter().filter_map(|l| l.name.as_deref()) {
        if !name.is_empty() && !names.iter().any(|n| n == name) {
            names.push(name.to_string());
        }
    }
    if names.is_empty() {
        names.push("localhost".to_string());
    }
    names
}

/// Generates the pair and writes PEM files into `workdir`.
pub async fn provision(config: &BrokerConfig, workdir: &Path) -> Result<(), BrokerError> {
    let names = subject_names(config);
    let CertifiedKey { cert, signing_key } = generate_simple_self_signed(names.clone())?;

    for (file, pem) in [(CERT_FILE, cert.pem()), (KEY_FILE, signing_key.serialize_pem())] {
        let path = workdir.join(file);
        write_secret(&path, pem.as_bytes())
            .await
            .map_err(|e| BrokerError::provisioning(&format!("write {}", path.display()), e))?;
    }

    info!("Generated self-signed certificate for {:?}", names);
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::{fs, os::unix::fs::PermissionsExt};

    use tempfile::TempDir;

    use super::*;
    use crate::broker::options::{BrokerOverrides, Listener, Protocol};

    #[test]
    fn names_fall_back_to_localhost() {
        assert_eq!(subject_names(&BrokerConfig::default()), ["localhost"]);
    }

    #[test]
    fn names_are_deduplicated_in_order() {
        let config = BrokerConfig::merge(BrokerOverrides {
            listen: Some(vec![
                Listener::new(Protocol::Mqtts, "127.0.0.1", 8883).with_name("b.local"),
                Listener::new(Protocol::Wss, "127.0.0.1", 8443).with_name("a.local"),
                Listener::new(Protocol::Mqtt, "127.0.0.1", 1883).with_name("b.local"),
            ]),
            ..Default::default()
        });
        assert_eq!(subject_names(&config), ["b.local", "a.local"]);
    }

    #[tokio::test]
    async fn writes_pem_pair_with_private_modes() {
        let dir = TempDir::new().unwrap();
        provision(&BrokerConfig::default(), dir.path()).await.unwrap();

        let cert = fs::read_to_string(dir.path().join(CERT_FILE)).unwrap();
        let key = fs::read_to_string(dir.path().join(KEY_FILE)).unwrap();
        assert!(cert.starts_with("-----BEGIN CERTIFICATE-----"));
        assert!(key.contains("PRIVATE KEY-----"));

        for file in [CERT_FILE, KEY_FILE] {
            let mode = fs::metadata(dir.path().join(file)).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }
}

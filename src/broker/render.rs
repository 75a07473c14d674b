//! Broker artifacts: `mosquitto.conf`, `mosquitto.acl`, and the file layout
//! they reference.
//!
//! Paths written into the configuration depend on where the broker reads
//! them from. A native broker sees the working directory itself; a
//! containerized one sees the mount point, so [`Layout`] abstracts over both.

use std::{
    io,
    path::{Path, PathBuf},
};

use tokio::{fs::OpenOptions, io::AsyncWriteExt};
use tracing::{debug, info};

use super::{
    error::BrokerError,
    launch::{Toolchain, CONTAINER_CONFIG_DIR},
    options::{AuthBackend, BrokerConfig},
    passwd, tls,
};

pub const CONF_FILE: &str = "mosquitto.conf";
pub const ACL_FILE: &str = "mosquitto.acl";
pub const PASSWD_FILE: &str = "mosquitto.passwd";
pub const CERT_FILE: &str = "server.crt";
pub const KEY_FILE: &str = "server.key";

const LOG_TYPES: [&str; 8] = [
    "error",
    "warning",
    "notice",
    "information",
    "subscribe",
    "unsubscribe",
    "websockets",
    "debug",
];

/// Directory as seen by the broker process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    root: PathBuf,
    containerized: bool,
}

impl Layout {
    pub fn native(workdir: &Path) -> Self {
        Self {
            root: workdir.to_path_buf(),
            containerized: false,
        }
    }

    pub fn container() -> Self {
        Self {
            root: PathBuf::from(CONTAINER_CONFIG_DIR),
            containerized: true,
        }
    }

    pub fn for_toolchain(toolchain: &Toolchain, workdir: &Path) -> Self {
        if toolchain.is_container() {
            Self::container()
        } else {
            Self::native(workdir)
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path(&self, file: &str) -> PathBuf {
        self.root.join(file)
    }

    /// Address a listener binds to: the configured one natively, every
    /// interface inside the container (ports are published by the runtime).
    fn bind_address<'a>(&self, configured: &'a str) -> &'a str {
        if self.containerized {
            "0.0.0.0"
        } else {
            configured
        }
    }
}

/// Renders the complete broker configuration file.
pub fn render_config(config: &BrokerConfig, layout: &Layout) -> String {
    let mut lines: Vec<String> = Vec::new();

    lines.push("log_dest stderr".into());
    lines.extend(LOG_TYPES.iter().map(|t| format!("log_type {}", t)));
    lines.push("websockets_log_level 2".into());
    lines.push("connection_messages true".into());
    lines.push("log_timestamp true".into());
    lines.push("log_timestamp_format %Y-%m-%dT%H:%M:%S".into());
    lines.push("sys_interval 1".into());
    lines.push("websockets_headers_size 2048".into());

    let acl = layout.path(ACL_FILE);
    let passwd = layout.path(PASSWD_FILE);
    lines.push("per_listener_settings false".into());
    lines.push("allow_anonymous false".into());
    match config.auth {
        AuthBackend::Builtin => {
            lines.push(format!("acl_file {}", acl.display()));
            lines.push(format!("password_file {}", passwd.display()));
        }
        AuthBackend::Plugin => {
            lines.push(format!("plugin {}", config.plugin));
            lines.push("plugin_opt_backends files".into());
            lines.push(format!("plugin_opt_files_password_path {}", passwd.display()));
            lines.push(format!("plugin_opt_files_acl_path {}", acl.display()));
        }
    }

    if config.persistence {
        lines.push("persistence true".into());
        lines.push(format!("persistence_location {}/", layout.root().display()));
        lines.push("autosave_interval 1".into());
    } else {
        lines.push("persistence false".into());
    }

    if !config.custom.is_empty() {
        lines.push(config.custom.trim_end_matches('\n').to_string());
    }

    for listener in &config.listen {
        lines.push(format!(
            "listener {} {}",
            listener.port,
            layout.bind_address(&listener.address)
        ));
        lines.push("max_connections -1".into());
        lines.push("set_tcp_nodelay true".into());
        lines.push(format!("protocol {}", listener.protocol.directive()));
        if listener.protocol.is_secure() {
            lines.push(format!("certfile {}", layout.path(CERT_FILE).display()));
            lines.push(format!("keyfile {}", layout.path(KEY_FILE).display()));
            lines.push("require_certificate false".into());
        }
    }

    let mut rendered = lines.join("\n");
    rendered.push('\n');
    rendered
}

/// The caller's ACL verbatim, or the generated per-account default.
pub fn render_acl(config: &BrokerConfig) -> String {
    if !config.acl.is_empty() {
        return config.acl.clone();
    }

    let mut lines = vec![
        "topic read $SYS/#".to_string(),
        "pattern write connection/%c/state".to_string(),
        "pattern read connection/%c/peer/#".to_string(),
    ];
    for account in &config.passwd {
        let name = &account.username;
        lines.push(format!("user {}", name));
        lines.push(format!("topic readwrite {}/#", name));
        lines.push(format!("topic read {}/shared/#", name));
        lines.push("topic write peer/#".to_string());
    }

    let mut rendered = lines.join("\n");
    rendered.push('\n');
    rendered
}

/// Creates or truncates `path` with mode 0600 and writes `contents`.
pub async fn write_secret(path: &Path, contents: &[u8]) -> io::Result<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)
        .await?;
    file.write_all(contents).await?;
    file.flush().await
}

async fn write_artifact(workdir: &Path, name: &str, contents: &[u8]) -> Result<(), BrokerError> {
    let path = workdir.join(name);
    write_secret(&path, contents)
        .await
        .map_err(|e| BrokerError::provisioning(&format!("write {}", path.display()), e))?;
    debug!("Wrote {} ({} bytes)", path.display(), contents.len());
    Ok(())
}

/// Writes every file the broker needs into `workdir`.
///
/// Order: ACL, password file, certificate pair (secure listeners only),
/// configuration. All of them exist once this returns `Ok`.
pub async fn write_artifacts(
    config: &BrokerConfig,
    toolchain: &Toolchain,
    workdir: &Path,
) -> Result<(), BrokerError> {
    let layout = Layout::for_toolchain(toolchain, workdir);

    write_artifact(workdir, ACL_FILE, render_acl(config).as_bytes()).await?;
    passwd::provision(config, toolchain, workdir, &layout).await?;
    if config.has_secure_listener() {
        tls::provision(config, workdir).await?;
    }
    write_artifact(workdir, CONF_FILE, render_config(config, &layout).as_bytes()).await?;

    info!("Provisioned broker artifacts in {}", workdir.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::os::unix::fs::PermissionsExt;

    use tempfile::TempDir;

    use super::*;
    use crate::broker::options::{Account, BrokerOverrides, Listener, Protocol};

    fn config_with(overrides: BrokerOverrides) -> BrokerConfig {
        BrokerConfig::merge(overrides)
    }

    #[test]
    fn default_config_renders_every_stanza_in_order() {
        let layout = Layout::native(Path::new("/work"));
        let conf = render_config(&BrokerConfig::default(), &layout);

        let expected = "\
log_dest stderr
log_type error
log_type warning
log_type notice
log_type information
log_type subscribe
log_type unsubscribe
log_type websockets
log_type debug
websockets_log_level 2
connection_messages true
log_timestamp true
log_timestamp_format %Y-%m-%dT%H:%M:%S
sys_interval 1
websockets_headers_size 2048
per_listener_settings false
allow_anonymous false
acl_file /work/mosquitto.acl
password_file /work/mosquitto.passwd
persistence false
listener 1883 127.0.0.1
max_connections -1
set_tcp_nodelay true
protocol mqtt
";
        assert_eq!(conf, expected);
    }

    #[test]
    fn plugin_backend_points_at_the_same_files() {
        let config = config_with(BrokerOverrides {
            auth: Some(AuthBackend::Plugin),
            ..Default::default()
        });
        let conf = render_config(&config, &Layout::native(Path::new("/work")));

        assert!(conf.contains("plugin /usr/lib/mosquitto-go-auth.so\n"));
        assert!(conf.contains("plugin_opt_backends files\n"));
        assert!(conf.contains("plugin_opt_files_password_path /work/mosquitto.passwd\n"));
        assert!(conf.contains("plugin_opt_files_acl_path /work/mosquitto.acl\n"));
        assert!(!conf.contains("acl_file"));
        assert!(!conf.contains("password_file"));
    }

    #[test]
    fn persistence_custom_and_secure_listeners() {
        let config = config_with(BrokerOverrides {
            persistence: Some(true),
            custom: Some("max_inflight_messages 5\n".into()),
            listen: Some(vec![
                Listener::new(Protocol::Mqtt, "127.0.0.1", 1883),
                Listener::new(Protocol::Wss, "127.0.0.1", 8443),
            ]),
            ..Default::default()
        });
        let conf = render_config(&config, &Layout::native(Path::new("/work")));

        assert!(conf.contains(
            "persistence true\npersistence_location /work/\nautosave_interval 1\nmax_inflight_messages 5\nlistener 1883"
        ));
        let plain_start = conf.find("listener 1883").unwrap();
        let secure_start = conf.find("listener 8443").unwrap();
        let plain = &conf[plain_start..secure_start];
        assert!(!plain.contains("certfile"));
        assert!(!plain.contains("keyfile"));
        assert!(!plain.contains("require_certificate"));
        assert!(conf.ends_with(
            "listener 8443 127.0.0.1\nmax_connections -1\nset_tcp_nodelay true\nprotocol websockets\ncertfile /work/server.crt\nkeyfile /work/server.key\nrequire_certificate false\n"
        ));
    }

    #[test]
    fn container_layout_rewrites_paths_and_addresses() {
        let config = config_with(BrokerOverrides {
            persistence: Some(true),
            listen: Some(vec![Listener::new(Protocol::Mqtts, "127.0.0.1", 8883)]),
            ..Default::default()
        });
        let conf = render_config(&config, &Layout::container());

        assert!(conf.contains("acl_file /mosquitto/config/mosquitto.acl\n"));
        assert!(conf.contains("persistence_location /mosquitto/config/\n"));
        assert!(conf.contains("listener 8883 0.0.0.0\n"));
        assert!(conf.contains("certfile /mosquitto/config/server.crt\n"));
        assert!(!conf.contains("127.0.0.1"));
    }

    #[test]
    fn default_acl_has_one_block_per_account() {
        let config = config_with(BrokerOverrides {
            passwd: Some(vec![Account::new("alice", "a"), Account::new("bob", "b")]),
            ..Default::default()
        });
        assert_eq!(
            render_acl(&config),
            "\
topic read $SYS/#
pattern write connection/%c/state
pattern read connection/%c/peer/#
user alice
topic readwrite alice/#
topic read alice/shared/#
topic write peer/#
user bob
topic readwrite bob/#
topic read bob/shared/#
topic write peer/#
"
        );
    }

    #[test]
    fn caller_acl_is_used_verbatim() {
        let config = config_with(BrokerOverrides {
            acl: Some("topic readwrite #".into()),
            ..Default::default()
        });
        assert_eq!(render_acl(&config), "topic readwrite #");
    }

    #[tokio::test]
    async fn secrets_are_owner_only_and_truncated() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("secret");

        write_secret(&path, b"a much longer first version").await.unwrap();
        write_secret(&path, b"short").await.unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), b"short");
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}

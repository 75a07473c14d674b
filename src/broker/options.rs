//! Broker configuration: typed settings, defaults, and the override merger.
//!
//! Callers describe the broker they want with a [`BrokerOverrides`], where
//! every field is optional. [`BrokerConfig::merge`] fills the gaps from
//! [`BrokerConfig::default`] and yields the fully resolved configuration a
//! [`Broker`](super::Broker) holds for its whole lifetime.
//!
//! The merger does not check cross-field consistency (an empty account list
//! is accepted as-is). Field rules are checked by `validator` when the broker
//! starts, before anything touches the disk.

use std::{fmt, net::IpAddr, str::FromStr, time::Duration};

use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

use super::error::BrokerError;
use crate::core::readiness::ReadinessSettings;

/// Container image used when none is configured.
pub const DEFAULT_IMAGE: &str = "eclipse-mosquitto:2.0.18";

/// Authentication backend rendered into the broker configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum AuthBackend {
    /// Mosquitto's own `acl_file` / `password_file` directives.
    #[default]
    Builtin,
    /// An external auth plugin reading the same files.
    Plugin,
}

impl AuthBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthBackend::Builtin => "builtin",
            AuthBackend::Plugin => "plugin",
        }
    }
}

impl fmt::Display for AuthBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuthBackend {
    type Err = BrokerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "builtin" => Ok(AuthBackend::Builtin),
            "plugin" => Ok(AuthBackend::Plugin),
            other => Err(BrokerError::InvalidAuth(other.to_string())),
        }
    }
}

impl TryFrom<String> for AuthBackend {
    type Error = BrokerError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<AuthBackend> for String {
    fn from(value: AuthBackend) -> Self {
        value.as_str().to_string()
    }
}

/// Wire protocol of a listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Mqtt,
    Mqtts,
    Ws,
    Wss,
}

impl Protocol {
    /// True for the TLS variants, which need a certificate pair.
    pub fn is_secure(&self) -> bool {
        matches!(self, Protocol::Mqtts | Protocol::Wss)
    }

    /// Value of the `protocol` directive for this listener.
    pub fn directive(&self) -> &'static str {
        match self {
            Protocol::Mqtt | Protocol::Mqtts => "mqtt",
            Protocol::Ws | Protocol::Wss => "websockets",
        }
    }

    /// URL scheme clients use to reach a listener of this protocol.
    pub fn scheme(&self) -> &'static str {
        match self {
            Protocol::Mqtt => "mqtt",
            Protocol::Mqtts => "mqtts",
            Protocol::Ws => "ws",
            Protocol::Wss => "wss",
        }
    }
}

/// A network endpoint the broker exposes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct Listener {
    pub protocol: Protocol,

    /// Host name put into the certificate when the listener is secure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Interface to bind. In container mode this is the host side of the
    /// port mapping and must be an IP address, not a host name.
    #[validate(length(min = 1, message = "Listener address must not be empty"))]
    pub address: String,

    #[validate(range(min = 1, message = "Listener port must be non-zero"))]
    pub port: u16,
}

impl Listener {
    pub fn new(protocol: Protocol, address: impl Into<String>, port: u16) -> Self {
        Self {
            protocol,
            name: None,
            address: address.into(),
            port,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Client-side URL for this listener, e.g. `mqtt://127.0.0.1:1883`.
    pub fn url(&self) -> String {
        format!("{}://{}:{}", self.protocol.scheme(), self.address, self.port)
    }
}

/// An account provisioned into the password file.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct Account {
    #[validate(
        length(min = 1, message = "Username must not be empty"),
        custom(function = "validate_username")
    )]
    pub username: String,
    pub password: String,
}

impl Account {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

// Keep plaintext passwords out of debug logs.
impl fmt::Debug for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Account")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Password file lines are `user:hash`; a colon in the name breaks them.
fn validate_username(username: &str) -> Result<(), ValidationError> {
    if username.contains(':') || username.chars().any(char::is_whitespace) {
        let mut err = ValidationError::new("invalid_username");
        err.message = Some(format!("Invalid username: {:?}", username).into());
        return Err(err);
    }
    Ok(())
}

/// The container runtime publishes ports as `ip:port:port`; host names are
/// rejected there.
fn validate_published_addresses(config: &BrokerConfig) -> Result<(), ValidationError> {
    if config.native {
        return Ok(());
    }
    match config
        .listen
        .iter()
        .find(|l| l.address.parse::<IpAddr>().is_err())
    {
        Some(listener) => {
            let mut err = ValidationError::new("invalid_published_address");
            err.message = Some(
                format!(
                    "Listener address {:?} must be an IP address in container mode",
                    listener.address
                )
                .into(),
            );
            Err(err)
        }
        None => Ok(()),
    }
}

/// Fully resolved broker configuration.
///
/// Built once by [`BrokerConfig::merge`] and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Validate)]
#[validate(schema(function = "validate_published_addresses"))]
pub struct BrokerConfig {
    /// Run the broker binary directly instead of through the container runtime.
    pub native: bool,
    /// Container image reference (ignored when `native`).
    pub container: String,
    pub auth: AuthBackend,
    pub persistence: bool,
    /// Raw ACL rules. Empty means "generate from `passwd`".
    pub acl: String,
    #[validate(nested)]
    pub passwd: Vec<Account>,
    #[validate(length(min = 1, message = "At least one listener is required"), nested)]
    pub listen: Vec<Listener>,
    /// Raw text appended after the standard stanzas, before the listeners.
    pub custom: String,

    /// Native broker executable.
    pub binary: String,
    /// Native password hashing utility.
    pub passwd_binary: String,
    /// Container runtime CLI.
    pub runtime: String,
    /// Auth plugin module loaded by the `plugin` backend.
    pub plugin: String,

    #[serde(skip)]
    pub readiness: ReadinessSettings,
    #[serde(skip)]
    pub stop_grace: Duration,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            native: false,
            container: DEFAULT_IMAGE.to_string(),
            auth: AuthBackend::Builtin,
            persistence: false,
            acl: String::new(),
            passwd: vec![Account::new("example", "example")],
            listen: vec![Listener::new(Protocol::Mqtt, "127.0.0.1", 1883)],
            custom: String::new(),
            binary: "mosquitto".to_string(),
            passwd_binary: "mosquitto_passwd".to_string(),
            runtime: "docker".to_string(),
            plugin: "/usr/lib/mosquitto-go-auth.so".to_string(),
            readiness: ReadinessSettings::default(),
            stop_grace: Duration::from_secs(5),
        }
    }
}

impl BrokerConfig {
    /// Fills every unset override from the defaults.
    pub fn merge(overrides: BrokerOverrides) -> Self {
        let defaults = Self::default();

        let readiness = ReadinessSettings {
            poll_interval: overrides
                .readiness_poll_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.readiness.poll_interval),
            timeout: overrides
                .readiness_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.readiness.timeout),
        };

        Self {
            native: overrides.native.unwrap_or(defaults.native),
            container: overrides.container.unwrap_or(defaults.container),
            auth: overrides.auth.unwrap_or(defaults.auth),
            persistence: overrides.persistence.unwrap_or(defaults.persistence),
            acl: overrides.acl.unwrap_or(defaults.acl),
            passwd: overrides.passwd.unwrap_or(defaults.passwd),
            listen: overrides.listen.unwrap_or(defaults.listen),
            custom: overrides.custom.unwrap_or(defaults.custom),
            binary: overrides.binary.unwrap_or(defaults.binary),
            passwd_binary: overrides.passwd_binary.unwrap_or(defaults.passwd_binary),
            runtime: overrides.runtime.unwrap_or(defaults.runtime),
            plugin: overrides.plugin.unwrap_or(defaults.plugin),
            readiness,
            stop_grace: overrides
                .stop_grace_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.stop_grace),
        }
    }

    /// True when at least one listener needs the certificate pair.
    pub fn has_secure_listener(&self) -> bool {
        self.listen.iter().any(|l| l.protocol.is_secure())
    }
}

/// Partial broker configuration supplied by the caller.
///
/// Every field left as `None` takes its default during [`BrokerConfig::merge`].
/// Durations are given in milliseconds so the struct reads naturally from TOML.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BrokerOverrides {
    pub native: Option<bool>,
    pub container: Option<String>,
    pub auth: Option<AuthBackend>,
    pub persistence: Option<bool>,
    pub acl: Option<String>,
    pub passwd: Option<Vec<Account>>,
    pub listen: Option<Vec<Listener>>,
    pub custom: Option<String>,
    pub binary: Option<String>,
    pub passwd_binary: Option<String>,
    pub runtime: Option<String>,
    pub plugin: Option<String>,
    pub readiness_poll_ms: Option<u64>,
    pub readiness_timeout_ms: Option<u64>,
    pub stop_grace_ms: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_of_empty_overrides_is_default() {
        let config = BrokerConfig::merge(BrokerOverrides::default());
        assert_eq!(config, BrokerConfig::default());
        assert!(!config.native);
        assert_eq!(config.container, DEFAULT_IMAGE);
        assert_eq!(config.auth, AuthBackend::Builtin);
        assert!(!config.persistence);
        assert!(config.acl.is_empty());
        assert_eq!(config.passwd, vec![Account::new("example", "example")]);
        assert_eq!(
            config.listen,
            vec![Listener::new(Protocol::Mqtt, "127.0.0.1", 1883)]
        );
        assert!(config.custom.is_empty());
        assert_eq!(config.readiness.poll_interval, Duration::from_millis(50));
        assert_eq!(config.readiness.timeout, Duration::from_secs(10));
        assert_eq!(config.stop_grace, Duration::from_secs(5));
    }

    #[test]
    fn merge_keeps_set_fields_and_defaults_the_rest() {
        let config = BrokerConfig::merge(BrokerOverrides {
            native: Some(true),
            auth: Some(AuthBackend::Plugin),
            passwd: Some(vec![]),
            readiness_timeout_ms: Some(250),
            ..Default::default()
        });

        assert!(config.native);
        assert_eq!(config.auth, AuthBackend::Plugin);
        assert!(config.passwd.is_empty(), "empty account list is not rejected");
        assert_eq!(config.readiness.timeout, Duration::from_millis(250));
        assert_eq!(config.readiness.poll_interval, Duration::from_millis(50));
        assert_eq!(config.container, DEFAULT_IMAGE);
        assert_eq!(config.listen.len(), 1);
    }

    #[test]
    fn auth_backend_parses_known_values_only() {
        assert_eq!("builtin".parse::<AuthBackend>().unwrap(), AuthBackend::Builtin);
        assert_eq!("plugin".parse::<AuthBackend>().unwrap(), AuthBackend::Plugin);

        let err = "ldap".parse::<AuthBackend>().unwrap_err();
        assert!(matches!(err, BrokerError::InvalidAuth(ref v) if v == "ldap"));
        assert!(err.is_usage());
    }

    #[test]
    fn overrides_deserialize_from_toml() {
        let overrides: BrokerOverrides = toml::from_str(
            r#"
            native = true
            auth = "plugin"
            readiness_timeout_ms = 2000

            [[passwd]]
            username = "alice"
            password = "secret"

            [[listen]]
            protocol = "wss"
            name = "broker.local"
            address = "0.0.0.0"
            port = 8443
            "#,
        )
        .unwrap();

        let config = BrokerConfig::merge(overrides);
        assert!(config.native);
        assert_eq!(config.auth, AuthBackend::Plugin);
        assert_eq!(config.passwd[0].username, "alice");
        assert_eq!(config.listen[0].protocol, Protocol::Wss);
        assert_eq!(config.listen[0].name.as_deref(), Some("broker.local"));
        assert!(config.has_secure_listener());
    }

    #[test]
    fn invalid_auth_in_toml_is_rejected() {
        let err = toml::from_str::<BrokerOverrides>(r#"auth = "kerberos""#).unwrap_err();
        assert!(err.to_string().contains("kerberos"));
    }

    #[test]
    fn validation_rejects_bad_listeners_and_usernames() {
        let config = BrokerConfig::merge(BrokerOverrides {
            listen: Some(vec![]),
            ..Default::default()
        });
        assert!(config.validate().is_err());

        let config = BrokerConfig::merge(BrokerOverrides {
            listen: Some(vec![Listener::new(Protocol::Mqtt, "127.0.0.1", 0)]),
            ..Default::default()
        });
        assert!(config.validate().is_err());

        let config = BrokerConfig::merge(BrokerOverrides {
            passwd: Some(vec![Account::new("a:b", "pw")]),
            ..Default::default()
        });
        assert!(config.validate().is_err());

        assert!(BrokerConfig::default().validate().is_ok());
    }

    #[test]
    fn container_mode_requires_ip_listener_addresses() {
        let hostname = vec![Listener::new(Protocol::Mqtt, "localhost", 1883)];

        let container = BrokerConfig::merge(BrokerOverrides {
            listen: Some(hostname.clone()),
            ..Default::default()
        });
        let err = container.validate().unwrap_err();
        assert!(err.to_string().contains("localhost"));

        let native = BrokerConfig::merge(BrokerOverrides {
            native: Some(true),
            listen: Some(hostname),
            ..Default::default()
        });
        assert!(native.validate().is_ok());

        let ipv6 = BrokerConfig::merge(BrokerOverrides {
            listen: Some(vec![Listener::new(Protocol::Ws, "::1", 9001)]),
            ..Default::default()
        });
        assert!(ipv6.validate().is_ok());
    }

    #[test]
    fn protocol_directives() {
        assert_eq!(Protocol::Mqtt.directive(), "mqtt");
        assert_eq!(Protocol::Mqtts.directive(), "mqtt");
        assert_eq!(Protocol::Ws.directive(), "websockets");
        assert_eq!(Protocol::Wss.directive(), "websockets");
        assert!(Protocol::Mqtts.is_secure() && Protocol::Wss.is_secure());
        assert!(!Protocol::Mqtt.is_secure() && !Protocol::Ws.is_secure());
    }

    #[test]
    fn account_debug_hides_password() {
        let rendered = format!("{:?}", Account::new("alice", "hunter2"));
        assert!(rendered.contains("alice"));
        assert!(!rendered.contains("hunter2"));
    }

    #[test]
    fn listener_url() {
        let listener = Listener::new(Protocol::Ws, "127.0.0.1", 9001);
        assert_eq!(listener.url(), "ws://127.0.0.1:9001");
    }
}

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::config::BrokerSettings;
use crate::error::BridgeError;

/// Websocket transport scheme
#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    #[default]
    Ws,
    /// TLS secured websocket
    Wss,
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scheme::Ws => write!(f, "ws"),
            Scheme::Wss => write!(f, "wss"),
        }
    }
}

#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Credentials {
    pub username: String,
    pub password: Option<String>,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .finish()
    }
}

/// Options applied to every publish; not part of the connection identity
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PublishOptions {
    pub qos: u8,
    pub retain: bool,
}

impl PublishOptions {
    pub const MAX_QOS: u8 = 2;

    pub fn validate(&self) -> Result<(), BridgeError> {
        if self.qos > Self::MAX_QOS {
            return Err(BridgeError::Config(format!("invalid QoS level {}", self.qos)));
        }
        Ok(())
    }
}

/// Fields whose change requires a new broker connection
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ConnectionIdentity {
    scheme: Scheme,
    host: String,
    port: u16,
    path: String,
    credentials: Option<Credentials>,
    subscribe_topic: String,
    transform: Option<String>,
}

/// Normalized broker configuration for one bridge instance
#[derive(Clone, Debug, PartialEq)]
pub struct ConnectionConfig {
    pub scheme: Scheme,
    pub host: String,
    pub port: u16,
    /// Empty, or starting with `/`
    pub path: String,
    /// Empty means no subscription
    pub subscribe_topic: String,
    /// Empty disables publishing
    pub publish_topic: String,
    pub credentials: Option<Credentials>,
    pub transform: Option<String>,
    pub publish: PublishOptions,
    pub receive_only: bool,
}

impl ConnectionConfig {
    /// Normalizes raw broker settings.
    ///
    /// Topics and transform are trimmed, the path gets a leading `/`, and
    /// credentials are only kept when a username is present. An unknown QoS
    /// level is refused here. Host and port are checked later by
    /// [`ConnectionConfig::validate`] so that they surface as an errored
    /// connection instead of a refusal.
    pub fn from_settings(settings: &BrokerSettings) -> Result<Self, BridgeError> {
        let credentials = settings
            .auth
            .as_ref()
            .filter(|auth| !auth.username.trim().is_empty())
            .map(|auth| Credentials {
                username: auth.username.trim().to_string(),
                password: Some(auth.password.clone()).filter(|p| !p.is_empty()),
            });

        let transform = Some(settings.transform.trim().to_string()).filter(|t| !t.is_empty());

        let publish = PublishOptions {
            qos: settings.qos,
            retain: settings.retain,
        };
        publish.validate()?;

        Ok(Self {
            scheme: settings.scheme,
            host: settings.host.trim().to_string(),
            port: settings.port,
            path: normalize_path(&settings.path),
            subscribe_topic: settings.subscribe_topic.trim().to_string(),
            publish_topic: settings.publish_topic.trim().to_string(),
            credentials,
            transform,
            publish,
            receive_only: settings.receive_only,
        })
    }

    /// Checks the fields a transport needs before it can be opened
    pub fn validate(&self) -> Result<(), BridgeError> {
        if self.host.is_empty() {
            return Err(BridgeError::ConnectionInit("broker host is empty".to_string()));
        }
        if self.port == 0 {
            return Err(BridgeError::ConnectionInit("broker port is 0".to_string()));
        }
        Ok(())
    }

    pub fn identity(&self) -> ConnectionIdentity {
        ConnectionIdentity {
            scheme: self.scheme,
            host: self.host.clone(),
            port: self.port,
            path: self.path.clone(),
            credentials: self.credentials.clone(),
            subscribe_topic: self.subscribe_topic.clone(),
            transform: self.transform.clone(),
        }
    }

    /// `<scheme>://<host>:<port><path>`
    pub fn url(&self) -> String {
        format!("{}://{}:{}{}", self.scheme, self.host, self.port, self.path)
    }
}

fn normalize_path(path: &str) -> String {
    let trimmed = path.trim();
    if trimmed.is_empty() || trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{}", trimmed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AuthSettings;

    fn settings() -> BrokerSettings {
        BrokerSettings {
            subscribe_topic: "  t/in ".to_string(),
            publish_topic: " t/out".to_string(),
            path: "mqtt".to_string(),
            ..BrokerSettings::default()
        }
    }

    #[test]
    fn test_from_settings_trims_and_normalizes() {
        let config = ConnectionConfig::from_settings(&settings()).unwrap();
        assert_eq!(config.subscribe_topic, "t/in");
        assert_eq!(config.publish_topic, "t/out");
        assert_eq!(config.path, "/mqtt");
        assert_eq!(config.url(), "ws://localhost:9001/mqtt");
        assert!(config.transform.is_none());
        assert!(config.credentials.is_none());
    }

    #[test]
    fn test_empty_path_stays_empty() {
        let mut raw = settings();
        raw.path = "  ".to_string();
        let config = ConnectionConfig::from_settings(&raw).unwrap();
        assert_eq!(config.path, "");
        assert_eq!(config.url(), "ws://localhost:9001");
    }

    #[test]
    fn test_credentials_require_username() {
        let mut raw = settings();
        raw.auth = Some(AuthSettings {
            username: " ".to_string(),
            password: "secret".to_string(),
        });
        assert!(ConnectionConfig::from_settings(&raw).unwrap().credentials.is_none());

        raw.auth = Some(AuthSettings {
            username: "panel".to_string(),
            password: String::new(),
        });
        let credentials = ConnectionConfig::from_settings(&raw).unwrap().credentials.unwrap();
        assert_eq!(credentials.username, "panel");
        assert!(credentials.password.is_none());
    }

    #[test]
    fn test_validate_rejects_missing_host_and_port() {
        let mut config = ConnectionConfig::from_settings(&settings()).unwrap();
        config.host.clear();
        assert!(matches!(config.validate(), Err(BridgeError::ConnectionInit(_))));

        let mut config = ConnectionConfig::from_settings(&settings()).unwrap();
        config.port = 0;
        assert!(matches!(config.validate(), Err(BridgeError::ConnectionInit(_))));

        let mut config = ConnectionConfig::from_settings(&settings()).unwrap();
        config.publish.qos = 3;
        assert!(config.validate().is_ok());
        assert!(matches!(config.publish.validate(), Err(BridgeError::Config(_))));
    }

    #[test]
    fn test_from_settings_rejects_unknown_qos() {
        let mut raw = settings();
        raw.qos = 5;
        assert!(matches!(
            ConnectionConfig::from_settings(&raw),
            Err(BridgeError::Config(_))
        ));

        raw.qos = 2;
        assert_eq!(ConnectionConfig::from_settings(&raw).unwrap().publish.qos, 2);
    }

    #[test]
    fn test_identity_ignores_publish_side() {
        let base = ConnectionConfig::from_settings(&settings()).unwrap();
        let mut changed = base.clone();
        changed.publish_topic = "other/out".to_string();
        changed.publish = PublishOptions { qos: 1, retain: true };
        changed.receive_only = true;
        assert_eq!(base.identity(), changed.identity());

        let mut moved = base.clone();
        moved.port = 9002;
        assert_ne!(base.identity(), moved.identity());

        let mut queried = base.clone();
        queried.transform = Some("a.b".to_string());
        assert_ne!(base.identity(), queried.identity());
    }

    #[test]
    fn test_credentials_debug_hides_password() {
        let credentials = Credentials {
            username: "panel".to_string(),
            password: Some("secret".to_string()),
        };
        let debug = format!("{:?}", credentials);
        assert!(debug.contains("panel"));
        assert!(!debug.contains("secret"));
    }
}

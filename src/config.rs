//! Identity & configuration inputs (spec.md §4.1): broker URL parsing,
//! `AgentOptions` validation, and the optional on-disk defaults file.
//!
//! Grounded on the teacher's `config.rs` / `persistence::config_portal`
//! pattern of a `CONFIG_DIR`/file-name constant pair plus graceful fallback
//! to defaults on any load failure.

use std::collections::HashSet;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

const CONFIG_DIR: &str = "mqtt-rpc-agent";
const CONFIG_FILE: &str = "agent.toml";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerScheme {
    Plain,
    Tls,
}

impl BrokerScheme {
    pub fn default_port(self) -> u16 {
        match self {
            BrokerScheme::Plain => 1883,
            BrokerScheme::Tls => 8883,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("broker url {0:?} is missing a scheme (use e.g. mqtt://host or mqtts://host)")]
    MissingScheme(String),
    #[error("broker url {0:?} has unrecognized scheme {1:?} (expected mqtt, tcp, mqtts or ssl)")]
    UnknownScheme(String, String),
    #[error("broker url {0:?} is missing a host")]
    MissingHost(String),
    #[error("{field} must not be empty")]
    EmptyField { field: &'static str },
    #[error("{field} must not contain '{ch}' (got {value:?})")]
    ReservedCharacter {
        field: &'static str,
        ch: char,
        value: String,
    },
}

/// `Options` of spec.md §3/§4.1, renamed to avoid shadowing `std::option::Option`.
#[derive(Debug, Clone)]
pub struct AgentOptions {
    pub scheme: BrokerScheme,
    pub host: String,
    pub port: String,
    pub domain: String,
    pub agent: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub token: Option<String>,
    pub version: String,
    pub functions: Vec<String>,
}

impl AgentOptions {
    pub fn new(
        broker_url: &str,
        domain: impl Into<String>,
        agent: Option<String>,
        functions: Vec<String>,
    ) -> Result<Self, ConfigError> {
        let (scheme, host, port) = parse_broker_url(broker_url)?;
        let domain = domain.into();
        validate_topic_segment("domain", &domain)?;
        if let Some(agent) = &agent {
            validate_topic_segment("agent", agent)?;
        }

        let mut seen = HashSet::new();
        let functions = functions
            .into_iter()
            .filter(|f| seen.insert(f.clone()))
            .collect();

        Ok(Self {
            scheme,
            host,
            port,
            domain,
            agent,
            username: None,
            password: None,
            token: None,
            version: env!("CARGO_PKG_VERSION").to_string(),
            functions,
        })
    }
}

fn parse_broker_url(url: &str) -> Result<(BrokerScheme, String, String), ConfigError> {
    let (scheme_str, rest) = url
        .split_once("://")
        .ok_or_else(|| ConfigError::MissingScheme(url.to_string()))?;
    let scheme = match scheme_str {
        "mqtt" | "tcp" => BrokerScheme::Plain,
        "mqtts" | "ssl" => BrokerScheme::Tls,
        other => return Err(ConfigError::UnknownScheme(url.to_string(), other.to_string())),
    };
    if rest.is_empty() {
        return Err(ConfigError::MissingHost(url.to_string()));
    }
    let (host, port) = match rest.split_once(':') {
        Some((host, port)) => (host.to_string(), port.to_string()),
        None => (rest.to_string(), scheme.default_port().to_string()),
    };
    if host.is_empty() {
        return Err(ConfigError::MissingHost(url.to_string()));
    }
    Ok((scheme, host, port))
}

fn validate_topic_segment(field: &'static str, value: &str) -> Result<(), ConfigError> {
    if value.is_empty() {
        return Err(ConfigError::EmptyField { field });
    }
    for ch in ['/', '+', '#'] {
        if value.contains(ch) {
            return Err(ConfigError::ReservedCharacter {
                field,
                ch,
                value: value.to_string(),
            });
        }
    }
    Ok(())
}

/// Optional on-disk defaults, merged beneath CLI flags in `main.rs`. Falls
/// back to an empty set of defaults on any read or parse failure, the same
/// way the teacher's `ConfigPortal` falls back to `MqttConfig::default()`.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct FileDefaults {
    pub broker: Option<String>,
    pub domain: Option<String>,
    pub agent: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub token: Option<String>,
    pub functions: Option<Vec<String>>,
}

pub fn load_file_defaults() -> FileDefaults {
    let Some(config_dir) = dirs::config_dir() else {
        return FileDefaults::default();
    };
    let path: PathBuf = config_dir.join(CONFIG_DIR).join(CONFIG_FILE);
    match std::fs::read_to_string(&path) {
        Ok(contents) => toml::from_str(&contents).unwrap_or_else(|error| {
            warn!(path = %path.display(), %error, "ignoring unparsable agent.toml");
            FileDefaults::default()
        }),
        Err(_) => FileDefaults::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_scheme_defaults_to_1883() {
        let options = AgentOptions::new("mqtt://localhost", "acme", None, vec![]).unwrap();
        assert_eq!(options.scheme, BrokerScheme::Plain);
        assert_eq!(options.host, "localhost");
        assert_eq!(options.port, "1883");
    }

    #[test]
    fn tls_scheme_defaults_to_8883() {
        let options = AgentOptions::new("mqtts://broker.example.com", "acme", None, vec![]).unwrap();
        assert_eq!(options.scheme, BrokerScheme::Tls);
        assert_eq!(options.port, "8883");
    }

    #[test]
    fn explicit_port_overrides_the_default() {
        let options = AgentOptions::new("tcp://localhost:1884", "acme", None, vec![]).unwrap();
        assert_eq!(options.port, "1884");
    }

    #[test]
    fn missing_scheme_is_rejected() {
        assert_eq!(
            AgentOptions::new("localhost:1883", "acme", None, vec![]).unwrap_err(),
            ConfigError::MissingScheme("localhost:1883".to_string())
        );
    }

    #[test]
    fn domain_with_reserved_character_is_rejected() {
        let err = AgentOptions::new("mqtt://localhost", "ac/me", None, vec![]).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::ReservedCharacter { field: "domain", ch: '/', .. }
        ));
    }

    #[test]
    fn functions_are_deduplicated() {
        let options = AgentOptions::new(
            "mqtt://localhost",
            "acme",
            None,
            vec!["f".to_string(), "g".to_string(), "f".to_string()],
        )
        .unwrap();
        assert_eq!(options.functions, vec!["f".to_string(), "g".to_string()]);
    }
}

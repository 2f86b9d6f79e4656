use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to parse {var}={value:?}")]
    Invalid { var: &'static str, value: String },
    #[error("CAREBOOK_TLS_CERT and CAREBOOK_TLS_KEY must be set together")]
    TlsPair,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsPaths {
    pub cert: PathBuf,
    pub key: PathBuf,
}

/// Server settings, read once at startup from `CAREBOOK_*` variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub bind: String,
    pub data_dir: PathBuf,
    pub password: String,
    pub admin_user: String,
    pub max_connections: usize,
    pub compact_threshold: u64,
    pub tls: Option<TlsPaths>,
    pub metrics_port: Option<u16>,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| env::var(var).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let tls = match (lookup("CAREBOOK_TLS_CERT"), lookup("CAREBOOK_TLS_KEY")) {
            (None, None) => None,
            (Some(cert), Some(key)) => Some(TlsPaths {
                cert: cert.into(),
                key: key.into(),
            }),
            _ => return Err(ConfigError::TlsPair),
        };

        Ok(Self {
            port: parse_or(&lookup, "CAREBOOK_PORT", 5433)?,
            bind: lookup("CAREBOOK_BIND").unwrap_or_else(|| "0.0.0.0".into()),
            data_dir: lookup("CAREBOOK_DATA_DIR").unwrap_or_else(|| "./data".into()).into(),
            password: lookup("CAREBOOK_PASSWORD").unwrap_or_else(|| "carebook".into()),
            admin_user: lookup("CAREBOOK_ADMIN_USER").unwrap_or_else(|| "carebook".into()),
            max_connections: parse_or(&lookup, "CAREBOOK_MAX_CONNECTIONS", 256)?,
            compact_threshold: parse_or(&lookup, "CAREBOOK_COMPACT_THRESHOLD", 1000)?,
            tls,
            metrics_port: lookup("CAREBOOK_METRICS_PORT")
                .map(|v| parse(&v, "CAREBOOK_METRICS_PORT"))
                .transpose()?,
        })
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("carebook.wal")
    }
}

fn parse<T: FromStr>(value: &str, var: &'static str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::Invalid {
        var,
        value: value.to_string(),
    })
}

fn parse_or<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(var) {
        Some(v) => parse(&v, var),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let map: HashMap<String, String> =
            vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        Config::from_lookup(|k| map.get(k).cloned())
    }

    #[test]
    fn defaults() {
        let c = config(&[]).unwrap();
        assert_eq!(c.port, 5433);
        assert_eq!(c.bind, "0.0.0.0");
        assert_eq!(c.admin_user, "carebook");
        assert_eq!(c.max_connections, 256);
        assert_eq!(c.compact_threshold, 1000);
        assert!(c.tls.is_none());
        assert!(c.metrics_port.is_none());
        assert_eq!(c.wal_path(), PathBuf::from("./data/carebook.wal"));
    }

    #[test]
    fn overrides() {
        let c = config(&[
            ("CAREBOOK_PORT", "6000"),
            ("CAREBOOK_DATA_DIR", "/var/lib/carebook"),
            ("CAREBOOK_METRICS_PORT", "9100"),
            ("CAREBOOK_TLS_CERT", "cert.pem"),
            ("CAREBOOK_TLS_KEY", "key.pem"),
        ])
        .unwrap();
        assert_eq!(c.port, 6000);
        assert_eq!(c.metrics_port, Some(9100));
        assert_eq!(c.wal_path(), PathBuf::from("/var/lib/carebook/carebook.wal"));
        assert_eq!(c.tls.unwrap().key, PathBuf::from("key.pem"));
    }

    #[test]
    fn bad_number_names_the_variable() {
        let err = config(&[("CAREBOOK_MAX_CONNECTIONS", "lots")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { var: "CAREBOOK_MAX_CONNECTIONS", .. }));
    }

    #[test]
    fn tls_needs_both_halves() {
        let err = config(&[("CAREBOOK_TLS_CERT", "cert.pem")]).unwrap_err();
        assert!(matches!(err, ConfigError::TlsPair));
    }
}

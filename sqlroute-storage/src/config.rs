use crate::cache::CacheConfig;
use config::{Config as ConfigLoader, Environment, File};
use regex::Regex;
use serde::{Deserialize, Serialize};
use sqlroute_core::{HostAddress, Result, RouteError};
use std::fmt;
use std::sync::OnceLock;

pub const DEFAULT_CONNECTION_LIMIT: usize = 10;

/// Client settings.
///
/// `write_hosts` / `read_hosts` fall back to `[host]` when absent. A list
/// that is present but empty is a configuration error.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub host: String,
    pub write_hosts: Option<Vec<String>>,
    pub read_hosts: Option<Vec<String>>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub database: Option<String>,
    /// Per-pool limit on connections lent out at once.
    pub connection_limit: usize,
    pub cache: CacheConfig,
    pub disable_cache: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            write_hosts: None,
            read_hosts: None,
            user: None,
            password: None,
            database: None,
            connection_limit: DEFAULT_CONNECTION_LIMIT,
            cache: CacheConfig::default(),
            disable_cache: false,
        }
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("host", &self.host)
            .field("write_hosts", &self.write_hosts)
            .field("read_hosts", &self.read_hosts)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "********"))
            .field("database", &self.database)
            .field("connection_limit", &self.connection_limit)
            .field("cache", &self.cache)
            .field("disable_cache", &self.disable_cache)
            .finish()
    }
}

fn parse_hosts(role: &str, hosts: &[String]) -> Result<Vec<HostAddress>> {
    if hosts.is_empty() {
        return Err(RouteError::configuration(format!("no {role} host found")));
    }
    hosts.iter().map(|h| HostAddress::parse(h)).collect()
}

impl ClientConfig {
    /// Write and read host lists after defaulting.
    pub fn resolve_hosts(&self) -> Result<(Vec<HostAddress>, Vec<HostAddress>)> {
        let fallback = vec![self.host.clone()];
        let write = parse_hosts("write", self.write_hosts.as_ref().unwrap_or(&fallback))?;
        let read = parse_hosts("read", self.read_hosts.as_ref().unwrap_or(&fallback))?;
        Ok((write, read))
    }

    pub fn validate(&self) -> Result<()> {
        if self.connection_limit == 0 {
            return Err(RouteError::configuration(
                "connection_limit must be greater than 0",
            ));
        }
        if !self.disable_cache {
            self.cache.validate()?;
        }
        self.resolve_hosts().map(|_| ())
    }

    /// Loads `config/sqlroute.{toml,json,yaml,...}` (optional) and then
    /// `SQLROUTE__*` environment variables, e.g. `SQLROUTE__CACHE__TTL_MS`.
    pub fn load() -> Result<Self> {
        Self::load_from("config/sqlroute")
    }

    pub fn load_from(path: &str) -> Result<Self> {
        let loader = ConfigLoader::builder()
            .add_source(File::with_name(path).required(false))
            .add_source(
                Environment::with_prefix("SQLROUTE")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("write_hosts")
                    .with_list_parse_key("read_hosts")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| RouteError::configuration(e.to_string()))?;

        let config: Self = loader
            .try_deserialize()
            .map_err(|e| RouteError::configuration(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Builds a configuration from `MYSQL_*` environment variables.
    ///
    /// Hosts come from `MYSQL_WRITE_HOST_<n>` and `MYSQL_READ_HOST_<n>`
    /// (`n` is one to three digits), ordered by `n`. Credentials come from
    /// `MYSQL_USER`, `MYSQL_PASSWORD` and `MYSQL_DB`; the pool limit from
    /// `MYSQL_CONNECTION_LIMIT`.
    pub fn from_env() -> Result<Self> {
        Self::from_vars(std::env::vars())
    }

    pub fn from_vars<I, K, V>(vars: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        static WRITE_HOST: OnceLock<Regex> = OnceLock::new();
        static READ_HOST: OnceLock<Regex> = OnceLock::new();
        let write_re = WRITE_HOST.get_or_init(|| {
            Regex::new(r"^MYSQL_WRITE_HOST_([0-9]{1,3})$").expect("valid write host pattern")
        });
        let read_re = READ_HOST.get_or_init(|| {
            Regex::new(r"^MYSQL_READ_HOST_([0-9]{1,3})$").expect("valid read host pattern")
        });

        let mut write: Vec<(u16, String)> = Vec::new();
        let mut read: Vec<(u16, String)> = Vec::new();
        let mut config = Self::default();

        for (key, value) in vars {
            let key = key.as_ref();
            let index = |re: &Regex| {
                re.captures(key)
                    .and_then(|c| c.get(1))
                    .and_then(|m| m.as_str().parse::<u16>().ok())
            };

            if let Some(n) = index(write_re) {
                write.push((n, value.into()));
            } else if let Some(n) = index(read_re) {
                read.push((n, value.into()));
            } else {
                match key {
                    "MYSQL_USER" => config.user = Some(value.into()),
                    "MYSQL_PASSWORD" => config.password = Some(value.into()),
                    "MYSQL_DB" => config.database = Some(value.into()),
                    "MYSQL_CONNECTION_LIMIT" => {
                        let raw: String = value.into();
                        config.connection_limit = raw.trim().parse().map_err(|_| {
                            RouteError::configuration(format!(
                                "MYSQL_CONNECTION_LIMIT must be a positive integer, got '{raw}'"
                            ))
                        })?;
                    }
                    _ => {}
                }
            }
        }

        if write.is_empty() {
            return Err(RouteError::configuration("no write host found"));
        }
        if read.is_empty() {
            return Err(RouteError::configuration("no read host found"));
        }

        write.sort_by_key(|(n, _)| *n);
        read.sort_by_key(|(n, _)| *n);
        config.write_hosts = Some(write.into_iter().map(|(_, h)| h).collect());
        config.read_hosts = Some(read.into_iter().map(|(_, h)| h).collect());

        config.validate()?;
        tracing::debug!(config = ?config, "Configuration read from environment");
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serial_test::serial;
    use std::io::Write;
    use std::time::Duration;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_defaults_route_everything_to_localhost() {
        let (write, read) = ClientConfig::default().resolve_hosts().unwrap();
        assert_eq!(write, vec![HostAddress::new("localhost", 3306)]);
        assert_eq!(read, vec![HostAddress::new("localhost", 3306)]);
        assert_eq!(ClientConfig::default().connection_limit, 10);
    }

    #[test]
    fn test_host_fills_only_missing_lists() {
        let config = ClientConfig {
            host: "primary".into(),
            read_hosts: Some(vec!["r1:3307".into(), "r2".into()]),
            ..Default::default()
        };
        let (write, read) = config.resolve_hosts().unwrap();

        assert_eq!(write, vec![HostAddress::new("primary", 3306)]);
        assert_eq!(
            read,
            vec![HostAddress::new("r1", 3307), HostAddress::new("r2", 3306)]
        );
    }

    #[test]
    fn test_explicit_empty_list_is_rejected() {
        let config = ClientConfig {
            write_hosts: Some(vec![]),
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert_eq!(err.to_string(), "Configuration error: no write host found");
    }

    #[test]
    fn test_zero_connection_limit_is_rejected() {
        let config = ClientConfig {
            connection_limit: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(RouteError::Configuration(_))));
    }

    #[test]
    fn test_debug_redacts_password() {
        let config = ClientConfig {
            password: Some("hunter2".into()),
            ..Default::default()
        };
        assert!(!format!("{config:?}").contains("hunter2"));
    }

    #[test]
    fn test_from_vars_orders_hosts_by_index() {
        let config = ClientConfig::from_vars(vars(&[
            ("MYSQL_WRITE_HOST_2", "w2"),
            ("MYSQL_READ_HOST_10", "r10"),
            ("MYSQL_WRITE_HOST_1", "w1"),
            ("MYSQL_READ_HOST_3", "r3"),
            ("MYSQL_USER", "app"),
            ("MYSQL_PASSWORD", "secret"),
            ("MYSQL_DB", "shop"),
            ("MYSQL_CONNECTION_LIMIT", "25"),
            ("PATH", "/usr/bin"),
        ]))
        .unwrap();

        assert_eq!(config.write_hosts, Some(vec!["w1".to_string(), "w2".to_string()]));
        assert_eq!(config.read_hosts, Some(vec!["r3".to_string(), "r10".to_string()]));
        assert_eq!(config.user.as_deref(), Some("app"));
        assert_eq!(config.password.as_deref(), Some("secret"));
        assert_eq!(config.database.as_deref(), Some("shop"));
        assert_eq!(config.connection_limit, 25);
    }

    #[test]
    fn test_from_vars_read_hosts_come_from_read_vars() {
        let config = ClientConfig::from_vars(vars(&[
            ("MYSQL_WRITE_HOST_1", "writer"),
            ("MYSQL_READ_HOST_1", "reader"),
        ]))
        .unwrap();

        let (write, read) = config.resolve_hosts().unwrap();
        assert_eq!(write[0].host, "writer");
        assert_eq!(read[0].host, "reader");
    }

    #[test]
    fn test_from_vars_requires_both_groups() {
        let err = ClientConfig::from_vars(vars(&[("MYSQL_READ_HOST_1", "r1")])).unwrap_err();
        assert_eq!(err.to_string(), "Configuration error: no write host found");

        let err = ClientConfig::from_vars(vars(&[("MYSQL_WRITE_HOST_1", "w1")])).unwrap_err();
        assert_eq!(err.to_string(), "Configuration error: no read host found");
    }

    #[test]
    fn test_from_vars_ignores_malformed_keys() {
        let err = ClientConfig::from_vars(vars(&[
            ("MYSQL_WRITE_HOST_1234", "w"),
            ("MYSQL_WRITE_HOST_", "w"),
            ("MYSQL_READ_HOST_1", "r"),
        ]))
        .unwrap_err();
        assert!(matches!(err, RouteError::Configuration(_)));
    }

    #[test]
    fn test_from_vars_rejects_bad_limit() {
        let result = ClientConfig::from_vars(vars(&[
            ("MYSQL_WRITE_HOST_1", "w1"),
            ("MYSQL_READ_HOST_1", "r1"),
            ("MYSQL_CONNECTION_LIMIT", "lots"),
        ]));
        assert!(matches!(result, Err(RouteError::Configuration(_))));
    }

    #[test]
    #[serial]
    fn test_from_env() {
        std::env::set_var("MYSQL_WRITE_HOST_1", "env-writer");
        std::env::set_var("MYSQL_READ_HOST_1", "env-reader");

        let config = ClientConfig::from_env().unwrap();

        std::env::remove_var("MYSQL_WRITE_HOST_1");
        std::env::remove_var("MYSQL_READ_HOST_1");

        assert_eq!(config.write_hosts, Some(vec!["env-writer".to_string()]));
        assert_eq!(config.read_hosts, Some(vec!["env-reader".to_string()]));
    }

    #[test]
    #[serial]
    fn test_load_from_file_and_env() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sqlroute.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            r#"
write_hosts = ["w1:3306"]
read_hosts = ["r1", "r2"]
database = "shop"
connection_limit = 5

[cache]
ttl_ms = 2000
max_entries = 50
"#
        )
        .unwrap();

        std::env::set_var("SQLROUTE__CONNECTION_LIMIT", "7");
        let config = ClientConfig::load_from(path.to_str().unwrap());
        std::env::remove_var("SQLROUTE__CONNECTION_LIMIT");
        let config = config.unwrap();

        assert_eq!(config.write_hosts, Some(vec!["w1:3306".to_string()]));
        assert_eq!(config.read_hosts.as_ref().map(Vec::len), Some(2));
        assert_eq!(config.database.as_deref(), Some("shop"));
        assert_eq!(config.connection_limit, 7);
        assert_eq!(config.cache.ttl, Duration::from_millis(2000));
        assert_eq!(config.cache.max_entries, 50);
        assert!(config.cache.dedupe_in_flight);
    }

    #[test]
    #[serial]
    fn test_load_without_file_uses_defaults() {
        let config = ClientConfig::load_from("does/not/exist/sqlroute").unwrap();
        assert_eq!(config.host, "localhost");
        assert_eq!(config.connection_limit, DEFAULT_CONNECTION_LIMIT);
    }
}

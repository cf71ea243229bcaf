use crate::error::{Result, RouteError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const DEFAULT_PORT: u16 = 3306;

/// A database endpoint given as `host` or `host:port`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HostAddress {
    pub host: String,
    pub port: u16,
}

impl HostAddress {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub fn parse(input: &str) -> Result<Self> {
        let input = input.trim();
        if input.is_empty() {
            return Err(RouteError::configuration("empty host address"));
        }

        match input.rsplit_once(':') {
            Some((host, port)) if !host.is_empty() => {
                let port = port.parse::<u16>().map_err(|_| {
                    RouteError::configuration(format!("invalid port in host address '{input}'"))
                })?;
                Ok(Self::new(host, port))
            }
            Some(_) => Err(RouteError::configuration(format!(
                "missing host name in '{input}'"
            ))),
            None => Ok(Self::new(input, DEFAULT_PORT)),
        }
    }
}

impl FromStr for HostAddress {
    type Err = RouteError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for HostAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

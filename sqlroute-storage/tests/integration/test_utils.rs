//! Helpers for the MySQL integration tests.

#![allow(dead_code)]

use uuid::Uuid;

/// A table name unique to one test run.
pub fn unique_table(prefix: &str) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{}_{}", prefix, &suffix[..8])
}

#[cfg(feature = "integration-tests")]
pub mod containers {
    use sqlroute_storage::{ClientConfig, ReplicaClient};
    use testcontainers::runners::AsyncRunner;
    use testcontainers::ContainerAsync;
    use testcontainers_modules::mysql::Mysql;

    /// Starts MySQL (user `root`, no password, database `test`).
    pub async fn start_mysql() -> (ContainerAsync<Mysql>, String) {
        let container = Mysql::default()
            .start()
            .await
            .expect("Failed to start MySQL container");
        let port = container
            .get_host_port_ipv4(3306)
            .await
            .expect("Failed to get MySQL port");
        (container, format!("127.0.0.1:{port}"))
    }

    /// Config that points both groups at the same server, listed twice for
    /// reads so round robin crosses pools.
    pub fn config(address: &str) -> ClientConfig {
        ClientConfig {
            write_hosts: Some(vec![address.to_string()]),
            read_hosts: Some(vec![address.to_string(), address.to_string()]),
            user: Some("root".to_string()),
            database: Some("test".to_string()),
            connection_limit: 4,
            ..Default::default()
        }
    }

    pub fn client(address: &str) -> ReplicaClient<sqlroute_storage::MySqlConnector> {
        ReplicaClient::mysql(config(address)).expect("Failed to build client")
    }

    /// Client whose reads always reach the server.
    pub fn uncached_client(address: &str) -> ReplicaClient<sqlroute_storage::MySqlConnector> {
        let config = ClientConfig {
            disable_cache: true,
            ..config(address)
        };
        ReplicaClient::mysql(config).expect("Failed to build client")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unique_table() {
        let a = unique_table("items");
        let b = unique_table("items");
        assert_ne!(a, b);
        assert!(a.starts_with("items_"));
    }
}

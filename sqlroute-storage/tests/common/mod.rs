#![allow(dead_code)]

use serde_json::Value;
use sqlroute_core::{QueryOutcome, Row};
use sqlroute_storage::stub::StubConnector;
use sqlroute_storage::{ClientConfig, ReplicaClient};
use std::sync::Once;

/// Install a test subscriber once; `RUST_LOG` controls the output.
pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

pub fn hosts(names: &[&str]) -> Option<Vec<String>> {
    Some(names.iter().map(|n| n.to_string()).collect())
}

/// Config with explicit host lists and the cache turned off.
pub fn uncached_config(write: &[&str], read: &[&str]) -> ClientConfig {
    ClientConfig {
        write_hosts: hosts(write),
        read_hosts: hosts(read),
        disable_cache: true,
        ..Default::default()
    }
}

pub fn cached_config(write: &[&str], read: &[&str]) -> ClientConfig {
    ClientConfig {
        disable_cache: false,
        ..uncached_config(write, read)
    }
}

pub fn stub_client(config: ClientConfig) -> (StubConnector, ReplicaClient<StubConnector>) {
    init_tracing();
    let connector = StubConnector::new();
    let client = ReplicaClient::new(config, connector.clone()).expect("valid test config");
    (connector, client)
}

pub fn row(value: Value) -> Row {
    value.as_object().cloned().expect("row must be a JSON object")
}

pub fn rows(values: Vec<Value>) -> QueryOutcome {
    QueryOutcome::from_rows(values.into_iter().map(row).collect())
}

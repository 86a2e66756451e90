use super::*;
use std::collections::HashMap;

fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
        .collect();
    move |key| map.get(key).cloned()
}

#[test]
fn defaults_apply_when_unset() {
    let config = ServerConfig::from_lookup(lookup_from(&[])).unwrap();
    assert_eq!(
        config,
        ServerConfig {
            port: DEFAULT_PORT,
            database_url: None,
            db_max_connections: DEFAULT_DB_MAX_CONNECTIONS,
            client_queue: DEFAULT_WS_CLIENT_QUEUE,
        }
    );
}

#[test]
fn explicit_values_override_defaults() {
    let config = ServerConfig::from_lookup(lookup_from(&[
        ("PORT", "8080"),
        ("DATABASE_URL", "postgres://localhost/eventease"),
        ("DB_MAX_CONNECTIONS", "12"),
        ("WS_CLIENT_QUEUE", "64"),
    ]))
    .unwrap();
    assert_eq!(config.port, 8080);
    assert_eq!(config.database_url.as_deref(), Some("postgres://localhost/eventease"));
    assert_eq!(config.db_max_connections, 12);
    assert_eq!(config.client_queue, 64);
}

#[test]
fn invalid_port_is_an_error() {
    let err = ServerConfig::from_lookup(lookup_from(&[("PORT", "not-a-port")])).unwrap_err();
    assert!(matches!(err, ConfigError::InvalidPort(ref raw) if raw == "not-a-port"));
}

#[test]
fn malformed_optional_values_fall_back() {
    let config = ServerConfig::from_lookup(lookup_from(&[
        ("DB_MAX_CONNECTIONS", "lots"),
        ("WS_CLIENT_QUEUE", "0"),
        ("DATABASE_URL", "   "),
    ]))
    .unwrap();
    assert_eq!(config.db_max_connections, DEFAULT_DB_MAX_CONNECTIONS);
    assert_eq!(config.client_queue, 1);
    assert!(config.database_url.is_none());
}

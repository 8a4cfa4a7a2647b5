use crate::error::ConfigError;
use bytes::Bytes;
use std::path::PathBuf;

pub const DEFAULT_PORT: u16 = 6379;

/// Read-only server settings, fixed at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub dir: String,
    pub dbfilename: String,
    pub port: u16,
    /// `host:port` of the primary when running as a replica.
    pub replica_of: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            dir: ".".to_string(),
            dbfilename: "dump.rdb".to_string(),
            port: DEFAULT_PORT,
            replica_of: None,
        }
    }
}

impl Config {
    pub fn snapshot_path(&self) -> PathBuf {
        PathBuf::from(&self.dir).join(&self.dbfilename)
    }

    pub fn listen_addr(&self) -> String {
        format!("127.0.0.1:{}", self.port)
    }
}

/// Accepts `"<host> <port>"` (the usual form) or `"host:port"`.
pub fn parse_replica_of(raw: &str) -> Result<String, ConfigError> {
    let parts: Vec<&str> = raw.split_whitespace().collect();
    let (host, port) = match parts.as_slice() {
        [host, port] => (*host, *port),
        [single] => single
            .rsplit_once(':')
            .ok_or_else(|| ConfigError::InvalidReplicaOf(raw.to_string()))?,
        _ => return Err(ConfigError::InvalidReplicaOf(raw.to_string())),
    };
    if host.is_empty() || port.parse::<u16>().is_err() {
        return Err(ConfigError::InvalidReplicaOf(raw.to_string()));
    }
    Ok(format!("{}:{}", host, port))
}

/// One key/value pulled out of a snapshot, with its absolute expiry in unix ms.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotRecord {
    pub key: Bytes,
    pub value: Bytes,
    pub expiry_ms: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replica_of_accepts_both_forms() {
        assert_eq!(parse_replica_of("localhost 6379").unwrap(), "localhost:6379");
        assert_eq!(parse_replica_of("127.0.0.1:6380").unwrap(), "127.0.0.1:6380");
    }

    #[test]
    fn replica_of_rejects_garbage() {
        assert!(parse_replica_of("localhost").is_err());
        assert!(parse_replica_of("localhost notaport").is_err());
        assert!(parse_replica_of("a b c").is_err());
    }

    #[test]
    fn snapshot_path_joins_dir_and_file() {
        let config = Config {
            dir: "/tmp/data".to_string(),
            dbfilename: "x.rdb".to_string(),
            ..Config::default()
        };
        assert_eq!(config.snapshot_path(), PathBuf::from("/tmp/data/x.rdb"));
        assert_eq!(config.listen_addr(), "127.0.0.1:6379");
    }
}

//! Shared helpers for the TCP-level tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use bytes::{Bytes, BytesMut};
use kv_replica::error::RespError;
use kv_replica::resp::{self, RespValue};
use kv_replica::{Config, Server, ServerState};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

pub const READ_TIMEOUT: Duration = Duration::from_secs(3);

/// Binds on an ephemeral port, runs the server in the background.
pub async fn start(mut config: Config) -> Result<(SocketAddr, ServerState)> {
    config.port = 0;
    let server = Server::bind(config).await?;
    let addr = server.local_addr()?;
    let state = server.state().clone();
    tokio::spawn(server.run());
    Ok((addr, state))
}

pub fn config_in(dir: &std::path::Path) -> Config {
    Config {
        dir: dir.display().to_string(),
        dbfilename: "dump.rdb".to_string(),
        ..Config::default()
    }
}

/// `REDIS0011`, a resize marker, then plain string records and EOF.
pub fn snapshot_with(pairs: &[(&str, &str)]) -> Vec<u8> {
    let mut buf = b"REDIS0011".to_vec();
    buf.extend_from_slice(&[0xFB, pairs.len() as u8, 0x00]);
    for (key, value) in pairs {
        buf.push(0x00);
        buf.push(key.len() as u8);
        buf.extend_from_slice(key.as_bytes());
        buf.push(value.len() as u8);
        buf.extend_from_slice(value.as_bytes());
    }
    buf.push(0xFF);
    buf
}

pub struct Client {
    stream: TcpStream,
    buf: BytesMut,
}

impl Client {
    pub async fn connect(addr: SocketAddr) -> Result<Self> {
        Ok(Self {
            stream: TcpStream::connect(addr).await?,
            buf: BytesMut::new(),
        })
    }

    pub async fn send(&mut self, parts: &[&str]) -> Result<()> {
        self.send_raw(&resp::encode_array(parts)).await
    }

    pub async fn send_raw(&mut self, bytes: &[u8]) -> Result<()> {
        self.stream.write_all(bytes).await?;
        Ok(())
    }

    pub async fn call(&mut self, parts: &[&str]) -> Result<RespValue> {
        self.send(parts).await?;
        self.read_value().await
    }

    pub async fn read_value(&mut self) -> Result<RespValue> {
        self.read_with(resp::parse_value).await
    }

    pub async fn read_rdb(&mut self) -> Result<Bytes> {
        self.read_with(resp::parse_rdb).await
    }

    /// Reads exactly `n` raw bytes, whatever they are.
    pub async fn read_bytes(&mut self, n: usize) -> Result<Bytes> {
        while self.buf.len() < n {
            self.fill().await?;
        }
        Ok(self.buf.split_to(n).freeze())
    }

    /// True once the server has closed the connection.
    pub async fn closed(&mut self) -> Result<bool> {
        let mut scratch = [0u8; 64];
        match timeout(READ_TIMEOUT, self.stream.read(&mut scratch)).await? {
            Ok(0) | Err(_) => Ok(true),
            Ok(_) => Ok(false),
        }
    }

    async fn read_with<T>(
        &mut self,
        parse: fn(&[u8]) -> Result<(T, usize), RespError>,
    ) -> Result<T> {
        loop {
            match parse(&self.buf[..]) {
                Ok((value, used)) => {
                    let _ = self.buf.split_to(used);
                    return Ok(value);
                }
                Err(RespError::Incomplete) => self.fill().await?,
                Err(e) => bail!("bad reply: {e}"),
            }
        }
    }

    async fn fill(&mut self) -> Result<()> {
        let n = timeout(READ_TIMEOUT, self.stream.read_buf(&mut self.buf))
            .await
            .map_err(|_| anyhow!("timed out waiting for server"))??;
        if n == 0 {
            bail!("server closed the connection");
        }
        Ok(())
    }
}

pub fn bulk(s: &str) -> RespValue {
    RespValue::Bulk(Bytes::copy_from_slice(s.as_bytes()))
}

pub fn simple(s: &str) -> RespValue {
    RespValue::Simple(s.to_string())
}

pub fn array(items: &[&str]) -> RespValue {
    RespValue::Array(items.iter().map(|s| bulk(s)).collect())
}

/// Polls `GET key` until it returns `want` or the timeout passes.
pub async fn wait_for_value(client: &mut Client, key: &str, want: &str) -> Result<()> {
    let deadline = tokio::time::Instant::now() + READ_TIMEOUT;
    loop {
        if client.call(&["GET", key]).await? == bulk(want) {
            return Ok(());
        }
        if tokio::time::Instant::now() > deadline {
            bail!("{key} never became {want}");
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

use crate::db::InMemoryDB;
use crate::error::{ReplicationError, RespError};
use crate::propagator::CommandPropagator;
use crate::rdb;
use crate::resp::{self, RespValue};
use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use rand::distributions::Alphanumeric;
use rand::Rng;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

/// Snapshot sent on full resync when no snapshot file was loaded at startup.
const EMPTY_RDB_HEX: &str = "524544495330303131fa0972656469732d76657205372e322e30fa0a72656469732d62697473c040fa056374696d65c26d08bc65fa08757365642d6d656dc2b0c41000fa08616f662d62617365c000fff06e3bfec0ff5aa2";

pub const REPLID_LEN: usize = 40;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Role {
    Primary,
    /// Replicating from the primary at `host:port`.
    Replica { primary_addr: String },
}

impl Role {
    /// Name reported by INFO.
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Primary => "master",
            Role::Replica { .. } => "slave",
        }
    }
}

/// Role, replication id/offset, and the replica registry of this server.
pub struct ReplicationCoordinator {
    role: Role,
    replid: String,
    offset: AtomicU64,
    snapshot: Bytes,
    propagator: CommandPropagator,
}

impl ReplicationCoordinator {
    /// `snapshot` is what full resync hands to replicas; `None` uses an empty one.
    pub fn new(role: Role, snapshot: Option<Bytes>) -> Result<Self, ReplicationError> {
        let snapshot = match snapshot {
            Some(s) => s,
            None => Bytes::from(hex::decode(EMPTY_RDB_HEX)?),
        };
        Ok(Self {
            role,
            replid: random_replid(),
            offset: AtomicU64::new(0),
            snapshot,
            propagator: CommandPropagator::new(),
        })
    }

    pub fn role(&self) -> &Role {
        &self.role
    }

    pub fn is_primary(&self) -> bool {
        self.role == Role::Primary
    }

    pub fn replid(&self) -> &str {
        &self.replid
    }

    pub fn offset(&self) -> u64 {
        self.offset.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self) -> &Bytes {
        &self.snapshot
    }

    /// Body of `INFO replication`.
    pub fn info(&self) -> String {
        match self.role {
            Role::Primary => format!(
                "role:{}\r\nmaster_replid:{}\r\nmaster_repl_offset:{}",
                self.role.as_str(),
                self.replid,
                self.offset()
            ),
            Role::Replica { .. } => format!("role:{}", self.role.as_str()),
        }
    }

    pub fn full_resync_line(&self) -> String {
        format!("FULLRESYNC {} {}", self.replid, self.offset())
    }

    pub fn register_replica(&self, sender: UnboundedSender<Bytes>) {
        self.propagator.add_replica(sender);
        info!(replicas = self.propagator.replica_count(), "replica completed full resync");
    }

    pub fn replica_count(&self) -> usize {
        self.propagator.replica_count()
    }

    /// Broadcasts the raw bytes of a write command and advances the offset
    /// by the bytes actually handed to replicas.
    pub fn propagate(&self, frame: &Bytes) {
        let delivered = self.propagator.propagate(frame);
        if delivered > 0 {
            self.offset.fetch_add(frame.len() as u64, Ordering::SeqCst);
            debug!(bytes = frame.len(), replicas = delivered, "propagated write");
        }
    }
}

fn random_replid() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(REPLID_LEN)
        .map(char::from)
        .collect()
}

/// Runs the replica side of the handshake against `primary_addr`.
///
/// The snapshot the primary sends back replaces the contents of `db`.
/// Returns the open connection plus whatever bytes arrived after the
/// snapshot, which belong to the propagated command stream.
pub async fn handshake(
    primary_addr: &str,
    own_port: u16,
    db: &Mutex<InMemoryDB>,
) -> Result<(TcpStream, BytesMut), ReplicationError> {
    info!(primary = primary_addr, "connecting to primary");
    let mut stream = TcpStream::connect(primary_addr).await?;
    let mut buf = BytesMut::with_capacity(4096);

    let port = own_port.to_string();
    let steps: [&[&str]; 3] = [
        &["PING"],
        &["REPLCONF", "listening-port", port.as_str()],
        &["REPLCONF", "capa", "psync2"],
    ];
    for step in steps {
        stream.write_all(&resp::encode_array(step)).await?;
        let reply = read_reply(&mut stream, &mut buf, resp::parse_value).await?;
        debug!(command = step[0], ?reply, "handshake reply");
    }

    stream
        .write_all(&resp::encode_array(&["PSYNC", "?", "-1"]))
        .await?;
    match read_reply(&mut stream, &mut buf, resp::parse_value).await? {
        RespValue::Simple(line) if line.starts_with("FULLRESYNC") => info!(%line, "full resync"),
        other => warn!(reply = ?other, "unexpected PSYNC reply"),
    }
    let snapshot = read_reply(&mut stream, &mut buf, resp::parse_rdb).await?;
    {
        let mut db = db.lock();
        db.clear();
        match rdb::load_into(&snapshot, &mut db) {
            Ok(n) => info!(keys = n, bytes = snapshot.len(), "loaded snapshot from primary"),
            Err(e) => warn!(error = %e, "snapshot from primary only partially loaded"),
        }
    }

    stream
        .write_all(&resp::encode_array(&["REPLCONF", "ACK", "0"]))
        .await?;
    info!(primary = primary_addr, "handshake complete, streaming");
    Ok((stream, buf))
}

async fn read_reply<T>(
    stream: &mut TcpStream,
    buf: &mut BytesMut,
    parse: fn(&[u8]) -> Result<(T, usize), RespError>,
) -> Result<T, ReplicationError> {
    loop {
        match parse(&buf[..]) {
            Ok((value, used)) => {
                let _ = buf.split_to(used);
                return Ok(value);
            }
            Err(RespError::Incomplete) => {}
            Err(RespError::Invalid(msg)) => return Err(ReplicationError::Protocol(msg)),
        }
        if stream.read_buf(buf).await? == 0 {
            return Err(ReplicationError::ConnectionClosed);
        }
    }
}

use crate::db::InMemoryDB;
use crate::handler::{handle_connection, Link};
use crate::rdb;
use crate::replication::{self, ReplicationCoordinator, Role};
use crate::types::Config;
use anyhow::Context;
use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

/// Everything a connection task needs, cheap to clone.
#[derive(Clone)]
pub struct ServerState {
    pub config: Arc<Config>,
    pub db: Arc<Mutex<InMemoryDB>>,
    pub replication: Arc<ReplicationCoordinator>,
}

impl ServerState {
    pub fn new(config: Config, replication: ReplicationCoordinator) -> Self {
        Self {
            config: Arc::new(config),
            db: Arc::new(Mutex::new(InMemoryDB::new())),
            replication: Arc::new(replication),
        }
    }
}

pub struct Server {
    listener: TcpListener,
    state: ServerState,
}

impl Server {
    /// Loads the snapshot, binds the listener and, for a replica, completes
    /// the handshake with the primary. Nothing is accepted until [`Server::run`].
    pub async fn bind(config: Config) -> anyhow::Result<Self> {
        let path = config.snapshot_path();
        let mut db = InMemoryDB::new();
        let snapshot = rdb::read_snapshot_file(&path)
            .with_context(|| format!("reading snapshot {}", path.display()))?;
        let snapshot = match snapshot {
            Some(buf) => {
                match rdb::load_into(&buf, &mut db) {
                    Ok(n) => info!(path = %path.display(), keys = n, "snapshot loaded"),
                    Err(e) => warn!(path = %path.display(), error = %e, "snapshot partially loaded"),
                }
                Some(Bytes::from(buf))
            }
            None => {
                info!(path = %path.display(), "no snapshot file, starting empty");
                None
            }
        };

        let role = match &config.replica_of {
            Some(primary_addr) => Role::Replica {
                primary_addr: primary_addr.clone(),
            },
            None => Role::Primary,
        };
        let coordinator = ReplicationCoordinator::new(role, snapshot)?;

        let listener = TcpListener::bind(config.listen_addr())
            .await
            .with_context(|| format!("binding {}", config.listen_addr()))?;
        let own_port = listener.local_addr()?.port();

        let state = ServerState {
            config: Arc::new(config),
            db: Arc::new(Mutex::new(db)),
            replication: Arc::new(coordinator),
        };

        if let Role::Replica { primary_addr } = state.replication.role() {
            let (stream, leftover) = replication::handshake(primary_addr, own_port, &state.db)
                .await
                .with_context(|| format!("replication handshake with {}", primary_addr))?;
            tokio::spawn(handle_connection(
                stream,
                state.clone(),
                Link::Primary,
                leftover,
            ));
        }

        Ok(Self { listener, state })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn state(&self) -> &ServerState {
        &self.state
    }

    /// Accepts connections forever, one task each.
    pub async fn run(self) -> anyhow::Result<()> {
        info!(addr = %self.local_addr()?, role = self.state.replication.role().as_str(), "listening");
        loop {
            match self.listener.accept().await {
                Ok((stream, addr)) => {
                    info!(%addr, "accepted connection");
                    tokio::spawn(handle_connection(
                        stream,
                        self.state.clone(),
                        Link::Client,
                        BytesMut::new(),
                    ));
                }
                Err(e) => error!(error = %e, "accept failed"),
            }
        }
    }
}

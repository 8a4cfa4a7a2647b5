use crate::commands::dispatch;
use crate::error::RespError;
use crate::resp::{encode_null_bulk_string, parse_value};
use crate::server::ServerState;
use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, info, warn};

/// Who is on the other end of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Link {
    /// A regular client; every reply is written back.
    Client,
    /// Our primary's replication stream; commands are applied, replies dropped.
    Primary,
}

/// Serves one connection until the peer hangs up or sends a malformed frame.
/// `buf` may already hold bytes read ahead by the replication handshake.
pub async fn handle_connection(stream: TcpStream, state: ServerState, link: Link, mut buf: BytesMut) {
    let peer = stream
        .peer_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| "unknown".to_string());
    let (mut reader, writer) = stream.into_split();
    let (tx, rx) = mpsc::unbounded_channel::<Bytes>();
    let writer_task = tokio::spawn(write_loop(writer, rx));
    let mut is_replica = false;

    'conn: loop {
        loop {
            match parse_value(&buf) {
                Ok((value, used)) => {
                    let raw = buf.split_to(used).freeze();
                    let Some(args) = value.into_command() else {
                        if link == Link::Primary {
                            debug!(%peer, "ignoring non-command value from primary");
                            continue;
                        }
                        debug!(%peer, "value is not an array of bulk strings");
                        if !send_replies(&tx, [encode_null_bulk_string()]) {
                            break 'conn;
                        }
                        continue;
                    };
                    let outcome = dispatch(&args, &raw, &state);
                    if link == Link::Client && !send_replies(&tx, outcome.replies) {
                        debug!(%peer, "writer gone, closing");
                        break 'conn;
                    }
                    if outcome.register_replica && !is_replica {
                        state.replication.register_replica(tx.clone());
                        is_replica = true;
                    }
                }
                Err(RespError::Incomplete) => break,
                Err(RespError::Invalid(msg)) => {
                    warn!(%peer, error = %msg, "malformed frame, closing");
                    break 'conn;
                }
            }
        }

        match reader.read_buf(&mut buf).await {
            Ok(0) => {
                if !buf.is_empty() {
                    warn!(%peer, pending = buf.len(), "connection closed mid-frame");
                }
                break;
            }
            Ok(_) => {}
            Err(e) => {
                debug!(%peer, error = %e, "read failed");
                break;
            }
        }
    }

    info!(%peer, ?link, "connection closed");
    drop(tx);
    if is_replica {
        // The registry still holds a sender; stopping the writer lets the
        // next broadcast notice the channel is gone.
        writer_task.abort();
    } else {
        let _ = writer_task.await;
    }
}

/// Queues replies for the writer task. `false` once the writer has stopped.
fn send_replies(tx: &UnboundedSender<Bytes>, replies: impl IntoIterator<Item = Bytes>) -> bool {
    replies.into_iter().all(|reply| tx.send(reply).is_ok())
}

async fn write_loop(mut writer: OwnedWriteHalf, mut rx: UnboundedReceiver<Bytes>) {
    while let Some(bytes) = rx.recv().await {
        if let Err(e) = writer.write_all(&bytes).await {
            debug!(error = %e, "write failed, dropping connection output");
            break;
        }
    }
}

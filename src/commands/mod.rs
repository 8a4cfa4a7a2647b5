use crate::db::InMemoryDB;
use crate::replication::ReplicationCoordinator;
use crate::resp::*;
use crate::server::ServerState;
use crate::types::Config;
use bytes::Bytes;

/// What a command produced for the connection that sent it.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Outcome {
    /// Encoded replies, written in order.
    pub replies: Vec<Bytes>,
    /// The command changed the store and its raw bytes go to the replicas.
    pub propagate: bool,
    /// The connection asked for a full resync and becomes a replica channel.
    pub register_replica: bool,
}

impl Outcome {
    fn reply(response: Bytes) -> Self {
        Self {
            replies: vec![response],
            ..Self::default()
        }
    }
}

/// Runs one decoded command against the shared state. `raw` is the frame as
/// it arrived on the wire; writes forward it to the replicas.
pub fn dispatch(args: &[Bytes], raw: &Bytes, state: &ServerState) -> Outcome {
    let Some(name) = args.first() else {
        return Outcome::reply(encode_null_bulk_string());
    };
    let name = String::from_utf8_lossy(name).to_ascii_uppercase();
    match name.as_str() {
        "PING" => Outcome::reply(handle_ping(args)),
        "ECHO" => Outcome::reply(handle_echo(args)),
        "GET" => Outcome::reply(handle_get(args, &mut state.db.lock())),
        "SET" => {
            // Broadcast under the store lock so replicas see writes in store order.
            let mut db = state.db.lock();
            let outcome = handle_set(args, &mut db, &state.replication);
            if outcome.propagate {
                state.replication.propagate(raw);
            }
            outcome
        }
        "KEYS" => Outcome::reply(handle_keys(args, &mut state.db.lock())),
        "CONFIG" => Outcome::reply(handle_config(args, &state.config)),
        "INFO" => Outcome::reply(handle_info(args, &state.replication)),
        "REPLCONF" => Outcome::reply(handle_replconf(args)),
        "PSYNC" => handle_psync(args, &state.replication),
        _ => Outcome::reply(encode_null_bulk_string()),
    }
}

fn eq_ignore_case(arg: &[u8], word: &str) -> bool {
    arg.eq_ignore_ascii_case(word.as_bytes())
}

pub fn handle_ping(_args: &[Bytes]) -> Bytes {
    encode_simple_string("PONG")
}

pub fn handle_echo(args: &[Bytes]) -> Bytes {
    match args {
        [_, msg] => encode_bulk_string(msg),
        _ => encode_null_bulk_string(),
    }
}

pub fn handle_get(args: &[Bytes], db: &mut InMemoryDB) -> Bytes {
    match args {
        [_, key] => match db.get(key) {
            Some(val) => encode_bulk_string(&val),
            None => encode_null_bulk_string(),
        },
        _ => encode_null_bulk_string(),
    }
}

/// `SET key value [PX ms]`. A replica applies the write without replying.
pub fn handle_set(
    args: &[Bytes],
    db: &mut InMemoryDB,
    replication: &ReplicationCoordinator,
) -> Outcome {
    match args {
        [_, key, value] => db.set(key.clone(), value.clone(), None),
        [_, key, value, px, ms] if eq_ignore_case(px, "PX") => {
            let ttl = std::str::from_utf8(ms)
                .ok()
                .and_then(|s| s.parse::<u64>().ok());
            match ttl {
                Some(ms) => db.set_with_expiry(key.clone(), value.clone(), ms),
                None => return Outcome::reply(encode_null_bulk_string()),
            }
        }
        _ => return Outcome::reply(encode_null_bulk_string()),
    }
    let replies = if replication.is_primary() {
        vec![encode_simple_string("OK")]
    } else {
        Vec::new()
    };
    Outcome {
        replies,
        propagate: true,
        register_replica: false,
    }
}

/// Only the match-everything pattern is understood.
pub fn handle_keys(args: &[Bytes], db: &mut InMemoryDB) -> Bytes {
    match args {
        [_, pattern] if &pattern[..] == b"*" => encode_array(&db.keys()),
        _ => encode_null_bulk_string(),
    }
}

pub fn handle_config(args: &[Bytes], config: &Config) -> Bytes {
    match args {
        [_, sub, param] if eq_ignore_case(sub, "GET") => {
            if eq_ignore_case(param, "dir") {
                encode_array(&["dir", config.dir.as_str()])
            } else if eq_ignore_case(param, "dbfilename") {
                encode_array(&["dbfilename", config.dbfilename.as_str()])
            } else {
                encode_null_bulk_string()
            }
        }
        _ => encode_null_bulk_string(),
    }
}

pub fn handle_info(args: &[Bytes], replication: &ReplicationCoordinator) -> Bytes {
    match args {
        [_] => encode_bulk_string(replication.info().as_bytes()),
        [_, section] if eq_ignore_case(section, "replication") => {
            encode_bulk_string(replication.info().as_bytes())
        }
        _ => encode_null_bulk_string(),
    }
}

pub fn handle_replconf(_args: &[Bytes]) -> Bytes {
    encode_simple_string("OK")
}

/// Only `PSYNC ? -1` (full resync) is served.
pub fn handle_psync(args: &[Bytes], replication: &ReplicationCoordinator) -> Outcome {
    match args {
        [_, replid, offset] if &replid[..] == b"?" && &offset[..] == b"-1" => Outcome {
            replies: vec![
                encode_simple_string(&replication.full_resync_line()),
                encode_rdb(replication.snapshot()),
            ],
            propagate: false,
            register_replica: true,
        },
        _ => Outcome::reply(encode_null_bulk_string()),
    }
}

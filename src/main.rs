use anyhow::Context;
use clap::Parser;
use kv_replica::types::{parse_replica_of, Config, DEFAULT_PORT};
use kv_replica::Server;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "kv-replica")]
#[command(about = "In-memory key/value server with RDB loading and replication")]
struct Args {
    /// Directory holding the snapshot file
    #[arg(long, default_value = ".")]
    dir: String,

    /// Snapshot file name inside --dir
    #[arg(long, default_value = "dump.rdb")]
    dbfilename: String,

    #[arg(long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Primary to replicate from, as "<host> <port>"
    #[arg(long)]
    replicaof: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).with_target(true).init();

    let args = Args::parse();
    let replica_of = args
        .replicaof
        .as_deref()
        .map(parse_replica_of)
        .transpose()
        .context("invalid --replicaof")?;

    let config = Config {
        dir: args.dir,
        dbfilename: args.dbfilename,
        port: args.port,
        replica_of,
    };

    Server::bind(config).await?.run().await
}

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use rs_leech::peer::LOCAL_PEER_ID;
use rs_leech::{FileStorage, SessionConfig, SessionPool, SharedTorrent, Torrent};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Download a torrent's pieces from a known set of peers.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// The .torrent file to download.
    #[arg(short, long)]
    file: PathBuf,

    /// Peer to download from, as host:port. Repeat for several peers.
    #[arg(short, long = "peer", required = true)]
    peers: Vec<String>,

    /// Output file. Defaults to the torrent's name in the current directory.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// 20-character peer id. A random one is generated if omitted.
    #[arg(long)]
    peer_id: Option<String>,

    /// Seconds to wait for a TCP connection.
    #[arg(long, default_value_t = 10)]
    connect_timeout: u64,

    /// Seconds to wait for an unchoke after declaring interest.
    #[arg(long, default_value_t = 20)]
    unchoke_timeout: u64,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    if let Err(e) = run(args).await {
        error!("{e}");
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let torrent = Torrent::from_file(&args.file)?;
    info!(
        name = %torrent.name,
        pieces = torrent.piece_count,
        piece_length = torrent.piece_length,
        total = torrent.total_length,
        "torrent loaded"
    );

    let peer_id = match &args.peer_id {
        Some(id) => <[u8; 20]>::try_from(id.as_bytes())
            .map_err(|_| format!("peer id must be exactly 20 bytes, got {}", id.len()))?,
        None => *LOCAL_PEER_ID,
    };

    let output = args.output.clone().unwrap_or_else(|| {
        if torrent.name.is_empty() {
            PathBuf::from("download.bin")
        } else {
            PathBuf::from(&torrent.name)
        }
    });
    let storage = FileStorage::create(&output, torrent.total_length).await?;
    let shared = Arc::new(SharedTorrent::new(torrent, Arc::new(storage)));

    let config = SessionConfig {
        connect_timeout: Duration::from_secs(args.connect_timeout),
        unchoke_timeout: Duration::from_secs(args.unchoke_timeout),
        ..SessionConfig::default()
    };
    let mut pool = SessionPool::new(Arc::clone(&shared), peer_id, config);
    for peer in &args.peers {
        pool.spawn(peer.clone());
    }

    loop {
        tokio::select! {
            report = pool.join_next() => {
                let Some(report) = report else { break };
                match report.outcome {
                    Ok(stats) => info!(
                        peer = %report.peer,
                        pieces = stats.pieces_committed,
                        end = ?stats.end,
                        "peer done"
                    ),
                    Err(e) => warn!(peer = %report.peer, error = %e, "peer failed"),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                warn!("interrupted");
                pool.abort_all();
            }
        }
    }

    let (have, total) = shared.progress().await;
    info!(have, total, output = %output.display(), "finished");
    if have < total {
        return Err(format!("incomplete download: {have}/{total} pieces").into());
    }
    Ok(())
}

//! Live ingestion over a TCP line feed
//!
//! Every connection gets its own task; each newline-terminated line is one
//! record in the canonical format.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};

use super::{ingest_raw_line, IngestStats};
use crate::storage::PatientStore;

/// TCP listener feeding the store
pub struct LineListener {
    listener: TcpListener,
    store: Arc<PatientStore>,
    stats: Arc<IngestStats>,
}

impl LineListener {
    pub async fn bind(
        addr: impl ToSocketAddrs,
        store: Arc<PatientStore>,
        stats: Arc<IngestStats>,
    ) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            store,
            stats,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections until the task is dropped
    pub async fn run(self) {
        serve_lines(self.listener, self.store, self.stats).await
    }
}

/// Accept loop over an already bound listener
pub async fn serve_lines(listener: TcpListener, store: Arc<PatientStore>, stats: Arc<IngestStats>) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                tracing::info!(%peer, "Line feed connected");
                let store = Arc::clone(&store);
                let stats = Arc::clone(&stats);
                tokio::spawn(async move {
                    match handle_connection(stream, &store, &stats).await {
                        Ok(lines) => tracing::info!(%peer, lines, "Line feed closed"),
                        Err(e) => tracing::warn!(%peer, error = %e, "Line feed failed"),
                    }
                });
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to accept line feed connection");
            }
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    store: &PatientStore,
    stats: &IngestStats,
) -> io::Result<usize> {
    let mut reader = BufReader::new(stream);
    let mut buf = Vec::new();
    let mut seen = 0;

    while reader.read_until(b'\n', &mut buf).await? > 0 {
        seen += 1;
        let result = ingest_raw_line(store, &buf);
        buf.clear();
        match result {
            Ok(true) => stats.record_accepted(1),
            Ok(false) => {}
            Err(e) => {
                tracing::warn!(line = seen, error = %e, "Rejected feed line");
                stats.record_rejected(1);
            }
        }
    }

    Ok(seen)
}

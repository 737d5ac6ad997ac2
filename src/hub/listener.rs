//! A `TcpListener` wrapper that consults the scanner defense blocklist at
//! accept time, before axum (and hyper's HTTP parser) ever sees the socket.
//!
//! Axum/Tower middleware only runs once hyper has accepted the connection
//! and parsed a full request, which is too late for spec §4.9's "blocked
//! peer gets no I/O at all" requirement — a middleware-based reject still
//! pays for the TCP handshake, the TLS handshake (if any), and a full HTTP
//! request parse before responding. Filtering in [`Listener::accept`]
//! instead means a blocked peer's connection is silently dropped the moment
//! it's accepted.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::serve::Listener;
use tokio::net::{TcpListener, TcpStream};
use tracing::warn;

use crate::scanner::defense::ScannerDefense;

/// Wraps a bound [`TcpListener`], rejecting already-blocked peers before
/// handing their socket off to axum.
pub struct FilteredListener {
    inner: TcpListener,
    scanner: Arc<ScannerDefense>,
}

impl FilteredListener {
    /// Wrap `inner`, consulting `scanner` on every accepted connection.
    #[must_use]
    pub fn new(inner: TcpListener, scanner: Arc<ScannerDefense>) -> Self {
        Self { inner, scanner }
    }
}

impl Listener for FilteredListener {
    type Io = TcpStream;
    type Addr = SocketAddr;

    async fn accept(&mut self) -> (Self::Io, Self::Addr) {
        loop {
            let (stream, addr) = match self.inner.accept().await {
                Ok(pair) => pair,
                Err(err) => {
                    warn!(%err, "external listener accept failed");
                    tokio::time::sleep(std::time::Duration::from_millis(10)).await;
                    continue;
                }
            };

            if self.scanner.is_blocked(addr.ip()).await {
                drop(stream);
                continue;
            }

            return (stream, addr);
        }
    }

    fn local_addr(&self) -> io::Result<Self::Addr> {
        self.inner.local_addr()
    }
}

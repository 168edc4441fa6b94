// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! TCP endpoint (component C2, spec §4.2): a local listening socket for one
//! reader app (IFSF or Transit). Only one client is supported at a time —
//! the reader is a singleton peer.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use crate::error::CoreError;
use crate::events::EventBus;

/// Connect/disconnect notifications for the app-state container to reduce
/// into `IfsfApp`/`TransitApp` (spec §4.2).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndpointEvent {
    ClientConnected { addr: SocketAddr },
    ClientDisconnected { addr: SocketAddr },
}

fn now_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as u64).unwrap_or(0)
}

struct Inner {
    write_half: Mutex<Option<OwnedWriteHalf>>,
    peer_addr: Mutex<Option<SocketAddr>>,
    last_rx_ms: AtomicU64,
    events: EventBus<EndpointEvent>,
    inbound_tx: mpsc::UnboundedSender<Vec<u8>>,
}

/// A local TCP listener dedicated to one reader app.
pub struct TcpEndpoint {
    name: &'static str,
    inner: Arc<Inner>,
    inbound_rx: mpsc::UnboundedReceiver<Vec<u8>>,
}

impl TcpEndpoint {
    pub async fn bind(name: &'static str, port: u16, shutdown: CancellationToken) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(("127.0.0.1", port)).await?;
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let inner = Arc::new(Inner {
            write_half: Mutex::new(None),
            peer_addr: Mutex::new(None),
            last_rx_ms: AtomicU64::new(now_ms()),
            events: EventBus::new(),
            inbound_tx,
        });

        spawn_accept_loop(name, listener, Arc::clone(&inner), shutdown);

        Ok(Self { name, inner, inbound_rx })
    }

    pub fn events(&self) -> EventBus<EndpointEvent> {
        self.inner.events.clone()
    }

    pub async fn peer_addr(&self) -> Option<SocketAddr> {
        *self.inner.peer_addr.lock().await
    }

    pub fn is_elapsed_from_last_rx(&self, ms: u64) -> bool {
        now_ms().saturating_sub(self.inner.last_rx_ms.load(Ordering::Relaxed)) >= ms
    }

    /// Blocking (awaited) write primitive. Fails with `NotConnected` if no
    /// client is connected, or the connected client does not match `target`.
    pub async fn output(&self, frame: &[u8], target: SocketAddr) -> Result<(), CoreError> {
        let peer = *self.inner.peer_addr.lock().await;
        if peer != Some(target) {
            return Err(CoreError::InvalidResponse(format!(
                "{}: not connected to {target}",
                self.name
            )));
        }
        let mut guard = self.inner.write_half.lock().await;
        let Some(write_half) = guard.as_mut() else {
            return Err(CoreError::InvalidResponse(format!("{}: not connected", self.name)));
        };
        write_half
            .write_all(frame)
            .await
            .map_err(|e| CoreError::InvalidResponse(format!("{}: write failed: {e}", self.name)))
    }

    /// Drain every byte chunk received since the last drain (non-blocking,
    /// called once per master-loop tick by the owning proxy).
    pub fn drain_inbound(&mut self) -> Vec<u8> {
        let mut out = Vec::new();
        while let Ok(chunk) = self.inbound_rx.try_recv() {
            out.extend_from_slice(&chunk);
        }
        out
    }
}

fn spawn_accept_loop(
    name: &'static str,
    listener: TcpListener,
    inner: Arc<Inner>,
    shutdown: CancellationToken,
) {
    tokio::spawn(async move {
        loop {
            let (stream, addr) = tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok(pair) => pair,
                    Err(e) => {
                        tracing::warn!(endpoint = name, err = %e, "accept failed");
                        continue;
                    }
                },
            };

            // Singleton reader: a new connection replaces any previous one.
            tracing::info!(endpoint = name, %addr, "client connected");
            let (mut read_half, write_half) = stream.into_split();
            *inner.write_half.lock().await = Some(write_half);
            *inner.peer_addr.lock().await = Some(addr);
            inner.last_rx_ms.store(now_ms(), Ordering::Relaxed);
            inner.events.publish(EndpointEvent::ClientConnected { addr });

            let inner_read = Arc::clone(&inner);
            let shutdown_read = shutdown.clone();
            tokio::spawn(async move {
                let mut buf = [0u8; 4096];
                loop {
                    let n = tokio::select! {
                        _ = shutdown_read.cancelled() => break,
                        result = read_half.read(&mut buf) => match result {
                            Ok(0) => break,
                            Ok(n) => n,
                            Err(e) => {
                                tracing::warn!(endpoint = name, %addr, err = %e, "read error");
                                break;
                            }
                        },
                    };
                    inner_read.last_rx_ms.store(now_ms(), Ordering::Relaxed);
                    let _ = inner_read.inbound_tx.send(buf[..n].to_vec());
                }

                // Reset connection state on disconnect.
                *inner_read.peer_addr.lock().await = None;
                *inner_read.write_half.lock().await = None;
                inner_read.events.publish(EndpointEvent::ClientDisconnected { addr });
                tracing::info!(endpoint = name, %addr, "client disconnected");
            });
        }
    });
}

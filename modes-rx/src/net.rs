//! TCP services: raw output, raw input, SBS output, SBS input.
//!
//! One listener task per service, one task per connection. Fan-out uses a
//! broadcast channel per output service, so every peer sees frames in
//! arrival order; a peer that cannot keep up skips the lagged messages
//! (best effort, drops counted, never signalled to the sender).
//!
//! Active mode replaces the input listeners with outbound connections; a
//! connect timeout there is fatal and trips the exit flag.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::config::CONNECT_TIMEOUT_MS;
use crate::router::{self, App};

/// Broadcast depth per output service; a peer further behind than this
/// loses the oldest frames.
const FANOUT_DEPTH: usize = 1024;

/// The five network services.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Service {
    RawOut,
    RawIn,
    SbsOut,
    SbsIn,
    Http,
}

impl Service {
    pub fn describe(self) -> &'static str {
        match self {
            Service::RawOut => "Raw TCP output",
            Service::RawIn => "Raw TCP input",
            Service::SbsOut => "SBS TCP output",
            Service::SbsIn => "SBS TCP input",
            Service::Http => "HTTP server",
        }
    }

    pub const ALL: [Service; 5] = [
        Service::RawOut,
        Service::RawIn,
        Service::SbsOut,
        Service::SbsIn,
        Service::Http,
    ];
}

/// Per-service bookkeeping, shown in the final stats dump.
#[derive(Debug, Default, Clone)]
pub struct ServiceStats {
    pub accepted: u64,
    pub removed: u64,
    pub bytes_in: u64,
    pub bytes_out: u64,
    pub dropped_msgs: u64,
    pub last_err: Option<String>,
}

/// Shared network state: fan-out senders, client counts, counters.
pub struct NetHub {
    raw_tx: broadcast::Sender<Arc<Vec<u8>>>,
    sbs_tx: broadcast::Sender<Arc<Vec<u8>>>,
    raw_clients: AtomicUsize,
    sbs_clients: AtomicUsize,
    stats: [Mutex<ServiceStats>; 5],
}

impl NetHub {
    pub fn new() -> Self {
        let (raw_tx, _) = broadcast::channel(FANOUT_DEPTH);
        let (sbs_tx, _) = broadcast::channel(FANOUT_DEPTH);
        NetHub {
            raw_tx,
            sbs_tx,
            raw_clients: AtomicUsize::new(0),
            sbs_clients: AtomicUsize::new(0),
            stats: Default::default(),
        }
    }

    /// Enqueue a raw `*HEX;\n` line to every raw-output peer.
    pub fn send_raw(&self, line: Vec<u8>) {
        // An Err only means no connected receivers.
        let _ = self.raw_tx.send(Arc::new(line));
    }

    /// Enqueue an SBS line to every SBS-output peer.
    pub fn send_sbs(&self, line: Vec<u8>) {
        let _ = self.sbs_tx.send(Arc::new(line));
    }

    pub fn raw_clients(&self) -> usize {
        self.raw_clients.load(Ordering::Relaxed)
    }

    pub fn sbs_clients(&self) -> usize {
        self.sbs_clients.load(Ordering::Relaxed)
    }

    pub fn stats(&self, service: Service) -> ServiceStats {
        self.stats[service as usize].lock().unwrap().clone()
    }

    pub fn store_error(&self, service: Service, err: &str) {
        let mut stats = self.stats[service as usize].lock().unwrap();
        stats.last_err = Some(err.to_string());
    }

    fn with_stats(&self, service: Service, f: impl FnOnce(&mut ServiceStats)) {
        f(&mut self.stats[service as usize].lock().unwrap());
    }

    fn client_gauge(&self, service: Service) -> Option<&AtomicUsize> {
        match service {
            Service::RawOut => Some(&self.raw_clients),
            Service::SbsOut => Some(&self.sbs_clients),
            _ => None,
        }
    }

    pub(crate) fn subscribe(&self, service: Service) -> broadcast::Receiver<Arc<Vec<u8>>> {
        match service {
            Service::RawOut => self.raw_tx.subscribe(),
            Service::SbsOut => self.sbs_tx.subscribe(),
            _ => unreachable!("not an output service"),
        }
    }
}

impl Default for NetHub {
    fn default() -> Self {
        NetHub::new()
    }
}

// ---------------------------------------------------------------------------
// Output services
// ---------------------------------------------------------------------------

/// Listen on `port` and stream the service's fan-out to every peer.
pub async fn serve_output(app: Arc<App>, service: Service, port: u16) {
    let addr = format!("0.0.0.0:{port}");
    let listener = match TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            warn!("{}: cannot listen on {addr}: {e}", service.describe());
            app.net.store_error(service, &e.to_string());
            return;
        }
    };
    info!("{} listening on {addr}", service.describe());

    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                debug!("{}: client {peer} connected", service.describe());
                app.net.with_stats(service, |s| s.accepted += 1);
                if let Some(gauge) = app.net.client_gauge(service) {
                    gauge.fetch_add(1, Ordering::Relaxed);
                }
                let app = app.clone();
                tokio::spawn(async move {
                    handle_output_client(&app, service, stream).await;
                    app.net.with_stats(service, |s| s.removed += 1);
                    if let Some(gauge) = app.net.client_gauge(service) {
                        gauge.fetch_sub(1, Ordering::Relaxed);
                    }
                    debug!("{}: client {peer} removed", service.describe());
                });
            }
            Err(e) => {
                app.net.store_error(service, &e.to_string());
            }
        }
    }
}

async fn handle_output_client(app: &App, service: Service, mut stream: TcpStream) {
    let mut rx = app.net.subscribe(service);
    loop {
        match rx.recv().await {
            Ok(line) => {
                if stream.write_all(&line).await.is_err() {
                    return;
                }
                app.net
                    .with_stats(service, |s| s.bytes_out += line.len() as u64);
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                app.net.with_stats(service, |s| s.dropped_msgs += skipped);
            }
            Err(broadcast::error::RecvError::Closed) => return,
        }
    }
}

// ---------------------------------------------------------------------------
// Input services
// ---------------------------------------------------------------------------

/// Listen for raw `*HEX;` producers and feed their records to the router.
pub async fn serve_raw_input(app: Arc<App>, port: u16) {
    serve_input(app, Service::RawIn, port).await;
}

/// Listen for SBS producers; records are validated and counted only.
pub async fn serve_sbs_input(app: Arc<App>, port: u16) {
    serve_input(app, Service::SbsIn, port).await;
}

async fn serve_input(app: Arc<App>, service: Service, port: u16) {
    let addr = format!("0.0.0.0:{port}");
    let listener = match TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            warn!("{}: cannot listen on {addr}: {e}", service.describe());
            app.net.store_error(service, &e.to_string());
            return;
        }
    };
    info!("{} listening on {addr}", service.describe());

    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                debug!("{}: client {peer} connected", service.describe());
                app.net.with_stats(service, |s| s.accepted += 1);
                let app = app.clone();
                tokio::spawn(async move {
                    read_input_lines(&app, service, stream).await;
                    app.net.with_stats(service, |s| s.removed += 1);
                });
            }
            Err(e) => {
                app.net.store_error(service, &e.to_string());
            }
        }
    }
}

async fn read_input_lines(app: &App, service: Service, stream: TcpStream) {
    let mut lines = BufReader::new(stream).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        app.net
            .with_stats(service, |s| s.bytes_in += line.len() as u64 + 1);
        match service {
            Service::RawIn => router::process_raw_line(app, &line),
            Service::SbsIn => router::process_sbs_line(app, &line),
            _ => unreachable!("not an input service"),
        }
    }
}

// ---------------------------------------------------------------------------
// Active mode
// ---------------------------------------------------------------------------

/// Open the configured outbound raw-input connections.
///
/// Any connect failure or timeout is fatal for the whole process, matching
/// the listening services' inverse: an active receiver without its feed
/// has nothing to do.
pub async fn connect_active(app: Arc<App>, targets: &[String]) -> anyhow::Result<()> {
    for target in targets {
        let stream = match tokio::time::timeout(
            Duration::from_millis(CONNECT_TIMEOUT_MS),
            TcpStream::connect(target.as_str()),
        )
        .await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                app.net.store_error(Service::RawIn, &e.to_string());
                anyhow::bail!("connect to {target} failed: {e}");
            }
            Err(_) => {
                app.net.store_error(Service::RawIn, "connect timeout");
                anyhow::bail!("connect to {target} timed out");
            }
        };

        info!("connected to {target} (raw input)");
        app.net.with_stats(Service::RawIn, |s| s.accepted += 1);
        let app = app.clone();
        tokio::spawn(async move {
            read_input_lines(&app, Service::RawIn, stream).await;
            app.net.with_stats(Service::RawIn, |s| s.removed += 1);
        });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

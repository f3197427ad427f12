//! Shared utilities for integration and load testing.

#![allow(dead_code)]

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use egress_guard::clock::ManualClock;
use egress_guard::config::{HostConfig, ProxyConfig};
use egress_guard::lifecycle::{Components, Shutdown};
use egress_guard::observability::RecordingSink;
use egress_guard::proxy::HttpUpstream;
use egress_guard::store::{HostRecord, MemoryStateStore, StateStore};

pub const START_MILLIS: u64 = 1_700_000_000_000;

/// Read the request head (and a declared body) so the client never sees a reset.
async fn read_request(socket: &mut TcpStream) -> String {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        match socket.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
        }
        if let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            let head = String::from_utf8_lossy(&buf[..end]).to_string();
            let declared = head
                .lines()
                .find_map(|l| {
                    let (name, value) = l.split_once(':')?;
                    name.eq_ignore_ascii_case("content-length")
                        .then(|| value.trim().parse::<usize>().ok())
                        .flatten()
                })
                .unwrap_or(0);
            while buf.len() < end + 4 + declared {
                match socket.read(&mut chunk).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => buf.extend_from_slice(&chunk[..n]),
                }
            }
            break;
        }
    }
    String::from_utf8_lossy(&buf).to_string()
}

fn status_line(status: u16) -> &'static str {
    match status {
        200 => "200 OK",
        201 => "201 Created",
        404 => "404 Not Found",
        429 => "429 Too Many Requests",
        500 => "500 Internal Server Error",
        502 => "502 Bad Gateway",
        503 => "503 Service Unavailable",
        _ => "200 OK",
    }
}

/// Start a programmable mock backend on an ephemeral port. The closure gets
/// the raw request (head and body) and returns the status and body to send.
pub async fn start_programmable_backend<F, Fut>(f: F) -> SocketAddr
where
    F: Fn(String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = (u16, String)> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let f = Arc::new(f);

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    let f = f.clone();
                    tokio::spawn(async move {
                        let request = read_request(&mut socket).await;
                        let (status, body) = f(request).await;
                        let response = format!(
                            "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                            status_line(status),
                            body.len(),
                            body
                        );
                        let _ = socket.write_all(response.as_bytes()).await;
                        let _ = socket.shutdown().await;
                    });
                }
                Err(_) => break,
            }
        }
    });

    addr
}

/// Start a mock backend that always answers with `status`.
pub async fn start_mock_backend(status: u16, body: &'static str) -> SocketAddr {
    start_programmable_backend(move |_| async move { (status, body.to_string()) }).await
}

/// An address nothing listens on.
pub async fn closed_port() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}

pub fn host(key: &str, upstream: SocketAddr) -> HostConfig {
    let mut host = HostConfig::new(key, format!("/{key}"), format!("http://{}", upstream));
    host.rate_per_second = 1_000.0;
    host.burst_capacity = 1_000;
    host
}

/// One running proxy instance with a controllable clock.
pub struct TestProxy {
    pub addr: SocketAddr,
    pub clock: Arc<ManualClock>,
    pub backend: Arc<MemoryStateStore>,
    pub sink: Arc<RecordingSink>,
    pub shutdown: Shutdown,
    pub components: Components,
}

impl TestProxy {
    pub async fn start(hosts: Vec<HostConfig>) -> Self {
        Self::start_on(hosts, Arc::new(MemoryStateStore::new()), Arc::new(ManualClock::new(START_MILLIS))).await
    }

    /// Start an instance that shares `backend` and `clock` with others.
    pub async fn start_on(hosts: Vec<HostConfig>, backend: Arc<MemoryStateStore>, clock: Arc<ManualClock>) -> Self {
        let mut config = ProxyConfig::default();
        config.hosts = hosts;
        config.timeouts.request_secs = 5;
        // Concurrent tests race several writers on one record.
        config.store.cas_retries = 10;
        Self::start_with(config, backend, clock).await
    }

    pub async fn start_with(config: ProxyConfig, backend: Arc<MemoryStateStore>, clock: Arc<ManualClock>) -> Self {
        let sink = Arc::new(RecordingSink::new());
        let upstream = HttpUpstream::new(Duration::from_millis(config.timeouts.connect_ms)).unwrap();
        let components = Components::assemble(config, backend.clone(), clock.clone(), Arc::new(upstream), sink.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let shutdown = Shutdown::default();
        let server = components.http_server();
        let server_shutdown = shutdown.subscribe();
        tokio::spawn(async move {
            let _ = server.run(listener, server_shutdown).await;
        });

        Self {
            addr,
            clock,
            backend,
            sink,
            shutdown,
            components,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub async fn record(&self, host_key: &str) -> HostRecord {
        self.backend.get(host_key).await.unwrap().expect("host record").value
    }
}

pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .no_proxy()
        .build()
        .unwrap()
}

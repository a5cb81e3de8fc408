//! UDP listener pool.
//!
//! Binds one datagram socket and runs `concurrency` worker threads that share
//! it. Each worker loops: receive into its own buffer, then hand the datagram
//! to [`ReassemblyService::ingest`]. A receive error (including a configured
//! read timeout) ends only that worker.
//!
//! ## Shutdown
//! Workers do not poll a flag while blocked. When the service stops it
//! releases the [`EndpointGuard`] registered here: the socket is shut down,
//! which wakes blocked receives on Linux, and one empty datagram per worker is
//! sent to the bound address so any receive still parked returns as well.
//! A worker that receives after the service stopped hands a non-empty
//! datagram to the service (which counts it as late) and exits.

use anyhow::{Context, Result};
use socket2::{Domain, Protocol, SockRef, Socket, Type};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, Shutdown, SocketAddr, UdpSocket};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::decoder::{HEADER_LEN, MAX_DATAGRAM_LEN};
use crate::service::ReassemblyService;

pub const DEFAULT_PORT: u16 = 6789;

#[derive(Debug, Clone)]
pub struct ListenerConfig {
    pub bind_addr: SocketAddr,
    /// Worker thread count; values below 1 are treated as 1.
    pub concurrency: usize,
    /// Per-worker datagram buffer. Longer datagrams are truncated by the kernel.
    pub recv_buffer_size: usize,
    /// Per-receive timeout. A timeout ends the worker that hit it.
    pub read_timeout: Option<Duration>,
    /// Requested `SO_RCVBUF` size, if any.
    pub socket_recv_buffer: Option<usize>,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), DEFAULT_PORT),
            concurrency: 1,
            recv_buffer_size: MAX_DATAGRAM_LEN,
            read_timeout: None,
            socket_recv_buffer: Some(4 * 1024 * 1024),
        }
    }
}

/// A bound socket, ready to start workers.
pub struct ListenerPool {
    socket: Arc<UdpSocket>,
    local_addr: SocketAddr,
    config: ListenerConfig,
}

impl ListenerPool {
    /// Bind the shared receive endpoint. Failure here aborts startup.
    pub fn bind(config: ListenerConfig) -> Result<Self> {
        if config.recv_buffer_size < HEADER_LEN {
            anyhow::bail!(
                "recv_buffer_size {} is smaller than the {}-byte fragment header",
                config.recv_buffer_size,
                HEADER_LEN
            );
        }

        let domain = Domain::for_address(config.bind_addr);
        let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_reuse_address(true)?;

        if let Some(want) = config.socket_recv_buffer {
            socket.set_recv_buffer_size(want).ok();
            if let Ok(actual) = socket.recv_buffer_size() {
                if actual < want / 2 {
                    tracing::warn!(
                        "recv buffer is {}KB (wanted {}KB); \
                         raise it with: sysctl -w net.core.rmem_max={}",
                        actual / 1024,
                        want / 1024,
                        want * 2
                    );
                }
            }
        }

        socket
            .bind(&config.bind_addr.into())
            .with_context(|| format!("unable to bind UDP listener on {}", config.bind_addr))?;
        socket.set_read_timeout(config.read_timeout)?;

        let socket: UdpSocket = socket.into();
        let local_addr = socket.local_addr()?;
        tracing::info!(addr = %local_addr, "UDP listener bound");

        Ok(Self { socket: Arc::new(socket), local_addr, config })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Spawn the workers and register the endpoint with `service` so its
    /// shutdown releases them.
    pub fn start(self, service: Arc<ReassemblyService>) -> Result<Vec<JoinHandle<()>>> {
        let workers = self.config.concurrency.max(1);
        service.attach_endpoint(EndpointGuard {
            socket: self.socket.clone(),
            wake_addr: wake_addr(self.local_addr),
            workers,
        });

        let mut handles = Vec::with_capacity(workers);
        for id in 0..workers {
            let socket = self.socket.clone();
            let service = service.clone();
            let buf_len = self.config.recv_buffer_size;
            let handle = std::thread::Builder::new()
                .name(format!("frag-recv-{}", id))
                .spawn(move || run_worker(id, &socket, &service, buf_len))
                .context("failed to spawn listener worker")?;
            handles.push(handle);
        }
        tracing::info!(workers, addr = %self.local_addr, "listener pool started");
        Ok(handles)
    }
}

fn run_worker(id: usize, socket: &UdpSocket, service: &ReassemblyService, buf_len: usize) {
    let mut buf = vec![0u8; buf_len];
    loop {
        match socket.recv_from(&mut buf) {
            Ok((n, _peer)) => {
                let stopped = service.is_stopped();
                if n > 0 || !stopped {
                    // Decode failures and late datagrams are counted by the service.
                    let _ = service.ingest(&buf[..n]);
                }
                if stopped {
                    break;
                }
            }
            Err(e) => {
                if !service.is_stopped() {
                    tracing::warn!(worker = id, err = %e, "failed to read on UDP socket; worker exiting");
                }
                break;
            }
        }
    }
    tracing::info!(worker = id, "listener worker stopped");
}

/// Loopback address reaching a socket bound to `addr`.
fn wake_addr(addr: SocketAddr) -> SocketAddr {
    match addr.ip() {
        IpAddr::V4(ip) if ip.is_unspecified() => {
            SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), addr.port())
        }
        IpAddr::V6(ip) if ip.is_unspecified() => {
            SocketAddr::new(IpAddr::V6(Ipv6Addr::LOCALHOST), addr.port())
        }
        _ => addr,
    }
}

/// Handle that releases the listener pool's shared endpoint.
pub struct EndpointGuard {
    socket: Arc<UdpSocket>,
    wake_addr: SocketAddr,
    workers: usize,
}

impl EndpointGuard {
    pub(crate) fn release(self) {
        // Unconnected UDP sockets report ENOTCONN here but still wake readers on Linux.
        if let Err(e) = SockRef::from(self.socket.as_ref()).shutdown(Shutdown::Both) {
            tracing::debug!(err = %e, "socket shutdown");
        }

        let any = match self.wake_addr {
            SocketAddr::V4(_) => SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0),
            SocketAddr::V6(_) => SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), 0),
        };
        match UdpSocket::bind(any) {
            Ok(waker) => {
                for _ in 0..self.workers {
                    if let Err(e) = waker.send_to(&[], self.wake_addr) {
                        tracing::debug!(err = %e, "wake datagram not sent");
                        break;
                    }
                }
            }
            Err(e) => tracing::warn!(err = %e, "could not bind wake socket"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loopback_config(concurrency: usize) -> ListenerConfig {
        ListenerConfig {
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            concurrency,
            socket_recv_buffer: None,
            ..ListenerConfig::default()
        }
    }

    #[test]
    fn test_wake_addr_unspecified_to_loopback() {
        let a: SocketAddr = "0.0.0.0:6789".parse().unwrap();
        assert_eq!(wake_addr(a), "127.0.0.1:6789".parse().unwrap());
        let b: SocketAddr = "[::]:6789".parse().unwrap();
        assert_eq!(wake_addr(b), "[::1]:6789".parse().unwrap());
        let c: SocketAddr = "10.1.2.3:6789".parse().unwrap();
        assert_eq!(wake_addr(c), c);
    }

    #[test]
    fn test_rejects_tiny_recv_buffer() {
        let cfg = ListenerConfig { recv_buffer_size: 8, ..loopback_config(1) };
        assert!(ListenerPool::bind(cfg).is_err());
    }

    #[test]
    fn test_shutdown_releases_blocked_workers() {
        let service = ReassemblyService::new(64);
        let pool = ListenerPool::bind(loopback_config(3)).unwrap();
        let handles = pool.start(service.clone()).unwrap();
        std::thread::sleep(Duration::from_millis(50));
        service.shutdown();
        for h in handles {
            h.join().unwrap();
        }
        assert!(service.table().is_empty());
    }

    #[test]
    fn test_read_timeout_ends_worker() {
        let service = ReassemblyService::new(64);
        let cfg = ListenerConfig {
            read_timeout: Some(Duration::from_millis(20)),
            ..loopback_config(2)
        };
        let handles = ListenerPool::bind(cfg).unwrap().start(service.clone()).unwrap();
        for h in handles {
            h.join().unwrap();
        }
        assert!(!service.is_stopped());
    }
}

//! Port availability probes.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, TcpListener, TcpStream};
use std::time::Duration;
use tracing::trace;

/// Decides whether a port can be handed out.
///
/// The allocator only talks to the network through this trait, so tests can
/// swap in a deterministic implementation.
pub trait PortProbe: Send + Sync {
    /// Returns true if `port` is free to bind.
    fn is_free(&self, port: u16) -> bool;
}

/// Probes a port by binding a listener on loopback and closing it again.
///
/// A successful bind is followed by a connect bounded by the timeout. Some
/// platforms let a loopback bind succeed while another process listens on
/// the wildcard address; the connect catches that listener.
#[derive(Debug, Clone)]
pub struct TcpBindProbe {
    host: IpAddr,
    timeout: Duration,
}

impl TcpBindProbe {
    pub fn new(timeout: Duration) -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            timeout,
        }
    }

    /// Probes on a different local address.
    pub fn with_host(mut self, host: IpAddr) -> Self {
        self.host = host;
        self
    }

    pub fn host(&self) -> IpAddr {
        self.host
    }

    /// Upper bound for the connect check.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn has_listener(&self, port: u16) -> bool {
        let target = match self.host {
            IpAddr::V4(ip) if ip.is_unspecified() => IpAddr::V4(Ipv4Addr::LOCALHOST),
            IpAddr::V6(ip) if ip.is_unspecified() => IpAddr::V6(Ipv6Addr::LOCALHOST),
            ip => ip,
        };
        match TcpStream::connect_timeout(&SocketAddr::new(target, port), self.timeout) {
            Ok(_) => {
                trace!(host = %target, port, "Port bound but accepting connections");
                true
            }
            Err(_) => false,
        }
    }
}

impl Default for TcpBindProbe {
    fn default() -> Self {
        Self::new(Duration::from_millis(500))
    }
}

impl PortProbe for TcpBindProbe {
    fn is_free(&self, port: u16) -> bool {
        match TcpListener::bind((self.host, port)) {
            Ok(listener) => {
                drop(listener);
                !self.has_listener(port)
            }
            Err(e) => {
                trace!(host = %self.host, port, error = %e, "Port bind failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bound_port_is_not_free() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let probe = TcpBindProbe::default();
        assert!(!probe.is_free(port));
    }

    #[test]
    fn test_free_port_is_free_within_timeout() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };

        let probe = TcpBindProbe::new(Duration::from_millis(200));
        let started = std::time::Instant::now();
        assert!(probe.is_free(port));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn test_listener_is_detected_by_connect() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let probe = TcpBindProbe::new(Duration::from_millis(200));
        assert!(probe.has_listener(port));
        drop(listener);
        assert!(!probe.has_listener(port));
    }

    #[test]
    fn test_default_probe() {
        let probe = TcpBindProbe::default();
        assert_eq!(probe.host(), IpAddr::V4(Ipv4Addr::LOCALHOST));
        assert_eq!(probe.timeout(), Duration::from_millis(500));
    }
}

//! Readiness checks.
//!
//! Bounded polling loops that decide whether a remote service answers:
//!
//! - [`wait_for_tcp`] - raw TCP connect (SSH reachability)
//! - [`wait_for_service`] - TCP connect, then two HTTP GETs that must both
//!   return 200. Accepting connections is not enough; the application
//!   layer must also answer its readiness endpoint.
//!
//! Every loop carries an explicit overall timeout. There is no push-based
//! readiness notification from the provider.

use nico_common::config::{ComputeConfig, ServiceConfig};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Timing of one polling loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    /// Overall deadline.
    pub timeout: Duration,
    /// Pause between attempts.
    pub interval: Duration,
    /// Per-attempt connect / request timeout.
    pub attempt_timeout: Duration,
}

impl PollPolicy {
    /// SSH reachability policy from `[compute]`.
    pub fn ssh(config: &ComputeConfig) -> Self {
        Self {
            timeout: config.ssh_timeout(),
            interval: config.ssh_poll(),
            attempt_timeout: config.ssh_attempt_timeout(),
        }
    }

    /// Speech service policy from `[service]`.
    pub fn service(config: &ServiceConfig) -> Self {
        Self {
            timeout: config.timeout(),
            interval: config.poll(),
            attempt_timeout: config.attempt_timeout(),
        }
    }
}

/// Endpoints that must both answer 200.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceEndpoints {
    pub port: u16,
    /// Base endpoint, usually `/`.
    pub base_path: String,
    /// Application-level readiness endpoint, e.g. `/speakers`.
    pub ready_path: String,
}

impl From<&ServiceConfig> for ServiceEndpoints {
    fn from(config: &ServiceConfig) -> Self {
        Self {
            port: config.port,
            base_path: config.base_path.clone(),
            ready_path: config.ready_path.clone(),
        }
    }
}

/// Poll until a TCP connection to `host:port` succeeds or `policy.timeout` elapses.
pub fn wait_for_tcp(host: &str, port: u16, policy: &PollPolicy) -> bool {
    info!("Waiting for {host}:{port} (timeout {:?})", policy.timeout);
    let ok = poll_until(policy, || match tcp_connect(host, port, policy.attempt_timeout) {
        Ok(()) => true,
        Err(e) => {
            debug!("{host}:{port} not reachable yet: {e}");
            false
        }
    });
    if ok {
        info!("{host}:{port} reachable");
    } else {
        warn!("Timed out waiting for {host}:{port}");
    }
    ok
}

/// Poll until the service on `host` passes both HTTP checks.
pub fn wait_for_service(host: &str, endpoints: &ServiceEndpoints, policy: &PollPolicy) -> bool {
    info!(
        "Waiting for service http://{}:{} (timeout {:?})",
        host, endpoints.port, policy.timeout
    );
    let agent = ureq::AgentBuilder::new()
        .timeout(policy.attempt_timeout)
        .build();

    let ok = poll_until(policy, || {
        if let Err(e) = tcp_connect(host, endpoints.port, policy.attempt_timeout) {
            debug!("Service port not open yet: {e}");
            return false;
        }
        http_ok(&agent, &service_url(host, endpoints.port, &endpoints.base_path))
            && http_ok(&agent, &service_url(host, endpoints.port, &endpoints.ready_path))
    });
    if ok {
        info!("Service on {host}:{} is ready", endpoints.port);
    } else {
        warn!("Timed out waiting for service on {host}:{}", endpoints.port);
    }
    ok
}

/// Run `attempt` immediately, then every `policy.interval`, until it
/// succeeds or the deadline passes.
fn poll_until<F: FnMut() -> bool>(policy: &PollPolicy, mut attempt: F) -> bool {
    let deadline = Instant::now() + policy.timeout;
    loop {
        if attempt() {
            return true;
        }
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return false;
        }
        thread::sleep(policy.interval.min(remaining));
    }
}

fn tcp_connect(host: &str, port: u16, timeout: Duration) -> std::io::Result<()> {
    let addrs: Vec<SocketAddr> = (host, port).to_socket_addrs()?.collect();
    let mut last_err = std::io::Error::new(
        std::io::ErrorKind::AddrNotAvailable,
        format!("{host} did not resolve"),
    );
    for addr in addrs {
        match TcpStream::connect_timeout(&addr, timeout) {
            Ok(_) => return Ok(()),
            Err(e) => last_err = e,
        }
    }
    Err(last_err)
}

fn http_ok(agent: &ureq::Agent, url: &str) -> bool {
    match agent.get(url).call() {
        Ok(resp) if resp.status() == 200 => true,
        Ok(resp) => {
            debug!("GET {url} -> {}", resp.status());
            false
        }
        Err(ureq::Error::Status(code, _)) => {
            debug!("GET {url} -> {code}");
            false
        }
        Err(e) => {
            debug!("GET {url} failed: {e}");
            false
        }
    }
}

fn service_url(host: &str, port: u16, path: &str) -> String {
    let host = if host.contains(':') && !host.starts_with('[') {
        format!("[{host}]")
    } else {
        host.to_string()
    };
    if path.starts_with('/') {
        format!("http://{host}:{port}{path}")
    } else {
        format!("http://{host}:{port}/{path}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader, Write};
    use std::net::TcpListener;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn quick(timeout_ms: u64) -> PollPolicy {
        PollPolicy {
            timeout: Duration::from_millis(timeout_ms),
            interval: Duration::from_millis(20),
            attempt_timeout: Duration::from_millis(200),
        }
    }

    /// Minimal HTTP server answering `status_for(path)`; counts requests.
    fn serve_http(status_for: fn(&str) -> u16) -> (u16, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(mut stream) = stream else { break };
                let mut line = String::new();
                let mut reader = BufReader::new(stream.try_clone().unwrap());
                if reader.read_line(&mut line).is_err() || line.is_empty() {
                    continue; // bare TCP check
                }
                // Drain headers.
                let mut header = String::new();
                while reader.read_line(&mut header).map(|n| n > 2).unwrap_or(false) {
                    header.clear();
                }
                counter.fetch_add(1, Ordering::SeqCst);
                let path = line.split_whitespace().nth(1).unwrap_or("/").to_string();
                let status = status_for(&path);
                let _ = write!(
                    stream,
                    "HTTP/1.1 {status} X\r\nContent-Length: 2\r\nConnection: close\r\n\r\nok"
                );
            }
        });
        (port, hits)
    }

    fn endpoints(port: u16) -> ServiceEndpoints {
        ServiceEndpoints {
            port,
            base_path: "/".into(),
            ready_path: "/speakers".into(),
        }
    }

    #[test]
    fn tcp_check_succeeds_on_open_port() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        assert!(wait_for_tcp("127.0.0.1", port, &quick(500)));
    }

    #[test]
    fn tcp_check_times_out_on_closed_port() {
        let port = {
            let l = TcpListener::bind("127.0.0.1:0").unwrap();
            l.local_addr().unwrap().port()
        };
        let started = Instant::now();
        assert!(!wait_for_tcp("127.0.0.1", port, &quick(150)));
        assert!(started.elapsed() >= Duration::from_millis(150));
    }

    #[test]
    fn service_ready_when_both_endpoints_answer() {
        let (port, hits) = serve_http(|_| 200);
        assert!(wait_for_service("127.0.0.1", &endpoints(port), &quick(2000)));
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn service_not_ready_when_readiness_endpoint_fails() {
        let (port, hits) = serve_http(|path| if path == "/speakers" { 503 } else { 200 });
        assert!(!wait_for_service("127.0.0.1", &endpoints(port), &quick(200)));
        // Base endpoint alone is never sufficient.
        assert!(hits.load(Ordering::SeqCst) >= 2);
    }

    #[test]
    fn service_not_ready_when_port_closed() {
        let port = {
            let l = TcpListener::bind("127.0.0.1:0").unwrap();
            l.local_addr().unwrap().port()
        };
        assert!(!wait_for_service("127.0.0.1", &endpoints(port), &quick(100)));
    }

    #[test]
    fn url_formatting() {
        assert_eq!(service_url("10.0.0.5", 50021, "/"), "http://10.0.0.5:50021/");
        assert_eq!(
            service_url("10.0.0.5", 50021, "speakers"),
            "http://10.0.0.5:50021/speakers"
        );
        assert_eq!(service_url("::1", 80, "/"), "http://[::1]:80/");
    }
}

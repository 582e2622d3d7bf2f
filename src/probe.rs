use std::time::Duration;

use tokio::net::TcpStream;

/// Tries a TCP connection to `host:port`. Every failure, timeouts included, is just `false`.
pub async fn is_reachable(host: &str, port: u16, timeout: Duration) -> bool {
    match tokio::time::timeout(timeout, TcpStream::connect((host, port))).await {
        Ok(Ok(_)) => {
            tracing::debug!("{host}:{port} is reachable");
            true
        }
        Ok(Err(e)) => {
            tracing::debug!("{host}:{port} is not reachable: {e}");
            false
        }
        Err(_) => {
            tracing::debug!("{host}:{port} did not answer within {timeout:?}");
            false
        }
    }
}

/// Exponential backoff with a cap, used while waiting for the tunnel to come up.
#[derive(Debug, Clone)]
pub struct Backoff {
    current: Duration,
    max: Duration,
}
impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Backoff {
            current: initial.min(max),
            max,
        }
    }
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = self.current.saturating_mul(2).min(self.max);
        delay
    }
}

#[cfg(test)]
mod tests {
    use tokio::net::TcpListener;

    use super::*;

    #[tokio::test]
    async fn listening_port_is_reachable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        assert!(is_reachable("127.0.0.1", port, Duration::from_secs(1)).await);
    }

    #[tokio::test]
    async fn closed_port_is_not_reachable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        assert!(!is_reachable("127.0.0.1", port, Duration::from_secs(1)).await);
    }

    #[tokio::test]
    async fn unresolvable_host_is_not_reachable() {
        assert!(!is_reachable("host.invalid", 22, Duration::from_secs(2)).await);
    }

    #[test]
    fn backoff_saturates_on_huge_delays() {
        let mut backoff = Backoff::new(Duration::MAX, Duration::MAX);
        assert_eq!(backoff.next_delay(), Duration::MAX);
        assert_eq!(backoff.next_delay(), Duration::MAX);
    }

    #[test]
    fn backoff_doubles_up_to_the_cap() {
        let mut backoff = Backoff::new(Duration::from_millis(100), Duration::from_millis(350));
        let delays: Vec<_> = (0..4).map(|_| backoff.next_delay()).collect();
        assert_eq!(
            delays,
            vec![
                Duration::from_millis(100),
                Duration::from_millis(200),
                Duration::from_millis(350),
                Duration::from_millis(350),
            ]
        );
    }
}

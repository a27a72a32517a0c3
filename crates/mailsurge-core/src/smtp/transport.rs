//! Shared SMTP transport cache
//!
//! Transports are opened and verified once per `(host, port, user)` and then
//! reused by every campaign targeting that relay. A per-key barrier makes
//! sure two campaigns missing the cache at the same time end up sharing one
//! handshake instead of opening two.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use lettre::message::Message;
use lettre::transport::smtp::authentication::Credentials;
use lettre::transport::smtp::client::{Tls, TlsParameters};
use lettre::{AsyncSmtpTransport, AsyncTransport, Tokio1Executor};
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, info, warn};

use super::classify::{FailureKind, SendFailure};
use crate::rotation::RelayDescriptor;

/// Socket timeout for relay connections
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// A verified transport capable of dispatching one message at a time
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, message: Message) -> Result<(), SendFailure>;
}

/// Source of verified transports, keyed by relay
#[async_trait]
pub trait TransportProvider: Send + Sync {
    async fn acquire(&self, relay: &RelayDescriptor) -> Result<Arc<dyn Mailer>, SendFailure>;

    /// Release all pooled resources
    async fn shutdown(&self) {}
}

/// Opens a transport for a relay; swapped out in tests
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, relay: &RelayDescriptor) -> Result<Arc<dyn Mailer>, SendFailure>;
}

/// lettre-backed transport for one relay endpoint
pub struct SmtpMailer {
    inner: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpMailer {
    /// Build a transport for the relay without touching the network.
    ///
    /// TLS mode follows the port: 465 wraps the whole connection, 587
    /// requires STARTTLS, anything else upgrades opportunistically.
    /// Certificate verification is disabled; relays here are
    /// operator-trusted by definition.
    pub fn build(relay: &RelayDescriptor) -> Result<Self, SendFailure> {
        let tls_parameters = TlsParameters::builder(relay.host.clone())
            .dangerous_accept_invalid_certs(true)
            .build()
            .map_err(|e| SendFailure::from_smtp_error(&e))?;

        let tls = match relay.port {
            465 => Tls::Wrapper(tls_parameters),
            587 => Tls::Required(tls_parameters),
            _ => Tls::Opportunistic(tls_parameters),
        };

        let inner = AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&relay.host)
            .port(relay.port)
            .tls(tls)
            .credentials(Credentials::new(relay.user.clone(), relay.secret.clone()))
            .timeout(Some(CONNECT_TIMEOUT))
            .build();

        Ok(Self { inner })
    }

    /// Handshake-level check: connects, negotiates TLS, and authenticates
    pub async fn verify(&self) -> Result<(), SendFailure> {
        let ok = self
            .inner
            .test_connection()
            .await
            .map_err(|e| SendFailure::from_smtp_error(&e))?;
        if ok {
            Ok(())
        } else {
            Err(SendFailure::new(
                FailureKind::Socket,
                "relay did not accept the connection test",
            ))
        }
    }

    /// Build and verify in one step
    pub async fn open(relay: &RelayDescriptor) -> Result<Self, SendFailure> {
        let mailer = Self::build(relay)?;
        mailer.verify().await?;
        Ok(mailer)
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, message: Message) -> Result<(), SendFailure> {
        self.inner
            .send(message)
            .await
            .map(|_| ())
            .map_err(|e| SendFailure::from_smtp_error(&e))
    }
}

/// Default connector: open and verify a lettre transport
pub struct SmtpConnector;

#[async_trait]
impl Connector for SmtpConnector {
    async fn connect(&self, relay: &RelayDescriptor) -> Result<Arc<dyn Mailer>, SendFailure> {
        let mailer = SmtpMailer::open(relay).await?;
        info!(relay = %relay.name, key = %relay.cache_key(), "relay verified, transport cached");
        Ok(Arc::new(mailer))
    }
}

/// Process-wide pool of verified transports, keyed `host:port:user`
pub struct TransportCache {
    entries: Mutex<HashMap<String, Arc<OnceCell<Arc<dyn Mailer>>>>>,
    connector: Arc<dyn Connector>,
}

impl TransportCache {
    pub fn new() -> Self {
        Self::with_connector(Arc::new(SmtpConnector))
    }

    pub fn with_connector(connector: Arc<dyn Connector>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            connector,
        }
    }

    /// Number of verified transports currently cached
    pub async fn len(&self) -> usize {
        let entries = self.entries.lock().await;
        entries.values().filter(|cell| cell.get().is_some()).count()
    }

    async fn cell(&self, key: &str) -> Arc<OnceCell<Arc<dyn Mailer>>> {
        let mut entries = self.entries.lock().await;
        entries.entry(key.to_string()).or_default().clone()
    }
}

impl Default for TransportCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TransportProvider for TransportCache {
    /// Return the cached transport for the relay, opening and verifying one
    /// on first use. Concurrent misses for the same key share a single
    /// connection attempt; a failed attempt leaves the key empty so the next
    /// caller tries again.
    async fn acquire(&self, relay: &RelayDescriptor) -> Result<Arc<dyn Mailer>, SendFailure> {
        let key = relay.cache_key();
        let cell = self.cell(&key).await;

        let mailer = cell
            .get_or_try_init(|| async {
                debug!(key = %key, "transport cache miss, opening connection");
                self.connector.connect(relay).await
            })
            .await
            .map_err(|e| {
                warn!(key = %key, error = %e, "relay connection failed");
                e
            })?;

        Ok(mailer.clone())
    }

    async fn shutdown(&self) {
        let mut entries = self.entries.lock().await;
        let open = entries.len();
        entries.clear();
        if open > 0 {
            info!(transports = open, "transport cache drained");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct NullMailer;

    #[async_trait]
    impl Mailer for NullMailer {
        async fn send(&self, _message: Message) -> Result<(), SendFailure> {
            Ok(())
        }
    }

    /// Counts connection attempts; fails the first `failures` of them
    struct CountingConnector {
        attempts: AtomicUsize,
        failures: usize,
    }

    impl CountingConnector {
        fn new(failures: usize) -> Self {
            Self {
                attempts: AtomicUsize::new(0),
                failures,
            }
        }
    }

    #[async_trait]
    impl Connector for CountingConnector {
        async fn connect(
            &self,
            _relay: &RelayDescriptor,
        ) -> Result<Arc<dyn Mailer>, SendFailure> {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
            // hold the singleflight barrier long enough for races to show
            tokio::time::sleep(Duration::from_millis(20)).await;
            if attempt < self.failures {
                Err(SendFailure::new(FailureKind::ConnectionRefused, "refused"))
            } else {
                Ok(Arc::new(NullMailer))
            }
        }
    }

    fn relay(host: &str) -> RelayDescriptor {
        RelayDescriptor {
            id: host.to_string(),
            name: host.to_string(),
            host: host.to_string(),
            port: 587,
            user: format!("sender@{host}"),
            secret: "hunter2".to_string(),
            reply_to: None,
            daily_limit: 500,
        }
    }

    #[tokio::test]
    async fn test_concurrent_acquires_share_one_connection() {
        let connector = Arc::new(CountingConnector::new(0));
        let cache = Arc::new(TransportCache::with_connector(connector.clone()));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = cache.clone();
            handles.push(tokio::spawn(async move {
                cache.acquire(&relay("mx.example.com")).await.is_ok()
            }));
        }
        for handle in handles {
            assert!(handle.await.unwrap());
        }

        assert_eq!(connector.attempts.load(Ordering::SeqCst), 1);
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn test_distinct_keys_get_distinct_transports() {
        let connector = Arc::new(CountingConnector::new(0));
        let cache = TransportCache::with_connector(connector.clone());

        cache.acquire(&relay("a.example.com")).await.unwrap();
        cache.acquire(&relay("b.example.com")).await.unwrap();
        cache.acquire(&relay("a.example.com")).await.unwrap();

        assert_eq!(connector.attempts.load(Ordering::SeqCst), 2);
        assert_eq!(cache.len().await, 2);
    }

    #[tokio::test]
    async fn test_failed_connection_does_not_poison_key() {
        let connector = Arc::new(CountingConnector::new(1));
        let cache = TransportCache::with_connector(connector.clone());

        let err = cache
            .acquire(&relay("mx.example.com"))
            .await
            .err()
            .unwrap();
        assert_eq!(err.kind, FailureKind::ConnectionRefused);
        assert_eq!(cache.len().await, 0);

        // the next acquire retries and succeeds
        cache.acquire(&relay("mx.example.com")).await.unwrap();
        assert_eq!(connector.attempts.load(Ordering::SeqCst), 2);
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn test_shutdown_clears_pool() {
        let cache = TransportCache::with_connector(Arc::new(CountingConnector::new(0)));
        cache.acquire(&relay("mx.example.com")).await.unwrap();
        assert_eq!(cache.len().await, 1);

        cache.shutdown().await;
        assert_eq!(cache.len().await, 0);
    }
}

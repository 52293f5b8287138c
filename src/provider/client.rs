//! Lazily constructed, process-shared provider clients.

use once_cell::sync::Lazy;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// A slot holding a client that is built on first use and then reused.
///
/// Construction happens under the slot's mutex, so concurrent first calls
/// build the client exactly once.
pub struct SharedClient<T> {
    slot: Mutex<Option<Arc<T>>>,
}

impl<T> SharedClient<T> {
    pub const fn new() -> Self {
        Self {
            slot: Mutex::new(None),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<Arc<T>>> {
        // A panic inside `init` leaves the slot empty, which is still valid.
        self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Return the client, building it with `init` if the slot is empty.
    pub fn get_or_try_init<E, F>(&self, init: F) -> Result<Arc<T>, E>
    where
        F: FnOnce() -> Result<T, E>,
    {
        let mut slot = self.lock();
        if let Some(client) = slot.as_ref() {
            return Ok(Arc::clone(client));
        }
        let client = Arc::new(init()?);
        *slot = Some(Arc::clone(&client));
        Ok(client)
    }

    pub fn get(&self) -> Option<Arc<T>> {
        self.lock().clone()
    }

    pub fn is_initialized(&self) -> bool {
        self.lock().is_some()
    }

    /// Drop the cached client; the next call builds a fresh one.
    pub fn reset(&self) {
        self.lock().take();
    }
}

impl<T> Default for SharedClient<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Process-wide HTTP client slot used by OpenAI-compatible adapters.
pub static DEFAULT_HTTP_CLIENT: Lazy<Arc<SharedClient<reqwest::Client>>> =
    Lazy::new(|| Arc::new(SharedClient::new()));

/// Build the upstream HTTP client with connection pooling.
///
/// No overall request timeout is set: streamed replies can legitimately run
/// longer than any fixed bound. Non-streaming calls are bounded by the
/// adapter instead.
pub fn build_http_client(verify_ssl: bool) -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder()
        .danger_accept_invalid_certs(!verify_ssl)
        .connect_timeout(Duration::from_secs(10))
        .pool_max_idle_per_host(100)
        .pool_idle_timeout(Duration::from_secs(90))
        .tcp_keepalive(Duration::from_secs(60))
        .http2_keep_alive_interval(Duration::from_secs(30))
        .http2_keep_alive_timeout(Duration::from_secs(10))
        .build()
}

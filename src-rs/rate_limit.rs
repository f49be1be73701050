use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};

use parking_lot::Mutex;
use thiserror::Error;

use crate::clock::{Clock, SystemClock};

/// Key used when the pipeline could not identify the caller.
pub const UNKNOWN_CLIENT: &str = "unknown";

pub const DEFAULT_WINDOW: Duration = Duration::from_secs(60);
pub const DEFAULT_MAX_REQUESTS: u32 = 100;
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RateLimitSettingsError {
    #[error("rate limit window must be greater than zero")]
    ZeroWindow,
    #[error("rate limit max requests must be greater than zero")]
    ZeroMaxRequests,
    #[error("rate limit sweep interval must be greater than zero")]
    ZeroSweepInterval,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitSettings {
    window: Duration,
    max_requests: u32,
    sweep_interval: Duration,
}

impl RateLimitSettings {
    pub fn new(
        window: Duration,
        max_requests: u32,
        sweep_interval: Duration,
    ) -> Result<Self, RateLimitSettingsError> {
        if window.is_zero() {
            return Err(RateLimitSettingsError::ZeroWindow);
        }
        if max_requests == 0 {
            return Err(RateLimitSettingsError::ZeroMaxRequests);
        }
        if sweep_interval.is_zero() {
            return Err(RateLimitSettingsError::ZeroSweepInterval);
        }

        Ok(Self {
            window,
            max_requests,
            sweep_interval,
        })
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn max_requests(&self) -> u32 {
        self.max_requests
    }

    pub fn sweep_interval(&self) -> Duration {
        self.sweep_interval
    }
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            window: DEFAULT_WINDOW,
            max_requests: DEFAULT_MAX_REQUESTS,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
        }
    }
}

/// Per-client bookkeeping for the current window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientWindow {
    pub count: u32,
    pub window_reset_at: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Admit,
    /// The window is still active and its quota is spent. `retry_after` is the
    /// time left until the window expires.
    Reject { retry_after: Duration },
}

impl Decision {
    #[cfg(test)]
    pub fn is_admitted(&self) -> bool {
        matches!(self, Decision::Admit)
    }
}

/// Fixed window request counter keyed by client identity.
///
/// Expired windows are replaced lazily by [`check`](Self::check); memory held
/// by clients that went quiet is reclaimed by [`sweep`](Self::sweep), which is
/// driven externally (see `sweeper::Sweeper`).
pub struct InMemoryRateLimiter {
    settings: RateLimitSettings,
    clock: Arc<dyn Clock>,
    windows: Mutex<HashMap<String, ClientWindow>>,
}

impl std::fmt::Debug for InMemoryRateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryRateLimiter")
            .field("settings", &self.settings)
            .field("clients", &self.len())
            .finish()
    }
}

impl InMemoryRateLimiter {
    pub fn new(settings: RateLimitSettings) -> Self {
        Self::with_clock(settings, Arc::new(SystemClock))
    }

    pub fn with_clock(settings: RateLimitSettings, clock: Arc<dyn Clock>) -> Self {
        Self {
            settings,
            clock,
            windows: Mutex::new(HashMap::new()),
        }
    }

    pub fn check(&self, client_key: &str) -> Decision {
        let key = if client_key.is_empty() {
            UNKNOWN_CLIENT
        } else {
            client_key
        };
        let now = self.clock.now();

        let mut windows = self.windows.lock();

        // `now == window_reset_at` still belongs to the expiring window.
        if let Some(entry) = windows.get_mut(key) {
            if now <= entry.window_reset_at {
                if entry.count < self.settings.max_requests {
                    entry.count += 1;
                    return Decision::Admit;
                }

                return Decision::Reject {
                    retry_after: entry.window_reset_at.saturating_duration_since(now),
                };
            }
        }

        windows.insert(
            key.to_string(),
            ClientWindow {
                count: 1,
                window_reset_at: now + self.settings.window,
            },
        );
        Decision::Admit
    }

    /// Drops every window that expired before now. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        let now = self.clock.now();
        let mut windows = self.windows.lock();
        let before = windows.len();
        windows.retain(|_, entry| entry.window_reset_at >= now);
        before - windows.len()
    }

    #[cfg(test)]
    pub fn window(&self, client_key: &str) -> Option<ClientWindow> {
        self.windows.lock().get(client_key).copied()
    }

    pub fn len(&self) -> usize {
        self.windows.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.lock().is_empty()
    }
}

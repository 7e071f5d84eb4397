//! Monotonic time source for the control loop.
//!
//! - **`target_os = "espidf"`**: wraps `esp_timer_get_time()` from the
//!   ESP-IDF high-resolution timer (microsecond precision, monotonic).
//! - **`not(target_os = "espidf")`**: uses `std::time::Instant` for
//!   host-side testing and simulation.
//!
//! The engine itself never reads a clock; the caller passes `now_ms` into
//! every `tick`.  [`MonotonicClock`] is what a firmware main loop uses to
//! get it, and [`TickClock`] replays it to components that pull time.

use core::cell::Cell;
use core::time::Duration;
use std::sync::Arc;

use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;

/// Millisecond clock since construction (host) or boot (device).
pub struct MonotonicClock {
    #[cfg(not(target_os = "espidf"))]
    start: std::time::Instant,
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            #[cfg(not(target_os = "espidf"))]
            start: std::time::Instant::now(),
        }
    }

    /// Milliseconds since boot.
    #[cfg(target_os = "espidf")]
    pub fn now_ms(&self) -> u64 {
        (unsafe { esp_idf_svc::sys::esp_timer_get_time() }) as u64 / 1_000
    }

    /// Milliseconds since construction.
    #[cfg(not(target_os = "espidf"))]
    pub fn now_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }
}

/// Boxed time source accepted by `burster` limiters.
pub type TimeProvider = Box<dyn Fn() -> Duration + Send + Sync>;

/// The `now_ms` of the latest control cycle, shared with pull-based
/// consumers such as the credential rate limiter.
///
/// Never moves backwards; a stale `set` is ignored.
#[derive(Clone)]
pub struct TickClock {
    now_ms: Arc<Mutex<CriticalSectionRawMutex, Cell<u64>>>,
}

impl Default for TickClock {
    fn default() -> Self {
        Self::new()
    }
}

impl TickClock {
    pub fn new() -> Self {
        Self {
            now_ms: Arc::new(Mutex::new(Cell::new(0))),
        }
    }

    pub fn set(&self, now_ms: u64) {
        self.now_ms.lock(|t| t.set(t.get().max(now_ms)));
    }

    pub fn now_ms(&self) -> u64 {
        self.now_ms.lock(Cell::get)
    }

    /// A `burster` time provider reading this clock.
    pub fn time_provider(&self) -> TimeProvider {
        let clock = self.clone();
        Box::new(move || Duration::from_millis(clock.now_ms()))
    }
}

impl core::fmt::Debug for TickClock {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TickClock")
            .field("now_ms", &self.now_ms())
            .finish()
    }
}

//! Time source for bounded busy-waits
//!
//! The driver only waits in two places: the SET_ADDRESS status handshake, and
//! when a class handler polls for an EP0 OUT data stage. Both waits are
//! bounded by a deadline on a free-running microsecond counter.
//!
//! # Example
//!
//! Use the RP2040 `TIMER` peripheral as the driver's clock.
//!
//! ```no_run
//! use rp_usbd::{Clock, Timer};
//!
//! // Safety: TIMERAWL has no read side effects, so sharing is OK.
//! let timer = unsafe { Timer::new(0x4005_4000 as *const ()) };
//! let now = timer.now_micros();
//! # let _ = now;
//! ```

use crate::ral;

/// A free-running microsecond counter
///
/// The counter is allowed to wrap.
pub trait Clock {
    /// Returns the current time, in microseconds
    fn now_micros(&self) -> u32;
}

impl<C: Clock> Clock for &C {
    fn now_micros(&self) -> u32 {
        (**self).now_micros()
    }
}

/// The RP microsecond timer
///
/// Only reads the raw, side-effect free, low word of the counter. The timer
/// is expected to be running, which is the case after the watchdog tick is
/// started by your clock setup.
pub struct Timer {
    timer: ral::timer::Instance,
}

impl Timer {
    /// Create a timer from the `TIMER` (RP2040) or `TIMER0` / `TIMER1`
    /// (RP2350) register block address
    ///
    /// # Safety
    ///
    /// `timer` must be the address of a timer register block.
    pub unsafe fn new(timer: *const ()) -> Self {
        Timer {
            timer: ral::timer::Instance::new(timer),
        }
    }
}

impl Clock for Timer {
    fn now_micros(&self) -> u32 {
        ral::read_reg!(ral::timer, self.timer, TIMERAWL)
    }
}

/// A point in time after which a busy-wait gives up
pub struct Deadline {
    start: u32,
    timeout_us: u32,
}

impl Deadline {
    /// Starts counting now
    pub fn new<C: Clock>(clock: &C, timeout_us: u32) -> Self {
        Deadline {
            start: clock.now_micros(),
            timeout_us,
        }
    }

    /// Indicates if at least `timeout_us` elapsed since the deadline was created
    pub fn is_expired<C: Clock>(&self, clock: &C) -> bool {
        clock.now_micros().wrapping_sub(self.start) >= self.timeout_us
    }
}

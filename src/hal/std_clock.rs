use std::time::{Duration, Instant as StdInstant};

use embedded_hal::blocking::delay::DelayUs;
use embedded_time::{clock, rate::Fraction, Clock, Instant};

/// Monotonic microsecond clock backed by [`std::time::Instant`].
///
/// Ticks wrap after roughly 71 minutes; the crate only ever takes differences.
#[derive(Clone, Copy, Debug)]
pub struct StdClock {
    start: StdInstant,
}

impl StdClock {
    pub fn new() -> Self {
        Self {
            start: StdInstant::now(),
        }
    }
}

impl Default for StdClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for StdClock {
    type T = u32;

    const SCALING_FACTOR: Fraction = Fraction::new(1, 1_000_000);

    fn try_now(&self) -> Result<Instant<Self>, clock::Error> {
        // Truncation is the intended wrap.
        Ok(Instant::new(self.start.elapsed().as_micros() as u32))
    }
}

/// Blocking delay that puts the calling thread to sleep.
#[derive(Clone, Copy, Debug, Default)]
pub struct StdDelay;

impl DelayUs<u32> for StdDelay {
    fn delay_us(&mut self, us: u32) {
        std::thread::sleep(Duration::from_micros(us.into()));
    }
}

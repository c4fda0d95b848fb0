//! Microsecond time helpers shared by the decoder, monitor and output loops.
//!
//! Timestamps are [`Microseconds<u32>`] since an arbitrary epoch and wrap after
//! roughly 71 minutes, so every difference goes through [`elapsed`].

use embedded_time::{duration::Microseconds, rate::Hertz, Clock};

use crate::Error;

/// A monotonic instant in microseconds since the clock epoch.
pub type Timestamp = Microseconds<u32>;

/// Microseconds in one second.
pub const MICROS_PER_SECOND: u32 = 1_000_000;

/// Time elapsed from `earlier` to `later`, tolerant of counter wrap.
pub fn elapsed(later: Timestamp, earlier: Timestamp) -> Microseconds<u32> {
    Microseconds(later.0.wrapping_sub(earlier.0))
}

/// Read the clock as microseconds since its epoch.
pub fn now<C>(clock: &C) -> Result<Timestamp, Error>
where
    C: Clock<T = u32>,
{
    let instant = clock.try_now()?;
    Microseconds::try_from(instant.duration_since_epoch()).map_err(Into::into)
}

/// The period of one cycle at `frequency`, or `None` for 0 Hz.
pub fn period(frequency: Hertz<u32>) -> Option<Microseconds<u32>> {
    MICROS_PER_SECOND.checked_div(frequency.0).map(Microseconds)
}

/// Convert a millisecond count from the configuration into microseconds.
pub fn millis(ms: u32) -> Microseconds<u32> {
    Microseconds(ms.saturating_mul(1_000))
}

//! Hardware collaborators: digital lines, a monotonic clock and blocking delays.
//!
//! Outputs build on [`embedded_hal::digital::v2::OutputPin`], time on
//! [`embedded_time::Clock`] with a microsecond tick, and sleeping on
//! [`embedded_hal::blocking::delay::DelayUs`].

use core::fmt;

use embedded_hal::digital::v2::OutputPin;

use crate::input::EdgeSender;

pub mod mock;

mod std_clock;
pub use std_clock::{StdClock, StdDelay};

/// Logic level of a digital line.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Level {
    Low,
    High,
}

/// An acquired input line delivering rising edges to an [`EdgeSender`].
pub trait InputLine {
    type Error: fmt::Debug;

    /// Stop edge delivery and release the line.
    fn close(self) -> Result<(), Self::Error>;
}

/// An acquired output line.
pub trait OutputLine: OutputPin {
    /// Reconfigure the line as an input so it no longer drives the ESC.
    fn into_input(&mut self) -> Result<(), Self::Error>;

    /// Release the line.
    fn close(self) -> Result<(), Self::Error>
    where
        Self: Sized,
    {
        Ok(())
    }
}

/// Acquires lines by offset on one chip.
pub trait LineProvider {
    type Input: InputLine;
    type Output: OutputLine + Send + 'static;
    type Error: fmt::Display;

    /// Request `line` as a pulled-up rising-edge input reporting to `edges`.
    ///
    /// Edge timestamps may come from any monotonic microsecond source, such as
    /// kernel event times. They only measure gaps between edges; frame arrival
    /// is stamped with the controller's clock.
    fn request_input(&mut self, line: u32, edges: EdgeSender) -> Result<Self::Input, Self::Error>;

    /// Request `line` as an output starting at `initial`.
    fn request_output(&mut self, line: u32, initial: Level) -> Result<Self::Output, Self::Error>;
}

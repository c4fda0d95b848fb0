//! Mock hardware for tests.
//!
//! Available in test builds and with the `mock` feature. Time is virtual:
//! [`MockDelay`] advances its [`MockClock`] instead of sleeping, so output loops
//! run as fast as the test can drive them.

#![cfg(any(test, feature = "mock"))]

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicU32, Ordering},
        Arc, Mutex, MutexGuard,
    },
};

use embedded_hal::{blocking::delay::DelayUs, digital::v2::OutputPin};
use embedded_time::{clock, duration::Microseconds, rate::Fraction, Clock, Instant};
use thiserror::Error;

use super::{InputLine, Level, LineProvider, OutputLine};
use crate::input::EdgeSender;

/// Errors reported by mock lines.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum MockLineError {
    #[error("line {0} is busy")]
    Busy(u32),
    #[error("injected write fault")]
    WriteFault,
    #[error("line is configured as input")]
    NotOutput,
}

/// Shared virtual microsecond clock.
#[derive(Clone, Debug, Default)]
pub struct MockClock {
    now: Arc<AtomicU32>,
}

impl MockClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn now(&self) -> Microseconds<u32> {
        Microseconds(self.now.load(Ordering::SeqCst))
    }

    pub fn set(&self, us: u32) {
        self.now.store(us, Ordering::SeqCst);
    }

    pub fn advance(&self, us: u32) {
        self.now.fetch_add(us, Ordering::SeqCst);
    }
}

impl Clock for MockClock {
    type T = u32;

    const SCALING_FACTOR: Fraction = Fraction::new(1, 1_000_000);

    fn try_now(&self) -> Result<Instant<Self>, clock::Error> {
        Ok(Instant::new(self.now.load(Ordering::SeqCst)))
    }
}

/// Delay that advances a [`MockClock`].
#[derive(Clone, Debug, Default)]
pub struct MockDelay {
    clock: MockClock,
}

impl MockDelay {
    pub fn new(clock: MockClock) -> Self {
        Self { clock }
    }
}

impl DelayUs<u32> for MockDelay {
    fn delay_us(&mut self, us: u32) {
        self.clock.advance(us);
        // Give other threads sharing the clock a chance to run.
        std::thread::yield_now();
    }
}

/// Recorded state of a mock output line.
#[derive(Debug, Default)]
pub struct LineLog {
    /// Level changes with the virtual time they happened at.
    pub transitions: Vec<(u32, Level)>,
    pub level: Option<Level>,
    pub is_input: bool,
    pub is_closed: bool,
    /// Fail every write once this many writes have succeeded.
    pub fail_after: Option<usize>,
    pub writes: usize,
}

/// An output line that records every level change.
///
/// Clones share the same log, so a test can keep one while the driver owns another.
#[derive(Clone, Debug)]
pub struct MockOutputLine {
    clock: MockClock,
    log: Arc<Mutex<LineLog>>,
}

impl MockOutputLine {
    pub fn new(clock: MockClock, initial: Level) -> Self {
        let line = Self {
            clock,
            log: Arc::default(),
        };
        line.log().level = Some(initial);
        line
    }

    pub fn log(&self) -> MutexGuard<'_, LineLog> {
        // A panicking test thread must not hide the log from the others.
        self.log.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Make every write after the next `writes` fail.
    pub fn fail_after(&self, writes: usize) {
        self.log().fail_after = Some(writes);
    }

    /// Durations spent high, from each rising edge to the following falling edge.
    pub fn high_times(&self) -> Vec<u32> {
        let log = self.log();
        log.transitions
            .windows(2)
            .filter_map(|pair| match pair {
                [(rise, Level::High), (fall, Level::Low)] => Some(fall.wrapping_sub(*rise)),
                _ => None,
            })
            .collect()
    }

    fn write(&mut self, level: Level) -> Result<(), MockLineError> {
        let now = self.clock.now().0;
        let mut log = self.log();
        if log.is_input || log.is_closed {
            return Err(MockLineError::NotOutput);
        }
        if log.fail_after.map_or(false, |limit| log.writes >= limit) {
            return Err(MockLineError::WriteFault);
        }
        log.writes += 1;
        if log.level != Some(level) {
            log.transitions.push((now, level));
            log.level = Some(level);
        }
        Ok(())
    }
}

impl OutputPin for MockOutputLine {
    type Error = MockLineError;

    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.write(Level::Low)
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.write(Level::High)
    }
}

impl OutputLine for MockOutputLine {
    fn into_input(&mut self) -> Result<(), Self::Error> {
        self.log().is_input = true;
        Ok(())
    }

    fn close(self) -> Result<(), Self::Error> {
        self.log().is_closed = true;
        Ok(())
    }
}

/// An input line whose edges are injected by the test.
#[derive(Clone, Debug)]
pub struct MockInputLine {
    edges: EdgeSender,
    is_closed: Arc<AtomicBool>,
}

impl MockInputLine {
    /// Inject a rising edge at `at`, unless the line was closed.
    pub fn edge(&self, at: Microseconds<u32>) {
        if !self.is_closed() {
            self.edges.edge(at);
        }
    }

    pub fn is_closed(&self) -> bool {
        self.is_closed.load(Ordering::SeqCst)
    }
}

impl InputLine for MockInputLine {
    type Error = MockLineError;

    fn close(self) -> Result<(), Self::Error> {
        self.is_closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Hands out mock lines and keeps a handle to each for inspection.
#[derive(Debug, Default)]
pub struct MockLineProvider {
    clock: MockClock,
    busy: Vec<u32>,
    input: Option<MockInputLine>,
    outputs: HashMap<u32, MockOutputLine>,
}

impl MockLineProvider {
    pub fn new(clock: MockClock) -> Self {
        Self {
            clock,
            ..Self::default()
        }
    }

    /// Make requests for `line` fail.
    pub fn with_busy_line(mut self, line: u32) -> Self {
        self.busy.push(line);
        self
    }

    /// The input line handed out, if any.
    pub fn input(&self) -> Option<&MockInputLine> {
        self.input.as_ref()
    }

    /// The output line handed out for `line`, if any.
    pub fn output(&self, line: u32) -> Option<&MockOutputLine> {
        self.outputs.get(&line)
    }

    fn check(&self, line: u32) -> Result<(), MockLineError> {
        if self.busy.contains(&line) {
            Err(MockLineError::Busy(line))
        } else {
            Ok(())
        }
    }
}

impl LineProvider for MockLineProvider {
    type Input = MockInputLine;
    type Output = MockOutputLine;
    type Error = MockLineError;

    fn request_input(&mut self, line: u32, edges: EdgeSender) -> Result<Self::Input, Self::Error> {
        self.check(line)?;
        let input = MockInputLine {
            edges,
            is_closed: Arc::default(),
        };
        self.input = Some(input.clone());
        Ok(input)
    }

    fn request_output(&mut self, line: u32, initial: Level) -> Result<Self::Output, Self::Error> {
        self.check(line)?;
        let output = MockOutputLine::new(self.clock.clone(), initial);
        self.outputs.insert(line, output.clone());
        Ok(output)
    }
}

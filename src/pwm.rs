//! Software PWM on a digital output line.
//!
//! Each motor gets its own [`PwmDriver`] running on a dedicated thread. Every
//! cycle it re-reads its [`MotorCommand`], holds the line high for the active
//! part of the cycle and low for the rest, sleeping to deadlines measured from
//! the start of the cycle.

use core::fmt;

use embedded_hal::blocking::delay::DelayUs;
use embedded_time::{duration::Microseconds, rate::Hertz, Clock};
use tokio::sync::watch;
use tracing::{debug, error};

use crate::{
    hal::OutputLine,
    motor::MotorCommand,
    shutdown::Shutdown,
    time::{self, elapsed, Timestamp},
    Error,
};

/// High and low durations of one output cycle.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CycleTiming {
    pub high: Microseconds<u32>,
    pub low: Microseconds<u32>,
}

impl CycleTiming {
    /// Active time within a fixed cycle, clamped to the cycle.
    pub fn fixed_cycle(active: Microseconds<u32>, cycle: Microseconds<u32>) -> Self {
        let high = active.0.min(cycle.0);
        Self {
            high: Microseconds(high),
            low: Microseconds(cycle.0 - high),
        }
    }

    /// A cycle of `1 / frequency` with `percent` of it high.
    ///
    /// Zero hertz holds the line low for `idle` before the command is read again.
    pub fn frequency_duty(frequency: Hertz<u32>, percent: f32, idle: Microseconds<u32>) -> Self {
        let Some(period) = time::period(frequency) else {
            return Self {
                high: Microseconds(0),
                low: idle,
            };
        };

        let percent = if percent.is_nan() {
            0.
        } else {
            percent.clamp(0., 100.)
        };
        let high = ((period.0 as f32 * percent / 100.).round() as u32).min(period.0);
        Self {
            high: Microseconds(high),
            low: Microseconds(period.0 - high),
        }
    }

    /// Timing for `command` on an output whose fixed cycle is `cycle`.
    pub fn for_command(command: MotorCommand, cycle: Microseconds<u32>) -> Self {
        match command {
            MotorCommand::Pulse(active) => Self::fixed_cycle(active, cycle),
            MotorCommand::Duty { frequency, percent } => {
                Self::frequency_duty(frequency, percent, cycle)
            }
        }
    }

    pub fn period(&self) -> Microseconds<u32> {
        Microseconds(self.high.0 + self.low.0)
    }
}

/// Output loop for one motor.
pub struct PwmDriver<P, C, D> {
    motor: usize,
    line: P,
    clock: C,
    delay: D,
    cycle: Microseconds<u32>,
    commands: watch::Receiver<MotorCommand>,
    shutdown: Shutdown,
}

impl<P, C, D> PwmDriver<P, C, D>
where
    P: OutputLine,
    P::Error: fmt::Debug,
    C: Clock<T = u32>,
    D: DelayUs<u32>,
{
    pub fn new(
        motor: usize,
        line: P,
        clock: C,
        delay: D,
        cycle: Microseconds<u32>,
        commands: watch::Receiver<MotorCommand>,
        shutdown: Shutdown,
    ) -> Self {
        Self {
            motor,
            line,
            clock,
            delay,
            cycle,
            commands,
            shutdown,
        }
    }

    pub fn motor(&self) -> usize {
        self.motor
    }

    /// Generate one cycle of the current command.
    pub fn step(&mut self) -> Result<CycleTiming, Error> {
        let command = *self.commands.borrow();
        let timing = CycleTiming::for_command(command, self.cycle);
        let start = time::now(&self.clock)?;

        if timing.high.0 > 0 {
            let motor = self.motor;
            self.line.set_high().map_err(|e| output_error(motor, e))?;
            self.sleep_until(start, timing.high)?;
        }
        let motor = self.motor;
        self.line.set_low().map_err(|e| output_error(motor, e))?;
        self.sleep_until(start, timing.period())?;

        Ok(timing)
    }

    /// Run cycles until the stop signal fires or the line faults, then
    /// return the line to a safe state and release it.
    pub fn run(mut self) -> Result<(), Error> {
        let motor = self.motor;
        debug!(motor, "output loop started");

        let result = loop {
            if self.shutdown.is_triggered() {
                break Ok(());
            }
            if let Err(e) = self.step() {
                error!(motor, error = %e, "output loop failed");
                break Err(e);
            }
        };

        let released = self.release();
        debug!(motor, "output loop stopped");
        result.and(released)
    }

    /// Drive the line low, reconfigure it as an input and close it.
    pub fn release(mut self) -> Result<(), Error> {
        let motor = self.motor;
        let low = self.line.set_low();
        let input = self.line.into_input();
        let close = self.line.close();
        low.and(input)
            .and(close)
            .map_err(|e| output_error(motor, e))
    }

    fn sleep_until(&mut self, start: Timestamp, offset: Microseconds<u32>) -> Result<(), Error> {
        let spent = elapsed(time::now(&self.clock)?, start);
        if spent.0 < offset.0 {
            self.delay.delay_us(offset.0 - spent.0);
        }
        Ok(())
    }
}

fn output_error<E: fmt::Debug>(motor: usize, e: E) -> Error {
    Error::Output {
        motor,
        reason: format!("{:?}", e),
    }
}

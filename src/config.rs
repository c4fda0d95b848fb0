//! Startup configuration with the reference values as defaults.

use std::time::Duration;

use embedded_time::{duration::Microseconds, rate::Hertz};
use serde::{Deserialize, Serialize};

use crate::{
    filter::{FilterBank, FilterConfig},
    motor::{MotorOutput, Range, Waveform},
    safety::SafetyParams,
    time::{self, millis},
    Error, Result,
};

/// One motor output line.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct MotorConfig {
    /// Line offset on the chip.
    pub line: u32,
    /// Output range in the waveform's units (µs active time or duty %).
    pub output: Range,
    #[serde(default)]
    pub waveform: Waveform,
}

impl MotorConfig {
    pub fn new(line: u32, output: Range, waveform: Waveform) -> Self {
        Self {
            line,
            output,
            waveform,
        }
    }

    pub fn motor_output(&self) -> MotorOutput {
        MotorOutput::new(self.output, self.waveform)
    }

    /// The fixed cycle of the output loop, also used as the idle period at 0 Hz.
    pub fn cycle(&self) -> Microseconds<u32> {
        match self.waveform {
            Waveform::FixedCycle { cycle_us } => Microseconds(cycle_us),
            Waveform::FrequencyDuty { frequency_hz } => {
                time::period(Hertz(frequency_hz)).unwrap_or(DEFAULT_IDLE_CYCLE)
            }
        }
    }
}

const DEFAULT_IDLE_CYCLE: Microseconds<u32> = Microseconds(20_000);

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Channels per PPM frame.
    pub channel_count: usize,
    /// Gaps longer than this end a frame.
    pub sync_threshold_us: u32,
    /// Noise parameters shared by every channel.
    pub filter: FilterConfig,
    /// Per-channel overrides; empty uses `filter` everywhere.
    pub filters: Vec<FilterConfig>,

    pub throttle_channel: usize,
    pub arm_channel: usize,
    pub arm_threshold: f32,
    pub disarm_threshold: f32,
    /// Throttle channel input range mapped onto each motor's output range.
    pub throttle: Range,

    /// Throttle must exceed this for the link to count as connected.
    pub connected_threshold: f32,
    /// Frames older than this count as signal loss. Must comfortably exceed the
    /// frame period (22.5 ms for a standard 8-channel stream).
    pub connection_timeout_ms: u32,
    pub poll_interval_ms: u32,

    /// Arming holds outputs high for this long...
    pub calibration_high_ms: u32,
    /// ...then low for this long.
    pub calibration_low_ms: u32,

    pub edge_queue_capacity: usize,
    /// Input line offset on the chip.
    pub input_line: u32,
    pub motors: Vec<MotorConfig>,
}

impl Default for Config {
    fn default() -> Self {
        let esc = Range::new(700., 2400.);
        Self {
            channel_count: 8,
            sync_threshold_us: 3_000,
            filter: FilterConfig::default(),
            filters: Vec::new(),
            throttle_channel: 2,
            arm_channel: 4,
            arm_threshold: 1900.,
            disarm_threshold: 1100.,
            throttle: Range::new(1000., 2000.),
            connected_threshold: 900.,
            connection_timeout_ms: 100,
            poll_interval_ms: 20,
            calibration_high_ms: 2_000,
            calibration_low_ms: 2_000,
            edge_queue_capacity: 256,
            input_line: 70,
            motors: (0..4)
                .map(|line| MotorConfig::new(line, esc, Waveform::default()))
                .collect(),
        }
    }
}

impl Config {
    /// Reject configurations the controller cannot run safely.
    pub fn validate(&self) -> Result<()> {
        if self.channel_count == 0 {
            return Err(Error::config("channel count must be positive"));
        }
        if self.throttle_channel >= self.channel_count {
            return Err(Error::config(format!(
                "throttle channel {} is outside {} channels",
                self.throttle_channel, self.channel_count
            )));
        }
        if self.arm_channel >= self.channel_count {
            return Err(Error::config(format!(
                "arm channel {} is outside {} channels",
                self.arm_channel, self.channel_count
            )));
        }
        if self.sync_threshold_us == 0 {
            return Err(Error::config("sync threshold must be positive"));
        }

        check_filter(&self.filter)?;
        if !self.filters.is_empty() && self.filters.len() != self.channel_count {
            return Err(Error::config(format!(
                "{} filter configs for {} channels",
                self.filters.len(),
                self.channel_count
            )));
        }
        self.filters.iter().try_for_each(check_filter)?;

        if !is_finite(&self.throttle) || self.throttle.is_empty() {
            return Err(Error::config("throttle input range must be finite and non-empty"));
        }
        if !(self.disarm_threshold < self.arm_threshold) {
            return Err(Error::config("disarm threshold must be below arm threshold"));
        }
        if !self.connected_threshold.is_finite() {
            return Err(Error::config("connected threshold must be finite"));
        }
        if self.connection_timeout_ms == 0 || self.poll_interval_ms == 0 {
            return Err(Error::config(
                "connection timeout and poll interval must be positive",
            ));
        }
        if self.edge_queue_capacity == 0 {
            return Err(Error::config("edge queue capacity must be positive"));
        }

        if self.motors.is_empty() {
            return Err(Error::config("at least one motor is required"));
        }
        for (motor, config) in self.motors.iter().enumerate() {
            check_motor(motor, config)?;
        }

        Ok(())
    }

    pub fn sync_threshold(&self) -> Microseconds<u32> {
        Microseconds(self.sync_threshold_us)
    }

    pub fn connection_timeout(&self) -> Microseconds<u32> {
        millis(self.connection_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.into())
    }

    pub fn filter_bank(&self) -> FilterBank {
        if self.filters.is_empty() {
            FilterBank::uniform(self.channel_count, self.filter)
        } else {
            FilterBank::with_configs(&self.filters)
        }
    }

    pub fn safety_params(&self) -> SafetyParams {
        SafetyParams {
            arm_channel: self.arm_channel,
            throttle_channel: self.throttle_channel,
            arm_threshold: self.arm_threshold,
            disarm_threshold: self.disarm_threshold,
            throttle: self.throttle,
            calibration_high: millis(self.calibration_high_ms),
            calibration_low: millis(self.calibration_low_ms),
        }
    }

    pub fn motor_outputs(&self) -> Vec<MotorOutput> {
        self.motors.iter().map(MotorConfig::motor_output).collect()
    }
}

fn is_finite(range: &Range) -> bool {
    range.low.is_finite() && range.high.is_finite()
}

fn check_filter(filter: &FilterConfig) -> Result<()> {
    let FilterConfig {
        process_noise,
        measurement_noise,
    } = *filter;
    if process_noise.is_finite()
        && measurement_noise.is_finite()
        && process_noise >= 0.
        && measurement_noise > 0.
    {
        Ok(())
    } else {
        Err(Error::config(format!(
            "filter noise must be finite with positive measurement noise, got q={} r={}",
            process_noise, measurement_noise
        )))
    }
}

fn check_motor(motor: usize, config: &MotorConfig) -> Result<()> {
    let output = config.output;
    if !is_finite(&output) || output.low > output.high || output.low < 0. {
        return Err(Error::config(format!(
            "motor {} output range {}..{} is invalid",
            motor, output.low, output.high
        )));
    }

    match config.waveform {
        Waveform::FixedCycle { cycle_us } if cycle_us == 0 => Err(Error::config(format!(
            "motor {} has a zero cycle",
            motor
        ))),
        Waveform::FrequencyDuty { .. } if output.high > 100. => Err(Error::config(format!(
            "motor {} duty range exceeds 100%",
            motor
        ))),
        _ => Ok(()),
    }
}

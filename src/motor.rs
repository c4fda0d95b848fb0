//! Motor commands and the per-output mapping from throttle to command.

use embedded_time::{duration::Microseconds, rate::Hertz};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

/// The target an output loop reproduces on its line.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum MotorCommand {
    /// Active time within the output's fixed cycle.
    Pulse(Microseconds<u32>),

    /// Duty percentage at a frequency. A frequency of zero holds the line low.
    Duty { frequency: Hertz<u32>, percent: f32 },
}

impl MotorCommand {
    pub const OFF: Self = MotorCommand::Pulse(Microseconds(0));

    /// Is this command holding the line low?
    pub fn is_off(&self) -> bool {
        match *self {
            MotorCommand::Pulse(active) => active.0 == 0,
            MotorCommand::Duty { frequency, percent } => frequency.0 == 0 || percent <= 0.,
        }
    }
}

impl Default for MotorCommand {
    fn default() -> Self {
        Self::OFF
    }
}

/// A closed interval of channel or output values.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Range {
    pub low: f32,
    pub high: f32,
}

impl Range {
    pub const fn new(low: f32, high: f32) -> Self {
        Self { low, high }
    }

    pub fn is_empty(&self) -> bool {
        self.low == self.high
    }

    /// Clamp `value` into this range. NaN falls to the low end.
    pub fn constrain(&self, value: f32) -> f32 {
        let (min, max) = if self.low <= self.high {
            (self.low, self.high)
        } else {
            (self.high, self.low)
        };

        if value.is_nan() {
            return self.low;
        }
        value.max(min).min(max)
    }

    /// Map `value` linearly from this range onto `to`.
    ///
    /// Values outside this range are clamped first. The range must not be empty.
    pub fn map_to(&self, value: f32, to: &Range) -> f32 {
        let value = self.constrain(value);
        to.low + (value - self.low) * (to.high - to.low) / (self.high - self.low)
    }
}

/// How an output line turns a value into a waveform.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Waveform {
    /// Values are active microseconds within a fixed cycle.
    FixedCycle { cycle_us: u32 },

    /// Values are duty percentages at a fixed frequency.
    FrequencyDuty { frequency_hz: u32 },
}

impl Default for Waveform {
    fn default() -> Self {
        // 50 Hz servo-style ESC signal
        Waveform::FixedCycle { cycle_us: 20_000 }
    }
}

/// Command generation for one motor, in the units of its waveform.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MotorOutput {
    range: Range,
    waveform: Waveform,
}

impl MotorOutput {
    pub fn new(range: Range, waveform: Waveform) -> Self {
        Self { range, waveform }
    }

    pub fn range(&self) -> Range {
        self.range
    }

    pub fn waveform(&self) -> Waveform {
        self.waveform
    }

    /// The command for `value`, clamped into this output's range.
    pub fn command(&self, value: f32) -> MotorCommand {
        let value = self.range.constrain(value);
        match self.waveform {
            Waveform::FixedCycle { .. } => {
                MotorCommand::Pulse(Microseconds(value.max(0.).round() as u32))
            }
            Waveform::FrequencyDuty { frequency_hz } => MotorCommand::Duty {
                frequency: Hertz(frequency_hz),
                percent: value,
            },
        }
    }

    /// Zero output with the line held low.
    pub fn off(&self) -> MotorCommand {
        match self.waveform {
            Waveform::FixedCycle { .. } => MotorCommand::OFF,
            Waveform::FrequencyDuty { frequency_hz } => MotorCommand::Duty {
                frequency: Hertz(frequency_hz),
                percent: 0.,
            },
        }
    }

    /// The bottom of the output range.
    pub fn floor(&self) -> MotorCommand {
        self.command(self.range.low)
    }

    /// The top of the output range.
    pub fn ceiling(&self) -> MotorCommand {
        self.command(self.range.high)
    }

    /// Map a throttle value from `input` onto this output.
    pub fn throttle(&self, value: f32, input: &Range) -> MotorCommand {
        self.command(input.map_to(value, &self.range))
    }
}

/// Create one command slot per motor, starting from `initial`.
///
/// The publisher is the only writer; each output loop gets its own receiver.
pub fn command_bus(
    initial: &[MotorCommand],
) -> (CommandPublisher, Vec<watch::Receiver<MotorCommand>>) {
    let (senders, receivers) = initial
        .iter()
        .map(|command| watch::channel(*command))
        .unzip();
    (CommandPublisher { senders }, receivers)
}

/// Write side of the per-motor command slots.
pub struct CommandPublisher {
    senders: Vec<watch::Sender<MotorCommand>>,
}

impl CommandPublisher {
    /// Publish one command per motor. Unchanged commands do not wake readers.
    pub fn publish(&self, commands: &[MotorCommand]) {
        for (sender, command) in self.senders.iter().zip(commands) {
            sender.send_if_modified(|current| {
                if *current == *command {
                    false
                } else {
                    *current = *command;
                    true
                }
            });
        }
    }

    /// The command currently visible to each output loop.
    pub fn current(&self) -> Vec<MotorCommand> {
        self.senders.iter().map(|sender| *sender.borrow()).collect()
    }

    pub fn len(&self) -> usize {
        self.senders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.senders.is_empty()
    }
}

//! Arm/disarm protocol gating throttle to the motors.
//!
//! Arming is a timed sequence rather than a blocking wait: every control cycle
//! the controller looks at the switch channel and the link, so a disarm request
//! or a lost link aborts the sequence immediately.
//!
//! ```text
//! Disarmed --switch > arm--> Arming(high) --t_high--> Arming(low) --t_low--> Armed
//!     ^                           |                        |                   |
//!     +---- switch < disarm or link lost -----------------+                   |
//!     +---------------------------- switch < disarm --------------------------+
//! ```

use embedded_time::duration::Microseconds;
use tracing::info;

use crate::{
    channels::ChannelVector,
    motor::{MotorCommand, MotorOutput, Range},
    time::{elapsed, Timestamp},
};

/// The externally visible arming state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArmState {
    Disarmed,
    Arming,
    Armed,
}

/// Calibration phase while arming.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArmingPhase {
    /// Outputs held at the top of their range.
    High,
    /// Outputs held at the bottom of their range.
    Low,
}

#[derive(Clone, Copy, Debug)]
enum Stage {
    Disarmed,
    Arming { phase: ArmingPhase, since: Timestamp },
    Armed,
}

/// Switch and throttle settings for a [`SafetyController`].
#[derive(Clone, Copy, Debug)]
pub struct SafetyParams {
    pub arm_channel: usize,
    pub throttle_channel: usize,
    /// The switch must rise above this to arm.
    pub arm_threshold: f32,
    /// The switch must fall below this to disarm.
    pub disarm_threshold: f32,
    pub throttle: Range,
    pub calibration_high: Microseconds<u32>,
    pub calibration_low: Microseconds<u32>,
}

/// Arm state machine and sole author of the motor commands.
pub struct SafetyController {
    params: SafetyParams,
    outputs: Vec<MotorOutput>,
    commands: Vec<MotorCommand>,
    stage: Stage,
}

impl SafetyController {
    pub fn new(params: SafetyParams, outputs: Vec<MotorOutput>) -> Self {
        let commands = outputs.iter().map(MotorOutput::off).collect();
        Self {
            params,
            outputs,
            commands,
            stage: Stage::Disarmed,
        }
    }

    pub fn state(&self) -> ArmState {
        match self.stage {
            Stage::Disarmed => ArmState::Disarmed,
            Stage::Arming { .. } => ArmState::Arming,
            Stage::Armed => ArmState::Armed,
        }
    }

    /// The calibration phase, while arming.
    pub fn arming_phase(&self) -> Option<ArmingPhase> {
        match self.stage {
            Stage::Arming { phase, .. } => Some(phase),
            _ => None,
        }
    }

    /// The latest command for each motor.
    pub fn commands(&self) -> &[MotorCommand] {
        &self.commands
    }

    /// Run one control cycle and return the new motor commands.
    pub fn update(&mut self, now: Timestamp, channels: &ChannelVector, is_connected: bool) -> &[MotorCommand] {
        let switch = channels.get(self.params.arm_channel);
        let wants_arm = switch.map_or(false, |s| s > self.params.arm_threshold);
        let wants_disarm = switch.map_or(false, |s| s < self.params.disarm_threshold);

        self.stage = match self.stage {
            Stage::Disarmed if wants_arm && is_connected => {
                info!("arming, driving outputs high");
                Stage::Arming {
                    phase: ArmingPhase::High,
                    since: now,
                }
            }
            Stage::Arming { .. } if wants_disarm || !is_connected => {
                info!(is_connected, "arming aborted");
                Stage::Disarmed
            }
            Stage::Arming {
                phase: ArmingPhase::High,
                since,
            } if elapsed(now, since).0 >= self.params.calibration_high.0 => {
                info!("arming, driving outputs low");
                Stage::Arming {
                    phase: ArmingPhase::Low,
                    since: now,
                }
            }
            Stage::Arming {
                phase: ArmingPhase::Low,
                since,
            } if elapsed(now, since).0 >= self.params.calibration_low.0 => {
                info!("armed");
                Stage::Armed
            }
            Stage::Armed if wants_disarm => {
                info!("disarmed");
                Stage::Disarmed
            }
            stage => stage,
        };

        match self.stage {
            Stage::Disarmed => self.set_all(MotorOutput::off),
            Stage::Arming {
                phase: ArmingPhase::High,
                ..
            } => self.set_all(MotorOutput::ceiling),
            Stage::Arming {
                phase: ArmingPhase::Low,
                ..
            } => self.set_all(MotorOutput::floor),
            // Losing the link drops to the throttle floor, never a stale value.
            Stage::Armed if !is_connected => self.set_all(MotorOutput::floor),
            Stage::Armed => {
                let throttle = channels
                    .get(self.params.throttle_channel)
                    .unwrap_or(self.params.throttle.low);
                let input = self.params.throttle;
                for (command, output) in self.commands.iter_mut().zip(&self.outputs) {
                    *command = output.throttle(throttle, &input);
                }
            }
        }

        &self.commands
    }

    /// Disarm immediately and zero every output.
    pub fn disarm(&mut self) -> &[MotorCommand] {
        if !matches!(self.stage, Stage::Disarmed) {
            info!("disarmed");
        }
        self.stage = Stage::Disarmed;
        self.set_all(MotorOutput::off);
        &self.commands
    }

    fn set_all(&mut self, f: fn(&MotorOutput) -> MotorCommand) {
        for (command, output) in self.commands.iter_mut().zip(&self.outputs) {
            *command = f(output);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::Config,
        connection::{ConnectionEvent, ConnectionMonitor},
        motor::Waveform,
    };

    const ARM: usize = 1;
    const THROTTLE: usize = 0;

    fn controller() -> SafetyController {
        let params = SafetyParams {
            arm_channel: ARM,
            throttle_channel: THROTTLE,
            arm_threshold: 1900.,
            disarm_threshold: 1100.,
            throttle: Range::new(1000., 2000.),
            calibration_high: Microseconds(2_000),
            calibration_low: Microseconds(1_000),
        };
        let output = MotorOutput::new(Range::new(700., 2400.), Waveform::default());
        SafetyController::new(params, vec![output; 4])
    }

    fn channels(throttle: f32, switch: f32) -> ChannelVector {
        ChannelVector::new(vec![throttle, switch], Microseconds(0))
    }

    fn pulse(us: u32) -> MotorCommand {
        MotorCommand::Pulse(Microseconds(us))
    }

    /// Run the arming sequence to completion.
    fn arm(controller: &mut SafetyController) {
        controller.update(Microseconds(0), &channels(1000., 2000.), true);
        controller.update(Microseconds(2_000), &channels(1000., 2000.), true);
        controller.update(Microseconds(3_000), &channels(1000., 2000.), true);
        assert_eq!(controller.state(), ArmState::Armed);
    }

    #[test]
    fn only_high_switch_starts_arming() {
        let mut controller = controller();
        for (t, switch) in [(0, 0.), (100, 1000.), (200, 1500.)] {
            controller.update(Microseconds(t), &channels(1000., switch), true);
            assert_eq!(controller.state(), ArmState::Disarmed);
            assert!(controller.commands().iter().all(MotorCommand::is_off));
        }

        controller.update(Microseconds(300), &channels(1000., 2000.), true);
        assert_eq!(controller.state(), ArmState::Arming);
    }

    #[test]
    fn arming_sequence_drives_high_then_low() {
        let mut controller = controller();
        let armed = channels(1000., 2000.);

        controller.update(Microseconds(0), &armed, true);
        assert_eq!(controller.arming_phase(), Some(ArmingPhase::High));
        assert!(controller.commands().iter().all(|c| *c == pulse(2400)));

        controller.update(Microseconds(1_999), &armed, true);
        assert_eq!(controller.arming_phase(), Some(ArmingPhase::High));

        controller.update(Microseconds(2_000), &armed, true);
        assert_eq!(controller.arming_phase(), Some(ArmingPhase::Low));
        assert!(controller.commands().iter().all(|c| *c == pulse(700)));

        controller.update(Microseconds(3_000), &armed, true);
        assert_eq!(controller.state(), ArmState::Armed);
    }

    #[test]
    fn armed_maps_throttle_to_outputs() {
        let mut controller = controller();
        arm(&mut controller);

        let commands = controller.update(Microseconds(4_000), &channels(1500., 2000.), true);
        assert!(commands.iter().all(|c| *c == pulse(1550)));
    }

    #[test]
    fn low_switch_disarms_and_zeroes() {
        let mut controller = controller();
        arm(&mut controller);
        controller.update(Microseconds(4_000), &channels(1800., 2000.), true);

        // Between thresholds: stays armed.
        controller.update(Microseconds(5_000), &channels(1800., 1500.), true);
        assert_eq!(controller.state(), ArmState::Armed);

        let commands = controller.update(Microseconds(6_000), &channels(1800., 1000.), true);
        assert!(commands.iter().all(MotorCommand::is_off));
        assert_eq!(controller.state(), ArmState::Disarmed);
    }

    #[test]
    fn link_loss_while_armed_drops_to_floor() {
        let mut controller = controller();
        arm(&mut controller);
        controller.update(Microseconds(4_000), &channels(1900., 2000.), true);

        let commands = controller.update(Microseconds(5_000), &channels(1900., 2000.), false);
        assert!(commands.iter().all(|c| *c == pulse(700)));
        assert_eq!(controller.state(), ArmState::Armed);
    }

    #[test]
    fn disarm_or_link_loss_aborts_arming() {
        let mut controller = controller();
        controller.update(Microseconds(0), &channels(1000., 2000.), true);
        controller.update(Microseconds(500), &channels(1000., 1000.), true);
        assert_eq!(controller.state(), ArmState::Disarmed);
        assert!(controller.commands().iter().all(MotorCommand::is_off));

        controller.update(Microseconds(1_000), &channels(1000., 2000.), true);
        controller.update(Microseconds(1_500), &channels(1000., 2000.), false);
        assert_eq!(controller.state(), ArmState::Disarmed);
    }

    #[test]
    fn cannot_arm_without_link() {
        let mut controller = controller();
        controller.update(Microseconds(0), &channels(1000., 2000.), false);
        assert_eq!(controller.state(), ArmState::Disarmed);
    }

    #[test]
    fn manual_disarm_zeroes_outputs() {
        let mut controller = controller();
        arm(&mut controller);
        controller.update(Microseconds(4_000), &channels(2000., 2000.), true);
        assert!(controller.disarm().iter().all(MotorCommand::is_off));
        assert_eq!(controller.state(), ArmState::Disarmed);
    }

    /// Default configuration with its monitor, as the control cycle runs them.
    fn default_loop() -> (ConnectionMonitor, SafetyController) {
        let config = Config::default();
        let monitor = ConnectionMonitor::new(
            config.throttle_channel,
            config.connected_threshold,
            config.connection_timeout(),
        );
        let safety = SafetyController::new(config.safety_params(), config.motor_outputs());
        (monitor, safety)
    }

    fn stick_frame(throttle: f32, at: u32) -> ChannelVector {
        let mut values = vec![1500.; 8];
        values[2] = throttle;
        values[4] = 2000.;
        ChannelVector::new(values, Microseconds(at))
    }

    #[test]
    fn standard_frame_rate_arms_and_holds_throttle() {
        let (mut monitor, mut safety) = default_loop();
        const FRAME_PERIOD: u32 = 22_500;
        const POLL: u32 = 20_000;

        let mut disconnects = 0;
        for poll in 0..300u32 {
            let now = poll * POLL;
            let last_frame = now / FRAME_PERIOD * FRAME_PERIOD;
            let channels = stick_frame(1500., last_frame);

            let event = monitor.update(Microseconds(now), &channels);
            if event == Some(ConnectionEvent::Disconnected) {
                disconnects += 1;
            }
            let commands = safety.update(Microseconds(now), &channels, monitor.is_connected()).to_vec();

            // Calibration takes 4 s; after that throttle passes straight through.
            if now > 4_100_000 {
                assert_eq!(safety.state(), ArmState::Armed);
                assert!(commands.iter().all(|c| *c == pulse(1550)));
            }
        }
        assert_eq!(disconnects, 0);
    }

    #[test]
    fn stale_frame_never_returns_after_counter_wrap() {
        let (mut monitor, mut safety) = default_loop();

        // Arm and run at full throttle.
        let mut now = 0u32;
        while safety.state() != ArmState::Armed {
            let channels = stick_frame(2000., now);
            monitor.update(Microseconds(now), &channels);
            safety.update(Microseconds(now), &channels, monitor.is_connected());
            now += 20_000;
        }
        let last = stick_frame(2000., now);
        monitor.update(Microseconds(now), &last);
        let commands = safety.update(Microseconds(now), &last, monitor.is_connected());
        assert!(commands.iter().all(|c| *c == pulse(2400)));

        // Frames stop; poll through a full wrap of the microsecond counter.
        let mut t = now;
        let mut waited = 0u64;
        for _ in 0..(u32::MAX / 20_000 + 10) {
            t = t.wrapping_add(20_000);
            waited += 20_000;
            monitor.update(Microseconds(t), &last);
            let commands = safety.update(Microseconds(t), &last, monitor.is_connected());
            if waited > 200_000 {
                assert!(!monitor.is_connected());
                assert!(commands.iter().all(|c| *c == pulse(700)));
            }
        }
    }
}

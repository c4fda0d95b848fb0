use std::time::Duration;

use embedded_rc::{
    filter::FilterConfig,
    hal::{
        mock::{MockInputLine, MockLineProvider},
        Level, StdClock, StdDelay,
    },
    time, ArmState, Config, Controller, ControllerHandle, Error, MotorCommand, MotorConfig, Range,
    Waveform,
};
use embedded_time::duration::Microseconds;
use tokio::{sync::watch, task::JoinHandle, time::timeout};

const WAIT: Duration = Duration::from_secs(5);

const THROTTLE_MID: u32 = 1_500;
const SWITCH_HIGH: u32 = 2_000;
const SWITCH_LOW: u32 = 1_000;

fn config() -> Config {
    let esc = Range::new(700., 2400.);
    let waveform = Waveform::FixedCycle { cycle_us: 5_000 };
    Config {
        channel_count: 4,
        throttle_channel: 0,
        arm_channel: 1,
        // Trust the measurements so estimates settle within a couple of frames.
        filter: FilterConfig {
            process_noise: 1.,
            measurement_noise: 0.01,
        },
        connection_timeout_ms: 100,
        poll_interval_ms: 5,
        calibration_high_ms: 30,
        calibration_low_ms: 30,
        motors: vec![
            MotorConfig::new(5, esc, waveform),
            MotorConfig::new(6, esc, waveform),
        ],
        ..Config::default()
    }
}

fn start(lines: &mut MockLineProvider, clock: StdClock) -> ControllerHandle<MockInputLine> {
    Controller::builder()
        .config(config())
        .clock(clock)
        .delay(StdDelay)
        .build()
        .unwrap()
        .start(lines)
        .unwrap()
}

/// Inject one PPM frame whose last edge lands on the current time of a
/// receiver clock running `epoch` microseconds ahead of `clock`.
fn send_frame(input: &MockInputLine, clock: &StdClock, epoch: u32, widths: &[u32]) {
    let end = time::now(clock).unwrap().0.wrapping_add(epoch);
    let mut at = end.wrapping_sub(widths.iter().sum());
    input.edge(Microseconds(at));
    for width in widths {
        at = at.wrapping_add(*width);
        input.edge(Microseconds(at));
    }
}

/// Send the current frame every 20 ms until aborted.
fn transmitter(
    input: MockInputLine,
    clock: StdClock,
    epoch: u32,
    frame: watch::Receiver<Vec<u32>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticks = tokio::time::interval(Duration::from_millis(20));
        ticks.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticks.tick().await;
            let widths = frame.borrow().clone();
            send_frame(&input, &clock, epoch, &widths);
        }
    })
}

fn pulses(us: u32) -> Vec<MotorCommand> {
    vec![MotorCommand::Pulse(Microseconds(us)); 2]
}

fn assert_released(lines: &MockLineProvider) {
    for line in [5, 6] {
        let log = lines.output(line).unwrap().log();
        assert!(log.is_input, "line {} still drives its output", line);
        assert!(log.is_closed, "line {} was not released", line);
    }
    assert!(lines.input().unwrap().is_closed());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn arms_follows_throttle_and_disarms() {
    let clock = StdClock::new();
    let mut lines = MockLineProvider::default();
    let mut handle = start(&mut lines, clock);

    let (frame, rx) = watch::channel(vec![THROTTLE_MID, SWITCH_HIGH, 1_500, 1_500]);
    let tx = transmitter(lines.input().unwrap().clone(), clock, 0, rx);

    let status = timeout(WAIT, handle.wait_for(|s| s.arm_state == ArmState::Armed))
        .await
        .unwrap();
    assert!(status.is_connected);
    assert_eq!(status.commands, pulses(1_550));

    frame.send_modify(|widths| widths[1] = SWITCH_LOW);
    let status = timeout(WAIT, handle.wait_for(|s| s.arm_state == ArmState::Disarmed))
        .await
        .unwrap();
    assert!(status.commands.iter().all(MotorCommand::is_off));

    tx.abort();
    let report = handle.shutdown().await.unwrap();
    assert!(report.decode.frames > 0);
    assert_released(&lines);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn signal_loss_drops_to_floor() {
    let clock = StdClock::new();
    let mut lines = MockLineProvider::default();
    let mut handle = start(&mut lines, clock);

    let (_frame, rx) = watch::channel(vec![THROTTLE_MID, SWITCH_HIGH, 1_500, 1_500]);
    let tx = transmitter(lines.input().unwrap().clone(), clock, 0, rx);
    timeout(WAIT, handle.wait_for(|s| s.arm_state == ArmState::Armed))
        .await
        .unwrap();

    tx.abort();
    let status = timeout(WAIT, handle.wait_for(|s| !s.is_connected))
        .await
        .unwrap();
    assert_eq!(status.arm_state, ArmState::Armed);
    assert_eq!(status.commands, pulses(700));

    handle.shutdown().await.unwrap();
    assert_released(&lines);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn edge_timestamps_from_another_epoch_connect() {
    let mut lines = MockLineProvider::default();
    let mut handle = start(&mut lines, StdClock::new());

    // The receiver stamps edges with its own clock, unrelated to the controller's.
    let (_frame, rx) = watch::channel(vec![THROTTLE_MID, SWITCH_HIGH, 1_500, 1_500]);
    let tx = transmitter(
        lines.input().unwrap().clone(),
        StdClock::new(),
        3_000_000_000,
        rx,
    );

    let status = timeout(WAIT, handle.wait_for(|s| s.arm_state == ArmState::Armed))
        .await
        .unwrap();
    assert!(status.is_connected);
    assert_eq!(status.commands, pulses(1_550));

    tx.abort();
    handle.shutdown().await.unwrap();
    assert_released(&lines);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn dropped_handle_stops_outputs() {
    let mut lines = MockLineProvider::default();
    let handle = start(&mut lines, StdClock::new());
    drop(handle);

    let outputs = [5, 6].map(|line| lines.output(line).unwrap().clone());
    timeout(WAIT, async move {
        while !outputs.iter().all(|output| output.log().is_closed) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    for line in [5, 6] {
        let log = lines.output(line).unwrap().log();
        assert!(log.is_input);
        assert_eq!(log.level, Some(Level::Low));
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn never_arms_without_signal() {
    let mut lines = MockLineProvider::default();
    let handle = start(&mut lines, StdClock::new());

    tokio::time::sleep(Duration::from_millis(100)).await;
    let status = handle.status();
    assert_eq!(status.arm_state, ArmState::Disarmed);
    assert!(!status.is_connected);
    assert!(status.commands.iter().all(MotorCommand::is_off));

    // Outputs were driven, but never high.
    assert!(lines.output(5).unwrap().high_times().is_empty());

    handle.shutdown().await.unwrap();
    assert_released(&lines);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn output_fault_stops_everything() {
    let mut lines = MockLineProvider::default();
    let handle = start(&mut lines, StdClock::new());

    lines.output(5).unwrap().fail_after(0);
    timeout(WAIT, handle.stopped()).await.unwrap();
    assert!(handle.is_stopping());

    match handle.shutdown().await {
        Err(Error::Output { motor, .. }) => assert_eq!(motor, 0),
        other => panic!("expected output fault, got {:?}", other),
    }
    assert_released(&lines);
}

#[test]
fn busy_output_releases_acquired_lines() {
    let mut lines = MockLineProvider::default().with_busy_line(6);
    let controller = Controller::builder()
        .config(config())
        .clock(StdClock::new())
        .delay(StdDelay)
        .build()
        .unwrap();

    match controller.start(&mut lines) {
        Err(Error::LineRequest { line, .. }) => assert_eq!(line, 6),
        Err(e) => panic!("unexpected error {}", e),
        Ok(_) => panic!("started with a busy line"),
    }

    let log = lines.output(5).unwrap().log();
    assert!(log.is_input && log.is_closed);
    assert!(lines.input().unwrap().is_closed());
    assert!(lines.output(6).is_none());
}

#[test]
fn invalid_config_is_rejected_before_start() {
    let result = Controller::builder()
        .config(Config {
            arm_channel: 4,
            ..config()
        })
        .clock(StdClock::new())
        .delay(StdDelay)
        .build();
    assert!(matches!(result, Err(Error::Config(_))));
}

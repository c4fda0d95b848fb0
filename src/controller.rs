//! Runtime wiring: line acquisition, the decode task, the control cycle and
//! one output loop per motor, plus orderly shutdown.
//!
//! ```text
//! input line --EdgeSender--> decode task --ChannelVector--> control cycle
//!                                                               |
//!                                            MotorCommand per motor (watch)
//!                                                               v
//!                                                  output loop per motor --> output lines
//! ```

use core::fmt;

use embedded_hal::{blocking::delay::DelayUs, digital::v2::OutputPin};
use embedded_time::Clock;
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
    time::MissedTickBehavior,
};
use tracing::{debug, error, info, warn};

use crate::{
    channels::{channel_bus, ChannelReader, ChannelVector},
    config::Config,
    connection::ConnectionMonitor,
    decoder::{DecodeStats, PpmDecoder},
    hal::{InputLine, Level, LineProvider, OutputLine},
    input::{edge_queue, EdgeSender, PpmInput},
    motor::{command_bus, CommandPublisher, MotorCommand},
    pwm::PwmDriver,
    safety::{ArmState, SafetyController},
    shutdown::{self, Shutdown, ShutdownTrigger},
    time::{self, Timestamp},
    Error, Result,
};

/// What the control cycle decided most recently.
#[derive(Clone, Debug, PartialEq)]
pub struct ControlStatus {
    pub arm_state: ArmState,
    pub is_connected: bool,
    pub commands: Vec<MotorCommand>,
}

/// Builder for a [`Controller`].
pub struct Builder<C, D> {
    config: Option<Config>,
    clock: Option<C>,
    delay: Option<D>,
}

impl<C, D> Default for Builder<C, D> {
    fn default() -> Self {
        Self {
            config: None,
            clock: None,
            delay: None,
        }
    }
}

impl<C, D> Builder<C, D> {
    pub fn config(mut self, config: Config) -> Self {
        self.config = Some(config);
        self
    }

    pub fn clock(mut self, clock: C) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Delay used by the output loops; each loop gets its own clone.
    pub fn delay(mut self, delay: D) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Validate the configuration and build the controller.
    pub fn build(self) -> Result<Controller<C, D>> {
        let config = self.config.unwrap_or_default();
        config.validate()?;

        Ok(Controller {
            config,
            clock: self.clock.ok_or_else(|| Error::config("a clock is required"))?,
            delay: self.delay.ok_or_else(|| Error::config("a delay is required"))?,
        })
    }
}

/// A validated controller ready to acquire its lines.
pub struct Controller<C, D> {
    config: Config,
    clock: C,
    delay: D,
}

impl Controller<(), ()> {
    pub fn builder<C, D>() -> Builder<C, D> {
        Builder::default()
    }
}

impl<C, D> Controller<C, D>
where
    C: Clock<T = u32> + Clone + Send + 'static,
    D: DelayUs<u32> + Clone + Send + 'static,
{
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Acquire every line and start all tasks on the current tokio runtime.
    ///
    /// Any acquisition failure releases what was already acquired and returns
    /// [`Error::LineRequest`] without starting the control cycle.
    pub fn start<P>(self, provider: &mut P) -> Result<ControllerHandle<P::Input>>
    where
        P: LineProvider,
        <P::Output as OutputPin>::Error: fmt::Debug + Send,
    {
        let Controller {
            config,
            clock,
            delay,
        } = self;

        let (edges, edge_rx) = edge_queue(config.edge_queue_capacity);
        let (input, lines) = acquire(&config, provider, edges.clone())?;
        info!(
            input = config.input_line,
            motors = lines.len(),
            "lines acquired"
        );

        let (trigger, shutdown) = shutdown::channel();
        let (decode, channels) = spawn_decode(&config, clock.clone(), edge_rx, shutdown.clone());

        let outputs = config.motor_outputs();
        let initial: Vec<MotorCommand> = outputs.iter().map(|output| output.off()).collect();
        let (commands, receivers) = command_bus(&initial);

        let drivers = config
            .motors
            .iter()
            .zip(lines)
            .zip(receivers)
            .enumerate()
            .map(|(motor, ((motor_config, line), rx))| {
                let driver = PwmDriver::new(
                    motor,
                    line,
                    clock.clone(),
                    delay.clone(),
                    motor_config.cycle(),
                    rx,
                    trigger.subscribe(),
                );
                spawn_output(driver, trigger.clone())
            })
            .collect();

        let (status_tx, status) = watch::channel(ControlStatus {
            arm_state: ArmState::Disarmed,
            is_connected: false,
            commands: initial,
        });
        let control = ControlLoop {
            clock,
            channels: channels.clone(),
            monitor: ConnectionMonitor::new(
                config.throttle_channel,
                config.connected_threshold,
                config.connection_timeout(),
            ),
            safety: SafetyController::new(config.safety_params(), outputs),
            commands,
            status: status_tx,
        };
        let control = {
            let trigger = trigger.clone();
            let poll_interval = config.poll_interval();
            tokio::spawn(async move {
                let result = control.run(poll_interval, shutdown).await;
                if let Err(e) = &result {
                    error!(error = %e, "control cycle failed");
                    trigger.trigger();
                }
                result
            })
        };

        Ok(ControllerHandle {
            trigger,
            input: Some(input),
            edges,
            channels,
            status,
            tasks: Some(Tasks {
                control,
                decode,
                outputs: drivers,
            }),
        })
    }
}

/// Request the input line and every output line, or none of them.
fn acquire<P>(
    config: &Config,
    provider: &mut P,
    edges: EdgeSender,
) -> Result<(P::Input, Vec<P::Output>)>
where
    P: LineProvider,
{
    let input = provider
        .request_input(config.input_line, edges)
        .map_err(|e| line_error(config.input_line, e))?;

    let mut lines = Vec::with_capacity(config.motors.len());
    for motor in &config.motors {
        match provider.request_output(motor.line, Level::Low) {
            Ok(line) => lines.push(line),
            Err(e) => {
                let e = line_error(motor.line, e);
                for mut line in lines {
                    let _ = line.set_low();
                    let _ = line.into_input();
                    let _ = line.close();
                }
                if let Err(close) = input.close() {
                    warn!(error = ?close, "failed to release input line");
                }
                return Err(e);
            }
        }
    }

    Ok((input, lines))
}

fn line_error(line: u32, e: impl fmt::Display) -> Error {
    let e = Error::LineRequest {
        line,
        reason: e.to_string(),
    };
    error!(error = %e, "line acquisition failed");
    e
}

fn spawn_decode<C>(
    config: &Config,
    clock: C,
    edge_rx: mpsc::Receiver<Timestamp>,
    shutdown: Shutdown,
) -> (JoinHandle<DecodeStats>, ChannelReader)
where
    C: Clock<T = u32> + Send + 'static,
{
    let (publisher, channels) = channel_bus(config.channel_count);
    let input = PpmInput::new(
        PpmDecoder::new(config.channel_count, config.sync_threshold()),
        config.filter_bank(),
        publisher,
        clock,
    );
    (tokio::spawn(input.run(edge_rx, shutdown)), channels)
}

/// Run an output loop on the blocking pool; a fault stops everything.
fn spawn_output<P, C, D>(
    driver: PwmDriver<P, C, D>,
    trigger: ShutdownTrigger,
) -> JoinHandle<Result<()>>
where
    P: OutputLine + Send + 'static,
    P::Error: fmt::Debug,
    C: Clock<T = u32> + Send + 'static,
    D: DelayUs<u32> + Send + 'static,
{
    let motor = driver.motor();
    tokio::spawn(async move {
        let result = match tokio::task::spawn_blocking(move || driver.run()).await {
            Ok(result) => result,
            Err(e) => Err(Error::Task(format!("output loop {}: {}", motor, e))),
        };
        if result.is_err() {
            warn!(motor, "stopping all outputs after output fault");
            trigger.trigger();
        }
        result
    })
}

/// The periodic control cycle and sole writer of motor commands.
struct ControlLoop<C> {
    clock: C,
    channels: ChannelReader,
    monitor: ConnectionMonitor,
    safety: SafetyController,
    commands: CommandPublisher,
    status: watch::Sender<ControlStatus>,
}

impl<C: Clock<T = u32>> ControlLoop<C> {
    async fn run(mut self, poll_interval: std::time::Duration, mut shutdown: Shutdown) -> Result<()> {
        let mut interval = tokio::time::interval(poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let result = loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.cycle() {
                        break Err(e);
                    }
                }
                _ = shutdown.wait() => break Ok(()),
            }
        };

        // Whatever ended the loop, leave every motor at zero.
        let commands = self.safety.disarm();
        self.commands.publish(commands);
        debug!("control cycle stopped");
        result
    }

    fn cycle(&mut self) -> Result<()> {
        let now = time::now(&self.clock)?;
        let channels = self.channels.snapshot();

        self.monitor.update(now, &channels);
        let is_connected = self.monitor.is_connected();
        let commands = self.safety.update(now, &channels, is_connected).to_vec();
        self.commands.publish(&commands);

        let arm_state = self.safety.state();
        self.status.send_if_modified(|status| {
            let changed = status.arm_state != arm_state
                || status.is_connected != is_connected
                || status.commands != commands;
            if changed {
                status.arm_state = arm_state;
                status.is_connected = is_connected;
                status.commands = commands;
            }
            changed
        });

        Ok(())
    }
}

/// Counters reported at shutdown.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    pub decode: DecodeStats,
    pub dropped_edges: u64,
}

/// Handle to a running controller.
///
/// Dropping the handle without [`ControllerHandle::shutdown`] still fires the
/// stop signal, so every output loop releases its line.
pub struct ControllerHandle<I> {
    trigger: ShutdownTrigger,
    input: Option<I>,
    edges: EdgeSender,
    channels: ChannelReader,
    status: watch::Receiver<ControlStatus>,
    tasks: Option<Tasks>,
}

struct Tasks {
    control: JoinHandle<Result<()>>,
    decode: JoinHandle<DecodeStats>,
    outputs: Vec<JoinHandle<Result<()>>>,
}

impl<I: InputLine> ControllerHandle<I> {
    /// The latest smoothed channel vector.
    pub fn channels(&self) -> ChannelVector {
        self.channels.snapshot()
    }

    pub fn status(&self) -> ControlStatus {
        self.status.borrow().clone()
    }

    /// Wait until the control cycle publishes a status matching `f`.
    pub async fn wait_for(&mut self, mut f: impl FnMut(&ControlStatus) -> bool) -> ControlStatus {
        loop {
            {
                let status = self.status.borrow_and_update();
                if f(&*status) {
                    return status.clone();
                }
            }
            if self.status.changed().await.is_err() {
                return self.status.borrow().clone();
            }
        }
    }

    /// Edges dropped because the decode task fell behind.
    pub fn dropped_edges(&self) -> u64 {
        self.edges.dropped()
    }

    /// Has shutdown been requested, by the caller or by a fault?
    pub fn is_stopping(&self) -> bool {
        self.trigger.subscribe().is_triggered()
    }

    /// Wait until shutdown is requested, for example after an output fault.
    pub async fn stopped(&self) {
        self.trigger.subscribe().wait().await
    }

    /// Stop every loop, zero and release the outputs, then release the input.
    ///
    /// Returns the first fault seen by any task, after all lines are released.
    pub async fn shutdown(mut self) -> Result<ShutdownReport> {
        info!("shutting down");
        self.trigger.trigger();

        let (mut first_error, decode) = match self.tasks.take() {
            Some(tasks) => tasks.join_all().await,
            None => (None, DecodeStats::default()),
        };

        if let Some(input) = self.input.take() {
            if let Err(e) = input.close() {
                first_error.get_or_insert(Error::Input(format!("{:?}", e)));
            }
        }
        info!(?decode, "controller stopped");

        match first_error {
            Some(e) => Err(e),
            None => Ok(ShutdownReport {
                decode,
                dropped_edges: self.edges.dropped(),
            }),
        }
    }
}

impl<I> Drop for ControllerHandle<I> {
    fn drop(&mut self) {
        if self.tasks.is_some() {
            warn!("controller handle dropped without shutdown, stopping outputs");
        }
        self.trigger.trigger();
    }
}

impl Tasks {
    /// Wait for every task in stop order, returning the first fault.
    async fn join_all(self) -> (Option<Error>, DecodeStats) {
        let mut first_error = join(self.control).await.err();
        for output in self.outputs {
            if let Err(e) = join(output).await {
                first_error.get_or_insert(e);
            }
        }

        let decode = match self.decode.await {
            Ok(stats) => stats,
            Err(e) => {
                first_error.get_or_insert(Error::Task(format!("decode task: {}", e)));
                DecodeStats::default()
            }
        };
        (first_error, decode)
    }
}

async fn join(handle: JoinHandle<Result<()>>) -> Result<()> {
    handle.await.map_err(|e| Error::Task(e.to_string()))?
}

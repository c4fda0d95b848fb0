//! # embedded-rc
//! Radio-control input to ESC output for small multirotors.
//!
//! # Input
//! [`decoder`] turns rising-edge timestamps from a PPM line into frames of
//! pulse widths, and [`filter`] smooths each channel with a scalar Kalman filter.
//! [`input`] runs both behind a bounded edge queue and publishes the latest
//! [`ChannelVector`].
//!
//! # Control
//! [`ConnectionMonitor`] decides whether the transmitter link is alive and
//! [`SafetyController`] runs the arm/disarm state machine, producing one
//! [`MotorCommand`] per motor.
//!
//! # Output
//! [`PwmDriver`](pwm::PwmDriver) generates software PWM on a digital line, one
//! thread per motor.
//!
//! [`Controller`] wires everything together on a tokio runtime:
//! ```no_run
//! # #[cfg(feature = "mock")]
//! # async fn run() -> embedded_rc::Result<()> {
//! use embedded_rc::{
//!     hal::{mock::MockLineProvider, StdClock, StdDelay},
//!     Config, Controller,
//! };
//!
//! let mut lines = MockLineProvider::default();
//! let controller = Controller::builder()
//!     .config(Config::default())
//!     .clock(StdClock::new())
//!     .delay(StdDelay)
//!     .build()?;
//!
//! let handle = controller.start(&mut lines)?;
//! // ...
//! handle.shutdown().await?;
//! # Ok(())
//! # }
//! ```

pub mod channels;
pub use channels::ChannelVector;

pub mod config;
pub use config::{Config, MotorConfig};

pub mod connection;
pub use connection::ConnectionMonitor;

pub mod controller;
pub use controller::{ControlStatus, Controller, ControllerHandle};

pub mod decoder;
pub use decoder::PpmDecoder;

mod error;
pub use error::{Error, Result};

pub mod filter;
pub use filter::{FilterBank, KalmanFilter};

pub mod hal;

pub mod input;

pub mod motor;
pub use motor::{MotorCommand, MotorOutput, Range, Waveform};

pub mod pwm;

pub mod safety;
pub use safety::{ArmState, SafetyController};

pub mod shutdown;

pub mod time;

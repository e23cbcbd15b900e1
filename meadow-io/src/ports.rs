//! Capability ports - the trait seams between the control stack and devices.
//!
//! To bring up a new platform, implement these traits and hand the boxed
//! ports to the control stack at startup. Backends are selected once from
//! configuration; runtime code is polymorphic only over these interfaces,
//! never over configuration strings.
//!
//! # Threading
//!
//! Backends typically spawn internal reader threads and publish the latest
//! reading behind the port. The `poll`-style getters here must be cheap
//! and non-blocking: the owning thread calls them every control period and
//! mirrors each `health()` probe into shared state, where the supervisor's
//! watchdog checks the safety-critical ports on its hard-deadline tick.
//!
//! # Safety
//!
//! [`DifferentialDrive`] accepts only [`GatedCommand`]s carrying a fresh
//! arbitration token. Backends must reject token reuse with
//! [`Error::Rejected`] and must stop the motors on their own watchdog when
//! commands cease arriving.

use crate::error::Result;
use crate::health::PortHealth;
use crate::types::{
    BatteryState, CameraFrame, EncoderTicks, GatedCommand, GnssFix, ImuSample, PowerReading,
};

/// Drive actuator port.
pub trait DifferentialDrive: Send {
    /// Apply a supervisor-arbitrated velocity command.
    ///
    /// Returns [`crate::Error::Rejected`] if the token was already used.
    fn apply(&mut self, command: &GatedCommand) -> Result<()>;

    /// Health probe for the drive controller link.
    fn health(&self) -> PortHealth;
}

/// Wheel encoder port.
pub trait Encoders: Send {
    /// Latest cumulative tick counts. Counts wrap at 16 bits.
    fn ticks(&mut self) -> Result<EncoderTicks>;

    fn health(&self) -> PortHealth;
}

/// Inertial measurement port.
pub trait Imu: Send {
    /// Latest inertial sample.
    fn sample(&mut self) -> Result<ImuSample>;

    fn health(&self) -> PortHealth;
}

/// GNSS receiver port.
pub trait Gnss: Send {
    /// Latest fix, if the receiver has produced one since the last call.
    fn fix(&mut self) -> Result<Option<GnssFix>>;

    fn health(&self) -> PortHealth;
}

/// Camera port.
pub trait CameraSource: Send {
    /// Next captured frame, if one is ready.
    fn frame(&mut self) -> Result<Option<CameraFrame>>;

    fn health(&self) -> PortHealth;
}

/// Power sensing port covering both current-sense channels.
pub trait PowerSensor: Send {
    /// Battery bus reading plus state-of-charge estimate.
    fn battery(&mut self) -> Result<BatteryState>;

    /// Dock-contact bus reading.
    fn dock_bus(&mut self) -> Result<PowerReading>;

    fn health(&self) -> PortHealth;
}

/// Discrete input states.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiscreteInputs {
    /// Front-left bumper switch closed
    pub bumper_left: bool,
    /// Front-right bumper switch closed
    pub bumper_right: bool,
    /// Emergency stop mushroom pressed
    pub estop: bool,
}

impl DiscreteInputs {
    /// Whether either bumper is pressed.
    #[inline]
    pub fn any_bumper(&self) -> bool {
        self.bumper_left || self.bumper_right
    }
}

/// Discrete input port (bumpers, e-stop).
pub trait DigitalInputs: Send {
    /// Latest debounced input states.
    fn read(&mut self) -> Result<DiscreteInputs>;

    fn health(&self) -> PortHealth;
}

/// Auxiliary output port (buzzer, blade motor and other accessories).
pub trait Outputs: Send {
    /// Enable or disable the cutting blade.
    fn set_blade(&mut self, enabled: bool) -> Result<()>;

    /// Sound the buzzer for roughly the given duration.
    fn buzz(&mut self, duration_ms: u32) -> Result<()>;

    fn health(&self) -> PortHealth;
}

/// The full set of ports the control stack is constructed with.
pub struct PortSet {
    pub drive: Box<dyn DifferentialDrive>,
    pub encoders: Box<dyn Encoders>,
    pub imu: Box<dyn Imu>,
    pub gnss: Box<dyn Gnss>,
    pub camera: Box<dyn CameraSource>,
    pub power: Box<dyn PowerSensor>,
    pub inputs: Box<dyn DigitalInputs>,
    pub outputs: Box<dyn Outputs>,
}

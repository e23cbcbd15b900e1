//! MeadowIO - Hardware abstraction ports for the Meadow mowing robot
//!
//! This library defines the capability interfaces the control stack talks
//! through: differential drive, wheel encoders, IMU, GNSS receiver, camera,
//! power sensing and discrete inputs. Every port exposes a health probe that
//! the safety supervisor's watchdog consumes.
//!
//! No device driver lives here; hardware and simulation backends implement
//! these traits in their own crates and are selected at startup.

pub mod clock;
pub mod constraints;
pub mod error;
pub mod health;
pub mod ports;
pub mod types;

// Re-export commonly used types
pub use constraints::MotionConstraints;
pub use error::{Error, Result};
pub use health::PortHealth;

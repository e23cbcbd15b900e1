//! Meadow - onboard control stack for an autonomous mowing robot.
//!
//! Fuses wheel odometry, IMU and GNSS into a pose estimate; plans coverage
//! and point-to-point routes over an occupancy grid; executes motion with
//! a dynamic-window local planner under a hard-real-time safety
//! supervisor; and performs two-phase fiducial-guided docking confirmed by
//! charge current.
//!
//! ## Architecture
//!
//! Five cooperating periodic threads share state through snapshot cells
//! (see [`shared::SharedState`]) and bounded channels:
//!
//! - **Sensor** (~100 Hz): ingest, odometry, fusion
//! - **Planner** (10–25 Hz): routes, local planning, docking
//! - **Vision** (frame-driven): fiducial detection
//! - **Supervisor** (100 Hz): command arbitration, actuator writes
//! - **Mission** (event-driven + heartbeat): the top-level state machine
//!
//! Hardware lives behind the capability ports in `meadow-io`; a platform
//! crate binds them and calls [`run`].

pub mod config;
pub mod core;
pub mod docking;
pub mod dwa;
pub mod error;
pub mod localization;
pub mod mission;
pub mod persist;
pub mod planning;
pub mod safety;
pub mod shared;
pub mod threads;
pub mod vision;

use std::sync::Arc;
use std::time::Duration;

use meadow_io::ports::PortSet;

pub use config::Config;
pub use error::{NavError, Result};

/// Initialize tracing for a daemon binary (env-filtered, defaults to
/// `meadow_nav=info`).
pub fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("meadow_nav=info".parse().expect("static directive")),
        )
        .init();
}

/// Run the control stack until shutdown.
///
/// Blocks the calling thread. Returns `Ok(())` on clean cooperative
/// shutdown; a platform binary maps `Err` onto a non-zero exit status
/// (fatal initialization or hardware-port errors). Supervisor faults at
/// runtime do not return: they transition the mission to Error and await
/// an operator reset.
pub fn run(config: Config, ports: PortSet) -> Result<()> {
    config.validate()?;

    tracing::info!(
        "{} v{} starting (simulation: {})",
        config.robot.name,
        config.robot.version,
        config.simulation.enabled
    );

    let shared = Arc::new(shared::SharedState::new());
    let handles = threads::spawn_threads(config, Arc::clone(&shared), ports)?;

    // Ctrl-C begins cooperative shutdown through the orchestrator
    let operator = handles.operator.clone();
    ctrlc::set_handler(move || {
        tracing::info!("Received shutdown signal");
        operator.halt();
    })
    .map_err(|e| NavError::Config(format!("Failed to set signal handler: {}", e)))?;

    let check_interval = Duration::from_millis(500);
    loop {
        std::thread::sleep(check_interval);

        if shared.should_shutdown() {
            break;
        }

        if handles.sensor.is_finished()
            || handles.planner.is_finished()
            || handles.vision.is_finished()
            || handles.supervisor.is_finished()
            || handles.mission.is_finished()
        {
            tracing::warn!("A worker thread exited unexpectedly");
            shared.signal_shutdown();
            break;
        }
    }

    // Join in dependency order; the supervisor goes last so the final
    // actuator stop is arbitrated
    for (name, handle) in [
        ("mission", handles.mission),
        ("planner", handles.planner),
        ("vision", handles.vision),
        ("sensor", handles.sensor),
        ("supervisor", handles.supervisor),
    ] {
        if let Err(e) = handle.join() {
            tracing::error!("{} thread panicked: {:?}", name, e);
        }
    }

    tracing::info!("Meadow stopped");
    Ok(())
}

//! Multi-threaded architecture of the control stack.
//!
//! Cooperating periodic tasks around [`crate::shared::SharedState`]:
//!
//! - **Sensor thread** (~100 Hz): ports ingest, odometry, fusion, battery,
//!   discrete safety inputs
//! - **Planner thread** (10–25 Hz): route planning, the dynamic-window
//!   local planner, docking
//! - **Vision thread** (frame-driven): fiducial detection and smoothing
//! - **Supervisor thread** (100 Hz, hard deadline): command arbitration
//!   and the actuator write
//! - **Mission thread** (event-driven + 1 Hz): the orchestrator and the
//!   operator boundary
//!
//! No thread holds a lock across a channel send or an actuator write; all
//! cross-thread data flows through snapshot cells and bounded channels.

mod mission_thread;
mod planner;
mod sensor;
mod supervisor;
mod vision_thread;

pub use mission_thread::{MissionThread, OperatorHandle};
pub use planner::PlannerThread;
pub use sensor::SensorThread;
pub use supervisor::SupervisorThread;
pub use vision_thread::VisionThread;

use std::sync::mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;

use meadow_io::ports::PortSet;

use crate::config::Config;
use crate::error::Result;
use crate::mission::MissionSignal;
use crate::planning::ObstacleUpdate;
use crate::shared::SharedState;

/// Capacity of the obstacle-update queue.
const OBSTACLE_QUEUE_DEPTH: usize = 32;

/// Capacity of the mission signal queue.
const SIGNAL_QUEUE_DEPTH: usize = 64;

/// Handles to every running thread plus the operator boundary.
pub struct ThreadHandles {
    pub sensor: JoinHandle<()>,
    pub planner: JoinHandle<()>,
    pub vision: JoinHandle<()>,
    pub supervisor: JoinHandle<()>,
    pub mission: JoinHandle<()>,
    pub operator: OperatorHandle,
    /// Post learned obstacles into the planner's queue
    pub obstacle_tx: mpsc::SyncSender<ObstacleUpdate>,
}

/// Spawn the whole stack.
pub fn spawn_threads(
    config: Config,
    shared: Arc<SharedState>,
    ports: PortSet,
) -> Result<ThreadHandles> {
    let (signal_tx, signal_rx) = mpsc::sync_channel::<MissionSignal>(SIGNAL_QUEUE_DEPTH);
    let (obstacle_tx, obstacle_rx) = mpsc::sync_channel::<ObstacleUpdate>(OBSTACLE_QUEUE_DEPTH);

    let PortSet {
        drive,
        encoders,
        imu,
        gnss,
        camera,
        power,
        inputs,
        outputs,
    } = ports;

    let sensor_handle = std::thread::Builder::new()
        .name("sensor".into())
        .spawn({
            let shared = Arc::clone(&shared);
            let config = config.clone();
            let signal_tx = signal_tx.clone();
            move || {
                let mut thread =
                    SensorThread::new(config, shared, encoders, imu, gnss, power, inputs, signal_tx);
                thread.run();
            }
        })
        .expect("Failed to spawn sensor thread");

    let planner_handle = std::thread::Builder::new()
        .name("planner".into())
        .spawn({
            let shared = Arc::clone(&shared);
            let config = config.clone();
            let signal_tx = signal_tx.clone();
            move || {
                let mut thread = PlannerThread::new(config, shared, signal_tx, obstacle_rx);
                thread.run();
            }
        })
        .expect("Failed to spawn planner thread");

    let vision_handle = std::thread::Builder::new()
        .name("vision".into())
        .spawn({
            let shared = Arc::clone(&shared);
            let config = config.clone();
            move || {
                let mut thread = VisionThread::new(config, shared, camera);
                thread.run();
            }
        })
        .expect("Failed to spawn vision thread");

    let supervisor_handle = std::thread::Builder::new()
        .name("supervisor".into())
        .spawn({
            let shared = Arc::clone(&shared);
            let config = config.clone();
            let signal_tx = signal_tx.clone();
            move || {
                let mut thread = SupervisorThread::new(config, shared, drive, outputs, signal_tx);
                thread.run();
            }
        })
        .expect("Failed to spawn supervisor thread");

    let (mission_thread, operator) = MissionThread::new(config, Arc::clone(&shared), signal_rx);
    let mission_handle = std::thread::Builder::new()
        .name("mission".into())
        .spawn(move || {
            let mut thread = mission_thread;
            thread.run();
        })
        .expect("Failed to spawn mission thread");

    Ok(ThreadHandles {
        sensor: sensor_handle,
        planner: planner_handle,
        vision: vision_handle,
        supervisor: supervisor_handle,
        mission: mission_handle,
        operator,
        obstacle_tx,
    })
}

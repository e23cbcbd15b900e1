//! Mission thread: the orchestrator loop and the operator boundary.
//!
//! Event-driven over the command and signal channels with a 1 Hz
//! heartbeat tick. The thread is the single writer of the mission state;
//! it publishes the planner directive and the boundary status snapshot.

use std::sync::atomic::Ordering;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender};
use std::sync::Arc;
use std::time::Duration;

use meadow_io::clock::monotonic_ns;

use crate::config::Config;
use crate::mission::{
    MissionOrchestrator, MissionSignal, MissionState, OperatorCommand, StatusEvent, StatusSnapshot,
};
use crate::persist::PersistedState;
use crate::shared::SharedState;

/// Heartbeat period when no events arrive.
const HEARTBEAT: Duration = Duration::from_millis(200);

/// Requests the boundary can make of the mission thread.
enum BoundaryRequest {
    Command(OperatorCommand),
    Subscribe(mpsc::Sender<StatusEvent>),
}

/// Handle for the operator boundary (HTTP/WebSocket adapters hold one).
///
/// Transport is out of scope; these are the abstract operations the
/// boundary exposes.
#[derive(Clone)]
pub struct OperatorHandle {
    tx: SyncSender<BoundaryRequest>,
    shared: Arc<SharedState>,
}

impl OperatorHandle {
    /// Current status snapshot.
    pub fn get_status(&self) -> Option<StatusSnapshot> {
        self.shared.status()
    }

    pub fn start_mowing(&self) {
        let _ = self.tx.send(BoundaryRequest::Command(OperatorCommand::StartMowing));
    }

    pub fn start_point_goto(&self, x: f32, y: f32) {
        let _ = self
            .tx
            .send(BoundaryRequest::Command(OperatorCommand::StartPointGoto {
                x,
                y,
            }));
    }

    pub fn return_to_dock(&self) {
        let _ = self
            .tx
            .send(BoundaryRequest::Command(OperatorCommand::ReturnToDock));
    }

    /// Immediate e-stop: latches through the supervisor on its next tick
    /// and transitions the mission to Error.
    pub fn emergency_stop(&self) {
        self.shared.operator_estop.store(true, Ordering::Release);
        let _ = self
            .tx
            .send(BoundaryRequest::Command(OperatorCommand::EmergencyStop));
    }

    pub fn reset_emergency(&self) {
        self.shared.reset_requested.store(true, Ordering::Release);
        let _ = self
            .tx
            .send(BoundaryRequest::Command(OperatorCommand::ResetEmergency));
    }

    /// Subscribe to the status event stream.
    pub fn stream_events(&self) -> mpsc::Receiver<StatusEvent> {
        let (tx, rx) = mpsc::channel();
        let _ = self.tx.send(BoundaryRequest::Subscribe(tx));
        rx
    }

    /// Begin cooperative shutdown.
    pub fn halt(&self) {
        let _ = self.tx.send(BoundaryRequest::Command(OperatorCommand::Halt));
    }
}

/// Mission thread state and logic.
pub struct MissionThread {
    config: Config,
    shared: Arc<SharedState>,
    orchestrator: MissionOrchestrator,
    boundary_rx: Receiver<BoundaryRequest>,
    signal_rx: Receiver<MissionSignal>,
}

impl MissionThread {
    pub fn new(
        config: Config,
        shared: Arc<SharedState>,
        signal_rx: Receiver<MissionSignal>,
    ) -> (Self, OperatorHandle) {
        let (tx, boundary_rx) = mpsc::sync_channel(16);

        let mut orchestrator = MissionOrchestrator::new();
        if let Some(path) = &config.persistence.state_path {
            if let Ok(persisted) = PersistedState::load(std::path::Path::new(path)) {
                orchestrator = orchestrator.with_coverage_cursor(persisted.coverage_cursor);
            }
        }

        let handle = OperatorHandle {
            tx,
            shared: Arc::clone(&shared),
        };

        (
            Self {
                config,
                shared,
                orchestrator,
                boundary_rx,
                signal_rx,
            },
            handle,
        )
    }

    /// Run the orchestrator loop until the mission halts.
    pub fn run(&mut self) {
        tracing::info!(
            "Mission thread started ({} v{})",
            self.config.robot.name,
            self.config.robot.version
        );
        self.publish();

        loop {
            // Event-driven with a bounded wait as the heartbeat
            match self.boundary_rx.recv_timeout(HEARTBEAT) {
                Ok(BoundaryRequest::Command(cmd)) => self.orchestrator.handle_command(cmd),
                Ok(BoundaryRequest::Subscribe(tx)) => self.orchestrator.add_subscriber(tx),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }

            while let Ok(signal) = self.signal_rx.try_recv() {
                self.orchestrator.handle_signal(signal);
            }

            self.publish();
            self.shared.heartbeats.beat("mission", monotonic_ns());

            if *self.orchestrator.state() == MissionState::Halting {
                tracing::info!("Mission halting, signaling shutdown");
                self.shared.signal_shutdown();
                break;
            }
            if self.shared.should_shutdown() {
                break;
            }
        }

        tracing::info!("Mission thread shutting down");
    }

    /// Publish the directive and status snapshot.
    fn publish(&mut self) {
        self.shared.set_directive(self.orchestrator.directive());

        let pose = self.shared.pose_snapshot();
        let status = self.orchestrator.status(
            pose.pose,
            self.shared.battery(),
            pose.quality,
        );
        self.shared.publish_status(status);
    }
}

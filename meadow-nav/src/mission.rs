//! Mission orchestrator: the top-level state machine.
//!
//! Single writer of [`MissionState`]; everything else reads snapshots.
//! Operator commands arrive over a channel, subsystem signals
//! (goal-reached, docking results, battery and safety conditions) are fed
//! in by the threads, and every transition is published to the status
//! event stream.

use std::sync::mpsc;

use meadow_io::types::BatteryState;

use crate::core::types::{Point2D, Pose2D};
use crate::docking::DockingState;

/// Consecutive planning failures tolerated before the mission errors out.
const MAX_PLANNING_FAILURES: u32 = 3;

/// Top-level mission state.
#[derive(Debug, Clone, PartialEq)]
pub enum MissionState {
    Idle,
    Mowing { cursor: usize },
    PointGoto { target: Point2D },
    Returning { phase: DockingState },
    Charging,
    Error { kind: String },
    /// Cooperative shutdown in progress
    Halting,
}

impl MissionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            MissionState::Idle => "IDLE",
            MissionState::Mowing { .. } => "MOWING",
            MissionState::PointGoto { .. } => "POINT_GOTO",
            MissionState::Returning { .. } => "RETURNING",
            MissionState::Charging => "CHARGING",
            MissionState::Error { .. } => "ERROR",
            MissionState::Halting => "HALTING",
        }
    }
}

/// What the planner thread should currently be doing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Directive {
    /// Hold position, no active goal
    Hold,
    /// Run the coverage path, resuming from this cursor
    Mow { resume_cursor: usize },
    /// Point-to-point navigation
    Goto(Point2D),
    /// Two-phase docking
    Dock,
}

/// Operator commands from the boundary.
#[derive(Debug, Clone, PartialEq)]
pub enum OperatorCommand {
    StartMowing,
    StartPointGoto { x: f32, y: f32 },
    ReturnToDock,
    EmergencyStop,
    ResetEmergency,
    /// Begin cooperative shutdown
    Halt,
}

/// Signals from the subsystems.
#[derive(Debug, Clone, PartialEq)]
pub enum MissionSignal {
    /// The active path is exhausted
    GoalReached,
    /// Coverage progress for persistence
    CoverageCursor(usize),
    /// Route planning failed (retried with backoff by the planner)
    PlanningFailed { reason: String },
    /// Docking phase change (status only)
    DockingPhase(DockingState),
    DockingSucceeded,
    DockingFailed,
    /// The supervisor braked on an encoder stall
    EncoderStall,
    /// Battery below the low threshold or supervisor dock request
    BatteryLow,
    /// Battery reached the full threshold while charging
    BatteryFull,
    /// Localization quality dropped below the mission threshold
    LocalizationDegraded(bool),
    /// The supervisor latched an emergency
    SafetyLatched { reason: String },
    /// A deadline expired somewhere in the stack
    Timeout { what: String },
}

/// Events published on the operator stream.
#[derive(Debug, Clone, PartialEq)]
pub enum StatusEvent {
    StateChanged { from: String, to: String },
    Fault { message: String },
}

/// Boundary-visible status snapshot.
#[derive(Debug, Clone)]
pub struct StatusSnapshot {
    pub mission_state: String,
    pub pose: Pose2D,
    pub battery: BatteryState,
    pub localization_quality: f32,
    pub last_fault: Option<String>,
}

/// The orchestrator. Owns `MissionState`; transitions are serialized
/// through its two handler methods.
pub struct MissionOrchestrator {
    state: MissionState,
    last_fault: Option<String>,
    degraded: bool,
    planning_failures: u32,
    /// Last known coverage cursor, survives interruptions
    coverage_cursor: usize,
    subscribers: Vec<mpsc::Sender<StatusEvent>>,
}

impl MissionOrchestrator {
    pub fn new() -> Self {
        Self {
            state: MissionState::Idle,
            last_fault: None,
            degraded: false,
            planning_failures: 0,
            coverage_cursor: 0,
            subscribers: Vec::new(),
        }
    }

    /// Resume with a persisted coverage cursor.
    pub fn with_coverage_cursor(mut self, cursor: usize) -> Self {
        self.coverage_cursor = cursor;
        self
    }

    pub fn state(&self) -> &MissionState {
        &self.state
    }

    pub fn last_fault(&self) -> Option<&str> {
        self.last_fault.as_deref()
    }

    pub fn coverage_cursor(&self) -> usize {
        self.coverage_cursor
    }

    /// What the planner should be doing in the current state.
    pub fn directive(&self) -> Directive {
        match &self.state {
            MissionState::Mowing { cursor } => Directive::Mow {
                resume_cursor: *cursor,
            },
            MissionState::PointGoto { target } => Directive::Goto(*target),
            MissionState::Returning { .. } => Directive::Dock,
            _ => Directive::Hold,
        }
    }

    /// Subscribe to the status event stream.
    pub fn subscribe(&mut self) -> mpsc::Receiver<StatusEvent> {
        let (tx, rx) = mpsc::channel();
        self.add_subscriber(tx);
        rx
    }

    /// Attach an existing sender to the status event stream.
    pub fn add_subscriber(&mut self, tx: mpsc::Sender<StatusEvent>) {
        self.subscribers.push(tx);
    }

    /// Handle one operator command.
    pub fn handle_command(&mut self, command: OperatorCommand) {
        match command {
            OperatorCommand::StartMowing => {
                if !self.can_start_mission("mowing") {
                    return;
                }
                self.transition(MissionState::Mowing {
                    cursor: self.coverage_cursor,
                });
            }
            OperatorCommand::StartPointGoto { x, y } => {
                if !self.can_start_mission("point goto") {
                    return;
                }
                self.transition(MissionState::PointGoto {
                    target: Point2D::new(x, y),
                });
            }
            OperatorCommand::ReturnToDock => {
                if !matches!(
                    self.state,
                    MissionState::Charging | MissionState::Halting | MissionState::Returning { .. }
                ) {
                    self.transition(MissionState::Returning {
                        phase: DockingState::GnssTraverse,
                    });
                }
            }
            OperatorCommand::EmergencyStop => {
                self.fault("emergency stop");
                self.transition(MissionState::Error {
                    kind: "emergency_stop".into(),
                });
            }
            OperatorCommand::ResetEmergency => {
                if matches!(self.state, MissionState::Error { .. }) {
                    self.transition(MissionState::Idle);
                }
            }
            OperatorCommand::Halt => {
                self.transition(MissionState::Halting);
            }
        }
    }

    /// Handle one subsystem signal.
    pub fn handle_signal(&mut self, signal: MissionSignal) {
        match signal {
            MissionSignal::GoalReached => match self.state {
                MissionState::Mowing { .. } => {
                    tracing::info!("Coverage complete");
                    self.coverage_cursor = 0;
                    self.transition(MissionState::Idle);
                }
                MissionState::PointGoto { .. } => {
                    self.transition(MissionState::Idle);
                }
                _ => {}
            },
            MissionSignal::CoverageCursor(cursor) => {
                self.coverage_cursor = cursor;
                if let MissionState::Mowing { cursor: c } = &mut self.state {
                    *c = cursor;
                }
            }
            MissionSignal::PlanningFailed { reason } => {
                self.planning_failures += 1;
                self.fault(&format!("planning failed: {}", reason));
                if self.planning_failures >= MAX_PLANNING_FAILURES {
                    self.transition(MissionState::Error {
                        kind: "planning_failed".into(),
                    });
                }
            }
            MissionSignal::DockingPhase(phase) => {
                let mut changed = false;
                if let MissionState::Returning { phase: p } = &mut self.state {
                    if *p != phase {
                        *p = phase;
                        changed = true;
                    }
                }
                if changed {
                    let name = self.state.as_str().to_string();
                    self.publish(StatusEvent::StateChanged {
                        from: name.clone(),
                        to: format!("{}:{}", name, phase.as_str()),
                    });
                }
            }
            MissionSignal::DockingSucceeded => {
                if matches!(self.state, MissionState::Returning { .. }) {
                    self.transition(MissionState::Charging);
                }
            }
            MissionSignal::DockingFailed => {
                if matches!(self.state, MissionState::Returning { .. }) {
                    self.fault("docking failed");
                    self.transition(MissionState::Error {
                        kind: "docking_failed".into(),
                    });
                }
            }
            MissionSignal::EncoderStall => {
                // The supervisor already braked; record the fault so the
                // operator sees why the vehicle keeps stopping
                self.fault("encoder stall under commanded motion");
            }
            MissionSignal::BatteryLow => {
                if matches!(
                    self.state,
                    MissionState::Idle | MissionState::Mowing { .. } | MissionState::PointGoto { .. }
                ) {
                    tracing::warn!("Battery low, returning to dock");
                    self.transition(MissionState::Returning {
                        phase: DockingState::GnssTraverse,
                    });
                }
            }
            MissionSignal::BatteryFull => {
                if self.state == MissionState::Charging {
                    tracing::info!("Charge complete");
                    self.transition(MissionState::Idle);
                }
            }
            MissionSignal::LocalizationDegraded(degraded) => {
                if degraded && !self.degraded {
                    self.fault("localization degraded");
                }
                self.degraded = degraded;
            }
            MissionSignal::SafetyLatched { reason } => {
                self.fault(&reason);
                self.transition(MissionState::Error { kind: reason });
            }
            MissionSignal::Timeout { what } => {
                self.fault(&format!("timeout: {}", what));
                self.transition(MissionState::Error {
                    kind: format!("timeout: {}", what),
                });
            }
        }
    }

    /// Assemble the boundary status snapshot.
    pub fn status(
        &self,
        pose: Pose2D,
        battery: BatteryState,
        localization_quality: f32,
    ) -> StatusSnapshot {
        StatusSnapshot {
            mission_state: self.state.as_str().to_string(),
            pose,
            battery,
            localization_quality,
            last_fault: self.last_fault.clone(),
        }
    }

    /// New missions are refused while localization is degraded or an error
    /// is latched.
    fn can_start_mission(&mut self, what: &str) -> bool {
        if self.degraded {
            self.fault(&format!("refusing {}: localization degraded", what));
            return false;
        }
        match self.state {
            MissionState::Idle => true,
            _ => {
                self.fault(&format!(
                    "refusing {}: mission state is {}",
                    what,
                    self.state.as_str()
                ));
                false
            }
        }
    }

    fn transition(&mut self, next: MissionState) {
        if next == self.state {
            return;
        }
        let from = self.state.as_str().to_string();
        let to = next.as_str().to_string();
        tracing::info!("Mission {} -> {}", from, to);
        if matches!(next, MissionState::Mowing { .. } | MissionState::PointGoto { .. }) {
            self.planning_failures = 0;
        }
        self.state = next;
        self.publish(StatusEvent::StateChanged { from, to });
    }

    fn fault(&mut self, message: &str) {
        tracing::warn!("{}", message);
        self.last_fault = Some(message.to_string());
        self.publish(StatusEvent::Fault {
            message: message.to_string(),
        });
    }

    fn publish(&mut self, event: StatusEvent) {
        // Dead subscribers are dropped on the next publish
        self.subscribers
            .retain(|tx| tx.send(event.clone()).is_ok());
    }
}

impl Default for MissionOrchestrator {
    fn default() -> Self {
        Self::new()
    }
}

//! Supervisor thread: arbitration and the actuator write at 100 Hz.
//!
//! Reads exclusively from snapshot cells, never from ports, so the
//! event-to-braked-output deadline cannot be held hostage by another
//! task. Every actuator write carries a freshly rotated token.

use std::sync::atomic::Ordering;
use std::sync::mpsc::SyncSender;
use std::sync::Arc;
use std::time::Duration;

use meadow_io::clock::monotonic_ns;
use meadow_io::constraints::MotionConstraints;
use meadow_io::ports::{DifferentialDrive, Outputs};
use meadow_io::types::MotionCommand;

use crate::config::Config;
use crate::mission::MissionSignal;
use crate::safety::{SafetyInputs, SafetySupervisor, SafetyVerdict};
use crate::shared::SharedState;

/// Supervisor tick period (hard deadline is 5 ms event-to-brake; the tick
/// runs well inside it).
const TICK: Duration = Duration::from_millis(10);

/// Supervisor thread state and logic.
pub struct SupervisorThread {
    config: Config,
    shared: Arc<SharedState>,
    drive: Box<dyn DifferentialDrive>,
    outputs: Box<dyn Outputs>,
    signal_tx: SyncSender<MissionSignal>,
    supervisor: SafetySupervisor,
    latched_sent: bool,
    dock_request_sent: bool,
    stall_sent: bool,
}

impl SupervisorThread {
    pub fn new(
        config: Config,
        shared: Arc<SharedState>,
        drive: Box<dyn DifferentialDrive>,
        outputs: Box<dyn Outputs>,
        signal_tx: SyncSender<MissionSignal>,
    ) -> Self {
        let physics = &config.dynamic_obstacle_avoidance.robot_physics;
        let constraints = MotionConstraints {
            max_linear_velocity: physics.max_linear_speed,
            max_angular_velocity: physics.max_angular_speed,
            linear_acceleration: physics.max_linear_accel,
            angular_acceleration: physics.max_angular_accel,
            emergency_deceleration: physics.max_linear_accel * 4.0,
        };
        let supervisor = SafetySupervisor::new(
            config.safety.clone(),
            config.navigation.boundary_safety.warning_distance,
            constraints,
        );

        Self {
            config,
            shared,
            drive,
            outputs,
            signal_tx,
            supervisor,
            latched_sent: false,
            dock_request_sent: false,
            stall_sent: false,
        }
    }

    /// Run the arbitration loop until shutdown.
    pub fn run(&mut self) {
        tracing::info!("Supervisor thread started");

        while !self.shared.should_shutdown() {
            let now = monotonic_ns();
            self.decide_once(now);
            std::thread::sleep(TICK);
        }

        // Cooperative shutdown: stop the actuator through arbitration
        let now = monotonic_ns();
        let inputs = self.assemble_inputs(now);
        let (gated, _) = self
            .supervisor
            .decide(&inputs, MotionCommand::stop(now + 1_000_000_000), 0.0, now);
        if let Err(e) = self.drive.apply(&gated) {
            tracing::error!("Final stop failed: {}", e);
        }
        tracing::info!("Supervisor thread shutting down");
    }

    fn decide_once(&mut self, now: u64) {
        // Operator latch reset. The software e-stop clears with the reset
        // request; the hardware mushroom must be released physically, and
        // the supervisor refuses the reset while it is held.
        if self.shared.reset_requested.swap(false, Ordering::AcqRel) {
            self.shared.operator_estop.store(false, Ordering::Release);
            let inputs = self.assemble_inputs(now);
            if self.supervisor.reset_emergency(&inputs) {
                self.latched_sent = false;
            }
        }

        let inputs = self.assemble_inputs(now);

        let proposed = self
            .shared
            .proposed_command()
            .unwrap_or_else(|| MotionCommand::stop(now + 1_000_000_000));

        let mode_factor = self.shared.mode_speed_factor();
        let (gated, diagnostics) = self.supervisor.decide(&inputs, proposed, mode_factor, now);

        if let Err(e) = self.drive.apply(&gated) {
            tracing::error!("Actuator write failed: {}", e);
        }
        self.shared.set_gated_linear(gated.command.velocity.linear);
        self.shared
            .update_port_health(|h| h.drive = self.drive.health());

        self.shared
            .safety_latched
            .store(self.supervisor.is_latched(), Ordering::Release);

        // Edge-triggered notifications to the orchestrator
        if diagnostics.verdict == SafetyVerdict::Emergency && !self.latched_sent {
            self.latched_sent = true;
            let reason = self
                .supervisor
                .latch_cause()
                .map(|e| format!("{:?}", e))
                .unwrap_or_else(|| "emergency".into());
            let _ = self.outputs.buzz(500);
            let _ = self
                .signal_tx
                .try_send(MissionSignal::SafetyLatched { reason });
        }

        // The stall hold is applied by decide(); the orchestrator gets an
        // edge-triggered notification so it can record the fault
        if diagnostics.verdict == SafetyVerdict::StallHold && !self.stall_sent {
            self.stall_sent = true;
            tracing::warn!("Encoder stall under commanded motion, braking");
            let _ = self.signal_tx.try_send(MissionSignal::EncoderStall);
        } else if diagnostics.verdict != SafetyVerdict::StallHold {
            self.stall_sent = false;
        }

        if diagnostics.dock_requested && !self.dock_request_sent {
            self.dock_request_sent = true;
            let _ = self.signal_tx.try_send(MissionSignal::BatteryLow);
        } else if !diagnostics.dock_requested {
            self.dock_request_sent = false;
        }
    }

    /// Assemble the decision inputs from snapshot cells only.
    fn assemble_inputs(&self, now: u64) -> SafetyInputs {
        let battery = self.shared.battery();
        let starved = self
            .shared
            .heartbeats
            .starved(now, self.config.safety.watchdog.timeout)
            .or_else(|| self.critical_port_fault(now));

        SafetyInputs {
            estop: self.shared.discrete.estop.load(Ordering::Acquire)
                || self.shared.operator_estop.load(Ordering::Acquire),
            bumper_left: self.shared.discrete.bumper_left.load(Ordering::Acquire),
            bumper_right: self.shared.discrete.bumper_right.load(Ordering::Acquire),
            tilt: self.shared.tilt(),
            battery_voltage: battery.voltage,
            battery_current: battery.current,
            min_clearance: self.shared.min_clearance(),
            watchdog_starved: starved,
            encoder_stall: self.shared.stuck.load(Ordering::Acquire),
            boundary_margin: self.shared.boundary_margin(),
        }
    }

    /// A stale safety-critical port starves the watchdog like a wedged
    /// task would. Non-critical ports (IMU, GNSS, camera, power) degrade
    /// through their own fallback paths instead.
    fn critical_port_fault(&self, now: u64) -> Option<&'static str> {
        let timeout = self.config.safety.watchdog.timeout;
        let report = self.shared.port_health();
        if !report.inputs.is_fresh(now, timeout) {
            return Some("inputs-port");
        }
        if !report.encoders.is_fresh(now, timeout) {
            return Some("encoders-port");
        }
        if !report.drive.is_fresh(now, timeout) {
            return Some("drive-port");
        }
        None
    }
}

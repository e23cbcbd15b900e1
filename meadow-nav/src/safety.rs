//! Safety supervisor: hard interlocks over every actuation command.
//!
//! The decision function is pure over (sensor snapshot, proposed command):
//! no I/O, no waiting, so the event-to-braked-output deadline holds no
//! matter what the rest of the stack is doing. Checks run in a fixed
//! order and the first active trigger wins.
//!
//! The supervisor owns the motion-authority token. It rotates on every
//! decision, and actuators reject reuse, which makes stale or bypassing
//! producers structurally unable to move the vehicle.

use meadow_io::constraints::MotionConstraints;
use meadow_io::types::{ArbitrationToken, GatedCommand, MotionCommand, Velocity2D};

use crate::config::SafetyConfig;

/// A safety trigger, immutable once created.
#[derive(Debug, Clone, PartialEq)]
pub enum SafetyEvent {
    EStopPressed,
    BumperHit { left: bool, right: bool },
    TiltExceeded { angle: f32 },
    WatchdogStarved { task: &'static str },
    BatteryCritical { voltage: f32, current: f32 },
    CollisionImminent { distance: f32 },
    /// Encoders stopped ticking under a non-trivial command
    EncoderStall,
    /// Fused position entered the geofence warning band
    BoundaryWarning { margin: f32 },
}

/// Snapshot of everything the decision function looks at.
///
/// Assembled from snapshot cells only; the supervisor never blocks on a
/// port to build this.
#[derive(Debug, Clone, Copy, Default)]
pub struct SafetyInputs {
    pub estop: bool,
    pub bumper_left: bool,
    pub bumper_right: bool,
    /// Worst-axis tilt, radians
    pub tilt: f32,
    pub battery_voltage: f32,
    pub battery_current: f32,
    /// Smallest clearance reported by any obstacle channel, meters
    pub min_clearance: Option<f32>,
    /// A periodic task missed its heartbeat, or a safety-critical port
    /// went stale
    pub watchdog_starved: Option<&'static str>,
    /// The localizer's encoder-stall signal
    pub encoder_stall: bool,
    /// Distance from the fused position to the boundary polygon, meters
    pub boundary_margin: Option<f32>,
}

/// What the supervisor did with a proposed command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SafetyVerdict {
    /// Passed through (possibly clamped)
    Clear,
    /// Emergency latch active; manual reset required
    Emergency,
    /// Bumper hold in effect
    BumperHold,
    /// Tilt interlock in effect
    TiltHold,
    /// Encoder stall; braked until the stall clears
    StallHold,
    /// Collision imminent; linear motion suppressed
    CollisionLimited,
    /// Inside the geofence warning band; speed limit halved
    BoundarySlowdown,
    /// Proposed command expired before the decision
    Expired,
}

/// Decision diagnostics for the status stream.
#[derive(Debug, Clone)]
pub struct SafetyDiagnostics {
    pub verdict: SafetyVerdict,
    pub event: Option<SafetyEvent>,
    /// Battery condition requests a return to dock (motion still allowed)
    pub dock_requested: bool,
}

/// Speed-limit factor applied inside the geofence warning band.
const BOUNDARY_SLOWDOWN_FACTOR: f32 = 0.5;

/// The safety supervisor.
pub struct SafetySupervisor {
    config: SafetyConfig,
    constraints: MotionConstraints,
    /// Geofence margin below which the slow-down engages, meters
    boundary_warning_distance: f32,
    token: ArbitrationToken,

    /// EMERGENCY latch (e-stop or watchdog starvation); cleared only by
    /// an explicit manual reset
    latched: Option<SafetyEvent>,

    /// Bumper released at this time; hold persists for bumper_hold_time
    bumper_released_ns: Option<u64>,
    bumper_pressed: bool,

    tilt_tripped: bool,
    /// Tilt has been below the release level since this time
    tilt_ok_since_ns: Option<u64>,

    dock_requested: bool,
}

impl SafetySupervisor {
    pub fn new(
        config: SafetyConfig,
        boundary_warning_distance: f32,
        constraints: MotionConstraints,
    ) -> Self {
        Self {
            config,
            constraints,
            boundary_warning_distance,
            token: ArbitrationToken::INITIAL,
            latched: None,
            bumper_released_ns: None,
            bumper_pressed: false,
            tilt_tripped: false,
            tilt_ok_since_ns: None,
            dock_requested: false,
        }
    }

    /// Whether the EMERGENCY latch is set.
    pub fn is_latched(&self) -> bool {
        self.latched.is_some()
    }

    /// The latching event, if any.
    pub fn latch_cause(&self) -> Option<&SafetyEvent> {
        self.latched.as_ref()
    }

    /// Manual reset of the EMERGENCY latch.
    ///
    /// Refused while the e-stop is still pressed.
    pub fn reset_emergency(&mut self, inputs: &SafetyInputs) -> bool {
        if inputs.estop {
            tracing::warn!("Emergency reset refused: e-stop still pressed");
            return false;
        }
        if self.latched.take().is_some() {
            tracing::info!("Emergency latch cleared by manual reset");
        }
        true
    }

    /// Whether the battery condition is requesting a dock return.
    pub fn dock_requested(&self) -> bool {
        self.dock_requested
    }

    /// Arbitrate one proposed command.
    ///
    /// Ordering of checks (first trigger wins): e-stop / watchdog, bumper,
    /// tilt, encoder stall, battery, collision, then pass-through clamped
    /// to the active mode's limits (halved inside the geofence warning
    /// band).
    pub fn decide(
        &mut self,
        inputs: &SafetyInputs,
        proposed: MotionCommand,
        mode_speed_factor: f32,
        now_ns: u64,
    ) -> (GatedCommand, SafetyDiagnostics) {
        self.token = self.token.next();

        // 1. E-stop or watchdog starvation: latch, manual reset required
        if inputs.estop {
            self.latched.get_or_insert(SafetyEvent::EStopPressed);
        }
        if let Some(task) = inputs.watchdog_starved {
            if self.latched.is_none() {
                tracing::error!("Watchdog starved by task '{}', braking", task);
                self.latched = Some(SafetyEvent::WatchdogStarved { task });
            }
        }
        if let Some(cause) = &self.latched {
            return self.braked(
                SafetyVerdict::Emergency,
                Some(cause.clone()),
                proposed.deadline_monotonic,
            );
        }

        // 2. Bumper: brake, then hold for bumper_hold_time after release
        let bumper_now = inputs.bumper_left || inputs.bumper_right;
        if bumper_now {
            self.bumper_pressed = true;
            self.bumper_released_ns = None;
            return self.braked(
                SafetyVerdict::BumperHold,
                Some(SafetyEvent::BumperHit {
                    left: inputs.bumper_left,
                    right: inputs.bumper_right,
                }),
                proposed.deadline_monotonic,
            );
        }
        if self.bumper_pressed {
            let released = *self.bumper_released_ns.get_or_insert(now_ns);
            let held_secs = now_ns.saturating_sub(released) as f32 / 1e9;
            if held_secs < self.config.bumper_hold_time {
                return self.braked(
                    SafetyVerdict::BumperHold,
                    None,
                    proposed.deadline_monotonic,
                );
            }
            self.bumper_pressed = false;
            self.bumper_released_ns = None;
        }

        // 3. Tilt: brake above the limit, release after a debounced dwell
        // below the warning fraction of it
        let max_tilt = self.config.tilt_control.max_tilt_rad();
        if inputs.tilt > max_tilt {
            self.tilt_tripped = true;
            self.tilt_ok_since_ns = None;
        }
        if self.tilt_tripped {
            let release_level = max_tilt * self.config.tilt_control.warning_threshold;
            if inputs.tilt < release_level {
                let ok_since = *self.tilt_ok_since_ns.get_or_insert(now_ns);
                let dwell = now_ns.saturating_sub(ok_since) as f32 / 1e9;
                if dwell >= self.config.tilt_control.tilt_debounce {
                    self.tilt_tripped = false;
                    self.tilt_ok_since_ns = None;
                }
            } else {
                self.tilt_ok_since_ns = None;
            }
            if self.tilt_tripped {
                return self.braked(
                    SafetyVerdict::TiltHold,
                    Some(SafetyEvent::TiltExceeded { angle: inputs.tilt }),
                    proposed.deadline_monotonic,
                );
            }
        }

        // Encoder stall under command: something has the wheels; braking
        // drops the command, which lets the stall clear and the producer
        // try a different maneuver
        if inputs.encoder_stall {
            return self.braked(
                SafetyVerdict::StallHold,
                Some(SafetyEvent::EncoderStall),
                proposed.deadline_monotonic,
            );
        }

        // 4. Battery critical: request the dock but keep allowing motion
        // toward it. A zero voltage means the sensor has not reported yet.
        let battery = &self.config.battery_safety;
        self.dock_requested = (inputs.battery_voltage > 0.0
            && inputs.battery_voltage <= battery.min_battery_voltage)
            || inputs.battery_current > battery.max_current_draw;
        let battery_event = self.dock_requested.then(|| SafetyEvent::BatteryCritical {
            voltage: inputs.battery_voltage,
            current: inputs.battery_current,
        });

        // Stale commands decay to a stop
        if proposed.is_expired(now_ns) {
            let (cmd, mut diag) = self.braked(
                SafetyVerdict::Expired,
                battery_event.clone(),
                proposed.deadline_monotonic,
            );
            diag.dock_requested = self.dock_requested;
            return (cmd, diag);
        }

        // 5. Collision imminent: emergency profile, zero linear with
        // bounded angular so the vehicle can still steer out
        if let Some(clearance) = inputs.min_clearance {
            if clearance < self.config.collision_detection.distance_threshold {
                let angular = proposed
                    .velocity
                    .angular
                    .clamp(-self.constraints.max_angular_velocity / 2.0,
                           self.constraints.max_angular_velocity / 2.0);
                let command = MotionCommand {
                    velocity: Velocity2D::new(0.0, angular),
                    deadline_monotonic: proposed.deadline_monotonic,
                };
                return (
                    GatedCommand {
                        command,
                        token: self.token,
                    },
                    SafetyDiagnostics {
                        verdict: SafetyVerdict::CollisionLimited,
                        event: Some(SafetyEvent::CollisionImminent {
                            distance: clearance,
                        }),
                        dock_requested: self.dock_requested,
                    },
                );
            }
        }

        // 6. Pass-through, clamped to the mode's kinodynamic limits.
        // Inside the geofence warning band the speed ceiling is halved,
        // the same slow-down class as an imminent collision.
        let boundary_warning = inputs
            .boundary_margin
            .filter(|&margin| margin < self.boundary_warning_distance);
        let mut limits = self.constraints.scaled(mode_speed_factor);
        if boundary_warning.is_some() {
            limits = limits.scaled(BOUNDARY_SLOWDOWN_FACTOR);
        }
        let velocity =
            limits.constrain_velocity(proposed.velocity.linear, proposed.velocity.angular);

        let (verdict, event) = match boundary_warning {
            Some(margin) => (
                SafetyVerdict::BoundarySlowdown,
                Some(SafetyEvent::BoundaryWarning { margin }),
            ),
            None => (SafetyVerdict::Clear, battery_event),
        };
        (
            GatedCommand {
                command: MotionCommand {
                    velocity,
                    deadline_monotonic: proposed.deadline_monotonic,
                },
                token: self.token,
            },
            SafetyDiagnostics {
                verdict,
                event,
                dock_requested: self.dock_requested,
            },
        )
    }

    fn braked(
        &self,
        verdict: SafetyVerdict,
        event: Option<SafetyEvent>,
        deadline: u64,
    ) -> (GatedCommand, SafetyDiagnostics) {
        (
            GatedCommand {
                command: MotionCommand::stop(deadline),
                token: self.token,
            },
            SafetyDiagnostics {
                verdict,
                event,
                dock_requested: self.dock_requested,
            },
        )
    }
}

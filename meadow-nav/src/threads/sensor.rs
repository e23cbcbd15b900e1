//! Sensor thread: port ingest, odometry and fusion at ~100 Hz.
//!
//! Reads encoders, IMU, GNSS, power and discrete inputs; runs the fusion
//! filter; publishes the pose snapshot, battery state and safety cells;
//! tracks localization degradation and encoder stalls.

use std::sync::atomic::Ordering;
use std::sync::mpsc::SyncSender;
use std::sync::Arc;
use std::time::Duration;

use meadow_io::clock::monotonic_ns;
use meadow_io::ports::{DigitalInputs, Encoders, Gnss, Imu, PowerSensor};
use meadow_io::types::{BatteryState, ChargeDetector};

use crate::config::Config;
use crate::core::types::Pose2D;
use crate::localization::{
    EkfConfig, FusionEkf, GnssOutcome, OdometryDelta, StallDetector, WheelOdometry,
    WheelOdometryConfig,
};
use crate::mission::MissionSignal;
use crate::shared::SharedState;

/// Sensor loop period.
const TICK: Duration = Duration::from_millis(10);

/// Quality below this counts toward degradation.
const DEGRADED_QUALITY: f32 = 0.3;

/// Sustained low quality before the degraded signal fires, seconds.
const DEGRADED_AFTER_SECS: f32 = 10.0;

/// Commanded speed below which stalls are not judged, m/s.
const STALL_MIN_SPEED: f32 = 0.05;

/// Missing encoder motion under command before a stall latches, seconds.
const STALL_TIMEOUT_SECS: f32 = 1.5;

/// Sensor thread state and logic.
pub struct SensorThread {
    config: Config,
    shared: Arc<SharedState>,
    encoders: Box<dyn Encoders>,
    imu: Box<dyn Imu>,
    gnss: Box<dyn Gnss>,
    power: Box<dyn PowerSensor>,
    inputs: Box<dyn DigitalInputs>,
    signal_tx: SyncSender<MissionSignal>,

    odometry: WheelOdometry,
    ekf: FusionEkf,
    stall: StallDetector,
    charge: ChargeDetector,

    /// Time quality first dropped below the threshold, monotonic ns
    low_quality_since_ns: Option<u64>,
    degraded_sent: bool,
    battery_low_sent: bool,
    battery_full_sent: bool,
    last_tick_ns: u64,
}

impl SensorThread {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Config,
        shared: Arc<SharedState>,
        encoders: Box<dyn Encoders>,
        imu: Box<dyn Imu>,
        gnss: Box<dyn Gnss>,
        power: Box<dyn PowerSensor>,
        inputs: Box<dyn DigitalInputs>,
        signal_tx: SyncSender<MissionSignal>,
    ) -> Self {
        let odometry = WheelOdometry::new(WheelOdometryConfig {
            ticks_per_meter: config.ticks_per_meter(),
            wheel_base: config.navigation.wheel_base,
        });

        let kalman = &config.navigation.kalman;
        let ekf = FusionEkf::new(EkfConfig {
            process_noise: kalman.process_noise,
            measurement_noise: kalman.measurement_noise,
            gyro_blend_weight: kalman.gyro_blend_weight,
            hdop_bound: kalman.hdop_bound,
            outlier_gate: kalman.outlier_gate,
        });

        let power_config = &config.charging.power_sensor;
        let charge = ChargeDetector::new(
            power_config.charge_current_threshold,
            power_config.contact_voltage_threshold,
            power_config.confirm_samples,
        );

        Self {
            config,
            shared,
            encoders,
            imu,
            gnss,
            power,
            inputs,
            signal_tx,
            odometry,
            ekf,
            stall: StallDetector::new(STALL_MIN_SPEED, STALL_TIMEOUT_SECS),
            charge,
            low_quality_since_ns: None,
            degraded_sent: false,
            battery_low_sent: false,
            battery_full_sent: false,
            last_tick_ns: monotonic_ns(),
        }
    }

    /// Run the sensor loop until shutdown.
    pub fn run(&mut self) {
        tracing::info!("Sensor thread started");

        while !self.shared.should_shutdown() {
            let now = monotonic_ns();
            let dt = (now - self.last_tick_ns) as f32 / 1e9;
            self.last_tick_ns = now;

            self.read_discrete();
            let gyro = self.read_imu();
            self.step_fusion(gyro, dt, now);
            self.read_gnss(now);
            self.read_power(now);
            self.mirror_port_health();

            self.shared.heartbeats.beat("sensor", now);
            std::thread::sleep(TICK);
        }

        tracing::info!("Sensor thread shutting down");
    }

    /// Mirror this thread's port probes into shared state for the
    /// supervisor watchdog.
    fn mirror_port_health(&self) {
        let encoders = self.encoders.health();
        let imu = self.imu.health();
        let gnss = self.gnss.health();
        let power = self.power.health();
        let inputs = self.inputs.health();
        self.shared.update_port_health(|h| {
            h.encoders = encoders;
            h.imu = imu;
            h.gnss = gnss;
            h.power = power;
            h.inputs = inputs;
        });
    }

    fn read_discrete(&mut self) {
        match self.inputs.read() {
            Ok(state) => {
                self.shared
                    .discrete
                    .bumper_left
                    .store(state.bumper_left, Ordering::Release);
                self.shared
                    .discrete
                    .bumper_right
                    .store(state.bumper_right, Ordering::Release);
                self.shared.discrete.estop.store(state.estop, Ordering::Release);
            }
            Err(e) => tracing::warn!("Discrete input read failed: {}", e),
        }
    }

    /// Read the IMU; returns the yaw rate if the port is healthy.
    fn read_imu(&mut self) -> Option<f32> {
        match self.imu.sample() {
            Ok(sample) => {
                self.shared.set_tilt(sample.tilt());
                Some(sample.gyro_z)
            }
            Err(e) => {
                // Wheel-only fallback; the filter widens heading noise
                tracing::warn!("IMU read failed: {}", e);
                None
            }
        }
    }

    fn step_fusion(&mut self, gyro: Option<f32>, dt: f32, now: u64) {
        let delta = match self.encoders.ticks() {
            Ok(ticks) => self.odometry.update(ticks.left, ticks.right),
            Err(e) => {
                tracing::warn!("Encoder read failed: {}", e);
                None
            }
        };

        let moved = delta.as_ref().is_some_and(|d| d.distance.abs() > 1e-6);
        let delta = delta.unwrap_or(OdometryDelta {
            delta: Pose2D::identity(),
            distance: 0.0,
        });

        self.ekf.predict(&delta, gyro, dt, now);
        let estimate = self.ekf.estimate();
        self.shared.publish_pose(&estimate);

        // Encoder stall under executed motion is a safety-relevant signal;
        // the supervisor brakes on it, which zeroes the executed command
        // and lets the stall clear for another attempt
        let commanded = self.shared.gated_linear();
        let stalled = self.stall.update(commanded, moved, now);
        self.shared.stuck.store(stalled, Ordering::Release);

        self.track_degradation(estimate.quality, now);
    }

    fn track_degradation(&mut self, quality: f32, now: u64) {
        if quality < DEGRADED_QUALITY {
            let since = *self.low_quality_since_ns.get_or_insert(now);
            let low_for = (now.saturating_sub(since)) as f32 / 1e9;
            if low_for > DEGRADED_AFTER_SECS && !self.degraded_sent {
                tracing::warn!("Localization degraded ({:.0} s below quality floor)", low_for);
                self.shared.degraded.store(true, Ordering::Release);
                let _ = self
                    .signal_tx
                    .try_send(MissionSignal::LocalizationDegraded(true));
                self.degraded_sent = true;
            }
        } else {
            self.low_quality_since_ns = None;
            if self.degraded_sent {
                tracing::info!("Localization recovered");
                self.shared.degraded.store(false, Ordering::Release);
                let _ = self
                    .signal_tx
                    .try_send(MissionSignal::LocalizationDegraded(false));
                self.degraded_sent = false;
            }
        }
    }

    fn read_gnss(&mut self, _now: u64) {
        let fix = match self.gnss.fix() {
            Ok(Some(fix)) => fix,
            Ok(None) => return,
            Err(e) => {
                tracing::warn!("GNSS read failed: {}", e);
                return;
            }
        };

        match self.ekf.update_gnss(&fix) {
            GnssOutcome::Anchored => {
                if let Some(frame) = self.ekf.frame() {
                    tracing::info!(
                        "Local frame anchored at ({:.6}, {:.6})",
                        frame.origin().latitude,
                        frame.origin().longitude
                    );
                    self.shared.set_frame(frame);
                }
            }
            GnssOutcome::Accepted => {}
            GnssOutcome::RejectedQuality => {
                tracing::debug!("GNSS fix ignored (quality/HDOP gate)");
            }
            GnssOutcome::RejectedOutlier => {}
        }
    }

    fn read_power(&mut self, now: u64) {
        let mut battery = match self.power.battery() {
            Ok(b) => b,
            Err(e) => {
                tracing::warn!("Power sensor read failed: {}", e);
                return;
            }
        };

        if let Ok(dock_bus) = self.power.dock_bus() {
            battery.dock_bus = dock_bus;
            battery.charging = self.charge.update(&dock_bus);
        }
        self.publish_battery(battery, now);
    }

    fn publish_battery(&mut self, battery: BatteryState, _now: u64) {
        let thresholds = &self.config.navigation.missions.charging;

        if battery.soc_percent <= thresholds.battery_low_threshold && !self.battery_low_sent {
            let _ = self.signal_tx.try_send(MissionSignal::BatteryLow);
            self.battery_low_sent = true;
        } else if battery.soc_percent > thresholds.battery_low_threshold + 5.0 {
            self.battery_low_sent = false;
        }

        if battery.charging && battery.soc_percent >= thresholds.battery_full_threshold {
            if !self.battery_full_sent {
                let _ = self.signal_tx.try_send(MissionSignal::BatteryFull);
                self.battery_full_sent = true;
            }
        } else {
            self.battery_full_sent = false;
        }

        self.shared.set_battery(battery);
    }
}

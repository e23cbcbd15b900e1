//! Configuration loading for the Meadow control stack.
//!
//! Configuration is read once at startup into an immutable structure shared
//! by reference; nothing mutates it afterwards. An environment-specific file
//! may override the base file section by section. Validation fails fast on
//! missing or out-of-range options.
//!
//! Several key names (`sarj_akimi_esigi`, `hassas_mesafe`, ...) come from
//! the configuration files already deployed on the fleet and are mapped onto
//! English field names with serde renames.

use serde::Deserialize;
use std::path::Path;

use crate::core::GeodeticPoint;
use crate::error::{NavError, Result};

/// Main configuration structure
#[derive(Clone, Debug, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub robot: RobotIdentity,
    #[serde(default)]
    pub simulation: SimulationConfig,
    #[serde(default)]
    pub navigation: NavigationConfig,
    #[serde(default)]
    pub charging: ChargingConfig,
    #[serde(default)]
    pub safety: SafetyConfig,
    #[serde(default)]
    pub dynamic_obstacle_avoidance: AvoidanceConfig,
    /// Pin ownership lives here; authoritative over the legacy sensor block.
    #[serde(default)]
    pub motors: Option<MotorsConfig>,
    /// Legacy duplicate encoder pin block; must agree with `motors` if present.
    #[serde(default)]
    pub sensors: Option<SensorsConfig>,
    #[serde(default)]
    pub persistence: PersistenceConfig,
}

/// Robot identity, used in logs only
#[derive(Clone, Debug, Deserialize)]
pub struct RobotIdentity {
    #[serde(default = "default_robot_name")]
    pub name: String,
    #[serde(default = "default_robot_version")]
    pub version: String,
}

impl Default for RobotIdentity {
    fn default() -> Self {
        Self {
            name: default_robot_name(),
            version: default_robot_version(),
        }
    }
}

/// Simulation switch; when enabled, ports bind to synthetic generators
#[derive(Clone, Debug, Deserialize, Default)]
pub struct SimulationConfig {
    #[serde(default)]
    pub enabled: bool,
}

/// Navigation and drivetrain parameters
#[derive(Clone, Debug, Deserialize)]
pub struct NavigationConfig {
    /// Wheel diameter in meters
    #[serde(default = "default_wheel_diameter")]
    pub wheel_diameter: f32,

    /// Distance between wheel centers in meters
    #[serde(default = "default_wheel_base")]
    pub wheel_base: f32,

    /// Encoder pulses per wheel revolution. Hardware-specific; the shipped
    /// drivetrain uses 1000 but older units carry 360.
    #[serde(default = "default_encoder_ppr")]
    pub encoder_ppr: f32,

    #[serde(default)]
    pub kalman: KalmanConfig,

    #[serde(default)]
    pub path_planning: PathPlanningConfig,

    #[serde(default)]
    pub missions: MissionsConfig,

    /// Work area boundary polygon; closed implicitly
    #[serde(default)]
    pub boundary_coordinates: Vec<BoundaryPoint>,

    #[serde(default)]
    pub boundary_safety: BoundarySafetyConfig,
}

impl Default for NavigationConfig {
    fn default() -> Self {
        Self {
            wheel_diameter: default_wheel_diameter(),
            wheel_base: default_wheel_base(),
            encoder_ppr: default_encoder_ppr(),
            kalman: KalmanConfig::default(),
            path_planning: PathPlanningConfig::default(),
            missions: MissionsConfig::default(),
            boundary_coordinates: Vec::new(),
            boundary_safety: BoundarySafetyConfig::default(),
        }
    }
}

/// One vertex of the boundary polygon
#[derive(Clone, Copy, Debug, Deserialize)]
pub struct BoundaryPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl From<BoundaryPoint> for GeodeticPoint {
    fn from(p: BoundaryPoint) -> Self {
        GeodeticPoint::new(p.latitude, p.longitude)
    }
}

/// Fusion filter tuning
#[derive(Clone, Debug, Deserialize)]
pub struct KalmanConfig {
    /// Scalar multiplier on the model covariance
    #[serde(default = "default_process_noise")]
    pub process_noise: f32,

    /// Scalar multiplier on the GNSS measurement covariance
    #[serde(default = "default_measurement_noise")]
    pub measurement_noise: f32,

    /// IMU weight in the complementary yaw blend (0 = wheels only)
    #[serde(default = "default_gyro_blend_weight")]
    pub gyro_blend_weight: f32,

    /// Fixes with HDOP at or above this bound are ignored
    #[serde(default = "default_hdop_bound")]
    pub hdop_bound: f32,

    /// Innovation gate: reject GNSS updates beyond k·sqrt(S)
    #[serde(default = "default_outlier_gate")]
    pub outlier_gate: f32,
}

impl Default for KalmanConfig {
    fn default() -> Self {
        Self {
            process_noise: default_process_noise(),
            measurement_noise: default_measurement_noise(),
            gyro_blend_weight: default_gyro_blend_weight(),
            hdop_bound: default_hdop_bound(),
            outlier_gate: default_outlier_gate(),
        }
    }
}

/// Obstacle inflation metric
#[derive(Clone, Copy, Debug, serde::Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum InflationMetric {
    Chebyshev,
    Euclidean,
}

/// Grid and route planning parameters
#[derive(Clone, Debug, Deserialize)]
pub struct PathPlanningConfig {
    /// Grid cell size in meters
    #[serde(default = "default_grid_resolution")]
    pub grid_resolution: f32,

    /// Extra inflation beyond the robot radius, meters
    #[serde(default = "default_obstacle_padding")]
    pub obstacle_padding: f32,

    /// Margin around the polygon AABB when allocating the grid, meters
    #[serde(default = "default_grid_margin")]
    pub grid_margin: f32,

    /// Inflation distance metric
    #[serde(default = "default_inflation_metric")]
    pub inflation_metric: InflationMetric,

    /// Maximum spacing between consecutive waypoints, meters
    #[serde(default = "default_max_waypoint_step")]
    pub max_waypoint_step: f32,

    /// Traversal cost multiplier for inflated cells
    #[serde(default = "default_inflated_cell_penalty")]
    pub inflated_cell_penalty: f32,
}

impl Default for PathPlanningConfig {
    fn default() -> Self {
        Self {
            grid_resolution: default_grid_resolution(),
            obstacle_padding: default_obstacle_padding(),
            grid_margin: default_grid_margin(),
            inflation_metric: default_inflation_metric(),
            max_waypoint_step: default_max_waypoint_step(),
            inflated_cell_penalty: default_inflated_cell_penalty(),
        }
    }
}

/// Mission parameters
#[derive(Clone, Debug, Deserialize, Default)]
pub struct MissionsConfig {
    #[serde(default)]
    pub mowing: MowingConfig,
    #[serde(default)]
    pub charging: ChargeCycleConfig,
}

/// Mowing coverage parameters
#[derive(Clone, Debug, Deserialize)]
pub struct MowingConfig {
    /// Strip overlap in meters
    #[serde(default = "default_mowing_overlap")]
    pub overlap: f32,

    /// Coverage travel speed, m/s
    #[serde(default = "default_mowing_speed")]
    pub speed: f32,

    /// Cutting width in meters
    #[serde(default = "default_brush_width")]
    pub brush_width: f32,
}

impl Default for MowingConfig {
    fn default() -> Self {
        Self {
            overlap: default_mowing_overlap(),
            speed: default_mowing_speed(),
            brush_width: default_brush_width(),
        }
    }
}

/// Charge cycle thresholds (state-of-charge percent)
#[derive(Clone, Debug, Deserialize)]
pub struct ChargeCycleConfig {
    #[serde(default = "default_battery_low_threshold")]
    pub battery_low_threshold: f32,
    #[serde(default = "default_battery_full_threshold")]
    pub battery_full_threshold: f32,
}

impl Default for ChargeCycleConfig {
    fn default() -> Self {
        Self {
            battery_low_threshold: default_battery_low_threshold(),
            battery_full_threshold: default_battery_full_threshold(),
        }
    }
}

/// Geofence monitor parameters
#[derive(Clone, Debug, Deserialize)]
pub struct BoundarySafetyConfig {
    /// Stay this far inside the boundary, meters
    #[serde(default = "default_buffer_distance")]
    pub buffer_distance: f32,

    /// Distance to the boundary at which a warning is raised, meters
    #[serde(default = "default_warning_distance")]
    pub warning_distance: f32,

    /// Hard limit on excursion outside the boundary, meters
    #[serde(default = "default_max_deviation")]
    pub max_deviation: f32,

    /// Geofence check period, seconds
    #[serde(default = "default_check_frequency")]
    pub check_frequency: f32,
}

impl Default for BoundarySafetyConfig {
    fn default() -> Self {
        Self {
            buffer_distance: default_buffer_distance(),
            warning_distance: default_warning_distance(),
            max_deviation: default_max_deviation(),
            check_frequency: default_check_frequency(),
        }
    }
}

/// Docking and charging configuration
#[derive(Clone, Debug, Deserialize, Default)]
pub struct ChargingConfig {
    #[serde(default)]
    pub gps_dock: GpsDockConfig,
    #[serde(default)]
    pub apriltag: AprilTagConfig,
    #[serde(default)]
    pub power_sensor: PowerSensorConfig,
}

/// Dock location and the approach envelope
#[derive(Clone, Debug, Deserialize)]
pub struct GpsDockConfig {
    #[serde(default = "default_dock_latitude")]
    pub latitude: f64,
    #[serde(default = "default_dock_longitude")]
    pub longitude: f64,

    /// GNSS accuracy assumed around the dock, meters
    #[serde(default = "default_accuracy_radius")]
    pub accuracy_radius: f32,

    /// Remaining distance below which the traverse phase ends, meters
    #[serde(default = "default_precise_approach_distance")]
    pub precise_approach_distance: f32,

    /// Range at which the approach slows to the medium profile, meters
    #[serde(default = "default_medium_distance_threshold")]
    pub medium_distance_threshold: f32,

    /// Marker detection range that also ends the traverse phase, meters
    #[serde(default = "default_apriltag_detection_range")]
    pub apriltag_detection_range: f32,

    #[serde(default)]
    pub approach_speeds: ApproachSpeeds,
}

impl Default for GpsDockConfig {
    fn default() -> Self {
        Self {
            latitude: default_dock_latitude(),
            longitude: default_dock_longitude(),
            accuracy_radius: default_accuracy_radius(),
            precise_approach_distance: default_precise_approach_distance(),
            medium_distance_threshold: default_medium_distance_threshold(),
            apriltag_detection_range: default_apriltag_detection_range(),
            approach_speeds: ApproachSpeeds::default(),
        }
    }
}

/// Speed ladder for the dock approach, m/s
#[derive(Clone, Debug, Deserialize)]
pub struct ApproachSpeeds {
    #[serde(default = "default_speed_normal")]
    pub normal: f32,
    #[serde(default = "default_speed_slow")]
    pub slow: f32,
    #[serde(default = "default_speed_very_slow")]
    pub very_slow: f32,
    #[serde(default = "default_speed_ultra_slow")]
    pub ultra_slow: f32,
    #[serde(default = "default_speed_precise")]
    pub precise: f32,
}

impl Default for ApproachSpeeds {
    fn default() -> Self {
        Self {
            normal: default_speed_normal(),
            slow: default_speed_slow(),
            very_slow: default_speed_very_slow(),
            ultra_slow: default_speed_ultra_slow(),
            precise: default_speed_precise(),
        }
    }
}

/// Fiducial marker configuration
#[derive(Clone, Debug, Deserialize)]
pub struct AprilTagConfig {
    /// Marker id mounted on the charging station
    #[serde(rename = "sarj_istasyonu_tag_id", default)]
    pub station_tag_id: u32,

    /// Marker side length in meters
    #[serde(rename = "tag_boyutu", default = "default_tag_size")]
    pub tag_size: f32,

    /// 3×3 camera intrinsic matrix, row-major
    #[serde(rename = "kamera_matrix", default = "default_camera_matrix")]
    pub camera_matrix: [[f32; 3]; 3],

    /// 5-element distortion vector (k1, k2, p1, p2, k3)
    #[serde(default = "default_distortion")]
    pub distortion_coeffs: [f32; 5],

    #[serde(default)]
    pub detection: DetectionConfig,

    #[serde(default)]
    pub tolerances: DockTolerances,

    #[serde(default)]
    pub family: FamilyConfig,

    /// Detections kept per marker for temporal smoothing
    #[serde(default = "default_tracking_history")]
    pub tracking_history: usize,

    /// Detections older than this are evicted, seconds
    #[serde(default = "default_obstacle_timeout")]
    pub obstacle_timeout: f32,

    /// In-place search rotation speed, rad/s
    #[serde(default = "default_rotation_speed")]
    pub rotation_speed: f32,

    /// Search phase gives up after this many seconds
    #[serde(default = "default_search_timeout")]
    pub search_timeout: f32,

    /// Marker lost for longer than this aborts the coarse approach, seconds
    #[serde(default = "default_lost_timeout")]
    pub lost_timeout: f32,

    /// Contact phase gives up after this many seconds
    #[serde(default = "default_contact_timeout")]
    pub contact_timeout: f32,

    /// Docking attempts before FAILED is terminal
    #[serde(default = "default_retry_budget")]
    pub retry_budget: u32,
}

impl Default for AprilTagConfig {
    fn default() -> Self {
        Self {
            station_tag_id: 0,
            tag_size: default_tag_size(),
            camera_matrix: default_camera_matrix(),
            distortion_coeffs: default_distortion(),
            detection: DetectionConfig::default(),
            tolerances: DockTolerances::default(),
            family: FamilyConfig::default(),
            tracking_history: default_tracking_history(),
            obstacle_timeout: default_obstacle_timeout(),
            rotation_speed: default_rotation_speed(),
            search_timeout: default_search_timeout(),
            lost_timeout: default_lost_timeout(),
            contact_timeout: default_contact_timeout(),
            retry_budget: default_retry_budget(),
        }
    }
}

/// Detection acceptance gates
#[derive(Clone, Debug, Deserialize)]
pub struct DetectionConfig {
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f32,

    /// Detections beyond this range are ignored, meters
    #[serde(default = "default_max_detection_distance")]
    pub max_detection_distance: f32,

    /// Quad perimeter bounds as fractions of the frame dimension
    #[serde(default = "default_min_perimeter_rate")]
    pub min_marker_perimeter_rate: f32,
    #[serde(default = "default_max_perimeter_rate")]
    pub max_marker_perimeter_rate: f32,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            min_confidence: default_min_confidence(),
            max_detection_distance: default_max_detection_distance(),
            min_marker_perimeter_rate: default_min_perimeter_rate(),
            max_marker_perimeter_rate: default_max_perimeter_rate(),
        }
    }
}

/// Precision docking tolerances
#[derive(Clone, Debug, Deserialize)]
pub struct DockTolerances {
    /// Coarse approach ends at this range, meters
    #[serde(rename = "hedef_mesafe", default = "default_target_distance")]
    pub target_distance: f32,

    /// Precision phase ends at this range, meters
    #[serde(rename = "hassas_mesafe", default = "default_precise_distance")]
    pub precise_distance: f32,

    /// Bearing/yaw tolerance in degrees
    #[serde(rename = "aci_toleransi", default = "default_angle_tolerance_deg")]
    pub angle_tolerance_deg: f32,

    /// Lateral position tolerance, meters
    #[serde(rename = "pozisyon_toleransi", default = "default_position_tolerance")]
    pub position_tolerance: f32,
}

impl DockTolerances {
    /// Angle tolerance in radians (degrees at the config edge only).
    pub fn angle_tolerance_rad(&self) -> f32 {
        self.angle_tolerance_deg.to_radians()
    }
}

impl Default for DockTolerances {
    fn default() -> Self {
        Self {
            target_distance: default_target_distance(),
            precise_distance: default_precise_distance(),
            angle_tolerance_deg: default_angle_tolerance_deg(),
            position_tolerance: default_position_tolerance(),
        }
    }
}

/// Fiducial family codebook.
///
/// The default carries the leading codewords of the 36h11 dictionary the
/// dock plates are printed with; custom plates configure their own.
#[derive(Clone, Debug, Deserialize)]
pub struct FamilyConfig {
    /// Data bits per marker side (36h11: 6)
    #[serde(default = "default_family_bits")]
    pub bits: u32,

    /// Codewords, index = marker id
    #[serde(default = "default_family_codewords")]
    pub codewords: Vec<u64>,

    /// Maximum Hamming distance accepted when decoding
    #[serde(default = "default_family_min_hamming")]
    pub max_hamming: u32,
}

impl Default for FamilyConfig {
    fn default() -> Self {
        Self {
            bits: default_family_bits(),
            codewords: default_family_codewords(),
            max_hamming: default_family_min_hamming(),
        }
    }
}

/// Dock-bus charge confirmation thresholds
#[derive(Clone, Debug, Deserialize)]
pub struct PowerSensorConfig {
    /// Dock-bus current above this means charge flowing, amperes
    #[serde(rename = "sarj_akimi_esigi", default = "default_charge_current")]
    pub charge_current_threshold: f32,

    /// Dock-bus voltage above this means contacts mated, volts
    #[serde(rename = "baglanti_voltaj_esigi", default = "default_contact_voltage")]
    pub contact_voltage_threshold: f32,

    /// Consecutive samples required before DOCKED is confirmed
    #[serde(default = "default_confirm_samples")]
    pub confirm_samples: u32,
}

impl Default for PowerSensorConfig {
    fn default() -> Self {
        Self {
            charge_current_threshold: default_charge_current(),
            contact_voltage_threshold: default_contact_voltage(),
            confirm_samples: default_confirm_samples(),
        }
    }
}

/// Safety supervisor configuration
#[derive(Clone, Debug, Deserialize)]
pub struct SafetyConfig {
    #[serde(default)]
    pub tilt_control: TiltConfig,
    #[serde(default)]
    pub watchdog: WatchdogConfig,
    #[serde(default)]
    pub collision_detection: CollisionConfig,
    #[serde(default)]
    pub battery_safety: BatterySafetyConfig,

    /// Hold time after a bumper release, seconds
    #[serde(default = "default_bumper_hold_time")]
    pub bumper_hold_time: f32,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            tilt_control: TiltConfig::default(),
            watchdog: WatchdogConfig::default(),
            collision_detection: CollisionConfig::default(),
            battery_safety: BatterySafetyConfig::default(),
            bumper_hold_time: default_bumper_hold_time(),
        }
    }
}

/// Tilt interlock
#[derive(Clone, Debug, Deserialize)]
pub struct TiltConfig {
    /// Maximum tilt in degrees before braking
    #[serde(default = "default_max_tilt_angle")]
    pub max_tilt_angle: f32,

    /// Release fraction: exit below max_tilt_angle × warning_threshold
    #[serde(default = "default_tilt_warning_threshold")]
    pub warning_threshold: f32,

    /// Tilt must stay below the release level this long, seconds
    #[serde(default = "default_tilt_debounce")]
    pub tilt_debounce: f32,
}

impl TiltConfig {
    pub fn max_tilt_rad(&self) -> f32 {
        self.max_tilt_angle.to_radians()
    }
}

impl Default for TiltConfig {
    fn default() -> Self {
        Self {
            max_tilt_angle: default_max_tilt_angle(),
            warning_threshold: default_tilt_warning_threshold(),
            tilt_debounce: default_tilt_debounce(),
        }
    }
}

/// Heartbeat watchdog
#[derive(Clone, Debug, Deserialize)]
pub struct WatchdogConfig {
    /// Missed-heartbeat timeout, seconds
    #[serde(default = "default_watchdog_timeout")]
    pub timeout: f32,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            timeout: default_watchdog_timeout(),
        }
    }
}

/// Collision interlock (the supervisor's hard threshold)
#[derive(Clone, Debug, Deserialize)]
pub struct CollisionConfig {
    /// Clearance below which the emergency profile engages, meters
    #[serde(default = "default_collision_distance")]
    pub distance_threshold: f32,
}

impl Default for CollisionConfig {
    fn default() -> Self {
        Self {
            distance_threshold: default_collision_distance(),
        }
    }
}

/// Battery interlock
#[derive(Clone, Debug, Deserialize)]
pub struct BatterySafetyConfig {
    /// Battery voltage at or below this requests docking, volts
    #[serde(default = "default_min_battery_voltage")]
    pub min_battery_voltage: f32,

    /// Rapid drain warning threshold, volts per minute
    #[serde(default = "default_rapid_drain")]
    pub rapid_drain_threshold: f32,

    /// Current draw above this requests docking, amperes
    #[serde(default = "default_max_current_draw")]
    pub max_current_draw: f32,
}

impl Default for BatterySafetyConfig {
    fn default() -> Self {
        Self {
            min_battery_voltage: default_min_battery_voltage(),
            rapid_drain_threshold: default_rapid_drain(),
            max_current_draw: default_max_current_draw(),
        }
    }
}

/// Local planner configuration
#[derive(Clone, Debug, Deserialize, Default)]
pub struct AvoidanceConfig {
    #[serde(default)]
    pub dwa: DwaConfig,
    #[serde(default)]
    pub robot_physics: RobotPhysics,
    #[serde(default)]
    pub navigation_modes: NavigationModes,
    #[serde(default)]
    pub performance: PerformanceConfig,
}

/// Dynamic window sampling parameters
#[derive(Clone, Debug, Deserialize)]
pub struct DwaConfig {
    /// Linear velocity sampling step, m/s
    #[serde(default = "default_velocity_resolution")]
    pub velocity_resolution: f32,

    /// Angular velocity sampling step, rad/s
    #[serde(default = "default_angular_resolution")]
    pub angular_resolution: f32,

    /// Forward simulation horizon, seconds
    #[serde(default = "default_time_horizon")]
    pub time_horizon: f32,

    /// Simulation and control step, seconds
    #[serde(default = "default_dwa_dt")]
    pub dt: f32,

    /// The planner's soft clearance setpoint, meters. Must be at least the
    /// supervisor's collision threshold.
    #[serde(default = "default_emergency_brake_distance")]
    pub emergency_brake_distance: f32,

    #[serde(default)]
    pub weights: DwaWeights,
}

impl Default for DwaConfig {
    fn default() -> Self {
        Self {
            velocity_resolution: default_velocity_resolution(),
            angular_resolution: default_angular_resolution(),
            time_horizon: default_time_horizon(),
            dt: default_dwa_dt(),
            emergency_brake_distance: default_emergency_brake_distance(),
            weights: DwaWeights::default(),
        }
    }
}

/// Trajectory scoring weights; defaults favor obstacle avoidance
#[derive(Clone, Debug, Deserialize)]
pub struct DwaWeights {
    #[serde(default = "default_weight_heading")]
    pub heading: f32,
    #[serde(default = "default_weight_obstacle")]
    pub obstacle: f32,
    #[serde(default = "default_weight_velocity")]
    pub velocity: f32,
    #[serde(default = "default_weight_smoothness")]
    pub smoothness: f32,
}

impl Default for DwaWeights {
    fn default() -> Self {
        Self {
            heading: default_weight_heading(),
            obstacle: default_weight_obstacle(),
            velocity: default_weight_velocity(),
            smoothness: default_weight_smoothness(),
        }
    }
}

/// Vehicle physical limits
#[derive(Clone, Debug, Deserialize)]
pub struct RobotPhysics {
    /// Body radius, meters
    #[serde(default = "default_robot_radius")]
    pub radius: f32,
    #[serde(default = "default_max_linear_speed")]
    pub max_linear_speed: f32,
    #[serde(default = "default_max_angular_speed")]
    pub max_angular_speed: f32,
    #[serde(default = "default_max_linear_accel")]
    pub max_linear_accel: f32,
    #[serde(default = "default_max_angular_accel")]
    pub max_angular_accel: f32,
}

impl Default for RobotPhysics {
    fn default() -> Self {
        Self {
            radius: default_robot_radius(),
            max_linear_speed: default_max_linear_speed(),
            max_angular_speed: default_max_angular_speed(),
            max_linear_accel: default_max_linear_accel(),
            max_angular_accel: default_max_angular_accel(),
        }
    }
}

/// One navigation mode profile
#[derive(Clone, Copy, Debug, Deserialize)]
pub struct ModeProfile {
    /// Multiplier on the velocity limits
    pub speed_factor: f32,
    /// Multiplier on the obstacle weight
    pub safety_factor: f32,
}

/// The four mode profiles
#[derive(Clone, Debug, Deserialize)]
pub struct NavigationModes {
    #[serde(default = "default_mode_normal")]
    pub normal: ModeProfile,
    #[serde(default = "default_mode_conservative")]
    pub conservative: ModeProfile,
    #[serde(default = "default_mode_aggressive")]
    pub aggressive: ModeProfile,
    #[serde(default = "default_mode_emergency")]
    pub emergency: ModeProfile,
}

impl Default for NavigationModes {
    fn default() -> Self {
        Self {
            normal: default_mode_normal(),
            conservative: default_mode_conservative(),
            aggressive: default_mode_aggressive(),
            emergency: default_mode_emergency(),
        }
    }
}

/// Replanning and stuck detection
#[derive(Clone, Debug, Deserialize)]
pub struct PerformanceConfig {
    /// Upper bound on replans per second
    #[serde(default = "default_max_replanning_frequency")]
    pub max_replanning_frequency: f32,

    /// Consecutive no-sample ticks before requesting a replan
    #[serde(default = "default_stuck_detection_limit")]
    pub stuck_detection_limit: u32,

    /// Waypoint arrival tolerance, meters
    #[serde(default = "default_waypoint_tolerance")]
    pub waypoint_tolerance: f32,
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            max_replanning_frequency: default_max_replanning_frequency(),
            stuck_detection_limit: default_stuck_detection_limit(),
            waypoint_tolerance: default_waypoint_tolerance(),
        }
    }
}

/// Motor section; authoritative owner of the encoder pins
#[derive(Clone, Debug, Deserialize, Default)]
pub struct MotorsConfig {
    #[serde(default)]
    pub wheels: Option<EncoderPins>,
}

/// Legacy sensor section; may duplicate the encoder pins
#[derive(Clone, Debug, Deserialize, Default)]
pub struct SensorsConfig {
    #[serde(rename = "enkoder", default)]
    pub encoder: Option<EncoderPins>,
}

/// Encoder GPIO pin assignment
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
pub struct EncoderPins {
    pub left_pin: u8,
    pub right_pin: u8,
}

/// Optional persisted-state location
#[derive(Clone, Debug, Deserialize, Default)]
pub struct PersistenceConfig {
    /// JSON snapshot path; persistence is disabled when unset
    #[serde(default)]
    pub state_path: Option<String>,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| NavError::Config(format!("Failed to read config file: {}", e)))?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a base file, then let an environment file override whole
    /// sections. The environment file may be absent.
    pub fn load_with_overrides(base: &Path, env: Option<&Path>) -> Result<Self> {
        let base_content = std::fs::read_to_string(base)
            .map_err(|e| NavError::Config(format!("Failed to read config file: {}", e)))?;
        let mut value: toml::Value = base_content.parse().map_err(toml_err)?;

        if let Some(env_path) = env {
            if env_path.exists() {
                let env_content = std::fs::read_to_string(env_path)
                    .map_err(|e| NavError::Config(format!("Failed to read override file: {}", e)))?;
                let env_value: toml::Value = env_content.parse().map_err(toml_err)?;
                merge_toml(&mut value, env_value);
            }
        }

        let config: Config = value.try_into().map_err(toml_err)?;
        config.validate()?;
        Ok(config)
    }

    /// Encoder ticks per meter of wheel travel, derived from the drivetrain.
    pub fn ticks_per_meter(&self) -> f32 {
        self.navigation.encoder_ppr / (std::f32::consts::PI * self.navigation.wheel_diameter)
    }

    /// The dock location as a geodetic point.
    pub fn dock_position(&self) -> GeodeticPoint {
        GeodeticPoint::new(
            self.charging.gps_dock.latitude,
            self.charging.gps_dock.longitude,
        )
    }

    /// Fail-fast startup validation.
    pub fn validate(&self) -> Result<()> {
        let nav = &self.navigation;
        if nav.wheel_diameter <= 0.0 {
            return Err(NavError::Config(format!(
                "navigation.wheel_diameter must be positive, got {}",
                nav.wheel_diameter
            )));
        }
        if nav.wheel_base <= 0.0 {
            return Err(NavError::Config(format!(
                "navigation.wheel_base must be positive, got {}",
                nav.wheel_base
            )));
        }
        if nav.encoder_ppr <= 0.0 {
            return Err(NavError::Config(format!(
                "navigation.encoder_ppr must be positive, got {}",
                nav.encoder_ppr
            )));
        }
        if nav.path_planning.grid_resolution <= 0.0 {
            return Err(NavError::Config(
                "navigation.path_planning.grid_resolution must be positive".into(),
            ));
        }
        if nav.path_planning.obstacle_padding < 0.0 {
            return Err(NavError::Config(
                "navigation.path_planning.obstacle_padding must not be negative".into(),
            ));
        }
        if nav.missions.mowing.brush_width <= nav.missions.mowing.overlap {
            return Err(NavError::Config(format!(
                "mowing.brush_width ({}) must exceed mowing.overlap ({})",
                nav.missions.mowing.brush_width, nav.missions.mowing.overlap
            )));
        }

        for (i, p) in nav.boundary_coordinates.iter().enumerate() {
            let geo: GeodeticPoint = (*p).into();
            if !geo.is_valid() {
                return Err(NavError::Config(format!(
                    "navigation.boundary_coordinates[{}] is out of range: ({}, {})",
                    i, p.latitude, p.longitude
                )));
            }
        }

        // The supervisor's collision threshold is the hard value; the DWA
        // clearance setpoint must not undercut it.
        let hard = self.safety.collision_detection.distance_threshold;
        let soft = self.dynamic_obstacle_avoidance.dwa.emergency_brake_distance;
        if hard > soft {
            return Err(NavError::Config(format!(
                "safety.collision_detection.distance_threshold ({}) must be <= \
                 dynamic_obstacle_avoidance.dwa.emergency_brake_distance ({})",
                hard, soft
            )));
        }

        // Pin ownership: the motor section is authoritative. A disagreeing
        // legacy sensor block is a deployment mistake worth refusing.
        if let (Some(motors), Some(sensors)) = (&self.motors, &self.sensors) {
            if let (Some(wheel_pins), Some(sensor_pins)) = (&motors.wheels, &sensors.encoder) {
                if wheel_pins != sensor_pins {
                    return Err(NavError::Config(format!(
                        "encoder pin conflict: motors.wheels says ({}, {}) but \
                         sensors.enkoder says ({}, {})",
                        wheel_pins.left_pin,
                        wheel_pins.right_pin,
                        sensor_pins.left_pin,
                        sensor_pins.right_pin
                    )));
                }
            }
        }

        let det = &self.charging.apriltag.detection;
        if det.min_marker_perimeter_rate >= det.max_marker_perimeter_rate {
            return Err(NavError::Config(
                "apriltag.detection perimeter rate bounds are inverted".into(),
            ));
        }

        let tol = &self.charging.apriltag.tolerances;
        if tol.precise_distance >= tol.target_distance {
            return Err(NavError::Config(format!(
                "apriltag.tolerances: hassas_mesafe ({}) must be below hedef_mesafe ({})",
                tol.precise_distance, tol.target_distance
            )));
        }

        Ok(())
    }
}

fn toml_err<E: std::fmt::Display>(e: E) -> NavError {
    NavError::Config(e.to_string())
}

/// Recursively merge `overlay` into `base` (tables merge, scalars replace).
fn merge_toml(base: &mut toml::Value, overlay: toml::Value) {
    match (base, overlay) {
        (toml::Value::Table(base_table), toml::Value::Table(overlay_table)) => {
            for (key, value) in overlay_table {
                match base_table.get_mut(&key) {
                    Some(existing) => merge_toml(existing, value),
                    None => {
                        base_table.insert(key, value);
                    }
                }
            }
        }
        (slot, value) => *slot = value,
    }
}

// Default value functions

fn default_robot_name() -> String {
    "meadow".to_string()
}
fn default_robot_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}
fn default_wheel_diameter() -> f32 {
    0.065
}
fn default_wheel_base() -> f32 {
    0.235
}
fn default_encoder_ppr() -> f32 {
    1000.0
}
fn default_process_noise() -> f32 {
    0.1
}
fn default_measurement_noise() -> f32 {
    0.5
}
fn default_gyro_blend_weight() -> f32 {
    0.9
}
fn default_hdop_bound() -> f32 {
    3.0
}
fn default_outlier_gate() -> f32 {
    5.0
}
fn default_grid_resolution() -> f32 {
    0.1
}
fn default_obstacle_padding() -> f32 {
    0.2
}
fn default_grid_margin() -> f32 {
    1.0
}
fn default_inflation_metric() -> InflationMetric {
    InflationMetric::Euclidean
}
fn default_max_waypoint_step() -> f32 {
    0.5
}
fn default_inflated_cell_penalty() -> f32 {
    3.0
}
fn default_mowing_overlap() -> f32 {
    0.1
}
fn default_mowing_speed() -> f32 {
    0.3
}
fn default_brush_width() -> f32 {
    0.25
}
fn default_battery_low_threshold() -> f32 {
    20.0
}
fn default_battery_full_threshold() -> f32 {
    95.0
}
fn default_buffer_distance() -> f32 {
    0.5
}
fn default_warning_distance() -> f32 {
    1.0
}
fn default_max_deviation() -> f32 {
    0.3
}
fn default_check_frequency() -> f32 {
    1.0
}
fn default_dock_latitude() -> f64 {
    39.9334
}
fn default_dock_longitude() -> f64 {
    32.8597
}
fn default_accuracy_radius() -> f32 {
    3.0
}
fn default_precise_approach_distance() -> f32 {
    0.5
}
fn default_medium_distance_threshold() -> f32 {
    10.0
}
fn default_apriltag_detection_range() -> f32 {
    0.5
}
fn default_speed_normal() -> f32 {
    0.2
}
fn default_speed_slow() -> f32 {
    0.1
}
fn default_speed_very_slow() -> f32 {
    0.05
}
fn default_speed_ultra_slow() -> f32 {
    0.02
}
fn default_speed_precise() -> f32 {
    0.03
}
fn default_tag_size() -> f32 {
    0.08
}
fn default_camera_matrix() -> [[f32; 3]; 3] {
    [[640.0, 0.0, 320.0], [0.0, 640.0, 240.0], [0.0, 0.0, 1.0]]
}
fn default_distortion() -> [f32; 5] {
    [0.0; 5]
}
fn default_min_confidence() -> f32 {
    0.6
}
fn default_max_detection_distance() -> f32 {
    3.0
}
fn default_min_perimeter_rate() -> f32 {
    0.03
}
fn default_max_perimeter_rate() -> f32 {
    4.0
}
fn default_target_distance() -> f32 {
    0.25
}
fn default_precise_distance() -> f32 {
    0.08
}
fn default_angle_tolerance_deg() -> f32 {
    5.0
}
fn default_position_tolerance() -> f32 {
    0.02
}
fn default_family_bits() -> u32 {
    6
}
fn default_family_codewords() -> Vec<u64> {
    // Leading codewords of the 36h11 dictionary printed on the dock plates
    vec![
        0x0000000d5d628584,
        0x0000000d97f18b49,
        0x0000000dd280910e,
        0x0000000e479e9c98,
    ]
}
fn default_family_min_hamming() -> u32 {
    2
}
fn default_tracking_history() -> usize {
    5
}
fn default_obstacle_timeout() -> f32 {
    1.0
}
fn default_rotation_speed() -> f32 {
    0.3
}
fn default_search_timeout() -> f32 {
    30.0
}
fn default_lost_timeout() -> f32 {
    2.0
}
fn default_contact_timeout() -> f32 {
    15.0
}
fn default_retry_budget() -> u32 {
    3
}
fn default_charge_current() -> f32 {
    0.1
}
fn default_contact_voltage() -> f32 {
    11.0
}
fn default_confirm_samples() -> u32 {
    5
}
fn default_bumper_hold_time() -> f32 {
    1.0
}
fn default_max_tilt_angle() -> f32 {
    30.0
}
fn default_tilt_warning_threshold() -> f32 {
    0.7
}
fn default_tilt_debounce() -> f32 {
    1.0
}
fn default_watchdog_timeout() -> f32 {
    0.5
}
fn default_collision_distance() -> f32 {
    0.3
}
fn default_min_battery_voltage() -> f32 {
    10.5
}
fn default_rapid_drain() -> f32 {
    5.0
}
fn default_max_current_draw() -> f32 {
    5.0
}
fn default_velocity_resolution() -> f32 {
    0.05
}
fn default_angular_resolution() -> f32 {
    0.1
}
fn default_time_horizon() -> f32 {
    2.0
}
fn default_dwa_dt() -> f32 {
    0.1
}
fn default_emergency_brake_distance() -> f32 {
    0.5
}
fn default_weight_heading() -> f32 {
    1.0
}
fn default_weight_obstacle() -> f32 {
    2.0
}
fn default_weight_velocity() -> f32 {
    0.5
}
fn default_weight_smoothness() -> f32 {
    0.3
}
fn default_robot_radius() -> f32 {
    0.3
}
fn default_max_linear_speed() -> f32 {
    0.5
}
fn default_max_angular_speed() -> f32 {
    1.0
}
fn default_max_linear_accel() -> f32 {
    0.5
}
fn default_max_angular_accel() -> f32 {
    1.0
}
fn default_mode_normal() -> ModeProfile {
    ModeProfile {
        speed_factor: 1.0,
        safety_factor: 1.0,
    }
}
fn default_mode_conservative() -> ModeProfile {
    ModeProfile {
        speed_factor: 0.5,
        safety_factor: 1.5,
    }
}
fn default_mode_aggressive() -> ModeProfile {
    ModeProfile {
        speed_factor: 1.2,
        safety_factor: 0.8,
    }
}
fn default_mode_emergency() -> ModeProfile {
    ModeProfile {
        speed_factor: 0.0,
        safety_factor: 2.0,
    }
}
fn default_max_replanning_frequency() -> f32 {
    0.5
}
fn default_stuck_detection_limit() -> u32 {
    10
}
fn default_waypoint_tolerance() -> f32 {
    0.2
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn test_ticks_per_meter_derivation() {
        let config = Config::default();
        // ppr 1000, wheel diameter 0.065 -> one rev is 0.2042m
        let tpm = config.ticks_per_meter();
        assert!((tpm - 4897.0).abs() < 1.0, "got {}", tpm);
    }

    #[test]
    fn test_rejects_nonpositive_wheel_base() {
        let mut config = Config::default();
        config.navigation.wheel_base = 0.0;
        assert!(matches!(config.validate(), Err(NavError::Config(_))));
    }

    #[test]
    fn test_rejects_brake_distance_inversion() {
        let mut config = Config::default();
        config.safety.collision_detection.distance_threshold = 1.0;
        config.dynamic_obstacle_avoidance.dwa.emergency_brake_distance = 0.5;
        assert!(matches!(config.validate(), Err(NavError::Config(_))));
    }

    #[test]
    fn test_rejects_encoder_pin_conflict() {
        let mut config = Config::default();
        config.motors = Some(MotorsConfig {
            wheels: Some(EncoderPins {
                left_pin: 17,
                right_pin: 18,
            }),
        });
        config.sensors = Some(SensorsConfig {
            encoder: Some(EncoderPins {
                left_pin: 22,
                right_pin: 23,
            }),
        });
        assert!(matches!(config.validate(), Err(NavError::Config(_))));

        // Agreeing sections are fine
        config.sensors = Some(SensorsConfig {
            encoder: Some(EncoderPins {
                left_pin: 17,
                right_pin: 18,
            }),
        });
        config.validate().unwrap();
    }

    #[test]
    fn test_rejects_bad_boundary_coordinate() {
        let mut config = Config::default();
        config.navigation.boundary_coordinates = vec![BoundaryPoint {
            latitude: 95.0,
            longitude: 10.0,
        }];
        assert!(matches!(config.validate(), Err(NavError::Config(_))));
    }

    #[test]
    fn test_parse_legacy_key_names() {
        let toml_src = r#"
            [charging.power_sensor]
            sarj_akimi_esigi = 0.25
            baglanti_voltaj_esigi = 12.5

            [charging.apriltag]
            sarj_istasyonu_tag_id = 7
            tag_boyutu = 0.1

            [charging.apriltag.tolerances]
            hedef_mesafe = 0.3
            hassas_mesafe = 0.05
            aci_toleransi = 4.0
            pozisyon_toleransi = 0.015
        "#;
        let config: Config = toml::from_str(toml_src).unwrap();
        assert_eq!(config.charging.power_sensor.charge_current_threshold, 0.25);
        assert_eq!(config.charging.apriltag.station_tag_id, 7);
        assert_eq!(config.charging.apriltag.tolerances.precise_distance, 0.05);
        assert!(
            (config.charging.apriltag.tolerances.angle_tolerance_rad() - 4.0f32.to_radians())
                .abs()
                < 1e-6
        );
    }

    #[test]
    fn test_override_merge() {
        use std::io::Write;
        let dir = std::env::temp_dir().join("meadow-config-test");
        std::fs::create_dir_all(&dir).unwrap();
        let base = dir.join("base.toml");
        let env = dir.join("env.toml");

        let mut f = std::fs::File::create(&base).unwrap();
        writeln!(
            f,
            "[navigation]\nwheel_base = 0.235\n[robot]\nname = \"base\""
        )
        .unwrap();
        let mut f = std::fs::File::create(&env).unwrap();
        writeln!(f, "[robot]\nname = \"field-unit\"").unwrap();

        let config = Config::load_with_overrides(&base, Some(&env)).unwrap();
        assert_eq!(config.robot.name, "field-unit");
        assert_eq!(config.navigation.wheel_base, 0.235);
    }
}

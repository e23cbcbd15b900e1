//! Whole-stack integration: spawn every thread against closed-loop mock
//! ports and exercise the operator boundary.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use meadow_io::clock::monotonic_ns;
use meadow_io::health::PortHealth;
use meadow_io::ports::{
    CameraSource, DifferentialDrive, DigitalInputs, DiscreteInputs, Encoders, Gnss, Imu, Outputs,
    PortSet, PowerSensor,
};
use meadow_io::types::{
    BatteryState, CameraFrame, EncoderTicks, GatedCommand, GnssFix, FixQuality, ImuSample,
    PowerReading, Velocity2D,
};
use meadow_nav::config::{BoundaryPoint, Config};
use meadow_nav::shared::SharedState;
use meadow_nav::threads::spawn_threads;

/// Crude drivetrain model shared between the drive and encoder mocks.
struct SimCore {
    velocity: Velocity2D,
    left_m: f64,
    right_m: f64,
    last_update: Instant,
    last_token: u64,
    saw_nonzero: bool,
    estop_pressed: bool,
}

impl SimCore {
    fn integrate(&mut self, wheel_base: f64) {
        let dt = self.last_update.elapsed().as_secs_f64();
        self.last_update = Instant::now();
        let v = self.velocity.linear as f64;
        let w = self.velocity.angular as f64;
        self.left_m += (v - w * wheel_base / 2.0) * dt;
        self.right_m += (v + w * wheel_base / 2.0) * dt;
    }
}

type Core = Arc<Mutex<SimCore>>;

struct MockDrive {
    core: Core,
}

impl DifferentialDrive for MockDrive {
    fn apply(&mut self, command: &GatedCommand) -> meadow_io::Result<()> {
        let mut core = self.core.lock().unwrap();
        // Tokens must strictly increase; reuse means a bypassed supervisor
        assert!(
            command.token.0 > core.last_token,
            "token reuse: {} after {}",
            command.token.0,
            core.last_token
        );
        core.last_token = command.token.0;
        core.velocity = command.command.velocity;
        if !command.command.velocity.is_zero() {
            core.saw_nonzero = true;
        }
        Ok(())
    }

    fn health(&self) -> PortHealth {
        PortHealth::ok_now()
    }
}

struct MockEncoders {
    core: Core,
    ticks_per_meter: f64,
    wheel_base: f64,
}

impl Encoders for MockEncoders {
    fn ticks(&mut self) -> meadow_io::Result<EncoderTicks> {
        let mut core = self.core.lock().unwrap();
        core.integrate(self.wheel_base);
        Ok(EncoderTicks::new(
            (core.left_m * self.ticks_per_meter) as i64 as u16,
            (core.right_m * self.ticks_per_meter) as i64 as u16,
            monotonic_ns(),
        ))
    }

    fn health(&self) -> PortHealth {
        PortHealth::ok_now()
    }
}

struct MockImu;

impl Imu for MockImu {
    fn sample(&mut self) -> meadow_io::Result<ImuSample> {
        Ok(ImuSample {
            timestamp_monotonic: monotonic_ns(),
            ..Default::default()
        })
    }

    fn health(&self) -> PortHealth {
        PortHealth::ok_now()
    }
}

struct MockGnss {
    sent_anchor: bool,
}

impl Gnss for MockGnss {
    fn fix(&mut self) -> meadow_io::Result<Option<GnssFix>> {
        if self.sent_anchor {
            return Ok(None);
        }
        self.sent_anchor = true;
        Ok(Some(GnssFix {
            latitude: 39.9334,
            longitude: 32.8597,
            quality: FixQuality::Fix3D,
            hdop: 1.0,
            timestamp_monotonic: monotonic_ns(),
        }))
    }

    fn health(&self) -> PortHealth {
        PortHealth::ok_now()
    }
}

struct MockCamera;

impl CameraSource for MockCamera {
    fn frame(&mut self) -> meadow_io::Result<Option<CameraFrame>> {
        Ok(None)
    }

    fn health(&self) -> PortHealth {
        PortHealth::ok_now()
    }
}

struct MockPower;

impl PowerSensor for MockPower {
    fn battery(&mut self) -> meadow_io::Result<BatteryState> {
        Ok(BatteryState {
            voltage: 12.5,
            current: 1.0,
            soc_percent: 80.0,
            ..Default::default()
        })
    }

    fn dock_bus(&mut self) -> meadow_io::Result<PowerReading> {
        Ok(PowerReading::default())
    }

    fn health(&self) -> PortHealth {
        PortHealth::ok_now()
    }
}

struct MockInputs {
    core: Core,
}

impl DigitalInputs for MockInputs {
    fn read(&mut self) -> meadow_io::Result<DiscreteInputs> {
        let core = self.core.lock().unwrap();
        Ok(DiscreteInputs {
            estop: core.estop_pressed,
            ..Default::default()
        })
    }

    fn health(&self) -> PortHealth {
        PortHealth::ok_now()
    }
}

struct MockOutputs {
    buzzed: Arc<AtomicBool>,
}

impl Outputs for MockOutputs {
    fn set_blade(&mut self, _enabled: bool) -> meadow_io::Result<()> {
        Ok(())
    }

    fn buzz(&mut self, _duration_ms: u32) -> meadow_io::Result<()> {
        self.buzzed.store(true, Ordering::Release);
        Ok(())
    }

    fn health(&self) -> PortHealth {
        PortHealth::ok_now()
    }
}

fn test_config() -> Config {
    let mut config = Config::default();
    // ~40 m square work area around the anchor fix
    config.navigation.boundary_coordinates = vec![
        BoundaryPoint {
            latitude: 39.93322,
            longitude: 32.85946,
        },
        BoundaryPoint {
            latitude: 39.93358,
            longitude: 32.85946,
        },
        BoundaryPoint {
            latitude: 39.93358,
            longitude: 32.85994,
        },
        BoundaryPoint {
            latitude: 39.93322,
            longitude: 32.85994,
        },
    ];
    config
}

fn build_stack() -> (Core, Arc<AtomicBool>, PortSet, Config) {
    let config = test_config();
    let core: Core = Arc::new(Mutex::new(SimCore {
        velocity: Velocity2D::default(),
        left_m: 1.0,
        right_m: 1.0,
        last_update: Instant::now(),
        last_token: 0,
        saw_nonzero: false,
        estop_pressed: false,
    }));
    let buzzed = Arc::new(AtomicBool::new(false));

    let ports = PortSet {
        drive: Box::new(MockDrive {
            core: Arc::clone(&core),
        }),
        encoders: Box::new(MockEncoders {
            core: Arc::clone(&core),
            ticks_per_meter: config.ticks_per_meter() as f64,
            wheel_base: config.navigation.wheel_base as f64,
        }),
        imu: Box::new(MockImu),
        gnss: Box::new(MockGnss { sent_anchor: false }),
        camera: Box::new(MockCamera),
        power: Box::new(MockPower),
        inputs: Box::new(MockInputs {
            core: Arc::clone(&core),
        }),
        outputs: Box::new(MockOutputs {
            buzzed: Arc::clone(&buzzed),
        }),
    };

    (core, buzzed, ports, config)
}

fn wait_until<F: Fn() -> bool>(what: &str, timeout: Duration, predicate: F) {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if predicate() {
            return;
        }
        std::thread::sleep(Duration::from_millis(25));
    }
    panic!("timed out waiting for {}", what);
}

#[test]
fn test_stack_boots_anchors_and_mows() {
    let (core, _buzzed, ports, config) = build_stack();
    let shared = Arc::new(SharedState::new());
    let handles = spawn_threads(config, Arc::clone(&shared), ports).unwrap();
    let operator = handles.operator.clone();

    // Boot: status published, frame anchored from the first fix
    wait_until("status snapshot", Duration::from_secs(3), || {
        operator.get_status().is_some()
    });
    wait_until("frame anchor", Duration::from_secs(3), || {
        shared.frame().is_some()
    });
    assert_eq!(operator.get_status().unwrap().mission_state, "IDLE");

    // Start mowing: the planner must eventually drive the wheels
    let events = operator.stream_events();
    operator.start_mowing();
    wait_until("MOWING state", Duration::from_secs(3), || {
        operator
            .get_status()
            .map(|s| s.mission_state == "MOWING")
            .unwrap_or(false)
    });
    wait_until("forward motion", Duration::from_secs(5), || {
        core.lock().unwrap().saw_nonzero
    });

    // The event stream carried the transition
    let mut saw_transition = false;
    while let Ok(event) = events.try_recv() {
        if let meadow_nav::mission::StatusEvent::StateChanged { to, .. } = event {
            if to == "MOWING" {
                saw_transition = true;
            }
        }
    }
    assert!(saw_transition, "no MOWING transition on the event stream");

    operator.halt();
    wait_until("shutdown", Duration::from_secs(3), || {
        shared.should_shutdown()
    });
    handles.mission.join().unwrap();
    handles.planner.join().unwrap();
    handles.vision.join().unwrap();
    handles.sensor.join().unwrap();
    handles.supervisor.join().unwrap();
}

#[test]
fn test_estop_brakes_and_reset_recovers() {
    let (core, buzzed, ports, config) = build_stack();
    let shared = Arc::new(SharedState::new());
    let handles = spawn_threads(config, Arc::clone(&shared), ports).unwrap();
    let operator = handles.operator.clone();

    wait_until("frame anchor", Duration::from_secs(3), || {
        shared.frame().is_some()
    });
    operator.start_mowing();
    wait_until("forward motion", Duration::from_secs(5), || {
        core.lock().unwrap().saw_nonzero
    });

    // E-stop: the wheels must be braked and the mission errored
    operator.emergency_stop();
    wait_until("latch", Duration::from_secs(2), || {
        shared.safety_latched.load(Ordering::Acquire)
    });
    wait_until("ERROR state", Duration::from_secs(2), || {
        operator
            .get_status()
            .map(|s| s.mission_state == "ERROR")
            .unwrap_or(false)
    });
    std::thread::sleep(Duration::from_millis(100));
    assert!(core.lock().unwrap().velocity.is_zero(), "wheels not braked");
    assert!(buzzed.load(Ordering::Acquire), "no audible alarm");

    // Manual reset recovers to Idle
    operator.reset_emergency();
    wait_until("latch cleared", Duration::from_secs(2), || {
        !shared.safety_latched.load(Ordering::Acquire)
    });
    wait_until("IDLE state", Duration::from_secs(2), || {
        operator
            .get_status()
            .map(|s| s.mission_state == "IDLE")
            .unwrap_or(false)
    });

    operator.halt();
    wait_until("shutdown", Duration::from_secs(3), || {
        shared.should_shutdown()
    });
    handles.mission.join().unwrap();
    handles.planner.join().unwrap();
    handles.vision.join().unwrap();
    handles.sensor.join().unwrap();
    handles.supervisor.join().unwrap();
}

//! Battery and power sensing types
//!
//! Two current-sense channels exist: one on the battery bus (everything the
//! vehicle draws) and one on the dock-contact bus (only flows when the
//! charging contacts are mated). Charge confirmation keys off the dock bus.

/// Reading from one current-sense channel.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PowerReading {
    /// Bus voltage in volts
    pub voltage: f32,
    /// Bus current in amps
    pub current: f32,
    /// Monotonic timestamp of the reading (ns)
    pub timestamp_monotonic: u64,
}

/// Aggregate battery state published by the sensor thread.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BatteryState {
    /// Battery bus voltage (V)
    pub voltage: f32,
    /// Battery bus current draw (A)
    pub current: f32,
    /// State-of-charge estimate (0-100%)
    pub soc_percent: f32,
    /// Dock-contact bus reading
    pub dock_bus: PowerReading,
    /// Debounced charging flag (dock bus above thresholds for N samples)
    pub charging: bool,
}

impl BatteryState {
    /// Instantaneous power drawn from the battery (watts).
    pub fn power(&self) -> f32 {
        self.voltage * self.current.abs()
    }
}

impl Default for BatteryState {
    fn default() -> Self {
        Self {
            voltage: 0.0,
            current: 0.0,
            soc_percent: 0.0,
            dock_bus: PowerReading::default(),
            charging: false,
        }
    }
}

/// Debouncer for the charging flag.
///
/// The flag goes true only after the dock bus shows current and voltage
/// above threshold for `required_samples` consecutive readings, and false
/// again on the first reading below either threshold.
#[derive(Debug)]
pub struct ChargeDetector {
    current_threshold: f32,
    voltage_threshold: f32,
    required_samples: u32,
    consecutive: u32,
}

impl ChargeDetector {
    pub fn new(current_threshold: f32, voltage_threshold: f32, required_samples: u32) -> Self {
        Self {
            current_threshold,
            voltage_threshold,
            required_samples,
            consecutive: 0,
        }
    }

    /// Feed one dock-bus reading; returns the debounced charging flag.
    pub fn update(&mut self, dock_bus: &PowerReading) -> bool {
        if dock_bus.current > self.current_threshold && dock_bus.voltage > self.voltage_threshold {
            self.consecutive = self.consecutive.saturating_add(1);
        } else {
            self.consecutive = 0;
        }
        self.consecutive >= self.required_samples
    }

    /// Reset the debounce counter (e.g. on undock).
    pub fn reset(&mut self) {
        self.consecutive = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reading(voltage: f32, current: f32) -> PowerReading {
        PowerReading {
            voltage,
            current,
            timestamp_monotonic: 0,
        }
    }

    #[test]
    fn test_charge_confirm_needs_consecutive_samples() {
        let mut det = ChargeDetector::new(0.1, 11.0, 3);

        assert!(!det.update(&reading(12.0, 0.5)));
        assert!(!det.update(&reading(12.0, 0.5)));
        assert!(det.update(&reading(12.0, 0.5)));
    }

    #[test]
    fn test_charge_confirm_resets_on_dropout() {
        let mut det = ChargeDetector::new(0.1, 11.0, 3);

        det.update(&reading(12.0, 0.5));
        det.update(&reading(12.0, 0.5));
        // One bad sample resets the count
        assert!(!det.update(&reading(12.0, 0.05)));
        assert!(!det.update(&reading(12.0, 0.5)));
        assert!(!det.update(&reading(12.0, 0.5)));
        assert!(det.update(&reading(12.0, 0.5)));
    }

    #[test]
    fn test_both_thresholds_required() {
        let mut det = ChargeDetector::new(0.1, 11.0, 1);

        // Current present but voltage low: contacts are arcing, not mated
        assert!(!det.update(&reading(9.0, 0.5)));
        // Voltage present but no current: mated but charger off
        assert!(!det.update(&reading(12.0, 0.0)));
        assert!(det.update(&reading(12.0, 0.5)));
    }
}

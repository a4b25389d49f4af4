//! Radio power states and energy accounting.

use crate::simulation::types::Cycle;

/// Supply voltage used to turn charge into energy.
pub const SUPPLY_VOLTS: f64 = 3.0;

const OFF_AMPERES: f64 = 0.000_000_02;
const POWER_DOWN_AMPERES: f64 = 0.000_020;
const IDLE_AMPERES: f64 = 0.000_426;
const RECEIVE_AMPERES: f64 = 0.0188;

/// Transmit current draw indexed by PA level.
const TRANSMIT_AMPERES: [f64; 32] = [
    0.0073421, 0.0077405, 0.0081261, 0.0085000, 0.0088632, 0.0092169, 0.0095621, 0.0099000, 0.0102316, 0.0105581,
    0.0108805, 0.0112000, 0.0115181, 0.0118382, 0.0121642, 0.0125000, 0.0128476, 0.0132016, 0.0135549, 0.0139000,
    0.0142321, 0.0145552, 0.0148758, 0.0152000, 0.0155318, 0.0158649, 0.0161906, 0.0165000, 0.0167844, 0.0170351,
    0.0172432, 0.0174000,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RadioMode {
    Off,
    PowerDown,
    Idle,
    Receive,
    /// Transmitting at the given PA level (0..=31).
    Transmit(u8),
}

impl RadioMode {
    pub fn amperes(self) -> f64 {
        match self {
            RadioMode::Off => OFF_AMPERES,
            RadioMode::PowerDown => POWER_DOWN_AMPERES,
            RadioMode::Idle => IDLE_AMPERES,
            RadioMode::Receive => RECEIVE_AMPERES,
            RadioMode::Transmit(level) => TRANSMIT_AMPERES[(level as usize).min(TRANSMIT_AMPERES.len() - 1)],
        }
    }

    fn slot(self) -> usize {
        match self {
            RadioMode::Off => 0,
            RadioMode::PowerDown => 1,
            RadioMode::Idle => 2,
            RadioMode::Receive => 3,
            RadioMode::Transmit(_) => 4,
        }
    }
}

/// Notified on every radio power state transition.
pub trait StateObserver: Send {
    fn mode_changed(&mut self, time: Cycle, from: RadioMode, to: RadioMode);
}

/// Per-mode residency and charge drawn by one radio.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct EnergySummary {
    /// Seconds spent in off, power down, idle, receive and transmit.
    pub seconds: [f64; 5],
    pub coulombs: f64,
}

impl EnergySummary {
    pub fn joules(&self) -> f64 {
        self.coulombs * SUPPLY_VOLTS
    }

    pub fn receive_seconds(&self) -> f64 {
        self.seconds[RadioMode::Receive.slot()]
    }

    pub fn transmit_seconds(&self) -> f64 {
        self.seconds[RadioMode::Transmit(0).slot()]
    }
}

#[derive(Debug, Clone)]
pub struct EnergyMeter {
    hz: u64,
    mode: RadioMode,
    since: Cycle,
    summary: EnergySummary,
}

impl EnergyMeter {
    pub fn new(hz: u64, mode: RadioMode) -> Self {
        EnergyMeter {
            hz,
            mode,
            since: 0,
            summary: EnergySummary::default(),
        }
    }

    pub fn mode(&self) -> RadioMode {
        self.mode
    }

    fn accumulate(&mut self, until: Cycle) {
        let seconds = until.saturating_sub(self.since) as f64 / self.hz as f64;
        self.summary.seconds[self.mode.slot()] += seconds;
        self.summary.coulombs += seconds * self.mode.amperes();
        self.since = until;
    }

    /// Totals including the time spent in the current mode up to `now`.
    pub fn summary(&self, now: Cycle) -> EnergySummary {
        let mut meter = self.clone();
        meter.accumulate(now);
        meter.summary
    }
}

impl StateObserver for EnergyMeter {
    fn mode_changed(&mut self, time: Cycle, _from: RadioMode, to: RadioMode) {
        self.accumulate(time);
        self.mode = to;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transmit_draw_grows_with_power_level() {
        assert!((RadioMode::Transmit(0).amperes() - 0.0073421).abs() < 1e-12);
        assert!((RadioMode::Transmit(31).amperes() - 0.0174).abs() < 1e-12);
        assert!(TRANSMIT_AMPERES.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(RadioMode::Transmit(200).amperes(), RadioMode::Transmit(31).amperes());
    }

    #[test]
    fn meter_splits_time_between_modes() {
        let hz = 1_000_000;
        let mut meter = EnergyMeter::new(hz, RadioMode::PowerDown);
        meter.mode_changed(1_000_000, RadioMode::PowerDown, RadioMode::Receive);
        meter.mode_changed(3_000_000, RadioMode::Receive, RadioMode::Transmit(31));
        let summary = meter.summary(3_500_000);

        assert!((summary.seconds[1] - 1.0).abs() < 1e-9);
        assert!((summary.receive_seconds() - 2.0).abs() < 1e-9);
        assert!((summary.transmit_seconds() - 0.5).abs() < 1e-9);
        let expected = POWER_DOWN_AMPERES + 2.0 * RECEIVE_AMPERES + 0.5 * 0.0174;
        assert!((summary.coulombs - expected).abs() < 1e-12);
        assert!((summary.joules() - expected * SUPPLY_VOLTS).abs() < 1e-12);
        // Reading a summary does not disturb the meter.
        assert_eq!(meter.mode(), RadioMode::Transmit(31));
        assert!((meter.summary(3_500_000).coulombs - expected).abs() < 1e-12);
    }
}

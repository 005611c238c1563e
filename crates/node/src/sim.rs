//! Stateful room-sensor simulator for local development.
//!
//! Models plausible indoor behaviour:
//! - Temperature and humidity evolve by random walk with mean reversion
//! - Smoke sits near a clean-air baseline with occasional short spikes
//! - Motion is a random on/off with realistic duty cycle

/// One simulated reading across all channels.
#[derive(Debug, Clone, Copy)]
pub struct RoomSample {
    pub temperature: f64,
    pub humidity: f64,
    pub smoke: f64,
    pub motion: bool,
}

pub struct RoomSim {
    temperature: f64,
    humidity: f64,
    smoke: f64,
    /// Remaining ticks of an active smoke spike.
    spike_ticks: u32,
}

// Mean-reversion centres and walk parameters, tuned for readings every few
// minutes in an office-like room.
const TEMP_CENTER: f64 = 24.0;
const HUMIDITY_CENTER: f64 = 60.0;
const SMOKE_BASELINE: f64 = 8.0;
const SPIKE_PROB: f32 = 0.02;

impl RoomSim {
    pub fn new() -> Self {
        Self {
            temperature: TEMP_CENTER + walk(2.0),
            humidity: HUMIDITY_CENTER + walk(8.0),
            smoke: SMOKE_BASELINE,
            spike_ticks: 0,
        }
    }

    /// Produce the next reading. Internal state evolves with each call.
    pub fn sample(&mut self) -> RoomSample {
        self.temperature += 0.05 * (TEMP_CENTER - self.temperature) + walk(0.3);
        self.temperature = self.temperature.clamp(10.0, 45.0);

        self.humidity += 0.05 * (HUMIDITY_CENTER - self.humidity) + walk(1.5);
        self.humidity = self.humidity.clamp(20.0, 95.0);

        if self.spike_ticks > 0 {
            self.spike_ticks -= 1;
            self.smoke = (self.smoke + walk(10.0)).clamp(60.0, 200.0);
        } else if fastrand::f32() < SPIKE_PROB {
            self.spike_ticks = fastrand::u32(2..6);
            self.smoke = 60.0 + fastrand::f64() * 60.0;
        } else {
            self.smoke = (SMOKE_BASELINE + walk(3.0)).clamp(0.0, 30.0);
        }

        RoomSample {
            temperature: round1(self.temperature),
            humidity: round1(self.humidity),
            smoke: round1(self.smoke),
            motion: fastrand::f32() < 0.15,
        }
    }
}

impl Default for RoomSim {
    fn default() -> Self {
        Self::new()
    }
}

/// Uniform step in [-sigma, sigma].
fn walk(sigma: f64) -> f64 {
    (fastrand::f64() * 2.0 - 1.0) * sigma
}

fn round1(v: f64) -> f64 {
    (v * 10.0).round() / 10.0
}

// ===========================================================================
// Tests
// ===========================================================================

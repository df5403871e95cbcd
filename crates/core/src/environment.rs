// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Per-node continuous environment state and the step function that
//! advances it under actuator influence.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

/// Window position of a node's vent/window actuator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum WindowState {
    Closed,
    Half,
    Open,
}

impl WindowState {
    /// Parses a wire-level window level string, case-insensitively.
    /// Returns `None` for anything other than `CLOSED`/`HALF`/`OPEN` — the
    /// caller decides what to do with an invalid level (per the spec,
    /// silently drop the command and still ack).
    #[must_use]
    pub fn parse(level: &str) -> Option<Self> {
        match level.to_ascii_uppercase().as_str() {
            "CLOSED" => Some(Self::Closed),
            "HALF" => Some(Self::Half),
            "OPEN" => Some(Self::Open),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Closed => "CLOSED",
            Self::Half => "HALF",
            Self::Open => "OPEN",
        }
    }
}

/// Source of the small additive noise terms in the step function.
///
/// Production code uses `thread_rng`; tests inject a seeded source (or one
/// that always returns zero) so trends can be asserted without fighting
/// noise.
pub trait NoiseSource: Send {
    fn sample(&mut self, amplitude: f64) -> f64;
}

/// Uniform noise in `[-amplitude, amplitude]`, seeded for reproducibility.
pub struct SeededNoise {
    rng: StdRng,
}

impl SeededNoise {
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self { rng: StdRng::seed_from_u64(seed) }
    }
}

impl NoiseSource for SeededNoise {
    fn sample(&mut self, amplitude: f64) -> f64 {
        self.rng.gen_range(-amplitude..=amplitude)
    }
}

/// Unseeded noise backed by the thread-local RNG; used in production.
#[derive(Default)]
pub struct ThreadNoise;

impl NoiseSource for ThreadNoise {
    fn sample(&mut self, amplitude: f64) -> f64 {
        rand::thread_rng().gen_range(-amplitude..=amplitude)
    }
}

/// Noise source that always returns zero; used by tests that assert exact
/// trends rather than bounded ranges.
#[derive(Default)]
pub struct NoNoise;

impl NoiseSource for NoNoise {
    fn sample(&mut self, _amplitude: f64) -> f64 {
        0.0
    }
}

/// Per-node continuous environment state.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct EnvironmentState {
    pub temperature_c: f64,
    pub humidity_pct: f64,
    pub light_lux: i64,
    pub ph: f64,
    pub time_of_day_hours: f64,
}

impl Default for EnvironmentState {
    fn default() -> Self {
        Self { temperature_c: 22.0, humidity_pct: 55.0, light_lux: 420, ph: 6.4, time_of_day_hours: 12.0 }
    }
}

fn outside_temperature_c(time_of_day_hours: f64) -> f64 {
    // Sinusoid between 8 and 16 degC, peaking at 14:00.
    12.0 + 4.0 * ((std::f64::consts::PI / 12.0) * (time_of_day_hours - 14.0)).cos()
}

fn outside_light_lux(time_of_day_hours: f64) -> f64 {
    const DAYTIME_LIGHT_LUX: f64 = 80_000.0;
    if (6.0..18.0).contains(&time_of_day_hours) {
        let phase = std::f64::consts::PI * (time_of_day_hours - 6.0) / 12.0;
        (DAYTIME_LIGHT_LUX * phase.sin()).max(50.0)
    } else {
        50.0
    }
}

impl EnvironmentState {
    /// Advances the state by `dt_secs` seconds under the given actuator
    /// states. Never fails; out-of-range results are clamped silently.
    pub fn step(
        &mut self,
        dt_secs: f64,
        fan_on: bool,
        pump_on: bool,
        co2_on: bool,
        window: WindowState,
        noise: &mut dyn NoiseSource,
    ) {
        self.time_of_day_hours = (self.time_of_day_hours + dt_secs / 3600.0).rem_euclid(24.0);

        let outside_temp = outside_temperature_c(self.time_of_day_hours);
        let outside_light = outside_light_lux(self.time_of_day_hours);

        let window_temp_factor = match window {
            WindowState::Closed => 0.0,
            WindowState::Half => 0.05,
            WindowState::Open => 0.12,
        };
        let k = 0.03 + window_temp_factor + if fan_on { 0.07 } else { 0.0 };
        let co2_boost = if co2_on && self.temperature_c < outside_temp + 5.0 { 0.25 } else { 0.0 };
        let delta_t = (outside_temp - self.temperature_c) * k
            + co2_boost
            + (self.light_lux as f64 / 45_000.0) * 0.005
            + noise.sample(0.02);
        self.temperature_c += delta_t;

        let window_humidity_term = match window {
            WindowState::Closed => 0.0,
            WindowState::Half => -0.15,
            WindowState::Open => -0.30,
        };
        let delta_h = (if pump_on { 0.35 } else { -0.08 }
            + if fan_on { -0.20 } else { 0.0 }
            + window_humidity_term
            + (self.temperature_c - 20.0) * 0.02)
            * dt_secs
            + noise.sample(0.15);
        self.humidity_pct = (self.humidity_pct + delta_h).clamp(0.0, 100.0);

        let light_target = if matches!(window, WindowState::Closed) { 50.0 } else { outside_light };
        let light_factor = match window {
            WindowState::Closed => 0.01,
            WindowState::Half => 0.03,
            WindowState::Open => 0.05,
        };
        let delta_l = (light_target - self.light_lux as f64) * light_factor * dt_secs + noise.sample(5.0);
        self.light_lux = ((self.light_lux as f64 + delta_l).clamp(50.0, 50_000.0)).round() as i64;

        let delta_ph = (if pump_on { (7.0 - self.ph) * 0.05 } else { 0.0 }
            + if co2_on { (6.0 - self.ph) * 0.04 } else { 0.0 })
            * dt_secs
            + noise.sample(0.01);
        self.ph = (self.ph + delta_ph).clamp(0.0, 14.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_without_noise_keeps_invariant_bounds() {
        let mut state = EnvironmentState::default();
        let mut noise = NoNoise;
        for _ in 0..10_000 {
            state.step(1.0, true, true, true, WindowState::Open, &mut noise);
            assert!((0.0..=100.0).contains(&state.humidity_pct));
            assert!((50..=50_000).contains(&state.light_lux));
            assert!((0.0..=14.0).contains(&state.ph));
        }
    }

    #[test]
    fn pump_on_drives_humidity_up_without_noise() {
        let mut state = EnvironmentState::default();
        let mut noise = NoNoise;
        let before = state.humidity_pct;
        state.step(1.0, false, true, false, WindowState::Closed, &mut noise);
        assert!(state.humidity_pct > before);
    }

    #[test]
    fn time_of_day_wraps_at_24_hours() {
        let mut state = EnvironmentState { time_of_day_hours: 23.999_7, ..EnvironmentState::default() };
        let mut noise = NoNoise;
        state.step(3.0, false, false, false, WindowState::Closed, &mut noise);
        assert!(state.time_of_day_hours < 1.0);
    }

    #[test]
    fn window_parse_is_case_insensitive_and_rejects_garbage() {
        assert_eq!(WindowState::parse("half"), Some(WindowState::Half));
        assert_eq!(WindowState::parse("OPEN"), Some(WindowState::Open));
        assert_eq!(WindowState::parse("SIDEWAYS"), None);
    }

    #[test]
    fn seeded_noise_is_reproducible() {
        let mut a = SeededNoise::new(42);
        let mut b = SeededNoise::new(42);
        for _ in 0..20 {
            assert!((a.sample(1.0) - b.sample(1.0)).abs() < f64::EPSILON);
        }
    }
}

//! Demo Mode - synthetic tremor recordings
//!
//! Generates signal bundles shaped like the processing backend's output so
//! the streaming pipeline can run without the backend or recorded data.
//! The wrist angle is a slow voluntary movement plus a rest tremor that
//! comes and goes in bursts.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::BTreeMap;

use crate::api::ProcessingParameters;
use crate::signal::{SignalBundle, SignalError};

/// Envelope RMS window
const ENVELOPE_WINDOW_SECS: f64 = 0.2;

/// Generator settings
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TremorProfile {
    pub sampling_rate: u32,
    /// Rest tremor frequency (Parkinsonian tremor sits around 4-6 Hz)
    pub tremor_hz: f64,
    /// Peak tremor amplitude in degrees
    pub tremor_amplitude: f64,
    /// Voluntary movement frequency
    pub movement_hz: f64,
    /// Voluntary movement amplitude in degrees
    pub movement_amplitude: f64,
    /// Standard deviation of sensor noise in degrees
    pub noise: f64,
}

impl Default for TremorProfile {
    fn default() -> Self {
        Self {
            sampling_rate: 100,
            tremor_hz: 5.0,
            tremor_amplitude: 4.0,
            movement_hz: 0.3,
            movement_amplitude: 15.0,
            noise: 0.2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum BurstState {
    /// Tremor at its resting level
    Quiet { until: f64 },
    /// Tremor amplitude raised
    Burst { until: f64, gain: f64 },
}

/// Synthetic tremor generator
pub struct TremorSimulator {
    profile: TremorProfile,
    burst_state: BurstState,
    rng: StdRng,
}

impl Default for TremorSimulator {
    fn default() -> Self {
        Self::new(TremorProfile::default())
    }
}

impl TremorSimulator {
    pub fn new(profile: TremorProfile) -> Self {
        Self::with_rng(profile, StdRng::from_entropy())
    }

    /// Reproducible generator
    pub fn seeded(profile: TremorProfile, seed: u64) -> Self {
        Self::with_rng(profile, StdRng::seed_from_u64(seed))
    }

    fn with_rng(profile: TremorProfile, mut rng: StdRng) -> Self {
        let first_burst = rng.gen_range(1.0..3.0);
        Self {
            profile,
            burst_state: BurstState::Quiet { until: first_burst },
            rng,
        }
    }

    /// Generate `duration_secs` of data.
    ///
    /// Channels: `rawAngle`, `baseAngle`, `tremor`, `envelope`, `torque`
    /// (`G * (base + alpha * envelope * tremor)`), `wfeDisp` and
    /// `centeredTorque` (torque minus its mean).
    pub fn generate(
        &mut self,
        duration_secs: f64,
        parameters: &ProcessingParameters,
    ) -> Result<SignalBundle, SignalError> {
        let rate = self.profile.sampling_rate.max(1);
        let count = (duration_secs.max(0.0) * rate as f64).round() as usize;
        let dt = 1.0 / rate as f64;

        let mut time = Vec::with_capacity(count);
        let mut raw_angle = Vec::with_capacity(count);
        let mut base_angle = Vec::with_capacity(count);
        let mut tremor = Vec::with_capacity(count);

        let phase = self.rng.gen_range(0.0..std::f64::consts::TAU);
        for i in 0..count {
            let t = i as f64 * dt;
            let gain = self.update_burst_state(t);

            let base = self.profile.movement_amplitude
                * (std::f64::consts::TAU * self.profile.movement_hz * t).sin();
            let tremor_component = gain
                * self.profile.tremor_amplitude
                * (std::f64::consts::TAU * self.profile.tremor_hz * t + phase).sin();
            let noise = self.gaussian() * self.profile.noise;

            time.push(t);
            base_angle.push(base);
            tremor.push(tremor_component);
            raw_angle.push(base + tremor_component + noise);
        }

        let window = ((ENVELOPE_WINDOW_SECS * rate as f64) as usize).max(1);
        let envelope = moving_rms(&tremor, window);

        let torque: Vec<f64> = (0..count)
            .map(|i| parameters.gain * (base_angle[i] + parameters.alpha * envelope[i] * tremor[i]))
            .collect();
        let mean_torque = if count > 0 {
            torque.iter().sum::<f64>() / count as f64
        } else {
            0.0
        };
        let centered_torque = torque.iter().map(|v| v - mean_torque).collect();

        // Wrist flexion/extension displacement, millimetres at ~40 mm lever
        let wfe_disp = raw_angle.iter().map(|a| 40.0 * a.to_radians()).collect();

        let mut channels = BTreeMap::new();
        channels.insert("rawAngle".to_string(), raw_angle);
        channels.insert("baseAngle".to_string(), base_angle);
        channels.insert("tremor".to_string(), tremor);
        channels.insert("envelope".to_string(), envelope);
        channels.insert("torque".to_string(), torque);
        channels.insert("wfeDisp".to_string(), wfe_disp);
        channels.insert("centeredTorque".to_string(), centered_torque);

        SignalBundle::new(time, channels)
    }

    /// Advance the burst state machine; returns the tremor gain at `t`
    fn update_burst_state(&mut self, t: f64) -> f64 {
        match self.burst_state {
            BurstState::Quiet { until } if t >= until => {
                let length = self.rng.gen_range(1.5..4.0);
                let gain = self.rng.gen_range(1.2..2.0);
                self.burst_state = BurstState::Burst {
                    until: t + length,
                    gain,
                };
                gain
            }
            BurstState::Burst { until, .. } if t >= until => {
                let pause = self.rng.gen_range(2.0..6.0);
                self.burst_state = BurstState::Quiet { until: t + pause };
                1.0
            }
            BurstState::Quiet { .. } => 1.0,
            BurstState::Burst { gain, .. } => gain,
        }
    }

    /// Standard normal sample (Box-Muller)
    fn gaussian(&mut self) -> f64 {
        let u1: f64 = self.rng.gen_range(f64::EPSILON..1.0);
        let u2: f64 = self.rng.gen();
        (-2.0 * u1.ln()).sqrt() * (std::f64::consts::TAU * u2).cos()
    }
}

/// Centered moving RMS over `window` samples
fn moving_rms(values: &[f64], window: usize) -> Vec<f64> {
    let half = window / 2;
    let mut squares = Vec::with_capacity(values.len() + 1);
    squares.push(0.0);
    for v in values {
        let last = *squares.last().unwrap_or(&0.0);
        squares.push(last + v * v);
    }

    (0..values.len())
        .map(|i| {
            let lo = i.saturating_sub(half);
            let hi = (i + half + 1).min(values.len());
            ((squares[hi] - squares[lo]) / (hi - lo) as f64).max(0.0).sqrt()
        })
        .collect()
}

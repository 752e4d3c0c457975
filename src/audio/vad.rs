//! Energy-based voice-activity gate
//!
//! Two thresholds give hysteresis: the gate opens when a frame's RMS reaches
//! `start_threshold` and closes only after the RMS has stayed below
//! `end_threshold` for `hangover_ms`. Levels between the two keep the gate
//! in whatever state it is already in.

use crate::config::VadConfig;

/// Root-mean-square energy of a frame
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f32 = samples.iter().map(|s| s * s).sum();
    (sum / samples.len() as f32).sqrt()
}

/// Gate state transitions reported by [`VoiceGate::process`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    /// Frame is speech (or hangover tail) and should be emitted
    Pass,
    /// Frame is silence and should be dropped
    Suppress,
}

pub struct VoiceGate {
    config: VadConfig,
    hangover_samples: usize,
    open: bool,
    quiet_samples: usize,
}

impl VoiceGate {
    pub fn new(config: VadConfig, sample_rate: u32) -> Self {
        let hangover_samples = (sample_rate as usize * config.hangover_ms as usize) / 1000;
        Self {
            config,
            hangover_samples,
            open: false,
            quiet_samples: 0,
        }
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    /// Close the gate and forget any hangover progress
    pub fn reset(&mut self) {
        self.open = false;
        self.quiet_samples = 0;
    }

    pub fn process(&mut self, frame: &[f32]) -> GateDecision {
        let energy = rms(frame);

        if !self.open {
            if energy >= self.config.start_threshold {
                tracing::trace!("Voice gate opened (rms {:.4})", energy);
                self.open = true;
                self.quiet_samples = 0;
                return GateDecision::Pass;
            }
            return GateDecision::Suppress;
        }

        if energy < self.config.end_threshold {
            self.quiet_samples += frame.len();
            if self.quiet_samples > self.hangover_samples {
                tracing::trace!("Voice gate closed after {} quiet samples", self.quiet_samples);
                self.open = false;
                self.quiet_samples = 0;
                return GateDecision::Suppress;
            }
        } else {
            self.quiet_samples = 0;
        }
        GateDecision::Pass
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gate() -> VoiceGate {
        VoiceGate::new(
            VadConfig {
                start_threshold: 0.2,
                end_threshold: 0.1,
                hangover_ms: 20,
            },
            16000,
        )
    }

    #[test]
    fn test_rms() {
        assert_eq!(rms(&[]), 0.0);
        assert!((rms(&[0.5, -0.5, 0.5, -0.5]) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_opens_only_above_start_threshold() {
        let mut gate = gate();
        assert_eq!(gate.process(&[0.15; 160]), GateDecision::Suppress);
        assert!(!gate.is_open());
        assert_eq!(gate.process(&[0.25; 160]), GateDecision::Pass);
        assert!(gate.is_open());
    }

    #[test]
    fn test_hysteresis_band_keeps_gate_open() {
        let mut gate = gate();
        gate.process(&[0.3; 160]);
        // Between end and start thresholds: stays open indefinitely
        for _ in 0..10 {
            assert_eq!(gate.process(&[0.15; 160]), GateDecision::Pass);
        }
    }

    #[test]
    fn test_hangover_before_close() {
        let mut gate = gate();
        gate.process(&[0.3; 160]);
        // 20ms hangover = 320 samples of quiet are still passed
        assert_eq!(gate.process(&[0.0; 160]), GateDecision::Pass);
        assert_eq!(gate.process(&[0.0; 160]), GateDecision::Pass);
        assert_eq!(gate.process(&[0.0; 160]), GateDecision::Suppress);
        assert!(!gate.is_open());
    }

    #[test]
    fn test_speech_resets_hangover() {
        let mut gate = gate();
        gate.process(&[0.3; 160]);
        gate.process(&[0.0; 160]);
        gate.process(&[0.3; 160]);
        gate.process(&[0.0; 160]);
        assert_eq!(gate.process(&[0.0; 160]), GateDecision::Pass);
        assert!(gate.is_open());
    }
}

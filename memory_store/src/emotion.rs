use serde::{Deserialize, Serialize};

/// Tendency regions over VAD space: label, valence range, arousal range,
/// dominance range. `None` means the axis is unconstrained. First match wins.
const TENDENCY_REGIONS: &[(
    &str,
    (Option<f64>, Option<f64>),
    (Option<f64>, Option<f64>),
    (Option<f64>, Option<f64>),
)] = &[
    ("excited", (Some(0.3), Some(1.0)), (Some(0.6), Some(1.0)), (None, None)),
    ("relaxed", (Some(0.3), Some(1.0)), (Some(0.0), Some(0.3)), (None, None)),
    ("happy", (Some(0.3), Some(1.0)), (Some(0.3), Some(0.6)), (None, None)),
    ("content", (Some(0.1), Some(1.0)), (Some(0.0), Some(0.4)), (None, None)),
    ("angry", (Some(-1.0), Some(-0.3)), (Some(0.6), Some(1.0)), (Some(0.5), Some(1.0))),
    ("stressed", (Some(-1.0), Some(-0.3)), (Some(0.6), Some(1.0)), (Some(0.0), Some(0.5))),
    ("anxious", (Some(-1.0), Some(-0.3)), (Some(0.4), Some(0.6)), (None, None)),
    ("sad", (Some(-1.0), Some(-0.3)), (Some(0.0), Some(0.4)), (None, None)),
    ("bored", (Some(-0.3), Some(0.3)), (Some(0.0), Some(0.3)), (None, None)),
    ("neutral", (Some(-0.3), Some(0.3)), (Some(0.3), Some(0.7)), (None, None)),
];

fn in_range(value: f64, range: (Option<f64>, Option<f64>)) -> bool {
    if let Some(lo) = range.0 {
        if value < lo {
            return false;
        }
    }
    if let Some(hi) = range.1 {
        if value > hi {
            return false;
        }
    }
    true
}

/// Emotion as a point in VAD (valence, arousal, dominance) space.
///
/// Supplied by the inference layer at read time only; never persisted with
/// an atom.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EmotionSignal {
    /// Pleasantness: -1.0 very negative to +1.0 very positive.
    pub valence: f64,
    /// Activation: 0.0 calm to 1.0 highly activated.
    pub arousal: f64,
    /// Control: 0.0 submissive to 1.0 dominant.
    pub dominance: f64,
}

impl EmotionSignal {
    /// Creates a signal with all axes clamped to their ranges.
    #[must_use]
    pub fn new(valence: f64, arousal: f64, dominance: f64) -> Self {
        Self {
            valence: valence.clamp(-1.0, 1.0),
            arousal: arousal.clamp(0.0, 1.0),
            dominance: dominance.clamp(0.0, 1.0),
        }
    }

    /// The neutral signal used when the caller supplies none.
    #[must_use]
    pub const fn neutral() -> Self {
        Self {
            valence: 0.0,
            arousal: 0.0,
            dominance: 0.5,
        }
    }

    /// Label derived from the VAD coordinates, `"undefined"` when no region
    /// matches.
    #[must_use]
    pub fn tendency(&self) -> &'static str {
        for &(label, v, a, d) in TENDENCY_REGIONS {
            if in_range(self.valence, v) && in_range(self.arousal, a) && in_range(self.dominance, d)
            {
                return label;
            }
        }
        "undefined"
    }

    /// Euclidean distance from the origin, normalized to [0, 1].
    #[must_use]
    pub fn intensity(&self) -> f64 {
        let raw = self
            .valence
            .mul_add(self.valence, self.arousal.mul_add(self.arousal, self.dominance * self.dominance))
            .sqrt();
        (raw / 3.0_f64.sqrt()).min(1.0)
    }

    /// Valence above the neutral band.
    #[must_use]
    pub fn is_positive(&self) -> bool {
        self.valence > 0.1
    }

    /// Valence below the neutral band.
    #[must_use]
    pub fn is_negative(&self) -> bool {
        self.valence < -0.1
    }

    /// Valence within the neutral band.
    #[must_use]
    pub fn is_neutral(&self) -> bool {
        self.valence.abs() <= 0.1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn axes_are_clamped() {
        let signal = EmotionSignal::new(-3.0, 2.0, -1.0);
        assert!((signal.valence - -1.0).abs() < f64::EPSILON);
        assert!((signal.arousal - 1.0).abs() < f64::EPSILON);
        assert!(signal.dominance.abs() < f64::EPSILON);
    }

    #[test]
    fn tendency_regions_match() {
        assert_eq!(EmotionSignal::new(0.8, 0.9, 0.5).tendency(), "excited");
        assert_eq!(EmotionSignal::new(-0.8, 0.9, 0.9).tendency(), "angry");
        assert_eq!(EmotionSignal::new(-0.8, 0.9, 0.2).tendency(), "stressed");
        assert_eq!(EmotionSignal::new(0.0, 0.5, 0.5).tendency(), "neutral");
    }

    #[test]
    fn neutral_signal_is_mid_dominance() {
        let neutral = EmotionSignal::neutral();
        assert!(neutral.is_neutral());
        assert!((neutral.dominance - 0.5).abs() < f64::EPSILON);
    }
}

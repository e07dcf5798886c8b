//! Baseline timeouts and their scaling under emulated throttling.
//!
//! CPU throttling stretches the interaction timeout, network throttling the
//! navigation timeout. The two axes are independent: a throttled CPU does not
//! slow navigations down and a throttled network does not slow interactions.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Baseline timeout for element interaction, in milliseconds.
pub const DEFAULT_TIMEOUT: u64 = 5_000;

/// Baseline timeout for page navigation, in milliseconds.
pub const NAVIGATION_TIMEOUT: u64 = 10_000;

/// Named network throttling presets, ordered from least to most constrained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NetworkConditions {
    Fast4G,
    Slow4G,
    Fast3G,
    Slow3G,
}

impl NetworkConditions {
    /// Parses the preset from its display label.
    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            "Fast 4G" => Some(NetworkConditions::Fast4G),
            "Slow 4G" => Some(NetworkConditions::Slow4G),
            "Fast 3G" => Some(NetworkConditions::Fast3G),
            "Slow 3G" => Some(NetworkConditions::Slow3G),
            _ => None,
        }
    }

    /// Factor by which the navigation timeout is stretched under this preset.
    pub fn multiplier(self) -> f64 {
        match self {
            NetworkConditions::Fast4G => 1.0,
            NetworkConditions::Slow4G => 2.5,
            NetworkConditions::Fast3G => 5.0,
            NetworkConditions::Slow3G => 10.0,
        }
    }
}

impl fmt::Display for NetworkConditions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            NetworkConditions::Fast4G => "Fast 4G",
            NetworkConditions::Slow4G => "Slow 4G",
            NetworkConditions::Fast3G => "Fast 3G",
            NetworkConditions::Slow3G => "Slow 3G",
        };
        f.write_str(label)
    }
}

/// Multiplier for an optional preset; no preset means no slowdown.
pub fn network_multiplier(conditions: Option<NetworkConditions>) -> f64 {
    conditions.map_or(1.0, NetworkConditions::multiplier)
}

/// Scales a base timeout by a throttling multiplier, rounding to whole
/// milliseconds.
pub fn scaled(base_ms: u64, multiplier: f64) -> u64 {
    (base_ms as f64 * multiplier).round() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_round_trip() {
        for conditions in [
            NetworkConditions::Fast4G,
            NetworkConditions::Slow4G,
            NetworkConditions::Fast3G,
            NetworkConditions::Slow3G,
        ] {
            assert_eq!(
                NetworkConditions::from_label(&conditions.to_string()),
                Some(conditions)
            );
        }
        assert_eq!(NetworkConditions::from_label("No emulation"), None);
    }

    #[test]
    fn navigation_timeout_scales_with_conditions() {
        assert_eq!(
            scaled(NAVIGATION_TIMEOUT, network_multiplier(None)),
            10_000
        );
        assert_eq!(
            scaled(
                NAVIGATION_TIMEOUT,
                network_multiplier(Some(NetworkConditions::Slow4G))
            ),
            25_000
        );
        assert_eq!(
            scaled(
                NAVIGATION_TIMEOUT,
                network_multiplier(Some(NetworkConditions::Slow3G))
            ),
            100_000
        );
    }

    #[test]
    fn interaction_timeout_scales_with_cpu_rate() {
        assert_eq!(scaled(DEFAULT_TIMEOUT, 4.0), 20_000);
        assert_eq!(scaled(DEFAULT_TIMEOUT, 1.0), 5_000);
    }
}

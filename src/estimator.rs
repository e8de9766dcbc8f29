//! Net current estimation from polarity-tagged sensor channels

use serde::{Deserialize, Serialize};
use std::fmt;

/// What a measured channel represents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChannelRole {
    /// Produces power (solar); counts against the deficit
    #[serde(alias = "source")]
    Source,

    /// Consumes power; counts towards the deficit
    #[serde(alias = "drain")]
    Drain,

    /// Measured but excluded from the estimate
    #[serde(alias = "unknown")]
    Unknown,
}

impl ChannelRole {
    pub fn weight(self) -> f64 {
        match self {
            ChannelRole::Source => -1.0,
            ChannelRole::Drain => 1.0,
            ChannelRole::Unknown => 0.0,
        }
    }
}

impl fmt::Display for ChannelRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ChannelRole::Source => "Source",
            ChannelRole::Drain => "Drain",
            ChannelRole::Unknown => "Unknown",
        };
        f.write_str(name)
    }
}

/// One channel's reading as reported in status output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelReading {
    pub name: String,
    pub amps: f64,
    pub role: ChannelRole,
}

/// Net flow in amps: positive is a household deficit, negative a surplus.
///
/// `currents` and `roles` are paired by position and must have the same length.
pub fn combine(currents: &[f64], roles: &[ChannelRole]) -> f64 {
    debug_assert_eq!(currents.len(), roles.len());
    currents
        .iter()
        .zip(roles)
        .map(|(amps, role)| amps * role.weight())
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ChannelRole::*;

    #[test]
    fn sources_offset_drains_and_unknowns_are_ignored() {
        let roles = [Source, Drain, Unknown, Drain, Unknown];
        let estimate = combine(&[10.0, 4.0, 7.0, 2.5, -3.0], &roles);
        assert!((estimate - -3.5).abs() < 1e-9);
    }

    #[test]
    fn deficit_is_positive() {
        assert!(combine(&[1.0, 6.0], &[Source, Drain]) > 0.0);
        assert_eq!(combine(&[], &[]), 0.0);
    }

    #[test]
    fn role_names_match_the_log_header() {
        assert_eq!(Source.to_string(), "Source");
        let parsed: ChannelRole = serde_yaml::from_str("drain").unwrap();
        assert_eq!(parsed, Drain);
    }
}

//! Game configuration
//!
//! Bet limits come from the host platform, so they are configuration rather
//! than constants. Every field has a default; the page may pass a partial
//! JSON object.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// First player to this many round wins takes the match.
pub const WINNING_SCORE: u32 = 5;

/// Chance the opponent exploits the player's recent moves instead of
/// playing uniformly at random.
pub const EXPLOITATION_PROBABILITY: f64 = 0.7;

/// Winning a match pays this multiple of the bet.
pub const PAYOUT_MULTIPLIER: u64 = 2;

pub const MIN_BET: u64 = 100;
pub const MAX_BET: u64 = 100_000;
pub const HEARTBEAT_INTERVAL_MS: u64 = 5_000;

/// Host-protocol parameters
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SessionConfig {
    pub min_bet: u64,
    pub max_bet: u64,
    pub heartbeat_interval_ms: u64,
    /// Downgrade `Connected` to `TimedOut` after this much silence.
    /// `None` keeps a connection once established.
    pub liveness_timeout_ms: Option<u64>,
    /// Emit log output (non-production builds of the page).
    pub diagnostics: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            min_bet: MIN_BET,
            max_bet: MAX_BET,
            heartbeat_interval_ms: HEARTBEAT_INTERVAL_MS,
            liveness_timeout_ms: None,
            diagnostics: false,
        }
    }
}

/// Match rules
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MatchRules {
    pub winning_score: u32,
    pub exploitation_probability: f64,
    pub payout_multiplier: u64,
}

impl MatchRules {
    /// First to five, 70% exploitation, double-or-nothing
    pub fn standard() -> Self {
        Self {
            winning_score: WINNING_SCORE,
            exploitation_probability: EXPLOITATION_PROBABILITY,
            payout_multiplier: PAYOUT_MULTIPLIER,
        }
    }
}

impl Default for MatchRules {
    fn default() -> Self {
        Self::standard()
    }
}

/// Complete configuration handed to the composition root
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GameConfig {
    pub session: SessionConfig,
    pub rules: MatchRules,
}

impl GameConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: GameConfig =
            serde_json::from_str(json).map_err(|e| ConfigError::Json(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let s = &self.session;
        if s.min_bet == 0 {
            return Err(ConfigError::ZeroMinBet);
        }
        if s.min_bet > s.max_bet {
            return Err(ConfigError::InvertedBetRange { min: s.min_bet, max: s.max_bet });
        }
        if s.heartbeat_interval_ms == 0 {
            return Err(ConfigError::ZeroHeartbeat);
        }
        let r = &self.rules;
        if r.winning_score == 0 {
            return Err(ConfigError::ZeroWinningScore);
        }
        let p = r.exploitation_probability;
        if !(0.0..=1.0).contains(&p) {
            return Err(ConfigError::ProbabilityOutOfRange(p));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = GameConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.rules.winning_score, 5);
        assert_eq!(config.session.heartbeat_interval_ms, 5_000);
        assert_eq!(config.session.liveness_timeout_ms, None);
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config =
            GameConfig::from_json(r#"{"session": {"maxBet": 10000, "diagnostics": true}}"#)
                .unwrap();
        assert_eq!(config.session.max_bet, 10_000);
        assert_eq!(config.session.min_bet, MIN_BET);
        assert!(config.session.diagnostics);
        assert_eq!(config.rules, MatchRules::standard());
    }

    #[test]
    fn test_empty_json_object() {
        assert_eq!(GameConfig::from_json("{}").unwrap(), GameConfig::default());
    }

    #[test]
    fn test_rejects_inverted_range() {
        let err = GameConfig::from_json(r#"{"session": {"minBet": 500, "maxBet": 100}}"#)
            .unwrap_err();
        assert_eq!(err, ConfigError::InvertedBetRange { min: 500, max: 100 });
    }

    #[test]
    fn test_rejects_probability_above_one() {
        let err = GameConfig::from_json(r#"{"rules": {"exploitationProbability": 1.5}}"#)
            .unwrap_err();
        assert_eq!(err, ConfigError::ProbabilityOutOfRange(1.5));
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(matches!(GameConfig::from_json("nope"), Err(ConfigError::Json(_))));
    }
}

//! Lane policy resolution: from a token budget to per-level ceilings.
//!
//! Budgets are granted in three passes, always walking levels in priority
//! order (bindle, leaf, turn):
//!
//! 1. every lane's `min_tokens`, while tokens remain;
//! 2. every lane's weighted share, clamped to `[min, max]`;
//! 3. any leftover, up to each lane's `max_tokens`.
//!
//! The three budgets never sum to more than the available tokens.

use dolt_state::Level;
use serde::{Deserialize, Serialize};

/// Default weight of the bindle lane.
pub const DEFAULT_BINDLE_WEIGHT: f64 = 0.2;
/// Default weight of the leaf lane.
pub const DEFAULT_LEAF_WEIGHT: f64 = 0.3;
/// Default weight of the turn lane.
pub const DEFAULT_TURN_WEIGHT: f64 = 0.5;

/// Resolved policy for one lane.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LanePolicy {
    pub weight: f64,
    pub min_tokens: u64,
    pub max_tokens: Option<u64>,
}

impl LanePolicy {
    pub fn weighted(weight: f64) -> Self {
        Self {
            weight,
            min_tokens: 0,
            max_tokens: None,
        }
    }

    fn cap(&self) -> u64 {
        self.max_tokens.unwrap_or(u64::MAX)
    }
}

/// Resolved policies for all three lanes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LanePolicies {
    pub bindle: LanePolicy,
    pub leaf: LanePolicy,
    pub turn: LanePolicy,
}

impl Default for LanePolicies {
    fn default() -> Self {
        Self {
            bindle: LanePolicy::weighted(DEFAULT_BINDLE_WEIGHT),
            leaf: LanePolicy::weighted(DEFAULT_LEAF_WEIGHT),
            turn: LanePolicy::weighted(DEFAULT_TURN_WEIGHT),
        }
    }
}

impl LanePolicies {
    pub fn get(&self, level: Level) -> &LanePolicy {
        match level {
            Level::Bindle => &self.bindle,
            Level::Leaf => &self.leaf,
            Level::Turn => &self.turn,
        }
    }

    fn get_mut(&mut self, level: Level) -> &mut LanePolicy {
        match level {
            Level::Bindle => &mut self.bindle,
            Level::Leaf => &mut self.leaf,
            Level::Turn => &mut self.turn,
        }
    }
}

/// Partial override for one lane. Raw numbers, sanitized on resolution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LanePolicyOverride {
    #[serde(default)]
    pub weight: Option<f64>,
    #[serde(default, alias = "min_tokens")]
    pub min_tokens: Option<f64>,
    #[serde(default, alias = "max_tokens")]
    pub max_tokens: Option<f64>,
}

/// Caller-supplied overrides, any subset of lanes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LanePolicyOverrides {
    #[serde(default)]
    pub bindle: Option<LanePolicyOverride>,
    #[serde(default)]
    pub leaf: Option<LanePolicyOverride>,
    #[serde(default)]
    pub turn: Option<LanePolicyOverride>,
}

impl LanePolicyOverrides {
    pub fn get(&self, level: Level) -> Option<&LanePolicyOverride> {
        match level {
            Level::Bindle => self.bindle.as_ref(),
            Level::Leaf => self.leaf.as_ref(),
            Level::Turn => self.turn.as_ref(),
        }
    }
}

/// Per-level token ceilings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaneBudgets {
    pub bindle: u64,
    pub leaf: u64,
    pub turn: u64,
}

impl LaneBudgets {
    pub fn get(&self, level: Level) -> u64 {
        match level {
            Level::Bindle => self.bindle,
            Level::Leaf => self.leaf,
            Level::Turn => self.turn,
        }
    }

    fn add(&mut self, level: Level, tokens: u64) {
        match level {
            Level::Bindle => self.bindle += tokens,
            Level::Leaf => self.leaf += tokens,
            Level::Turn => self.turn += tokens,
        }
    }

    pub fn total(&self) -> u64 {
        self.bindle + self.leaf + self.turn
    }
}

/// Coerce an untrusted token quantity: missing, NaN, infinite or negative
/// become 0, fractions are floored.
pub fn sanitize_tokens(value: Option<f64>) -> u64 {
    match value {
        Some(v) if v.is_finite() && v > 0.0 => v.floor() as u64,
        _ => 0,
    }
}

/// `max(0, token_budget - runtime_reserve_tokens)`.
pub fn available_tokens(token_budget: u64, runtime_reserve_tokens: u64) -> u64 {
    token_budget.saturating_sub(runtime_reserve_tokens)
}

/// Merge overrides onto the default policies.
pub fn resolve_lane_policies(overrides: Option<&LanePolicyOverrides>) -> LanePolicies {
    let mut policies = LanePolicies::default();
    let Some(overrides) = overrides else {
        return policies;
    };

    for level in Level::ALL {
        let Some(o) = overrides.get(level) else {
            continue;
        };
        let policy = policies.get_mut(level);
        if let Some(weight) = o.weight {
            policy.weight = if weight.is_finite() && weight > 0.0 {
                weight
            } else {
                0.0
            };
        }
        if o.min_tokens.is_some() {
            policy.min_tokens = sanitize_tokens(o.min_tokens);
        }
        if o.max_tokens.is_some() {
            policy.max_tokens = Some(sanitize_tokens(o.max_tokens));
        }
        if let Some(max) = policy.max_tokens {
            if max < policy.min_tokens {
                policy.max_tokens = Some(policy.min_tokens);
            }
        }
    }
    policies
}

/// Split `available` tokens across the three lanes.
pub fn resolve_lane_budgets(available: u64, policies: &LanePolicies) -> LaneBudgets {
    let mut budgets = LaneBudgets::default();
    let mut remaining = available;

    for level in Level::ALL {
        let grant = policies.get(level).min_tokens.min(remaining);
        budgets.add(level, grant);
        remaining -= grant;
    }

    let weight_sum: f64 = Level::ALL.iter().map(|l| policies.get(*l).weight).sum();
    if weight_sum > 0.0 {
        for level in Level::ALL {
            let policy = policies.get(level);
            let share = (available as f64 * policy.weight / weight_sum).floor() as u64;
            let target = share.max(policy.min_tokens).min(policy.cap());
            let grant = target.saturating_sub(budgets.get(level)).min(remaining);
            budgets.add(level, grant);
            remaining -= grant;
        }
    }

    for level in Level::ALL {
        if remaining == 0 {
            break;
        }
        let room = policies.get(level).cap().saturating_sub(budgets.get(level));
        let grant = room.min(remaining);
        budgets.add(level, grant);
        remaining -= grant;
    }

    budgets
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_split_follows_weights() {
        let budgets = resolve_lane_budgets(1000, &LanePolicies::default());
        assert_eq!(
            budgets,
            LaneBudgets {
                bindle: 200,
                leaf: 300,
                turn: 500
            }
        );
    }

    #[test]
    fn rounding_leftover_goes_to_bindle_first() {
        let budgets = resolve_lane_budgets(7, &LanePolicies::default());
        assert_eq!(budgets.total(), 7);
        // shares floor to 1, 2, 3; the spare token lands on bindle
        assert_eq!(budgets.bindle, 2);
        assert_eq!(budgets.leaf, 2);
        assert_eq!(budgets.turn, 3);
    }

    #[test]
    fn zero_available_yields_zero_budgets() {
        let policies = resolve_lane_policies(Some(&LanePolicyOverrides {
            bindle: Some(LanePolicyOverride {
                min_tokens: Some(500.0),
                ..Default::default()
            }),
            ..Default::default()
        }));
        assert_eq!(resolve_lane_budgets(0, &policies), LaneBudgets::default());
    }

    #[test]
    fn scarce_tokens_honour_priority() {
        let overrides = LanePolicyOverrides {
            bindle: Some(LanePolicyOverride {
                min_tokens: Some(60.0),
                ..Default::default()
            }),
            leaf: Some(LanePolicyOverride {
                min_tokens: Some(60.0),
                ..Default::default()
            }),
            turn: Some(LanePolicyOverride {
                min_tokens: Some(60.0),
                ..Default::default()
            }),
        };
        let budgets = resolve_lane_budgets(100, &resolve_lane_policies(Some(&overrides)));
        assert_eq!(budgets.bindle, 60);
        assert_eq!(budgets.leaf, 40);
        assert_eq!(budgets.turn, 0);
    }

    #[test]
    fn max_caps_lane_and_spills_to_next() {
        let overrides = LanePolicyOverrides {
            bindle: Some(LanePolicyOverride {
                max_tokens: Some(50.0),
                ..Default::default()
            }),
            ..Default::default()
        };
        let budgets = resolve_lane_budgets(1000, &resolve_lane_policies(Some(&overrides)));
        assert_eq!(budgets.bindle, 50);
        assert_eq!(budgets.total(), 1000);
        assert_eq!(budgets.leaf, 450);
        assert_eq!(budgets.turn, 500);
    }

    #[test]
    fn bad_override_values_are_coerced() {
        let overrides = LanePolicyOverrides {
            turn: Some(LanePolicyOverride {
                weight: Some(f64::NAN),
                min_tokens: Some(-5.0),
                max_tokens: Some(f64::INFINITY),
            }),
            ..Default::default()
        };
        let policies = resolve_lane_policies(Some(&overrides));
        assert_eq!(policies.turn.weight, 0.0);
        assert_eq!(policies.turn.min_tokens, 0);
        assert_eq!(policies.turn.max_tokens, Some(0));
    }

    #[test]
    fn max_below_min_is_raised() {
        let overrides = LanePolicyOverrides {
            leaf: Some(LanePolicyOverride {
                min_tokens: Some(40.0),
                max_tokens: Some(10.0),
                ..Default::default()
            }),
            ..Default::default()
        };
        let policies = resolve_lane_policies(Some(&overrides));
        assert_eq!(policies.leaf.max_tokens, Some(40));
    }

    #[test]
    fn sanitize_handles_non_finite_and_fractions() {
        assert_eq!(sanitize_tokens(None), 0);
        assert_eq!(sanitize_tokens(Some(f64::NAN)), 0);
        assert_eq!(sanitize_tokens(Some(f64::NEG_INFINITY)), 0);
        assert_eq!(sanitize_tokens(Some(-3.0)), 0);
        assert_eq!(sanitize_tokens(Some(12.9)), 12);
    }

    #[test]
    fn available_floors_at_zero() {
        assert_eq!(available_tokens(100, 30), 70);
        assert_eq!(available_tokens(30, 100), 0);
    }

    #[test]
    fn overrides_deserialize_from_camel_case() {
        let json = r#"{"leaf":{"weight":0.6,"minTokens":10}}"#;
        let overrides: LanePolicyOverrides = serde_json::from_str(json).unwrap();
        let leaf = overrides.leaf.unwrap();
        assert_eq!(leaf.weight, Some(0.6));
        assert_eq!(leaf.min_tokens, Some(10.0));
        assert!(overrides.bindle.is_none());
    }
}

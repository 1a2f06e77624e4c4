//! Environment-driven configuration.
//!
//! | Variable | Default |
//! |---|---|
//! | `FIELDSTOCK_BIND_ADDR` | `0.0.0.0:8080` |
//! | `FIELDSTOCK_APPROVAL_REQUIRED_TYPES` | empty (comma-separated movement types) |
//! | `FIELDSTOCK_CONFLICT_RETRIES` | `3` |
//!
//! An unset variable takes its default; a set but malformed one is an error.

use std::collections::BTreeSet;

use thiserror::Error;

use fieldstock_inventory::MovementType;

pub const BIND_ADDR_VAR: &str = "FIELDSTOCK_BIND_ADDR";
pub const APPROVAL_TYPES_VAR: &str = "FIELDSTOCK_APPROVAL_REQUIRED_TYPES";
pub const CONFLICT_RETRIES_VAR: &str = "FIELDSTOCK_CONFLICT_RETRIES";

const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";
const DEFAULT_CONFLICT_RETRIES: u32 = 3;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var}: unknown movement type '{value}'")]
    UnknownMovementType { var: &'static str, value: String },

    #[error("{var}: expected a non-negative integer, got '{value}'")]
    InvalidNumber { var: &'static str, value: String },

    #[error("{var} must not be empty")]
    Empty { var: &'static str },
}

/// Ledger posting policy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InventoryPolicy {
    approval_required: BTreeSet<MovementType>,
}

impl InventoryPolicy {
    pub fn new(approval_required: impl IntoIterator<Item = MovementType>) -> Self {
        Self {
            approval_required: approval_required.into_iter().collect(),
        }
    }

    /// Whether postings of this type are written pending approval.
    pub fn requires_approval(&self, movement_type: MovementType) -> bool {
        self.approval_required.contains(&movement_type)
    }

    pub fn approval_required_types(&self) -> impl Iterator<Item = MovementType> + '_ {
        self.approval_required.iter().copied()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub bind_addr: String,
    pub policy: InventoryPolicy,
    pub conflict_retries: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            policy: InventoryPolicy::default(),
            conflict_retries: DEFAULT_CONFLICT_RETRIES,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Config::default();

        if let Some(addr) = lookup(BIND_ADDR_VAR) {
            let addr = addr.trim();
            if addr.is_empty() {
                return Err(ConfigError::Empty { var: BIND_ADDR_VAR });
            }
            config.bind_addr = addr.to_string();
        }

        if let Some(types) = lookup(APPROVAL_TYPES_VAR) {
            let parsed = types
                .split(',')
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(|t| {
                    t.parse::<MovementType>()
                        .map_err(|_| ConfigError::UnknownMovementType {
                            var: APPROVAL_TYPES_VAR,
                            value: t.to_string(),
                        })
                })
                .collect::<Result<Vec<_>, _>>()?;
            config.policy = InventoryPolicy::new(parsed);
        }

        if let Some(retries) = lookup(CONFLICT_RETRIES_VAR) {
            config.conflict_retries =
                retries
                    .trim()
                    .parse()
                    .map_err(|_| ConfigError::InvalidNumber {
                        var: CONFLICT_RETRIES_VAR,
                        value: retries.clone(),
                    })?;
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn unset_variables_take_defaults() {
        assert_eq!(Config::from_lookup(lookup(&[])).unwrap(), Config::default());
    }

    #[test]
    fn parses_approval_types_and_retries() {
        let config = Config::from_lookup(lookup(&[
            (APPROVAL_TYPES_VAR, "damage, shrinkage,,adjustment"),
            (CONFLICT_RETRIES_VAR, "5"),
            (BIND_ADDR_VAR, "127.0.0.1:9000"),
        ]))
        .unwrap();

        assert!(config.policy.requires_approval(MovementType::Damage));
        assert!(config.policy.requires_approval(MovementType::Adjustment));
        assert!(!config.policy.requires_approval(MovementType::Purchase));
        assert_eq!(config.conflict_retries, 5);
        assert_eq!(config.bind_addr, "127.0.0.1:9000");
    }

    #[test]
    fn malformed_values_fail_loudly() {
        assert_eq!(
            Config::from_lookup(lookup(&[(APPROVAL_TYPES_VAR, "damage,teleport")])).unwrap_err(),
            ConfigError::UnknownMovementType {
                var: APPROVAL_TYPES_VAR,
                value: "teleport".to_string()
            }
        );
        assert!(matches!(
            Config::from_lookup(lookup(&[(CONFLICT_RETRIES_VAR, "-1")])),
            Err(ConfigError::InvalidNumber { .. })
        ));
    }
}

use std::fmt;

use log::error;
use sha1::{Digest, Sha1};

use crate::flag::{CombinedFlagInfo, Rule};

/// Why a flag evaluated the way it did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    FlagMissing,
    FlagDisabled,
    /// No rule, or the rule is switched off. The flag's own state applies.
    NoTargeting,
    InRollout { bucket: u32 },
    OutOfRollout { bucket: u32 },
    /// A `PERCENTAGE` rule whose value is not a number. Fails closed.
    InvalidRuleValue,
    /// A rule type this crate cannot apply. Evaluates to disabled.
    UnrecognizedRule,
}

impl Decision {
    pub fn enabled(&self) -> bool {
        matches!(self, Decision::NoTargeting | Decision::InRollout { .. })
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Decision::FlagMissing => write!(f, "flag missing"),
            Decision::FlagDisabled => write!(f, "flag disabled"),
            Decision::NoTargeting => write!(f, "no targeting"),
            Decision::InRollout { bucket } => write!(f, "bucket {} in rollout", bucket),
            Decision::OutOfRollout { bucket } => write!(f, "bucket {} outside rollout", bucket),
            Decision::InvalidRuleValue => write!(f, "invalid rule value"),
            Decision::UnrecognizedRule => write!(f, "unrecognized rule"),
        }
    }
}

/// Applies the flag and its targeting rule to `user_id`.
pub fn explain(info: &CombinedFlagInfo, user_id: &str) -> Decision {
    let flag = match &info.flag {
        None => return Decision::FlagMissing,
        Some(flag) if !flag.is_enabled => return Decision::FlagDisabled,
        Some(flag) => flag,
    };

    let rule = match &info.rule {
        Some(rule) if rule.is_enabled => rule,
        _ => return Decision::NoTargeting,
    };

    match &rule.rules {
        Rule::Percentage(percentage) => {
            let Some(threshold) = percentage.threshold() else {
                error!(
                    "Percentage rule value for flag '{}' is not a number: {}",
                    flag.name, percentage.0
                );
                return Decision::InvalidRuleValue;
            };

            let bucket = deterministic_bucket(&format!("{}{}", user_id, flag.name));
            if f64::from(bucket) < threshold {
                Decision::InRollout { bucket }
            } else {
                Decision::OutOfRollout { bucket }
            }
        }
        Rule::Unrecognized { .. } => Decision::UnrecognizedRule,
    }
}

/// Whether the flag is on for `user_id`.
pub fn evaluate(info: &CombinedFlagInfo, user_id: &str) -> bool {
    explain(info, user_id).enabled()
}

/// First four bytes of SHA-1(input), big-endian, modulo 100.
pub fn deterministic_bucket(input: &str) -> u32 {
    let digest = Sha1::digest(input.as_bytes());
    let prefix = [digest[0], digest[1], digest[2], digest[3]];
    u32::from_be_bytes(prefix) % 100
}

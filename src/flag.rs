// src/flag.rs
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

pub const PERCENTAGE: &str = "PERCENTAGE";

/// Flag metadata as served by the flag service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Flag {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub is_enabled: bool,
}

/// Targeting rule as served by the targeting service. Absent fields take
/// their zero value, so a rule without `is_enabled` is switched off.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetingRule {
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub flag_name: String,
    #[serde(default)]
    pub is_enabled: bool,
    /// A missing or null payload reads as an untyped rule.
    #[serde(default, deserialize_with = "rule_or_default")]
    pub rules: Rule,
}

fn rule_or_default<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Rule, D::Error> {
    Ok(Option::<Rule>::deserialize(deserializer)?.unwrap_or_default())
}

/// The rule payload, keyed by its `type` tag on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawRule", into = "RawRule")]
pub enum Rule {
    Percentage(Percentage),
    /// Any tag this crate does not know how to apply. Kept verbatim so it
    /// survives a round trip through the cache.
    Unrecognized { kind: String, value: Value },
}

impl Default for Rule {
    fn default() -> Self {
        Rule::Unrecognized {
            kind: String::new(),
            value: Value::Null,
        }
    }
}

impl Rule {
    pub fn percentage(threshold: f64) -> Self {
        Rule::Percentage(Percentage(Value::from(threshold)))
    }

    pub fn kind(&self) -> &str {
        match self {
            Rule::Percentage(_) => PERCENTAGE,
            Rule::Unrecognized { kind, .. } => kind,
        }
    }
}

/// Rollout threshold of a `PERCENTAGE` rule. The origin does not validate
/// the payload, so the raw value is kept and checked at evaluation time.
#[derive(Debug, Clone, PartialEq)]
pub struct Percentage(pub Value);

impl Percentage {
    /// `Some` for any JSON number, `None` for everything else.
    pub fn threshold(&self) -> Option<f64> {
        self.0.as_f64()
    }
}

#[derive(Serialize, Deserialize)]
struct RawRule {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    value: Value,
}

impl From<RawRule> for Rule {
    fn from(raw: RawRule) -> Self {
        if raw.kind == PERCENTAGE {
            Rule::Percentage(Percentage(raw.value))
        } else {
            Rule::Unrecognized {
                kind: raw.kind,
                value: raw.value,
            }
        }
    }
}

impl From<Rule> for RawRule {
    fn from(rule: Rule) -> Self {
        match rule {
            Rule::Percentage(Percentage(value)) => RawRule {
                kind: PERCENTAGE.to_string(),
                value,
            },
            Rule::Unrecognized { kind, value } => RawRule { kind, value },
        }
    }
}

/// Flag and rule fetched together for one flag name. This is what gets
/// cached and what the evaluator consumes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CombinedFlagInfo {
    #[serde(rename = "Flag", default)]
    pub flag: Option<Flag>,
    #[serde(rename = "Rule", default)]
    pub rule: Option<TargetingRule>,
}

impl CombinedFlagInfo {
    pub fn new(flag: Flag, rule: Option<TargetingRule>) -> Self {
        Self {
            flag: Some(flag),
            rule,
        }
    }
}

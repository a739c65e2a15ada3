//! Subscription plans: feature switches and usage limits.
//!
//! Plans are read-only from this layer's perspective. Their maps come straight
//! from the store as JSON, so every value is decoded leniently: anything that is
//! not a recognizable grant decodes to a denying value instead of failing the
//! whole profile load.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Sentinel string marking a limit as unlimited.
pub const UNLIMITED: &str = "unlimited";

/// A plan's value for a feature key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "JsonValue", into = "JsonValue")]
pub enum FeatureValue {
    Flag(bool),
    Quota(f64),
    /// Absent or malformed.
    Disabled,
}

impl FeatureValue {
    /// Truthy: `true`, or a number greater than zero.
    pub fn is_enabled(&self) -> bool {
        match self {
            FeatureValue::Flag(on) => *on,
            FeatureValue::Quota(n) => *n > 0.0,
            FeatureValue::Disabled => false,
        }
    }
}

impl From<JsonValue> for FeatureValue {
    fn from(value: JsonValue) -> Self {
        match value {
            JsonValue::Bool(on) => FeatureValue::Flag(on),
            JsonValue::Number(n) => match n.as_f64() {
                Some(f) if f.is_finite() => FeatureValue::Quota(f),
                _ => FeatureValue::Disabled,
            },
            _ => FeatureValue::Disabled,
        }
    }
}

impl From<FeatureValue> for JsonValue {
    fn from(value: FeatureValue) -> Self {
        match value {
            FeatureValue::Flag(on) => JsonValue::Bool(on),
            FeatureValue::Quota(n) => serde_json::Number::from_f64(n)
                .map(JsonValue::Number)
                .unwrap_or(JsonValue::Null),
            FeatureValue::Disabled => JsonValue::Null,
        }
    }
}

/// A plan's value for a limit key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "JsonValue", into = "JsonValue")]
pub enum LimitValue {
    Unlimited,
    /// Positive, finite cap.
    Finite(u64),
    /// Absent, zero, negative or malformed.
    Unavailable,
}

impl From<JsonValue> for LimitValue {
    fn from(value: JsonValue) -> Self {
        match value {
            JsonValue::String(s) if s.trim().eq_ignore_ascii_case(UNLIMITED) => LimitValue::Unlimited,
            JsonValue::Number(n) => {
                if let Some(count) = n.as_u64() {
                    return if count > 0 { LimitValue::Finite(count) } else { LimitValue::Unavailable };
                }
                match n.as_f64() {
                    Some(f) if f.is_finite() && f >= 1.0 => LimitValue::Finite(f.floor() as u64),
                    _ => LimitValue::Unavailable,
                }
            }
            _ => LimitValue::Unavailable,
        }
    }
}

impl From<LimitValue> for JsonValue {
    fn from(value: LimitValue) -> Self {
        match value {
            LimitValue::Unlimited => JsonValue::String(UNLIMITED.to_string()),
            LimitValue::Finite(n) => JsonValue::from(n),
            LimitValue::Unavailable => JsonValue::Null,
        }
    }
}

/// A subscription plan as embedded in a company record.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SubscriptionPlan {
    pub name: String,
    #[serde(default)]
    pub features: BTreeMap<String, FeatureValue>,
    #[serde(default)]
    pub limits: BTreeMap<String, LimitValue>,
}

impl SubscriptionPlan {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_feature(mut self, key: impl Into<String>, value: FeatureValue) -> Self {
        self.features.insert(key.into(), value);
        self
    }

    pub fn with_limit(mut self, key: impl Into<String>, value: LimitValue) -> Self {
        self.limits.insert(key.into(), value);
        self
    }

    pub fn feature(&self, key: &str) -> FeatureValue {
        self.features.get(key).cloned().unwrap_or(FeatureValue::Disabled)
    }

    pub fn limit(&self, key: &str) -> LimitValue {
        self.limits.get(key).copied().unwrap_or(LimitValue::Unavailable)
    }
}

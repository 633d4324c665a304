// Structured Azure resource identifiers
//
// `/subscriptions/{sub}/resourceGroups/{rg}/providers/{namespace}/{type}/{name}`

use crate::errors::ValidationError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// A parsed resource identifier. The raw string is kept verbatim because it
/// participates in action fingerprints.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceId {
    raw: String,
    subscription_id: String,
    resource_group: String,
    namespace: String,
    resource_type: String,
    name: String,
}

impl ResourceId {
    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        let invalid = |reason: &str| ValidationError::InvalidResourceId {
            resource_id: raw.to_string(),
            reason: reason.to_string(),
        };

        let trimmed = raw.trim_end_matches('/');
        let segments: Vec<&str> = trimmed.split('/').collect();

        if segments.len() < 9 || !segments[0].is_empty() {
            return Err(invalid(
                "expected /subscriptions/{sub}/resourceGroups/{rg}/providers/{namespace}/{type}/{name}",
            ));
        }
        if !segments[1].eq_ignore_ascii_case("subscriptions") {
            return Err(invalid("missing 'subscriptions' segment"));
        }
        if !segments[3].eq_ignore_ascii_case("resourceGroups") {
            return Err(invalid("missing 'resourceGroups' segment"));
        }
        if !segments[5].eq_ignore_ascii_case("providers") {
            return Err(invalid("missing 'providers' segment"));
        }
        if segments[1..].iter().any(|s| s.is_empty()) {
            return Err(invalid("empty path segment"));
        }

        let provider = &segments[6..segments.len() - 1];

        Ok(Self {
            raw: raw.to_string(),
            subscription_id: segments[2].to_string(),
            resource_group: segments[4].to_string(),
            namespace: provider[0].to_string(),
            resource_type: provider[provider.len() - 1].to_string(),
            name: segments[segments.len() - 1].to_string(),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn subscription_id(&self) -> &str {
        &self.subscription_id
    }

    pub fn resource_group(&self) -> &str {
        &self.resource_group
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn resource_type(&self) -> &str {
        &self.resource_type
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Log-friendly form with the subscription id masked.
    pub fn human_readable(&self) -> String {
        let masked: String = self.subscription_id.chars().take(7).collect();
        format!(
            "{}***/{}/{} (namespace={} type={})",
            masked, self.resource_group, self.name, self.namespace, self.resource_type
        )
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.human_readable())
    }
}

impl FromStr for ResourceId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for ResourceId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.raw)
    }
}

impl<'de> Deserialize<'de> for ResourceId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}

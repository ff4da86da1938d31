//! Label selectors for node affinity.

use crate::error::{ControlError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Operator of one selector requirement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SelectorOperator {
    /// Label value must be one of `values`.
    In,
    /// Label value must not be any of `values`.
    NotIn,
    /// Label key must be present.
    Exists,
    /// Label key must be absent.
    DoesNotExist,
}

/// One requirement against a label set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectorRequirement {
    /// Label key.
    pub key: String,
    /// Comparison operator.
    pub operator: SelectorOperator,
    /// Values for `In`/`NotIn`; must be empty for the existence operators.
    #[serde(default)]
    pub values: Vec<String>,
}

impl SelectorRequirement {
    /// Whether `labels` satisfies this requirement.
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        match self.operator {
            SelectorOperator::In => labels
                .get(&self.key)
                .map(|v| self.values.iter().any(|candidate| candidate == v))
                .unwrap_or(false),
            SelectorOperator::NotIn => labels
                .get(&self.key)
                .map(|v| !self.values.iter().any(|candidate| candidate == v))
                .unwrap_or(true),
            SelectorOperator::Exists => labels.contains_key(&self.key),
            SelectorOperator::DoesNotExist => !labels.contains_key(&self.key),
        }
    }

    /// Validate operator/values consistency.
    pub fn validate(&self) -> Result<()> {
        if self.key.is_empty() {
            return Err(ControlError::Validation(
                "selector requirement key must not be empty".into(),
            ));
        }
        match self.operator {
            SelectorOperator::In | SelectorOperator::NotIn if self.values.is_empty() => {
                Err(ControlError::Validation(format!(
                    "selector {:?} on {} requires at least one value",
                    self.operator, self.key
                )))
            }
            SelectorOperator::Exists | SelectorOperator::DoesNotExist
                if !self.values.is_empty() =>
            {
                Err(ControlError::Validation(format!(
                    "selector {:?} on {} takes no values",
                    self.operator, self.key
                )))
            }
            _ => Ok(()),
        }
    }
}

/// A conjunction of exact matches and requirements. An empty selector
/// matches everything.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LabelSelector {
    /// Labels that must be present with exactly these values.
    #[serde(default)]
    pub match_labels: BTreeMap<String, String>,
    /// Expression requirements, all of which must hold.
    #[serde(default)]
    pub match_expressions: Vec<SelectorRequirement>,
}

impl LabelSelector {
    /// Whether `labels` satisfies every term of the selector.
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.match_labels
            .iter()
            .all(|(key, value)| labels.get(key) == Some(value))
            && self
                .match_expressions
                .iter()
                .all(|requirement| requirement.matches(labels))
    }

    /// Whether the selector constrains anything at all.
    pub fn is_empty(&self) -> bool {
        self.match_labels.is_empty() && self.match_expressions.is_empty()
    }

    /// Validate every requirement.
    pub fn validate(&self) -> Result<()> {
        for requirement in &self.match_expressions {
            requirement.validate()?;
        }
        Ok(())
    }
}

//! Condition and update expressions.
//!
//! Backend-neutral descriptions of conditional checks and `SET`/`ADD`
//! assignments. `MemoryStore` evaluates them directly; `DynamoStore`
//! renders them into DynamoDB expression strings.

use std::collections::BTreeMap;

use serde_json::Value;

use super::{Attributes, Item, Key, StorageError};

/// Guard evaluated against the current item before a write.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// The item exists.
    Exists,
    /// The item does not exist.
    NotExists,
    /// The named attribute exists.
    AttributeExists(String),
    /// The named attribute is absent.
    AttributeNotExists(String),
    /// The named attribute equals the value.
    AttributeEquals(String, Value),
    /// Every inner condition holds.
    And(Vec<Condition>),
}

impl Condition {
    pub fn attribute_equals(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Condition::AttributeEquals(name.into(), value.into())
    }

    pub fn attribute_not_exists(name: impl Into<String>) -> Self {
        Condition::AttributeNotExists(name.into())
    }

    pub fn attribute_exists(name: impl Into<String>) -> Self {
        Condition::AttributeExists(name.into())
    }

    pub fn and(self, other: Condition) -> Self {
        match self {
            Condition::And(mut inner) => {
                inner.push(other);
                Condition::And(inner)
            }
            first => Condition::And(vec![first, other]),
        }
    }

    /// Evaluate against the current item (`None` when absent).
    pub fn evaluate(&self, item: Option<&Item>) -> bool {
        match self {
            Condition::Exists => item.is_some(),
            Condition::NotExists => item.is_none(),
            Condition::AttributeExists(name) => item.is_some_and(|i| i.get(name).is_some()),
            Condition::AttributeNotExists(name) => item.map_or(true, |i| i.get(name).is_none()),
            Condition::AttributeEquals(name, value) => {
                item.is_some_and(|i| i.get(name) == Some(value))
            }
            Condition::And(inner) => inner.iter().all(|c| c.evaluate(item)),
        }
    }
}

/// `SET` and `ADD` assignments applied atomically to one item.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Update {
    pub set: Attributes,
    pub add: BTreeMap<String, i64>,
    pub condition: Option<Condition>,
}

impl Update {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set.insert(name.into(), value.into());
        self
    }

    pub fn add(mut self, name: impl Into<String>, delta: i64) -> Self {
        *self.add.entry(name.into()).or_insert(0) += delta;
        self
    }

    pub fn when(mut self, condition: Condition) -> Self {
        self.condition = Some(condition);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.set.is_empty() && self.add.is_empty()
    }

    /// Apply to the current item, creating an unindexed one when absent.
    ///
    /// Fails with `Conflict` when the condition does not hold and with
    /// `Malformed` when `ADD` targets a non-numeric attribute.
    pub fn apply(&self, key: &Key, current: Option<&Item>) -> Result<Item, StorageError> {
        if let Some(condition) = &self.condition {
            if !condition.evaluate(current) {
                return Err(StorageError::conflict(key));
            }
        }

        let mut item = current
            .cloned()
            .unwrap_or_else(|| Item::unindexed(key.clone()));

        for (name, value) in &self.set {
            item.attributes.insert(name.clone(), value.clone());
        }

        for (name, delta) in &self.add {
            let existing = match item.attributes.get(name) {
                None => 0,
                Some(value) => value.as_i64().ok_or_else(|| {
                    StorageError::Malformed(format!(
                        "ADD on non-numeric attribute '{}' of {}/{}",
                        name, key.pk, key.sk
                    ))
                })?,
            };
            item.attributes
                .insert(name.clone(), Value::from(existing + delta));
        }

        Ok(item)
    }
}

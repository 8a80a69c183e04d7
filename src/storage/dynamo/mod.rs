//! DynamoDB single-table store.
//!
//! Table schema:
//! - `pk` (S, partition key), `sk` (S, sort key)
//! - `gsi_pk` / `gsi_sk` (S): key of the secondary index named in config
//! - every other attribute is stored under its own name
//!
//! Items written through `update` on a missing key carry no index attributes
//! and therefore stay out of the index.

use std::collections::HashMap;

use async_trait::async_trait;
use aws_sdk_dynamodb::error::{DisplayErrorContext, SdkError};
use aws_sdk_dynamodb::operation::delete_item::DeleteItemError;
use aws_sdk_dynamodb::operation::put_item::PutItemError;
use aws_sdk_dynamodb::operation::update_item::UpdateItemError;
use aws_sdk_dynamodb::types::{AttributeValue, ReturnValue};
use aws_sdk_dynamodb::Client;
use serde_json::Value;
use tracing::{debug, info};

use crate::config::DynamoConfig;

use super::{
    Attributes, Condition, Cursor, Item, Key, Page, Query, QueryTarget, Result, SortKeyCondition,
    StorageError, Store, Update,
};

const PK: &str = "pk";
const SK: &str = "sk";
const GSI_PK: &str = "gsi_pk";
const GSI_SK: &str = "gsi_sk";

/// DynamoDB implementation of `Store`.
pub struct DynamoStore {
    client: Client,
    table_name: String,
    index_name: String,
}

impl DynamoStore {
    /// Connect using the default AWS credential chain.
    pub async fn new(config: &DynamoConfig) -> Result<Self> {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
        if let Some(region) = &config.region {
            loader = loader.region(aws_config::Region::new(region.clone()));
        }
        let sdk_config = loader.load().await;

        let client = if let Some(endpoint) = &config.endpoint_url {
            let dynamo_config = aws_sdk_dynamodb::config::Builder::from(&sdk_config)
                .endpoint_url(endpoint)
                .build();
            Client::from_conf(dynamo_config)
        } else {
            Client::new(&sdk_config)
        };

        info!(
            table = %config.table_name,
            index = %config.index_name,
            "Connected to DynamoDB"
        );

        Ok(Self {
            client,
            table_name: config.table_name.clone(),
            index_name: config.index_name.clone(),
        })
    }

    fn key_attributes(key: &Key) -> HashMap<String, AttributeValue> {
        HashMap::from([
            (PK.to_string(), AttributeValue::S(key.pk.clone())),
            (SK.to_string(), AttributeValue::S(key.sk.clone())),
        ])
    }
}

/// Convert a JSON value into a DynamoDB attribute.
pub(crate) fn to_attribute(value: &Value) -> AttributeValue {
    match value {
        Value::Null => AttributeValue::Null(true),
        Value::Bool(b) => AttributeValue::Bool(*b),
        Value::Number(n) => AttributeValue::N(n.to_string()),
        Value::String(s) => AttributeValue::S(s.clone()),
        Value::Array(values) => AttributeValue::L(values.iter().map(to_attribute).collect()),
        Value::Object(map) => AttributeValue::M(
            map.iter()
                .map(|(k, v)| (k.clone(), to_attribute(v)))
                .collect(),
        ),
    }
}

/// Convert a DynamoDB attribute back into JSON.
pub(crate) fn from_attribute(attribute: &AttributeValue) -> Result<Value> {
    Ok(match attribute {
        AttributeValue::Null(_) => Value::Null,
        AttributeValue::Bool(b) => Value::Bool(*b),
        AttributeValue::S(s) => Value::String(s.clone()),
        AttributeValue::N(n) => {
            if let Ok(i) = n.parse::<i64>() {
                Value::from(i)
            } else {
                let f = n
                    .parse::<f64>()
                    .map_err(|_| StorageError::Malformed(format!("invalid number '{}'", n)))?;
                Value::from(f)
            }
        }
        AttributeValue::L(values) => Value::Array(
            values
                .iter()
                .map(from_attribute)
                .collect::<Result<Vec<_>>>()?,
        ),
        AttributeValue::M(map) => {
            let mut object = Attributes::new();
            for (k, v) in map {
                object.insert(k.clone(), from_attribute(v)?);
            }
            Value::Object(object)
        }
        other => {
            return Err(StorageError::Malformed(format!(
                "unsupported attribute type: {:?}",
                other
            )))
        }
    })
}

fn string_attribute(
    raw: &HashMap<String, AttributeValue>,
    name: &str,
) -> Result<Option<String>> {
    match raw.get(name) {
        None => Ok(None),
        Some(AttributeValue::S(s)) => Ok(Some(s.clone())),
        Some(_) => Err(StorageError::Malformed(format!(
            "key attribute '{}' is not a string",
            name
        ))),
    }
}

fn to_raw_item(item: &Item) -> HashMap<String, AttributeValue> {
    let mut raw = DynamoStore::key_attributes(&item.key);
    if let Some(index) = &item.index_key {
        raw.insert(GSI_PK.to_string(), AttributeValue::S(index.pk.clone()));
        raw.insert(GSI_SK.to_string(), AttributeValue::S(index.sk.clone()));
    }
    for (name, value) in &item.attributes {
        raw.insert(name.clone(), to_attribute(value));
    }
    raw
}

fn from_raw_item(raw: &HashMap<String, AttributeValue>) -> Result<Item> {
    let pk = string_attribute(raw, PK)?
        .ok_or_else(|| StorageError::Malformed("item without pk".to_string()))?;
    let sk = string_attribute(raw, SK)?
        .ok_or_else(|| StorageError::Malformed("item without sk".to_string()))?;
    let index_key = match (string_attribute(raw, GSI_PK)?, string_attribute(raw, GSI_SK)?) {
        (Some(pk), Some(sk)) => Some(Key::new(pk, sk)),
        _ => None,
    };

    let mut attributes = Attributes::new();
    for (name, attribute) in raw {
        if matches!(name.as_str(), PK | SK | GSI_PK | GSI_SK) {
            continue;
        }
        attributes.insert(name.clone(), from_attribute(attribute)?);
    }

    Ok(Item {
        key: Key::new(pk, sk),
        index_key,
        attributes,
    })
}

/// Placeholder allocation for expression attribute names and values.
#[derive(Default)]
pub(crate) struct Placeholders {
    pub(crate) names: HashMap<String, String>,
    pub(crate) values: HashMap<String, AttributeValue>,
}

impl Placeholders {
    pub(crate) fn name(&mut self, name: &str) -> String {
        if let Some((placeholder, _)) = self.names.iter().find(|(_, n)| n.as_str() == name) {
            return placeholder.clone();
        }
        let placeholder = format!("#n{}", self.names.len());
        self.names.insert(placeholder.clone(), name.to_string());
        placeholder
    }

    pub(crate) fn value(&mut self, value: AttributeValue) -> String {
        let placeholder = format!(":v{}", self.values.len());
        self.values.insert(placeholder.clone(), value);
        placeholder
    }

    fn names(&self) -> Option<HashMap<String, String>> {
        (!self.names.is_empty()).then(|| self.names.clone())
    }

    fn values(&self) -> Option<HashMap<String, AttributeValue>> {
        (!self.values.is_empty()).then(|| self.values.clone())
    }
}

/// Render a condition as a DynamoDB condition expression.
pub(crate) fn render_condition(condition: &Condition, p: &mut Placeholders) -> String {
    match condition {
        Condition::Exists => format!("attribute_exists({})", p.name(PK)),
        Condition::NotExists => format!("attribute_not_exists({})", p.name(PK)),
        Condition::AttributeExists(name) => format!("attribute_exists({})", p.name(name)),
        Condition::AttributeNotExists(name) => {
            format!("attribute_not_exists({})", p.name(name))
        }
        Condition::AttributeEquals(name, value) => {
            let name = p.name(name);
            let value = p.value(to_attribute(value));
            format!("{} = {}", name, value)
        }
        Condition::And(inner) => inner
            .iter()
            .map(|c| format!("({})", render_condition(c, p)))
            .collect::<Vec<_>>()
            .join(" AND "),
    }
}

/// Render `SET`/`ADD` assignments as a DynamoDB update expression.
pub(crate) fn render_update(update: &Update, p: &mut Placeholders) -> String {
    let mut clauses = Vec::new();

    if !update.set.is_empty() {
        let assignments: Vec<String> = update
            .set
            .iter()
            .map(|(name, value)| {
                let name = p.name(name);
                let value = p.value(to_attribute(value));
                format!("{} = {}", name, value)
            })
            .collect();
        clauses.push(format!("SET {}", assignments.join(", ")));
    }

    if !update.add.is_empty() {
        let assignments: Vec<String> = update
            .add
            .iter()
            .map(|(name, delta)| {
                let name = p.name(name);
                let value = p.value(AttributeValue::N(delta.to_string()));
                format!("{} {}", name, value)
            })
            .collect();
        clauses.push(format!("ADD {}", assignments.join(", ")));
    }

    clauses.join(" ")
}

fn key_condition(query: &Query, p: &mut Placeholders) -> String {
    let (pk_name, sk_name) = match query.target {
        QueryTarget::Table => (PK, SK),
        QueryTarget::Index => (GSI_PK, GSI_SK),
    };
    let pk = p.name(pk_name);
    let partition = p.value(AttributeValue::S(query.partition.clone()));
    let mut expression = format!("{} = {}", pk, partition);

    match &query.sort {
        SortKeyCondition::Any => {}
        SortKeyCondition::Exact(sort) => {
            let sk = p.name(sk_name);
            let value = p.value(AttributeValue::S(sort.clone()));
            expression.push_str(&format!(" AND {} = {}", sk, value));
        }
        SortKeyCondition::BeginsWith(prefix) => {
            let sk = p.name(sk_name);
            let value = p.value(AttributeValue::S(prefix.clone()));
            expression.push_str(&format!(" AND begins_with({}, {})", sk, value));
        }
    }
    expression
}

fn exclusive_start_key(cursor: &Cursor) -> HashMap<String, AttributeValue> {
    let mut raw = DynamoStore::key_attributes(&cursor.key);
    if let Some(index) = &cursor.index_key {
        raw.insert(GSI_PK.to_string(), AttributeValue::S(index.pk.clone()));
        raw.insert(GSI_SK.to_string(), AttributeValue::S(index.sk.clone()));
    }
    raw
}

fn cursor_from(raw: &HashMap<String, AttributeValue>) -> Result<Cursor> {
    let pk = string_attribute(raw, PK)?.unwrap_or_default();
    let sk = string_attribute(raw, SK)?.unwrap_or_default();
    let index_key = match (string_attribute(raw, GSI_PK)?, string_attribute(raw, GSI_SK)?) {
        (Some(pk), Some(sk)) => Some(Key::new(pk, sk)),
        _ => None,
    };
    Ok(Cursor {
        key: Key::new(pk, sk),
        index_key,
    })
}

fn transient<E: std::error::Error + 'static>(op: &str, err: E) -> StorageError {
    StorageError::Transient(format!("DynamoDB {} failed: {}", op, DisplayErrorContext(err)))
}

#[async_trait]
impl Store for DynamoStore {
    async fn put(&self, item: Item, condition: Option<Condition>) -> Result<()> {
        let mut p = Placeholders::default();
        let condition_expression = condition.as_ref().map(|c| render_condition(c, &mut p));

        self.client
            .put_item()
            .table_name(&self.table_name)
            .set_item(Some(to_raw_item(&item)))
            .set_condition_expression(condition_expression)
            .set_expression_attribute_names(p.names())
            .set_expression_attribute_values(p.values())
            .send()
            .await
            .map_err(|e| match e {
                SdkError::ServiceError(ref inner)
                    if matches!(
                        inner.err(),
                        PutItemError::ConditionalCheckFailedException(_)
                    ) =>
                {
                    StorageError::conflict(&item.key)
                }
                other => transient("put_item", other),
            })?;

        debug!(pk = %item.key.pk, sk = %item.key.sk, "Stored item in DynamoDB");
        Ok(())
    }

    async fn get(&self, key: &Key) -> Result<Option<Item>> {
        let result = self
            .client
            .get_item()
            .table_name(&self.table_name)
            .set_key(Some(Self::key_attributes(key)))
            .consistent_read(true)
            .send()
            .await
            .map_err(|e| transient("get_item", e))?;

        result.item.as_ref().map(from_raw_item).transpose()
    }

    async fn query(&self, query: Query) -> Result<Page> {
        let mut p = Placeholders::default();
        let key_condition = key_condition(&query, &mut p);
        let index_name = match query.target {
            QueryTarget::Table => None,
            QueryTarget::Index => Some(self.index_name.clone()),
        };

        let result = self
            .client
            .query()
            .table_name(&self.table_name)
            .set_index_name(index_name)
            .key_condition_expression(key_condition)
            .set_expression_attribute_names(p.names())
            .set_expression_attribute_values(p.values())
            .set_limit(query.limit.map(|l| l.min(i32::MAX as usize) as i32))
            .set_exclusive_start_key(query.start.as_ref().map(exclusive_start_key))
            .send()
            .await
            .map_err(|e| transient("query", e))?;

        let items = result
            .items()
            .iter()
            .map(from_raw_item)
            .collect::<Result<Vec<_>>>()?;
        let next = result.last_evaluated_key().map(cursor_from).transpose()?;

        Ok(Page { items, next })
    }

    async fn update(&self, key: &Key, update: Update) -> Result<Item> {
        if update.is_empty() {
            return Err(StorageError::Malformed(format!(
                "empty update for {}/{}",
                key.pk, key.sk
            )));
        }

        let mut p = Placeholders::default();
        let update_expression = render_update(&update, &mut p);
        let condition_expression = update
            .condition
            .as_ref()
            .map(|c| render_condition(c, &mut p));

        let result = self
            .client
            .update_item()
            .table_name(&self.table_name)
            .set_key(Some(Self::key_attributes(key)))
            .update_expression(update_expression)
            .set_condition_expression(condition_expression)
            .set_expression_attribute_names(p.names())
            .set_expression_attribute_values(p.values())
            .return_values(ReturnValue::AllNew)
            .send()
            .await
            .map_err(|e| match e {
                SdkError::ServiceError(ref inner)
                    if matches!(
                        inner.err(),
                        UpdateItemError::ConditionalCheckFailedException(_)
                    ) =>
                {
                    StorageError::conflict(key)
                }
                other => transient("update_item", other),
            })?;

        match result.attributes() {
            Some(raw) => from_raw_item(raw),
            None => Err(StorageError::not_found(key)),
        }
    }

    async fn delete(&self, key: &Key, condition: Option<Condition>) -> Result<()> {
        let mut p = Placeholders::default();
        let condition_expression = condition.as_ref().map(|c| render_condition(c, &mut p));

        self.client
            .delete_item()
            .table_name(&self.table_name)
            .set_key(Some(Self::key_attributes(key)))
            .set_condition_expression(condition_expression)
            .set_expression_attribute_names(p.names())
            .set_expression_attribute_values(p.values())
            .send()
            .await
            .map_err(|e| match e {
                SdkError::ServiceError(ref inner)
                    if matches!(
                        inner.err(),
                        DeleteItemError::ConditionalCheckFailedException(_)
                    ) =>
                {
                    StorageError::conflict(key)
                }
                other => transient("delete_item", other),
            })?;

        debug!(pk = %key.pk, sk = %key.sk, "Deleted item from DynamoDB");
        Ok(())
    }
}

#[cfg(test)]
mod tests;

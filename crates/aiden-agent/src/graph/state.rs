use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use aiden_core::error::{AidenError, Result};

/// Field maintained by the runtime: the last node that ran.
pub const CURRENT_NODE: &str = "current_node";
/// Field maintained by the runtime: `running`, `hitl_review`, `completed` or `failed`.
pub const PHASE_STATUS: &str = "phase_status";
/// Field maintained by the runtime: the failure message, if any.
pub const ERROR: &str = "error";

/// How a node's value for a field is merged into the state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reducer {
    /// Replace the stored value.
    Overwrite,
    /// Extend the stored array. A non-array value is pushed as one item.
    Append,
    /// Add to the stored number.
    Sum,
}

#[derive(Debug, Clone)]
pub struct FieldSpec {
    pub reducer: Reducer,
    pub default: Value,
}

/// Declared fields of a machine's working state.
#[derive(Debug, Clone)]
pub struct StateSchema {
    fields: BTreeMap<String, FieldSpec>,
}

impl Default for StateSchema {
    fn default() -> Self {
        Self::new()
    }
}

impl StateSchema {
    /// A schema holding only the runtime fields.
    pub fn new() -> Self {
        Self {
            fields: BTreeMap::new(),
        }
        .overwrite(CURRENT_NODE, Value::Null)
        .overwrite(PHASE_STATUS, Value::String("running".into()))
        .overwrite(ERROR, Value::Null)
    }

    pub fn field(mut self, name: &str, reducer: Reducer, default: Value) -> Self {
        self.fields
            .insert(name.to_string(), FieldSpec { reducer, default });
        self
    }

    pub fn overwrite(self, name: &str, default: Value) -> Self {
        self.field(name, Reducer::Overwrite, default)
    }

    pub fn append(self, name: &str) -> Self {
        self.field(name, Reducer::Append, Value::Array(Vec::new()))
    }

    pub fn sum(self, name: &str) -> Self {
        self.field(name, Reducer::Sum, Value::from(0))
    }

    pub fn spec(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    /// Build the starting state: input values over declared defaults.
    pub fn initial_state(&self, input: Map<String, Value>) -> Result<GraphState> {
        if let Some(unknown) = input.keys().find(|k| !self.fields.contains_key(*k)) {
            return Err(AidenError::InvalidState(format!(
                "input field '{}' is not declared in the state schema",
                unknown
            )));
        }
        let mut values = Map::new();
        for (name, spec) in &self.fields {
            values.insert(name.clone(), spec.default.clone());
        }
        for (name, value) in input {
            values.insert(name, value);
        }
        Ok(GraphState(values))
    }

    /// Merge an update into `state`. Every field is checked before anything is
    /// written, so a rejected update leaves the state untouched.
    pub fn apply(&self, state: &mut GraphState, update: StateUpdate) -> Result<()> {
        for (name, value) in &update.0 {
            let spec = self.fields.get(name).ok_or_else(|| {
                AidenError::InvalidState(format!("update writes undeclared field '{}'", name))
            })?;
            if spec.reducer == Reducer::Sum && !value.is_number() {
                return Err(AidenError::InvalidState(format!(
                    "summed field '{}' received non-numeric value {}",
                    name, value
                )));
            }
        }

        for (name, value) in update.0 {
            let reducer = self.fields[&name].reducer;
            let slot = state.0.entry(name).or_insert(Value::Null);
            match reducer {
                Reducer::Overwrite => *slot = value,
                Reducer::Append => {
                    let mut items = match slot.take() {
                        Value::Array(items) => items,
                        Value::Null => Vec::new(),
                        other => vec![other],
                    };
                    match value {
                        Value::Array(more) => items.extend(more),
                        one => items.push(one),
                    }
                    *slot = Value::Array(items);
                }
                Reducer::Sum => *slot = add_numbers(slot, &value),
            }
        }
        Ok(())
    }
}

fn add_numbers(current: &Value, delta: &Value) -> Value {
    match (current.as_i64(), delta.as_i64()) {
        (Some(a), Some(b)) => Value::from(a.saturating_add(b)),
        _ => {
            let sum = current.as_f64().unwrap_or(0.0) + delta.as_f64().unwrap_or(0.0);
            serde_json::Number::from_f64(sum)
                .map(Value::Number)
                .unwrap_or(Value::Null)
        }
    }
}

/// A machine's working variables, as stored in checkpoints.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GraphState(Map<String, Value>);

impl GraphState {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key).filter(|v| !v.is_null())
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    /// Deserialize a field. A missing field reads as JSON null.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Result<T> {
        let value = self.0.get(key).cloned().unwrap_or(Value::Null);
        serde_json::from_value(value).map_err(|e| {
            AidenError::InvalidState(format!("state field '{}' has unexpected shape: {}", key, e))
        })
    }

    /// Runtime-owned write that bypasses reducers.
    pub(crate) fn set(&mut self, key: &str, value: Value) {
        self.0.insert(key.to_string(), value);
    }

    pub fn phase_status(&self) -> Option<&str> {
        self.get_str(PHASE_STATUS)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}

/// A node's partial update, merged through the schema's reducers.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateUpdate(Map<String, Value>);

impl StateUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.0.insert(key.to_string(), value.into());
        self
    }

    /// Serialize a typed value into the update.
    pub fn set_as<T: Serialize>(self, key: &str, value: &T) -> Result<Self> {
        let value = serde_json::to_value(value)?;
        Ok(self.set(key, value))
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

use dashmap::DashMap;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;

pub type FlowState = Arc<dyn FlowStateStore + Send + Sync + 'static>;

/// Per-session key/value store accumulating data collected across turns.
///
/// One instance per session; only one handler runs at a time for its owning
/// session, so writers never race.
pub trait FlowStateStore: Send + Sync + Debug {
    /// Gets the value associated with a key, if present.
    fn get(&self, key: &str) -> Option<StateValue>;

    /// Sets or replaces the value for a key.
    fn set(&self, key: String, value: StateValue);

    /// Returns true if the store contains a value for the key.
    fn contains(&self, key: &str) -> bool;

    /// Removes the value for a key.
    fn remove(&self, key: &str);

    /// Clears all keys.
    fn clear(&self);

    /// Returns all key-value pairs.
    fn all(&self) -> Vec<(String, StateValue)>;
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum StateValue {
    String(String),
    Number(f64),
    Boolean(bool),
    List(Vec<StateValue>),
    Map(#[schemars(with = "HashMap<String, StateValue>")] DashMap<String, StateValue>),
    Null,
}

impl PartialEq for StateValue {
    fn eq(&self, other: &Self) -> bool {
        use StateValue::*;
        match (self, other) {
            (String(a), String(b)) => a == b,
            (Number(a), Number(b)) => a == b,
            (Boolean(a), Boolean(b)) => a == b,
            (List(a), List(b)) => a == b,
            (Null, Null) => true,
            (Map(a), Map(b)) => {
                let a_map: HashMap<_, _> =
                    a.iter().map(|r| (r.key().clone(), r.value().clone())).collect();
                let b_map: HashMap<_, _> =
                    b.iter().map(|r| (r.key().clone(), r.value().clone())).collect();
                a_map == b_map
            }
            _ => false,
        }
    }
}

impl StateValue {
    pub fn as_str(&self) -> Option<&str> {
        if let StateValue::String(s) = self {
            Some(s)
        } else {
            None
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        if let StateValue::Number(n) = self {
            Some(*n)
        } else {
            None
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        if let StateValue::Boolean(b) = self {
            Some(*b)
        } else {
            None
        }
    }

    pub fn as_list(&self) -> Option<&Vec<StateValue>> {
        if let StateValue::List(l) = self {
            Some(l)
        } else {
            None
        }
    }

    pub fn as_map(&self) -> Option<&DashMap<String, StateValue>> {
        if let StateValue::Map(m) = self {
            Some(m)
        } else {
            None
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            StateValue::String(s) => json!(s),
            StateValue::Number(n) => json!(n),
            StateValue::Boolean(b) => json!(b),
            StateValue::List(l) => json!(l.iter().map(|v| v.to_json()).collect::<Vec<_>>()),
            StateValue::Map(m) => {
                let mut map = serde_json::Map::new();
                for r in m.iter() {
                    map.insert(r.key().clone(), r.value().to_json());
                }
                Value::Object(map)
            }
            StateValue::Null => Value::Null,
        }
    }
}

impl TryFrom<Value> for StateValue {
    type Error = ();

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::String(s) => Ok(StateValue::String(s)),
            Value::Number(n) => Ok(StateValue::Number(n.as_f64().ok_or(())?)),
            Value::Bool(b) => Ok(StateValue::Boolean(b)),
            Value::Array(a) => Ok(StateValue::List(
                a.into_iter().filter_map(|v| StateValue::try_from(v).ok()).collect(),
            )),
            Value::Object(o) => Ok(StateValue::Map(
                o.into_iter()
                    .filter_map(|(k, v)| Some((k, StateValue::try_from(v).ok()?)))
                    .collect(),
            )),
            Value::Null => Ok(StateValue::Null),
        }
    }
}

#[derive(Clone, Debug)]
pub struct InMemoryFlowState {
    store: Arc<DashMap<String, StateValue>>,
}

impl InMemoryFlowState {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            store: Arc::new(DashMap::new()),
        })
    }
}

impl FlowStateStore for InMemoryFlowState {
    fn get(&self, key: &str) -> Option<StateValue> {
        self.store.get(key).map(|v| v.clone())
    }

    fn set(&self, key: String, value: StateValue) {
        self.store.insert(key, value);
    }

    fn contains(&self, key: &str) -> bool {
        self.store.contains_key(key)
    }

    fn remove(&self, key: &str) {
        self.store.remove(key);
    }

    fn clear(&self) {
        self.store.clear();
    }

    fn all(&self) -> Vec<(String, StateValue)> {
        self.store
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_value_accessors() {
        let string = StateValue::String("hello".into());
        assert_eq!(string.as_str(), Some("hello"));
        assert_eq!(string.as_number(), None);

        let number = StateValue::Number(42.0);
        assert_eq!(number.as_number(), Some(42.0));
        assert_eq!(number.as_str(), None);

        let boolean = StateValue::Boolean(true);
        assert_eq!(boolean.as_bool(), Some(true));

        let list = StateValue::List(vec![StateValue::Null]);
        assert!(list.as_list().is_some());

        assert_eq!(StateValue::Null.as_str(), None);
    }

    #[test]
    fn test_state_value_json_round_trip() {
        let value = StateValue::try_from(json!({"salary": 30.0, "name": "Asha"})).unwrap();
        let map = value.as_map().expect("object becomes map");
        assert_eq!(
            map.get("name").map(|v| v.clone()),
            Some(StateValue::String("Asha".into()))
        );
        assert_eq!(value.to_json()["salary"], json!(30.0));
    }

    #[test]
    fn test_in_memory_state_store() {
        let store = InMemoryFlowState::new();

        store.set("name".to_string(), StateValue::String("Asha Rao".into()));
        store.set("salary_expectation".to_string(), StateValue::Number(30.0));

        assert!(store.contains("name"));
        assert_eq!(store.get("name"), Some(StateValue::String("Asha Rao".into())));
        assert_eq!(store.get("salary_expectation"), Some(StateValue::Number(30.0)));
        assert_eq!(store.get("motivation"), None);

        store.remove("name");
        assert!(!store.contains("name"));

        store.clear();
        assert!(store.all().is_empty());
    }

    #[test]
    fn test_state_overwrites_same_key() {
        let store = InMemoryFlowState::new();
        store.set("salary_expectation".to_string(), StateValue::Number(30.0));
        store.set("salary_expectation".to_string(), StateValue::Number(45.0));
        assert_eq!(store.get("salary_expectation"), Some(StateValue::Number(45.0)));
        assert_eq!(store.all().len(), 1);
    }
}

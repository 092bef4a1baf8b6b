//! Schema-less resource document: a JSON tree addressed by field paths.
//!
//! Lookups return `Ok(None)` when a field is absent and reserve `Err` for a
//! path that runs through a non-mapping value, or a leaf of the wrong type.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, PathError};
use crate::identity::ResourceType;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub struct Document(Value);

impl Default for Document {
    fn default() -> Self { Self::new() }
}

impl Document {
    /// Empty mapping.
    pub fn new() -> Self { Self(Value::Object(Map::new())) }

    /// `apiVersion`, `kind` and `metadata.{name,namespace}` filled in for `ty`.
    pub fn skeleton(ty: &ResourceType, namespace: &str, name: &str) -> Self {
        let mut meta = Map::new();
        meta.insert("name".into(), Value::String(name.to_string()));
        if !namespace.is_empty() {
            meta.insert("namespace".into(), Value::String(namespace.to_string()));
        }
        let mut root = Map::new();
        root.insert("apiVersion".into(), Value::String(ty.api_version()));
        root.insert("kind".into(), Value::String(ty.kind().to_string()));
        root.insert("metadata".into(), Value::Object(meta));
        Self(Value::Object(root))
    }

    pub fn from_value(v: Value) -> Result<Self, Error> {
        match v {
            Value::Object(_) => Ok(Self(v)),
            other => Err(Error::Invalid(format!("document root must be a mapping, got {}", type_name(&other)))),
        }
    }

    pub fn as_value(&self) -> &Value { &self.0 }
    pub fn into_value(self) -> Value { self.0 }

    pub fn get(&self, path: &[&str]) -> Result<Option<&Value>, PathError> {
        if path.is_empty() {
            return Err(PathError::EmptyPath);
        }
        let mut cur = &self.0;
        for (i, seg) in path.iter().enumerate() {
            let map = cur.as_object().ok_or_else(|| not_a_mapping(&path[..i]))?;
            match map.get(*seg) {
                Some(v) => cur = v,
                None => return Ok(None),
            }
        }
        Ok(Some(cur))
    }

    pub fn get_mut(&mut self, path: &[&str]) -> Result<Option<&mut Value>, PathError> {
        if path.is_empty() {
            return Err(PathError::EmptyPath);
        }
        let mut cur = &mut self.0;
        for (i, seg) in path.iter().enumerate() {
            let map = match cur.as_object_mut() {
                Some(m) => m,
                None => return Err(not_a_mapping(&path[..i])),
            };
            match map.get_mut(*seg) {
                Some(v) => cur = v,
                None => return Ok(None),
            }
        }
        Ok(Some(cur))
    }

    pub fn get_i64(&self, path: &[&str]) -> Result<Option<i64>, PathError> {
        self.typed(path, "integer", Value::as_i64)
    }

    pub fn get_str(&self, path: &[&str]) -> Result<Option<&str>, PathError> {
        self.typed(path, "string", Value::as_str)
    }

    pub fn get_bool(&self, path: &[&str]) -> Result<Option<bool>, PathError> {
        self.typed(path, "bool", Value::as_bool)
    }

    pub fn get_slice(&self, path: &[&str]) -> Result<Option<&Vec<Value>>, PathError> {
        self.typed(path, "sequence", Value::as_array)
    }

    pub fn get_map(&self, path: &[&str]) -> Result<Option<&Map<String, Value>>, PathError> {
        self.typed(path, "mapping", Value::as_object)
    }

    fn typed<'a, T>(
        &'a self,
        path: &[&str],
        expected: &'static str,
        extract: impl FnOnce(&'a Value) -> Option<T>,
    ) -> Result<Option<T>, PathError> {
        match self.get(path)? {
            None => Ok(None),
            Some(v) => match extract(v) {
                Some(t) => Ok(Some(t)),
                None => Err(PathError::TypeMismatch { path: path.join("."), expected, found: type_name(v) }),
            },
        }
    }

    /// Set a field, creating missing intermediate mappings.
    pub fn set(&mut self, path: &[&str], value: impl Into<Value>) -> Result<(), PathError> {
        let (last, parents) = path.split_last().ok_or(PathError::EmptyPath)?;
        let mut cur = &mut self.0;
        for (i, seg) in parents.iter().enumerate() {
            let map = match cur.as_object_mut() {
                Some(m) => m,
                None => return Err(not_a_mapping(&path[..i])),
            };
            cur = map.entry(seg.to_string()).or_insert_with(|| Value::Object(Map::new()));
        }
        match cur.as_object_mut() {
            Some(map) => {
                map.insert(last.to_string(), value.into());
                Ok(())
            }
            None => Err(not_a_mapping(parents)),
        }
    }

    /// Remove a field, returning the previous value if it was present.
    pub fn remove(&mut self, path: &[&str]) -> Result<Option<Value>, PathError> {
        let (last, parents) = path.split_last().ok_or(PathError::EmptyPath)?;
        let parent = if parents.is_empty() {
            Some(&mut self.0)
        } else {
            self.get_mut(parents)?
        };
        match parent {
            None => Ok(None),
            Some(v) => match v.as_object_mut() {
                Some(map) => Ok(map.shift_remove(*last)),
                None => Err(not_a_mapping(parents)),
            },
        }
    }

    pub fn api_version(&self) -> Option<&str> { self.get_str(&["apiVersion"]).ok().flatten() }
    pub fn kind(&self) -> Option<&str> { self.get_str(&["kind"]).ok().flatten() }
    pub fn name(&self) -> Option<&str> { self.get_str(&["metadata", "name"]).ok().flatten() }
    pub fn namespace(&self) -> Option<&str> { self.get_str(&["metadata", "namespace"]).ok().flatten() }
    pub fn uid(&self) -> Option<&str> { self.get_str(&["metadata", "uid"]).ok().flatten() }

    /// Optimistic-concurrency token assigned by the server.
    pub fn resource_version(&self) -> Option<&str> {
        self.get_str(&["metadata", "resourceVersion"]).ok().flatten()
    }

    pub fn labels(&self) -> Option<&Map<String, Value>> {
        self.get_map(&["metadata", "labels"]).ok().flatten()
    }
}

impl TryFrom<Value> for Document {
    type Error = Error;
    fn try_from(v: Value) -> Result<Self, Error> { Self::from_value(v) }
}

impl From<Document> for Value {
    fn from(d: Document) -> Value { d.0 }
}

fn not_a_mapping(prefix: &[&str]) -> PathError {
    PathError::NotAMapping { path: prefix.join(".") }
}

fn type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "sequence",
        Value::Object(_) => "mapping",
    }
}

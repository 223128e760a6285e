use std::path::Path;

use serde::de::DeserializeOwned;
use serde_yaml::{Mapping, Value};

use crate::error::{Result, TrainerError};

/// Layered experiment configuration addressed by dotted paths
/// (`training.terminal_condition.max_epochs`).
///
/// Lookups come in two flavours: `get*` returns `None` when a key is absent
/// (optional features), `require*` turns absence into
/// `TrainerError::MissingConfigKey` (structural keys).
#[derive(Debug, Clone, PartialEq)]
pub struct ParamTree {
    root: Value,
}

impl Default for ParamTree {
    fn default() -> Self {
        ParamTree { root: Value::Mapping(Mapping::new()) }
    }
}

impl ParamTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_yaml_str(text: &str) -> Result<ParamTree> {
        let root: Value = serde_yaml::from_str(text)?;
        match root {
            Value::Mapping(_) => Ok(ParamTree { root }),
            Value::Null => Ok(ParamTree::new()),
            _ => Err(TrainerError::invalid_config("<root>", "configuration must be a mapping")),
        }
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<ParamTree> {
        let text = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&text)
    }

    /// Loads several files; the first one listed has the highest precedence.
    pub fn from_yaml_files<P: AsRef<Path>>(paths: &[P]) -> Result<ParamTree> {
        let mut tree = ParamTree::new();
        for path in paths.iter().rev() {
            tree.overlay(&ParamTree::from_yaml_file(path)?);
        }
        Ok(tree)
    }

    /// Recursively copies `other` over `self`; `other` wins on conflicts.
    pub fn overlay(&mut self, other: &ParamTree) {
        merge(&mut self.root, &other.root, true);
    }

    /// Recursively copies `defaults` into keys that are still missing.
    pub fn add_defaults(&mut self, defaults: &ParamTree) {
        merge(&mut self.root, &defaults.root, false);
    }

    pub fn get(&self, path: &str) -> Option<&Value> {
        let mut node = &self.root;
        for part in path.split('.') {
            node = node.as_mapping()?.get(part)?;
        }
        if node.is_null() {
            None
        } else {
            Some(node)
        }
    }

    pub fn contains(&self, path: &str) -> bool {
        self.get(path).is_some()
    }

    pub fn require(&self, path: &str) -> Result<&Value> {
        self.get(path).ok_or_else(|| TrainerError::MissingConfigKey(path.to_string()))
    }

    pub fn get_str(&self, path: &str) -> Option<&str> {
        self.get(path).and_then(Value::as_str)
    }

    pub fn require_str(&self, path: &str) -> Result<&str> {
        self.require(path)?
            .as_str()
            .ok_or_else(|| TrainerError::invalid_config(path, "expected a string"))
    }

    pub fn get_f64(&self, path: &str) -> Result<Option<f64>> {
        match self.get(path) {
            None => Ok(None),
            Some(v) => v
                .as_f64()
                .map(Some)
                .ok_or_else(|| TrainerError::invalid_config(path, "expected a number")),
        }
    }

    pub fn get_usize(&self, path: &str) -> Result<Option<usize>> {
        match self.get(path) {
            None => Ok(None),
            Some(v) => v
                .as_u64()
                .map(|n| Some(n as usize))
                .ok_or_else(|| TrainerError::invalid_config(path, "expected a non-negative integer")),
        }
    }

    pub fn require_usize(&self, path: &str) -> Result<usize> {
        self.get_usize(path)?
            .ok_or_else(|| TrainerError::MissingConfigKey(path.to_string()))
    }

    pub fn get_bool(&self, path: &str) -> Result<Option<bool>> {
        match self.get(path) {
            None => Ok(None),
            Some(v) => v
                .as_bool()
                .map(Some)
                .ok_or_else(|| TrainerError::invalid_config(path, "expected a boolean")),
        }
    }

    /// Sub-tree at `path`, empty when absent.
    pub fn section(&self, path: &str) -> ParamTree {
        match self.get(path) {
            Some(v @ Value::Mapping(_)) => ParamTree { root: v.clone() },
            _ => ParamTree::new(),
        }
    }

    /// Deserializes the sub-tree at `path`; absent sections deserialize from `{}`.
    pub fn deserialize_section<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let value = self.section(path).root;
        serde_yaml::from_value(value)
            .map_err(|e| TrainerError::invalid_config(path, e.to_string()))
    }

    /// Inserts `value` at `path`, creating intermediate mappings.
    pub fn set(&mut self, path: &str, value: Value) {
        let mut node = &mut self.root;
        let mut parts = path.split('.').peekable();
        while let Some(part) = parts.next() {
            if !node.is_mapping() {
                *node = Value::Mapping(Mapping::new());
            }
            let map = match node.as_mapping_mut() {
                Some(map) => map,
                None => return,
            };
            let key = Value::String(part.to_string());
            if parts.peek().is_none() {
                map.insert(key, value);
                return;
            }
            node = map.entry(key).or_insert_with(|| Value::Mapping(Mapping::new()));
        }
    }

    pub fn as_value(&self) -> &Value {
        &self.root
    }

    pub fn to_yaml_string(&self) -> Result<String> {
        Ok(serde_yaml::to_string(&self.root)?)
    }
}

fn merge(dst: &mut Value, src: &Value, overwrite: bool) {
    match (dst, src) {
        (Value::Mapping(dst_map), Value::Mapping(src_map)) => {
            for (key, src_val) in src_map {
                match dst_map.get_mut(key) {
                    Some(dst_val) if dst_val.is_mapping() && src_val.is_mapping() => {
                        merge(dst_val, src_val, overwrite);
                    }
                    Some(dst_val) => {
                        if overwrite {
                            *dst_val = src_val.clone();
                        }
                    }
                    None => {
                        dst_map.insert(key.clone(), src_val.clone());
                    }
                }
            }
        }
        (dst, src) => {
            if overwrite {
                *dst = src.clone();
            }
        }
    }
}

use std::fmt;

use indexmap::IndexMap;

use crate::error::LoadError;

pub type ConfigMap = IndexMap<String, ConfigValue>;

/// A node of the configuration tree. Documents deserialize into this and all
/// higher-level views (schemas, cabs, recipes) are typed projections over it.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(untagged)]
pub enum ConfigValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    List(Vec<ConfigValue>),
    Map(ConfigMap),
}

impl Default for ConfigValue {
    fn default() -> Self {
        ConfigValue::Null
    }
}

impl ConfigValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            ConfigValue::Null => "null",
            ConfigValue::Bool(_) => "bool",
            ConfigValue::Int(_) => "int",
            ConfigValue::Float(_) => "float",
            ConfigValue::String(_) => "string",
            ConfigValue::List(_) => "list",
            ConfigValue::Map(_) => "mapping",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, ConfigValue::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ConfigValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            ConfigValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            ConfigValue::Float(f) => Some(*f),
            ConfigValue::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ConfigValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[ConfigValue]> {
        match self {
            ConfigValue::List(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&ConfigMap> {
        match self {
            ConfigValue::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_map_mut(&mut self) -> Option<&mut ConfigMap> {
        match self {
            ConfigValue::Map(m) => Some(m),
            _ => None,
        }
    }

    /// Truthiness for skip-conditions: false, 0, 0.0, "", "0", "false",
    /// null, and empty collections are false.
    pub fn is_truthy(&self) -> bool {
        match self {
            ConfigValue::Null => false,
            ConfigValue::Bool(b) => *b,
            ConfigValue::Int(i) => *i != 0,
            ConfigValue::Float(f) => *f != 0.0,
            ConfigValue::String(s) => !s.is_empty() && s != "0" && s.to_ascii_lowercase() != "false",
            ConfigValue::List(l) => !l.is_empty(),
            ConfigValue::Map(m) => !m.is_empty(),
        }
    }

    /// Looks up a dotted path. List elements are addressed by numeric segments.
    pub fn get_path(&self, path: &str) -> Option<&ConfigValue> {
        let mut cur = self;
        for seg in path.split('.') {
            cur = match cur {
                ConfigValue::Map(m) => m.get(seg)?,
                ConfigValue::List(l) => l.get(seg.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(cur)
    }

    /// Sets a dotted path, creating intermediate mappings as needed.
    pub fn set_path(&mut self, path: &str, value: ConfigValue) {
        let mut cur = self;
        let segments: Vec<&str> = path.split('.').collect();
        for (i, seg) in segments.iter().enumerate() {
            if !matches!(cur, ConfigValue::Map(_)) {
                *cur = ConfigValue::Map(ConfigMap::new());
            }
            let map = cur.as_map_mut().expect("coerced to mapping above");
            if i + 1 == segments.len() {
                map.insert(seg.to_string(), value);
                return;
            }
            cur = map
                .entry(seg.to_string())
                .or_insert_with(|| ConfigValue::Map(ConfigMap::new()));
        }
    }

    /// Removes a dotted path; returns the removed value if it was present.
    pub fn remove_path(&mut self, path: &str) -> Option<ConfigValue> {
        let (parent_path, leaf) = match path.rsplit_once('.') {
            Some((p, l)) => (Some(p), l),
            None => (None, path),
        };
        let parent = match parent_path {
            Some(p) => self.get_path_mut(p)?,
            None => self,
        };
        parent.as_map_mut()?.shift_remove(leaf)
    }

    fn get_path_mut(&mut self, path: &str) -> Option<&mut ConfigValue> {
        let mut cur = self;
        for seg in path.split('.') {
            cur = match cur {
                ConfigValue::Map(m) => m.get_mut(seg)?,
                ConfigValue::List(l) => l.get_mut(seg.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(cur)
    }

    /// Bridge into serde_json for typed deserialization of subtrees.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            ConfigValue::Null => serde_json::Value::Null,
            ConfigValue::Bool(b) => serde_json::Value::Bool(*b),
            ConfigValue::Int(i) => serde_json::Value::Number((*i).into()),
            ConfigValue::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            ConfigValue::String(s) => serde_json::Value::String(s.clone()),
            ConfigValue::List(l) => serde_json::Value::Array(l.iter().map(|v| v.to_json()).collect()),
            ConfigValue::Map(m) => serde_json::Value::Object(
                m.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
        }
    }

    pub fn from_json(value: &serde_json::Value) -> ConfigValue {
        match value {
            serde_json::Value::Null => ConfigValue::Null,
            serde_json::Value::Bool(b) => ConfigValue::Bool(*b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    ConfigValue::Int(i)
                } else {
                    ConfigValue::Float(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            serde_json::Value::String(s) => ConfigValue::String(s.clone()),
            serde_json::Value::Array(a) => {
                ConfigValue::List(a.iter().map(ConfigValue::from_json).collect())
            }
            serde_json::Value::Object(o) => ConfigValue::Map(
                o.iter()
                    .map(|(k, v)| (k.clone(), ConfigValue::from_json(v)))
                    .collect(),
            ),
        }
    }
}

/// Renders a value the way it should appear inside a substituted string.
impl fmt::Display for ConfigValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigValue::Null => Ok(()),
            ConfigValue::Bool(b) => write!(f, "{b}"),
            ConfigValue::Int(i) => write!(f, "{i}"),
            ConfigValue::Float(x) => write!(f, "{x}"),
            ConfigValue::String(s) => write!(f, "{s}"),
            ConfigValue::List(l) => {
                let items: Vec<String> = l.iter().map(|v| v.to_string()).collect();
                write!(f, "[{}]", items.join(","))
            }
            ConfigValue::Map(m) => {
                let items: Vec<String> = m.iter().map(|(k, v)| format!("{k}: {v}")).collect();
                write!(f, "{{{}}}", items.join(", "))
            }
        }
    }
}

/// Recursive deep merge: mapping ∪ mapping merges key-wise, any other pair is
/// overwritten by the later value. A mapping meeting a non-mapping (other than
/// null) is a structural conflict.
pub fn merge(into: &mut ConfigValue, from: ConfigValue) -> Result<(), LoadError> {
    merge_at(into, from, String::new())
}

fn merge_at(into: &mut ConfigValue, from: ConfigValue, path: String) -> Result<(), LoadError> {
    match (&mut *into, from) {
        (ConfigValue::Map(dst), ConfigValue::Map(src)) => {
            for (key, value) in src {
                let child_path = if path.is_empty() {
                    key.clone()
                } else {
                    format!("{path}.{key}")
                };
                match dst.get_mut(&key) {
                    Some(existing) => merge_at(existing, value, child_path)?,
                    None => {
                        dst.insert(key, value);
                    }
                }
            }
            Ok(())
        }
        (ConfigValue::Map(_), from @ (ConfigValue::List(_) | ConfigValue::String(_) | ConfigValue::Bool(_) | ConfigValue::Int(_) | ConfigValue::Float(_))) => {
            Err(LoadError::MergeConflict {
                path,
                left: "mapping",
                right: from.type_name(),
            })
        }
        (dst, ConfigValue::Null) => {
            // explicit null only overwrites scalars
            if !matches!(dst, ConfigValue::Map(_)) {
                *dst = ConfigValue::Null;
            }
            Ok(())
        }
        (dst, from) => {
            *dst = from;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn yaml(text: &str) -> ConfigValue {
        serde_yaml::from_str(text).unwrap()
    }

    #[test]
    fn merge_is_keywise_and_leaf_overwriting() {
        let mut a = yaml("x: {p: 1, q: 2}\ny: old");
        let b = yaml("x: {q: 3, r: 4}\ny: new");
        merge(&mut a, b).unwrap();
        assert_eq!(a.get_path("x.p"), Some(&ConfigValue::Int(1)));
        assert_eq!(a.get_path("x.q"), Some(&ConfigValue::Int(3)));
        assert_eq!(a.get_path("x.r"), Some(&ConfigValue::Int(4)));
        assert_eq!(a.get_path("y"), Some(&ConfigValue::String("new".into())));
    }

    #[test]
    fn merge_conflict_on_structural_mismatch() {
        let mut a = yaml("x: {p: 1}");
        let b = yaml("x: 5");
        assert!(matches!(
            merge(&mut a, b),
            Err(LoadError::MergeConflict { .. })
        ));
    }

    #[test]
    fn path_ops_roundtrip() {
        let mut tree = ConfigValue::Map(ConfigMap::new());
        tree.set_path("a.b.c", ConfigValue::Int(7));
        assert_eq!(tree.get_path("a.b.c"), Some(&ConfigValue::Int(7)));
        assert_eq!(tree.remove_path("a.b.c"), Some(ConfigValue::Int(7)));
        assert_eq!(tree.get_path("a.b.c"), None);
    }
}

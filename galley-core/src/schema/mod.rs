mod dtype;
mod typecheck;
mod validate;

pub use dtype::DType;
pub use typecheck::typecheck;
pub use validate::{validate_params, ValidateOptions};

use std::sync::LazyLock;

use indexmap::IndexMap;
use regex::Regex;

use crate::config::ConfigValue;
use crate::error::SchemaError;

/// Cosmetic classification of a parameter, used by help/documentation
/// consumers. Auto-assigned unless a schema pins it explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Required,
    Optional,
    Implicit,
    Obscure,
    Hidden,
}

/// How a parameter is turned into command-line arguments (or keyword
/// arguments, for the scripting flavours). All fields optional; unset fields
/// fall back to the cab-level policies, then to built-in defaults.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct ParameterPolicies {
    pub key_value: Option<bool>,
    pub positional: Option<bool>,
    pub positional_head: Option<bool>,
    /// For list values: "list" (--opt X Y), "[]" (--opt [X,Y]),
    /// "repeat" (--opt X --opt Y), or any other string as a join separator.
    pub repeat: Option<String>,
    pub prefix: Option<String>,
    pub skip: Option<bool>,
    pub skip_implicits: Option<bool>,
    pub disable_substitutions: Option<bool>,
    pub explicit_true: Option<String>,
    pub explicit_false: Option<String>,
    pub split: Option<String>,
    pub replace: Option<IndexMap<String, String>>,
    pub format: Option<String>,
    pub format_list: Option<Vec<String>>,
    pub format_list_scalar: Option<Vec<String>>,
    pub pass_missing_as_none: Option<bool>,
}

impl ParameterPolicies {
    /// Overlays `self` on top of `base`: set fields win, unset fields inherit.
    pub fn merged_over(&self, base: &ParameterPolicies) -> ParameterPolicies {
        macro_rules! pick {
            ($field:ident) => {
                self.$field.clone().or_else(|| base.$field.clone())
            };
        }
        ParameterPolicies {
            key_value: pick!(key_value),
            positional: pick!(positional),
            positional_head: pick!(positional_head),
            repeat: pick!(repeat),
            prefix: pick!(prefix),
            skip: pick!(skip),
            skip_implicits: pick!(skip_implicits),
            disable_substitutions: pick!(disable_substitutions),
            explicit_true: pick!(explicit_true),
            explicit_false: pick!(explicit_false),
            split: pick!(split),
            replace: pick!(replace),
            format: pick!(format),
            format_list: pick!(format_list),
            format_list_scalar: pick!(format_list_scalar),
            pass_missing_as_none: pick!(pass_missing_as_none),
        }
    }
}

/// The typed declaration of one parameter (input or output).
#[derive(Debug, Clone, PartialEq)]
pub struct Schema {
    pub info: String,
    pub dtype: DType,
    pub default: Option<ConfigValue>,
    pub required: Option<bool>,
    pub implicit: Option<ConfigValue>,
    pub choices: Vec<ConfigValue>,
    pub element_choices: Vec<ConfigValue>,
    pub writable: bool,
    pub must_exist: Option<bool>,
    pub mkdir: bool,
    pub remove_if_exists: bool,
    pub access_parent_dir: bool,
    pub skip_freshness_checks: bool,
    pub nom_de_guerre: Option<String>,
    pub policies: ParameterPolicies,
    pub aliases: Vec<String>,
    pub category: Option<Category>,
    pub tags: Vec<String>,
}

impl Default for Schema {
    fn default() -> Self {
        Schema {
            info: String::new(),
            dtype: DType::Str,
            default: None,
            required: None,
            implicit: None,
            choices: Vec::new(),
            element_choices: Vec::new(),
            writable: false,
            must_exist: None,
            mkdir: false,
            remove_if_exists: false,
            access_parent_dir: false,
            skip_freshness_checks: false,
            nom_de_guerre: None,
            policies: ParameterPolicies::default(),
            aliases: Vec::new(),
            category: None,
            tags: Vec::new(),
        }
    }
}

/// Serde-facing longhand form; `Schema` proper carries the parsed dtype.
/// The cosmetic CLI fields are accepted but not carried forward.
#[derive(Debug, Clone, Default, serde::Deserialize)]
#[serde(default, deny_unknown_fields)]
#[allow(dead_code)]
struct RawSchema {
    info: String,
    dtype: Option<String>,
    default: Option<serde_json::Value>,
    required: Option<bool>,
    implicit: Option<serde_json::Value>,
    choices: Option<Vec<serde_json::Value>>,
    element_choices: Option<Vec<serde_json::Value>>,
    writable: bool,
    must_exist: Option<bool>,
    mkdir: bool,
    remove_if_exists: bool,
    access_parent_dir: bool,
    skip_freshness_checks: bool,
    nom_de_guerre: Option<String>,
    policies: ParameterPolicies,
    aliases: Option<Vec<String>>,
    category: Option<Category>,
    tags: Option<Vec<String>>,
    metavar: Option<String>,
    abbreviation: Option<String>,
    metadata: Option<serde_json::Value>,
}

/// Attribute names recognized in a longhand schema mapping. A subsection
/// whose keys all fall outside this set is a nested group, not a parameter.
static SCHEMA_FIELDS: &[&str] = &[
    "info",
    "dtype",
    "default",
    "required",
    "implicit",
    "choices",
    "element_choices",
    "writable",
    "must_exist",
    "mkdir",
    "remove_if_exists",
    "access_parent_dir",
    "skip_freshness_checks",
    "nom_de_guerre",
    "policies",
    "aliases",
    "category",
    "tags",
    "metavar",
    "abbreviation",
    "metadata",
];

impl Schema {
    /// Parses a single schema entry: a longhand mapping or a shorthand
    /// string of the form `dtype [= default] [*] ["info"]`.
    pub fn from_value(name: &str, value: &ConfigValue) -> Result<Schema, SchemaError> {
        let schema = match value {
            ConfigValue::String(text) => Schema::from_shorthand(text)?,
            ConfigValue::Map(_) => {
                let raw: RawSchema =
                    serde_json::from_value(value.to_json()).map_err(|e| SchemaError::BadDeclaration {
                        name: name.to_string(),
                        message: e.to_string(),
                    })?;
                Schema::from_raw(raw)?
            }
            other => {
                return Err(SchemaError::BadDeclaration {
                    name: name.to_string(),
                    message: format!("expected mapping or shorthand string, got {}", other.type_name()),
                })
            }
        };
        // a parameter is at most one of {defaulted, required, implicit}
        let attrs = [
            schema.default.is_some(),
            schema.required == Some(true),
            schema.implicit.is_some(),
        ];
        if attrs.iter().filter(|set| **set).count() > 1 {
            return Err(SchemaError::ConflictingAttributes(name.to_string()));
        }
        Ok(schema)
    }

    fn from_raw(raw: RawSchema) -> Result<Schema, SchemaError> {
        let dtype = match raw.dtype.as_deref() {
            Some(text) => DType::parse(text)?,
            None => DType::Str,
        };
        Ok(Schema {
            info: raw.info,
            dtype,
            default: raw.default.as_ref().map(ConfigValue::from_json),
            required: raw.required,
            implicit: raw.implicit.as_ref().map(ConfigValue::from_json),
            choices: raw
                .choices
                .unwrap_or_default()
                .iter()
                .map(ConfigValue::from_json)
                .collect(),
            element_choices: raw
                .element_choices
                .unwrap_or_default()
                .iter()
                .map(ConfigValue::from_json)
                .collect(),
            writable: raw.writable,
            must_exist: raw.must_exist,
            mkdir: raw.mkdir,
            remove_if_exists: raw.remove_if_exists,
            access_parent_dir: raw.access_parent_dir,
            skip_freshness_checks: raw.skip_freshness_checks,
            nom_de_guerre: raw.nom_de_guerre,
            policies: raw.policies,
            aliases: raw.aliases.unwrap_or_default(),
            category: raw.category,
            tags: raw.tags.unwrap_or_default(),
        })
    }

    fn from_shorthand(text: &str) -> Result<Schema, SchemaError> {
        static SHORTHAND_RE: LazyLock<Regex> = LazyLock::new(|| {
            Regex::new(
                r#"^\s*(?P<dtype>[A-Za-z_][A-Za-z0-9_,\[\] ]*?)\s*(?:=\s*(?P<default>[^*"']+?)\s*)?(?P<required>\*)?\s*(?:"(?P<info>[^"]*)"|'(?P<info_sq>[^']*)')?\s*$"#,
            )
            .expect("valid regex")
        });
        let caps = SHORTHAND_RE
            .captures(text)
            .ok_or_else(|| SchemaError::BadShorthand(text.to_string()))?;
        let dtype = DType::parse(caps.name("dtype").map(|m| m.as_str()).unwrap_or("str"))?;
        let default = caps
            .name("default")
            .map(|m| parse_scalar(m.as_str().trim()));
        let required = caps.name("required").is_some().then_some(true);
        Ok(Schema {
            info: caps
                .name("info")
                .or_else(|| caps.name("info_sq"))
                .map(|m| m.as_str().to_string())
                .unwrap_or_default(),
            dtype,
            default,
            required,
            ..Schema::default()
        })
    }

    pub fn is_required(&self) -> bool {
        self.required == Some(true)
    }

    pub fn is_file_like(&self) -> bool {
        self.dtype.is_file_like()
    }

    pub fn is_file_list(&self) -> bool {
        self.dtype.is_file_list()
    }

    /// Auto-classified unless explicitly set.
    pub fn effective_category(&self) -> Category {
        if let Some(category) = self.category {
            return category;
        }
        if self.is_required() {
            Category::Required
        } else if self.implicit.is_some() {
            Category::Implicit
        } else {
            Category::Optional
        }
    }
}

/// Parses a shorthand default the way a YAML scalar would parse.
fn parse_scalar(text: &str) -> ConfigValue {
    serde_yaml::from_str::<ConfigValue>(text).unwrap_or_else(|_| ConfigValue::String(text.to_string()))
}

/// Parses a schema section (`inputs:` or `outputs:`) into a flat map.
/// Nested groups — subsections with no `dtype` and no known leaf attribute —
/// are flattened to dotted names (`group.member`).
pub fn parse_schema_section(
    section: &ConfigValue,
    label: &str,
) -> Result<IndexMap<String, Schema>, SchemaError> {
    let mut out = IndexMap::new();
    let map = match section {
        ConfigValue::Null => return Ok(out),
        ConfigValue::Map(m) => m,
        other => {
            return Err(SchemaError::BadDeclaration {
                name: label.to_string(),
                message: format!("expected mapping, got {}", other.type_name()),
            })
        }
    };
    flatten_section(&mut out, map, label, "")?;
    Ok(out)
}

fn flatten_section(
    out: &mut IndexMap<String, Schema>,
    map: &indexmap::IndexMap<String, ConfigValue>,
    label: &str,
    prefix: &str,
) -> Result<(), SchemaError> {
    for (name, value) in map {
        let full = format!("{prefix}{name}");
        match value {
            ConfigValue::Map(sub) if !looks_like_parameter(sub) => {
                flatten_section(out, sub, label, &format!("{full}."))?;
            }
            _ => {
                let schema = Schema::from_value(&format!("{label}.{full}"), value)?;
                out.insert(full, schema);
            }
        }
    }
    Ok(())
}

fn looks_like_parameter(map: &indexmap::IndexMap<String, ConfigValue>) -> bool {
    map.keys().all(|k| SCHEMA_FIELDS.contains(&k.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn yaml(text: &str) -> ConfigValue {
        serde_yaml::from_str(text).unwrap()
    }

    #[test]
    fn shorthand_forms() {
        let s = Schema::from_value("x", &yaml(r#""int = 5 'ignored'""#)).unwrap();
        assert_eq!(s.dtype, DType::Int);
        assert_eq!(s.default, Some(ConfigValue::Int(5)));

        let s = Schema::from_value("x", &yaml(r#""File *""#)).unwrap();
        assert_eq!(s.dtype, DType::File);
        assert!(s.is_required());

        let s = Schema::from_value("x", &yaml(r#""str = abc""#)).unwrap();
        assert_eq!(s.default, Some(ConfigValue::String("abc".into())));
    }

    #[test]
    fn longhand_with_conflicting_attributes_is_rejected() {
        let v = yaml("dtype: int\nrequired: true\ndefault: 3\n");
        assert!(matches!(
            Schema::from_value("x", &v),
            Err(SchemaError::ConflictingAttributes(_))
        ));
    }

    #[test]
    fn nested_groups_flatten_to_dotted_names() {
        let section = yaml(
            "g:\n  x:\n    dtype: int\n  y:\n    dtype: str\nplain:\n  dtype: File\n",
        );
        let schemas = parse_schema_section(&section, "inputs").unwrap();
        assert!(schemas.contains_key("g.x"));
        assert!(schemas.contains_key("g.y"));
        assert!(schemas.contains_key("plain"));
        assert_eq!(schemas["g.x"].dtype, DType::Int);
    }

    #[test]
    fn category_autoclassification() {
        let required = Schema {
            required: Some(true),
            ..Schema::default()
        };
        assert_eq!(required.effective_category(), Category::Required);
        let implicit = Schema {
            implicit: Some(ConfigValue::String("{current.x}.out".into())),
            ..Schema::default()
        };
        assert_eq!(implicit.effective_category(), Category::Implicit);
        let pinned = Schema {
            category: Some(Category::Obscure),
            ..Schema::default()
        };
        assert_eq!(pinned.effective_category(), Category::Obscure);
    }
}

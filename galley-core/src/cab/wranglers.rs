use regex::Regex;

use crate::config::ConfigValue;
use crate::error::SchemaError;

/// Severity a wrangler can re-emit a line at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Debug,
    Info,
    Warning,
    Error,
}

impl Severity {
    fn parse(text: &str) -> Option<Severity> {
        Some(match text {
            "DEBUG" => Severity::Debug,
            "INFO" => Severity::Info,
            "WARNING" => Severity::Warning,
            "ERROR" | "CRITICAL" | "FATAL" => Severity::Error,
            _ => return None,
        })
    }
}

/// Target dtype of a `PARSE_OUTPUT` capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureDType {
    Str,
    Bool,
    Int,
    Float,
    Json,
}

impl CaptureDType {
    fn parse(text: &str) -> Option<CaptureDType> {
        Some(match text {
            "str" => CaptureDType::Str,
            "bool" => CaptureDType::Bool,
            "int" | "integer" => CaptureDType::Int,
            "float" => CaptureDType::Float,
            "json" | "JSON" => CaptureDType::Json,
            _ => return None,
        })
    }

    /// Coerces captured text to the declared dtype. Json failures surface as
    /// `None` so the runtime can mark the cab failed.
    pub fn coerce(&self, text: &str) -> Option<ConfigValue> {
        Some(match self {
            CaptureDType::Str => ConfigValue::String(text.to_string()),
            CaptureDType::Bool => ConfigValue::Bool(matches!(text, "true" | "True" | "1")),
            CaptureDType::Int => ConfigValue::Int(text.trim().parse().ok()?),
            CaptureDType::Float => ConfigValue::Float(text.trim().parse().ok()?),
            CaptureDType::Json => {
                ConfigValue::from_json(&serde_json::from_str(text).ok()?)
            }
        })
    }
}

/// A `()`-group reference: by name or by number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupRef {
    Name(String),
    Index(usize),
}

/// One action applied to a matching output line.
#[derive(Debug, Clone, PartialEq)]
pub enum WranglerAction {
    /// Replace the matched portion in the displayed line.
    Replace { text: String },
    /// Annotate the line with a display style.
    Highlight { style: String },
    /// Re-emit the line at the given severity.
    Severity { level: Severity },
    /// Drop the line from display (captures still apply).
    Suppress,
    /// Append a warning reported at end of cab.
    Warning { message: String },
    /// Mark the run failed regardless of exit code. The optional message is
    /// a template receiving the pattern's named capture groups.
    Error { message: Option<String> },
    /// Mark the run successful regardless of exit code.
    DeclareSuccess,
    /// Coerce a named/numbered group and assign it to the named output.
    ParseOutput {
        name: String,
        group: GroupRef,
        dtype: CaptureDType,
    },
    /// Parse every named group as JSON and assign to like-named outputs.
    ParseJsonOutputs,
    /// Parse the first group as a JSON object, assigning its keys to outputs.
    ParseJsonOutputDict,
}

/// A compiled wrangler rule: a trigger pattern plus its ordered actions.
#[derive(Debug, Clone)]
pub struct WranglerRule {
    pub pattern: String,
    pub regex: Regex,
    pub actions: Vec<WranglerAction>,
}

impl PartialEq for WranglerRule {
    fn eq(&self, other: &Self) -> bool {
        self.pattern == other.pattern && self.actions == other.actions
    }
}

impl WranglerRule {
    /// Compiles a rule from a pattern and its action spec (a single string
    /// or a list of strings).
    pub fn compile(pattern: &str, spec: &ConfigValue) -> Result<WranglerRule, SchemaError> {
        let regex = Regex::new(pattern).map_err(|source| SchemaError::BadWranglerPattern {
            pattern: pattern.to_string(),
            source,
        })?;
        let specs: Vec<String> = match spec {
            ConfigValue::String(s) => vec![s.clone()],
            ConfigValue::List(items) => items
                .iter()
                .map(|item| {
                    item.as_str().map(str::to_string).ok_or_else(|| {
                        SchemaError::BadWranglerAction {
                            pattern: pattern.to_string(),
                            spec: item.to_string(),
                        }
                    })
                })
                .collect::<Result<_, _>>()?,
            other => {
                return Err(SchemaError::BadWranglerAction {
                    pattern: pattern.to_string(),
                    spec: other.to_string(),
                })
            }
        };
        let actions = specs
            .iter()
            .map(|s| parse_action(pattern, &regex, s))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(WranglerRule {
            pattern: pattern.to_string(),
            regex,
            actions,
        })
    }
}

fn parse_action(pattern: &str, regex: &Regex, spec: &str) -> Result<WranglerAction, SchemaError> {
    let bad = || SchemaError::BadWranglerAction {
        pattern: pattern.to_string(),
        spec: spec.to_string(),
    };

    if let Some(text) = spec.strip_prefix("REPLACE:") {
        return Ok(WranglerAction::Replace {
            text: text.to_string(),
        });
    }
    if let Some(style) = spec.strip_prefix("HIGHLIGHT:") {
        return Ok(WranglerAction::Highlight {
            style: style.to_string(),
        });
    }
    if let Some(level) = spec.strip_prefix("SEVERITY:") {
        let level = Severity::parse(level).ok_or_else(bad)?;
        return Ok(WranglerAction::Severity { level });
    }
    if spec == "SUPPRESS" {
        return Ok(WranglerAction::Suppress);
    }
    if let Some(message) = spec.strip_prefix("WARNING:") {
        return Ok(WranglerAction::Warning {
            message: message.to_string(),
        });
    }
    if spec == "ERROR" {
        return Ok(WranglerAction::Error { message: None });
    }
    if let Some(message) = spec.strip_prefix("ERROR:") {
        return Ok(WranglerAction::Error {
            message: Some(message.to_string()),
        });
    }
    if spec == "DECLARE_SUCCESS" {
        return Ok(WranglerAction::DeclareSuccess);
    }
    if spec == "PARSE_JSON_OUTPUTS" {
        if regex.capture_names().flatten().next().is_none() {
            return Err(bad());
        }
        return Ok(WranglerAction::ParseJsonOutputs);
    }
    if spec == "PARSE_JSON_OUTPUT_DICT" {
        if regex.captures_len() < 2 {
            return Err(bad());
        }
        return Ok(WranglerAction::ParseJsonOutputDict);
    }
    if let Some(rest) = spec.strip_prefix("PARSE_OUTPUT:") {
        // PARSE_OUTPUT:name:group:dtype or PARSE_OUTPUT:group:dtype
        let parts: Vec<&str> = rest.split(':').collect();
        let (name, group_text, dtype_text) = match parts.as_slice() {
            [group, dtype] => (None, *group, *dtype),
            [name, group, dtype] => (Some(*name), *group, *dtype),
            _ => return Err(bad()),
        };
        let dtype = CaptureDType::parse(dtype_text).ok_or_else(bad)?;
        let group = resolve_group(regex, group_text).ok_or_else(bad)?;
        let name = name
            .map(str::to_string)
            .unwrap_or_else(|| group_text.to_string());
        return Ok(WranglerAction::ParseOutput { name, group, dtype });
    }
    Err(bad())
}

fn resolve_group(regex: &Regex, text: &str) -> Option<GroupRef> {
    if regex.capture_names().flatten().any(|n| n == text) {
        return Some(GroupRef::Name(text.to_string()));
    }
    let index: usize = text.parse().ok()?;
    (index < regex.captures_len()).then_some(GroupRef::Index(index))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn yaml(text: &str) -> ConfigValue {
        serde_yaml::from_str(text).unwrap()
    }

    #[test]
    fn parses_the_action_table() {
        let rule = WranglerRule::compile(
            "No such file",
            &yaml(r#"[DECLARE_SUCCESS, "WARNING:deliberate"]"#),
        )
        .unwrap();
        assert_eq!(
            rule.actions,
            vec![
                WranglerAction::DeclareSuccess,
                WranglerAction::Warning {
                    message: "deliberate".to_string()
                },
            ]
        );
    }

    #[test]
    fn parse_output_resolves_named_groups() {
        let rule = WranglerRule::compile(
            r"brown (?P<eater>\w+) eats the (?P<num_dogs>\d+) lazy dogs",
            &yaml(r#"["PARSE_OUTPUT:eater:str", "PARSE_OUTPUT:num_dogs:int"]"#),
        )
        .unwrap();
        assert_eq!(rule.actions.len(), 2);
        assert!(matches!(
            &rule.actions[0],
            WranglerAction::ParseOutput {
                name,
                group: GroupRef::Name(g),
                dtype: CaptureDType::Str,
            } if name == "eater" && g == "eater"
        ));
    }

    #[test]
    fn bad_specs_are_rejected() {
        assert!(WranglerRule::compile("x", &yaml("NOT_A_THING")).is_err());
        assert!(WranglerRule::compile("x(", &yaml("SUPPRESS")).is_err());
        // PARSE_JSON_OUTPUTS needs named groups
        assert!(WranglerRule::compile("plain", &yaml("PARSE_JSON_OUTPUTS")).is_err());
        // unknown group
        assert!(
            WranglerRule::compile("x", &yaml(r#""PARSE_OUTPUT:nope:int""#)).is_err()
        );
    }
}

use indexmap::IndexMap;

use galley_core::cab::{CaptureDType, GroupRef, Severity, WranglerAction, WranglerRule};
use galley_core::config::ConfigValue;

/// Accumulated cab runtime status: declared success/failure, warnings, and
/// wrangler-captured outputs kept per capture tier so that precedence can be
/// applied once the cab exits.
#[derive(Debug, Default)]
pub struct CabStatus {
    declared_success: bool,
    declared_errors: Vec<String>,
    pub warnings: Vec<String>,
    outputs_parsed: IndexMap<String, ConfigValue>,
    outputs_json: IndexMap<String, ConfigValue>,
    outputs_dict: IndexMap<String, ConfigValue>,
}

impl CabStatus {
    pub fn declare_success(&mut self) {
        self.declared_success = true;
    }

    pub fn declare_failure(&mut self, message: String) {
        self.declared_errors.push(message);
    }

    pub fn success_declared(&self) -> bool {
        self.declared_success
    }

    /// Final verdict given the child's exit success. A wrangler `ERROR`
    /// fails the cab regardless of exit code; `DECLARE_SUCCESS` rescues a
    /// non-zero exit.
    pub fn verdict(&self, exit_ok: bool, exit_description: &str) -> Result<(), String> {
        if !self.declared_errors.is_empty() {
            return Err(self.declared_errors.join("; "));
        }
        if self.declared_success || exit_ok {
            return Ok(());
        }
        Err(exit_description.to_string())
    }

    /// Captured outputs merged over a base tier (a flavour's return-value
    /// captures): `PARSE_JSON_OUTPUT_DICT` overrides `PARSE_JSON_OUTPUTS`,
    /// which overrides `PARSE_OUTPUT`, which overrides the base. Within a
    /// tier, later lines already won at insert time.
    pub fn merged_outputs(&self) -> IndexMap<String, ConfigValue> {
        let mut out = IndexMap::new();
        for (name, value) in &self.outputs_parsed {
            out.insert(name.clone(), value.clone());
        }
        for (name, value) in &self.outputs_json {
            out.insert(name.clone(), value.clone());
        }
        for (name, value) in &self.outputs_dict {
            out.insert(name.clone(), value.clone());
        }
        out
    }
}

/// The disposition of one wrangled output line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrangledLine {
    /// None when a `SUPPRESS` action dropped the line from display.
    pub display: Option<String>,
    pub severity: Severity,
}

/// Runs a line through the wrangler pipeline. Every rule is attempted
/// independently in declaration order; a matching rule's actions run in
/// listed order. `SUPPRESS` affects display only — captures and status
/// changes still apply.
pub fn wrangle_line(
    rules: &[WranglerRule],
    line: &str,
    status: &mut CabStatus,
) -> WrangledLine {
    let mut display: Option<String> = Some(line.to_string());
    let mut severity = Severity::Info;

    for rule in rules {
        let Some(captures) = rule.regex.captures(line) else {
            continue;
        };
        for action in &rule.actions {
            match action {
                WranglerAction::Replace { text } => {
                    if let Some(current) = &display {
                        display = Some(rule.regex.replace_all(current, text.as_str()).into_owned());
                    }
                }
                WranglerAction::Highlight { style } => {
                    if let Some(current) = &display {
                        display = Some(format!("[{style}]{current}[/{style}]"));
                    }
                }
                WranglerAction::Severity { level } => severity = *level,
                WranglerAction::Suppress => display = None,
                WranglerAction::Warning { message } => {
                    status.warnings.push(message.clone());
                }
                WranglerAction::Error { message } => {
                    let rendered = match message {
                        Some(template) => fill_groups(template, &rule.regex, &captures),
                        None => format!(
                            "cab marked as failed based on encountering '{}' in output",
                            rule.pattern
                        ),
                    };
                    status.declare_failure(rendered);
                    severity = Severity::Error;
                }
                WranglerAction::DeclareSuccess => status.declare_success(),
                WranglerAction::ParseOutput { name, group, dtype } => {
                    let text = match group {
                        GroupRef::Name(g) => captures.name(g).map(|m| m.as_str()),
                        GroupRef::Index(i) => captures.get(*i).map(|m| m.as_str()),
                    };
                    if let Some(text) = text {
                        match dtype.coerce(text) {
                            Some(value) => {
                                status.outputs_parsed.insert(name.clone(), value);
                            }
                            None => status.declare_failure(format!(
                                "error parsing \"{text}\" for output '{name}'"
                            )),
                        }
                    }
                }
                WranglerAction::ParseJsonOutputs => {
                    for group_name in rule.regex.capture_names().flatten() {
                        let Some(text) = captures.name(group_name).map(|m| m.as_str()) else {
                            continue;
                        };
                        match CaptureDType::Json.coerce(text) {
                            Some(value) => {
                                status
                                    .outputs_json
                                    .insert(group_name.to_string(), value);
                            }
                            None => status.declare_failure(format!(
                                "error parsing \"{text}\" for output '{group_name}'"
                            )),
                        }
                    }
                }
                WranglerAction::ParseJsonOutputDict => {
                    let Some(text) = captures.get(1).map(|m| m.as_str()) else {
                        continue;
                    };
                    match serde_json::from_str::<serde_json::Value>(text) {
                        Ok(serde_json::Value::Object(entries)) => {
                            for (key, value) in &entries {
                                status
                                    .outputs_dict
                                    .insert(key.clone(), ConfigValue::from_json(value));
                            }
                        }
                        _ => status.declare_failure(format!(
                            "error parsing output dict from \"{text}\""
                        )),
                    }
                }
            }
        }
    }

    WrangledLine { display, severity }
}

/// Substitutes `{group}` references in an `ERROR:` message template with the
/// pattern's named captures.
fn fill_groups(template: &str, regex: &regex::Regex, captures: &regex::Captures<'_>) -> String {
    let mut out = template.to_string();
    for name in regex.capture_names().flatten() {
        if let Some(m) = captures.name(name) {
            out = out.replace(&format!("{{{name}}}"), m.as_str());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(pattern: &str, actions: &str) -> WranglerRule {
        let spec: ConfigValue = serde_yaml::from_str(actions).unwrap();
        WranglerRule::compile(pattern, &spec).unwrap()
    }

    #[test]
    fn declare_success_and_warning() {
        let rules = vec![rule(
            "No such file",
            r#"[DECLARE_SUCCESS, "WARNING:deliberate"]"#,
        )];
        let mut status = CabStatus::default();
        let line = wrangle_line(&rules, "cat: missing-file: No such file or directory", &mut status);
        assert!(line.display.is_some());
        assert_eq!(status.warnings, vec!["deliberate"]);
        assert!(status.verdict(false, "exit code 1").is_ok());
    }

    #[test]
    fn error_overrides_zero_exit() {
        let rules = vec![rule("fox", r#"["ERROR:Nobody expected the fox!"]"#)];
        let mut status = CabStatus::default();
        wrangle_line(&rules, "the quick brown fox", &mut status);
        let verdict = status.verdict(true, "");
        assert_eq!(verdict.unwrap_err(), "Nobody expected the fox!");
    }

    #[test]
    fn parse_output_captures_named_groups() {
        let rules = vec![rule(
            r"brown (?P<eater>\w+) eats the (?P<num_dogs>\d+) lazy dogs",
            r#"["PARSE_OUTPUT:eater:str", "PARSE_OUTPUT:num_dogs:int"]"#,
        )];
        let mut status = CabStatus::default();
        wrangle_line(&rules, "brown cow eats the 5 lazy dogs", &mut status);
        let outputs = status.merged_outputs();
        assert_eq!(outputs["eater"], ConfigValue::String("cow".into()));
        assert_eq!(outputs["num_dogs"], ConfigValue::Int(5));
    }

    #[test]
    fn suppress_affects_display_only() {
        let rules = vec![
            rule(r"value=(?P<v>\d+)", r#"["PARSE_OUTPUT:v:int"]"#),
            rule("value=", "[SUPPRESS]"),
        ];
        let mut status = CabStatus::default();
        let line = wrangle_line(&rules, "value=42", &mut status);
        assert_eq!(line.display, None);
        assert_eq!(status.merged_outputs()["v"], ConfigValue::Int(42));
    }

    #[test]
    fn dict_tier_overrides_parse_tier() {
        let rules = vec![
            rule(r"x=(?P<x>\d+)", r#"["PARSE_OUTPUT:x:int"]"#),
            rule(r"OUT (.*)", "[PARSE_JSON_OUTPUT_DICT]"),
        ];
        let mut status = CabStatus::default();
        wrangle_line(&rules, "x=1", &mut status);
        wrangle_line(&rules, r#"OUT {"x": 2}"#, &mut status);
        assert_eq!(status.merged_outputs()["x"], ConfigValue::Int(2));
    }

    #[test]
    fn later_lines_win_within_a_tier() {
        let rules = vec![rule(r"x=(?P<x>\d+)", r#"["PARSE_OUTPUT:x:int"]"#)];
        let mut status = CabStatus::default();
        wrangle_line(&rules, "x=1", &mut status);
        wrangle_line(&rules, "x=7", &mut status);
        assert_eq!(status.merged_outputs()["x"], ConfigValue::Int(7));
    }

    #[test]
    fn replace_and_severity() {
        let rules = vec![rule("secret", r#"["REPLACE:[redacted]", "SEVERITY:WARNING"]"#)];
        let mut status = CabStatus::default();
        let line = wrangle_line(&rules, "the secret value", &mut status);
        assert_eq!(line.display.as_deref(), Some("the [redacted] value"));
        assert_eq!(line.severity, Severity::Warning);
    }
}

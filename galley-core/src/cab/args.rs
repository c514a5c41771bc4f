use indexmap::IndexMap;

use super::Cab;
use crate::config::ConfigValue;
use crate::error::ValidationError;
use crate::schema::{ParameterPolicies, Schema};

/// Synthesizes the argv tail for a binary-flavoured cab from its bound
/// parameters. Ordering: `positional_head` first, then keyed options in
/// schema declaration order, then remaining `positional` parameters.
pub fn build_argv(
    cab: &Cab,
    params: &IndexMap<String, ConfigValue>,
) -> Result<Vec<String>, ValidationError> {
    let mut head = Vec::new();
    let mut keyed = Vec::new();
    let mut tail = Vec::new();

    for (name, schema) in cab.inputs.iter().chain(cab.outputs.iter()) {
        let policies = schema.policies.merged_over(&cab.policies);
        if policies.skip == Some(true) {
            continue;
        }
        if schema.implicit.is_some() && policies.skip_implicits.unwrap_or(false) {
            continue;
        }
        let Some(value) = params.get(name) else {
            continue;
        };

        let option_name = rendered_name(name, schema, &policies);
        if policies.positional_head == Some(true) {
            head.extend(positional_values(name, value, &policies)?);
        } else if policies.positional == Some(true) {
            tail.extend(positional_values(name, value, &policies)?);
        } else {
            keyed.extend(keyed_option(name, &option_name, value, &policies)?);
        }
    }

    head.extend(keyed);
    head.extend(tail);
    Ok(head)
}

fn rendered_name(name: &str, schema: &Schema, policies: &ParameterPolicies) -> String {
    let mut rendered = schema
        .nom_de_guerre
        .clone()
        .unwrap_or_else(|| name.to_string());
    if let Some(replacements) = &policies.replace {
        for (from, to) in replacements {
            rendered = rendered.replace(from.as_str(), to.as_str());
        }
    }
    rendered
}

/// Renders a value into its argument strings, honoring split and the
/// formatting policies.
fn value_strings(
    name: &str,
    value: &ConfigValue,
    policies: &ParameterPolicies,
) -> Result<Vec<String>, ValidationError> {
    let rendered: Vec<String> = match value {
        ConfigValue::List(items) => {
            if let Some(templates) = &policies.format_list {
                // one template per element, consuming the whole list
                let strings: Vec<String> = items.iter().map(|v| v.to_string()).collect();
                templates
                    .iter()
                    .map(|t| format_template(t, &strings, name))
                    .collect::<Result<_, _>>()?
            } else if let Some(template) = &policies.format {
                items
                    .iter()
                    .map(|v| format_template(template, &[v.to_string()], name))
                    .collect::<Result<_, _>>()?
            } else {
                items.iter().map(|v| v.to_string()).collect()
            }
        }
        scalar => {
            let text = scalar.to_string();
            if let Some(templates) = &policies.format_list_scalar {
                templates
                    .iter()
                    .map(|t| format_template(t, &[text.clone()], name))
                    .collect::<Result<_, _>>()?
            } else if let Some(template) = &policies.format {
                vec![format_template(template, &[text], name)?]
            } else {
                vec![text]
            }
        }
    };

    if let Some(separator) = &policies.split {
        if !separator.is_empty() {
            return Ok(rendered
                .iter()
                .flat_map(|s| s.split(separator.as_str()))
                .map(str::to_string)
                .collect());
        }
    }
    Ok(rendered)
}

fn positional_values(
    name: &str,
    value: &ConfigValue,
    policies: &ParameterPolicies,
) -> Result<Vec<String>, ValidationError> {
    value_strings(name, value, policies)
}

fn keyed_option(
    name: &str,
    option_name: &str,
    value: &ConfigValue,
    policies: &ParameterPolicies,
) -> Result<Vec<String>, ValidationError> {
    let prefix = policies.prefix.clone().unwrap_or_else(|| "--".to_string());
    let option = format!("{prefix}{option_name}");

    if policies.key_value == Some(true) {
        let values = value_strings(name, value, policies)?;
        return Ok(vec![format!("{option_name}={}", values.join(","))]);
    }

    // booleans: presence-style flags unless explicit values are configured
    if let ConfigValue::Bool(flag) = value {
        return Ok(if *flag {
            match &policies.explicit_true {
                Some(text) => vec![option, text.clone()],
                None => vec![option],
            }
        } else {
            match &policies.explicit_false {
                Some(text) => vec![option, text.clone()],
                None => vec![],
            }
        });
    }

    let values = value_strings(name, value, policies)?;
    if let ConfigValue::List(_) = value {
        let repeat = policies.repeat.as_deref().unwrap_or("list");
        return Ok(match repeat {
            "list" => {
                let mut args = vec![option];
                args.extend(values);
                args
            }
            "[]" => vec![option, format!("[{}]", values.join(","))],
            "repeat" => values
                .into_iter()
                .flat_map(|v| [option.clone(), v])
                .collect(),
            separator => vec![option, values.join(separator)],
        });
    }

    let mut args = vec![option];
    args.extend(values);
    Ok(args)
}

/// A minimal format-template: `{}` and `{0}`..`{n}` insert the rendered
/// value(s); anything else is kept verbatim.
fn format_template(
    template: &str,
    values: &[String],
    name: &str,
) -> Result<String, ValidationError> {
    let mut out = String::with_capacity(template.len());
    let mut chars = template.chars().peekable();
    while let Some(ch) = chars.next() {
        if ch != '{' {
            out.push(ch);
            continue;
        }
        if chars.peek() == Some(&'{') {
            chars.next();
            out.push('{');
            continue;
        }
        let mut inner = String::new();
        for c in chars.by_ref() {
            if c == '}' {
                break;
            }
            inner.push(c);
        }
        let index = if inner.is_empty() {
            0
        } else {
            inner
                .parse::<usize>()
                .map_err(|_| ValidationError::TypeMismatch {
                    name: name.to_string(),
                    got: format!("format template '{template}'"),
                    want: "numbered placeholder".to_string(),
                })?
        };
        match values.get(index) {
            Some(v) => out.push_str(v),
            None => {
                return Err(ValidationError::TypeMismatch {
                    name: name.to_string(),
                    got: format!("format template '{template}'"),
                    want: format!("at most {} placeholder(s)", values.len()),
                })
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cab::Cab;
    use crate::schema::DType;

    fn cab_with(inputs: &[(&str, Schema)]) -> Cab {
        let mut cab = Cab::bare("tool", "tool-cmd");
        for (name, schema) in inputs {
            cab.inputs.insert(name.to_string(), schema.clone());
        }
        cab
    }

    fn schema() -> Schema {
        Schema::default()
    }

    #[test]
    fn ordering_is_head_keyed_positional() {
        let mut input_file = schema();
        input_file.policies.positional_head = Some(true);
        let mut output_file = schema();
        output_file.policies.positional = Some(true);
        let cab = cab_with(&[
            ("opt", schema()),
            ("out", output_file),
            ("in", input_file),
        ]);
        let mut params = IndexMap::new();
        params.insert("in".to_string(), ConfigValue::String("a.txt".into()));
        params.insert("out".to_string(), ConfigValue::String("b.txt".into()));
        params.insert("opt".to_string(), ConfigValue::Int(3));
        let argv = build_argv(&cab, &params).unwrap();
        assert_eq!(argv, vec!["a.txt", "--opt", "3", "b.txt"]);
    }

    #[test]
    fn boolean_flags_and_explicit_values() {
        let mut explicit = schema();
        explicit.dtype = DType::Bool;
        explicit.policies.explicit_true = Some("yes".to_string());
        explicit.policies.explicit_false = Some("no".to_string());
        let cab = cab_with(&[("flag", schema()), ("tristate", explicit)]);

        let mut params = IndexMap::new();
        params.insert("flag".to_string(), ConfigValue::Bool(true));
        params.insert("tristate".to_string(), ConfigValue::Bool(false));
        let argv = build_argv(&cab, &params).unwrap();
        assert_eq!(argv, vec!["--flag", "--tristate", "no"]);

        let mut params = IndexMap::new();
        params.insert("flag".to_string(), ConfigValue::Bool(false));
        let argv = build_argv(&cab, &params).unwrap();
        assert!(argv.is_empty());
    }

    #[test]
    fn list_repeat_policies() {
        let list = ConfigValue::List(vec![ConfigValue::Int(1), ConfigValue::Int(2)]);

        let mut repeat = schema();
        repeat.policies.repeat = Some("repeat".to_string());
        let cab = cab_with(&[("x", repeat)]);
        let mut params = IndexMap::new();
        params.insert("x".to_string(), list.clone());
        assert_eq!(
            build_argv(&cab, &params).unwrap(),
            vec!["--x", "1", "--x", "2"]
        );

        let mut bracket = schema();
        bracket.policies.repeat = Some("[]".to_string());
        let cab = cab_with(&[("x", bracket)]);
        assert_eq!(build_argv(&cab, &params).unwrap(), vec!["--x", "[1,2]"]);

        let mut joined = schema();
        joined.policies.repeat = Some(",".to_string());
        let cab = cab_with(&[("x", joined)]);
        assert_eq!(build_argv(&cab, &params).unwrap(), vec!["--x", "1,2"]);
    }

    #[test]
    fn nom_de_guerre_and_prefix() {
        let mut renamed = schema();
        renamed.nom_de_guerre = Some("real-name".to_string());
        renamed.policies.prefix = Some("-".to_string());
        let cab = cab_with(&[("alias", renamed)]);
        let mut params = IndexMap::new();
        params.insert("alias".to_string(), ConfigValue::Int(1));
        assert_eq!(build_argv(&cab, &params).unwrap(), vec!["-real-name", "1"]);
    }

    #[test]
    fn key_value_policy() {
        let mut kv = schema();
        kv.policies.key_value = Some(true);
        let cab = cab_with(&[("x", kv)]);
        let mut params = IndexMap::new();
        params.insert("x".to_string(), ConfigValue::Int(5));
        assert_eq!(build_argv(&cab, &params).unwrap(), vec!["x=5"]);
    }

    #[test]
    fn format_templates() {
        let mut fmt = schema();
        fmt.policies.format = Some("pre-{}".to_string());
        let cab = cab_with(&[("x", fmt)]);
        let mut params = IndexMap::new();
        params.insert("x".to_string(), ConfigValue::Int(5));
        assert_eq!(build_argv(&cab, &params).unwrap(), vec!["--x", "pre-5"]);
    }
}

use super::{DType, Schema};
use crate::config::ConfigValue;
use crate::error::ValidationError;

/// Checks a value against a schema, coercing string representations where a
/// unique parse exists, and enforcing `choices`/`element_choices`.
pub fn typecheck(
    name: &str,
    value: &ConfigValue,
    schema: &Schema,
) -> Result<ConfigValue, ValidationError> {
    let coerced = coerce(name, value, &schema.dtype)?;
    if !schema.choices.is_empty() && !schema.choices.contains(&coerced) {
        return Err(ValidationError::BadChoice {
            name: name.to_string(),
            value: coerced.to_string(),
        });
    }
    if !schema.element_choices.is_empty() {
        if let ConfigValue::List(items) = &coerced {
            for item in items {
                if !schema.element_choices.contains(item) {
                    return Err(ValidationError::BadChoice {
                        name: name.to_string(),
                        value: item.to_string(),
                    });
                }
            }
        }
    }
    Ok(coerced)
}

fn mismatch(name: &str, value: &ConfigValue, want: &DType) -> ValidationError {
    ValidationError::TypeMismatch {
        name: name.to_string(),
        got: format!("{} '{}'", value.type_name(), value),
        want: want.to_string(),
    }
}

fn coerce(name: &str, value: &ConfigValue, want: &DType) -> Result<ConfigValue, ValidationError> {
    match want {
        DType::Str => match value {
            ConfigValue::String(_) => Ok(value.clone()),
            ConfigValue::Bool(_) | ConfigValue::Int(_) | ConfigValue::Float(_) => {
                Ok(ConfigValue::String(value.to_string()))
            }
            _ => Err(mismatch(name, value, want)),
        },
        DType::Int => match value {
            ConfigValue::Int(_) => Ok(value.clone()),
            ConfigValue::Bool(b) => Ok(ConfigValue::Int(*b as i64)),
            ConfigValue::Float(f) if f.fract() == 0.0 => Ok(ConfigValue::Int(*f as i64)),
            ConfigValue::String(s) => s
                .trim()
                .parse::<i64>()
                .map(ConfigValue::Int)
                .map_err(|_| mismatch(name, value, want)),
            _ => Err(mismatch(name, value, want)),
        },
        DType::Float => match value {
            ConfigValue::Float(_) => Ok(value.clone()),
            ConfigValue::Int(i) => Ok(ConfigValue::Float(*i as f64)),
            ConfigValue::String(s) => s
                .trim()
                .parse::<f64>()
                .map(ConfigValue::Float)
                .map_err(|_| mismatch(name, value, want)),
            _ => Err(mismatch(name, value, want)),
        },
        DType::Bool => match value {
            ConfigValue::Bool(_) => Ok(value.clone()),
            ConfigValue::Int(i) => Ok(ConfigValue::Bool(*i != 0)),
            ConfigValue::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" => Ok(ConfigValue::Bool(true)),
                "false" | "0" | "no" => Ok(ConfigValue::Bool(false)),
                _ => Err(mismatch(name, value, want)),
            },
            _ => Err(mismatch(name, value, want)),
        },
        DType::File | DType::Directory | DType::MS | DType::URI => match value {
            ConfigValue::String(_) => Ok(value.clone()),
            _ => Err(mismatch(name, value, want)),
        },
        DType::List(inner) => {
            let items: Vec<ConfigValue> = match value {
                ConfigValue::List(items) => items.clone(),
                // "[1, 2]"-style strings parse as flow lists
                ConfigValue::String(s) if s.trim_start().starts_with('[') => {
                    match serde_yaml::from_str::<ConfigValue>(s) {
                        Ok(ConfigValue::List(items)) => items,
                        _ => return Err(mismatch(name, value, want)),
                    }
                }
                // a lone scalar is promoted to a single-element list
                other => vec![other.clone()],
            };
            let coerced: Result<Vec<ConfigValue>, ValidationError> = items
                .iter()
                .map(|item| coerce(name, item, inner))
                .collect();
            Ok(ConfigValue::List(coerced?))
        }
        DType::Tuple(types) => {
            let items = value.as_list().ok_or_else(|| mismatch(name, value, want))?;
            if items.len() != types.len() {
                return Err(mismatch(name, value, want));
            }
            let coerced: Result<Vec<ConfigValue>, ValidationError> = items
                .iter()
                .zip(types)
                .map(|(item, t)| coerce(name, item, t))
                .collect();
            Ok(ConfigValue::List(coerced?))
        }
        DType::Union(types) => types
            .iter()
            .find_map(|t| coerce(name, value, t).ok())
            .ok_or_else(|| mismatch(name, value, want)),
        DType::Dict(_, value_type) => {
            let map = value.as_map().ok_or_else(|| mismatch(name, value, want))?;
            let mut out = indexmap::IndexMap::new();
            for (k, v) in map {
                out.insert(k.clone(), coerce(name, v, value_type)?);
            }
            Ok(ConfigValue::Map(out))
        }
        DType::Optional(inner) => match value {
            ConfigValue::Null => Ok(ConfigValue::Null),
            other => coerce(name, other, inner),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Schema;

    fn schema(dtype: &str) -> Schema {
        Schema {
            dtype: DType::parse(dtype).unwrap(),
            ..Schema::default()
        }
    }

    #[test]
    fn scalar_coercions() {
        assert_eq!(
            typecheck("x", &ConfigValue::String("5".into()), &schema("int")).unwrap(),
            ConfigValue::Int(5)
        );
        assert_eq!(
            typecheck("x", &ConfigValue::String("2.5".into()), &schema("float")).unwrap(),
            ConfigValue::Float(2.5)
        );
        assert_eq!(
            typecheck("x", &ConfigValue::String("true".into()), &schema("bool")).unwrap(),
            ConfigValue::Bool(true)
        );
        assert!(typecheck("x", &ConfigValue::String("5x".into()), &schema("int")).is_err());
    }

    #[test]
    fn list_coercion_from_string_and_scalar() {
        assert_eq!(
            typecheck("x", &ConfigValue::String("[1, 2]".into()), &schema("List[int]")).unwrap(),
            ConfigValue::List(vec![ConfigValue::Int(1), ConfigValue::Int(2)])
        );
        assert_eq!(
            typecheck("x", &ConfigValue::Int(3), &schema("List[int]")).unwrap(),
            ConfigValue::List(vec![ConfigValue::Int(3)])
        );
    }

    #[test]
    fn choices_are_enforced() {
        let mut s = schema("str");
        s.choices = vec![
            ConfigValue::String("a".into()),
            ConfigValue::String("b".into()),
        ];
        assert!(typecheck("x", &ConfigValue::String("a".into()), &s).is_ok());
        assert!(matches!(
            typecheck("x", &ConfigValue::String("c".into()), &s),
            Err(ValidationError::BadChoice { .. })
        ));
    }

    #[test]
    fn union_takes_first_matching_branch() {
        let s = schema("Union[int, str]");
        assert_eq!(
            typecheck("x", &ConfigValue::String("7".into()), &s).unwrap(),
            ConfigValue::Int(7)
        );
        assert_eq!(
            typecheck("x", &ConfigValue::String("seven".into()), &s).unwrap(),
            ConfigValue::String("seven".into())
        );
    }
}

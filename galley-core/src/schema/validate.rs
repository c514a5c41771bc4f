use indexmap::IndexMap;

use super::{typecheck, Schema};
use crate::config::ConfigValue;
use crate::error::ValidationError;

/// What a validation pass should enforce. Prevalidation runs loosely;
/// just-before-step validation runs with everything on.
#[derive(Debug, Clone, Copy, Default)]
pub struct ValidateOptions {
    pub check_unknowns: bool,
    pub check_required: bool,
    pub check_exist: bool,
    pub create_dirs: bool,
    pub remove_if_exists: bool,
}

/// Validates a parameter map against a schema map: fills defaults, typechecks
/// and coerces, and applies the filesystem-facing schema attributes
/// (`must_exist`, `mkdir`, `remove_if_exists`).
pub fn validate_params(
    params: &IndexMap<String, ConfigValue>,
    schemas: &IndexMap<String, Schema>,
    defaults: &IndexMap<String, ConfigValue>,
    options: ValidateOptions,
) -> Result<IndexMap<String, ConfigValue>, ValidationError> {
    if options.check_unknowns {
        for name in params.keys() {
            if !schemas.contains_key(name) {
                return Err(ValidationError::UnknownParameter { name: name.clone() });
            }
        }
    }

    let mut out = IndexMap::new();
    for (name, schema) in schemas {
        let value = params
            .get(name)
            .or_else(|| defaults.get(name))
            .or(schema.default.as_ref());
        let Some(value) = value else {
            if options.check_required && schema.is_required() {
                return Err(ValidationError::MissingRequired { name: name.clone() });
            }
            continue;
        };
        if value.is_null() && !matches!(schema.dtype, super::DType::Optional(_)) {
            continue;
        }
        let coerced = typecheck(name, value, schema)?;
        apply_file_attributes(name, &coerced, schema, options)?;
        out.insert(name.clone(), coerced);
    }
    Ok(out)
}

fn apply_file_attributes(
    name: &str,
    value: &ConfigValue,
    schema: &Schema,
    options: ValidateOptions,
) -> Result<(), ValidationError> {
    if !(schema.is_file_like() || schema.is_file_list()) {
        return Ok(());
    }
    let paths: Vec<String> = match value {
        ConfigValue::String(s) => vec![s.clone()],
        ConfigValue::List(items) => items
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        _ => return Ok(()),
    };
    for path in &paths {
        let p = std::path::Path::new(path);
        if options.check_exist && schema.must_exist == Some(true) && !p.exists() {
            return Err(ValidationError::MustExist {
                name: name.to_string(),
                path: path.clone(),
            });
        }
        if options.create_dirs && (schema.mkdir || schema.access_parent_dir) {
            if let Some(parent) = p.parent() {
                if !parent.as_os_str().is_empty() && !parent.exists() {
                    std::fs::create_dir_all(parent).map_err(|source| ValidationError::Mkdir {
                        name: name.to_string(),
                        path: parent.display().to_string(),
                        source,
                    })?;
                }
            }
        }
        if options.remove_if_exists && schema.remove_if_exists && p.exists() {
            let removed = if p.is_dir() && !p.is_symlink() {
                std::fs::remove_dir_all(p)
            } else {
                std::fs::remove_file(p)
            };
            removed.map_err(|source| ValidationError::Mkdir {
                name: name.to_string(),
                path: path.clone(),
                source,
            })?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::DType;

    fn schemas(entries: &[(&str, Schema)]) -> IndexMap<String, Schema> {
        entries
            .iter()
            .map(|(n, s)| (n.to_string(), s.clone()))
            .collect()
    }

    #[test]
    fn defaults_fill_missing_parameters() {
        let schema = Schema {
            dtype: DType::Int,
            default: Some(ConfigValue::Int(42)),
            ..Schema::default()
        };
        let out = validate_params(
            &IndexMap::new(),
            &schemas(&[("x", schema)]),
            &IndexMap::new(),
            ValidateOptions::default(),
        )
        .unwrap();
        assert_eq!(out["x"], ConfigValue::Int(42));
    }

    #[test]
    fn required_is_enforced_only_when_asked() {
        let schema = Schema {
            required: Some(true),
            ..Schema::default()
        };
        let loose = validate_params(
            &IndexMap::new(),
            &schemas(&[("x", schema.clone())]),
            &IndexMap::new(),
            ValidateOptions::default(),
        );
        assert!(loose.is_ok());
        let strict = validate_params(
            &IndexMap::new(),
            &schemas(&[("x", schema)]),
            &IndexMap::new(),
            ValidateOptions {
                check_required: true,
                ..ValidateOptions::default()
            },
        );
        assert!(matches!(
            strict,
            Err(ValidationError::MissingRequired { .. })
        ));
    }

    #[test]
    fn unknown_parameters_are_rejected() {
        let mut params = IndexMap::new();
        params.insert("nope".to_string(), ConfigValue::Int(1));
        let err = validate_params(
            &params,
            &IndexMap::new(),
            &IndexMap::new(),
            ValidateOptions {
                check_unknowns: true,
                ..ValidateOptions::default()
            },
        );
        assert!(matches!(err, Err(ValidationError::UnknownParameter { .. })));
    }

    #[test]
    fn must_exist_checks_the_filesystem() {
        let schema = Schema {
            dtype: DType::File,
            must_exist: Some(true),
            ..Schema::default()
        };
        let mut params = IndexMap::new();
        params.insert(
            "f".to_string(),
            ConfigValue::String("/definitely/not/here".into()),
        );
        let err = validate_params(
            &params,
            &schemas(&[("f", schema)]),
            &IndexMap::new(),
            ValidateOptions {
                check_exist: true,
                ..ValidateOptions::default()
            },
        );
        assert!(matches!(err, Err(ValidationError::MustExist { .. })));
    }
}

use std::collections::HashSet;

use indexmap::IndexMap;

use crate::config::{ConfigMap, ConfigValue};
use crate::error::ValidationError;
use crate::subst::{Evaluated, Namespaces};

/// Applies an `assign` section: each value is evaluated against the
/// namespace stack and written into `values`. Immune keys (explicitly set by
/// the caller) are never overwritten. Dotted keys write nested paths.
///
/// With `lenient` set, assignments whose lookups are still unset are left
/// alone instead of failing; prevalidation runs leniently because loop
/// variables and step results are not bound yet.
pub fn apply_assign(
    values: &mut ConfigMap,
    immune: &HashSet<String>,
    assign: &ConfigMap,
    ns: &Namespaces,
    location: &str,
    lenient: bool,
) -> Result<(), ValidationError> {
    for (key, raw) in assign {
        if immune.contains(key) {
            continue;
        }
        let evaluated = match ns.evaluate(raw, &format!("{location}.assign.{key}")) {
            Ok(evaluated) => evaluated,
            Err(error)
                if lenient
                    && matches!(
                        error,
                        crate::error::SubstError::UnsetInExpression { .. }
                            | crate::error::SubstError::UndefinedNamespace { .. }
                    ) =>
            {
                continue;
            }
            Err(error) => return Err(error.into()),
        };
        match evaluated {
            Evaluated::Value(value) => {
                if let Some((head, rest)) = key.split_once('.') {
                    let entry = values
                        .entry(head.to_string())
                        .or_insert_with(|| ConfigValue::Map(ConfigMap::new()));
                    entry.set_path(rest, value);
                } else {
                    values.insert(key.clone(), value);
                }
            }
            Evaluated::Unset => {
                values.shift_remove(key);
            }
        }
    }
    Ok(())
}

/// Applies an `assign_based_on` section: each key names an input or variable
/// whose observed value selects a sub-assignment mapping; `DEFAULT` is the
/// fallback case. Unknown keys and unmatched values without a `DEFAULT` are
/// errors.
pub fn apply_assign_based_on(
    values: &mut ConfigMap,
    immune: &HashSet<String>,
    based_on: &IndexMap<String, ConfigMap>,
    known_keys: &HashSet<String>,
    ns: &Namespaces,
    location: &str,
    lenient: bool,
) -> Result<(), ValidationError> {
    for (key, cases) in based_on {
        let observed = match values.get(key) {
            Some(v) => Some(v.clone()),
            // fall back to a config-tree lookup for dotted keys
            None => match ns.lookup(key, location)? {
                crate::subst::Lookup::Found(v) => Some(v),
                crate::subst::Lookup::Unset(_) => None,
            },
        };
        if observed.is_none() && !known_keys.contains(key) && !key.contains('.') {
            return Err(ValidationError::AssignBasedOnUnknownKey { key: key.clone() });
        }

        let rendered = observed.as_ref().map(ConfigValue::to_string);
        let case = rendered
            .as_deref()
            .and_then(|text| cases.get(text))
            .or_else(|| cases.get("DEFAULT"));
        let Some(case) = case else {
            return Err(ValidationError::AssignBasedOnUnmatched {
                key: key.clone(),
                value: rendered.unwrap_or_else(|| "(unset)".to_string()),
            });
        };
        let assignments = case.as_map().ok_or_else(|| ValidationError::BadRecipe {
            recipe: location.to_string(),
            message: format!("assign_based_on.{key}: case must be a mapping"),
        })?;
        apply_assign(values, immune, assignments, ns, location, lenient)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn yaml(text: &str) -> ConfigMap {
        let v: ConfigValue = serde_yaml::from_str(text).unwrap();
        match v {
            ConfigValue::Map(m) => m,
            _ => panic!("expected mapping"),
        }
    }

    #[test]
    fn assign_evaluates_and_respects_immunity() {
        let mut values = yaml("x: 1");
        let mut immune = HashSet::new();
        immune.insert("x".to_string());
        let mut ns = Namespaces::new();
        ns.set_scope("recipe", ConfigValue::Map(values.clone()));
        let assign = yaml("x: 99\ny: \"=recipe.x + 1\"");
        apply_assign(&mut values, &immune, &assign, &ns, "r", false).unwrap();
        assert_eq!(values["x"], ConfigValue::Int(1));
        assert_eq!(values["y"], ConfigValue::Int(2));
    }

    #[test]
    fn assign_based_on_selects_cases() {
        let mut values = yaml("band: L");
        let ns = Namespaces::new();
        let based_on: IndexMap<String, ConfigMap> =
            [("band".to_string(), yaml("L:\n  chans: 4096\nDEFAULT:\n  chans: 1024"))]
                .into_iter()
                .collect();
        let known: HashSet<String> = ["band".to_string()].into_iter().collect();
        apply_assign_based_on(&mut values, &HashSet::new(), &based_on, &known, &ns, "r", false)
            .unwrap();
        assert_eq!(values["chans"], ConfigValue::Int(4096));
    }

    #[test]
    fn assign_based_on_unmatched_without_default_is_fatal() {
        let mut values = yaml("band: X");
        let ns = Namespaces::new();
        let based_on: IndexMap<String, ConfigMap> =
            [("band".to_string(), yaml("L:\n  chans: 4096"))]
                .into_iter()
                .collect();
        let known: HashSet<String> = ["band".to_string()].into_iter().collect();
        let err = apply_assign_based_on(
            &mut values,
            &HashSet::new(),
            &based_on,
            &known,
            &ns,
            "r",
            false,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            ValidationError::AssignBasedOnUnmatched { .. }
        ));
    }
}

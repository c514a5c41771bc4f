use indexmap::IndexMap;

use super::{Cargo, Recipe};
use crate::config::ConfigValue;
use crate::error::ValidationError;
use crate::schema::{Category, Schema};

/// One step parameter an alias stands for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AliasTarget {
    pub step: String,
    pub param: String,
}

/// A resolved equivalence between a recipe-level parameter and one or more
/// step parameters.
#[derive(Debug, Clone)]
pub struct Alias {
    pub name: String,
    pub schema: Schema,
    pub targets: Vec<AliasTarget>,
    pub is_output: bool,
    /// Synthesized for an otherwise-unbound step parameter.
    pub auto: bool,
}

/// Builds the recipe's alias table: inline schema `aliases` attributes and
/// the dedicated `aliases:` section, then auto-aliases for every unbound step
/// parameter. Alias schemas are inserted into the recipe's own inputs or
/// outputs, making aliases first-class recipe parameters.
pub fn build_aliases(
    recipe: &mut Recipe,
    cargos: &IndexMap<String, Cargo>,
) -> Result<IndexMap<String, Alias>, ValidationError> {
    let mut declared: Vec<(String, String)> = Vec::new();
    for (name, targets) in &recipe.aliases {
        for target in targets {
            declared.push((name.clone(), target.clone()));
        }
    }
    for (name, schema) in recipe.inputs.iter().chain(recipe.outputs.iter()) {
        for target in &schema.aliases {
            declared.push((name.clone(), target.clone()));
        }
    }

    let mut aliases: IndexMap<String, Alias> = IndexMap::new();
    for (name, target) in declared {
        add_alias(recipe, cargos, &mut aliases, &name, &target, false)?;
    }

    // auto-aliases for unbound step parameters
    let labels: Vec<String> = recipe.steps.keys().cloned().collect();
    for label in labels {
        let Some(cargo) = cargos.get(&label) else {
            continue;
        };
        // implicit inputs are not free parameters and cannot be aliased
        let params: Vec<String> = cargo
            .inputs()
            .iter()
            .filter(|(_, schema)| schema.implicit.is_none())
            .chain(cargo.outputs().iter())
            .map(|(name, _)| name.clone())
            .collect();
        for param in params {
            let bound = recipe.steps[&label].params.contains_key(&param);
            let covered = aliases
                .values()
                .any(|a| a.targets.iter().any(|t| t.step == label && t.param == param));
            if bound || covered {
                continue;
            }
            let auto_name = format!("{label}.{param}");
            add_alias(
                recipe,
                cargos,
                &mut aliases,
                &auto_name,
                &format!("{label}.{param}"),
                true,
            )?;
        }
    }

    check_conflicting_explicit_values(recipe, &aliases)?;
    Ok(aliases)
}

fn add_alias(
    recipe: &mut Recipe,
    cargos: &IndexMap<String, Cargo>,
    aliases: &mut IndexMap<String, Alias>,
    name: &str,
    target: &str,
    auto: bool,
) -> Result<(), ValidationError> {
    let err = |message: String| ValidationError::UnresolvedAlias {
        alias: name.to_string(),
        message,
    };

    // `$$` expands to the alias name, `$` to its last dot-component
    let last = name.rsplit('.').next().unwrap_or(name);
    let target = target.replace("$$", name).replace('$', last);
    let (step_spec, param) = target
        .split_once('.')
        .ok_or_else(|| err(format!("malformed target '{target}'")))?;

    // which steps does the spec select?
    let mut wildcard = false;
    let selected: Vec<String> = if step_spec.starts_with('(') && step_spec.ends_with(')') {
        wildcard = true;
        let cab_name = &step_spec[1..step_spec.len() - 1];
        recipe
            .steps
            .keys()
            .filter(|label| {
                cargos
                    .get(*label)
                    .map(|c| c.name() == cab_name)
                    .unwrap_or(false)
            })
            .cloned()
            .collect()
    } else if step_spec.contains(['*', '?', '[']) {
        wildcard = true;
        let pattern = glob::Pattern::new(step_spec).map_err(|e| err(e.to_string()))?;
        recipe
            .steps
            .keys()
            .filter(|label| pattern.matches(label))
            .cloned()
            .collect()
    } else {
        if !recipe.steps.contains_key(step_spec) {
            return Err(err(format!("refers to unknown step '{step_spec}'")));
        }
        vec![step_spec.to_string()]
    };

    for label in selected {
        let cargo = cargos
            .get(&label)
            .ok_or_else(|| err(format!("step '{label}' has no resolved cargo")))?;
        let input_schema = cargo.inputs().get(param);
        let output_schema = cargo.outputs().get(param);
        let target_schema = input_schema.or(output_schema);

        let explicitly_set = recipe.steps[&label].params.contains_key(param);
        if wildcard && (target_schema.is_none() || explicitly_set) {
            continue;
        }
        let target_schema = target_schema
            .ok_or_else(|| err(format!("refers to unknown step parameter '{label}.{param}'")))?
            .clone();
        if input_schema.is_some() && target_schema.implicit.is_some() {
            return Err(err(format!(
                "refers to implicit input '{label}.{param}'"
            )));
        }

        let is_output = output_schema.is_some();
        let have_step_value = explicitly_set
            || cargo.defaults().contains_key(param)
            || target_schema.default.is_some();

        match aliases.get_mut(name) {
            Some(existing) => {
                if existing.is_output {
                    return Err(err("output alias has more than one target".to_string()));
                }
                if is_output {
                    return Err(err("refers to both an input and an output".to_string()));
                }
                if existing.schema.dtype != target_schema.dtype {
                    return Err(err(format!(
                        "dtype {} of '{label}.{param}' conflicts with {}",
                        target_schema.dtype, existing.schema.dtype
                    )));
                }
                existing.targets.push(AliasTarget {
                    step: label,
                    param: param.to_string(),
                });
            }
            None => {
                // the recipe may already declare a schema for this name;
                // its default/info/required take precedence over the target's
                let declared = recipe.schema_for(name).cloned();
                let mut schema = target_schema.clone();
                schema.aliases = Vec::new();
                if let Some(declared) = &declared {
                    if declared.default.is_some() {
                        schema.default = declared.default.clone();
                        // the recipe-level default overrides the target value
                        if let Some(step) = recipe.steps.get_mut(&label) {
                            step.params.shift_remove(param);
                        }
                    }
                    if !declared.info.is_empty() {
                        schema.info = declared.info.clone();
                    }
                    if declared.required.is_some() {
                        schema.required = declared.required;
                    }
                    if declared.category.is_some() {
                        schema.category = declared.category;
                    }
                }
                if have_step_value && schema.default.is_none() {
                    // target already carries a value; nothing to require
                    schema.required = Some(false);
                    if schema.category.is_none() {
                        schema.category = Some(Category::Hidden);
                    }
                }
                if target_schema.implicit.is_some() && is_output {
                    schema.implicit = Some(ConfigValue::String(format!("{label}.{param}")));
                }
                let alias = Alias {
                    name: name.to_string(),
                    schema: schema.clone(),
                    targets: vec![AliasTarget {
                        step: label,
                        param: param.to_string(),
                    }],
                    is_output,
                    auto,
                };
                if is_output {
                    recipe.outputs.insert(name.to_string(), schema);
                } else {
                    recipe.inputs.insert(name.to_string(), schema);
                }
                aliases.insert(name.to_string(), alias);
            }
        }
    }
    Ok(())
}

/// A non-wildcard multi-target input alias whose targets carry differing
/// explicit values is ambiguous.
fn check_conflicting_explicit_values(
    recipe: &Recipe,
    aliases: &IndexMap<String, Alias>,
) -> Result<(), ValidationError> {
    for alias in aliases.values() {
        if alias.targets.len() < 2 {
            continue;
        }
        let mut explicit: Option<(&AliasTarget, &ConfigValue)> = None;
        for target in &alias.targets {
            let Some(value) = recipe
                .steps
                .get(&target.step)
                .and_then(|s| s.params.get(&target.param))
            else {
                continue;
            };
            match explicit {
                None => explicit = Some((target, value)),
                Some((_, prior)) if prior == value => {}
                Some((prior_target, _)) => {
                    return Err(ValidationError::UnresolvedAlias {
                        alias: alias.name.clone(),
                        message: format!(
                            "targets '{}.{}' and '{}.{}' carry conflicting explicit values",
                            prior_target.step,
                            prior_target.param,
                            target.step,
                            target.param
                        ),
                    });
                }
            }
        }
    }
    Ok(())
}

use std::collections::HashSet;

use indexmap::IndexMap;

use super::aliases::{build_aliases, Alias};
use super::{Cargo, Recipe, Registry};
use crate::config::{ConfigMap, ConfigValue};
use crate::error::ValidationError;
use crate::schema::{validate_params, ValidateOptions};
use crate::subst::Namespaces;

/// A recipe ready for execution: cargos resolved, aliases constructed,
/// assignments applied, values propagated and typechecked. The configuration
/// tree is frozen from this point on.
#[derive(Debug, Clone)]
pub struct Prevalidated {
    pub recipe: Recipe,
    pub cargos: IndexMap<String, Cargo>,
    pub aliases: IndexMap<String, Alias>,
    /// Recipe-level parameter and variable values.
    pub values: ConfigMap,
    /// Inputs explicitly supplied by the caller; `assign` never overwrites
    /// these.
    pub immune: HashSet<String>,
}

/// Runs the prevalidation sequence over a recipe: immunity marking, assigns,
/// alias construction, default up-propagation, value down-propagation and
/// recipe-level typechecking.
pub fn prevalidate(
    recipe: &Recipe,
    registry: &Registry,
    params: &ConfigMap,
    config: &ConfigValue,
) -> Result<Prevalidated, ValidationError> {
    let mut recipe = recipe.clone();

    // a for-loop iterating over an input makes that input required
    if let Some(for_loop) = &recipe.for_loop {
        if let ConfigValue::String(input_name) = &for_loop.over {
            match recipe.inputs.get_mut(input_name) {
                Some(schema) => {
                    if schema.default.is_none() && schema.implicit.is_none() {
                        schema.required = Some(true);
                    }
                }
                None => {
                    return Err(ValidationError::BadRecipe {
                        recipe: recipe.name.clone(),
                        message: format!("for_loop.over={input_name} is not a defined input"),
                    })
                }
            }
        }
    }

    let mut cargos = IndexMap::new();
    for (label, step) in &recipe.steps {
        cargos.insert(label.clone(), registry.resolve(step)?);
    }

    // explicitly supplied inputs are immune to assignment
    let mut values = ConfigMap::new();
    for (key, value) in &recipe.defaults {
        values.insert(key.clone(), value.clone());
    }
    for (key, value) in params {
        values.insert(key.clone(), value.clone());
    }
    let immune: HashSet<String> = params.keys().cloned().collect();

    // recipe-level assignments; lenient because loop variables and step
    // results are not bound yet
    let ns = base_namespaces(&values, config);
    super::assign::apply_assign(
        &mut values,
        &immune,
        &recipe.assign.clone(),
        &ns,
        &recipe.name,
        true,
    )?;
    let known: HashSet<String> = recipe
        .inputs
        .keys()
        .chain(recipe.assign.keys())
        .chain(values.keys())
        .cloned()
        .collect();
    let ns = base_namespaces(&values, config);
    super::assign::apply_assign_based_on(
        &mut values,
        &immune,
        &recipe.assign_based_on.clone(),
        &known,
        &ns,
        &recipe.name,
        true,
    )?;

    let aliases = build_aliases(&mut recipe, &cargos)?;

    // up-propagation: an unset input alias picks up the first value its
    // targets can offer (explicit setting, cargo default, schema default)
    for alias in aliases.values() {
        if alias.is_output || values.contains_key(&alias.name) {
            continue;
        }
        let found = alias.targets.iter().find_map(|target| {
            let step = recipe.steps.get(&target.step)?;
            let cargo = cargos.get(&target.step)?;
            step.params
                .get(&target.param)
                .cloned()
                .or_else(|| cargo.defaults().get(&target.param).cloned())
                .or_else(|| cargo.schema_for(&target.param)?.default.clone())
        });
        if let Some(value) = found {
            values.insert(alias.name.clone(), value);
        }
    }

    // down-propagation: alias values flow into every target step's params
    for alias in aliases.values() {
        if alias.is_output {
            continue;
        }
        let Some(value) = values.get(&alias.name).cloned() else {
            continue;
        };
        for target in &alias.targets {
            if let Some(step) = recipe.steps.get_mut(&target.step) {
                step.params.insert(target.param.clone(), value.clone());
            }
        }
    }

    // typecheck recipe-level inputs; required inputs must be resolvable now
    let input_values: IndexMap<String, ConfigValue> = values
        .iter()
        .filter(|(name, _)| recipe.inputs.contains_key(*name))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    let checked = validate_params(
        &input_values,
        &recipe.inputs,
        &recipe.defaults,
        ValidateOptions {
            check_required: true,
            ..ValidateOptions::default()
        },
    )?;
    for (name, value) in checked {
        values.insert(name, value);
    }

    Ok(Prevalidated {
        recipe,
        cargos,
        aliases,
        values,
        immune,
    })
}

/// The namespace stack available during prevalidation: recipe values and the
/// configuration tree.
pub fn base_namespaces(values: &ConfigMap, config: &ConfigValue) -> Namespaces {
    let mut ns = Namespaces::new();
    ns.set_scope("recipe", ConfigValue::Map(values.clone()));
    ns.set_scope("root", ConfigValue::Map(values.clone()));
    ns.set_scope("config", config.clone());
    ns
}

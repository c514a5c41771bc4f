mod aliases;
mod assign;
mod prevalidate;

pub use aliases::{Alias, AliasTarget};
pub use assign::{apply_assign, apply_assign_based_on};
pub use prevalidate::{base_namespaces, prevalidate, Prevalidated};

use indexmap::IndexMap;

use crate::cab::Cab;
use crate::config::{ConfigMap, ConfigValue};
use crate::error::ValidationError;
use crate::schema::{parse_schema_section, Schema};

/// `skip_if_outputs` modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipIfOutputs {
    /// Skip when every required file output already exists.
    Exist,
    /// Skip when outputs exist and are at least as new as the newest input.
    Fresh,
}

/// What a step invokes: a registry reference by name, or an inline
/// definition carried in the step body.
#[derive(Debug, Clone, PartialEq)]
pub enum CargoRef {
    Name(String),
    Inline(ConfigValue),
}

impl CargoRef {
    fn from_value(value: &ConfigValue) -> Option<CargoRef> {
        match value {
            ConfigValue::String(name) => Some(CargoRef::Name(name.clone())),
            ConfigValue::Map(_) => Some(CargoRef::Inline(value.clone())),
            _ => None,
        }
    }

    pub fn name(&self) -> Option<&str> {
        match self {
            CargoRef::Name(name) => Some(name),
            CargoRef::Inline(_) => None,
        }
    }
}

/// An ordered child of a recipe.
#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    pub label: String,
    pub cab: Option<CargoRef>,
    pub recipe: Option<CargoRef>,
    pub params: IndexMap<String, ConfigValue>,
    pub tags: Vec<String>,
    /// Boolean constant or a substitution/formula string evaluated at run
    /// time; truthy means skip.
    pub skip: Option<ConfigValue>,
    pub skip_if_outputs: Option<SkipIfOutputs>,
    pub assign: ConfigMap,
    pub assign_based_on: IndexMap<String, ConfigMap>,
    pub backend: Option<ConfigValue>,
    pub info: Option<String>,
}

impl Step {
    pub fn from_config(label: &str, tree: &ConfigValue) -> Result<Step, ValidationError> {
        let bad = |msg: String| ValidationError::BadStep {
            step: label.to_string(),
            message: msg,
        };
        let map = tree
            .as_map()
            .ok_or_else(|| bad("step definition must be a mapping".to_string()))?;

        let cab = map.get("cab").and_then(CargoRef::from_value);
        let recipe = map.get("recipe").and_then(CargoRef::from_value);
        if cab.is_some() == recipe.is_some() {
            return Err(bad(
                "step must name exactly one of 'cab' or 'recipe'".to_string(),
            ));
        }

        let params = match map.get("params") {
            Some(ConfigValue::Map(m)) => m.clone(),
            Some(other) => return Err(bad(format!("params must be a mapping, got {}", other.type_name()))),
            None => ConfigMap::new(),
        };

        let skip_if_outputs = match map.get("skip_if_outputs").and_then(ConfigValue::as_str) {
            Some("exist") => Some(SkipIfOutputs::Exist),
            Some("fresh") => Some(SkipIfOutputs::Fresh),
            Some(other) => {
                return Err(bad(format!(
                    "invalid skip_if_outputs setting '{other}' (expected 'exist' or 'fresh')"
                )))
            }
            None => None,
        };

        Ok(Step {
            label: label.to_string(),
            cab,
            recipe,
            params,
            tags: string_list(map.get("tags")),
            skip: map.get("skip").cloned(),
            skip_if_outputs,
            assign: match map.get("assign") {
                Some(ConfigValue::Map(m)) => m.clone(),
                _ => ConfigMap::new(),
            },
            assign_based_on: assign_based_on_section(label, map.get("assign_based_on"))?,
            backend: map.get("backend").cloned(),
            info: map
                .get("info")
                .and_then(ConfigValue::as_str)
                .map(str::to_string),
        })
    }

    /// True when `skip` is the constant true (as opposed to a runtime
    /// condition).
    pub fn skip_is_constant_true(&self) -> bool {
        match &self.skip {
            Some(ConfigValue::Bool(b)) => *b,
            Some(ConfigValue::String(s)) => matches!(s.as_str(), "True" | "true" | "1"),
            _ => false,
        }
    }

    /// Some when `skip` needs runtime evaluation.
    pub fn skip_condition(&self) -> Option<&str> {
        match &self.skip {
            Some(ConfigValue::String(s))
                if !matches!(
                    s.as_str(),
                    "True" | "true" | "1" | "False" | "false" | "0" | ""
                ) =>
            {
                Some(s)
            }
            _ => None,
        }
    }
}

/// A for-loop clause: iterate `var` over `over`, optionally scattering.
#[derive(Debug, Clone, PartialEq)]
pub struct ForLoop {
    pub var: String,
    /// A literal list, or the name of a recipe input holding the list.
    pub over: ConfigValue,
    /// 0/1: serial; N>0: up to N concurrent iterations; -1: unbounded.
    pub scatter: i64,
    pub display_status: Option<String>,
}

/// A named composite workflow.
#[derive(Debug, Clone, PartialEq)]
pub struct Recipe {
    pub name: String,
    pub info: Option<String>,
    pub inputs: IndexMap<String, Schema>,
    pub outputs: IndexMap<String, Schema>,
    pub defaults: ConfigMap,
    pub assign: ConfigMap,
    pub assign_based_on: IndexMap<String, ConfigMap>,
    /// The dedicated `aliases:` section; inline schema aliases are merged in
    /// during prevalidation.
    pub aliases: IndexMap<String, Vec<String>>,
    pub for_loop: Option<ForLoop>,
    pub steps: IndexMap<String, Step>,
    pub backend: Option<ConfigValue>,
}

impl Recipe {
    pub fn from_config(name: &str, tree: &ConfigValue) -> Result<Recipe, ValidationError> {
        let bad = |msg: String| ValidationError::BadRecipe {
            recipe: name.to_string(),
            message: msg,
        };
        let map = tree
            .as_map()
            .ok_or_else(|| bad("recipe definition must be a mapping".to_string()))?;

        let inputs = parse_schema_section(
            map.get("inputs").unwrap_or(&ConfigValue::Null),
            &format!("{name}.inputs"),
        )?;
        let outputs = parse_schema_section(
            map.get("outputs").unwrap_or(&ConfigValue::Null),
            &format!("{name}.outputs"),
        )?;

        let mut steps = IndexMap::new();
        match map.get("steps") {
            Some(ConfigValue::Map(entries)) => {
                for (label, body) in entries {
                    steps.insert(label.clone(), Step::from_config(label, body)?);
                }
            }
            Some(other) => {
                return Err(bad(format!(
                    "steps must be a mapping, got {}",
                    other.type_name()
                )))
            }
            None => {}
        }

        let aliases = match map.get("aliases") {
            Some(ConfigValue::Map(entries)) => {
                let mut out = IndexMap::new();
                for (alias_name, targets) in entries {
                    let targets = match targets {
                        ConfigValue::String(s) => vec![s.clone()],
                        ConfigValue::List(items) => items
                            .iter()
                            .map(|item| {
                                item.as_str().map(str::to_string).ok_or_else(|| {
                                    bad(format!("alias '{alias_name}': bad target"))
                                })
                            })
                            .collect::<Result<_, _>>()?,
                        other => {
                            return Err(bad(format!(
                                "alias '{alias_name}': expected string or list, got {}",
                                other.type_name()
                            )))
                        }
                    };
                    out.insert(alias_name.clone(), targets);
                }
                out
            }
            _ => IndexMap::new(),
        };

        let for_loop = match map.get("for_loop") {
            Some(ConfigValue::Map(fl)) => {
                let var = fl
                    .get("var")
                    .and_then(ConfigValue::as_str)
                    .ok_or_else(|| bad("for_loop requires 'var'".to_string()))?
                    .to_string();
                let over = fl
                    .get("over")
                    .cloned()
                    .ok_or_else(|| bad("for_loop requires 'over'".to_string()))?;
                if inputs.contains_key(&var) || outputs.contains_key(&var) {
                    return Err(bad(format!(
                        "for_loop.var={var} clashes with a recipe parameter"
                    )));
                }
                Some(ForLoop {
                    var,
                    over,
                    scatter: fl
                        .get("scatter")
                        .and_then(ConfigValue::as_int)
                        .unwrap_or(0),
                    display_status: fl
                        .get("display_status")
                        .and_then(ConfigValue::as_str)
                        .map(str::to_string),
                })
            }
            Some(other) => {
                return Err(bad(format!(
                    "for_loop must be a mapping, got {}",
                    other.type_name()
                )))
            }
            None => None,
        };

        Ok(Recipe {
            name: name.to_string(),
            info: map
                .get("info")
                .and_then(ConfigValue::as_str)
                .map(str::to_string),
            inputs,
            outputs,
            defaults: match map.get("defaults") {
                Some(ConfigValue::Map(m)) => m.clone(),
                _ => ConfigMap::new(),
            },
            assign: match map.get("assign") {
                Some(ConfigValue::Map(m)) => m.clone(),
                _ => ConfigMap::new(),
            },
            assign_based_on: assign_based_on_section(name, map.get("assign_based_on"))?,
            aliases,
            for_loop,
            steps,
            backend: map.get("backend").cloned(),
        })
    }

    pub fn schema_for(&self, param: &str) -> Option<&Schema> {
        self.inputs.get(param).or_else(|| self.outputs.get(param))
    }
}

/// The set of cabs and library recipes resolvable from a configuration tree.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    pub cabs: IndexMap<String, Cab>,
    pub recipes: IndexMap<String, Recipe>,
}

/// A step's resolved target.
#[derive(Debug, Clone)]
pub enum Cargo {
    Cab(Cab),
    Recipe(Recipe),
}

impl Cargo {
    pub fn inputs(&self) -> &IndexMap<String, Schema> {
        match self {
            Cargo::Cab(cab) => &cab.inputs,
            Cargo::Recipe(recipe) => &recipe.inputs,
        }
    }

    pub fn outputs(&self) -> &IndexMap<String, Schema> {
        match self {
            Cargo::Cab(cab) => &cab.outputs,
            Cargo::Recipe(recipe) => &recipe.outputs,
        }
    }

    pub fn defaults(&self) -> ConfigMap {
        match self {
            Cargo::Cab(cab) => cab.defaults.clone(),
            Cargo::Recipe(recipe) => recipe.defaults.clone(),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Cargo::Cab(cab) => &cab.name,
            Cargo::Recipe(recipe) => &recipe.name,
        }
    }

    pub fn schema_for(&self, param: &str) -> Option<&Schema> {
        self.inputs()
            .get(param)
            .or_else(|| self.outputs().get(param))
    }
}

impl Registry {
    /// Builds the registry from the merged configuration tree: `cabs.*` and
    /// `lib.recipes.*`.
    pub fn from_config(tree: &ConfigValue) -> Result<Registry, ValidationError> {
        let mut registry = Registry::default();
        if let Some(ConfigValue::Map(cabs)) = tree.get_path("cabs") {
            for (name, body) in cabs {
                registry
                    .cabs
                    .insert(name.clone(), Cab::from_config(name, body)?);
            }
        }
        if let Some(ConfigValue::Map(recipes)) = tree.get_path("lib.recipes") {
            for (name, body) in recipes {
                registry
                    .recipes
                    .insert(name.clone(), Recipe::from_config(name, body)?);
            }
        }
        Ok(registry)
    }

    /// Resolves what a step invokes. Inline definitions are instantiated on
    /// the spot; named references must exist in the registry.
    pub fn resolve(&self, step: &Step) -> Result<Cargo, ValidationError> {
        let bad = |msg: String| ValidationError::BadStep {
            step: step.label.clone(),
            message: msg,
        };
        if let Some(cab_ref) = &step.cab {
            return match cab_ref {
                CargoRef::Name(name) => self
                    .cabs
                    .get(name)
                    .cloned()
                    .map(Cargo::Cab)
                    .ok_or_else(|| bad(format!("unknown cab '{name}'"))),
                CargoRef::Inline(tree) => Ok(Cargo::Cab(
                    Cab::from_config(&format!("{}-inline", step.label), tree)
                        .map_err(ValidationError::from)?,
                )),
            };
        }
        match step.recipe.as_ref().expect("step has cab or recipe") {
            CargoRef::Name(name) => self
                .recipes
                .get(name)
                .cloned()
                .map(Cargo::Recipe)
                .ok_or_else(|| bad(format!("unknown recipe '{name}'"))),
            CargoRef::Inline(tree) => Ok(Cargo::Recipe(Recipe::from_config(
                &format!("{}-inline", step.label),
                tree,
            )?)),
        }
    }

    /// The name of the most recently defined recipe, the default for a run
    /// request that does not name one.
    pub fn last_recipe(&self) -> Option<&str> {
        self.recipes.keys().last().map(String::as_str)
    }
}

fn string_list(value: Option<&ConfigValue>) -> Vec<String> {
    match value {
        Some(ConfigValue::String(s)) => vec![s.clone()],
        Some(ConfigValue::List(items)) => items
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        _ => Vec::new(),
    }
}

fn assign_based_on_section(
    owner: &str,
    value: Option<&ConfigValue>,
) -> Result<IndexMap<String, ConfigMap>, ValidationError> {
    let mut out = IndexMap::new();
    let Some(value) = value else {
        return Ok(out);
    };
    let entries = value.as_map().ok_or_else(|| ValidationError::BadRecipe {
        recipe: owner.to_string(),
        message: "assign_based_on must be a mapping".to_string(),
    })?;
    for (key, cases) in entries {
        let cases = cases.as_map().ok_or_else(|| ValidationError::BadRecipe {
            recipe: owner.to_string(),
            message: format!("assign_based_on.{key}: mapping expected"),
        })?;
        out.insert(key.clone(), cases.clone());
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn yaml(text: &str) -> ConfigValue {
        serde_yaml::from_str(text).unwrap()
    }

    #[test]
    fn step_requires_exactly_one_target() {
        assert!(Step::from_config("s", &yaml("params: {}")).is_err());
        assert!(Step::from_config("s", &yaml("cab: a\nrecipe: b")).is_err());
        assert!(Step::from_config("s", &yaml("cab: a")).is_ok());
    }

    #[test]
    fn skip_classification() {
        let s = Step::from_config("s", &yaml("cab: a\nskip: true")).unwrap();
        assert!(s.skip_is_constant_true());
        assert!(s.skip_condition().is_none());

        let s = Step::from_config("s", &yaml("cab: a\nskip: \"{recipe.flag}\"")).unwrap();
        assert!(!s.skip_is_constant_true());
        assert_eq!(s.skip_condition(), Some("{recipe.flag}"));
    }

    #[test]
    fn for_loop_var_clash_is_rejected() {
        let err = Recipe::from_config(
            "r",
            &yaml("inputs:\n  x: int\nfor_loop:\n  var: x\n  over: [1]\nsteps: {}\n"),
        );
        assert!(err.is_err());
    }

    #[test]
    fn registry_resolves_named_and_inline_cargo() {
        let tree = yaml(
            "cabs:\n  echo:\n    command: echo\nlib:\n  recipes:\n    demo:\n      steps:\n        one:\n          cab: echo\n",
        );
        let registry = Registry::from_config(&tree).unwrap();
        assert!(registry.cabs.contains_key("echo"));
        let recipe = &registry.recipes["demo"];
        let cargo = registry.resolve(&recipe.steps["one"]).unwrap();
        assert_eq!(cargo.name(), "echo");

        let inline = Step::from_config("two", &yaml("cab:\n  command: ls\n")).unwrap();
        let cargo = registry.resolve(&inline).unwrap();
        assert!(matches!(cargo, Cargo::Cab(_)));
    }
}

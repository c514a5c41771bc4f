use serde::Serialize;

use galley_core::config::ConfigValue;
use galley_core::recipe::Cargo;
use galley_core::schema::Schema;
use galley_core::{Recipe, Registry};

use crate::backend::Dispatcher;
use crate::error::RunError;

/// A read-only description of one parameter, for documentation consumers.
#[derive(Debug, Clone, Serialize)]
pub struct ParamDoc {
    pub name: String,
    pub dtype: String,
    pub info: String,
    pub category: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<serde_json::Value>,
}

/// A node of the step tree.
#[derive(Debug, Clone, Serialize)]
pub struct StepDoc {
    pub label: String,
    pub cargo: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub info: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub steps: Vec<StepDoc>,
}

/// Structured description of a recipe: inputs, outputs and the step tree.
#[derive(Debug, Clone, Serialize)]
pub struct RecipeDoc {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub info: Option<String>,
    pub inputs: Vec<ParamDoc>,
    pub outputs: Vec<ParamDoc>,
    pub steps: Vec<StepDoc>,
}

fn param_doc(name: &str, schema: &Schema) -> ParamDoc {
    ParamDoc {
        name: name.to_string(),
        dtype: schema.dtype.to_string(),
        info: schema.info.clone(),
        category: format!("{:?}", schema.effective_category()),
        default: schema.default.as_ref().map(|v| v.to_json()),
    }
}

/// Produces the documentation view of a recipe, descending into sub-recipes.
pub fn describe_recipe(registry: &Registry, recipe: &Recipe) -> Result<RecipeDoc, RunError> {
    let mut steps = Vec::new();
    for (label, step) in &recipe.steps {
        let cargo = registry.resolve(step)?;
        let node = match &cargo {
            Cargo::Cab(cab) => StepDoc {
                label: label.clone(),
                cargo: cab.name.clone(),
                info: step.info.clone().or_else(|| cab.info.clone()),
                steps: Vec::new(),
            },
            Cargo::Recipe(sub) => {
                let sub_doc = describe_recipe(registry, sub)?;
                StepDoc {
                    label: label.clone(),
                    cargo: sub.name.clone(),
                    info: step.info.clone().or_else(|| sub.info.clone()),
                    steps: sub_doc.steps,
                }
            }
        };
        steps.push(node);
    }
    Ok(RecipeDoc {
        name: recipe.name.clone(),
        info: recipe.info.clone(),
        inputs: recipe
            .inputs
            .iter()
            .map(|(n, s)| param_doc(n, s))
            .collect(),
        outputs: recipe
            .outputs
            .iter()
            .map(|(n, s)| param_doc(n, s))
            .collect(),
        steps,
    })
}

/// Walks every cab referenced by a recipe (sub-recipes included) and invokes
/// the backend image build for each distinct image. Returns the built image
/// identifiers.
pub async fn build_images(
    config: &ConfigValue,
    registry: &Registry,
    recipe: &Recipe,
    dispatcher: &Dispatcher,
) -> Result<Vec<String>, RunError> {
    let mut images = Vec::new();
    collect_images(registry, recipe, &mut images)?;
    images.sort();
    images.dedup();

    let settings =
        crate::backend::BackendSettings::from_layers(&[config.get_path("opts.backend")])?;
    let selection = settings.selection();
    let backend = selection
        .iter()
        .filter_map(|name| dispatcher.get(name))
        .find(|backend| backend.available())
        .ok_or(RunError::BackendUnavailable {
            tried: selection.join(", "),
        })?;
    let mut built = Vec::new();
    for image in images {
        built.push(backend.build(&image).await?);
    }
    Ok(built)
}

fn collect_images(
    registry: &Registry,
    recipe: &Recipe,
    images: &mut Vec<String>,
) -> Result<(), RunError> {
    for step in recipe.steps.values() {
        match registry.resolve(step)? {
            Cargo::Cab(cab) => {
                if let Some(image) = &cab.image {
                    images.push(image.to_string_with(None));
                }
            }
            Cargo::Recipe(sub) => collect_images(registry, &sub, images)?,
        }
    }
    Ok(())
}

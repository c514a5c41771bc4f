use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use uuid::Uuid;

use galley_core::config::{ConfigMap, ConfigValue};
use galley_core::recipe::prevalidate;
use galley_core::Registry;

use crate::backend::Dispatcher;
use crate::cancel::cancel_pair;
use crate::error::RunError;
use crate::events::{Event, LogSink};
use crate::scheduler::{
    run_recipe_instance, RunContext, StepReport, StepSelection,
};

/// Caller-facing options for one run.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Step labels and inclusive `start:end` ranges restricting execution.
    /// A single named label is forced on, overriding `skip` and `never`.
    pub steps: Vec<String>,
    pub tags: Vec<String>,
    pub skip_tags: Vec<String>,
    /// Highest-precedence backend settings layer.
    pub backend: Option<ConfigValue>,
    pub step_timeout: Option<Duration>,
    /// When set, a JSON-lines log file is written here in addition to the
    /// caller's sink.
    pub log_file: Option<std::path::PathBuf>,
}

/// Terminal condition of a run.
#[derive(Debug)]
pub struct RunReport {
    pub run_id: Uuid,
    pub recipe: String,
    pub succeeded: bool,
    /// Recipe-level outputs (for successful runs).
    pub outputs: ConfigMap,
    pub warnings: Vec<String>,
    pub steps: Vec<StepReport>,
    /// Fully-qualified name of the failing step, when one failed.
    pub failed_step: Option<String>,
    /// Captured standard-error tail of the failing cab.
    pub stderr_tail: Vec<String>,
    pub error: Option<String>,
}

/// Runs a recipe from a merged configuration tree. Pre-run problems (unknown
/// recipe, prevalidation failures) surface as `Err`; runtime step failures
/// produce an `Ok` report with `succeeded: false` and the failing step's
/// identity.
pub async fn run_recipe(
    config: &ConfigValue,
    recipe_name: Option<&str>,
    params: &ConfigMap,
    options: RunOptions,
    sink: Arc<dyn LogSink>,
) -> Result<RunReport, RunError> {
    let registry = Registry::from_config(config)?;
    let name = match recipe_name {
        Some(name) => {
            if !registry.recipes.contains_key(name) {
                return Err(RunError::UnknownRecipe(name.to_string()));
            }
            name.to_string()
        }
        None => registry
            .last_recipe()
            .ok_or(RunError::NoRecipes)?
            .to_string(),
    };
    let recipe = registry.recipes[&name].clone();

    let prevalidated = prevalidate(&recipe, &registry, params, config)?;
    let selection = expand_selection(&options, &prevalidated.recipe)?;

    let sink: Arc<dyn LogSink> = match &options.log_file {
        Some(path) => {
            let mut composite = crate::events::CompositeLogSink::new();
            composite.add(Box::new(ForwardingSink(sink.clone())));
            composite.add(Box::new(crate::events::FileLogSink::create(path)?));
            Arc::new(composite)
        }
        None => sink,
    };

    let (cancel_source, cancel) = cancel_pair();
    let interrupt_watch = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel_source.cancel();
        }
    });

    let run_id = Uuid::new_v4();
    let ctx = Arc::new(RunContext {
        config: config.clone(),
        registry,
        dispatcher: Dispatcher::with_native(),
        sink: sink.clone(),
        run_id,
        cancel,
        step_timeout: options.step_timeout,
        backend_override: options.backend.clone(),
        dynamic_schema: None,
    });

    sink.emit(Event::RunStarted {
        run_id,
        recipe: name.clone(),
        at: Utc::now(),
    })
    .await;

    let result = run_recipe_instance(
        ctx.clone(),
        prevalidated.clone(),
        name.clone(),
        selection,
    )
    .await;
    interrupt_watch.abort();

    let report = match result {
        Ok(outcome) => RunReport {
            run_id,
            recipe: name,
            succeeded: true,
            outputs: outcome.outputs(&prevalidated),
            warnings: outcome.warnings,
            steps: outcome.steps,
            failed_step: None,
            stderr_tail: Vec::new(),
            error: None,
        },
        Err(error) if error.is_step_level() => {
            let (failed_step, stderr_tail) = match &error {
                RunError::CabFailure {
                    fqname,
                    stderr_tail,
                    ..
                } => (Some(fqname.clone()), stderr_tail.clone()),
                RunError::Timeout { fqname, .. }
                | RunError::MissingRequiredOutput { fqname, .. } => {
                    (Some(fqname.clone()), Vec::new())
                }
                _ => (None, Vec::new()),
            };
            RunReport {
                run_id,
                recipe: name,
                succeeded: false,
                outputs: ConfigMap::new(),
                warnings: Vec::new(),
                steps: Vec::new(),
                failed_step,
                stderr_tail,
                error: Some(error.to_string()),
            }
        }
        Err(error) => {
            sink.emit(Event::RunFinished {
                run_id,
                succeeded: false,
                at: Utc::now(),
            })
            .await;
            return Err(error);
        }
    };

    sink.emit(Event::RunFinished {
        run_id,
        succeeded: report.succeeded,
        at: Utc::now(),
    })
    .await;
    Ok(report)
}

/// Expands step labels and `start:end` ranges (inclusive, in declaration
/// order) into the enabled/forced sets.
fn expand_selection(
    options: &RunOptions,
    recipe: &galley_core::Recipe,
) -> Result<StepSelection, RunError> {
    let mut selection = StepSelection {
        tags: options.tags.iter().cloned().collect(),
        skip_tags: options.skip_tags.iter().cloned().collect(),
        ..StepSelection::default()
    };
    if options.steps.is_empty() {
        return Ok(selection);
    }

    let order: Vec<&String> = recipe.steps.keys().collect();
    let position = |label: &str| -> Result<usize, RunError> {
        order
            .iter()
            .position(|l| l.as_str() == label)
            .ok_or_else(|| RunError::UnknownStep(label.to_string()))
    };

    let mut enabled = HashSet::new();
    for spec in &options.steps {
        match spec.split_once(':') {
            Some((start, end)) => {
                let from = if start.is_empty() { 0 } else { position(start)? };
                let to = if end.is_empty() {
                    order.len().saturating_sub(1)
                } else {
                    position(end)?
                };
                if from > to {
                    return Err(RunError::UnknownStep(spec.clone()));
                }
                for label in &order[from..=to] {
                    enabled.insert((*label).clone());
                }
            }
            None => {
                position(spec)?;
                enabled.insert(spec.clone());
                // a single explicitly named step is forced on
                selection.forced.insert(spec.clone());
            }
        }
    }
    selection.enabled = Some(enabled);
    Ok(selection)
}

/// Adapts a shared sink to the composite's ownership model.
struct ForwardingSink(Arc<dyn LogSink>);

#[async_trait::async_trait]
impl LogSink for ForwardingSink {
    async fn emit(&self, event: Event) {
        self.0.emit(event).await;
    }
}

/// Parses `key=value` parameter assignments; values parse as YAML scalars.
pub fn parse_param_assignments(assignments: &[String]) -> ConfigMap {
    let mut out = ConfigMap::new();
    for assignment in assignments {
        let Some((key, value)) = assignment.split_once('=') else {
            continue;
        };
        let parsed = serde_yaml::from_str::<ConfigValue>(value)
            .unwrap_or_else(|_| ConfigValue::String(value.to_string()));
        out.insert(key.to_string(), parsed);
    }
    out
}

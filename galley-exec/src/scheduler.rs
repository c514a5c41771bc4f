use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use indexmap::IndexMap;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use uuid::Uuid;

use galley_core::config::{ConfigMap, ConfigValue};
use galley_core::error::ValidationError;
use galley_core::recipe::{
    apply_assign, apply_assign_based_on, prevalidate, Cargo, Prevalidated, SkipIfOutputs, Step,
};
use galley_core::schema::{validate_params, Schema, ValidateOptions};
use galley_core::subst::Namespaces;
use galley_core::Registry;

use crate::backend::{BackendSettings, Dispatcher};
use crate::cab_runner::run_cab;
use crate::cancel::CancelToken;
use crate::error::RunError;
use crate::events::{Event, LogSink};

/// Resolves a cab's `dynamic_schema` reference: given the bound params and
/// the declared schemas, returns revised input/output maps. The callable
/// lives with the embedded-scripting collaborator; the core only invokes it.
pub trait DynamicSchemaResolver: Send + Sync {
    fn revise(
        &self,
        reference: &str,
        params: &IndexMap<String, ConfigValue>,
        inputs: &IndexMap<String, Schema>,
        outputs: &IndexMap<String, Schema>,
    ) -> Result<(IndexMap<String, Schema>, IndexMap<String, Schema>), RunError>;
}

/// Shared state for one run: the frozen configuration tree, the registry,
/// backends, the log sink and the cancellation token.
pub struct RunContext {
    pub config: ConfigValue,
    pub registry: Registry,
    pub dispatcher: Dispatcher,
    pub sink: Arc<dyn LogSink>,
    pub run_id: Uuid,
    pub cancel: CancelToken,
    /// Per-step timeout, if configured.
    pub step_timeout: Option<Duration>,
    /// Backend override supplied by the caller; highest-precedence layer.
    pub backend_override: Option<ConfigValue>,
    /// Collaborator handling `dynamic_schema` callables, when present.
    pub dynamic_schema: Option<Arc<dyn DynamicSchemaResolver>>,
}

/// Which steps of the top-level recipe run, and which are forced on.
#[derive(Debug, Clone, Default)]
pub struct StepSelection {
    /// None: all steps. Some: only these labels.
    pub enabled: Option<HashSet<String>>,
    /// Explicitly named steps run even with `skip` set or a `never` tag.
    pub forced: HashSet<String>,
    pub tags: HashSet<String>,
    pub skip_tags: HashSet<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepStatus {
    Succeeded,
    Skipped,
    Failed,
}

#[derive(Debug, Clone)]
pub struct StepReport {
    pub fqname: String,
    pub status: StepStatus,
}

/// Result of running one recipe (or one loop iteration thereof).
#[derive(Debug, Default)]
pub struct RecipeOutcome {
    /// Recipe-scope values after the run, outputs included.
    pub values: ConfigMap,
    pub warnings: Vec<String>,
    pub steps: Vec<StepReport>,
}

impl RecipeOutcome {
    /// Restricts values to the recipe's declared outputs.
    pub fn outputs(&self, prevalidated: &Prevalidated) -> ConfigMap {
        self.values
            .iter()
            .filter(|(name, _)| prevalidated.recipe.outputs.contains_key(*name))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

/// Runs a prevalidated recipe: for-loop handling (serial or scatter) around
/// ordered step execution. Boxed because sub-recipes recurse.
pub fn run_recipe_instance(
    ctx: Arc<RunContext>,
    prevalidated: Prevalidated,
    fqname: String,
    selection: StepSelection,
) -> Pin<Box<dyn Future<Output = Result<RecipeOutcome, RunError>> + Send>> {
    Box::pin(async move {
        let Some(for_loop) = prevalidated.recipe.for_loop.clone() else {
            return run_iteration(ctx, prevalidated, fqname, selection, None).await;
        };

        let items: Vec<ConfigValue> = match &for_loop.over {
            ConfigValue::List(items) => items.clone(),
            ConfigValue::String(input_name) => match prevalidated.values.get(input_name) {
                Some(ConfigValue::List(items)) => items.clone(),
                Some(other) => vec![other.clone()],
                None => {
                    return Err(ValidationError::MissingRequired {
                        name: input_name.clone(),
                    }
                    .into())
                }
            },
            other => vec![other.clone()],
        };

        let scatter = for_loop.scatter;
        if scatter == 0 || scatter == 1 {
            // serial loop: iterations run to completion in order
            let mut combined = RecipeOutcome::default();
            for (index, item) in items.iter().enumerate() {
                let mut iteration = prevalidated.clone();
                iteration
                    .values
                    .insert(for_loop.var.clone(), item.clone());
                let outcome = run_iteration(
                    ctx.clone(),
                    iteration,
                    fqname.clone(),
                    selection.clone(),
                    Some((index, items.len())),
                )
                .await?;
                combined.values = outcome.values;
                combined.warnings.extend(outcome.warnings);
                combined.steps.extend(outcome.steps);
            }
            return Ok(combined);
        }

        // scatter: a worker pool bounded by the fan-out factor; each worker
        // owns a private view of the recipe with its own var binding
        let permits = if scatter < 0 {
            items.len().max(1)
        } else {
            scatter as usize
        };
        let semaphore = Arc::new(Semaphore::new(permits));
        let mut join_set: JoinSet<Result<RecipeOutcome, RunError>> = JoinSet::new();
        for (index, item) in items.iter().enumerate() {
            let mut iteration = prevalidated.clone();
            iteration
                .values
                .insert(for_loop.var.clone(), item.clone());
            let ctx = ctx.clone();
            let fqname = fqname.clone();
            let selection = selection.clone();
            let semaphore = semaphore.clone();
            let total = items.len();
            join_set.spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .expect("scatter semaphore never closes");
                run_iteration(ctx, iteration, fqname, selection, Some((index, total))).await
            });
        }

        // a failing iteration does not cancel running siblings, but the
        // recipe as a whole fails
        let mut combined = RecipeOutcome::default();
        let mut first_error: Option<RunError> = None;
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(Ok(outcome)) => {
                    combined.values = outcome.values;
                    combined.warnings.extend(outcome.warnings);
                    combined.steps.extend(outcome.steps);
                }
                Ok(Err(error)) => {
                    if first_error.is_none() {
                        first_error = Some(error);
                    }
                }
                Err(join_error) => {
                    if first_error.is_none() {
                        first_error = Some(RunError::CabFailure {
                            fqname: fqname.clone(),
                            message: format!("scatter worker panicked: {join_error}"),
                            stderr_tail: Vec::new(),
                        });
                    }
                }
            }
        }
        match first_error {
            Some(error) => Err(error),
            None => Ok(combined),
        }
    })
}

/// One pass over the recipe's steps, in declaration order.
async fn run_iteration(
    ctx: Arc<RunContext>,
    mut prevalidated: Prevalidated,
    fqname: String,
    selection: StepSelection,
    loop_info: Option<(usize, usize)>,
) -> Result<RecipeOutcome, RunError> {
    let recipe = prevalidated.recipe.clone();
    let known: HashSet<String> = recipe
        .inputs
        .keys()
        .chain(recipe.assign.keys())
        .chain(prevalidated.values.keys())
        .cloned()
        .collect();

    let mut steps_scope = ConfigMap::new();
    let mut previous_scope = ConfigValue::Map(ConfigMap::new());
    let mut outcome = RecipeOutcome::default();

    let labels: Vec<String> = prevalidated.recipe.steps.keys().cloned().collect();
    for label in labels {
        if ctx.cancel.is_cancelled() {
            return Err(RunError::Cancelled);
        }
        let step = prevalidated.recipe.steps[&label].clone();
        let cargo = prevalidated.cargos[&label].clone();
        let step_fqname = match loop_info {
            Some((index, _)) => format!("{fqname}.{label}:{index}"),
            None => format!("{fqname}.{label}"),
        };

        let forced = selection.forced.contains(&label);
        if let Some(reason) = selection_skip_reason(&selection, &step, forced, &label) {
            record_skip(&ctx, &step_fqname, &reason, &mut outcome).await;
            let scope = declared_scope(&cargo);
            steps_scope.insert(label.clone(), ConfigValue::Map(scope.clone()));
            previous_scope = ConfigValue::Map(scope);
            continue;
        }

        // recipe-level assignments re-evaluate before every step (loop vars
        // and prior step results feed them); step-level assignments overlay
        // them and persist only for this step
        let ns = step_ns(
            &ctx,
            &prevalidated.values,
            &steps_scope,
            &previous_scope,
            &label,
            &step_fqname,
            loop_info,
        );
        apply_assign(
            &mut prevalidated.values,
            &prevalidated.immune,
            &recipe.assign,
            &ns,
            &step_fqname,
            false,
        )?;
        let ns = step_ns(
            &ctx,
            &prevalidated.values,
            &steps_scope,
            &previous_scope,
            &label,
            &step_fqname,
            loop_info,
        );
        apply_assign_based_on(
            &mut prevalidated.values,
            &prevalidated.immune,
            &recipe.assign_based_on,
            &known,
            &ns,
            &step_fqname,
            false,
        )?;

        let mut step_values = prevalidated.values.clone();
        let ns = step_ns(
            &ctx,
            &step_values,
            &steps_scope,
            &previous_scope,
            &label,
            &step_fqname,
            loop_info,
        );
        apply_assign(
            &mut step_values,
            &prevalidated.immune,
            &step.assign,
            &ns,
            &step_fqname,
            false,
        )?;
        let step_known: HashSet<String> = known
            .iter()
            .chain(step.assign.keys())
            .cloned()
            .collect();
        let ns = step_ns(
            &ctx,
            &step_values,
            &steps_scope,
            &previous_scope,
            &label,
            &step_fqname,
            loop_info,
        );
        apply_assign_based_on(
            &mut step_values,
            &prevalidated.immune,
            &step.assign_based_on,
            &step_known,
            &ns,
            &step_fqname,
            false,
        )?;

        // namespace stack for this step's substitutions
        let mut ns = step_ns(
            &ctx,
            &step_values,
            &steps_scope,
            &previous_scope,
            &label,
            &step_fqname,
            loop_info,
        );

        // skip condition may be a substitution or formula
        let mut skip = step.skip_is_constant_true() && !forced;
        if !skip && !forced {
            if let Some(condition) = step.skip_condition() {
                let evaluated = ns.evaluate(
                    &ConfigValue::String(condition.to_string()),
                    &format!("{step_fqname}.skip"),
                )?;
                skip = match evaluated {
                    galley_core::Evaluated::Value(v) => v.is_truthy(),
                    galley_core::Evaluated::Unset => {
                        return Err(ValidationError::BadStep {
                            step: step_fqname.clone(),
                            message: format!("error evaluating skip '{condition}'"),
                        }
                        .into())
                    }
                };
            }
        }

        // propagate current alias values down into this step's raw params
        // (assignments may have changed them since prevalidation)
        let mut raw_params = step.params.clone();
        for alias in prevalidated.aliases.values() {
            if alias.is_output {
                continue;
            }
            let Some(value) = step_values.get(&alias.name) else {
                continue;
            };
            for target in &alias.targets {
                if target.step == label {
                    raw_params.insert(target.param.clone(), value.clone());
                }
            }
        }

        // evaluate parameters against the namespace stack; parameters whose
        // policies disable substitution pass through untouched
        let defaults = cargo.defaults();
        let mut literal = IndexMap::new();
        if let Cargo::Cab(cab) = &cargo {
            for (name, value) in &raw_params {
                let Some(schema) = cab.schema_for(name) else {
                    continue;
                };
                let policies = schema.policies.merged_over(&cab.policies);
                if policies.disable_substitutions == Some(true) {
                    literal.insert(name.clone(), value.clone());
                }
            }
        }
        for name in literal.keys() {
            raw_params.shift_remove(name);
        }
        let mut params = ns.evaluate_params(&raw_params, &defaults, &step_fqname)?;
        for (name, value) in literal {
            params.insert(name, value);
        }

        // a dynamic schema revises the cab's inputs/outputs after initial
        // binding; validation then runs against the revised maps
        let mut cargo = cargo;
        if let Cargo::Cab(cab) = &mut cargo {
            if let (Some(reference), Some(resolver)) =
                (cab.dynamic_schema.clone(), ctx.dynamic_schema.as_ref())
            {
                let (inputs, outputs) =
                    resolver.revise(&reference, &params, &cab.inputs, &cab.outputs)?;
                cab.inputs = inputs;
                cab.outputs = outputs;
            }
        }
        let cargo = cargo;

        // implicit parameters are computed, never user-settable
        ns.set_scope("current", ConfigValue::Map(params.clone()));
        for (name, schema) in cargo.inputs().iter().chain(cargo.outputs().iter()) {
            let Some(implicit) = &schema.implicit else {
                continue;
            };
            if step.params.contains_key(name) && cargo.inputs().contains_key(name) {
                return Err(ValidationError::ImplicitOverride { name: name.clone() }.into());
            }
            let evaluated = ns.evaluate(implicit, &format!("{step_fqname}.{name}"))?;
            if let galley_core::Evaluated::Value(value) = evaluated {
                params.insert(name.clone(), value);
            }
        }
        ns.set_scope("current", ConfigValue::Map(params.clone()));

        // validate, creating directories and clearing stale outputs only
        // when the step actually runs
        let mut schemas: IndexMap<String, Schema> = cargo.inputs().clone();
        for (name, schema) in cargo.outputs() {
            schemas.insert(name.clone(), schema.clone());
        }
        let params = validate_params(
            &params,
            &schemas,
            &defaults,
            ValidateOptions {
                check_unknowns: true,
                check_required: !skip,
                check_exist: !skip,
                create_dirs: !skip,
                remove_if_exists: !skip,
            },
        )?;

        // freshness/existence skip
        if !skip {
            if let Some(mode) = step.skip_if_outputs {
                if outputs_satisfied(&cargo, &params, mode) {
                    skip = true;
                }
            }
        }

        if skip {
            record_skip(&ctx, &step_fqname, "skip setting", &mut outcome).await;
            // a skipped step still exposes its defaults and implicits, but
            // does not interpose results
            let scope: ConfigMap = params.clone();
            steps_scope.insert(label.clone(), ConfigValue::Map(scope.clone()));
            previous_scope = ConfigValue::Map(scope);
            continue;
        }

        ctx.sink
            .emit(Event::StepStarted {
                run_id: ctx.run_id,
                fqname: step_fqname.clone(),
            })
            .await;

        let dispatched = dispatch_step(
            &ctx,
            &step,
            &cargo,
            &prevalidated,
            params,
            &step_fqname,
            &ns,
        )
        .await;

        let params = match dispatched {
            Ok((params, warnings)) => {
                outcome.warnings.extend(warnings);
                params
            }
            Err(error) => {
                ctx.sink
                    .emit(Event::StepFailed {
                        run_id: ctx.run_id,
                        fqname: step_fqname.clone(),
                        message: error.to_string(),
                    })
                    .await;
                outcome.steps.push(StepReport {
                    fqname: step_fqname.clone(),
                    status: StepStatus::Failed,
                });
                return Err(error);
            }
        };

        // typecheck outputs now that the cab has produced them
        let params = validate_params(
            &params,
            &schemas,
            &defaults,
            ValidateOptions::default(),
        )?;

        ctx.sink
            .emit(Event::StepSucceeded {
                run_id: ctx.run_id,
                fqname: step_fqname.clone(),
            })
            .await;
        outcome.steps.push(StepReport {
            fqname: step_fqname.clone(),
            status: StepStatus::Succeeded,
        });

        // expose results to later steps and propagate output aliases upward
        let scope: ConfigMap = params.clone();
        steps_scope.insert(label.clone(), ConfigValue::Map(scope.clone()));
        previous_scope = ConfigValue::Map(scope);
        for alias in prevalidated.aliases.values() {
            if !alias.is_output {
                continue;
            }
            for target in &alias.targets {
                if target.step == label {
                    if let Some(value) = params.get(&target.param) {
                        prevalidated
                            .values
                            .insert(alias.name.clone(), value.clone());
                    }
                }
            }
        }
    }

    outcome.values = prevalidated.values;
    Ok(outcome)
}

/// Dispatches a bound step to the cab runtime, or recursively into a
/// sub-recipe. Returns the updated params plus accumulated warnings.
#[allow(clippy::too_many_arguments)]
async fn dispatch_step(
    ctx: &Arc<RunContext>,
    step: &Step,
    cargo: &Cargo,
    prevalidated: &Prevalidated,
    mut params: IndexMap<String, ConfigValue>,
    step_fqname: &str,
    ns: &Namespaces,
) -> Result<(IndexMap<String, ConfigValue>, Vec<String>), RunError> {
    match cargo {
        Cargo::Cab(cab) => {
            // the command template and environment values may carry
            // substitutions of their own; inline code bodies only opt in
            // via the flavour's subst flag (braces are code there)
            let mut cab = cab.clone();
            let command_subst = match &cab.flavour {
                galley_core::Flavour::InlineCode { subst, .. } => *subst,
                galley_core::Flavour::Callable { .. } => false,
                _ => true,
            };
            if command_subst && cab.command.contains('{') {
                cab.command = ns.substitute(&cab.command, &format!("{step_fqname}.command"))?;
            }
            for value in cab.management.environment.values_mut() {
                if value.contains('{') {
                    *value = ns.substitute(value, &format!("{step_fqname}.environment"))?;
                }
            }
            let cab = &cab;
            let settings = BackendSettings::from_layers(&[
                ctx.config.get_path("opts.backend"),
                prevalidated.recipe.backend.as_ref(),
                cab.backend.as_ref(),
                step.backend.as_ref(),
                ctx.backend_override.as_ref(),
            ])?;
            let selected = ctx.dispatcher.select(&settings)?;
            let outcome = run_cab(
                cab,
                &params,
                step_fqname,
                &selected,
                ctx.sink.as_ref(),
                ctx.run_id,
                &ctx.cancel,
                ctx.step_timeout,
            )
            .await?;
            for (name, value) in outcome.outputs {
                params.insert(name, value);
            }
            for warning in &outcome.warnings {
                ctx.sink
                    .emit(Event::Warning {
                        run_id: ctx.run_id,
                        fqname: step_fqname.to_string(),
                        message: warning.clone(),
                    })
                    .await;
            }
            Ok((params, outcome.warnings))
        }
        Cargo::Recipe(sub_recipe) => {
            let sub_params: ConfigMap = params
                .iter()
                .filter(|(name, _)| {
                    sub_recipe.inputs.contains_key(*name)
                        || sub_recipe.outputs.contains_key(*name)
                })
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            let sub_prevalidated =
                prevalidate(sub_recipe, &ctx.registry, &sub_params, &ctx.config)?;
            let sub_outcome = run_recipe_instance(
                ctx.clone(),
                sub_prevalidated.clone(),
                step_fqname.to_string(),
                StepSelection::default(),
            )
            .await
            // sub-recipes do not mask child failures; the parent sees a
            // cab failure carrying the failing step's fully-qualified name
            .map_err(|error| match error {
                RunError::Cancelled => RunError::Cancelled,
                other => RunError::CabFailure {
                    fqname: step_fqname.to_string(),
                    message: other.to_string(),
                    stderr_tail: Vec::new(),
                },
            })?;
            for (name, value) in sub_outcome.outputs(&sub_prevalidated) {
                params.insert(name, value);
            }
            Ok((params, sub_outcome.warnings))
        }
    }
}

async fn record_skip(
    ctx: &Arc<RunContext>,
    step_fqname: &str,
    reason: &str,
    outcome: &mut RecipeOutcome,
) {
    ctx.sink
        .emit(Event::StepSkipped {
            run_id: ctx.run_id,
            fqname: step_fqname.to_string(),
            reason: reason.to_string(),
        })
        .await;
    outcome.steps.push(StepReport {
        fqname: step_fqname.to_string(),
        status: StepStatus::Skipped,
    });
}

/// The declared defaults and implicits a skipped step still publishes to
/// `previous` and `steps.<label>`.
fn declared_scope(cargo: &Cargo) -> ConfigMap {
    let mut scope = ConfigMap::new();
    for (name, schema) in cargo.inputs().iter().chain(cargo.outputs().iter()) {
        if let Some(default) = &schema.default {
            scope.insert(name.clone(), default.clone());
        } else if let Some(implicit) = &schema.implicit {
            scope.insert(name.clone(), implicit.clone());
        }
    }
    for (name, value) in cargo.defaults() {
        scope.insert(name, value);
    }
    scope
}

/// Tag and explicit-selection rules. `always` runs unless skip-tagged;
/// `never` runs only when its tag is requested or the step is forced.
fn selection_skip_reason(
    selection: &StepSelection,
    step: &Step,
    forced: bool,
    label: &str,
) -> Option<String> {
    if forced {
        return None;
    }
    if let Some(enabled) = &selection.enabled {
        if !enabled.contains(label) {
            return Some("not in step selection".to_string());
        }
    }
    let tags: HashSet<&str> = step.tags.iter().map(String::as_str).collect();
    if selection.skip_tags.iter().any(|t| tags.contains(t.as_str())) {
        return Some("skip-tag match".to_string());
    }
    if tags.contains("always") {
        return None;
    }
    if tags.contains("never") && !selection.tags.iter().any(|t| tags.contains(t.as_str())) {
        return Some("tagged 'never'".to_string());
    }
    if !selection.tags.is_empty() && !selection.tags.iter().any(|t| tags.contains(t.as_str())) {
        return Some("tag selection".to_string());
    }
    None
}

/// `skip_if_outputs`: `exist` skips when every file output path is present;
/// `fresh` additionally requires outputs at least as new as the newest input
/// (inputs marked `skip_freshness_checks` excluded). With no file-type
/// outputs this never skips.
fn outputs_satisfied(
    cargo: &Cargo,
    params: &IndexMap<String, ConfigValue>,
    mode: SkipIfOutputs,
) -> bool {
    use std::time::SystemTime;

    let mtime = |path: &str| -> Option<SystemTime> {
        std::fs::metadata(path).and_then(|m| m.modified()).ok()
    };

    // newest input mtime, for freshness mode
    let mut newest_input: Option<SystemTime> = None;
    if mode == SkipIfOutputs::Fresh {
        for (name, schema) in cargo.inputs() {
            if schema.skip_freshness_checks
                || !(schema.is_file_like() || schema.is_file_list())
            {
                continue;
            }
            for path in file_values(params.get(name)) {
                if let Some(t) = mtime(&path) {
                    newest_input = Some(match newest_input {
                        Some(prev) if prev >= t => prev,
                        _ => t,
                    });
                }
            }
        }
    }

    let mut saw_file_output = false;
    for (name, schema) in cargo.outputs() {
        if !(schema.is_file_like() || schema.is_file_list()) {
            continue;
        }
        let paths = file_values(params.get(name));
        if paths.is_empty() {
            if schema.must_exist == Some(true) {
                return false;
            }
            continue;
        }
        saw_file_output = true;
        for path in paths {
            let Some(out_time) = mtime(&path) else {
                return false;
            };
            if let Some(input_time) = newest_input {
                if !schema.skip_freshness_checks && out_time < input_time {
                    return false;
                }
            }
        }
    }
    saw_file_output
}

fn file_values(value: Option<&ConfigValue>) -> Vec<String> {
    match value {
        Some(ConfigValue::String(s)) => vec![s.clone()],
        Some(ConfigValue::List(items)) => items
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        _ => Vec::new(),
    }
}

/// Step identity exposed under the `info` namespace.
fn info_scope(label: &str, fqname: &str, loop_info: Option<(usize, usize)>) -> ConfigValue {
    let parts: Vec<ConfigValue> = label
        .split('-')
        .map(|p| ConfigValue::String(p.to_string()))
        .collect();
    let suffix = if parts.len() > 1 {
        label.rsplit('-').next().unwrap_or("").to_string()
    } else {
        String::new()
    };
    let taskname = match loop_info {
        Some((index, _)) => format!("{fqname}.{index}"),
        None => fqname.to_string(),
    };
    let mut scope = ConfigMap::new();
    scope.insert("label".into(), ConfigValue::String(label.to_string()));
    scope.insert("label_parts".into(), ConfigValue::List(parts));
    scope.insert("suffix".into(), ConfigValue::String(suffix));
    scope.insert("fqname".into(), ConfigValue::String(fqname.to_string()));
    scope.insert("taskname".into(), ConfigValue::String(taskname));
    ConfigValue::Map(scope)
}

/// The full namespace stack for one step: recipe/root values, prior step
/// results, `previous`, step identity and the configuration tree.
fn step_ns(
    ctx: &RunContext,
    values: &ConfigMap,
    steps_scope: &ConfigMap,
    previous_scope: &ConfigValue,
    label: &str,
    fqname: &str,
    loop_info: Option<(usize, usize)>,
) -> Namespaces {
    let mut ns = Namespaces::new();
    ns.set_scope("recipe", ConfigValue::Map(values.clone()));
    ns.set_scope("root", ConfigValue::Map(values.clone()));
    ns.set_scope("config", ctx.config.clone());
    ns.set_scope("steps", ConfigValue::Map(steps_scope.clone()));
    ns.set_scope("previous", previous_scope.clone());
    ns.set_scope("info", info_scope(label, fqname, loop_info));
    ns
}

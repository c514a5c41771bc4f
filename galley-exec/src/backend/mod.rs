mod batch;
mod native;

pub use batch::BatchWrapper;
pub use native::NativeBackend;

use async_trait::async_trait;
use tokio::process::Child;

use galley_core::config::ConfigValue;
use galley_core::merge;

use crate::error::RunError;
use crate::invocation::InvocationPlan;

/// An adapter that turns an invocation plan into a running process. The core
/// ships the native (direct process) adapter; container and cluster adapters
/// are external collaborators satisfying the same interface.
#[async_trait]
pub trait Backend: Send + Sync {
    fn name(&self) -> &str;

    /// Probes for availability (executable on PATH, client library present).
    /// The native backend is always available.
    fn available(&self) -> bool;

    /// May inject wrapper commands, rewrite paths for mounts, or pre-stage
    /// files. The native backend returns the plan unchanged.
    fn prepare(&self, plan: InvocationPlan) -> Result<InvocationPlan, RunError>;

    /// Launches the prepared plan; the returned child has its stdout and
    /// stderr piped.
    async fn spawn(&self, plan: &InvocationPlan) -> Result<Child, RunError>;

    /// Builds (or pulls) the image a plan refers to. A no-op for the native
    /// backend.
    async fn build(&self, image: &str) -> Result<String, RunError>;
}

/// Merged backend preferences: `opts.backend` ← recipe ← cab ← step, each
/// layer a mapping with an optional `select` ordering.
#[derive(Debug, Clone, Default)]
pub struct BackendSettings {
    merged: ConfigValue,
}

impl BackendSettings {
    pub fn from_layers(layers: &[Option<&ConfigValue>]) -> Result<BackendSettings, RunError> {
        let mut merged = ConfigValue::Map(Default::default());
        for layer in layers.iter().flatten() {
            merge(&mut merged, (*layer).clone())?;
        }
        Ok(BackendSettings { merged })
    }

    /// Backend names in preference order. A missing/empty `select` defaults
    /// to the native backend.
    pub fn selection(&self) -> Vec<String> {
        match self.merged.get_path("select") {
            Some(ConfigValue::String(name)) => vec![name.clone()],
            Some(ConfigValue::List(items)) => items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
            _ => vec!["native".to_string()],
        }
    }

    /// Options subtree for a named backend.
    pub fn options_for(&self, backend: &str) -> Option<&ConfigValue> {
        self.merged.get_path(backend)
    }

    /// The batch-scheduler wrapper composes over whichever backend wins.
    pub fn batch_options(&self) -> Option<&ConfigValue> {
        self.merged.get_path("batch")
    }
}

/// The registered set of backends. First available name in the selection
/// wins; the native backend is always registered.
pub struct Dispatcher {
    backends: Vec<Box<dyn Backend>>,
}

impl Dispatcher {
    pub fn with_native() -> Dispatcher {
        Dispatcher {
            backends: vec![Box::new(NativeBackend::default())],
        }
    }

    pub fn register(&mut self, backend: Box<dyn Backend>) {
        self.backends.push(backend);
    }

    pub fn get(&self, name: &str) -> Option<&dyn Backend> {
        self.backends
            .iter()
            .find(|b| b.name() == name)
            .map(Box::as_ref)
    }

    /// Picks the first available backend from the settings' selection and
    /// wraps it in the batch wrapper when batch options are present.
    pub fn select<'a>(
        &'a self,
        settings: &BackendSettings,
    ) -> Result<SelectedBackend<'a>, RunError> {
        let selection = settings.selection();
        for name in &selection {
            if let Some(backend) = self.get(name) {
                if backend.available() {
                    let batch = settings
                        .batch_options()
                        .map(BatchWrapper::from_options)
                        .transpose()?;
                    return Ok(SelectedBackend { backend, batch });
                }
            }
        }
        Err(RunError::BackendUnavailable {
            tried: selection.join(", "),
        })
    }
}

/// A chosen backend plus the optional batch-submission wrapper composed
/// above it.
pub struct SelectedBackend<'a> {
    backend: &'a dyn Backend,
    batch: Option<BatchWrapper>,
}

impl<'a> SelectedBackend<'a> {
    pub fn name(&self) -> &str {
        self.backend.name()
    }

    pub fn prepare(&self, plan: InvocationPlan) -> Result<InvocationPlan, RunError> {
        let plan = self.backend.prepare(plan)?;
        match &self.batch {
            Some(wrapper) => wrapper.wrap(plan),
            None => Ok(plan),
        }
    }

    pub async fn spawn(&self, plan: &InvocationPlan) -> Result<Child, RunError> {
        self.backend.spawn(plan).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn yaml(text: &str) -> ConfigValue {
        serde_yaml::from_str(text).unwrap()
    }

    #[test]
    fn selection_merges_layers_in_order() {
        let opts = yaml("select: [container, native]");
        let step = yaml("select: native");
        let settings =
            BackendSettings::from_layers(&[Some(&opts), None, None, Some(&step)]).unwrap();
        assert_eq!(settings.selection(), vec!["native"]);
    }

    #[test]
    fn native_is_always_selectable() {
        let dispatcher = Dispatcher::with_native();
        let settings = BackendSettings::default();
        let selected = dispatcher.select(&settings).unwrap();
        assert_eq!(selected.name(), "native");
    }

    #[test]
    fn unknown_backends_fail_the_probe() {
        let dispatcher = Dispatcher::with_native();
        let settings =
            BackendSettings::from_layers(&[Some(&yaml("select: [kube]"))]).unwrap();
        assert!(matches!(
            dispatcher.select(&settings),
            Err(RunError::BackendUnavailable { .. })
        ));
    }
}

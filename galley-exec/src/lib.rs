#![forbid(unsafe_code)]

pub mod backend;
pub mod cab_runner;
pub mod cancel;
pub mod doc;
pub mod error;
pub mod events;
pub mod invocation;
pub mod run;
pub mod scheduler;
pub mod wrangle;

pub use crate::backend::{Backend, BackendSettings, BatchWrapper, Dispatcher, NativeBackend};
pub use crate::cab_runner::{run_cab, CabOutcome};
pub use crate::cancel::{cancel_pair, CancelSource, CancelToken};
pub use crate::doc::{build_images, describe_recipe, RecipeDoc};
pub use crate::error::RunError;
pub use crate::events::{Event, LogSink, MemoryLogSink, Severity, TracingLogSink};
pub use crate::invocation::{InvocationPlan, Mount};
pub use crate::run::{parse_param_assignments, run_recipe, RunOptions, RunReport};
pub use crate::scheduler::{
    run_recipe_instance, DynamicSchemaResolver, RecipeOutcome, RunContext, StepReport,
    StepSelection, StepStatus,
};

use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::{Child, Command};

use super::Backend;
use crate::error::RunError;
use crate::invocation::InvocationPlan;

/// The direct-process backend: execs the plan's argv with the given
/// environment and working directory. Always available.
#[derive(Debug, Default)]
pub struct NativeBackend;

#[async_trait]
impl Backend for NativeBackend {
    fn name(&self) -> &str {
        "native"
    }

    fn available(&self) -> bool {
        true
    }

    /// Resource-limit options are applied here by wrapping the argv in a
    /// shell that raises the limit before exec.
    fn prepare(&self, mut plan: InvocationPlan) -> Result<InvocationPlan, RunError> {
        if let Some(limit) = plan.max_open_files.take() {
            let mut argv = vec![
                "sh".to_string(),
                "-c".to_string(),
                format!("ulimit -n {limit} 2>/dev/null; exec \"$@\""),
                "sh".to_string(),
            ];
            argv.append(&mut plan.argv);
            plan.argv = argv;
        }
        Ok(plan)
    }

    async fn spawn(&self, plan: &InvocationPlan) -> Result<Child, RunError> {
        let (program, args) = plan.argv.split_first().ok_or_else(|| RunError::Spawn {
            command: String::new(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "empty argv"),
        })?;
        let mut command = Command::new(program);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for (key, value) in &plan.env {
            command.env(key, value);
        }
        if let Some(dir) = &plan.workdir {
            command.current_dir(dir);
        }
        command.spawn().map_err(|source| RunError::Spawn {
            command: plan.command_line(),
            source,
        })
    }

    async fn build(&self, image: &str) -> Result<String, RunError> {
        // no image runtime here; the identifier passes through
        Ok(image.to_string())
    }
}

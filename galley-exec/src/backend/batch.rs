use galley_core::cab::split_command;
use galley_core::config::ConfigValue;

use crate::error::RunError;
use crate::invocation::InvocationPlan;

/// Wraps a prepared plan's argv with a batch-scheduler submission command.
/// Composes above any other backend; the submission executable must be on
/// PATH for the probe to pass.
#[derive(Debug, Clone)]
pub struct BatchWrapper {
    command: Vec<String>,
    extra_args: Vec<String>,
}

impl BatchWrapper {
    /// Options: `command` (submission command line, e.g. `srun`), optional
    /// `args` appended before the wrapped argv.
    pub fn from_options(options: &ConfigValue) -> Result<BatchWrapper, RunError> {
        let command = match options.get_path("command") {
            Some(ConfigValue::String(s)) => split_command(s),
            Some(ConfigValue::List(items)) => items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
            _ => {
                return Err(RunError::BackendUnavailable {
                    tried: "batch (no submission command configured)".to_string(),
                })
            }
        };
        let extra_args = match options.get_path("args") {
            Some(ConfigValue::List(items)) => items.iter().map(|v| v.to_string()).collect(),
            Some(ConfigValue::String(s)) => split_command(s),
            _ => Vec::new(),
        };
        Ok(BatchWrapper {
            command,
            extra_args,
        })
    }

    pub fn available(&self) -> bool {
        let Some(program) = self.command.first() else {
            return false;
        };
        which(program)
    }

    pub fn wrap(&self, mut plan: InvocationPlan) -> Result<InvocationPlan, RunError> {
        if !self.available() {
            return Err(RunError::BackendUnavailable {
                tried: format!("batch ({})", self.command.join(" ")),
            });
        }
        let mut argv = self.command.clone();
        argv.extend(self.extra_args.clone());
        argv.append(&mut plan.argv);
        plan.argv = argv;
        Ok(plan)
    }
}

/// PATH probe for an executable.
fn which(program: &str) -> bool {
    if program.contains('/') {
        return std::path::Path::new(program).is_file();
    }
    let Some(path) = std::env::var_os("PATH") else {
        return false;
    };
    std::env::split_paths(&path).any(|dir| dir.join(program).is_file())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wraps_argv_with_submission_command() {
        let options: ConfigValue =
            serde_yaml::from_str("command: sh\nargs: [-c]").unwrap();
        let wrapper = BatchWrapper::from_options(&options).unwrap();
        let plan = InvocationPlan::new("t", vec!["echo".to_string(), "hi".to_string()]);
        let wrapped = wrapper.wrap(plan).unwrap();
        assert_eq!(wrapped.argv, vec!["sh", "-c", "echo", "hi"]);
    }

    #[test]
    fn missing_submission_command_is_an_error() {
        let options: ConfigValue = serde_yaml::from_str("queue: long").unwrap();
        assert!(BatchWrapper::from_options(&options).is_err());
    }
}

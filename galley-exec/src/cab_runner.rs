use std::collections::VecDeque;
use std::time::Duration;

use indexmap::IndexMap;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::mpsc;
use uuid::Uuid;

use galley_core::cab::Cab;
use galley_core::config::ConfigValue;

use crate::backend::SelectedBackend;
use crate::cancel::CancelToken;
use crate::error::RunError;
use crate::events::{Event, LogSink};
use crate::invocation::InvocationPlan;
use crate::wrangle::{wrangle_line, CabStatus};

/// How many trailing standard-error lines are kept for failure reports.
const STDERR_TAIL: usize = 16;

/// Result of one cab invocation.
#[derive(Debug, Default)]
pub struct CabOutcome {
    /// Wrangler-captured outputs, precedence already applied.
    pub outputs: IndexMap<String, ConfigValue>,
    pub warnings: Vec<String>,
}

/// Launches a bound cab on the selected backend, streams its output through
/// the wrangler pipeline, and evaluates the final status.
#[allow(clippy::too_many_arguments)]
pub async fn run_cab(
    cab: &Cab,
    params: &IndexMap<String, ConfigValue>,
    fqname: &str,
    backend: &SelectedBackend<'_>,
    sink: &dyn LogSink,
    run_id: Uuid,
    cancel: &CancelToken,
    timeout: Option<Duration>,
) -> Result<CabOutcome, RunError> {
    let argv = cab.command_spec(params)?;
    let mut plan = InvocationPlan::new(fqname, argv);
    for (key, value) in &cab.management.environment {
        plan.env.insert(key.clone(), value.clone());
    }
    plan.image = cab.image.as_ref().map(|i| i.to_string_with(None));
    plan.timeout = timeout;
    // the output-file manifest and mount pairs let containerised backends
    // stage paths; the native backend ignores them
    for (name, schema) in cab.inputs.iter().chain(cab.outputs.iter()) {
        if !(schema.is_file_like() || schema.is_file_list()) {
            continue;
        }
        let writable = schema.writable || cab.outputs.contains_key(name);
        for value in file_paths(params.get(name)) {
            let path = std::path::PathBuf::from(&value);
            plan.mounts.push(crate::invocation::Mount {
                host: path.clone(),
                inside: path,
                readwrite: writable,
            });
            if cab.outputs.contains_key(name) {
                plan.outputs.push(crate::invocation::OutputFile {
                    name: name.clone(),
                    path: value,
                    schema: schema.clone(),
                });
            }
        }
    }

    let plan = backend.prepare(plan)?;
    tracing::debug!(step = fqname, command = %plan.command_line(), "launching");
    let mut child = backend.spawn(&plan).await?;

    let stdout = child.stdout.take().expect("stdout piped by backend");
    let stderr = child.stderr.take().expect("stderr piped by backend");
    let (tx, mut rx) = mpsc::channel::<(String, bool)>(64);
    let err_tx = tx.clone();
    let stdout_reader = tokio::spawn(read_lines(stdout, tx, false));
    let stderr_reader = tokio::spawn(read_lines(stderr, err_tx, true));

    let deadline = timeout.map(|t| tokio::time::Instant::now() + t);
    let mut status = CabStatus::default();
    let mut stderr_tail: VecDeque<String> = VecDeque::with_capacity(STDERR_TAIL);

    // both streams are read concurrently; the channel serialises them into
    // one line-atomic wrangling sequence
    loop {
        tokio::select! {
            received = rx.recv() => {
                let Some((line, from_stderr)) = received else { break };
                if from_stderr {
                    if stderr_tail.len() == STDERR_TAIL {
                        stderr_tail.pop_front();
                    }
                    stderr_tail.push_back(line.clone());
                }
                let wrangled = wrangle_line(&cab.management.wranglers, &line, &mut status);
                sink.emit(Event::CabOutput {
                    run_id,
                    fqname: fqname.to_string(),
                    line,
                    display: wrangled.display,
                    severity: wrangled.severity,
                    from_stderr,
                })
                .await;
            }
            _ = cancel.cancelled() => {
                let _ = child.start_kill();
                let _ = child.wait().await;
                stdout_reader.abort();
                stderr_reader.abort();
                return Err(RunError::Cancelled);
            }
            _ = sleep_until_deadline(deadline), if deadline.is_some() => {
                let _ = child.start_kill();
                let _ = child.wait().await;
                stdout_reader.abort();
                stderr_reader.abort();
                return Err(RunError::Timeout {
                    fqname: fqname.to_string(),
                    seconds: timeout.map(|t| t.as_secs()).unwrap_or(0),
                });
            }
        }
    }

    let exit = child.wait().await?;
    let _ = stdout_reader.await;
    let _ = stderr_reader.await;

    let exit_description = match exit.code() {
        Some(code) => format!("exit code {code}"),
        None => "killed by signal".to_string(),
    };
    if let Err(message) = status.verdict(exit.success(), &exit_description) {
        cleanup(cab);
        return Err(RunError::CabFailure {
            fqname: fqname.to_string(),
            message,
            stderr_tail: stderr_tail.into_iter().collect(),
        });
    }

    // declared required file outputs must exist on disk, unless the
    // wranglers declared success outright
    for (name, schema) in &cab.outputs {
        if !schema.is_required() || !(schema.is_file_like() || schema.is_file_list()) {
            continue;
        }
        let Some(value) = params.get(name) else {
            continue;
        };
        let missing = match value {
            ConfigValue::String(path) => !std::path::Path::new(path).exists(),
            ConfigValue::List(items) => items.iter().any(|v| {
                v.as_str()
                    .map(|p| !std::path::Path::new(p).exists())
                    .unwrap_or(false)
            }),
            _ => false,
        };
        if missing && !status.success_declared() {
            cleanup(cab);
            return Err(RunError::MissingRequiredOutput {
                fqname: fqname.to_string(),
                name: name.clone(),
            });
        }
    }

    cleanup(cab);
    Ok(CabOutcome {
        outputs: status.merged_outputs(),
        warnings: std::mem::take(&mut status.warnings),
    })
}

fn file_paths(value: Option<&ConfigValue>) -> Vec<String> {
    match value {
        Some(ConfigValue::String(s)) => vec![s.clone()],
        Some(ConfigValue::List(items)) => items
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        _ => Vec::new(),
    }
}

async fn read_lines(
    stream: impl AsyncRead + Unpin,
    tx: mpsc::Sender<(String, bool)>,
    from_stderr: bool,
) {
    let mut lines = BufReader::new(stream).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if tx.send((line, from_stderr)).await.is_err() {
            break;
        }
    }
}

async fn sleep_until_deadline(deadline: Option<tokio::time::Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

/// Removes files matching the cab's cleanup patterns.
fn cleanup(cab: &Cab) {
    for pattern in &cab.management.cleanup {
        let Ok(paths) = glob::glob(pattern) else {
            continue;
        };
        for path in paths.flatten() {
            let result = if path.is_dir() {
                std::fs::remove_dir_all(&path)
            } else {
                std::fs::remove_file(&path)
            };
            if let Err(error) = result {
                tracing::warn!(path = %path.display(), %error, "cleanup failed");
            }
        }
    }
}

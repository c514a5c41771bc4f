use std::path::PathBuf;
use std::time::Duration;

use indexmap::IndexMap;

use galley_core::schema::Schema;

/// Host path ↔ sandbox path pairing for containerised backends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mount {
    pub host: PathBuf,
    pub inside: PathBuf,
    pub readwrite: bool,
}

/// A declared output file the runtime reads back after the cab exits.
#[derive(Debug, Clone)]
pub struct OutputFile {
    pub name: String,
    pub path: String,
    pub schema: Schema,
}

/// Everything a backend needs to launch one cab invocation. Produced by the
/// cab model plus runtime context; backends may rewrite it in `prepare`.
#[derive(Debug, Clone)]
pub struct InvocationPlan {
    pub fqname: String,
    pub argv: Vec<String>,
    pub env: IndexMap<String, String>,
    pub workdir: Option<PathBuf>,
    pub mounts: Vec<Mount>,
    pub image: Option<String>,
    pub outputs: Vec<OutputFile>,
    pub timeout: Option<Duration>,
    /// Soft limit on open files applied to locally-spawned processes.
    pub max_open_files: Option<u64>,
}

impl InvocationPlan {
    pub fn new(fqname: impl Into<String>, argv: Vec<String>) -> Self {
        InvocationPlan {
            fqname: fqname.into(),
            argv,
            env: IndexMap::new(),
            workdir: None,
            mounts: Vec::new(),
            image: None,
            outputs: Vec::new(),
            timeout: None,
            max_open_files: None,
        }
    }

    pub fn command_line(&self) -> String {
        self.argv.join(" ")
    }
}

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use super::value::{merge, ConfigMap, ConfigValue};
use super::INCLUDE_PATH_VAR;
use crate::error::LoadError;

/// Options controlling document loading and include resolution.
#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    /// Extra search locations, tried after the current directory and the
    /// `GALLEY_INCLUDE` entries.
    pub search_paths: Vec<PathBuf>,
    /// If false, the `GALLEY_INCLUDE` environment variable is ignored.
    pub no_include_env: bool,
}

/// Reads structured-text documents and resolves their `_include` and
/// `_include_post` directives. `_use`/`_scrub` need the fully merged tree and
/// are handled separately (see `resolve_uses_and_scrubs`).
pub struct Loader {
    search_paths: Vec<PathBuf>,
    packages: HashMap<String, PathBuf>,
    /// Documents currently being loaded, for include-cycle detection.
    stack: Vec<PathBuf>,
}

/// An include reference, as written in a document.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Reference {
    name: String,
    package: Option<String>,
    /// `(.)` prefix: resolve against the including document's directory only.
    local_only: bool,
    /// `[optional]` suffix: a missing target is not an error.
    optional: bool,
}

impl Reference {
    fn parse(text: &str) -> Reference {
        let mut rest = text.trim();
        let mut optional = false;
        if let Some(stripped) = rest.strip_suffix("[optional]") {
            optional = true;
            rest = stripped.trim_end();
        }
        let mut package = None;
        let mut local_only = false;
        if let Some(stripped) = rest.strip_prefix("(.)") {
            local_only = true;
            rest = stripped;
        } else if rest.starts_with('(') {
            if let Some(close) = rest.find(')') {
                package = Some(rest[1..close].to_string());
                rest = &rest[close + 1..];
            }
        }
        Reference {
            name: rest.to_string(),
            package,
            local_only,
            optional,
        }
    }
}

impl Loader {
    pub fn new(options: LoadOptions) -> Self {
        let mut search_paths = vec![PathBuf::from(".")];
        let mut packages = HashMap::new();
        if !options.no_include_env {
            if let Ok(var) = std::env::var(INCLUDE_PATH_VAR) {
                for entry in var.split(':').filter(|s| !s.is_empty()) {
                    match entry.split_once('=') {
                        Some((pkg, dir)) => {
                            packages.insert(pkg.to_string(), PathBuf::from(dir));
                        }
                        None => search_paths.push(PathBuf::from(entry)),
                    }
                }
            }
        }
        search_paths.extend(options.search_paths);
        if let Some(home) = std::env::var_os("HOME") {
            search_paths.push(Path::new(&home).join(".galley"));
        }
        Loader {
            search_paths,
            packages,
            stack: Vec::new(),
        }
    }

    /// Loads a document and resolves its `_include`/`_include_post` keys,
    /// recursively, anywhere in the tree.
    pub fn load(&mut self, path: &Path) -> Result<ConfigValue, LoadError> {
        let canonical = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
        if self.stack.contains(&canonical) {
            return Err(LoadError::Cycle(path.display().to_string()));
        }
        self.stack.push(canonical);
        let result = self.load_inner(path);
        self.stack.pop();
        result
    }

    fn load_inner(&mut self, path: &Path) -> Result<ConfigValue, LoadError> {
        let mut doc = parse_file(path)?;
        if !matches!(doc, ConfigValue::Map(_)) {
            return Err(LoadError::RootNotAMapping(path.display().to_string()));
        }
        let base_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        self.resolve_includes(&mut doc, &base_dir)?;
        Ok(doc)
    }

    /// Processes `_include` (merged under the body) and `_include_post`
    /// (merged over the body) at this node, then recurses into child maps.
    fn resolve_includes(
        &mut self,
        node: &mut ConfigValue,
        base_dir: &Path,
    ) -> Result<(), LoadError> {
        let map = match node.as_map_mut() {
            Some(m) => m,
            None => return Ok(()),
        };

        let pre = map.shift_remove("_include");
        let post = map.shift_remove("_include_post");

        if let Some(spec) = pre {
            let mut base = ConfigValue::Map(ConfigMap::new());
            self.load_include_spec(&spec, base_dir, &mut base)?;
            let body = std::mem::replace(node, base);
            merge(node, body)?;
        }

        // children may carry their own nested includes
        if let Some(map) = node.as_map_mut() {
            for (_, child) in map.iter_mut() {
                self.resolve_includes(child, base_dir)?;
            }
        }

        if let Some(spec) = post {
            let mut overlay = ConfigValue::Map(ConfigMap::new());
            self.load_include_spec(&spec, base_dir, &mut overlay)?;
            merge(node, overlay)?;
        }
        Ok(())
    }

    /// An include spec is a single reference string, a list of them, or a
    /// mapping of reference → subtree key (merging only the named subtree).
    fn load_include_spec(
        &mut self,
        spec: &ConfigValue,
        base_dir: &Path,
        into: &mut ConfigValue,
    ) -> Result<(), LoadError> {
        match spec {
            ConfigValue::String(text) => {
                if let Some(doc) = self.load_reference(text, base_dir)? {
                    merge(into, doc)?;
                }
                Ok(())
            }
            ConfigValue::List(items) => {
                for item in items {
                    self.load_include_spec(item, base_dir, into)?;
                }
                Ok(())
            }
            ConfigValue::Map(entries) => {
                for (text, subtree) in entries {
                    let Some(doc) = self.load_reference(text, base_dir)? else {
                        continue;
                    };
                    let key = subtree
                        .as_str()
                        .ok_or_else(|| LoadError::UseNotAMapping(text.clone()))?;
                    let picked = doc
                        .get_path(key)
                        .cloned()
                        .ok_or_else(|| LoadError::IncludeNotFound(format!("{text}:{key}")))?;
                    merge(into, picked)?;
                }
                Ok(())
            }
            other => Err(LoadError::UseNotAMapping(other.to_string())),
        }
    }

    fn load_reference(
        &mut self,
        text: &str,
        base_dir: &Path,
    ) -> Result<Option<ConfigValue>, LoadError> {
        let reference = Reference::parse(text);
        match self.locate(&reference, base_dir) {
            Some(path) => self.load(&path).map(Some),
            None if reference.optional => Ok(None),
            None => Err(LoadError::IncludeNotFound(text.to_string())),
        }
    }

    /// Search order: including document's directory (exclusively, for `(.)`),
    /// the package directory (for `(pkg)`), else current directory, include
    /// path entries, user locations, and finally the including directory.
    fn locate(&self, reference: &Reference, base_dir: &Path) -> Option<PathBuf> {
        if reference.local_only {
            let candidate = base_dir.join(&reference.name);
            return candidate.is_file().then_some(candidate);
        }
        if let Some(pkg) = &reference.package {
            let dir = self.packages.get(pkg)?;
            let candidate = dir.join(&reference.name);
            return candidate.is_file().then_some(candidate);
        }
        for dir in &self.search_paths {
            let candidate = dir.join(&reference.name);
            if candidate.is_file() {
                return Some(candidate);
            }
        }
        let candidate = base_dir.join(&reference.name);
        candidate.is_file().then_some(candidate)
    }
}

fn parse_file(path: &Path) -> Result<ConfigValue, LoadError> {
    let text = std::fs::read_to_string(path).map_err(|source| LoadError::Unreadable {
        path: path.display().to_string(),
        source,
    })?;
    let is_json = path
        .extension()
        .map(|e| e.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    if is_json {
        serde_json::from_str(&text).map_err(|source| LoadError::Json {
            path: path.display().to_string(),
            source,
        })
    } else {
        serde_yaml::from_str(&text).map_err(|source| LoadError::Yaml {
            path: path.display().to_string(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reference_markers_are_parsed() {
        let r = Reference::parse("(cultlib)wsclean.yml[optional]");
        assert_eq!(r.package.as_deref(), Some("cultlib"));
        assert_eq!(r.name, "wsclean.yml");
        assert!(r.optional);
        assert!(!r.local_only);

        let r = Reference::parse("(.)local.yml");
        assert!(r.local_only);
        assert_eq!(r.name, "local.yml");
    }
}

mod includes;
mod loader;
mod value;

pub use includes::{resolve_uses_and_scrubs, scrub_paths};
pub use loader::{LoadOptions, Loader};
pub use value::{merge, ConfigMap, ConfigValue};

use std::path::Path;

use crate::error::LoadError;

/// Top-level keys that are not reparented under `lib.recipes`.
pub const WELL_KNOWN_KEYS: &[&str] = &["cabs", "opts", "lib", "vars", "run", "image"];

/// Environment variable holding colon-separated include search paths.
/// Entries of the form `name=dir` register a package alias for `(name)ref`
/// references; plain entries are searched for bare references.
pub const INCLUDE_PATH_VAR: &str = "GALLEY_INCLUDE";

/// Loads one or more documents, resolves includes, merges them in order and
/// produces the final configuration tree.
///
/// After merging, any top-level key outside the well-known set is reparented
/// under `lib.recipes.<key>`, `_use`/`_scrub` directives are resolved to a
/// fixed point, and the process environment is exposed under `run.env`.
pub fn load_config<P: AsRef<Path>>(
    paths: &[P],
    options: LoadOptions,
) -> Result<ConfigValue, LoadError> {
    let mut loader = Loader::new(options);
    let mut tree = ConfigValue::Map(ConfigMap::new());
    for path in paths {
        let doc = loader.load(path.as_ref())?;
        merge(&mut tree, doc)?;
    }
    reparent_recipes(&mut tree);
    resolve_uses_and_scrubs(&mut tree)?;
    expose_environment(&mut tree);
    Ok(tree)
}

fn reparent_recipes(tree: &mut ConfigValue) {
    let mut moved = Vec::new();
    if let Some(map) = tree.as_map_mut() {
        let strays: Vec<String> = map
            .keys()
            .filter(|k| !WELL_KNOWN_KEYS.contains(&k.as_str()) && !k.starts_with('_'))
            .cloned()
            .collect();
        for key in strays {
            if let Some(value) = map.shift_remove(&key) {
                moved.push((key, value));
            }
        }
    }
    for (key, value) in moved {
        tree.set_path(&format!("lib.recipes.{key}"), value);
    }
}

fn expose_environment(tree: &mut ConfigValue) {
    let mut env = ConfigMap::new();
    for (name, value) in std::env::vars() {
        env.insert(name, ConfigValue::String(value));
    }
    tree.set_path("run.env", ConfigValue::Map(env));
}

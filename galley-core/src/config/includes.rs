use std::collections::HashSet;

use super::value::{merge, ConfigMap, ConfigValue};
use crate::error::LoadError;

/// Resolves every `_use` directive in the tree against the tree's own root,
/// then applies `_scrub` removals. Run after all documents are merged.
///
/// `_use: lib.misc.base` copies the named subtree and merges the local body
/// over it. Used subtrees may themselves contain `_use`; a work queue plus a
/// per-chain visited set catches cycles.
pub fn resolve_uses_and_scrubs(tree: &mut ConfigValue) -> Result<(), LoadError> {
    // each pass resolves one level of nesting; chains longer than this are
    // assumed to be cyclic (`a` using `b` using `a` regrows `_use` keys)
    const MAX_PASSES: usize = 64;
    for pass in 0.. {
        if pass == MAX_PASSES {
            return Err(LoadError::Cycle("_use".to_string()));
        }
        let root = tree.clone();
        let mut changed = false;
        resolve_uses_once(tree, &root, &mut Vec::new(), &mut changed)?;
        if !changed {
            break;
        }
    }
    apply_scrubs(tree, &mut Vec::new())?;
    Ok(())
}

fn resolve_uses_once(
    node: &mut ConfigValue,
    root: &ConfigValue,
    location: &mut Vec<String>,
    changed: &mut bool,
) -> Result<(), LoadError> {
    let map = match node.as_map_mut() {
        Some(m) => m,
        None => return Ok(()),
    };

    if let Some(spec) = map.shift_remove("_use") {
        let targets = spec_as_paths(&spec)?;
        let mut seen: HashSet<String> = HashSet::new();
        let mut base = ConfigValue::Map(ConfigMap::new());
        for target in targets {
            if !seen.insert(target.clone()) {
                return Err(LoadError::Cycle(target));
            }
            let subtree = root
                .get_path(&target)
                .ok_or_else(|| LoadError::IncludeNotFound(target.clone()))?;
            if !matches!(subtree, ConfigValue::Map(_)) {
                return Err(LoadError::UseNotAMapping(target));
            }
            merge(&mut base, subtree.clone())?;
        }
        let body = std::mem::replace(node, base);
        merge(node, body)?;
        *changed = true;
    }

    if let Some(map) = node.as_map_mut() {
        for (key, child) in map.iter_mut() {
            location.push(key.clone());
            resolve_uses_once(child, root, location, changed)?;
            location.pop();
        }
    }
    Ok(())
}

fn apply_scrubs(node: &mut ConfigValue, location: &mut Vec<String>) -> Result<(), LoadError> {
    let map = match node.as_map_mut() {
        Some(m) => m,
        None => return Ok(()),
    };

    if let Some(spec) = map.shift_remove("_scrub") {
        for path in spec_as_paths(&spec)? {
            if node.remove_path(&path).is_none() {
                let here = location.join(".");
                return Err(LoadError::ScrubPathMissing(if here.is_empty() {
                    path
                } else {
                    format!("{here}.{path}")
                }));
            }
        }
    }

    if let Some(map) = node.as_map_mut() {
        for (key, child) in map.iter_mut() {
            location.push(key.clone());
            apply_scrubs(child, location)?;
            location.pop();
        }
    }
    Ok(())
}

/// Removes the listed dotted paths from a tree; missing paths are an error.
pub fn scrub_paths(tree: &mut ConfigValue, paths: &[String]) -> Result<(), LoadError> {
    for path in paths {
        if tree.remove_path(path).is_none() {
            return Err(LoadError::ScrubPathMissing(path.clone()));
        }
    }
    Ok(())
}

fn spec_as_paths(spec: &ConfigValue) -> Result<Vec<String>, LoadError> {
    match spec {
        ConfigValue::String(s) => Ok(vec![s.clone()]),
        ConfigValue::List(items) => items
            .iter()
            .map(|item| {
                item.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| LoadError::UseNotAMapping(item.to_string()))
            })
            .collect(),
        other => Err(LoadError::UseNotAMapping(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn yaml(text: &str) -> ConfigValue {
        serde_yaml::from_str(text).unwrap()
    }

    #[test]
    fn use_merges_named_subtree_under_local_body() {
        let mut tree = yaml(
            "lib:\n  base:\n    x: 1\n    y: 2\nderived:\n  _use: lib.base\n  y: 3\n",
        );
        resolve_uses_and_scrubs(&mut tree).unwrap();
        assert_eq!(tree.get_path("derived.x"), Some(&ConfigValue::Int(1)));
        assert_eq!(tree.get_path("derived.y"), Some(&ConfigValue::Int(3)));
    }

    #[test]
    fn nested_use_reaches_fixed_point() {
        let mut tree = yaml(
            "a:\n  p: 1\nb:\n  _use: a\n  q: 2\nc:\n  _use: b\n  r: 3\n",
        );
        resolve_uses_and_scrubs(&mut tree).unwrap();
        assert_eq!(tree.get_path("c.p"), Some(&ConfigValue::Int(1)));
        assert_eq!(tree.get_path("c.q"), Some(&ConfigValue::Int(2)));
        assert_eq!(tree.get_path("c.r"), Some(&ConfigValue::Int(3)));
    }

    #[test]
    fn scrub_removes_and_reports_missing() {
        let mut tree = yaml("x:\n  _scrub: y.z\n  y:\n    z: 1\n    w: 2\n");
        resolve_uses_and_scrubs(&mut tree).unwrap();
        assert_eq!(tree.get_path("x.y.z"), None);
        assert_eq!(tree.get_path("x.y.w"), Some(&ConfigValue::Int(2)));

        let mut tree = yaml("x:\n  _scrub: nope\n  y: 1\n");
        assert!(matches!(
            resolve_uses_and_scrubs(&mut tree),
            Err(LoadError::ScrubPathMissing(_))
        ));
    }
}

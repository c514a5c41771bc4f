use std::path::PathBuf;

use galley_core::config::{LoadOptions, Loader};
use galley_core::error::LoadError;
use galley_core::{load_config, ConfigValue};

fn write(dir: &std::path::Path, name: &str, text: &str) -> PathBuf {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(&path, text).unwrap();
    path
}

fn options() -> LoadOptions {
    LoadOptions {
        search_paths: Vec::new(),
        no_include_env: true,
    }
}

#[test]
fn include_merges_under_the_body() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "base.yml", "opts:\n  log:\n    dir: logs\n  level: 1\n");
    let main = write(
        dir.path(),
        "main.yml",
        "_include: base.yml\nopts:\n  level: 2\n",
    );

    let mut loader = Loader::new(options());
    let tree = loader.load(&main).unwrap();
    assert_eq!(tree.get_path("opts.level"), Some(&ConfigValue::Int(2)));
    assert_eq!(
        tree.get_path("opts.log.dir"),
        Some(&ConfigValue::String("logs".into()))
    );
}

#[test]
fn include_post_merges_over_the_body() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "override.yml", "opts:\n  level: 9\n");
    let main = write(
        dir.path(),
        "main.yml",
        "opts:\n  level: 2\n_include_post: override.yml\n",
    );

    let mut loader = Loader::new(options());
    let tree = loader.load(&main).unwrap();
    assert_eq!(tree.get_path("opts.level"), Some(&ConfigValue::Int(9)));
}

#[test]
fn optional_marker_tolerates_missing_includes() {
    let dir = tempfile::tempdir().unwrap();
    let main = write(
        dir.path(),
        "main.yml",
        "_include: not-there.yml[optional]\nopts:\n  level: 1\n",
    );
    let mut loader = Loader::new(options());
    let tree = loader.load(&main).unwrap();
    assert_eq!(tree.get_path("opts.level"), Some(&ConfigValue::Int(1)));

    let strict = write(dir.path(), "strict.yml", "_include: not-there.yml\n");
    let mut loader = Loader::new(options());
    assert!(matches!(
        loader.load(&strict),
        Err(LoadError::IncludeNotFound(_))
    ));
}

#[test]
fn local_only_prefix_resolves_against_including_document() {
    let dir = tempfile::tempdir().unwrap();
    let sub = dir.path().join("sub");
    write(&sub, "local.yml", "x: 1\n");
    let main = write(&sub, "main.yml", "_include: (.)local.yml\n");
    let mut loader = Loader::new(options());
    let tree = loader.load(&main).unwrap();
    // anything non-well-known stays put at loader level
    assert_eq!(tree.get_path("x"), Some(&ConfigValue::Int(1)));
}

#[test]
fn nested_includes_resolve_anywhere_in_the_tree() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "cabs.yml", "wsclean:\n  command: wsclean\n");
    let main = write(
        dir.path(),
        "main.yml",
        "cabs:\n  _include: cabs.yml\n  other:\n    command: other\n",
    );
    let mut loader = Loader::new(options());
    let tree = loader.load(&main).unwrap();
    assert!(tree.get_path("cabs.wsclean.command").is_some());
    assert!(tree.get_path("cabs.other.command").is_some());
}

#[test]
fn include_cycles_are_detected() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "a.yml", "_include: b.yml\n");
    write(dir.path(), "b.yml", "_include: a.yml\n");
    let mut loader = Loader::new(LoadOptions {
        search_paths: vec![dir.path().to_path_buf()],
        no_include_env: true,
    });
    let a = dir.path().join("a.yml");
    assert!(matches!(loader.load(&a), Err(LoadError::Cycle(_))));
}

#[test]
fn load_config_reparents_stray_top_level_keys() {
    let dir = tempfile::tempdir().unwrap();
    let main = write(
        dir.path(),
        "main.yml",
        "cabs:\n  echo:\n    command: echo\nmy-workflow:\n  steps:\n    one:\n      cab: echo\n",
    );
    let tree = load_config(&[main], options()).unwrap();
    assert!(tree.get_path("lib.recipes.my-workflow.steps.one").is_some());
    assert!(tree.get_path("my-workflow").is_none());
    // the process environment is exposed under run.env
    assert!(tree.get_path("run.env.PATH").is_some());
}

#[test]
fn fixed_point_has_no_reserved_keys() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "inc.yml", "lib:\n  base:\n    x: 1\n");
    let main = write(
        dir.path(),
        "main.yml",
        "_include: inc.yml\nderived:\n  _use: lib.base\n  _scrub: x\n  y: 2\n",
    );
    let tree = load_config(
        &[main],
        LoadOptions {
            search_paths: vec![dir.path().to_path_buf()],
            no_include_env: true,
        },
    )
    .unwrap();
    let rendered = serde_yaml::to_string(&tree).unwrap();
    for key in ["_include", "_include_post", "_use", "_scrub"] {
        assert!(!rendered.contains(key), "reserved key {key} survived");
    }
    assert_eq!(
        tree.get_path("lib.recipes.derived.y"),
        Some(&ConfigValue::Int(2))
    );
    assert_eq!(tree.get_path("lib.recipes.derived.x"), None);
}

#[test]
fn merge_is_associative_over_mapping_keys() {
    let a: ConfigValue = serde_yaml::from_str("x: {p: 1}\ny: 1").unwrap();
    let b: ConfigValue = serde_yaml::from_str("x: {q: 2}\ny: 2").unwrap();

    let mut left = ConfigValue::Map(Default::default());
    galley_core::merge(&mut left, a.clone()).unwrap();
    galley_core::merge(&mut left, b.clone()).unwrap();

    let mut ab = a.clone();
    galley_core::merge(&mut ab, b).unwrap();
    let mut right = ConfigValue::Map(Default::default());
    galley_core::merge(&mut right, ab).unwrap();

    assert_eq!(left, right);
}

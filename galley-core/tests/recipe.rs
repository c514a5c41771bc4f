use galley_core::config::ConfigMap;
use galley_core::error::ValidationError;
use galley_core::recipe::prevalidate;
use galley_core::{ConfigValue, Registry};

fn tree(text: &str) -> ConfigValue {
    serde_yaml::from_str(text).unwrap()
}

fn params(text: &str) -> ConfigMap {
    match tree(text) {
        ConfigValue::Map(m) => m,
        _ => panic!("expected mapping"),
    }
}

const ALIAS_CONFIG: &str = r#"
cabs:
  proc:
    command: proc
    inputs:
      ms:
        dtype: MS
      extra:
        dtype: str
lib:
  recipes:
    demo:
      aliases:
        ms: [s1.ms, s2.ms]
      steps:
        s1:
          cab: proc
        s2:
          cab: proc
"#;

#[test]
fn alias_value_propagates_to_every_target() {
    let config = tree(ALIAS_CONFIG);
    let registry = Registry::from_config(&config).unwrap();
    let recipe = registry.recipes["demo"].clone();
    let supplied = params("ms: foo.ms");
    let pre = prevalidate(&recipe, &registry, &supplied, &config).unwrap();

    for label in ["s1", "s2"] {
        assert_eq!(
            pre.recipe.steps[label].params.get("ms"),
            Some(&ConfigValue::String("foo.ms".into())),
            "step {label} did not receive the alias value"
        );
    }
    assert!(pre.immune.contains("ms"));
}

#[test]
fn alias_default_propagates_up_then_down() {
    // s1.ms has a default; an unset recipe-level ms picks it up and hands it
    // to s2 as well
    let config = tree(
        r#"
cabs:
  a:
    command: a
    inputs:
      ms:
        dtype: MS
        default: bar.ms
  b:
    command: b
    inputs:
      ms:
        dtype: MS
lib:
  recipes:
    demo:
      aliases:
        ms: [s1.ms, s2.ms]
      steps:
        s1:
          cab: a
        s2:
          cab: b
"#,
    );
    let registry = Registry::from_config(&config).unwrap();
    let recipe = registry.recipes["demo"].clone();
    let pre = prevalidate(&recipe, &registry, &ConfigMap::new(), &config).unwrap();

    assert_eq!(
        pre.values.get("ms"),
        Some(&ConfigValue::String("bar.ms".into()))
    );
    assert_eq!(
        pre.recipe.steps["s2"].params.get("ms"),
        Some(&ConfigValue::String("bar.ms".into()))
    );
}

#[test]
fn auto_aliases_cover_unbound_step_parameters() {
    let config = tree(ALIAS_CONFIG);
    let registry = Registry::from_config(&config).unwrap();
    let recipe = registry.recipes["demo"].clone();
    let pre = prevalidate(&recipe, &registry, &params("ms: x.ms"), &config).unwrap();

    // 'extra' was never bound, so each step exposes an auto-alias for it
    assert!(pre.aliases.contains_key("s1.extra"));
    assert!(pre.aliases.contains_key("s2.extra"));
    assert!(pre.aliases["s1.extra"].auto);
}

#[test]
fn wildcard_alias_matches_steps_exposing_the_parameter() {
    let config = tree(
        r#"
cabs:
  a:
    command: a
    inputs:
      ms:
        dtype: MS
  b:
    command: b
    inputs:
      other:
        dtype: str
lib:
  recipes:
    demo:
      aliases:
        ms: ['*.ms']
      steps:
        s1:
          cab: a
        s2:
          cab: b
        s3:
          cab: a
"#,
    );
    let registry = Registry::from_config(&config).unwrap();
    let recipe = registry.recipes["demo"].clone();
    let pre = prevalidate(&recipe, &registry, &params("ms: m.ms"), &config).unwrap();

    let targets: Vec<String> = pre.aliases["ms"]
        .targets
        .iter()
        .map(|t| t.step.clone())
        .collect();
    assert_eq!(targets, vec!["s1", "s3"]);
}

#[test]
fn cab_name_alias_form_selects_by_resolved_cab() {
    let config = tree(
        r#"
cabs:
  wsclean:
    command: wsclean
    inputs:
      size:
        dtype: int
lib:
  recipes:
    demo:
      aliases:
        size: ['(wsclean).size']
      steps:
        image-1:
          cab: wsclean
        image-2:
          cab: wsclean
"#,
    );
    let registry = Registry::from_config(&config).unwrap();
    let recipe = registry.recipes["demo"].clone();
    let pre = prevalidate(&recipe, &registry, &params("size: 1024"), &config).unwrap();
    assert_eq!(pre.aliases["size"].targets.len(), 2);
    for label in ["image-1", "image-2"] {
        assert_eq!(
            pre.recipe.steps[label].params.get("size"),
            Some(&ConfigValue::Int(1024))
        );
    }
}

#[test]
fn unresolved_alias_target_is_fatal() {
    let config = tree(
        r#"
cabs:
  a:
    command: a
lib:
  recipes:
    demo:
      aliases:
        x: [s1.nope]
      steps:
        s1:
          cab: a
"#,
    );
    let registry = Registry::from_config(&config).unwrap();
    let recipe = registry.recipes["demo"].clone();
    let err = prevalidate(&recipe, &registry, &ConfigMap::new(), &config).unwrap_err();
    assert!(matches!(err, ValidationError::UnresolvedAlias { .. }));
}

#[test]
fn missing_required_input_fails_prevalidation() {
    let config = tree(
        r#"
cabs:
  a:
    command: a
    inputs:
      must:
        dtype: str
        required: true
lib:
  recipes:
    demo:
      steps:
        s1:
          cab: a
"#,
    );
    let registry = Registry::from_config(&config).unwrap();
    let recipe = registry.recipes["demo"].clone();
    // the auto-alias for s1.must is a required recipe input now
    let err = prevalidate(&recipe, &registry, &ConfigMap::new(), &config).unwrap_err();
    assert!(matches!(err, ValidationError::MissingRequired { .. }));

    let ok = prevalidate(&recipe, &registry, &params("s1.must: hello"), &config);
    assert!(ok.is_ok());
}

#[test]
fn assign_based_on_applies_during_prevalidation() {
    let config = tree(
        r#"
cabs:
  a:
    command: a
    inputs:
      chans:
        dtype: int
lib:
  recipes:
    demo:
      inputs:
        band:
          dtype: str
          default: L
      assign_based_on:
        band:
          L:
            chans: 4096
          UHF:
            chans: 1024
      steps:
        s1:
          cab: a
"#,
    );
    let registry = Registry::from_config(&config).unwrap();
    let recipe = registry.recipes["demo"].clone();
    let pre = prevalidate(&recipe, &registry, &params("band: UHF"), &config).unwrap();
    assert_eq!(pre.values.get("chans"), Some(&ConfigValue::Int(1024)));

    // an explicitly supplied input is immune to assignment
    let pre = prevalidate(
        &recipe,
        &registry,
        &params("band: L\nchans: 7"),
        &config,
    )
    .unwrap();
    assert_eq!(pre.values.get("chans"), Some(&ConfigValue::Int(7)));
}

#[test]
fn for_loop_over_an_input_makes_it_required() {
    let config = tree(
        r#"
cabs:
  a:
    command: a
lib:
  recipes:
    demo:
      inputs:
        items:
          dtype: List[int]
      for_loop:
        var: item
        over: items
      steps:
        s1:
          cab: a
"#,
    );
    let registry = Registry::from_config(&config).unwrap();
    let recipe = registry.recipes["demo"].clone();
    let err = prevalidate(&recipe, &registry, &ConfigMap::new(), &config).unwrap_err();
    assert!(matches!(err, ValidationError::MissingRequired { .. }));

    let pre = prevalidate(&recipe, &registry, &params("items: [1, 2]"), &config).unwrap();
    assert!(pre.values.contains_key("items"));
}

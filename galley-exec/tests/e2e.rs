use std::sync::Arc;
use std::time::Duration;

use galley_core::config::ConfigMap;
use galley_core::ConfigValue;
use galley_exec::events::{Event, MemoryLogSink};
use galley_exec::{run_recipe, RunOptions, StepStatus};

fn tree(text: &str) -> ConfigValue {
    serde_yaml::from_str(text).unwrap()
}

fn params(text: &str) -> ConfigMap {
    match tree(text) {
        ConfigValue::Map(m) => m,
        _ => panic!("expected mapping"),
    }
}

fn output_lines(sink: &MemoryLogSink) -> Vec<String> {
    sink.events()
        .iter()
        .filter_map(|e| match e {
            Event::CabOutput {
                display: Some(line),
                ..
            } => Some(line.clone()),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn wrangler_declared_success_overrides_exit_code() {
    let config = tree(
        r#"
cabs:
  moo:
    command: cat missing-file
    management:
      wranglers:
        'No such file':
          - DECLARE_SUCCESS
          - 'WARNING:deliberate'
lib:
  recipes:
    demo:
      steps:
        s1:
          cab: moo
"#,
    );
    let sink = Arc::new(MemoryLogSink::new());
    let report = run_recipe(
        &config,
        Some("demo"),
        &ConfigMap::new(),
        RunOptions::default(),
        sink.clone(),
    )
    .await
    .unwrap();

    assert!(report.succeeded);
    assert!(report.warnings.iter().any(|w| w == "deliberate"));
    assert_eq!(report.steps.len(), 1);
    assert_eq!(report.steps[0].status, StepStatus::Succeeded);
}

#[tokio::test]
async fn wrangler_error_fails_a_zero_exit_cab() {
    let dir = tempfile::tempdir().unwrap();
    let words = dir.path().join("words.txt");
    std::fs::write(&words, "brown fox\n").unwrap();

    let config = tree(&format!(
        r#"
cabs:
  reader:
    command: cat
    inputs:
      file:
        dtype: File
        must_exist: true
        policies:
          positional: true
    management:
      wranglers:
        'fox':
          - 'ERROR:Nobody expected the fox!'
lib:
  recipes:
    demo:
      steps:
        s1:
          cab: reader
          params:
            file: {}
"#,
        words.display()
    ));
    let sink = Arc::new(MemoryLogSink::new());
    let report = run_recipe(
        &config,
        Some("demo"),
        &ConfigMap::new(),
        RunOptions::default(),
        sink,
    )
    .await
    .unwrap();

    assert!(!report.succeeded);
    assert_eq!(report.failed_step.as_deref(), Some("demo.s1"));
    assert!(report
        .error
        .as_deref()
        .unwrap()
        .contains("Nobody expected the fox!"));
}

#[tokio::test]
async fn parsed_outputs_flow_to_the_next_step_via_previous() {
    let dir = tempfile::tempdir().unwrap();
    let words = dir.path().join("words.txt");
    std::fs::write(&words, "brown cow eats the 5 lazy dogs\n").unwrap();

    let config = tree(&format!(
        r#"
cabs:
  reader:
    command: cat
    inputs:
      file:
        dtype: File
        policies:
          positional: true
    outputs:
      eater:
        dtype: str
      num_dogs:
        dtype: int
    management:
      wranglers:
        'brown (?P<eater>\w+) eats the (?P<num_dogs>\d+) lazy dogs':
          - 'PARSE_OUTPUT:eater:str'
          - 'PARSE_OUTPUT:num_dogs:int'
  shout:
    command: 'echo The bloody {{current.who}} ate {{current.num}} dogs!'
    inputs:
      who:
        dtype: str
        policies:
          skip: true
      num:
        dtype: int
        policies:
          skip: true
lib:
  recipes:
    demo:
      steps:
        s1:
          cab: reader
          params:
            file: {}
        s2:
          cab: shout
          params:
            who: '=previous.eater'
            num: '=previous.num_dogs'
"#,
        words.display()
    ));
    let sink = Arc::new(MemoryLogSink::new());
    let report = run_recipe(
        &config,
        Some("demo"),
        &ConfigMap::new(),
        RunOptions::default(),
        sink.clone(),
    )
    .await
    .unwrap();

    assert!(report.succeeded, "{:?}", report.error);
    let lines = output_lines(&sink);
    assert!(
        lines.iter().any(|l| l == "The bloody cow ate 5 dogs!"),
        "echoed lines: {lines:?}"
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn scatter_loop_runs_iterations_independently() {
    let config = tree(
        r#"
cabs:
  announce:
    command: 'echo {recipe.image-prefix}'
lib:
  recipes:
    demo:
      assign:
        image-prefix: 'out/im-s{recipe.loop:02d}'
      for_loop:
        var: loop
        over: [1, 2, 3]
        scatter: -1
      steps:
        s1:
          cab: announce
"#,
    );
    let sink = Arc::new(MemoryLogSink::new());
    let report = run_recipe(
        &config,
        Some("demo"),
        &ConfigMap::new(),
        RunOptions::default(),
        sink.clone(),
    )
    .await
    .unwrap();

    assert!(report.succeeded, "{:?}", report.error);
    assert_eq!(report.steps.len(), 3);
    let lines = output_lines(&sink);
    for expected in ["out/im-s01", "out/im-s02", "out/im-s03"] {
        assert!(
            lines.iter().any(|l| l == expected),
            "missing {expected} in {lines:?}"
        );
    }
}

#[tokio::test]
async fn freshness_skip_reruns_only_when_inputs_change() {
    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join("a.txt");
    let dest = dir.path().join("b.txt");
    std::fs::write(&src, "one\n").unwrap();

    let config = tree(&format!(
        r#"
cabs:
  copy:
    command: cp
    inputs:
      src:
        dtype: File
        must_exist: true
        policies:
          positional: true
    outputs:
      dest:
        dtype: File
        policies:
          positional: true
lib:
  recipes:
    demo:
      steps:
        s1:
          cab: copy
          skip_if_outputs: fresh
          params:
            src: {src}
            dest: {dest}
"#,
        src = src.display(),
        dest = dest.display()
    ));

    // first run executes the copy
    let sink = Arc::new(MemoryLogSink::new());
    let report = run_recipe(
        &config,
        Some("demo"),
        &ConfigMap::new(),
        RunOptions::default(),
        sink,
    )
    .await
    .unwrap();
    assert_eq!(report.steps[0].status, StepStatus::Succeeded);
    assert!(dest.is_file());

    // outputs are fresh: the second run skips
    let sink = Arc::new(MemoryLogSink::new());
    let report = run_recipe(
        &config,
        Some("demo"),
        &ConfigMap::new(),
        RunOptions::default(),
        sink,
    )
    .await
    .unwrap();
    assert_eq!(report.steps[0].status, StepStatus::Skipped);

    // touching the input invalidates freshness
    tokio::time::sleep(Duration::from_millis(100)).await;
    std::fs::write(&src, "two\n").unwrap();
    let sink = Arc::new(MemoryLogSink::new());
    let report = run_recipe(
        &config,
        Some("demo"),
        &ConfigMap::new(),
        RunOptions::default(),
        sink,
    )
    .await
    .unwrap();
    assert_eq!(report.steps[0].status, StepStatus::Succeeded);
}

#[tokio::test]
async fn previous_after_a_skipped_step_sees_its_defaults() {
    let config = tree(
        r#"
cabs:
  silent:
    command: echo unused
    inputs:
      msg:
        dtype: str
        default: from-skipped
        policies:
          skip: true
  relay:
    command: 'echo {previous.msg}'
lib:
  recipes:
    demo:
      steps:
        s1:
          cab: silent
          skip: true
        s2:
          cab: relay
"#,
    );
    let sink = Arc::new(MemoryLogSink::new());
    let report = run_recipe(
        &config,
        Some("demo"),
        &ConfigMap::new(),
        RunOptions::default(),
        sink.clone(),
    )
    .await
    .unwrap();

    assert!(report.succeeded, "{:?}", report.error);
    assert_eq!(report.steps[0].status, StepStatus::Skipped);
    let lines = output_lines(&sink);
    assert!(lines.iter().any(|l| l == "from-skipped"), "{lines:?}");
}

#[tokio::test]
async fn never_tagged_steps_are_left_out_unless_selected() {
    let config = tree(
        r#"
cabs:
  say:
    command: echo hello
lib:
  recipes:
    demo:
      steps:
        a:
          cab: say
          tags: [never]
        b:
          cab: say
"#,
    );
    let sink = Arc::new(MemoryLogSink::new());
    let report = run_recipe(
        &config,
        Some("demo"),
        &ConfigMap::new(),
        RunOptions::default(),
        sink,
    )
    .await
    .unwrap();
    assert_eq!(report.steps[0].status, StepStatus::Skipped);
    assert_eq!(report.steps[1].status, StepStatus::Succeeded);

    // explicitly selecting the step forces it on
    let sink = Arc::new(MemoryLogSink::new());
    let report = run_recipe(
        &config,
        Some("demo"),
        &ConfigMap::new(),
        RunOptions {
            steps: vec!["a".to_string()],
            ..RunOptions::default()
        },
        sink,
    )
    .await
    .unwrap();
    assert_eq!(report.steps[0].status, StepStatus::Succeeded);
}

#[tokio::test]
async fn step_timeout_kills_the_child() {
    let config = tree(
        r#"
cabs:
  sleeper:
    command: sleep 5
lib:
  recipes:
    demo:
      steps:
        s1:
          cab: sleeper
"#,
    );
    let sink = Arc::new(MemoryLogSink::new());
    let report = run_recipe(
        &config,
        Some("demo"),
        &ConfigMap::new(),
        RunOptions {
            step_timeout: Some(Duration::from_millis(200)),
            ..RunOptions::default()
        },
        sink,
    )
    .await
    .unwrap();
    assert!(!report.succeeded);
    assert!(report.error.as_deref().unwrap().contains("timeout"));
}

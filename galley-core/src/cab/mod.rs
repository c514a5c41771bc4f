mod args;
mod wranglers;

pub use args::build_argv;
pub use wranglers::{CaptureDType, GroupRef, Severity, WranglerAction, WranglerRule};

use indexmap::IndexMap;

use crate::config::{ConfigMap, ConfigValue};
use crate::error::SchemaError;
use crate::schema::{parse_schema_section, ParameterPolicies, Schema};

/// Marker line prefix used by scripting-flavour drivers to hand outputs back
/// through the wrangler pipeline.
pub const CAB_OUTPUT_PREFIX: &str = "### YIELDING CAB OUTPUT ## ";

/// How a cab's command is interpreted and launched.
#[derive(Debug, Clone, PartialEq)]
pub enum Flavour {
    /// `command` is an executable plus policy-built arguments.
    Binary,
    /// `command` names a callable (`module.function`); a driver imports and
    /// calls it with the inputs as keyword arguments.
    Callable {
        interpreter: String,
        /// Name of the output receiving the return value.
        output: Option<String>,
        /// The return value is a dict mapped onto outputs by name.
        output_dict: bool,
    },
    /// `command` is a snippet of code run by the interpreter behind a
    /// preamble binding inputs.
    InlineCode {
        interpreter: String,
        /// Bind each input as a named variable.
        input_vars: bool,
        /// Collect outputs from like-named variables after the snippet.
        output_vars: bool,
        /// Apply {}-substitutions to the code body.
        subst: bool,
    },
    /// `command` names a task invoked through an external task-runner
    /// interpreter (wrapper command + generated driver).
    TaskRunner { wrapper: Vec<String> },
}

impl Default for Flavour {
    fn default() -> Self {
        Flavour::Binary
    }
}

impl Flavour {
    fn from_value(cab_name: &str, value: &ConfigValue) -> Result<Flavour, SchemaError> {
        let bad = |msg: &str| SchemaError::BadCab(cab_name.to_string(), msg.to_string());
        match value {
            ConfigValue::String(kind) => Flavour::from_kind(cab_name, kind, &ConfigMap::new()),
            ConfigValue::Map(map) => {
                let kind = map
                    .get("kind")
                    .and_then(ConfigValue::as_str)
                    .ok_or_else(|| bad("flavour mapping requires a 'kind'"))?;
                Flavour::from_kind(cab_name, kind, map)
            }
            other => Err(bad(&format!(
                "flavour must be a string or mapping, got {}",
                other.type_name()
            ))),
        }
    }

    fn from_kind(cab_name: &str, kind: &str, opts: &ConfigMap) -> Result<Flavour, SchemaError> {
        let interpreter = opts
            .get("interpreter")
            .and_then(ConfigValue::as_str)
            .unwrap_or("python")
            .to_string();
        let get_bool = |key: &str, default: bool| {
            opts.get(key).and_then(ConfigValue::as_bool).unwrap_or(default)
        };
        match kind.to_ascii_lowercase().as_str() {
            "binary" => Ok(Flavour::Binary),
            "callable" => Ok(Flavour::Callable {
                interpreter,
                output: opts
                    .get("output")
                    .and_then(ConfigValue::as_str)
                    .map(str::to_string),
                output_dict: get_bool("output_dict", false),
            }),
            "inline-code" | "inline" => Ok(Flavour::InlineCode {
                interpreter,
                input_vars: get_bool("input_vars", true),
                output_vars: get_bool("output_vars", true),
                subst: get_bool("subst", false),
            }),
            "task-runner" => {
                let wrapper = match opts.get("wrapper") {
                    Some(ConfigValue::String(s)) => split_command(s),
                    Some(ConfigValue::List(items)) => items
                        .iter()
                        .filter_map(|v| v.as_str().map(str::to_string))
                        .collect(),
                    _ => vec![interpreter.clone(), "-c".to_string()],
                };
                Ok(Flavour::TaskRunner { wrapper })
            }
            other => Err(SchemaError::BadCab(
                cab_name.to_string(),
                format!("unknown cab flavour '{other}'"),
            )),
        }
    }
}

/// Container image reference: `registry/name:version` or a mapping.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(untagged)]
pub enum ImageRef {
    Text(String),
    Parts {
        #[serde(default)]
        registry: Option<String>,
        name: String,
        #[serde(default)]
        version: Option<String>,
        #[serde(default)]
        path: Option<String>,
    },
}

impl ImageRef {
    pub fn to_string_with(&self, default_registry: Option<&str>) -> String {
        match self {
            ImageRef::Text(text) => text.clone(),
            ImageRef::Parts {
                registry,
                name,
                version,
                ..
            } => {
                let mut out = String::new();
                if let Some(reg) = registry.as_deref().or(default_registry) {
                    out.push_str(reg);
                    out.push('/');
                }
                out.push_str(name);
                if let Some(v) = version {
                    out.push(':');
                    out.push_str(v);
                }
                out
            }
        }
    }
}

/// Cab management rules: environment, output wranglers, exit-time cleanup.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Management {
    pub environment: IndexMap<String, String>,
    pub wranglers: Vec<WranglerRule>,
    pub cleanup: Vec<String>,
}

/// An atomic task: flavour, command, image, schemas, policies and management.
#[derive(Debug, Clone, PartialEq)]
pub struct Cab {
    pub name: String,
    pub info: Option<String>,
    pub command: String,
    pub flavour: Flavour,
    pub image: Option<ImageRef>,
    pub backend: Option<ConfigValue>,
    pub policies: ParameterPolicies,
    pub inputs: IndexMap<String, Schema>,
    pub outputs: IndexMap<String, Schema>,
    pub defaults: IndexMap<String, ConfigValue>,
    /// Reference to a collaborator-resolved callable that may revise the
    /// schema after initial binding.
    pub dynamic_schema: Option<String>,
    pub management: Management,
}

impl Cab {
    /// A minimal binary cab, mostly for tests and inline step definitions.
    pub fn bare(name: &str, command: &str) -> Cab {
        Cab {
            name: name.to_string(),
            info: None,
            command: command.to_string(),
            flavour: Flavour::Binary,
            image: None,
            backend: None,
            policies: ParameterPolicies::default(),
            inputs: IndexMap::new(),
            outputs: IndexMap::new(),
            defaults: IndexMap::new(),
            dynamic_schema: None,
            management: Management::default(),
        }
    }

    /// Builds a cab from its configuration subtree.
    pub fn from_config(name: &str, tree: &ConfigValue) -> Result<Cab, SchemaError> {
        let bad = |msg: String| SchemaError::BadCab(name.to_string(), msg);
        let map = tree
            .as_map()
            .ok_or_else(|| bad("cab definition must be a mapping".to_string()))?;

        let command = map
            .get("command")
            .and_then(ConfigValue::as_str)
            .ok_or_else(|| bad("missing 'command'".to_string()))?
            .to_string();

        let flavour = match map.get("flavour") {
            Some(value) => Flavour::from_value(name, value)?,
            // "(module)function" command syntax implies the callable flavour
            None if command.starts_with('(') && command.contains(')') => Flavour::Callable {
                interpreter: "python".to_string(),
                output: None,
                output_dict: false,
            },
            None => Flavour::Binary,
        };

        let image = match map.get("image") {
            Some(value) => Some(
                serde_json::from_value(value.to_json())
                    .map_err(|e| bad(format!("bad image reference: {e}")))?,
            ),
            None => None,
        };

        let policies = match map.get("policies") {
            Some(value) => serde_json::from_value(value.to_json())
                .map_err(|e| bad(format!("bad policies: {e}")))?,
            None => ParameterPolicies::default(),
        };

        let inputs = parse_schema_section(
            map.get("inputs").unwrap_or(&ConfigValue::Null),
            &format!("{name}.inputs"),
        )?;
        let outputs = parse_schema_section(
            map.get("outputs").unwrap_or(&ConfigValue::Null),
            &format!("{name}.outputs"),
        )?;
        for key in inputs.keys() {
            if outputs.contains_key(key) {
                return Err(bad(format!(
                    "parameter '{key}' appears in both inputs and outputs"
                )));
            }
        }

        let defaults = match map.get("defaults") {
            Some(ConfigValue::Map(m)) => m.clone(),
            _ => IndexMap::new(),
        };

        let mut management = Management::default();
        if let Some(ConfigValue::Map(mgmt)) = map.get("management") {
            if let Some(ConfigValue::Map(env)) = mgmt.get("environment") {
                for (key, value) in env {
                    management.environment.insert(key.clone(), value.to_string());
                }
            }
            if let Some(wranglers) = mgmt.get("wranglers") {
                let entries = wranglers.as_map().ok_or_else(|| {
                    bad("management.wranglers must be a mapping of pattern to actions".to_string())
                })?;
                for (pattern, spec) in entries {
                    management
                        .wranglers
                        .push(WranglerRule::compile(pattern, spec)?);
                }
            }
            match mgmt.get("cleanup") {
                Some(ConfigValue::String(s)) => management.cleanup.push(s.clone()),
                Some(ConfigValue::List(items)) => {
                    for item in items {
                        if let Some(s) = item.as_str() {
                            management.cleanup.push(s.to_string());
                        }
                    }
                }
                _ => {}
            }
        }

        let mut cab = Cab {
            name: name.to_string(),
            info: map
                .get("info")
                .and_then(ConfigValue::as_str)
                .map(str::to_string),
            command,
            flavour,
            image,
            backend: map.get("backend").cloned(),
            policies,
            inputs,
            outputs,
            defaults,
            dynamic_schema: map
                .get("dynamic_schema")
                .and_then(ConfigValue::as_str)
                .map(str::to_string),
            management,
        };
        cab.install_flavour_wranglers()?;
        Ok(cab)
    }

    /// Scripting flavours hand outputs back on marked lines; install the
    /// wranglers that capture them.
    fn install_flavour_wranglers(&mut self) -> Result<(), SchemaError> {
        let pattern = format!("{}(.*)", regex::escape(CAB_OUTPUT_PREFIX));
        let actions: Option<ConfigValue> = match &self.flavour {
            Flavour::Callable {
                output: Some(name), ..
            } => Some(ConfigValue::List(vec![
                ConfigValue::String(format!("PARSE_OUTPUT:{name}:1:json")),
                ConfigValue::String("SUPPRESS".to_string()),
            ])),
            Flavour::Callable { output_dict: true, .. }
            | Flavour::Callable { output: None, .. }
            | Flavour::InlineCode { .. } => Some(ConfigValue::List(vec![
                ConfigValue::String("PARSE_JSON_OUTPUT_DICT".to_string()),
                ConfigValue::String("SUPPRESS".to_string()),
            ])),
            _ => None,
        };
        if let Some(actions) = actions {
            self.management
                .wranglers
                .push(WranglerRule::compile(&pattern, &actions)?);
        }
        Ok(())
    }

    pub fn schema_for(&self, param: &str) -> Option<&Schema> {
        self.inputs.get(param).or_else(|| self.outputs.get(param))
    }

    /// Inputs plus named file outputs: the parameters actually delivered to
    /// the underlying tool.
    pub fn delivered_params(
        &self,
        params: &IndexMap<String, ConfigValue>,
    ) -> IndexMap<String, ConfigValue> {
        let mut out: IndexMap<String, ConfigValue> = params
            .iter()
            .filter(|(name, _)| {
                self.inputs.contains_key(*name)
                    || self
                        .outputs
                        .get(*name)
                        .map(|s| s.is_file_like() || s.is_file_list())
                        .unwrap_or(false)
            })
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        // scripting flavours may want unset inputs delivered as nulls
        for (name, schema) in &self.inputs {
            let policies = schema.policies.merged_over(&self.policies);
            if policies.pass_missing_as_none == Some(true) && !out.contains_key(name) {
                out.insert(name.clone(), ConfigValue::Null);
            }
        }
        out
    }

    /// Produces the command for this cab given bound parameters: argv words
    /// for binary/task-runner flavours, interpreter + driver text for the
    /// scripting flavours.
    pub fn command_spec(
        &self,
        params: &IndexMap<String, ConfigValue>,
    ) -> Result<Vec<String>, crate::error::ValidationError> {
        match &self.flavour {
            Flavour::Binary => {
                let mut argv = split_command(&self.command);
                argv.extend(build_argv(self, params)?);
                Ok(argv)
            }
            Flavour::Callable { interpreter, .. } => {
                let delivered = self.delivered_params(params);
                let json = params_json(&delivered);
                Ok(vec![
                    interpreter.clone(),
                    "-u".to_string(),
                    "-c".to_string(),
                    callable_driver(&self.command),
                    json,
                ])
            }
            Flavour::InlineCode {
                interpreter,
                input_vars,
                output_vars,
                ..
            } => {
                let delivered = self.delivered_params(params);
                let json = params_json(&delivered);
                let outputs: Vec<&str> = self.outputs.keys().map(String::as_str).collect();
                Ok(vec![
                    interpreter.clone(),
                    "-u".to_string(),
                    "-c".to_string(),
                    inline_driver(&self.command, &delivered, &outputs, *input_vars, *output_vars),
                    json,
                ])
            }
            Flavour::TaskRunner { wrapper } => {
                let delivered = self.delivered_params(params);
                let mut argv = wrapper.clone();
                argv.push(task_call(&self.command, &delivered));
                Ok(argv)
            }
        }
    }
}

/// Splits a command string into words, honoring single and double quotes.
pub fn split_command(command: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    for ch in command.chars() {
        match quote {
            Some(q) => {
                if ch == q {
                    quote = None;
                } else {
                    current.push(ch);
                }
            }
            None => match ch {
                '\'' | '"' => quote = Some(ch),
                c if c.is_whitespace() => {
                    if !current.is_empty() {
                        words.push(std::mem::take(&mut current));
                    }
                }
                c => current.push(c),
            },
        }
    }
    if !current.is_empty() {
        words.push(current);
    }
    words
}

/// Renders a value as a literal in generated driver code.
fn code_literal(value: &ConfigValue) -> String {
    serde_json::to_string(&value.to_json()).unwrap_or_else(|_| "None".to_string())
}

fn params_json(params: &IndexMap<String, ConfigValue>) -> String {
    let map: serde_json::Map<String, serde_json::Value> = params
        .iter()
        .map(|(k, v)| (k.clone(), v.to_json()))
        .collect();
    serde_json::to_string(&map).unwrap_or_else(|_| "{}".to_string())
}

/// Driver for the callable flavour: import `module.function`, call it with
/// the JSON inputs from argv, yield the result on a marked line.
fn callable_driver(command: &str) -> String {
    let (module, function) = command.rsplit_once('.').unwrap_or(("", command));
    format!(
        r#"import sys, json
_inputs = json.loads(sys.argv[1])
sys.path.append('.')
from {module} import {function}
_result = {function}(**_inputs)
print("{CAB_OUTPUT_PREFIX}" + json.dumps(_result if isinstance(_result, dict) else {{"_result": _result}}))
"#
    )
}

/// Driver for inline code: preamble binding inputs, the declared code body,
/// then output-variable collection on a marked line.
fn inline_driver(
    code: &str,
    params: &IndexMap<String, ConfigValue>,
    outputs: &[&str],
    input_vars: bool,
    output_vars: bool,
) -> String {
    let mut driver = String::from("import sys, json\n_params = json.loads(sys.argv[1])\n");
    if input_vars {
        for name in params.keys() {
            let var = name.replace('-', "_").replace('.', "__");
            driver.push_str(&format!("{var} = _params[\"{name}\"]\n"));
        }
    }
    driver.push_str(code);
    driver.push('\n');
    if output_vars && !outputs.is_empty() {
        driver.push_str("_outputs = {}\n");
        for name in outputs {
            let var = name.replace('-', "_").replace('.', "__");
            driver.push_str(&format!(
                "if \"{var}\" in dir():\n    _outputs[\"{name}\"] = {var}\n"
            ));
        }
        driver.push_str(&format!(
            "print(\"{CAB_OUTPUT_PREFIX}\" + json.dumps(_outputs))\n"
        ));
    }
    driver
}

/// Driver statement for the task-runner flavour: call the named task with
/// keyword arguments.
fn task_call(task: &str, params: &IndexMap<String, ConfigValue>) -> String {
    let kwargs: Vec<String> = params
        .iter()
        .map(|(k, v)| format!("{}={}", k.replace('-', "_"), code_literal(v)))
        .collect();
    format!("{task}({})", kwargs.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn yaml(text: &str) -> ConfigValue {
        serde_yaml::from_str(text).unwrap()
    }

    #[test]
    fn builds_a_binary_cab_from_config() {
        let cab = Cab::from_config(
            "cat",
            &yaml(
                "command: cat\ninputs:\n  file:\n    dtype: File\n    required: true\n    policies:\n      positional: true\n",
            ),
        )
        .unwrap();
        assert_eq!(cab.flavour, Flavour::Binary);
        let mut params = IndexMap::new();
        params.insert(
            "file".to_string(),
            ConfigValue::String("words.txt".into()),
        );
        assert_eq!(cab.command_spec(&params).unwrap(), vec!["cat", "words.txt"]);
    }

    #[test]
    fn wranglers_compile_from_management() {
        let cab = Cab::from_config(
            "moo",
            &yaml(
                "command: cat missing-file\nmanagement:\n  wranglers:\n    'No such file':\n      - DECLARE_SUCCESS\n      - 'WARNING:deliberate'\n",
            ),
        )
        .unwrap();
        assert_eq!(cab.management.wranglers.len(), 1);
        assert_eq!(cab.management.wranglers[0].actions.len(), 2);
    }

    #[test]
    fn inline_flavour_installs_output_capture() {
        let cab = Cab::from_config(
            "snippet",
            &yaml("command: \"x = a + 1\"\nflavour: inline-code\noutputs:\n  x: int\n"),
        )
        .unwrap();
        assert!(matches!(cab.flavour, Flavour::InlineCode { .. }));
        assert!(cab
            .management
            .wranglers
            .iter()
            .any(|rule| rule
                .actions
                .contains(&WranglerAction::ParseJsonOutputDict)));
    }

    #[test]
    fn command_splitting_honors_quotes() {
        assert_eq!(
            split_command(r#"wsclean -name "my image" -size 1024"#),
            vec!["wsclean", "-name", "my image", "-size", "1024"]
        );
    }
}

mod eval;
mod formula;

pub use eval::Evaluator;
pub use formula::{parse_formula, BinaryOp, Expr, Func, UnaryOp};

use indexmap::IndexMap;

use crate::config::{ConfigMap, ConfigValue};
use crate::error::SubstError;

/// Result of evaluating a parameter value: either a concrete value, or the
/// `UNSET` sentinel which removes the binding.
#[derive(Debug, Clone, PartialEq)]
pub enum Evaluated {
    Value(ConfigValue),
    Unset,
}

/// Outcome of a namespace lookup. A missing final segment is "unset" rather
/// than an error; the caller decides what that means.
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup {
    Found(ConfigValue),
    Unset(String),
}

/// An ordered stack of named scopes (`recipe`, `root`, `current`, `previous`,
/// `steps`, `info`, `config`, ...) against which substitutions and formulas
/// resolve.
#[derive(Debug, Clone, Default)]
pub struct Namespaces {
    scopes: ConfigMap,
}

impl Namespaces {
    pub fn new() -> Self {
        Namespaces {
            scopes: ConfigMap::new(),
        }
    }

    pub fn set_scope(&mut self, name: &str, value: ConfigValue) {
        self.scopes.insert(name.to_string(), value);
    }

    pub fn scope(&self, name: &str) -> Option<&ConfigValue> {
        self.scopes.get(name)
    }

    /// Resolves a dotted path with optional `[index]` segments and `*`/`?`
    /// wildcards. A wildcard segment matching several keys resolves to the
    /// alphanumerically largest one. A missing final segment yields
    /// `Lookup::Unset`; a missing intermediate segment is an error.
    pub fn lookup(&self, path: &str, location: &str) -> Result<Lookup, SubstError> {
        let segments = split_segments(path);
        let mut current: Option<&ConfigValue> = None;
        for (i, segment) in segments.iter().enumerate() {
            let last = i + 1 == segments.len();
            let next = match (current, segment) {
                (None, Segment::Key(key)) => lookup_key(&self.scopes, key),
                (None, Segment::Index(_)) => None,
                (Some(cur), Segment::Key(key)) => {
                    cur.as_map().and_then(|map| lookup_key(map, key))
                }
                (Some(cur), Segment::Index(idx)) => cur.as_list().and_then(|l| l.get(*idx)),
            };
            match next {
                Some(value) => current = Some(value),
                None if last => return Ok(Lookup::Unset(path.to_string())),
                None => {
                    return Err(SubstError::UndefinedNamespace {
                        location: location.to_string(),
                        name: segment.to_string(),
                        lookup: path.to_string(),
                    })
                }
            }
        }
        match current {
            Some(value) => Ok(Lookup::Found(value.clone())),
            None => Ok(Lookup::Unset(path.to_string())),
        }
    }

    /// Substitutes every `{path[:format]}` occurrence in `text`. `{{` and
    /// `}}` escape literal braces. An unset lookup is an error here; the
    /// formula engine is where unset is recoverable.
    pub fn substitute(&self, text: &str, location: &str) -> Result<String, SubstError> {
        let mut out = String::with_capacity(text.len());
        let mut chars = text.char_indices().peekable();
        while let Some((pos, ch)) = chars.next() {
            match ch {
                '{' => {
                    if let Some((_, '{')) = chars.peek() {
                        chars.next();
                        out.push('{');
                        continue;
                    }
                    let mut inner = String::new();
                    let mut closed = false;
                    for (_, c) in chars.by_ref() {
                        if c == '}' {
                            closed = true;
                            break;
                        }
                        inner.push(c);
                    }
                    if !closed {
                        return Err(SubstError::Unterminated {
                            location: location.to_string(),
                            text: text[pos..].to_string(),
                        });
                    }
                    let (path, spec) = match inner.split_once(':') {
                        Some((p, s)) => (p, Some(s)),
                        None => (inner.as_str(), None),
                    };
                    match self.lookup(path.trim(), location)? {
                        Lookup::Found(value) => {
                            out.push_str(&apply_format(&value, spec, location)?)
                        }
                        Lookup::Unset(name) => {
                            return Err(SubstError::UnsetInExpression {
                                location: location.to_string(),
                                name,
                            })
                        }
                    }
                }
                '}' => {
                    if let Some((_, '}')) = chars.peek() {
                        chars.next();
                    }
                    out.push('}');
                }
                _ => out.push(ch),
            }
        }
        Ok(out)
    }

    /// Evaluates one value: `=formula`, `==literal`, a `{}`-substitution
    /// string, or a pass-through. Lists and mappings are evaluated
    /// element-wise.
    pub fn evaluate(&self, value: &ConfigValue, location: &str) -> Result<Evaluated, SubstError> {
        match value {
            ConfigValue::String(text) => {
                if let Some(rest) = text.strip_prefix('=') {
                    if let Some(literal) = rest.strip_prefix('=') {
                        // "==" escapes a literal leading "="
                        return Ok(Evaluated::Value(ConfigValue::String(format!("={literal}"))));
                    }
                    let expr = parse_formula(rest).map_err(|message| SubstError::Parse {
                        location: location.to_string(),
                        formula: text.clone(),
                        message,
                    })?;
                    Evaluator::new(self, location).evaluate(&expr)
                } else {
                    self.substitute(text, location)
                        .map(|s| Evaluated::Value(ConfigValue::String(s)))
                }
            }
            ConfigValue::List(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    match self.evaluate(item, location)? {
                        Evaluated::Value(v) => out.push(v),
                        Evaluated::Unset => {}
                    }
                }
                Ok(Evaluated::Value(ConfigValue::List(out)))
            }
            ConfigValue::Map(map) => {
                let mut out = ConfigMap::new();
                for (key, item) in map {
                    match self.evaluate(item, &format!("{location}.{key}"))? {
                        Evaluated::Value(v) => {
                            out.insert(key.clone(), v);
                        }
                        Evaluated::Unset => {}
                    }
                }
                Ok(Evaluated::Value(ConfigValue::Map(out)))
            }
            other => Ok(Evaluated::Value(other.clone())),
        }
    }

    /// Evaluates a parameter map. An `UNSET` result falls back to the
    /// parameter's default (itself re-evaluated) or removes the binding.
    pub fn evaluate_params(
        &self,
        params: &IndexMap<String, ConfigValue>,
        defaults: &IndexMap<String, ConfigValue>,
        location: &str,
    ) -> Result<IndexMap<String, ConfigValue>, SubstError> {
        let mut out = IndexMap::new();
        for (name, value) in params {
            let here = format!("{location}.{name}");
            let mut result = self.evaluate(value, &here)?;
            if matches!(result, Evaluated::Unset) {
                if let Some(default) = defaults.get(name) {
                    result = self.evaluate(default, &here)?;
                }
            }
            if let Evaluated::Value(v) = result {
                out.insert(name.clone(), v);
            }
        }
        Ok(out)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Key(String),
    Index(usize),
}

impl std::fmt::Display for Segment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Segment::Key(k) => write!(f, "{k}"),
            Segment::Index(i) => write!(f, "[{i}]"),
        }
    }
}

fn split_segments(path: &str) -> Vec<Segment> {
    let mut segments = Vec::new();
    for part in path.split('.') {
        let mut rest = part;
        while let Some(open) = rest.find('[') {
            if open > 0 {
                segments.push(Segment::Key(rest[..open].to_string()));
            }
            match rest[open + 1..].find(']') {
                Some(close) => {
                    let idx = rest[open + 1..open + 1 + close].parse::<usize>().ok();
                    match idx {
                        Some(i) => segments.push(Segment::Index(i)),
                        // non-numeric index: keep the raw text as a key
                        None => segments.push(Segment::Key(
                            rest[open + 1..open + 1 + close].to_string(),
                        )),
                    }
                    rest = &rest[open + 2 + close..];
                }
                None => {
                    segments.push(Segment::Key(rest.to_string()));
                    rest = "";
                }
            }
        }
        if !rest.is_empty() {
            segments.push(Segment::Key(rest.to_string()));
        }
    }
    segments
}

fn lookup_key<'a>(map: &'a ConfigMap, key: &str) -> Option<&'a ConfigValue> {
    if let Some(v) = map.get(key) {
        return Some(v);
    }
    if key.contains('*') || key.contains('?') {
        return wildcard_match(map, key).map(|(_, v)| v);
    }
    None
}

/// Picks the alphanumerically largest key matching a `*`/`?` glob.
fn wildcard_match<'a>(
    map: &'a ConfigMap,
    pattern: &str,
) -> Option<(&'a String, &'a ConfigValue)> {
    let pat = glob::Pattern::new(pattern).ok()?;
    map.iter()
        .filter(|(k, _)| pat.matches(k))
        .max_by(|(a, _), (b, _)| a.cmp(b))
}

/// Applies a `:format` spec to a value. A practical subset of the
/// conventional mini-language: fill/align, zero-pad, width, precision, and
/// the `d`/`f`/`s`/`x`/`X` presentation types.
pub(crate) fn apply_format(
    value: &ConfigValue,
    spec: Option<&str>,
    location: &str,
) -> Result<String, SubstError> {
    let spec = match spec {
        None | Some("") => return Ok(value.to_string()),
        Some(s) => s,
    };
    use std::sync::LazyLock;
    static SPEC_RE: LazyLock<regex::Regex> = LazyLock::new(|| {
        regex::Regex::new(
            r"^(?:(?P<fill>.)?(?P<align>[<>^]))?(?P<zero>0)?(?P<width>\d+)?(?:\.(?P<prec>\d+))?(?P<type>[dfsxX])?$",
        )
        .expect("valid regex")
    });
    let caps = SPEC_RE
        .captures(spec)
        .ok_or_else(|| SubstError::BadFormatSpec {
            location: location.to_string(),
            spec: spec.to_string(),
        })?;
    let bad = || SubstError::BadFormatSpec {
        location: location.to_string(),
        spec: spec.to_string(),
    };
    let width: usize = caps
        .name("width")
        .map(|m| m.as_str().parse().unwrap_or(0))
        .unwrap_or(0);
    let prec: Option<usize> = caps.name("prec").map(|m| m.as_str().parse().unwrap_or(0));
    let zero = caps.name("zero").is_some();

    let mut body = match caps.name("type").map(|m| m.as_str()) {
        Some("d") => {
            let i = match value {
                ConfigValue::Int(i) => *i,
                ConfigValue::Bool(b) => *b as i64,
                _ => return Err(bad()),
            };
            i.to_string()
        }
        Some("x") => match value.as_int() {
            Some(i) => format!("{i:x}"),
            None => return Err(bad()),
        },
        Some("X") => match value.as_int() {
            Some(i) => format!("{i:X}"),
            None => return Err(bad()),
        },
        Some("f") => {
            let f = value.as_float().ok_or_else(bad)?;
            format!("{:.*}", prec.unwrap_or(6), f)
        }
        _ => {
            let s = value.to_string();
            match prec {
                Some(p) if !matches!(value, ConfigValue::Float(_)) => {
                    s.chars().take(p).collect()
                }
                Some(p) => format!("{:.*}", p, value.as_float().ok_or_else(bad)?),
                None => s,
            }
        }
    };

    if body.len() < width {
        let pad = width - body.len();
        let fill = caps
            .name("fill")
            .and_then(|m| m.as_str().chars().next())
            .unwrap_or(if zero { '0' } else { ' ' });
        match caps.name("align").map(|m| m.as_str()) {
            Some("<") => body = format!("{body}{}", fill.to_string().repeat(pad)),
            Some("^") => {
                let left = pad / 2;
                let right = pad - left;
                body = format!(
                    "{}{body}{}",
                    fill.to_string().repeat(left),
                    fill.to_string().repeat(right)
                );
            }
            // numbers right-align by default, strings left-align
            _ => {
                let numeric = zero
                    || matches!(
                        value,
                        ConfigValue::Int(_) | ConfigValue::Float(_) | ConfigValue::Bool(_)
                    );
                if numeric {
                    // zero-fill goes after a sign
                    if zero && (body.starts_with('-') || body.starts_with('+')) {
                        let (sign, digits) = body.split_at(1);
                        body = format!("{sign}{}{digits}", fill.to_string().repeat(pad));
                    } else {
                        body = format!("{}{body}", fill.to_string().repeat(pad));
                    }
                } else {
                    body = format!("{body}{}", fill.to_string().repeat(pad));
                }
            }
        }
    }
    Ok(body)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ns() -> Namespaces {
        let mut ns = Namespaces::new();
        ns.set_scope(
            "recipe",
            serde_yaml::from_str("loop: 3\nname: demo\nlist: [a, b, c]").unwrap(),
        );
        ns.set_scope(
            "steps",
            serde_yaml::from_str("image-1: {out: one.fits}\nimage-2: {out: two.fits}").unwrap(),
        );
        ns
    }

    #[test]
    fn basic_substitution_and_escapes() {
        let ns = ns();
        assert_eq!(
            ns.substitute("hello {recipe.name}!", "t").unwrap(),
            "hello demo!"
        );
        assert_eq!(ns.substitute("{{literal}}", "t").unwrap(), "{literal}");
    }

    #[test]
    fn format_specs() {
        let ns = ns();
        assert_eq!(
            ns.substitute("im-s{recipe.loop:02d}", "t").unwrap(),
            "im-s03"
        );
    }

    #[test]
    fn wildcard_lookup_takes_largest_label() {
        let ns = ns();
        assert_eq!(
            ns.substitute("{steps.image-*.out}", "t").unwrap(),
            "two.fits"
        );
    }

    #[test]
    fn index_segments() {
        let ns = ns();
        assert_eq!(ns.substitute("{recipe.list[1]}", "t").unwrap(), "b");
    }

    #[test]
    fn unset_final_segment_is_recoverable_midpath_is_not() {
        let ns = ns();
        assert!(matches!(
            ns.lookup("recipe.nope", "t").unwrap(),
            Lookup::Unset(_)
        ));
        assert!(ns.lookup("recipe.nope.deeper", "t").is_err());
    }

    #[test]
    fn double_equals_escapes_literal() {
        let ns = ns();
        let v = ns
            .evaluate(&ConfigValue::String("==not a formula".into()), "t")
            .unwrap();
        assert_eq!(
            v,
            Evaluated::Value(ConfigValue::String("=not a formula".into()))
        );
    }
}

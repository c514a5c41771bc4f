use std::path::Path;

use super::formula::{BinaryOp, Expr, Func, UnaryOp};
use super::{Evaluated, Lookup, Namespaces};
use crate::config::ConfigValue;
use crate::error::SubstError;

/// Nested strings found through lookups are themselves evaluated; this bounds
/// runaway self-reference.
const MAX_DEPTH: usize = 16;

/// Evaluates parsed formulas against a namespace stack.
pub struct Evaluator<'a> {
    ns: &'a Namespaces,
    location: &'a str,
    depth: usize,
}

/// Internal result: a value, or the unset sentinel carrying the name that
/// was found unset (for error messages).
#[derive(Debug, Clone)]
enum Val {
    Value(ConfigValue),
    Unset(String),
}

impl<'a> Evaluator<'a> {
    pub fn new(ns: &'a Namespaces, location: &'a str) -> Self {
        Evaluator {
            ns,
            location,
            depth: 0,
        }
    }

    /// Top-level entry: unset is allowed here and surfaces as
    /// `Evaluated::Unset`, which deletes the parameter binding.
    pub fn evaluate(&self, expr: &Expr) -> Result<Evaluated, SubstError> {
        match self.eval(expr, true)? {
            Val::Value(v) => Ok(Evaluated::Value(v)),
            Val::Unset(_) => Ok(Evaluated::Unset),
        }
    }

    fn unset_err(&self, name: &str) -> SubstError {
        SubstError::UnsetInExpression {
            location: self.location.to_string(),
            name: name.to_string(),
        }
    }

    fn eval(&self, expr: &Expr, allow_unset: bool) -> Result<Val, SubstError> {
        let value = match expr {
            Expr::Const(ConfigValue::String(s)) => {
                Val::Value(ConfigValue::String(self.ns.substitute(s, self.location)?))
            }
            Expr::Const(v) => Val::Value(v.clone()),
            Expr::Unset => Val::Unset("UNSET".to_string()),
            Expr::Empty => Val::Value(ConfigValue::String(String::new())),
            Expr::SelfValue => Val::Value(ConfigValue::String("SELF".to_string())),
            Expr::Lookup(path) => self.eval_lookup(path)?,
            Expr::List(items) => {
                let mut out = Vec::with_capacity(items.len());
                let mut unset = None;
                for item in items {
                    match self.eval(item, true)? {
                        Val::Value(v) => out.push(v),
                        Val::Unset(name) => unset = Some(name),
                    }
                }
                match unset {
                    Some(name) => Val::Unset(name),
                    None => Val::Value(ConfigValue::List(out)),
                }
            }
            Expr::Unary { op, operand } => self.eval_unary(*op, operand)?,
            Expr::Binary { op, left, right } => self.eval_binary(*op, left, right)?,
            Expr::Call { func, args } => self.eval_call(*func, args)?,
        };
        match value {
            Val::Unset(name) if !allow_unset => Err(self.unset_err(&name)),
            other => Ok(other),
        }
    }

    /// Looks up a dotted path; a found string that is itself a formula or
    /// substitution is evaluated in turn, up to a fixed depth.
    fn eval_lookup(&self, path: &str) -> Result<Val, SubstError> {
        match self.ns.lookup(path, self.location)? {
            Lookup::Unset(name) => Ok(Val::Unset(name)),
            Lookup::Found(ConfigValue::String(text)) => {
                if self.depth >= MAX_DEPTH {
                    return Err(SubstError::Cyclic(
                        path.to_string(),
                        self.location.to_string(),
                    ));
                }
                if text.starts_with('=') || text.contains('{') {
                    let nested = Evaluator {
                        ns: self.ns,
                        location: self.location,
                        depth: self.depth + 1,
                    };
                    match self.ns.evaluate_with(&nested, &text)? {
                        Evaluated::Value(v) => Ok(Val::Value(v)),
                        Evaluated::Unset => Ok(Val::Unset(path.to_string())),
                    }
                } else {
                    Ok(Val::Value(ConfigValue::String(text)))
                }
            }
            Lookup::Found(v) => Ok(Val::Value(v)),
        }
    }

    fn eval_unary(&self, op: UnaryOp, operand: &Expr) -> Result<Val, SubstError> {
        // `not` tolerates unset (unset is false); the others do not
        let allow = op == UnaryOp::Not;
        let value = match self.eval(operand, allow)? {
            Val::Unset(name) => {
                return match op {
                    UnaryOp::Not => Ok(Val::Value(ConfigValue::Bool(true))),
                    _ => Ok(Val::Unset(name)),
                }
            }
            Val::Value(v) => v,
        };
        let result = match op {
            UnaryOp::Not => ConfigValue::Bool(!truthy(&value)),
            UnaryOp::Neg => match value {
                ConfigValue::Int(i) => ConfigValue::Int(-i),
                ConfigValue::Float(f) => ConfigValue::Float(-f),
                other => return Err(self.bad_operands("-", &other, &ConfigValue::Null)),
            },
            UnaryOp::Pos => match value {
                v @ (ConfigValue::Int(_) | ConfigValue::Float(_)) => v,
                other => return Err(self.bad_operands("+", &other, &ConfigValue::Null)),
            },
            UnaryOp::BitNot => match value {
                ConfigValue::Int(i) => ConfigValue::Int(!i),
                other => return Err(self.bad_operands("~", &other, &ConfigValue::Null)),
            },
        };
        Ok(Val::Value(result))
    }

    fn eval_binary(&self, op: BinaryOp, left: &Expr, right: &Expr) -> Result<Val, SubstError> {
        // and/or short-circuit and yield the deciding operand
        if matches!(op, BinaryOp::And | BinaryOp::Or) {
            let l = match self.eval(left, false)? {
                Val::Value(v) => v,
                Val::Unset(name) => return Err(self.unset_err(&name)),
            };
            let decided = match op {
                BinaryOp::And => !truthy(&l),
                _ => truthy(&l),
            };
            if decided {
                return Ok(Val::Value(l));
            }
            return self.eval(right, false);
        }

        let l = match self.eval(left, false)? {
            Val::Value(v) => v,
            Val::Unset(name) => return Err(self.unset_err(&name)),
        };
        let r = match self.eval(right, false)? {
            Val::Value(v) => v,
            Val::Unset(name) => return Err(self.unset_err(&name)),
        };
        self.apply_binary(op, l, r).map(Val::Value)
    }

    fn bad_operands(&self, op: &'static str, l: &ConfigValue, r: &ConfigValue) -> SubstError {
        SubstError::BadOperands {
            location: self.location.to_string(),
            op,
            left: l.type_name(),
            right: r.type_name(),
        }
    }

    fn apply_binary(
        &self,
        op: BinaryOp,
        l: ConfigValue,
        r: ConfigValue,
    ) -> Result<ConfigValue, SubstError> {
        use ConfigValue as V;
        let err = |this: &Self, l: &V, r: &V| this.bad_operands(op.symbol(), l, r);
        let value = match op {
            BinaryOp::Add => match (&l, &r) {
                (V::Int(a), V::Int(b)) => V::Int(a + b),
                (V::String(a), V::String(b)) => V::String(format!("{a}{b}")),
                (V::List(a), V::List(b)) => {
                    V::List(a.iter().cloned().chain(b.iter().cloned()).collect())
                }
                _ => match (l.as_float(), r.as_float()) {
                    (Some(a), Some(b)) => V::Float(a + b),
                    _ => return Err(err(self, &l, &r)),
                },
            },
            BinaryOp::Sub => numeric(&l, &r, |a, b| a - b, |a, b| a - b).ok_or_else(|| err(self, &l, &r))?,
            BinaryOp::Mul => numeric(&l, &r, |a, b| a * b, |a, b| a * b).ok_or_else(|| err(self, &l, &r))?,
            BinaryOp::Div => match (l.as_float(), r.as_float()) {
                (Some(a), Some(b)) => V::Float(a / b),
                _ => return Err(err(self, &l, &r)),
            },
            BinaryOp::FloorDiv => match (&l, &r) {
                (V::Int(a), V::Int(b)) if *b != 0 => V::Int(a.div_euclid(*b)),
                _ => match (l.as_float(), r.as_float()) {
                    (Some(a), Some(b)) => V::Float((a / b).floor()),
                    _ => return Err(err(self, &l, &r)),
                },
            },
            BinaryOp::Mod => match (&l, &r) {
                (V::Int(a), V::Int(b)) if *b != 0 => V::Int(a.rem_euclid(*b)),
                _ => match (l.as_float(), r.as_float()) {
                    (Some(a), Some(b)) => V::Float(a.rem_euclid(b)),
                    _ => return Err(err(self, &l, &r)),
                },
            },
            BinaryOp::Pow => match (&l, &r) {
                (V::Int(a), V::Int(b)) if *b >= 0 => match a.checked_pow(*b as u32) {
                    Some(i) => V::Int(i),
                    None => V::Float((*a as f64).powf(*b as f64)),
                },
                _ => match (l.as_float(), r.as_float()) {
                    (Some(a), Some(b)) => V::Float(a.powf(b)),
                    _ => return Err(err(self, &l, &r)),
                },
            },
            BinaryOp::Shl | BinaryOp::Shr | BinaryOp::BitAnd | BinaryOp::BitXor | BinaryOp::BitOr => {
                match (&l, &r) {
                    (V::Int(a), V::Int(b)) => V::Int(match op {
                        BinaryOp::Shl => a << b,
                        BinaryOp::Shr => a >> b,
                        BinaryOp::BitAnd => a & b,
                        BinaryOp::BitXor => a ^ b,
                        _ => a | b,
                    }),
                    (V::Bool(a), V::Bool(b)) => V::Bool(match op {
                        BinaryOp::BitAnd => *a && *b,
                        BinaryOp::BitXor => a != b,
                        BinaryOp::BitOr => *a || *b,
                        _ => return Err(err(self, &l, &r)),
                    }),
                    _ => return Err(err(self, &l, &r)),
                }
            }
            BinaryOp::Eq => V::Bool(values_equal(&l, &r)),
            BinaryOp::Ne => V::Bool(!values_equal(&l, &r)),
            BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
                let ordering = compare(&l, &r).ok_or_else(|| err(self, &l, &r))?;
                V::Bool(match op {
                    BinaryOp::Lt => ordering.is_lt(),
                    BinaryOp::Le => ordering.is_le(),
                    BinaryOp::Gt => ordering.is_gt(),
                    _ => ordering.is_ge(),
                })
            }
            BinaryOp::In | BinaryOp::NotIn => {
                let contained = match &r {
                    V::List(items) => items.iter().any(|item| values_equal(&l, item)),
                    V::String(haystack) => match &l {
                        V::String(needle) => haystack.contains(needle.as_str()),
                        _ => return Err(err(self, &l, &r)),
                    },
                    V::Map(map) => match &l {
                        V::String(key) => map.contains_key(key.as_str()),
                        _ => return Err(err(self, &l, &r)),
                    },
                    _ => return Err(err(self, &l, &r)),
                };
                V::Bool(if op == BinaryOp::In {
                    contained
                } else {
                    !contained
                })
            }
            BinaryOp::And | BinaryOp::Or => unreachable!("short-circuited above"),
        };
        Ok(value)
    }

    fn eval_call(&self, func: Func, args: &[Expr]) -> Result<Val, SubstError> {
        match func {
            Func::If => self.eval_if(args),
            Func::IfSet => self.eval_ifset(args),
            Func::Glob => {
                let pattern = self.eval_pattern_arg(func, args)?;
                match pattern {
                    Val::Unset(name) => Ok(Val::Unset(name)),
                    Val::Value(v) => {
                        let text = self.pattern_text(func, &v)?;
                        let mut matches: Vec<String> = glob::glob(&text)
                            .map(|paths| {
                                paths
                                    .filter_map(Result::ok)
                                    .map(|p| p.display().to_string())
                                    .collect()
                            })
                            .unwrap_or_default();
                        matches.sort();
                        Ok(Val::Value(ConfigValue::List(
                            matches.into_iter().map(ConfigValue::String).collect(),
                        )))
                    }
                }
            }
            Func::Exists => {
                let pattern = self.eval_pattern_arg(func, args)?;
                match pattern {
                    Val::Unset(name) => Ok(Val::Unset(name)),
                    Val::Value(v) => {
                        let text = self.pattern_text(func, &v)?;
                        let found = glob::glob(&text)
                            .map(|mut paths| paths.any(|p| p.is_ok()))
                            .unwrap_or(false);
                        Ok(Val::Value(ConfigValue::Bool(found)))
                    }
                }
            }
            Func::List => {
                let args = match self.eval_args(args)? {
                    Ok(values) => values,
                    Err(unset) => return Ok(Val::Unset(unset)),
                };
                Ok(Val::Value(ConfigValue::List(args)))
            }
            Func::Range => {
                self.check_arity(func, args, 1, 3)?;
                let values = match self.eval_args(args)? {
                    Ok(values) => values,
                    Err(unset) => return Ok(Val::Unset(unset)),
                };
                let ints: Option<Vec<i64>> = values.iter().map(ConfigValue::as_int).collect();
                let ints = ints.ok_or_else(|| self.bad_arg_type(func, "int", &values[0]))?;
                let (start, stop, step) = match ints.as_slice() {
                    [n] => (0, *n, 1),
                    [a, b] => (*a, *b, 1),
                    [a, b, s] => (*a, *b, *s),
                    _ => unreachable!("arity checked"),
                };
                let mut out = Vec::new();
                if step > 0 {
                    let mut i = start;
                    while i < stop {
                        out.push(ConfigValue::Int(i));
                        i += step;
                    }
                } else if step < 0 {
                    let mut i = start;
                    while i > stop {
                        out.push(ConfigValue::Int(i));
                        i += step;
                    }
                }
                Ok(Val::Value(ConfigValue::List(out)))
            }
            Func::Min | Func::Max => {
                self.check_arity(func, args, 1, usize::MAX)?;
                let values = match self.eval_args(args)? {
                    Ok(values) => values,
                    Err(unset) => return Ok(Val::Unset(unset)),
                };
                // a single list argument selects among its elements
                let pool: Vec<ConfigValue> = match values.as_slice() {
                    [ConfigValue::List(items)] => items.clone(),
                    _ => values,
                };
                let mut best: Option<ConfigValue> = None;
                for v in pool {
                    best = Some(match best {
                        None => v,
                        Some(b) => {
                            let ordering = compare(&v, &b)
                                .ok_or_else(|| self.bad_arg_type(func, "comparable", &v))?;
                            let take = if func == Func::Min {
                                ordering.is_lt()
                            } else {
                                ordering.is_gt()
                            };
                            if take {
                                v
                            } else {
                                b
                            }
                        }
                    });
                }
                match best {
                    Some(v) => Ok(Val::Value(v)),
                    None => Err(self.bad_arity(func, "at least 1 argument", 0)),
                }
            }
            Func::Dirname | Func::Basename | Func::Extension | Func::StripExt => {
                self.check_arity(func, args, 1, 1)?;
                let value = match self.eval(&args[0], true)? {
                    Val::Unset(name) => return Ok(Val::Unset(name)),
                    Val::Value(v) => v,
                };
                let text = match &value {
                    ConfigValue::String(s) => s.clone(),
                    other => return Err(self.bad_arg_type(func, "string", other)),
                };
                let path = Path::new(&text);
                let result = match func {
                    Func::Dirname => path
                        .parent()
                        .map(|p| p.display().to_string())
                        .unwrap_or_default(),
                    Func::Basename => path
                        .file_name()
                        .map(|n| n.to_string_lossy().into_owned())
                        .unwrap_or_default(),
                    Func::Extension => path
                        .extension()
                        .map(|e| format!(".{}", e.to_string_lossy()))
                        .unwrap_or_default(),
                    _ => match (path.parent(), path.file_stem()) {
                        (Some(dir), Some(stem)) if dir != Path::new("") => {
                            dir.join(stem).display().to_string()
                        }
                        (_, Some(stem)) => stem.to_string_lossy().into_owned(),
                        _ => text.clone(),
                    },
                };
                Ok(Val::Value(ConfigValue::String(result)))
            }
        }
    }

    fn eval_if(&self, args: &[Expr]) -> Result<Val, SubstError> {
        if args.len() < 3 || args.len() > 4 {
            return Err(self.bad_arity(Func::If, "3 or 4 arguments", args.len()));
        }
        let has_if_unset = args.len() == 4;
        let cond = self.eval(&args[0], has_if_unset)?;
        match cond {
            Val::Unset(name) => {
                if has_if_unset {
                    self.eval(&args[3], true)
                } else {
                    Err(self.unset_err(&name))
                }
            }
            Val::Value(v) => {
                let branch = if truthy(&v) { &args[1] } else { &args[2] };
                self.eval(branch, true)
            }
        }
    }

    fn eval_ifset(&self, args: &[Expr]) -> Result<Val, SubstError> {
        if args.is_empty() || args.len() > 3 {
            return Err(self.bad_arity(Func::IfSet, "1 to 3 arguments", args.len()));
        }
        let value = self.eval(&args[0], true)?;
        match value {
            Val::Unset(name) => match args.get(2) {
                Some(if_unset) => self.eval(if_unset, true),
                None => Ok(Val::Unset(name)),
            },
            Val::Value(v) => match args.get(1) {
                None => Ok(Val::Value(v)),
                Some(Expr::SelfValue) => Ok(Val::Value(v)),
                Some(if_set) => self.eval(if_set, true),
            },
        }
    }

    /// GLOB/EXISTS accept an unquoted pattern, which lexes as a lookup; if
    /// the lookup is unset, its raw path is the pattern.
    fn eval_pattern_arg(&self, func: Func, args: &[Expr]) -> Result<Val, SubstError> {
        self.check_arity(func, args, 1, 1)?;
        if let Expr::Lookup(path) = &args[0] {
            if let Val::Unset(_) = self.eval_lookup(path)? {
                let text = self.ns.substitute(path, self.location)?;
                return Ok(Val::Value(ConfigValue::String(text)));
            }
        }
        self.eval(&args[0], true)
    }

    fn pattern_text(&self, func: Func, value: &ConfigValue) -> Result<String, SubstError> {
        match value {
            ConfigValue::String(s) => Ok(s.clone()),
            other => Err(self.bad_arg_type(func, "string", other)),
        }
    }

    /// Evaluates plain arguments; the first unset short-circuits.
    fn eval_args(&self, args: &[Expr]) -> Result<Result<Vec<ConfigValue>, String>, SubstError> {
        let mut out = Vec::with_capacity(args.len());
        for arg in args {
            match self.eval(arg, true)? {
                Val::Unset(name) => return Ok(Err(name)),
                Val::Value(v) => out.push(v),
            }
        }
        Ok(Ok(out))
    }

    fn check_arity(
        &self,
        func: Func,
        args: &[Expr],
        min: usize,
        max: usize,
    ) -> Result<(), SubstError> {
        if args.len() < min || args.len() > max {
            let expected = match (min, max) {
                (1, 1) => "1 argument",
                (1, 3) => "1 to 3 arguments",
                (1, _) => "at least 1 argument",
                _ => "a different number of arguments",
            };
            return Err(self.bad_arity(func, expected, args.len()));
        }
        Ok(())
    }

    fn bad_arity(&self, func: Func, expected: &'static str, got: usize) -> SubstError {
        SubstError::BadArgumentCount {
            location: self.location.to_string(),
            func: func.name(),
            expected,
            got,
        }
    }

    fn bad_arg_type(&self, func: Func, expected: &'static str, got: &ConfigValue) -> SubstError {
        SubstError::BadArgumentType {
            location: self.location.to_string(),
            func: func.name(),
            expected,
            got: got.type_name(),
        }
    }
}

impl Namespaces {
    /// Evaluates a raw string through a nested evaluator (used when lookups
    /// land on strings that are themselves formulas or substitutions).
    fn evaluate_with(
        &self,
        nested: &Evaluator<'_>,
        text: &str,
    ) -> Result<Evaluated, SubstError> {
        if let Some(rest) = text.strip_prefix('=') {
            if let Some(literal) = rest.strip_prefix('=') {
                return Ok(Evaluated::Value(ConfigValue::String(format!("={literal}"))));
            }
            let expr = super::parse_formula(rest).map_err(|message| SubstError::Parse {
                location: nested.location.to_string(),
                formula: text.to_string(),
                message,
            })?;
            nested.evaluate(&expr)
        } else {
            self.substitute(text, nested.location)
                .map(|s| Evaluated::Value(ConfigValue::String(s)))
        }
    }
}

/// Formula truthiness: null, false, zero, empty string/list/map are false.
fn truthy(value: &ConfigValue) -> bool {
    match value {
        ConfigValue::Null => false,
        ConfigValue::Bool(b) => *b,
        ConfigValue::Int(i) => *i != 0,
        ConfigValue::Float(f) => *f != 0.0,
        ConfigValue::String(s) => !s.is_empty(),
        ConfigValue::List(l) => !l.is_empty(),
        ConfigValue::Map(m) => !m.is_empty(),
    }
}

/// Equality with numeric promotion (2 == 2.0).
fn values_equal(l: &ConfigValue, r: &ConfigValue) -> bool {
    if let (Some(a), Some(b)) = (l.as_float(), r.as_float()) {
        return a == b;
    }
    l == r
}

fn compare(l: &ConfigValue, r: &ConfigValue) -> Option<std::cmp::Ordering> {
    match (l, r) {
        (ConfigValue::String(a), ConfigValue::String(b)) => Some(a.cmp(b)),
        _ => l.as_float()?.partial_cmp(&r.as_float()?),
    }
}

fn numeric(
    l: &ConfigValue,
    r: &ConfigValue,
    int_op: fn(i64, i64) -> i64,
    float_op: fn(f64, f64) -> f64,
) -> Option<ConfigValue> {
    match (l, r) {
        (ConfigValue::Int(a), ConfigValue::Int(b)) => Some(ConfigValue::Int(int_op(*a, *b))),
        _ => Some(ConfigValue::Float(float_op(l.as_float()?, r.as_float()?))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subst::Namespaces;

    fn eval(ns: &Namespaces, formula: &str) -> Evaluated {
        let expr = super::super::parse_formula(formula).unwrap();
        Evaluator::new(ns, "test").evaluate(&expr).unwrap()
    }

    fn value(ns: &Namespaces, formula: &str) -> ConfigValue {
        match eval(ns, formula) {
            Evaluated::Value(v) => v,
            Evaluated::Unset => panic!("unexpected UNSET"),
        }
    }

    fn ns() -> Namespaces {
        let mut ns = Namespaces::new();
        ns.set_scope(
            "recipe",
            serde_yaml::from_str("x: 5\nname: demo\nflag: true\nitems: [1, 2, 3]").unwrap(),
        );
        ns
    }

    #[test]
    fn arithmetic_and_precedence() {
        let ns = ns();
        assert_eq!(value(&ns, "1 + 2 * 3"), ConfigValue::Int(7));
        assert_eq!(value(&ns, "2 ** 10"), ConfigValue::Int(1024));
        assert_eq!(value(&ns, "7 // 2"), ConfigValue::Int(3));
        assert_eq!(value(&ns, "7 / 2"), ConfigValue::Float(3.5));
        assert_eq!(value(&ns, "recipe.x + 1"), ConfigValue::Int(6));
    }

    #[test]
    fn comparisons_and_membership() {
        let ns = ns();
        assert_eq!(value(&ns, "recipe.x > 3"), ConfigValue::Bool(true));
        assert_eq!(value(&ns, "2 in recipe.items"), ConfigValue::Bool(true));
        assert_eq!(value(&ns, "9 not in recipe.items"), ConfigValue::Bool(true));
        assert_eq!(value(&ns, "'de' in recipe.name"), ConfigValue::Bool(true));
    }

    #[test]
    fn unset_in_arithmetic_is_an_error() {
        let ns = ns();
        let expr = super::super::parse_formula("recipe.missing + 1").unwrap();
        let err = Evaluator::new(&ns, "test").evaluate(&expr).unwrap_err();
        assert!(err.is_unset());
    }

    #[test]
    fn bare_unset_lookup_yields_unset() {
        let ns = ns();
        assert_eq!(eval(&ns, "recipe.missing"), Evaluated::Unset);
        assert_eq!(eval(&ns, "UNSET"), Evaluated::Unset);
    }

    #[test]
    fn if_with_if_unset_never_throws() {
        let ns = ns();
        assert_eq!(
            value(&ns, "IF(recipe.missing, 1, 2, 3)"),
            ConfigValue::Int(3)
        );
        assert_eq!(value(&ns, "IF(recipe.x > 3, 'big', 'small')"),
            ConfigValue::String("big".into()));
    }

    #[test]
    fn ifset_variants() {
        let ns = ns();
        assert_eq!(value(&ns, "IFSET(recipe.x)"), ConfigValue::Int(5));
        assert_eq!(value(&ns, "IFSET(recipe.x, 'yes')"), ConfigValue::String("yes".into()));
        assert_eq!(value(&ns, "IFSET(recipe.x, SELF)"), ConfigValue::Int(5));
        assert_eq!(
            value(&ns, "IFSET(recipe.missing, 'yes', 'no')"),
            ConfigValue::String("no".into())
        );
        assert_eq!(eval(&ns, "IFSET(recipe.missing)"), Evaluated::Unset);
    }

    #[test]
    fn list_and_range_functions() {
        let ns = ns();
        assert_eq!(
            value(&ns, "RANGE(3)"),
            ConfigValue::List(vec![
                ConfigValue::Int(0),
                ConfigValue::Int(1),
                ConfigValue::Int(2)
            ])
        );
        assert_eq!(
            value(&ns, "LIST(1, 'a')"),
            ConfigValue::List(vec![ConfigValue::Int(1), ConfigValue::String("a".into())])
        );
        assert_eq!(value(&ns, "MIN(recipe.items)"), ConfigValue::Int(1));
        assert_eq!(value(&ns, "MAX(4, 2, 9)"), ConfigValue::Int(9));
    }

    #[test]
    fn path_functions() {
        let ns = ns();
        assert_eq!(
            value(&ns, "BASENAME('a/b/c.txt')"),
            ConfigValue::String("c.txt".into())
        );
        assert_eq!(
            value(&ns, "DIRNAME('a/b/c.txt')"),
            ConfigValue::String("a/b".into())
        );
        assert_eq!(
            value(&ns, "EXTENSION('a/b/c.txt')"),
            ConfigValue::String(".txt".into())
        );
        assert_eq!(
            value(&ns, "STRIPEXT('a/b/c.txt')"),
            ConfigValue::String("a/b/c".into())
        );
    }

    #[test]
    fn stripext_of_a_number_is_a_type_error() {
        let ns = ns();
        let expr = super::super::parse_formula("STRIPEXT(5)").unwrap();
        let err = Evaluator::new(&ns, "test").evaluate(&expr).unwrap_err();
        assert!(matches!(err, SubstError::BadArgumentType { .. }));
    }

    #[test]
    fn and_or_yield_operands() {
        let ns = ns();
        assert_eq!(value(&ns, "0 or 'fallback'"), ConfigValue::String("fallback".into()));
        assert_eq!(value(&ns, "recipe.flag and recipe.x"), ConfigValue::Int(5));
        assert_eq!(value(&ns, "not recipe.missing"), ConfigValue::Bool(true));
    }
}

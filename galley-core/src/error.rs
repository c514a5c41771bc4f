use thiserror::Error;

#[derive(Debug, Error)]
pub enum GalleyError {
    #[error(transparent)]
    Load(#[from] LoadError),
    #[error(transparent)]
    Schema(#[from] SchemaError),
    #[error(transparent)]
    Subst(#[from] SubstError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
}

/// Errors raised while reading and merging documents.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("cannot read '{path}': {source}")]
    Unreadable {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse '{path}' as YAML: {source}")]
    Yaml {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("failed to parse '{path}' as JSON: {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("include '{0}' not found in any search location")]
    IncludeNotFound(String),
    #[error("_use target '{0}' does not refer to a mapping")]
    UseNotAMapping(String),
    #[error("_scrub path '{0}' is absent")]
    ScrubPathMissing(String),
    #[error("cyclic _use/_include chain at '{0}'")]
    Cycle(String),
    #[error("merge conflict at '{path}': cannot merge {left} with {right}")]
    MergeConflict {
        path: String,
        left: &'static str,
        right: &'static str,
    },
    #[error("document root of '{0}' is not a mapping")]
    RootNotAMapping(String),
}

/// Errors in schema declarations themselves, as opposed to values failing them.
#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("'{0}' is not a recognized dtype")]
    BadDType(String),
    #[error("cannot parse shorthand schema '{0}'")]
    BadShorthand(String),
    #[error("parameter '{0}': at most one of default/required/implicit may be set")]
    ConflictingAttributes(String),
    #[error("parameter '{name}': {message}")]
    BadDeclaration { name: String, message: String },
    #[error("wrangler pattern '{pattern}' is not a valid regular expression: {source}")]
    BadWranglerPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
    #[error("'{spec}' is not a valid wrangler action for pattern '{pattern}'")]
    BadWranglerAction { pattern: String, spec: String },
    #[error("cab '{0}': {1}")]
    BadCab(String, String),
}

/// Errors from the substitution and formula engine.
#[derive(Debug, Error)]
pub enum SubstError {
    #[error("{location}: error parsing formula '{formula}': {message}")]
    Parse {
        location: String,
        formula: String,
        message: String,
    },
    #[error("{location}: '{name}' is unset in expression")]
    UnsetInExpression { location: String, name: String },
    #[error("{location}: {func}() expects {expected}, got {got}")]
    BadArgumentCount {
        location: String,
        func: &'static str,
        expected: &'static str,
        got: usize,
    },
    #[error("{location}: {func}() expects a {expected} argument, got {got}")]
    BadArgumentType {
        location: String,
        func: &'static str,
        expected: &'static str,
        got: &'static str,
    },
    #[error("{location}: '{name}' undefined (in '{lookup}')")]
    UndefinedNamespace {
        location: String,
        name: String,
        lookup: String,
    },
    #[error("{location}: unterminated {{...}} substitution in '{text}'")]
    Unterminated { location: String, text: String },
    #[error("{location}: invalid format spec '{spec}'")]
    BadFormatSpec { location: String, spec: String },
    #[error("{location}: operator '{op}' not applicable to {left} and {right}")]
    BadOperands {
        location: String,
        op: &'static str,
        left: &'static str,
        right: &'static str,
    },
    #[error("cyclic substitution through '{0}' at {1}")]
    Cyclic(String, String),
}

impl SubstError {
    /// Unset lookups are recoverable in some contexts (IF/IFSET, pure lookups).
    pub fn is_unset(&self) -> bool {
        matches!(self, SubstError::UnsetInExpression { .. })
    }
}

/// Errors raised when values are checked against schemas, aliases are
/// resolved, or assignments are applied.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("{name}: cannot convert {got} to {want}")]
    TypeMismatch {
        name: String,
        got: String,
        want: String,
    },
    #[error("{name}: value '{value}' is not one of the allowed choices")]
    BadChoice { name: String, value: String },
    #[error("{name}: required parameter is missing")]
    MissingRequired { name: String },
    #[error("{name}: unknown parameter")]
    UnknownParameter { name: String },
    #[error("{name}: implicit parameter cannot be set explicitly")]
    ImplicitOverride { name: String },
    #[error("{name}: file or directory '{path}' must exist but does not")]
    MustExist { name: String, path: String },
    #[error("alias '{alias}': {message}")]
    UnresolvedAlias { alias: String, message: String },
    #[error("assign_based_on '{key}': no case matches value '{value}' and no DEFAULT given")]
    AssignBasedOnUnmatched { key: String, value: String },
    #[error("assign_based_on '{key}': '{key}' is not a known input or variable")]
    AssignBasedOnUnknownKey { key: String },
    #[error("recipe '{recipe}': {message}")]
    BadRecipe { recipe: String, message: String },
    #[error("step '{step}': {message}")]
    BadStep { step: String, message: String },
    #[error("{name}: error creating directory '{path}': {source}")]
    Mkdir {
        name: String,
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Schema(#[from] SchemaError),
    #[error(transparent)]
    Subst(#[from] SubstError),
}

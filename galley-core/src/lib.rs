#![forbid(unsafe_code)]

pub mod cab;
pub mod config;
pub mod error;
pub mod recipe;
pub mod schema;
pub mod subst;

pub use crate::cab::{Cab, Flavour};
pub use crate::config::{load_config, merge, ConfigMap, ConfigValue, LoadOptions};
pub use crate::error::{GalleyError, LoadError, SchemaError, SubstError, ValidationError};
pub use crate::recipe::{prevalidate, Cargo, Prevalidated, Recipe, Registry, Step};
pub use crate::schema::{DType, Schema};
pub use crate::subst::{Evaluated, Namespaces};

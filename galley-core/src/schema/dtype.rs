use std::fmt;

use crate::error::SchemaError;

/// Declared parameter type. Scalars, file-like types, and composites over
/// them. Parsed from the conventional bracketed notation, e.g.
/// `List[File]`, `Union[int, str]`, `Optional[Dict[str, int]]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DType {
    Str,
    Int,
    Float,
    Bool,
    File,
    Directory,
    /// A table-like dataset; treated as a directory path on disk.
    MS,
    URI,
    List(Box<DType>),
    Tuple(Vec<DType>),
    Union(Vec<DType>),
    Dict(Box<DType>, Box<DType>),
    Optional(Box<DType>),
}

impl DType {
    pub fn parse(text: &str) -> Result<DType, SchemaError> {
        let mut parser = Parser {
            text,
            pos: 0,
            input: text,
        };
        let dtype = parser.parse_type()?;
        parser.skip_ws();
        if parser.pos != parser.text.len() {
            return Err(SchemaError::BadDType(text.to_string()));
        }
        Ok(dtype)
    }

    /// True for types whose values name filesystem entries.
    pub fn is_file_like(&self) -> bool {
        matches!(
            self,
            DType::File | DType::Directory | DType::MS | DType::URI
        ) || matches!(self, DType::Optional(inner) if inner.is_file_like())
    }

    /// True for `List[File]`-shaped types.
    pub fn is_file_list(&self) -> bool {
        match self {
            DType::List(inner) => inner.is_file_like(),
            DType::Optional(inner) => inner.is_file_list(),
            _ => false,
        }
    }

    /// File-like types that are directories on disk (`Directory`, `MS`).
    pub fn is_dir_like(&self) -> bool {
        matches!(self, DType::Directory | DType::MS)
            || matches!(self, DType::Optional(inner) if inner.is_dir_like())
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DType::Str => write!(f, "str"),
            DType::Int => write!(f, "int"),
            DType::Float => write!(f, "float"),
            DType::Bool => write!(f, "bool"),
            DType::File => write!(f, "File"),
            DType::Directory => write!(f, "Directory"),
            DType::MS => write!(f, "MS"),
            DType::URI => write!(f, "URI"),
            DType::List(t) => write!(f, "List[{t}]"),
            DType::Tuple(ts) => {
                let inner: Vec<String> = ts.iter().map(|t| t.to_string()).collect();
                write!(f, "Tuple[{}]", inner.join(", "))
            }
            DType::Union(ts) => {
                let inner: Vec<String> = ts.iter().map(|t| t.to_string()).collect();
                write!(f, "Union[{}]", inner.join(", "))
            }
            DType::Dict(k, v) => write!(f, "Dict[{k}, {v}]"),
            DType::Optional(t) => write!(f, "Optional[{t}]"),
        }
    }
}

struct Parser<'a> {
    text: &'a str,
    pos: usize,
    input: &'a str,
}

impl<'a> Parser<'a> {
    fn skip_ws(&mut self) {
        while self.text[self.pos..].starts_with(char::is_whitespace) {
            self.pos += 1;
        }
    }

    fn take_ident(&mut self) -> &'a str {
        self.skip_ws();
        let start = self.pos;
        for (offset, ch) in self.text[start..].char_indices() {
            if !ch.is_alphanumeric() && ch != '_' {
                self.pos = start + offset;
                return &self.text[start..self.pos];
            }
        }
        self.pos = self.text.len();
        &self.text[start..]
    }

    fn eat(&mut self, ch: char) -> bool {
        self.skip_ws();
        if self.text[self.pos..].starts_with(ch) {
            self.pos += ch.len_utf8();
            true
        } else {
            false
        }
    }

    fn parse_type(&mut self) -> Result<DType, SchemaError> {
        let ident = self.take_ident();
        match ident {
            "str" | "string" => Ok(DType::Str),
            "int" | "integer" => Ok(DType::Int),
            "float" => Ok(DType::Float),
            "bool" | "boolean" => Ok(DType::Bool),
            "File" => Ok(DType::File),
            "Directory" => Ok(DType::Directory),
            "MS" => Ok(DType::MS),
            "URI" => Ok(DType::URI),
            "List" => {
                let args = self.parse_args()?;
                match <[DType; 1]>::try_from(args) {
                    Ok([inner]) => Ok(DType::List(Box::new(inner))),
                    Err(_) => Err(SchemaError::BadDType(self.input.to_string())),
                }
            }
            "Optional" => {
                let args = self.parse_args()?;
                match <[DType; 1]>::try_from(args) {
                    Ok([inner]) => Ok(DType::Optional(Box::new(inner))),
                    Err(_) => Err(SchemaError::BadDType(self.input.to_string())),
                }
            }
            "Tuple" => Ok(DType::Tuple(self.parse_args()?)),
            "Union" => {
                let args = self.parse_args()?;
                if args.len() < 2 {
                    return Err(SchemaError::BadDType(self.input.to_string()));
                }
                Ok(DType::Union(args))
            }
            "Dict" => {
                let args = self.parse_args()?;
                match <[DType; 2]>::try_from(args) {
                    Ok([k, v]) => Ok(DType::Dict(Box::new(k), Box::new(v))),
                    Err(_) => Err(SchemaError::BadDType(self.input.to_string())),
                }
            }
            _ => Err(SchemaError::BadDType(self.input.to_string())),
        }
    }

    fn parse_args(&mut self) -> Result<Vec<DType>, SchemaError> {
        if !self.eat('[') {
            return Err(SchemaError::BadDType(self.input.to_string()));
        }
        let mut args = Vec::new();
        loop {
            args.push(self.parse_type()?);
            if self.eat(',') {
                continue;
            }
            if self.eat(']') {
                return Ok(args);
            }
            return Err(SchemaError::BadDType(self.input.to_string()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_composites() {
        assert_eq!(
            DType::parse("List[File]").unwrap(),
            DType::List(Box::new(DType::File))
        );
        assert_eq!(
            DType::parse("Union[int, str]").unwrap(),
            DType::Union(vec![DType::Int, DType::Str])
        );
        assert_eq!(
            DType::parse("Optional[Dict[str, int]]").unwrap(),
            DType::Optional(Box::new(DType::Dict(
                Box::new(DType::Str),
                Box::new(DType::Int)
            )))
        );
    }

    #[test]
    fn rejects_unknown_and_malformed() {
        assert!(DType::parse("complex").is_err());
        assert!(DType::parse("List[int").is_err());
        assert!(DType::parse("List[int] trailing").is_err());
    }

    #[test]
    fn file_likeness() {
        assert!(DType::parse("MS").unwrap().is_file_like());
        assert!(DType::parse("List[MS]").unwrap().is_file_list());
        assert!(DType::parse("Optional[File]").unwrap().is_file_like());
        assert!(!DType::parse("List[int]").unwrap().is_file_list());
        assert!(DType::parse("MS").unwrap().is_dir_like());
    }
}

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::SchemaError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrimitiveType {
    Bool,
    Int8,
    Int16,
    Int32,
    Uint8,
    Uint16,
    Uint32,
    Float32,
    Float64,
    Ascii,
    Utf8,
    FlowId,
}

impl PrimitiveType {
    /// Resolves a type name through the alias table.
    pub fn from_name(name: &str) -> Option<Self> {
        let ty = match name {
            "bool" | "boolean" => PrimitiveType::Bool,
            "int8" | "byte" => PrimitiveType::Int8,
            "int16" | "short" => PrimitiveType::Int16,
            "int32" | "long" => PrimitiveType::Int32,
            "uint8" | "octet" => PrimitiveType::Uint8,
            "uint16" | "unsigned short" => PrimitiveType::Uint16,
            "uint32" | "unsigned long" => PrimitiveType::Uint32,
            "float32" | "float" => PrimitiveType::Float32,
            "float64" | "double" => PrimitiveType::Float64,
            "ascii" => PrimitiveType::Ascii,
            "utf8" | "DOMString" => PrimitiveType::Utf8,
            "flowId" => PrimitiveType::FlowId,
            _ => return None,
        };
        Some(ty)
    }

    pub fn name(self) -> &'static str {
        match self {
            PrimitiveType::Bool => "bool",
            PrimitiveType::Int8 => "int8",
            PrimitiveType::Int16 => "int16",
            PrimitiveType::Int32 => "int32",
            PrimitiveType::Uint8 => "uint8",
            PrimitiveType::Uint16 => "uint16",
            PrimitiveType::Uint32 => "uint32",
            PrimitiveType::Float32 => "float32",
            PrimitiveType::Float64 => "float64",
            PrimitiveType::Ascii => "ascii",
            PrimitiveType::Utf8 => "utf8",
            PrimitiveType::FlowId => "flowId",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ArgType {
    Primitive(PrimitiveType),
    Array(Box<ArgType>),
}

impl ArgType {
    /// Parses `T`, `T[]` or `sequence<T>`, recursively.
    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.trim();
        if let Some(element) = name.strip_suffix("[]") {
            return ArgType::from_name(element).map(|t| ArgType::Array(Box::new(t)));
        }
        if let Some(element) = name
            .strip_prefix("sequence<")
            .and_then(|rest| rest.strip_suffix('>'))
        {
            return ArgType::from_name(element).map(|t| ArgType::Array(Box::new(t)));
        }
        PrimitiveType::from_name(name).map(ArgType::Primitive)
    }
}

impl fmt::Display for ArgType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgType::Primitive(p) => write!(f, "{}", p.name()),
            ArgType::Array(element) => write!(f, "{element}[]"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArgSpec {
    pub name: String,
    pub ty: ArgType,
    /// Position of the argument on the wire.
    pub ordinal: u32,
}

impl ArgSpec {
    pub fn new(name: impl Into<String>, ty: ArgType, ordinal: u32) -> Self {
        ArgSpec {
            name: name.into(),
            ty,
            ordinal,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    pub name: String,
    pub args: Vec<ArgSpec>,
}

impl Signature {
    /// An argument-less stand-in for a signature that failed to parse.
    pub fn placeholder(serial: u64) -> Self {
        Signature {
            name: format!("wtf.invalid#signature{serial}"),
            args: Vec::new(),
        }
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.name)?;
        for (i, arg) in self.args.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{} {}", arg.ty, arg.name)?;
        }
        write!(f, ")")
    }
}

fn is_valid_event_name(name: &str) -> bool {
    !name.is_empty()
        && !name
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, '(' | ')' | ',' | '@'))
}

fn is_valid_arg_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
}

/// Parses `"ns.method(uint8 a, float32[] b@3)"` into a [`Signature`].
///
/// Arguments without an explicit `@N` ordinal continue counting from the
/// previous argument's ordinal.
pub fn parse_signature(signature: &str) -> Result<Signature, SchemaError> {
    let signature = signature.trim();
    if signature.is_empty() {
        return Err(SchemaError::Empty);
    }

    let Some(open) = signature.find('(') else {
        if signature.contains(')') || !is_valid_event_name(signature) {
            return Err(SchemaError::InvalidName(signature.to_string()));
        }
        return Ok(Signature {
            name: signature.to_string(),
            args: Vec::new(),
        });
    };

    let name = signature[..open].trim();
    if !is_valid_event_name(name) {
        return Err(SchemaError::InvalidName(name.to_string()));
    }
    let body = signature[open + 1..]
        .strip_suffix(')')
        .filter(|body| !body.contains('(') && !body.contains(')'))
        .ok_or_else(|| SchemaError::Unbalanced(signature.to_string()))?;

    let mut args = Vec::new();
    if body.trim().is_empty() {
        return Ok(Signature {
            name: name.to_string(),
            args,
        });
    }

    let mut seen = HashSet::new();
    let mut next_ordinal = 0u32;
    for raw in body.split(',') {
        let raw = raw.trim();
        // the ordinal may be separated from the name by whitespace: `a @3`
        let (declaration, ordinal) = match raw.split_once('@') {
            Some((declaration, ordinal)) => {
                let ordinal = ordinal
                    .trim()
                    .parse::<u32>()
                    .map_err(|_| SchemaError::InvalidOrdinal(raw.to_string()))?;
                (declaration.trim_end(), ordinal)
            }
            None => (raw, next_ordinal),
        };
        let split = declaration
            .rfind(char::is_whitespace)
            .ok_or_else(|| SchemaError::MalformedArgument(raw.to_string()))?;
        let (type_name, arg_name) = (declaration[..split].trim(), declaration[split..].trim());
        if !is_valid_arg_name(arg_name) {
            return Err(SchemaError::MalformedArgument(raw.to_string()));
        }
        let ty = ArgType::from_name(type_name)
            .ok_or_else(|| SchemaError::UnknownType(type_name.to_string()))?;
        if !seen.insert(arg_name.to_string()) {
            return Err(SchemaError::DuplicateArgument(arg_name.to_string()));
        }

        next_ordinal = ordinal.saturating_add(1);
        args.push(ArgSpec::new(arg_name, ty, ordinal));
    }

    Ok(Signature {
        name: name.to_string(),
        args,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn prim(p: PrimitiveType) -> ArgType {
        ArgType::Primitive(p)
    }

    #[test]
    fn test_parse_with_ordinals() {
        let sig = parse_signature("ns.method(uint8 a, float32[] b@3, utf8 c)").unwrap();
        assert_eq!(sig.name, "ns.method");
        assert_eq!(
            sig.args,
            vec![
                ArgSpec::new("a", prim(PrimitiveType::Uint8), 0),
                ArgSpec::new(
                    "b",
                    ArgType::Array(Box::new(prim(PrimitiveType::Float32))),
                    3
                ),
                ArgSpec::new("c", prim(PrimitiveType::Utf8), 4),
            ]
        );
    }

    #[rstest]
    #[case("ns.m(uint8 a @3, uint8 b)")]
    #[case("ns.m(uint8 a@ 3, uint8 b)")]
    #[case("ns.m( uint8  a  @  3 , uint8 b )")]
    fn test_ordinal_with_whitespace(#[case] input: &str) {
        let sig = parse_signature(input).unwrap();
        assert_eq!(
            sig.args,
            vec![
                ArgSpec::new("a", prim(PrimitiveType::Uint8), 3),
                ArgSpec::new("b", prim(PrimitiveType::Uint8), 4),
            ]
        );
    }

    #[rstest]
    #[case("byte", PrimitiveType::Int8)]
    #[case("short", PrimitiveType::Int16)]
    #[case("long", PrimitiveType::Int32)]
    #[case("octet", PrimitiveType::Uint8)]
    #[case("unsigned short", PrimitiveType::Uint16)]
    #[case("unsigned long", PrimitiveType::Uint32)]
    #[case("float", PrimitiveType::Float32)]
    #[case("DOMString", PrimitiveType::Utf8)]
    #[case("flowId", PrimitiveType::FlowId)]
    fn test_aliases(#[case] alias: &str, #[case] expected: PrimitiveType) {
        let sig = parse_signature(&format!("x({alias} v)")).unwrap();
        assert_eq!(sig.args[0].ty, prim(expected));
    }

    #[test]
    fn test_sequence_and_nested_arrays() {
        let sig = parse_signature("x(sequence<uint16> a, int8[][] b)").unwrap();
        assert_eq!(
            sig.args[0].ty,
            ArgType::Array(Box::new(prim(PrimitiveType::Uint16)))
        );
        assert_eq!(
            sig.args[1].ty,
            ArgType::Array(Box::new(ArgType::Array(Box::new(prim(PrimitiveType::Int8)))))
        );
    }

    #[rstest]
    #[case("wtf.scope#leave")]
    #[case("wtf.scope#leave()")]
    #[case("  my.event ( ) ")]
    fn test_no_arguments(#[case] input: &str) {
        let sig = parse_signature(input).unwrap();
        assert!(sig.args.is_empty());
        assert!(!sig.name.contains(' '));
    }

    #[rstest]
    #[case("", SchemaError::Empty)]
    #[case("x(uint8 a", SchemaError::Unbalanced("x(uint8 a".into()))]
    #[case("x(quux a)", SchemaError::UnknownType("quux".into()))]
    #[case("x(uint8)", SchemaError::MalformedArgument("uint8".into()))]
    #[case("x(uint8 a@z)", SchemaError::InvalidOrdinal("uint8 a@z".into()))]
    #[case("x(uint8 a, int8 a)", SchemaError::DuplicateArgument("a".into()))]
    #[case("(uint8 a)", SchemaError::InvalidName("".into()))]
    fn test_errors(#[case] input: &str, #[case] expected: SchemaError) {
        assert_eq!(parse_signature(input), Err(expected));
    }

    #[test]
    fn test_display_roundtrips_through_parser() {
        let sig = parse_signature("a.b(unsigned long x, DOMString[] y)").unwrap();
        assert_eq!(sig.to_string(), "a.b(uint32 x, utf8[] y)");
        assert_eq!(parse_signature(&sig.to_string()).unwrap(), sig);
    }

    #[test]
    fn test_placeholders_are_unique() {
        assert_ne!(Signature::placeholder(1).name, Signature::placeholder(2).name);
        assert!(Signature::placeholder(1).args.is_empty());
    }
}

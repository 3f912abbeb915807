//! Declarative descriptor scripts: object blocks, `onLoad` style functions
//! and top-level calls.
//!
//! ```text
//! singleton TSShapeConstructor(MikuDAE)
//! {
//!    baseShape = "./Miku_Hatsune.pmd";
//! };
//!
//! function MikuDAE::onLoad(%this)
//! {
//!    %this.addSequence("./kishimen.vmd ambient", "kishimen", 0, -1);
//! }
//! ```

use std::{borrow::Cow, fs, path::Path};

use anyhow::{Context, Result};
use thiserror::Error;

pub mod lexer;
pub mod parser;
pub mod writer;

pub use parser::parse_script;

#[derive(Debug, Error, PartialEq)]
pub enum ScriptError {
    #[error("unexpected character '{ch}' at {line}:{column}")]
    UnexpectedChar { ch: char, line: usize, column: usize },
    #[error("unterminated string starting at {line}:{column}")]
    UnterminatedString { line: usize, column: usize },
    #[error("unterminated block comment starting at {line}:{column}")]
    UnterminatedComment { line: usize, column: usize },
    #[error("expected {expected}, found {found} at {line}:{column}")]
    Unexpected {
        expected: String,
        found: String,
        line: usize,
        column: usize,
    },
    #[error("invalid number '{text}' at {line}:{column}")]
    InvalidNumber {
        text: String,
        line: usize,
        column: usize,
    },
}

/// Parsed script file, items in source order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Script {
    pub items: Vec<Item>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Item {
    Object(ObjectDecl),
    Function(FunctionDecl),
    Call(Call),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ObjectKind {
    Singleton,
    New,
}

/// `singleton Class(Name) { ... };`
#[derive(Clone, Debug, PartialEq)]
pub struct ObjectDecl {
    pub kind: ObjectKind,
    pub class: String,
    pub name: String,
    pub fields: Vec<Field>,
    pub line: usize,
}

/// `name[index] = "value";` Values are kept as text, like the engine does.
#[derive(Clone, Debug, PartialEq)]
pub struct Field {
    pub name: String,
    pub index: Option<u32>,
    pub value: String,
}

/// `function Namespace::name(%a, %b) { calls... }`
#[derive(Clone, Debug, PartialEq)]
pub struct FunctionDecl {
    pub namespace: Option<String>,
    pub name: String,
    pub params: Vec<String>,
    pub body: Vec<Call>,
    pub line: usize,
}

/// `receiver.method(args);` or `method(args);`
#[derive(Clone, Debug, PartialEq)]
pub struct Call {
    pub receiver: Option<String>,
    pub method: String,
    pub args: Vec<Value>,
    pub line: usize,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Ident(String),
}

impl Value {
    /// Text form of the value, as the engine would see it in a string slot.
    pub fn to_text(&self) -> String {
        match self {
            Value::Str(s) | Value::Ident(s) => s.clone(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => f.to_string(),
            Value::Bool(b) => if *b { "1" } else { "0" }.to_string(),
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Float(f) if f.fract() == 0.0 => Some(*f as i64),
            Value::Str(s) => s.trim().parse().ok(),
            Value::Bool(b) => Some(i64::from(*b)),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            Value::Int(i) => Some(*i != 0),
            Value::Str(s) | Value::Ident(s) => parse_bool(s),
            Value::Float(f) => Some(*f != 0.0),
        }
    }
}

/// Engine-style boolean text: "1"/"0", "true"/"false" (any case).
pub fn parse_bool(text: &str) -> Option<bool> {
    let t = text.trim();
    if t.eq_ignore_ascii_case("true") {
        return Some(true);
    }
    if t.eq_ignore_ascii_case("false") || t.is_empty() {
        return Some(false);
    }
    t.parse::<f64>().ok().map(|v| v != 0.0)
}

impl ObjectDecl {
    pub fn new(kind: ObjectKind, class: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind,
            class: class.into(),
            name: name.into(),
            fields: Vec::new(),
            line: 0,
        }
    }

    /// Last assignment wins, as with repeated assignments in the engine.
    pub fn field(&self, name: &str, index: Option<u32>) -> Option<&str> {
        self.fields
            .iter()
            .rev()
            .find(|f| f.name.eq_ignore_ascii_case(name) && f.index == index)
            .map(|f| f.value.as_str())
    }

    pub fn push_field(&mut self, name: impl Into<String>, index: Option<u32>, value: impl Into<String>) {
        self.fields.push(Field {
            name: name.into(),
            index,
            value: value.into(),
        });
    }
}

impl Script {
    pub fn objects(&self) -> impl Iterator<Item = &ObjectDecl> {
        self.items.iter().filter_map(|item| match item {
            Item::Object(o) => Some(o),
            _ => None,
        })
    }

    /// Object blocks of one class (case-insensitive, like engine class lookup).
    pub fn objects_of_class<'s>(&'s self, class: &'s str) -> impl Iterator<Item = &'s ObjectDecl> {
        self.objects().filter(move |o| o.class.eq_ignore_ascii_case(class))
    }

    /// Last definition of `namespace::name` wins.
    pub fn function(&self, namespace: &str, name: &str) -> Option<&FunctionDecl> {
        self.items
            .iter()
            .rev()
            .filter_map(|item| match item {
                Item::Function(f) => Some(f),
                _ => None,
            })
            .find(|f| {
                f.name.eq_ignore_ascii_case(name)
                    && f.namespace
                        .as_deref()
                        .is_some_and(|ns| ns.eq_ignore_ascii_case(namespace))
            })
    }

    pub fn calls(&self) -> impl Iterator<Item = &Call> {
        self.items.iter().filter_map(|item| match item {
            Item::Call(c) => Some(c),
            _ => None,
        })
    }
}

/// Decode script bytes. Invalid UTF-8 is replaced rather than rejected.
pub fn decode_source(bytes: &[u8], origin: &str) -> String {
    match String::from_utf8_lossy(bytes) {
        Cow::Borrowed(text) => text.to_string(),
        Cow::Owned(text) => {
            log::warn!("{origin}: invalid UTF-8 replaced while decoding");
            text
        }
    }
}

/// Parse a script string.
pub fn load_script_from_str(contents: &str) -> Result<Script> {
    let script = parse_script(contents)?;
    log::debug!("Parsed script with {} items", script.items.len());
    Ok(script)
}

/// Read and parse a script file.
pub fn load_script_from_path(path: impl AsRef<Path>) -> Result<Script> {
    let path = path.as_ref();
    let bytes = fs::read(path)
        .with_context(|| format!("Failed to open script file: {}", path.display()))?;
    let text = decode_source(&bytes, &path.display().to_string());
    let script = parse_script(&text)
        .with_context(|| format!("Failed to parse script file: {}", path.display()))?;
    for call in script.calls() {
        if call.method.eq_ignore_ascii_case("echo") {
            if let Some(msg) = call.args.first() {
                log::debug!("{}: echo {}", path.display(), msg.to_text());
            }
        }
    }
    log::info!("Loaded script {} ({} items)", path.display(), script.items.len());
    Ok(script)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_booleans() {
        assert_eq!(parse_bool("1"), Some(true));
        assert_eq!(parse_bool("0"), Some(false));
        assert_eq!(parse_bool("TRUE"), Some(true));
        assert_eq!(parse_bool(""), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }

    #[test]
    fn field_lookup_prefers_last_assignment() {
        let mut obj = ObjectDecl::new(ObjectKind::Singleton, "Material", "m");
        obj.push_field("mapTo", None, "a");
        obj.push_field("MAPTO", None, "b");
        obj.push_field("diffuseMap", Some(0), "x.png");
        assert_eq!(obj.field("mapTo", None), Some("b"));
        assert_eq!(obj.field("diffuseMap", Some(0)), Some("x.png"));
        assert_eq!(obj.field("diffuseMap", None), None);
    }

    #[test]
    fn lossy_decoding_keeps_valid_text() {
        let text = decode_source(b"mapTo = \"\xff_0\";", "test");
        assert!(text.starts_with("mapTo"));
        assert!(text.contains("\u{fffd}_0"));
    }
}

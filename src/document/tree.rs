//! Job document tree
//!
//! The scheduler's job format is treated as an opaque tree of mappings,
//! sequences and scalars. Values are addressed with dotted paths:
//!
//! - in a sequence, a segment must be a non-negative integer index
//! - in a mapping, a segment is a key, even when it looks like a number
//!
//! Mappings keep their key order so a parsed document serializes back the
//! way it was written.

use std::fmt;

use indexmap::IndexMap;
use serde_yaml::Value as Yaml;

use super::DocumentError;

/// Leaf value
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Null,
    Bool(bool),
    Int(i64),
    /// Integers above `i64::MAX`
    UInt(u64),
    Float(f64),
    String(String),
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Null => f.write_str("null"),
            Scalar::Bool(b) => write!(f, "{}", b),
            Scalar::Int(i) => write!(f, "{}", i),
            Scalar::UInt(u) => write!(f, "{}", u),
            Scalar::Float(x) => write!(f, "{}", x),
            Scalar::String(s) => f.write_str(s),
        }
    }
}

/// Node of a job document
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Mapping(IndexMap<String, Node>),
    Sequence(Vec<Node>),
    Scalar(Scalar),
}

impl Node {
    pub fn null() -> Self {
        Node::Scalar(Scalar::Null)
    }

    /// Empty mapping
    pub fn mapping() -> Self {
        Node::Mapping(IndexMap::new())
    }

    /// Insert into a mapping node; no-op on other nodes
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Node>) -> Self {
        if let Node::Mapping(map) = &mut self {
            map.insert(key.into(), value.into());
        }
        self
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Node::Scalar(Scalar::String(s)) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Node::Scalar(Scalar::Int(i)) => Some(*i),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Node::Scalar(Scalar::Bool(b)) => Some(*b),
            _ => None,
        }
    }

    pub fn as_mapping(&self) -> Option<&IndexMap<String, Node>> {
        match self {
            Node::Mapping(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_sequence(&self) -> Option<&[Node]> {
        match self {
            Node::Sequence(items) => Some(items),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Node::Scalar(Scalar::Null))
    }

    fn child(&self, segment: &str) -> Option<&Node> {
        match self {
            Node::Mapping(map) => map.get(segment),
            Node::Sequence(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            Node::Scalar(_) => None,
        }
    }

    fn child_mut(&mut self, segment: &str) -> Option<&mut Node> {
        match self {
            Node::Mapping(map) => map.get_mut(segment),
            Node::Sequence(items) => segment
                .parse::<usize>()
                .ok()
                .and_then(move |i| items.get_mut(i)),
            Node::Scalar(_) => None,
        }
    }
}

impl From<Scalar> for Node {
    fn from(scalar: Scalar) -> Self {
        Node::Scalar(scalar)
    }
}

impl From<&str> for Node {
    fn from(s: &str) -> Self {
        Node::Scalar(Scalar::String(s.to_string()))
    }
}

impl From<String> for Node {
    fn from(s: String) -> Self {
        Node::Scalar(Scalar::String(s))
    }
}

impl From<bool> for Node {
    fn from(b: bool) -> Self {
        Node::Scalar(Scalar::Bool(b))
    }
}

impl From<i64> for Node {
    fn from(i: i64) -> Self {
        Node::Scalar(Scalar::Int(i))
    }
}

impl From<i32> for Node {
    fn from(i: i32) -> Self {
        Node::Scalar(Scalar::Int(i64::from(i)))
    }
}

impl From<u32> for Node {
    fn from(i: u32) -> Self {
        Node::Scalar(Scalar::Int(i64::from(i)))
    }
}

impl From<f64> for Node {
    fn from(x: f64) -> Self {
        Node::Scalar(Scalar::Float(x))
    }
}

impl<T: Into<Node>> From<Vec<T>> for Node {
    fn from(items: Vec<T>) -> Self {
        Node::Sequence(items.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Node>> From<Option<T>> for Node {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or_else(Node::null)
    }
}

impl TryFrom<Yaml> for Node {
    type Error = DocumentError;

    fn try_from(value: Yaml) -> Result<Self, Self::Error> {
        Ok(match value {
            Yaml::Null => Node::null(),
            Yaml::Bool(b) => Node::from(b),
            Yaml::Number(n) => match (n.as_i64(), n.as_u64()) {
                (Some(i), _) => Node::from(i),
                (None, Some(u)) => Node::Scalar(Scalar::UInt(u)),
                (None, None) => Node::from(n.as_f64().unwrap_or(f64::NAN)),
            },
            Yaml::String(s) => Node::from(s),
            Yaml::Sequence(items) => Node::Sequence(
                items
                    .into_iter()
                    .map(Node::try_from)
                    .collect::<Result<_, _>>()?,
            ),
            Yaml::Mapping(map) => {
                let mut out = IndexMap::with_capacity(map.len());
                for (key, value) in map {
                    out.insert(key_to_string(key)?, Node::try_from(value)?);
                }
                Node::Mapping(out)
            }
            Yaml::Tagged(tagged) => Node::try_from(tagged.value)?,
        })
    }
}

impl From<&Node> for Yaml {
    fn from(node: &Node) -> Self {
        match node {
            Node::Scalar(Scalar::Null) => Yaml::Null,
            Node::Scalar(Scalar::Bool(b)) => Yaml::Bool(*b),
            Node::Scalar(Scalar::Int(i)) => Yaml::Number((*i).into()),
            Node::Scalar(Scalar::UInt(u)) => Yaml::Number((*u).into()),
            Node::Scalar(Scalar::Float(x)) => Yaml::Number((*x).into()),
            Node::Scalar(Scalar::String(s)) => Yaml::String(s.clone()),
            Node::Sequence(items) => Yaml::Sequence(items.iter().map(Yaml::from).collect()),
            Node::Mapping(map) => Yaml::Mapping(
                map.iter()
                    .map(|(k, v)| (Yaml::String(k.clone()), Yaml::from(v)))
                    .collect(),
            ),
        }
    }
}

/// Scalar keys are stringified; collections cannot be keys
fn key_to_string(key: Yaml) -> Result<String, DocumentError> {
    match key {
        Yaml::String(s) => Ok(s),
        Yaml::Bool(b) => Ok(b.to_string()),
        Yaml::Number(n) => Ok(n.to_string()),
        Yaml::Null => Ok("null".to_string()),
        Yaml::Tagged(tagged) => key_to_string(tagged.value),
        Yaml::Sequence(_) | Yaml::Mapping(_) => Err(DocumentError::Format(
            "mapping keys must be scalars".to_string(),
        )),
    }
}

/// A rendered job document
#[derive(Debug, Clone, PartialEq)]
pub struct JobDocument {
    root: Node,
}

impl JobDocument {
    pub fn new(root: Node) -> Self {
        Self { root }
    }

    /// Parse the canonical text form
    pub fn parse(text: &str) -> Result<Self, DocumentError> {
        let value: Yaml =
            serde_yaml::from_str(text).map_err(|e| DocumentError::Format(e.to_string()))?;
        Ok(Self::new(Node::try_from(value)?))
    }

    /// Canonical text form, as submitted to the scheduler
    pub fn serialize(&self) -> Result<String, DocumentError> {
        serde_yaml::to_string(&Yaml::from(&self.root)).map_err(|e| DocumentError::Format(e.to_string()))
    }

    pub fn root(&self) -> &Node {
        &self.root
    }

    pub fn into_root(self) -> Node {
        self.root
    }

    /// Value at a dotted path
    pub fn get(&self, path: &str) -> Result<&Node, DocumentError> {
        segments(path)?
            .try_fold(&self.root, |node, segment| node.child(segment))
            .ok_or_else(|| DocumentError::KeyNotFound(path.to_string()))
    }

    /// Replace or insert the value at a dotted path.
    ///
    /// Every parent must already exist. The last segment may add a new key
    /// to a mapping but cannot grow a sequence.
    pub fn set(&mut self, path: &str, value: impl Into<Node>) -> Result<(), DocumentError> {
        let parts: Vec<&str> = segments(path)?.collect();
        let not_found = || DocumentError::KeyNotFound(path.to_string());
        let (last, parents) = parts.split_last().ok_or_else(not_found)?;

        let mut node = &mut self.root;
        for segment in parents {
            node = node.child_mut(segment).ok_or_else(not_found)?;
        }

        match node {
            Node::Mapping(map) => {
                map.insert(last.to_string(), value.into());
            }
            Node::Sequence(items) => {
                let slot = last
                    .parse::<usize>()
                    .ok()
                    .and_then(|i| items.get_mut(i))
                    .ok_or_else(not_found)?;
                *slot = value.into();
            }
            Node::Scalar(_) => return Err(not_found()),
        }
        Ok(())
    }
}

fn segments(path: &str) -> Result<impl Iterator<Item = &str>, DocumentError> {
    if path.is_empty() || path.split('.').any(str::is_empty) {
        return Err(DocumentError::KeyNotFound(path.to_string()));
    }
    Ok(path.split('.'))
}

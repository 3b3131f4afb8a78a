//! XML-RPC codec.
//!
//! Encodes method calls and decodes method responses. The parser accepts the
//! subset of XML that XML-RPC servers emit: elements, character data, CDATA
//! sections, comments, the predefined entities and numeric character
//! references. Attributes are skipped.

use std::collections::BTreeMap;

use crate::error::ProtocolError;
use crate::value::Value;

/// A fault returned by the remote side instead of a value.
#[derive(Debug, Clone, PartialEq)]
pub struct Fault {
    pub code: i64,
    pub message: String,
}

/// Decoded `methodResponse` document.
#[derive(Debug, Clone, PartialEq)]
pub enum MethodResponse {
    Success(Value),
    Fault(Fault),
}

/// Encode a `methodCall` document.
pub fn encode_call(method: &str, params: &[Value]) -> String {
    let mut out = String::from("<?xml version=\"1.0\"?>\n<methodCall><methodName>");
    escape_into(method, &mut out);
    out.push_str("</methodName><params>");
    for param in params {
        out.push_str("<param>");
        encode_value(param, &mut out);
        out.push_str("</param>");
    }
    out.push_str("</params></methodCall>\n");
    out
}

fn encode_value(value: &Value, out: &mut String) {
    out.push_str("<value>");
    match value {
        Value::Int(i) => {
            out.push_str("<int>");
            out.push_str(&i.to_string());
            out.push_str("</int>");
        }
        Value::Bool(b) => out.push_str(if *b {
            "<boolean>1</boolean>"
        } else {
            "<boolean>0</boolean>"
        }),
        Value::String(s) => {
            out.push_str("<string>");
            escape_into(s, out);
            out.push_str("</string>");
        }
        Value::Double(d) => {
            out.push_str("<double>");
            out.push_str(&d.to_string());
            out.push_str("</double>");
        }
        Value::DateTime(s) => {
            out.push_str("<dateTime.iso8601>");
            escape_into(s, out);
            out.push_str("</dateTime.iso8601>");
        }
        Value::Base64(s) => {
            out.push_str("<base64>");
            escape_into(s, out);
            out.push_str("</base64>");
        }
        Value::Array(items) => {
            out.push_str("<array><data>");
            for item in items {
                encode_value(item, out);
            }
            out.push_str("</data></array>");
        }
        Value::Struct(members) => {
            out.push_str("<struct>");
            for (name, member) in members {
                out.push_str("<member><name>");
                escape_into(name, out);
                out.push_str("</name>");
                encode_value(member, out);
                out.push_str("</member>");
            }
            out.push_str("</struct>");
        }
        Value::Nil => out.push_str("<nil/>"),
    }
    out.push_str("</value>");
}

fn escape_into(text: &str, out: &mut String) {
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(c),
        }
    }
}

/// Decode a `methodResponse` document.
pub fn decode_response(body: &str) -> Result<MethodResponse, ProtocolError> {
    let root = Parser::new(body).parse_document()?;
    if root.name != "methodResponse" {
        return Err(ProtocolError::Unexpected(format!(
            "expected <methodResponse>, found <{}>",
            root.name
        )));
    }

    let inner = root.single_child()?;
    match inner.name.as_str() {
        "params" => {
            // A response without a param carries no value
            let Some(param) = inner.elements().next() else {
                return Ok(MethodResponse::Success(Value::Nil));
            };
            expect_name(param, "param")?;
            let value = param.single_child()?;
            Ok(MethodResponse::Success(decode_value(value)?))
        }
        "fault" => {
            let value = decode_value(inner.single_child()?)?;
            let code = value
                .get("faultCode")
                .and_then(Value::as_i64)
                .unwrap_or_default();
            let message = value
                .get("faultString")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            Ok(MethodResponse::Fault(Fault { code, message }))
        }
        other => Err(ProtocolError::Unexpected(format!(
            "unexpected <{}> in methodResponse",
            other
        ))),
    }
}

fn expect_name(element: &Element, name: &str) -> Result<(), ProtocolError> {
    if element.name == name {
        Ok(())
    } else {
        Err(ProtocolError::Unexpected(format!(
            "expected <{}>, found <{}>",
            name, element.name
        )))
    }
}

fn decode_value(element: &Element) -> Result<Value, ProtocolError> {
    expect_name(element, "value")?;

    let mut typed = element.elements();
    let Some(inner) = typed.next() else {
        // Untyped content defaults to string
        return Ok(Value::String(element.text()));
    };
    if typed.next().is_some() {
        return Err(ProtocolError::Unexpected(
            "<value> with more than one child".to_string(),
        ));
    }

    let text = inner.text();
    match inner.name.as_str() {
        "int" | "i4" | "i8" => text
            .trim()
            .parse::<i64>()
            .map(Value::Int)
            .map_err(|e| ProtocolError::Unexpected(format!("bad int '{}': {}", text.trim(), e))),
        "boolean" => match text.trim() {
            "1" | "true" => Ok(Value::Bool(true)),
            "0" | "false" => Ok(Value::Bool(false)),
            other => Err(ProtocolError::Unexpected(format!("bad boolean '{}'", other))),
        },
        "string" => Ok(Value::String(text)),
        "double" => text
            .trim()
            .parse::<f64>()
            .map(Value::Double)
            .map_err(|e| ProtocolError::Unexpected(format!("bad double '{}': {}", text.trim(), e))),
        "dateTime.iso8601" => Ok(Value::DateTime(text.trim().to_string())),
        "base64" => Ok(Value::Base64(
            text.chars().filter(|c| !c.is_whitespace()).collect(),
        )),
        "nil" => Ok(Value::Nil),
        "array" => {
            let data = inner
                .child("data")
                .ok_or_else(|| ProtocolError::Unexpected("<array> without <data>".to_string()))?;
            data.elements()
                .map(decode_value)
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array)
        }
        "struct" => {
            let mut members = BTreeMap::new();
            for member in inner.elements() {
                expect_name(member, "member")?;
                let name = member
                    .child("name")
                    .ok_or_else(|| ProtocolError::Unexpected("<member> without <name>".to_string()))?
                    .text();
                let value = member
                    .child("value")
                    .ok_or_else(|| ProtocolError::Unexpected("<member> without <value>".to_string()))?;
                members.insert(name, decode_value(value)?);
            }
            Ok(Value::Struct(members))
        }
        other => Err(ProtocolError::Unexpected(format!(
            "unsupported value type <{}>",
            other
        ))),
    }
}

#[derive(Debug)]
struct Element {
    name: String,
    children: Vec<Node>,
}

#[derive(Debug)]
enum Node {
    Element(Element),
    Text(String),
}

impl Element {
    fn elements(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(|child| match child {
            Node::Element(e) => Some(e),
            Node::Text(_) => None,
        })
    }

    fn child(&self, name: &str) -> Option<&Element> {
        self.elements().find(|e| e.name == name)
    }

    fn single_child(&self) -> Result<&Element, ProtocolError> {
        let mut elements = self.elements();
        match (elements.next(), elements.next()) {
            (Some(only), None) => Ok(only),
            (None, _) => Err(ProtocolError::Unexpected(format!(
                "<{}> is empty",
                self.name
            ))),
            (Some(_), Some(_)) => Err(ProtocolError::Unexpected(format!(
                "<{}> has more than one child",
                self.name
            ))),
        }
    }

    fn text(&self) -> String {
        self.children
            .iter()
            .filter_map(|child| match child {
                Node::Text(t) => Some(t.as_str()),
                Node::Element(_) => None,
            })
            .collect()
    }
}

/// Recursive-descent reader over the raw document.
///
/// `pos` only ever stops on ASCII delimiters, so slicing `src` at `pos` is
/// always on a char boundary.
struct Parser<'a> {
    src: &'a str,
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(src: &'a str) -> Self {
        Self {
            src,
            bytes: src.as_bytes(),
            pos: 0,
        }
    }

    fn parse_document(mut self) -> Result<Element, ProtocolError> {
        self.skip_misc()?;
        let root = self.parse_element()?;
        self.skip_misc()?;
        if self.pos != self.bytes.len() {
            return Err(ProtocolError::xml(self.pos, "trailing content after root element"));
        }
        Ok(root)
    }

    fn starts_with(&self, pattern: &str) -> bool {
        self.bytes[self.pos..].starts_with(pattern.as_bytes())
    }

    fn find(&self, pattern: &str) -> Option<usize> {
        let needle = pattern.as_bytes();
        self.bytes[self.pos..]
            .windows(needle.len())
            .position(|window| window == needle)
    }

    fn skip_past(&mut self, pattern: &str) -> Result<(), ProtocolError> {
        match self.find(pattern) {
            Some(idx) => {
                self.pos += idx + pattern.len();
                Ok(())
            }
            None => Err(ProtocolError::xml(self.pos, format!("missing '{}'", pattern))),
        }
    }

    fn skip_whitespace(&mut self) {
        while self.pos < self.bytes.len() && self.bytes[self.pos].is_ascii_whitespace() {
            self.pos += 1;
        }
    }

    fn skip_misc(&mut self) -> Result<(), ProtocolError> {
        loop {
            self.skip_whitespace();
            if self.starts_with("<?") {
                self.skip_past("?>")?;
            } else if self.starts_with("<!--") {
                self.skip_past("-->")?;
            } else if self.starts_with("<!DOCTYPE") {
                self.skip_past(">")?;
            } else {
                return Ok(());
            }
        }
    }

    fn read_name(&mut self) -> Result<String, ProtocolError> {
        let start = self.pos;
        while self.pos < self.bytes.len() {
            let b = self.bytes[self.pos];
            if b.is_ascii_whitespace() || b == b'>' || b == b'/' {
                break;
            }
            self.pos += 1;
        }
        if start == self.pos {
            return Err(ProtocolError::xml(start, "expected element name"));
        }
        Ok(self.src[start..self.pos].to_string())
    }

    /// Skip attributes up to the end of a start tag. Returns true for `/>`.
    fn skip_attributes(&mut self) -> Result<bool, ProtocolError> {
        loop {
            match self.bytes.get(self.pos).copied() {
                None => return Err(ProtocolError::xml(self.pos, "unterminated start tag")),
                Some(b'>') => {
                    self.pos += 1;
                    return Ok(false);
                }
                Some(b'/') => {
                    self.pos += 1;
                    if self.bytes.get(self.pos) != Some(&b'>') {
                        return Err(ProtocolError::xml(self.pos, "expected '>' after '/'"));
                    }
                    self.pos += 1;
                    return Ok(true);
                }
                Some(quote) if quote == b'"' || quote == b'\'' => {
                    self.pos += 1;
                    let close = if quote == b'"' { "\"" } else { "'" };
                    self.skip_past(close)?;
                }
                Some(_) => self.pos += 1,
            }
        }
    }

    fn parse_element(&mut self) -> Result<Element, ProtocolError> {
        if !self.starts_with("<") {
            return Err(ProtocolError::xml(self.pos, "expected '<'"));
        }
        self.pos += 1;
        let name = self.read_name()?;
        let self_closing = self.skip_attributes()?;

        let mut element = Element {
            name,
            children: Vec::new(),
        };
        if self_closing {
            return Ok(element);
        }

        loop {
            if self.pos >= self.bytes.len() {
                return Err(ProtocolError::xml(
                    self.pos,
                    format!("unexpected end of input inside <{}>", element.name),
                ));
            }

            if self.starts_with("</") {
                self.pos += 2;
                let end = self.read_name()?;
                if end != element.name {
                    return Err(ProtocolError::xml(
                        self.pos,
                        format!("mismatched </{}>, expected </{}>", end, element.name),
                    ));
                }
                self.skip_whitespace();
                if self.bytes.get(self.pos) != Some(&b'>') {
                    return Err(ProtocolError::xml(self.pos, "expected '>'"));
                }
                self.pos += 1;
                return Ok(element);
            } else if self.starts_with("<!--") {
                self.skip_past("-->")?;
            } else if self.starts_with("<![CDATA[") {
                self.pos += "<![CDATA[".len();
                let start = self.pos;
                let len = self
                    .find("]]>")
                    .ok_or_else(|| ProtocolError::xml(start, "unterminated CDATA section"))?;
                element
                    .children
                    .push(Node::Text(self.src[start..start + len].to_string()));
                self.pos = start + len + "]]>".len();
            } else if self.starts_with("<") {
                let child = self.parse_element()?;
                element.children.push(Node::Element(child));
            } else {
                let start = self.pos;
                let end = self.find("<").map(|i| start + i).unwrap_or(self.bytes.len());
                self.pos = end;
                element
                    .children
                    .push(Node::Text(unescape(&self.src[start..end], start)?));
            }
        }
    }
}

fn unescape(raw: &str, offset: usize) -> Result<String, ProtocolError> {
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let after = &rest[amp + 1..];
        let semi = after
            .find(';')
            .ok_or_else(|| ProtocolError::xml(offset, "unterminated entity reference"))?;
        let entity = &after[..semi];
        let decoded = match entity {
            "lt" => '<',
            "gt" => '>',
            "amp" => '&',
            "quot" => '"',
            "apos" => '\'',
            _ => {
                let code = if let Some(hex) = entity.strip_prefix("#x") {
                    u32::from_str_radix(hex, 16).ok()
                } else if let Some(dec) = entity.strip_prefix('#') {
                    dec.parse::<u32>().ok()
                } else {
                    None
                };
                code.and_then(char::from_u32).ok_or_else(|| {
                    ProtocolError::xml(offset, format!("unknown entity '&{};'", entity))
                })?
            }
        };
        out.push(decoded);
        rest = &after[semi + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

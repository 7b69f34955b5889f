// Copyright 2025 eraflo
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! LDAP-style filters over [`Properties`].
//!
//! Supported syntax:
//!
//! | Form | Meaning |
//! |---|---|
//! | `(key=value)` | equality |
//! | `(key~=value)` | approximate (case-insensitive) equality |
//! | `(key>=v)`, `(key<=v)`, `(key>v)`, `(key<v)` | ordering |
//! | `(key=*)` | presence |
//! | `(key=ab*cd*ef)` | substring |
//! | `(&(..)(..))`, `(\|(..)(..))`, `(!(..))` | boolean composition |
//!
//! `\` escapes the next character inside a value. Comparisons follow the type
//! of the stored property: longs and doubles compare numerically, versions by
//! version order, booleans by truth value, everything else lexically. A key
//! that is absent from the properties never matches.

use crate::error::{FrameworkError, Result};
use crate::properties::{parse_bool, Properties, PropertyValue};
use crate::version::Version;
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// The operator at a filter node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterOperand {
    /// `=`
    Equal,
    /// `~=`
    Approx,
    /// `>`
    Greater,
    /// `>=`
    GreaterEqual,
    /// `<`
    Less,
    /// `<=`
    LessEqual,
    /// `=*`
    Present,
    /// `=a*b`
    Substring,
    /// `&`
    And,
    /// `|`
    Or,
    /// `!`
    Not,
}

impl FilterOperand {
    fn symbol(self) -> &'static str {
        match self {
            FilterOperand::Equal | FilterOperand::Present | FilterOperand::Substring => "=",
            FilterOperand::Approx => "~=",
            FilterOperand::Greater => ">",
            FilterOperand::GreaterEqual => ">=",
            FilterOperand::Less => "<",
            FilterOperand::LessEqual => "<=",
            FilterOperand::And => "&",
            FilterOperand::Or => "|",
            FilterOperand::Not => "!",
        }
    }

    fn accepts(self, ordering: Ordering) -> bool {
        match self {
            FilterOperand::Equal | FilterOperand::Approx => ordering == Ordering::Equal,
            FilterOperand::Greater => ordering == Ordering::Greater,
            FilterOperand::GreaterEqual => ordering != Ordering::Less,
            FilterOperand::Less => ordering == Ordering::Less,
            FilterOperand::LessEqual => ordering != Ordering::Greater,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Node {
    And(Vec<Node>),
    Or(Vec<Node>),
    Not(Box<Node>),
    Present {
        attribute: String,
    },
    Substring {
        attribute: String,
        initial: Option<String>,
        any: Vec<String>,
        last: Option<String>,
    },
    Compare {
        attribute: String,
        operand: FilterOperand,
        value: String,
    },
}

/// A parsed LDAP filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Filter {
    root: Node,
}

impl Filter {
    /// Parses a filter string.
    ///
    /// Returns [`FrameworkError::IllegalArgument`] describing the first syntax
    /// error, with its byte position.
    pub fn parse(text: &str) -> Result<Self> {
        let mut parser = Parser::new(text);
        parser.skip_ws();
        let root = parser.parse_filter()?;
        parser.skip_ws();
        if !parser.at_end() {
            return Err(parser.error("unexpected trailing characters"));
        }
        Ok(Self { root })
    }

    /// Conjunction of several filters. A single filter is returned unchanged.
    pub fn all_of(filters: impl IntoIterator<Item = Filter>) -> Option<Filter> {
        let mut nodes: Vec<Node> = filters.into_iter().map(|f| f.root).collect();
        match nodes.len() {
            0 => None,
            1 => nodes.pop().map(|root| Filter { root }),
            _ => Some(Filter {
                root: Node::And(nodes),
            }),
        }
    }

    /// Equality filter `(attribute=value)`, escaping the value.
    pub fn equals(attribute: impl Into<String>, value: impl Into<String>) -> Filter {
        Filter {
            root: Node::Compare {
                attribute: attribute.into(),
                operand: FilterOperand::Equal,
                value: value.into(),
            },
        }
    }

    /// The operand at the root node.
    pub fn operand(&self) -> FilterOperand {
        match &self.root {
            Node::And(_) => FilterOperand::And,
            Node::Or(_) => FilterOperand::Or,
            Node::Not(_) => FilterOperand::Not,
            Node::Present { .. } => FilterOperand::Present,
            Node::Substring { .. } => FilterOperand::Substring,
            Node::Compare { operand, .. } => *operand,
        }
    }

    /// Evaluates the filter against a property set.
    pub fn matches(&self, properties: &Properties) -> bool {
        self.root.matches(properties)
    }
}

impl FromStr for Filter {
    type Err = FrameworkError;

    fn from_str(s: &str) -> Result<Self> {
        Filter::parse(s)
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.root.fmt(f)
    }
}

impl Node {
    fn matches(&self, properties: &Properties) -> bool {
        match self {
            Node::And(children) => children.iter().all(|c| c.matches(properties)),
            Node::Or(children) => children.iter().any(|c| c.matches(properties)),
            Node::Not(child) => !child.matches(properties),
            Node::Present { attribute } => properties.contains_key(attribute),
            Node::Substring {
                attribute,
                initial,
                any,
                last,
            } => properties.get(attribute).is_some_and(|value| {
                substring_matches(&value.to_string(), initial.as_deref(), any, last.as_deref())
            }),
            Node::Compare {
                attribute,
                operand,
                value,
            } => properties
                .get(attribute)
                .is_some_and(|stored| compare(stored, *operand, value)),
        }
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Node::And(children) | Node::Or(children) => {
                let op = if matches!(self, Node::And(_)) { '&' } else { '|' };
                write!(f, "({op}")?;
                for child in children {
                    child.fmt(f)?;
                }
                f.write_str(")")
            }
            Node::Not(child) => write!(f, "(!{child})"),
            Node::Present { attribute } => write!(f, "({attribute}=*)"),
            Node::Substring {
                attribute,
                initial,
                any,
                last,
            } => {
                write!(f, "({attribute}=")?;
                if let Some(initial) = initial {
                    f.write_str(&escape(initial))?;
                }
                f.write_str("*")?;
                for part in any {
                    write!(f, "{}*", escape(part))?;
                }
                if let Some(last) = last {
                    f.write_str(&escape(last))?;
                }
                f.write_str(")")
            }
            Node::Compare {
                attribute,
                operand,
                value,
            } => write!(f, "({attribute}{}{})", operand.symbol(), escape(value)),
        }
    }
}

fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '\\' | '*' | '(' | ')') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn substring_matches(text: &str, initial: Option<&str>, any: &[String], last: Option<&str>) -> bool {
    let mut rest = text;
    if let Some(initial) = initial {
        match rest.strip_prefix(initial) {
            Some(tail) => rest = tail,
            None => return false,
        }
    }
    for part in any {
        match rest.find(part.as_str()) {
            Some(pos) => rest = &rest[pos + part.len()..],
            None => return false,
        }
    }
    match last {
        Some(last) => rest.ends_with(last),
        None => true,
    }
}

fn compare(stored: &PropertyValue, operand: FilterOperand, text: &str) -> bool {
    let ordering = match stored {
        PropertyValue::Long(v) => match text.trim().parse::<i64>() {
            Ok(other) => Some(v.cmp(&other)),
            Err(_) => text
                .trim()
                .parse::<f64>()
                .ok()
                .and_then(|other| (*v as f64).partial_cmp(&other)),
        },
        PropertyValue::Double(v) => text
            .trim()
            .parse::<f64>()
            .ok()
            .and_then(|other| v.partial_cmp(&other)),
        PropertyValue::Bool(v) => parse_bool(text).map(|other| v.cmp(&other)),
        PropertyValue::Version(v) => Version::parse(text).ok().map(|other| v.cmp(&other)),
        PropertyValue::String(s) => {
            if operand == FilterOperand::Approx {
                return s.trim().eq_ignore_ascii_case(text.trim());
            }
            Some(s.as_str().cmp(text))
        }
    };
    match ordering {
        Some(ordering) => operand.accepts(ordering),
        // the value does not convert to the property's type; fall back to text
        None => {
            let stored = stored.to_string();
            if operand == FilterOperand::Approx {
                stored.trim().eq_ignore_ascii_case(text.trim())
            } else {
                operand.accepts(stored.as_str().cmp(text))
            }
        }
    }
}

/// Deepest nesting of `(` a filter may have. Parsing recurses once per level.
pub const MAX_FILTER_DEPTH: usize = 64;

struct Parser<'a> {
    text: &'a str,
    chars: Vec<(usize, char)>,
    pos: usize,
    depth: usize,
}

impl<'a> Parser<'a> {
    fn new(text: &'a str) -> Self {
        Self {
            text,
            chars: text.char_indices().collect(),
            pos: 0,
            depth: 0,
        }
    }

    fn at_end(&self) -> bool {
        self.pos >= self.chars.len()
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).map(|(_, c)| *c)
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek();
        if c.is_some() {
            self.pos += 1;
        }
        c
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
    }

    fn error(&self, what: &str) -> FrameworkError {
        let offset = self
            .chars
            .get(self.pos)
            .map(|(i, _)| *i)
            .unwrap_or(self.text.len());
        FrameworkError::illegal_argument(format!(
            "invalid filter '{}': {what} at position {offset}",
            self.text
        ))
    }

    fn expect(&mut self, expected: char) -> Result<()> {
        if self.peek() == Some(expected) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.error(&format!("expected '{expected}'")))
        }
    }

    fn parse_filter(&mut self) -> Result<Node> {
        if self.depth >= MAX_FILTER_DEPTH {
            return Err(self.error(&format!("nesting deeper than {MAX_FILTER_DEPTH}")));
        }
        self.depth += 1;
        let node = self.parse_nested();
        self.depth -= 1;
        node
    }

    fn parse_nested(&mut self) -> Result<Node> {
        self.expect('(')?;
        self.skip_ws();
        let node = match self.peek() {
            Some('&') => {
                self.bump();
                Node::And(self.parse_list()?)
            }
            Some('|') => {
                self.bump();
                Node::Or(self.parse_list()?)
            }
            Some('!') => {
                self.bump();
                self.skip_ws();
                Node::Not(Box::new(self.parse_filter()?))
            }
            Some(_) => self.parse_item()?,
            None => return Err(self.error("unexpected end of filter")),
        };
        self.skip_ws();
        self.expect(')')?;
        Ok(node)
    }

    fn parse_list(&mut self) -> Result<Vec<Node>> {
        let mut nodes = Vec::new();
        self.skip_ws();
        while self.peek() == Some('(') {
            nodes.push(self.parse_filter()?);
            self.skip_ws();
        }
        if nodes.is_empty() {
            return Err(self.error("empty operand list"));
        }
        Ok(nodes)
    }

    fn parse_item(&mut self) -> Result<Node> {
        let mut attribute = String::new();
        while let Some(c) = self.peek() {
            if matches!(c, '=' | '<' | '>' | '~' | '(' | ')') {
                break;
            }
            attribute.push(c);
            self.pos += 1;
        }
        let attribute = attribute.trim().to_string();
        if attribute.is_empty() {
            return Err(self.error("missing attribute"));
        }

        let operand = match self.peek() {
            Some('=') => {
                self.bump();
                FilterOperand::Equal
            }
            Some('~') => {
                self.bump();
                self.expect('=')?;
                FilterOperand::Approx
            }
            Some('>') => {
                self.bump();
                if self.peek() == Some('=') {
                    self.bump();
                    FilterOperand::GreaterEqual
                } else {
                    FilterOperand::Greater
                }
            }
            Some('<') => {
                self.bump();
                if self.peek() == Some('=') {
                    self.bump();
                    FilterOperand::LessEqual
                } else {
                    FilterOperand::Less
                }
            }
            _ => return Err(self.error("expected an operator")),
        };

        let parts = self.parse_value()?;
        if operand == FilterOperand::Equal && parts.len() > 1 {
            if parts.len() == 2 && parts.iter().all(String::is_empty) {
                return Ok(Node::Present { attribute });
            }
            let mut parts = parts;
            let last = parts.pop().filter(|s| !s.is_empty());
            let initial = Some(parts.remove(0)).filter(|s| !s.is_empty());
            let any = parts.into_iter().filter(|s| !s.is_empty()).collect();
            return Ok(Node::Substring {
                attribute,
                initial,
                any,
                last,
            });
        }
        Ok(Node::Compare {
            attribute,
            operand,
            value: parts.join("*"),
        })
    }

    /// Reads a value up to the closing parenthesis, split on unescaped `*`.
    fn parse_value(&mut self) -> Result<Vec<String>> {
        let mut parts = vec![String::new()];
        loop {
            match self.peek() {
                None => return Err(self.error("unterminated value")),
                Some(')') => break,
                Some('\\') => {
                    self.bump();
                    let escaped = self
                        .bump()
                        .ok_or_else(|| self.error("dangling escape"))?;
                    if let Some(current) = parts.last_mut() {
                        current.push(escaped);
                    }
                }
                Some('*') => {
                    self.bump();
                    parts.push(String::new());
                }
                Some(c) => {
                    self.bump();
                    if let Some(current) = parts.last_mut() {
                        current.push(c);
                    }
                }
            }
        }
        Ok(parts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn props() -> Properties {
        Properties::new()
            .with("objectClass", "calc")
            .with("service.ranking", 10)
            .with("ratio", 0.75)
            .with("enabled", true)
            .with("service.version", Version::new(1, 5, 0))
            .with("label", "Hello World")
    }

    fn check(filter: &str) -> bool {
        Filter::parse(filter).unwrap().matches(&props())
    }

    #[test]
    fn test_equality_and_absent_keys() {
        assert!(check("(objectClass=calc)"));
        assert!(!check("(objectClass=shell)"));
        assert!(!check("(missing=calc)"));
        assert!(check("(!(missing=calc))"));
    }

    #[test]
    fn test_numeric_comparisons_follow_property_type() {
        assert!(check("(service.ranking>=10)"));
        assert!(check("(service.ranking>9)"));
        assert!(!check("(service.ranking<10)"));
        // lexically "10" < "9" but the property is a long
        assert!(check("(service.ranking>9)"));
        assert!(check("(ratio<1)"));
        assert!(check("(ratio>=0.5)"));
    }

    #[test]
    fn test_version_and_bool_comparisons() {
        assert!(check("(service.version>=1.2)"));
        assert!(check("(service.version<2.0.0)"));
        assert!(!check("(service.version>1.5.0)"));
        assert!(check("(enabled=true)"));
        assert!(check("(enabled=TRUE)"));
        assert!(!check("(enabled=false)"));
    }

    #[test]
    fn test_presence_and_substring() {
        assert!(check("(label=*)"));
        assert!(!check("(nothing=*)"));
        assert!(check("(label=Hello*)"));
        assert!(check("(label=*World)"));
        assert!(check("(label=H*o W*d)"));
        assert!(!check("(label=*Moon*)"));
    }

    #[test]
    fn test_approx_is_case_insensitive() {
        assert!(check("(label~=hello world)"));
        assert!(!check("(label=hello world)"));
    }

    #[test]
    fn test_boolean_composition() {
        assert!(check("(&(objectClass=calc)(service.ranking>=5))"));
        assert!(!check("(&(objectClass=calc)(service.ranking>=50))"));
        assert!(check("(|(objectClass=shell)(service.ranking=10))"));
        assert!(check("(!(objectClass=shell))"));
        assert!(check(" ( & (objectClass=calc) (enabled=true) ) "));
    }

    #[test]
    fn test_escapes_in_values() {
        let props = Properties::new().with("expr", "a*b(c)");
        let filter = Filter::parse(r"(expr=a\*b\(c\))").unwrap();
        assert_eq!(filter.operand(), FilterOperand::Equal);
        assert!(filter.matches(&props));
        assert_eq!(filter.to_string(), r"(expr=a\*b\(c\))");
    }

    #[test]
    fn test_display_is_canonical() {
        let filter = Filter::parse("( &(a =1)(b=x*y*) (!(c=*)))").unwrap();
        assert_eq!(filter.to_string(), "(&(a=1)(b=x*y*)(!(c=*)))");
        let reparsed = Filter::parse(&filter.to_string()).unwrap();
        assert_eq!(reparsed, filter);
    }

    #[test]
    fn test_syntax_errors() {
        for bad in [
            "",
            "objectClass=calc",
            "(objectClass=calc",
            "(=calc)",
            "(&)",
            "(a~b)",
            "(a=1))",
            "(a=1\\",
            "(!)",
        ] {
            let err = Filter::parse(bad).unwrap_err();
            assert_eq!(err.status(), crate::error::Status::IllegalArgument, "{bad}");
        }
    }

    #[test]
    fn test_nesting_is_bounded() {
        let nested = |depth: usize| format!("{}(a=b){}", "(!".repeat(depth), ")".repeat(depth));
        assert!(Filter::parse(&nested(MAX_FILTER_DEPTH - 1)).is_ok());

        let err = Filter::parse(&nested(MAX_FILTER_DEPTH)).unwrap_err();
        assert_eq!(err.status(), crate::error::Status::IllegalArgument);
        assert!(err.to_string().contains("nesting"));

        let err = Filter::parse(&nested(100_000)).unwrap_err();
        assert_eq!(err.status(), crate::error::Status::IllegalArgument);
    }

    #[test]
    fn test_all_of_combines() {
        let combined = Filter::all_of(vec![
            Filter::equals("objectClass", "calc"),
            Filter::parse("(service.ranking>=10)").unwrap(),
        ])
        .unwrap();
        assert_eq!(combined.operand(), FilterOperand::And);
        assert!(combined.matches(&props()));
        assert!(Filter::all_of(Vec::new()).is_none());
    }
}

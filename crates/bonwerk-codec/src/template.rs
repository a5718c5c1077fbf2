// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Receipt templates.
//
// A template is a flat, ordered list of nodes: literal text, `{{key}}`
// variable references, `{{#key}}` ... `{{/key}}` conditional sections and
// embedded printer operations.  Rendering is pure and total: missing keys
// render as the empty string and malformed structure is tolerated (it is
// reported by `validate_template`, not by `render_template`).

use bonwerk_core::error::{BonwerkError, Result};
use bonwerk_core::ops::Op;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One template node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TemplateNode {
    Text(String),
    Variable(String),
    SectionStart(String),
    SectionEnd(String),
    /// A printer operation emitted verbatim (style changes, barcodes, cuts).
    Op(Op),
    /// A `{{` with no closing `}}`; rendered literally.
    Unterminated(String),
}

/// An ordered list of template nodes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Template {
    pub nodes: Vec<TemplateNode>,
}

/// A structural problem found by [`validate_template`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplateIssue {
    /// Variable or section name is empty or uses characters outside
    /// `[A-Za-z0-9_.-]`.
    BadName { node: usize, name: String },
    Unterminated { node: usize },
    UnclosedSection { node: usize, name: String },
    UnexpectedSectionEnd { node: usize, name: String },
    MismatchedSectionEnd {
        node: usize,
        expected: String,
        found: String,
    },
}

impl std::fmt::Display for TemplateIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BadName { node, name } => write!(f, "node {node}: bad name {name:?}"),
            Self::Unterminated { node } => write!(f, "node {node}: '{{{{' without '}}}}'"),
            Self::UnclosedSection { node, name } => {
                write!(f, "node {node}: section {name:?} is never closed")
            }
            Self::UnexpectedSectionEnd { node, name } => {
                write!(f, "node {node}: {{{{/{name}}}}} closes nothing")
            }
            Self::MismatchedSectionEnd {
                node,
                expected,
                found,
            } => write!(f, "node {node}: expected {{{{/{expected}}}}}, found {{{{/{found}}}}}"),
        }
    }
}

impl Template {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tokenize template source.  Never fails; see [`validate_template`].
    pub fn parse(source: &str) -> Self {
        let mut nodes = Vec::new();
        let mut rest = source;

        while let Some(open) = rest.find("{{") {
            if open > 0 {
                nodes.push(TemplateNode::Text(rest[..open].to_string()));
            }
            let after = &rest[open + 2..];
            match after.find("}}") {
                Some(close) => {
                    let tag = after[..close].trim();
                    nodes.push(match tag.chars().next() {
                        Some('#') => TemplateNode::SectionStart(tag[1..].trim().to_string()),
                        Some('/') => TemplateNode::SectionEnd(tag[1..].trim().to_string()),
                        _ => TemplateNode::Variable(tag.to_string()),
                    });
                    rest = &after[close + 2..];
                }
                None => {
                    nodes.push(TemplateNode::Unterminated(rest[open..].to_string()));
                    rest = "";
                }
            }
        }
        if !rest.is_empty() {
            nodes.push(TemplateNode::Text(rest.to_string()));
        }

        Self { nodes }
    }

    /// Parse and reject templates with structural issues.
    pub fn parse_validated(source: &str) -> Result<Self> {
        let template = Self::parse(source);
        let issues = validate_template(&template);
        if issues.is_empty() {
            Ok(template)
        } else {
            let joined: Vec<String> = issues.iter().map(ToString::to_string).collect();
            Err(BonwerkError::InvalidTemplate(joined.join("; ")))
        }
    }

    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.nodes.push(TemplateNode::Text(text.into()));
        self
    }

    pub fn var(mut self, key: impl Into<String>) -> Self {
        self.nodes.push(TemplateNode::Variable(key.into()));
        self
    }

    pub fn section(mut self, key: impl Into<String>, body: Template) -> Self {
        let key = key.into();
        self.nodes.push(TemplateNode::SectionStart(key.clone()));
        self.nodes.extend(body.nodes);
        self.nodes.push(TemplateNode::SectionEnd(key));
        self
    }

    pub fn op(mut self, op: Op) -> Self {
        self.nodes.push(TemplateNode::Op(op));
        self
    }

    /// Append the nodes of another template.
    pub fn extend(mut self, other: Template) -> Self {
        self.nodes.extend(other.nodes);
        self
    }
}

/// Check variable names and section balance.  Does not need data.
pub fn validate_template(template: &Template) -> Vec<TemplateIssue> {
    let mut issues = Vec::new();
    let mut open: Vec<(usize, &str)> = Vec::new();

    for (node, n) in template.nodes.iter().enumerate() {
        match n {
            TemplateNode::Variable(name) => {
                if !is_valid_name(name) {
                    issues.push(TemplateIssue::BadName {
                        node,
                        name: name.clone(),
                    });
                }
            }
            TemplateNode::SectionStart(name) => {
                if !is_valid_name(name) {
                    issues.push(TemplateIssue::BadName {
                        node,
                        name: name.clone(),
                    });
                }
                open.push((node, name));
            }
            TemplateNode::SectionEnd(name) => match open.pop() {
                Some((_, expected)) if expected == name => {}
                Some((start, expected)) => {
                    issues.push(TemplateIssue::MismatchedSectionEnd {
                        node,
                        expected: expected.to_string(),
                        found: name.clone(),
                    });
                    // Keep the outer section open so later ends still pair up.
                    open.push((start, expected));
                }
                None => issues.push(TemplateIssue::UnexpectedSectionEnd {
                    node,
                    name: name.clone(),
                }),
            },
            TemplateNode::Unterminated(_) => issues.push(TemplateIssue::Unterminated { node }),
            TemplateNode::Text(_) | TemplateNode::Op(_) => {}
        }
    }

    for (node, name) in open {
        issues.push(TemplateIssue::UnclosedSection {
            node,
            name: name.to_string(),
        });
    }
    issues
}

/// Render `template` against `data` into printer operations.
///
/// Adjacent text merges into one `Op::Text`; `\n` becomes `Op::LineFeed`.
pub fn render_template(template: &Template, data: &Value) -> Vec<Op> {
    let mut out = OpBuilder::default();
    // One entry per open section: its name and whether its body is emitted.
    let mut open: Vec<(&str, bool)> = Vec::new();

    for node in &template.nodes {
        let active = open.last().is_none_or(|&(_, emitting)| emitting);
        match node {
            TemplateNode::SectionStart(key) => {
                open.push((key.as_str(), active && is_truthy(lookup(data, key))));
            }
            // An end tag only closes the innermost section of the same
            // name, the same pairing `validate_template` reports against.
            TemplateNode::SectionEnd(key) => {
                if open.last().is_some_and(|&(name, _)| name == key.as_str()) {
                    open.pop();
                }
            }
            _ if !active => {}
            TemplateNode::Text(text) | TemplateNode::Unterminated(text) => out.text(text),
            TemplateNode::Variable(key) => out.text(&display_value(lookup(data, key))),
            TemplateNode::Op(op) => out.op(op.clone()),
        }
    }
    out.finish()
}

fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
}

/// Dotted keys walk into nested objects and arrays: `customer.name`,
/// `items.0.price`.
fn lookup<'a>(data: &'a Value, key: &str) -> Option<&'a Value> {
    if let Some(v) = data.get(key) {
        return Some(v);
    }
    key.split('.').try_fold(data, |v, part| match v {
        Value::Array(items) => items.get(part.parse::<usize>().ok()?),
        _ => v.get(part),
    })
}

fn is_truthy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().is_some_and(|f| f != 0.0),
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Array(a)) => !a.is_empty(),
        Some(Value::Object(o)) => !o.is_empty(),
    }
}

fn display_value(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

#[derive(Default)]
struct OpBuilder {
    ops: Vec<Op>,
    pending: String,
}

impl OpBuilder {
    fn text(&mut self, text: &str) {
        let mut lines = text.split('\n');
        if let Some(first) = lines.next() {
            self.pending.push_str(first);
        }
        for line in lines {
            self.flush();
            self.ops.push(Op::LineFeed);
            self.pending.push_str(line);
        }
    }

    fn op(&mut self, op: Op) {
        self.flush();
        self.ops.push(op);
    }

    fn flush(&mut self) {
        if !self.pending.is_empty() {
            self.ops.push(Op::Text(std::mem::take(&mut self.pending)));
        }
    }

    fn finish(mut self) -> Vec<Op> {
        self.flush();
        self.ops
    }
}

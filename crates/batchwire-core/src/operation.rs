//! A single embedded request unit and its wire encoding.

use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use serde_json::{Map, Value};

/// Escapes controls, spaces and the characters that would break the embedded
/// request line, while leaving URL-structural characters (`/ $ ( ) ' = , ?
/// & :`) intact.
const REQUEST_LINE_ESCAPE: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'<')
    .add(b'>')
    .add(b'`')
    .add(b'{')
    .add(b'}')
    .add(b'|')
    .add(b'\\')
    .add(b'^');

/// What an embedded request does. Closed set — every variant maps to exactly
/// one HTTP method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    /// Insert a new entity.
    Create,
    /// Patch changed fields of an existing entity.
    Update,
    /// Remove an existing entity.
    Delete,
    /// Invoke a bound or unbound action (side effects, params in body).
    Action,
    /// Invoke a function (no side effects, params in the URL, no body).
    Function,
}

impl OperationKind {
    /// The HTTP method written into the embedded request line.
    pub fn method(&self) -> &'static str {
        match self {
            Self::Create => "POST",
            Self::Update => "PATCH",
            Self::Delete => "DELETE",
            Self::Action => "POST",
            Self::Function => "GET",
        }
    }
}

/// One embedded request inside a changeset.
///
/// The content identifier is assigned exactly once, when the operation is
/// queued into a [`crate::changeset::ChangeSet`].
#[derive(Debug, Clone)]
pub struct Operation {
    kind: OperationKind,
    url: String,
    body: Option<Value>,
    content_id: Option<String>,
}

impl Operation {
    pub fn new(kind: OperationKind, url: impl Into<String>, body: Option<Value>) -> Self {
        Self {
            kind,
            url: url.into(),
            body,
            content_id: None,
        }
    }

    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn body(&self) -> Option<&Value> {
        self.body.as_ref()
    }

    pub fn content_id(&self) -> Option<&str> {
        self.content_id.as_deref()
    }

    pub(crate) fn assign_content_id(&mut self, id: String) {
        debug_assert!(self.content_id.is_none(), "content id assigned twice");
        self.content_id = Some(id);
    }

    /// Render the embedded HTTP message: per-operation MIME headers, blank
    /// line, request line, embedded headers, blank line, pretty JSON body
    /// (omitted entirely when bodiless). Lines joined with `\n`; the outer
    /// payload builder normalizes to CRLF.
    pub fn encode(&self, host: &str) -> String {
        let mut lines = vec![
            "Content-Type: application/http".to_string(),
            "Content-Transfer-Encoding: binary".to_string(),
            format!("Content-ID: {}", self.content_id.as_deref().unwrap_or_default()),
            String::new(),
            format!(
                "{} {} HTTP/1.1",
                self.kind.method(),
                utf8_percent_encode(&self.url, REQUEST_LINE_ESCAPE)
            ),
            format!("Host: {host}"),
            "Content-Type: application/json;type=entry".to_string(),
            String::new(),
        ];
        if let Some(body) = &self.body {
            // original wire format: 2-space-indented JSON
            lines.push(serde_json::to_string_pretty(body).unwrap_or_default());
        }
        lines.join("\n")
    }
}

/// Which flavor of invocation a [`CallTarget`] is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    Action,
    Function,
}

/// An action or function invocation to queue into a batch.
///
/// Actions POST their parameters as a JSON body; functions inline them into
/// the URL as `Name(k=v,...)` and send no body.
#[derive(Debug, Clone)]
pub struct CallTarget {
    name: String,
    kind: CallKind,
    params: Map<String, Value>,
}

impl CallTarget {
    pub fn action(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: CallKind::Action,
            params: Map::new(),
        }
    }

    pub fn function(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: CallKind::Function,
            params: Map::new(),
        }
    }

    /// Add a call parameter (builder style).
    pub fn param(mut self, name: impl Into<String>, value: Value) -> Self {
        self.params.insert(name.into(), value);
        self
    }

    pub fn kind(&self) -> CallKind {
        self.kind
    }

    pub(crate) fn into_operation(self) -> Operation {
        match self.kind {
            CallKind::Action => {
                let body = if self.params.is_empty() {
                    None
                } else {
                    Some(Value::Object(self.params))
                };
                Operation::new(OperationKind::Action, format!("/{}", self.name), body)
            }
            CallKind::Function => {
                let args = self
                    .params
                    .iter()
                    .map(|(k, v)| format!("{k}={}", literal(v)))
                    .collect::<Vec<_>>()
                    .join(",");
                Operation::new(
                    OperationKind::Function,
                    format!("/{}({args})", self.name),
                    None,
                )
            }
        }
    }
}

/// Render a parameter value as a URL literal: strings in single quotes with
/// embedded quotes doubled, everything else as compact JSON.
fn literal(value: &Value) -> String {
    match value {
        Value::String(s) => format!("'{}'", s.replace('\'', "''")),
        other => other.to_string(),
    }
}

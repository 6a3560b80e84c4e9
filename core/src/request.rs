//! Per-call request descriptions as plain data.
//!
//! # Design
//! A `Descriptor` is the immutable value a generated service method hands to
//! the engine: method, URL template, parameter maps, payload, and per-status
//! error messages. All fields are owned plain data so a descriptor can be
//! moved into the transport task without lifetime concerns. Construction is
//! either a struct literal or the chainable `with_*` helpers the generated
//! callers use; once handed to the engine a descriptor is never mutated.

use std::collections::BTreeMap;
use std::fmt;

use serde_json::Value;

/// HTTP method for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Method {
    #[default]
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Head,
    Options,
}

impl Method {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
            Method::Head => "HEAD",
            Method::Options => "OPTIONS",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One query parameter value.
///
/// `Absent` is how an optional filter that was not supplied stays off the
/// wire entirely — distinct from `Scalar("")`, which serializes as an
/// explicit empty string.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryValue {
    Scalar(String),
    List(Vec<String>),
    Absent,
}

impl From<&str> for QueryValue {
    fn from(value: &str) -> Self {
        QueryValue::Scalar(value.to_string())
    }
}

impl From<String> for QueryValue {
    fn from(value: String) -> Self {
        QueryValue::Scalar(value)
    }
}

macro_rules! scalar_query_value {
    ($($t:ty),*) => {$(
        impl From<$t> for QueryValue {
            fn from(value: $t) -> Self {
                QueryValue::Scalar(value.to_string())
            }
        }
    )*};
}

scalar_query_value!(bool, i32, i64, u16, u32, u64, f64);

impl From<Vec<String>> for QueryValue {
    fn from(values: Vec<String>) -> Self {
        QueryValue::List(values)
    }
}

impl From<Vec<&str>> for QueryValue {
    fn from(values: Vec<&str>) -> Self {
        QueryValue::List(values.into_iter().map(str::to_string).collect())
    }
}

/// `None` maps to `Absent`: an unspecified optional never reaches the wire.
impl<T: Into<QueryValue>> From<Option<T>> for QueryValue {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(v) => v.into(),
            None => QueryValue::Absent,
        }
    }
}

/// One multipart form field: inline text or a file-like part.
#[derive(Debug, Clone, PartialEq)]
pub enum FormValue {
    Text(String),
    File {
        file_name: String,
        content_type: Option<String>,
        data: Vec<u8>,
    },
}

/// Immutable description of one API call.
///
/// `url` is a template with `{name}` placeholders resolved from `path`;
/// `query` pairs keep their declared order. Exactly one payload is allowed:
/// `body` (JSON, content type from `media_type`) or `form` (multipart).
/// `errors` maps response status codes to caller-facing messages.
#[derive(Debug, Clone, Default)]
pub struct Descriptor {
    pub method: Method,
    pub url: String,
    pub path: BTreeMap<String, String>,
    pub query: Vec<(String, QueryValue)>,
    pub body: Option<Value>,
    pub media_type: Option<String>,
    pub form: Vec<(String, FormValue)>,
    pub headers: Vec<(String, String)>,
    pub errors: BTreeMap<u16, String>,
}

impl Descriptor {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            ..Self::default()
        }
    }

    pub fn with_path(mut self, name: impl Into<String>, value: impl ToString) -> Self {
        self.path.insert(name.into(), value.to_string());
        self
    }

    pub fn with_query(mut self, name: impl Into<String>, value: impl Into<QueryValue>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_media_type(mut self, media_type: impl Into<String>) -> Self {
        self.media_type = Some(media_type.into());
        self
    }

    pub fn with_form_field(mut self, name: impl Into<String>, value: FormValue) -> Self {
        self.form.push((name.into(), value));
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_error(mut self, status: u16, message: impl Into<String>) -> Self {
        self.errors.insert(status, message.into());
        self
    }
}

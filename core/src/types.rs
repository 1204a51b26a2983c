//! Declarative options accepted by the action handlers.
//!
//! # Design
//! Options arrive from the host as loose JSON. They are deserialized into
//! these types with `deny_unknown_fields` everywhere, so structural checks
//! (unknown keys, enum membership, value shapes) fall out of serde. Checks
//! serde cannot express (exactly one body variant, at least one destination
//! per response block) live in `TryFrom` conversions or in `validation`.
//!
//! The request body is a sum type with exactly one active variant; the raw
//! "object with optional keys" shape only exists inside this module.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::http::HttpMethod;

/// Complete options object of one invocation.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ActionOptions {
    pub request: RequestSpec,
    #[serde(default)]
    pub response: Option<ResponseSpec>,
}

/// What to send.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RequestSpec {
    pub method: HttpMethod,
    pub url: String,
    #[serde(default)]
    pub query: BTreeMap<String, ParamValue>,
    #[serde(default)]
    pub headers: BTreeMap<String, Scalar>,
    #[serde(default)]
    pub body: Option<RequestBody>,
    /// Seconds; falls back to the configured default when absent.
    #[serde(default)]
    pub timeout: Option<f64>,
}

impl RequestSpec {
    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&Scalar> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value)
    }

    pub fn has_header(&self, name: &str) -> bool {
        self.header(name).is_some()
    }
}

/// A JSON scalar as it may appear in headers, query strings and form fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Bool(bool),
    Number(serde_json::Number),
    Text(String),
    Null,
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Bool(b) => write!(f, "{b}"),
            Scalar::Number(n) => write!(f, "{n}"),
            Scalar::Text(s) => f.write_str(s),
            Scalar::Null => Ok(()),
        }
    }
}

/// Query parameter or form field value: a scalar or a list of scalars.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    One(Scalar),
    Many(Vec<Scalar>),
}

impl ParamValue {
    /// Lists are joined with commas: `['no', 1]` becomes `no,1`.
    pub fn joined(&self) -> String {
        match self {
            ParamValue::One(value) => value.to_string(),
            ParamValue::Many(values) => values
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(","),
        }
    }

    /// Every value separately, for encodings that repeat the key.
    pub fn values(&self) -> Vec<String> {
        match self {
            ParamValue::One(value) => vec![value.to_string()],
            ParamValue::Many(values) => values.iter().map(ToString::to_string).collect(),
        }
    }
}

/// Request payload. Exactly one variant is ever set.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "RawBody")]
pub enum RequestBody {
    /// Literal JSON value (`inline`, or `json` in the generic handler).
    Inline(Value),
    /// Payload read from a file relative to the working directory.
    File(FileRef),
    /// `application/x-www-form-urlencoded` fields.
    UrlencodedForm(BTreeMap<String, ParamValue>),
    /// `multipart/form-data` fields and file attachments.
    MultipartForm(MultipartForm),
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum FileRef {
    Path(String),
    Descriptor(FileDescriptor),
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct FileDescriptor {
    pub path: String,
    #[serde(default)]
    pub template: bool,
}

impl FileRef {
    pub fn path(&self) -> &str {
        match self {
            FileRef::Path(path) => path,
            FileRef::Descriptor(descriptor) => &descriptor.path,
        }
    }

    pub fn is_template(&self) -> bool {
        match self {
            FileRef::Path(_) => false,
            FileRef::Descriptor(descriptor) => descriptor.template,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct MultipartForm {
    pub fields: BTreeMap<String, ParamValue>,
    /// Field name to file path, relative to the working directory.
    pub files: BTreeMap<String, String>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawBody {
    #[serde(default, alias = "json")]
    inline: Option<Value>,
    #[serde(default)]
    file: Option<FileRef>,
    #[serde(default)]
    form: Option<RawForm>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawForm {
    #[serde(default)]
    multipart: Option<RawMultipart>,
    #[serde(default)]
    urlencoded: Option<BTreeMap<String, ParamValue>>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawMultipart {
    #[serde(default)]
    fields: Option<BTreeMap<String, ParamValue>>,
    #[serde(default)]
    files: Option<BTreeMap<String, String>>,
}

impl TryFrom<RawBody> for RequestBody {
    type Error = String;

    fn try_from(raw: RawBody) -> Result<Self, Self::Error> {
        let set = [raw.inline.is_some(), raw.file.is_some(), raw.form.is_some()]
            .iter()
            .filter(|present| **present)
            .count();
        if set != 1 {
            return Err(format!(
                "body must contain exactly one of `inline`, `json`, `file`, `form`, got {set}"
            ));
        }

        if let Some(inline) = raw.inline {
            return Ok(RequestBody::Inline(inline));
        }
        if let Some(file) = raw.file {
            if file.path().is_empty() {
                return Err("body.file path must not be empty".to_string());
            }
            return Ok(RequestBody::File(file));
        }

        let form = raw.form.ok_or_else(|| "body.form is missing".to_string())?;
        match (form.multipart, form.urlencoded) {
            (Some(multipart), None) => {
                if multipart.fields.is_none() && multipart.files.is_none() {
                    return Err("body.form.multipart must contain `fields` or `files`".to_string());
                }
                let fields = multipart.fields.unwrap_or_default();
                if fields.values().any(|v| matches!(v, ParamValue::Many(items) if items.is_empty())) {
                    return Err("body.form.multipart.fields arrays must not be empty".to_string());
                }
                let files = multipart.files.unwrap_or_default();
                if let Some((name, _)) = files.iter().find(|(_, path)| path.is_empty()) {
                    return Err(format!("body.form.multipart.files.{name} must not be empty"));
                }
                Ok(RequestBody::MultipartForm(MultipartForm { fields, files }))
            }
            (None, Some(urlencoded)) => Ok(RequestBody::UrlencodedForm(urlencoded)),
            _ => Err("body.form must contain exactly one of `multipart`, `urlencoded`".to_string()),
        }
    }
}

/// Where each facet of the response goes.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct ResponseSpec {
    #[serde(default)]
    pub status_code: Option<StatusCodeRoute>,
    #[serde(default)]
    pub headers: Option<ValueRoute>,
    #[serde(default)]
    pub body: Option<BodyRoute>,
}

impl ResponseSpec {
    pub fn successful_codes(&self) -> Option<&[u16]> {
        self.status_code
            .as_ref()
            .and_then(|route| route.successful.as_deref())
    }

    pub fn save_to(&self) -> Option<&str> {
        self.body.as_ref().and_then(|body| body.save_to.as_deref())
    }
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct StatusCodeRoute {
    /// Overrides the default `< 300` success rule when present.
    #[serde(default)]
    pub successful: Option<Vec<u16>>,
    #[serde(default)]
    pub assign_to: Option<Destination>,
    #[serde(default)]
    pub push_to: Option<Destination>,
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct ValueRoute {
    #[serde(default)]
    pub assign_to: Option<Destination>,
    #[serde(default)]
    pub push_to: Option<Destination>,
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct BodyRoute {
    #[serde(default)]
    pub assign_to: Option<Destination>,
    #[serde(default)]
    pub push_to: Option<Destination>,
    #[serde(default)]
    pub save_to: Option<String>,
}

impl BodyRoute {
    pub fn wants_content(&self) -> bool {
        self.assign_to.is_some() || self.push_to.is_some()
    }
}

/// A context destination: a bare `$.ctx.path` style locator or the object
/// form naming the scope explicitly.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum Destination {
    Locator(String),
    Target(DestinationTarget),
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct DestinationTarget {
    #[serde(default)]
    pub ctx: Option<String>,
    #[serde(default)]
    pub secrets: Option<String>,
    #[serde(default)]
    pub parameters: Option<String>,
    #[serde(default, rename = "override")]
    pub override_existing: bool,
    #[serde(default)]
    pub children: bool,
    #[serde(default, rename = "as", alias = "encoding")]
    pub encoding: Option<BodyEncoding>,
}

impl Destination {
    pub fn override_existing(&self) -> bool {
        match self {
            Destination::Locator(_) => false,
            Destination::Target(target) => target.override_existing,
        }
    }

    pub fn children(&self) -> bool {
        match self {
            Destination::Locator(_) => false,
            Destination::Target(target) => target.children,
        }
    }

    /// Encoding for raw body content; base64 unless the object form says otherwise.
    pub fn encoding(&self) -> BodyEncoding {
        match self {
            Destination::Locator(_) => BodyEncoding::Base64,
            Destination::Target(target) => target.encoding.unwrap_or_default(),
        }
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Destination::Locator(locator) => f.write_str(locator),
            Destination::Target(target) => {
                let scopes = [
                    ("ctx", &target.ctx),
                    ("secrets", &target.secrets),
                    ("parameters", &target.parameters),
                ];
                let described: Vec<String> = scopes
                    .iter()
                    .filter_map(|(scope, path)| path.as_ref().map(|p| format!("{scope}:{p}")))
                    .collect();
                f.write_str(&described.join(","))
            }
        }
    }
}

/// How raw body bytes are turned into a context value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BodyEncoding {
    #[default]
    Base64,
    Hex,
    Utf8,
    Json,
}

impl fmt::Display for BodyEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BodyEncoding::Base64 => "base64",
            BodyEncoding::Hex => "hex",
            BodyEncoding::Utf8 => "utf8",
            BodyEncoding::Json => "json",
        };
        f.write_str(name)
    }
}

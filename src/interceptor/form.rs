//! Request and multipart form model shared by the transports.

use crate::file::UploadFile;
use bytes::Bytes;
use reqwest::multipart::{Form, Part};

/// One multipart field value.
#[derive(Debug, Clone)]
pub enum FormValue {
    Text(String),
    File(UploadFile),
}

/// An ordered multipart form. Field order is preserved on rewrite.
#[derive(Debug, Clone, Default)]
pub struct MultipartForm {
    fields: Vec<(String, FormValue)>,
}

impl MultipartForm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.append(name, FormValue::Text(value.into()));
        self
    }

    pub fn file(mut self, name: impl Into<String>, file: UploadFile) -> Self {
        self.append(name, FormValue::File(file));
        self
    }

    pub fn append(&mut self, name: impl Into<String>, value: FormValue) {
        self.fields.push((name.into(), value));
    }

    pub fn fields(&self) -> &[(String, FormValue)] {
        &self.fields
    }

    pub fn into_fields(self) -> Vec<(String, FormValue)> {
        self.fields
    }

    /// `(field name, file)` for every file field, in order.
    pub fn files(&self) -> impl Iterator<Item = (&str, &UploadFile)> {
        self.fields.iter().filter_map(|(name, value)| match value {
            FormValue::File(file) => Some((name.as_str(), file)),
            FormValue::Text(_) => None,
        })
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Convert into a `reqwest` form for a real send.
    pub fn into_reqwest(self) -> Form {
        self.fields
            .into_iter()
            .fold(Form::new(), |form, (name, value)| match value {
                FormValue::Text(text) => form.text(name, text),
                FormValue::File(file) => form.part(name, file_part(&file)),
            })
    }
}

fn file_part(file: &UploadFile) -> Part {
    let part = || Part::bytes(file.bytes().to_vec()).file_name(file.name().to_string());
    // An unparsable media type is sent without a Content-Type.
    part().mime_str(file.media_type()).unwrap_or_else(|_| part())
}

/// A request body as handed to a transport.
#[derive(Debug, Clone, Default)]
pub enum RequestBody {
    #[default]
    Empty,
    Text(String),
    Bytes(Bytes),
    Multipart(MultipartForm),
}

/// A request as seen at the network entry points.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub method: String,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: RequestBody,
}

impl UploadRequest {
    pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            url: url.into(),
            headers: Vec::new(),
            body: RequestBody::Empty,
        }
    }

    /// A `POST` carrying `form`.
    pub fn multipart(url: impl Into<String>, form: MultipartForm) -> Self {
        Self::new("POST", url).with_body(RequestBody::Multipart(form))
    }

    pub fn with_body(mut self, body: RequestBody) -> Self {
        self.body = body;
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn form(&self) -> Option<&MultipartForm> {
        match &self.body {
            RequestBody::Multipart(form) => Some(form),
            _ => None,
        }
    }

    pub fn is_multipart(&self) -> bool {
        self.form().is_some()
    }
}

/// What came back from the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    pub status: u16,
    pub body: Bytes,
}

impl TransportResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

//! Request descriptors
//!
//! A descriptor is built once per logical call and turned into a fresh
//! `reqwest` request for every attempt, so retries and 401 replays resend the
//! exact same method, path, query and body.

use crate::error::Result;
use reqwest::header::{HeaderValue, CONTENT_TYPE};
use reqwest::multipart::{Form, Part};
use reqwest::{Method, RequestBuilder};
use serde::Serialize;
use serde_json::Value;

pub const APPLICATION_JSON: &str = "application/json";
pub const MULTIPART_FORM_DATA: &str = "multipart/form-data";

#[derive(Debug, Clone)]
pub enum RequestBody {
    Empty,
    Json(Value),
    Multipart(MultipartBody),
}

/// A single field of a multipart upload
#[derive(Debug, Clone)]
pub enum FormPart {
    Text(String),
    File {
        file_name: String,
        mime_type: String,
        bytes: Vec<u8>,
    },
}

/// Multipart form kept in replayable form; `reqwest::multipart::Form` is single-use.
#[derive(Debug, Clone, Default)]
pub struct MultipartBody {
    parts: Vec<(String, FormPart)>,
}

impl MultipartBody {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.parts.push((name.into(), FormPart::Text(value.into())));
        self
    }

    pub fn file(
        mut self,
        name: impl Into<String>,
        file_name: impl Into<String>,
        mime_type: impl Into<String>,
        bytes: impl Into<Vec<u8>>,
    ) -> Self {
        self.parts.push((
            name.into(),
            FormPart::File {
                file_name: file_name.into(),
                mime_type: mime_type.into(),
                bytes: bytes.into(),
            },
        ));
        self
    }

    pub fn parts(&self) -> &[(String, FormPart)] {
        &self.parts
    }

    fn to_form(&self) -> Result<Form> {
        let mut form = Form::new();
        for (name, part) in &self.parts {
            form = match part {
                FormPart::Text(value) => form.text(name.clone(), value.clone()),
                FormPart::File {
                    file_name,
                    mime_type,
                    bytes,
                } => {
                    let part = Part::bytes(bytes.clone())
                        .file_name(file_name.clone())
                        .mime_str(mime_type)?;
                    form.part(name.clone(), part)
                }
            };
        }
        Ok(form)
    }
}

/// Endpoint + method + optional body of one logical API call
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub(crate) method: Method,
    pub(crate) endpoint: String,
    pub(crate) query: Vec<(String, String)>,
    pub(crate) body: RequestBody,
    pub(crate) refresh_on_unauthorized: bool,
}

impl ApiRequest {
    pub fn new(method: Method, endpoint: impl Into<String>) -> Self {
        Self {
            method,
            endpoint: endpoint.into(),
            query: Vec::new(),
            body: RequestBody::Empty,
            refresh_on_unauthorized: true,
        }
    }

    pub fn get(endpoint: impl Into<String>) -> Self {
        Self::new(Method::GET, endpoint)
    }

    pub fn post(endpoint: impl Into<String>) -> Self {
        Self::new(Method::POST, endpoint)
    }

    pub fn put(endpoint: impl Into<String>) -> Self {
        Self::new(Method::PUT, endpoint)
    }

    pub fn delete(endpoint: impl Into<String>) -> Self {
        Self::new(Method::DELETE, endpoint)
    }

    pub fn query(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.query.push((key.into(), value.to_string()));
        self
    }

    pub fn json<T: Serialize + ?Sized>(mut self, body: &T) -> Result<Self> {
        self.body = RequestBody::Json(serde_json::to_value(body)?);
        Ok(self)
    }

    pub fn multipart(mut self, form: MultipartBody) -> Self {
        self.body = RequestBody::Multipart(form);
        self
    }

    /// Do not attempt a token refresh when this call comes back 401.
    ///
    /// Used for the calls that establish or end a session.
    pub fn without_refresh(mut self) -> Self {
        self.refresh_on_unauthorized = false;
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn body(&self) -> &RequestBody {
        &self.body
    }

    pub fn content_type(&self) -> &'static str {
        match self.body {
            RequestBody::Multipart(_) => MULTIPART_FORM_DATA,
            _ => APPLICATION_JSON,
        }
    }

    /// Attach query, body and content type to a builder for one attempt.
    pub(crate) fn apply(&self, mut builder: RequestBuilder) -> Result<RequestBuilder> {
        if !self.query.is_empty() {
            builder = builder.query(&self.query);
        }
        builder = match &self.body {
            RequestBody::Empty => {
                builder.header(CONTENT_TYPE, HeaderValue::from_static(APPLICATION_JSON))
            }
            RequestBody::Json(value) => builder.json(value),
            // reqwest sets multipart/form-data with the boundary itself
            RequestBody::Multipart(form) => builder.multipart(form.to_form()?),
        };
        Ok(builder)
    }
}

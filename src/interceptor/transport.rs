//! The two network entry points and their `reqwest` implementations.
//!
//! [`FetchTransport`] is promise style: the caller awaits the response.
//! [`XhrTransport`] is callback style: `send` returns at once and the
//! response is delivered to a callback, which is what lets the interceptor
//! hold a send back until sanitization has finished.

use super::form::{RequestBody, TransportResponse, UploadRequest};
use crate::error::TransportError;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// Awaitable transport.
#[async_trait]
pub trait FetchTransport: Send + Sync {
    async fn fetch(&self, request: UploadRequest) -> Result<TransportResponse, TransportError>;
}

/// Completion callback of a callback-style send.
pub type SendCallback = Box<dyn FnOnce(Result<TransportResponse, TransportError>) + Send>;

/// Whether a callback-style send went out right away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendDisposition {
    Sent,
    /// The request will be sent later, from a background task.
    Deferred,
}

/// Non-awaitable transport.
pub trait XhrTransport: Send + Sync {
    fn send(&self, request: UploadRequest, on_done: SendCallback) -> SendDisposition;
}

/// Open/send request object on top of an [`XhrTransport`].
pub struct XhrRequest {
    transport: Arc<dyn XhrTransport>,
    opened: Option<(String, String)>,
    headers: Vec<(String, String)>,
}

impl XhrRequest {
    pub fn new(transport: Arc<dyn XhrTransport>) -> Self {
        Self {
            transport,
            opened: None,
            headers: Vec::new(),
        }
    }

    pub fn open(&mut self, method: impl Into<String>, url: impl Into<String>) {
        self.opened = Some((method.into(), url.into()));
    }

    pub fn set_request_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.push((name.into(), value.into()));
    }

    /// The URL given to `open`, if any.
    pub fn url(&self) -> Option<&str> {
        self.opened.as_ref().map(|(_, url)| url.as_str())
    }

    pub fn send(
        self,
        body: RequestBody,
        on_done: SendCallback,
    ) -> Result<SendDisposition, TransportError> {
        let (method, url) = self.opened.ok_or(TransportError::NotOpened)?;
        let request = UploadRequest {
            method,
            url,
            headers: self.headers,
            body,
        };
        Ok(self.transport.send(request, on_done))
    }
}

/// [`FetchTransport`] over a `reqwest::Client`.
#[derive(Debug, Clone, Default)]
pub struct ReqwestFetch {
    client: reqwest::Client,
}

impl ReqwestFetch {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl FetchTransport for ReqwestFetch {
    async fn fetch(&self, request: UploadRequest) -> Result<TransportResponse, TransportError> {
        execute(&self.client, request).await
    }
}

/// [`XhrTransport`] over a `reqwest::Client`; sends on a spawned task.
#[derive(Debug, Clone, Default)]
pub struct ReqwestXhr {
    client: reqwest::Client,
}

impl ReqwestXhr {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl XhrTransport for ReqwestXhr {
    fn send(&self, request: UploadRequest, on_done: SendCallback) -> SendDisposition {
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let client = self.client.clone();
                handle.spawn(async move { on_done(execute(&client, request).await) });
            }
            Err(e) => on_done(Err(TransportError::RequestFailed {
                url: request.url,
                reason: format!("no async runtime: {e}"),
            })),
        }
        SendDisposition::Sent
    }
}

async fn execute(
    client: &reqwest::Client,
    request: UploadRequest,
) -> Result<TransportResponse, TransportError> {
    let method = reqwest::Method::from_bytes(request.method.as_bytes())
        .map_err(|_| TransportError::InvalidMethod(request.method.clone()))?;
    let url = request.url;
    let multipart = matches!(request.body, RequestBody::Multipart(_));

    let mut builder = client.request(method, &url);
    for (name, value) in request.headers {
        // reqwest writes the multipart boundary header itself.
        if multipart && name.eq_ignore_ascii_case("content-type") {
            continue;
        }
        builder = builder.header(name, value);
    }
    builder = match request.body {
        RequestBody::Empty => builder,
        RequestBody::Text(text) => builder.body(text),
        RequestBody::Bytes(bytes) => builder.body(bytes),
        RequestBody::Multipart(form) => builder.multipart(form.into_reqwest()),
    };

    let failed = |e: reqwest::Error| TransportError::RequestFailed {
        url: url.clone(),
        reason: e.to_string(),
    };
    let response = builder.send().await.map_err(failed)?;
    let status = response.status().as_u16();
    let body = response.bytes().await.map_err(failed)?;
    debug!("{} → HTTP {} ({} bytes)", url, status, body.len());
    Ok(TransportResponse { status, body })
}

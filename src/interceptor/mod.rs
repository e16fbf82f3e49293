//! Upload interception at the network entry points.
//!
//! [`TransportSlots`] holds the page's two transports. Installing a
//! [`TransportInterceptor`] swaps both for wrappers that inspect outgoing
//! multipart bodies, sanitize PDFs coming from marked inputs, and forward a
//! rebuilt form with every field in its original position.
//!
//! Sanitization problems never fail a request: whatever the pipeline
//! returns (the reconstruction or the original) is what gets uploaded.

pub mod form;
pub mod transport;

pub use form::{FormValue, MultipartForm, RequestBody, TransportResponse, UploadRequest};
pub use transport::{
    FetchTransport, ReqwestFetch, ReqwestXhr, SendCallback, SendDisposition, XhrRequest,
    XhrTransport,
};

use crate::binder::is_marked;
use crate::dom::NodeId;
use crate::error::{ConfigError, InterceptError, TransportError};
use crate::file::UploadFile;
use crate::service::SanitizeService;
use crate::sync::{rw_read, rw_write};
use async_trait::async_trait;
use regex::RegexSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

/// The page's network entry points.
pub struct TransportSlots {
    fetch: RwLock<Arc<dyn FetchTransport>>,
    xhr: RwLock<Arc<dyn XhrTransport>>,
    installed: AtomicBool,
}

impl TransportSlots {
    pub fn new(fetch: Arc<dyn FetchTransport>, xhr: Arc<dyn XhrTransport>) -> Self {
        Self {
            fetch: RwLock::new(fetch),
            xhr: RwLock::new(xhr),
            installed: AtomicBool::new(false),
        }
    }

    /// Both entry points backed by one `reqwest` client.
    pub fn reqwest(client: reqwest::Client) -> Self {
        Self::new(
            Arc::new(ReqwestFetch::new(client.clone())),
            Arc::new(ReqwestXhr::new(client)),
        )
    }

    pub fn fetch(&self) -> Arc<dyn FetchTransport> {
        Arc::clone(&rw_read(&self.fetch, "slots.fetch"))
    }

    pub fn xhr(&self) -> Arc<dyn XhrTransport> {
        Arc::clone(&rw_read(&self.xhr, "slots.xhr"))
    }

    /// A new open/send request on the current callback transport.
    pub fn open(&self, method: impl Into<String>, url: impl Into<String>) -> XhrRequest {
        let mut request = XhrRequest::new(self.xhr());
        request.open(method, url);
        request
    }

    /// Send through the current fetch transport.
    pub async fn send(&self, request: UploadRequest) -> Result<TransportResponse, TransportError> {
        self.fetch().fetch(request).await
    }

    pub fn is_installed(&self) -> bool {
        self.installed.load(Ordering::SeqCst)
    }
}

/// Rewrites upload requests so marked PDFs are replaced by their
/// reconstructions.
pub struct TransportInterceptor {
    service: SanitizeService,
    upload_matcher: RegexSet,
    log_errors: bool,
}

impl TransportInterceptor {
    pub fn new(service: SanitizeService) -> Result<Self, ConfigError> {
        let config = service.pipeline().config();
        let upload_matcher = config.upload_matcher()?;
        let log_errors = config.log_errors;
        Ok(Self {
            service,
            upload_matcher,
            log_errors,
        })
    }

    /// Wrap both transports in `slots`. Only the first install succeeds.
    pub fn install(self: &Arc<Self>, slots: &TransportSlots) -> Result<(), InterceptError> {
        slots
            .installed
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|_| InterceptError::AlreadyInstalled)?;

        {
            let mut fetch = rw_write(&slots.fetch, "slots.install_fetch");
            let inner = Arc::clone(&fetch);
            *fetch = Arc::new(InterceptedFetch {
                inner,
                interceptor: Arc::clone(self),
            });
        }
        {
            let mut xhr = rw_write(&slots.xhr, "slots.install_xhr");
            let inner = Arc::clone(&xhr);
            *xhr = Arc::new(InterceptedXhr {
                inner,
                interceptor: Arc::clone(self),
            });
        }
        log_gated!(self.log_errors, info, "Upload interception installed");
        Ok(())
    }

    /// URL matches an upload pattern, or the body is multipart.
    pub fn is_upload_request(&self, request: &UploadRequest) -> bool {
        self.upload_matcher.is_match(&request.url) || request.is_multipart()
    }

    /// For each form field, the marked input a PDF in it came from.
    fn plan(&self, request: &UploadRequest) -> Option<Vec<Option<NodeId>>> {
        if !self.is_upload_request(request) {
            return None;
        }
        let form = request.form()?;
        let plan: Vec<Option<NodeId>> = form
            .fields()
            .iter()
            .map(|(name, value)| match value {
                FormValue::File(file) if file.is_pdf() => self.marked_input_for(name, file),
                _ => None,
            })
            .collect();
        plan.iter().any(Option::is_some).then_some(plan)
    }

    fn marked_input_for(&self, field: &str, file: &UploadFile) -> Option<NodeId> {
        self.service.page().read(|doc| {
            let root = doc.root();
            let input = doc
                .find(root, |e| e.is_file_input() && e.files().iter().any(|f| f.same_file(file)))
                .or_else(|| doc.find(root, |e| e.is_file_input() && e.name() == Some(field)))?;
            is_marked(doc.element(input)).then_some(input)
        })
    }

    /// Sanitize the marked PDFs of `request`, one after another, and return
    /// the request with a rebuilt form. Anything else passes through.
    pub async fn rewrite(&self, request: UploadRequest) -> UploadRequest {
        match self.plan(&request) {
            Some(plan) => self.rewrite_with(request, plan).await,
            None => request,
        }
    }

    /// Rewrite along a plan computed earlier. The page may have changed
    /// since; the plan still decides which fields get sanitized.
    async fn rewrite_with(
        &self,
        request: UploadRequest,
        plan: Vec<Option<NodeId>>,
    ) -> UploadRequest {
        let UploadRequest {
            method,
            url,
            headers,
            body,
        } = request;
        let form = match body {
            RequestBody::Multipart(form) => form,
            body => {
                return UploadRequest {
                    method,
                    url,
                    headers,
                    body,
                }
            }
        };

        let mut rebuilt = MultipartForm::new();
        for ((name, value), input) in form.into_fields().into_iter().zip(plan) {
            let value = match (value, input) {
                (FormValue::File(file), Some(input)) => {
                    let result = self.service.sanitize_file(&file, Some(input)).await;
                    FormValue::File(result.file)
                }
                (value, _) => value,
            };
            rebuilt.append(name, value);
        }
        log_gated!(self.log_errors, debug, "Rewrote upload form for {}", url);
        UploadRequest {
            method,
            url,
            headers,
            body: RequestBody::Multipart(rebuilt),
        }
    }

    /// Rewrite from finished results only. `None` if any needed result is
    /// still missing.
    fn try_rewrite_cached(
        &self,
        request: &UploadRequest,
        plan: &[Option<NodeId>],
    ) -> Option<UploadRequest> {
        let form = request.form()?;
        let mut rebuilt = MultipartForm::new();
        for ((name, value), input) in form.fields().iter().zip(plan) {
            let value = match (value, input) {
                (FormValue::File(file), Some(_)) => FormValue::File(self.service.peek(file)?.file),
                (value, _) => value.clone(),
            };
            rebuilt.append(name.clone(), value);
        }
        Some(UploadRequest {
            body: RequestBody::Multipart(rebuilt),
            ..request.clone()
        })
    }
}

struct InterceptedFetch {
    inner: Arc<dyn FetchTransport>,
    interceptor: Arc<TransportInterceptor>,
}

#[async_trait]
impl FetchTransport for InterceptedFetch {
    async fn fetch(&self, request: UploadRequest) -> Result<TransportResponse, TransportError> {
        let request = self.interceptor.rewrite(request).await;
        self.inner.fetch(request).await
    }
}

struct InterceptedXhr {
    inner: Arc<dyn XhrTransport>,
    interceptor: Arc<TransportInterceptor>,
}

impl XhrTransport for InterceptedXhr {
    fn send(&self, request: UploadRequest, on_done: SendCallback) -> SendDisposition {
        let Some(plan) = self.interceptor.plan(&request) else {
            return self.inner.send(request, on_done);
        };
        if let Some(rewritten) = self.interceptor.try_rewrite_cached(&request, &plan) {
            return self.inner.send(rewritten, on_done);
        }

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let inner = Arc::clone(&self.inner);
                let interceptor = Arc::clone(&self.interceptor);
                handle.spawn(async move {
                    let request = interceptor.rewrite_with(request, plan).await;
                    inner.send(request, on_done);
                });
                SendDisposition::Deferred
            }
            Err(_) => {
                log_gated!(
                    self.interceptor.log_errors,
                    warn,
                    "No async runtime to sanitize upload to {}, sending original",
                    request.url
                );
                self.inner.send(request, on_done)
            }
        }
    }
}

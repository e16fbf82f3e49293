//! Transport interception: marked PDFs in outgoing multipart forms are
//! swapped for their reconstructions, everything else passes through.

mod common;

use common::{config, pdf_file, png_file, FakeRasterizer, RecordingFetch, RecordingXhr};
use pdf_sanitizer::{
    Attachment, Document, FormValue, MultipartForm, NodeId, Page, PdfSanitizer, RequestBody,
    SanitizerConfig, SendDisposition, TransportSlots, UploadFile, UploadRequest,
};
use std::sync::Arc;
use std::time::Duration;

struct Harness {
    sanitizer: PdfSanitizer,
    fake: Arc<FakeRasterizer>,
    fetch: Arc<RecordingFetch>,
    xhr: Arc<RecordingXhr>,
    slots: TransportSlots,
    marked: NodeId,
    unmarked: NodeId,
}

fn file_input(doc: &mut Document, name: &str, marked: bool) -> NodeId {
    let node = doc.append_new(doc.body(), "input");
    let el = doc.element_mut(node);
    el.set_attr("type", "file");
    el.set_attr("name", name);
    if marked {
        el.set_attr("data-pdf-sanitize", "true");
    }
    node
}

fn harness_with(config: SanitizerConfig, fake: FakeRasterizer) -> Harness {
    let mut doc = Document::new();
    let marked = file_input(&mut doc, "document", true);
    let unmarked = file_input(&mut doc, "other", false);
    let page = Page::new(doc);

    let fake = Arc::new(fake);
    let sanitizer = PdfSanitizer::with_rasterizer(config, page, fake.clone()).unwrap();
    let fetch = Arc::new(RecordingFetch::default());
    let xhr = Arc::new(RecordingXhr::default());
    let slots = TransportSlots::new(fetch.clone(), xhr.clone());
    Harness {
        sanitizer,
        fake,
        fetch,
        xhr,
        slots,
        marked,
        unmarked,
    }
}

fn harness() -> Harness {
    let h = harness_with(config(), FakeRasterizer::numbered(2));
    assert!(matches!(
        h.sanitizer.attach(&h.slots),
        Attachment::Attached {
            interception: true,
            ..
        }
    ));
    h
}

fn sent_files(request: &UploadRequest) -> Vec<(String, UploadFile)> {
    request
        .form()
        .expect("multipart body")
        .files()
        .map(|(name, file)| (name.to_string(), file.clone()))
        .collect()
}

#[tokio::test]
async fn test_marked_pdf_is_replaced_and_field_order_kept() {
    let h = harness();
    let pdf = pdf_file("scan.pdf");
    h.sanitizer.service().page().write(|doc| doc.set_files(h.marked, vec![pdf.clone()]));

    let form = MultipartForm::new()
        .text("_token", "abc")
        .file("document", pdf.clone())
        .text("comment", "hello");
    let response = h
        .slots
        .send(UploadRequest::multipart("/livewire/upload-file", form))
        .await
        .unwrap();
    assert!(response.is_success());

    let sent = h.fetch.requests.lock().unwrap();
    assert_eq!(sent.len(), 1);
    let fields = sent[0].form().unwrap().fields();
    let names: Vec<&str> = fields.iter().map(|(n, _)| n.as_str()).collect();
    assert_eq!(names, vec!["_token", "document", "comment"]);
    match &fields[1].1 {
        FormValue::File(file) => {
            assert!(!file.same_file(&pdf));
            assert_eq!(file.name(), "scan.pdf");
        }
        other => panic!("expected a file, got {other:?}"),
    }
    match &fields[2].1 {
        FormValue::Text(text) => assert_eq!(text, "hello"),
        other => panic!("expected text, got {other:?}"),
    }
    assert_eq!(h.fake.decodes(), 1);
}

#[tokio::test]
async fn test_unmarked_input_passes_through() {
    let h = harness();
    let pdf = pdf_file("plain.pdf");
    h.sanitizer
        .service()
        .page()
        .write(|doc| doc.set_files(h.unmarked, vec![pdf.clone()]));

    let form = MultipartForm::new().file("other", pdf.clone());
    h.slots
        .send(UploadRequest::multipart("/livewire/upload-file", form))
        .await
        .unwrap();

    let sent = h.fetch.requests.lock().unwrap();
    assert!(sent_files(&sent[0])[0].1.same_file(&pdf));
    assert_eq!(h.fake.decodes(), 0);
}

#[tokio::test]
async fn test_non_multipart_request_passes_through() {
    let h = harness();
    let request = UploadRequest::new("POST", "/livewire/message")
        .with_body(RequestBody::Text("{\"updates\":[]}".into()));
    h.slots.send(request).await.unwrap();

    let sent = h.fetch.requests.lock().unwrap();
    assert!(matches!(&sent[0].body, RequestBody::Text(t) if t == "{\"updates\":[]}"));
    assert_eq!(h.fake.decodes(), 0);
}

#[tokio::test]
async fn test_non_pdf_field_is_untouched() {
    let h = harness();
    let png = png_file("photo.png");
    h.sanitizer.service().page().write(|doc| doc.set_files(h.marked, vec![png.clone()]));

    let form = MultipartForm::new().file("document", png.clone());
    h.slots
        .send(UploadRequest::multipart("/livewire/upload-file", form))
        .await
        .unwrap();

    let sent = h.fetch.requests.lock().unwrap();
    assert!(sent_files(&sent[0])[0].1.same_file(&png));
    assert_eq!(h.fake.decodes(), 0);
}

#[tokio::test]
async fn test_input_found_by_field_name() {
    let h = harness();
    // The form carries a file the input does not hold (e.g. built by script).
    let pdf = pdf_file("scripted.pdf");
    let form = MultipartForm::new().file("document", pdf.clone());
    h.slots
        .send(UploadRequest::multipart("/upload", form))
        .await
        .unwrap();

    let sent = h.fetch.requests.lock().unwrap();
    assert!(!sent_files(&sent[0])[0].1.same_file(&pdf));
    assert_eq!(h.fake.decodes(), 1);
}

#[tokio::test]
async fn test_change_and_upload_racing_share_one_run() {
    let h = harness_with(config(), FakeRasterizer::numbered(2).slow(Duration::from_millis(100)));
    h.sanitizer.attach(&h.slots);
    let pdf = pdf_file("race.pdf");
    let page = h.sanitizer.service().page().clone();
    page.select_files(h.marked, vec![pdf.clone()]);

    let form = MultipartForm::new().file("document", pdf.clone());
    let (handled, response) = tokio::join!(
        h.sanitizer.binder().dispatch_pending(),
        h.slots
            .send(UploadRequest::multipart("/livewire/upload-file", form)),
    );
    response.unwrap();

    assert_eq!(h.fake.decodes(), 1);
    assert!(handled
        .iter()
        .any(|(_, d)| matches!(d, pdf_sanitizer::ChangeDisposition::Replaced { sanitized: 1 })));

    let in_input = page.files(h.marked);
    let sent = h.fetch.requests.lock().unwrap();
    let files = sent_files(&sent[0]);
    let uploaded = &files[0].1;
    assert!(uploaded.same_file(&in_input[0]));
    assert!(!uploaded.same_file(&pdf));
}

#[tokio::test]
async fn test_xhr_send_is_deferred_until_sanitized() {
    let h = harness();
    let pdf = pdf_file("xhr.pdf");
    h.sanitizer.service().page().write(|doc| doc.set_files(h.marked, vec![pdf.clone()]));

    let (tx, rx) = tokio::sync::oneshot::channel();
    let mut request = h.slots.open("POST", "/livewire/upload-file");
    request.set_request_header("X-CSRF-TOKEN", "abc");
    let disposition = request
        .send(
            RequestBody::Multipart(MultipartForm::new().file("document", pdf.clone())),
            Box::new(move |result| {
                let _ = tx.send(result);
            }),
        )
        .unwrap();
    assert_eq!(disposition, SendDisposition::Deferred);

    let response = rx.await.unwrap().unwrap();
    assert_eq!(response.status, 200);
    let sent = h.xhr.requests.lock().unwrap();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].headers[0].0, "X-CSRF-TOKEN");
    assert!(!sent_files(&sent[0])[0].1.same_file(&pdf));
}

#[tokio::test]
async fn test_xhr_sends_immediately_when_result_is_cached() {
    let h = harness();
    let pdf = pdf_file("cached.pdf");
    h.sanitizer.service().page().write(|doc| doc.set_files(h.marked, vec![pdf.clone()]));
    let first = h.sanitizer.sanitize(&pdf).await;
    assert!(first.is_sanitized());

    let request = h.slots.open("POST", "/livewire/upload-file");
    let disposition = request
        .send(
            RequestBody::Multipart(MultipartForm::new().file("document", pdf.clone())),
            Box::new(|_| {}),
        )
        .unwrap();
    assert_eq!(disposition, SendDisposition::Sent);

    let sent = h.xhr.requests.lock().unwrap();
    assert!(sent_files(&sent[0])[0].1.same_file(&first.file));
    assert_eq!(h.fake.decodes(), 1);
}

#[tokio::test]
async fn test_second_install_is_rejected() {
    let h = harness();
    assert!(h.slots.is_installed());
    assert!(h.sanitizer.interceptor().install(&h.slots).is_err());
    assert!(matches!(
        h.sanitizer.attach(&h.slots),
        Attachment::Attached {
            interception: false,
            ..
        }
    ));

    // Still wrapped exactly once: one run, one forwarded request.
    let pdf = pdf_file("once.pdf");
    h.slots
        .send(UploadRequest::multipart(
            "/livewire/upload-file",
            MultipartForm::new().file("document", pdf),
        ))
        .await
        .unwrap();
    assert_eq!(h.fetch.requests.lock().unwrap().len(), 1);
    assert_eq!(h.fake.decodes(), 1);
}

#[tokio::test]
async fn test_disabled_sanitizer_installs_nothing() {
    let disabled = SanitizerConfig::builder().enabled(false).build().unwrap();
    let h = harness_with(disabled, FakeRasterizer::numbered(1));
    assert_eq!(h.sanitizer.attach(&h.slots), Attachment::Disabled);
    assert!(!h.slots.is_installed());
    let bound = h
        .sanitizer
        .service()
        .page()
        .read(|doc| doc.element(h.marked).has_attr("data-sanitized"));
    assert!(!bound);
}

#[tokio::test]
async fn test_deferred_xhr_keeps_plan_when_selection_changes() {
    let h = harness();
    let pdf = pdf_file("picked.pdf");
    let page = h.sanitizer.service().page().clone();
    page.write(|doc| doc.set_files(h.marked, vec![pdf.clone()]));

    // The field name matches no input, so only the selection ties it to one.
    let (tx, rx) = tokio::sync::oneshot::channel();
    let request = h.slots.open("POST", "/livewire/upload-file");
    let disposition = request
        .send(
            RequestBody::Multipart(MultipartForm::new().file("files[0]", pdf.clone())),
            Box::new(move |result| {
                let _ = tx.send(result);
            }),
        )
        .unwrap();
    assert_eq!(disposition, SendDisposition::Deferred);

    page.write(|doc| doc.set_files(h.marked, vec![pdf_file("later.pdf")]));
    rx.await.unwrap().unwrap();

    let sent = h.xhr.requests.lock().unwrap();
    let files = sent_files(&sent[0]);
    assert!(!files[0].1.same_file(&pdf));
    assert_eq!(files[0].1.name(), "picked.pdf");
    assert_eq!(h.fake.decodes(), 1);
}

fn failing_harness() -> Harness {
    let h = harness_with(config(), FakeRasterizer::numbered(2).failing_at(1));
    h.sanitizer.attach(&h.slots);
    h
}

#[tokio::test]
async fn test_failed_fetch_upload_sends_original() {
    let h = failing_harness();
    let pdf = pdf_file("broken.pdf");
    h.sanitizer.service().page().write(|doc| doc.set_files(h.marked, vec![pdf.clone()]));

    let form = MultipartForm::new().file("document", pdf.clone());
    let response = h
        .slots
        .send(UploadRequest::multipart("/livewire/upload-file", form))
        .await
        .unwrap();
    assert!(response.is_success());

    let sent = h.fetch.requests.lock().unwrap();
    assert_eq!(sent.len(), 1);
    assert!(sent_files(&sent[0])[0].1.same_file(&pdf));
    assert_eq!(h.fake.decodes(), 1);
}

#[tokio::test]
async fn test_failed_xhr_upload_sends_original() {
    let h = failing_harness();
    let pdf = pdf_file("broken.pdf");
    h.sanitizer.service().page().write(|doc| doc.set_files(h.marked, vec![pdf.clone()]));

    let (tx, rx) = tokio::sync::oneshot::channel();
    let request = h.slots.open("POST", "/livewire/upload-file");
    let disposition = request
        .send(
            RequestBody::Multipart(MultipartForm::new().file("document", pdf.clone())),
            Box::new(move |result| {
                let _ = tx.send(result);
            }),
        )
        .unwrap();
    assert_eq!(disposition, SendDisposition::Deferred);

    let response = rx.await.unwrap().unwrap();
    assert_eq!(response.status, 200);
    let sent = h.xhr.requests.lock().unwrap();
    assert_eq!(sent.len(), 1);
    assert!(sent_files(&sent[0])[0].1.same_file(&pdf));
}

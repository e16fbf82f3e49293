//! One pipeline run per file, however many callers ask for it.

mod common;

use common::{config, pdf_file, FakeRasterizer};
use futures::future::join_all;
use pdf_sanitizer::{Outcome, Page, Pipeline, SanitizeService};
use std::sync::Arc;
use std::time::Duration;

fn service(fake: &Arc<FakeRasterizer>) -> SanitizeService {
    SanitizeService::new(Page::default(), Pipeline::with_rasterizer(config(), fake.clone()))
}

#[tokio::test]
async fn test_concurrent_callers_share_one_run() {
    let fake = Arc::new(FakeRasterizer::numbered(3).slow(Duration::from_millis(100)));
    let service = service(&fake);
    let pdf = pdf_file("shared.pdf");

    let results = join_all((0..8).map(|_| service.sanitize_detached(&pdf))).await;

    assert_eq!(fake.decodes(), 1);
    let first = &results[0];
    assert_eq!(first.outcome, Outcome::Sanitized { pages: 3 });
    for result in &results[1..] {
        assert!(result.file.same_file(&first.file));
        assert_eq!(result.outcome, first.outcome);
    }
}

#[tokio::test]
async fn test_finished_result_is_peekable_and_reused() {
    let fake = Arc::new(FakeRasterizer::numbered(1));
    let service = service(&fake);
    let pdf = pdf_file("peek.pdf");

    assert!(service.peek(&pdf).is_none());
    let first = service.sanitize_detached(&pdf).await;
    let peeked = service.peek(&pdf).expect("result is stored");
    assert!(peeked.file.same_file(&first.file));

    let again = service.sanitize_detached(&pdf).await;
    assert!(again.file.same_file(&first.file));
    assert_eq!(fake.decodes(), 1);
}

#[tokio::test]
async fn test_distinct_files_with_equal_bytes_run_separately() {
    let fake = Arc::new(FakeRasterizer::numbered(1));
    let service = service(&fake);

    let a = pdf_file("same.pdf");
    let b = pdf_file("same.pdf");
    service.sanitize_detached(&a).await;
    service.sanitize_detached(&b).await;
    assert_eq!(fake.decodes(), 2);
}

#[tokio::test]
async fn test_output_is_not_sanitized_again() {
    let fake = Arc::new(FakeRasterizer::numbered(1));
    let service = service(&fake);
    let pdf = pdf_file("twice.pdf");

    let output = service.sanitize_detached(&pdf).await.into_file();
    let second = service.sanitize_detached(&output).await;
    assert_eq!(second.outcome, Outcome::AlreadySanitized);
    assert!(second.file.same_file(&output));
    assert_eq!(fake.decodes(), 1);
}

#[tokio::test]
async fn test_failed_run_is_shared_too() {
    let fake = Arc::new(FakeRasterizer::numbered(2).failing_at(1));
    let service = service(&fake);
    let pdf = pdf_file("bad.pdf");

    let (a, b) = tokio::join!(service.sanitize_detached(&pdf), service.sanitize_detached(&pdf));
    assert!(a.file.same_file(&pdf));
    assert!(b.file.same_file(&pdf));
    assert!(matches!(a.outcome, Outcome::Failed(_)));
    assert_eq!(fake.decodes(), 1);
}

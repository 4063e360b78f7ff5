mod common;

use base64::Engine;
use common::*;
use tona_core::error::{DomainError, NetworkError, ProcessingError};
use tona_core::job::JobStatus;
use tona_core::wire::ResultResponse;
use tona_events::SessionEventKind;

/// Put the session into `Completed` for job `J1` without polling.
async fn complete_job(h: &Harness) {
    let ticket = h.session.begin_job("J1").await;
    h.session
        .apply_status(&ticket, &status(JobStatus::Completed, None), None)
        .await;
}

fn urls(list: &[&str]) -> ResultResponse {
    ResultResponse {
        success: true,
        result_urls: Some(list.iter().map(|u| u.to_string()).collect()),
        ..Default::default()
    }
}

#[tokio::test]
async fn inline_data_yields_one_image_without_downloads() {
    let t = FakeTransport::new();
    t.result(Ok(ResultResponse {
        success: true,
        data: Some(base64::engine::general_purpose::STANDARD.encode(png_bytes(7, 3))),
        result_url: Some("https://cdn.example.com/ignored.png".into()),
        ..Default::default()
    }));
    let h = Harness::new(t);
    complete_job(&h).await;

    let set = h.results.fetch("J1").await.unwrap();
    assert_eq!(set.images.len(), 1);
    assert_eq!(set.images[0].width(), 7);
    assert_eq!(set.download_progress(), 1.0);
    assert_eq!(h.transport.count(|c| matches!(c, Call::Download(_))), 0);
}

#[tokio::test]
async fn undecodable_inline_data_falls_back_to_urls() {
    let t = FakeTransport::new();
    t.result(Ok(ResultResponse {
        success: true,
        data: Some("bm90IGFuIGltYWdl".into()),
        result_url: Some("/r/a.png".into()),
        ..Default::default()
    }))
    .file("/r/a.png", Ok(png_bytes(2, 2)));
    let h = Harness::new(t);
    complete_job(&h).await;

    let set = h.results.fetch("J1").await.unwrap();
    assert_eq!(set.images.len(), 1);
    assert_eq!(h.transport.count(|c| matches!(c, Call::Download(_))), 1);
}

#[tokio::test]
async fn undecodable_inline_data_without_urls_reports_the_decode_failure() {
    let t = FakeTransport::new();
    t.result(Ok(ResultResponse {
        success: true,
        data: Some(base64::engine::general_purpose::STANDARD.encode(b"definitely not a png")),
        ..Default::default()
    }));
    let h = Harness::new(t);
    complete_job(&h).await;

    let err = h.results.fetch("J1").await.unwrap_err();
    assert_matches::assert_matches!(
        &err,
        DomainError::Unknown(msg) if msg.starts_with("Failed to decode image")
    );
    assert_eq!(h.session.snapshot().await.current_error, Some(err));
    assert!(h.session.results().await.is_none());
}

#[tokio::test]
async fn empty_url_list_is_a_finished_empty_set() {
    let t = FakeTransport::new();
    t.result(Ok(urls(&[])));
    let h = Harness::new(t);
    complete_job(&h).await;

    let set = h.results.fetch("J1").await.unwrap();
    assert!(set.images.is_empty());
    assert!(!set.is_loading);
    assert_eq!(set.download_progress(), 1.0);
}

#[tokio::test]
async fn progress_is_monotonic_and_counts_failures() {
    let t = FakeTransport::new();
    t.result(Ok(urls(&["/0", "/1", "/2", "/3", "/4"])))
        .file("/0", Ok(png_bytes(1, 1)))
        .file("/1", Err(server_error(502)))
        .file("/3", Ok(png_bytes(1, 1)))
        .file("/4", Ok(b"garbage".to_vec()));
    let h = Harness::new(t);
    complete_job(&h).await;
    let mut events = h.session.subscribe();

    let set = h.results.fetch("J1").await.unwrap();
    assert_eq!(set.images.len(), 2);
    assert_eq!(set.failed, 3);
    assert_eq!(set.completed, 5);
    assert_eq!(set.download_progress(), 1.0);

    let mut progress = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let SessionEventKind::ResultsProgress { completed, total, .. } = event.kind {
            progress.push(completed as f64 / total as f64);
        }
    }
    assert_eq!(progress.len(), 5);
    assert!(progress.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(progress.last().copied(), Some(1.0));

    // Skipped downloads are logged, not recorded as session errors.
    assert!(h.session.snapshot().await.errors.is_empty());
}

#[tokio::test]
async fn missing_data_and_urls_is_an_error() {
    let t = FakeTransport::new();
    t.result(Ok(ResultResponse {
        success: true,
        ..Default::default()
    }));
    let h = Harness::new(t);
    complete_job(&h).await;

    let err = h.results.fetch("J1").await.unwrap_err();
    assert_eq!(err, DomainError::Unknown("No data received".into()));
    assert!(h.session.results().await.is_none());
}

#[tokio::test]
async fn unsuccessful_descriptor_uses_default_message() {
    let t = FakeTransport::new();
    t.result(Ok(ResultResponse::default()));
    let h = Harness::new(t);
    complete_job(&h).await;

    let err = h.results.fetch("J1").await.unwrap_err();
    assert_eq!(
        err,
        NetworkError::RequestFailed("Failed to fetch results".into()).into()
    );
}

#[tokio::test]
async fn descriptor_timeout_can_be_refetched() {
    let t = FakeTransport::new();
    t.result(Err(tona_core::transport::TransportError::Timeout))
        .result(Ok(urls(&["/only"])))
        .file("/only", Ok(png_bytes(2, 2)));
    let h = Harness::new(t);
    complete_job(&h).await;

    let err = h.results.fetch("J1").await.unwrap_err();
    assert_eq!(err, NetworkError::Timeout.into());
    assert_eq!(h.session.retry_label().await.as_deref(), Some("fetch results"));

    assert!(h.session.retry().await);
    let set = h.session.results().await.unwrap();
    assert_eq!(set.images.len(), 1);
    assert!(!set.is_loading);
}

#[tokio::test]
async fn repeated_fetch_reuses_existing_results() {
    let t = FakeTransport::new();
    t.result(Ok(urls(&[])));
    let h = Harness::new(t);
    complete_job(&h).await;

    h.results.fetch("J1").await.unwrap();
    h.results.fetch("J1").await.unwrap();
    assert_eq!(h.transport.count(|c| matches!(c, Call::Result(_))), 1);
}

#[tokio::test]
async fn fetch_for_unknown_job_is_refused() {
    let h = Harness::new(FakeTransport::new());
    let err = h.results.fetch("nope").await.unwrap_err();
    assert_eq!(err, ProcessingError::InvalidJobId.into());
    assert!(h.transport.calls().is_empty());
}

#[tokio::test]
async fn saved_results_are_numbered_pngs() {
    let t = FakeTransport::new();
    t.result(Ok(urls(&["/a", "/b"])))
        .file("/a", Ok(png_bytes(2, 2)))
        .file("/b", Ok(png_bytes(3, 3)));
    let h = Harness::new(t);
    complete_job(&h).await;
    h.results.fetch("J1").await.unwrap();

    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("out");
    let paths = h.results.save_results(&out).await.unwrap();

    assert_eq!(paths, vec![out.join("result_0.png"), out.join("result_1.png")]);
    let reloaded = image::open(&paths[1]).unwrap();
    assert_eq!(reloaded.width(), 3);
}

#[tokio::test]
async fn saving_into_a_file_path_fails() {
    let t = FakeTransport::new();
    t.result(Ok(urls(&["/a"]))).file("/a", Ok(png_bytes(2, 2)));
    let h = Harness::new(t);
    complete_job(&h).await;
    h.results.fetch("J1").await.unwrap();

    let file = tempfile::NamedTempFile::new().unwrap();
    let err = h.results.save_results(file.path()).await.unwrap_err();
    assert_eq!(err, tona_core::error::StorageError::SaveFailed.into());
}

//! Integration tests for the two OCR tiers and batch mode.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use newsarchive_core::model::{Identifier, PageMetadata};
use newsarchive_core::ocr::{
    LayoutRegion, ModelLoader, OcrError, OcrJob, OcrMode, OcrOrchestrator, OcrTier, PageImage,
    RecognitionModel, apply_outcomes, run_batch, text_output_path,
};
use newsarchive_core::source::{ArchiveSource, LocSource};
use newsarchive_core::store::{IssueRecord, MetadataStore, PageRecord, StoreState};
use serde_json::json;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

mod support;
use support::socket_guard::start_mock_server_or_skip;
use support::{IDENTIFIER, fast_context, pdf_body};

const DATE: &str = "1900-01-02";

/// Model that answers every page with fixed lines.
struct EchoModel;

impl RecognitionModel for EchoModel {
    fn detect_layout(&mut self, images: &[PageImage]) -> Result<Vec<Vec<LayoutRegion>>, OcrError> {
        Ok(vec![Vec::new(); images.len()])
    }

    fn recognize(
        &mut self,
        images: &[PageImage],
        _layouts: &[Vec<LayoutRegion>],
    ) -> Result<Vec<Vec<String>>, OcrError> {
        Ok(images
            .iter()
            .map(|image| vec![format!("LOCAL TEXT {}", image.bytes.len())])
            .collect())
    }
}

#[derive(Default)]
struct CountingLoader {
    loads: AtomicUsize,
    fail: bool,
}

impl ModelLoader for CountingLoader {
    fn load(&self) -> Result<Box<dyn RecognitionModel>, OcrError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            Err(OcrError::ModelLoad("weights missing".to_string()))
        } else {
            Ok(Box::new(EchoModel))
        }
    }
}

fn page(base: &str, page_num: u32) -> PageMetadata {
    PageMetadata {
        issue_date: DATE.to_string(),
        edition: 1,
        page_num,
        url: format!("{base}/resource/{IDENTIFIER}/{DATE}/ed-1/?sp={page_num}"),
        pdf_url: None,
        expected_size: None,
        identifier: Identifier::parse(IDENTIFIER).unwrap(),
    }
}

fn write_artifact(output: &Path, page: &PageMetadata) -> std::path::PathBuf {
    let path = output.join("1900").join(page.artifact_file_name());
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(&path, pdf_body(1)).unwrap();
    path
}

fn record_for(output: &Path, pages: &[&PageMetadata]) -> IssueRecord {
    let pages: Vec<PageRecord> = pages
        .iter()
        .map(|p| PageRecord {
            page: p.page_num,
            file: format!("1900/{}", p.artifact_file_name()),
            size: std::fs::metadata(output.join("1900").join(p.artifact_file_name()))
                .map_or(0, |m| m.len()),
            ocr: BTreeMap::new(),
        })
        .collect();
    IssueRecord {
        date: DATE.to_string(),
        edition: 1,
        total_pages: pages.len(),
        downloaded_pages: pages.len(),
        complete: true,
        file: pages.first().map(|p| p.file.clone()),
        pages,
        downloaded_at: None,
    }
}

async fn mount_remote_text(server: &MockServer, page_num: u32, body: &str) {
    let base = server.uri();
    Mock::given(method("GET"))
        .and(path(format!("/resource/{IDENTIFIER}/{DATE}/ed-1/")))
        .and(wiremock::matchers::query_param("sp", page_num.to_string()))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"fulltext_service": format!("{base}/text/{page_num}.json")})),
        )
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("/text/{page_num}.json")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"seg": {"full_text": body}})))
        .mount(server)
        .await;
}

fn source(server: &MockServer) -> Arc<dyn ArchiveSource> {
    Arc::new(LocSource::new(fast_context(&server.uri())))
}

#[tokio::test]
async fn test_remote_failure_does_not_block_local_tier() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    let output = TempDir::new().unwrap();
    let page = page(&server.uri(), 1);
    let artifact = write_artifact(output.path(), &page);
    let loader = Arc::new(CountingLoader::default());

    let mut orchestrator = OcrOrchestrator::new(OcrMode::Both, source(&server), output.path(), loader.clone());
    let outcomes = orchestrator
        .process_pages(&[OcrJob {
            page: page.clone(),
            artifact,
        }])
        .await;

    assert!(!outcomes[0].remote.as_ref().unwrap().success);
    let local = outcomes[0].local.as_ref().unwrap();
    assert!(local.success);
    assert_eq!(loader.loads.load(Ordering::SeqCst), 1);

    let mut record = record_for(output.path(), &[&page]);
    apply_outcomes(&mut record, output.path(), &outcomes);
    let ocr = &record.pages[0].ocr;
    assert!(!ocr.contains_key("tier1"));
    assert_eq!(
        ocr["tier2"].file,
        format!("1900/{IDENTIFIER}_{DATE}_ed-1_page01_local.txt")
    );
    let text = std::fs::read_to_string(text_output_path(output.path(), &page, OcrTier::Local)).unwrap();
    assert!(text.starts_with(&format!("# OCR Text: {IDENTIFIER} {DATE}\n# Page: 1\n# OCR Method: local-model\n# ---\n")));
    assert!(text.contains("LOCAL TEXT"));
}

#[tokio::test]
async fn test_model_failure_does_not_block_remote_tier() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    mount_remote_text(&server, 1, "The com-\nplete story of the day").await;
    let output = TempDir::new().unwrap();
    let page = page(&server.uri(), 1);
    let artifact = write_artifact(output.path(), &page);
    let loader = Arc::new(CountingLoader {
        fail: true,
        ..CountingLoader::default()
    });

    let mut orchestrator = OcrOrchestrator::new(OcrMode::Both, source(&server), output.path(), loader.clone());
    let job = OcrJob { page: page.clone(), artifact };
    let outcomes = orchestrator.process_pages(std::slice::from_ref(&job)).await;

    let remote = outcomes[0].remote.as_ref().unwrap();
    assert!(remote.success, "{:?}", remote.error);
    assert_eq!(remote.word_count, 6);
    let local = outcomes[0].local.as_ref().unwrap();
    assert!(!local.success);
    assert!(local.error.as_deref().unwrap().contains("weights missing"));

    let text = std::fs::read_to_string(text_output_path(output.path(), &page, OcrTier::Remote)).unwrap();
    assert!(text.contains("The complete story of the day"));

    // A failed load is not retried on the next batch.
    orchestrator.process_pages(std::slice::from_ref(&job)).await;
    assert_eq!(loader.loads.load(Ordering::SeqCst), 1);

    let mut record = record_for(output.path(), &[&page]);
    apply_outcomes(&mut record, output.path(), &outcomes);
    assert!(record.pages[0].ocr.contains_key("tier1"));
    assert!(!record.pages[0].ocr.contains_key("tier2"));
}

#[tokio::test]
async fn test_batch_mode_processes_store_records_once() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    let output = TempDir::new().unwrap();
    let pages = [page(&server.uri(), 1), page(&server.uri(), 2)];
    for page in &pages {
        write_artifact(output.path(), page);
    }
    let store = MetadataStore::new(output.path());
    let mut state = StoreState::default();
    state.record_download("1900-01-02_ed-1", record_for(output.path(), &[&pages[0], &pages[1]]));
    store.save(&state).unwrap();

    let loader = Arc::new(CountingLoader::default());
    let mut orchestrator = OcrOrchestrator::new(OcrMode::Tier2, source(&server), output.path(), loader.clone())
        .with_batch_size(1);
    let identifier = Identifier::parse(IDENTIFIER).unwrap();

    let first = run_batch(&mut orchestrator, &store, &identifier, None).await.unwrap();
    assert_eq!(first.issues, 1);
    assert_eq!(first.pages, 2);
    assert_eq!(first.succeeded, 2);

    let saved = store.load();
    let record = &saved.downloaded["1900-01-02_ed-1"];
    assert!(record.pages.iter().all(|p| p.ocr.contains_key("tier2")));
    let words = record.pages[0].ocr["tier2"].words;

    let second = run_batch(&mut orchestrator, &store, &identifier, None).await.unwrap();
    assert_eq!(second.skipped, 2);
    assert_eq!(second.succeeded, 0);
    assert_eq!(store.load().downloaded["1900-01-02_ed-1"].pages[0].ocr["tier2"].words, words);
    assert_eq!(loader.loads.load(Ordering::SeqCst), 1);

    let other_day = run_batch(&mut orchestrator, &store, &identifier, Some("1900-01-03"))
        .await
        .unwrap();
    assert_eq!(other_day.issues, 0);
}

#[tokio::test]
async fn test_missing_artifact_fails_only_its_page_and_model_loads_lazily() {
    let output = TempDir::new().unwrap();
    // Tier 2 never touches the network; the source only has to exist.
    let offline: Arc<dyn ArchiveSource> = Arc::new(LocSource::new(fast_context("http://127.0.0.1:9")));
    let jobs: Vec<OcrJob> = (1..=6)
        .map(|page_num| {
            let page = page("http://127.0.0.1:9", page_num);
            let artifact = if page_num == 3 {
                output.path().join("1900").join(page.artifact_file_name())
            } else {
                write_artifact(output.path(), &page)
            };
            OcrJob { page, artifact }
        })
        .collect();
    let loader = Arc::new(CountingLoader::default());

    let mut orchestrator = OcrOrchestrator::new(OcrMode::Tier2, offline, output.path(), loader.clone());
    assert_eq!(loader.loads.load(Ordering::SeqCst), 0);

    let outcomes = orchestrator.process_pages(&jobs).await;
    assert_eq!(loader.loads.load(Ordering::SeqCst), 1);

    let local: Vec<bool> = outcomes
        .iter()
        .map(|outcome| outcome.local.as_ref().unwrap().success)
        .collect();
    assert_eq!(local, vec![true, true, false, true, true, true]);
    assert!(outcomes.iter().all(|outcome| outcome.remote.is_none()));
    let failed = outcomes[2].local.as_ref().unwrap();
    assert!(failed.error.as_deref().unwrap().contains("page03"), "{:?}", failed.error);
    assert!(!text_output_path(output.path(), &jobs[2].page, OcrTier::Local).exists());
    assert!(text_output_path(output.path(), &jobs[5].page, OcrTier::Local).exists());
}

//! Integration tests for the harvester
//!
//! These tests use wiremock to stand in for the catalog sites and drive the
//! real adapters through the full harvest cycle end-to-end.

use perda_harvest::checkpoint::{Checkpoint, CheckpointBackend, FlushPolicy, JsonFileBackend};
use perda_harvest::config::{SourceConfig, SourceKind, UserAgentConfig};
use perda_harvest::retry::{BackoffPolicy, ErrorKind, RetryPolicy};
use perda_harvest::source::{build_adapter, SourceAdapter};
use perda_harvest::storage::SqliteSink;
use perda_harvest::{HarvestError, HarvestSettings, HarvestSummary, Harvester};
use std::sync::Arc;
use tempfile::TempDir;
use tokio::sync::watch;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Match, Mock, MockServer, Request, ResponseTemplate};

/// Matches requests that do not carry the given query parameter
struct WithoutQueryParam(&'static str);

impl Match for WithoutQueryParam {
    fn matches(&self, request: &Request) -> bool {
        !request.url.query_pairs().any(|(key, _)| key == self.0)
    }
}

fn test_user_agent() -> UserAgentConfig {
    UserAgentConfig {
        crawler_name: "TestHarvester".to_string(),
        crawler_version: "1.0".to_string(),
        contact_url: None,
        contact_email: Some("test@example.com".to_string()),
    }
}

fn peraturan_source(base_url: &str) -> SourceConfig {
    SourceConfig {
        id: "peraturan_go_id".to_string(),
        kind: SourceKind::PeraturanGoId,
        base_url: base_url.to_string(),
        workers: 3,
        min_items: 4,
        items_per_page: 4,
        expected_total_items: None,
        expected_total_pages: None,
        max_pages: None,
        jenis: Vec::new(),
        request_timeout_secs: 5,
        delay_min_ms: 0,
        delay_max_ms: 0,
    }
}

fn bpk_source(base_url: &str, expected_total_pages: Option<u32>) -> SourceConfig {
    SourceConfig {
        id: "bpk".to_string(),
        kind: SourceKind::Bpk,
        base_url: base_url.to_string(),
        workers: 2,
        min_items: 2,
        items_per_page: 10,
        expected_total_items: None,
        expected_total_pages,
        max_pages: None,
        jenis: vec!["20".to_string()],
        request_timeout_secs: 5,
        delay_min_ms: 0,
        delay_max_ms: 0,
    }
}

fn fast_settings(workers: usize, max_retries: u32, download_documents: bool) -> HarvestSettings {
    let tiny = BackoffPolicy::from_millis(1, 10);
    HarvestSettings {
        workers,
        retry: RetryPolicy {
            max_retries,
            parse_error_limit: 3,
            network: tiny,
            rate_limit: tiny,
            connection: tiny,
            low_items: tiny,
        },
        download_documents,
        document_retry_base: std::time::Duration::from_millis(1),
        user_agent: test_user_agent(),
        ..Default::default()
    }
}

/// Temp directories plus the shared sink and checkpoint backend
struct Workspace {
    _dir: TempDir,
    sink: Arc<SqliteSink>,
    backend: Arc<dyn CheckpointBackend>,
}

impl Workspace {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let sink = Arc::new(
            SqliteSink::new(&dir.path().join("db").join("perda.db"), dir.path().join("docs"))
                .unwrap(),
        );
        let backend: Arc<dyn CheckpointBackend> =
            Arc::new(JsonFileBackend::new(dir.path().join("state")));
        Self {
            _dir: dir,
            sink,
            backend,
        }
    }

    async fn harvest(
        &self,
        source: &SourceConfig,
        settings: HarvestSettings,
    ) -> Result<HarvestSummary, HarvestError> {
        let adapter: Arc<dyn SourceAdapter> = build_adapter(source, &test_user_agent())?;
        let checkpoint =
            Checkpoint::load(self.backend.clone(), &source.id, FlushPolicy::default())?;
        let (_tx, rx) = watch::channel(false);

        Harvester::new(settings)?
            .run(adapter, self.sink.clone(), Arc::new(checkpoint), rx)
            .await
    }
}

/// One peraturan.go.id listing entry
fn peraturan_entry(region: &str, number: u32, year: u32, with_pdf: bool) -> String {
    let slug = format!("perda-{}-no-{}-tahun-{}", region.to_lowercase().replace(' ', "-"), number, year);
    let pdf = if with_pdf {
        format!(r#"<p><a href="/files/{}.pdf">PDF</a></p>"#, slug)
    } else {
        String::new()
    };
    format!(
        r#"<div class="strip">
             <p>Peraturan Daerah {} Nomor {} Tahun {}</p>
             <div class="row">
               <p><a href="/id/{}">tentang Pajak Daerah</a></p>
               {}
             </div>
           </div>"#,
        region, number, year, slug, pdf
    )
}

fn peraturan_listing(page: u32, count: u32) -> String {
    let entries: String = (0..count)
        .map(|i| peraturan_entry("Kota Bandung", page * 100 + i, 2020, false))
        .collect();
    format!(
        "<html><body><p>10 Perda ditemukan</p>{}</body></html>",
        entries
    )
}

async fn mount_peraturan_discovery(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/perda"))
        .and(WithoutQueryParam("page"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(peraturan_listing(1, 4))
                .insert_header("content-type", "text/html"),
        )
        .mount(server)
        .await;
}

async fn mount_peraturan_page(server: &MockServer, page: u32, count: u32) {
    Mock::given(method("GET"))
        .and(path("/perda"))
        .and(query_param("page", page.to_string()))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(peraturan_listing(page, count))
                .insert_header("content-type", "text/html"),
        )
        .mount(server)
        .await;
}

fn bpk_card(id: u32, region: &str, number: u32, year: u32) -> String {
    format!(
        r#"<div class="card"><div class="card-body">
             <a href="/Details/{id}/perda-{number}-{year}">Perda {region} tentang Retribusi {id}</a>
             <div class="fw-semibold">Peraturan Daerah (Perda) {region} Nomor {number} Tahun {year}</div>
             <div class="text-gray-700">Retribusi Jasa Umum</div>
             <a href="/Download/{id}/Perda{number}.pdf">Unduh</a>
             <span class="badge">Berlaku</span>
           </div></div>"#,
        id = id,
        region = region,
        number = number,
        year = year
    )
}

#[tokio::test]
async fn test_peraturan_full_harvest_with_short_last_page() {
    let server = MockServer::start().await;
    mount_peraturan_discovery(&server).await;
    mount_peraturan_page(&server, 1, 4).await;
    mount_peraturan_page(&server, 2, 4).await;
    mount_peraturan_page(&server, 3, 2).await;

    let workspace = Workspace::new();
    let source = peraturan_source(&server.uri());
    let summary = workspace
        .harvest(&source, fast_settings(3, 3, false))
        .await
        .unwrap();

    assert_eq!(summary.total_pages, 3);
    assert_eq!(summary.completed_pages, 3);
    assert!(summary.failed_pages.is_empty());
    assert_eq!(summary.items_inserted, 10);
    assert_eq!(workspace.sink.count_records().unwrap(), 10);

    let record = workspace
        .sink
        .get_record(&format!(
            "{}/id/perda-kota-bandung-no-201-tahun-2020",
            server.uri()
        ))
        .unwrap()
        .unwrap();
    assert_eq!(record.title, "Peraturan Daerah Kota Bandung Nomor 201 Tahun 2020");
    assert_eq!(record.year, Some(2020));
    assert_eq!(record.source, "peraturan_go_id");

    let state = workspace.backend.load("peraturan_go_id").unwrap().unwrap();
    assert_eq!(state.completed_pages.len(), 3);
    assert_eq!(state.total_items, 10);
}

#[tokio::test]
async fn test_short_page_retried_until_complete() {
    let server = MockServer::start().await;
    mount_peraturan_discovery(&server).await;

    // Page 2 comes back short twice before the full listing appears
    Mock::given(method("GET"))
        .and(path("/perda"))
        .and(query_param("page", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_string(peraturan_listing(2, 1)))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    mount_peraturan_page(&server, 1, 4).await;
    mount_peraturan_page(&server, 2, 4).await;
    mount_peraturan_page(&server, 3, 2).await;

    let workspace = Workspace::new();
    let source = peraturan_source(&server.uri());
    let summary = workspace
        .harvest(&source, fast_settings(2, 5, false))
        .await
        .unwrap();

    assert_eq!(summary.completed_pages, 3);
    assert_eq!(summary.retries, 2);
    assert_eq!(summary.errors_by_kind.get(&ErrorKind::LowItems), Some(&2));
    assert_eq!(workspace.sink.count_records().unwrap(), 10);
}

#[tokio::test]
async fn test_failed_page_resumed_on_next_run() {
    let server = MockServer::start().await;
    mount_peraturan_discovery(&server).await;
    mount_peraturan_page(&server, 1, 4).await;
    mount_peraturan_page(&server, 2, 4).await;
    Mock::given(method("GET"))
        .and(path("/perda"))
        .and(query_param("page", "3"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let workspace = Workspace::new();
    let source = peraturan_source(&server.uri());

    let first = workspace
        .harvest(&source, fast_settings(2, 2, false))
        .await
        .unwrap();
    assert_eq!(first.completed_pages, 2);
    assert_eq!(first.failed_pages.len(), 1);
    assert_eq!(first.failed_pages[0].page, 3);
    assert_eq!(first.failed_pages[0].kind, ErrorKind::Connection);
    assert_eq!(first.failed_pages[0].attempts, 2);

    let state = workspace.backend.load("peraturan_go_id").unwrap().unwrap();
    assert_eq!(state.failed_pages.get(&3).unwrap().retry_count, 2);

    // Second run: pages 1 and 2 must not be requested again
    server.reset().await;
    mount_peraturan_discovery(&server).await;
    Mock::given(method("GET"))
        .and(path("/perda"))
        .and(query_param("page", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_string(peraturan_listing(1, 4)))
        .expect(0)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/perda"))
        .and(query_param("page", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_string(peraturan_listing(2, 4)))
        .expect(0)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/perda"))
        .and(query_param("page", "3"))
        .respond_with(ResponseTemplate::new(200).set_body_string(peraturan_listing(3, 2)))
        .expect(1)
        .mount(&server)
        .await;

    let second = workspace
        .harvest(&source, fast_settings(2, 2, false))
        .await
        .unwrap();
    assert_eq!(second.skipped_pages, 2);
    assert_eq!(second.completed_pages, 1);
    assert!(second.is_clean());
    server.verify().await;

    let state = workspace.backend.load("peraturan_go_id").unwrap().unwrap();
    assert_eq!(state.completed_pages.len(), 3);
    assert!(state.failed_pages.is_empty());
    assert_eq!(workspace.sink.count_records().unwrap(), 10);
}

#[tokio::test]
async fn test_short_page_at_max_pages_cap_is_not_accepted() {
    let server = MockServer::start().await;
    mount_peraturan_discovery(&server).await;
    mount_peraturan_page(&server, 1, 4).await;
    mount_peraturan_page(&server, 2, 1).await;

    let workspace = Workspace::new();
    let mut source = peraturan_source(&server.uri());
    source.max_pages = Some(2);
    let summary = workspace
        .harvest(&source, fast_settings(2, 2, false))
        .await
        .unwrap();

    assert_eq!(summary.total_pages, 2);
    assert_eq!(summary.completed_pages, 1);
    assert_eq!(summary.failed_pages.len(), 1);
    assert_eq!(summary.failed_pages[0].page, 2);
    assert_eq!(summary.failed_pages[0].kind, ErrorKind::LowItems);
    assert_eq!(workspace.sink.count_records().unwrap(), 4);
}

#[tokio::test]
async fn test_rate_limited_page_recovers() {
    let server = MockServer::start().await;
    mount_peraturan_discovery(&server).await;
    Mock::given(method("GET"))
        .and(path("/perda"))
        .and(query_param("page", "1"))
        .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "0"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    mount_peraturan_page(&server, 1, 4).await;
    mount_peraturan_page(&server, 2, 4).await;
    mount_peraturan_page(&server, 3, 2).await;

    let workspace = Workspace::new();
    let source = peraturan_source(&server.uri());
    let summary = workspace
        .harvest(&source, fast_settings(3, 3, false))
        .await
        .unwrap();

    assert_eq!(summary.completed_pages, 3);
    assert_eq!(summary.errors_by_kind.get(&ErrorKind::RateLimit), Some(&1));
    assert_eq!(summary.concurrency_limit, 2);
}

#[tokio::test]
async fn test_documents_downloaded_and_html_rejected() {
    let server = MockServer::start().await;

    let listing = format!(
        "<html><body><p>2 Perda ditemukan</p>{}{}</body></html>",
        peraturan_entry("Kota Bogor", 1, 2021, true),
        peraturan_entry("Kota Depok", 2, 2021, true)
    );
    Mock::given(method("GET"))
        .and(path("/perda"))
        .respond_with(ResponseTemplate::new(200).set_body_string(listing))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/files/perda-kota-bogor-no-1-tahun-2021.pdf"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "application/pdf")
                .set_body_bytes(b"%PDF-1.7 bogor".to_vec()),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/files/perda-kota-depok-no-2-tahun-2021.pdf"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/html")
                .set_body_string("<html>Not found</html>"),
        )
        .mount(&server)
        .await;

    let workspace = Workspace::new();
    let mut source = peraturan_source(&server.uri());
    source.items_per_page = 20;
    source.min_items = 2;
    let summary = workspace
        .harvest(&source, fast_settings(1, 3, true))
        .await
        .unwrap();

    assert_eq!(summary.completed_pages, 1);
    assert_eq!(summary.documents_downloaded, 1);
    assert_eq!(summary.download_errors, 1);
    assert_eq!(summary.errors_by_kind.get(&ErrorKind::DownloadError), Some(&1));

    let bogor = workspace
        .sink
        .get_record(&format!("{}/id/perda-kota-bogor-no-1-tahun-2021", server.uri()))
        .unwrap()
        .unwrap();
    let stored = bogor.document_path.unwrap();
    assert_eq!(std::fs::read(&stored).unwrap(), b"%PDF-1.7 bogor");

    // The rejected document leaves its record intact
    let depok = workspace
        .sink
        .get_record(&format!("{}/id/perda-kota-depok-no-2-tahun-2021", server.uri()))
        .unwrap()
        .unwrap();
    assert!(depok.document_path.is_none());
    assert_eq!(depok.year, Some(2021));
}

#[tokio::test]
async fn test_discovery_failure_aborts_source() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/perda"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html><body>Maintenance</body></html>"))
        .mount(&server)
        .await;

    let workspace = Workspace::new();
    let source = peraturan_source(&server.uri());
    let result = workspace.harvest(&source, fast_settings(2, 3, false)).await;

    match result {
        Err(HarvestError::Discovery { source_id, .. }) => assert_eq!(source_id, "peraturan_go_id"),
        other => panic!("expected discovery error, got {:?}", other.map(|s| s.completed_pages)),
    }
    assert_eq!(workspace.sink.count_records().unwrap(), 0);
}

#[tokio::test]
async fn test_bpk_harvest_with_configured_page_count() {
    let server = MockServer::start().await;
    let page_one = format!(
        "<html><body>{}{}{}</body></html>",
        bpk_card(1, "Kabupaten Bandung", 55, 2025),
        bpk_card(2, "Kota Medan", 3, 2021),
        bpk_card(3, "Provinsi Bali", 7, 2019)
    );
    let page_two = format!(
        "<html><body>{}</body></html>",
        bpk_card(4, "Kota Surabaya", 9, 2018)
    );
    Mock::given(method("GET"))
        .and(path("/Search"))
        .and(query_param("p", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_string(page_one))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/Search"))
        .and(query_param("p", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_string(page_two))
        .mount(&server)
        .await;

    let workspace = Workspace::new();
    let source = bpk_source(&server.uri(), Some(2));
    let summary = workspace
        .harvest(&source, fast_settings(2, 3, false))
        .await
        .unwrap();

    assert_eq!(summary.total_pages, 2);
    assert_eq!(summary.completed_pages, 2);
    assert_eq!(summary.items_inserted, 4);

    let record = workspace
        .sink
        .get_record(&format!("{}/Details/1/perda-55-2025", server.uri()))
        .unwrap()
        .unwrap();
    assert_eq!(record.region_name.as_deref(), Some("Kabupaten Bandung"));
    assert_eq!(record.number.as_deref(), Some("55"));
    assert_eq!(record.year, Some(2025));
    assert_eq!(record.status.as_deref(), Some("Berlaku"));
    assert_eq!(
        record.document_url,
        Some(format!("{}/Download/1/Perda55.pdf", server.uri()))
    );
}

#[tokio::test]
async fn test_sources_share_one_sink() {
    let server = MockServer::start().await;
    mount_peraturan_discovery(&server).await;
    mount_peraturan_page(&server, 1, 4).await;
    mount_peraturan_page(&server, 2, 4).await;
    mount_peraturan_page(&server, 3, 2).await;
    Mock::given(method("GET"))
        .and(path("/Search"))
        .respond_with(ResponseTemplate::new(200).set_body_string(format!(
            "<html><body>{}{}</body></html>",
            bpk_card(10, "Kota Padang", 1, 2022),
            bpk_card(11, "Kota Padang", 2, 2022)
        )))
        .mount(&server)
        .await;

    let workspace = Workspace::new();
    let peraturan = peraturan_source(&server.uri());
    let bpk = bpk_source(&server.uri(), Some(1));

    let (a, b) = tokio::join!(
        workspace.harvest(&peraturan, fast_settings(3, 3, false)),
        workspace.harvest(&bpk, fast_settings(2, 3, false))
    );
    assert_eq!(a.unwrap().items_inserted, 10);
    assert_eq!(b.unwrap().items_inserted, 2);

    assert_eq!(workspace.sink.count_records().unwrap(), 12);
    let stats = workspace.sink.statistics().unwrap();
    assert_eq!(
        stats.by_source,
        vec![("bpk".to_string(), 2), ("peraturan_go_id".to_string(), 10)]
    );
    assert!(workspace.backend.load("bpk").unwrap().is_some());
    assert!(workspace.backend.load("peraturan_go_id").unwrap().is_some());
}

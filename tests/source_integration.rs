//! Integration tests for the archive source against a mock collection API.

use std::collections::BTreeSet;

use newsarchive_core::model::Identifier;
use newsarchive_core::source::{ArchiveSource, LocSource};
use serde_json::json;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, ResponseTemplate};

mod support;
use support::socket_guard::start_mock_server_or_skip;
use support::{COLLECTION_PATH, IDENTIFIER, collection_page, fast_context, issue_item};

fn identifier() -> Identifier {
    Identifier::parse(IDENTIFIER).unwrap()
}

#[tokio::test]
async fn test_discovery_follows_next_links_until_missing() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    let base = server.uri();
    let page2 = format!("{base}{COLLECTION_PATH}?fa=number_lccn:{IDENTIFIER}&c=100&fo=json&sp=2");

    Mock::given(method("GET"))
        .and(path(COLLECTION_PATH))
        .and(query_param("sp", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(collection_page(
            vec![issue_item(&base, "1900-01-03")],
            None,
        )))
        .with_priority(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(COLLECTION_PATH))
        .and(query_param("fa", format!("number_lccn:{IDENTIFIER}")))
        .respond_with(ResponseTemplate::new(200).set_body_json(collection_page(
            vec![
                json!({"date": "1854", "title": "Evening star."}),
                issue_item(&base, "1900-01-02"),
                issue_item(&base, "1900-01-01"),
            ],
            Some(page2),
        )))
        .expect(1)
        .mount(&server)
        .await;

    let source = LocSource::new(fast_context(&base));
    let discovery = source.discover_issues(&identifier(), None).await;

    assert_eq!(discovery.pages_fetched, 2);
    assert!(discovery.errors.is_empty());
    assert_eq!(discovery.title.as_deref(), Some("Evening star"));
    let dates: Vec<&str> = discovery.issues.iter().map(|i| i.date.as_str()).collect();
    assert_eq!(dates, vec!["1900-01-01", "1900-01-02", "1900-01-03"]);
    assert!(discovery.issues.iter().all(|i| i.edition == 1 && i.year == 1900));
}

/// Mounts one `sp=N` page of a known-total discovery run.
async fn mount_numbered_page(server: &wiremock::MockServer, sp: u32, response: ResponseTemplate) {
    Mock::given(method("GET"))
        .and(path(COLLECTION_PATH))
        .and(query_param("sp", sp.to_string()))
        .respond_with(response)
        .with_priority(1)
        .expect(1)
        .mount(server)
        .await;
}

/// First discovery page reporting `total` pages, with bad dates mixed in.
async fn mount_first_of_total(server: &wiremock::MockServer, total: u32) {
    let base = server.uri();
    let next = format!("{base}{COLLECTION_PATH}?fa=number_lccn:{IDENTIFIER}&c=100&fo=json&sp=2");
    Mock::given(method("GET"))
        .and(path(COLLECTION_PATH))
        .and(query_param("fa", format!("number_lccn:{IDENTIFIER}")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "results": [
                issue_item(&base, "1900-01-02"),
                json!({"date": "19xx-01-01", "url": format!("{base}/item/bad/")}),
                json!({"date": "1900-02-30", "url": format!("{base}/item/impossible/")}),
            ],
            "pagination": {"next": next, "total": total},
        })))
        .expect(1)
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_discovery_fans_out_numbered_pages_when_total_is_known() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    let base = server.uri();
    mount_first_of_total(&server, 3).await;
    mount_numbered_page(
        &server,
        2,
        ResponseTemplate::new(200).set_body_json(collection_page(vec![issue_item(&base, "1900-01-03")], None)),
    )
    .await;
    mount_numbered_page(
        &server,
        3,
        ResponseTemplate::new(200).set_body_json(collection_page(vec![issue_item(&base, "1900-01-01")], None)),
    )
    .await;

    let discovery = LocSource::new(fast_context(&base))
        .discover_issues(&identifier(), None)
        .await;

    assert_eq!(discovery.pages_fetched, 3);
    assert!(discovery.errors.is_empty(), "{:?}", discovery.errors);
    let dates: Vec<&str> = discovery.issues.iter().map(|i| i.date.as_str()).collect();
    assert_eq!(dates, vec!["1900-01-01", "1900-01-02", "1900-01-03"]);
}

#[tokio::test]
async fn test_discovery_fan_out_collects_failed_pages() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    let base = server.uri();
    mount_first_of_total(&server, 3).await;
    mount_numbered_page(&server, 2, ResponseTemplate::new(500)).await;
    mount_numbered_page(
        &server,
        3,
        ResponseTemplate::new(200).set_body_json(collection_page(vec![issue_item(&base, "1900-01-05")], None)),
    )
    .await;

    let discovery = LocSource::new(fast_context(&base))
        .discover_issues(&identifier(), None)
        .await;

    assert_eq!(discovery.pages_fetched, 2);
    assert_eq!(discovery.errors.len(), 1);
    let dates: Vec<&str> = discovery.issues.iter().map(|i| i.date.as_str()).collect();
    assert_eq!(dates, vec!["1900-01-02", "1900-01-05"]);
}

#[tokio::test]
async fn test_discovery_filters_years_and_sends_date_range() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    let base = server.uri();
    Mock::given(method("GET"))
        .and(path(COLLECTION_PATH))
        .and(query_param("dates", "1900/1902"))
        .respond_with(ResponseTemplate::new(200).set_body_json(collection_page(
            vec![
                issue_item(&base, "1900-05-05"),
                issue_item(&base, "1901-05-05"),
                issue_item(&base, "1902-05-05"),
                json!({"date": "not-a-date", "url": format!("{base}/item/x/")}),
            ],
            None,
        )))
        .expect(1)
        .mount(&server)
        .await;

    let years = BTreeSet::from([1900, 1902]);
    let discovery = LocSource::new(fast_context(&base))
        .discover_issues(&identifier(), Some(&years))
        .await;

    let years_found: Vec<i32> = discovery.issues.iter().map(|i| i.year).collect();
    assert_eq!(years_found, vec![1900, 1902]);
}

#[tokio::test]
async fn test_discovery_reports_unreachable_collection() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("GET"))
        .and(path(COLLECTION_PATH))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let discovery = LocSource::new(fast_context(&server.uri()))
        .discover_issues(&identifier(), None)
        .await;

    assert!(discovery.issues.is_empty());
    assert_eq!(discovery.pages_fetched, 0);
    assert_eq!(discovery.errors.len(), 1);
}

#[tokio::test]
async fn test_list_pages_falls_back_to_resource_variant() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    let base = server.uri();
    let date = "1900-01-02";
    Mock::given(method("GET"))
        .and(path(format!("/item/{IDENTIFIER}/{date}/ed-1/")))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("/resource/{IDENTIFIER}/{date}/ed-1/")))
        .and(query_param("fo", "json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "resources": [
                {"url": "/resource/p1/", "pdf": "/pdf/p1.pdf", "size": 4096},
                {"url": "/resource/p2/"},
                {"url": "/resource/p3/", "pdf": "//cdn.example/p3.pdf"},
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let source = LocSource::new(fast_context(&base));
    let discovery_item = support::issue_item(&base, date);
    let issue = newsarchive_core::IssueMetadata {
        date: date.to_string(),
        edition: 1,
        url: discovery_item["url"].as_str().unwrap().to_string(),
        year: 1900,
        identifier: identifier(),
        title: String::new(),
    };
    let pages = source.list_pages(&issue).await.unwrap();

    assert_eq!(pages.len(), 2);
    assert_eq!(pages[0].page_num, 1);
    assert_eq!(pages[0].pdf_url.as_deref(), Some(format!("{base}/pdf/p1.pdf").as_str()));
    assert_eq!(pages[0].expected_size, Some(4096));
    assert_eq!(pages[1].page_num, 2);
    assert_eq!(pages[1].pdf_url.as_deref(), Some("https://cdn.example/p3.pdf"));
}

#[tokio::test]
async fn test_search_deduplicates_identifiers() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("GET"))
        .and(path(COLLECTION_PATH))
        .and(query_param("q", "evening star"))
        .and(query_param("fa", "original_format:newspaper"))
        .respond_with(ResponseTemplate::new(200).set_body_json(collection_page(
            vec![
                json!({"date": "1854-1972", "title": "Evening star.", "number_lccn": [IDENTIFIER],
                       "location_city": ["washington"], "location_state": ["district of columbia"]}),
                json!({"date": "1900-01-01", "title": "Evening star.", "number_lccn": [IDENTIFIER]}),
                json!({"date": "1866-1924", "title": "New-York tribune.", "number_lccn": "sn83030214"}),
                json!({"date": "1900", "title": "No identifier"}),
            ],
            None,
        )))
        .expect(1)
        .mount(&server)
        .await;

    let results = LocSource::new(fast_context(&server.uri()))
        .search_titles("  evening star ")
        .await;

    let ids: Vec<&str> = results.iter().map(|r| r.identifier.as_str()).collect();
    assert_eq!(ids, vec![IDENTIFIER, "sn83030214"]);
    assert_eq!(results[0].place, "washington, district of columbia");
    assert_eq!(results[1].place, "Unknown");
}

#[tokio::test]
async fn test_search_failure_is_empty() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let results = LocSource::new(fast_context(&server.uri()))
        .search_titles("anything")
        .await;
    assert!(results.is_empty());
}

#[tokio::test]
async fn test_newspaper_info_spans_issue_years() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    let base = server.uri();
    Mock::given(method("GET"))
        .and(path(COLLECTION_PATH))
        .and(query_param("c", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(collection_page(
            vec![json!({"date": "1854-1972", "title": "Evening star.",
                        "location_city": "washington", "url": format!("{base}/item/{IDENTIFIER}/")})],
            None,
        )))
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(COLLECTION_PATH))
        .and(query_param("c", "100"))
        .respond_with(ResponseTemplate::new(200).set_body_json(collection_page(
            vec![
                issue_item(&base, "1861-04-12"),
                issue_item(&base, "1854-12-16"),
                issue_item(&base, "1899-12-30"),
            ],
            None,
        )))
        .mount(&server)
        .await;

    let info = LocSource::new(fast_context(&base))
        .newspaper_info(&identifier())
        .await
        .unwrap();

    assert_eq!(info.title, "Evening star");
    assert_eq!(info.place, "washington");
    assert_eq!(info.start_year, Some(1854));
    assert_eq!(info.end_year, Some(1899));
    assert_eq!(info.url, format!("{base}/item/{IDENTIFIER}/"));
}

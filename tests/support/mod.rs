//! Shared helpers for integration tests.
#![allow(dead_code)]

pub mod socket_guard;

use std::sync::Arc;
use std::time::Duration;

use newsarchive_core::download::constants::ARTIFACT_SIGNATURE;
use newsarchive_core::{HttpClient, RateLimiter, RetryPolicy, SourceContext};
use serde_json::{Value, json};

pub const IDENTIFIER: &str = "sn83045462";

pub const COLLECTION_PATH: &str = "/collections/chronicling-america/";

/// A source context with no pacing and a single attempt per request.
pub fn fast_context(base_url: &str) -> SourceContext {
    SourceContext::new(HttpClient::new(), Arc::new(RateLimiter::disabled()), Duration::ZERO)
        .with_policy(RetryPolicy::with_max_attempts(1))
        .with_base_url(base_url)
}

/// A body that passes the artifact integrity gate.
pub fn pdf_body(seed: u8) -> Vec<u8> {
    let mut body = ARTIFACT_SIGNATURE.to_vec();
    body.extend_from_slice(b"1.4\n");
    body.extend(std::iter::repeat_n(seed, 2048));
    body
}

pub fn issue_path(date: &str) -> String {
    format!("/item/{IDENTIFIER}/{date}/ed-1/")
}

pub fn pdf_path(date: &str, page: u32) -> String {
    format!("/pdf/{IDENTIFIER}/{date}/page{page}.pdf")
}

/// A dated discovery result pointing at the issue document.
pub fn issue_item(base: &str, date: &str) -> Value {
    json!({
        "date": date,
        "url": format!("{base}{}", issue_path(date)),
        "title": ["Evening star."],
        "number_lccn": [IDENTIFIER],
    })
}

/// A collection result page; `next` is omitted when `None`.
pub fn collection_page(results: Vec<Value>, next: Option<String>) -> Value {
    let mut pagination = json!({});
    if let Some(next) = next {
        pagination["next"] = Value::String(next);
    }
    json!({ "results": results, "pagination": pagination })
}

/// An issue document with one file group per page, each holding one PDF.
pub fn issue_document(base: &str, date: &str, pages: u32) -> Value {
    let groups: Vec<Value> = (1..=pages)
        .map(|page| {
            json!([
                {"mimetype": "image/jp2", "url": format!("{base}/jp2/{page}.jp2")},
                {"mimetype": "application/pdf", "url": format!("{base}{}", pdf_path(date, page))},
            ])
        })
        .collect();
    json!({ "resources": [ { "files": groups } ] })
}

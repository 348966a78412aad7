//! Library of Congress newspaper collection (Chronicling America).
//!
//! Every request goes through the shared rate-limit gate at the scan spacing
//! and is retried by the shared policy. Artifact downloads themselves are
//! done by the engine; this source only tells it where to look.

use std::collections::{BTreeSet, HashSet};
use std::path::Path;

use async_trait::async_trait;
use futures_util::{StreamExt, stream};
use serde::de::DeserializeOwned;
use tracing::{debug, error, info, instrument, warn};

use super::payload::{CollectionItem, CollectionPage, IssueDocument, PageDocument, extract_full_text};
use super::{ArchiveSource, ArtifactLocation, Discovery, SourceContext, SourceError};
use crate::download::retry_with_backoff;
use crate::model::{
    Identifier, IssueMetadata, NewspaperInfo, OcrResult, PageMetadata, TitleResult,
    parse_issue_date,
};
use crate::ocr::{OcrTier, clean_remote_text, text_output_path, write_text_file};

/// Public API host.
pub const DEFAULT_BASE_URL: &str = "https://www.loc.gov";

const COLLECTION_PATH: &str = "/collections/chronicling-america/";

/// Results per collection page during discovery.
const DISCOVERY_PAGE_SIZE: u32 = 100;

/// Results requested for a title search.
const SEARCH_PAGE_SIZE: u32 = 50;

/// Keeps title search to newspaper records.
const NEWSPAPER_FORMAT_FILTER: &str = "original_format:newspaper";

/// Collection pages fetched concurrently when the total page count is known.
const DISCOVERY_CONCURRENCY: usize = 5;

/// Library of Congress source.
#[derive(Debug, Clone)]
pub struct LocSource {
    ctx: SourceContext,
    base_url: String,
}

impl LocSource {
    #[must_use]
    pub fn new(ctx: SourceContext) -> Self {
        let base_url = ctx
            .base_url
            .as_deref()
            .unwrap_or(DEFAULT_BASE_URL)
            .trim_end_matches('/')
            .to_string();
        Self { ctx, base_url }
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn collection_url(&self) -> String {
        format!("{}{COLLECTION_PATH}", self.base_url)
    }

    /// First discovery page, with a server-side `dates=` filter for year selections.
    fn discovery_url(&self, identifier: &Identifier, years: Option<&BTreeSet<i32>>) -> String {
        let dates = match years.and_then(|y| Some((y.first()?, y.last()?))) {
            Some((first, last)) if first == last => format!("&dates={first}"),
            Some((first, last)) => format!("&dates={first}/{last}"),
            None => String::new(),
        };
        format!(
            "{}?fa=number_lccn:{identifier}{dates}&c={DISCOVERY_PAGE_SIZE}&fo=json",
            self.collection_url()
        )
    }

    /// Makes `//host/x` and `/x` locators absolute.
    fn absolutize(&self, url: &str) -> String {
        if url.starts_with("//") {
            format!("https:{url}")
        } else if url.starts_with('/') {
            format!("{}{url}", self.base_url)
        } else {
            url.to_string()
        }
    }

    async fn fetch_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, SourceError> {
        retry_with_backoff(
            &self.ctx.policy,
            &self.ctx.limiter,
            url,
            self.ctx.scan_delay,
            |_| self.ctx.stats.increment_retried(),
            || self.ctx.http.get_json::<T>(url),
        )
        .await
        .map_err(|e| SourceError::request(url, e))
    }

    async fn fetch_text(&self, url: &str) -> Result<String, SourceError> {
        retry_with_backoff(
            &self.ctx.policy,
            &self.ctx.limiter,
            url,
            self.ctx.scan_delay,
            |_| self.ctx.stats.increment_retried(),
            || self.ctx.http.get_text(url),
        )
        .await
        .map_err(|e| SourceError::request(url, e))
    }

    /// Fetches every result page starting at `first_url`.
    ///
    /// When the first page reports both a `next` link and a page total, the
    /// remaining pages are fetched with bounded concurrency (still through
    /// the shared gate). Otherwise `next` links are followed one by one. A
    /// page without `next` always ends the walk.
    async fn fetch_all_pages(&self, first_url: &str) -> (Vec<CollectionPage>, Vec<String>) {
        let mut pages = Vec::new();
        let mut errors = Vec::new();

        let first: CollectionPage = match self.fetch_json(first_url).await {
            Ok(page) => page,
            Err(e) => {
                error!(error = %e, "failed to fetch first collection page");
                errors.push(e.to_string());
                return (pages, errors);
            }
        };

        let next = first.next_url().map(str::to_string);
        let total = first.total_pages();
        pages.push(first);

        match (next, total) {
            (Some(_), Some(total)) if total > 1 => {
                info!(total, "fetching remaining collection pages");
                let fetched: Vec<(u32, Result<CollectionPage, SourceError>)> =
                    stream::iter(2..=total)
                        .map(|sp| async move {
                            let url = format!("{first_url}&sp={sp}");
                            (sp, self.fetch_json(&url).await)
                        })
                        .buffered(DISCOVERY_CONCURRENCY)
                        .collect()
                        .await;
                for (sp, result) in fetched {
                    match result {
                        Ok(page) => pages.push(page),
                        Err(e) => {
                            error!(page = sp, error = %e, "failed to fetch collection page");
                            errors.push(e.to_string());
                        }
                    }
                }
            }
            (Some(next), _) => {
                let mut next = Some(next);
                while let Some(url) = next.take() {
                    info!(page = pages.len() + 1, "fetching collection page");
                    match self.fetch_json::<CollectionPage>(&url).await {
                        Ok(page) => {
                            next = page.next_url().map(str::to_string);
                            pages.push(page);
                        }
                        Err(e) => {
                            error!(error = %e, "failed to fetch collection page, stopping");
                            errors.push(e.to_string());
                        }
                    }
                }
            }
            _ => {}
        }

        (pages, errors)
    }

    fn issue_from_item(
        item: &CollectionItem,
        identifier: &Identifier,
        years: Option<&BTreeSet<i32>>,
    ) -> Option<IssueMetadata> {
        let raw_date = item.date.get(..10).unwrap_or(&item.date);
        let (date, year) = match parse_issue_date(raw_date) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(date = %item.date, error = %e, "skipping result with malformed date");
                return None;
            }
        };
        if years.is_some_and(|years| !years.contains(&year)) {
            return None;
        }
        let Some(url) = item.locator() else {
            debug!(date = %item.date, "skipping result without locator");
            return None;
        };

        Some(IssueMetadata {
            date: date.format("%Y-%m-%d").to_string(),
            edition: parse_edition(url),
            url: url.to_string(),
            year,
            identifier: identifier.clone(),
            title: item.clean_title().unwrap_or_default(),
        })
    }

    /// Strategy A: nested page groups, first PDF of each group.
    fn pages_from_file_groups(&self, doc: &IssueDocument, issue: &IssueMetadata) -> Vec<PageMetadata> {
        let mut pages = Vec::new();
        for resource in &doc.resources {
            for group in resource.page_groups() {
                let Some(pdf) = group.iter().find(|f| f.is_pdf()) else {
                    continue;
                };
                let page_num = next_page_num(&pages);
                pages.push(self.page(issue, page_num, None, pdf.url.as_deref(), pdf.size));
            }
        }
        pages
    }

    /// Strategy B: one page per resource carrying a direct `pdf` link.
    fn pages_from_resource_pdfs(&self, doc: &IssueDocument, issue: &IssueMetadata) -> Vec<PageMetadata> {
        let mut pages = Vec::new();
        for resource in &doc.resources {
            let Some(pdf) = resource.pdf.as_deref().filter(|p| !p.is_empty()) else {
                continue;
            };
            let page_num = next_page_num(&pages);
            pages.push(self.page(issue, page_num, resource.locator(), Some(pdf), resource.size));
        }
        pages
    }

    /// Last resort: resources with only a locator; the PDF is resolved lazily.
    fn pages_from_resource_locators(&self, doc: &IssueDocument, issue: &IssueMetadata) -> Vec<PageMetadata> {
        let mut pages = Vec::new();
        for resource in &doc.resources {
            let Some(locator) = resource.locator() else {
                continue;
            };
            let page_num = next_page_num(&pages);
            let locator = locator.replace("/item/", "/resource/");
            pages.push(self.page(issue, page_num, Some(&locator), None, None));
        }
        pages
    }

    fn page(
        &self,
        issue: &IssueMetadata,
        page_num: u32,
        locator: Option<&str>,
        pdf: Option<&str>,
        size: Option<u64>,
    ) -> PageMetadata {
        let url = locator.map_or_else(
            || self.build_page_url(&issue.identifier, &issue.date, issue.edition, page_num),
            |l| self.absolutize(l),
        );
        PageMetadata {
            issue_date: issue.date.clone(),
            edition: issue.edition,
            page_num,
            url,
            pdf_url: pdf.map(|p| self.absolutize(p)),
            expected_size: size.filter(|&s| s > 0),
            identifier: issue.identifier.clone(),
        }
    }

    async fn remote_text(&self, page: &PageMetadata) -> Result<String, SourceError> {
        let doc: PageDocument = self.fetch_json(&with_query(&page.url, "fo=json")).await?;
        let Some(service) = doc.text_service_url() else {
            return Err(SourceError::NoTextService {
                page_url: page.url.clone(),
            });
        };

        let mut url = self.absolutize(&service);
        if url.contains("word-coordinates-service") && !url.contains("full_text=1") {
            url = with_query(&url, "full_text=1");
        }

        let text = extract_full_text(&self.fetch_text(&url).await?);
        if text.trim().is_empty() {
            return Err(SourceError::EmptyText { url });
        }
        Ok(text)
    }
}

#[async_trait]
impl ArchiveSource for LocSource {
    fn name(&self) -> &str {
        "loc"
    }

    fn display_name(&self) -> &str {
        "Library of Congress"
    }

    #[instrument(skip(self, years), fields(source = "loc"))]
    async fn discover_issues(
        &self,
        identifier: &Identifier,
        years: Option<&BTreeSet<i32>>,
    ) -> Discovery {
        info!("fetching issue list");
        let (pages, errors) = self.fetch_all_pages(&self.discovery_url(identifier, years)).await;

        let mut discovery = Discovery {
            pages_fetched: pages.len(),
            errors,
            ..Discovery::default()
        };
        for item in pages.iter().flat_map(|p| &p.results) {
            if item.date.len() < 8 {
                if discovery.title.is_none() {
                    discovery.title = item.clean_title();
                }
                continue;
            }
            if let Some(issue) = Self::issue_from_item(item, identifier, years) {
                discovery.issues.push(issue);
            }
        }

        discovery
            .issues
            .sort_by(|a, b| (&a.date, a.edition).cmp(&(&b.date, b.edition)));
        discovery
            .issues
            .dedup_by(|a, b| a.date == b.date && a.edition == b.edition);

        info!(
            issues = discovery.issues.len(),
            pages = discovery.pages_fetched,
            "issue discovery finished"
        );
        discovery
    }

    #[instrument(skip(self, issue), fields(issue = %issue.key()))]
    async fn list_pages(&self, issue: &IssueMetadata) -> Result<Vec<PageMetadata>, SourceError> {
        let mut documents = Vec::new();
        let mut last_error = None;

        for variant in document_variants(&issue.url) {
            let url = with_query(&variant, "fo=json");
            let doc: IssueDocument = match self.fetch_json(&url).await {
                Ok(doc) => doc,
                Err(e) => {
                    warn!(error = %e, "issue document unavailable");
                    last_error = Some(e);
                    continue;
                }
            };

            let pages = self.pages_from_file_groups(&doc, issue);
            if !pages.is_empty() {
                debug!(pages = pages.len(), "pages found in file groups");
                return Ok(pages);
            }
            let pages = self.pages_from_resource_pdfs(&doc, issue);
            if !pages.is_empty() {
                debug!(pages = pages.len(), "pages found as resource links");
                return Ok(pages);
            }
            documents.push(doc);
        }

        for doc in &documents {
            let pages = self.pages_from_resource_locators(doc, issue);
            if !pages.is_empty() {
                debug!(pages = pages.len(), "pages found as bare resources");
                return Ok(pages);
            }
        }

        match last_error {
            Some(e) if documents.is_empty() => Err(e),
            _ => Ok(Vec::new()),
        }
    }

    #[instrument(skip(self, page), fields(page = page.page_num))]
    async fn resolve_artifact_url(&self, page: &PageMetadata) -> Result<ArtifactLocation, SourceError> {
        if let Some(pdf) = page.pdf_url.as_deref().filter(|p| !p.is_empty()) {
            return Ok(ArtifactLocation {
                url: self.absolutize(pdf),
                expected_size: page.expected_size,
            });
        }

        let doc: PageDocument = self.fetch_json(&with_query(&page.url, "fo=json")).await?;
        let url = doc
            .pdf_url()
            .map_or_else(|| guessed_pdf_url(&page.url), |pdf| self.absolutize(&pdf));
        Ok(ArtifactLocation {
            url,
            expected_size: page.expected_size,
        })
    }

    #[instrument(skip(self, page, output_dir), fields(page = page.page_num, date = %page.issue_date))]
    async fn fetch_remote_text(&self, page: &PageMetadata, output_dir: &Path) -> OcrResult {
        let path = text_output_path(output_dir, page, OcrTier::Remote);
        let raw = match self.remote_text(page).await {
            Ok(raw) => raw,
            Err(e) => return OcrResult::failed(e.to_string()),
        };
        let cleaned = clean_remote_text(&raw);
        match write_text_file(&path, page, OcrTier::Remote, &cleaned) {
            Ok(words) => OcrResult::ok(path, words),
            Err(e) => OcrResult::failed(SourceError::io(&path, e).to_string()),
        }
    }

    #[instrument(skip(self))]
    async fn search_titles(&self, query: &str) -> Vec<TitleResult> {
        let url = format!(
            "{}?q={}&fa={NEWSPAPER_FORMAT_FILTER}&c={SEARCH_PAGE_SIZE}&fo=json",
            self.collection_url(),
            urlencoding::encode(query.trim())
        );
        let page: CollectionPage = match self.fetch_json(&url).await {
            Ok(page) => page,
            Err(e) => {
                warn!(error = %e, "title search failed");
                return Vec::new();
            }
        };

        let mut seen = HashSet::new();
        page.results
            .iter()
            .filter_map(|item| {
                let identifier = item.number_lccn.first()?.trim().to_string();
                if identifier.is_empty() || !seen.insert(identifier.clone()) {
                    return None;
                }
                Some(TitleResult {
                    identifier,
                    title: item.clean_title().unwrap_or_else(|| "Unknown".to_string()),
                    place: item.place().unwrap_or_else(|| "Unknown".to_string()),
                    dates: item.date.clone(),
                    url: item.locator().unwrap_or_default().to_string(),
                })
            })
            .collect()
    }

    #[instrument(skip(self))]
    async fn newspaper_info(&self, identifier: &Identifier) -> Option<NewspaperInfo> {
        let url = format!(
            "{}?fa=number_lccn:{identifier}&c=1&fo=json",
            self.collection_url()
        );
        let head: CollectionPage = match self.fetch_json(&url).await {
            Ok(page) => page,
            Err(e) => {
                warn!(error = %e, "newspaper lookup failed");
                return None;
            }
        };
        let record = head
            .results
            .iter()
            .find(|item| item.is_title_record())
            .or_else(|| head.results.first())?;

        let (pages, errors) = self.fetch_all_pages(&self.discovery_url(identifier, None)).await;
        if !errors.is_empty() {
            warn!(failed_pages = errors.len(), "year span may be incomplete");
        }
        let years: Vec<i32> = pages
            .iter()
            .flat_map(|p| &p.results)
            .filter_map(|item| item.date.get(..4)?.parse().ok())
            .collect();

        Some(NewspaperInfo {
            identifier: identifier.to_string(),
            title: record.clean_title().unwrap_or_else(|| "Unknown".to_string()),
            place: record.place().unwrap_or_else(|| "Unknown".to_string()),
            start_year: years.iter().min().copied(),
            end_year: years.iter().max().copied(),
            url: record.locator().map_or_else(
                || format!("{}/item/{identifier}/", self.base_url),
                str::to_string,
            ),
        })
    }

    fn build_issue_url(&self, identifier: &Identifier, date: &str, edition: u32) -> String {
        format!("{}/item/{identifier}/{date}/ed-{edition}/", self.base_url)
    }

    fn build_page_url(&self, identifier: &Identifier, date: &str, edition: u32, page: u32) -> String {
        format!(
            "{}/resource/{identifier}/{date}/ed-{edition}/?sp={page}",
            self.base_url
        )
    }
}

fn next_page_num(pages: &[PageMetadata]) -> u32 {
    u32::try_from(pages.len()).map_or(u32::MAX, |n| n.saturating_add(1))
}

/// Edition from a `/ed-N` locator segment; 1 when absent or malformed.
fn parse_edition(url: &str) -> u32 {
    url.split_once("/ed-")
        .map(|(_, rest)| rest.chars().take_while(char::is_ascii_digit).collect::<String>())
        .and_then(|digits| digits.parse().ok())
        .filter(|&edition| edition > 0)
        .unwrap_or(1)
}

/// The `/item/` variant first, then the `/resource/` variant, each with a trailing slash.
fn document_variants(url: &str) -> Vec<String> {
    let base = if url.contains('?') || url.ends_with('/') {
        url.to_string()
    } else {
        format!("{url}/")
    };
    let mut variants = vec![base.clone()];
    if base.contains("/item/") {
        variants.push(base.replace("/item/", "/resource/"));
    }
    variants
}

fn with_query(url: &str, param: &str) -> String {
    let separator = if url.contains('?') { '&' } else { '?' };
    format!("{url}{separator}{param}")
}

/// `{page}/seq-{n}.pdf` for `?sp=n` locators, else `{page}.pdf`.
fn guessed_pdf_url(page_url: &str) -> String {
    let (path, query) = page_url.split_once('?').unwrap_or((page_url, ""));
    let path = path.trim_end_matches('/');
    let sequence = query
        .split('&')
        .find_map(|pair| pair.strip_prefix("sp="))
        .filter(|n| !n.is_empty());
    match sequence {
        Some(n) => format!("{path}/seq-{n}.pdf"),
        None => format!("{path}.pdf"),
    }
}

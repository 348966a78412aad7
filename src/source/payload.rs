//! Typed views of the collection API's JSON documents.
//!
//! The API is loosely typed: fields that are usually strings show up as
//! lists, numbers arrive as strings, and whole sections go missing. Every
//! field here is optional or defaulted, and [`lenient`] swallows shape
//! mismatches so one odd field never rejects a whole document.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};

/// Deserializes `T`, falling back to `T::default()` on any shape mismatch.
fn lenient<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned + Default,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).unwrap_or_default())
}

/// A field that is either one value or a list of values.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany<T> {
    One(T),
    Many(Vec<T>),
}

impl<T> Default for OneOrMany<T> {
    fn default() -> Self {
        Self::Many(Vec::new())
    }
}

impl<T> OneOrMany<T> {
    #[must_use]
    pub fn first(&self) -> Option<&T> {
        match self {
            Self::One(value) => Some(value),
            Self::Many(values) => values.first(),
        }
    }

    #[must_use]
    pub fn to_vec(&self) -> Vec<&T> {
        match self {
            Self::One(value) => vec![value],
            Self::Many(values) => values.iter().collect(),
        }
    }
}

/// One page of collection search results.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CollectionPage {
    #[serde(default, deserialize_with = "lenient")]
    pub results: Vec<CollectionItem>,
    #[serde(default, deserialize_with = "lenient")]
    pub pagination: Option<Pagination>,
}

impl CollectionPage {
    #[must_use]
    pub fn next_url(&self) -> Option<&str> {
        self.pagination
            .as_ref()
            .and_then(|p| p.next.as_deref())
            .filter(|next| !next.is_empty())
    }

    /// Total result pages, when the server reports it.
    #[must_use]
    pub fn total_pages(&self) -> Option<u32> {
        self.pagination.as_ref().and_then(|p| p.total)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Pagination {
    #[serde(default, deserialize_with = "lenient")]
    pub next: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub total: Option<u32>,
}

/// A search hit: either a dated issue or a title-level record.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CollectionItem {
    #[serde(default, deserialize_with = "lenient")]
    pub date: String,
    #[serde(default, deserialize_with = "lenient")]
    pub url: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub title: OneOrMany<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub number_lccn: OneOrMany<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub location_city: OneOrMany<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub location_state: OneOrMany<String>,
}

impl CollectionItem {
    /// Locator of the item: `url`, else `id`.
    #[must_use]
    pub fn locator(&self) -> Option<&str> {
        self.url
            .as_deref()
            .filter(|u| !u.is_empty())
            .or_else(|| self.id.as_deref().filter(|u| !u.is_empty()))
    }

    /// Title without surrounding whitespace or a trailing period.
    #[must_use]
    pub fn clean_title(&self) -> Option<String> {
        self.title
            .first()
            .map(|t| t.trim().trim_end_matches('.').trim().to_string())
            .filter(|t| !t.is_empty())
    }

    /// `city, state` from the location fields.
    #[must_use]
    pub fn place(&self) -> Option<String> {
        let parts: Vec<&str> = self
            .location_city
            .to_vec()
            .into_iter()
            .chain(self.location_state.to_vec())
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .collect();
        (!parts.is_empty()).then(|| parts.join(", "))
    }

    /// True for title-level records, whose date is a bare year or year range.
    #[must_use]
    pub fn is_title_record(&self) -> bool {
        self.date.len() <= 10 && !self.date.get(5..).is_some_and(|rest| rest.contains('-'))
    }
}

/// Issue-detail document (`/item/...` or `/resource/...` with `fo=json`).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct IssueDocument {
    #[serde(default, deserialize_with = "lenient")]
    pub resources: Vec<ResourceEntry>,
}

/// One resource of an issue document.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResourceEntry {
    /// Page groups; each group lists the derivative files of one page.
    #[serde(default, deserialize_with = "lenient")]
    pub files: Vec<serde_json::Value>,
    #[serde(default, deserialize_with = "lenient")]
    pub pdf: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub url: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub size: Option<u64>,
}

impl ResourceEntry {
    /// Page groups that are arrays of file entries; anything else is ignored.
    #[must_use]
    pub fn page_groups(&self) -> Vec<Vec<FileEntry>> {
        self.files
            .iter()
            .filter(|group| group.is_array())
            .map(|group| serde_json::from_value::<Vec<serde_json::Value>>(group.clone()).unwrap_or_default())
            .map(|entries| {
                entries
                    .into_iter()
                    .filter_map(|e| serde_json::from_value::<FileEntry>(e).ok())
                    .collect()
            })
            .collect()
    }

    #[must_use]
    pub fn locator(&self) -> Option<&str> {
        self.url
            .as_deref()
            .filter(|u| !u.is_empty())
            .or_else(|| self.id.as_deref().filter(|u| !u.is_empty()))
    }
}

/// A derivative file of a page (PDF, JP2, ALTO XML...).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FileEntry {
    #[serde(default, deserialize_with = "lenient")]
    pub mimetype: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub url: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub size: Option<u64>,
}

impl FileEntry {
    #[must_use]
    pub fn is_pdf(&self) -> bool {
        self.mimetype.as_deref() == Some("application/pdf")
            && self.url.as_deref().is_some_and(|u| !u.is_empty())
    }
}

/// Page document (a single page resource with `fo=json`).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PageDocument {
    #[serde(default, deserialize_with = "lenient")]
    pub resource: Option<PageResource>,
    /// Flat or nested list of file entries.
    #[serde(default, deserialize_with = "lenient")]
    pub files: Vec<serde_json::Value>,
    #[serde(default, deserialize_with = "lenient")]
    pub fulltext_service: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PageResource {
    #[serde(default, deserialize_with = "lenient")]
    pub pdf: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub fulltext_file: Option<String>,
}

impl PageDocument {
    /// `resource.pdf`, else the first PDF among `files` (flattening one level).
    #[must_use]
    pub fn pdf_url(&self) -> Option<String> {
        if let Some(pdf) = self
            .resource
            .as_ref()
            .and_then(|r| r.pdf.clone())
            .filter(|p| !p.is_empty())
        {
            return Some(pdf);
        }
        self.files
            .iter()
            .flat_map(|entry| match entry {
                serde_json::Value::Array(group) => group.clone(),
                other => vec![other.clone()],
            })
            .filter_map(|entry| serde_json::from_value::<FileEntry>(entry).ok())
            .find(FileEntry::is_pdf)
            .and_then(|entry| entry.url)
    }

    /// `resource.fulltext_file`, else the top-level `fulltext_service`.
    #[must_use]
    pub fn text_service_url(&self) -> Option<String> {
        self.resource
            .as_ref()
            .and_then(|r| r.fulltext_file.clone())
            .filter(|u| !u.is_empty())
            .or_else(|| self.fulltext_service.clone().filter(|u| !u.is_empty()))
    }
}

/// Extracts the text from a text-service response.
///
/// The service answers with a JSON object keyed by segment id, each value
/// carrying a `full_text` string. Any body that is not such an object is
/// taken to be the text itself.
#[must_use]
pub fn extract_full_text(body: &str) -> String {
    match serde_json::from_str::<serde_json::Map<String, serde_json::Value>>(body) {
        Ok(segments) => segments
            .values()
            .next()
            .and_then(|segment| segment.get("full_text"))
            .and_then(serde_json::Value::as_str)
            .unwrap_or_default()
            .to_string(),
        Err(_) => body.to_string(),
    }
}

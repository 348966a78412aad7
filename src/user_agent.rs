//! User-Agent sent with every archive request.

const PROJECT_UA_URL: &str = "https://github.com/newsarchive/newsarchive";

/// Identifies the tool and version so archive operators can reach us.
#[must_use]
pub(crate) fn default_user_agent() -> String {
    let version = env!("CARGO_PKG_VERSION");
    format!("newsarchive/{version} (historical-newspaper-archiver; +{PROJECT_UA_URL})")
}

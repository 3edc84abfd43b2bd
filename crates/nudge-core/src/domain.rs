//! Domain matching for work-site and entertainment-site detection.
//!
//! Matching works on a "root domain": the last two DNS labels of a hostname
//! with any leading `www.` removed. This is a heuristic. Hosts under
//! multi-label public suffixes such as `co.uk` all collapse onto the suffix
//! (`bbc.co.uk` and `gov.co.uk` both become `co.uk`), which is a known
//! limitation of the matcher.
//!
//! URL parse failures never surface as errors here; they simply fail to
//! match.

use std::sync::LazyLock;

use regex::Regex;
use url::Url;

use crate::types::ValidationError;

/// Scheme and `www.` prefix accepted when a user types a site to block.
static SITE_PREFIX_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(https?://)?(www\.)?").unwrap());

/// Sign-in pages that must never be redirected or blocked.
///
/// Matched as substrings of the full URL so path-qualified entries such as
/// `github.com/login` work.
pub const SIGN_IN_PASSTHROUGH: &[&str] = &[
    "accounts.google.com",
    "login.microsoftonline.com",
    "github.com/login",
    "auth0.com",
    "appleid.apple.com",
    "facebook.com/login",
    "twitter.com/oauth",
    "api.twitter.com",
];

/// Addresses the browser uses for its built-in new-tab page.
pub const NEW_TAB_URLS: &[&str] = &["chrome://newtab/", "about:newtab"];

/// URL prefixes of pages that scripts cannot be injected into.
const PRIVILEGED_PREFIXES: &[&str] = &["chrome://", "chrome-extension://", "about:"];

/// Returns the root domain of a hostname.
///
/// Strips a leading `www.` and keeps the last two labels. Hostnames with two
/// or fewer labels are returned whole (minus `www.`).
pub fn root_domain(hostname: &str) -> String {
    let stripped = hostname.strip_prefix("www.").unwrap_or(hostname);
    let labels: Vec<&str> = stripped.split('.').collect();
    if labels.len() <= 2 {
        return stripped.to_string();
    }
    labels[labels.len() - 2..].join(".")
}

/// Extracts the hostname of a URL, or `None` if it does not parse or has no host.
pub fn hostname_of(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    parsed
        .host_str()
        .filter(|host| !host.is_empty())
        .map(str::to_string)
}

/// Returns true if both URLs parse and share a root domain.
pub fn same_root_domain(a: &str, b: &str) -> bool {
    match (hostname_of(a), hostname_of(b)) {
        (Some(a), Some(b)) => root_domain(&a) == root_domain(&b),
        _ => false,
    }
}

/// Returns true if `hostname` equals, or is a subdomain of, any listed site.
///
/// Both sides are lowercased and stripped of `www.` before comparison.
pub fn is_entertainment<S: AsRef<str>>(hostname: &str, sites: &[S]) -> bool {
    let host = hostname.to_lowercase();
    let host = host.strip_prefix("www.").unwrap_or(&host);
    if host.is_empty() {
        return false;
    }
    sites.iter().any(|site| {
        let site = site.as_ref().to_lowercase();
        let site = site.strip_prefix("www.").unwrap_or(&site);
        !site.is_empty()
            && (host == site
                || host
                    .strip_suffix(site)
                    .is_some_and(|prefix| prefix.ends_with('.')))
    })
}

/// URL flavour of [`is_entertainment`]; unparseable URLs never match.
pub fn is_entertainment_url<S: AsRef<str>>(url: &str, sites: &[S]) -> bool {
    hostname_of(url).is_some_and(|host| is_entertainment(&host, sites))
}

/// Normalizes a user-typed site for the entertainment list.
///
/// Lowercases, trims, drops an `http(s)://` scheme, a leading `www.` and a
/// single trailing slash.
pub fn normalize_site(raw: &str) -> String {
    let lowered = raw.trim().to_lowercase();
    let stripped = SITE_PREFIX_RE.replace(&lowered, "");
    stripped
        .strip_suffix('/')
        .unwrap_or(stripped.as_ref())
        .to_string()
}

/// Validates a user-typed work URL, adding `https://` when no scheme is given.
pub fn normalize_target_url(raw: &str) -> Result<String, ValidationError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::Empty {
            field: "target URL",
        });
    }

    let candidate = if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("https://{trimmed}")
    };

    let parsed = Url::parse(&candidate).map_err(|err| ValidationError::InvalidUrl {
        value: raw.to_string(),
        reason: err.to_string(),
    })?;
    if parsed.host_str().is_none_or(str::is_empty) {
        return Err(ValidationError::InvalidUrl {
            value: raw.to_string(),
            reason: "missing host".to_string(),
        });
    }

    Ok(candidate)
}

/// Returns true for sign-in pages listed in [`SIGN_IN_PASSTHROUGH`].
pub fn is_sign_in_url(url: &str) -> bool {
    SIGN_IN_PASSTHROUGH.iter().any(|needle| url.contains(needle))
}

/// Returns true for the browser's built-in new-tab address.
pub fn is_new_tab_page(url: &str) -> bool {
    NEW_TAB_URLS.contains(&url)
}

/// Returns true for pages the host refuses to inject scripts into.
pub fn is_privileged_url(url: &str) -> bool {
    PRIVILEGED_PREFIXES
        .iter()
        .any(|prefix| url.starts_with(prefix))
}

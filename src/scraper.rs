use scraper::{Html, Selector};
use tracing::{debug, instrument};

/// Links pointing back into the search provider itself rather than at a result.
const PROVIDER_INTERNAL_PATTERNS: [&str; 10] = [
    "google.com/search",
    "google.com/url",
    "google.com/imgres",
    "accounts.google",
    "webcache.googleusercontent",
    "/preferences",
    "/settings",
    "/advanced_search",
    "/setprefs",
    "javascript:",
];

/// How raw `href` values are turned into candidate URLs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LinkMode {
    /// Keep every href that starts with `http`, verbatim and in document order.
    Absolute,
    /// Unwrap `/url?q=` redirects, drop provider-internal links and exact repeats.
    SearchResults,
}

/// The `LinkExtractor` struct pulls candidate URLs out of result-page markup.
/// It uses CSS selectors to find the anchors of interest.
pub struct LinkExtractor {
    /// All patterns as one selector group, so matches come back in document order.
    selector: Option<Selector>,
    mode: LinkMode,
}

impl LinkExtractor {
    /// Every anchor on the page whose href is an absolute `http` URL.
    pub fn anchors() -> Self {
        Self::new(["a[href]"], LinkMode::Absolute)
    }

    /// Organic result links as laid out by common search result pages.
    pub fn search_results() -> Self {
        // Try multiple selector patterns that Google might use
        let patterns = [
            "div.g div.yuRUbf > a",
            "div.tF2Cxc > div.yuRUbf > a",
            "div.g a[href]",
            "div[class='g'] a[ping]",
            "div.rc > a",
            "div.r > a",
            "a[data-ved]",
            "a[href^='/url?']",
        ];
        Self::new(patterns, LinkMode::SearchResults)
    }

    fn new(patterns: impl IntoIterator<Item = impl AsRef<str>>, mode: LinkMode) -> Self {
        let valid: Vec<String> = patterns
            .into_iter()
            .map(|s| s.as_ref().to_string())
            .filter(|s| Selector::parse(s).is_ok())
            .collect();
        let selector = Selector::parse(&valid.join(", ")).ok();
        Self { selector, mode }
    }

    /// Extracts candidate URLs from the given HTML string.
    #[instrument(skip(self, html), fields(html_length = html.len()))]
    pub fn extract(&self, html: &str) -> Vec<String> {
        let Some(selector) = &self.selector else {
            return Vec::new();
        };
        let document = Html::parse_document(html);
        let mut urls: Vec<String> = Vec::new();

        for element in document.select(selector) {
            let Some(href) = element.value().attr("href") else {
                continue;
            };

            let candidate = match self.mode {
                LinkMode::Absolute => href.starts_with("http").then(|| href.to_string()),
                LinkMode::SearchResults => clean_redirect_url(href).filter(|u| is_result_url(u)),
            };

            match candidate {
                Some(url) if self.mode == LinkMode::Absolute || !urls.contains(&url) => {
                    urls.push(url)
                }
                Some(_) => {}
                None => debug!("Ignoring link: {}", href),
            }
        }

        debug!(count = urls.len(), "Extracted links");
        urls
    }
}

/// Unwraps a search redirect (`/url?q=<target>&...`) into its target URL.
/// Absolute URLs pass through unchanged; anything else yields `None`.
fn clean_redirect_url(href: &str) -> Option<String> {
    if let Some((_, query)) = href.split_once("/url?") {
        let target = query.split('&').find_map(|pair| pair.strip_prefix("q="))?;
        let decoded = urlencoding::decode(target).ok()?.into_owned();
        return decoded.starts_with("http").then_some(decoded);
    }

    href.starts_with("http").then(|| href.to_string())
}

fn is_result_url(url: &str) -> bool {
    (url.starts_with("https://") || url.starts_with("http://"))
        && !PROVIDER_INTERNAL_PATTERNS
            .iter()
            .any(|pattern| url.contains(pattern))
}

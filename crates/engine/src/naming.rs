use std::sync::LazyLock;

use scraper::{Html, Selector};
use url::Url;

use crate::text::{collapse_whitespace, element_text, truncate_chars};

const MAX_NAME_CHARS: usize = 180;

enum Source {
    Content,
    Text,
}

static NAME_SOURCES: LazyLock<Vec<(Selector, Source)>> = LazyLock::new(|| {
    [
        (r#"meta[property="og:title"]"#, Source::Content),
        (r#"meta[name="twitter:title"]"#, Source::Content),
        ("h1", Source::Text),
        ("title", Source::Text),
    ]
    .into_iter()
    .map(|(css, source)| (Selector::parse(css).expect("valid name selector"), source))
    .collect()
});

/// Human-readable item name from the page's title metadata.
pub fn detect_name(document: &Html, url: &str) -> String {
    NAME_SOURCES
        .iter()
        .flat_map(|(selector, source)| {
            document.select(selector).map(move |element| match source {
                Source::Content => element
                    .value()
                    .attr("content")
                    .map(collapse_whitespace)
                    .unwrap_or_default(),
                Source::Text => element_text(&element),
            })
        })
        .find(|name| !name.is_empty())
        .map(|name| truncate_chars(&name, MAX_NAME_CHARS))
        .unwrap_or_else(|| fallback_name(url))
}

/// "Item from <host>", or the URL itself when it has no host.
pub fn fallback_name(url: &str) -> String {
    match Url::parse(url).ok().as_ref().and_then(Url::host_str) {
        Some(host) => format!("Item from {host}"),
        None => truncate_chars(url, MAX_NAME_CHARS),
    }
}

//! Light fetch: one un-rendered HTTP GET plus SEO metadata extraction.
//!
//! No browser is involved. The HTTP status is not checked, so callers
//! must tolerate empty or irrelevant markup; [`parse_seo`] never fails.

use std::io::Cursor;

use async_trait::async_trait;
use scraper::{ElementRef, Html, Selector};
use sha2::{Digest, Sha256};
use tracing::debug;
use url::Url;

use crate::config::IngestConfig;
use crate::error::IngestError;
use crate::models::SeoFragment;

/// Source of static page HTML.
///
/// Implemented by [`HttpFetcher`] in production and by canned-response
/// fakes in tests.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch_html(&self, url: &str) -> Result<String, IngestError>;
}

/// `reqwest`-backed fetcher with a fixed timeout and desktop user agent.
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(config: &IngestConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.fetch_timeout())
            .user_agent(config.user_agent.clone())
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch_html(&self, url: &str) -> Result<String, IngestError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| IngestError::network(url, e))?;

        if !response.status().is_success() {
            debug!(url, status = %response.status(), "non-success status, using body anyway");
        }

        response
            .text()
            .await
            .map_err(|e| IngestError::network(url, e))
    }
}

fn select<'a>(doc: &'a Html, css: &str) -> Vec<ElementRef<'a>> {
    match Selector::parse(css) {
        Ok(selector) => doc.select(&selector).collect(),
        Err(_) => Vec::new(),
    }
}

/// Last non-empty value of `attr` across every element matching `css`.
fn last_attr(doc: &Html, css: &str, attr: &str) -> Option<String> {
    select(doc, css)
        .into_iter()
        .filter_map(|el| el.value().attr(attr))
        .filter(|v| !v.is_empty())
        .last()
        .map(str::to_string)
}

/// Extract title, excerpt, accent colour, and images from static HTML.
///
/// Later sources override earlier ones: `og:title` beats `<title>`,
/// `twitter:description` beats `og:description` beats the meta
/// description, and a plain `icon` link beats a `shortcut icon`.
pub fn parse_seo(html: &str) -> SeoFragment {
    let doc = Html::parse_document(html);
    let mut seo = SeoFragment::default();

    if let Some(title) = select(&doc, "title").first() {
        seo.title = title.text().collect::<String>().trim().to_string();
    }
    if let Some(og_title) = last_attr(&doc, "meta[property='og:title']", "content") {
        seo.title = og_title;
    }
    if let Some(site) = last_attr(&doc, "meta[property='og:site_name']", "content") {
        if seo.title.is_empty() {
            seo.title = site;
        } else if !seo.title.contains(&site) {
            seo.title = format!("{} - {}", site, seo.title);
        }
    }

    for css in [
        "meta[name='description']",
        "meta[property='og:description']",
        "meta[name='twitter:description']",
    ] {
        if let Some(excerpt) = last_attr(&doc, css, "content") {
            seo.excerpt = excerpt;
        }
    }

    if let Some(color) = last_attr(&doc, "meta[name='theme-color']", "content") {
        seo.accent_color = color;
    }

    for css in ["link[rel='shortcut icon']", "link[rel='icon']"] {
        if let Some(icon) = last_attr(&doc, css, "href") {
            seo.image_small = icon;
        }
    }

    seo.image_large = last_attr(&doc, "meta[property='og:image']", "content")
        .or_else(|| {
            select(&doc, "img[src]")
                .into_iter()
                .filter_map(|img| img.value().attr("src"))
                .find(|src| !src.is_empty())
                .map(str::to_string)
        })
        .unwrap_or_default();

    seo
}

const EXCERPT_WORDS: usize = 50;

/// Title and opening words of the page's main content, found by the
/// readability algorithm rather than by metadata.
///
/// Returns an empty fragment when the page has no extractable content.
pub fn parse_readable(page_url: &str, html: &str) -> SeoFragment {
    let Ok(url) = Url::parse(page_url) else {
        return SeoFragment::default();
    };
    let mut cursor = Cursor::new(html.as_bytes());
    let product = match readability::extractor::extract(&mut cursor, &url) {
        Ok(product) => product,
        Err(e) => {
            debug!(url = page_url, error = %e, "readability extraction failed");
            return SeoFragment::default();
        }
    };

    let words: Vec<&str> = product.text.split_whitespace().take(EXCERPT_WORDS + 1).collect();
    let excerpt = if words.len() > EXCERPT_WORDS {
        format!("{}...", words[..EXCERPT_WORDS].join(" "))
    } else {
        words.join(" ")
    };

    SeoFragment {
        title: product.title.trim().to_string(),
        excerpt,
        ..SeoFragment::default()
    }
}

/// Resolve an image reference found on `page_url` to an absolute URL.
pub fn proper_image_url(page_url: &str, image_url: &str) -> String {
    if image_url.is_empty() {
        return String::new();
    }
    if image_url.starts_with("http") {
        return image_url.to_string();
    }
    if let Some(rest) = image_url.strip_prefix("//") {
        return format!("https://{}", rest);
    }
    if image_url.starts_with('/') {
        return match url::Url::parse(page_url) {
            Ok(page) => match page.host_str() {
                Some(host) => match page.port() {
                    Some(port) => format!("{}://{}:{}{}", page.scheme(), host, port, image_url),
                    None => format!("{}://{}{}", page.scheme(), host, image_url),
                },
                None => image_url.to_string(),
            },
            Err(_) => image_url.to_string(),
        };
    }
    format!("{}{}", page_url, image_url)
}

/// Trimmed `raw` if it is an absolute http(s) URL with a host.
///
/// The input is returned as written, not re-serialized, so the stored URL
/// matches what the user submitted.
pub fn normalize_url(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    let parsed = url::Url::parse(trimmed).ok()?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return None;
    }
    match parsed.host_str() {
        Some(host) if !host.is_empty() => Some(trimmed.to_string()),
        _ => None,
    }
}

/// Host of `url` without any port.
pub fn domain_of(url: &str) -> Option<String> {
    url::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
}

/// Deterministic `#RRGGBB` colour derived from the URL.
pub fn fallback_accent_color(url: &str) -> String {
    let digest = Sha256::digest(url.as_bytes());
    format!("#{:02X}{:02X}{:02X}", digest[0], digest[1], digest[2])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_og_title_overrides_title() {
        let seo = parse_seo(r#"<title>A</title><meta property="og:title" content="B">"#);
        assert_eq!(seo.title, "B");
    }

    #[test]
    fn test_site_name_prefix_only_when_missing() {
        let html = r#"<head><title>Rust Blog</title>
            <meta property="og:site_name" content="Rust"></head>"#;
        assert_eq!(parse_seo(html).title, "Rust Blog");

        let html = r#"<head><title>Release notes</title>
            <meta property="og:site_name" content="Rust"></head>"#;
        assert_eq!(parse_seo(html).title, "Rust - Release notes");
    }

    #[test]
    fn test_site_name_alone_becomes_title() {
        let html = r#"<head><meta property="og:site_name" content="Rust"></head>"#;
        assert_eq!(parse_seo(html).title, "Rust");
    }

    #[test]
    fn test_readable_excerpt_without_meta_description() {
        let body = "Ownership rules decide when values are dropped and who may borrow them. ";
        let html = format!(
            "<html><head><title>Ownership</title></head><body><div><article>\
             <p>{}</p><p>{}</p></article></div></body></html>",
            body.repeat(3),
            body.repeat(6)
        );
        assert!(parse_seo(&html).excerpt.is_empty());

        let readable = parse_readable("https://blog.io/ownership", &html);
        assert_eq!(readable.title, "Ownership");
        assert!(readable.excerpt.contains("Ownership rules decide"));
        assert!(readable.excerpt.ends_with("..."));
        assert!(readable.image_small.is_empty());
    }

    #[test]
    fn test_readable_tolerates_garbage() {
        assert!(parse_readable("not a url", "<p>x</p>").excerpt.is_empty());
        let readable = parse_readable("https://a.com", "");
        assert!(readable.title.is_empty());
    }

    #[test]
    fn test_excerpt_priority() {
        let html = r#"<head>
            <meta name="description" content="plain">
            <meta property="og:description" content="og">
            <meta name="twitter:description" content="tw">
        </head>"#;
        assert_eq!(parse_seo(html).excerpt, "tw");

        let html = r#"<meta name="description" content="plain"><meta property="og:description" content="">"#;
        assert_eq!(parse_seo(html).excerpt, "plain");
    }

    #[test]
    fn test_icons_theme_color_and_images() {
        let html = r##"<head>
            <link rel="icon" href="/icon.png">
            <link rel="shortcut icon" href="/favicon.ico">
            <meta name="theme-color" content="#112233">
        </head><body><img src=""><img src="/first.png"><img src="/second.png"></body>"##;
        let seo = parse_seo(html);
        assert_eq!(seo.image_small, "/icon.png");
        assert_eq!(seo.accent_color, "#112233");
        assert_eq!(seo.image_large, "/first.png");
    }

    #[test]
    fn test_og_image_beats_img() {
        let html = r#"<meta property="og:image" content="https://cdn/x.png"><img src="/a.png">"#;
        assert_eq!(parse_seo(html).image_large, "https://cdn/x.png");
    }

    #[test]
    fn test_malformed_html_does_not_fail() {
        let seo = parse_seo("<<<title>>>oops</div");
        assert!(seo.excerpt.is_empty());
        assert_eq!(parse_seo("").title, "");
    }

    #[test]
    fn test_proper_image_url() {
        assert_eq!(
            proper_image_url("https://a.com/page", "/img.png"),
            "https://a.com/img.png"
        );
        assert_eq!(
            proper_image_url("https://a.com", "//cdn.com/x.png"),
            "https://cdn.com/x.png"
        );
        assert_eq!(
            proper_image_url("https://a.com", "http://b.com/y.png"),
            "http://b.com/y.png"
        );
        assert_eq!(proper_image_url("https://a.com/", "img.png"), "https://a.com/img.png");
        assert_eq!(proper_image_url("https://a.com", ""), "");
        assert_eq!(
            proper_image_url("http://localhost:8080/p", "/i.png"),
            "http://localhost:8080/i.png"
        );
    }

    #[test]
    fn test_normalize_url() {
        assert_eq!(
            normalize_url("  https://a.com/x  ").as_deref(),
            Some("https://a.com/x")
        );
        assert_eq!(normalize_url("ftp://a.com"), None);
        assert_eq!(normalize_url("a.com"), None);
        assert_eq!(normalize_url(""), None);
    }

    #[test]
    fn test_domain_strips_port() {
        assert_eq!(domain_of("https://example.com:8443/x").as_deref(), Some("example.com"));
        assert_eq!(domain_of("not a url"), None);
    }

    #[test]
    fn test_fallback_accent_is_stable_hex() {
        let a = fallback_accent_color("https://a.com");
        assert_eq!(a, fallback_accent_color("https://a.com"));
        assert_eq!(a.len(), 7);
        assert!(a.starts_with('#'));
        assert!(a[1..].chars().all(|c| c.is_ascii_hexdigit()));
    }
}

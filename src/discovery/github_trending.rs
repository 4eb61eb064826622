//! Trending repositories on GitHub.
//!
//! Logged-out trending pages link each repository's star button through
//! `/login?return_to=<escaped path>`; the canonical repository URL is
//! recovered from that parameter.

use scraper::{Html, Selector};
use url::Url;

use super::{fetch_page, Discovery};
use crate::fetcher::PageFetcher;

const GITHUB: &str = "https://github.com";

/// Trending page for the interval; unknown intervals get the default listing.
pub fn trending_url(base: &str, interval_days: i64) -> String {
    let base = base.trim_end_matches('/');
    match interval_days {
        1 => format!("{base}/trending?since=daily"),
        7 => format!("{base}/trending?since=weekly"),
        30 => format!("{base}/trending?since=monthly"),
        _ => format!("{base}/trending"),
    }
}

fn return_to(href: &str) -> Option<String> {
    if !href.starts_with("/login?return_to=") {
        return None;
    }
    let login = Url::parse(GITHUB).ok()?.join(href).ok()?;
    login
        .query_pairs()
        .find(|(key, _)| key == "return_to")
        .map(|(_, path)| format!("{GITHUB}{path}"))
}

pub fn parse_trending(html: &str) -> Vec<String> {
    let doc = Html::parse_document(html);
    let (Ok(rows), Ok(link)) = (
        Selector::parse("div.Box article.Box-row"),
        Selector::parse("a"),
    ) else {
        return Vec::new();
    };

    doc.select(&rows)
        .filter_map(|row| row.select(&link).next())
        .filter_map(|a| a.value().attr("href"))
        .filter_map(return_to)
        .collect()
}

pub async fn discover(fetcher: &dyn PageFetcher, base: &str, interval_days: i64) -> Discovery {
    match fetch_page(fetcher, &trending_url(base, interval_days)).await {
        Ok(html) => Discovery::from_urls(parse_trending(&html)),
        Err(failed) => failed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trending_url_by_interval() {
        assert_eq!(
            trending_url("https://github.com/", 7),
            "https://github.com/trending?since=weekly"
        );
        assert_eq!(trending_url("https://github.com", 3), "https://github.com/trending");
    }

    #[test]
    fn test_recovers_repo_from_login_redirect() {
        let html = r#"<div class="Box">
            <article class="Box-row"><a href="/login?return_to=%2Frust-lang%2Frust">Star</a>
                <h2><a href="/rust-lang/rust">rust</a></h2></article>
            <article class="Box-row"><a href="/tokio-rs/tokio">no redirect</a></article>
            <article class="Box-row"><a href="/login?return_to=%2Fserde-rs%2Fserde">Star</a></article>
        </div>"#;
        assert_eq!(
            parse_trending(html),
            vec![
                "https://github.com/rust-lang/rust",
                "https://github.com/serde-rs/serde"
            ]
        );
    }

    #[test]
    fn test_no_rows_is_empty() {
        assert!(parse_trending("<html><body>rate limited</body></html>").is_empty());
    }
}

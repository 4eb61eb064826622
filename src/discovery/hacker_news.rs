//! Hacker News front page.

use scraper::{Html, Selector};
use url::Url;

use super::{fetch_page, Discovery};
use crate::fetcher::PageFetcher;

/// Outbound links of ranked submissions, resolved against `page_url`.
///
/// Self posts link to `item?id=…` and resolve to the discussion page.
pub fn parse_front_page(page_url: &str, html: &str) -> Vec<String> {
    let doc = Html::parse_document(html);
    let Ok(selector) = Selector::parse(".submission .titleline > a") else {
        return Vec::new();
    };
    let base = Url::parse(page_url).ok();

    doc.select(&selector)
        .filter_map(|a| a.value().attr("href"))
        .filter_map(|href| match &base {
            Some(base) => base.join(href).ok().map(String::from),
            None => Some(href.to_string()),
        })
        .collect()
}

pub async fn discover(fetcher: &dyn PageFetcher, page_url: &str) -> Discovery {
    match fetch_page(fetcher, page_url).await {
        Ok(html) => Discovery::from_urls(parse_front_page(page_url, &html)),
        Err(failed) => failed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extracts_submission_links() {
        let html = r#"<table>
            <tr class="athing submission"><td><span class="titleline">
                <a href="https://blog.example.com/post">A post</a>
                <span class="sitebit"><a href="from?site=example.com">example.com</a></span>
            </span></td></tr>
            <tr class="athing submission"><td><span class="titleline">
                <a href="item?id=42">Ask HN: something</a>
            </span></td></tr>
        </table>"#;
        assert_eq!(
            parse_front_page("https://news.ycombinator.com/", html),
            vec![
                "https://blog.example.com/post",
                "https://news.ycombinator.com/item?id=42"
            ]
        );
    }
}

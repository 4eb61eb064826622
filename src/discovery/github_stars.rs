//! A GitHub user's starred repositories.
//!
//! The schedule URL holds the username. Pages are walked from 1 until one
//! comes back empty or unreachable, capped at [`MAX_PAGES`]; the listing
//! gives no separate "user not found" signal.

use scraper::{Html, Selector};
use tracing::debug;

use super::{fetch_page, Discovery};
use crate::fetcher::PageFetcher;

const GITHUB: &str = "https://github.com";

pub const MAX_PAGES: u32 = 100;

pub fn stars_page_url(username: &str, page: u32) -> String {
    format!(
        "{GITHUB}/stars/{}/repositories?direction=desc&filter=all&page={page}&sort=created",
        username.trim()
    )
}

pub fn parse_stars_page(html: &str) -> Vec<String> {
    let doc = Html::parse_document(html);
    let (Ok(items), Ok(link)) = (Selector::parse("ul.repo-list li"), Selector::parse("a")) else {
        return Vec::new();
    };

    doc.select(&items)
        .filter_map(|li| li.select(&link).next())
        .filter_map(|a| a.value().attr("href"))
        .map(|href| href.split_whitespace().collect::<String>())
        .filter(|href| href.starts_with('/'))
        .map(|href| format!("{GITHUB}{href}"))
        .collect()
}

pub async fn discover(fetcher: &dyn PageFetcher, username: &str) -> Discovery {
    let mut repos = Vec::new();
    for page in 1..=MAX_PAGES {
        let html = match fetch_page(fetcher, &stars_page_url(username, page)).await {
            Ok(html) => html,
            Err(failed) if page == 1 => return failed,
            Err(_) => break,
        };
        let found = parse_stars_page(&html);
        if found.is_empty() {
            break;
        }
        debug!(username, page, repos = found.len(), "starred page");
        repos.extend(found);
    }
    Discovery::from_urls(repos)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_url() {
        assert_eq!(
            stars_page_url("octocat", 2),
            "https://github.com/stars/octocat/repositories?direction=desc&filter=all&page=2&sort=created"
        );
    }

    #[test]
    fn test_parse_repo_links() {
        let html = r#"<ul class="repo-list">
            <li><h3><a href="/rust-lang/ rust">rust-lang / rust</a></h3>
                <a href="/rust-lang/rust/stargazers">90k</a></li>
            <li><h3><a href="/tokio-rs/tokio">tokio</a></h3></li>
        </ul>"#;
        assert_eq!(
            parse_stars_page(html),
            vec!["https://github.com/rust-lang/rust", "https://github.com/tokio-rs/tokio"]
        );
    }
}

//! Product Hunt leaderboards.
//!
//! The leaderboard for a finished period is scraped: yesterday for daily,
//! the ISO week of seven days ago for weekly, and last month for monthly.

use chrono::{Datelike, Months, NaiveDate, Utc};
use scraper::{Html, Selector};

use super::{fetch_page, Discovery};
use crate::fetcher::PageFetcher;

const PRODUCT_HUNT: &str = "https://www.producthunt.com";

/// Date-scoped leaderboard path relative to the schedule URL.
///
/// Returns an empty string for intervals other than 1, 7, and 30 days.
pub fn leaderboard_path(interval_days: i64, today: NaiveDate) -> String {
    match interval_days {
        1 => {
            let day = today.pred_opt().unwrap_or(today);
            format!("/daily/{}/{}/{}", day.year(), day.month(), day.day())
        }
        7 => {
            let week = (today - chrono::Duration::days(7)).iso_week();
            format!("/weekly/{}/{}", week.year(), week.week())
        }
        30 => {
            let month = today.checked_sub_months(Months::new(1)).unwrap_or(today);
            format!("/monthly/{}/{}", month.year(), month.month())
        }
        _ => String::new(),
    }
}

pub fn parse_leaderboard(html: &str) -> Vec<String> {
    let doc = Html::parse_document(html);
    let (Ok(items), Ok(link)) = (
        Selector::parse("section[data-test^='post-item-']"),
        Selector::parse("a"),
    ) else {
        return Vec::new();
    };

    doc.select(&items)
        .filter_map(|item| item.select(&link).next())
        .filter_map(|a| a.value().attr("href"))
        .filter(|href| href.starts_with("/posts/"))
        .map(|href| format!("{PRODUCT_HUNT}{href}"))
        .collect()
}

pub async fn discover(fetcher: &dyn PageFetcher, base: &str, interval_days: i64) -> Discovery {
    let path = leaderboard_path(interval_days, Utc::now().date_naive());
    let url = format!("{}{}", base.trim_end_matches('/'), path);
    match fetch_page(fetcher, &url).await {
        Ok(html) => Discovery::from_urls(parse_leaderboard(&html)),
        Err(failed) => failed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_daily_is_yesterday() {
        assert_eq!(leaderboard_path(1, date(2024, 3, 1)), "/daily/2024/2/29");
    }

    #[test]
    fn test_weekly_uses_iso_week() {
        // 2021-01-10 minus 7 days is 2021-01-03, which belongs to ISO week 53 of 2020.
        assert_eq!(leaderboard_path(7, date(2021, 1, 10)), "/weekly/2020/53");
    }

    #[test]
    fn test_monthly_is_last_month() {
        assert_eq!(leaderboard_path(30, date(2024, 1, 15)), "/monthly/2023/12");
        assert_eq!(leaderboard_path(30, date(2024, 3, 31)), "/monthly/2024/2");
        assert_eq!(leaderboard_path(14, date(2024, 3, 31)), "");
    }

    #[test]
    fn test_only_post_links_are_kept() {
        let html = r#"
            <section data-test="post-item-1"><a href="/posts/widget">Widget</a></section>
            <section data-test="post-item-2"><a href="/topics/ai">AI</a></section>
            <section data-test="ad"><a href="/posts/sponsored">Ad</a></section>"#;
        assert_eq!(
            parse_leaderboard(html),
            vec!["https://www.producthunt.com/posts/widget"]
        );
    }
}

//! Browser bookmark-export import.
//!
//! Netscape-format exports (Firefox, Chrome, Safari) list bookmarks as
//! `<A HREF=… ADD_DATE=… ICON_URI=…>` anchors. Folders are ignored; every
//! anchor becomes one submission.

use std::path::Path;

use anyhow::{Context, Result};
use scraper::{Html, Selector};
use serde::Serialize;
use tracing::info;

use crate::dispatcher::{BulkReceipt, Dispatcher};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImportedLink {
    pub name: String,
    pub url: String,
    pub added_on: String,
    pub icon: String,
}

pub fn parse_bookmark_export(html: &str) -> Vec<ImportedLink> {
    let doc = Html::parse_document(html);
    let Ok(anchors) = Selector::parse("a[href]") else {
        return Vec::new();
    };

    doc.select(&anchors)
        .filter_map(|a| {
            let el = a.value();
            let url = el.attr("href")?.to_string();
            let icon = el
                .attr("icon_uri")
                .filter(|v| !v.is_empty())
                .or_else(|| el.attr("icon"))
                .unwrap_or_default()
                .to_string();
            Some(ImportedLink {
                name: a.text().collect::<String>().trim().to_string(),
                url,
                added_on: el.attr("add_date").unwrap_or_default().to_string(),
                icon,
            })
        })
        .collect()
}

/// Read an export file and dispatch its links for `org`.
pub async fn import_file(
    dispatcher: &Dispatcher,
    path: &Path,
    org: &str,
    reverse: bool,
) -> Result<BulkReceipt> {
    let html = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read bookmark export: {}", path.display()))?;

    let links = parse_bookmark_export(&html);
    let urls: Vec<&str> = links.iter().map(|l| l.url.as_str()).collect();
    let receipt = dispatcher.submit_bulk(&urls, org, reverse).await?;

    info!(
        org,
        path = %path.display(),
        links = links.len(),
        accepted = receipt.accepted,
        rejected = receipt.rejected.len(),
        "bookmark export imported"
    );
    Ok(receipt)
}

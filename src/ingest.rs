//! Ingestion orchestration.
//!
//! Drives each URL of a chunk through light fetch, organization link, and
//! full render while recording progress in the job queue:
//!
//! ```text
//! PENDING ─▶ QUEUED ─▶ light fetch (if new) ─▶ link org ─▶ render ─▶ COMPLETE
//!                 └──────────── any per-URL failure ────────────▶ FAILED
//! ```
//!
//! One browser session serves a whole chunk, so a render failure aborts
//! the rest of the chunk unless `ingest.isolate_render_contexts` is set.
//! Nothing is rolled back; re-driving a chunk is safe because every write
//! is an upsert or a non-regressing merge.

use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::background::BackgroundTasks;
use crate::config::IngestConfig;
use crate::error::{IngestError, RenderError};
use crate::fetcher::{
    domain_of, fallback_accent_color, normalize_url, parse_readable, parse_seo, proper_image_url,
    PageFetcher,
};
use crate::ids;
use crate::models::{
    merge_nonempty, Bookmark, BookmarkStatus, JobStatus, RelationStatus, RelationView,
    SeoFragment,
};
use crate::queue::JobQueue;
use crate::renderer::{render_before, render_full_html, RenderSession, Renderer};
use crate::sanitize::to_plain_text;
use crate::store::{InsertOutcome, Store};

/// Per-chunk outcome counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub completed: usize,
    pub failed: usize,
}

/// Merge non-empty SEO fields into `bookmark`, resolving images against its URL.
fn apply_seo(bookmark: &mut Bookmark, seo: &SeoFragment) {
    merge_nonempty(&mut bookmark.title, &seo.title);
    merge_nonempty(&mut bookmark.excerpt, &seo.excerpt);
    merge_nonempty(&mut bookmark.accent_color, &seo.accent_color);
    merge_nonempty(
        &mut bookmark.image_small,
        &proper_image_url(&bookmark.url, &seo.image_small),
    );
    merge_nonempty(
        &mut bookmark.image_large,
        &proper_image_url(&bookmark.url, &seo.image_large),
    );
}

fn fill_empty(field: &mut String, value: String) {
    if field.is_empty() {
        *field = value;
    }
}

/// Merge static metadata, then let the readable content supply a title or
/// excerpt the metadata lacked.
fn apply_light(bookmark: &mut Bookmark, html: &str) {
    apply_seo(bookmark, &parse_seo(html));
    let readable = parse_readable(&bookmark.url, html);
    fill_empty(&mut bookmark.title, readable.title);
    fill_empty(&mut bookmark.excerpt, readable.excerpt);
}

/// Build a new `PENDING` bookmark from statically fetched HTML.
///
/// Falls back to the URL as title and a URL-derived accent colour.
pub fn light_bookmark(url: &str, html: &str) -> Bookmark {
    let mut bookmark = Bookmark::pending(url);
    bookmark.id = ids::new_id(ids::URL);
    bookmark.domain = domain_of(url).unwrap_or_default();
    apply_light(&mut bookmark, html);

    if bookmark.title.is_empty() {
        bookmark.title = url.to_string();
    }
    if bookmark.accent_color.is_empty() {
        bookmark.accent_color = fallback_accent_color(url);
    }
    bookmark
}

/// Fill `bookmark` from rendered HTML and mark it `COMPLETE`.
///
/// Rendered metadata refreshes the title, excerpt and accent colour only.
/// Images keep their light-fetch values, resolved against the bookmark URL.
/// A page with no readable text is rejected so a complete bookmark always
/// carries full text.
pub fn apply_rendered(bookmark: &mut Bookmark, html: &str) -> Result<(), IngestError> {
    let text = to_plain_text(html);
    if text.is_empty() {
        return Err(IngestError::parse(
            &bookmark.url,
            "rendered page has no readable text",
        ));
    }
    let seo = parse_seo(html);
    merge_nonempty(&mut bookmark.title, &seo.title);
    merge_nonempty(&mut bookmark.excerpt, &seo.excerpt);
    merge_nonempty(&mut bookmark.accent_color, &seo.accent_color);
    bookmark.image_small = proper_image_url(&bookmark.url, &bookmark.image_small);
    bookmark.image_large = proper_image_url(&bookmark.url, &bookmark.image_large);
    bookmark.full_text = text;
    bookmark.status = BookmarkStatus::Complete;
    Ok(())
}

fn valid_url(raw: &str) -> Result<String, IngestError> {
    normalize_url(raw).ok_or_else(|| IngestError::parse(raw, "not an absolute http(s) URL"))
}

#[derive(Clone)]
pub struct Ingestor {
    store: Arc<dyn Store>,
    queue: JobQueue,
    fetcher: Arc<dyn PageFetcher>,
    renderer: Arc<dyn Renderer>,
    tasks: BackgroundTasks,
    config: IngestConfig,
}

impl Ingestor {
    pub fn new(
        store: Arc<dyn Store>,
        fetcher: Arc<dyn PageFetcher>,
        renderer: Arc<dyn Renderer>,
        tasks: BackgroundTasks,
        config: IngestConfig,
    ) -> Self {
        Self {
            queue: JobQueue::new(store.clone()),
            store,
            fetcher,
            renderer,
            tasks,
            config,
        }
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn job_queue(&self) -> &JobQueue {
        &self.queue
    }

    /// Light fetch only. Nothing is persisted.
    pub async fn light_content(&self, url: &str) -> Result<Bookmark, IngestError> {
        let url = valid_url(url)?;
        let html = self.fetcher.fetch_html(&url).await?;
        Ok(light_bookmark(&url, &html))
    }

    /// Render the stored bookmark for `url` under the single-URL timeout and
    /// save it as `COMPLETE`.
    pub async fn complete_content(&self, url: &str) -> Result<Bookmark, IngestError> {
        let url = valid_url(url)?;
        let bookmark = self
            .store
            .bookmark_by_url(&url)
            .await?
            .ok_or_else(|| IngestError::parse(&url, "no stored bookmark for this url"))?;
        self.render_and_store(bookmark).await
    }

    /// Process one chunk of URLs for `org` in submission order.
    ///
    /// Per-URL failures are recorded as `FAILED` and skipped. A render
    /// failure is returned after marking its URL, leaving the remaining
    /// URLs `PENDING` for the next attempt.
    pub async fn process_batch(
        &self,
        org: &str,
        urls: &[String],
    ) -> Result<BatchReport, IngestError> {
        let budget = self.config.batch_render_timeout(urls.len());
        let deadline = Instant::now() + budget;
        info!(org, urls = urls.len(), budget_secs = budget.as_secs(), "processing batch");

        for url in urls {
            self.queue.upsert_queued(org, url).await?;
        }

        let mut session: Option<Box<dyn RenderSession>> = None;
        let mut report = BatchReport::default();
        let mut aborted = None;

        for url in urls {
            match self
                .process_url(org, url, &mut session, deadline, budget)
                .await
            {
                Ok(()) => report.completed += 1,
                Err(e) => {
                    report.failed += 1;
                    self.mark(org, url, JobStatus::Failed).await;
                    if e.is_batch_fatal() && !self.config.isolate_render_contexts {
                        error!(org, url = %url, error = %e, "render failed, aborting batch");
                        aborted = Some(e);
                        break;
                    }
                    warn!(org, url = %url, error = %e, "url failed");
                }
            }
        }

        if let Some(mut session) = session.take() {
            session.close().await;
        }

        match aborted {
            Some(e) => Err(e),
            None => {
                info!(
                    org,
                    completed = report.completed,
                    failed = report.failed,
                    "batch finished"
                );
                Ok(report)
            }
        }
    }

    async fn process_url(
        &self,
        org: &str,
        url: &str,
        session: &mut Option<Box<dyn RenderSession>>,
        deadline: Instant,
        budget: Duration,
    ) -> Result<(), IngestError> {
        self.queue.set_status(org, url, JobStatus::Queued).await?;
        valid_url(url)?;

        if self.store.bookmark_by_url(url).await?.is_none() {
            let html = self.fetcher.fetch_html(url).await?;
            if let InsertOutcome::AlreadyExists(id) =
                self.store.insert_bookmark(&light_bookmark(url, &html)).await?
            {
                debug!(url, id = %id, "bookmark inserted concurrently");
            }
        }

        let mut bookmark = self
            .store
            .bookmark_by_url(url)
            .await?
            .ok_or_else(|| anyhow!("bookmark for {} missing after insert", url))?;

        if let InsertOutcome::AlreadyExists(_) = self.store.insert_relation(org, &bookmark.id).await? {
            debug!(org, url, complete = bookmark.is_complete(), "already linked");
        }

        if !bookmark.is_complete() {
            let html = self.render(url, session, deadline, budget).await?;
            apply_rendered(&mut bookmark, &html)?;
            self.store.update_bookmark(&bookmark).await?;
        }

        self.queue.set_status(org, url, JobStatus::Complete).await?;
        Ok(())
    }

    async fn open_before(
        &self,
        deadline: Instant,
        budget: Duration,
    ) -> Result<Box<dyn RenderSession>, RenderError> {
        match tokio::time::timeout_at(deadline, self.renderer.open()).await {
            Ok(opened) => opened,
            Err(_) => Err(RenderError::Timeout(budget)),
        }
    }

    /// Render with the chunk's shared session, opening it on first use.
    async fn render(
        &self,
        url: &str,
        session: &mut Option<Box<dyn RenderSession>>,
        deadline: Instant,
        budget: Duration,
    ) -> Result<String, IngestError> {
        if self.config.isolate_render_contexts {
            let mut own = self.open_before(deadline, budget).await?;
            let result = render_before(own.as_mut(), url, deadline, budget).await;
            own.close().await;
            return Ok(result?);
        }

        let mut active = match session.take() {
            Some(active) => active,
            None => self.open_before(deadline, budget).await?,
        };
        let result = render_before(active.as_mut(), url, deadline, budget).await;
        *session = Some(active);
        Ok(result?)
    }

    /// Record a status change, logging instead of failing.
    async fn mark(&self, org: &str, url: &str, status: JobStatus) {
        if let Err(e) = self.queue.set_status(org, url, status).await {
            error!(org, url, status = %status, error = %format!("{e:#}"), "failed to record job status");
        }
    }

    /// Render a stored bookmark on its own session and persist the result.
    async fn render_and_store(&self, mut bookmark: Bookmark) -> Result<Bookmark, IngestError> {
        let html = render_full_html(
            self.renderer.as_ref(),
            &bookmark.url,
            self.config.single_render_timeout(),
        )
        .await?;
        apply_rendered(&mut bookmark, &html)?;
        self.store.update_bookmark(&bookmark).await?;
        Ok(bookmark)
    }

    async fn refresh(&self, mut bookmark: Bookmark) -> Result<Bookmark, IngestError> {
        let html = self.fetcher.fetch_html(&bookmark.url).await?;
        apply_light(&mut bookmark, &html);
        self.store.update_bookmark(&bookmark).await?;
        self.render_and_store(bookmark).await
    }

    /// Interactive submission: return the light-fetched bookmark at once and
    /// complete the full render in the background.
    pub async fn submit_single(&self, url: &str, org: &str) -> Result<RelationView, IngestError> {
        let url = valid_url(url)?;

        let bookmark = match self.store.bookmark_by_url(&url).await? {
            Some(existing) => existing,
            None => {
                let light = self.light_content(&url).await?;
                match self.store.insert_bookmark(&light).await? {
                    InsertOutcome::Inserted(_) => light,
                    InsertOutcome::AlreadyExists(id) => self
                        .store
                        .bookmark_by_id(&id)
                        .await?
                        .ok_or_else(|| anyhow!("bookmark {} missing after conflict", id))?,
                }
            }
        };

        let relation = match self.store.insert_relation(org, &bookmark.id).await? {
            InsertOutcome::Inserted(relation) => relation,
            InsertOutcome::AlreadyExists(relation) => {
                debug!(org, url = %url, "relation already exists");
                relation
            }
        };

        self.queue.upsert_queued(org, &url).await?;
        if bookmark.is_complete() {
            self.queue.set_status(org, &url, JobStatus::Complete).await?;
        } else {
            self.spawn_full_render(org, &url);
        }

        info!(org, url = %url, id = %bookmark.id, "bookmark submitted");
        Ok(RelationView { relation, bookmark })
    }

    fn spawn_full_render(&self, org: &str, url: &str) {
        let this = self.clone();
        let org = org.to_string();
        let url = url.to_string();

        self.tasks.spawn(format!("full-render {url}"), async move {
            this.queue.set_status(&org, &url, JobStatus::Queued).await?;
            match this.complete_content(&url).await {
                Ok(_) => {
                    this.queue.set_status(&org, &url, JobStatus::Complete).await?;
                    Ok(())
                }
                Err(e) => {
                    this.mark(&org, &url, JobStatus::Failed).await;
                    Err(anyhow::Error::new(e).context(format!("full render of {url}")))
                }
            }
        });
    }

    /// Re-run the light fetch and a forced full render for an organization's bookmark.
    pub async fn reindex(&self, org: &str, url_id: &str) -> Result<RelationView, IngestError> {
        let relation = self
            .store
            .relation_for(org, url_id)
            .await?
            .filter(|r| r.status == RelationStatus::Active)
            .ok_or_else(|| IngestError::parse(url_id, "no active bookmark with this id"))?;
        let bookmark = self
            .store
            .bookmark_by_id(url_id)
            .await?
            .ok_or_else(|| IngestError::parse(url_id, "no bookmark with this id"))?;

        let url = bookmark.url.clone();
        self.queue.upsert_queued(org, &url).await?;
        self.queue.set_status(org, &url, JobStatus::Queued).await?;

        match self.refresh(bookmark).await {
            Ok(bookmark) => {
                self.queue.set_status(org, &url, JobStatus::Complete).await?;
                info!(org, url = %url, "bookmark reindexed");
                Ok(RelationView { relation, bookmark })
            }
            Err(e) => {
                self.mark(org, &url, JobStatus::Failed).await;
                Err(e)
            }
        }
    }

    /// Soft-delete `org`'s links to the given bookmarks.
    ///
    /// The shared bookmarks and other organizations' links are untouched.
    /// Returns the ids whose link was active; unknown or already deleted
    /// ids are skipped.
    pub async fn delete(&self, org: &str, url_ids: &[String]) -> Result<Vec<String>, IngestError> {
        let mut deleted = Vec::with_capacity(url_ids.len());
        for url_id in url_ids {
            if self
                .store
                .set_relation_status(org, url_id, RelationStatus::Deleted)
                .await?
            {
                deleted.push(url_id.clone());
            } else {
                debug!(org, url_id = %url_id, "no active link to delete");
            }
        }
        info!(org, requested = url_ids.len(), deleted = deleted.len(), "bookmarks deleted");
        Ok(deleted)
    }

    /// Wait for pending background renders.
    pub async fn wait_background(&self) {
        self.tasks.join_all().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_light_bookmark_fallbacks() {
        let b = light_bookmark("https://example.com:8080/post", "<p>no metadata</p>");
        assert!(b.id.starts_with("url_"));
        assert_eq!(b.title, "https://example.com:8080/post");
        assert_eq!(b.domain, "example.com");
        assert_eq!(b.accent_color, fallback_accent_color("https://example.com:8080/post"));
        assert_eq!(b.status, BookmarkStatus::Pending);
        assert!(b.full_text.is_empty());
    }

    #[test]
    fn test_light_bookmark_resolves_images() {
        let html = r##"<head><title>Post</title><meta name="theme-color" content="#000000">
            <link rel="icon" href="/favicon.png"></head><body><img src="//cdn.io/a.png"></body>"##;
        let b = light_bookmark("https://blog.io/p/1", html);
        assert_eq!(b.title, "Post");
        assert_eq!(b.accent_color, "#000000");
        assert_eq!(b.image_small, "https://blog.io/favicon.png");
        assert_eq!(b.image_large, "https://cdn.io/a.png");
    }

    #[test]
    fn test_apply_rendered_merges_only_nonempty() {
        let mut b = light_bookmark(
            "https://a.com",
            r#"<title>Static</title><meta name="description" content="from static">"#,
        );
        let rendered = r#"<html><head><title>Rendered</title></head>
            <body><h1>Hello</h1><p>World</p></body></html>"#;
        apply_rendered(&mut b, rendered).unwrap();

        assert_eq!(b.title, "Rendered");
        assert_eq!(b.excerpt, "from static");
        assert_eq!(b.full_text, "Hello\nWorld");
        assert!(b.is_complete());
    }

    #[test]
    fn test_light_bookmark_excerpt_from_readable_text() {
        let html = r#"<html><head><title>Lifetimes</title></head><body><article>
            <p>Lifetimes describe how long a reference stays valid inside a program.</p>
            </article></body></html>"#;
        let b = light_bookmark("https://blog.io/lifetimes", html);
        assert_eq!(b.title, "Lifetimes");
        assert!(b.excerpt.contains("how long a reference stays valid"));
    }

    #[test]
    fn test_light_bookmark_meta_description_wins_over_readable_text() {
        let html = r#"<html><head><title>Post</title>
            <meta name="description" content="From meta"></head>
            <body><article><p>Some long readable body text that would make an excerpt.</p>
            </article></body></html>"#;
        assert_eq!(light_bookmark("https://blog.io/p", html).excerpt, "From meta");
    }

    #[test]
    fn test_apply_rendered_keeps_light_images() {
        let mut b = light_bookmark(
            "https://blog.io/p/1",
            r#"<title>Post</title><link rel="icon" href="/favicon.png">
               <meta property="og:image" content="/cover.png">"#,
        );
        b.image_large = "//cdn.io/cover.png".to_string();
        let rendered = r##"<html><head><title>Post</title><meta name="theme-color" content="#ABCDEF">
            <link rel="icon" href="/other.png"><meta property="og:image" content="/ad.png"></head>
            <body><p>Body</p></body></html>"##;
        apply_rendered(&mut b, rendered).unwrap();

        assert_eq!(b.accent_color, "#ABCDEF");
        assert_eq!(b.image_small, "https://blog.io/favicon.png");
        assert_eq!(b.image_large, "https://cdn.io/cover.png");
    }

    #[test]
    fn test_apply_rendered_rejects_empty_text() {
        let mut b = light_bookmark("https://a.com", "");
        let err = apply_rendered(&mut b, "<html><body><script>x()</script></body></html>")
            .unwrap_err();
        assert!(matches!(err, IngestError::Parse { .. }));
        assert!(!err.is_batch_fatal());
        assert!(!b.is_complete());
    }
}

//! Listing browser over plain HTTP.
//!
//! Pages are fetched with a cookie-keeping blocking client, parsed with
//! `scraper` and read for anchors. Directory-index style listings work, as
//! do pages that carry names in `title`, `data-name` or `aria-label`.

use std::time::Duration;

use anyhow::{Context, Result, bail};
use regex::Regex;
use reqwest::Url;
use reqwest::blocking::Client;
use scraper::{ElementRef, Html, Selector};

use super::{RemoteBrowser, RemoteRef, StreamResolver, VisibleEntry};
use crate::naming::KindHint;

/// Captcha markers: class/id attributes and captcha iframes.
pub const DEFAULT_CHALLENGE_PATTERNS: &[&str] = &[
    r#"(?i)class\s*=\s*["'][^"']*captcha"#,
    r#"(?i)id\s*=\s*["'][^"']*captcha"#,
    r#"(?i)<iframe\b[^>]*src\s*=\s*["'][^"']*(smart)?captcha"#,
];

struct Page {
    url: Url,
    status: u16,
    body: String,
}

pub struct HttpListingBrowser {
    client: Client,
    challenge_patterns: Vec<Regex>,
    page: Option<Page>,
}

impl HttpListingBrowser {
    pub fn new(timeout: Duration, user_agent: &str, challenge_patterns: &[String]) -> Result<Self> {
        let client = Client::builder()
            .cookie_store(true)
            .user_agent(user_agent)
            .connect_timeout(Duration::from_secs(30))
            .timeout(timeout)
            .build()
            .context("failed to build HTTP client")?;
        let challenge_patterns = challenge_patterns
            .iter()
            .map(|p| Regex::new(p).with_context(|| format!("invalid challenge pattern '{}'", p)))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { client, challenge_patterns, page: None })
    }

    /// The underlying client. Clones share the cookie jar, so a stager
    /// built from it downloads with the same session.
    pub fn client(&self) -> Client {
        self.client.clone()
    }
}

impl RemoteBrowser for HttpListingBrowser {
    fn navigate(&mut self, location: &RemoteRef) -> Result<()> {
        let url = Url::parse(location.as_str())
            .with_context(|| format!("not an absolute URL: {}", location))?;
        let resp = self.client.get(url).send().with_context(|| format!("GET {}", location))?;
        let status = resp.status();
        let final_url = resp.url().clone();
        // 403/429 are how many sites answer while a challenge is up; keep the
        // page so the challenge probe can see it.
        if !status.is_success() && status.as_u16() != 403 && status.as_u16() != 429 {
            bail!("GET {} returned {}", location, status);
        }
        let body = resp.text().with_context(|| format!("reading {}", location))?;
        tracing::debug!("navigated to {} ({}, {} bytes)", final_url, status, body.len());
        self.page = Some(Page { url: final_url, status: status.as_u16(), body });
        Ok(())
    }

    fn list_visible_entries(&mut self) -> Result<Vec<VisibleEntry>> {
        let page = self.page.as_ref().context("no page loaded")?;
        Ok(extract_entries(&page.url, &page.body))
    }

    fn detect_challenge_signals(&mut self) -> Result<bool> {
        let Some(page) = self.page.as_ref() else { return Ok(false) };
        if page.status == 403 || page.status == 429 {
            return Ok(true);
        }
        Ok(self.challenge_patterns.iter().any(|re| re.is_match(&page.body)))
    }

    fn current_location(&self) -> Option<RemoteRef> {
        self.page.as_ref().map(|p| RemoteRef::new(p.url.as_str()))
    }
}

impl StreamResolver for HttpListingBrowser {
    fn resolve_download_locator(&mut self, file_ref: &RemoteRef) -> Result<RemoteRef> {
        let url = Url::parse(file_ref.as_str())
            .with_context(|| format!("not an absolute URL: {}", file_ref))?;
        let resp = self
            .client
            .get(url)
            .send()
            .and_then(|r| r.error_for_status())
            .with_context(|| format!("GET {}", file_ref))?;
        let final_url = resp.url().clone();
        let is_html = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.to_ascii_lowercase().starts_with("text/html"));
        if !is_html {
            return Ok(RemoteRef::new(final_url.as_str()));
        }
        let body = resp.text().with_context(|| format!("reading {}", file_ref))?;
        match find_media_source(&final_url, &body) {
            Some(u) => Ok(RemoteRef::new(u.as_str())),
            None => bail!("no playable media source on {}", final_url),
        }
    }
}

fn kind_hint_for(url: &Url) -> KindHint {
    let path = url.path();
    if path.ends_with('/') {
        return KindHint::Folder;
    }
    let last = path.rsplit('/').next().unwrap_or("");
    if last.contains('.') { KindHint::File } else { KindHint::Unknown }
}

/// Whether `candidate` is `page` itself or one of its ancestors.
fn is_self_or_parent(page: &Url, candidate: &Url) -> bool {
    if candidate.query() != page.query() && candidate.path() == page.path() {
        return false;
    }
    let c = candidate.path().trim_end_matches('/');
    let p = page.path().trim_end_matches('/');
    c == p || (p.starts_with(c) && p[c.len()..].starts_with('/')) || c.is_empty()
}

/// Display name of an anchor: a naming attribute when present, else its text.
fn anchor_name(a: &ElementRef<'_>) -> String {
    ["title", "data-name", "aria-label"]
        .iter()
        .find_map(|k| a.value().attr(k).map(str::trim).filter(|v| !v.is_empty()))
        .map(str::to_string)
        .unwrap_or_else(|| a.text().collect::<String>())
        .trim()
        .to_string()
}

/// Anchors on `body` as listing entries, in document order.
pub(crate) fn extract_entries(page_url: &Url, body: &str) -> Vec<VisibleEntry> {
    let document = Html::parse_document(body);
    let anchors = Selector::parse("a[href]").expect("valid anchor selector");
    let mut out: Vec<VisibleEntry> = Vec::new();
    for a in document.select(&anchors) {
        let Some(href) = a.value().attr("href").map(str::trim) else { continue };
        if href.is_empty()
            || href.starts_with('#')
            || href.starts_with('?')
            || href.starts_with("javascript:")
            || href.starts_with("mailto:")
        {
            continue;
        }
        let Ok(target) = page_url.join(href) else { continue };
        if target.origin() != page_url.origin() || is_self_or_parent(page_url, &target) {
            continue;
        }
        let name = anchor_name(&a);
        if name.is_empty() || name == ".." {
            continue;
        }
        let entry = VisibleEntry::new(name, kind_hint_for(&target), Some(RemoteRef::new(target.as_str())));
        if !out.contains(&entry) {
            out.push(entry);
        }
    }
    out
}

/// First playable media URL on an HTML page: `<video src>` / `<source src>`
/// in document order, then an `og:video` meta tag.
pub(crate) fn find_media_source(page_url: &Url, body: &str) -> Option<Url> {
    let document = Html::parse_document(body);
    let media = Selector::parse("video[src], source[src]").expect("valid media selector");
    let meta = Selector::parse("meta[content]").expect("valid meta selector");

    let from_tags = document.select(&media).filter_map(|e| e.value().attr("src"));
    let from_meta = document
        .select(&meta)
        .filter(|e| {
            matches!(
                e.value().attr("property"),
                Some("og:video" | "og:video:url" | "og:video:secure_url")
            )
        })
        .filter_map(|e| e.value().attr("content"));
    from_tags.chain(from_meta).find_map(|src| page_url.join(src.trim()).ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn directory_index_entries() {
        let body = r##"
            <a href="../">../</a>
            <a href="/share/">up</a>
            <a href="%D0%9E%D1%82%D0%B5%D1%86/">Отец 12.03.2024/</a>
            <a href="clip%201.mp4" title="clip 1.mp4">clip…</a>
            <a href="#top">top</a>
            <a href="https://elsewhere.example/x/">External</a>
            <a href="readme"><span>Read</span> me</a>
        "##;
        let entries = extract_entries(&url("https://share.example/share/root/"), body);
        let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["Отец 12.03.2024/", "clip 1.mp4", "Read me"]);
        assert_eq!(entries[0].kind_hint, KindHint::Folder);
        assert_eq!(entries[1].kind_hint, KindHint::File);
        assert_eq!(entries[2].kind_hint, KindHint::Unknown);
        assert_eq!(
            entries[1].remote_ref.as_ref().unwrap().as_str(),
            "https://share.example/share/root/clip%201.mp4"
        );
    }

    #[test]
    fn attribute_names_win_and_duplicates_collapse() {
        let body = r#"<a data-name="Доки" href="d/">x</a><a data-name="Доки" href="d/">x</a>
                      <a aria-label="Видео &amp; звук" href='v/'>icon</a>"#;
        let entries = extract_entries(&url("https://share.example/r/"), body);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].name, "Доки");
        assert_eq!(entries[1].name, "Видео & звук");
    }

    #[test]
    fn unquoted_attributes_and_numeric_entities() {
        let body = "<a href=plain/>Plain</a><a href=\"f.mp4\" title=\"&#1054;&#x442;&#1077;&#1094;.mp4\">x</a>";
        let entries = extract_entries(&url("https://share.example/r/"), body);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].name, "Plain");
        assert_eq!(entries[0].kind_hint, KindHint::Folder);
        assert_eq!(entries[0].remote_ref.as_ref().unwrap().as_str(), "https://share.example/r/plain/");
        assert_eq!(entries[1].name, "Отец.mp4");
    }

    #[test]
    fn media_source_lookup() {
        let page = url("https://share.example/f/clip");
        let body = r#"<html><video controls><source src="/media/clip.mp4?t=1" type="video/mp4"></video>"#;
        assert_eq!(
            find_media_source(&page, body).unwrap().as_str(),
            "https://share.example/media/clip.mp4?t=1"
        );
        let og = r#"<meta property="og:video" content="https://cdn.example/v.mp4">"#;
        assert_eq!(find_media_source(&page, og).unwrap().as_str(), "https://cdn.example/v.mp4");
        assert!(find_media_source(&page, "<p>nothing</p>").is_none());
    }

    #[test]
    fn default_challenge_patterns_match_captcha_markup() {
        let patterns: Vec<String> = DEFAULT_CHALLENGE_PATTERNS.iter().map(|s| s.to_string()).collect();
        let mut b = HttpListingBrowser::new(Duration::from_secs(5), "test", &patterns).unwrap();
        assert!(!b.detect_challenge_signals().unwrap());
        b.page = Some(Page {
            url: url("https://share.example/"),
            status: 200,
            body: r#"<div class="SmartCaptcha-wrapper"></div>"#.to_string(),
        });
        assert!(b.detect_challenge_signals().unwrap());
        b.page = Some(Page { url: url("https://share.example/"), status: 200, body: "<ul></ul>".into() });
        assert!(!b.detect_challenge_signals().unwrap());
        b.page = Some(Page { url: url("https://share.example/"), status: 429, body: String::new() });
        assert!(b.detect_challenge_signals().unwrap());
    }
}

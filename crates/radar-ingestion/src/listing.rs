//! Archive directory listing and latest-file selection.
//!
//! The archive is partitioned as `{root}/YYYY/MM/DD/{STATION}/`. A directory
//! is listed either from an HTML index served at that URL or, for S3
//! buckets, from a ListObjectsV2 query on the same key prefix. Filenames
//! embed the scan time, so the lexicographically greatest name is the most
//! recent volume.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use quick_xml::events::Event;
use quick_xml::Reader;
use radar_common::{RadarError, RadarResult, StationId};
use reqwest::{Client, Url};
use tracing::{debug, info, instrument, warn};

use crate::config::{ArchiveConfig, ListingFormat};

/// Upper bound on ListObjectsV2 pages fetched for one directory.
const MAX_BUCKET_PAGES: usize = 50;

/// Directory URL for `station` on the UTC date of `as_of`.
pub fn build_directory_url(root: &str, station: &StationId, as_of: DateTime<Utc>) -> String {
    format!(
        "{}/{}/{}/",
        root.trim_end_matches('/'),
        as_of.format("%Y/%m/%d"),
        station
    )
}

/// Extract the file name of every `<a href>` target in an HTML index.
///
/// Query strings, fragments and directory components are stripped, so
/// `href="/2024/05/20/KTLX/a.ar2v?x=1"` and `href="../../a.ar2v"` both
/// yield `a.ar2v`. Parent and self links are dropped, as are `href`s on
/// any element other than an anchor.
pub fn parse_listing(html: &str) -> Vec<String> {
    // ASCII lowercasing keeps byte offsets aligned with `html`.
    let lower = html.to_ascii_lowercase();
    let bytes = html.as_bytes();
    let mut names = Vec::new();
    let mut pos = 0;

    while let Some(found) = lower[pos..].find("<a") {
        let attrs = pos + found + 2;
        // `<abbr>`, `<area>`, `<a>` without attributes
        if !bytes.get(attrs).is_some_and(|b| b.is_ascii_whitespace()) {
            pos = attrs;
            continue;
        }
        let (href, end) = anchor_href(html, attrs);
        pos = end;

        if let Some(name) = href.and_then(file_name_of) {
            names.push(name);
        }
    }

    names
}

/// Scan the attributes of a tag starting at byte `i` for `href`.
///
/// Returns the value (if any) and the offset just past the tag.
fn anchor_href(html: &str, mut i: usize) -> (Option<&str>, usize) {
    let bytes = html.as_bytes();
    let mut href = None;

    loop {
        while i < bytes.len() && (bytes[i].is_ascii_whitespace() || bytes[i] == b'/') {
            i += 1;
        }
        match bytes.get(i) {
            None => return (href, bytes.len()),
            Some(b'>') => return (href, i + 1),
            Some(_) => {}
        }

        let name_start = i;
        while i < bytes.len()
            && !bytes[i].is_ascii_whitespace()
            && !matches!(bytes[i], b'=' | b'>' | b'/')
        {
            i += 1;
        }
        let name = &html[name_start..i];

        let mut j = i;
        while j < bytes.len() && bytes[j].is_ascii_whitespace() {
            j += 1;
        }
        if bytes.get(j) != Some(&b'=') {
            // Valueless attribute
            continue;
        }
        j += 1;
        while j < bytes.len() && bytes[j].is_ascii_whitespace() {
            j += 1;
        }

        let (value, next) = match bytes.get(j) {
            None => return (href, bytes.len()),
            Some(&quote @ (b'"' | b'\'')) => match html[j + 1..].find(quote as char) {
                Some(len) => (&html[j + 1..j + 1 + len], j + len + 2),
                None => return (href, bytes.len()),
            },
            Some(_) => {
                let len = html[j..]
                    .find(|c: char| c.is_ascii_whitespace() || c == '>')
                    .unwrap_or(html.len() - j);
                (&html[j..j + len], j + len)
            }
        };
        if href.is_none() && name.eq_ignore_ascii_case("href") {
            href = Some(value);
        }
        i = next;
    }
}

/// Final path component of a link target or object key, or `None` for
/// directory links.
fn file_name_of(target: &str) -> Option<String> {
    let target = target.split(['?', '#']).next().unwrap_or_default();
    let name = target.rsplit(['/', '\\']).next().unwrap_or_default().trim();
    match name {
        "" | "." | ".." => None,
        _ => Some(name.to_string()),
    }
}

/// One page of an S3 ListObjectsV2 response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BucketPage {
    pub keys: Vec<String>,
    /// Token for the next page when the listing is truncated
    pub next_token: Option<String>,
}

/// Parse a `ListBucketResult` document.
pub fn parse_bucket_listing(xml: &str) -> Result<BucketPage, String> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut buf = Vec::new();
    let mut path: Vec<Vec<u8>> = Vec::new();
    let mut is_bucket_listing = false;
    let mut truncated = false;
    let mut page = BucketPage::default();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                let name = e.local_name().as_ref().to_vec();
                if path.is_empty() {
                    is_bucket_listing = name == b"ListBucketResult";
                }
                path.push(name);
            }
            Ok(Event::End(_)) => {
                path.pop();
            }
            Ok(Event::Text(t)) => {
                let text = t.unescape().map_err(|e| e.to_string())?;
                let parent = path.len().checked_sub(2).map(|i| path[i].as_slice());
                match (parent, path.last().map(Vec::as_slice)) {
                    (Some(b"Contents"), Some(b"Key")) => page.keys.push(text.into_owned()),
                    (Some(b"ListBucketResult"), Some(b"IsTruncated")) => truncated = text == "true",
                    (Some(b"ListBucketResult"), Some(b"NextContinuationToken")) => {
                        page.next_token = Some(text.into_owned())
                    }
                    _ => {}
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(format!("invalid bucket listing XML: {e}")),
            _ => {}
        }
        buf.clear();
    }

    if !is_bucket_listing {
        return Err("response is not a ListBucketResult document".to_string());
    }
    if !truncated {
        page.next_token = None;
    }
    Ok(page)
}

/// ListObjectsV2 request for every key under `prefix`.
pub fn bucket_list_url(root: &str, prefix: &str, token: Option<&str>) -> RadarResult<Url> {
    let mut url = Url::parse(&format!("{}/", root.trim_end_matches('/')))
        .map_err(|e| RadarError::Configuration(format!("invalid archive root '{root}': {e}")))?;
    {
        let mut query = url.query_pairs_mut();
        query.append_pair("list-type", "2").append_pair("prefix", prefix);
        if let Some(token) = token {
            query.append_pair("continuation-token", token);
        }
    }
    Ok(url)
}

/// Keep names ending with one of `extensions` (case-insensitive).
pub fn filter_candidates<S: AsRef<str>>(names: &[String], extensions: &[S]) -> Vec<String> {
    let extensions: Vec<String> = extensions
        .iter()
        .map(|e| e.as_ref().to_ascii_lowercase())
        .collect();
    names
        .iter()
        .filter(|name| {
            let lower = name.to_ascii_lowercase();
            extensions
                .iter()
                .any(|ext| lower.len() > ext.len() && lower.ends_with(ext.as_str()))
        })
        .cloned()
        .collect()
}

/// Most recent candidate, by plain string ordering of the names.
///
/// `directory_url` only labels the error when `candidates` is empty.
pub fn select_latest<'a, S: AsRef<str>>(
    directory_url: &str,
    candidates: &'a [S],
) -> RadarResult<&'a str> {
    candidates
        .iter()
        .map(AsRef::as_ref)
        .max()
        .ok_or_else(|| RadarError::NoValidFiles {
            url: directory_url.to_string(),
        })
}

/// HTTP client for archive directory listings.
#[derive(Debug, Clone)]
pub struct ArchiveClient {
    client: Client,
    config: Arc<ArchiveConfig>,
}

impl ArchiveClient {
    pub fn new(config: ArchiveConfig) -> RadarResult<Self> {
        config.validate()?;
        let client = Client::builder()
            .timeout(config.request_timeout())
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| RadarError::Configuration(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            config: Arc::new(config),
        })
    }

    pub fn config(&self) -> &ArchiveConfig {
        &self.config
    }

    /// Underlying HTTP client, shared with the downloader.
    pub fn http(&self) -> &Client {
        &self.client
    }

    pub fn directory_url(&self, station: &StationId, as_of: DateTime<Utc>) -> String {
        build_directory_url(&self.config.archive_root, station, as_of)
    }

    /// Directory URL for today's UTC date.
    pub fn directory_url_now(&self, station: &StationId) -> String {
        self.directory_url(station, Utc::now())
    }

    /// List the directory at `url` and return the volume files in it,
    /// sorted oldest first.
    #[instrument(skip(self), fields(url = %url))]
    pub async fn list_candidate_files(&self, url: &str) -> RadarResult<Vec<String>> {
        let names = match self.config.resolved_listing_format() {
            ListingFormat::S3 => self.bucket_names(url).await?,
            ListingFormat::Html | ListingFormat::Auto => self.index_names(url).await?,
        };
        if names.is_empty() {
            return Err(RadarError::NoListing {
                url: url.to_string(),
            });
        }

        let mut candidates = filter_candidates(&names, &self.config.extensions);
        debug!(
            links = names.len(),
            candidates = candidates.len(),
            "Parsed directory listing"
        );
        if candidates.is_empty() {
            return Err(RadarError::NoValidFiles {
                url: url.to_string(),
            });
        }

        candidates.sort();
        Ok(candidates)
    }

    /// Name of the most recent volume file in the directory at `url`.
    pub async fn latest_file(&self, url: &str) -> RadarResult<String> {
        let candidates = self.list_candidate_files(url).await?;
        let latest = select_latest(url, &candidates)?.to_string();
        info!(url = %url, file = %latest, candidates = candidates.len(), "Selected latest volume");
        Ok(latest)
    }

    async fn get_text(&self, url: &str) -> RadarResult<String> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| RadarError::download(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(RadarError::Http {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        response
            .text()
            .await
            .map_err(|e| RadarError::download(url, e))
    }

    async fn index_names(&self, url: &str) -> RadarResult<Vec<String>> {
        let body = self.get_text(url).await?;
        Ok(parse_listing(&body))
    }

    async fn bucket_names(&self, directory_url: &str) -> RadarResult<Vec<String>> {
        let root = self.config.archive_root.trim_end_matches('/');
        let prefix = directory_url
            .strip_prefix(root)
            .map(|p| p.trim_start_matches('/'))
            .ok_or_else(|| {
                RadarError::Configuration(format!(
                    "directory {directory_url} is not under archive root {root}"
                ))
            })?;

        let mut names = Vec::new();
        let mut token: Option<String> = None;
        for _ in 0..MAX_BUCKET_PAGES {
            let list_url = bucket_list_url(root, prefix, token.as_deref())?;
            let body = self.get_text(list_url.as_str()).await?;
            let page = parse_bucket_listing(&body)
                .map_err(|reason| RadarError::download(list_url.as_str(), reason))?;
            debug!(keys = page.keys.len(), truncated = page.next_token.is_some(), "Fetched bucket page");

            names.extend(page.keys.iter().filter_map(|key| file_name_of(key)));
            match page.next_token {
                Some(next) => token = Some(next),
                None => return Ok(names),
            }
        }

        warn!(url = %directory_url, pages = MAX_BUCKET_PAGES, "Bucket listing truncated");
        Ok(names)
    }
}

/// URL of `name` inside the directory at `directory_url`.
pub fn file_url(directory_url: &str, name: &str) -> String {
    format!("{}/{}", directory_url.trim_end_matches('/'), name)
}

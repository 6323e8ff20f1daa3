//! Lyrics lookup with provider fallback
//!
//! Provider order: the synced provider first (timed lines, long cache
//! life), then the plain-text provider (search + page extraction). A miss
//! on both surfaces `NotFound`, which the caller caches as a negative
//! result.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::{debug, info, warn};

use voicejury_core::clients::{LyricsClient, LyricsQuery};
use voicejury_core::{Error, LyricsLine, LyricsRecord, Result, SyncQuality};

/// Synced-lyrics provider (LRC-style timed lines).
#[derive(Debug, Clone)]
pub struct SyncedProviderConfig {
    pub base_url: String,
}

/// Plain-text provider (search API + lyrics page).
#[derive(Debug, Clone)]
pub struct PlainProviderConfig {
    pub base_url: String,
    pub api_token: String,
}

pub struct TieredLyricsClient {
    client: Client,
    synced: Option<SyncedProviderConfig>,
    plain: Option<PlainProviderConfig>,
}

impl TieredLyricsClient {
    pub fn new(
        client: Client,
        synced: Option<SyncedProviderConfig>,
        plain: Option<PlainProviderConfig>,
    ) -> Self {
        Self {
            client,
            synced,
            plain,
        }
    }

    async fn lookup_synced(
        &self,
        config: &SyncedProviderConfig,
        query: &LyricsQuery,
    ) -> Result<LyricsRecord> {
        let mut params = vec![
            ("artist_name", query.artist.clone()),
            ("track_name", query.title.clone()),
        ];
        if let Some(album) = &query.album {
            params.push(("album_name", album.clone()));
        }
        if let Some(duration) = query.duration_sec {
            params.push(("duration", duration.to_string()));
        }

        let resp = self
            .client
            .get(format!(
                "{}/api/get",
                config.base_url.trim_end_matches('/')
            ))
            .query(&params)
            .send()
            .await
            .map_err(|e| Error::UpstreamUnavailable(format!("synced lyrics provider: {}", e)))?;

        match resp.status() {
            StatusCode::NOT_FOUND => {
                return Err(Error::NotFound("synced lyrics".to_string()));
            }
            status if !status.is_success() => {
                return Err(Error::UpstreamUnavailable(format!(
                    "synced lyrics provider: status {}",
                    status
                )));
            }
            _ => {}
        }

        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct SyncedResponse {
            #[serde(default)]
            plain_lyrics: Option<String>,
            #[serde(default)]
            synced_lyrics: Option<String>,
        }

        let body: SyncedResponse = resp
            .json()
            .await
            .map_err(|e| Error::UpstreamUnavailable(format!("synced lyrics response: {}", e)))?;

        let lines = body.synced_lyrics.as_deref().map(parse_lrc);
        let has_lines = lines.as_ref().is_some_and(|l| !l.is_empty());
        let text = body.plain_lyrics.unwrap_or_default();

        if text.trim().is_empty() && !has_lines {
            return Err(Error::NotFound("synced lyrics".to_string()));
        }

        let text = if text.trim().is_empty() {
            lines
                .as_ref()
                .map(|l| {
                    l.iter()
                        .map(|line| line.text.as_str())
                        .collect::<Vec<_>>()
                        .join("\n")
                })
                .unwrap_or_default()
        } else {
            text
        };

        Ok(LyricsRecord {
            text,
            lines: if has_lines { lines } else { None },
            sync_quality: if has_lines {
                SyncQuality::Synced
            } else {
                SyncQuality::Unsynced
            },
            provenance: "lrclib".to_string(),
            source_url: None,
        })
    }

    async fn lookup_plain(
        &self,
        config: &PlainProviderConfig,
        query: &LyricsQuery,
    ) -> Result<LyricsRecord> {
        let base = config.base_url.trim_end_matches('/');
        let q = format!("{} {}", query.artist, query.title);

        let resp = self
            .client
            .get(format!("{}/search", base))
            .bearer_auth(&config.api_token)
            .query(&[("q", q.as_str())])
            .send()
            .await
            .map_err(|e| Error::UpstreamUnavailable(format!("plain lyrics provider: {}", e)))?;
        if !resp.status().is_success() {
            return Err(Error::UpstreamUnavailable(format!(
                "plain lyrics search: status {}",
                resp.status()
            )));
        }

        #[derive(Deserialize)]
        struct SearchArtist {
            #[serde(default)]
            name: String,
        }
        #[derive(Deserialize)]
        struct SearchResult {
            #[serde(default)]
            url: String,
            #[serde(default)]
            primary_artist: Option<SearchArtist>,
        }
        #[derive(Deserialize)]
        struct SearchHit {
            result: SearchResult,
        }
        #[derive(Deserialize)]
        struct SearchInner {
            #[serde(default)]
            hits: Vec<SearchHit>,
        }
        #[derive(Deserialize)]
        struct SearchResponse {
            response: SearchInner,
        }

        let body: SearchResponse = resp
            .json()
            .await
            .map_err(|e| Error::UpstreamUnavailable(format!("plain lyrics search: {}", e)))?;

        // Prefer a hit whose artist overlaps the query, else the first hit.
        let artist_lower = query.artist.to_lowercase();
        let hit_url = body
            .response
            .hits
            .iter()
            .find(|h| {
                h.result
                    .primary_artist
                    .as_ref()
                    .map(|a| {
                        let name = a.name.to_lowercase();
                        name.contains(&artist_lower) || artist_lower.contains(&name)
                    })
                    .unwrap_or(false)
            })
            .or_else(|| body.response.hits.first())
            .map(|h| h.result.url.clone())
            .filter(|u| !u.is_empty())
            .ok_or_else(|| Error::NotFound("plain lyrics".to_string()))?;

        debug!(url = %hit_url, "fetching lyrics page");
        let page = self
            .client
            .get(&hit_url)
            .send()
            .await
            .map_err(|e| Error::UpstreamUnavailable(format!("lyrics page: {}", e)))?;
        if !page.status().is_success() {
            return Err(Error::UpstreamUnavailable(format!(
                "lyrics page: status {}",
                page.status()
            )));
        }
        let html = page
            .text()
            .await
            .map_err(|e| Error::UpstreamUnavailable(format!("lyrics page: {}", e)))?;

        let text = extract_lyrics_from_page(&html)
            .ok_or_else(|| Error::NotFound("plain lyrics".to_string()))?;

        Ok(LyricsRecord {
            text,
            lines: None,
            sync_quality: SyncQuality::Unsynced,
            provenance: "genius".to_string(),
            source_url: Some(hit_url),
        })
    }
}

#[async_trait]
impl LyricsClient for TieredLyricsClient {
    async fn lookup(&self, query: &LyricsQuery) -> Result<LyricsRecord> {
        if let Some(config) = &self.synced {
            match self.lookup_synced(config, query).await {
                Ok(record) => {
                    info!(artist = %query.artist, title = %query.title, source = "lrclib", "lyrics found");
                    return Ok(record);
                }
                Err(e) => warn!(error = %e, "synced lyrics provider missed"),
            }
        }

        if let Some(config) = &self.plain {
            match self.lookup_plain(config, query).await {
                Ok(record) => {
                    info!(artist = %query.artist, title = %query.title, source = "genius", "lyrics found");
                    return Ok(record);
                }
                Err(e) => warn!(error = %e, "plain lyrics provider missed"),
            }
        }

        Err(Error::NotFound(format!(
            "lyrics for {} — {}",
            query.artist, query.title
        )))
    }
}

static LRC_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^\[(\d{1,2}):(\d{2})(?:\.(\d{1,2}))?\]\s*(.*)$").unwrap());

/// Parse LRC text (`[mm:ss.xx] line`) into timed lines. End times are the
/// next line's start.
pub fn parse_lrc(lrc: &str) -> Vec<LyricsLine> {
    let mut lines: Vec<LyricsLine> = Vec::new();
    for caps in LRC_LINE.captures_iter(lrc) {
        let minutes: u64 = caps[1].parse().unwrap_or(0);
        let seconds: u64 = caps[2].parse().unwrap_or(0);
        let centis: u64 = caps
            .get(3)
            .map(|m| m.as_str().parse().unwrap_or(0))
            .unwrap_or(0);
        let start_ms = minutes * 60_000 + seconds * 1000 + centis * 10;
        let text = caps[4].trim().to_string();
        if text.is_empty() {
            continue;
        }
        if let Some(prev) = lines.last_mut() {
            if prev.end_ms.is_none() {
                prev.end_ms = Some(start_ms);
            }
        }
        lines.push(LyricsLine {
            text,
            start_ms,
            end_ms: None,
        });
    }
    lines
}

static LYRICS_CONTAINER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?s)<div[^>]*data-lyrics-container="true"[^>]*>(.*?)</div>"#).unwrap()
});
static BR_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"<br\s*/?>").unwrap());
static ANY_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]+>").unwrap());
static SECTION_HEADER: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[.*?\]").unwrap());
static BLANK_RUNS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").unwrap());

/// Pull lyrics text out of a provider page.
fn extract_lyrics_from_page(html: &str) -> Option<String> {
    let mut parts = Vec::new();
    for caps in LYRICS_CONTAINER.captures_iter(html) {
        let fragment = BR_TAG.replace_all(&caps[1], "\n");
        let fragment = ANY_TAG.replace_all(&fragment, "");
        parts.push(fragment.trim().to_string());
    }
    if parts.is_empty() {
        return None;
    }
    let cleaned = clean_lyrics(&parts.join("\n"));
    (!cleaned.is_empty()).then_some(cleaned)
}

/// Strip section headers (`[Refrain]`, `[Couplet 1]`, …) and collapse
/// blank runs.
pub fn clean_lyrics(raw: &str) -> String {
    let text = SECTION_HEADER.replace_all(raw, "");
    let text = BLANK_RUNS.replace_all(&text, "\n\n");
    text.trim().to_string()
}

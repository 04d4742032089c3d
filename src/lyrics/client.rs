//! HTTP client for the public lyrics API.

use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use url::Url;

/// Default lyrics API base.
pub const DEFAULT_API_BASE: &str = "https://api.lyrics.ovh/v1";

/// Per-request timeout.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Lyrics lookup failure.
#[derive(Error, Debug)]
pub enum LyricsError {
    /// The configured base URL cannot take path segments.
    #[error("invalid lyrics API base URL: {0}")]
    InvalidBase(String),

    /// Network failure, timeout or undecodable body.
    #[error("lyrics request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The API answered with a non-success status.
    #[error("lyrics API returned status {0}")]
    Status(u16),

    /// The API answered but had no lyrics for the song.
    #[error("no lyrics found for '{0}'")]
    NotFound(String),
}

#[derive(Debug, Deserialize)]
struct LyricsResponse {
    #[serde(default)]
    lyrics: Option<String>,
}

/// Fetches lyrics from `<base>/<artist>/<title>`.
#[derive(Debug, Clone)]
pub struct LyricsClient {
    http: reqwest::Client,
    base: Url,
    artist: String,
}

impl LyricsClient {
    /// # Errors
    ///
    /// Fails when `base` is not an absolute http(s) URL or the HTTP client
    /// cannot be built.
    pub fn new(base: &str, artist: impl Into<String>) -> Result<Self, LyricsError> {
        let base = Url::parse(base).map_err(|e| LyricsError::InvalidBase(format!("{base}: {e}")))?;
        if base.cannot_be_a_base() {
            return Err(LyricsError::InvalidBase(base.to_string()));
        }
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            http,
            base,
            artist: artist.into(),
        })
    }

    #[must_use]
    pub fn artist(&self) -> &str {
        &self.artist
    }

    /// Request URL for one song. Artist and title are percent-encoded.
    pub fn song_url(&self, title: &str) -> Result<Url, LyricsError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|()| LyricsError::InvalidBase(self.base.to_string()))?
            .pop_if_empty()
            .push(&self.artist)
            .push(title);
        Ok(url)
    }

    /// Fetch the lyrics of `title`.
    pub async fn fetch(&self, title: &str) -> Result<String, LyricsError> {
        let url = self.song_url(title)?;
        tracing::info!(name: "lyrics.fetch", song = %title, url = %url, "Fetching lyrics");

        let resp = self
            .http
            .get(url)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            tracing::warn!(name: "lyrics.fetch.failed", song = %title, status = status.as_u16(), "Lyrics API error");
            return Err(LyricsError::Status(status.as_u16()));
        }

        let body: LyricsResponse = resp.json().await?;
        match body.lyrics {
            Some(text) if !text.trim().is_empty() => Ok(text.replace("\r\n", "\n")),
            _ => Err(LyricsError::NotFound(title.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_song_url_encodes_segments() {
        let client = LyricsClient::new("https://api.lyrics.ovh/v1", "Taylor Swift").unwrap();
        let url = client.song_url("Anti-Hero").unwrap();
        assert_eq!(url.as_str(), "https://api.lyrics.ovh/v1/Taylor%20Swift/Anti-Hero");
    }

    #[test]
    fn test_song_url_with_trailing_slash() {
        let client = LyricsClient::new("http://127.0.0.1:9/v1/", "Taylor Swift").unwrap();
        let url = client.song_url("Love Story").unwrap();
        assert_eq!(url.path(), "/v1/Taylor%20Swift/Love%20Story");
    }

    #[test]
    fn test_invalid_base() {
        assert!(matches!(
            LyricsClient::new("not a url", "x"),
            Err(LyricsError::InvalidBase(_))
        ));
        assert!(matches!(
            LyricsClient::new("mailto:someone@example.com", "x"),
            Err(LyricsError::InvalidBase(_))
        ));
    }
}

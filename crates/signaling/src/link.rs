//! Share links: the URLs one user copies to hand a file to the other.
//!
//! A share link is the configured base URL plus exactly one query parameter
//! naming the retrieval path: `?file=` for the in-process registry,
//! `?offer=` / `?answer=` for manual signaling, `?magnet=` for the swarm.

use crate::error::SignalingError;
use crate::percent::{decode_component, encode_component};

/// Base URL used when the caller does not configure one.
pub const DEFAULT_BASE_URL: &str = "https://linkdrop.app/";

/// What a share link points at.
#[derive(Debug, Clone, PartialEq)]
pub enum ShareTarget {
    /// Registry lookup by share id: `?file=<id>`.
    StoredFile(String),
    /// Manual signaling offer blob: `?offer=<blob>`.
    Offer(String),
    /// Manual signaling answer blob: `?answer=<blob>`.
    Answer(String),
    /// Swarm download: `?magnet=<uri>`.
    Magnet(String),
}

/// Builds share links against a fixed base URL.
#[derive(Debug, Clone)]
pub struct ShareLink {
    base_url: String,
}

impl ShareLink {
    pub fn new(base_url: impl Into<String>) -> Self {
        ShareLink {
            base_url: base_url.into(),
        }
    }

    /// Link for a file parked in the in-process share registry.
    pub fn file_url(&self, share_id: &str) -> String {
        format!("{}?file={}", self.base_url, encode_component(share_id))
    }

    /// Link carrying a manual-signaling offer blob.
    ///
    /// Blobs are URL-safe base64, so they are embedded verbatim.
    pub fn offer_url(&self, blob: &str) -> String {
        format!("{}?offer={blob}", self.base_url)
    }

    /// Link carrying a manual-signaling answer blob.
    pub fn answer_url(&self, blob: &str) -> String {
        format!("{}?answer={blob}", self.base_url)
    }

    /// Link wrapping a magnet URI for the swarm fallback.
    pub fn magnet_url(&self, magnet_uri: &str) -> String {
        format!("{}?magnet={}", self.base_url, encode_component(magnet_uri))
    }
}

impl Default for ShareLink {
    fn default() -> Self {
        ShareLink::new(DEFAULT_BASE_URL)
    }
}

/// Extracts the share target from a link produced by [`ShareLink`].
///
/// Parameter precedence mirrors generation: `file`, then `offer`, then
/// `answer`, then `magnet`. Unknown parameters and empty values are ignored.
pub fn parse_share_link(url: &str) -> Result<ShareTarget, SignalingError> {
    let query = url
        .split_once('?')
        .map(|(_, query)| query)
        .ok_or_else(|| SignalingError::NotShareLink(url.to_string()))?;
    let query = query.split_once('#').map_or(query, |(query, _)| query);

    let mut file = None;
    let mut offer = None;
    let mut answer = None;
    let mut magnet = None;
    for pair in query.split('&') {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        if value.is_empty() {
            continue;
        }
        match key {
            "file" => file = Some(value),
            "offer" => offer = Some(value),
            "answer" => answer = Some(value),
            "magnet" => magnet = Some(value),
            _ => {}
        }
    }

    if let Some(share_id) = file {
        return Ok(ShareTarget::StoredFile(decode_component(share_id)?));
    }
    if let Some(blob) = offer {
        return Ok(ShareTarget::Offer(blob.to_string()));
    }
    if let Some(blob) = answer {
        return Ok(ShareTarget::Answer(blob.to_string()));
    }
    if let Some(uri) = magnet {
        return Ok(ShareTarget::Magnet(decode_component(uri)?));
    }
    Err(SignalingError::MissingTarget)
}

//! Magnet URIs for the swarm fallback.

use crate::error::SignalingError;
use crate::percent::{decode_component, encode_component};

/// A parsed `magnet:` URI, reduced to the fields LinkDrop uses.
#[derive(Debug, Clone, PartialEq)]
pub struct MagnetLink {
    /// BitTorrent info hash: 40 hex characters (v1) or 32 base32 characters.
    pub info_hash: String,
    pub display_name: String,
    pub trackers: Vec<String>,
}

impl MagnetLink {
    pub fn new(info_hash: impl Into<String>) -> Result<Self, SignalingError> {
        let info_hash = info_hash.into();
        if !is_valid_info_hash(&info_hash) {
            return Err(SignalingError::InvalidInfoHash(info_hash));
        }
        Ok(MagnetLink {
            info_hash,
            display_name: String::new(),
            trackers: Vec::new(),
        })
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = name.into();
        self
    }

    pub fn with_tracker(mut self, announce_url: impl Into<String>) -> Self {
        self.trackers.push(announce_url.into());
        self
    }

    /// Renders the `magnet:?xt=urn:btih:...` URI.
    pub fn to_uri(&self) -> String {
        let mut uri = format!("magnet:?xt=urn:btih:{}", self.info_hash);
        if !self.display_name.is_empty() {
            uri.push_str("&dn=");
            uri.push_str(&encode_component(&self.display_name));
        }
        for tracker in &self.trackers {
            uri.push_str("&tr=");
            uri.push_str(&encode_component(tracker));
        }
        uri
    }

    /// Parses a magnet URI, ignoring parameters LinkDrop does not use.
    pub fn parse(uri: &str) -> Result<Self, SignalingError> {
        let query = uri
            .strip_prefix("magnet:?")
            .ok_or_else(|| SignalingError::NotMagnet(uri.to_string()))?;

        let mut info_hash = None;
        let mut display_name = String::new();
        let mut trackers = Vec::new();
        for pair in query.split('&') {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            match key {
                "xt" => {
                    if let Some(hash) = value.strip_prefix("urn:btih:") {
                        info_hash = Some(hash.to_string());
                    }
                }
                "dn" => display_name = decode_component(value)?,
                "tr" => trackers.push(decode_component(value)?),
                _ => {}
            }
        }

        let info_hash = info_hash.ok_or(SignalingError::MissingInfoHash)?;
        if !is_valid_info_hash(&info_hash) {
            return Err(SignalingError::InvalidInfoHash(info_hash));
        }
        Ok(MagnetLink {
            info_hash,
            display_name,
            trackers,
        })
    }
}

fn is_valid_info_hash(hash: &str) -> bool {
    match hash.len() {
        40 => hash.bytes().all(|b| b.is_ascii_hexdigit()),
        32 => hash
            .bytes()
            .all(|b| matches!(b, b'A'..=b'Z' | b'a'..=b'z' | b'2'..=b'7')),
        _ => false,
    }
}

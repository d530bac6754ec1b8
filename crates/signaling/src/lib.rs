//! Out-of-band signaling for LinkDrop: connection descriptors, share links,
//! and magnet URIs.
//!
//! Nothing in this crate touches the network. It only turns session
//! descriptions and file handles into strings a user can copy out of band
//! (URL, chat message, QR code) and back again.

mod percent;

pub mod descriptor;
pub mod error;
pub mod link;
pub mod magnet;

pub use descriptor::{
    ConnectionDescriptor, IceCandidate, SessionDescription, decode_compact, decode_descriptor,
    encode_compact, encode_descriptor,
};
pub use error::SignalingError;
pub use link::{DEFAULT_BASE_URL, ShareLink, ShareTarget, parse_share_link};
pub use magnet::MagnetLink;

//! Types shared between the relay and its clients

use serde::{Deserialize, Serialize};

/// A NAT-traversal server descriptor, in the shape browsers expect for
/// `RTCPeerConnection` configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServer {
    pub urls: IceUrls,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

/// Credential services return either a single URL or a list
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum IceUrls {
    One(String),
    Many(Vec<String>),
}

impl IceServer {
    /// An unauthenticated STUN server
    pub fn stun(url: impl Into<String>) -> Self {
        Self {
            urls: IceUrls::One(url.into()),
            username: None,
            credential: None,
        }
    }

    /// Whether this descriptor carries TURN credentials
    pub fn has_credentials(&self) -> bool {
        self.username.is_some() && self.credential.is_some()
    }
}

/// Public STUN server served until a credential fetch succeeds
pub const DEFAULT_STUN_URL: &str = "stun:stun.l.google.com:19302";

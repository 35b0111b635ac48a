//! Assets as seen by the media host.

use serde::{Deserialize, Serialize};

/// Which part of a submission an asset is.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AssetKind {
    Icon,
    Source,
}

impl AssetKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Icon => "icon",
            Self::Source => "source",
        }
    }
}

/// An asset stored on the media host.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct UploadedAsset {
    /// Public (CDN) URL the CI workflow downloads from.
    pub url: String,

    /// Identifier assigned by the media host.
    pub public_id: String,
}

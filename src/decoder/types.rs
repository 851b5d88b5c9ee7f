use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Symbologies a decoder may report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BarcodeFormat {
    Aztec,
    Codabar,
    Code39,
    Code93,
    Code128,
    DataMatrix,
    Ean8,
    Ean13,
    Itf,
    Maxicode,
    Pdf417,
    QrCode,
    Rss14,
    RssExpanded,
    UpcA,
    UpcE,
    UpcEanExtension,
}

impl BarcodeFormat {
    /// Whether the symbology is a 2D matrix code
    pub fn is_matrix(&self) -> bool {
        matches!(
            self,
            BarcodeFormat::Aztec
                | BarcodeFormat::DataMatrix
                | BarcodeFormat::Maxicode
                | BarcodeFormat::Pdf417
                | BarcodeFormat::QrCode
        )
    }
}

/// A recognized symbol. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecodeResult {
    /// Decoded payload text
    pub text: String,
    /// Symbology the payload was read from
    pub format: BarcodeFormat,
    /// Raw symbol bytes, when the decoder exposes them
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_bytes: Option<Vec<u8>>,
    /// Wall-clock time the decoder produced the result
    pub decoded_at: DateTime<Utc>,
}

impl DecodeResult {
    pub fn new<S: Into<String>>(text: S, format: BarcodeFormat) -> Self {
        Self {
            text: text.into(),
            format,
            raw_bytes: None,
            decoded_at: Utc::now(),
        }
    }

    pub fn with_raw_bytes(mut self, raw_bytes: Vec<u8>) -> Self {
        self.raw_bytes = Some(raw_bytes);
        self
    }
}

/// Options bundle a decoder is configured with once per scanning session.
///
/// Unset options leave the decoder's own default in place.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DecoderOptions {
    #[serde(default)]
    pub try_harder: Option<bool>,

    #[serde(default)]
    pub pure_barcode: Option<bool>,

    #[serde(default)]
    pub character_set: Option<String>,

    #[serde(default)]
    pub try_inverted: Option<bool>,

    #[serde(default)]
    pub auto_rotate: Option<bool>,

    /// Restrict decoding to these symbologies; empty means all
    #[serde(default)]
    pub possible_formats: Vec<BarcodeFormat>,
}

impl DecoderOptions {
    /// Whether results of `format` may be produced under these options
    pub fn accepts(&self, format: BarcodeFormat) -> bool {
        self.possible_formats.is_empty() || self.possible_formats.contains(&format)
    }
}

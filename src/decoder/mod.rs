//! Seam to the barcode symbol decoder.
//!
//! The pipeline treats decoding as an opaque `decode(luminance) -> Option<result>`
//! call made from a worker thread.

#[cfg(feature = "qr")]
mod qr;
mod types;

#[cfg(feature = "qr")]
pub use qr::QrDecoder;
pub use types::{BarcodeFormat, DecodeResult, DecoderOptions};

use crate::error::Result;
use crate::frame::LuminanceView;
use std::sync::Arc;

/// Symbol decoder over a luminance view
pub trait Decoder: Send + Sync {
    fn decode(&self, view: &LuminanceView<'_>) -> Option<DecodeResult>;
}

/// Builds a decoder configured for one scanning session
pub trait DecoderFactory: Send + Sync {
    fn create(&self, options: &DecoderOptions) -> Result<Arc<dyn Decoder>>;
}

impl<F> DecoderFactory for F
where
    F: Fn(&DecoderOptions) -> Result<Arc<dyn Decoder>> + Send + Sync,
{
    fn create(&self, options: &DecoderOptions) -> Result<Arc<dyn Decoder>> {
        self(options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedDecoder(Option<String>);

    impl Decoder for FixedDecoder {
        fn decode(&self, _view: &LuminanceView<'_>) -> Option<DecodeResult> {
            self.0
                .as_ref()
                .map(|text| DecodeResult::new(text.clone(), BarcodeFormat::Ean13))
        }
    }

    #[test]
    fn test_closure_factory() {
        let factory = |options: &DecoderOptions| -> Result<Arc<dyn Decoder>> {
            let text = options.character_set.clone();
            Ok(Arc::new(FixedDecoder(text)))
        };

        let options = DecoderOptions {
            character_set: Some("UTF-8".to_string()),
            ..Default::default()
        };
        let decoder = factory.create(&options).unwrap();

        let data = vec![0u8; 4];
        let view = LuminanceView::full(&data, 2, 2).unwrap();
        let result = decoder.decode(&view).unwrap();
        assert_eq!(result.text, "UTF-8");
        assert_eq!(result.format, BarcodeFormat::Ean13);
    }

    #[test]
    fn test_possible_formats_filter() {
        let any = DecoderOptions::default();
        assert!(any.accepts(BarcodeFormat::Code128));

        let qr_only = DecoderOptions {
            possible_formats: vec![BarcodeFormat::QrCode],
            ..Default::default()
        };
        assert!(qr_only.accepts(BarcodeFormat::QrCode));
        assert!(!qr_only.accepts(BarcodeFormat::Ean8));
    }

    #[test]
    fn test_options_from_toml() {
        let options: DecoderOptions = toml::from_str(
            r#"
            try_harder = true
            possible_formats = ["qr_code", "ean13", "code128"]
            "#,
        )
        .unwrap();

        assert_eq!(options.try_harder, Some(true));
        assert_eq!(options.pure_barcode, None);
        assert_eq!(
            options.possible_formats,
            vec![
                BarcodeFormat::QrCode,
                BarcodeFormat::Ean13,
                BarcodeFormat::Code128
            ]
        );
    }
}

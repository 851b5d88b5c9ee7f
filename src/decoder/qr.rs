use super::{BarcodeFormat, DecodeResult, Decoder, DecoderFactory, DecoderOptions};
use crate::error::Result;
use crate::frame::LuminanceView;
use rqrr::PreparedImage;
use std::sync::Arc;
use tracing::{debug, trace};

/// QR code decoder backed by `rqrr`
#[derive(Debug, Clone)]
pub struct QrDecoder {
    enabled: bool,
    try_inverted: bool,
}

impl QrDecoder {
    pub fn new(options: &DecoderOptions) -> Self {
        if options.pure_barcode.is_some() || options.character_set.is_some() {
            debug!("QR decoder ignores pure_barcode and character_set options");
        }

        Self {
            enabled: options.accepts(BarcodeFormat::QrCode),
            try_inverted: options.try_inverted.unwrap_or(false),
        }
    }

    /// Factory usable with `Scanner::start`
    pub fn factory() -> impl DecoderFactory {
        |options: &DecoderOptions| -> Result<Arc<dyn Decoder>> {
            Ok(Arc::new(QrDecoder::new(options)))
        }
    }

    fn scan(&self, view: &LuminanceView<'_>, inverted: bool) -> Option<DecodeResult> {
        let width = view.width() as usize;
        let height = view.height() as usize;

        let mut image = PreparedImage::prepare_from_greyscale(width, height, |x, y| {
            let luma = view.pixel(x as u32, y as u32);
            if inverted {
                255 - luma
            } else {
                luma
            }
        });

        for grid in image.detect_grids() {
            match grid.decode() {
                Ok((_meta, content)) => {
                    return Some(DecodeResult::new(content, BarcodeFormat::QrCode));
                }
                Err(e) => trace!("QR grid found but not decodable: {}", e),
            }
        }

        None
    }
}

impl Decoder for QrDecoder {
    fn decode(&self, view: &LuminanceView<'_>) -> Option<DecodeResult> {
        if !self.enabled {
            return None;
        }

        self.scan(view, false).or_else(|| {
            if self.try_inverted {
                self.scan(view, true)
            } else {
                None
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_frame_has_no_result() {
        let decoder = QrDecoder::new(&DecoderOptions {
            try_inverted: Some(true),
            ..Default::default()
        });

        let data = vec![200u8; 64 * 48];
        let view = LuminanceView::full(&data, 64, 48).unwrap();
        assert!(decoder.decode(&view).is_none());
    }

    #[test]
    fn test_disabled_when_qr_not_possible() {
        let decoder = QrDecoder::new(&DecoderOptions {
            possible_formats: vec![BarcodeFormat::Ean13],
            ..Default::default()
        });
        assert!(!decoder.enabled);

        let factory = QrDecoder::factory();
        assert!(factory.create(&DecoderOptions::default()).is_ok());
    }
}

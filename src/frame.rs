use crate::error::{Result, ScanError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::trace;

/// Pixel format of raw preview buffers delivered by the capture source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelFormat {
    /// YCrCb 4:2:0 semi-planar: full-size Y plane followed by interleaved VU
    Nv21,
    /// Luminance only, one byte per pixel
    Gray8,
}

impl PixelFormat {
    /// Bits per pixel averaged over all planes
    pub fn bits_per_pixel(&self) -> usize {
        match self {
            PixelFormat::Nv21 => 12,
            PixelFormat::Gray8 => 8,
        }
    }

    /// Size in bytes of one frame at the given resolution
    pub fn buffer_size(&self, resolution: Resolution) -> usize {
        resolution.area() * self.bits_per_pixel() / 8
    }
}

/// Preview resolution as offered by the capture device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn area(&self) -> usize {
        self.width as usize * self.height as usize
    }

    pub fn is_valid(&self) -> bool {
        self.width > 0 && self.height > 0
    }

    /// Same resolution with the axes exchanged
    pub fn swapped(&self) -> Self {
        Self::new(self.height, self.width)
    }
}

impl From<(u32, u32)> for Resolution {
    fn from((width, height): (u32, u32)) -> Self {
        Self::new(width, height)
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl FromStr for Resolution {
    type Err = ScanError;

    fn from_str(s: &str) -> Result<Self> {
        let (w, h) = s
            .split_once(['x', 'X'])
            .ok_or_else(|| ScanError::system(format!("Invalid resolution '{}'", s)))?;
        let width = w
            .trim()
            .parse()
            .map_err(|_| ScanError::system(format!("Invalid width in '{}'", s)))?;
        let height = h
            .trim()
            .parse()
            .map_err(|_| ScanError::system(format!("Invalid height in '{}'", s)))?;
        Ok(Self::new(width, height))
    }
}

/// Integer rectangle in sensor-buffer coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Rectangle {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Rectangle {
    pub const fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Rectangle covering a whole frame of the given resolution
    pub fn full(resolution: Resolution) -> Self {
        Self::new(0, 0, resolution.width, resolution.height)
    }

    pub const fn empty() -> Self {
        Self::new(0, 0, 0, 0)
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn right(&self) -> u32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> u32 {
        self.y + self.height
    }

    pub fn size(&self) -> Resolution {
        Resolution::new(self.width, self.height)
    }

    /// Whether this rectangle lies entirely within `[0, 0, bounds.width, bounds.height]`
    pub fn fits_within(&self, bounds: Resolution) -> bool {
        self.right() <= bounds.width && self.bottom() <= bounds.height
    }
}

impl fmt::Display for Rectangle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({}, {}) {}x{}",
            self.x, self.y, self.width, self.height
        )
    }
}

/// Raw frame buffer owned by the capture source
#[derive(Debug, Clone)]
pub struct FrameBuffer {
    /// Sequence number assigned by the source on delivery
    pub sequence: u64,
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
}

impl FrameBuffer {
    /// Allocate a zeroed buffer large enough for one frame
    pub fn allocate(resolution: Resolution, format: PixelFormat) -> Self {
        Self {
            sequence: 0,
            data: vec![0u8; format.buffer_size(resolution)],
            width: resolution.width,
            height: resolution.height,
            format,
        }
    }

    pub fn resolution(&self) -> Resolution {
        Resolution::new(self.width, self.height)
    }

    /// Check that the buffer holds at least one complete frame
    pub fn validate_size(&self) -> bool {
        self.data.len() >= self.format.buffer_size(self.resolution())
    }

    /// Luminance plane: the leading `width * height` bytes for both supported formats
    pub fn luminance(&self) -> &[u8] {
        let len = self.resolution().area().min(self.data.len());
        &self.data[..len]
    }
}

/// Receives buffers handed back by the pipeline
pub trait FrameRecycler: Send + Sync {
    fn recycle(&self, buffer: FrameBuffer);
}

/// Scoped borrow of a capture buffer.
///
/// The buffer goes back to its source exactly once: either through an explicit
/// [`FrameLease::release`] or, on any other exit path (early return, error,
/// panic unwinding through a worker), when the lease is dropped.
pub struct FrameLease {
    buffer: Option<FrameBuffer>,
    recycler: Arc<dyn FrameRecycler>,
}

impl FrameLease {
    pub fn new(buffer: FrameBuffer, recycler: Arc<dyn FrameRecycler>) -> Self {
        Self {
            buffer: Some(buffer),
            recycler,
        }
    }

    pub fn buffer(&self) -> Option<&FrameBuffer> {
        self.buffer.as_ref()
    }

    pub fn sequence(&self) -> u64 {
        self.buffer.as_ref().map(|b| b.sequence).unwrap_or_default()
    }

    /// Return the buffer to the capture source
    pub fn release(mut self) {
        self.return_buffer();
    }

    fn return_buffer(&mut self) {
        if let Some(buffer) = self.buffer.take() {
            trace!("Recycling frame buffer {}", buffer.sequence);
            self.recycler.recycle(buffer);
        }
    }
}

impl Drop for FrameLease {
    fn drop(&mut self) {
        self.return_buffer();
    }
}

impl fmt::Debug for FrameLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameLease")
            .field("sequence", &self.sequence())
            .field("held", &self.buffer.is_some())
            .finish()
    }
}

/// Read-only, cropped projection of a luminance plane
#[derive(Debug, Clone, Copy)]
pub struct LuminanceView<'a> {
    data: &'a [u8],
    data_width: u32,
    region: Rectangle,
}

impl<'a> LuminanceView<'a> {
    /// Create a view over `region` of a `data_width x data_height` plane
    pub fn new(
        data: &'a [u8],
        data_width: u32,
        data_height: u32,
        region: Rectangle,
    ) -> Result<Self> {
        let plane = Resolution::new(data_width, data_height);
        if data.len() < plane.area() {
            return Err(ScanError::frame(format!(
                "Luminance plane too small: expected {} bytes for {}, got {}",
                plane.area(),
                plane,
                data.len()
            )));
        }
        if region.is_empty() || !region.fits_within(plane) {
            return Err(ScanError::frame(format!(
                "Crop {} does not fit within {}",
                region, plane
            )));
        }

        Ok(Self {
            data,
            data_width,
            region,
        })
    }

    /// View over a whole plane
    pub fn full(data: &'a [u8], width: u32, height: u32) -> Result<Self> {
        Self::new(data, width, height, Rectangle::full(Resolution::new(width, height)))
    }

    pub fn width(&self) -> u32 {
        self.region.width
    }

    pub fn height(&self) -> u32 {
        self.region.height
    }

    /// One row of the cropped region
    pub fn row(&self, y: u32) -> &'a [u8] {
        assert!(y < self.region.height, "row {} out of range", y);
        let start = (self.region.y + y) as usize * self.data_width as usize + self.region.x as usize;
        &self.data[start..start + self.region.width as usize]
    }

    pub fn pixel(&self, x: u32, y: u32) -> u8 {
        self.row(y)[x as usize]
    }

    /// Copy the cropped region row-major into `target`, reusing its allocation
    pub fn copy_matrix(&self, target: &mut Vec<u8>) {
        target.clear();
        target.reserve(self.region.width as usize * self.region.height as usize);
        for y in 0..self.region.height {
            target.extend_from_slice(self.row(y));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct CountingRecycler {
        returned: Mutex<Vec<u64>>,
    }

    impl FrameRecycler for CountingRecycler {
        fn recycle(&self, buffer: FrameBuffer) {
            self.returned.lock().push(buffer.sequence);
        }
    }

    #[test]
    fn test_pixel_format_sizes() {
        let res = Resolution::new(640, 480);
        assert_eq!(PixelFormat::Nv21.buffer_size(res), 640 * 480 * 3 / 2);
        assert_eq!(PixelFormat::Gray8.buffer_size(res), 640 * 480);
    }

    #[test]
    fn test_resolution_parsing() {
        let res: Resolution = "1280x720".parse().unwrap();
        assert_eq!(res, Resolution::new(1280, 720));
        assert_eq!(res.swapped(), Resolution::new(720, 1280));
        assert!("1280".parse::<Resolution>().is_err());
        assert!("axb".parse::<Resolution>().is_err());
    }

    #[test]
    fn test_rectangle_bounds() {
        let rect = Rectangle::new(10, 20, 100, 50);
        assert_eq!(rect.right(), 110);
        assert_eq!(rect.bottom(), 70);
        assert!(rect.fits_within(Resolution::new(110, 70)));
        assert!(!rect.fits_within(Resolution::new(109, 70)));
        assert!(Rectangle::empty().is_empty());
    }

    #[test]
    fn test_lease_recycles_once_on_release() {
        let recycler = Arc::new(CountingRecycler::default());
        let mut buffer = FrameBuffer::allocate(Resolution::new(4, 4), PixelFormat::Gray8);
        buffer.sequence = 7;

        let lease = FrameLease::new(buffer, recycler.clone());
        lease.release();

        assert_eq!(*recycler.returned.lock(), vec![7]);
    }

    #[test]
    fn test_lease_recycles_on_drop() {
        let recycler = Arc::new(CountingRecycler::default());
        {
            let _lease = FrameLease::new(
                FrameBuffer::allocate(Resolution::new(4, 4), PixelFormat::Gray8),
                recycler.clone(),
            );
        }
        assert_eq!(recycler.returned.lock().len(), 1);
    }

    #[test]
    fn test_lease_recycles_on_panic() {
        let recycler = Arc::new(CountingRecycler::default());
        let lease = FrameLease::new(
            FrameBuffer::allocate(Resolution::new(4, 4), PixelFormat::Gray8),
            recycler.clone(),
        );

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || {
            let _held = lease;
            panic!("decoder crashed");
        }));

        assert!(result.is_err());
        assert_eq!(recycler.returned.lock().len(), 1);
    }

    #[test]
    fn test_luminance_view_crop() {
        // 4x3 plane with value = y * 10 + x
        let data: Vec<u8> = (0..3u8)
            .flat_map(|y| (0..4u8).map(move |x| y * 10 + x))
            .collect();

        let view = LuminanceView::new(&data, 4, 3, Rectangle::new(1, 1, 2, 2)).unwrap();
        assert_eq!(view.width(), 2);
        assert_eq!(view.height(), 2);
        assert_eq!(view.row(0), &[11, 12]);
        assert_eq!(view.pixel(1, 1), 22);

        let mut matrix = Vec::new();
        view.copy_matrix(&mut matrix);
        assert_eq!(matrix, vec![11, 12, 21, 22]);
    }

    #[test]
    fn test_luminance_view_rejects_bad_crop() {
        let data = vec![0u8; 16];
        assert!(LuminanceView::new(&data, 4, 4, Rectangle::new(2, 2, 3, 1)).is_err());
        assert!(LuminanceView::new(&data, 4, 4, Rectangle::empty()).is_err());
        assert!(LuminanceView::new(&data[..8], 4, 4, Rectangle::new(0, 0, 1, 1)).is_err());
    }

    #[test]
    fn test_nv21_luminance_plane() {
        let frame = FrameBuffer::allocate(Resolution::new(4, 2), PixelFormat::Nv21);
        assert!(frame.validate_size());
        assert_eq!(frame.data.len(), 12);
        assert_eq!(frame.luminance().len(), 8);
    }
}

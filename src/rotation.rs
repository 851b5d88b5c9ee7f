//! Quarter-turn rotation of luminance planes.

use tracing::trace;

/// Rotate a `width` x `height` plane 90 degrees counter-clockwise into
/// `target`, which ends up `height` x `width`.
///
/// `target` is resized only when its length differs from the source.
pub fn rotate_ccw_90(source: &[u8], target: &mut Vec<u8>, width: usize, height: usize) {
    let len = width * height;
    debug_assert!(source.len() >= len);

    if target.len() != len {
        trace!("Resizing rotation target to {} bytes", len);
        target.resize(len, 0);
    }

    for y in 0..height {
        let row = &source[y * width..(y + 1) * width];
        let column = height - 1 - y;
        for (x, &value) in row.iter().enumerate() {
            target[x * height + column] = value;
        }
    }
}

/// Rotation target reused across frames
#[derive(Debug, Default)]
pub struct FrameRotator {
    target: Vec<u8>,
}

impl FrameRotator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rotate_ccw_90(&mut self, source: &[u8], width: usize, height: usize) -> &[u8] {
        rotate_ccw_90(source, &mut self.target, width, height);
        &self.target
    }

    pub fn capacity(&self) -> usize {
        self.target.capacity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rotate_small_plane() {
        // 3x2
        // a b c
        // d e f
        let source = [1u8, 2, 3, 4, 5, 6];
        let mut target = Vec::new();
        rotate_ccw_90(&source, &mut target, 3, 2);

        // 2x3
        // d a
        // e b
        // f c
        assert_eq!(target, vec![4, 1, 5, 2, 6, 3]);
    }

    #[test]
    fn test_four_rotations_are_identity() {
        let (w, h) = (5usize, 3usize);
        let source: Vec<u8> = (0..(w * h) as u8).collect();

        let mut a = Vec::new();
        let mut b = Vec::new();
        rotate_ccw_90(&source, &mut a, w, h);
        rotate_ccw_90(&a, &mut b, h, w);
        rotate_ccw_90(&b, &mut a, w, h);
        rotate_ccw_90(&a, &mut b, h, w);

        assert_eq!(b, source);
    }

    #[test]
    fn test_target_is_reused() {
        let source = vec![7u8; 640 * 480];
        let mut rotator = FrameRotator::new();
        rotator.rotate_ccw_90(&source, 640, 480);
        let capacity = rotator.capacity();

        let rotated = rotator.rotate_ccw_90(&source, 480, 640);
        assert_eq!(rotated.len(), 640 * 480);
        assert_eq!(rotator.capacity(), capacity);
    }

    #[test]
    fn test_oversized_source_uses_prefix() {
        // Trailing chroma bytes beyond width * height are ignored
        let source = [1u8, 2, 3, 4, 9, 9];
        let mut target = Vec::new();
        rotate_ccw_90(&source, &mut target, 2, 2);
        assert_eq!(target, vec![3, 1, 4, 2]);
    }
}

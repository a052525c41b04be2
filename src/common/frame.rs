use chrono::{DateTime, Utc};
use image::DynamicImage;
use std::fmt;
use std::sync::Arc;

/// Position of a dispatched frame in the output stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct SequenceId(u64);

impl SequenceId {
    pub const ZERO: SequenceId = SequenceId(0);

    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn value(self) -> u64 {
        self.0
    }

    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for SequenceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A captured image. Cloning shares the pixel buffer, so the dispatcher can
/// hand one copy to the backend and keep another with the pending result.
#[derive(Clone)]
pub struct Frame {
    image: Arc<DynamicImage>,
    captured_at: DateTime<Utc>,
}

impl Frame {
    pub fn new(image: DynamicImage, captured_at: DateTime<Utc>) -> Self {
        Self {
            image: Arc::new(image),
            captured_at,
        }
    }

    pub fn captured_now(image: DynamicImage) -> Self {
        Self::new(image, Utc::now())
    }

    pub fn image(&self) -> &DynamicImage {
        &self.image
    }

    pub fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width())
            .field("height", &self.height())
            .field("captured_at", &self.captured_at)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn frame_keeps_capture_time_and_reports_dimensions() {
        let at = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let frame = Frame::new(DynamicImage::new_rgb8(32, 24), at);
        let copy = frame.clone();

        assert_eq!(copy.captured_at(), at);
        assert_eq!((copy.width(), copy.height()), (32, 24));
        assert!(format!("{:?}", copy).contains("width: 32"));
    }

    #[test]
    fn sequence_ids_advance_by_one() {
        let id = SequenceId::ZERO.next().next();
        assert_eq!(id, SequenceId::new(2));
        assert!(SequenceId::new(1) < id);
        assert_eq!(id.to_string(), "2");
    }
}

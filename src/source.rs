use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::common::Frame;
use crate::error::AppError;

const IMAGE_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "bmp"];
pub const CAMERA_INPUT: &str = "cam";

pub enum SourceRead {
    Frame(Frame),
    /// End of stream. The source can be reopened to start over.
    Empty,
}

pub trait FrameSource: Send {
    fn open(&mut self, input: &str) -> bool;

    /// Errors are reads that failed without reaching the end of the stream.
    fn read(&mut self) -> Result<SourceRead, AppError>;
}

/// Wraps a frame source with the open/replay policy of the run.
pub struct InputFeed {
    source: Box<dyn FrameSource>,
    input: String,
    loop_input: bool,
    open: bool,
    replays: u64,
}

impl InputFeed {
    pub fn new(source: Box<dyn FrameSource>, input: String, loop_input: bool) -> Self {
        Self {
            source,
            input,
            loop_input,
            open: false,
            replays: 0,
        }
    }

    pub fn open(&mut self) -> Result<(), AppError> {
        info!("Reading input {}", self.input);
        if !self.source.open(&self.input) {
            return Err(AppError::Source(format!(
                "Cannot open input file or camera: {}",
                self.input
            )));
        }
        self.open = true;
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn replays(&self) -> u64 {
        self.replays
    }

    /// Reads the next frame. At end of stream the source is reopened when
    /// looping and closed otherwise; either way no frame is returned and the
    /// caller retries on its next cycle.
    pub fn next_frame(&mut self) -> Result<Option<Frame>, AppError> {
        if !self.open {
            return Ok(None);
        }
        match self.source.read()? {
            SourceRead::Frame(frame) => Ok(Some(frame)),
            SourceRead::Empty if self.loop_input => {
                if self.source.open(&self.input) {
                    self.replays += 1;
                    debug!("Replaying input {} (pass {})", self.input, self.replays + 1);
                } else {
                    warn!("Failed to reopen input {}, stopping capture", self.input);
                    self.open = false;
                }
                Ok(None)
            }
            SourceRead::Empty => {
                info!("Input {} exhausted", self.input);
                self.open = false;
                Ok(None)
            }
        }
    }
}

/// Frames from a single image file or a directory of images, in name order.
#[derive(Debug, Default)]
pub struct ImageSequenceSource {
    paths: Vec<PathBuf>,
    cursor: usize,
}

impl ImageSequenceSource {
    pub fn new() -> Self {
        Self::default()
    }

    fn collect(path: &Path) -> std::io::Result<Vec<PathBuf>> {
        if path.is_file() {
            return Ok(vec![path.to_path_buf()]);
        }
        let mut paths: Vec<PathBuf> = std::fs::read_dir(path)?
            .filter_map(|entry| entry.ok().map(|entry| entry.path()))
            .filter(|path| is_image(path))
            .collect();
        paths.sort();
        Ok(paths)
    }
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

impl FrameSource for ImageSequenceSource {
    fn open(&mut self, input: &str) -> bool {
        if input == CAMERA_INPUT {
            warn!("Camera capture is not available to the image sequence source");
            return false;
        }
        match Self::collect(Path::new(input)) {
            Ok(paths) if !paths.is_empty() => {
                self.paths = paths;
                self.cursor = 0;
                true
            }
            Ok(_) => {
                warn!("No images found at {}", input);
                false
            }
            Err(e) => {
                warn!("Failed to open {}: {}", input, e);
                false
            }
        }
    }

    fn read(&mut self) -> Result<SourceRead, AppError> {
        let Some(path) = self.paths.get(self.cursor) else {
            return Ok(SourceRead::Empty);
        };
        let image = image::open(path).map_err(|e| {
            AppError::Source(format!("Failed to get frame from {}: {}", path.display(), e))
        })?;
        self.cursor += 1;
        Ok(SourceRead::Frame(Frame::captured_now(image)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::DynamicImage;
    use std::fs;

    fn image_dir(name: &str, count: usize) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("async-detect-{}-{}", name, std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        for i in 0..count {
            DynamicImage::new_rgb8(8, 6)
                .save(dir.join(format!("frame_{:03}.png", i)))
                .unwrap();
        }
        fs::write(dir.join("notes.txt"), "not an image").unwrap();
        dir
    }

    #[test]
    fn reads_directory_in_order_then_empties() {
        let dir = image_dir("seq", 2);
        let mut source = ImageSequenceSource::new();
        assert!(source.open(dir.to_str().unwrap()));

        for _ in 0..2 {
            match source.read().unwrap() {
                SourceRead::Frame(frame) => assert_eq!((frame.width(), frame.height()), (8, 6)),
                SourceRead::Empty => panic!("expected a frame"),
            }
        }
        assert!(matches!(source.read().unwrap(), SourceRead::Empty));
        fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn camera_and_missing_paths_do_not_open() {
        let mut source = ImageSequenceSource::new();
        assert!(!source.open(CAMERA_INPUT));
        assert!(!source.open("/definitely/not/here"));
    }

    #[test]
    fn feed_replays_when_looping() {
        let dir = image_dir("loop", 1);
        let mut feed = InputFeed::new(
            Box::new(ImageSequenceSource::new()),
            dir.to_str().unwrap().to_string(),
            true,
        );
        feed.open().unwrap();

        assert!(feed.next_frame().unwrap().is_some());
        assert!(feed.next_frame().unwrap().is_none());
        assert!(feed.is_open());
        assert_eq!(feed.replays(), 1);
        assert!(feed.next_frame().unwrap().is_some());
        fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn feed_closes_without_looping() {
        let dir = image_dir("once", 1);
        let mut feed = InputFeed::new(
            Box::new(ImageSequenceSource::new()),
            dir.to_str().unwrap().to_string(),
            false,
        );
        feed.open().unwrap();

        assert!(feed.next_frame().unwrap().is_some());
        assert!(feed.next_frame().unwrap().is_none());
        assert!(!feed.is_open());
        fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn unopenable_input_is_a_source_error() {
        let mut feed = InputFeed::new(
            Box::new(ImageSequenceSource::new()),
            CAMERA_INPUT.to_string(),
            false,
        );
        assert!(matches!(feed.open(), Err(AppError::Source(_))));
    }
}

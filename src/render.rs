use std::io::BufRead;
use tokio::sync::mpsc::{self, error::TryRecvError, UnboundedReceiver};
use tracing::{debug, info};

use crate::common::{Frame, SequenceId};
use crate::detection::{DetectionBuffer, LabelMap};
use crate::error::AppError;
use crate::metrics::OverlayMetrics;

const ESC: char = '\u{1b}';

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserEvent {
    Quit,
    ToggleMode,
    /// A display-control key for the renderer itself.
    Other(char),
}

impl UserEvent {
    pub fn from_key(key: char) -> Self {
        match key {
            'q' | 'Q' | ESC => UserEvent::Quit,
            '\t' | 't' | 'T' => UserEvent::ToggleMode,
            other => UserEvent::Other(other),
        }
    }
}

/// Everything the renderer gets for one frame, in sequence order.
pub struct FrameOutput<'a> {
    pub sequence: SequenceId,
    pub frame: &'a Frame,
    pub detections: &'a DetectionBuffer,
    pub overlay: &'a OverlayMetrics,
}

pub trait Renderer: Send {
    /// Draws one frame and returns at most one pending user event.
    fn render(&mut self, output: FrameOutput<'_>) -> Result<Option<UserEvent>, AppError>;

    fn handle_key(&mut self, _key: char) {}
}

/// Writes detections and the overlay to the log. Unless headless, keys typed
/// on stdin become user events.
pub struct ConsoleRenderer {
    labels: LabelMap,
    threshold: f32,
    raw_output: bool,
    show_overlay: bool,
    keys: Option<UnboundedReceiver<char>>,
}

impl ConsoleRenderer {
    pub fn new(labels: LabelMap, threshold: f32, raw_output: bool, headless: bool) -> Self {
        let keys = (!headless).then(spawn_key_reader);
        Self {
            labels,
            threshold,
            raw_output,
            show_overlay: !headless,
            keys,
        }
    }

    fn next_key(&mut self) -> Option<char> {
        let keys = self.keys.as_mut()?;
        match keys.try_recv() {
            Ok(key) => Some(key),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => {
                debug!("Key input closed");
                self.keys = None;
                None
            }
        }
    }
}

fn spawn_key_reader() -> UnboundedReceiver<char> {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            for key in line.chars() {
                if tx.send(key).is_err() {
                    return;
                }
            }
        }
    });
    rx
}

impl Renderer for ConsoleRenderer {
    fn render(&mut self, output: FrameOutput<'_>) -> Result<Option<UserEvent>, AppError> {
        let (width, height) = (output.frame.width(), output.frame.height());
        let mut drawn = 0;
        for (index, detection) in output.detections.detections().enumerate() {
            let (xmin, ymin, xmax, ymax) = detection.scaled(width, height);
            let visible = detection.confidence > self.threshold;
            if self.raw_output {
                info!(
                    "[{},{}] element, prob = {}    ({},{})-({},{}){}",
                    index,
                    detection.label,
                    detection.confidence,
                    xmin,
                    ymin,
                    xmax,
                    ymax,
                    if visible { " WILL BE RENDERED!" } else { "" }
                );
            }
            if visible {
                drawn += 1;
                debug!(
                    "#{} {}:{:.3} at ({:.0},{:.0})-({:.0},{:.0})",
                    output.sequence,
                    self.labels.name(detection.label),
                    detection.confidence,
                    xmin,
                    ymin,
                    xmax,
                    ymax
                );
            }
        }

        if self.show_overlay {
            info!("#{} [{} boxes] {}", output.sequence, drawn, output.overlay);
        } else {
            debug!("#{} [{} boxes] {}", output.sequence, drawn, output.overlay);
        }

        Ok(self.next_key().map(UserEvent::from_key))
    }

    fn handle_key(&mut self, key: char) {
        if key == 'o' || key == 'O' {
            self.show_overlay = !self.show_overlay;
        }
    }
}

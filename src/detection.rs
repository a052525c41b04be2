use std::io::ErrorKind;
use std::path::Path;
use tracing::{info, warn};

use crate::error::{AppError, BackendError};

/// Floats per detection row: image id, label, confidence and two corners.
pub const OBJECT_SIZE: usize = 7;

#[derive(Debug, Clone, PartialEq)]
pub struct TensorInfo {
    pub name: String,
    pub dims: Vec<usize>,
}

impl TensorInfo {
    pub fn new(name: &str, dims: &[usize]) -> Self {
        Self {
            name: name.to_string(),
            dims: dims.to_vec(),
        }
    }
}

/// Input and output tensors of a loaded detection model.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelShape {
    pub inputs: Vec<TensorInfo>,
    pub outputs: Vec<TensorInfo>,
    pub num_classes: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputLayout {
    pub max_proposals: usize,
    pub object_size: usize,
}

impl OutputLayout {
    pub fn buffer_len(&self) -> usize {
        self.max_proposals * self.object_size
    }
}

impl ModelShape {
    /// An SSD-style model: one NCHW image input and a `[1, 1, N, 7]` output.
    pub fn ssd(height: usize, width: usize, max_proposals: usize, num_classes: usize) -> Self {
        Self {
            inputs: vec![TensorInfo::new("data", &[1, 3, height, width])],
            outputs: vec![TensorInfo::new(
                "detection_out",
                &[1, 1, max_proposals, OBJECT_SIZE],
            )],
            num_classes: Some(num_classes),
        }
    }

    pub fn validate(&self) -> Result<OutputLayout, AppError> {
        let mut image_inputs = 0;
        for input in &self.inputs {
            match input.dims.len() {
                4 => image_inputs += 1,
                2 => {}
                rank => {
                    return Err(AppError::ModelShape(format!(
                        "Unsupported {}D input layer '{}'. Only 2D and 4D input layers are supported",
                        rank, input.name
                    )));
                }
            }
        }
        if image_inputs == 0 {
            return Err(AppError::ModelShape(
                "model has no 4D image input".to_string(),
            ));
        }

        let [output] = self.outputs.as_slice() else {
            return Err(AppError::ModelShape(format!(
                "expected exactly one output, model has {}",
                self.outputs.len()
            )));
        };
        if output.dims.len() != 4 {
            return Err(AppError::ModelShape(format!(
                "output '{}' has rank {}, detection output must be 4D",
                output.name,
                output.dims.len()
            )));
        }
        if output.dims[3] != OBJECT_SIZE {
            return Err(AppError::ModelShape(format!(
                "output '{}' should have {} as a last dimension, got {}",
                output.name, OBJECT_SIZE, output.dims[3]
            )));
        }

        Ok(OutputLayout {
            max_proposals: output.dims[2],
            object_size: output.dims[3],
        })
    }
}

/// One decoded row, with corners normalised to `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Detection {
    pub label: usize,
    pub confidence: f32,
    pub xmin: f32,
    pub ymin: f32,
    pub xmax: f32,
    pub ymax: f32,
}

impl Detection {
    fn from_row(row: &[f32]) -> Option<Self> {
        // a negative image id terminates the list
        if row[0] < 0.0 {
            return None;
        }
        Some(Self {
            label: row[1].max(0.0) as usize,
            confidence: row[2],
            xmin: row[3],
            ymin: row[4],
            xmax: row[5],
            ymax: row[6],
        })
    }

    /// Corners in pixels for a frame of the given size.
    pub fn scaled(&self, width: u32, height: u32) -> (f32, f32, f32, f32) {
        let (w, h) = (width as f32, height as f32);
        (self.xmin * w, self.ymin * h, self.xmax * w, self.ymax * h)
    }
}

/// Raw output of one inference, checked against the model's layout.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionBuffer {
    raw: Vec<f32>,
    layout: OutputLayout,
}

impl DetectionBuffer {
    pub fn new(raw: Vec<f32>, layout: OutputLayout) -> Result<Self, BackendError> {
        if raw.len() != layout.buffer_len() {
            return Err(BackendError::MalformedOutput {
                expected: layout.buffer_len(),
                actual: raw.len(),
            });
        }
        Ok(Self { raw, layout })
    }

    pub fn raw(&self) -> &[f32] {
        &self.raw
    }

    pub fn layout(&self) -> OutputLayout {
        self.layout
    }

    pub fn detections(&self) -> impl Iterator<Item = Detection> + '_ {
        self.raw
            .chunks_exact(self.layout.object_size)
            .map_while(Detection::from_row)
    }
}

/// Class names read from the `.labels` file next to the model.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LabelMap {
    labels: Vec<String>,
}

impl LabelMap {
    pub fn new(labels: Vec<String>, num_classes: Option<usize>) -> Self {
        let mut labels = labels;
        if let Some(classes) = num_classes {
            if labels.len() != classes {
                if labels.len() + 1 == classes {
                    // the model counts a background class the file leaves out
                    labels.insert(0, "fake".to_string());
                } else {
                    labels.clear();
                }
            }
        }
        Self { labels }
    }

    pub fn load(model: &Path, num_classes: Option<usize>) -> Result<Self, AppError> {
        let path = model.with_extension("labels");
        let labels = match std::fs::read_to_string(&path) {
            Ok(contents) => contents.split_whitespace().map(str::to_string).collect(),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                info!("No label file at {}", path.display());
                Vec::new()
            }
            Err(e) => {
                warn!("Failed to read labels from {}: {}", path.display(), e);
                Vec::new()
            }
        };
        Ok(Self::new(labels, num_classes))
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn name(&self, label: usize) -> String {
        self.labels
            .get(label)
            .cloned()
            .unwrap_or_else(|| format!("label #{}", label))
    }
}

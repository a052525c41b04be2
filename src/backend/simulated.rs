use rand::Rng;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, info};

use super::{InferenceBackend, Submission};
use crate::config::{ExecutionProfile, ProfileKind};
use crate::detection::{ModelShape, OutputLayout};
use crate::error::BackendError;
use crate::pool::PoolTag;

const THROUGHPUT_LATENCY: Duration = Duration::from_millis(45);
const LATENCY_LATENCY: Duration = Duration::from_millis(12);
const MAX_OBJECTS: usize = 3;

#[derive(Debug, Default, Clone, Copy)]
struct PoolCounters {
    submissions: u64,
    busy_time: Duration,
}

/// Stand-in engine that answers every submission from its own thread after a
/// profile-dependent delay, with a few random SSD-style boxes.
pub struct SimulatedBackend {
    shape: ModelShape,
    layout: Option<OutputLayout>,
    latencies: HashMap<PoolTag, Duration>,
    counters: Arc<Mutex<HashMap<PoolTag, PoolCounters>>>,
}

impl SimulatedBackend {
    pub fn new(shape: ModelShape) -> Self {
        let layout = shape.validate().ok();
        Self {
            shape,
            layout,
            latencies: HashMap::new(),
            counters: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn latency(&self, pool: PoolTag) -> Option<Duration> {
        self.latencies.get(&pool).copied()
    }
}

impl Default for SimulatedBackend {
    fn default() -> Self {
        Self::new(ModelShape::ssd(300, 300, 100, 21))
    }
}

impl InferenceBackend for SimulatedBackend {
    fn model_shape(&self) -> ModelShape {
        self.shape.clone()
    }

    fn configure(&mut self, pool: PoolTag, profile: &ExecutionProfile) -> Result<(), BackendError> {
        let latency = match profile.kind {
            ProfileKind::Throughput => THROUGHPUT_LATENCY,
            ProfileKind::Latency => LATENCY_LATENCY,
        };
        info!(
            "Configured {} pool on {} with {:?} ({:?} per request)",
            pool, profile.device, profile.options, latency
        );
        self.latencies.insert(pool, latency);
        Ok(())
    }

    fn submit(&self, submission: Submission) {
        let pool = submission.worker.pool();
        let latency = self.latency(pool).unwrap_or(THROUGHPUT_LATENCY);
        let layout = self.layout;
        let num_classes = self.shape.num_classes.unwrap_or(2).max(2);
        let counters = Arc::clone(&self.counters);

        std::thread::spawn(move || {
            let started = Instant::now();
            let mut rng = rand::rng();
            let jitter_ms = rng.random_range(0..=latency.as_millis() as u64 / 4);
            std::thread::sleep(latency + Duration::from_millis(jitter_ms));

            let outcome = match layout {
                Some(layout) => Ok(synthesize(&mut rng, layout, num_classes)),
                None => Err(BackendError::Inference(
                    "model output cannot be simulated".to_string(),
                )),
            };

            {
                let mut counters = counters.lock().unwrap_or_else(PoisonError::into_inner);
                let entry = counters.entry(pool).or_default();
                entry.submissions += 1;
                entry.busy_time += started.elapsed();
            }
            debug!(
                "Simulated inference #{} on {} finished",
                submission.completion.sequence(),
                submission.worker
            );
            submission.completion.complete(outcome);
        });
    }

    fn performance_report(&self, pool: PoolTag) -> Option<String> {
        let counters = self.counters.lock().unwrap_or_else(PoisonError::into_inner);
        let entry = counters.get(&pool)?;
        let mean_ms = entry.busy_time.as_secs_f64() * 1e3 / entry.submissions.max(1) as f64;
        Some(format!(
            "{} pool: {} requests, {:.2} ms mean device time",
            pool, entry.submissions, mean_ms
        ))
    }
}

/// A detection buffer with up to `MAX_OBJECTS` rows, terminated by a row
/// whose image id is -1 when it is not full.
fn synthesize(rng: &mut impl Rng, layout: OutputLayout, num_classes: usize) -> Vec<f32> {
    let mut raw = vec![0.0; layout.buffer_len()];
    let objects = rng.random_range(0..=MAX_OBJECTS.min(layout.max_proposals));
    for (index, row) in raw.chunks_exact_mut(layout.object_size).enumerate() {
        if index == objects {
            row[0] = -1.0;
            break;
        }
        let (x0, x1) = ordered(rng.random::<f32>(), rng.random::<f32>());
        let (y0, y1) = ordered(rng.random::<f32>(), rng.random::<f32>());
        row[0] = 0.0;
        row[1] = rng.random_range(1..num_classes) as f32;
        row[2] = rng.random::<f32>();
        row[3] = x0;
        row[4] = y0;
        row[5] = x1;
        row[6] = y1;
    }
    raw
}

fn ordered(a: f32, b: f32) -> (f32, f32) {
    if a <= b { (a, b) } else { (b, a) }
}

#![allow(dead_code)]

use image::DynamicImage;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use async_detect::backend::{Completion, InferenceBackend, Submission};
use async_detect::common::{Frame, SequenceId};
use async_detect::config::{ExecutionProfile, ProfileKind, Settings};
use async_detect::detection::{ModelShape, OBJECT_SIZE};
use async_detect::error::{AppError, BackendError};
use async_detect::pool::PoolTag;
use async_detect::render::{FrameOutput, Renderer, UserEvent};
use async_detect::source::{FrameSource, SourceRead};

pub const MAX_PROPOSALS: usize = 4;
pub const WAIT: Duration = Duration::from_secs(5);

pub fn settings(primary: usize, secondary: usize) -> Settings {
    Settings {
        input: "scripted".to_string(),
        model: "scripted.xml".to_string(),
        primary_workers: primary,
        secondary_workers: secondary,
        headless: true,
        ..Settings::default()
    }
}

pub fn shape() -> ModelShape {
    ModelShape::ssd(8, 8, MAX_PROPOSALS, 3)
}

/// A buffer with one box of class 1 and the terminator row after it.
pub fn one_box() -> Vec<f32> {
    let mut raw = vec![0.0; MAX_PROPOSALS * OBJECT_SIZE];
    raw[..OBJECT_SIZE].copy_from_slice(&[0.0, 1.0, 0.75, 0.25, 0.25, 0.5, 0.5]);
    raw[OBJECT_SIZE] = -1.0;
    raw
}

/// Completions parked by [`ScriptedBackend`] until a test releases them.
#[derive(Clone, Default)]
pub struct Gate {
    inner: Arc<(Mutex<HashMap<u64, Completion>>, Condvar)>,
}

impl Gate {
    fn park(&self, completion: Completion) {
        let (parked, ready) = &*self.inner;
        parked
            .lock()
            .unwrap()
            .insert(completion.sequence().value(), completion);
        ready.notify_all();
    }

    /// Waits until `sequence` has been submitted and takes its completion.
    pub fn take(&self, sequence: u64) -> Completion {
        let (parked, ready) = &*self.inner;
        let deadline = Instant::now() + WAIT;
        let mut guard = parked.lock().unwrap();
        loop {
            if let Some(completion) = guard.remove(&sequence) {
                return completion;
            }
            let left = deadline
                .checked_duration_since(Instant::now())
                .unwrap_or_else(|| panic!("#{} was never submitted", sequence));
            guard = ready.wait_timeout(guard, left).unwrap().0;
        }
    }

    pub fn release(&self, sequence: u64, outcome: Result<Vec<f32>, BackendError>) {
        self.take(sequence).complete(outcome);
    }

    pub fn parked(&self) -> Vec<u64> {
        let mut parked: Vec<u64> = self.inner.0.lock().unwrap().keys().copied().collect();
        parked.sort_unstable();
        parked
    }
}

/// Holds every submission until the test completes it through the gate.
pub struct ScriptedBackend {
    pub shape: ModelShape,
    pub gate: Gate,
    pub configured: Arc<Mutex<Vec<(PoolTag, ProfileKind)>>>,
}

impl ScriptedBackend {
    pub fn new(gate: Gate) -> Self {
        Self {
            shape: shape(),
            gate,
            configured: Arc::default(),
        }
    }
}

impl InferenceBackend for ScriptedBackend {
    fn model_shape(&self) -> ModelShape {
        self.shape.clone()
    }

    fn configure(&mut self, pool: PoolTag, profile: &ExecutionProfile) -> Result<(), BackendError> {
        self.configured.lock().unwrap().push((pool, profile.kind));
        Ok(())
    }

    fn submit(&self, submission: Submission) {
        self.gate.park(submission.completion);
    }
}

/// Completes every submission before `submit` returns and logs which pool
/// ran it.
#[derive(Clone, Default)]
pub struct ImmediateBackend {
    pub submissions: Arc<Mutex<Vec<(u64, PoolTag)>>>,
}

impl InferenceBackend for ImmediateBackend {
    fn model_shape(&self) -> ModelShape {
        shape()
    }

    fn configure(&mut self, _pool: PoolTag, _profile: &ExecutionProfile) -> Result<(), BackendError> {
        Ok(())
    }

    fn submit(&self, submission: Submission) {
        self.submissions
            .lock()
            .unwrap()
            .push((submission.completion.sequence().value(), submission.worker.pool()));
        submission.completion.complete(Ok(one_box()));
    }
}

/// `count` small frames per pass. Counts successful opens.
#[derive(Clone)]
pub struct VecSource {
    count: usize,
    cursor: usize,
    openable: bool,
    pub opens: Arc<AtomicUsize>,
}

impl VecSource {
    pub fn new(count: usize) -> Self {
        Self {
            count,
            cursor: 0,
            openable: true,
            opens: Arc::default(),
        }
    }

    pub fn unopenable() -> Self {
        Self {
            openable: false,
            ..Self::new(0)
        }
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

impl FrameSource for VecSource {
    fn open(&mut self, _input: &str) -> bool {
        if self.openable {
            self.cursor = 0;
            self.opens.fetch_add(1, Ordering::SeqCst);
        }
        self.openable
    }

    fn read(&mut self) -> Result<SourceRead, AppError> {
        if self.cursor == self.count {
            return Ok(SourceRead::Empty);
        }
        self.cursor += 1;
        Ok(SourceRead::Frame(Frame::captured_now(DynamicImage::new_rgb8(4, 4))))
    }
}

/// Records the sequence of every rendered frame and answers with scripted
/// events.
#[derive(Clone, Default)]
pub struct RecordingRenderer {
    pub seen: Arc<Mutex<Vec<u64>>>,
    pub boxes: Arc<Mutex<Vec<usize>>>,
    script: Arc<Mutex<VecDeque<(u64, UserEvent)>>>,
}

impl RecordingRenderer {
    pub fn on(self, sequence: u64, event: UserEvent) -> Self {
        self.script.lock().unwrap().push_back((sequence, event));
        self
    }

    pub fn seen(&self) -> Vec<u64> {
        self.seen.lock().unwrap().clone()
    }

    /// Blocks the calling thread until `sequence` has been rendered.
    pub fn wait_seen(&self, sequence: u64) {
        let deadline = Instant::now() + WAIT;
        while !self.seen().contains(&sequence) {
            assert!(Instant::now() < deadline, "#{} was never rendered", sequence);
            std::thread::sleep(Duration::from_millis(2));
        }
    }
}

impl Renderer for RecordingRenderer {
    fn render(&mut self, output: FrameOutput<'_>) -> Result<Option<UserEvent>, AppError> {
        let sequence = output.sequence.value();
        self.seen.lock().unwrap().push(sequence);
        self.boxes
            .lock()
            .unwrap()
            .push(output.detections.detections().count());

        let mut script = self.script.lock().unwrap();
        match script.front() {
            Some(&(at, event)) if at == sequence => {
                script.pop_front();
                Ok(Some(event))
            }
            _ => Ok(None),
        }
    }
}

pub fn seq(value: u64) -> SequenceId {
    SequenceId::new(value)
}

//! The control loop that feeds frames to the active worker pool, collects
//! completions in any order and hands results to the renderer in dispatch
//! order.

pub mod fault;
pub mod resequencer;

pub use fault::{fault_slot, FaultSlot, FaultWatch};
pub use resequencer::{PendingResult, Resequencer};

use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backend::{Completion, CompletionEvent, InferenceBackend, Submission, Ticket};
use crate::common::SequenceId;
use crate::config::Settings;
use crate::detection::OutputLayout;
use crate::error::AppError;
use crate::metrics::{MetricsBook, ModeReport, OverlayMetrics, WallclockMeter};
use crate::pool::{PoolSet, PoolTag, WorkerPool};
use crate::render::{FrameOutput, Renderer, UserEvent};
use crate::source::{FrameSource, InputFeed};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Input exhausted and every result rendered.
    Finished,
    Quit,
    Cancelled,
    Faulted,
}

#[derive(Debug, Clone)]
pub struct RunSummary {
    pub stop: StopReason,
    pub dispatched: u64,
    pub rendered: u64,
    pub final_mode: PoolTag,
    pub reports: Vec<ModeReport>,
    pub total_time: Duration,
}

enum LoopExit {
    Stopped(StopReason),
    Faulted(AppError),
}

pub struct Scheduler {
    backend: Box<dyn InferenceBackend>,
    renderer: Box<dyn Renderer>,
    input: InputFeed,
    pools: PoolSet,
    layout: OutputLayout,
    pending: Resequencer,
    next_sequence: SequenceId,
    metrics: MetricsBook,
    wallclock: WallclockMeter,
    events_tx: mpsc::UnboundedSender<CompletionEvent>,
    events_rx: mpsc::UnboundedReceiver<CompletionEvent>,
    faults: FaultSlot,
    fault_watch: FaultWatch,
    cancel_token: CancellationToken,
    perf_counters: bool,
    capture_time: Duration,
    render_time: Duration,
    rendered: u64,
    started_at: Instant,
}

impl Scheduler {
    pub fn builder(settings: Settings) -> SchedulerBuilder {
        SchedulerBuilder::new(settings)
    }

    pub fn pools(&self) -> &PoolSet {
        &self.pools
    }

    pub fn metrics(&self) -> &MetricsBook {
        &self.metrics
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn next_sequence(&self) -> SequenceId {
        self.next_sequence
    }

    /// Runs until the input is exhausted and drained, the user quits, the
    /// token is cancelled, or a completion faults. A fault still shuts down
    /// cleanly before it is returned.
    pub async fn run(mut self) -> Result<RunSummary, AppError> {
        info!("Start inference");
        let (stop, fault) = match self.control_loop().await? {
            LoopExit::Stopped(stop) => (stop, None),
            LoopExit::Faulted(fault) => (StopReason::Faulted, Some(fault)),
        };
        let summary = self.shutdown(stop).await;

        // completions drained during shutdown can still fault
        match fault.or_else(|| self.fault_watch.try_take()) {
            Some(fault) => Err(fault),
            None => Ok(summary),
        }
    }

    async fn control_loop(&mut self) -> Result<LoopExit, AppError> {
        loop {
            if let Some(fault) = self.fault_watch.try_take() {
                return Ok(LoopExit::Faulted(fault));
            }
            if self.cancel_token.is_cancelled() {
                return Ok(LoopExit::Stopped(StopReason::Cancelled));
            }
            while let Ok(event) = self.events_rx.try_recv() {
                self.accept(event);
            }

            if let Some(result) = self.pending.pop_ready() {
                match self.consume(result)? {
                    Some(UserEvent::Quit) => return Ok(LoopExit::Stopped(StopReason::Quit)),
                    Some(UserEvent::ToggleMode) => self.switch_mode().await,
                    Some(UserEvent::Other(key)) => self.renderer.handle_key(key),
                    None => {}
                }
                continue;
            }

            if self.input.is_open() && self.pools.idle_len() > 0 {
                self.dispatch_next()?;
                continue;
            }

            if !self.input.is_open() && self.pools.in_flight() == 0 {
                if let Some(fault) = self.fault_watch.try_take() {
                    return Ok(LoopExit::Faulted(fault));
                }
                if !self.pending.is_empty() {
                    warn!(
                        "{} results left behind waiting for #{}",
                        self.pending.len(),
                        self.pending.next_expected()
                    );
                }
                return Ok(LoopExit::Stopped(StopReason::Finished));
            }

            tokio::select! {
                biased;
                Some(fault) = self.fault_watch.raised() => return Ok(LoopExit::Faulted(fault)),
                _ = self.cancel_token.cancelled() => return Ok(LoopExit::Stopped(StopReason::Cancelled)),
                Some(event) = self.events_rx.recv() => self.accept(event),
            }
        }
    }

    /// Pairs the next frame with an idle worker of the active pool and
    /// submits it. Returns whether a frame went out.
    pub fn dispatch_next(&mut self) -> Result<bool, AppError> {
        if !self.input.is_open() || self.pools.idle_len() == 0 {
            return Ok(false);
        }
        let started = Instant::now();
        let Some(frame) = self.input.next_frame()? else {
            return Ok(false);
        };
        let Some(worker) = self.pools.acquire_idle() else {
            return Ok(false);
        };
        self.capture_time = started.elapsed();

        let sequence = self.next_sequence;
        self.next_sequence = sequence.next();
        let ticket = Ticket {
            sequence,
            worker,
            origin: self.pools.active(),
            frame: frame.clone(),
            dispatched_at: started,
        };
        let completion = Completion::new(
            ticket,
            self.layout,
            self.events_tx.clone(),
            self.faults.clone(),
        );

        debug!(
            "Dispatching #{} to {} ({} idle left)",
            sequence,
            worker,
            self.pools.idle_len()
        );
        self.backend.submit(Submission {
            worker,
            frame,
            completion,
        });
        debug_assert!(self.pools.is_balanced());
        Ok(true)
    }

    // Control-loop half of the completion sink.
    fn accept(&mut self, event: CompletionEvent) {
        self.wallclock.tick(event.completed_at);
        let CompletionEvent {
            ticket,
            detections,
            ..
        } = event;
        let sequence = ticket.sequence;

        if !self.pools.release(ticket.worker) {
            debug!("{} finished outside the active pool, not requeued", ticket.worker);
        }
        let Some(detections) = detections else {
            return;
        };
        let stored = self.pending.insert(PendingResult {
            sequence,
            frame: ticket.frame,
            detections,
            origin: ticket.origin,
            dispatched_at: ticket.dispatched_at,
        });
        if !stored {
            warn!("Discarding second result for #{}", sequence);
        }
    }

    fn consume(&mut self, result: PendingResult) -> Result<Option<UserEvent>, AppError> {
        let now = Instant::now();
        let active = self.pools.active();
        if result.origin == active {
            self.metrics
                .mode_mut(active)
                .record(now.saturating_duration_since(result.dispatched_at));
        }

        let mode = self.metrics.mode(active);
        let overlay = OverlayMetrics {
            mode: active,
            wallclock: self.wallclock.interval(),
            fps: mode.fps(now),
            latency_ms: mode.mean_latency_ms().unwrap_or(0.0),
            host_time: self.capture_time + self.render_time,
        };

        let render_started = Instant::now();
        let event = self.renderer.render(FrameOutput {
            sequence: result.sequence,
            frame: &result.frame,
            detections: &result.detections,
            overlay: &overlay,
        })?;
        self.render_time = render_started.elapsed();
        self.rendered += 1;
        Ok(event)
    }

    /// Waits for the active pool to go quiet, then makes the other pool
    /// active with a fresh metrics window.
    pub async fn switch_mode(&mut self) {
        let previous = self.pools.active();
        let next = previous.other();
        info!(
            "Switching to {} mode, waiting for {} in-flight requests",
            next.mode_name(),
            self.pools.busy(previous)
        );
        self.drain(previous).await;

        let now = Instant::now();
        self.metrics.mode_mut(previous).finish(now);
        self.pools.activate(next);
        self.metrics.reset(next, now);
        debug_assert!(self.pools.is_balanced());
        info!(
            "{} mode active with {} workers",
            next.mode_name(),
            self.pools.idle_len()
        );
    }

    /// Blocks until every busy worker of `pool` has delivered its completion.
    async fn drain(&mut self, pool: PoolTag) {
        while self.pools.busy(pool) > 0 {
            let Some(event) = self.events_rx.recv().await else {
                break;
            };
            self.accept(event);
        }
    }

    async fn shutdown(&mut self, stop: StopReason) -> RunSummary {
        let total_time = self.started_at.elapsed();
        info!(
            "Total inference time: {:.2} ms",
            total_time.as_secs_f64() * 1e3
        );

        // Only the active pool is awaited.
        let active = self.pools.active();
        self.drain(active).await;

        if self.perf_counters {
            if let Some(report) = self.backend.performance_report(active) {
                info!("Performance counts: {}", report);
            }
        }

        let reports = self.metrics.reports(Instant::now());
        for report in &reports {
            info!("{}", report);
        }

        RunSummary {
            stop,
            dispatched: self.next_sequence.value(),
            rendered: self.rendered,
            final_mode: active,
            reports,
            total_time,
        }
    }
}

pub struct SchedulerBuilder {
    settings: Settings,
    backend: Option<Box<dyn InferenceBackend>>,
    source: Option<Box<dyn FrameSource>>,
    renderer: Option<Box<dyn Renderer>>,
    cancel_token: Option<CancellationToken>,
}

impl SchedulerBuilder {
    pub fn new(settings: Settings) -> Self {
        Self {
            settings,
            backend: None,
            source: None,
            renderer: None,
            cancel_token: None,
        }
    }

    // Sets the input identifier, this will override the settings.
    pub fn input(mut self, input: impl Into<String>) -> Self {
        self.settings.input = input.into();
        self
    }

    // Adjusts the primary pool size, this will override the settings.
    pub fn primary_workers(mut self, workers: usize) -> Self {
        self.settings.primary_workers = workers;
        self
    }

    // Adjusts the secondary pool size, this will override the settings.
    pub fn secondary_workers(mut self, workers: usize) -> Self {
        self.settings.secondary_workers = workers;
        self
    }

    // Replays the input when it runs out, this will override the settings.
    pub fn loop_input(mut self, loop_input: bool) -> Self {
        self.settings.loop_input = loop_input;
        self
    }

    pub fn backend(mut self, backend: impl InferenceBackend + 'static) -> Self {
        self.backend = Some(Box::new(backend));
        self
    }

    pub fn source(mut self, source: impl FrameSource + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    pub fn renderer(mut self, renderer: impl Renderer + 'static) -> Self {
        self.renderer = Some(Box::new(renderer));
        self
    }

    pub fn cancel_token(mut self, cancel_token: CancellationToken) -> Self {
        self.cancel_token = Some(cancel_token);
        self
    }

    pub fn build(self) -> Result<Scheduler, AppError> {
        let settings = self.settings;
        settings.validate()?;
        let mut backend = self
            .backend
            .ok_or_else(|| AppError::Configuration("inference backend not set".to_string()))?;
        let source = self
            .source
            .ok_or_else(|| AppError::Configuration("frame source not set".to_string()))?;
        let renderer = self
            .renderer
            .ok_or_else(|| AppError::Configuration("renderer not set".to_string()))?;

        let mut input = InputFeed::new(source, settings.input.clone(), settings.loop_input);
        input.open()?;

        info!("Checking that the model is as expected");
        let layout = backend.model_shape().validate()?;

        let (throughput, latency) = settings.execution_profiles()?;
        let pools = PoolSet::new(
            WorkerPool::new(PoolTag::Primary, settings.primary_workers, throughput),
            WorkerPool::new(PoolTag::Secondary, settings.secondary_workers, latency),
        );
        info!("Loading model to the device");
        for tag in [PoolTag::Primary, PoolTag::Secondary] {
            backend.configure(tag, pools.pool(tag).profile())?;
        }

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (faults, fault_watch) = fault_slot();
        let now = Instant::now();

        Ok(Scheduler {
            backend,
            renderer,
            input,
            pools,
            layout,
            pending: Resequencer::new(),
            next_sequence: SequenceId::ZERO,
            metrics: MetricsBook::new(now),
            wallclock: WallclockMeter::new(now),
            events_tx,
            events_rx,
            faults,
            fault_watch,
            cancel_token: self.cancel_token.unwrap_or_else(CancellationToken::new),
            perf_counters: settings.perf_counters,
            capture_time: Duration::ZERO,
            render_time: Duration::ZERO,
            rendered: 0,
            started_at: now,
        })
    }
}

//! # Media pipeline
//!
//! Turns the live video of the vehicle into movement commands. Two background
//! tasks run while the pipeline is started:
//!
//! - the **reader** pulls the newest frame from a [FrameSource] and pushes it into
//!   a bounded queue. It never waits for the processor: when the queue is full the
//!   new frame is dropped. A failed read is retried after one frame period, the
//!   reader gives up after [MediaConfig::max_capture_failures] consecutive misses.
//! - the **processor** counts the frames it takes from the queue and hands one
//!   frame out of [MediaConfig::frame_interval] to the perception callback. The
//!   resulting [MovementVector] is scaled to the authority limit, sent to the
//!   vehicle and logged to the telemetry recorder.
//!
//! A perception failure only skips the frame it happened on. Terminal errors of
//! the tasks, a panic included, stop the pipeline. They are published on the
//! [fault channel](MediaPipeline::faults) and returned in the [PipelineReport] of
//! [MediaPipeline::stop()].

use std::path::PathBuf;
use std::sync::atomic::Ordering::Relaxed;
use std::sync::atomic::{AtomicBool, AtomicU64};
use std::sync::Arc;

use futures::lock::Mutex;
use log::{debug, error, info, warn};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};

use crate::config::{MediaConfig, MovementOutput};
use crate::mission::{ModelHandle, PerceptionCallback, TelemetryRecord, TelemetryRecorder};
use crate::state::{MovementVector, StickCommand};
use crate::subsystems::capture::{Frame, FrameSource};
use crate::subsystems::link::VehicleLink;
use crate::subsystems::piloting::Piloting;
use crate::{Error, Result};

/// Perception callback and what it is called with
#[derive(Clone)]
pub struct Perception {
    /// Called with one frame out of [MediaConfig::frame_interval]
    pub callback: Arc<dyn PerceptionCallback>,
    /// Opaque model handed to every call
    pub model: ModelHandle,
    /// Directory given to the callback for its own outputs
    pub output_dir: PathBuf,
}

/// Counters of a pipeline run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PipelineStats {
    /// Frames obtained from the source
    pub frames_read: u64,
    /// Frames dropped because the queue was full
    pub frames_dropped: u64,
    /// Frames taken from the queue by the processor
    pub frames_processed: u64,
    /// Frames given to the perception callback
    pub perception_calls: u64,
    /// Skipped frames, the callback failed or returned a non-finite vector
    pub perception_failures: u64,
    /// Movement commands accepted by the vehicle
    pub commands_sent: u64,
}

#[derive(Default)]
struct Counters {
    frames_read: AtomicU64,
    frames_dropped: AtomicU64,
    frames_processed: AtomicU64,
    perception_calls: AtomicU64,
    perception_failures: AtomicU64,
    commands_sent: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> PipelineStats {
        PipelineStats {
            frames_read: self.frames_read.load(Relaxed),
            frames_dropped: self.frames_dropped.load(Relaxed),
            frames_processed: self.frames_processed.load(Relaxed),
            perception_calls: self.perception_calls.load(Relaxed),
            perception_failures: self.perception_failures.load(Relaxed),
            commands_sent: self.commands_sent.load(Relaxed),
        }
    }
}

/// Outcome of a pipeline run
#[derive(Debug)]
pub struct PipelineReport {
    /// Final counters
    pub stats: PipelineStats,
    /// Error that ended the run before it was stopped, if any
    pub error: Option<Error>,
}

struct RunningTasks {
    reader: JoinHandle<Result<(Box<dyn FrameSource>, Option<Error>)>>,
    processor: JoinHandle<Result<()>>,
}

// A task that died takes the whole pipeline down with it
async fn supervise<T>(
    name: &'static str,
    task: JoinHandle<T>,
    running: Arc<AtomicBool>,
    faults: flume::Sender<Error>,
) -> Result<T> {
    task.await.map_err(|e| {
        let reason = format!("frame {} died: {}", name, e);
        error!("{}", reason);
        running.store(false, Relaxed);
        let _ = faults.send(Error::SystemError(reason.clone()));
        Error::SystemError(reason)
    })
}

/// # Video to movement pipeline
///
/// See the [media module documentation](crate::subsystems::media) for more
/// context and information.
pub struct MediaPipeline {
    link: VehicleLink,
    piloting: Arc<Piloting>,
    config: MediaConfig,
    running: Arc<AtomicBool>,
    counters: Arc<Counters>,
    tasks: Mutex<Option<RunningTasks>>,
    fault_tx: flume::Sender<Error>,
    fault_rx: flume::Receiver<Error>,
}

impl MediaPipeline {
    /// Build a stopped pipeline, fails if `config` is invalid
    pub fn new(link: VehicleLink, piloting: Arc<Piloting>, config: MediaConfig) -> Result<Self> {
        config.validate()?;
        let (fault_tx, fault_rx) = flume::unbounded();

        Ok(Self {
            link,
            piloting,
            config,
            running: Arc::new(AtomicBool::new(false)),
            counters: Arc::new(Counters::default()),
            tasks: Mutex::new(None),
            fault_tx,
            fault_rx,
        })
    }

    /// Settings the pipeline was built with
    pub fn config(&self) -> &MediaConfig {
        &self.config
    }

    /// True between [MediaPipeline::start()] and the end of the run
    pub fn is_running(&self) -> bool {
        self.running.load(Relaxed)
    }

    /// Counters of the current or last run
    pub fn stats(&self) -> PipelineStats {
        self.counters.snapshot()
    }

    /// Terminal errors of the background tasks
    pub fn faults(&self) -> flume::Receiver<Error> {
        self.fault_rx.clone()
    }

    /// Start reading `source` and processing its frames
    ///
    /// Records are appended to `recorder` for every frame given to the perception
    /// callback. Fails if the pipeline is already started.
    pub async fn start(
        &self,
        source: Box<dyn FrameSource>,
        perception: Perception,
        recorder: Option<Arc<dyn TelemetryRecorder>>,
    ) -> Result<()> {
        let mut tasks = self.tasks.lock().await;
        if tasks.is_some() {
            return Err(Error::InvalidArgument("media pipeline already started".to_owned()));
        }

        let (tx, rx) = flume::bounded(self.config.queue_capacity);
        self.running.store(true, Relaxed);

        let reader = Reader {
            config: self.config.clone(),
            running: self.running.clone(),
            counters: self.counters.clone(),
            faults: self.fault_tx.clone(),
        };
        let reader = tokio::spawn(supervise(
            "reader",
            tokio::spawn(reader.run(source, tx)),
            self.running.clone(),
            self.fault_tx.clone(),
        ));

        let processor = Processor {
            link: self.link.clone(),
            piloting: self.piloting.clone(),
            config: self.config.clone(),
            running: self.running.clone(),
            counters: self.counters.clone(),
            perception,
            recorder,
        };
        let processor = tokio::spawn(supervise(
            "processor",
            tokio::spawn(processor.run(rx)),
            self.running.clone(),
            self.fault_tx.clone(),
        ));

        info!(
            "Media pipeline started, one frame out of {} processed, {:?} output",
            self.config.frame_interval, self.config.output
        );
        *tasks = Some(RunningTasks { reader, processor });
        Ok(())
    }

    /// Stop the pipeline
    ///
    /// Both tasks are waited for, the frame source is stopped last. The report
    /// carries the first terminal error of the run, the reader's first. Stopping a
    /// pipeline that is not started returns the counters of the last run.
    pub async fn stop(&self) -> Result<PipelineReport> {
        self.running.store(false, Relaxed);

        let tasks = match self.tasks.lock().await.take() {
            Some(tasks) => tasks,
            None => {
                return Ok(PipelineReport {
                    stats: self.stats(),
                    error: None,
                })
            }
        };

        let (reader, processor) = futures::join!(tasks.reader, tasks.processor);

        let mut error = match reader? {
            Ok((mut source, error)) => {
                if let Err(e) = source.stop().await {
                    warn!("Frame source did not stop cleanly: {}", e);
                }
                error
            }
            // The source went down with the reader
            Err(e) => Some(e),
        };
        if let Err(e) = processor? {
            error.get_or_insert(e);
        }

        let stats = self.stats();
        info!("Media pipeline stopped: {:?}", stats);
        Ok(PipelineReport { stats, error })
    }
}

struct Reader {
    config: MediaConfig,
    running: Arc<AtomicBool>,
    counters: Arc<Counters>,
    faults: flume::Sender<Error>,
}

impl Reader {
    async fn run(
        self,
        mut source: Box<dyn FrameSource>,
        tx: flume::Sender<Frame>,
    ) -> (Box<dyn FrameSource>, Option<Error>) {
        let mut failures = 0;

        while self.running.load(Relaxed) {
            match source.read_frame().await {
                Ok(frame) => {
                    failures = 0;
                    self.counters.frames_read.fetch_add(1, Relaxed);
                    match tx.try_send(frame) {
                        Ok(()) => (),
                        Err(flume::TrySendError::Full(_)) => {
                            self.counters.frames_dropped.fetch_add(1, Relaxed);
                        }
                        Err(flume::TrySendError::Disconnected(_)) => break,
                    }
                    // Sources that never suspend would starve the processor
                    tokio::task::yield_now().await;
                }
                Err(e) => {
                    failures += 1;
                    if failures >= self.config.max_capture_failures {
                        let reason = format!("{} consecutive capture failures, last: {}", failures, e);
                        error!("Frame reader giving up: {}", reason);
                        self.running.store(false, Relaxed);
                        let _ = self.faults.send(Error::CaptureError(reason.clone()));
                        return (source, Some(Error::CaptureError(reason)));
                    }
                    debug!("Capture miss {}: {}", failures, e);
                    sleep(self.config.frame_period()).await;
                }
            }
        }

        (source, None)
    }
}

struct Processor {
    link: VehicleLink,
    piloting: Arc<Piloting>,
    config: MediaConfig,
    running: Arc<AtomicBool>,
    counters: Arc<Counters>,
    perception: Perception,
    recorder: Option<Arc<dyn TelemetryRecorder>>,
}

impl Processor {
    async fn run(self, rx: flume::Receiver<Frame>) {
        let mut frame_index = 0u64;

        while self.running.load(Relaxed) {
            let frame = match timeout(self.config.poll_timeout(), rx.recv_async()).await {
                Ok(Ok(frame)) => frame,
                Err(_) => continue,
                Ok(Err(flume::RecvError::Disconnected)) => break,
            };

            frame_index += 1;
            self.counters.frames_processed.fetch_add(1, Relaxed);
            if frame_index % self.config.frame_interval != 0 {
                continue;
            }

            let movement = match self.perceive(frame, frame_index).await {
                Ok(movement) => movement,
                Err(e) => {
                    self.counters.perception_failures.fetch_add(1, Relaxed);
                    warn!("Skipping frame {}: {}", frame_index, e);
                    continue;
                }
            };
            debug!("Frame {}: {:?}", frame_index, movement);

            match self.apply(movement).await {
                Ok(()) => {
                    self.counters.commands_sent.fetch_add(1, Relaxed);
                }
                Err(e) => warn!("Movement of frame {} not sent: {}", frame_index, e),
            }

            self.record(movement, frame_index).await;
        }

        debug!("Frame processor done after {} frames", frame_index);
    }

    /// Run the callback off the async workers and scale its output
    async fn perceive(&self, frame: Frame, frame_index: u64) -> Result<MovementVector> {
        self.counters.perception_calls.fetch_add(1, Relaxed);

        let perception = self.perception.clone();
        let movement = tokio::task::spawn_blocking(move || {
            perception
                .callback
                .perceive(&frame, &perception.model, &perception.output_dir, frame_index)
        })
        .await
        .map_err(|e| Error::PerceptionError(format!("callback panicked: {}", e)))??;

        movement.saturated(self.link.max_authority())
    }

    async fn apply(&self, movement: MovementVector) -> Result<()> {
        match self.config.output {
            MovementOutput::Stick => {
                let command = StickCommand::new(0.0, movement.z, movement.x, movement.y);
                self.link.send_stick(command).await
            }
            MovementOutput::MoveBy => {
                // Newest perception wins over a move still in progress
                self.piloting.cancel_move_by().await;
                self.piloting
                    .move_by(movement.x, movement.y, movement.z, movement.angle, false, false)
                    .await
            }
        }
    }

    async fn record(&self, movement: MovementVector, frame_index: u64) {
        let recorder = match &self.recorder {
            Some(recorder) => recorder,
            None => return,
        };

        let state = match self.link.get_all_states().await {
            Ok(state) => state,
            Err(e) => {
                warn!("No telemetry record for frame {}: {}", frame_index, e);
                return;
            }
        };

        let record = TelemetryRecord::now(&state, movement, frame_index);
        if let Err(e) = recorder.append(&record) {
            warn!("Telemetry record of frame {} lost: {}", frame_index, e);
        }
    }
}

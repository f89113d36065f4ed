use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender, unbounded};
use render_protocol::{
    ConfigurationError, Notifier, RenderDispatchError, RenderEventSink, RenderStatus,
    RenderTileDescriptor, Renderer, SavedSettings, SequencerEvent, Severity, TilingMethod,
};
use tiles::{TileJob, plan_render_tiles};

mod apply;

use apply::apply_tile;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

const NOTIFICATION_TITLE: &str = "Super Resolution Render";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequencerConfig {
    pub poll_interval: Duration,
    /// 1-based index of the first tile to render.
    pub start_tile: u32,
}

impl Default for SequencerConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            start_tile: 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequencerState {
    Idle,
    Preparing,
    AwaitingTileCompletion,
    /// A stop was seen on a tick while a tile was still rendering.
    Cancelling,
    Restoring,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Finished { tiles_done: u32, tiles_total: u32 },
    Cancelled { tiles_done: u32, tiles_total: u32 },
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SequencerError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    #[error("no tiles left to render: start tile {start_tile} of {planned} planned tiles")]
    NoTiles { start_tile: u32, planned: usize },
    #[error("failed to render tile R{:02} C{:02}: {source}", .row + 1, .col + 1)]
    RenderDispatch {
        row: u32,
        col: u32,
        #[source]
        source: RenderDispatchError,
    },
    #[error("tile R{:02} C{:02} failed to render: {message}", .row + 1, .col + 1)]
    RenderFailed { row: u32, col: u32, message: String },
    #[error("a render job is already running")]
    AlreadyRunning,
    #[error("no render job is running")]
    NotRunning,
}

pub type JobResult = Result<JobOutcome, SequencerError>;

/// Renders a job one tile at a time.
///
/// The sequencer is driven by [`SequencerEvent`]s processed one at a time:
/// ticks dispatch the next tile, host completion signals advance the queue,
/// and stop requests end the job at the next tick. Whatever ends the job,
/// the camera and render configuration captured at `start` are restored
/// exactly once.
#[derive(Debug)]
pub struct RenderSequencer {
    config: SequencerConfig,
    state: SequencerState,
    queue: VecDeque<RenderTileDescriptor>,
    saved: Option<SavedSettings>,
    in_flight: bool,
    stop_requested: bool,
    status: RenderStatus,
    event_sender: Sender<SequencerEvent>,
    event_receiver: Receiver<SequencerEvent>,
    subscribers: Vec<Sender<RenderStatus>>,
}

impl RenderSequencer {
    pub fn new(config: SequencerConfig) -> Self {
        let (event_sender, event_receiver) = unbounded();
        Self {
            config,
            state: SequencerState::Idle,
            queue: VecDeque::new(),
            saved: None,
            in_flight: false,
            stop_requested: false,
            status: RenderStatus::default(),
            event_sender,
            event_receiver,
            subscribers: Vec::new(),
        }
    }

    pub fn config(&self) -> SequencerConfig {
        self.config
    }

    pub fn state(&self) -> SequencerState {
        self.state
    }

    pub fn status(&self) -> RenderStatus {
        self.status
    }

    pub fn is_running(&self) -> bool {
        self.state != SequencerState::Idle
    }

    /// Queue for UI-side events such as [`SequencerEvent::StopRequested`].
    pub fn event_sender(&self) -> Sender<SequencerEvent> {
        self.event_sender.clone()
    }

    /// Receives a status snapshot every time the status changes.
    pub fn subscribe(&mut self) -> Receiver<RenderStatus> {
        let (sender, receiver) = unbounded();
        self.subscribers.push(sender);
        receiver
    }

    /// Captures the scene settings, plans the job and arms the sequencer.
    ///
    /// Nothing in the scene or the status is touched when this fails.
    pub fn start<R: Renderer + ?Sized>(
        &mut self,
        host: &mut R,
        job: &TileJob,
    ) -> Result<(), SequencerError> {
        if self.state != SequencerState::Idle {
            return Err(SequencerError::AlreadyRunning);
        }
        self.state = SequencerState::Preparing;

        let (saved, tiles) = match self.prepare(&*host, job) {
            Ok(prepared) => prepared,
            Err(error) => {
                self.state = SequencerState::Idle;
                return Err(error);
            }
        };

        // Signals left over from an earlier job must not advance this one.
        let stale = self.event_receiver.try_iter().count();
        if stale > 0 {
            log::debug!("discarded {stale} stale sequencer events");
        }

        self.status = RenderStatus {
            is_rendering: true,
            should_stop: false,
            tiles_total: tiles.len() as u32,
            tiles_done: 0,
        };
        self.queue = tiles;
        self.saved = Some(saved);
        self.in_flight = false;
        self.stop_requested = false;

        host.register_observers(RenderEventSink::new(self.event_sender.clone()));
        self.state = SequencerState::AwaitingTileCompletion;
        self.publish_status();

        log::info!(
            "super resolution render started: {} tiles at {} using {}",
            self.status.tiles_total,
            job.resolution,
            job.method
        );
        Ok(())
    }

    fn prepare<R: Renderer + ?Sized>(
        &self,
        host: &R,
        job: &TileJob,
    ) -> Result<(SavedSettings, VecDeque<RenderTileDescriptor>), SequencerError> {
        if job.method == TilingMethod::CameraSplit {
            return Err(ConfigurationError::MethodNotRenderable { method: job.method }.into());
        }
        let saved = SavedSettings::capture(host)?;
        let mut tiles: VecDeque<_> = plan_render_tiles(job, &saved)?.into();

        let planned = tiles.len();
        let skip = (self.config.start_tile.saturating_sub(1) as usize).min(planned);
        tiles.drain(..skip);
        if tiles.is_empty() {
            return Err(SequencerError::NoTiles {
                start_tile: self.config.start_tile,
                planned,
            });
        }
        Ok((saved, tiles))
    }

    /// Processes one event. Returns the job result once the job has ended.
    pub fn handle_event<R, N>(
        &mut self,
        host: &mut R,
        notifier: &N,
        event: SequencerEvent,
    ) -> Option<JobResult>
    where
        R: Renderer + ?Sized,
        N: Notifier + ?Sized,
    {
        if self.state == SequencerState::Idle {
            log::debug!("ignoring {event:?}: no render job is running");
            return None;
        }

        match event {
            SequencerEvent::Tick => return self.on_tick(host, notifier),
            SequencerEvent::RenderStarted => {
                if !self.in_flight {
                    log::warn!("host started a render the sequencer did not dispatch");
                }
            }
            SequencerEvent::RenderFinished => self.on_render_finished(),
            SequencerEvent::RenderFailed { message } => {
                return self.on_render_failed(host, notifier, message);
            }
            SequencerEvent::RenderCancelled => {
                log::info!("host cancelled the current render");
                self.stop_requested = true;
                self.in_flight = false;
            }
            SequencerEvent::CancelRequested => {
                log::info!("render job cancel requested");
                self.stop_requested = true;
            }
            SequencerEvent::StopRequested => {
                log::info!("render job stop requested");
                self.status.should_stop = true;
                self.publish_status();
            }
        }
        None
    }

    /// Feeds queued events to [`Self::handle_event`] until the job ends,
    /// synthesizing a tick every poll interval.
    pub fn run<R, N>(&mut self, host: &mut R, notifier: &N) -> JobResult
    where
        R: Renderer + ?Sized,
        N: Notifier + ?Sized,
    {
        if self.state == SequencerState::Idle {
            return Err(SequencerError::NotRunning);
        }

        let mut next_tick = Instant::now() + self.config.poll_interval;
        loop {
            // The sequencer holds a sender itself, so the queue only ever times out.
            let event = match self.event_receiver.recv_deadline(next_tick) {
                Ok(event) => event,
                Err(_) => {
                    next_tick = Instant::now() + self.config.poll_interval;
                    SequencerEvent::Tick
                }
            };
            if let Some(result) = self.handle_event(host, notifier, event) {
                return result;
            }
        }
    }

    /// Starts `job` and blocks until it finishes, is cancelled or fails.
    pub fn render<R, N>(&mut self, host: &mut R, notifier: &N, job: &TileJob) -> JobResult
    where
        R: Renderer + ?Sized,
        N: Notifier + ?Sized,
    {
        if let Err(error) = self.start(host, job) {
            notifier.notify(&error.to_string(), NOTIFICATION_TITLE, Severity::Error);
            return Err(error);
        }
        self.run(host, notifier)
    }

    fn on_tick<R, N>(&mut self, host: &mut R, notifier: &N) -> Option<JobResult>
    where
        R: Renderer + ?Sized,
        N: Notifier + ?Sized,
    {
        let stopping = self.stop_requested || self.status.should_stop;
        if stopping || self.queue.is_empty() {
            if self.in_flight {
                if self.state != SequencerState::Cancelling {
                    log::info!("waiting for the tile in flight before stopping");
                    self.state = SequencerState::Cancelling;
                }
                return None;
            }
            return Some(self.restore(host, notifier, None));
        }

        if self.in_flight {
            return None;
        }

        let tile = self.queue.front()?;
        let (row, col) = (tile.row, tile.col);
        log::debug!(
            "dispatching tile R{:02} C{:02} ({}x{}) to {}",
            row + 1,
            col + 1,
            tile.tile_x,
            tile.tile_y,
            tile.output_path.display()
        );
        let dispatched = apply_tile(&mut *host, tile)
            .map_err(SequencerError::from)
            .and_then(|()| {
                host.render_active_view()
                    .map_err(|source| SequencerError::RenderDispatch { row, col, source })
            });
        match dispatched {
            Ok(()) => {
                self.in_flight = true;
                None
            }
            Err(error) => {
                log::error!("{error}");
                Some(self.restore(host, notifier, Some(error)))
            }
        }
    }

    fn on_render_finished(&mut self) {
        if !self.in_flight {
            log::warn!("ignoring render completion with no tile in flight");
            return;
        }
        self.in_flight = false;
        if let Some(tile) = self.queue.pop_front() {
            log::info!(
                "tile R{:02} C{:02} done ({}/{})",
                tile.row + 1,
                tile.col + 1,
                self.status.tiles_done + 1,
                self.status.tiles_total
            );
        }
        self.status.tiles_done = (self.status.tiles_done + 1).min(self.status.tiles_total);
        self.publish_status();
    }

    fn on_render_failed<R, N>(
        &mut self,
        host: &mut R,
        notifier: &N,
        message: String,
    ) -> Option<JobResult>
    where
        R: Renderer + ?Sized,
        N: Notifier + ?Sized,
    {
        if !self.in_flight {
            log::warn!("ignoring render failure with no tile in flight: {message}");
            return None;
        }
        self.in_flight = false;
        let (row, col) = self
            .queue
            .front()
            .map(|tile| (tile.row, tile.col))
            .unwrap_or_default();
        let error = SequencerError::RenderFailed { row, col, message };
        log::error!("{error}");
        Some(self.restore(host, notifier, Some(error)))
    }

    fn restore<R, N>(
        &mut self,
        host: &mut R,
        notifier: &N,
        failure: Option<SequencerError>,
    ) -> JobResult
    where
        R: Renderer + ?Sized,
        N: Notifier + ?Sized,
    {
        self.state = SequencerState::Restoring;
        host.unregister_observers();
        if let Some(saved) = self.saved.take() {
            saved.restore(host);
        }

        let cancelled = self.stop_requested || self.status.should_stop;
        let tiles_done = self.status.tiles_done;
        let tiles_total = self.status.tiles_total;

        self.queue.clear();
        self.in_flight = false;
        self.stop_requested = false;
        self.status = RenderStatus::default();
        self.publish_status();
        self.state = SequencerState::Idle;

        if let Some(error) = failure {
            notifier.notify(
                &format!("Render failed after {tiles_done} of {tiles_total} tiles: {error}"),
                NOTIFICATION_TITLE,
                Severity::Error,
            );
            return Err(error);
        }
        if cancelled {
            log::info!("super resolution render cancelled after {tiles_done}/{tiles_total} tiles");
            notifier.notify(
                &format!("Render cancelled after {tiles_done} of {tiles_total} tiles"),
                NOTIFICATION_TITLE,
                Severity::Warning,
            );
            return Ok(JobOutcome::Cancelled {
                tiles_done,
                tiles_total,
            });
        }
        log::info!("super resolution render finished: {tiles_done} tiles");
        notifier.notify(
            &format!("Rendered {tiles_done} tiles"),
            NOTIFICATION_TITLE,
            Severity::Info,
        );
        Ok(JobOutcome::Finished {
            tiles_done,
            tiles_total,
        })
    }

    fn publish_status(&mut self) {
        let status = self.status;
        self.subscribers
            .retain(|subscriber| subscriber.send(status).is_ok());
    }
}

impl Default for RenderSequencer {
    fn default() -> Self {
        Self::new(SequencerConfig::default())
    }
}

use std::future::pending;

use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
    time::{interval_at, Instant, Interval, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;

use crate::{
    chunker::{chunk, ChunkSet},
    timeline::{PlaybackSettings, PlaybackState, Scheduler, TickOutcome, TimerToken},
    FramecastError, Result,
};

/// Input changes accepted by a running [`Player`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlayerCommand {
    SetText(String),
    SetChunkSize(usize),
    SetFrameRate(u32),
    SetLoop(bool),
    SetEnabled(bool),
}

/// Immutable copy of what the renderer may show right now.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameSnapshot {
    pub state: PlaybackState,
    /// Clamped index into the envelope list.
    pub index: usize,
    pub total: usize,
    pub stream_id: Option<String>,
    /// JSON payload of the selected envelope, `None` when there is no stream.
    pub payload: Option<String>,
}

impl FrameSnapshot {
    pub fn empty() -> Self {
        Self {
            state: PlaybackState::Idle,
            index: 0,
            total: 0,
            stream_id: None,
            payload: None,
        }
    }

    /// One-line human readable status.
    pub fn status_line(&self) -> String {
        let Some(stream_id) = self.stream_id.as_deref().filter(|_| self.total > 0) else {
            return "nothing to stream".to_string();
        };
        let mut line = format!("frame {}/{} · stream {stream_id}", self.index + 1, self.total);
        match self.state {
            PlaybackState::Running => {}
            PlaybackState::Idle => line.push_str(" · paused"),
            PlaybackState::Completed => line.push_str(" · complete"),
        }
        line
    }
}

/// Owns the playback state. Used directly in tests and wrapped by the
/// spawned task in [`Player::spawn`].
#[derive(Debug)]
pub struct PlaybackCore {
    text: String,
    chunk_size: usize,
    settings: PlaybackSettings,
    chunks: ChunkSet,
    scheduler: Scheduler,
}

impl PlaybackCore {
    pub fn new(text: impl Into<String>, chunk_size: usize, settings: PlaybackSettings) -> Result<Self> {
        settings.validate()?;
        let text = text.into();
        let chunks = chunk(&text, chunk_size)?;
        let mut scheduler = Scheduler::new();
        scheduler.reset(chunks.len());
        Ok(Self {
            text,
            chunk_size,
            settings,
            chunks,
            scheduler,
        })
    }

    pub fn chunks(&self) -> &ChunkSet {
        &self.chunks
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn settings(&self) -> &PlaybackSettings {
        &self.settings
    }

    /// Re-evaluates the timer for the current settings.
    pub fn reconcile(&mut self) -> Option<TimerToken> {
        self.scheduler.start(&self.settings)
    }

    /// Applies a command and returns the timer that should now be running.
    /// A command repeating the current value leaves the stream and the live
    /// timer untouched.
    pub fn apply(&mut self, command: PlayerCommand) -> Result<Option<TimerToken>> {
        match command {
            PlayerCommand::SetText(text) if text == self.text => {
                return Ok(self.scheduler.live_timer());
            }
            PlayerCommand::SetText(text) => {
                self.rechunk(&text, self.chunk_size)?;
                self.text = text;
            }
            PlayerCommand::SetChunkSize(chunk_size) if chunk_size == self.chunk_size => {
                return Ok(self.scheduler.live_timer());
            }
            PlayerCommand::SetChunkSize(chunk_size) => {
                let text = std::mem::take(&mut self.text);
                let result = self.rechunk(&text, chunk_size);
                self.text = text;
                result?;
                self.chunk_size = chunk_size;
            }
            PlayerCommand::SetFrameRate(frame_rate) => {
                let settings = PlaybackSettings {
                    frame_rate,
                    ..self.settings
                };
                settings.validate()?;
                return Ok(self.update_settings(settings));
            }
            PlayerCommand::SetLoop(loop_playback) => {
                let settings = PlaybackSettings {
                    loop_playback,
                    ..self.settings
                };
                return Ok(self.update_settings(settings));
            }
            PlayerCommand::SetEnabled(enabled) => {
                let settings = PlaybackSettings {
                    enabled,
                    ..self.settings
                };
                return Ok(self.update_settings(settings));
            }
        }
        Ok(self.reconcile())
    }

    fn update_settings(&mut self, settings: PlaybackSettings) -> Option<TimerToken> {
        if settings == self.settings {
            return self.scheduler.live_timer();
        }
        self.settings = settings;
        self.reconcile()
    }

    pub fn tick(&mut self, token: TimerToken) -> TickOutcome {
        self.scheduler.tick(token)
    }

    pub fn snapshot(&self) -> FrameSnapshot {
        let Some(index) = self.scheduler.safe_index() else {
            return FrameSnapshot {
                state: self.scheduler.state(),
                ..FrameSnapshot::empty()
            };
        };
        let payload = self.chunks.get(index).and_then(|envelope| {
            envelope
                .to_payload()
                .map_err(|err| tracing::warn!(error = %err, index, "cannot serialise envelope"))
                .ok()
        });
        FrameSnapshot {
            state: self.scheduler.state(),
            index,
            total: self.chunks.len(),
            stream_id: self.chunks.stream_id.as_ref().map(ToString::to_string),
            payload,
        }
    }

    fn rechunk(&mut self, text: &str, chunk_size: usize) -> Result<()> {
        let chunks = chunk(text, chunk_size)?;
        tracing::info!(
            stream = chunks.stream_id.as_ref().map(|id| id.as_str()).unwrap_or("-"),
            total = chunks.len(),
            chunk_size,
            "stream chunked"
        );
        self.scheduler.reset(chunks.len());
        self.chunks = chunks;
        Ok(())
    }
}

struct ArmedTimer {
    token: TimerToken,
    interval: Interval,
}

impl ArmedTimer {
    fn arm(token: TimerToken) -> Self {
        let mut interval = interval_at(Instant::now() + token.period, token.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self { token, interval }
    }
}

async fn next_tick(timer: &mut Option<ArmedTimer>) -> TimerToken {
    match timer {
        Some(armed) => {
            armed.interval.tick().await;
            armed.token
        }
        None => pending().await,
    }
}

/// Handle to the spawned playback task.
#[derive(Debug)]
pub struct Player {
    commands: mpsc::UnboundedSender<PlayerCommand>,
    frames: watch::Receiver<FrameSnapshot>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl Player {
    /// Chunks `text` and starts the playback task on the current runtime.
    pub fn spawn(text: impl Into<String>, chunk_size: usize, settings: PlaybackSettings) -> Result<Self> {
        let mut core = PlaybackCore::new(text, chunk_size, settings)?;
        let first = core.reconcile();
        let (commands, inbox) = mpsc::unbounded_channel();
        let (publisher, frames) = watch::channel(core.snapshot());
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run(core, first, inbox, publisher, cancel.clone()));
        Ok(Self {
            commands,
            frames,
            cancel,
            task,
        })
    }

    pub fn send(&self, command: PlayerCommand) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| FramecastError::msg("playback task has stopped"))
    }

    /// A fresh receiver for frame snapshots.
    pub fn subscribe(&self) -> watch::Receiver<FrameSnapshot> {
        self.frames.clone()
    }

    pub fn current(&self) -> FrameSnapshot {
        self.frames.borrow().clone()
    }

    /// Cancels the task and waits until its timer is gone.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(err) = self.task.await {
            tracing::warn!(error = %err, "playback task ended abnormally");
        }
    }
}

async fn run(
    mut core: PlaybackCore,
    first: Option<TimerToken>,
    mut inbox: mpsc::UnboundedReceiver<PlayerCommand>,
    publisher: watch::Sender<FrameSnapshot>,
    cancel: CancellationToken,
) {
    let mut timer = first.map(ArmedTimer::arm);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            command = inbox.recv() => {
                let Some(command) = command else { break };
                tracing::debug!(?command, "playback command");
                let armed = timer.as_ref().map(|armed| armed.token);
                match core.apply(command) {
                    Ok(next) if next.is_some() && next == armed => {}
                    Ok(next) => {
                        // Drop the old interval before the new one is armed.
                        drop(timer.take());
                        timer = next.map(ArmedTimer::arm);
                        publisher.send_replace(core.snapshot());
                    }
                    Err(err) => tracing::warn!(error = %err, "ignoring playback command"),
                }
            }
            token = next_tick(&mut timer) => {
                match core.tick(token) {
                    TickOutcome::Ignored => continue,
                    TickOutcome::Completed(index) => {
                        tracing::info!(index, "playback complete");
                        timer = None;
                    }
                    outcome => tracing::debug!(?outcome, "tick"),
                }
                publisher.send_replace(core.snapshot());
            }
        }
    }

    drop(timer);
    tracing::debug!("playback task stopped");
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn single_pass(frame_rate: u32) -> PlaybackSettings {
        PlaybackSettings {
            frame_rate,
            loop_playback: false,
            enabled: true,
        }
    }

    #[test]
    fn status_line_reflects_state() {
        let mut core = PlaybackCore::new("ABCDEFGHIJ", 4, single_pass(10)).unwrap();
        core.reconcile();
        let snapshot = core.snapshot();
        let id = core.chunks().stream_id.clone().unwrap();

        assert_eq!(snapshot.status_line(), format!("frame 1/3 · stream {id}"));
        assert_eq!(FrameSnapshot::empty().status_line(), "nothing to stream");

        core.apply(PlayerCommand::SetEnabled(false)).unwrap();
        assert!(core.snapshot().status_line().ends_with("paused"));
    }

    #[test]
    fn text_change_resets_index_and_stream() {
        let mut core = PlaybackCore::new("ABCDEFGHIJ", 4, single_pass(10)).unwrap();
        let token = core.reconcile().unwrap();
        core.tick(token);
        let before = core.chunks().stream_id.clone();

        let token = core.apply(PlayerCommand::SetText("0123456789abcdef".into())).unwrap();

        assert!(token.is_some());
        assert_eq!(core.snapshot().index, 0);
        assert_eq!(core.chunks().len(), 4);
        assert_ne!(core.chunks().stream_id, before);
    }

    #[test]
    fn invalid_commands_keep_previous_stream() {
        let mut core = PlaybackCore::new("ABCDEFGHIJ", 4, single_pass(10)).unwrap();
        let id = core.chunks().stream_id.clone();

        assert!(core.apply(PlayerCommand::SetChunkSize(0)).is_err());
        assert!(core.apply(PlayerCommand::SetFrameRate(0)).is_err());
        assert_eq!(core.chunks().stream_id, id);
        assert_eq!(core.settings().frame_rate, 10);

        core.apply(PlayerCommand::SetChunkSize(5)).unwrap();
        assert_eq!(core.chunks().reassemble().unwrap(), "ABCDEFGHIJ");
    }

    #[test]
    fn repeated_text_keeps_stream_and_index() {
        let mut core = PlaybackCore::new("ABCDEFGHIJ", 4, single_pass(10)).unwrap();
        let token = core.reconcile().unwrap();
        core.tick(token);
        let id = core.chunks().stream_id.clone();

        let next = core.apply(PlayerCommand::SetText("ABCDEFGHIJ".into())).unwrap();
        assert_eq!(next, Some(token));
        assert_eq!(core.chunks().stream_id, id);
        assert_eq!(core.snapshot().index, 1);

        assert_eq!(core.apply(PlayerCommand::SetChunkSize(4)).unwrap(), Some(token));
        assert_eq!(core.chunks().stream_id, id);
    }

    #[test]
    fn repeated_settings_keep_live_timer() {
        let mut core = PlaybackCore::new("ABCDEFGHIJ", 2, single_pass(10)).unwrap();
        let token = core.reconcile().unwrap();

        for command in [
            PlayerCommand::SetEnabled(true),
            PlayerCommand::SetFrameRate(10),
            PlayerCommand::SetLoop(false),
        ] {
            assert_eq!(core.apply(command).unwrap(), Some(token));
        }
        assert_eq!(core.tick(token), TickOutcome::Advanced(1));
    }

    #[test]
    fn repeated_loop_flag_does_not_restart_completed_stream() {
        let mut core = PlaybackCore::new("ABCDEFGHIJ", 4, single_pass(10)).unwrap();
        let token = core.reconcile().unwrap();
        core.tick(token);
        core.tick(token);
        assert_eq!(core.snapshot().state, PlaybackState::Completed);

        assert_eq!(core.apply(PlayerCommand::SetLoop(false)).unwrap(), None);
        assert_eq!(core.apply(PlayerCommand::SetEnabled(true)).unwrap(), None);
        let snapshot = core.snapshot();
        assert_eq!(snapshot.state, PlaybackState::Completed);
        assert_eq!(snapshot.index, 2);
    }

    #[test]
    fn chunk_size_change_mid_stream_rewinds() {
        let mut core = PlaybackCore::new("ABCDEFGHIJ", 2, single_pass(10)).unwrap();
        let token = core.reconcile().unwrap();
        core.tick(token);
        core.tick(token);
        let before = core.chunks().stream_id.clone();

        let next = core.apply(PlayerCommand::SetChunkSize(3)).unwrap();

        assert!(next.is_some_and(|new| new.epoch != token.epoch));
        let snapshot = core.snapshot();
        assert_eq!(snapshot.index, 0);
        assert_eq!(snapshot.total, 4);
        assert_eq!(snapshot.state, PlaybackState::Running);
        assert_ne!(core.chunks().stream_id, before);
        assert!(!core.scheduler().is_completed());
    }

    #[test]
    fn chunk_size_change_after_completion_rewinds() {
        let mut core = PlaybackCore::new("ABCDEFGHIJ", 4, single_pass(10)).unwrap();
        let token = core.reconcile().unwrap();
        core.tick(token);
        core.tick(token);
        assert!(core.scheduler().is_completed());
        let before = core.chunks().stream_id.clone();

        assert!(core.apply(PlayerCommand::SetChunkSize(2)).unwrap().is_some());

        let snapshot = core.snapshot();
        assert_eq!(snapshot.index, 0);
        assert_eq!(snapshot.total, 5);
        assert_eq!(snapshot.state, PlaybackState::Running);
        assert_ne!(core.chunks().stream_id, before);
        assert!(!core.scheduler().is_completed());
    }

    #[test]
    fn empty_text_is_idle_with_no_payload() {
        let mut core = PlaybackCore::new("   ", 4, single_pass(10)).unwrap();
        assert!(core.reconcile().is_none());

        let snapshot = core.snapshot();
        assert_eq!(snapshot.state, PlaybackState::Idle);
        assert!(snapshot.payload.is_none());
        assert_eq!(snapshot.total, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn single_pass_completes_after_two_ticks() {
        let start = Instant::now();
        let player = Player::spawn("ABCDEFGHIJ", 4, single_pass(10)).unwrap();
        let mut frames = player.subscribe();

        let done = frames
            .wait_for(|frame| frame.state == PlaybackState::Completed)
            .await
            .unwrap()
            .clone();
        assert_eq!(done.index, 2);
        assert_eq!(start.elapsed(), Duration::from_millis(200));

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(player.current().index, 2);
        assert_eq!(player.current().state, PlaybackState::Completed);

        player.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn loop_wraps_and_reenable_after_completion_restarts() {
        let settings = PlaybackSettings {
            frame_rate: 10,
            loop_playback: true,
            enabled: true,
        };
        let player = Player::spawn("ABCDEFGHIJ", 4, settings).unwrap();
        let mut frames = player.subscribe();

        let mut seen = Vec::new();
        for _ in 0..4 {
            frames.changed().await.unwrap();
            seen.push(frames.borrow_and_update().index);
        }
        assert_eq!(seen, vec![1, 2, 0, 1]);

        player.send(PlayerCommand::SetLoop(false)).unwrap();
        frames
            .wait_for(|frame| frame.state == PlaybackState::Completed)
            .await
            .unwrap();

        player.send(PlayerCommand::SetEnabled(false)).unwrap();
        frames
            .wait_for(|frame| frame.state == PlaybackState::Idle)
            .await
            .unwrap();
        player.send(PlayerCommand::SetEnabled(true)).unwrap();
        let restarted = frames
            .wait_for(|frame| frame.state == PlaybackState::Running)
            .await
            .unwrap()
            .clone();
        assert_eq!(restarted.index, 0);

        player.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn disabling_freezes_the_index() {
        let player = Player::spawn("ABCDEFGHIJ", 2, PlaybackSettings {
            frame_rate: 10,
            loop_playback: true,
            enabled: true,
        })
        .unwrap();
        let mut frames = player.subscribe();
        frames.wait_for(|frame| frame.index == 2).await.unwrap();

        player.send(PlayerCommand::SetEnabled(false)).unwrap();
        frames
            .wait_for(|frame| frame.state == PlaybackState::Idle)
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_secs(2)).await;

        let frozen = player.current();
        assert_eq!(frozen.index, 2);
        assert_eq!(frozen.state, PlaybackState::Idle);

        player.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn rate_change_restarts_interval() {
        let start = Instant::now();
        let player = Player::spawn("ABCDEFGHIJ", 1, PlaybackSettings {
            frame_rate: 1,
            loop_playback: true,
            enabled: true,
        })
        .unwrap();
        let mut frames = player.subscribe();

        tokio::time::sleep(Duration::from_millis(900)).await;
        player.send(PlayerCommand::SetFrameRate(2)).unwrap();
        frames.wait_for(|frame| frame.index == 1).await.unwrap();

        // 900 ms elapsed at 1 fps are discarded; the first 2 fps tick lands 500 ms later.
        assert_eq!(start.elapsed(), Duration::from_millis(1400));

        player.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn frequent_repeated_enable_keeps_advancing() {
        let player = Player::spawn("ABCDEFGHIJKLMNOPQRST", 1, single_pass(10)).unwrap();

        for _ in 0..20 {
            tokio::time::sleep(Duration::from_millis(60)).await;
            player.send(PlayerCommand::SetEnabled(true)).unwrap();
        }
        tokio::time::sleep(Duration::from_millis(1)).await;

        let snapshot = player.current();
        assert!(snapshot.index >= 11, "index {}", snapshot.index);
        assert_eq!(snapshot.state, PlaybackState::Running);

        player.shutdown().await;
    }
}

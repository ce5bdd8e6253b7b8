// Replay orchestration
//
// ReplayController is an actor: one task owns the clock, the lap index, the telemetry store and
// the stream session, and applies commands, playback ticks and transport events one at a time.
// Callers talk to it through a cloneable ReplayHandle and observe it through ReplayUpdates.

mod ticker;
pub mod updates;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tokio::sync::oneshot;

use crate::{
    ReplayError,
    api::{RaceApi, TrackBounds},
    clock::{ClockController, PlayOutcome, PlaybackState},
    config::ReplayConfig,
    laps::{LapIndex, LapRecord},
    stream::{ClientId, Connector, SessionEvent, StreamOutcome, StreamSession, SubscriptionState},
    telemetry::TelemetryStore,
};

use ticker::Ticker;
pub use updates::{ReplayUpdate, ReplayView};

#[derive(Debug)]
pub enum ReplayCommand {
    SelectSession { year: i32, session_key: u32 },
    Play,
    Pause,
    /// Move the displayed time to this many minutes into the session without committing.
    PreviewSeek(u32),
    /// Finalize the scrubber gesture; send once per pointer release.
    CommitSeek,
    Disconnect,
    View(oneshot::Sender<ReplayView>),
}

/// Cloneable front door to a running [`ReplayController`]. The controller stops once every
/// handle has been dropped.
#[derive(Clone, Debug)]
pub struct ReplayHandle {
    commands: UnboundedSender<ReplayCommand>,
}

impl ReplayHandle {
    pub fn send(&self, command: ReplayCommand) -> Result<(), ReplayError> {
        self.commands
            .send(command)
            .map_err(|_| ReplayError::ControllerGone)
    }

    pub fn select_session(&self, year: i32, session_key: u32) -> Result<(), ReplayError> {
        self.send(ReplayCommand::SelectSession { year, session_key })
    }

    pub fn play(&self) -> Result<(), ReplayError> {
        self.send(ReplayCommand::Play)
    }

    pub fn pause(&self) -> Result<(), ReplayError> {
        self.send(ReplayCommand::Pause)
    }

    pub fn preview_seek(&self, offset_minutes: u32) -> Result<(), ReplayError> {
        self.send(ReplayCommand::PreviewSeek(offset_minutes))
    }

    pub fn commit_seek(&self) -> Result<(), ReplayError> {
        self.send(ReplayCommand::CommitSeek)
    }

    pub fn disconnect(&self) -> Result<(), ReplayError> {
        self.send(ReplayCommand::Disconnect)
    }

    /// Snapshot of the controller state after every previously sent command has been applied.
    pub async fn view(&self) -> Result<ReplayView, ReplayError> {
        let (tx, rx) = oneshot::channel();
        self.send(ReplayCommand::View(tx))?;
        rx.await.map_err(|_| ReplayError::ControllerGone)
    }
}

#[derive(Clone, Copy, Debug)]
struct LoadedSession {
    year: i32,
    session_key: u32,
}

struct SessionData {
    start_time: DateTime<Utc>,
    laps: Vec<LapRecord>,
    track_bounds: Option<TrackBounds>,
}

pub struct ReplayController {
    api: Arc<dyn RaceApi>,
    config: ReplayConfig,
    session: Option<LoadedSession>,
    clock: Option<ClockController>,
    laps: LapIndex,
    store: TelemetryStore,
    stream: StreamSession,
    published_lap: Option<u32>,
    ticker: Option<Ticker>,
    tick_generation: u64,
    commands: UnboundedReceiver<ReplayCommand>,
    ticks_tx: UnboundedSender<u64>,
    ticks_rx: UnboundedReceiver<u64>,
    stream_rx: UnboundedReceiver<SessionEvent>,
    updates: UnboundedSender<ReplayUpdate>,
}

impl ReplayController {
    pub fn new(
        api: Arc<dyn RaceApi>,
        connector: Box<dyn Connector>,
        config: ReplayConfig,
        client_id: ClientId,
    ) -> (Self, ReplayHandle, UnboundedReceiver<ReplayUpdate>) {
        let (commands_tx, commands) = unbounded_channel();
        let (ticks_tx, ticks_rx) = unbounded_channel();
        let (stream_tx, stream_rx) = unbounded_channel();
        let (updates, updates_rx) = unbounded_channel();

        let stream = StreamSession::new(client_id, connector, stream_tx)
            .with_stale_tolerance(config.stale_push_tolerance());
        let laps = LapIndex::with_grace_window(Vec::new(), config.lap_grace_window());

        let controller = Self {
            api,
            config,
            session: None,
            clock: None,
            laps,
            store: TelemetryStore::new(),
            stream,
            published_lap: None,
            ticker: None,
            tick_generation: 0,
            commands,
            ticks_tx,
            ticks_rx,
            stream_rx,
            updates,
        };
        (
            controller,
            ReplayHandle {
                commands: commands_tx,
            },
            updates_rx,
        )
    }

    /// Process messages until every [`ReplayHandle`] is dropped, then tear down the stream.
    ///
    /// Transport events are applied before ticks and ticks before commands, so a command always
    /// observes every push that arrived ahead of it.
    pub async fn run(mut self) {
        info!("Replay: controller running as {}", self.stream.client_id());
        loop {
            tokio::select! {
                biased;
                Some(event) = self.stream_rx.recv() => self.on_stream_event(event),
                Some(generation) = self.ticks_rx.recv() => self.on_tick(generation),
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => break,
                },
            }
        }

        self.stop_ticker();
        self.stream.disconnect();
        info!("Replay: controller stopped");
    }

    async fn handle_command(&mut self, command: ReplayCommand) {
        match command {
            ReplayCommand::SelectSession { year, session_key } => {
                self.select_session(year, session_key).await
            }
            ReplayCommand::Play => self.play(),
            ReplayCommand::Pause => self.pause(),
            ReplayCommand::PreviewSeek(offset) => self.preview_seek(offset),
            ReplayCommand::CommitSeek => self.commit_seek(),
            ReplayCommand::Disconnect => self.disconnect(),
            ReplayCommand::View(reply) => {
                let _ = reply.send(self.view());
            }
        }
    }

    async fn select_session(&mut self, year: i32, session_key: u32) {
        info!("Replay: selecting session {} ({})", session_key, year);

        // everything tied to the previous session goes before the first await
        self.stop_ticker();
        if self.stream.disconnect() {
            self.publish(ReplayUpdate::Connection {
                state: SubscriptionState::Disconnected,
            });
        }
        self.session = None;
        self.clock = None;
        self.laps = LapIndex::with_grace_window(Vec::new(), self.config.lap_grace_window());
        self.clear_telemetry();
        if self.published_lap.take().is_some() {
            self.publish(ReplayUpdate::ActiveLap { lap: None });
        }

        let api = Arc::clone(&self.api);
        let padding = self.config.track_padding;
        let data = match Self::load_session(api, padding, year, session_key).await {
            Ok(data) => data,
            Err(e) => {
                error!("Replay: could not load session {}: {}", session_key, e);
                self.publish(ReplayUpdate::SessionFailed {
                    year,
                    session_key,
                    reason: e.to_string(),
                });
                return;
            }
        };

        self.clock = Some(ClockController::new(data.start_time));
        self.laps = LapIndex::with_grace_window(data.laps, self.config.lap_grace_window());
        self.session = Some(LoadedSession { year, session_key });
        self.publish(ReplayUpdate::SessionLoaded {
            year,
            session_key,
            start_time: data.start_time,
            lap_count: self.laps.len(),
            track_bounds: data.track_bounds,
        });
        self.publish_clock();
        self.refresh_active_lap();

        let state = match self.stream.connect(year, session_key) {
            Ok(()) => SubscriptionState::Connecting,
            Err(_) => SubscriptionState::Disconnected,
        };
        self.publish(ReplayUpdate::Connection { state });
    }

    /// Only the start time is required; missing laps or track map degrade to "no data".
    ///
    /// Borrows nothing from the controller so the `run` future stays `Send`.
    async fn load_session(
        api: Arc<dyn RaceApi>,
        track_padding: f64,
        year: i32,
        session_key: u32,
    ) -> Result<SessionData, ReplayError> {
        let start_time = api.start_time(year, session_key).await?;

        let laps = api
            .lap_info(year, session_key)
            .await
            .unwrap_or_else(|e| {
                warn!("Replay: no lap data for session {}: {}", session_key, e);
                Vec::new()
            });

        let track_bounds = match api.track_map(year, session_key).await {
            Ok(paths) => TrackBounds::from_paths(&paths, track_padding),
            Err(e) => {
                warn!("Replay: no track map for session {}: {}", session_key, e);
                None
            }
        };

        Ok(SessionData {
            start_time,
            laps,
            track_bounds,
        })
    }

    fn play(&mut self) {
        let Some(clock) = self.clock.as_mut() else {
            debug!("Replay: play ignored, no session loaded");
            return;
        };
        match clock.play() {
            PlayOutcome::AlreadyPlaying => return,
            PlayOutcome::Resumed => {}
            PlayOutcome::ResumedFromPreview(committed) => {
                self.clear_telemetry();
                self.stream.request_snapshot(committed);
            }
        }
        self.start_ticker();
        self.publish_clock();
        self.refresh_active_lap();
    }

    fn pause(&mut self) {
        self.stop_ticker();
        if let Some(clock) = self.clock.as_mut() {
            if clock.pause() {
                self.publish_clock();
            }
        }
    }

    fn preview_seek(&mut self, offset: u32) {
        let Some(clock) = self.clock.as_mut() else {
            return;
        };
        clock.preview_seek(offset);
        self.publish_clock();
    }

    fn commit_seek(&mut self) {
        let Some(clock) = self.clock.as_mut() else {
            return;
        };
        let committed = clock.commit_seek();
        debug!("Replay: seek committed to {}", committed);

        self.clear_telemetry();
        self.stream.request_snapshot(committed);
        self.publish_clock();
        self.refresh_active_lap();
    }

    fn disconnect(&mut self) {
        self.pause();
        if self.stream.disconnect() {
            self.publish(ReplayUpdate::Connection {
                state: SubscriptionState::Disconnected,
            });
        }
    }

    fn on_tick(&mut self, generation: u64) {
        if self.ticker.as_ref().map(Ticker::generation) != Some(generation) {
            debug!("Replay: discarding tick from cancelled ticker {}", generation);
            return;
        }
        let Some(virtual_time) = self.clock.as_mut().and_then(ClockController::tick) else {
            return;
        };

        self.stream.request_snapshot(virtual_time);
        self.publish_clock();
        self.refresh_active_lap();
    }

    fn on_stream_event(&mut self, event: SessionEvent) {
        match self.stream.handle_event(event, &mut self.store) {
            Some(StreamOutcome::StateChanged(state)) => {
                self.publish(ReplayUpdate::Connection { state });
                // fill the map for the time already on screen; a scrubber drag in progress waits
                // for its commit
                if state == SubscriptionState::Connected {
                    if let Some(clock) = self.clock.as_ref().filter(|c| !c.has_pending_preview()) {
                        self.stream.request_snapshot(clock.current_time());
                    }
                }
            }
            Some(StreamOutcome::Merged(cars)) => {
                self.publish(ReplayUpdate::TelemetryMerged { cars });
            }
            None => {}
        }
    }

    fn start_ticker(&mut self) {
        self.stop_ticker();
        self.tick_generation += 1;
        self.ticker = Some(Ticker::start(self.tick_generation, self.ticks_tx.clone()));
    }

    fn stop_ticker(&mut self) {
        // dropping the ticker cancels its task
        self.ticker = None;
    }

    fn clear_telemetry(&mut self) {
        self.store.reset();
        self.publish(ReplayUpdate::TelemetryCleared);
    }

    fn refresh_active_lap(&mut self) {
        let Some(clock) = self.clock.as_ref() else {
            return;
        };
        let lap = self.laps.active_lap_at(clock.current_time()).cloned();
        let lap_number = lap.as_ref().map(|lap| lap.lap_number);
        if lap_number != self.published_lap {
            debug!("Replay: active lap {:?} -> {:?}", self.published_lap, lap_number);
            self.published_lap = lap_number;
            self.publish(ReplayUpdate::ActiveLap { lap });
        }
    }

    fn publish_clock(&self) {
        if let Some(clock) = self.clock.as_ref() {
            self.publish(ReplayUpdate::Clock {
                virtual_time: clock.current_time(),
                scrubber_minutes: clock.scrubber_position(),
                playback: clock.state(),
            });
        }
    }

    fn publish(&self, update: ReplayUpdate) {
        // a presentation layer that stopped listening is not the controller's problem
        let _ = self.updates.send(update);
    }

    fn view(&self) -> ReplayView {
        ReplayView {
            year: self.session.map(|session| session.year),
            session_key: self.session.map(|session| session.session_key),
            virtual_time: self.clock.as_ref().map(ClockController::current_time),
            scrubber_minutes: self
                .clock
                .as_ref()
                .map(ClockController::scrubber_position)
                .unwrap_or(0),
            playback: self
                .clock
                .as_ref()
                .map(ClockController::state)
                .unwrap_or(PlaybackState::Stopped),
            connection: self.stream.state(),
            receiving: self.stream.is_receiving(self.config.health_window()),
            active_lap: self
                .clock
                .as_ref()
                .and_then(|clock| self.laps.active_lap_at(clock.current_time()))
                .cloned(),
            cars: self.store.snapshot().clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{DriverInfo, SessionSummary, TrackPaths, TrackPoint};
    use crate::stream::TransportEvent;
    use crate::stream::tests::{RecordingConnector, WireOp};
    use async_trait::async_trait;
    use chrono::{TimeDelta, TimeZone};
    use std::time::Duration;

    struct FixtureApi {
        start: DateTime<Utc>,
        laps: Vec<LapRecord>,
    }

    #[async_trait]
    impl RaceApi for FixtureApi {
        async fn sessions(&self, _year: i32) -> Result<Vec<SessionSummary>, ReplayError> {
            Ok(Vec::new())
        }

        async fn start_time(&self, _: i32, session_key: u32) -> Result<DateTime<Utc>, ReplayError> {
            if session_key == 0 {
                return Err(ReplayError::HttpStatus {
                    status: 404,
                    url: "/race/startTime".to_string(),
                });
            }
            Ok(self.start + TimeDelta::days(session_key as i64 - 1))
        }

        async fn lap_info(&self, _: i32, session_key: u32) -> Result<Vec<LapRecord>, ReplayError> {
            Ok(if session_key == 1 { self.laps.clone() } else { Vec::new() })
        }

        async fn track_map(&self, _: i32, _: u32) -> Result<TrackPaths, ReplayError> {
            let mut paths = TrackPaths::new();
            paths.insert("1".to_string(), vec![TrackPoint { x: 0., y: 0. }]);
            Ok(paths)
        }

        async fn drivers(&self, _: i32) -> Result<Vec<DriverInfo>, ReplayError> {
            Ok(Vec::new())
        }
    }

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 9, 18, 0, 0).unwrap()
    }

    fn lap(lap_number: u32, offset_s: i64) -> LapRecord {
        LapRecord {
            driver_id: "1".to_string(),
            lap_number,
            start_time: start() + TimeDelta::seconds(offset_s),
            lap_duration: 80.,
        }
    }

    fn controller() -> (
        ReplayHandle,
        UnboundedReceiver<ReplayUpdate>,
        RecordingConnector,
    ) {
        let connector = RecordingConnector::default();
        let api = FixtureApi {
            start: start(),
            laps: vec![lap(1, 0), lap(2, 90), lap(3, 180)],
        };
        let (controller, handle, updates) = ReplayController::new(
            Arc::new(api),
            Box::new(connector.clone()),
            ReplayConfig::default(),
            ClientId::from("client-unit"),
        );
        tokio::spawn(controller.run());
        (handle, updates, connector)
    }

    fn drain(updates: &mut UnboundedReceiver<ReplayUpdate>) -> Vec<ReplayUpdate> {
        let mut out = Vec::new();
        while let Ok(update) = updates.try_recv() {
            out.push(update);
        }
        out
    }

    async fn connected(handle: &ReplayHandle, connector: &RecordingConnector) {
        handle.select_session(2024, 1).unwrap();
        handle.view().await.unwrap();
        connector.last_sink().send(TransportEvent::Opened);
        handle.view().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_select_session_resets_then_connects() {
        let (handle, mut updates, connector) = controller();
        connected(&handle, &connector).await;

        let view = handle.view().await.unwrap();
        assert_eq!(view.session_key, Some(1));
        assert_eq!(view.virtual_time, Some(start()));
        assert_eq!(view.connection, SubscriptionState::Connected);
        assert_eq!(view.active_lap.map(|l| l.lap_number), Some(1));

        let updates = drain(&mut updates);
        let loaded_at = updates
            .iter()
            .position(|u| matches!(u, ReplayUpdate::SessionLoaded { .. }))
            .unwrap();
        let cleared_at = updates
            .iter()
            .position(|u| matches!(u, ReplayUpdate::TelemetryCleared))
            .unwrap();
        let connecting_at = updates
            .iter()
            .position(|u| {
                matches!(
                    u,
                    ReplayUpdate::Connection {
                        state: SubscriptionState::Connecting
                    }
                )
            })
            .unwrap();
        assert!(cleared_at < loaded_at && loaded_at < connecting_at);

        // the freshly connected session asks for the time already on screen
        assert_eq!(connector.publishes().len(), 1);
        assert_eq!(
            connector.publishes()[0].start_time,
            start().timestamp_millis()
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_playback_advances_and_requests_each_second() {
        let (handle, _updates, connector) = controller();
        connected(&handle, &connector).await;

        handle.play().unwrap();
        tokio::time::sleep(Duration::from_millis(3500)).await;
        handle.pause().unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;

        let view = handle.view().await.unwrap();
        assert_eq!(view.playback, PlaybackState::Stopped);
        assert_eq!(view.virtual_time, Some(start() + TimeDelta::seconds(3)));

        let requested: Vec<i64> = connector
            .publishes()
            .iter()
            .map(|r| r.start_time)
            .collect();
        assert_eq!(
            requested,
            (0..=3)
                .map(|s| (start() + TimeDelta::seconds(s)).timestamp_millis())
                .collect::<Vec<_>>()
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_preview_does_not_clear_and_commit_does() {
        let (handle, mut updates, connector) = controller();
        connected(&handle, &connector).await;
        connector.last_sink().send(TransportEvent::Message(
            r#"[{"driverNumber": 1, "x": 1, "y": 1, "speed": 100, "position": 1, "timestamp": "2024-06-09T18:00:00"}]"#
                .to_string(),
        ));
        handle.view().await.unwrap();
        drain(&mut updates);

        handle.preview_seek(2).unwrap();
        let view = handle.view().await.unwrap();
        assert_eq!(view.cars.len(), 1);
        assert_eq!(view.scrubber_minutes, 2);
        assert!(
            !drain(&mut updates)
                .iter()
                .any(|u| matches!(u, ReplayUpdate::TelemetryCleared))
        );
        let requests_before = connector.publishes().len();

        handle.commit_seek().unwrap();
        let view = handle.view().await.unwrap();
        assert!(view.cars.is_empty());
        assert_eq!(view.active_lap.map(|l| l.lap_number), Some(2));
        assert_eq!(connector.publishes().len(), requests_before + 1);
        assert_eq!(
            connector.publishes().last().unwrap().start_time,
            (start() + TimeDelta::minutes(2)).timestamp_millis()
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_lap_published_only_on_change() {
        let (handle, mut updates, connector) = controller();
        connected(&handle, &connector).await;

        handle.play().unwrap();
        tokio::time::sleep(Duration::from_millis(100_500)).await;
        handle.pause().unwrap();
        handle.view().await.unwrap();

        let laps: Vec<Option<u32>> = drain(&mut updates)
            .into_iter()
            .filter_map(|u| match u {
                ReplayUpdate::ActiveLap { lap } => Some(lap.map(|l| l.lap_number)),
                _ => None,
            })
            .collect();
        assert_eq!(laps, vec![Some(1), Some(2)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_switch_cancels_ticks() {
        let (handle, _updates, connector) = controller();
        connected(&handle, &connector).await;
        handle.play().unwrap();
        tokio::time::sleep(Duration::from_millis(2500)).await;

        handle.select_session(2024, 2).unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;

        let view = handle.view().await.unwrap();
        assert_eq!(view.session_key, Some(2));
        assert_eq!(view.playback, PlaybackState::Stopped);
        assert_eq!(view.virtual_time, Some(start() + TimeDelta::days(1)));
        assert!(view.active_lap.is_none());

        let closes = connector
            .ops
            .lock()
            .unwrap()
            .iter()
            .filter(|op| matches!(op, WireOp::Close(_)))
            .count();
        assert_eq!(closes, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_session_load_reports_and_stays_empty() {
        let (handle, mut updates, connector) = controller();
        handle.select_session(2024, 0).unwrap();
        let view = handle.view().await.unwrap();

        assert_eq!(view.session_key, None);
        assert_eq!(view.virtual_time, None);
        assert_eq!(view.connection, SubscriptionState::Disconnected);
        assert!(
            drain(&mut updates)
                .iter()
                .any(|u| matches!(u, ReplayUpdate::SessionFailed { session_key: 0, .. }))
        );
        assert!(connector.ops.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_connection_loss_keeps_playing() {
        let (handle, _updates, connector) = controller();
        connected(&handle, &connector).await;
        handle.play().unwrap();
        connector.last_sink().send(TransportEvent::Closed {
            reason: Some("reset by peer".to_string()),
        });
        tokio::time::sleep(Duration::from_millis(2500)).await;

        let view = handle.view().await.unwrap();
        assert_eq!(view.connection, SubscriptionState::Disconnected);
        assert_eq!(view.playback, PlaybackState::Playing);
        assert_eq!(view.virtual_time, Some(start() + TimeDelta::seconds(2)));
        // only the on-connect request went out
        assert_eq!(connector.publishes().len(), 1);
    }

    #[test]
    fn test_run_future_is_send() {
        fn assert_send<T: Send>(_: &T) {}
        let (controller, _handle, _updates) = ReplayController::new(
            Arc::new(FixtureApi {
                start: start(),
                laps: Vec::new(),
            }),
            Box::new(RecordingConnector::default()),
            ReplayConfig::default(),
            ClientId::from("client-unit"),
        );
        let run = controller.run();
        assert_send(&run);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_during_preview_waits_for_commit() {
        let (handle, _updates, connector) = controller();
        handle.select_session(2024, 1).unwrap();
        handle.preview_seek(30).unwrap();
        handle.view().await.unwrap();

        connector.last_sink().send(TransportEvent::Opened);
        let view = handle.view().await.unwrap();
        assert_eq!(view.connection, SubscriptionState::Connected);
        assert!(connector.publishes().is_empty());

        handle.commit_seek().unwrap();
        handle.view().await.unwrap();
        let requested: Vec<i64> = connector
            .publishes()
            .iter()
            .map(|r| r.start_time)
            .collect();
        assert_eq!(
            requested,
            vec![(start() + TimeDelta::minutes(30)).timestamp_millis()]
        );
    }
}

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::db::LocalStore;
use crate::models::{ContextChange, ContextSnapshot, FocusSession};
use crate::sensing::SamplingError;

use super::cadence::SamplingCadence;
use super::config::CaptureConfig;
use super::state::{transition, Action, CaptureState, Signal};

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info, log_warn};

/// What a sample did to the recorder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SampleOutcome {
    /// Recorder is not active; the sample was dropped.
    Ignored,
    /// The sampler had nothing to say. Nothing changed.
    Unavailable,
    Opened { id: String },
    Continued,
    /// A title-only change is waiting out the debounce window.
    Debouncing,
    Switched { closed: String, opened: String },
}

struct OpenSession {
    session: FocusSession,
    context: ContextSnapshot,
}

struct PendingTitle {
    context: ContextSnapshot,
    first_seen: DateTime<Utc>,
}

/// Owns the capture state and the single open session, and turns signals
/// and samples into opened/closed [`FocusSession`]s in the local store.
///
/// Time is always passed in, so the recorder itself never reads a clock.
pub struct SessionRecorder {
    store: Arc<dyn LocalStore>,
    config: CaptureConfig,
    state: CaptureState,
    open: Option<OpenSession>,
    pending_title: Option<PendingTitle>,
    cadence: SamplingCadence,
    last_input: Option<DateTime<Utc>>,
    last_start: Option<DateTime<Utc>>,
}

impl SessionRecorder {
    pub fn new(store: Arc<dyn LocalStore>, config: CaptureConfig) -> Self {
        Self {
            store,
            config: config.sanitized(),
            state: CaptureState::Stopped,
            open: None,
            pending_title: None,
            cadence: SamplingCadence::new(),
            last_input: None,
            last_start: None,
        }
    }

    /// Like [`SessionRecorder::new`], but carries on from what the store
    /// already holds: new sessions start after every stored start time and
    /// after the sync watermark, even if the wall clock has since gone back.
    pub async fn restore(store: Arc<dyn LocalStore>, config: CaptureConfig) -> Result<Self> {
        let latest = store
            .latest_start()
            .await
            .context("failed to read latest session start")?;
        let watermark = store
            .load_watermark()
            .await
            .context("failed to read sync watermark")?;

        let mut recorder = Self::new(store, config);
        recorder.last_start = latest.max(watermark);
        Ok(recorder)
    }

    pub fn state(&self) -> CaptureState {
        self.state
    }

    pub fn config(&self) -> &CaptureConfig {
        &self.config
    }

    pub fn open_session(&self) -> Option<&FocusSession> {
        self.open.as_ref().map(|open| &open.session)
    }

    /// Applies a signal. The returned action tells the caller whether a
    /// context sample is needed now (`OpenFresh` / `Resample`).
    pub async fn handle_signal(&mut self, signal: Signal, now: DateTime<Utc>) -> Result<Action> {
        match signal {
            Signal::ReducedPower(enabled) => self.cadence.set_reduced_power(enabled),
            Signal::UserInput | Signal::AppChanged => self.last_input = Some(now),
            _ => {}
        }

        let previous = self.state;
        let (next, action) = transition(previous, signal);
        self.state = next;
        if previous != next {
            log_info!("capture state {:?} -> {:?} on {:?}", previous, next, signal);
        }

        match action {
            Action::FinalizeOpen => {
                self.finalize(now).await?;
            }
            Action::OpenFresh => {
                self.last_input = Some(now);
                self.cadence.mark_change(now);
            }
            Action::Resample | Action::Nothing => {}
        }

        Ok(action)
    }

    pub async fn start(&mut self, now: DateTime<Utc>) -> Result<Action> {
        self.handle_signal(Signal::Start, now).await
    }

    pub async fn stop(&mut self, now: DateTime<Utc>) -> Result<Action> {
        self.handle_signal(Signal::Stop, now).await
    }

    /// Moves an active recorder to idle once input has been quiet for longer
    /// than the threshold. Returns whether that happened.
    pub async fn poll_idle(&mut self, now: DateTime<Utc>) -> Result<bool> {
        if !self.is_idle_due(now) {
            return Ok(false);
        }
        self.handle_signal(Signal::IdleTimeout, now).await?;
        Ok(true)
    }

    fn is_idle_due(&self, now: DateTime<Utc>) -> bool {
        if self.state != CaptureState::Active {
            return false;
        }
        let Some(last_input) = self.last_input else {
            return false;
        };
        (now - last_input).num_milliseconds()
            > i64::try_from(self.config.idle_threshold_secs.saturating_mul(1000)).unwrap_or(i64::MAX)
    }

    /// Time until the next fallback sample is due, or `None` when the
    /// recorder is not sampling at all.
    pub fn next_sample_in(&self, now: DateTime<Utc>) -> Option<Duration> {
        if self.state != CaptureState::Active {
            return None;
        }

        let mut wait = self.cadence.interval(now, &self.config);
        if let Some(pending) = &self.pending_title {
            let due = pending.first_seen + chrono::Duration::milliseconds(self.config.title_debounce_ms as i64);
            let remaining = (due - now).to_std().unwrap_or(Duration::ZERO);
            wait = wait.min(remaining);
        }
        Some(wait)
    }

    /// Feeds one context reading. Sampling failures never end or start a
    /// session.
    pub async fn apply_sample(
        &mut self,
        sample: Result<ContextSnapshot, SamplingError>,
        now: DateTime<Utc>,
    ) -> Result<SampleOutcome> {
        if self.state != CaptureState::Active {
            return Ok(SampleOutcome::Ignored);
        }

        let context = match sample {
            Ok(context) => context,
            Err(err) => {
                log_debug!("context unavailable, keeping current session: {err}");
                return Ok(SampleOutcome::Unavailable);
            }
        };

        let Some(open) = &self.open else {
            let id = self.begin(context, now).await?;
            return Ok(SampleOutcome::Opened { id });
        };

        match context.classify_change(&open.context) {
            ContextChange::Switch => {
                self.pending_title = None;
                self.switch_to(context, now).await
            }
            ContextChange::TitleOnly => {
                let boundary = match &self.pending_title {
                    Some(pending)
                        if pending.context.classify_change(&context) == ContextChange::Unchanged =>
                    {
                        let held = now - pending.first_seen;
                        if held.num_milliseconds() >= self.config.title_debounce_ms as i64 {
                            Some(pending.first_seen)
                        } else {
                            None
                        }
                    }
                    _ => {
                        self.pending_title = Some(PendingTitle {
                            context: context.clone(),
                            first_seen: now,
                        });
                        None
                    }
                };

                match boundary {
                    Some(boundary) => {
                        self.pending_title = None;
                        self.switch_to(context, boundary).await
                    }
                    None => {
                        self.heartbeat(now).await;
                        Ok(SampleOutcome::Debouncing)
                    }
                }
            }
            ContextChange::Unchanged => {
                if self.pending_title.take().is_some() {
                    log_debug!("transient title change reverted");
                }
                self.heartbeat(now).await;
                Ok(SampleOutcome::Continued)
            }
        }
    }

    async fn switch_to(
        &mut self,
        context: ContextSnapshot,
        boundary: DateTime<Utc>,
    ) -> Result<SampleOutcome> {
        let closed = self.finalize(boundary).await?;
        let opened = self.begin(context, boundary).await?;
        Ok(SampleOutcome::Switched {
            closed: closed.map(|s| s.id).unwrap_or_default(),
            opened,
        })
    }

    async fn begin(&mut self, context: ContextSnapshot, at: DateTime<Utc>) -> Result<String> {
        // Start times are strictly increasing so a start-time watermark can
        // never skip a session.
        let start = match self.last_start {
            Some(last) if at <= last => last + chrono::Duration::milliseconds(1),
            _ => at,
        };

        let session = FocusSession::open(Uuid::new_v4().to_string(), &context, start);
        self.store
            .insert(&session)
            .await
            .with_context(|| format!("failed to persist new session for {}", context.app.name))?;

        log_info!(
            "opened session {} for {} ({})",
            session.id,
            session.app.name,
            session.window_title
        );

        let id = session.id.clone();
        self.last_start = Some(start);
        self.cadence.mark_change(start);
        self.open = Some(OpenSession { session, context });
        Ok(id)
    }

    async fn finalize(&mut self, at: DateTime<Utc>) -> Result<Option<FocusSession>> {
        self.pending_title = None;
        let Some(OpenSession { mut session, .. }) = self.open.take() else {
            return Ok(None);
        };

        session.close(at);
        self.store
            .update(&session)
            .await
            .with_context(|| format!("failed to persist close of session {}", session.id))?;

        log_info!(
            "closed session {} for {} after {}ms",
            session.id,
            session.app.name,
            session.duration_ms
        );
        Ok(Some(session))
    }

    async fn heartbeat(&self, now: DateTime<Utc>) {
        if let Some(open) = &self.open {
            if let Err(err) = self.store.mark_seen(&open.session.id, now).await {
                log_warn!("failed to record heartbeat for {}: {err:?}", open.session.id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AppIdentity;
    use crate::test_support::MemoryLocalStore;
    use chrono::TimeZone;

    fn t(ms: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 2, 9, 0, 0).unwrap() + chrono::Duration::milliseconds(ms)
    }

    fn ctx(app: &str, title: &str) -> ContextSnapshot {
        ContextSnapshot {
            app: AppIdentity::new(app, None),
            window_title: title.into(),
            url: None,
            tab_title: None,
            tab_count: None,
            document_path: None,
            is_full_screen: false,
            is_minimized: false,
        }
    }

    fn with_url(mut context: ContextSnapshot, url: &str) -> ContextSnapshot {
        context.url = Some(url.into());
        context
    }

    async fn started(store: &Arc<MemoryLocalStore>, first: ContextSnapshot) -> SessionRecorder {
        let mut recorder = SessionRecorder::new(store.clone(), CaptureConfig::default());
        assert_eq!(recorder.start(t(0)).await.unwrap(), Action::OpenFresh);
        recorder.apply_sample(Ok(first), t(0)).await.unwrap();
        recorder
    }

    #[tokio::test]
    async fn app_switch_closes_and_opens_immediately() {
        let store = Arc::new(MemoryLocalStore::default());
        let mut recorder = started(&store, ctx("Code", "main.rs")).await;

        let outcome = recorder.apply_sample(Ok(ctx("Slack", "general")), t(10_000)).await.unwrap();
        assert!(matches!(outcome, SampleOutcome::Switched { .. }));

        let closed = store.closed();
        assert_eq!(closed.len(), 1);
        assert_eq!(closed[0].app.name, "Code");
        assert_eq!(closed[0].duration_ms, 10_000);
        assert_eq!(store.open_count(), 1);
        assert_eq!(recorder.open_session().unwrap().app.name, "Slack");
    }

    #[tokio::test]
    async fn url_change_bypasses_debounce() {
        let store = Arc::new(MemoryLocalStore::default());
        let base = with_url(ctx("Safari", "Docs"), "https://a.example");
        let mut recorder = started(&store, base).await;

        let next = with_url(ctx("Safari", "Docs"), "https://b.example");
        let outcome = recorder.apply_sample(Ok(next), t(500)).await.unwrap();
        assert!(matches!(outcome, SampleOutcome::Switched { .. }));
        assert_eq!(store.closed().len(), 1);
    }

    #[tokio::test]
    async fn title_change_commits_after_debounce_at_first_sighting() {
        let store = Arc::new(MemoryLocalStore::default());
        let mut recorder = started(&store, ctx("Terminal", "vim main.rs")).await;

        let renamed = ctx("Terminal", "vim lib.rs");
        assert_eq!(
            recorder.apply_sample(Ok(renamed.clone()), t(5_000)).await.unwrap(),
            SampleOutcome::Debouncing
        );
        assert!(store.closed().is_empty());
        assert_eq!(recorder.next_sample_in(t(5_000)), Some(Duration::from_secs(2)));

        let outcome = recorder.apply_sample(Ok(renamed), t(7_000)).await.unwrap();
        assert!(matches!(outcome, SampleOutcome::Switched { .. }));

        let closed = store.closed();
        assert_eq!(closed[0].end_time, t(5_000));
        assert_eq!(recorder.open_session().unwrap().start_time, t(5_000));
    }

    #[tokio::test]
    async fn transient_title_change_does_not_split() {
        let store = Arc::new(MemoryLocalStore::default());
        let mut recorder = started(&store, ctx("Music", "Song A")).await;

        recorder.apply_sample(Ok(ctx("Music", "Buffering…")), t(1_000)).await.unwrap();
        let outcome = recorder.apply_sample(Ok(ctx("Music", "Song A")), t(2_000)).await.unwrap();
        assert_eq!(outcome, SampleOutcome::Continued);

        recorder.apply_sample(Ok(ctx("Music", "Buffering…")), t(4_000)).await.unwrap();
        assert_eq!(
            recorder.apply_sample(Ok(ctx("Music", "Buffering…")), t(5_000)).await.unwrap(),
            SampleOutcome::Debouncing
        );
        assert!(store.closed().is_empty());
    }

    #[tokio::test]
    async fn sampler_failure_keeps_session_open() {
        let store = Arc::new(MemoryLocalStore::default());
        let mut recorder = started(&store, ctx("Code", "main.rs")).await;
        let open_id = recorder.open_session().unwrap().id.clone();

        let outcome = recorder
            .apply_sample(Err(SamplingError::PermissionDenied), t(3_000))
            .await
            .unwrap();
        assert_eq!(outcome, SampleOutcome::Unavailable);
        assert_eq!(recorder.open_session().unwrap().id, open_id);
        assert!(store.closed().is_empty());
    }

    #[tokio::test]
    async fn sampler_failure_before_first_session_opens_nothing() {
        let store = Arc::new(MemoryLocalStore::default());
        let mut recorder = SessionRecorder::new(store.clone(), CaptureConfig::default());
        recorder.start(t(0)).await.unwrap();

        recorder
            .apply_sample(Err(SamplingError::Unavailable("no window".into())), t(0))
            .await
            .unwrap();
        assert!(recorder.open_session().is_none());
        assert_eq!(store.open_count(), 0);
    }

    #[tokio::test]
    async fn pause_finalizes_and_resume_opens_exactly_one() {
        let store = Arc::new(MemoryLocalStore::default());
        let mut recorder = started(&store, ctx("Code", "main.rs")).await;

        let pairs = [
            (Signal::ScreenLocked, Signal::ScreenUnlocked),
            (Signal::SystemSleep, Signal::SystemWake),
            (Signal::IdleTimeout, Signal::UserInput),
        ];
        for (round, (pause, resume)) in pairs.into_iter().enumerate() {
            let base = round as i64 * 60_000;
            let before = store.closed().len();
            recorder.handle_signal(pause, t(base + 10_000)).await.unwrap();
            assert!(recorder.state().is_paused());
            assert!(recorder.open_session().is_none());
            assert_eq!(store.closed().len(), before + 1);
            assert_eq!(store.open_count(), 0);

            assert_eq!(
                recorder
                    .apply_sample(Ok(ctx("Code", "main.rs")), t(base + 11_000))
                    .await
                    .unwrap(),
                SampleOutcome::Ignored
            );

            let action = recorder.handle_signal(resume, t(base + 20_000)).await.unwrap();
            assert_eq!(action, Action::OpenFresh);
            recorder
                .apply_sample(Ok(ctx("Code", "main.rs")), t(base + 20_000))
                .await
                .unwrap();
            assert_eq!(store.open_count(), 1);
        }

        assert!(store.closed().iter().all(|s| s.has_consistent_duration()));
    }

    #[tokio::test]
    async fn idle_after_quiet_input() {
        let store = Arc::new(MemoryLocalStore::default());
        let mut recorder = started(&store, ctx("Code", "main.rs")).await;

        recorder.handle_signal(Signal::UserInput, t(30_000)).await.unwrap();
        assert!(!recorder.poll_idle(t(90_000)).await.unwrap());
        assert!(recorder.poll_idle(t(90_001)).await.unwrap());
        assert_eq!(recorder.state(), CaptureState::Idle);
        assert_eq!(store.closed()[0].end_time, t(90_001));
    }

    #[tokio::test]
    async fn stop_closes_open_session() {
        let store = Arc::new(MemoryLocalStore::default());
        let mut recorder = started(&store, ctx("Code", "main.rs")).await;
        recorder.stop(t(4_000)).await.unwrap();

        assert_eq!(recorder.state(), CaptureState::Stopped);
        assert_eq!(recorder.next_sample_in(t(4_000)), None);
        assert_eq!(store.closed().len(), 1);
        assert_eq!(store.open_count(), 0);
    }

    #[tokio::test]
    async fn start_times_strictly_increase() {
        let store = Arc::new(MemoryLocalStore::default());
        let mut recorder = started(&store, ctx("A", "a")).await;

        recorder.apply_sample(Ok(ctx("B", "b")), t(0)).await.unwrap();
        recorder.apply_sample(Ok(ctx("C", "c")), t(0)).await.unwrap();
        recorder.stop(t(0)).await.unwrap();

        let mut starts: Vec<_> = store.closed().iter().map(|s| s.start_time).collect();
        let sorted = {
            let mut copy = starts.clone();
            copy.sort();
            copy.dedup();
            copy
        };
        starts.sort();
        assert_eq!(starts, sorted);
        assert_eq!(starts.len(), 3);
    }

    #[tokio::test]
    async fn restart_with_clock_set_back_stays_above_watermark() {
        let store = Arc::new(MemoryLocalStore::default());
        let mut first = SessionRecorder::new(store.clone(), CaptureConfig::default());
        first.start(t(100_000)).await.unwrap();
        first.apply_sample(Ok(ctx("Code", "main.rs")), t(100_000)).await.unwrap();
        first.stop(t(200_000)).await.unwrap();
        store.save_watermark(t(100_000)).await.unwrap();

        // Restart after the wall clock was stepped back by almost a minute.
        let mut second = SessionRecorder::restore(store.clone(), CaptureConfig::default())
            .await
            .unwrap();
        second.start(t(50_000)).await.unwrap();
        second.apply_sample(Ok(ctx("Mail", "Inbox")), t(50_000)).await.unwrap();
        second.stop(t(60_000)).await.unwrap();

        let unsynced = store.query_unsynced(store.watermark(), 10).await.unwrap();
        assert_eq!(unsynced.len(), 1);
        assert_eq!(unsynced[0].app.name, "Mail");
        assert!(unsynced[0].start_time > t(100_000));
        assert!(unsynced[0].has_consistent_duration());
    }

    #[tokio::test]
    async fn at_most_one_session_open_over_random_walk() {
        let store = Arc::new(MemoryLocalStore::default());
        let mut recorder = SessionRecorder::new(store.clone(), CaptureConfig::default());
        recorder.start(t(0)).await.unwrap();

        let apps = ["Code", "Slack", "Safari"];
        let signals = [
            Signal::UserInput,
            Signal::ScreenLocked,
            Signal::ScreenUnlocked,
            Signal::AppChanged,
            Signal::SystemSleep,
            Signal::SystemWake,
        ];
        for step in 0..200i64 {
            let now = t(step * 700);
            if step % 5 == 0 {
                let signal = signals[(step as usize / 5) % signals.len()];
                recorder.handle_signal(signal, now).await.unwrap();
            }
            let app = apps[(step as usize * 7 / 3) % apps.len()];
            let title = if step % 4 == 0 { "one" } else { "two" };
            recorder.apply_sample(Ok(ctx(app, title)), now).await.unwrap();
            assert!(store.open_count() <= 1, "step {step}");
        }

        assert!(store.closed().iter().all(|s| s.has_consistent_duration()));
    }
}

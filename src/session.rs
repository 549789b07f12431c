use crate::error::TransportError;
use crate::model::{BirdRecord, MediaAsset, MediaKind};
use crate::retry::RetryPolicy;
use crate::settings::{Preferences, QuietHours};
use crate::transport::TransportClient;
use anyhow::Result;
use async_trait::async_trait;
use chrono::Timelike;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Instant, sleep_until};
use tracing::{debug, warn};

/// How long a hidden tab keeps its live video element before it is torn
/// down to release memory.
pub const HIDDEN_UNLOAD_GRACE: Duration = Duration::from_secs(30);

/// Volume ramp: fade from silence to the configured level in fixed steps.
pub const FADE_STEP_INTERVAL: Duration = Duration::from_millis(50);
pub const FADE_STEPS: u32 = 10;

/// Transient pause indicator lifetime.
pub const PAUSE_INDICATOR_FADE: Duration = Duration::from_millis(1500);

/// Poster image loads get three attempts with a fixed delay, then give up
/// silently. Video gets no retry at all: the image is its cheap substitute.
pub const IMAGE_RETRY: RetryPolicy = RetryPolicy::new(3, Duration::from_secs(2));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaSessionState {
    Idle,
    Loading,
    ReadyPaused,
    Playing,
    Buffering,
    Ended,
    Unloaded,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackMode {
    Video,
    ImageAudio,
}

/// Callbacks from the live media element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaEvent {
    CanPlay,
    Playing,
    Waiting,
    Ended,
    Failed { message: String },
}

/// The live audio/video element. Implementations emit `MediaEvent`s on the
/// sender handed to `MediaBackend::create`; dropping the element releases
/// its resources.
pub trait MediaElement: Send {
    fn kind(&self) -> MediaKind;
    fn load(&mut self, url: &str);
    fn play(&mut self);
    fn pause(&mut self);
    fn seek_start(&mut self);
    fn set_volume(&mut self, volume: f32);
    fn set_muted(&mut self, muted: bool);
}

pub trait MediaBackend: Send + Sync {
    fn create(
        &self,
        kind: MediaKind,
        events: mpsc::UnboundedSender<MediaEvent>,
    ) -> Box<dyn MediaElement>;
}

/// Poster image loading seam; success means the bytes rendered.
#[async_trait]
pub trait ImageLoader: Send + Sync {
    async fn load(&self, url: &str) -> Result<()>;
}

/// Commands from the surrounding UI chrome.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionCommand {
    Start(BirdRecord),
    Play,
    Pause,
    ToggleMute,
    SetVolume(f32),
    ToggleMode,
    VisibilityChanged { visible: bool },
    Shutdown,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    StateChanged(MediaSessionState),
    ModeChanged(PlaybackMode),
    VideoDisabled { message: String },
    PosterFailed,
}

/// Transient indicator label. A stall before the first successful playback
/// is "initial loading", never "buffering".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Indicator {
    InitialLoading,
    Buffering,
    Paused,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Credits {
    pub contributor: String,
    pub contributor_url: String,
    pub kind: MediaKind,
}

/// Everything the page chrome renders, recomputed from session state on
/// demand rather than tracked as separate flags.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionView {
    pub state: MediaSessionState,
    pub mode: PlaybackMode,
    pub poster_visible: bool,
    pub controls_visible: bool,
    pub progress_visible: bool,
    pub indicator: Option<Indicator>,
    pub credits: Option<Credits>,
}

enum InternalEvent {
    Resolved {
        generation: u64,
        kind: MediaKind,
        result: Result<MediaAsset, TransportError>,
    },
    PosterLoaded(bool),
}

struct FadeRamp {
    applied: f32,
    step: f32,
    next_at: Instant,
}

/// Foreground owner of playback: one object per page load, holding the
/// media element, the visibility/unload countdown and the mode toggling
/// logic. Never persisted.
pub struct MediaSession {
    backend: Arc<dyn MediaBackend>,
    images: Arc<dyn ImageLoader>,
    client: TransportClient,

    record: Option<BirdRecord>,
    state: MediaSessionState,
    mode: PlaybackMode,
    has_played: bool,
    video_disabled: bool,
    poster_loaded: Option<bool>,

    element: Option<Box<dyn MediaElement>>,
    visible: bool,
    resume_on_show: bool,
    pending_user_play: bool,

    autoplay: bool,
    quiet_hours: Option<QuietHours>,
    prefer_video: bool,
    muted: bool,
    volume: f32,

    // Supersede stale on-demand resolutions: bumped on every mode toggle
    // and record start, compared once when a result arrives.
    mode_generation: u64,

    fade: Option<FadeRamp>,
    unload_at: Option<Instant>,
    pause_indicator_until: Option<Instant>,

    // Receiver half of the current element's private event channel; replaced
    // together with the element so stale callbacks are dropped with it.
    media_rx: Option<mpsc::UnboundedReceiver<MediaEvent>>,
    internal_tx: mpsc::UnboundedSender<InternalEvent>,
    internal_rx: mpsc::UnboundedReceiver<InternalEvent>,
    event_tx: Option<mpsc::UnboundedSender<SessionEvent>>,
}

impl MediaSession {
    pub fn new(
        backend: Arc<dyn MediaBackend>,
        images: Arc<dyn ImageLoader>,
        client: TransportClient,
        prefs: &Preferences,
        event_tx: Option<mpsc::UnboundedSender<SessionEvent>>,
    ) -> Self {
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        Self {
            backend,
            images,
            client,
            record: None,
            state: MediaSessionState::Idle,
            mode: PlaybackMode::ImageAudio,
            has_played: false,
            video_disabled: false,
            poster_loaded: None,
            element: None,
            visible: true,
            resume_on_show: false,
            pending_user_play: false,
            autoplay: prefs.autoplay,
            quiet_hours: prefs.quiet_hours,
            prefer_video: prefs.video_mode,
            muted: prefs.muted,
            volume: prefs.volume,
            mode_generation: 0,
            fade: None,
            unload_at: None,
            pause_indicator_until: None,
            media_rx: None,
            internal_tx,
            internal_rx,
            event_tx,
        }
    }

    pub fn state(&self) -> MediaSessionState {
        self.state
    }

    pub fn mode(&self) -> PlaybackMode {
        self.mode
    }

    /// Event loop: commands, element callbacks, late resolution results and
    /// the three cancellable timers. Runs until `Shutdown` or the command
    /// channel closes.
    pub async fn run(mut self, mut commands: mpsc::UnboundedReceiver<SessionCommand>) {
        loop {
            let unload_at = self.unload_at.unwrap_or_else(far_future);
            let fade_at = self
                .fade
                .as_ref()
                .map(|f| f.next_at)
                .unwrap_or_else(far_future);
            let indicator_at = self.pause_indicator_until.unwrap_or_else(far_future);

            tokio::select! {
                cmd = commands.recv() => match cmd {
                    None | Some(SessionCommand::Shutdown) => break,
                    Some(cmd) => self.handle_command(cmd),
                },
                event = recv_media(&mut self.media_rx) => {
                    match event {
                        Some(event) => self.handle_media_event(event),
                        None => self.media_rx = None,
                    }
                }
                event = self.internal_rx.recv() => {
                    if let Some(event) = event {
                        self.handle_internal(event);
                    }
                }
                _ = sleep_until(unload_at), if self.unload_at.is_some() => {
                    self.unload_now();
                }
                _ = sleep_until(fade_at), if self.fade.is_some() => {
                    self.fade_step();
                }
                _ = sleep_until(indicator_at), if self.pause_indicator_until.is_some() => {
                    self.pause_indicator_until = None;
                }
            }
        }
    }

    pub fn handle_command(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::Start(record) => self.start(record),
            SessionCommand::Play => self.play(),
            SessionCommand::Pause => self.pause(true),
            SessionCommand::ToggleMute => self.toggle_mute(),
            SessionCommand::SetVolume(volume) => self.set_volume(volume),
            SessionCommand::ToggleMode => self.toggle_mode(),
            SessionCommand::VisibilityChanged { visible } => self.visibility_changed(visible),
            SessionCommand::Shutdown => {}
        }
    }

    fn start(&mut self, record: BirdRecord) {
        self.mode_generation += 1;
        self.drop_element();
        self.cancel_timers();
        self.has_played = false;
        self.video_disabled = false;
        self.resume_on_show = false;
        self.pending_user_play = false;
        self.poster_loaded = None;

        self.spawn_poster_load(record.image.url.clone());

        let start_in_video = self.prefer_video && record.video.is_some();
        self.record = Some(record);
        self.set_mode(if start_in_video {
            PlaybackMode::Video
        } else {
            PlaybackMode::ImageAudio
        });
        self.begin_load();
    }

    fn begin_load(&mut self) {
        let asset = match (&self.record, self.mode) {
            (None, _) => return,
            (Some(record), PlaybackMode::Video) => record.video.clone(),
            (Some(record), PlaybackMode::ImageAudio) => record.audio.clone(),
        };
        match (self.mode, asset) {
            (PlaybackMode::Video, None) => {
                // Asset still being resolved on demand.
                self.set_state(MediaSessionState::Loading);
            }
            (PlaybackMode::Video, Some(video)) => {
                self.create_element(MediaKind::Video, &video.url);
                self.set_state(MediaSessionState::Loading);
            }
            (PlaybackMode::ImageAudio, Some(audio)) => {
                self.create_element(MediaKind::Audio, &audio.url);
                self.set_state(MediaSessionState::Loading);
            }
            (PlaybackMode::ImageAudio, None) => {
                // Image only: nothing to play, controls stay hidden.
                self.drop_element();
                self.set_state(MediaSessionState::ReadyPaused);
            }
        }
    }

    /// Each element gets a private event channel. Replacing the element
    /// replaces the receiver too, so anything a torn-down element queued can
    /// never be attributed to its successor.
    fn create_element(&mut self, kind: MediaKind, url: &str) {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut element = self.backend.create(kind, tx);
        element.set_muted(self.muted);
        element.load(url);
        self.element = Some(element);
        self.media_rx = Some(rx);
    }

    fn drop_element(&mut self) {
        self.element = None;
        self.media_rx = None;
    }

    fn play(&mut self) {
        match self.state {
            MediaSessionState::Unloaded => {
                // Explicit user action reconstructs the destroyed element;
                // the ready/playable sequence runs again from the top.
                self.pending_user_play = true;
                self.begin_load();
            }
            MediaSessionState::ReadyPaused | MediaSessionState::Ended => {
                self.start_playback();
            }
            _ => {}
        }
    }

    fn start_playback(&mut self) {
        let muted = self.muted;
        if let Some(element) = self.element.as_mut() {
            element.set_muted(muted);
            if !muted {
                element.set_volume(0.0);
            }
            element.play();
        }
    }

    fn pause(&mut self, user_initiated: bool) {
        if !matches!(
            self.state,
            MediaSessionState::Playing | MediaSessionState::Buffering
        ) {
            return;
        }
        if let Some(element) = self.element.as_mut() {
            element.pause();
        }
        self.fade = None;
        self.set_state(MediaSessionState::ReadyPaused);
        if user_initiated {
            self.pause_indicator_until = Some(Instant::now() + PAUSE_INDICATOR_FADE);
        }
    }

    fn toggle_mute(&mut self) {
        self.muted = !self.muted;
        let muted = self.muted;
        let volume = self.volume;
        if let Some(element) = self.element.as_mut() {
            element.set_muted(muted);
            if !muted {
                element.set_volume(volume);
            }
        }
        if muted {
            self.fade = None;
        }
    }

    fn set_volume(&mut self, volume: f32) {
        self.volume = volume.clamp(0.0, 1.0);
        let target = self.volume;
        if self.fade.is_none()
            && let Some(element) = self.element.as_mut()
        {
            element.set_volume(target);
        }
    }

    fn toggle_mode(&mut self) {
        match self.mode {
            PlaybackMode::Video => self.switch_to_image_audio(),
            PlaybackMode::ImageAudio => self.switch_to_video(),
        }
    }

    fn switch_to_video(&mut self) {
        if self.video_disabled {
            debug!("video surface disabled for this session, staying on image");
            return;
        }
        let has_video = match &self.record {
            Some(record) => record.video.is_some(),
            None => return,
        };
        self.mode_generation += 1;
        self.drop_element();
        self.cancel_timers();
        self.resume_on_show = false;
        self.pending_user_play = false;
        self.has_played = false;
        self.set_mode(PlaybackMode::Video);

        if has_video {
            self.begin_load();
        } else {
            self.set_state(MediaSessionState::Loading);
            self.spawn_resolution(MediaKind::Video);
        }
    }

    fn switch_to_image_audio(&mut self) {
        let has_audio = match &self.record {
            Some(record) => record.audio.is_some(),
            None => return,
        };
        self.mode_generation += 1;
        self.drop_element();
        self.cancel_timers();
        self.resume_on_show = false;
        self.pending_user_play = false;
        self.has_played = false;
        self.set_mode(PlaybackMode::ImageAudio);

        if has_audio {
            self.begin_load();
        } else {
            self.set_state(MediaSessionState::Loading);
            self.spawn_resolution(MediaKind::Audio);
        }
    }

    fn spawn_resolution(&self, kind: MediaKind) {
        let Some(record) = &self.record else {
            return;
        };
        let key = record.species_key();
        let generation = self.mode_generation;
        let client = self.client.clone();
        let tx = self.internal_tx.clone();
        tokio::spawn(async move {
            let result = match kind {
                MediaKind::Video => client.resolve_video(key).await,
                MediaKind::Audio => client.resolve_audio(key).await,
                MediaKind::Photo => unreachable!("photos are never resolved on demand"),
            };
            let _ = tx.send(InternalEvent::Resolved {
                generation,
                kind,
                result,
            });
        });
    }

    fn spawn_poster_load(&self, url: String) {
        let images = self.images.clone();
        let tx = self.internal_tx.clone();
        tokio::spawn(async move {
            let loaded = IMAGE_RETRY
                .run(|attempt| {
                    let images = images.clone();
                    let url = url.clone();
                    async move {
                        images.load(&url).await.inspect_err(|err| {
                            debug!(attempt, "poster load failed: {err:#}");
                        })
                    }
                })
                .await
                .is_ok();
            let _ = tx.send(InternalEvent::PosterLoaded(loaded));
        });
    }

    fn visibility_changed(&mut self, visible: bool) {
        if visible == self.visible {
            return;
        }
        self.visible = visible;

        if !visible {
            self.resume_on_show = matches!(
                self.state,
                MediaSessionState::Playing | MediaSessionState::Buffering
            );
            self.pause(false);
            if self.mode == PlaybackMode::Video && self.element.is_some() {
                self.unload_at = Some(Instant::now() + HIDDEN_UNLOAD_GRACE);
            }
        } else {
            // Back before the grace period: the countdown dies, the element
            // survives and playback resumes in place.
            self.unload_at = None;
            if self.resume_on_show {
                self.resume_on_show = false;
                if self.element.is_some() {
                    self.start_playback();
                }
            }
        }
    }

    fn unload_now(&mut self) {
        self.unload_at = None;
        self.fade = None;
        self.resume_on_show = false;
        self.drop_element();
        // The next element starts from scratch: a failure during
        // reconstruction is a real failure, not an ignorable blip.
        self.has_played = false;
        self.set_state(MediaSessionState::Unloaded);
    }

    fn fade_step(&mut self) {
        let volume = self.volume;
        let Some(fade) = self.fade.as_mut() else {
            return;
        };
        fade.applied = (fade.applied + fade.step).min(volume);
        let applied = fade.applied;
        let done = applied >= volume;
        fade.next_at = Instant::now() + FADE_STEP_INTERVAL;
        if let Some(element) = self.element.as_mut() {
            element.set_volume(applied);
        }
        if done {
            self.fade = None;
        }
    }

    fn begin_fade(&mut self) {
        if self.muted || self.volume <= 0.0 {
            return;
        }
        self.fade = Some(FadeRamp {
            applied: 0.0,
            step: self.volume / FADE_STEPS as f32,
            next_at: Instant::now() + FADE_STEP_INTERVAL,
        });
    }

    pub fn handle_media_event(&mut self, event: MediaEvent) {
        if self.element.is_none() {
            debug!(?event, "media event after element teardown, ignoring");
            return;
        }
        match event {
            MediaEvent::CanPlay => {
                if self.state == MediaSessionState::Loading {
                    self.set_state(MediaSessionState::ReadyPaused);
                    if self.pending_user_play {
                        self.pending_user_play = false;
                        self.start_playback();
                    } else if self.autoplay_allowed(chrono::Local::now().hour()) {
                        self.start_playback();
                    }
                }
            }
            MediaEvent::Playing => {
                self.has_played = true;
                self.pause_indicator_until = None;
                self.set_state(MediaSessionState::Playing);
                if self.fade.is_none() {
                    self.begin_fade();
                }
            }
            MediaEvent::Waiting => {
                if self.state == MediaSessionState::Playing {
                    // Surfaced as "buffering" only after playback has worked
                    // once; the view labels earlier stalls as initial loading.
                    self.set_state(MediaSessionState::Buffering);
                }
            }
            MediaEvent::Ended => self.handle_ended(),
            MediaEvent::Failed { message } => self.handle_failure(message),
        }
    }

    fn handle_ended(&mut self) {
        match self.mode {
            PlaybackMode::Video => {
                // Ended is transient for video: reset position and loop.
                self.set_state(MediaSessionState::Ended);
                if let Some(element) = self.element.as_mut() {
                    element.seek_start();
                    element.play();
                }
            }
            PlaybackMode::ImageAudio => {
                if let Some(element) = self.element.as_mut() {
                    element.seek_start();
                }
                self.fade = None;
                self.set_state(MediaSessionState::ReadyPaused);
            }
        }
    }

    fn handle_failure(&mut self, message: String) {
        if self.has_played {
            // A blip after successful playback is ignorable.
            debug!("media error after successful playback, ignoring: {message}");
            return;
        }
        match self.mode {
            PlaybackMode::Video => {
                warn!("video never loaded, falling back to image: {message}");
                self.video_disabled = true;
                self.mode_generation += 1;
                self.drop_element();
                self.cancel_timers();
                self.send_event(SessionEvent::VideoDisabled { message });
                self.set_mode(PlaybackMode::ImageAudio);
                self.begin_load();
            }
            PlaybackMode::ImageAudio => {
                warn!("audio failed to load: {message}");
                self.drop_element();
                self.cancel_timers();
                self.set_state(MediaSessionState::Error);
            }
        }
    }

    fn handle_internal(&mut self, event: InternalEvent) {
        match event {
            InternalEvent::Resolved {
                generation,
                kind,
                result,
            } => self.handle_resolution(generation, kind, result),
            InternalEvent::PosterLoaded(loaded) => {
                self.poster_loaded = Some(loaded);
                if !loaded {
                    self.send_event(SessionEvent::PosterFailed);
                }
            }
        }
    }

    fn handle_resolution(
        &mut self,
        generation: u64,
        kind: MediaKind,
        result: Result<MediaAsset, TransportError>,
    ) {
        if generation != self.mode_generation {
            debug!(%kind, "discarding stale on-demand resolution");
            return;
        }
        if self.record.is_none() {
            return;
        }
        match (kind, result) {
            (MediaKind::Video, Ok(asset)) => {
                if let Some(record) = self.record.as_mut() {
                    record.attach_video(asset);
                }
                self.begin_load();
            }
            (MediaKind::Audio, Ok(asset)) => {
                if let Some(record) = self.record.as_mut() {
                    record.attach_audio(asset);
                }
                self.begin_load();
            }
            (MediaKind::Video, Err(err)) => {
                warn!("on-demand video resolution failed: {err}");
                self.set_mode(PlaybackMode::ImageAudio);
                self.begin_load();
            }
            (MediaKind::Audio, Err(err)) => {
                warn!("on-demand audio resolution failed: {err}");
                self.set_state(MediaSessionState::ReadyPaused);
            }
            (MediaKind::Photo, _) => {}
        }
    }

    fn autoplay_allowed(&self, hour: u32) -> bool {
        if !self.autoplay {
            return false;
        }
        match self.quiet_hours {
            Some(window) => !window.contains(hour),
            None => true,
        }
    }

    /// Recomputed from (state, mode, record); no independent booleans.
    pub fn view(&self) -> SessionView {
        let record = self.record.as_ref();
        let playing_video = self.mode == PlaybackMode::Video
            && matches!(
                self.state,
                MediaSessionState::Playing | MediaSessionState::Buffering | MediaSessionState::Ended
            );

        let controls_visible = match self.mode {
            PlaybackMode::Video => record.is_some_and(|r| r.video.is_some()) && !self.video_disabled,
            PlaybackMode::ImageAudio => record.is_some_and(|r| r.audio.is_some()),
        };

        let indicator = match self.state {
            MediaSessionState::Loading => Some(Indicator::InitialLoading),
            MediaSessionState::Buffering => {
                if self.has_played {
                    Some(Indicator::Buffering)
                } else {
                    Some(Indicator::InitialLoading)
                }
            }
            MediaSessionState::ReadyPaused if self.pause_indicator_until.is_some() => {
                Some(Indicator::Paused)
            }
            _ => None,
        };

        let credits = record.and_then(|r| {
            if self.mode == PlaybackMode::Video
                && !self.video_disabled
                && r.video.is_some()
            {
                r.video.as_ref().map(|v| Credits {
                    contributor: v.contributor.clone(),
                    contributor_url: v.contributor_url.clone(),
                    kind: MediaKind::Video,
                })
            } else {
                Some(Credits {
                    contributor: r.image.contributor.clone(),
                    contributor_url: r.image.contributor_url.clone(),
                    kind: MediaKind::Photo,
                })
            }
        });

        SessionView {
            state: self.state,
            mode: self.mode,
            poster_visible: !playing_video && self.poster_loaded != Some(false),
            controls_visible,
            progress_visible: matches!(
                self.state,
                MediaSessionState::Loading | MediaSessionState::Buffering
            ),
            indicator,
            credits,
        }
    }

    fn cancel_timers(&mut self) {
        self.fade = None;
        self.unload_at = None;
        self.pause_indicator_until = None;
    }

    fn set_state(&mut self, state: MediaSessionState) {
        if self.state != state {
            self.state = state;
            self.send_event(SessionEvent::StateChanged(state));
        }
    }

    fn set_mode(&mut self, mode: PlaybackMode) {
        if self.mode != mode {
            self.mode = mode;
            self.send_event(SessionEvent::ModeChanged(mode));
        }
    }

    fn send_event(&self, event: SessionEvent) {
        if let Some(tx) = &self.event_tx {
            let _ = tx.send(event);
        }
    }
}

fn far_future() -> Instant {
    Instant::now() + Duration::from_secs(60 * 60 * 24 * 365)
}

async fn recv_media(rx: &mut Option<mpsc::UnboundedReceiver<MediaEvent>>) -> Option<MediaEvent> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

//! Playback engine
//!
//! The `PlaybackEngine` exclusively owns the single media resource. It is
//! the only place transport state changes, the only writer of the volume
//! and loop preferences, and it decides whether an end-of-media is handled
//! locally (loop one) or surfaced to the coordinator.

use std::sync::Arc;
use std::time::Duration;

use crate::media::{ MediaBackend, MediaError, MediaEvent };
use crate::playlist::LoopMode;
use crate::prefs::Preferences;
use crate::track::Track;
use crate::visualizer::{ NoopVisualizer, Visualizer };


/// Published transport state.
#[derive( Debug, Clone )]
pub struct PlaybackSnapshot {
    pub is_playing: bool,
    pub current_track: Option<Arc<Track>>,
    pub loop_mode: LoopMode,
    pub volume: f32,
    pub is_muted: bool,
}


/// Notification sent synchronously on every transport transition.
#[derive( Debug, Clone )]
pub enum StateChange {
    Transport {
        is_playing: bool,
        current_track: Option<Arc<Track>>,
        loop_mode: LoopMode,
    },
    Volume {
        is_playing: bool,
        current_track: Option<Arc<Track>>,
        volume: f32,
        is_muted: bool,
    },
}


/// Receives engine state changes.
pub trait PlaybackObserver: Send + Sync {
    fn state_changed( &self, change: &StateChange );

    /// A load or play attempt failed; the engine is stopped but usable.
    fn playback_failed( &self, _track: Option<&Track>, _error: &MediaError ) {}
}


/// Observer that ignores everything.
#[derive( Debug, Default, Clone, Copy )]
pub struct NoopObserver;


impl PlaybackObserver for NoopObserver {
    fn state_changed( &self, _change: &StateChange ) {}
}


/// Events surfaced to the coordinator.
#[derive( Debug, Clone, PartialEq )]
pub enum EngineEvent {
    /// The current track finished and loop mode did not repeat it.
    TrackEnded,

    /// Playback progress; `duration` is `None` while unknown.
    TimeUpdated { position: Duration, duration: Option<Duration> },
}


/// Transport over the single media resource.
pub struct PlaybackEngine {
    media: Box<dyn MediaBackend>,
    prefs: Preferences,
    observer: Arc<dyn PlaybackObserver>,
    visualizer: Arc<dyn Visualizer>,
    current_track: Option<Arc<Track>>,
    /// True after `stop()`; hides the loaded track from snapshots.
    stopped: bool,
    is_playing: bool,
    loop_mode: LoopMode,
    volume: f32,
    muted: bool,
    seeking: bool,
}


impl PlaybackEngine {
    /// Creates an engine with volume and loop mode restored from `prefs`.
    pub fn new(
        mut media: Box<dyn MediaBackend>,
        prefs: Preferences,
        observer: Arc<dyn PlaybackObserver>,
    ) -> Self {
        let volume = prefs.volume();
        let loop_mode = prefs.loop_mode();
        media.set_volume( volume );
        media.set_muted( false );

        Self {
            media,
            prefs,
            observer,
            visualizer: Arc::new( NoopVisualizer ),
            current_track: None,
            stopped: false,
            is_playing: false,
            loop_mode,
            volume,
            muted: false,
            seeking: false,
        }
    }


    /// Attaches the visualizer driven by play/pause/stop.
    pub fn with_visualizer( mut self, visualizer: Arc<dyn Visualizer> ) -> Self {
        self.visualizer = visualizer;
        self
    }


    /// Binds the media resource to `track` and starts playing it.
    ///
    /// Failures are reported to the observer, never returned.
    pub fn load( &mut self, track: Arc<Track> ) {
        tracing::info!( "Loading track {} ({:?})", track.id(), track.source() );
        self.current_track = Some( Arc::clone( &track ) );
        self.stopped = false;
        self.is_playing = false;

        match self.media.load( track.source() ) {
            Ok(()) => self.play(),
            Err( e ) => self.fail( e ),
        }
    }


    /// Starts or resumes playback of the loaded track.
    pub fn play( &mut self ) {
        if self.current_track.is_none() {
            return;
        }

        if let Err( e ) = self.media.play() {
            self.fail( e );
            return;
        }

        self.is_playing = true;
        self.stopped = false;
        self.visualizer.start();
        tracing::info!( "Playing" );
        self.notify_transport();
    }


    pub fn pause( &mut self ) {
        self.is_playing = false;
        self.media.pause();
        self.visualizer.stop();
        tracing::info!( "Paused" );
        self.notify_transport();
    }


    /// Pauses, rewinds to the start and hides the track from the published state.
    pub fn stop( &mut self ) {
        self.is_playing = false;
        self.media.pause();
        if self.current_track.is_some() {
            if let Err( e ) = self.media.seek( Duration::ZERO ) {
                tracing::warn!( "Failed to rewind on stop: {}", e );
            }
        }
        self.stopped = true;
        self.visualizer.stop();
        tracing::info!( "Stopped" );
        self.notify_transport();
    }


    /// Pauses if playing, resumes if a track is loaded, otherwise does nothing.
    pub fn toggle_play_pause( &mut self ) {
        if self.is_playing {
            self.pause();
        } else if self.current_track.is_some() {
            self.play();
        }
    }


    /// Seeks to `percentage` (0-100) of the track. No-op while the duration is unknown.
    pub fn seek( &mut self, percentage: f64 ) {
        let Some( duration ) = self.media.duration() else {
            tracing::debug!( "Seek ignored: duration unknown" );
            return;
        };
        if percentage.is_nan() {
            return;
        }

        let target = duration.mul_f64( percentage.clamp( 0.0, 100.0 ) / 100.0 );
        if let Err( e ) = self.media.seek( target ) {
            self.fail( e );
        }
    }


    /// Marks a seek gesture as in progress; progress ticks are withheld meanwhile.
    pub fn set_seeking( &mut self, seeking: bool ) {
        self.seeking = seeking;
    }


    /// Sets the volume (clamped to 0.0..=1.0). Zero mutes, anything else unmutes.
    pub fn set_volume( &mut self, volume: f32 ) {
        let volume = if volume.is_finite() { volume.clamp( 0.0, 1.0 ) } else { 0.0 };
        self.volume = volume;
        self.muted = volume == 0.0;
        self.media.set_volume( volume );
        self.media.set_muted( self.muted );
        self.prefs.set_volume( volume );
        self.notify_volume();
    }


    pub fn toggle_mute( &mut self ) {
        self.muted = !self.muted;
        self.media.set_muted( self.muted );
        self.prefs.set_volume( if self.muted { 0.0 } else { self.volume } );
        self.notify_volume();
    }


    /// Advances the loop mode through `none → all → one → none`.
    pub fn toggle_loop( &mut self ) {
        self.loop_mode = self.loop_mode.next();
        self.prefs.set_loop_mode( self.loop_mode );
        tracing::info!( "Loop mode: {}", self.loop_mode.name() );
        self.notify_transport();
    }


    pub fn loop_mode( &self ) -> LoopMode {
        self.loop_mode
    }


    /// The most recently loaded track, even after `stop()`.
    pub fn current_track( &self ) -> Option<&Arc<Track>> {
        self.current_track.as_ref()
    }


    pub fn is_playing( &self ) -> bool {
        self.is_playing
    }


    pub fn volume( &self ) -> f32 {
        self.volume
    }


    pub fn is_muted( &self ) -> bool {
        self.muted
    }


    pub fn position( &self ) -> Duration {
        self.media.position()
    }


    pub fn duration( &self ) -> Option<Duration> {
        self.media.duration()
    }


    pub fn snapshot( &self ) -> PlaybackSnapshot {
        PlaybackSnapshot {
            is_playing: self.is_playing,
            current_track: self.published_track(),
            loop_mode: self.loop_mode,
            volume: self.volume,
            is_muted: self.muted,
        }
    }


    /// Drains pending media events and returns those the coordinator must act on.
    pub fn poll_events( &mut self ) -> Vec<EngineEvent> {
        let mut surfaced = Vec::new();
        while let Some( event ) = self.media.poll_event() {
            if let Some( event ) = self.handle_media_event( event ) {
                surfaced.push( event );
            }
        }
        surfaced
    }


    /// Applies one media event; returns it translated if it concerns the coordinator.
    pub fn handle_media_event( &mut self, event: MediaEvent ) -> Option<EngineEvent> {
        match event {
            MediaEvent::MetadataLoaded { duration } => {
                if let ( Some( track ), Some( d ) ) = ( self.current_track.as_ref(), duration ) {
                    track.set_duration_secs( d.as_secs_f64() );
                }
                Some( EngineEvent::TimeUpdated { position: self.media.position(), duration } )
            }
            MediaEvent::TimeUpdate { position, duration } => {
                if self.seeking {
                    None
                } else {
                    Some( EngineEvent::TimeUpdated { position, duration } )
                }
            }
            MediaEvent::Ended => {
                if self.loop_mode == LoopMode::One {
                    tracing::debug!( "Repeating current track" );
                    if let Err( e ) = self.media.seek( Duration::ZERO ) {
                        self.fail( e );
                        return None;
                    }
                    self.play();
                    None
                } else {
                    self.is_playing = false;
                    self.visualizer.stop();
                    Some( EngineEvent::TrackEnded )
                }
            }
            MediaEvent::Failed { message } => {
                self.fail( MediaError::Decode( message ) );
                None
            }
        }
    }


    fn fail( &mut self, error: MediaError ) {
        tracing::warn!( "Playback failed: {}", error );
        self.is_playing = false;
        self.visualizer.stop();
        self.observer.playback_failed( self.current_track.as_deref(), &error );
        self.notify_transport();
    }


    fn published_track( &self ) -> Option<Arc<Track>> {
        if self.stopped { None } else { self.current_track.clone() }
    }


    fn notify_transport( &self ) {
        self.observer.state_changed( &StateChange::Transport {
            is_playing: self.is_playing,
            current_track: self.published_track(),
            loop_mode: self.loop_mode,
        });
    }


    fn notify_volume( &self ) {
        self.observer.state_changed( &StateChange::Volume {
            is_playing: self.is_playing,
            current_track: self.published_track(),
            volume: self.volume,
            is_muted: self.muted,
        });
    }
}


#[cfg( test )]
mod tests {
    use super::*;
    use std::sync::atomic::{ AtomicUsize, Ordering };
    use std::sync::Mutex;

    use crate::media::fake::FakeBackend;
    use crate::prefs::{ MemoryStore, PreferenceStore, KEY_LOOP, KEY_VOLUME };


    #[derive( Default )]
    struct Recorder {
        changes: Mutex<Vec<StateChange>>,
        failures: AtomicUsize,
    }


    impl Recorder {
        fn last( &self ) -> StateChange {
            self.changes.lock().unwrap().last().cloned().expect( "no notification" )
        }


        fn count( &self ) -> usize {
            self.changes.lock().unwrap().len()
        }
    }


    impl PlaybackObserver for Recorder {
        fn state_changed( &self, change: &StateChange ) {
            self.changes.lock().unwrap().push( change.clone() );
        }


        fn playback_failed( &self, _track: Option<&Track>, _error: &MediaError ) {
            self.failures.fetch_add( 1, Ordering::Relaxed );
        }
    }


    #[derive( Default )]
    struct CountingVisualizer {
        starts: AtomicUsize,
        stops: AtomicUsize,
    }


    impl Visualizer for CountingVisualizer {
        fn start( &self ) {
            self.starts.fetch_add( 1, Ordering::Relaxed );
        }


        fn stop( &self ) {
            self.stops.fetch_add( 1, Ordering::Relaxed );
        }
    }


    struct Rig {
        engine: PlaybackEngine,
        media: FakeBackend,
        recorder: Arc<Recorder>,
        store: Arc<MemoryStore>,
        vis: Arc<CountingVisualizer>,
    }


    fn rig() -> Rig {
        let media = FakeBackend::default();
        let recorder = Arc::new( Recorder::default() );
        let store = Arc::new( MemoryStore::new() );
        let vis = Arc::new( CountingVisualizer::default() );
        let engine = PlaybackEngine::new(
            Box::new( media.clone() ),
            Preferences::new( store.clone() ),
            recorder.clone(),
        ).with_visualizer( vis.clone() );
        Rig { engine, media, recorder, store, vis }
    }


    fn track( id: &str ) -> Arc<Track> {
        Arc::new( Track::new( id, format!( "{}.mp3", id ), id, "Artist", None ) )
    }


    #[test]
    fn test_load_plays_and_notifies() {
        let mut r = rig();
        r.engine.load( track( "a" ) );

        assert!( r.engine.is_playing() );
        assert!( r.media.state().playing );
        match r.recorder.last() {
            StateChange::Transport { is_playing, current_track, loop_mode } => {
                assert!( is_playing );
                assert_eq!( current_track.unwrap().id(), "a" );
                assert_eq!( loop_mode, LoopMode::None );
            }
            other => panic!( "unexpected {:?}", other ),
        }
        assert_eq!( r.vis.starts.load( Ordering::Relaxed ), 1 );
    }


    #[test]
    fn test_load_failure_reports_without_playing() {
        let mut r = rig();
        r.media.state().fail_loads = true;
        r.engine.load( track( "bad" ) );

        assert!( !r.engine.is_playing() );
        assert_eq!( r.recorder.failures.load( Ordering::Relaxed ), 1 );
        assert!( matches!( r.recorder.last(), StateChange::Transport { is_playing: false, .. } ) );
        assert_eq!( r.vis.starts.load( Ordering::Relaxed ), 0 );
    }


    #[test]
    fn test_new_load_supersedes_previous() {
        let mut r = rig();
        r.engine.load( track( "a" ) );
        r.engine.load( track( "b" ) );
        r.engine.pause();
        r.engine.toggle_play_pause();

        assert_eq!( r.engine.current_track().unwrap().id(), "b" );
        assert_eq!( r.media.state().source.as_deref(), Some( std::path::Path::new( "b.mp3" ) ) );
        assert!( r.media.state().playing );
    }


    #[test]
    fn test_stop_rewinds_and_hides_track() {
        let mut r = rig();
        r.engine.load( track( "a" ) );
        r.media.state().position = Duration::from_secs( 42 );
        r.engine.stop();

        assert_eq!( r.media.state().position, Duration::ZERO );
        assert!( !r.media.state().playing );
        assert!( r.engine.snapshot().current_track.is_none() );
        assert_eq!( r.engine.current_track().unwrap().id(), "a" );
        assert!( matches!(
            r.recorder.last(),
            StateChange::Transport { is_playing: false, current_track: None, .. }
        ));
        assert!( r.vis.stops.load( Ordering::Relaxed ) >= 1 );
    }


    #[test]
    fn test_toggle_play_pause() {
        let mut r = rig();
        r.engine.toggle_play_pause();
        assert_eq!( r.recorder.count(), 0 );

        r.engine.load( track( "a" ) );
        r.engine.toggle_play_pause();
        assert!( !r.engine.is_playing() );
        r.engine.toggle_play_pause();
        assert!( r.engine.is_playing() );
        assert_eq!( r.vis.starts.load( Ordering::Relaxed ), 2 );
        assert_eq!( r.vis.stops.load( Ordering::Relaxed ), 1 );
    }


    #[test]
    fn test_seek_uses_percentage_of_duration() {
        let mut r = rig();
        r.engine.load( track( "a" ) );
        r.engine.seek( 50.0 );
        assert_eq!( r.media.state().position, Duration::ZERO );

        r.media.state().duration = Some( Duration::from_secs( 200 ) );
        r.engine.seek( 25.0 );
        assert_eq!( r.media.state().position, Duration::from_secs( 50 ) );
        r.engine.seek( 150.0 );
        assert_eq!( r.media.state().position, Duration::from_secs( 200 ) );
    }


    #[test]
    fn test_failed_seek_stops_playback() {
        let mut r = rig();
        r.engine.load( track( "a" ) );
        r.media.state().duration = Some( Duration::from_secs( 100 ) );
        r.media.state().fail_seeks = true;
        let stops = r.vis.stops.load( Ordering::Relaxed );

        r.engine.seek( 50.0 );

        assert!( !r.engine.is_playing() );
        assert_eq!( r.recorder.failures.load( Ordering::Relaxed ), 1 );
        assert!( matches!( r.recorder.last(), StateChange::Transport { is_playing: false, .. } ) );
        assert_eq!( r.vis.stops.load( Ordering::Relaxed ), stops + 1 );
    }


    #[test]
    fn test_volume_zero_mutes_and_positive_unmutes() {
        let mut r = rig();
        r.engine.set_volume( 0.0 );
        assert!( matches!( r.recorder.last(), StateChange::Volume { is_muted: true, .. } ) );
        assert!( r.media.state().muted );

        r.engine.set_volume( 0.6 );
        match r.recorder.last() {
            StateChange::Volume { volume, is_muted, .. } => {
                assert_eq!( volume, 0.6 );
                assert!( !is_muted );
            }
            other => panic!( "unexpected {:?}", other ),
        }
        assert_eq!( r.store.get( KEY_VOLUME ), Some( serde_json::json!( 0.6_f32 ) ) );
    }


    #[test]
    fn test_toggle_mute_persists_effective_volume() {
        let mut r = rig();
        r.engine.set_volume( 0.5 );
        r.engine.toggle_mute();
        assert!( r.engine.is_muted() );
        assert_eq!( r.store.get( KEY_VOLUME ), Some( serde_json::json!( 0.0_f32 ) ) );

        r.engine.toggle_mute();
        assert!( !r.engine.is_muted() );
        assert_eq!( r.store.get( KEY_VOLUME ), Some( serde_json::json!( 0.5_f32 ) ) );
        assert_eq!( r.engine.volume(), 0.5 );
    }


    #[test]
    fn test_toggle_loop_cycles_and_persists() {
        let mut r = rig();
        let mut seen = Vec::new();
        for _ in 0..3 {
            r.engine.toggle_loop();
            seen.push( r.engine.loop_mode() );
        }
        assert_eq!( seen, vec![ LoopMode::All, LoopMode::One, LoopMode::None ] );
        assert_eq!( r.store.get( KEY_LOOP ), Some( serde_json::json!( "none" ) ) );
    }


    #[test]
    fn test_restores_preferences() {
        let store = Arc::new( MemoryStore::new() );
        let prefs = Preferences::new( store );
        prefs.set_volume( 0.3 );
        prefs.set_loop_mode( LoopMode::All );

        let media = FakeBackend::default();
        let engine = PlaybackEngine::new( Box::new( media.clone() ), prefs, Arc::new( NoopObserver ) );
        assert_eq!( engine.volume(), 0.3 );
        assert_eq!( engine.loop_mode(), LoopMode::All );
        assert_eq!( media.state().volume, 0.3 );
    }


    #[test]
    fn test_end_with_loop_one_repeats_silently() {
        let mut r = rig();
        r.engine.load( track( "a" ) );
        r.engine.toggle_loop();
        r.engine.toggle_loop();
        assert_eq!( r.engine.loop_mode(), LoopMode::One );

        r.media.state().position = Duration::from_secs( 180 );
        r.media.push_event( MediaEvent::Ended );
        let events = r.engine.poll_events();

        assert!( events.is_empty() );
        assert_eq!( r.media.state().position, Duration::ZERO );
        assert!( r.engine.is_playing() );
        assert_eq!( r.engine.current_track().unwrap().id(), "a" );
    }


    #[test]
    fn test_end_without_loop_one_surfaces() {
        let mut r = rig();
        r.engine.load( track( "a" ) );
        r.media.push_event( MediaEvent::Ended );
        assert_eq!( r.engine.poll_events(), vec![ EngineEvent::TrackEnded ] );
    }


    #[test]
    fn test_progress_suppressed_while_seeking() {
        let mut r = rig();
        r.engine.load( track( "a" ) );
        let tick = MediaEvent::TimeUpdate {
            position: Duration::from_secs( 1 ),
            duration: Some( Duration::from_secs( 10 ) ),
        };

        r.engine.set_seeking( true );
        r.media.push_event( tick.clone() );
        assert!( r.engine.poll_events().is_empty() );

        r.engine.set_seeking( false );
        r.media.push_event( tick );
        assert_eq!( r.engine.poll_events(), vec![ EngineEvent::TimeUpdated {
            position: Duration::from_secs( 1 ),
            duration: Some( Duration::from_secs( 10 ) ),
        }]);
    }


    #[test]
    fn test_metadata_sets_duration_even_while_seeking() {
        let mut r = rig();
        let t = track( "a" );
        r.engine.load( Arc::clone( &t ) );
        r.engine.set_seeking( true );
        r.media.push_event( MediaEvent::MetadataLoaded { duration: Some( Duration::from_secs( 90 ) ) } );

        let events = r.engine.poll_events();
        assert_eq!( events.len(), 1 );
        assert_eq!( t.duration_secs(), 90.0 );
    }


    #[test]
    fn test_late_failure_stops_playback() {
        let mut r = rig();
        r.engine.load( track( "a" ) );
        r.media.push_event( MediaEvent::Failed { message: "corrupt frame".into() } );
        assert!( r.engine.poll_events().is_empty() );
        assert!( !r.engine.is_playing() );
        assert_eq!( r.recorder.failures.load( Ordering::Relaxed ), 1 );
    }
}

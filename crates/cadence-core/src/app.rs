//! Application coordinator
//!
//! Owns the playlist, the current index and the playback engine, turns
//! presentation commands into engine and playlist operations, and keeps the
//! presentation layer up to date. All coordination happens on the thread
//! that calls into the `Coordinator`; backend events are drained in `tick()`.

use std::sync::{ Arc, Mutex };
use std::time::Duration;

use crate::command::{ help_text, Command };
use crate::engine::{ EngineEvent, PlaybackEngine, PlaybackObserver, PlaybackSnapshot, StateChange };
use crate::media::{ MediaBackend, MediaError };
use crate::playlist::{ LoopMode, Playlist, PlaylistError };
use crate::prefs::{ Preferences, Theme };
use crate::track::Track;
use crate::visualizer::Visualizer;


/// Everything the presentation layer needs to draw the player.
#[derive( Debug, Clone )]
pub struct ViewState {
    pub is_playing: bool,
    pub current_track: Option<Arc<Track>>,
    pub loop_mode: LoopMode,
    pub volume: f32,
    pub is_muted: bool,
    pub is_shuffled: bool,
    /// Working order.
    pub playlist: Vec<Arc<Track>>,
    pub current_index: Option<usize>,
}


/// Presentation boundary.
pub trait Presenter: Send + Sync {
    /// Full re-render.
    fn update( &self, state: &ViewState );

    /// Progress tick. `duration` is `None` while unknown.
    fn update_progress( &self, position: Duration, duration: Option<Duration> );

    /// Indices of the working order matching the last search.
    fn show_search_results( &self, _indices: &[usize] ) {}

    /// Transient status line (errors, help).
    fn show_message( &self, _message: &str ) {}

    fn apply_theme( &self, _theme: Theme ) {}
}


#[derive( Debug, Default )]
struct QueueView {
    playlist: Vec<Arc<Track>>,
    current_index: Option<usize>,
    is_shuffled: bool,
}


/// Engine observer that composes engine state with the coordinator's
/// queue and forwards full view states to the presenter.
struct PresenterBridge {
    presenter: Arc<dyn Presenter>,
    queue: Mutex<QueueView>,
    playback: Mutex<PlaybackSnapshot>,
}


impl PresenterBridge {
    fn new( presenter: Arc<dyn Presenter>, playback: PlaybackSnapshot ) -> Self {
        Self {
            presenter,
            queue: Mutex::new( QueueView::default() ),
            playback: Mutex::new( playback ),
        }
    }


    fn set_queue( &self, playlist: &Playlist, current_index: Option<usize> ) {
        if let Ok( mut queue ) = self.queue.lock() {
            queue.playlist = playlist.tracks().to_vec();
            queue.current_index = current_index;
            queue.is_shuffled = playlist.is_shuffled();
        }
    }


    fn view_state( &self ) -> Option<ViewState> {
        let playback = self.playback.lock().ok()?.clone();
        let queue = self.queue.lock().ok()?;
        Some( ViewState {
            is_playing: playback.is_playing,
            current_track: playback.current_track,
            loop_mode: playback.loop_mode,
            volume: playback.volume,
            is_muted: playback.is_muted,
            is_shuffled: queue.is_shuffled,
            playlist: queue.playlist.clone(),
            current_index: queue.current_index,
        })
    }


    fn render( &self ) {
        // Locks are released before the presenter runs
        if let Some( state ) = self.view_state() {
            self.presenter.update( &state );
        }
    }
}


impl PlaybackObserver for PresenterBridge {
    fn state_changed( &self, change: &StateChange ) {
        if let Ok( mut playback ) = self.playback.lock() {
            match change {
                StateChange::Transport { is_playing, current_track, loop_mode } => {
                    playback.is_playing = *is_playing;
                    playback.current_track = current_track.clone();
                    playback.loop_mode = *loop_mode;
                }
                StateChange::Volume { is_playing, current_track, volume, is_muted } => {
                    playback.is_playing = *is_playing;
                    playback.current_track = current_track.clone();
                    playback.volume = *volume;
                    playback.is_muted = *is_muted;
                }
            }
        }
        self.render();
    }


    fn playback_failed( &self, track: Option<&Track>, error: &MediaError ) {
        let message = match track {
            Some( track ) => format!( "Cannot play {}: {}", track.title(), error ),
            None => format!( "Playback error: {}", error ),
        };
        self.presenter.show_message( &message );
    }
}


/// Mediates between presentation, playlist and playback engine.
pub struct Coordinator {
    engine: PlaybackEngine,
    playlist: Playlist,
    current_index: Option<usize>,
    prefs: Preferences,
    bridge: Arc<PresenterBridge>,
}


impl Coordinator {
    /// Wires up the engine and playlist for a freshly built catalog.
    ///
    /// Saved volume and loop mode configure the engine, a saved shuffle
    /// preference shuffles the catalog, and the presenter is rendered once.
    pub fn new(
        media: Box<dyn MediaBackend>,
        visualizer: Arc<dyn Visualizer>,
        prefs: Preferences,
        presenter: Arc<dyn Presenter>,
        tracks: Vec<Arc<Track>>,
    ) -> Self {
        let bridge = Arc::new( PresenterBridge::new(
            Arc::clone( &presenter ),
            PlaybackSnapshot {
                is_playing: false,
                current_track: None,
                loop_mode: prefs.loop_mode(),
                volume: prefs.volume(),
                is_muted: false,
            },
        ));

        let engine = PlaybackEngine::new( media, prefs.clone(), bridge.clone() )
            .with_visualizer( visualizer );

        let mut playlist = Playlist::new( tracks );
        if prefs.shuffle() {
            playlist.set_shuffled( true );
        }
        tracing::info!(
            "Catalog ready: {} tracks (shuffle: {}, loop: {})",
            playlist.len(),
            playlist.is_shuffled(),
            engine.loop_mode().name()
        );

        presenter.apply_theme( prefs.theme() );

        let coordinator = Self {
            engine,
            playlist,
            current_index: None,
            prefs,
            bridge,
        };
        coordinator.render();
        coordinator
    }


    /// Starts playing the track at `index` of the working order.
    pub fn select_track( &mut self, index: usize ) {
        let Some( track ) = self.playlist.get( index ).cloned() else {
            tracing::warn!( "Ignoring selection of track {} (playlist has {})", index, self.playlist.len() );
            return;
        };

        self.current_index = Some( index );
        self.bridge.set_queue( &self.playlist, self.current_index );
        self.engine.load( track );
    }


    /// Advances after the engine reports the end of a track.
    pub fn on_track_ended( &mut self ) {
        match self.playlist.next_track_index( self.current_index, self.engine.loop_mode() ) {
            Some( next ) => self.select_track( next ),
            None => {
                tracing::info!( "End of playlist" );
                self.engine.stop();
            }
        }
    }


    /// Explicit skip: always wraps at the end regardless of loop mode.
    pub fn play_next( &mut self ) {
        if let Some( next ) = self.playlist.next_track_index( self.current_index, LoopMode::All ) {
            self.select_track( next );
        }
    }


    pub fn play_prev( &mut self ) {
        let len = self.playlist.len();
        if len == 0 {
            return;
        }

        let prev = match self.current_index {
            Some( i ) => ( i + len - 1 ) % len,
            None => len - 1,
        };
        self.select_track( prev );
    }


    pub fn toggle_shuffle( &mut self ) {
        let shuffled = !self.playlist.is_shuffled();
        self.playlist.set_shuffled( shuffled );
        self.relocate_current();
        self.prefs.set_shuffle( shuffled );
        tracing::info!( "Shuffle: {}", shuffled );
        self.render();
        self.bridge.presenter.show_message( if shuffled { "Shuffle: on" } else { "Shuffle: off" } );
    }


    /// Resumes or pauses; with nothing loaded, starts the current (or first) track.
    pub fn play_pause( &mut self ) {
        if self.engine.current_track().is_some() {
            self.engine.toggle_play_pause();
        } else if !self.playlist.is_empty() {
            self.select_track( self.current_index.unwrap_or( 0 ) );
        }
    }


    /// Replaces the working order with a manual arrangement.
    pub fn reorder( &mut self, order: Vec<Arc<Track>> ) -> Result<(), PlaylistError> {
        self.playlist.reorder( order )?;
        self.relocate_current();
        self.render();
        Ok(())
    }


    pub fn move_track( &mut self, from: usize, to: usize ) -> Result<(), PlaylistError> {
        self.playlist.move_track( from, to )?;
        self.relocate_current();
        self.render();
        Ok(())
    }


    /// Filters the working order and hands the matches to the presenter.
    pub fn search( &self, term: &str ) -> Vec<usize> {
        let indices = self.playlist.filter( term );
        tracing::debug!( "Search '{}': {} matches", term, indices.len() );
        self.bridge.presenter.show_search_results( &indices );
        indices
    }


    /// Drains pending playback events and reacts to them.
    pub fn tick( &mut self ) {
        for event in self.engine.poll_events() {
            match event {
                EngineEvent::TrackEnded => self.on_track_ended(),
                EngineEvent::TimeUpdated { position, duration } => {
                    self.bridge.presenter.update_progress( position, duration );
                }
            }
        }
    }


    /// Applies a presentation command. Returns `false` when the user asked to quit.
    pub fn execute( &mut self, command: Command ) -> bool {
        tracing::debug!( "Executing {:?}", command );
        match command {
            Command::PlayPause => self.play_pause(),
            Command::Stop => self.engine.stop(),
            Command::Next => self.play_next(),
            Command::Prev => self.play_prev(),
            Command::Seek { percent } => self.engine.seek( percent ),
            Command::SetVolume { volume } => self.engine.set_volume( volume ),
            Command::ToggleMute => self.engine.toggle_mute(),
            Command::ToggleLoop => self.engine.toggle_loop(),
            Command::ToggleShuffle => self.toggle_shuffle(),
            Command::Select { index } => self.select_track( index ),
            Command::Move { from, to } => {
                if let Err( e ) = self.move_track( from, to ) {
                    self.bridge.presenter.show_message( &e.to_string() );
                }
            }
            Command::Search { term } => {
                self.search( &term );
            }
            Command::ToggleTheme => {
                let theme = self.prefs.theme().toggled();
                self.prefs.set_theme( theme );
                self.bridge.presenter.apply_theme( theme );
            }
            Command::Help => self.bridge.presenter.show_message( help_text() ),
            Command::Quit => return false,
        }
        true
    }


    pub fn set_seeking( &mut self, seeking: bool ) {
        self.engine.set_seeking( seeking );
    }


    pub fn engine( &self ) -> &PlaybackEngine {
        &self.engine
    }


    pub fn playlist( &self ) -> &Playlist {
        &self.playlist
    }


    pub fn current_index( &self ) -> Option<usize> {
        self.current_index
    }


    pub fn is_shuffled( &self ) -> bool {
        self.playlist.is_shuffled()
    }


    /// Current state as the presenter last saw it.
    pub fn view_state( &self ) -> Option<ViewState> {
        self.bridge.view_state()
    }


    fn relocate_current( &mut self ) {
        if let Some( track ) = self.engine.current_track() {
            self.current_index = self.playlist.position_of( track.id() );
        }
    }


    fn render( &self ) {
        self.bridge.set_queue( &self.playlist, self.current_index );
        self.bridge.render();
    }
}


#[cfg( test )]
mod tests {
    use super::*;
    use crate::media::fake::FakeBackend;
    use crate::media::MediaEvent;
    use crate::prefs::{ MemoryStore, PreferenceStore, KEY_SHUFFLE, KEY_THEME };
    use crate::visualizer::NoopVisualizer;


    #[derive( Default )]
    struct RecordingPresenter {
        states: Mutex<Vec<ViewState>>,
        progress: Mutex<Vec<( Duration, Option<Duration> )>>,
        results: Mutex<Vec<Vec<usize>>>,
        messages: Mutex<Vec<String>>,
        themes: Mutex<Vec<Theme>>,
    }


    impl RecordingPresenter {
        fn last( &self ) -> ViewState {
            self.states.lock().unwrap().last().cloned().expect( "never rendered" )
        }
    }


    impl Presenter for RecordingPresenter {
        fn update( &self, state: &ViewState ) {
            self.states.lock().unwrap().push( state.clone() );
        }


        fn update_progress( &self, position: Duration, duration: Option<Duration> ) {
            self.progress.lock().unwrap().push(( position, duration ));
        }


        fn show_search_results( &self, indices: &[usize] ) {
            self.results.lock().unwrap().push( indices.to_vec() );
        }


        fn show_message( &self, message: &str ) {
            self.messages.lock().unwrap().push( message.to_string() );
        }


        fn apply_theme( &self, theme: Theme ) {
            self.themes.lock().unwrap().push( theme );
        }
    }


    struct Rig {
        app: Coordinator,
        media: FakeBackend,
        presenter: Arc<RecordingPresenter>,
        store: Arc<MemoryStore>,
    }


    fn catalog( names: &[&str] ) -> Vec<Arc<Track>> {
        names
            .iter()
            .enumerate()
            .map( |( i, name )| Arc::new( Track::new(
                format!( "track-{}", i ),
                format!( "/music/{}", name ),
                crate::track::title_from_file_name( name ),
                "Artist",
                None,
            )))
            .collect()
    }


    fn rig_with( names: &[&str], store: Arc<MemoryStore> ) -> Rig {
        let media = FakeBackend::default();
        let presenter = Arc::new( RecordingPresenter::default() );
        let app = Coordinator::new(
            Box::new( media.clone() ),
            Arc::new( NoopVisualizer ),
            Preferences::new( store.clone() ),
            presenter.clone(),
            catalog( names ),
        );
        Rig { app, media, presenter, store }
    }


    fn rig( names: &[&str] ) -> Rig {
        rig_with( names, Arc::new( MemoryStore::new() ) )
    }


    #[test]
    fn test_startup_renders_once() {
        let r = rig( &[ "a.mp3", "b.mp3" ] );
        let states = r.presenter.states.lock().unwrap();
        assert_eq!( states.len(), 1 );
        assert_eq!( states[ 0 ].playlist.len(), 2 );
        assert_eq!( states[ 0 ].current_index, None );
        assert!( !states[ 0 ].is_playing );
        assert_eq!( r.presenter.themes.lock().unwrap().as_slice(), &[ Theme::Dark ] );
    }


    #[test]
    fn test_startup_applies_saved_shuffle() {
        let store = Arc::new( MemoryStore::new() );
        store.set( KEY_SHUFFLE, serde_json::json!( true ) ).unwrap();
        let r = rig_with( &[ "a.mp3", "b.mp3", "c.mp3" ], store );

        assert!( r.app.is_shuffled() );
        assert!( r.presenter.last().is_shuffled );
        assert_eq!( r.app.playlist().len(), 3 );
    }


    #[test]
    fn test_select_track_loads_and_renders() {
        let mut r = rig( &[ "a.mp3", "b.mp3" ] );
        r.app.select_track( 1 );

        let state = r.presenter.last();
        assert!( state.is_playing );
        assert_eq!( state.current_index, Some( 1 ) );
        assert_eq!( state.current_track.unwrap().title(), "b" );
        assert_eq!( r.media.state().loads.last().unwrap(), std::path::Path::new( "/music/b.mp3" ) );
    }


    #[test]
    fn test_select_out_of_range_is_ignored() {
        let mut r = rig( &[ "a.mp3" ] );
        r.app.select_track( 5 );
        assert_eq!( r.app.current_index(), None );
        assert!( r.media.state().loads.is_empty() );
    }


    #[test]
    fn test_prev_wraps_from_first() {
        let mut r = rig( &[ "a.mp3", "b.mp3", "c.mp3" ] );
        r.app.select_track( 0 );
        r.app.play_prev();
        assert_eq!( r.app.current_index(), Some( 2 ) );
    }


    #[test]
    fn test_prev_without_current_goes_to_last() {
        let mut r = rig( &[ "a.mp3", "b.mp3", "c.mp3" ] );
        r.app.play_prev();
        assert_eq!( r.app.current_index(), Some( 2 ) );
    }


    #[test]
    fn test_next_wraps_even_with_loop_none() {
        let mut r = rig( &[ "a.mp3", "b.mp3", "c.mp3" ] );
        assert_eq!( r.app.engine().loop_mode(), LoopMode::None );
        r.app.select_track( 2 );
        r.app.play_next();
        assert_eq!( r.app.current_index(), Some( 0 ) );
    }


    #[test]
    fn test_navigation_on_empty_playlist_is_noop() {
        let mut r = rig( &[] );
        r.app.play_next();
        r.app.play_prev();
        r.app.play_pause();
        r.app.on_track_ended();
        assert_eq!( r.app.current_index(), None );
        assert!( r.media.state().loads.is_empty() );
    }


    #[test]
    fn test_ended_at_last_with_loop_none_stops() {
        let mut r = rig( &[ "a.mp3", "b.mp3" ] );
        r.app.select_track( 1 );
        r.media.push_event( MediaEvent::Ended );
        r.app.tick();

        assert_eq!( r.app.current_index(), Some( 1 ) );
        let state = r.presenter.last();
        assert!( !state.is_playing );
        assert!( state.current_track.is_none() );
        assert_eq!( r.media.state().loads.len(), 1 );
    }


    #[test]
    fn test_ended_with_loop_one_repeats_in_place() {
        let mut r = rig( &[ "a.mp3", "b.mp3" ] );
        r.app.execute( Command::ToggleLoop );
        r.app.execute( Command::ToggleLoop );
        r.app.select_track( 0 );
        r.media.state().position = Duration::from_secs( 30 );

        r.media.push_event( MediaEvent::Ended );
        r.app.tick();

        assert_eq!( r.app.current_index(), Some( 0 ) );
        assert_eq!( r.media.state().position, Duration::ZERO );
        assert!( r.media.state().playing );
        assert_eq!( r.media.state().loads.len(), 1 );
    }


    #[test]
    fn test_ended_with_loop_all_cycles() {
        let mut r = rig( &[ "a.mp3", "b.mp3" ] );
        r.app.execute( Command::ToggleLoop );
        r.app.select_track( 0 );

        let mut seen = vec![ r.app.current_index() ];
        for _ in 0..2 {
            r.media.push_event( MediaEvent::Ended );
            r.app.tick();
            seen.push( r.app.current_index() );
        }
        assert_eq!( seen, vec![ Some( 0 ), Some( 1 ), Some( 0 ) ] );
    }


    #[test]
    fn test_toggle_shuffle_keeps_playing_track_located() {
        let mut r = rig( &[ "a.mp3", "b.mp3", "c.mp3", "d.mp3", "e.mp3" ] );
        r.app.select_track( 3 );

        for _ in 0..4 {
            r.app.toggle_shuffle();
            let index = r.app.current_index().unwrap();
            assert_eq!( r.app.playlist().get( index ).unwrap().id(), "track-3" );
        }
        assert!( !r.app.is_shuffled() );
        assert_eq!( r.app.current_index(), Some( 3 ) );
        assert_eq!( r.store.get( KEY_SHUFFLE ), Some( serde_json::json!( false ) ) );

        // Reshuffling never reloads or pauses the playing track
        assert_eq!( r.media.state().loads.len(), 1 );
        assert!( r.app.engine().is_playing() );
        assert!( r.media.state().playing );
    }


    #[test]
    fn test_toggle_shuffle_announces_state() {
        let mut r = rig( &[ "a.mp3", "b.mp3" ] );
        r.app.toggle_shuffle();
        r.app.toggle_shuffle();

        let messages = r.presenter.messages.lock().unwrap();
        assert_eq!( messages.as_slice(), &[ "Shuffle: on", "Shuffle: off" ] );
    }


    #[test]
    fn test_unshuffle_discards_manual_order() {
        let mut r = rig( &[ "a.mp3", "b.mp3", "c.mp3" ] );
        r.app.toggle_shuffle();
        r.app.move_track( 0, 2 ).unwrap();
        r.app.toggle_shuffle();

        let ids: Vec<_> = r.app.playlist().tracks().iter().map( |t| t.id().to_string() ).collect();
        assert_eq!( ids, vec![ "track-0", "track-1", "track-2" ] );
    }


    #[test]
    fn test_move_relocates_current() {
        let mut r = rig( &[ "a.mp3", "b.mp3", "c.mp3" ] );
        r.app.select_track( 0 );
        r.app.move_track( 0, 2 ).unwrap();
        assert_eq!( r.app.current_index(), Some( 2 ) );
        assert_eq!( r.presenter.last().current_index, Some( 2 ) );
    }


    #[test]
    fn test_reorder_rejects_foreign_sequence() {
        let mut r = rig( &[ "a.mp3", "b.mp3" ] );
        let bogus = catalog( &[ "x.mp3" ] );
        assert_eq!( r.app.reorder( bogus ), Err( PlaylistError::NotAPermutation ) );
    }


    #[test]
    fn test_play_pause_starts_first_track() {
        let mut r = rig( &[ "a.mp3", "b.mp3" ] );
        r.app.play_pause();
        assert_eq!( r.app.current_index(), Some( 0 ) );
        assert!( r.app.engine().is_playing() );

        r.app.play_pause();
        assert!( !r.app.engine().is_playing() );
        assert_eq!( r.media.state().loads.len(), 1 );
    }


    #[test]
    fn test_volume_zero_mutes_in_view() {
        let mut r = rig( &[ "a.mp3" ] );
        r.app.execute( Command::SetVolume { volume: 0.0 } );
        assert!( r.presenter.last().is_muted );

        r.app.execute( Command::SetVolume { volume: 0.4 } );
        let state = r.presenter.last();
        assert!( !state.is_muted );
        assert_eq!( state.volume, 0.4 );
    }


    #[test]
    fn test_progress_reaches_presenter() {
        let mut r = rig( &[ "a.mp3" ] );
        r.app.select_track( 0 );
        r.media.push_event( MediaEvent::TimeUpdate {
            position: Duration::from_secs( 3 ),
            duration: None,
        });
        r.app.tick();
        assert_eq!(
            r.presenter.progress.lock().unwrap().as_slice(),
            &[ ( Duration::from_secs( 3 ), None ) ]
        );
    }


    #[test]
    fn test_search_forwards_results() {
        let mut r = rig( &[ "Blue.mp3", "red.mp3", "blueberry.mp3" ] );
        assert!( r.app.execute( Command::Search { term: "BLUE".into() } ) );
        assert_eq!( r.presenter.results.lock().unwrap().as_slice(), &[ vec![ 0, 2 ] ] );
    }


    #[test]
    fn test_failed_load_reports_message() {
        let mut r = rig( &[ "a.mp3" ] );
        r.media.state().fail_loads = true;
        r.app.select_track( 0 );

        assert!( !r.presenter.last().is_playing );
        let messages = r.presenter.messages.lock().unwrap();
        assert_eq!( messages.len(), 1 );
        assert!( messages[ 0 ].starts_with( "Cannot play a" ) );
    }


    #[test]
    fn test_failed_seek_reports_stopped_state() {
        let mut r = rig( &[ "a.mp3" ] );
        r.app.select_track( 0 );
        r.media.state().duration = Some( Duration::from_secs( 90 ) );
        r.media.state().fail_seeks = true;

        assert!( r.app.execute( Command::Seek { percent: 50.0 } ) );

        assert!( !r.app.engine().is_playing() );
        let state = r.presenter.last();
        assert!( !state.is_playing );
        assert_eq!( state.current_index, Some( 0 ) );
        let messages = r.presenter.messages.lock().unwrap();
        assert!( messages.last().unwrap().starts_with( "Cannot play a" ) );
    }


    #[test]
    fn test_theme_toggle_persists() {
        let mut r = rig( &[] );
        r.app.execute( Command::ToggleTheme );
        assert_eq!( r.store.get( KEY_THEME ), Some( serde_json::json!( "light" ) ) );
        assert_eq!( r.presenter.themes.lock().unwrap().last(), Some( &Theme::Light ) );
    }


    #[test]
    fn test_quit_stops_loop() {
        let mut r = rig( &[] );
        assert!( r.app.execute( Command::Help ) );
        assert!( !r.app.execute( Command::Quit ) );
    }
}

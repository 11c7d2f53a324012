//! End-to-end coordination through the public API: catalog building,
//! coordinator, engine and presenter, with a scripted media backend.

use std::collections::{ HashMap, VecDeque };
use std::path::{ Path, PathBuf };
use std::sync::{ Arc, Mutex };
use std::time::Duration;

use async_trait::async_trait;

use cadence_core::{
    CatalogBuilder, CatalogError, Command, Coordinator, LoopMode, MediaBackend, MediaError,
    MediaEvent, MediaFetcher, MemoryStore, NoopVisualizer, PreferenceStore, Preferences,
    Presenter, ViewState,
};
use cadence_core::prefs::{ KEY_LOOP, KEY_VOLUME };


struct MapFetcher {
    files: HashMap<String, Vec<u8>>,
}


#[async_trait]
impl MediaFetcher for MapFetcher {
    async fn fetch( &self, file_name: &str ) -> Result<Vec<u8>, CatalogError> {
        self.files
            .get( file_name )
            .cloned()
            .ok_or_else( || CatalogError::Io( std::io::ErrorKind::NotFound.into() ) )
    }


    fn source_for( &self, file_name: &str ) -> PathBuf {
        Path::new( "/music" ).join( file_name )
    }
}


#[derive( Default )]
struct Script {
    loaded: Option<PathBuf>,
    playing: bool,
    position: Duration,
    events: VecDeque<MediaEvent>,
}


#[derive( Clone, Default )]
struct ScriptedBackend {
    script: Arc<Mutex<Script>>,
}


impl ScriptedBackend {
    fn end_track( &self ) {
        self.script.lock().unwrap().events.push_back( MediaEvent::Ended );
    }
}


impl MediaBackend for ScriptedBackend {
    fn load( &mut self, source: &Path ) -> Result<(), MediaError> {
        let mut script = self.script.lock().unwrap();
        script.loaded = Some( source.to_path_buf() );
        script.playing = false;
        script.position = Duration::ZERO;
        script.events.push_back( MediaEvent::MetadataLoaded { duration: Some( Duration::from_secs( 120 ) ) } );
        Ok(())
    }


    fn play( &mut self ) -> Result<(), MediaError> {
        self.script.lock().unwrap().playing = true;
        Ok(())
    }


    fn pause( &mut self ) {
        self.script.lock().unwrap().playing = false;
    }


    fn seek( &mut self, position: Duration ) -> Result<(), MediaError> {
        self.script.lock().unwrap().position = position;
        Ok(())
    }


    fn position( &self ) -> Duration {
        self.script.lock().unwrap().position
    }


    fn duration( &self ) -> Option<Duration> {
        self.script.lock().unwrap().loaded.as_ref().map( |_| Duration::from_secs( 120 ) )
    }


    fn set_volume( &mut self, _volume: f32 ) {}


    fn set_muted( &mut self, _muted: bool ) {}


    fn poll_event( &mut self ) -> Option<MediaEvent> {
        self.script.lock().unwrap().events.pop_front()
    }
}


#[derive( Default )]
struct Screen {
    states: Mutex<Vec<ViewState>>,
    progress: Mutex<Vec<( Duration, Option<Duration> )>>,
}


impl Presenter for Screen {
    fn update( &self, state: &ViewState ) {
        self.states.lock().unwrap().push( state.clone() );
    }


    fn update_progress( &self, position: Duration, duration: Option<Duration> ) {
        self.progress.lock().unwrap().push(( position, duration ));
    }
}


async fn build_catalog( names: &[&str], available: &[&str] ) -> Vec<Arc<cadence_core::Track>> {
    let files = available
        .iter()
        .map( |name| ( name.to_string(), b"not really audio".to_vec() ) )
        .collect();
    let builder = CatalogBuilder::new( Arc::new( MapFetcher { files } ) );
    let names: Vec<String> = names.iter().map( |s| s.to_string() ).collect();
    builder.build( &names ).await
}


#[tokio::test]
async fn loop_all_cycles_through_two_tracks() {
    let tracks = build_catalog( &[ "a.mp3", "b.mp3" ], &[ "a.mp3", "b.mp3" ] ).await;
    assert_eq!( tracks.len(), 2 );
    assert_eq!( tracks[ 0 ].title(), "a" );
    assert_eq!( tracks[ 1 ].artist(), "Unknown Artist" );

    let store = Arc::new( MemoryStore::new() );
    store.set( KEY_LOOP, serde_json::json!( "all" ) ).unwrap();
    let backend = ScriptedBackend::default();
    let screen = Arc::new( Screen::default() );
    let mut app = Coordinator::new(
        Box::new( backend.clone() ),
        Arc::new( NoopVisualizer ),
        Preferences::new( store ),
        screen.clone(),
        tracks,
    );
    assert_eq!( app.engine().loop_mode(), LoopMode::All );

    app.select_track( 0 );
    let mut seen = vec![ app.current_index() ];
    for _ in 0..2 {
        backend.end_track();
        app.tick();
        seen.push( app.current_index() );
    }

    assert_eq!( seen, vec![ Some( 0 ), Some( 1 ), Some( 0 ) ] );
    assert_eq!( backend.script.lock().unwrap().loaded.as_deref(), Some( Path::new( "/music/a.mp3" ) ) );
    assert!( screen.states.lock().unwrap().last().unwrap().is_playing );
}


#[tokio::test]
async fn unresolvable_entries_are_dropped_in_order() {
    let tracks = build_catalog( &[ "a.mp3", "missing.mp3", "c.flac" ], &[ "a.mp3", "c.flac" ] ).await;
    let titles: Vec<_> = tracks.iter().map( |t| t.title().to_string() ).collect();
    assert_eq!( titles, vec![ "a", "c" ] );
}


#[tokio::test]
async fn metadata_duration_reaches_track_and_progress() {
    let tracks = build_catalog( &[ "a.mp3" ], &[ "a.mp3" ] ).await;
    let track = Arc::clone( &tracks[ 0 ] );
    let screen = Arc::new( Screen::default() );
    let mut app = Coordinator::new(
        Box::new( ScriptedBackend::default() ),
        Arc::new( NoopVisualizer ),
        Preferences::in_memory(),
        screen.clone(),
        tracks,
    );

    app.execute( Command::PlayPause );
    app.tick();

    assert_eq!( track.duration_secs(), 120.0 );
    assert_eq!(
        screen.progress.lock().unwrap().as_slice(),
        &[ ( Duration::ZERO, Some( Duration::from_secs( 120 ) ) ) ]
    );
}


#[tokio::test]
async fn empty_catalog_is_inert() {
    let tracks = build_catalog( &[ "gone.mp3" ], &[] ).await;
    assert!( tracks.is_empty() );

    let screen = Arc::new( Screen::default() );
    let mut app = Coordinator::new(
        Box::new( ScriptedBackend::default() ),
        Arc::new( NoopVisualizer ),
        Preferences::in_memory(),
        screen.clone(),
        tracks,
    );
    for command in [ Command::PlayPause, Command::Next, Command::Prev, Command::ToggleShuffle ] {
        assert!( app.execute( command ) );
    }
    app.tick();

    let last = screen.states.lock().unwrap().last().cloned().unwrap();
    assert!( last.playlist.is_empty() );
    assert_eq!( last.current_index, None );
}


#[test]
fn preferences_survive_unwritable_store() {
    let store = Arc::new( MemoryStore::read_only() );
    let screen = Arc::new( Screen::default() );
    let mut app = Coordinator::new(
        Box::new( ScriptedBackend::default() ),
        Arc::new( NoopVisualizer ),
        Preferences::new( store.clone() ),
        screen.clone(),
        Vec::new(),
    );

    app.execute( Command::SetVolume { volume: 0.2 } );
    app.execute( Command::ToggleLoop );

    assert_eq!( app.engine().volume(), 0.2 );
    assert_eq!( app.engine().loop_mode(), LoopMode::All );
    assert!( store.get( KEY_VOLUME ).is_none() );
}

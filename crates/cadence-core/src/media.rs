//! Media resource abstraction
//!
//! The playback engine drives exactly one `MediaBackend`. Backends report
//! asynchronous happenings (progress, end of media, late failures) as
//! `MediaEvent`s which the engine drains on the caller's thread.

use std::path::Path;
use std::time::Duration;

use thiserror::Error;

use crate::decoder::DecoderError;
use crate::output::OutputError;


/// Errors that can occur while loading or driving a media resource.
#[derive( Debug, Error )]
pub enum MediaError {
    #[error( "Failed to open source: {0}" )]
    Open( String ),

    #[error( "Decode error: {0}" )]
    Decode( String ),

    #[error( "Audio output error: {0}" )]
    Output( String ),

    #[error( "No source loaded" )]
    NotLoaded,
}


impl From<DecoderError> for MediaError {
    fn from( e: DecoderError ) -> Self {
        match e {
            DecoderError::FileOpen( _ ) | DecoderError::UnsupportedFormat | DecoderError::NoAudioTrack => {
                MediaError::Open( e.to_string() )
            }
            _ => MediaError::Decode( e.to_string() ),
        }
    }
}


impl From<OutputError> for MediaError {
    fn from( e: OutputError ) -> Self {
        MediaError::Output( e.to_string() )
    }
}


/// Something the media resource reports after the fact.
#[derive( Debug, Clone, PartialEq )]
pub enum MediaEvent {
    /// The source's duration became known (or is known to be unknowable).
    MetadataLoaded { duration: Option<Duration> },

    /// Periodic playback progress.
    TimeUpdate { position: Duration, duration: Option<Duration> },

    /// Playback reached the end of the source.
    Ended,

    /// The resource failed after loading, e.g. mid-stream decode failure.
    Failed { message: String },
}


/// A single playable media resource.
pub trait MediaBackend {
    /// Binds the resource to `source`, replacing any previous source. Leaves it paused.
    fn load( &mut self, source: &Path ) -> Result<(), MediaError>;

    fn play( &mut self ) -> Result<(), MediaError>;

    fn pause( &mut self );

    fn seek( &mut self, position: Duration ) -> Result<(), MediaError>;

    fn position( &self ) -> Duration;

    /// `None` until the source's duration is known.
    fn duration( &self ) -> Option<Duration>;

    fn set_volume( &mut self, volume: f32 );

    fn set_muted( &mut self, muted: bool );

    /// Returns the next pending event, if any.
    fn poll_event( &mut self ) -> Option<MediaEvent>;
}


#[cfg( test )]
pub( crate ) mod fake {
    //! Scripted backend for unit tests.

    use std::collections::VecDeque;
    use std::path::PathBuf;
    use std::sync::{ Arc, Mutex };

    use super::*;


    #[derive( Debug, Default )]
    pub struct FakeState {
        pub source: Option<PathBuf>,
        pub playing: bool,
        pub position: Duration,
        pub duration: Option<Duration>,
        pub volume: f32,
        pub muted: bool,
        pub events: VecDeque<MediaEvent>,
        pub loads: Vec<PathBuf>,
        pub fail_loads: bool,
        pub fail_seeks: bool,
    }


    /// Backend whose state is shared with the test through `handle`.
    #[derive( Clone, Default )]
    pub struct FakeBackend {
        pub handle: Arc<Mutex<FakeState>>,
    }


    impl FakeBackend {
        pub fn state( &self ) -> std::sync::MutexGuard<'_, FakeState> {
            self.handle.lock().unwrap()
        }


        pub fn push_event( &self, event: MediaEvent ) {
            self.state().events.push_back( event );
        }
    }


    impl MediaBackend for FakeBackend {
        fn load( &mut self, source: &Path ) -> Result<(), MediaError> {
            let mut state = self.state();
            state.loads.push( source.to_path_buf() );
            if state.fail_loads {
                state.source = None;
                return Err( MediaError::Open( source.display().to_string() ) );
            }
            state.source = Some( source.to_path_buf() );
            state.playing = false;
            state.position = Duration::ZERO;
            Ok(())
        }


        fn play( &mut self ) -> Result<(), MediaError> {
            let mut state = self.state();
            if state.source.is_none() {
                return Err( MediaError::NotLoaded );
            }
            state.playing = true;
            Ok(())
        }


        fn pause( &mut self ) {
            self.state().playing = false;
        }


        fn seek( &mut self, position: Duration ) -> Result<(), MediaError> {
            let mut state = self.state();
            if state.fail_seeks {
                state.playing = false;
                return Err( MediaError::NotLoaded );
            }
            state.position = position;
            Ok(())
        }


        fn position( &self ) -> Duration {
            self.state().position
        }


        fn duration( &self ) -> Option<Duration> {
            self.state().duration
        }


        fn set_volume( &mut self, volume: f32 ) {
            self.state().volume = volume;
        }


        fn set_muted( &mut self, muted: bool ) {
            self.state().muted = muted;
        }


        fn poll_event( &mut self ) -> Option<MediaEvent> {
            self.state().events.pop_front()
        }
    }
}

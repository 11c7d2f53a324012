//! Track descriptors
//!
//! A `Track` is created once by the catalog and shared by reference
//! (`Arc<Track>`) with the playlist and the playback engine.

use std::path::{ Path, PathBuf };
use std::sync::OnceLock;


/// Artist shown when a file carries no readable artist tag.
pub const UNKNOWN_ARTIST: &str = "Unknown Artist";


/// Embedded cover art.
#[derive( Debug, Clone, PartialEq, Eq )]
pub struct Artwork {
    pub media_type: String,
    pub data: Vec<u8>,
}


/// A single playable audio item with display metadata.
#[derive( Debug )]
pub struct Track {
    id: String,
    source: PathBuf,
    title: String,
    artist: String,
    artwork: Option<Artwork>,
    /// Set once, when the media resource first reports a duration.
    duration: OnceLock<f64>,
}


impl Track {
    /// Creates a track whose duration is not yet known.
    pub fn new(
        id: impl Into<String>,
        source: impl Into<PathBuf>,
        title: impl Into<String>,
        artist: impl Into<String>,
        artwork: Option<Artwork>,
    ) -> Self {
        Self {
            id: id.into(),
            source: source.into(),
            title: title.into(),
            artist: artist.into(),
            artwork,
            duration: OnceLock::new(),
        }
    }


    pub fn id( &self ) -> &str {
        &self.id
    }


    pub fn source( &self ) -> &Path {
        &self.source
    }


    pub fn title( &self ) -> &str {
        &self.title
    }


    pub fn artist( &self ) -> &str {
        &self.artist
    }


    pub fn artwork( &self ) -> Option<&Artwork> {
        self.artwork.as_ref()
    }


    /// Duration in seconds, or 0.0 until known.
    pub fn duration_secs( &self ) -> f64 {
        self.duration.get().copied().unwrap_or( 0.0 )
    }


    /// Records the duration. Only the first call has an effect.
    ///
    /// @returns true if this call set the duration
    pub fn set_duration_secs( &self, secs: f64 ) -> bool {
        if !secs.is_finite() || secs <= 0.0 {
            return false;
        }
        self.duration.set( secs ).is_ok()
    }


    /// Case-insensitive match of `needle` (already lowercased) against title and artist.
    pub fn matches( &self, needle: &str ) -> bool {
        self.title.to_lowercase().contains( needle )
            || self.artist.to_lowercase().contains( needle )
    }
}


/// Derives a display title from a file name by dropping its last extension.
pub fn title_from_file_name( file_name: &str ) -> String {
    match file_name.rsplit_once( '.' ) {
        Some(( stem, _ )) if !stem.is_empty() => stem.to_string(),
        _ => file_name.to_string(),
    }
}


#[cfg( test )]
mod tests {
    use super::*;


    #[test]
    fn test_duration_set_once() {
        let track = Track::new( "t", "a.mp3", "A", "B", None );
        assert_eq!( track.duration_secs(), 0.0 );
        assert!( track.set_duration_secs( 12.5 ) );
        assert!( !track.set_duration_secs( 99.0 ) );
        assert_eq!( track.duration_secs(), 12.5 );
    }


    #[test]
    fn test_duration_rejects_nan() {
        let track = Track::new( "t", "a.mp3", "A", "B", None );
        assert!( !track.set_duration_secs( f64::NAN ) );
        assert_eq!( track.duration_secs(), 0.0 );
    }


    #[test]
    fn test_title_from_file_name() {
        assert_eq!( title_from_file_name( "song.mp3" ), "song" );
        assert_eq!( title_from_file_name( "my.song.flac" ), "my.song" );
        assert_eq!( title_from_file_name( "noext" ), "noext" );
        assert_eq!( title_from_file_name( ".hidden" ), ".hidden" );
    }


    #[test]
    fn test_matches_title_or_artist() {
        let track = Track::new( "t", "a.mp3", "Blue Monday", "New Order", None );
        assert!( track.matches( "monday" ) );
        assert!( track.matches( "order" ) );
        assert!( !track.matches( "joy" ) );
    }
}

//! Track catalog construction
//!
//! Resolves a static list of file names into `Track`s. Entries are fetched
//! and tagged concurrently, at most `concurrency` at a time so that only a
//! bounded number of files is held in memory, and collected in input order.
//! Entries whose bytes cannot be fetched are dropped, entries whose tags
//! cannot be read fall back to a file-name title.

use std::path::{ Path, PathBuf };
use std::sync::Arc;
use std::time::{ Duration, SystemTime, UNIX_EPOCH };

use async_trait::async_trait;
use futures::stream::{ self, StreamExt };
use thiserror::Error;

use crate::decoder::{ self, TrackTags };
use crate::track::{ title_from_file_name, Track, UNKNOWN_ARTIST };


/// Default number of entries fetched and tagged at once.
pub const DEFAULT_CONCURRENCY: usize = 8;


/// Supported audio file extensions.
const SUPPORTED_EXTENSIONS: &[&str] = &[
    "mp3", "flac", "ogg", "wav", "m4a", "aac", "opus", "aiff", "alac",
];


/// Errors that can occur while resolving catalog entries.
#[derive( Debug, Error )]
pub enum CatalogError {
    #[error( "IO error: {0}" )]
    Io( #[from] std::io::Error ),

    #[error( "Fetch of '{0}' timed out" )]
    Timeout( String ),
}


/// Source of raw file bytes for catalog entries.
#[async_trait]
pub trait MediaFetcher: Send + Sync {
    /// Reads the full contents of `file_name`.
    async fn fetch( &self, file_name: &str ) -> Result<Vec<u8>, CatalogError>;

    /// The playable location of `file_name`.
    fn source_for( &self, file_name: &str ) -> PathBuf;
}


/// Fetches files from a fixed directory.
#[derive( Debug, Clone )]
pub struct DirFetcher {
    root: PathBuf,
}


impl DirFetcher {
    pub fn new( root: impl Into<PathBuf> ) -> Self {
        Self { root: root.into() }
    }
}


#[async_trait]
impl MediaFetcher for DirFetcher {
    async fn fetch( &self, file_name: &str ) -> Result<Vec<u8>, CatalogError> {
        Ok( tokio::fs::read( self.source_for( file_name ) ).await? )
    }


    fn source_for( &self, file_name: &str ) -> PathBuf {
        self.root.join( file_name )
    }
}


/// Builds the ordered track catalog.
pub struct CatalogBuilder {
    fetcher: Arc<dyn MediaFetcher>,
    timeout: Option<Duration>,
    concurrency: usize,
}


impl CatalogBuilder {
    pub fn new( fetcher: Arc<dyn MediaFetcher> ) -> Self {
        Self {
            fetcher,
            timeout: None,
            concurrency: DEFAULT_CONCURRENCY,
        }
    }


    /// Treats any fetch slower than `timeout` as failed.
    pub fn with_timeout( mut self, timeout: Option<Duration> ) -> Self {
        self.timeout = timeout;
        self
    }


    /// Limits how many entries are in flight at once (at least one).
    pub fn with_concurrency( mut self, concurrency: usize ) -> Self {
        self.concurrency = concurrency.max( 1 );
        self
    }


    /// Resolves all `file_names`, preserving input order.
    pub async fn build( &self, file_names: &[String] ) -> Vec<Arc<Track>> {
        let stamp = SystemTime::now()
            .duration_since( UNIX_EPOCH )
            .map( |d| d.as_millis() )
            .unwrap_or_default();

        // `buffered` yields in input order regardless of completion order
        let resolved: Vec<Option<Arc<Track>>> = stream::iter( file_names.iter().enumerate() )
            .map( |( index, name )| self.resolve( index, name, stamp ) )
            .buffered( self.concurrency )
            .collect()
            .await;
        let tracks: Vec<Arc<Track>> = resolved.into_iter().flatten().collect();

        tracing::info!( "Catalog ready: {} of {} tracks", tracks.len(), file_names.len() );
        tracks
    }


    async fn resolve( &self, index: usize, file_name: &str, stamp: u128 ) -> Option<Arc<Track>> {
        let bytes = match self.fetch( file_name ).await {
            Ok( bytes ) => bytes,
            Err( e ) => {
                tracing::warn!( "Dropping '{}' from catalog: {}", file_name, e );
                return None;
            }
        };

        let extension = Path::new( file_name )
            .extension()
            .and_then( |e| e.to_str() )
            .map( str::to_string );

        let tags = match tokio::task::spawn_blocking( move || {
            decoder::read_tags( bytes, extension.as_deref() )
        }).await {
            Ok( Ok( tags ) ) => tags,
            Ok( Err( e ) ) => {
                tracing::debug!( "No readable tags in '{}': {}", file_name, e );
                TrackTags::default()
            }
            Err( e ) => {
                tracing::warn!( "Tag reader for '{}' aborted: {}", file_name, e );
                TrackTags::default()
            }
        };

        Some( Arc::new( Track::new(
            format!( "track-{}-{}", index, stamp ),
            self.fetcher.source_for( file_name ),
            tags.title.unwrap_or_else( || title_from_file_name( file_name ) ),
            tags.artist.unwrap_or_else( || UNKNOWN_ARTIST.to_string() ),
            tags.artwork,
        )))
    }


    async fn fetch( &self, file_name: &str ) -> Result<Vec<u8>, CatalogError> {
        match self.timeout {
            Some( limit ) => tokio::time::timeout( limit, self.fetcher.fetch( file_name ) )
                .await
                .map_err( |_| CatalogError::Timeout( file_name.to_string() ) )?,
            None => self.fetcher.fetch( file_name ).await,
        }
    }
}


/// Checks if a file has a supported audio extension.
pub fn is_audio_file( path: &Path ) -> bool {
    path.extension()
        .and_then( |e| e.to_str() )
        .map( |e| SUPPORTED_EXTENSIONS.contains( &e.to_lowercase().as_str() ) )
        .unwrap_or( false )
}


/// Lists the audio files directly inside `dir`, sorted by name.
pub fn list_audio_files( dir: &Path ) -> Result<Vec<String>, CatalogError> {
    let mut names: Vec<String> = std::fs::read_dir( dir )?
        .flatten()
        .map( |entry| entry.path() )
        .filter( |path| path.is_file() && is_audio_file( path ) )
        .filter_map( |path| path.file_name().and_then( |n| n.to_str() ).map( str::to_string ) )
        .collect();
    names.sort();
    Ok( names )
}


/// Reads a catalog list file: one file name per line, `#` starts a comment.
pub fn read_list_file( path: &Path ) -> Result<Vec<String>, CatalogError> {
    let contents = std::fs::read_to_string( path )?;
    Ok( contents
        .lines()
        .map( str::trim )
        .filter( |line| !line.is_empty() && !line.starts_with( '#' ) )
        .map( str::to_string )
        .collect() )
}


#[cfg( test )]
mod tests {
    use super::*;
    use std::collections::HashMap;


    /// Serves canned bytes after a per-file delay; unknown names fail.
    struct DelayedFetcher {
        files: HashMap<String, Duration>,
    }


    #[async_trait]
    impl MediaFetcher for DelayedFetcher {
        async fn fetch( &self, file_name: &str ) -> Result<Vec<u8>, CatalogError> {
            match self.files.get( file_name ) {
                Some( delay ) => {
                    tokio::time::sleep( *delay ).await;
                    Ok( vec![ 0u8; 16 ] )
                }
                None => Err( CatalogError::Io( std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "missing",
                ))),
            }
        }


        fn source_for( &self, file_name: &str ) -> PathBuf {
            PathBuf::from( "mem" ).join( file_name )
        }
    }


    fn names( list: &[&str] ) -> Vec<String> {
        list.iter().map( |s| s.to_string() ).collect()
    }


    #[tokio::test]
    async fn test_order_follows_input_not_completion() {
        let fetcher = DelayedFetcher {
            files: HashMap::from([
                ( "slow.mp3".to_string(), Duration::from_millis( 60 ) ),
                ( "mid.mp3".to_string(), Duration::from_millis( 30 ) ),
                ( "fast.mp3".to_string(), Duration::from_millis( 1 ) ),
            ]),
        };
        let builder = CatalogBuilder::new( Arc::new( fetcher ) );
        let tracks = builder.build( &names( &[ "slow.mp3", "mid.mp3", "fast.mp3" ] ) ).await;

        let titles: Vec<&str> = tracks.iter().map( |t| t.title() ).collect();
        assert_eq!( titles, vec![ "slow", "mid", "fast" ] );
    }


    /// Counts how many fetches overlap.
    #[derive( Default )]
    struct GaugedFetcher {
        in_flight: std::sync::atomic::AtomicUsize,
        peak: std::sync::atomic::AtomicUsize,
    }


    #[async_trait]
    impl MediaFetcher for GaugedFetcher {
        async fn fetch( &self, _file_name: &str ) -> Result<Vec<u8>, CatalogError> {
            use std::sync::atomic::Ordering;

            let now = self.in_flight.fetch_add( 1, Ordering::SeqCst ) + 1;
            self.peak.fetch_max( now, Ordering::SeqCst );
            tokio::time::sleep( Duration::from_millis( 5 ) ).await;
            self.in_flight.fetch_sub( 1, Ordering::SeqCst );
            Ok( vec![ 0u8; 16 ] )
        }


        fn source_for( &self, file_name: &str ) -> PathBuf {
            PathBuf::from( file_name )
        }
    }


    #[tokio::test]
    async fn test_concurrency_is_bounded_and_order_kept() {
        let fetcher = Arc::new( GaugedFetcher::default() );
        let builder = CatalogBuilder::new( fetcher.clone() ).with_concurrency( 3 );
        let list: Vec<String> = ( 0..10 ).map( |i| format!( "{}.mp3", i ) ).collect();

        let tracks = builder.build( &list ).await;

        let titles: Vec<&str> = tracks.iter().map( |t| t.title() ).collect();
        let expected: Vec<String> = ( 0..10 ).map( |i| i.to_string() ).collect();
        assert_eq!( titles, expected );
        let peak = fetcher.peak.load( std::sync::atomic::Ordering::SeqCst );
        assert!( ( 2..=3 ).contains( &peak ), "peak in flight was {}", peak );
    }


    #[tokio::test]
    async fn test_failed_fetch_is_dropped_and_metadata_falls_back() {
        let fetcher = DelayedFetcher {
            files: HashMap::from([ ( "a.mp3".to_string(), Duration::ZERO ) ]),
        };
        let builder = CatalogBuilder::new( Arc::new( fetcher ) );
        let tracks = builder.build( &names( &[ "missing.mp3", "a.mp3" ] ) ).await;

        assert_eq!( tracks.len(), 1 );
        assert_eq!( tracks[ 0 ].title(), "a" );
        assert_eq!( tracks[ 0 ].artist(), UNKNOWN_ARTIST );
        assert!( tracks[ 0 ].artwork().is_none() );
        assert_eq!( tracks[ 0 ].duration_secs(), 0.0 );
        assert_eq!( tracks[ 0 ].source(), Path::new( "mem/a.mp3" ) );
    }


    #[tokio::test]
    async fn test_total_failure_yields_empty_catalog() {
        let fetcher = DelayedFetcher { files: HashMap::new() };
        let builder = CatalogBuilder::new( Arc::new( fetcher ) );
        assert!( builder.build( &names( &[ "x.mp3", "y.mp3" ] ) ).await.is_empty() );
    }


    #[tokio::test]
    async fn test_ids_are_unique() {
        let fetcher = DelayedFetcher {
            files: HashMap::from([
                ( "a.mp3".to_string(), Duration::ZERO ),
                ( "b.mp3".to_string(), Duration::ZERO ),
            ]),
        };
        let builder = CatalogBuilder::new( Arc::new( fetcher ) );
        let tracks = builder.build( &names( &[ "a.mp3", "b.mp3", "a.mp3" ] ) ).await;

        assert_eq!( tracks.len(), 3 );
        assert_ne!( tracks[ 0 ].id(), tracks[ 1 ].id() );
        assert_ne!( tracks[ 0 ].id(), tracks[ 2 ].id() );
    }


    #[tokio::test]
    async fn test_slow_fetch_times_out() {
        let fetcher = DelayedFetcher {
            files: HashMap::from([
                ( "quick.mp3".to_string(), Duration::ZERO ),
                ( "stuck.mp3".to_string(), Duration::from_secs( 30 ) ),
            ]),
        };
        let builder = CatalogBuilder::new( Arc::new( fetcher ) )
            .with_timeout( Some( Duration::from_millis( 50 ) ) );
        let tracks = builder.build( &names( &[ "stuck.mp3", "quick.mp3" ] ) ).await;

        assert_eq!( tracks.len(), 1 );
        assert_eq!( tracks[ 0 ].title(), "quick" );
    }


    #[tokio::test]
    async fn test_dir_fetcher_reads_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write( dir.path().join( "one.ogg" ), b"not really ogg" ).unwrap();

        let builder = CatalogBuilder::new( Arc::new( DirFetcher::new( dir.path() ) ) );
        let tracks = builder.build( &names( &[ "one.ogg", "two.ogg" ] ) ).await;

        assert_eq!( tracks.len(), 1 );
        assert_eq!( tracks[ 0 ].title(), "one" );
        assert_eq!( tracks[ 0 ].source(), dir.path().join( "one.ogg" ) );
    }


    #[test]
    fn test_list_audio_files_filters_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        for name in [ "b.mp3", "a.FLAC", "notes.txt" ] {
            std::fs::write( dir.path().join( name ), b"" ).unwrap();
        }
        std::fs::create_dir( dir.path().join( "sub.mp3" ) ).unwrap();

        assert_eq!( list_audio_files( dir.path() ).unwrap(), vec![ "a.FLAC", "b.mp3" ] );
    }


    #[test]
    fn test_read_list_file_skips_comments() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join( "music-list.txt" );
        std::fs::write( &path, "# favourites\nfirst.mp3\n\n  second.mp3  \n" ).unwrap();

        assert_eq!( read_list_file( &path ).unwrap(), vec![ "first.mp3", "second.mp3" ] );
    }
}

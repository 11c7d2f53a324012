//! Command-line argument parsing for Cadence.

use std::path::{ Path, PathBuf };
use std::time::Duration;

use anyhow::{ Context, Result };
use clap::Parser;

use cadence_core::catalog;


/// Cadence - A terminal music player with a spectrum visualizer.
#[derive( Parser, Debug )]
#[command( name = "cadence" )]
#[command( version, about, long_about = None )]
pub struct Args {
    /// Directory the catalog's file names are resolved against.
    #[arg( short, long )]
    pub music_dir: Option<PathBuf>,

    /// File listing the catalog, one file name per line.
    #[arg( short, long )]
    pub list: Option<PathBuf>,

    /// Preference file location.
    #[arg( long )]
    pub prefs: Option<PathBuf>,

    /// Give up on a catalog entry after this many milliseconds.
    #[arg( long, value_name = "MS" )]
    pub fetch_timeout_ms: Option<u64>,

    /// Log file location.
    #[arg( long )]
    pub log_file: Option<PathBuf>,

    /// File names to play, relative to the music directory.
    #[arg( trailing_var_arg = true )]
    pub files: Vec<String>,
}


impl Args {
    /// Resolves the music directory: explicit, then the platform audio dir, then the working dir.
    pub fn music_dir( &self ) -> PathBuf {
        self.music_dir
            .clone()
            .or_else( dirs::audio_dir )
            .unwrap_or_else( || PathBuf::from( "." ) )
    }


    /// Catalog file names, in order: trailing names, the list file, or the whole directory.
    pub fn catalog_names( &self, music_dir: &Path ) -> Result<Vec<String>> {
        if !self.files.is_empty() {
            return Ok( self.files.clone() );
        }

        if let Some( ref list ) = self.list {
            return catalog::read_list_file( list )
                .with_context( || format!( "Failed to read list file {:?}", list ) );
        }

        catalog::list_audio_files( music_dir )
            .with_context( || format!( "Failed to scan music directory {:?}", music_dir ) )
    }


    pub fn fetch_timeout( &self ) -> Option<Duration> {
        self.fetch_timeout_ms.map( Duration::from_millis )
    }
}


#[cfg( test )]
mod tests {
    use super::*;


    #[test]
    fn test_trailing_files_win() {
        let args = Args::parse_from([ "cadence", "--music-dir", "/m", "a.mp3", "b.flac" ]);
        assert_eq!( args.music_dir(), PathBuf::from( "/m" ) );
        assert_eq!( args.catalog_names( Path::new( "/m" ) ).unwrap(), vec![ "a.mp3", "b.flac" ] );
    }


    #[test]
    fn test_fetch_timeout() {
        let args = Args::parse_from([ "cadence", "--fetch-timeout-ms", "250" ]);
        assert_eq!( args.fetch_timeout(), Some( Duration::from_millis( 250 ) ) );
        assert!( Args::parse_from([ "cadence" ]).fetch_timeout().is_none() );
    }


    #[test]
    fn test_missing_list_file_is_an_error() {
        let args = Args::parse_from([ "cadence", "--list", "/definitely/not/here.txt" ]);
        assert!( args.catalog_names( Path::new( "." ) ).is_err() );
    }
}

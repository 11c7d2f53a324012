//! Log setup
//!
//! The terminal belongs to the TUI, so logs go to a file. `RUST_LOG`
//! overrides the default filter.

use std::fs::{ self, File };
use std::path::{ Path, PathBuf };
use std::sync::Mutex;

use anyhow::{ Context, Result };
use tracing_subscriber::EnvFilter;


const DEFAULT_FILTER: &str = "cadence=info,cadence_core=info";


/// Default log location under the platform data directory.
pub fn default_log_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else( std::env::temp_dir )
        .join( "cadence" )
        .join( "cadence.log" )
}


/// Installs the global subscriber writing to `path`, truncating it.
pub fn init( path: &Path ) -> Result<()> {
    if let Some( parent ) = path.parent() {
        fs::create_dir_all( parent )
            .with_context( || format!( "Failed to create log directory {:?}", parent ) )?;
    }
    let file = File::create( path )
        .with_context( || format!( "Failed to open log file {:?}", path ) )?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else( |_| EnvFilter::new( DEFAULT_FILTER ) );

    tracing_subscriber::fmt()
        .with_env_filter( filter )
        .with_writer( Mutex::new( file ) )
        .with_ansi( false )
        .with_thread_names( true )
        .init();

    tracing::info!( "Cadence {} starting", env!( "CARGO_PKG_VERSION" ) );
    Ok(())
}

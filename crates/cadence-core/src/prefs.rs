//! User preference persistence
//!
//! Preferences are opaque key/value pairs behind the `PreferenceStore` trait.
//! `Preferences` layers typed accessors with defaults on top of a store and
//! absorbs every storage failure: a failed write is logged and the caller's
//! action proceeds with in-memory state only.

use std::collections::BTreeMap;
use std::fs;
use std::path::{ Path, PathBuf };
use std::sync::{ Arc, Mutex };

use serde::{ Deserialize, Serialize };
use serde_json::Value;
use thiserror::Error;

use crate::playlist::LoopMode;


pub const KEY_VOLUME: &str = "volume";
pub const KEY_SHUFFLE: &str = "shuffle";
pub const KEY_LOOP: &str = "loop";
pub const KEY_THEME: &str = "theme";


/// Errors that can occur while reading or writing preferences.
#[derive( Debug, Error )]
pub enum PrefsError {
    #[error( "IO error: {0}" )]
    Io( #[from] std::io::Error ),

    #[error( "Malformed preference file: {0}" )]
    Format( #[from] serde_json::Error ),

    #[error( "Preference store unavailable" )]
    Unavailable,
}


/// Colour theme of the presentation layer.
#[derive( Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize )]
#[serde( rename_all = "lowercase" )]
pub enum Theme {
    #[default]
    Dark,
    Light,
}


impl Theme {
    pub fn toggled( self ) -> Self {
        match self {
            Theme::Dark => Theme::Light,
            Theme::Light => Theme::Dark,
        }
    }
}


/// Key/value persistence with get/set semantics.
pub trait PreferenceStore: Send + Sync {
    fn get( &self, key: &str ) -> Option<Value>;

    fn set( &self, key: &str, value: Value ) -> Result<(), PrefsError>;
}


/// Preference store backed by a JSON object on disk.
///
/// The file is read once when the store is opened; every `set` rewrites it.
pub struct JsonFileStore {
    path: PathBuf,
    values: Mutex<BTreeMap<String, Value>>,
}


impl JsonFileStore {
    /// Returns the default preference file location.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map( |p| p.join( "cadence" ).join( "preferences.json" ) )
    }


    /// Opens the store at `path`. A missing or unreadable file yields an empty store.
    pub fn open( path: impl Into<PathBuf> ) -> Self {
        let path = path.into();
        let values = match Self::read( &path ) {
            Ok( values ) => values,
            Err( e ) => {
                tracing::warn!( "Failed to read preferences from {:?}: {}", path, e );
                BTreeMap::new()
            }
        };

        Self {
            path,
            values: Mutex::new( values ),
        }
    }


    fn read( path: &Path ) -> Result<BTreeMap<String, Value>, PrefsError> {
        if !path.exists() {
            return Ok( BTreeMap::new() );
        }
        let contents = fs::read_to_string( path )?;
        Ok( serde_json::from_str( &contents )? )
    }


    fn write( &self, values: &BTreeMap<String, Value> ) -> Result<(), PrefsError> {
        if let Some( parent ) = self.path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all( parent )?;
            }
        }
        let json = serde_json::to_string_pretty( values )?;
        fs::write( &self.path, json )?;
        Ok(())
    }


    pub fn path( &self ) -> &Path {
        &self.path
    }
}


impl PreferenceStore for JsonFileStore {
    fn get( &self, key: &str ) -> Option<Value> {
        let values = self.values.lock().ok()?;
        values.get( key ).cloned()
    }


    fn set( &self, key: &str, value: Value ) -> Result<(), PrefsError> {
        let mut values = self.values.lock().map_err( |_| PrefsError::Unavailable )?;
        values.insert( key.to_string(), value );
        self.write( &values )
    }
}


/// In-memory store, used when no file location is available and in tests.
#[derive( Default )]
pub struct MemoryStore {
    values: Mutex<BTreeMap<String, Value>>,
    read_only: bool,
}


impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }


    /// A store whose writes always fail, like a full or locked backing store.
    pub fn read_only() -> Self {
        Self {
            values: Mutex::new( BTreeMap::new() ),
            read_only: true,
        }
    }
}


impl PreferenceStore for MemoryStore {
    fn get( &self, key: &str ) -> Option<Value> {
        self.values.lock().ok()?.get( key ).cloned()
    }


    fn set( &self, key: &str, value: Value ) -> Result<(), PrefsError> {
        if self.read_only {
            return Err( PrefsError::Unavailable );
        }
        let mut values = self.values.lock().map_err( |_| PrefsError::Unavailable )?;
        values.insert( key.to_string(), value );
        Ok(())
    }
}


/// Typed preference access with defaults.
#[derive( Clone )]
pub struct Preferences {
    store: Arc<dyn PreferenceStore>,
}


impl Preferences {
    pub fn new( store: Arc<dyn PreferenceStore> ) -> Self {
        Self { store }
    }


    /// Preferences kept only in memory.
    pub fn in_memory() -> Self {
        Self::new( Arc::new( MemoryStore::new() ) )
    }


    fn load<T: serde::de::DeserializeOwned>( &self, key: &str, default: T ) -> T {
        match self.store.get( key ) {
            Some( value ) => serde_json::from_value( value ).unwrap_or_else( |e| {
                tracing::warn!( "Ignoring invalid preference '{}': {}", key, e );
                default
            }),
            None => default,
        }
    }


    fn save<T: Serialize>( &self, key: &str, value: T ) {
        let value = match serde_json::to_value( value ) {
            Ok( v ) => v,
            Err( e ) => {
                tracing::warn!( "Failed to serialize preference '{}': {}", key, e );
                return;
            }
        };
        if let Err( e ) = self.store.set( key, value ) {
            tracing::warn!( "Failed to save preference '{}': {}", key, e );
        }
    }


    /// Saved volume, clamped to 0.0..=1.0. Defaults to 1.0.
    pub fn volume( &self ) -> f32 {
        let volume: f32 = self.load( KEY_VOLUME, 1.0 );
        if volume.is_finite() { volume.clamp( 0.0, 1.0 ) } else { 1.0 }
    }


    pub fn set_volume( &self, volume: f32 ) {
        self.save( KEY_VOLUME, volume );
    }


    pub fn shuffle( &self ) -> bool {
        self.load( KEY_SHUFFLE, false )
    }


    pub fn set_shuffle( &self, shuffle: bool ) {
        self.save( KEY_SHUFFLE, shuffle );
    }


    pub fn loop_mode( &self ) -> LoopMode {
        self.load( KEY_LOOP, LoopMode::None )
    }


    pub fn set_loop_mode( &self, mode: LoopMode ) {
        self.save( KEY_LOOP, mode );
    }


    pub fn theme( &self ) -> Theme {
        self.load( KEY_THEME, Theme::Dark )
    }


    pub fn set_theme( &self, theme: Theme ) {
        self.save( KEY_THEME, theme );
    }
}


#[cfg( test )]
mod tests {
    use super::*;


    #[test]
    fn test_defaults() {
        let prefs = Preferences::in_memory();
        assert_eq!( prefs.volume(), 1.0 );
        assert!( !prefs.shuffle() );
        assert_eq!( prefs.loop_mode(), LoopMode::None );
        assert_eq!( prefs.theme(), Theme::Dark );
    }


    #[test]
    fn test_round_trip_values() {
        let prefs = Preferences::in_memory();
        prefs.set_volume( 0.25 );
        prefs.set_shuffle( true );
        prefs.set_loop_mode( LoopMode::One );
        prefs.set_theme( Theme::Light );

        assert_eq!( prefs.volume(), 0.25 );
        assert!( prefs.shuffle() );
        assert_eq!( prefs.loop_mode(), LoopMode::One );
        assert_eq!( prefs.theme(), Theme::Light );
    }


    #[test]
    fn test_enum_string_encoding() {
        let store = Arc::new( MemoryStore::new() );
        let prefs = Preferences::new( store.clone() );
        prefs.set_loop_mode( LoopMode::All );
        prefs.set_theme( Theme::Dark );
        assert_eq!( store.get( KEY_LOOP ), Some( Value::from( "all" ) ) );
        assert_eq!( store.get( KEY_THEME ), Some( Value::from( "dark" ) ) );
    }


    #[test]
    fn test_invalid_value_falls_back_to_default() {
        let store = Arc::new( MemoryStore::new() );
        store.set( KEY_LOOP, Value::from( "sideways" ) ).unwrap();
        store.set( KEY_VOLUME, Value::from( 7.0 ) ).unwrap();
        let prefs = Preferences::new( store );
        assert_eq!( prefs.loop_mode(), LoopMode::None );
        assert_eq!( prefs.volume(), 1.0 );
    }


    #[test]
    fn test_failed_write_is_absorbed() {
        let prefs = Preferences::new( Arc::new( MemoryStore::read_only() ) );
        prefs.set_volume( 0.5 );
        assert_eq!( prefs.volume(), 1.0 );
    }


    #[test]
    fn test_json_file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join( "nested" ).join( "preferences.json" );

        {
            let prefs = Preferences::new( Arc::new( JsonFileStore::open( &path ) ) );
            prefs.set_volume( 0.4 );
            prefs.set_shuffle( true );
        }

        let prefs = Preferences::new( Arc::new( JsonFileStore::open( &path ) ) );
        assert_eq!( prefs.volume(), 0.4 );
        assert!( prefs.shuffle() );
        assert_eq!( prefs.loop_mode(), LoopMode::None );
    }


    #[test]
    fn test_json_file_store_ignores_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join( "preferences.json" );
        fs::write( &path, "{ not json" ).unwrap();

        let store = JsonFileStore::open( &path );
        assert!( store.get( KEY_VOLUME ).is_none() );
    }
}

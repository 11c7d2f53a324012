//! Presentation state for the TUI.
//!
//! `Screen` is the coordinator's presenter. It only records what it is
//! told; the draw loop reads a snapshot each frame.

use std::sync::Mutex;
use std::time::{ Duration, Instant };

use ratatui::style::Color;

use cadence_core::{ Presenter, Theme, ViewState };


/// How long a status message stays visible.
const STATUS_TTL: Duration = Duration::from_secs( 4 );


/// Current view mode of the application.
#[derive( Debug, Clone, Copy, PartialEq, Eq, Default )]
pub enum ViewMode {
    #[default]
    Playlist,

    /// Help overlay - shows available commands.
    Help,
}


/// Colours for one theme.
#[derive( Debug, Clone, Copy )]
pub struct Palette {
    pub accent: Color,
    pub text: Color,
    pub dim: Color,
    pub highlight_bg: Color,
    pub highlight_fg: Color,
    pub background: Color,
    pub status: Color,
}


impl Palette {
    pub fn for_theme( theme: Theme ) -> Self {
        match theme {
            Theme::Dark => Self {
                accent: Color::Cyan,
                text: Color::White,
                dim: Color::DarkGray,
                highlight_bg: Color::DarkGray,
                highlight_fg: Color::White,
                background: Color::Reset,
                status: Color::Green,
            },
            Theme::Light => Self {
                accent: Color::Blue,
                text: Color::Black,
                dim: Color::Gray,
                highlight_bg: Color::LightBlue,
                highlight_fg: Color::Black,
                background: Color::White,
                status: Color::Magenta,
            },
        }
    }
}


/// Everything the presenter has been told so far.
#[derive( Debug, Clone, Default )]
pub struct ScreenModel {
    pub view: Option<ViewState>,
    pub position: Duration,
    pub duration: Option<Duration>,
    /// Visible rows after a search; `None` shows the whole playlist.
    pub matches: Option<Vec<usize>>,
    pub status: Option<( String, Instant )>,
    pub theme: Theme,
}


impl ScreenModel {
    /// Indices of the working order currently on screen.
    pub fn visible_rows( &self ) -> Vec<usize> {
        match self.matches {
            Some( ref matches ) => matches.clone(),
            None => ( 0..self.view.as_ref().map_or( 0, |v| v.playlist.len() ) ).collect(),
        }
    }


    /// Status text if it has not expired yet.
    pub fn status_text( &self ) -> Option<&str> {
        self.status
            .as_ref()
            .filter( |( _, at )| at.elapsed() < STATUS_TTL )
            .map( |( text, _ )| text.as_str() )
    }


    /// Progress as a fraction of the duration, 0.0 when unknown.
    pub fn progress_ratio( &self ) -> f64 {
        match self.duration {
            Some( d ) if !d.is_zero() => ( self.position.as_secs_f64() / d.as_secs_f64() ).clamp( 0.0, 1.0 ),
            _ => 0.0,
        }
    }
}


/// Presenter backing the terminal UI.
#[derive( Debug, Default )]
pub struct Screen {
    model: Mutex<ScreenModel>,
}


impl Screen {
    pub fn new() -> Self {
        Self::default()
    }


    pub fn snapshot( &self ) -> ScreenModel {
        self.model.lock().map( |m| m.clone() ).unwrap_or_default()
    }


    pub fn set_status( &self, message: impl Into<String> ) {
        if let Ok( mut model ) = self.model.lock() {
            model.status = Some(( message.into(), Instant::now() ));
        }
    }


    pub fn clear_matches( &self ) {
        if let Ok( mut model ) = self.model.lock() {
            model.matches = None;
        }
    }
}


impl Presenter for Screen {
    fn update( &self, state: &ViewState ) {
        let Ok( mut model ) = self.model.lock() else {
            return;
        };

        let previous = model.view.as_ref().and_then( |v| v.current_track.as_ref() ).map( |t| t.id().to_string() );
        let current = state.current_track.as_ref().map( |t| t.id().to_string() );
        if previous != current {
            model.position = Duration::ZERO;
            model.duration = state.current_track
                .as_ref()
                .map( |t| t.duration_secs() )
                .filter( |secs| *secs > 0.0 )
                .map( Duration::from_secs_f64 );
        }

        // A reordered playlist invalidates search rows
        let reordered = model.view.as_ref().is_some_and( |v| {
            v.playlist.len() != state.playlist.len()
                || v.playlist.iter().zip( &state.playlist ).any( |( a, b )| a.id() != b.id() )
        });
        if reordered {
            model.matches = None;
        }

        model.view = Some( state.clone() );
    }


    fn update_progress( &self, position: Duration, duration: Option<Duration> ) {
        if let Ok( mut model ) = self.model.lock() {
            model.position = position;
            model.duration = duration;
        }
    }


    fn show_search_results( &self, indices: &[usize] ) {
        if let Ok( mut model ) = self.model.lock() {
            model.matches = Some( indices.to_vec() );
        }
    }


    fn show_message( &self, message: &str ) {
        tracing::debug!( "Status: {}", message );
        self.set_status( message );
    }


    fn apply_theme( &self, theme: Theme ) {
        if let Ok( mut model ) = self.model.lock() {
            model.theme = theme;
        }
    }
}


/// Formats a duration as M:SS.
pub fn format_time( d: Duration ) -> String {
    let secs = d.as_secs();
    format!( "{}:{:02}", secs / 60, secs % 60 )
}


#[cfg( test )]
mod tests {
    use super::*;
    use std::sync::Arc;

    use cadence_core::{ LoopMode, Track };


    fn view( ids: &[&str], current: Option<usize> ) -> ViewState {
        let playlist: Vec<Arc<Track>> = ids
            .iter()
            .map( |id| Arc::new( Track::new( *id, format!( "{}.mp3", id ), *id, "Artist", None ) ) )
            .collect();
        ViewState {
            is_playing: current.is_some(),
            current_track: current.map( |i| Arc::clone( &playlist[ i ] ) ),
            loop_mode: LoopMode::None,
            volume: 1.0,
            is_muted: false,
            is_shuffled: false,
            playlist,
            current_index: current,
        }
    }


    #[test]
    fn test_track_change_resets_progress() {
        let screen = Screen::new();
        screen.update( &view( &[ "a", "b" ], Some( 0 ) ) );
        screen.update_progress( Duration::from_secs( 30 ), Some( Duration::from_secs( 60 ) ) );
        assert_eq!( screen.snapshot().progress_ratio(), 0.5 );

        screen.update( &view( &[ "a", "b" ], Some( 0 ) ) );
        assert_eq!( screen.snapshot().position, Duration::from_secs( 30 ) );

        screen.update( &view( &[ "a", "b" ], Some( 1 ) ) );
        let model = screen.snapshot();
        assert_eq!( model.position, Duration::ZERO );
        assert_eq!( model.progress_ratio(), 0.0 );
    }


    #[test]
    fn test_search_rows_until_reorder() {
        let screen = Screen::new();
        screen.update( &view( &[ "a", "b", "c" ], None ) );
        assert_eq!( screen.snapshot().visible_rows(), vec![ 0, 1, 2 ] );

        screen.show_search_results( &[ 2 ] );
        screen.update( &view( &[ "a", "b", "c" ], Some( 2 ) ) );
        assert_eq!( screen.snapshot().visible_rows(), vec![ 2 ] );

        screen.update( &view( &[ "c", "a", "b" ], Some( 0 ) ) );
        assert_eq!( screen.snapshot().visible_rows(), vec![ 0, 1, 2 ] );
    }


    #[test]
    fn test_format_time() {
        assert_eq!( format_time( Duration::from_secs( 0 ) ), "0:00" );
        assert_eq!( format_time( Duration::from_secs( 125 ) ), "2:05" );
    }
}

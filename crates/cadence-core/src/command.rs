//! Player commands
//!
//! Every presentation gesture is expressed as a `Command` and handed to the
//! coordinator. Commands can also be typed as slash commands, which are
//! parsed here.

use std::str::FromStr;

use thiserror::Error;


/// Errors that can occur during command parsing.
#[derive( Debug, Error, PartialEq )]
pub enum CommandError {
    #[error( "Unknown command: {0}" )]
    Unknown( String ),

    #[error( "Invalid argument: {0}" )]
    InvalidArgument( String ),

    #[error( "Missing argument: {0}" )]
    MissingArgument( String ),
}


/// A presentation-level request.
#[derive( Debug, Clone, PartialEq )]
pub enum Command {
    // Transport
    PlayPause,
    Stop,
    Next,
    Prev,
    /// Seek to a percentage (0-100) of the current track.
    Seek { percent: f64 },
    /// Volume in 0.0..=1.0.
    SetVolume { volume: f32 },
    ToggleMute,
    ToggleLoop,

    // Playlist
    ToggleShuffle,
    /// Play the track at a zero-based index of the working order.
    Select { index: usize },
    /// Move a track within the working order (zero-based).
    Move { from: usize, to: usize },
    Search { term: String },

    // UI
    ToggleTheme,
    Help,
    Quit,
}


impl FromStr for Command {
    type Err = CommandError;


    fn from_str( s: &str ) -> Result<Self, Self::Err> {
        Command::parse( s )
    }
}


impl Command {
    /// Parses a command string (without the leading `/`).
    ///
    /// Track positions are typed one-based, as displayed, and stored zero-based.
    ///
    /// @param input - The command string to parse
    ///
    /// @returns The parsed command or an error
    pub fn parse( input: &str ) -> Result<Self, CommandError> {
        let input = input.trim();
        let mut parts = input.splitn( 2, ' ' );
        let cmd = parts.next().unwrap_or( "" ).to_lowercase();
        let args = parts.next().map( |s| s.trim() ).filter( |s| !s.is_empty() );

        match cmd.as_str() {
            // Transport
            "play" | "p" => match args {
                Some( position ) => Ok( Command::Select { index: parse_position( position )? } ),
                None => Ok( Command::PlayPause ),
            },
            "pause" | "pa" => Ok( Command::PlayPause ),
            "stop" | "st" => Ok( Command::Stop ),
            "next" | "n" => Ok( Command::Next ),
            "prev" | "previous" | "pr" => Ok( Command::Prev ),
            "seek" | "sk" => {
                let arg = args
                    .ok_or_else( || CommandError::MissingArgument( "percentage".into() ) )?;
                Ok( Command::Seek { percent: parse_percent( arg )? } )
            }
            "vol" | "volume" => {
                let arg = args
                    .ok_or_else( || CommandError::MissingArgument( "volume level".into() ) )?;
                let level = parse_percent( arg )?;
                Ok( Command::SetVolume { volume: ( level / 100.0 ) as f32 } )
            }
            "mute" | "m" => Ok( Command::ToggleMute ),
            "loop" | "repeat" | "rep" => Ok( Command::ToggleLoop ),

            // Playlist
            "shuffle" | "sh" => Ok( Command::ToggleShuffle ),
            "move" | "mv" => {
                let arg = args
                    .ok_or_else( || CommandError::MissingArgument( "from and to positions".into() ) )?;
                let ( from, to ) = arg
                    .split_once( char::is_whitespace )
                    .ok_or_else( || CommandError::MissingArgument( "target position".into() ) )?;
                Ok( Command::Move {
                    from: parse_position( from )?,
                    to: parse_position( to.trim() )?,
                })
            }
            "search" | "find" | "?" => {
                let term = args
                    .ok_or_else( || CommandError::MissingArgument( "search term".into() ) )?;
                Ok( Command::Search { term: term.to_string() } )
            }

            // UI
            "theme" | "t" => Ok( Command::ToggleTheme ),
            "help" | "h" => Ok( Command::Help ),
            "quit" | "q" | "exit" => Ok( Command::Quit ),

            "" => Err( CommandError::Unknown( "empty command".into() ) ),
            other => Err( CommandError::Unknown( other.to_string() ) ),
        }
    }


    /// Returns a brief description of the command for help text.
    pub fn description( &self ) -> &'static str {
        match self {
            Command::PlayPause => "Play or pause",
            Command::Stop => "Stop playback",
            Command::Next => "Next track",
            Command::Prev => "Previous track",
            Command::Seek { .. } => "Seek to percentage",
            Command::SetVolume { .. } => "Set volume (0-100)",
            Command::ToggleMute => "Toggle mute",
            Command::ToggleLoop => "Cycle loop mode",
            Command::ToggleShuffle => "Toggle shuffle",
            Command::Select { .. } => "Play track",
            Command::Move { .. } => "Move track",
            Command::Search { .. } => "Search title and artist",
            Command::ToggleTheme => "Toggle theme",
            Command::Help => "Show help",
            Command::Quit => "Quit application",
        }
    }
}


/// Parses a one-based track position into a zero-based index.
fn parse_position( s: &str ) -> Result<usize, CommandError> {
    let position: usize = s.parse()
        .map_err( |_| CommandError::InvalidArgument( format!( "Invalid track number: {}", s ) ) )?;
    position
        .checked_sub( 1 )
        .ok_or_else( || CommandError::InvalidArgument( "Track numbers start at 1".into() ) )
}


/// Parses "50" or "50%" into a value in 0..=100.
fn parse_percent( s: &str ) -> Result<f64, CommandError> {
    let digits = s.trim().trim_end_matches( '%' );
    let value: f64 = digits.parse()
        .map_err( |_| CommandError::InvalidArgument( format!( "Invalid percentage: {}", s ) ) )?;
    if !( 0.0..=100.0 ).contains( &value ) {
        return Err( CommandError::InvalidArgument( format!( "Out of range (0-100): {}", s ) ) );
    }
    Ok( value )
}


/// Returns help text listing all available commands.
pub fn help_text() -> &'static str {
    r#"Playback Commands:
  /play [n]       Play/pause, or play track n     [space]
  /stop           Stop playback                   [s]
  /next           Next track                      [n]
  /prev           Previous track                  [p]
  /seek <0-100>   Seek to percentage              [left/right]
  /vol <0-100>    Set volume                      [+/-]
  /mute           Toggle mute                     [m]
  /loop           Cycle loop (none/all/one)       [l]

Playlist Commands:
  /shuffle        Toggle shuffle                  [z]
  /move <a> <b>   Move track a to position b      [shift+up/down]
  /search <term>  Filter by title or artist       [f]

Other Commands:
  /theme          Toggle dark/light theme         [t]
  /help           Show this help                  [?]
  /quit           Exit cadence                    [q]"#
}


#[cfg( test )]
mod tests {
    use super::*;


    #[test]
    fn test_parse_play_toggles() {
        assert_eq!( Command::parse( "play" ).unwrap(), Command::PlayPause );
        assert_eq!( Command::parse( "pause" ).unwrap(), Command::PlayPause );
    }


    #[test]
    fn test_parse_play_with_position() {
        let cmd = Command::parse( "p 3" ).unwrap();
        assert_eq!( cmd, Command::Select { index: 2 } );
    }


    #[test]
    fn test_parse_play_position_zero() {
        let result = Command::parse( "play 0" );
        assert!( matches!( result, Err( CommandError::InvalidArgument( _ ) ) ) );
    }


    #[test]
    fn test_parse_seek() {
        let cmd = Command::parse( "seek 25" ).unwrap();
        assert_eq!( cmd, Command::Seek { percent: 25.0 } );
    }


    #[test]
    fn test_parse_seek_with_percent_sign() {
        let cmd = Command::parse( "sk 12.5%" ).unwrap();
        assert_eq!( cmd, Command::Seek { percent: 12.5 } );
    }


    #[test]
    fn test_parse_volume() {
        let cmd = Command::parse( "vol 50" ).unwrap();
        assert_eq!( cmd, Command::SetVolume { volume: 0.5 } );
    }


    #[test]
    fn test_parse_volume_out_of_range() {
        let result = Command::parse( "volume 140" );
        assert!( matches!( result, Err( CommandError::InvalidArgument( _ ) ) ) );
    }


    #[test]
    fn test_parse_move() {
        let cmd = Command::parse( "move 4  1" ).unwrap();
        assert_eq!( cmd, Command::Move { from: 3, to: 0 } );
    }


    #[test]
    fn test_parse_move_missing_target() {
        let result = Command::parse( "mv 2" );
        assert!( matches!( result, Err( CommandError::MissingArgument( _ ) ) ) );
    }


    #[test]
    fn test_parse_search_keeps_case_and_spaces() {
        let cmd = Command::parse( "search  Blue Moon " ).unwrap();
        assert_eq!( cmd, Command::Search { term: "Blue Moon".into() } );
    }


    #[test]
    fn test_parse_aliases() {
        assert_eq!( Command::parse( "sh" ).unwrap(), Command::ToggleShuffle );
        assert_eq!( Command::parse( "repeat" ).unwrap(), Command::ToggleLoop );
        assert_eq!( Command::parse( "M" ).unwrap(), Command::ToggleMute );
        assert_eq!( Command::parse( "exit" ).unwrap(), Command::Quit );
        assert_eq!( "theme".parse::<Command>().unwrap(), Command::ToggleTheme );
    }


    #[test]
    fn test_parse_unknown() {
        let result = Command::parse( "foobar" );
        assert!( matches!( result, Err( CommandError::Unknown( _ ) ) ) );
    }


    #[test]
    fn test_parse_missing_arg() {
        let result = Command::parse( "search" );
        assert!( matches!( result, Err( CommandError::MissingArgument( _ ) ) ) );
    }
}

//! Cadence CLI - Terminal UI music player

mod cli;
mod input;
mod logging;
mod view;

use std::io;
use std::sync::Arc;
use std::time::{ Duration, Instant };

use anyhow::{ Context, Result };
use clap::Parser;
use crossterm::{
    event::{ self, Event, KeyCode, KeyEventKind, KeyModifiers },
    terminal::{ disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen },
    ExecutableCommand,
};
use ratatui::{
    prelude::*,
    widgets::{ Block, Borders, Gauge, List, ListItem, ListState, Paragraph, Wrap },
};

use cli::Args;
use input::{ InputMode, Prompt };
use view::{ format_time, Palette, Screen, ScreenModel, ViewMode };

use cadence_core::{
    command, CatalogBuilder, Command, Coordinator, DirFetcher, JsonFileStore, LoopMode,
    MemoryStore, PreferenceStore, Preferences, SpectrumFrame, SpectrumVisualizer,
    SymphoniaBackend, SPECTRUM_BINS,
};


/// Step for +/- volume keys.
const VOLUME_STEP: f32 = 0.05;

/// Step for left/right seek keys, in percent.
const SEEK_STEP: f64 = 5.0;

/// A pending keyboard seek is committed after this much idle time.
const SEEK_SETTLE: Duration = Duration::from_millis( 600 );


/// Keyboard seek in progress: target percentage and last key press.
struct PendingSeek {
    percent: f64,
    touched: Instant,
}


/// Application state.
struct App {
    coordinator: Coordinator,
    screen: Arc<Screen>,
    spectrum: Arc<SpectrumFrame>,
    should_quit: bool,

    view_mode: ViewMode,
    list_state: ListState,
    prompt: Prompt,
    pending_seek: Option<PendingSeek>,
    help_scroll: u16,
}


impl App {
    fn new( coordinator: Coordinator, screen: Arc<Screen>, spectrum: Arc<SpectrumFrame> ) -> Self {
        let mut list_state = ListState::default();
        if !coordinator.playlist().is_empty() {
            list_state.select( Some( 0 ) );
        }

        Self {
            coordinator,
            screen,
            spectrum,
            should_quit: false,
            view_mode: ViewMode::default(),
            list_state,
            prompt: Prompt::default(),
            pending_seek: None,
            help_scroll: 0,
        }
    }


    fn tick( &mut self ) {
        self.coordinator.tick();

        let settled = self.pending_seek
            .as_ref()
            .is_some_and( |s| s.touched.elapsed() >= SEEK_SETTLE );
        if settled {
            self.commit_seek();
        }
    }


    /// Runs a command, handling the ones that only concern the UI.
    fn run( &mut self, command: Command ) {
        match command {
            Command::Help => {
                self.view_mode = ViewMode::Help;
                self.help_scroll = 0;
            }
            Command::Quit => self.should_quit = true,
            other => {
                if !self.coordinator.execute( other ) {
                    self.should_quit = true;
                }
            }
        }
    }


    fn handle_key( &mut self, code: KeyCode, modifiers: KeyModifiers ) {
        if self.prompt.is_open() {
            self.handle_prompt_key( code, modifiers );
            return;
        }

        match self.view_mode {
            ViewMode::Help => self.handle_help_key( code ),
            ViewMode::Playlist => self.handle_playlist_key( code, modifiers ),
        }
    }


    fn handle_playlist_key( &mut self, code: KeyCode, modifiers: KeyModifiers ) {
        let shift = modifiers.contains( KeyModifiers::SHIFT );

        match code {
            KeyCode::Char( 'q' ) => self.run( Command::Quit ),
            KeyCode::Char( '?' ) => self.run( Command::Help ),
            KeyCode::Char( '/' ) => self.prompt.open( InputMode::Command ),
            KeyCode::Char( 'f' ) => {
                self.prompt.open( InputMode::Search );
                self.run( Command::Search { term: String::new() } );
            }
            KeyCode::Esc => {
                self.screen.clear_matches();
                self.clamp_selection();
            }

            KeyCode::Char( ' ' ) => self.run( Command::PlayPause ),
            KeyCode::Char( 's' ) => self.run( Command::Stop ),
            KeyCode::Char( 'n' ) => self.run( Command::Next ),
            KeyCode::Char( 'p' ) => self.run( Command::Prev ),
            KeyCode::Char( 'z' ) => self.run( Command::ToggleShuffle ),
            KeyCode::Char( 'l' ) => self.run( Command::ToggleLoop ),
            KeyCode::Char( 'm' ) => self.run( Command::ToggleMute ),
            KeyCode::Char( 't' ) => self.run( Command::ToggleTheme ),
            KeyCode::Char( '+' ) | KeyCode::Char( '=' ) => {
                let volume = ( self.coordinator.engine().volume() + VOLUME_STEP ).min( 1.0 );
                self.run( Command::SetVolume { volume } );
            }
            KeyCode::Char( '-' ) => {
                let volume = ( self.coordinator.engine().volume() - VOLUME_STEP ).max( 0.0 );
                self.run( Command::SetVolume { volume } );
            }
            KeyCode::Left => self.nudge_seek( -SEEK_STEP ),
            KeyCode::Right => self.nudge_seek( SEEK_STEP ),

            KeyCode::Char( 'K' ) => self.move_selected( -1 ),
            KeyCode::Char( 'J' ) => self.move_selected( 1 ),
            KeyCode::Up if shift => self.move_selected( -1 ),
            KeyCode::Down if shift => self.move_selected( 1 ),
            KeyCode::Up | KeyCode::Char( 'k' ) => self.select_row( -1 ),
            KeyCode::Down | KeyCode::Char( 'j' ) => self.select_row( 1 ),
            KeyCode::Home => self.list_state.select( Some( 0 ) ),
            KeyCode::Enter if self.pending_seek.is_some() => self.commit_seek(),
            KeyCode::Enter => {
                if let Some( index ) = self.selected_track_index() {
                    self.run( Command::Select { index } );
                }
            }
            _ => {}
        }
    }


    fn handle_help_key( &mut self, code: KeyCode ) {
        match code {
            KeyCode::Esc | KeyCode::Char( '?' ) | KeyCode::Char( 'q' ) => {
                self.view_mode = ViewMode::Playlist;
            }
            KeyCode::Up | KeyCode::Char( 'k' ) => self.help_scroll = self.help_scroll.saturating_sub( 1 ),
            KeyCode::Down | KeyCode::Char( 'j' ) => self.help_scroll = self.help_scroll.saturating_add( 1 ),
            _ => {}
        }
    }


    fn handle_prompt_key( &mut self, code: KeyCode, modifiers: KeyModifiers ) {
        let mode = self.prompt.mode();

        match code {
            KeyCode::Enter => {
                let text = self.prompt.close();
                if mode == InputMode::Command {
                    self.execute_line( &text );
                } else {
                    self.list_state.select( Some( 0 ) );
                }
            }
            KeyCode::Esc => {
                self.prompt.close();
                if mode == InputMode::Search {
                    self.screen.clear_matches();
                }
            }
            KeyCode::Backspace => {
                if !self.prompt.pop() && mode == InputMode::Command {
                    self.prompt.close();
                }
                self.refresh_search( mode );
            }
            KeyCode::Char( 'w' ) if modifiers.contains( KeyModifiers::CONTROL ) => {
                self.prompt.pop_word();
                self.refresh_search( mode );
            }
            KeyCode::Char( c ) => {
                self.prompt.push( c );
                self.refresh_search( mode );
            }
            _ => {}
        }
    }


    fn refresh_search( &mut self, mode: InputMode ) {
        if mode == InputMode::Search {
            let term = self.prompt.text().to_string();
            self.run( Command::Search { term } );
            self.list_state.select( Some( 0 ) );
        }
    }


    fn execute_line( &mut self, line: &str ) {
        match Command::parse( line ) {
            Ok( command ) => {
                self.screen.set_status( command.description() );
                self.run( command );
            }
            Err( e ) => self.screen.set_status( e.to_string() ),
        }
    }


    /// Moves the keyboard seek target; the seek is applied once keys settle.
    fn nudge_seek( &mut self, delta: f64 ) {
        let model = self.screen.snapshot();
        if model.duration.is_none() {
            return;
        }

        let base = match self.pending_seek {
            Some( ref pending ) => pending.percent,
            None => model.progress_ratio() * 100.0,
        };
        self.coordinator.set_seeking( true );
        self.pending_seek = Some( PendingSeek {
            percent: ( base + delta ).clamp( 0.0, 100.0 ),
            touched: Instant::now(),
        });
    }


    fn commit_seek( &mut self ) {
        if let Some( pending ) = self.pending_seek.take() {
            self.run( Command::Seek { percent: pending.percent } );
            self.coordinator.set_seeking( false );
        }
    }


    fn select_row( &mut self, delta: isize ) {
        let rows = self.screen.snapshot().visible_rows().len();
        if rows == 0 {
            self.list_state.select( None );
            return;
        }
        let current = self.list_state.selected().unwrap_or( 0 ) as isize;
        let next = ( current + delta ).rem_euclid( rows as isize ) as usize;
        self.list_state.select( Some( next ) );
    }


    fn clamp_selection( &mut self ) {
        let rows = self.screen.snapshot().visible_rows().len();
        let selected = self.list_state.selected().map( |i| i.min( rows.saturating_sub( 1 ) ) );
        self.list_state.select( if rows == 0 { None } else { selected.or( Some( 0 ) ) } );
    }


    /// Playlist index behind the highlighted row.
    fn selected_track_index( &self ) -> Option<usize> {
        let rows = self.screen.snapshot().visible_rows();
        self.list_state.selected().and_then( |row| rows.get( row ).copied() )
    }


    /// Drags the highlighted track one row up or down.
    fn move_selected( &mut self, delta: isize ) {
        if self.screen.snapshot().matches.is_some() {
            self.screen.set_status( "Clear the search (Esc) before moving tracks" );
            return;
        }
        let Some( from ) = self.selected_track_index() else {
            return;
        };
        let len = self.coordinator.playlist().len();
        let to = from as isize + delta;
        if to < 0 || to as usize >= len {
            return;
        }

        self.run( Command::Move { from, to: to as usize } );
        self.list_state.select( Some( to as usize ) );
    }
}


fn main() -> Result<()> {
    let args = Args::parse();

    let log_path = args.log_file.clone().unwrap_or_else( logging::default_log_path );
    logging::init( &log_path )?;

    let music_dir = args.music_dir();
    let names = args.catalog_names( &music_dir )?;
    tracing::info!( "Resolving {} entries against {:?}", names.len(), music_dir );

    let runtime = tokio::runtime::Runtime::new().context( "Failed to start async runtime" )?;
    let builder = CatalogBuilder::new( Arc::new( DirFetcher::new( &music_dir ) ) )
        .with_timeout( args.fetch_timeout() );
    let tracks = runtime.block_on( builder.build( &names ) );

    let store: Arc<dyn PreferenceStore> = match args.prefs.clone().or_else( JsonFileStore::default_path ) {
        Some( path ) => Arc::new( JsonFileStore::open( path ) ),
        None => {
            tracing::warn!( "No config directory; preferences will not be saved" );
            Arc::new( MemoryStore::new() )
        }
    };

    let backend = SymphoniaBackend::new();
    let visualizer = Arc::new( SpectrumVisualizer::new( backend.tap() ) );
    let spectrum = visualizer.frame();
    let screen = Arc::new( Screen::new() );
    let coordinator = Coordinator::new(
        Box::new( backend ),
        visualizer,
        Preferences::new( store ),
        screen.clone(),
        tracks,
    );

    let mut app = App::new( coordinator, screen, spectrum );

    // Setup terminal
    enable_raw_mode()?;
    io::stdout().execute( EnterAlternateScreen )?;
    let mut terminal = Terminal::new( CrosstermBackend::new( io::stdout() ) )?;

    let result = run_loop( &mut terminal, &mut app );

    // Cleanup
    disable_raw_mode()?;
    io::stdout().execute( LeaveAlternateScreen )?;

    if let Err( ref e ) = result {
        tracing::error!( "Exiting on error: {:#}", e );
    }
    result
}


fn run_loop<B: Backend>( terminal: &mut Terminal<B>, app: &mut App ) -> Result<()> {
    while !app.should_quit {
        app.tick();
        terminal.draw( |frame| draw_ui( frame, app ) )?;

        // Short poll so the spectrum animates smoothly
        if event::poll( Duration::from_millis( 33 ) )? {
            if let Event::Key( key ) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    app.handle_key( key.code, key.modifiers );
                }
            }
        }
    }
    tracing::info!( "Quitting" );
    Ok(())
}


/// Draws the main UI.
fn draw_ui( frame: &mut Frame, app: &mut App ) {
    let model = app.screen.snapshot();
    let palette = Palette::for_theme( model.theme );
    let area = frame.area();

    frame.render_widget( Block::default().style( Style::default().bg( palette.background ) ), area );

    let chunks = Layout::default()
        .direction( Direction::Vertical )
        .constraints([
            Constraint::Length( 2 ),  // Header
            Constraint::Min( 0 ),     // Playlist / help
            Constraint::Length( 8 ),  // Spectrum
            Constraint::Length( 5 ),  // Now playing
            Constraint::Length( 1 ),  // Status bar
        ])
        .split( area );

    let header = Paragraph::new( "  CADENCE" )
        .style( Style::default().fg( palette.accent ).bold() )
        .block( Block::default().borders( Borders::BOTTOM ) );
    frame.render_widget( header, chunks[0] );

    match app.view_mode {
        ViewMode::Playlist => draw_playlist( frame, app, &model, &palette, chunks[1] ),
        ViewMode::Help => draw_help( frame, app, &palette, chunks[1] ),
    }
    draw_spectrum( frame, &app.spectrum.bins(), &palette, chunks[2] );
    draw_now_playing( frame, app, &model, &palette, chunks[3] );
    draw_status_bar( frame, app, &model, &palette, chunks[4] );
}


fn draw_playlist( frame: &mut Frame, app: &mut App, model: &ScreenModel, palette: &Palette, area: Rect ) {
    let Some( ref view ) = model.view else {
        return;
    };

    let rows = model.visible_rows();
    let items: Vec<ListItem> = rows
        .iter()
        .filter_map( |&i| view.playlist.get( i ).map( |t| ( i, t ) ) )
        .map( |( i, track )| {
            let playing = Some( i ) == view.current_index;
            let marker = if playing { if view.is_playing { "▶ " } else { "■ " } } else { "  " };
            let style = if playing {
                Style::default().fg( palette.accent ).bold()
            } else {
                Style::default().fg( palette.text )
            };
            ListItem::new( Line::from( vec![
                Span::styled( format!( "{}{:>3}. {}", marker, i + 1, track.title() ), style ),
                Span::styled( format!( "  {}", track.artist() ), Style::default().fg( palette.dim ) ),
            ]))
        })
        .collect();

    let title = format!(
        " Playlist ({}{}) {} {} ",
        match model.matches {
            Some( ref m ) => format!( "{} of ", m.len() ),
            None => String::new(),
        },
        view.playlist.len(),
        if view.is_shuffled { "[shuffle]" } else { "" },
        match view.loop_mode {
            LoopMode::None => "",
            LoopMode::All => "[loop all]",
            LoopMode::One => "[loop one]",
        }
    );

    let list = List::new( items )
        .block( Block::default().title( title ).borders( Borders::ALL ) )
        .highlight_style( Style::default().bg( palette.highlight_bg ).fg( palette.highlight_fg ) )
        .highlight_symbol( ">> " );

    frame.render_stateful_widget( list, area, &mut app.list_state );
}


fn draw_help( frame: &mut Frame, app: &App, palette: &Palette, area: Rect ) {
    let help = Paragraph::new( command::help_text() )
        .style( Style::default().fg( palette.text ) )
        .block( Block::default().title( " Help (Esc to close) " ).borders( Borders::ALL ) )
        .wrap( Wrap { trim: false } )
        .scroll(( app.help_scroll, 0 ));
    frame.render_widget( help, area );
}


fn draw_spectrum( frame: &mut Frame, bins: &[u8], palette: &Palette, area: Rect ) {
    let height = area.height.saturating_sub( 2 ) as usize;
    let width = area.width.saturating_sub( 2 ) as usize;
    let levels = [ ' ', '▁', '▂', '▃', '▄', '▅', '▆', '▇', '█' ];

    // Low bins carry most of the energy; show the lower half across the width
    let shown = ( SPECTRUM_BINS / 2 ).min( bins.len() );
    let columns: Vec<f32> = ( 0..width )
        .map( |x| {
            if shown == 0 {
                return 0.0;
            }
            let bin = ( x * shown ) / width.max( 1 );
            bins[ bin.min( shown - 1 ) ] as f32 / 255.0
        })
        .collect();

    let lines: Vec<Line> = ( 0..height )
        .rev()
        .map( |row| {
            let text: String = columns
                .iter()
                .map( |level| {
                    let fill = ( level * height as f32 - row as f32 ).clamp( 0.0, 1.0 );
                    levels[ ( fill * 8.0 ).round() as usize ]
                })
                .collect();
            Line::from( Span::styled( text, Style::default().fg( palette.accent ) ) )
        })
        .collect();

    let spectrum = Paragraph::new( lines )
        .block( Block::default().title( " Spectrum " ).borders( Borders::ALL ) );
    frame.render_widget( spectrum, area );
}


fn draw_now_playing( frame: &mut Frame, app: &App, model: &ScreenModel, palette: &Palette, area: Rect ) {
    let block = Block::default().title( " Now Playing " ).borders( Borders::ALL );
    let inner = block.inner( area );
    frame.render_widget( block, area );

    let rows = Layout::default()
        .direction( Direction::Vertical )
        .constraints([ Constraint::Length( 1 ), Constraint::Length( 1 ), Constraint::Length( 1 ) ])
        .split( inner );

    let view = model.view.as_ref();
    let track = view.and_then( |v| v.current_track.as_ref() );
    let state = match view {
        Some( v ) if v.is_playing => "▶",
        Some( v ) if v.current_track.is_some() => "⏸",
        _ => "■",
    };
    let ( title, artist ) = match track {
        Some( t ) => ( t.title().to_string(), t.artist().to_string() ),
        None => ( "No track".to_string(), String::new() ),
    };

    frame.render_widget(
        Paragraph::new( Line::from( vec![
            Span::styled( format!( " {} {}", state, title ), Style::default().fg( palette.text ).bold() ),
            Span::styled( format!( "  {}", artist ), Style::default().fg( palette.dim ) ),
        ])),
        rows[0],
    );

    let ( ratio, position ) = match app.pending_seek {
        Some( ref pending ) => {
            let target = model.duration.map( |d| d.mul_f64( pending.percent / 100.0 ) ).unwrap_or_default();
            ( pending.percent / 100.0, target )
        }
        None => ( model.progress_ratio(), model.position ),
    };
    let label = match model.duration {
        Some( d ) => format!( "{} / {}", format_time( position ), format_time( d ) ),
        None => format!( "{} / --:--", format_time( position ) ),
    };
    let gauge = Gauge::default()
        .gauge_style( Style::default().fg( palette.accent ).bg( palette.highlight_bg ) )
        .ratio( ratio.clamp( 0.0, 1.0 ) )
        .label( label );
    frame.render_widget( gauge, rows[1] );

    let volume = match view {
        Some( v ) if v.is_muted => "muted".to_string(),
        Some( v ) => format!( "vol {}%", ( v.volume * 100.0 ).round() as i32 ),
        None => String::new(),
    };
    let cover = track
        .and_then( |t| t.artwork() )
        .map( |art| format!( "  cover: {} ({} KiB)", art.media_type, art.data.len() / 1024 ) )
        .unwrap_or_default();
    frame.render_widget(
        Paragraph::new( format!( " {}{}", volume, cover ) ).style( Style::default().fg( palette.dim ) ),
        rows[2],
    );
}


fn draw_status_bar( frame: &mut Frame, app: &App, model: &ScreenModel, palette: &Palette, area: Rect ) {
    let ( text, style ) = if app.prompt.is_open() {
        (
            format!( "{}{}", app.prompt.mode().prefix(), app.prompt.text() ),
            Style::default().fg( Color::Yellow ),
        )
    } else if let Some( message ) = model.status_text() {
        // Multi-line messages show their first line only
        ( message.lines().next().unwrap_or( "" ).to_string(), Style::default().fg( palette.status ) )
    } else {
        let hint = match app.view_mode {
            ViewMode::Playlist => " [/]Cmd [f]Find [Space]Play [n/p]Skip [←→]Seek [z]Shuffle [l]Loop [m]Mute [t]Theme [?]Help [q]Quit ",
            ViewMode::Help => " [↑↓]Scroll [Esc]Close ",
        };
        ( hint.to_string(), Style::default().fg( palette.dim ) )
    };

    frame.render_widget( Paragraph::new( text ).style( style ), area );

    if app.prompt.is_open() {
        frame.set_cursor_position(( area.x + app.prompt.cursor_column() as u16, area.y ));
    }
}

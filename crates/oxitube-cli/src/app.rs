//! Interactive shell state and command execution.
//!
//! The main thread owns the `App` and feeds it events from the input
//! reader and the player poll timer, one at a time.

use std::io::{ self, Write };
use std::path::PathBuf;

use tokio::sync::mpsc::UnboundedReceiver;

use oxitube_core::{
    command::{ self, Command },
    LogSink, PlaylistItem, PlaylistManager, PollOutcome, Resolution, SessionState,
};

use crate::settings::Settings;


/// Something the shell must react to.
#[derive( Debug, Clone, PartialEq, Eq )]
pub enum AppEvent {
    /// A line typed by the user.
    Line( String ),

    /// The player poll timer fired for a session generation.
    Tick { generation: u64 },

    /// Input closed.
    Eof,
}


/// Sink that prints user-facing reports to the shell.
#[derive( Debug, Default, Clone, Copy )]
pub struct ConsoleSink;


impl LogSink for ConsoleSink {
    fn log( &self, line: &str ) {
        tracing::debug!( target: "oxitube::downloader", "{}", line );
    }


    fn report( &self, message: &str ) {
        println!( "! {}", message );
    }
}


/// Shell application state.
pub struct App {
    manager: PlaylistManager,
    settings: Settings,
    settings_path: Option<PathBuf>,
    resolution: Resolution,
    should_quit: bool,
}


impl App {
    /// Creates the shell.
    ///
    /// @param manager - Playlist manager driving playback
    /// @param settings - Settings as stored on disk, updated by `/settings`
    /// @param settings_path - Where `/settings` writes to
    /// @param resolution - Resolution the manager was created with
    pub fn new( manager: PlaylistManager, settings: Settings, settings_path: Option<PathBuf>, resolution: Resolution ) -> Self {
        Self {
            manager,
            settings,
            settings_path,
            resolution,
            should_quit: false,
        }
    }


    /// Handles events until the user quits or every sender is gone.
    pub fn run( &mut self, events: &mut UnboundedReceiver<AppEvent> ) -> io::Result<()> {
        let mut out = io::stdout();
        writeln!( out, "Type /help for commands." )?;

        while !self.should_quit {
            match events.blocking_recv() {
                Some( event ) => self.handle_event( event, &mut out )?,
                None => break,
            }
            out.flush()?;
        }

        Ok(())
    }


    /// Handles one event.
    pub fn handle_event( &mut self, event: AppEvent, out: &mut impl Write ) -> io::Result<()> {
        match event {
            AppEvent::Line( line ) => self.handle_line( &line, out ),
            AppEvent::Tick { generation } => self.handle_tick( generation, out ),
            AppEvent::Eof => {
                self.should_quit = true;
                Ok(())
            }
        }
    }


    /// Parses and runs one line of input. Blank lines are ignored.
    pub fn handle_line( &mut self, line: &str, out: &mut impl Write ) -> io::Result<()> {
        if line.trim().is_empty() {
            return Ok(());
        }

        match Command::parse( line ) {
            Ok( cmd ) => self.run_command( cmd, out ),
            Err( e ) => writeln!( out, "Error: {}", e ),
        }
    }


    fn handle_tick( &mut self, generation: u64, out: &mut impl Write ) -> io::Result<()> {
        match self.manager.on_poll_tick( generation ) {
            Ok( PollOutcome::Ended ) => {
                if self.manager.session().state() == SessionState::Playing {
                    self.write_now_playing( out )
                } else {
                    writeln!( out, "End of playlist" )
                }
            }
            Ok( _ ) => Ok(()),
            Err( e ) => writeln!( out, "Error: {}", e ),
        }
    }


    fn run_command( &mut self, cmd: Command, out: &mut impl Write ) -> io::Result<()> {
        match cmd {
            Command::Add { link, title } => {
                let title = title.unwrap_or_else( || link.clone() );
                let shown = title.clone();
                match self.manager.add( PlaylistItem::new( link, title ) ) {
                    Ok( true ) => {
                        writeln!( out, "Added: {}", shown )?;
                        self.write_now_playing( out )?;
                    }
                    Ok( false ) => {
                        writeln!( out, "Already in playlist: {}", shown )?;
                        self.write_now_playing( out )?;
                    }
                    Err( e ) => writeln!( out, "Error: {}", e )?,
                }
            }
            Command::Remove { index } => {
                match self.manager.remove( index ) {
                    Ok( item ) => writeln!( out, "Removed: {}", item.title )?,
                    Err( e ) => writeln!( out, "Error: {}", e )?,
                }
            }
            Command::List => self.write_list( out )?,
            Command::Save { path } => {
                match self.manager.save( &path ) {
                    Ok(()) => writeln!( out, "Saved playlist to {}", path.display() )?,
                    Err( e ) => writeln!( out, "Failed to save: {}", e )?,
                }
            }
            Command::Load { path } => {
                match self.manager.load( &path ) {
                    Ok(()) => writeln!( out, "Loaded {} item(s) from {}", self.manager.playlist().len(), path.display() )?,
                    Err( e ) => writeln!( out, "Failed to load: {}", e )?,
                }
            }

            Command::Play { index } => {
                let result = match index {
                    Some( index ) => self.manager.play_at( index ),
                    None => self.manager.play_from_current(),
                };
                self.write_play_result( result, out )?;
            }
            Command::Next => {
                let result = self.manager.next();
                self.write_play_result( result, out )?;
            }
            Command::Pause => {
                match self.manager.toggle_pause() {
                    Some( true ) => writeln!( out, "Paused" )?,
                    Some( false ) => writeln!( out, "Resumed" )?,
                    None => writeln!( out, "Pause state unchanged" )?,
                }
            }
            Command::Stop => {
                self.manager.stop();
                writeln!( out, "Stopped" )?;
            }

            Command::Audio { enabled } => {
                let audio_only = enabled.unwrap_or( !self.manager.quality().audio_only );
                self.manager.set_audio_only( audio_only );
                writeln!( out, "Audio only: {} (applies to next play)", on_off( audio_only ) )?;
            }
            Command::Resolution { resolution } => {
                self.manager.set_resolution( resolution );
                self.resolution = resolution;
                writeln!( out, "Resolution: {} (applies to next play)", resolution )?;
            }

            Command::Status => self.write_status( out )?,
            Command::Settings => {
                self.settings.audio_only = self.manager.quality().audio_only;
                self.settings.resolution = self.resolution;
                match &self.settings_path {
                    Some( path ) if self.settings.save_to( path ) => writeln!( out, "Settings saved to {}", path.display() )?,
                    _ => writeln!( out, "Failed to save settings" )?,
                }
            }
            Command::Help => writeln!( out, "{}", command::help_text() )?,
            Command::Quit => self.should_quit = true,
        }
        Ok(())
    }


    fn write_play_result( &self, result: Result<bool, oxitube_core::ManagerError>, out: &mut impl Write ) -> io::Result<()> {
        match result {
            Ok( true ) => self.write_now_playing( out ),
            Ok( false ) => writeln!( out, "Nothing to play" ),
            Err( e ) => writeln!( out, "Error: {}", e ),
        }
    }


    fn write_now_playing( &self, out: &mut impl Write ) -> io::Result<()> {
        let playlist = self.manager.playlist();
        match playlist.current() {
            Some( item ) if self.manager.session().state() == SessionState::Playing => {
                writeln!( out, "Now playing {}/{}: {}", playlist.current_index() + 1, playlist.len(), item.title )
            }
            _ => Ok(()),
        }
    }


    fn write_list( &self, out: &mut impl Write ) -> io::Result<()> {
        let playlist = self.manager.playlist();
        if playlist.is_empty() {
            return writeln!( out, "Playlist is empty" );
        }

        for ( i, item ) in playlist.items().iter().enumerate() {
            let marker = if i == playlist.current_index() { '>' } else { ' ' };
            writeln!( out, "{} {:>3}. {}", marker, i + 1, item.title )?;
        }
        Ok(())
    }


    fn write_status( &self, out: &mut impl Write ) -> io::Result<()> {
        let session = self.manager.session();
        let playlist = self.manager.playlist();
        let quality = self.manager.quality();

        writeln!( out, "State:      {:?}", session.state() )?;
        writeln!( out, "Item:       {}/{}", playlist.current_index() + 1, playlist.len() )?;
        writeln!( out, "Audio only: {}", on_off( quality.audio_only ) )?;
        writeln!( out, "Resolution: {}", self.resolution )?;
        writeln!( out, "Pause mode: {:?}", session.policy() )?;
        writeln!( out, "Autosave:   {}", self.manager.autosave_path().display() )
    }


    /// Returns true once the user asked to quit or input closed.
    pub fn should_quit( &self ) -> bool {
        self.should_quit
    }


    /// Saves the playlist and stops the player.
    pub fn shutdown( &mut self ) {
        self.manager.shutdown();
    }


    #[cfg( test )]
    pub fn manager( &self ) -> &PlaylistManager {
        &self.manager
    }
}


fn on_off( value: bool ) -> &'static str {
    if value { "on" } else { "off" }
}


#[cfg( test )]
mod tests {
    use super::*;
    use std::sync::Arc;
    use oxitube_core::{
        ControlPolicy, Fetch, FetchRequest, MpvLauncher, PlaybackSession, PollScheduler, Quality,
    };
    use tempfile::TempDir;


    struct NoFetch;

    impl Fetch for NoFetch {
        fn spawn( &self, _request: FetchRequest ) {}
    }


    struct NoTimer;

    impl PollScheduler for NoTimer {
        fn arm( &mut self, _generation: u64 ) {}
        fn cancel( &mut self ) {}
    }


    /// App whose player can never start.
    fn app( dir: &TempDir ) -> App {
        let launcher = MpvLauncher::new( dir.path().join( "no-such-player" ) );
        let session = PlaybackSession::new( Box::new( launcher ), Box::new( NoTimer ), ControlPolicy::ExplicitState );
        let manager = PlaylistManager::new( session, Arc::new( NoFetch ), dir.path().to_path_buf(), Quality::default() );
        App::new(
            manager,
            Settings::default(),
            Some( dir.path().join( "settings.json" ) ),
            Resolution::P480,
        )
    }


    fn run( app: &mut App, line: &str ) -> String {
        let mut out = Vec::new();
        app.handle_line( line, &mut out ).unwrap();
        String::from_utf8( out ).unwrap()
    }


    #[test]
    fn test_add_keeps_item_when_player_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut app = app( &dir );

        let output = run( &mut app, "/add https://www.youtube.com/watch?v=abc My Song" );

        assert!( output.contains( "Error:" ), "{}", output );
        assert_eq!( app.manager().playlist().len(), 1 );
        assert_eq!( app.manager().playlist().items()[ 0 ].title, "My Song" );
    }


    #[test]
    fn test_list_marks_cursor() {
        let dir = tempfile::tempdir().unwrap();
        let mut app = app( &dir );
        run( &mut app, "add aaa First" );
        run( &mut app, "add bbb" );

        let output = run( &mut app, "list" );
        assert_eq!( output, "    1. First\n>   2. https://www.youtube.com/watch?v=bbb\n" );
    }


    #[test]
    fn test_remove_by_position() {
        let dir = tempfile::tempdir().unwrap();
        let mut app = app( &dir );
        run( &mut app, "add aaa First" );
        run( &mut app, "add bbb Second" );

        assert_eq!( run( &mut app, "remove 1" ), "Removed: First\n" );
        assert!( run( &mut app, "remove 0" ).starts_with( "Error:" ) );
        assert_eq!( app.manager().playlist().len(), 1 );
    }


    #[test]
    fn test_play_on_empty_playlist() {
        let dir = tempfile::tempdir().unwrap();
        let mut app = app( &dir );
        assert_eq!( run( &mut app, "play" ), "Nothing to play\n" );
        assert!( run( &mut app, "play 4" ).starts_with( "Error:" ) );
    }


    #[test]
    fn test_quality_commands() {
        let dir = tempfile::tempdir().unwrap();
        let mut app = app( &dir );

        run( &mut app, "audio" );
        run( &mut app, "res 720p" );

        assert_eq!( app.manager().quality(), Quality::new( false, Resolution::P720 ) );
    }


    #[test]
    fn test_settings_command_persists_quality() {
        let dir = tempfile::tempdir().unwrap();
        let mut app = app( &dir );
        run( &mut app, "audio off" );
        run( &mut app, "res 1080p" );

        let output = run( &mut app, "settings" );
        assert!( output.starts_with( "Settings saved" ), "{}", output );

        let saved = Settings::load_from( &dir.path().join( "settings.json" ) );
        assert!( !saved.audio_only );
        assert_eq!( saved.resolution, Resolution::P1080 );
    }


    #[test]
    fn test_save_and_load_commands() {
        let dir = tempfile::tempdir().unwrap();
        let mut app = app( &dir );
        run( &mut app, "add aaa First" );
        let path = dir.path().join( "mine.m3u" );

        run( &mut app, &format!( "save {}", path.display() ) );
        run( &mut app, "remove 1" );
        let output = run( &mut app, &format!( "load {}", path.display() ) );

        assert!( output.starts_with( "Loaded 1 item(s)" ), "{}", output );
        assert_eq!( app.manager().playlist().items()[ 0 ].title, "First" );
    }


    #[test]
    fn test_parse_errors_are_printed() {
        let dir = tempfile::tempdir().unwrap();
        let mut app = app( &dir );
        assert_eq!( run( &mut app, "dance" ), "Error: Unknown command: dance\n" );
        assert_eq!( run( &mut app, "   " ), "" );
    }


    #[test]
    fn test_quit_and_eof() {
        let dir = tempfile::tempdir().unwrap();
        let mut app = app( &dir );
        run( &mut app, "/quit" );
        assert!( app.should_quit() );

        let mut app = self::app( &dir );
        let mut out = Vec::new();
        app.handle_event( AppEvent::Eof, &mut out ).unwrap();
        assert!( app.should_quit() );
    }


    #[test]
    fn test_stale_tick_is_silent() {
        let dir = tempfile::tempdir().unwrap();
        let mut app = app( &dir );
        let mut out = Vec::new();

        app.handle_event( AppEvent::Tick { generation: 42 }, &mut out ).unwrap();
        assert!( out.is_empty() );
    }
}

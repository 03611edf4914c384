//! Shell command parsing.
//!
//! Commands are typed one per line, with or without a leading `/`.
//! Playlist positions are 1-based at the prompt and 0-based once parsed.

use std::path::PathBuf;

use thiserror::Error;

use crate::link;
use crate::quality::Resolution;


/// Errors that can occur during command parsing.
#[derive( Debug, Error )]
pub enum CommandError {
    #[error( "Unknown command: {0}" )]
    Unknown( String ),

    #[error( "Invalid argument: {0}" )]
    InvalidArgument( String ),

    #[error( "Missing argument: {0}" )]
    MissingArgument( String ),
}


/// Parsed shell command.
#[derive( Debug, Clone, PartialEq )]
pub enum Command {
    // Playlist commands
    Add { link: String, title: Option<String> },
    Remove { index: Option<usize> },
    List,
    Save { path: PathBuf },
    Load { path: PathBuf },

    // Playback commands
    Play { index: Option<usize> },
    Next,
    Pause,
    Stop,

    // Quality commands
    Audio { enabled: Option<bool> },
    Resolution { resolution: Resolution },

    // Other commands
    Status,
    Settings,
    Help,
    Quit,
}


impl Command {
    /// Parses one line of shell input.
    ///
    /// @param input - The line to parse, optionally starting with `/`
    ///
    /// @returns The parsed command or an error
    pub fn parse( input: &str ) -> Result<Self, CommandError> {
        let input = input.trim();
        let input = input.strip_prefix( '/' ).unwrap_or( input );
        let mut parts = input.splitn( 2, char::is_whitespace );
        let cmd = parts.next().unwrap_or( "" ).to_lowercase();
        let args = parts.next().map( str::trim ).filter( |s| !s.is_empty() );

        match cmd.as_str() {
            "add" | "a" => {
                let args = args
                    .ok_or_else( || CommandError::MissingArgument( "link or video id".into() ) )?;
                let mut words = args.splitn( 2, char::is_whitespace );
                let target = words.next().unwrap_or( "" );
                let title = words.next().map( str::trim ).filter( |s| !s.is_empty() );

                let link = if link::is_link( target ) {
                    target.to_string()
                } else {
                    link::watch_url( target )
                };
                Ok( Command::Add { link, title: title.map( String::from ) } )
            }
            "remove" | "rm" | "del" => Ok( Command::Remove { index: args.and_then( parse_position ) } ),
            "list" | "ls" => Ok( Command::List ),
            "save" => {
                let path = args
                    .ok_or_else( || CommandError::MissingArgument( "playlist path".into() ) )?;
                Ok( Command::Save { path: PathBuf::from( path ) } )
            }
            "load" => {
                let path = args
                    .ok_or_else( || CommandError::MissingArgument( "playlist path".into() ) )?;
                Ok( Command::Load { path: PathBuf::from( path ) } )
            }

            "play" | "p" => {
                let index = args
                    .map( |s| parse_position( s )
                        .ok_or_else( || CommandError::InvalidArgument( format!( "Invalid position: {}", s ) ) ) )
                    .transpose()?;
                Ok( Command::Play { index } )
            }
            "next" | "n" => Ok( Command::Next ),
            "pause" | "space" => Ok( Command::Pause ),
            "stop" => Ok( Command::Stop ),

            "audio" => {
                let enabled = args.map( parse_switch ).transpose()?;
                Ok( Command::Audio { enabled } )
            }
            "res" | "resolution" => {
                let value = args
                    .ok_or_else( || CommandError::MissingArgument( "resolution".into() ) )?;
                let resolution = value.parse::<Resolution>()
                    .map_err( |e| CommandError::InvalidArgument( e.to_string() ) )?;
                Ok( Command::Resolution { resolution } )
            }

            "status" | "st" => Ok( Command::Status ),
            "settings" => Ok( Command::Settings ),
            "help" | "h" | "?" => Ok( Command::Help ),
            "quit" | "q" | "exit" => Ok( Command::Quit ),

            "" => Err( CommandError::Unknown( "empty command".into() ) ),
            other => Err( CommandError::Unknown( other.to_string() ) ),
        }
    }
}


/// Converts a 1-based position to an index. Zero and junk are no position.
fn parse_position( s: &str ) -> Option<usize> {
    s.parse::<usize>().ok()?.checked_sub( 1 )
}


fn parse_switch( s: &str ) -> Result<bool, CommandError> {
    match s.to_lowercase().as_str() {
        "on" | "yes" | "true" | "1" => Ok( true ),
        "off" | "no" | "false" | "0" => Ok( false ),
        _ => Err( CommandError::InvalidArgument(
            format!( "Invalid switch: '{}'. Use 'on' or 'off'", s )
        )),
    }
}


/// Returns help text listing all available commands.
pub fn help_text() -> &'static str {
    r#"Playlist Commands:
  /add <url|id> [title]  Add to playlist and play
  /remove <n>            Remove item n
  /list                  Show the playlist
  /save <path>           Save playlist to a file
  /load <path>           Replace playlist from a file

Playback Commands:
  /play [n]              Play from the cursor or item n
  /next                  Next item
  /pause                 Pause or resume
  /stop                  Stop playback

Quality Commands:
  /audio [on|off]        Audio only (toggles without argument)
  /res <480p|720p|1080p> Video height limit

Other Commands:
  /status                Show playback status
  /settings              Save current choices as defaults
  /help                  Show this help
  /quit                  Exit oxitube"#
}


#[cfg( test )]
mod tests {
    use super::*;


    #[test]
    fn test_parse_add_link_with_title() {
        let cmd = Command::parse( "/add https://www.youtube.com/watch?v=abc Some Song" ).unwrap();
        assert_eq!( cmd, Command::Add {
            link: "https://www.youtube.com/watch?v=abc".into(),
            title: Some( "Some Song".into() ),
        });
    }


    #[test]
    fn test_parse_add_video_id() {
        let cmd = Command::parse( "a dQw4w9WgXcQ" ).unwrap();
        assert_eq!( cmd, Command::Add {
            link: "https://www.youtube.com/watch?v=dQw4w9WgXcQ".into(),
            title: None,
        });
    }


    #[test]
    fn test_parse_positions_are_one_based() {
        assert_eq!( Command::parse( "play 3" ).unwrap(), Command::Play { index: Some( 2 ) } );
        assert_eq!( Command::parse( "play" ).unwrap(), Command::Play { index: None } );
        assert_eq!( Command::parse( "remove 1" ).unwrap(), Command::Remove { index: Some( 0 ) } );
    }


    #[test]
    fn test_parse_remove_without_position() {
        assert_eq!( Command::parse( "remove 0" ).unwrap(), Command::Remove { index: None } );
        assert_eq!( Command::parse( "rm x" ).unwrap(), Command::Remove { index: None } );
        assert_eq!( Command::parse( "rm" ).unwrap(), Command::Remove { index: None } );
    }


    #[test]
    fn test_parse_play_invalid_position() {
        let result = Command::parse( "play zero" );
        assert!( matches!( result, Err( CommandError::InvalidArgument( _ ) ) ) );
    }


    #[test]
    fn test_parse_audio() {
        assert_eq!( Command::parse( "audio off" ).unwrap(), Command::Audio { enabled: Some( false ) } );
        assert_eq!( Command::parse( "AUDIO On" ).unwrap(), Command::Audio { enabled: Some( true ) } );
        assert_eq!( Command::parse( "audio" ).unwrap(), Command::Audio { enabled: None } );
        assert!( Command::parse( "audio maybe" ).is_err() );
    }


    #[test]
    fn test_parse_resolution() {
        let cmd = Command::parse( "res 1080p" ).unwrap();
        assert_eq!( cmd, Command::Resolution { resolution: Resolution::P1080 } );

        let result = Command::parse( "res 4k" );
        assert!( matches!( result, Err( CommandError::InvalidArgument( _ ) ) ) );
    }


    #[test]
    fn test_parse_save_path_with_spaces() {
        let cmd = Command::parse( "save my lists/road trip.m3u" ).unwrap();
        assert_eq!( cmd, Command::Save { path: PathBuf::from( "my lists/road trip.m3u" ) } );
    }


    #[test]
    fn test_parse_unknown() {
        let result = Command::parse( "foobar" );
        assert!( matches!( result, Err( CommandError::Unknown( _ ) ) ) );
    }


    #[test]
    fn test_parse_missing_arg() {
        let result = Command::parse( "/load" );
        assert!( matches!( result, Err( CommandError::MissingArgument( _ ) ) ) );
    }
}

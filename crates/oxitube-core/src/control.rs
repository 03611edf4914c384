//! Player control channel
//!
//! mpv listens on a Unix socket (or a named pipe on Windows) given to it with
//! `--input-ipc-server`. Commands are single JSON objects, one per line.
//! The player creates the endpoint some time after it starts, so connecting
//! retries for a short while before giving up.

use std::fmt;
use std::io::{ self, Write };
use std::sync::atomic::{ AtomicU64, Ordering };
use std::thread;
use std::time::Duration;

use serde::{ Deserialize, Serialize };
use serde_json::json;
use thiserror::Error;


/// Number of connection attempts before the endpoint counts as unavailable.
pub const CONNECT_ATTEMPTS: usize = 10;

/// Pause between connection attempts.
pub const CONNECT_RETRY_DELAY: Duration = Duration::from_millis( 100 );

/// How long to wait for the player's reply after sending a command.
pub const RESPONSE_TIMEOUT: Duration = Duration::from_millis( 500 );

static NEXT_ENDPOINT: AtomicU64 = AtomicU64::new( 1 );


#[cfg( unix )]
type Stream = std::os::unix::net::UnixStream;

#[cfg( windows )]
type Stream = std::fs::File;


/// Errors that can occur on the control channel.
#[derive( Debug, Error )]
pub enum ControlError {
    #[error( "Control endpoint {0} unavailable" )]
    Unavailable( String ),

    #[error( "IO error: {0}" )]
    Io( #[from] io::Error ),
}


/// How pause/resume is expressed to the player.
#[derive( Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize )]
#[serde( rename_all = "lowercase" )]
pub enum ControlPolicy {
    /// Track the desired state locally and always send `set_property pause`.
    #[default]
    #[serde( rename = "explicit" )]
    ExplicitState,

    /// Send `cycle pause`. Can drift from the player's real state if a
    /// command is lost.
    Toggle,
}


/// Commands sent to the player.
#[derive( Debug, Clone, Copy, PartialEq, Eq )]
pub enum ControlCommand {
    SetPause( bool ),
    CyclePause,
}


impl ControlCommand {
    /// Encodes the command as one newline-terminated JSON line.
    pub fn to_line( self ) -> String {
        let args = match self {
            ControlCommand::SetPause( paused ) => json!([ "set_property", "pause", paused ]),
            ControlCommand::CyclePause => json!([ "cycle", "pause" ]),
        };
        format!( "{}\n", json!({ "command": args }) )
    }
}


/// Address of a player's control endpoint.
#[derive( Debug, Clone, PartialEq, Eq )]
pub struct EndpointAddress( String );


impl EndpointAddress {
    /// Wraps an explicit address.
    pub fn new( address: impl Into<String> ) -> Self {
        Self( address.into() )
    }


    /// Builds an address unique to this process and player launch.
    pub fn for_player() -> Self {
        let sequence = NEXT_ENDPOINT.fetch_add( 1, Ordering::Relaxed );
        let name = format!( "oxitube-mpv-{}-{}", std::process::id(), sequence );

        #[cfg( windows )]
        {
            Self( format!( r"\\.\pipe\{}", name ) )
        }
        #[cfg( not( windows ) )]
        {
            let path = std::env::temp_dir().join( format!( "{}.sock", name ) );
            Self( path.to_string_lossy().into_owned() )
        }
    }


    /// Gets the address string passed to the player.
    pub fn as_str( &self ) -> &str {
        &self.0
    }


    /// Removes a leftover socket file from an earlier player.
    pub fn remove_stale( &self ) {
        #[cfg( unix )]
        {
            let _ = std::fs::remove_file( &self.0 );
        }
    }
}


impl fmt::Display for EndpointAddress {
    fn fmt( &self, f: &mut fmt::Formatter<'_> ) -> fmt::Result {
        f.write_str( &self.0 )
    }
}


/// An open connection to a player's control endpoint.
pub struct Endpoint {
    stream: Stream,
}


impl Endpoint {
    /// Sends one command, then waits briefly for the reply.
    ///
    /// A missing reply is not an error and gives `None`.
    pub fn send( &mut self, command: ControlCommand ) -> Result<Option<String>, ControlError> {
        let line = command.to_line();
        tracing::debug!( "Control -> {}", line.trim_end() );

        self.stream.write_all( line.as_bytes() )?;
        self.stream.flush()?;

        Ok( self.drain_response() )
    }


    #[cfg( unix )]
    fn drain_response( &mut self ) -> Option<String> {
        use std::io::Read;

        if let Err( e ) = self.stream.set_read_timeout( Some( RESPONSE_TIMEOUT ) ) {
            tracing::debug!( "Cannot wait for control reply: {}", e );
            return None;
        }

        let mut buf = [ 0u8; 4096 ];
        match self.stream.read( &mut buf ) {
            Ok( 0 ) => None,
            Ok( n ) => {
                let reply = String::from_utf8_lossy( &buf[ ..n ] ).into_owned();
                tracing::debug!( "Control <- {}", reply.trim_end() );
                Some( reply )
            }
            Err( e ) => {
                tracing::debug!( "No control reply: {}", e );
                None
            }
        }
    }


    // Pipe reads cannot time out, so the reply is left unread.
    #[cfg( windows )]
    fn drain_response( &mut self ) -> Option<String> {
        None
    }
}


/// Returns true if any line of a reply is a command result with
/// `"error": "success"`. Event lines the player interleaves are skipped.
pub fn is_success( reply: &str ) -> bool {
    reply.lines()
        .filter_map( |line| serde_json::from_str::<serde_json::Value>( line ).ok() )
        .any( |value| value.get( "error" ).and_then( |e| e.as_str() ) == Some( "success" ) )
}


/// Connects to a control endpoint, retrying while the player starts up.
pub fn connect( address: &EndpointAddress ) -> Result<Endpoint, ControlError> {
    connect_with( address, CONNECT_ATTEMPTS, CONNECT_RETRY_DELAY )
}


fn connect_with( address: &EndpointAddress, attempts: usize, delay: Duration ) -> Result<Endpoint, ControlError> {
    for attempt in 1..=attempts {
        match open( address ) {
            Ok( stream ) => return Ok( Endpoint { stream } ),
            Err( e ) => {
                tracing::debug!( "Control connect {}/{} to {} failed: {}", attempt, attempts, address, e );
                if attempt < attempts {
                    thread::sleep( delay );
                }
            }
        }
    }

    Err( ControlError::Unavailable( address.to_string() ) )
}


/// Connects and sends a single command. Returns the reply, if one came.
pub fn send( address: &EndpointAddress, command: ControlCommand ) -> Result<Option<String>, ControlError> {
    connect( address )?.send( command )
}


#[cfg( unix )]
fn open( address: &EndpointAddress ) -> io::Result<Stream> {
    Stream::connect( address.as_str() )
}


#[cfg( windows )]
fn open( address: &EndpointAddress ) -> io::Result<Stream> {
    std::fs::OpenOptions::new()
        .read( true )
        .write( true )
        .open( address.as_str() )
}


#[cfg( test )]
mod tests {
    use super::*;


    #[test]
    fn test_encode_set_pause() {
        assert_eq!(
            ControlCommand::SetPause( true ).to_line(),
            "{\"command\":[\"set_property\",\"pause\",true]}\n"
        );
        assert_eq!(
            ControlCommand::SetPause( false ).to_line(),
            "{\"command\":[\"set_property\",\"pause\",false]}\n"
        );
    }


    #[test]
    fn test_encode_cycle_pause() {
        assert_eq!( ControlCommand::CyclePause.to_line(), "{\"command\":[\"cycle\",\"pause\"]}\n" );
    }


    #[test]
    fn test_addresses_are_unique_per_launch() {
        let first = EndpointAddress::for_player();
        let second = EndpointAddress::for_player();
        assert_ne!( first, second );
        assert!( first.as_str().contains( &std::process::id().to_string() ) );
    }


    #[test]
    fn test_success_reply() {
        assert!( is_success( "{\"data\":null,\"request_id\":0,\"error\":\"success\"}\n" ) );
        assert!( is_success( "{\"event\":\"pause\"}\n{\"error\":\"success\"}\n" ) );
        assert!( !is_success( "{\"error\":\"property not found\"}\n" ) );
        assert!( !is_success( "not json" ) );
        assert!( !is_success( "" ) );
    }


    #[test]
    fn test_policy_serde() {
        assert_eq!( serde_json::to_string( &ControlPolicy::ExplicitState ).unwrap(), "\"explicit\"" );
        assert_eq!( serde_json::to_string( &ControlPolicy::Toggle ).unwrap(), "\"toggle\"" );
    }


    #[cfg( unix )]
    mod unix {
        use super::*;
        use std::io::{ BufRead, BufReader };
        use std::os::unix::net::UnixListener;
        use std::sync::mpsc;
        use std::time::Instant;


        fn address( dir: &tempfile::TempDir ) -> EndpointAddress {
            EndpointAddress::new( dir.path().join( "mpv.sock" ).to_string_lossy().into_owned() )
        }


        /// Accepts one connection, returns the first line read and optionally replies.
        fn serve_once( listener: UnixListener, reply: bool ) -> mpsc::Receiver<String> {
            let ( tx, rx ) = mpsc::channel();
            thread::spawn( move || {
                let ( mut stream, _ ) = listener.accept().unwrap();
                let mut line = String::new();
                BufReader::new( stream.try_clone().unwrap() ).read_line( &mut line ).unwrap();
                if reply {
                    stream.write_all( b"{\"data\":null,\"error\":\"success\"}\n" ).unwrap();
                    tx.send( line ).unwrap();
                } else {
                    tx.send( line ).unwrap();
                    thread::sleep( Duration::from_secs( 2 ) );
                }
            });
            rx
        }


        #[test]
        fn test_send_writes_json_line() {
            let dir = tempfile::tempdir().unwrap();
            let address = address( &dir );
            let received = serve_once( UnixListener::bind( address.as_str() ).unwrap(), true );

            let reply = send( &address, ControlCommand::SetPause( true ) ).unwrap();
            assert!( reply.as_deref().is_some_and( is_success ) );

            let line = received.recv_timeout( Duration::from_secs( 5 ) ).unwrap();
            assert_eq!( line, "{\"command\":[\"set_property\",\"pause\",true]}\n" );
        }


        #[test]
        fn test_missing_reply_is_not_an_error() {
            let dir = tempfile::tempdir().unwrap();
            let address = address( &dir );
            let received = serve_once( UnixListener::bind( address.as_str() ).unwrap(), false );

            let started = Instant::now();
            assert_eq!( send( &address, ControlCommand::CyclePause ).unwrap(), None );
            assert!( started.elapsed() < Duration::from_secs( 2 ) );

            let line = received.recv_timeout( Duration::from_secs( 5 ) ).unwrap();
            assert_eq!( line, "{\"command\":[\"cycle\",\"pause\"]}\n" );
        }


        #[test]
        fn test_connect_gives_up() {
            let dir = tempfile::tempdir().unwrap();
            let result = connect_with( &address( &dir ), 3, Duration::from_millis( 10 ) );
            assert!( matches!( result, Err( ControlError::Unavailable( _ ) ) ) );
        }


        #[test]
        fn test_connect_waits_for_late_endpoint() {
            let dir = tempfile::tempdir().unwrap();
            let address = address( &dir );
            let path = address.as_str().to_string();

            let server = thread::spawn( move || {
                thread::sleep( Duration::from_millis( 150 ) );
                let listener = UnixListener::bind( path ).unwrap();
                let _ = listener.accept();
            });

            let result = connect_with( &address, CONNECT_ATTEMPTS, Duration::from_millis( 50 ) );
            assert!( result.is_ok() );
            server.join().unwrap();
        }


        #[test]
        fn test_remove_stale_socket() {
            let dir = tempfile::tempdir().unwrap();
            let address = address( &dir );
            std::fs::write( address.as_str(), b"" ).unwrap();

            address.remove_stale();
            assert!( !std::path::Path::new( address.as_str() ).exists() );
        }
    }
}

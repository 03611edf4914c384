//! Background media downloads
//!
//! Runs the downloader (yt-dlp) to materialize cache entries. Downloads are
//! started from the coordinating thread and never awaited there: the player
//! streams the link while the file is fetched, and later plays pick up the
//! cached copy.

use std::collections::HashSet;
use std::path::{ Path, PathBuf };
use std::process::{ ExitStatus, Stdio };
use std::sync::{ Arc, Mutex, PoisonError };

use thiserror::Error;
use tokio::io::{ AsyncBufReadExt, AsyncRead, BufReader };
use tokio::process::Command;
use tokio::runtime::Handle;

use crate::cache;
use crate::quality::Quality;
use crate::sink::LogSink;


#[cfg( windows )]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;


/// Errors that can occur while fetching media.
#[derive( Debug, Error )]
pub enum FetchError {
    #[error( "Failed to start downloader: {0}" )]
    Spawn( #[source] std::io::Error ),

    #[error( "Downloader exited with {status}" )]
    Exit { status: ExitStatus, output: String },

    #[error( "Downloader reported success but {0} was not created" )]
    Missing( PathBuf ),

    #[error( "IO error: {0}" )]
    Io( #[from] std::io::Error ),
}


/// One item to bring into the cache.
#[derive( Debug, Clone, PartialEq, Eq )]
pub struct FetchRequest {
    pub video_id: String,
    pub link: String,
    pub title: Option<String>,
    pub quality: Quality,
}


impl FetchRequest {
    fn key( &self ) -> ( String, bool ) {
        ( self.video_id.clone(), self.quality.audio_only )
    }
}


/// Starts downloads without waiting on them.
pub trait Fetch: Send + Sync {
    /// Starts fetching in the background. Results only reach the log sink.
    fn spawn( &self, request: FetchRequest );
}


/// Downloader front-end backed by the tokio runtime.
#[derive( Clone )]
pub struct MediaFetcher {
    downloader: PathBuf,
    cache_dir: PathBuf,
    sink: Arc<dyn LogSink>,
    in_flight: Arc<Mutex<HashSet<( String, bool )>>>,
    runtime: Handle,
}


impl MediaFetcher {
    /// Creates a fetcher.
    ///
    /// @param downloader - Downloader executable (name on PATH or full path)
    /// @param cache_dir - Directory that receives cached media
    /// @param sink - Receives downloader output and failure reports
    /// @param runtime - Runtime that background downloads are spawned on
    pub fn new( downloader: PathBuf, cache_dir: PathBuf, sink: Arc<dyn LogSink>, runtime: Handle ) -> Self {
        Self {
            downloader,
            cache_dir,
            sink,
            in_flight: Arc::new( Mutex::new( HashSet::new() ) ),
            runtime,
        }
    }


    /// Gets the cache directory.
    pub fn cache_dir( &self ) -> &Path {
        &self.cache_dir
    }


    /// Makes sure the requested item is in the cache.
    ///
    /// Returns the cached path straight away if the file already exists.
    /// Otherwise runs the downloader to completion, streaming its output to
    /// the log sink.
    pub async fn ensure_cached( &self, request: &FetchRequest ) -> Result<PathBuf, FetchError> {
        let path = cache::resolve(
            &self.cache_dir,
            &request.video_id,
            request.quality.audio_only,
            request.title.as_deref(),
        );

        if path.exists() {
            return Ok( path );
        }

        tracing::info!( "Downloading {} to {:?}", request.link, path );

        let mut command = Command::new( &self.downloader );
        command
            .arg( "-f" )
            .arg( request.quality.download_selector() )
            .arg( "-o" )
            .arg( &path )
            .arg( &request.link )
            .stdin( Stdio::null() )
            .stdout( Stdio::piped() )
            .stderr( Stdio::piped() );

        #[cfg( windows )]
        command.creation_flags( CREATE_NO_WINDOW );

        let mut child = command.spawn().map_err( FetchError::Spawn )?;

        let ( out, err ) = tokio::join!(
            pump( self.sink.as_ref(), child.stdout.take() ),
            pump( self.sink.as_ref(), child.stderr.take() ),
        );
        let status = child.wait().await?;

        if !status.success() {
            let mut output = out;
            output.extend( err );
            return Err( FetchError::Exit { status, output: output.join( "\n" ) } );
        }

        if !path.exists() {
            return Err( FetchError::Missing( path ) );
        }

        Ok( path )
    }


    /// Marks a download as running. Returns false if it already was.
    fn claim( &self, key: &( String, bool ) ) -> bool {
        self.in_flight
            .lock()
            .unwrap_or_else( PoisonError::into_inner )
            .insert( key.clone() )
    }


    fn release( &self, key: &( String, bool ) ) {
        self.in_flight
            .lock()
            .unwrap_or_else( PoisonError::into_inner )
            .remove( key );
    }
}


impl Fetch for MediaFetcher {
    fn spawn( &self, request: FetchRequest ) {
        let key = request.key();
        if !self.claim( &key ) {
            tracing::debug!( "Already downloading {}", request.video_id );
            return;
        }

        let fetcher = self.clone();
        self.runtime.spawn( async move {
            let result = fetcher.ensure_cached( &request ).await;
            fetcher.release( &key );

            match result {
                Ok( path ) => tracing::info!( "Cached {:?}", path ),
                Err( e ) => {
                    let message = format!( "Download failed for {}: {}", request.link, e );
                    fetcher.sink.log( &message );
                    fetcher.sink.report( &message );
                }
            }
        });
    }
}


/// Forwards each output line to the sink and returns everything read.
async fn pump<R: AsyncRead + Unpin>( sink: &dyn LogSink, stream: Option<R> ) -> Vec<String> {
    let mut captured = Vec::new();
    let Some( stream ) = stream else {
        return captured;
    };

    let mut reader = BufReader::new( stream );
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until( b'\n', &mut buf ).await {
            Ok( 0 ) | Err( _ ) => break,
            Ok( _ ) => {
                let line = String::from_utf8_lossy( &buf ).trim_end().to_string();
                sink.log( &line );
                captured.push( line );
            }
        }
    }

    captured
}


#[cfg( test )]
mod tests {
    use super::*;
    use crate::quality::Resolution;


    #[derive( Default )]
    struct RecordingSink {
        lines: Mutex<Vec<String>>,
        reports: Mutex<Vec<String>>,
    }


    impl LogSink for RecordingSink {
        fn log( &self, line: &str ) {
            self.lines.lock().unwrap().push( line.to_string() );
        }


        fn report( &self, message: &str ) {
            self.reports.lock().unwrap().push( message.to_string() );
        }
    }


    fn request( audio_only: bool ) -> FetchRequest {
        FetchRequest {
            video_id: "abc123".into(),
            link: "https://www.youtube.com/watch?v=abc123".into(),
            title: Some( "A Song".into() ),
            quality: Quality::new( audio_only, Resolution::P480 ),
        }
    }


    fn fetcher( downloader: PathBuf, cache_dir: &Path, sink: Arc<RecordingSink> ) -> MediaFetcher {
        MediaFetcher::new( downloader, cache_dir.to_path_buf(), sink, Handle::current() )
    }


    #[cfg( unix )]
    fn script( dir: &Path, body: &str ) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.join( "fake-downloader" );
        std::fs::write( &path, format!( "#!/bin/sh\n{}\n", body ) ).unwrap();
        std::fs::set_permissions( &path, std::fs::Permissions::from_mode( 0o755 ) ).unwrap();
        path
    }


    #[tokio::test]
    async fn test_existing_entry_skips_downloader() {
        let dir = tempfile::tempdir().unwrap();
        let sink = Arc::new( RecordingSink::default() );
        let fetcher = fetcher( PathBuf::from( "/nonexistent/yt-dlp" ), dir.path(), sink );

        let expected = dir.path().join( "abc123_A Song.m4a" );
        std::fs::write( &expected, b"media" ).unwrap();

        let path = fetcher.ensure_cached( &request( true ) ).await.unwrap();
        assert_eq!( path, expected );
    }


    #[tokio::test]
    async fn test_spawn_failure() {
        let dir = tempfile::tempdir().unwrap();
        let sink = Arc::new( RecordingSink::default() );
        let fetcher = fetcher( dir.path().join( "no-such-downloader" ), dir.path(), sink );

        let result = fetcher.ensure_cached( &request( true ) ).await;
        assert!( matches!( result, Err( FetchError::Spawn( _ ) ) ) );
    }


    #[cfg( unix )]
    #[tokio::test]
    async fn test_failed_download_carries_output() {
        let dir = tempfile::tempdir().unwrap();
        let downloader = script( dir.path(), "echo 'ERROR: video unavailable' >&2\nexit 1" );
        let sink = Arc::new( RecordingSink::default() );
        let fetcher = fetcher( downloader, dir.path(), Arc::clone( &sink ) );

        let result = fetcher.ensure_cached( &request( false ) ).await;
        match result {
            Err( FetchError::Exit { status, output } ) => {
                assert_eq!( status.code(), Some( 1 ) );
                assert!( output.contains( "ERROR: video unavailable" ) );
            }
            other => panic!( "unexpected result: {:?}", other ),
        }

        assert!( sink.lines.lock().unwrap().iter().any( |l| l.contains( "video unavailable" ) ) );
        assert!( !dir.path().join( "abc123_A Song.webm" ).exists() );
    }


    #[cfg( unix )]
    #[tokio::test]
    async fn test_download_passes_selector_and_output_path() {
        let dir = tempfile::tempdir().unwrap();
        let args_file = dir.path().join( "args" );
        let body = format!(
            "printf '%s\\n' \"$@\" > '{}'\nwhile [ $# -gt 0 ]; do\n  if [ \"$1\" = \"-o\" ]; then shift; out=\"$1\"; fi\n  shift\ndone\necho fetched\necho data > \"$out\"",
            args_file.display()
        );
        let downloader = script( dir.path(), &body );
        let sink = Arc::new( RecordingSink::default() );
        let fetcher = fetcher( downloader, dir.path(), Arc::clone( &sink ) );

        let req = request( true );
        let path = fetcher.ensure_cached( &req ).await.unwrap();
        assert!( path.exists() );

        let args = std::fs::read_to_string( &args_file ).unwrap();
        let args: Vec<&str> = args.lines().collect();
        assert_eq!( args, vec![
            "-f",
            "bestaudio[ext=m4a]/bestaudio/best",
            "-o",
            path.to_str().unwrap(),
            req.link.as_str(),
        ]);
        assert_eq!( sink.lines.lock().unwrap().as_slice(), &[ "fetched".to_string() ] );
    }


    #[cfg( unix )]
    #[tokio::test]
    async fn test_success_without_file_is_missing() {
        let dir = tempfile::tempdir().unwrap();
        let downloader = script( dir.path(), "exit 0" );
        let sink = Arc::new( RecordingSink::default() );
        let fetcher = fetcher( downloader, dir.path(), sink );

        let result = fetcher.ensure_cached( &request( true ) ).await;
        assert!( matches!( result, Err( FetchError::Missing( _ ) ) ) );
    }


    #[cfg( unix )]
    #[tokio::test( flavor = "multi_thread", worker_threads = 2 )]
    async fn test_background_failure_is_reported_once() {
        let dir = tempfile::tempdir().unwrap();
        let downloader = script( dir.path(), "sleep 0.3\necho 'ERROR: gone' >&2\nexit 1" );
        let sink = Arc::new( RecordingSink::default() );
        let fetcher = fetcher( downloader, dir.path(), Arc::clone( &sink ) );

        fetcher.spawn( request( true ) );
        fetcher.spawn( request( true ) );

        let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs( 10 );
        while sink.reports.lock().unwrap().is_empty() {
            assert!( tokio::time::Instant::now() < deadline, "no failure reported" );
            tokio::time::sleep( std::time::Duration::from_millis( 20 ) ).await;
        }
        tokio::time::sleep( std::time::Duration::from_millis( 500 ) ).await;

        let reports = sink.reports.lock().unwrap().clone();
        assert_eq!( reports.len(), 1 );
        assert!( reports[ 0 ].contains( &request( true ).link ) );
        assert!( sink.lines.lock().unwrap().iter().any( |l| l.starts_with( "Download failed" ) ) );

        assert!( fetcher.claim( &request( true ).key() ) );
    }


    #[tokio::test( flavor = "multi_thread", worker_threads = 2 )]
    async fn test_background_spawn_failure_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let sink = Arc::new( RecordingSink::default() );
        let fetcher = fetcher( dir.path().join( "no-such-downloader" ), dir.path(), Arc::clone( &sink ) );

        fetcher.spawn( request( false ) );

        let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs( 10 );
        while sink.reports.lock().unwrap().is_empty() {
            assert!( tokio::time::Instant::now() < deadline, "no failure reported" );
            tokio::time::sleep( std::time::Duration::from_millis( 20 ) ).await;
        }

        assert!( sink.reports.lock().unwrap()[ 0 ].contains( "Failed to start downloader" ) );
        assert!( fetcher.claim( &request( false ).key() ) );
    }


    #[tokio::test]
    async fn test_in_flight_claims_collapse_duplicates() {
        let dir = tempfile::tempdir().unwrap();
        let sink = Arc::new( RecordingSink::default() );
        let fetcher = fetcher( PathBuf::from( "yt-dlp" ), dir.path(), sink );

        let audio = request( true ).key();
        let video = request( false ).key();

        assert!( fetcher.claim( &audio ) );
        assert!( !fetcher.clone().claim( &audio ) );
        assert!( fetcher.claim( &video ) );

        fetcher.release( &audio );
        assert!( fetcher.claim( &audio ) );
    }
}

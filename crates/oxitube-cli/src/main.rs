//! Oxitube CLI - Playlist shell for mpv and yt-dlp

mod app;
mod cli;
mod settings;

use std::fs::File;
use std::io::{ self, BufRead };
use std::sync::{ Arc, Mutex };
use std::thread;
use std::time::Duration;

use anyhow::{ Context, Result };
use clap::Parser;
use tokio::sync::mpsc::{ self, UnboundedSender };
use tracing::Level;

use oxitube_core::{ cache, MediaFetcher, MpvLauncher, PlaybackSession, PlaylistManager, PollTimer };

use app::{ App, AppEvent, ConsoleSink };
use cli::Args;
use settings::Settings;


/// Installs the log subscriber: stderr by default, or a file.
fn init_logging( args: &Args ) -> Result<()> {
    let level = if args.verbose { Level::DEBUG } else { Level::INFO };
    let builder = tracing_subscriber::fmt()
        .with_max_level( level )
        .with_target( false );

    match &args.log_file {
        Some( path ) => {
            let file = File::create( path )
                .with_context( || format!( "Failed to create log file {}", path.display() ) )?;
            builder.with_ansi( false ).with_writer( Mutex::new( file ) ).init();
        }
        None => builder.with_writer( io::stderr ).init(),
    }

    Ok(())
}


/// Forwards stdin lines to the shell until input closes.
fn spawn_input_reader( events: UnboundedSender<AppEvent> ) -> Result<()> {
    thread::Builder::new()
        .name( "oxitube-input".into() )
        .spawn( move || {
            for line in io::stdin().lock().lines() {
                match line {
                    Ok( line ) => {
                        if events.send( AppEvent::Line( line ) ).is_err() {
                            return;
                        }
                    }
                    Err( e ) => {
                        tracing::warn!( "Failed to read input: {}", e );
                        break;
                    }
                }
            }
            let _ = events.send( AppEvent::Eof );
        })?;

    Ok(())
}


fn main() -> Result<()> {
    let args = Args::parse();
    init_logging( &args )?;

    let stored = Settings::load();
    let settings = stored.with_args( &args );

    let cache_dir = settings.resolve_cache_dir()
        .context( "No cache directory available, pass --cache-dir" )?;
    cache::ensure_dir( &cache_dir )
        .with_context( || format!( "Failed to create cache directory {}", cache_dir.display() ) )?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name( "oxitube-worker" )
        .build()?;

    let ( tx, mut rx ) = mpsc::unbounded_channel();

    let tick_tx = tx.clone();
    let timer = PollTimer::new( runtime.handle().clone(), Arc::new( move |generation: u64| {
        let _ = tick_tx.send( AppEvent::Tick { generation } );
    }));

    let session = PlaybackSession::new(
        Box::new( MpvLauncher::new( settings.player_path.clone() ) ),
        Box::new( timer ),
        settings.control_policy,
    );
    let fetcher = MediaFetcher::new(
        settings.downloader_path.clone(),
        cache_dir.clone(),
        Arc::new( ConsoleSink ),
        runtime.handle().clone(),
    );
    let mut manager = PlaylistManager::new( session, Arc::new( fetcher ), cache_dir, settings.quality() );

    match &args.playlist {
        Some( path ) => manager.load( path )
            .with_context( || format!( "Failed to load playlist {}", path.display() ) )?,
        None => {
            if let Err( e ) = manager.restore() {
                tracing::warn!( "Failed to restore autosaved playlist: {}", e );
            }
        }
    }

    spawn_input_reader( tx )?;

    let mut app = App::new( manager, stored, Settings::settings_path(), settings.resolution );
    let result = app.run( &mut rx );

    app.shutdown();
    drop( app );
    runtime.shutdown_timeout( Duration::from_secs( 1 ) );

    result?;
    Ok(())
}

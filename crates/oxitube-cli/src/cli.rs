//! Command-line argument parsing for Oxitube.

use std::path::PathBuf;

use clap::Parser;
use oxitube_core::Resolution;


/// Oxitube - A playlist shell for mpv and yt-dlp.
#[derive( Parser, Debug )]
#[command( name = "oxitube" )]
#[command( version, about, long_about = None )]
pub struct Args {
    /// Playlist file to load on startup instead of the autosave.
    pub playlist: Option<PathBuf>,

    /// Directory for cached media and the autosave playlist.
    #[arg( long )]
    pub cache_dir: Option<PathBuf>,

    /// Play video instead of audio only.
    #[arg( long )]
    pub video: bool,

    /// Video height limit (480p, 720p or 1080p).
    #[arg( short, long )]
    pub resolution: Option<Resolution>,

    /// Send `cycle pause` instead of an explicit pause state.
    #[arg( long )]
    pub toggle_pause: bool,

    /// Path to the mpv executable.
    #[arg( long )]
    pub player: Option<PathBuf>,

    /// Path to the yt-dlp executable.
    #[arg( long )]
    pub downloader: Option<PathBuf>,

    /// Log debug output, including downloader progress.
    #[arg( short, long )]
    pub verbose: bool,

    /// Write logs to a file instead of stderr.
    #[arg( long )]
    pub log_file: Option<PathBuf>,
}


#[cfg( test )]
mod tests {
    use super::*;


    #[test]
    fn test_defaults() {
        let args = Args::try_parse_from([ "oxitube" ]).unwrap();
        assert!( args.playlist.is_none() );
        assert!( !args.video );
        assert!( args.resolution.is_none() );
        assert!( !args.toggle_pause );
    }


    #[test]
    fn test_all_flags() {
        let args = Args::try_parse_from([
            "oxitube", "--video", "-r", "720p", "--toggle-pause", "--cache-dir", "/tmp/c",
            "--player", "/opt/mpv", "--downloader", "/opt/yt-dlp", "-v", "list.m3u",
        ]).unwrap();

        assert!( args.video );
        assert_eq!( args.resolution, Some( Resolution::P720 ) );
        assert!( args.toggle_pause );
        assert!( args.verbose );
        assert_eq!( args.cache_dir, Some( PathBuf::from( "/tmp/c" ) ) );
        assert_eq!( args.player, Some( PathBuf::from( "/opt/mpv" ) ) );
        assert_eq!( args.downloader, Some( PathBuf::from( "/opt/yt-dlp" ) ) );
        assert_eq!( args.playlist, Some( PathBuf::from( "list.m3u" ) ) );
    }


    #[test]
    fn test_bad_resolution() {
        assert!( Args::try_parse_from([ "oxitube", "--resolution", "4k" ]).is_err() );
    }
}

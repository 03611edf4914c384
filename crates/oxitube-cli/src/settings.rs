//! Application settings management
//!
//! Handles persistent defaults for the player, downloader and quality.

use std::fs;
use std::path::{ Path, PathBuf };

use oxitube_core::{ cache, ControlPolicy, Quality, Resolution };
use serde::{ Deserialize, Serialize };

use crate::cli::Args;


/// Application settings.
#[derive( Debug, Clone, PartialEq, Serialize, Deserialize )]
#[serde( default )]
pub struct Settings {
    /// mpv executable
    pub player_path: PathBuf,

    /// yt-dlp executable
    pub downloader_path: PathBuf,

    /// Fetch and play audio only
    pub audio_only: bool,

    /// Video height limit when not audio only
    pub resolution: Resolution,

    /// How pause requests are sent to the player
    pub control_policy: ControlPolicy,

    /// Overrides the default cache directory
    pub cache_dir: Option<PathBuf>,
}


impl Default for Settings {
    fn default() -> Self {
        Self {
            player_path: PathBuf::from( "mpv" ),
            downloader_path: PathBuf::from( "yt-dlp" ),
            audio_only: true,
            resolution: Resolution::default(),
            control_policy: ControlPolicy::default(),
            cache_dir: None,
        }
    }
}


impl Settings {
    /// Returns the path to the settings file.
    pub fn settings_path() -> Option<PathBuf> {
        dirs::config_dir().map( |p| p.join( "oxitube" ).join( "settings.json" ) )
    }


    /// Loads settings from disk, or returns defaults if not found.
    pub fn load() -> Self {
        match Self::settings_path() {
            Some( path ) => Self::load_from( &path ),
            None => Self::default(),
        }
    }


    /// Loads settings from a file. Missing or unreadable files give defaults.
    pub fn load_from( path: &Path ) -> Self {
        if !path.exists() {
            return Self::default();
        }

        match fs::read_to_string( path ) {
            Ok( contents ) => {
                serde_json::from_str( &contents ).unwrap_or_else( |e| {
                    tracing::warn!( "Ignoring malformed settings in {:?}: {}", path, e );
                    Self::default()
                })
            }
            Err( e ) => {
                tracing::warn!( "Failed to read settings: {}", e );
                Self::default()
            }
        }
    }


    /// Saves settings to a file, creating its directory if needed.
    ///
    /// @returns true if the file was written
    pub fn save_to( &self, path: &Path ) -> bool {
        if let Some( parent ) = path.parent() {
            if !parent.exists() {
                if let Err( e ) = fs::create_dir_all( parent ) {
                    tracing::warn!( "Failed to create settings directory: {}", e );
                    return false;
                }
            }
        }

        match serde_json::to_string_pretty( self ) {
            Ok( json ) => {
                if let Err( e ) = fs::write( path, json ) {
                    tracing::warn!( "Failed to save settings: {}", e );
                    return false;
                }
                true
            }
            Err( e ) => {
                tracing::warn!( "Failed to serialize settings: {}", e );
                false
            }
        }
    }


    /// Returns a copy with command-line overrides applied.
    pub fn with_args( &self, args: &Args ) -> Self {
        let mut settings = self.clone();

        if let Some( player ) = &args.player {
            settings.player_path = player.clone();
        }
        if let Some( downloader ) = &args.downloader {
            settings.downloader_path = downloader.clone();
        }
        if args.video {
            settings.audio_only = false;
        }
        if let Some( resolution ) = args.resolution {
            settings.resolution = resolution;
        }
        if args.toggle_pause {
            settings.control_policy = ControlPolicy::Toggle;
        }
        if let Some( dir ) = &args.cache_dir {
            settings.cache_dir = Some( dir.clone() );
        }

        settings
    }


    /// Gets the configured cache directory, or the platform default.
    pub fn resolve_cache_dir( &self ) -> Option<PathBuf> {
        self.cache_dir.clone().or_else( cache::default_dir )
    }


    /// Gets the quality choice these settings describe.
    pub fn quality( &self ) -> Quality {
        Quality::new( self.audio_only, self.resolution )
    }
}


#[cfg( test )]
mod tests {
    use super::*;
    use clap::Parser;


    #[test]
    fn test_defaults_fill_missing_fields() {
        let settings: Settings = serde_json::from_str( r#"{ "audio_only": false }"# ).unwrap();
        assert!( !settings.audio_only );
        assert_eq!( settings.player_path, PathBuf::from( "mpv" ) );
        assert_eq!( settings.downloader_path, PathBuf::from( "yt-dlp" ) );
        assert_eq!( settings.resolution, Resolution::P480 );
        assert_eq!( settings.control_policy, ControlPolicy::ExplicitState );
    }


    #[test]
    fn test_field_names_on_disk() {
        let settings: Settings = serde_json::from_str(
            r#"{ "resolution": "1080p", "control_policy": "toggle", "cache_dir": "/var/cache/tube" }"#
        ).unwrap();
        assert_eq!( settings.resolution, Resolution::P1080 );
        assert_eq!( settings.control_policy, ControlPolicy::Toggle );
        assert_eq!( settings.cache_dir, Some( PathBuf::from( "/var/cache/tube" ) ) );
    }


    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join( "config" ).join( "settings.json" );
        let settings = Settings {
            audio_only: false,
            resolution: Resolution::P720,
            ..Settings::default()
        };

        assert!( settings.save_to( &path ) );
        assert_eq!( Settings::load_from( &path ), settings );
    }


    #[test]
    fn test_corrupt_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join( "settings.json" );
        fs::write( &path, "not json" ).unwrap();

        assert_eq!( Settings::load_from( &path ), Settings::default() );
    }


    #[test]
    fn test_args_override() {
        let args = Args::try_parse_from([ "oxitube", "--video", "--resolution", "1080p", "--toggle-pause" ]).unwrap();
        let settings = Settings::default().with_args( &args );

        assert!( !settings.audio_only );
        assert_eq!( settings.quality(), Quality::new( false, Resolution::P1080 ) );
        assert_eq!( settings.control_policy, ControlPolicy::Toggle );
        assert_eq!( settings.player_path, PathBuf::from( "mpv" ) );
    }
}

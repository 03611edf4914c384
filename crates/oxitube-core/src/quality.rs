//! Media quality selection
//!
//! The downloader and the player each take a yt-dlp format selector. Both are
//! derived from the same audio-only flag and height limit so that streamed and
//! cached items come out the same.

use std::fmt;
use std::str::FromStr;

use serde::{ Deserialize, Serialize };
use thiserror::Error;


/// Error returned when a resolution string cannot be parsed.
#[derive( Debug, Error, PartialEq, Eq )]
#[error( "Invalid resolution: '{0}'. Use '480p', '720p', or '1080p'" )]
pub struct ResolutionParseError( pub String );


/// Maximum video height offered to the user.
#[derive( Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize )]
pub enum Resolution {
    #[default]
    #[serde( rename = "480p" )]
    P480,
    #[serde( rename = "720p" )]
    P720,
    #[serde( rename = "1080p" )]
    P1080,
}


impl Resolution {
    /// Height limit in pixels.
    pub fn max_height( self ) -> u32 {
        match self {
            Resolution::P480 => 480,
            Resolution::P720 => 720,
            Resolution::P1080 => 1080,
        }
    }
}


impl fmt::Display for Resolution {
    fn fmt( &self, f: &mut fmt::Formatter<'_> ) -> fmt::Result {
        write!( f, "{}p", self.max_height() )
    }
}


impl FromStr for Resolution {
    type Err = ResolutionParseError;


    fn from_str( s: &str ) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().trim_end_matches( 'p' ) {
            "480" => Ok( Resolution::P480 ),
            "720" => Ok( Resolution::P720 ),
            "1080" => Ok( Resolution::P1080 ),
            _ => Err( ResolutionParseError( s.to_string() ) ),
        }
    }
}


/// What to fetch and play: audio only, or video up to a height.
#[derive( Debug, Clone, Copy, PartialEq, Eq )]
pub struct Quality {
    pub audio_only: bool,
    pub max_height: u32,
}


impl Default for Quality {
    fn default() -> Self {
        Self {
            audio_only: true,
            max_height: Resolution::default().max_height(),
        }
    }
}


impl Quality {
    /// Creates a quality setting from the user-facing choices.
    pub fn new( audio_only: bool, resolution: Resolution ) -> Self {
        Self {
            audio_only,
            max_height: resolution.max_height(),
        }
    }


    /// Format selector passed to the downloader with `-f`.
    ///
    /// Video prefers a webm pair within the height limit, then any pair within
    /// it, then the best single file within it, then anything at all.
    pub fn download_selector( &self ) -> String {
        if self.audio_only {
            "bestaudio[ext=m4a]/bestaudio/best".to_string()
        } else {
            let h = self.max_height;
            format!(
                "bestvideo[ext=webm][height<={h}]+bestaudio[ext=webm]/bestvideo[height<={h}]+bestaudio/best[height<={h}]/best"
            )
        }
    }


    /// Format selector passed to the player with `--ytdl-format` for items
    /// that are streamed rather than played from the cache.
    pub fn player_selector( &self ) -> String {
        if self.audio_only {
            "bestaudio[ext=m4a]/bestaudio/best".to_string()
        } else {
            let h = self.max_height;
            format!( "bestvideo[height<={h}]+bestaudio/best[height<={h}]" )
        }
    }
}


#[cfg( test )]
mod tests {
    use super::*;


    #[test]
    fn test_parse_resolution() {
        assert_eq!( "480p".parse::<Resolution>(), Ok( Resolution::P480 ) );
        assert_eq!( "720".parse::<Resolution>(), Ok( Resolution::P720 ) );
        assert_eq!( " 1080P ".parse::<Resolution>(), Ok( Resolution::P1080 ) );
        assert!( "4k".parse::<Resolution>().is_err() );
    }


    #[test]
    fn test_resolution_display() {
        assert_eq!( Resolution::P720.to_string(), "720p" );
    }


    #[test]
    fn test_audio_selectors() {
        let quality = Quality::new( true, Resolution::P1080 );
        assert_eq!( quality.download_selector(), "bestaudio[ext=m4a]/bestaudio/best" );
        assert_eq!( quality.player_selector(), "bestaudio[ext=m4a]/bestaudio/best" );
    }


    #[test]
    fn test_video_selectors_carry_height() {
        let quality = Quality::new( false, Resolution::P720 );
        assert_eq!(
            quality.download_selector(),
            "bestvideo[ext=webm][height<=720]+bestaudio[ext=webm]/bestvideo[height<=720]+bestaudio/best[height<=720]/best"
        );
        assert_eq!( quality.player_selector(), "bestvideo[height<=720]+bestaudio/best[height<=720]" );
    }


    #[test]
    fn test_resolution_serde() {
        let json = serde_json::to_string( &Resolution::P1080 ).unwrap();
        assert_eq!( json, "\"1080p\"" );
        let back: Resolution = serde_json::from_str( "\"720p\"" ).unwrap();
        assert_eq!( back, Resolution::P720 );
    }
}

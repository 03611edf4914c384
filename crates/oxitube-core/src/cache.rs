//! Media cache layout
//!
//! Maps a video to the deterministic file name its cached media lives under.
//! There is no manifest: an entry exists when its file exists.

use std::fs;
use std::io;
use std::path::{ Path, PathBuf };


/// Characters that are not allowed in file names on the strictest target.
const FORBIDDEN_CHARS: &[char] = &[ '\\', '/', ':', '*', '?', '"', '<', '>', '|' ];

/// Maximum number of characters of the title kept in a file name.
const MAX_TITLE_CHARS: usize = 80;

/// Name of the playlist file rewritten after every playlist change.
const AUTOSAVE_FILE: &str = "autosave_playlist.m3u";


/// Replaces every forbidden file name character with `_`.
pub fn sanitize( text: &str ) -> String {
    text.chars()
        .map( |c| if FORBIDDEN_CHARS.contains( &c ) { '_' } else { c } )
        .collect()
}


/// Returns the cache path for a video.
///
/// @param cache_dir - Directory holding cached media
/// @param video_id - Video identifier
/// @param audio_only - Selects `m4a` instead of `webm`
/// @param title - Optional title, embedded after the id when present
///
/// @returns `<id>_<title>.<ext>` or `<id>.<ext>` inside `cache_dir`
pub fn resolve( cache_dir: &Path, video_id: &str, audio_only: bool, title: Option<&str> ) -> PathBuf {
    let ext = if audio_only { "m4a" } else { "webm" };
    let id = sanitize( video_id );

    let stem = match title.filter( |t| !t.is_empty() ) {
        Some( title ) => {
            let fragment: String = sanitize( title ).chars().take( MAX_TITLE_CHARS ).collect();
            format!( "{}_{}", id, fragment )
        }
        None => id,
    };

    cache_dir.join( format!( "{}.{}", stem, ext ) )
}


/// Gets the default cache directory (`<user cache dir>/oxitube`).
pub fn default_dir() -> Option<PathBuf> {
    dirs::cache_dir().map( |d| d.join( "oxitube" ) )
}


/// Ensures the cache directory exists.
pub fn ensure_dir( dir: &Path ) -> io::Result<()> {
    fs::create_dir_all( dir )
}


/// Gets the autosave playlist path inside a cache directory.
pub fn autosave_path( cache_dir: &Path ) -> PathBuf {
    cache_dir.join( AUTOSAVE_FILE )
}


#[cfg( test )]
mod tests {
    use super::*;


    #[test]
    fn test_resolve_is_deterministic() {
        let dir = Path::new( "/cache" );
        let a = resolve( dir, "abc", true, Some( "Some Song" ) );
        let b = resolve( dir, "abc", true, Some( "Some Song" ) );
        assert_eq!( a, b );
        assert_eq!( a, PathBuf::from( "/cache/abc_Some Song.m4a" ) );
    }


    #[test]
    fn test_resolve_extension_follows_audio_flag() {
        let dir = Path::new( "/cache" );
        assert_eq!( resolve( dir, "abc", false, None ), PathBuf::from( "/cache/abc.webm" ) );
        assert_eq!( resolve( dir, "abc", true, None ), PathBuf::from( "/cache/abc.m4a" ) );
    }


    #[test]
    fn test_resolve_empty_title_uses_bare_id() {
        let dir = Path::new( "/cache" );
        assert_eq!( resolve( dir, "abc", true, Some( "" ) ), PathBuf::from( "/cache/abc.m4a" ) );
    }


    #[test]
    fn test_resolve_strips_forbidden_characters() {
        let dir = Path::new( "/cache" );
        let path = resolve( dir, "https://x.test/a", false, Some( r#"a\b/c:d*e?f"g<h>i|j"# ) );
        let name = path.file_name().unwrap().to_string_lossy().into_owned();

        assert_eq!( path.parent(), Some( dir ) );
        assert!( !name.contains( FORBIDDEN_CHARS ), "unexpected character in {}", name );
        assert_eq!( name, "https___x.test_a_a_b_c_d_e_f_g_h_i_j.webm" );
    }


    #[test]
    fn test_resolve_truncates_title_by_characters() {
        let dir = Path::new( "/cache" );
        let title = "é".repeat( 120 );
        let path = resolve( dir, "id", true, Some( &title ) );
        let name = path.file_name().unwrap().to_string_lossy().into_owned();

        let fragment = name.strip_prefix( "id_" ).unwrap().strip_suffix( ".m4a" ).unwrap();
        assert_eq!( fragment.chars().count(), MAX_TITLE_CHARS );
    }


    #[test]
    fn test_different_titles_do_not_collide() {
        let dir = Path::new( "/cache" );
        assert_ne!(
            resolve( dir, "abc", true, Some( "Live" ) ),
            resolve( dir, "abc", true, Some( "Studio" ) ),
        );
    }


    #[test]
    fn test_autosave_path() {
        assert_eq!(
            autosave_path( Path::new( "/cache" ) ),
            PathBuf::from( "/cache/autosave_playlist.m3u" ),
        );
    }
}

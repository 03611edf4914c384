//! Watch links and search records
//!
//! The search provider hands back bare video ids; the playlist stores
//! canonical watch URLs. This module converts between the two.


/// Base of a canonical watch URL, the video id is appended.
const WATCH_URL_PREFIX: &str = "https://www.youtube.com/watch?v=";


/// A single result row from the video search provider.
#[derive( Debug, Clone, PartialEq, Eq )]
pub struct SearchResult {
    pub id: String,
    pub title: String,
    pub thumbnail_url: String,
}


/// Builds the canonical watch URL for a video id.
pub fn watch_url( video_id: &str ) -> String {
    format!( "{}{}", WATCH_URL_PREFIX, video_id )
}


/// Extracts the video id from a watch link.
///
/// Looks for the `v=` query parameter and takes the run of word characters
/// and dashes after it. Links without one fall back to the whole link, which
/// the cache resolver sanitizes before using it in a file name.
pub fn video_id( link: &str ) -> &str {
    link.match_indices( "v=" )
        .map( |( at, _ )| &link[ at + 2.. ] )
        .map( |rest| {
            let end = rest
                .find( |c: char| !( c.is_alphanumeric() || c == '_' || c == '-' ) )
                .unwrap_or( rest.len() );
            &rest[ ..end ]
        })
        .find( |id| !id.is_empty() )
        .unwrap_or( link )
}


/// Returns true if the text looks like a link rather than a bare id.
pub fn is_link( text: &str ) -> bool {
    text.starts_with( "http" )
}


#[cfg( test )]
mod tests {
    use super::*;


    #[test]
    fn test_watch_url() {
        assert_eq!( watch_url( "dQw4w9WgXcQ" ), "https://www.youtube.com/watch?v=dQw4w9WgXcQ" );
    }


    #[test]
    fn test_video_id_from_watch_url() {
        assert_eq!( video_id( "https://www.youtube.com/watch?v=dQw4w9WgXcQ" ), "dQw4w9WgXcQ" );
    }


    #[test]
    fn test_video_id_stops_at_next_parameter() {
        assert_eq!( video_id( "https://www.youtube.com/watch?v=ab-c_D1&t=42s" ), "ab-c_D1" );
    }


    #[test]
    fn test_video_id_falls_back_to_link() {
        let link = "https://example.com/media/clip";
        assert_eq!( video_id( link ), link );
    }


    #[test]
    fn test_video_id_skips_empty_parameter() {
        assert_eq!( video_id( "https://x.test/?v=&v=real" ), "real" );
    }


    #[test]
    fn test_is_link() {
        assert!( is_link( "https://www.youtube.com/watch?v=x" ) );
        assert!( !is_link( "dQw4w9WgXcQ" ) );
    }
}

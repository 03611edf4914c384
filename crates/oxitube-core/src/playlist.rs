//! Playlist and cursor management
//!
//! Holds the ordered items, the current-index cursor and the text file
//! format the playlist is saved in.

use std::fs::{ self, File };
use std::io::{ self, BufWriter, Write };
use std::path::Path;

use thiserror::Error;

use crate::link::{ self, SearchResult };


/// Errors that can occur with playlist operations.
#[derive( Debug, Error )]
pub enum PlaylistError {
    #[error( "IO error: {0}" )]
    Io( #[from] std::io::Error ),

    #[error( "No playlist item selected" )]
    NoSelection,
}


/// One entry in the playlist. The link identifies it, the title is for display.
#[derive( Debug, Clone, PartialEq, Eq )]
pub struct PlaylistItem {
    pub link: String,
    pub title: String,
}


impl PlaylistItem {
    pub fn new( link: impl Into<String>, title: impl Into<String> ) -> Self {
        Self {
            link: link.into(),
            title: title.into(),
        }
    }


    /// Gets the video id the link points at.
    pub fn video_id( &self ) -> &str {
        link::video_id( &self.link )
    }
}


impl From<&SearchResult> for PlaylistItem {
    fn from( result: &SearchResult ) -> Self {
        Self::new( link::watch_url( &result.id ), result.title.clone() )
    }
}


/// Ordered playlist with a play cursor.
#[derive( Debug, Default, Clone, PartialEq, Eq )]
pub struct Playlist {
    items: Vec<PlaylistItem>,
    current_index: usize,
}


impl Playlist {
    /// Creates a new empty playlist.
    pub fn new() -> Self {
        Self::default()
    }


    /// Creates a playlist from items, with the cursor at the start.
    pub fn from_items( items: Vec<PlaylistItem> ) -> Self {
        Self {
            items,
            current_index: 0,
        }
    }


    /// Adds an item, or finds the one already carrying its link.
    ///
    /// Either way the cursor moves to the item.
    ///
    /// @returns true if the item was appended, false if it was already present
    pub fn add( &mut self, item: PlaylistItem ) -> bool {
        if let Some( existing ) = self.position( &item.link ) {
            self.current_index = existing;
            return false;
        }

        self.items.push( item );
        self.current_index = self.items.len() - 1;
        true
    }


    /// Finds the index of the item with the given link.
    pub fn position( &self, link: &str ) -> Option<usize> {
        self.items.iter().position( |i| i.link == link )
    }


    /// Removes the item at `index`.
    ///
    /// A cursor left past the end goes back to the start.
    pub fn remove( &mut self, index: Option<usize> ) -> Result<PlaylistItem, PlaylistError> {
        let index = index
            .filter( |&i| i < self.items.len() )
            .ok_or( PlaylistError::NoSelection )?;

        let removed = self.items.remove( index );
        if self.current_index >= self.items.len() {
            self.current_index = 0;
        }

        Ok( removed )
    }


    /// Clears the playlist.
    pub fn clear( &mut self ) {
        self.items.clear();
        self.current_index = 0;
    }


    /// Gets the current item.
    pub fn current( &self ) -> Option<&PlaylistItem> {
        self.items.get( self.current_index )
    }


    /// Gets the cursor.
    pub fn current_index( &self ) -> usize {
        self.current_index
    }


    /// Moves the cursor. No bounds check: playback resets an invalid cursor.
    pub fn set_current_index( &mut self, index: usize ) {
        self.current_index = index;
    }


    /// Returns true if the cursor points at an item.
    pub fn cursor_in_range( &self ) -> bool {
        self.current_index < self.items.len()
    }


    /// Gets all items in the playlist.
    pub fn items( &self ) -> &[PlaylistItem] {
        &self.items
    }


    /// Gets the number of items.
    pub fn len( &self ) -> usize {
        self.items.len()
    }


    /// Returns true if the playlist is empty.
    pub fn is_empty( &self ) -> bool {
        self.items.is_empty()
    }


    /// Renders the playlist in its file format.
    pub fn serialize( &self ) -> String {
        let mut out = String::new();
        for item in &self.items {
            out.push_str( "# " );
            out.push_str( &item.title.replace( [ '\n', '\r' ], " " ) );
            out.push( '\n' );
            out.push_str( &item.link );
            out.push( '\n' );
        }
        out
    }


    /// Parses the playlist file format.
    ///
    /// Lines are trimmed first. A `#` line sets the title for the next link
    /// line, minus one separating space; a link with no title before it is
    /// titled with itself. Blank and unknown lines are skipped.
    pub fn parse( text: &str ) -> Self {
        let mut items = Vec::new();
        let mut pending_title: Option<String> = None;

        for line in text.lines().map( str::trim ).filter( |l| !l.is_empty() ) {
            if let Some( comment ) = line.strip_prefix( '#' ) {
                let title = comment.strip_prefix( ' ' ).unwrap_or( comment );
                pending_title = Some( title.to_string() );
            } else if link::is_link( line ) {
                let title = pending_title.take().unwrap_or_else( || line.to_string() );
                items.push( PlaylistItem::new( line, title ) );
            }
        }

        Self::from_items( items )
    }


    /// Saves the playlist to a file.
    pub fn save( &self, path: &Path ) -> Result<(), PlaylistError> {
        if let Some( parent ) = path.parent().filter( |p| !p.as_os_str().is_empty() ) {
            fs::create_dir_all( parent )?;
        }

        let mut file = BufWriter::new( File::create( path )? );
        file.write_all( self.serialize().as_bytes() )?;
        file.flush()?;
        Ok(())
    }


    /// Loads a playlist from a file. A missing file is an empty playlist.
    pub fn load( path: &Path ) -> Result<Self, PlaylistError> {
        match fs::read_to_string( path ) {
            Ok( text ) => Ok( Self::parse( &text ) ),
            Err( e ) if e.kind() == io::ErrorKind::NotFound => Ok( Self::new() ),
            Err( e ) => Err( e.into() ),
        }
    }
}


#[cfg( test )]
mod tests {
    use super::*;


    fn item( n: u32 ) -> PlaylistItem {
        PlaylistItem::new( format!( "https://www.youtube.com/watch?v=id{}", n ), format!( "Track {}", n ) )
    }


    fn playlist( n: u32 ) -> Playlist {
        Playlist::from_items( ( 1..=n ).map( item ).collect() )
    }


    #[test]
    fn test_add_appends_and_moves_cursor() {
        let mut pl = Playlist::new();
        assert!( pl.add( item( 1 ) ) );
        assert!( pl.add( item( 2 ) ) );
        assert_eq!( pl.len(), 2 );
        assert_eq!( pl.current_index(), 1 );
    }


    #[test]
    fn test_add_duplicate_selects_existing() {
        let mut pl = playlist( 2 );
        assert_eq!( pl.current_index(), 0 );

        let again = PlaylistItem::new( item( 2 ).link, "B" );
        assert!( !pl.add( again ) );

        assert_eq!( pl.len(), 2 );
        assert_eq!( pl.current_index(), 1 );
        assert_eq!( pl.items()[ 1 ].title, "Track 2" );
    }


    #[test]
    fn test_remove_unselected_fails() {
        let mut pl = playlist( 2 );

        assert!( matches!( pl.remove( Some( 5 ) ), Err( PlaylistError::NoSelection ) ) );
        assert!( matches!( pl.remove( None ), Err( PlaylistError::NoSelection ) ) );
        assert_eq!( pl, playlist( 2 ) );
    }


    #[test]
    fn test_remove_first() {
        let mut pl = playlist( 2 );

        let removed = pl.remove( Some( 0 ) ).unwrap();
        assert_eq!( removed, item( 1 ) );
        assert_eq!( pl.items(), &[ item( 2 ) ] );
        assert_eq!( pl.current_index(), 0 );
    }


    #[test]
    fn test_remove_resets_cursor_past_end() {
        let mut pl = playlist( 3 );
        pl.set_current_index( 2 );

        pl.remove( Some( 2 ) ).unwrap();
        assert_eq!( pl.current_index(), 0 );
    }


    #[test]
    fn test_serialize_collapses_newlines() {
        let pl = Playlist::from_items( vec![ PlaylistItem::new( "https://a.test/1", "Line\r\nBreak" ) ] );
        assert_eq!( pl.serialize(), "# Line  Break\nhttps://a.test/1\n" );
    }


    #[test]
    fn test_round_trip() {
        let pl = Playlist::from_items( vec![
            item( 1 ),
            PlaylistItem::new( "https://www.youtube.com/watch?v=x-y_z", "Artist - Song (Live) | 2019" ),
            PlaylistItem::new( "https://example.com/stream", "#hashtag title" ),
            PlaylistItem::new( "https://a.test/indented", "  Indented Title" ),
        ]);

        assert_eq!( Playlist::parse( &pl.serialize() ), pl );
    }


    #[test]
    fn test_parse_rules() {
        let text = "\n  # First  \n   https://a.test/1  \n\nhttps://a.test/2\nnot a link\n#Third\n# Fourth\nhttps://a.test/3\n";
        let pl = Playlist::parse( text );

        assert_eq!( pl.items(), &[
            PlaylistItem::new( "https://a.test/1", "First" ),
            PlaylistItem::new( "https://a.test/2", "https://a.test/2" ),
            PlaylistItem::new( "https://a.test/3", "Fourth" ),
        ]);
        assert_eq!( pl.current_index(), 0 );
    }


    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join( "nested" ).join( "list.m3u" );
        let pl = playlist( 3 );

        pl.save( &path ).unwrap();
        assert_eq!( Playlist::load( &path ).unwrap(), pl );
    }


    #[test]
    fn test_load_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let pl = Playlist::load( &dir.path().join( "missing.m3u" ) ).unwrap();
        assert!( pl.is_empty() );
    }


    #[test]
    fn test_item_from_search_result() {
        let result = SearchResult {
            id: "abc".into(),
            title: "Title".into(),
            thumbnail_url: "https://i.ytimg.com/vi/abc/hq.jpg".into(),
        };
        let item = PlaylistItem::from( &result );

        assert_eq!( item.link, "https://www.youtube.com/watch?v=abc" );
        assert_eq!( item.video_id(), "abc" );
    }
}

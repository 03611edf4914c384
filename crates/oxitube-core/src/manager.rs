//! Playlist manager
//!
//! Ties the playlist to the cache, the downloader and the playback session.
//! Every method is meant to be called from the one coordinating thread that
//! owns the manager.

use std::path::{ Path, PathBuf };
use std::sync::Arc;

use thiserror::Error;

use crate::cache;
use crate::fetcher::{ Fetch, FetchRequest };
use crate::link::SearchResult;
use crate::playlist::{ Playlist, PlaylistError, PlaylistItem };
use crate::quality::{ Quality, Resolution };
use crate::session::{ PlaybackSession, PollOutcome, SessionError };


/// Errors surfaced by playlist manager operations.
#[derive( Debug, Error )]
pub enum ManagerError {
    #[error( transparent )]
    Playlist( #[from] PlaylistError ),

    #[error( transparent )]
    Session( #[from] SessionError ),
}


/// Owns the playlist and drives playback of it.
pub struct PlaylistManager {
    playlist: Playlist,
    session: PlaybackSession,
    fetcher: Arc<dyn Fetch>,
    cache_dir: PathBuf,
    autosave_path: PathBuf,
    quality: Quality,
}


impl PlaylistManager {
    /// Creates a manager with an empty playlist.
    ///
    /// @param session - Player slot used for playback
    /// @param fetcher - Starts background downloads of uncached items
    /// @param cache_dir - Directory holding cached media and the autosave file
    /// @param quality - Initial audio/video choice
    pub fn new( session: PlaybackSession, fetcher: Arc<dyn Fetch>, cache_dir: PathBuf, quality: Quality ) -> Self {
        let autosave_path = cache::autosave_path( &cache_dir );
        Self {
            playlist: Playlist::new(),
            session,
            fetcher,
            cache_dir,
            autosave_path,
            quality,
        }
    }


    /// Loads the autosaved playlist, if any, without rewriting it.
    pub fn restore( &mut self ) -> Result<(), ManagerError> {
        self.playlist = Playlist::load( &self.autosave_path )?;
        tracing::info!( "Restored {} item(s) from {:?}", self.playlist.len(), self.autosave_path );
        Ok(())
    }


    /// Adds an item (or selects it if its link is already present) and plays
    /// from it.
    ///
    /// @returns true if the item was new
    pub fn add( &mut self, item: PlaylistItem ) -> Result<bool, ManagerError> {
        let appended = self.playlist.add( item );
        self.autosave();
        self.play_from_current()?;
        Ok( appended )
    }


    /// Adds a search result to the playlist and plays it.
    pub fn add_search_result( &mut self, result: &SearchResult ) -> Result<bool, ManagerError> {
        self.add( PlaylistItem::from( result ) )
    }


    /// Starts the player on the whole playlist, beginning at the cursor.
    ///
    /// Cached items play from disk. Uncached ones are streamed by link while
    /// a download for each is started in the background. A cursor that no
    /// longer points at an item is reset to the start and nothing plays.
    ///
    /// @returns true if a player was started
    pub fn play_from_current( &mut self ) -> Result<bool, ManagerError> {
        if self.playlist.is_empty() {
            return Ok( false );
        }

        if !self.playlist.cursor_in_range() {
            self.playlist.set_current_index( 0 );
            return Ok( false );
        }

        let sources = self.resolve_sources();
        let start = self.playlist.current_index();
        if let Some( item ) = self.playlist.current() {
            tracing::info!( "Playing {} ({})", item.title, item.link );
        }

        self.session.start( &sources, start, self.quality )?;
        Ok( true )
    }


    /// Moves the cursor to `index` and plays from there.
    pub fn play_at( &mut self, index: usize ) -> Result<bool, ManagerError> {
        if index >= self.playlist.len() {
            return Err( PlaylistError::NoSelection.into() );
        }

        self.playlist.set_current_index( index );
        self.play_from_current()
    }


    /// Skips to the next item, wrapping to the first.
    pub fn next( &mut self ) -> Result<bool, ManagerError> {
        if self.playlist.is_empty() {
            return Ok( false );
        }

        let next = ( self.playlist.current_index() + 1 ) % self.playlist.len();
        self.playlist.set_current_index( next );
        self.play_from_current()
    }


    /// Handles a liveness tick for the session of the given generation.
    pub fn on_poll_tick( &mut self, generation: u64 ) -> Result<PollOutcome, ManagerError> {
        let outcome = self.session.poll( generation );
        if outcome == PollOutcome::Ended {
            self.on_track_ended()?;
        }
        Ok( outcome )
    }


    /// Advances after the player finished on its own.
    ///
    /// Running off the end moves the cursor back to the first item but does
    /// not start playing again.
    ///
    /// @returns true if playback continued
    pub fn on_track_ended( &mut self ) -> Result<bool, ManagerError> {
        let next = self.playlist.current_index() + 1;
        if next >= self.playlist.len() {
            self.playlist.set_current_index( 0 );
            tracing::info!( "Reached end of playlist" );
            return Ok( false );
        }

        self.playlist.set_current_index( next );
        self.play_from_current()
    }


    /// Removes the selected item.
    pub fn remove( &mut self, index: Option<usize> ) -> Result<PlaylistItem, ManagerError> {
        let removed = self.playlist.remove( index )?;
        tracing::info!( "Removed {}", removed.title );
        self.autosave();
        Ok( removed )
    }


    /// Replaces the playlist with the contents of a file. Does not play.
    pub fn load( &mut self, path: &Path ) -> Result<(), ManagerError> {
        self.playlist = Playlist::load( path )?;
        tracing::info!( "Loaded {} item(s) from {:?}", self.playlist.len(), path );
        self.autosave();
        Ok(())
    }


    /// Saves the playlist to a file.
    pub fn save( &self, path: &Path ) -> Result<(), ManagerError> {
        self.playlist.save( path )?;
        tracing::info!( "Saved {} item(s) to {:?}", self.playlist.len(), path );
        Ok(())
    }


    /// Pauses or resumes the player. Returns the new paused state if it changed.
    pub fn toggle_pause( &mut self ) -> Option<bool> {
        self.session.toggle_pause()
    }


    /// Stops the player without advancing.
    pub fn stop( &mut self ) {
        self.session.stop();
    }


    /// Saves the playlist and terminates the player.
    pub fn shutdown( &mut self ) {
        self.autosave();
        self.session.shutdown();
    }


    /// Switches between audio-only and video for the next play.
    pub fn set_audio_only( &mut self, audio_only: bool ) {
        self.quality.audio_only = audio_only;
    }


    /// Sets the video height limit for the next play.
    pub fn set_resolution( &mut self, resolution: Resolution ) {
        self.quality.max_height = resolution.max_height();
    }


    /// Gets the playlist.
    pub fn playlist( &self ) -> &Playlist {
        &self.playlist
    }


    /// Gets the playback session.
    pub fn session( &self ) -> &PlaybackSession {
        &self.session
    }


    /// Gets the current quality choice.
    pub fn quality( &self ) -> Quality {
        self.quality
    }


    /// Gets the autosave file path.
    pub fn autosave_path( &self ) -> &Path {
        &self.autosave_path
    }


    /// Maps every item to its cached file or, failing that, its link.
    fn resolve_sources( &self ) -> Vec<String> {
        self.playlist.items()
            .iter()
            .map( |item| {
                let video_id = item.video_id();
                let path = cache::resolve( &self.cache_dir, video_id, self.quality.audio_only, Some( &item.title ) );

                if path.exists() {
                    return path.to_string_lossy().into_owned();
                }

                self.fetcher.spawn( FetchRequest {
                    video_id: video_id.to_string(),
                    link: item.link.clone(),
                    title: Some( item.title.clone() ),
                    quality: self.quality,
                });
                item.link.clone()
            })
            .collect()
    }


    fn autosave( &self ) {
        if let Err( e ) = self.playlist.save( &self.autosave_path ) {
            tracing::warn!( "Failed to autosave playlist to {:?}: {}", self.autosave_path, e );
        }
    }
}


#[cfg( test )]
mod tests {
    use super::*;
    use crate::control::ControlPolicy;
    use crate::testing::{ FakeFetcher, FakeLauncher, FakeTimer };
    use std::sync::atomic::Ordering;
    use tempfile::TempDir;


    struct Harness {
        manager: PlaylistManager,
        launcher: FakeLauncher,
        fetcher: FakeFetcher,
        timer: FakeTimer,
        dir: TempDir,
    }


    impl Harness {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let launcher = FakeLauncher::default();
            let timer = FakeTimer::default();
            let fetcher = FakeFetcher::default();
            let session = PlaybackSession::new(
                Box::new( launcher.clone() ),
                Box::new( timer.clone() ),
                ControlPolicy::ExplicitState,
            );
            let manager = PlaylistManager::new(
                session,
                Arc::new( fetcher.clone() ),
                dir.path().to_path_buf(),
                Quality::default(),
            );
            Self { manager, launcher, fetcher, timer, dir }
        }


        /// Loads items without playing them.
        fn with_items( n: u32 ) -> Self {
            let mut harness = Self::new();
            let path = harness.dir.path().join( "seed.m3u" );
            Playlist::from_items( ( 1..=n ).map( item ).collect() ).save( &path ).unwrap();
            harness.manager.load( &path ).unwrap();
            harness
        }


        fn finish_and_tick( &mut self ) -> PollOutcome {
            self.launcher.finish_current();
            let generation = self.manager.session().generation();
            self.manager.on_poll_tick( generation ).unwrap()
        }


        fn autosaved( &self ) -> Playlist {
            Playlist::load( self.manager.autosave_path() ).unwrap()
        }
    }


    fn item( n: u32 ) -> PlaylistItem {
        PlaylistItem::new( format!( "https://www.youtube.com/watch?v=u{}", n ), format!( "Track {}", n ) )
    }


    #[test]
    fn test_add_appends_plays_and_autosaves() {
        let mut h = Harness::new();

        assert!( h.manager.add( item( 1 ) ).unwrap() );
        assert!( h.manager.add( item( 2 ) ).unwrap() );

        assert_eq!( h.manager.playlist().current_index(), 1 );
        assert_eq!( h.launcher.launch_count(), 2 );
        assert_eq!( h.autosaved().items(), h.manager.playlist().items() );
    }


    #[test]
    fn test_add_existing_link_selects_it() {
        let mut h = Harness::with_items( 2 );
        assert_eq!( h.manager.playlist().current_index(), 0 );

        let appended = h.manager.add( PlaylistItem::new( item( 2 ).link, "B" ) ).unwrap();

        assert!( !appended );
        assert_eq!( h.manager.playlist().len(), 2 );
        assert_eq!( h.manager.playlist().current_index(), 1 );
        let plan = h.launcher.last_plan().unwrap();
        assert_eq!( plan.sources[ 0 ], item( 2 ).link );
    }


    #[test]
    fn test_remove_scenarios() {
        let mut h = Harness::with_items( 2 );

        let result = h.manager.remove( Some( 5 ) );
        assert!( matches!( result, Err( ManagerError::Playlist( PlaylistError::NoSelection ) ) ) );
        assert_eq!( h.manager.playlist().len(), 2 );

        h.manager.remove( Some( 0 ) ).unwrap();
        assert_eq!( h.manager.playlist().items(), &[ item( 2 ) ] );
        assert_eq!( h.manager.playlist().current_index(), 0 );
        assert_eq!( h.autosaved().items(), &[ item( 2 ) ] );
    }


    #[test]
    fn test_empty_playlist_requests_are_noops() {
        let mut h = Harness::new();

        assert!( !h.manager.play_from_current().unwrap() );
        assert!( !h.manager.next().unwrap() );
        assert_eq!( h.launcher.launch_count(), 0 );
    }


    #[test]
    fn test_stale_cursor_resets_without_playing() {
        let mut h = Harness::with_items( 2 );
        h.manager.playlist.set_current_index( 5 );

        assert!( !h.manager.play_from_current().unwrap() );
        assert_eq!( h.manager.playlist().current_index(), 0 );
        assert_eq!( h.launcher.launch_count(), 0 );
    }


    #[test]
    fn test_cached_items_play_from_disk() {
        let mut h = Harness::with_items( 2 );
        let cached = cache::resolve( h.dir.path(), "u1", true, Some( "Track 1" ) );
        std::fs::write( &cached, b"media" ).unwrap();

        h.manager.play_from_current().unwrap();

        let plan = h.launcher.last_plan().unwrap();
        assert_eq!( plan.sources, vec![ cached.to_string_lossy().into_owned(), item( 2 ).link ] );
        assert_eq!( h.fetcher.requested_ids(), vec![ "u2".to_string() ] );
    }


    #[test]
    fn test_fetch_requests_follow_quality() {
        let mut h = Harness::with_items( 1 );
        h.manager.set_audio_only( false );
        h.manager.set_resolution( Resolution::P720 );

        h.manager.play_from_current().unwrap();

        let request = h.fetcher.requests.lock().unwrap()[ 0 ].clone();
        assert_eq!( request.quality, Quality::new( false, Resolution::P720 ) );
        assert_eq!( request.title.as_deref(), Some( "Track 1" ) );
        assert_eq!( h.launcher.last_plan().unwrap().quality, request.quality );
    }


    #[test]
    fn test_play_order_wraps_from_cursor() {
        let mut h = Harness::with_items( 3 );

        h.manager.play_at( 1 ).unwrap();

        let links: Vec<String> = [ 2, 3, 1 ].into_iter().map( |n| item( n ).link ).collect();
        assert_eq!( h.launcher.last_plan().unwrap().sources, links );
    }


    #[test]
    fn test_play_at_out_of_range() {
        let mut h = Harness::with_items( 2 );
        assert!( matches!(
            h.manager.play_at( 2 ),
            Err( ManagerError::Playlist( PlaylistError::NoSelection ) )
        ));
    }


    #[test]
    fn test_next_wraps_and_plays() {
        let mut h = Harness::with_items( 3 );
        h.manager.play_at( 2 ).unwrap();

        assert!( h.manager.next().unwrap() );
        assert_eq!( h.manager.playlist().current_index(), 0 );
        assert_eq!( h.launcher.launch_count(), 2 );
    }


    #[test]
    fn test_track_end_advances_mid_playlist() {
        for start in [ 0, 1 ] {
            let mut h = Harness::with_items( 3 );
            h.manager.play_at( start ).unwrap();

            assert_eq!( h.finish_and_tick(), PollOutcome::Ended );
            assert_eq!( h.manager.playlist().current_index(), start + 1 );
            assert_eq!( h.launcher.launch_count(), 2 );
        }
    }


    #[test]
    fn test_track_end_at_last_item_wraps_without_playing() {
        let mut h = Harness::with_items( 3 );
        h.manager.play_at( 2 ).unwrap();

        assert_eq!( h.finish_and_tick(), PollOutcome::Ended );
        assert_eq!( h.manager.playlist().current_index(), 0 );
        assert_eq!( h.launcher.launch_count(), 1 );
    }


    #[test]
    fn test_stop_does_not_advance() {
        let mut h = Harness::with_items( 3 );
        h.manager.play_at( 0 ).unwrap();

        h.manager.stop();
        assert_eq!( h.finish_and_tick(), PollOutcome::StoppedByUser );

        assert_eq!( h.manager.playlist().current_index(), 0 );
        assert_eq!( h.launcher.launch_count(), 1 );
        assert_eq!( h.timer.armed_generation(), None );
    }


    #[test]
    fn test_tick_while_running() {
        let mut h = Harness::with_items( 2 );
        h.manager.play_at( 0 ).unwrap();
        let generation = h.manager.session().generation();

        assert_eq!( h.manager.on_poll_tick( generation ).unwrap(), PollOutcome::Running );
        assert_eq!( h.manager.on_poll_tick( generation + 1 ).unwrap(), PollOutcome::Stale );
        assert_eq!( h.manager.playlist().current_index(), 0 );
    }


    #[test]
    fn test_load_replaces_without_playing() {
        let mut h = Harness::with_items( 3 );
        h.manager.play_at( 2 ).unwrap();

        let other = h.dir.path().join( "other.m3u" );
        Playlist::from_items( vec![ item( 7 ) ] ).save( &other ).unwrap();
        h.manager.load( &other ).unwrap();

        assert_eq!( h.manager.playlist().items(), &[ item( 7 ) ] );
        assert_eq!( h.manager.playlist().current_index(), 0 );
        assert_eq!( h.launcher.launch_count(), 1 );
        assert_eq!( h.autosaved().items(), &[ item( 7 ) ] );
    }


    #[test]
    fn test_load_missing_file_empties_playlist() {
        let mut h = Harness::with_items( 2 );
        h.manager.load( &h.dir.path().join( "missing.m3u" ) ).unwrap();
        assert!( h.manager.playlist().is_empty() );
    }


    #[test]
    fn test_restore_reads_autosave() {
        let h = Harness::with_items( 2 );
        let saved = h.autosaved();

        let mut fresh = Harness::new();
        saved.save( fresh.manager.autosave_path() ).unwrap();
        fresh.manager.restore().unwrap();

        assert_eq!( fresh.manager.playlist(), &saved );
    }


    #[test]
    fn test_spawn_failure_is_reported_and_playlist_kept() {
        let mut h = Harness::new();
        h.launcher.fail.store( true, Ordering::SeqCst );

        let result = h.manager.add( item( 1 ) );

        assert!( matches!( result, Err( ManagerError::Session( SessionError::Spawn( _ ) ) ) ) );
        assert_eq!( h.manager.playlist().len(), 1 );
        assert_eq!( h.autosaved().len(), 1 );
    }


    #[test]
    fn test_add_search_result() {
        let mut h = Harness::new();
        let result = SearchResult {
            id: "zz9".into(),
            title: "Found".into(),
            thumbnail_url: String::new(),
        };

        h.manager.add_search_result( &result ).unwrap();
        assert_eq!( h.manager.playlist().items()[ 0 ].link, "https://www.youtube.com/watch?v=zz9" );
    }


    #[test]
    fn test_shutdown_autosaves_and_stops_player() {
        let mut h = Harness::with_items( 1 );
        h.manager.play_at( 0 ).unwrap();

        h.manager.shutdown();
        assert_eq!( h.launcher.alive_count(), 0 );
        assert_eq!( h.autosaved().len(), 1 );
    }
}

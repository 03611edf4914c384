//! Oxitube Core - Playlist playback through mpv and yt-dlp
//!
//! This crate provides the playlist, its on-disk format, the media cache,
//! background downloads, the mpv player session and its control channel.

pub mod cache;
pub mod command;
pub mod control;
pub mod fetcher;
pub mod link;
pub mod manager;
pub mod playlist;
pub mod quality;
pub mod session;
pub mod sink;
pub mod timer;

#[cfg( test )]
mod testing;

pub use command::{ Command, CommandError };
pub use control::{ ControlError, ControlPolicy };
pub use fetcher::{ Fetch, FetchError, FetchRequest, MediaFetcher };
pub use link::SearchResult;
pub use manager::{ ManagerError, PlaylistManager };
pub use playlist::{ Playlist, PlaylistError, PlaylistItem };
pub use quality::{ Quality, Resolution };
pub use session::{ MpvLauncher, PlaybackSession, PollOutcome, SessionError, SessionState };
pub use sink::{ LogSink, TracingSink };
pub use timer::{ PollScheduler, PollTimer };

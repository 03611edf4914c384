//! Playback session
//!
//! Owns the one external player process that may be running at a time,
//! starts it with the rotated play order, pauses and resumes it over the
//! control channel, and reports when it goes away.

use std::io;
use std::path::PathBuf;
use std::process::{ Child, Command, Stdio };
use std::thread;
use std::time::{ Duration, Instant };

use thiserror::Error;

use crate::control::{ self, ControlCommand, ControlPolicy, EndpointAddress };
use crate::quality::Quality;
use crate::timer::PollScheduler;


/// How long `stop` waits for the player to exit after terminating it.
pub const STOP_TIMEOUT: Duration = Duration::from_secs( 2 );

#[cfg( windows )]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;


/// Errors that can occur while starting playback.
#[derive( Debug, Error )]
pub enum SessionError {
    #[error( "Failed to start player: {0}" )]
    Spawn( #[source] io::Error ),
}


/// Lifecycle of the player process.
#[derive( Debug, Clone, Copy, PartialEq, Eq, Default )]
pub enum SessionState {
    #[default]
    Idle,
    Starting,
    Playing,
    Paused,
    Stopped,
    Ended,
}


/// Result of a liveness poll.
#[derive( Debug, Clone, Copy, PartialEq, Eq )]
pub enum PollOutcome {
    /// The tick belongs to an earlier session.
    Stale,
    /// No player to watch.
    Idle,
    /// The player is still running.
    Running,
    /// The player is gone because the user stopped it.
    StoppedByUser,
    /// The player exited on its own.
    Ended,
}


/// A running player process.
pub trait PlayerProcess: Send {
    /// Returns true once the process has exited.
    fn has_exited( &mut self ) -> bool;

    /// Sends the terminate signal without waiting.
    fn terminate( &mut self );

    /// Waits up to `timeout` for the process to exit. Returns true if it did.
    fn wait_timeout( &mut self, timeout: Duration ) -> bool;
}


/// Starts player processes.
pub trait PlayerLauncher: Send {
    fn launch( &self, plan: &LaunchPlan ) -> io::Result<Box<dyn PlayerProcess>>;
}


/// Everything needed to start one player.
#[derive( Debug, Clone, PartialEq, Eq )]
pub struct LaunchPlan {
    pub endpoint: EndpointAddress,
    pub quality: Quality,
    /// Local paths or links, already in play order.
    pub sources: Vec<String>,
}


impl LaunchPlan {
    /// Builds the player's command-line arguments.
    pub fn args( &self ) -> Vec<String> {
        let mut args = vec![
            format!( "--input-ipc-server={}", self.endpoint ),
            "--cache=yes".to_string(),
            "--cache-secs=1".to_string(),
        ];

        if self.quality.audio_only {
            args.push( "--no-video".to_string() );
            args.push( "--force-window=no".to_string() );
        }

        args.push( format!( "--ytdl-format={}", self.quality.player_selector() ) );
        args.extend( self.sources.iter().cloned() );
        args
    }
}


/// Reorders items so that `start` comes first and the earlier items follow
/// the rest.
pub fn rotate<T: Clone>( items: &[T], start: usize ) -> Vec<T> {
    let start = start.min( items.len() );
    items[ start.. ].iter().chain( &items[ ..start ] ).cloned().collect()
}


/// Launches mpv as a child process.
#[derive( Debug, Clone )]
pub struct MpvLauncher {
    program: PathBuf,
}


impl MpvLauncher {
    pub fn new( program: PathBuf ) -> Self {
        Self { program }
    }
}


impl PlayerLauncher for MpvLauncher {
    fn launch( &self, plan: &LaunchPlan ) -> io::Result<Box<dyn PlayerProcess>> {
        let mut command = Command::new( &self.program );
        command
            .args( plan.args() )
            .stdin( Stdio::null() )
            .stdout( Stdio::null() )
            .stderr( Stdio::null() );

        #[cfg( windows )]
        {
            use std::os::windows::process::CommandExt;
            command.creation_flags( CREATE_NO_WINDOW );
        }

        let child = command.spawn()?;
        tracing::debug!( "Started {:?} (pid {})", self.program, child.id() );
        Ok( Box::new( MpvProcess { child } ) )
    }
}


struct MpvProcess {
    child: Child,
}


impl PlayerProcess for MpvProcess {
    fn has_exited( &mut self ) -> bool {
        !matches!( self.child.try_wait(), Ok( None ) )
    }


    fn terminate( &mut self ) {
        if let Err( e ) = self.child.kill() {
            tracing::debug!( "Failed to terminate player: {}", e );
        }
    }


    fn wait_timeout( &mut self, timeout: Duration ) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.has_exited() {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep( Duration::from_millis( 50 ) );
        }
    }
}


/// The single player slot.
pub struct PlaybackSession {
    launcher: Box<dyn PlayerLauncher>,
    timer: Box<dyn PollScheduler>,
    policy: ControlPolicy,
    process: Option<Box<dyn PlayerProcess>>,
    endpoint: Option<EndpointAddress>,
    state: SessionState,
    paused: bool,
    stopped_by_user: bool,
    generation: u64,
    play_order: Vec<String>,
}


impl PlaybackSession {
    /// Creates an idle session.
    pub fn new( launcher: Box<dyn PlayerLauncher>, timer: Box<dyn PollScheduler>, policy: ControlPolicy ) -> Self {
        Self {
            launcher,
            timer,
            policy,
            process: None,
            endpoint: None,
            state: SessionState::Idle,
            paused: false,
            stopped_by_user: false,
            generation: 0,
            play_order: Vec::new(),
        }
    }


    /// Starts a player on `sources`, beginning at `start_index` and wrapping
    /// around to the earlier items.
    ///
    /// Any running player is terminated first. On success the liveness poll
    /// is armed for the new generation.
    pub fn start( &mut self, sources: &[String], start_index: usize, quality: Quality ) -> Result<(), SessionError> {
        self.timer.cancel();
        self.terminate_current( Some( STOP_TIMEOUT ) );

        self.generation += 1;
        self.state = SessionState::Starting;
        self.paused = false;
        self.stopped_by_user = false;

        let endpoint = EndpointAddress::for_player();
        endpoint.remove_stale();

        let plan = LaunchPlan {
            endpoint: endpoint.clone(),
            quality,
            sources: rotate( sources, start_index ),
        };

        match self.launcher.launch( &plan ) {
            Ok( process ) => {
                tracing::info!( "Player started with {} item(s), generation {}", plan.sources.len(), self.generation );
                self.process = Some( process );
                self.endpoint = Some( endpoint );
                self.play_order = plan.sources;
                self.state = SessionState::Playing;
                self.timer.arm( self.generation );
                Ok(())
            }
            Err( e ) => {
                tracing::warn!( "Player failed to start: {}", e );
                self.state = SessionState::Idle;
                self.endpoint = None;
                self.play_order.clear();
                Err( SessionError::Spawn( e ) )
            }
        }
    }


    /// Flips pause state on the running player.
    ///
    /// Returns the new paused state, or None if there is no running player,
    /// its control endpoint could not be reached, or a `Toggle` cycle was not
    /// confirmed by the player. In all of these cases nothing changes.
    pub fn toggle_pause( &mut self ) -> Option<bool> {
        if !self.is_alive() {
            return None;
        }
        let endpoint = self.endpoint.as_ref()?;

        let target = !self.paused;
        let command = match self.policy {
            ControlPolicy::ExplicitState => ControlCommand::SetPause( target ),
            ControlPolicy::Toggle => ControlCommand::CyclePause,
        };

        match control::send( endpoint, command ) {
            Ok( reply ) => {
                // A cycle only has a known outcome when the player confirmed it.
                if self.policy == ControlPolicy::Toggle && !reply.as_deref().is_some_and( control::is_success ) {
                    tracing::debug!( "Pause cycle not confirmed: {:?}", reply );
                    return None;
                }

                self.paused = target;
                self.state = if target { SessionState::Paused } else { SessionState::Playing };
                tracing::info!( "{}", if target { "Paused" } else { "Resumed" } );
                Some( target )
            }
            Err( e ) => {
                tracing::debug!( "Pause request dropped: {}", e );
                None
            }
        }
    }


    /// Checks the player on a timer tick.
    ///
    /// The stopped-by-user flag is consumed here, once.
    pub fn poll( &mut self, generation: u64 ) -> PollOutcome {
        if generation != self.generation {
            return PollOutcome::Stale;
        }

        if let Some( process ) = self.process.as_mut() {
            if !process.has_exited() {
                return PollOutcome::Running;
            }
        }

        self.timer.cancel();

        if self.stopped_by_user {
            self.stopped_by_user = false;
            return PollOutcome::StoppedByUser;
        }

        if self.process.take().is_some() {
            tracing::info!( "Player exited" );
            self.state = SessionState::Ended;
            self.paused = false;
            if let Some( endpoint ) = &self.endpoint {
                endpoint.remove_stale();
            }
            return PollOutcome::Ended;
        }

        PollOutcome::Idle
    }


    /// Stops the player at the user's request.
    ///
    /// Terminates the process, waits briefly for it to exit and marks the
    /// session so the next poll does not treat the exit as end of track.
    pub fn stop( &mut self ) {
        self.timer.cancel();
        self.terminate_current( Some( STOP_TIMEOUT ) );
        self.stopped_by_user = true;
        self.paused = false;
        self.state = SessionState::Stopped;
    }


    /// Terminates the player without waiting. Used on application exit.
    pub fn shutdown( &mut self ) {
        self.timer.cancel();
        self.terminate_current( None );
        self.state = SessionState::Idle;
    }


    /// Returns true while a player process is running.
    pub fn is_alive( &mut self ) -> bool {
        self.process.as_mut().is_some_and( |p| !p.has_exited() )
    }


    /// Gets the session state.
    pub fn state( &self ) -> SessionState {
        self.state
    }


    /// Returns true if the player was paused through this session.
    pub fn is_paused( &self ) -> bool {
        self.paused
    }


    /// Gets the generation of the current (or last) player.
    pub fn generation( &self ) -> u64 {
        self.generation
    }


    /// Gets the control endpoint of the current player.
    pub fn endpoint( &self ) -> Option<&EndpointAddress> {
        self.endpoint.as_ref()
    }


    /// Gets the order the current player was given its items in.
    pub fn play_order( &self ) -> &[String] {
        &self.play_order
    }


    /// Gets the pause control policy.
    pub fn policy( &self ) -> ControlPolicy {
        self.policy
    }


    fn terminate_current( &mut self, wait: Option<Duration> ) {
        let Some( mut process ) = self.process.take() else {
            return;
        };

        if !process.has_exited() {
            process.terminate();
            if let Some( timeout ) = wait {
                if !process.wait_timeout( timeout ) {
                    tracing::warn!( "Player did not exit within {:?}", timeout );
                }
            }
        }

        if let Some( endpoint ) = &self.endpoint {
            endpoint.remove_stale();
        }
        tracing::info!( "Player terminated" );
    }
}


impl Drop for PlaybackSession {
    fn drop( &mut self ) {
        self.shutdown();
    }
}


#[cfg( test )]
mod tests {
    use super::*;
    use crate::quality::Resolution;
    use crate::testing::{ FakeLauncher, FakeTimer };
    use std::sync::atomic::Ordering;


    fn session( policy: ControlPolicy ) -> ( PlaybackSession, FakeLauncher, FakeTimer ) {
        let launcher = FakeLauncher::default();
        let timer = FakeTimer::default();
        let session = PlaybackSession::new( Box::new( launcher.clone() ), Box::new( timer.clone() ), policy );
        ( session, launcher, timer )
    }


    fn sources( names: &[&str] ) -> Vec<String> {
        names.iter().map( |s| s.to_string() ).collect()
    }


    #[test]
    fn test_rotate() {
        let items = [ 'a', 'b', 'c', 'd' ];
        assert_eq!( rotate( &items, 0 ), vec![ 'a', 'b', 'c', 'd' ] );
        assert_eq!( rotate( &items, 2 ), vec![ 'c', 'd', 'a', 'b' ] );
        assert_eq!( rotate( &items, 3 ), vec![ 'd', 'a', 'b', 'c' ] );
        assert_eq!( rotate( &items, 9 ), vec![ 'a', 'b', 'c', 'd' ] );
        assert!( rotate::<char>( &[], 0 ).is_empty() );
    }


    #[test]
    fn test_start_plays_rotated_order() {
        let ( mut session, launcher, timer ) = session( ControlPolicy::ExplicitState );
        let items = sources( &[ "a", "b", "c", "d" ] );

        session.start( &items, 2, Quality::default() ).unwrap();

        assert_eq!( session.play_order(), &sources( &[ "c", "d", "a", "b" ] )[ .. ] );
        let plan = launcher.last_plan().unwrap();
        assert!( plan.args().ends_with( &sources( &[ "c", "d", "a", "b" ] ) ) );
        assert_eq!( session.state(), SessionState::Playing );
        assert_eq!( timer.armed_generation(), Some( session.generation() ) );
    }


    #[test]
    fn test_audio_launch_arguments() {
        let plan = LaunchPlan {
            endpoint: EndpointAddress::new( "/tmp/mpv.sock" ),
            quality: Quality::new( true, Resolution::P480 ),
            sources: sources( &[ "/cache/a.m4a", "https://www.youtube.com/watch?v=b" ] ),
        };

        assert_eq!( plan.args(), sources( &[
            "--input-ipc-server=/tmp/mpv.sock",
            "--cache=yes",
            "--cache-secs=1",
            "--no-video",
            "--force-window=no",
            "--ytdl-format=bestaudio[ext=m4a]/bestaudio/best",
            "/cache/a.m4a",
            "https://www.youtube.com/watch?v=b",
        ]));
    }


    #[test]
    fn test_video_launch_arguments() {
        let plan = LaunchPlan {
            endpoint: EndpointAddress::new( "/tmp/mpv.sock" ),
            quality: Quality::new( false, Resolution::P1080 ),
            sources: sources( &[ "x" ] ),
        };

        let args = plan.args();
        assert!( !args.contains( &"--no-video".to_string() ) );
        assert!( args.contains( &"--ytdl-format=bestvideo[height<=1080]+bestaudio/best[height<=1080]".to_string() ) );
    }


    #[test]
    fn test_start_replaces_previous_player() {
        let ( mut session, launcher, _timer ) = session( ControlPolicy::ExplicitState );
        let items = sources( &[ "a", "b" ] );

        session.start( &items, 0, Quality::default() ).unwrap();
        let first_endpoint = session.endpoint().cloned();
        session.start( &items, 1, Quality::default() ).unwrap();

        assert_eq!( launcher.launch_count(), 2 );
        assert_eq!( launcher.terminated.load( Ordering::SeqCst ), 1 );
        assert_eq!( launcher.alive_count(), 1 );
        assert_ne!( session.endpoint().cloned(), first_endpoint );
    }


    #[test]
    fn test_spawn_failure_leaves_session_idle() {
        let ( mut session, launcher, timer ) = session( ControlPolicy::ExplicitState );
        launcher.fail.store( true, Ordering::SeqCst );

        let result = session.start( &sources( &[ "a" ] ), 0, Quality::default() );

        assert!( matches!( result, Err( SessionError::Spawn( _ ) ) ) );
        assert_eq!( session.state(), SessionState::Idle );
        assert_eq!( timer.armed_generation(), None );
        assert!( session.endpoint().is_none() );
    }


    #[test]
    fn test_poll_reports_running_then_ended() {
        let ( mut session, launcher, timer ) = session( ControlPolicy::ExplicitState );
        session.start( &sources( &[ "a" ] ), 0, Quality::default() ).unwrap();
        let generation = session.generation();

        assert_eq!( session.poll( generation ), PollOutcome::Running );

        launcher.finish_current();
        assert_eq!( session.poll( generation ), PollOutcome::Ended );
        assert_eq!( session.state(), SessionState::Ended );
        assert_eq!( timer.armed_generation(), None );

        assert_eq!( session.poll( generation ), PollOutcome::Idle );
    }


    #[test]
    fn test_stop_suppresses_end_of_track_once() {
        let ( mut session, _launcher, timer ) = session( ControlPolicy::ExplicitState );
        session.start( &sources( &[ "a", "b" ] ), 0, Quality::default() ).unwrap();
        let generation = session.generation();

        session.stop();
        assert_eq!( session.state(), SessionState::Stopped );
        assert_eq!( timer.armed_generation(), None );

        assert_eq!( session.poll( generation ), PollOutcome::StoppedByUser );
        assert_eq!( session.poll( generation ), PollOutcome::Idle );
    }


    #[test]
    fn test_start_clears_stop_flag() {
        let ( mut session, launcher, _timer ) = session( ControlPolicy::ExplicitState );
        let items = sources( &[ "a" ] );

        session.start( &items, 0, Quality::default() ).unwrap();
        session.stop();
        session.start( &items, 0, Quality::default() ).unwrap();

        launcher.finish_current();
        assert_eq!( session.poll( session.generation() ), PollOutcome::Ended );
    }


    #[test]
    fn test_stale_tick_is_ignored() {
        let ( mut session, launcher, _timer ) = session( ControlPolicy::ExplicitState );
        let items = sources( &[ "a" ] );

        session.start( &items, 0, Quality::default() ).unwrap();
        let old = session.generation();
        session.start( &items, 0, Quality::default() ).unwrap();
        launcher.finish_current();

        assert_eq!( session.poll( old ), PollOutcome::Stale );
        assert_eq!( session.poll( session.generation() ), PollOutcome::Ended );
    }


    #[test]
    fn test_toggle_without_player_is_noop() {
        let ( mut session, _launcher, _timer ) = session( ControlPolicy::ExplicitState );
        assert_eq!( session.toggle_pause(), None );
        assert!( !session.is_paused() );
    }


    #[test]
    fn test_shutdown_terminates_player() {
        let ( mut session, launcher, _timer ) = session( ControlPolicy::ExplicitState );
        session.start( &sources( &[ "a" ] ), 0, Quality::default() ).unwrap();

        session.shutdown();
        assert_eq!( launcher.alive_count(), 0 );
        assert!( !session.is_alive() );
    }


    #[cfg( unix )]
    mod unix {
        use super::*;
        use std::io::{ BufRead, BufReader, Write };
        use std::os::unix::net::UnixListener;
        use std::sync::mpsc;


        const SUCCESS: &[u8] = b"{\"error\":\"success\"}\n";


        /// Serves `count` control connections, answering each with `reply`
        /// and forwarding the line read.
        fn fake_player( session: &PlaybackSession, count: usize, reply: &'static [u8] ) -> mpsc::Receiver<String> {
            let listener = UnixListener::bind( session.endpoint().unwrap().as_str() ).unwrap();
            let ( tx, rx ) = mpsc::channel();
            thread::spawn( move || {
                for _ in 0..count {
                    let ( mut stream, _ ) = listener.accept().unwrap();
                    let mut line = String::new();
                    BufReader::new( stream.try_clone().unwrap() ).read_line( &mut line ).unwrap();
                    stream.write_all( reply ).unwrap();
                    tx.send( line ).unwrap();
                }
            });
            rx
        }


        #[test]
        fn test_explicit_policy_sends_desired_state() {
            let ( mut session, _launcher, _timer ) = session( ControlPolicy::ExplicitState );
            session.start( &sources( &[ "a" ] ), 0, Quality::default() ).unwrap();
            let lines = fake_player( &session, 2, SUCCESS );

            assert_eq!( session.toggle_pause(), Some( true ) );
            assert_eq!( session.state(), SessionState::Paused );
            assert_eq!( session.toggle_pause(), Some( false ) );
            assert_eq!( session.state(), SessionState::Playing );

            let timeout = Duration::from_secs( 5 );
            assert_eq!( lines.recv_timeout( timeout ).unwrap(), "{\"command\":[\"set_property\",\"pause\",true]}\n" );
            assert_eq!( lines.recv_timeout( timeout ).unwrap(), "{\"command\":[\"set_property\",\"pause\",false]}\n" );
        }


        #[test]
        fn test_toggle_policy_sends_cycle() {
            let ( mut session, _launcher, _timer ) = session( ControlPolicy::Toggle );
            session.start( &sources( &[ "a" ] ), 0, Quality::default() ).unwrap();
            let lines = fake_player( &session, 1, SUCCESS );

            assert_eq!( session.toggle_pause(), Some( true ) );
            assert_eq!(
                lines.recv_timeout( Duration::from_secs( 5 ) ).unwrap(),
                "{\"command\":[\"cycle\",\"pause\"]}\n"
            );
        }


        #[test]
        fn test_toggle_policy_needs_confirmation() {
            let ( mut session, _launcher, _timer ) = session( ControlPolicy::Toggle );
            session.start( &sources( &[ "a" ] ), 0, Quality::default() ).unwrap();
            let lines = fake_player( &session, 1, b"{\"error\":\"property unavailable\"}\n" );

            assert_eq!( session.toggle_pause(), None );
            assert!( !session.is_paused() );
            assert_eq!( session.state(), SessionState::Playing );
            assert_eq!(
                lines.recv_timeout( Duration::from_secs( 5 ) ).unwrap(),
                "{\"command\":[\"cycle\",\"pause\"]}\n"
            );
        }


        #[test]
        fn test_explicit_policy_ignores_reply_body() {
            let ( mut session, _launcher, _timer ) = session( ControlPolicy::ExplicitState );
            session.start( &sources( &[ "a" ] ), 0, Quality::default() ).unwrap();
            let _lines = fake_player( &session, 1, b"{\"error\":\"property unavailable\"}\n" );

            assert_eq!( session.toggle_pause(), Some( true ) );
            assert!( session.is_paused() );
        }


        #[test]
        fn test_unreachable_endpoint_leaves_state_unchanged() {
            let ( mut session, _launcher, _timer ) = session( ControlPolicy::ExplicitState );
            session.start( &sources( &[ "a" ] ), 0, Quality::default() ).unwrap();

            assert_eq!( session.toggle_pause(), None );
            assert!( !session.is_paused() );
            assert_eq!( session.state(), SessionState::Playing );
        }
    }
}

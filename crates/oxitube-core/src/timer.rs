//! Liveness poll timer
//!
//! While a player runs, the coordinating thread needs a tick every second to
//! check whether the process is still there. Each tick carries the generation
//! of the session that armed it, so a tick that was already queued when the
//! timer was cancelled can be recognised and dropped.

use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;


/// Interval between liveness polls.
pub const POLL_INTERVAL: Duration = Duration::from_secs( 1 );


/// Something that can deliver repeating poll ticks.
pub trait PollScheduler: Send {
    /// Starts ticking for the given generation, replacing any earlier timer.
    fn arm( &mut self, generation: u64 );

    /// Stops ticking. Does nothing if the timer is not armed.
    fn cancel( &mut self );
}


/// Callback invoked on every tick with the armed generation.
pub type TickFn = Arc<dyn Fn( u64 ) + Send + Sync>;


/// Repeating timer running as a task on the tokio runtime.
pub struct PollTimer {
    runtime: Handle,
    interval: Duration,
    on_tick: TickFn,
    task: Option<JoinHandle<()>>,
}


impl PollTimer {
    /// Creates a timer that ticks every `POLL_INTERVAL` once armed.
    pub fn new( runtime: Handle, on_tick: TickFn ) -> Self {
        Self::with_interval( runtime, POLL_INTERVAL, on_tick )
    }


    /// Creates a timer with a custom interval.
    pub fn with_interval( runtime: Handle, interval: Duration, on_tick: TickFn ) -> Self {
        Self {
            runtime,
            interval,
            on_tick,
            task: None,
        }
    }


    /// Returns true while a timer task is running.
    pub fn is_armed( &self ) -> bool {
        self.task.as_ref().is_some_and( |t| !t.is_finished() )
    }
}


impl PollScheduler for PollTimer {
    fn arm( &mut self, generation: u64 ) {
        self.cancel();

        let interval = self.interval;
        let on_tick = Arc::clone( &self.on_tick );
        self.task = Some( self.runtime.spawn( async move {
            let start = tokio::time::Instant::now() + interval;
            let mut ticker = tokio::time::interval_at( start, interval );
            loop {
                ticker.tick().await;
                on_tick( generation );
            }
        }));
    }


    fn cancel( &mut self ) {
        if let Some( task ) = self.task.take() {
            task.abort();
        }
    }
}


impl Drop for PollTimer {
    fn drop( &mut self ) {
        self.cancel();
    }
}


#[cfg( test )]
mod tests {
    use super::*;
    use std::sync::Mutex;


    fn recorder() -> ( Arc<Mutex<Vec<u64>>>, TickFn ) {
        let ticks = Arc::new( Mutex::new( Vec::new() ) );
        let sink = Arc::clone( &ticks );
        let on_tick: TickFn = Arc::new( move |generation| sink.lock().unwrap().push( generation ) );
        ( ticks, on_tick )
    }


    #[tokio::test( start_paused = true )]
    async fn test_ticks_carry_generation() {
        let ( ticks, on_tick ) = recorder();
        let mut timer = PollTimer::new( Handle::current(), on_tick );

        timer.arm( 3 );
        tokio::time::sleep( Duration::from_millis( 3500 ) ).await;

        assert_eq!( *ticks.lock().unwrap(), vec![ 3, 3, 3 ] );
    }


    #[tokio::test( start_paused = true )]
    async fn test_cancel_stops_ticks() {
        let ( ticks, on_tick ) = recorder();
        let mut timer = PollTimer::new( Handle::current(), on_tick );

        timer.arm( 1 );
        tokio::time::sleep( Duration::from_millis( 1500 ) ).await;
        timer.cancel();
        assert!( !timer.is_armed() );
        tokio::time::sleep( Duration::from_secs( 5 ) ).await;

        assert_eq!( *ticks.lock().unwrap(), vec![ 1 ] );
    }


    #[tokio::test( start_paused = true )]
    async fn test_rearm_replaces_previous_timer() {
        let ( ticks, on_tick ) = recorder();
        let mut timer = PollTimer::new( Handle::current(), on_tick );

        timer.arm( 1 );
        timer.arm( 2 );
        tokio::time::sleep( Duration::from_millis( 2500 ) ).await;

        assert_eq!( *ticks.lock().unwrap(), vec![ 2, 2 ] );
    }
}

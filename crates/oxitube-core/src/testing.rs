//! In-memory stand-ins for the player, timer and downloader used by tests.

use std::io;
use std::sync::atomic::{ AtomicBool, AtomicUsize, Ordering };
use std::sync::{ Arc, Mutex };
use std::time::Duration;

use crate::fetcher::{ Fetch, FetchRequest };
use crate::session::{ LaunchPlan, PlayerLauncher, PlayerProcess };
use crate::timer::PollScheduler;


/// Shared view of everything a `FakeLauncher` has started.
#[derive( Clone, Default )]
pub struct FakeLauncher {
    pub launches: Arc<Mutex<Vec<LaunchPlan>>>,
    pub processes: Arc<Mutex<Vec<Arc<AtomicBool>>>>,
    pub terminated: Arc<AtomicUsize>,
    pub fail: Arc<AtomicBool>,
}


impl FakeLauncher {
    pub fn launch_count( &self ) -> usize {
        self.launches.lock().unwrap().len()
    }


    pub fn last_plan( &self ) -> Option<LaunchPlan> {
        self.launches.lock().unwrap().last().cloned()
    }


    /// Makes the most recently launched player exit on its own.
    pub fn finish_current( &self ) {
        if let Some( alive ) = self.processes.lock().unwrap().last() {
            alive.store( false, Ordering::SeqCst );
        }
    }


    pub fn alive_count( &self ) -> usize {
        self.processes.lock().unwrap()
            .iter()
            .filter( |p| p.load( Ordering::SeqCst ) )
            .count()
    }
}


impl PlayerLauncher for FakeLauncher {
    fn launch( &self, plan: &LaunchPlan ) -> io::Result<Box<dyn PlayerProcess>> {
        if self.fail.load( Ordering::SeqCst ) {
            return Err( io::Error::new( io::ErrorKind::NotFound, "mpv not found" ) );
        }

        let alive = Arc::new( AtomicBool::new( true ) );
        self.launches.lock().unwrap().push( plan.clone() );
        self.processes.lock().unwrap().push( Arc::clone( &alive ) );

        Ok( Box::new( FakeProcess {
            alive,
            terminated: Arc::clone( &self.terminated ),
        }))
    }
}


struct FakeProcess {
    alive: Arc<AtomicBool>,
    terminated: Arc<AtomicUsize>,
}


impl PlayerProcess for FakeProcess {
    fn has_exited( &mut self ) -> bool {
        !self.alive.load( Ordering::SeqCst )
    }


    fn terminate( &mut self ) {
        self.alive.store( false, Ordering::SeqCst );
        self.terminated.fetch_add( 1, Ordering::SeqCst );
    }


    fn wait_timeout( &mut self, _timeout: Duration ) -> bool {
        true
    }
}


/// Timer that only records what it was asked to do.
#[derive( Clone, Default )]
pub struct FakeTimer {
    pub armed: Arc<Mutex<Option<u64>>>,
}


impl FakeTimer {
    pub fn armed_generation( &self ) -> Option<u64> {
        *self.armed.lock().unwrap()
    }
}


impl PollScheduler for FakeTimer {
    fn arm( &mut self, generation: u64 ) {
        *self.armed.lock().unwrap() = Some( generation );
    }


    fn cancel( &mut self ) {
        *self.armed.lock().unwrap() = None;
    }
}


/// Fetcher that records requests instead of downloading.
#[derive( Clone, Default )]
pub struct FakeFetcher {
    pub requests: Arc<Mutex<Vec<FetchRequest>>>,
}


impl FakeFetcher {
    pub fn requested_ids( &self ) -> Vec<String> {
        self.requests.lock().unwrap().iter().map( |r| r.video_id.clone() ).collect()
    }
}


impl Fetch for FakeFetcher {
    fn spawn( &self, request: FetchRequest ) {
        self.requests.lock().unwrap().push( request );
    }
}

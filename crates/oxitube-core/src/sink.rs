//! Log sink for subprocess output and user-facing reports

/// Receives downloader output and failure reports from background work.
///
/// `log` gets raw output lines as they arrive. `report` gets short messages
/// that the user should see, such as a failed download.
pub trait LogSink: Send + Sync {
    fn log( &self, line: &str );

    fn report( &self, message: &str );
}


/// Sink that forwards everything to `tracing`.
#[derive( Debug, Default, Clone, Copy )]
pub struct TracingSink;


impl LogSink for TracingSink {
    fn log( &self, line: &str ) {
        tracing::debug!( target: "oxitube::downloader", "{}", line );
    }


    fn report( &self, message: &str ) {
        tracing::warn!( "{}", message );
    }
}

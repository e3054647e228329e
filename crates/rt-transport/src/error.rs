//! Errors for the transport crate.

/// Errors that can occur while setting up the multicast transport socket.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Failed to create, bind, or configure the underlying UDP socket.
    #[error("failed to set up transport socket: {source}")]
    SocketSetup {
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

//! Errors for the controller crate.

/// Errors that can occur while standing up or running one processor's threads.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Failed to spawn an OS thread.
    #[error("failed to spawn thread '{thread_name}': {source}")]
    ThreadSpawnError {
        /// Name of the thread we attempted to spawn.
        thread_name: String,
        /// Underlying OS error.
        #[source]
        source: std::io::Error,
    },

    /// A core worker or timer thread panicked instead of returning normally.
    #[error("thread '{thread_name}' panicked: {panic_message}")]
    ThreadPanic {
        /// Name of the thread that panicked.
        thread_name: String,
        /// Best-effort rendering of the panic payload.
        panic_message: String,
    },
}

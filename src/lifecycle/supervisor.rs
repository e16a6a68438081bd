//! Startup handshake and supervisor-thread bookkeeping.
//!
//! `Server::start` spawns a supervisor thread that binds the socket,
//! builds the engine and runs its serve loop. The calling thread waits on
//! a condition variable until the engine signals readiness or failure, or
//! a fixed timeout elapses. The `fired` flag closes the race where the
//! supervisor signals before the caller starts waiting.

use std::sync::{Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::error::ServerError;

/// How long `Server::start` waits for the supervisor to come up.
pub const STARTUP_TIMEOUT: Duration = Duration::from_millis(2500);

/// Lifecycle states of a server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Unstarted,
    Starting,
    Running,
    StartFailed,
    Stopping,
    Stopped,
}

#[derive(Default)]
struct HandshakeState {
    /// Guards against both spurious wakeups and the supervisor signaling
    /// before the caller begins waiting.
    fired: bool,
    outcome: Option<Result<u16, ServerError>>,
}

/// One-shot channel from the supervisor thread to the `start` caller,
/// carrying either the bound port or the captured startup error.
pub struct StartupHandshake {
    state: Mutex<HandshakeState>,
    signal: Condvar,
}

impl StartupHandshake {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(HandshakeState::default()),
            signal: Condvar::new(),
        }
    }

    /// Signal that the engine is about to serve on `port`. Later signals
    /// are ignored.
    pub fn signal_ready(&self, port: u16) {
        self.signal_outcome(Ok(port));
    }

    /// Signal that startup failed with `error`. Later signals are
    /// ignored.
    pub fn signal_error(&self, error: ServerError) {
        self.signal_outcome(Err(error));
    }

    fn signal_outcome(&self, outcome: Result<u16, ServerError>) {
        let mut state = self.state.lock().unwrap();
        if state.fired {
            return;
        }
        state.fired = true;
        state.outcome = Some(outcome);
        self.signal.notify_all();
    }

    /// Block until a signal arrives or `timeout` elapses. On timeout the
    /// supervisor thread keeps running; only the wait gives up.
    pub fn wait(&self, timeout: Duration) -> Result<u16, ServerError> {
        let guard = self.state.lock().unwrap();
        let (mut state, wait_result) = self
            .signal
            .wait_timeout_while(guard, timeout, |s| !s.fired)
            .unwrap();
        if wait_result.timed_out() && !state.fired {
            return Err(ServerError::StartupTimeout(timeout));
        }
        state
            .outcome
            .take()
            .expect("handshake fired without outcome")
    }
}

impl Default for StartupHandshake {
    fn default() -> Self {
        Self::new()
    }
}

/// Owns the supervisor thread handle.
pub struct Supervisor {
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Supervisor {
    pub fn new() -> Self {
        Self {
            thread: Mutex::new(None),
        }
    }

    pub fn attach(&self, handle: JoinHandle<()>) {
        *self.thread.lock().unwrap() = Some(handle);
    }

    /// Block until the supervisor thread exits. A no-op if no thread was
    /// ever spawned or it was already joined.
    pub fn join(&self) {
        let handle = self.thread.lock().unwrap().take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }
}

impl Default for Supervisor {
    fn default() -> Self {
        Self::new()
    }
}

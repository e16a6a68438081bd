//! Server lifecycle: the start/ready handshake, supervisor-thread
//! bookkeeping and the engine stop primitive.

pub mod shutdown;
pub mod supervisor;

pub use shutdown::Shutdown;
pub use supervisor::{ServerState, StartupHandshake, Supervisor, STARTUP_TIMEOUT};

//! Server-side components: listener, sessions, registry, and router

pub mod listener;
pub mod registry;
pub mod router;
pub mod session;

pub use listener::{ChatServer, ShutdownHandle};
pub use registry::{Registry, RegistryError, SessionHandle};
pub use router::Router;
pub use session::{Session, SessionState};

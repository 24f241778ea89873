//! Sessions, participants and the operations clients perform on them.

pub mod manager;
pub mod participant;
pub mod registry;
pub mod room;

pub use manager::{JoinRequest, ManagerSettings, SessionManager};
pub use participant::Participant;
pub use registry::SessionRegistry;
pub use room::{Admission, RoomSession, SessionState};

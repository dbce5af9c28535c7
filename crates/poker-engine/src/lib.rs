//! Planning poker engine: session state machine, participant registry,
//! vote tally and the concurrent session manager.

pub mod machine;
pub mod manager;
pub mod mock;
pub mod registry;
pub mod tally;

pub use machine::{Departure, Session};
pub use manager::{
    ManagerConfig, SessionManager, ACTIONS_TOTAL, ACTION_ERRORS_TOTAL, DEFAULT_CLOSING_DELAY,
    SESSIONS_ACTIVE,
};
pub use registry::{Detached, HostChoice, Participant, ParticipantRegistry};
pub use tally::{suggest, tally};

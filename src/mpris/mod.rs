//! MPRIS module: re-exports and module declarations for submodules.

pub mod connection;
pub mod metadata;
pub mod snapshot;
pub mod source;
pub mod value;

pub use connection::{BusChange, player_buses, session_connection};
pub use source::{MprisConnector, SourceEvent};

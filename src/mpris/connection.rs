//! D-Bus connection management and player discovery for MPRIS.

use futures_util::stream::{self, Stream, StreamExt};
use zbus::fdo::DBusProxy;

pub const MPRIS_PREFIX: &str = "org.mpris.MediaPlayer2.";
pub const MPRIS_PATH: &str = "/org/mpris/MediaPlayer2";
pub const PLAYER_INTERFACE: &str = "org.mpris.MediaPlayer2.Player";

/// Errors that can occur during MPRIS operations
#[derive(thiserror::Error, Debug)]
pub enum MprisError {
    #[error("D-Bus error: {0}")]
    ZBus(#[from] zbus::Error),
    #[error("D-Bus error: {0}")]
    Fdo(#[from] zbus::fdo::Error),
    #[error("Failed to establish D-Bus connection")]
    NoConnection,
    #[error("Player {0} is not available")]
    Unavailable(String),
}

/// Open the session bus connection shared by discovery and every source.
pub async fn session_connection() -> Result<zbus::Connection, MprisError> {
    zbus::Connection::session()
        .await
        .map_err(|_| MprisError::NoConnection)
}

/// Lifecycle notification for one bus name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusChange {
    Appeared(String),
    Disappeared(String),
}

impl BusChange {
    pub fn name(&self) -> &str {
        match self {
            BusChange::Appeared(n) | BusChange::Disappeared(n) => n,
        }
    }

    pub fn is_mpris(&self) -> bool {
        self.name().starts_with(MPRIS_PREFIX)
    }
}

/// Stream of MPRIS players on the bus: the names owned right now, followed by
/// every later `NameOwnerChanged` transition.
pub async fn player_buses(
    conn: &zbus::Connection,
) -> Result<impl Stream<Item = BusChange> + use<>, MprisError> {
    let proxy = DBusProxy::new(conn).await?;

    let existing: Vec<BusChange> = proxy
        .list_names()
        .await?
        .into_iter()
        .map(|name| BusChange::Appeared(name.to_string()))
        .collect();

    let changes = proxy
        .receive_name_owner_changed()
        .await?
        .filter_map(|signal| async move {
            let args = signal
                .args()
                .inspect_err(|e| {
                    tracing::warn!(error = %e, "Failed to parse NameOwnerChanged argument")
                })
                .ok()?;
            let name = args.name.to_string();
            match (args.old_owner.is_some(), args.new_owner.is_some()) {
                (false, true) => Some(BusChange::Appeared(name)),
                (true, false) => Some(BusChange::Disappeared(name)),
                _ => None,
            }
        });

    Ok(stream::iter(existing)
        .chain(changes)
        .filter(|change| std::future::ready(change.is_mpris())))
}

/// Check if a player service name should be blocked
///
/// Returns true if the service name (case-insensitive) contains any blocked string.
pub fn is_blocked(service: &str, block_list: &[String]) -> bool {
    let service_lower = service.to_lowercase();
    block_list
        .iter()
        .filter(|blocked| !blocked.is_empty())
        .any(|blocked| service_lower.contains(&blocked.to_lowercase()))
}

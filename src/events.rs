use crate::catalog::Track;

/// Snapshot of the daemon-reported current and next track, resolved against
/// the catalog.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NowPlaying {
    pub current: Option<Track>,
    pub next: Option<Track>,
}

// Event types for change subscribers
#[derive(Debug, Clone)]
pub enum PlayerEvent {
    /// Current track, next track or the explicit queue changed.
    Updated(NowPlaying),
}

impl PlayerEvent {
    // Get the name of the event type
    pub fn event_type(&self) -> &'static str {
        match self {
            PlayerEvent::Updated(_) => "update",
        }
    }
}

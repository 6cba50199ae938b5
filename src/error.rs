use thiserror::Error;

/// ACK error code the daemon reports for a locator it cannot resolve.
pub const ACK_ERROR_NO_EXIST: u32 = 50;

#[derive(Error, Debug)]
pub enum MpdError {
    /// The daemon answered with a terminal ACK line. Transport faults are
    /// never surfaced here; they are retried internally until a terminal
    /// response is obtained.
    #[error("{message}")]
    CommandFailed {
        code: u32,
        command_index: u32,
        command: String,
        message: String,
    },

    #[error("Client stopped before the command completed")]
    ClientStopped,
}

impl MpdError {
    /// True if the daemon rejected a locator as not indexed / missing file.
    /// The scheduler treats the matching catalog entry as broken.
    pub fn is_no_such_file(&self) -> bool {
        matches!(
            self,
            MpdError::CommandFailed {
                code: ACK_ERROR_NO_EXIST,
                ..
            }
        )
    }
}

/// Opaque failure reported by a [`Catalog`](crate::Catalog) implementation.
#[derive(Error, Debug)]
#[error("Catalog error: {0}")]
pub struct CatalogError(pub Box<dyn std::error::Error + Send + Sync>);

impl CatalogError {
    pub fn new(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self(Box::new(err))
    }
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("State I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("State parsing failed: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Failures that halt the scheduler's reconciliation loop. Reaching the
/// caller of [`Player::run`](crate::Player::run) with one of these is the
/// one condition an operator must treat as restart-worthy.
#[derive(Error, Debug)]
pub enum PlayerError {
    #[error(transparent)]
    Mpd(#[from] MpdError),

    #[error(transparent)]
    Catalog(#[from] CatalogError),
}

pub use crate::frame::FrameError;

/// Route table faults.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RouteError {
    #[error("slot {slot} exceeds route table capacity {capacity}")]
    CapacityExceeded { slot: usize, capacity: usize },

    #[error("slot {slot} skips past the next free slot {size}")]
    SlotGap { slot: usize, size: usize },
}

/// Bounded channel write failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChannelError {
    #[error("record of {len} bytes can never fit a channel of {capacity} bytes")]
    RecordTooLarge { len: usize, capacity: usize },

    #[error("empty record")]
    EmptyRecord,
}

/// Errors surfaced by the engine and the node runtime.
#[derive(Debug, thiserror::Error)]
pub enum MeshError {
    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error(transparent)]
    Route(#[from] RouteError),

    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error("configuration error: {0}")]
    Config(String),
}

impl MeshError {
    /// Returns `false` for capacity and configuration faults, which no amount
    /// of retrying will clear.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            Self::Route(RouteError::CapacityExceeded { .. })
                | Self::Channel(ChannelError::RecordTooLarge { .. })
                | Self::Config(_)
        )
    }
}

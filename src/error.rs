use thiserror::Error;

/// Failures raised by the device banks.
///
/// Every violation is detected eagerly and returned immediately, aborting the
/// current aggregation or result call. Nothing is retried internally and
/// partially written caller accumulators are not rolled back; a failed call
/// is fatal to the current solve cycle.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DeviceError {
    /// Malformed construction input.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Device id outside the bank's index set.
    #[error("{device} id {id} is out of range, the bank holds {n} devices")]
    OutOfRange {
        device: &'static str,
        id: usize,
        n: usize,
    },

    /// A well-formed request that violates device state.
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    /// A connected device resolves to a bus with no solver presence.
    /// Indicates a topology bug upstream of the banks.
    #[error("{device} {id} is connected to bus {bus} which is deactivated")]
    InconsistentTopology {
        device: &'static str,
        id: usize,
        bus: usize,
    },
}

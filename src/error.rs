use thiserror::Error;

/// Errors surfaced by the simulation core.
#[derive(Debug, Error, PartialEq)]
pub enum SimError {
    /// No usable adapter/device, or the render surface could not be created.
    #[error("initialization failed: {0}")]
    Initialization(String),
    /// A grid allocation or rebuild was rejected. The previous grid is kept.
    #[error("invalid grid {width}x{height}: {reason}")]
    InvalidDimensions {
        width: u32,
        height: u32,
        reason: DimensionError,
    },
    /// The device refused a frame submission. Treated as terminal.
    #[error("device rejected submission: {0}")]
    DeviceSubmission(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum DimensionError {
    #[error("each side must be at least {min} cells")]
    BelowMinimum { min: u32 },
    #[error("cell buffers need {required} bytes but the device allows {limit}")]
    ExceedsBufferLimit { required: u64, limit: u64 },
    #[error("workgroup size {size} is outside 1..={max}")]
    WorkgroupSize { size: u32, max: u32 },
    #[error("{groups} workgroups exceed the per-dimension limit of {limit}")]
    TooManyWorkgroups { groups: u64, limit: u32 },
    #[error("{value} is not a positive whole number")]
    NotWhole { value: f32 },
}

//! Shared enums for settings and analysis results.

mod enums;

pub use enums::{
    CorrectionMode, CorrelationMethod, DelaySelectionMode, FallbackMode, FilteringMethod,
    OutlierMode, QualityMode, SeparationMode, SyncMode,
};

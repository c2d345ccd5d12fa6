//! Metadata keys attached to published objects.

/// Provenance of the stored object, copied from its activity.
pub const RUN_NUMBER: &str = "RunNumber";
pub const RUN_TYPE: &str = "RunType";
pub const PERIOD_NAME: &str = "PeriodName";
pub const PASS_NAME: &str = "PassName";
pub const PROVENANCE: &str = "Provenance";
/// Task that produced a monitor object.
pub const TASK_NAME: &str = "QC_TaskName";
/// Check that produced a quality object.
pub const CHECK_NAME: &str = "QC_CheckName";
/// Latest quality a check gave to a monitor object.
pub const QUALITY: &str = "QC_Quality";
/// Cycle in which the object was published.
pub const CYCLE_NUMBER: &str = "QC_CycleNumber";
/// Creation time, in milliseconds since the epoch.
pub const OBJECT_CREATION_TIME: &str = "QC_ObjectCreationTime";
/// "true" when too many messages of the cycle failed.
pub const DEGRADED_CYCLE: &str = "QC_DegradedCycle";

/// Presentation hints stored on monitor objects.
pub const DRAW_OPTIONS: &str = "drawOptions";
/// Free-form hints for display tools.
pub const DISPLAY_HINTS: &str = "displayHints";

pub mod clock;
pub mod acquisition;
pub mod fusion_task;

pub use acquisition::{AcquisitionScheduler, CycleOutcome, SchedulerState};
pub use clock::{Clock, ManualClock, SystemClock};
pub use fusion_task::{run_fusion, CacheWatcher, FusionTrigger};

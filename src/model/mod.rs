pub mod expectation;
pub mod snapshot;
pub mod test_case;
pub mod version;

pub use expectation::{
    CountDelta, DataStreamsExpectation, DeltaPolicy, ExpectedDelta, IndexDelta, Presence,
};
pub use snapshot::{DataStreamSnapshot, DataStreamState, LifecycleManager};
pub use test_case::{
    Checkpoint, DeployMode, HookError, UpgradeHook, UpgradeTestCase, hook,
};
pub use version::{StackVersion, VersionParseError};

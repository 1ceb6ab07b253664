//! Worker side: what runs inside the isolated process

pub mod bootstrap;
pub mod descriptor;
pub mod lifecycle;

pub use bootstrap::{spec_from_env, worker_main};
pub use descriptor::{
    Param, PlannedTest, Registry, SuiteDescriptor, TestBody, TestDescriptor, TestId,
};
pub use lifecycle::{run_lifecycle, LifecycleSummary};

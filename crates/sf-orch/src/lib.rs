//! Session Forge orchestration: feature workflows, prompt assembly and
//! service runtimes on top of the workspace and session crates.

pub mod glob;
pub mod orchestrator;
pub mod prompt;
pub mod runtime;

pub use glob::PathFilter;
pub use orchestrator::*;
pub use prompt::*;
pub use runtime::*;

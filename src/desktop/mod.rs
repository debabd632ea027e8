//! Desktop platform support
//!
//! Coordinates the main/preload/renderer target builds and supervises the
//! desktop runtime process during development.

pub mod coordinator;
pub mod supervisor;
pub mod target;

pub use coordinator::{DevSession, TargetCoordinator};
pub use supervisor::{
    is_junk_line, DesktopLauncher, LaunchSpec, OperatorAction, ProcessHandle, ProcessSupervisor,
    RuntimeLauncher, SupervisorOptions, SupervisorState,
};
pub use target::{main_target, preload_targets, renderer_target, shared_out_dir};

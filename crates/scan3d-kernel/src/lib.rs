//! scan3d Kernel (scan3d-kernel)
//!
//! The supervised-process primitive shared by every external tool the
//! pipeline drives:
//! 1. **Spawn**: start the tool with piped output streams
//! 2. **Wait with deadline**: drain output into a bounded tail while waiting
//! 3. **Forced terminate**: kill and reap the tool once the deadline passes
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use scan3d_kernel::prelude::*;
//! use std::time::Duration;
//!
//! let supervisor = Supervisor::new();
//! let command = ToolCommand::new("ffmpeg").arg("-version");
//! let exit = supervisor.run(&command, Duration::from_secs(5)).await?;
//! assert!(exit.success);
//! ```

pub mod error;
pub mod supervisor;
pub mod tail;

// Re-exports
pub use error::SupervisorError;
pub use supervisor::{Supervisor, ToolCommand, ToolExit, ToolRunner};
pub use tail::OutputTail;

/// Common imports for driving external tools
pub mod prelude {
    pub use crate::error::SupervisorError;
    pub use crate::supervisor::{Supervisor, ToolCommand, ToolExit, ToolRunner};
    pub use crate::tail::OutputTail;
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

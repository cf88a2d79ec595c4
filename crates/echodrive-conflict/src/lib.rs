//! EchoDrive Conflict - preserving and resolving independent edits
//!
//! Provides:
//! - Timestamped conflict-copy names and their reverse strip
//! - Creation of conflict copies next to the canonical file
//! - The resolution sweep that closes conflicts once the user removed the copy
//!
//! ## Architecture
//!
//! [`ConflictResolver`] depends only on the `IDriveProxy` and
//! `IStateRepository` ports from `echodrive-core`; the sync engine hands it
//! the drives of the current pass.

pub mod error;
pub mod namer;
pub mod resolver;

pub use error::ConflictError;
pub use namer::ConflictNamer;
pub use resolver::{ConflictResolver, SweepOutcome, SweepReport};

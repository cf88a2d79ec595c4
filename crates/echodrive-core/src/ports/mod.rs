//! Port definitions (hexagonal architecture interfaces)
//!
//! ## Ports Overview
//!
//! - [`IDriveProxy`] - Uniform CRUD, paginated listing and content hashing over one storage endpoint
//! - [`IDeltaPageHandler`] - Consumer of delta pages, invoked once per page
//! - [`IStateRepository`] - Persistent per-drive item state and conflict records

pub mod drive_proxy;
pub mod state_repository;

pub use drive_proxy::{DeltaPage, DriveError, IDeltaPageHandler, IDriveProxy};
pub use state_repository::IStateRepository;

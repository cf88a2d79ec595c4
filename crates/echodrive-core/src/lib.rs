//! EchoDrive Core - Domain logic and ports
//!
//! This crate contains the hexagonal architecture core with:
//! - **Domain types** - `DriveItem`, `RemoteState`, `Conflict`, `DriveChangedNotification`
//! - **Classification** - the pure `classify` function deciding what a sync pass does with an item
//! - **Port definitions** - Traits for adapters: `IDriveProxy`, `IDeltaPageHandler`, `IStateRepository`
//! - **Use cases** - content transfer between two drives with the single locator retry
//! - **Configuration** - typed YAML configuration used by the binaries
//!
//! # Architecture
//!
//! The domain module contains pure logic with no I/O. Ports define the trait
//! interfaces that storage endpoints and the state store implement; the sync
//! engine in `echodrive-sync` only talks to those traits.

pub mod config;
pub mod domain;
pub mod ports;
pub mod usecases;

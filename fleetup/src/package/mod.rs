//! Package identity and pending-update records.
//!
//! - [`PackageRef`]: qualified name plus display name, the identity shared by
//!   the store, the manifest and the installer.
//! - [`UpdateRecord`]: a pending update for one package, as queued by the
//!   reconciler and consumed by the installer pipeline.
//! - [`Action`]: how the pipeline applies an update (`UPDATE` or `CLEAN`).

mod core;
mod update;

pub use self::core::PackageRef;
pub use update::{Action, InvalidRecord, UpdateRecord};

//! Built-in build tasks other than compilation

pub mod command;
pub mod pack;

pub use command::CommandTask;
pub use pack::{ManifestEntry, PackTask, PackageManifest};

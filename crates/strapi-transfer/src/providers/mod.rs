//! Concrete providers: archive files, local instances and remote instances.

pub mod file;
pub mod local;
pub mod remote;

pub use file::{FileDestination, FileDestinationOptions, FileSource, FileSourceOptions};
pub use local::{
    ContentStore, DirectoryStore, LocalDestination, LocalDestinationOptions, LocalSource,
};
pub use remote::{RemoteDestination, RemoteOptions, RemoteSource};

mod archive;
mod client;
mod digest;
mod events;
mod manifest;
mod name;
mod transfer;

pub use archive::{pack, unpack, ArchiveError, UnpackedImage};
pub use client::{ClientError, RegistryClient};
pub use digest::{Digest, DigestAlgorithm, DigestError};
pub use events::{EventHandler, NoEventHandler};
pub use manifest::{FsLayer, Manifest, ManifestError};
pub use name::{NameError, Repository, Tag};
pub use transfer::{CancelToken, Transfer, TransferError};

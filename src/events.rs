use crate::digest::Digest;

/// Handler to receive notifications for events during a transfer.
///
/// All methods are optional.
#[expect(unused_variables)]
pub trait EventHandler: Send + Sync + 'static {
    /// HTTP request to the registry.
    fn registry_request(&self, method: &str, url: &str) {}

    /// A push starts, with the number of layers found in the archive.
    fn push_start(&self, layers: usize) {}

    /// A layer is already present in the registry, so its upload
    /// is skipped.
    fn layer_exists(&self, digest: &Digest) {}

    /// A layer is going to be uploaded.
    ///
    /// `bytes` is the size of the blob.
    fn layer_upload(&self, digest: &Digest, bytes: u64) {}

    /// A pull starts, with the number of layers listed in the manifest.
    fn pull_start(&self, layers: usize) {}

    /// A layer was downloaded and verified.
    ///
    /// `bytes` is the size of the blob.
    fn layer_download(&self, digest: &Digest, bytes: u64) {}

    /// A blob or manifest was deleted from the registry.
    fn deleted(&self, what: &str) {}

    /// The operation completed.
    fn finished(&self) {}
}

/// [`EventHandler`] instance to ignore all events.
pub struct NoEventHandler;

impl EventHandler for NoEventHandler {}

use std::{
    fs::File,
    io::{self, BufReader, BufWriter},
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use crate::{
    archive::{self, ArchiveError},
    client::{ClientError, RegistryClient},
    digest::Digest,
    events::{EventHandler, NoEventHandler},
    manifest::{Manifest, ManifestError},
    name::{NameError, Repository, Tag},
};

#[derive(thiserror::Error, Debug)]
pub enum TransferError {
    #[error("{0}")]
    Name(#[from] NameError),

    #[error("{0}")]
    Archive(#[from] ArchiveError),

    #[error("{0}")]
    Manifest(#[from] ManifestError),

    #[error("{0}")]
    Client(#[from] ClientError),

    #[error("Digest mismatch for {digest}: {detail}")]
    Integrity { digest: String, detail: String },

    #[error("I/O error in {1}: {0}")]
    Io(io::Error, PathBuf),

    #[error("Operation interrupted.")]
    Interrupted,
}

macro_rules! try_io {
    ($path:expr, $e:expr $(,)?) => {
        $e.map_err(|e| TransferError::Io(io::Error::from(e), $path.into()))?
    };
}

/// Token to abort a transfer from another thread.
///
/// The orchestrator checks it between blocking steps, so a cancelled
/// multi-layer transfer stops at the next layer boundary.
#[derive(Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> CancelToken {
        CancelToken::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Orchestrator for whole-image operations against one registry.
///
/// Transfers are sequential: one layer completes before the next one
/// starts, and the manifest is always the last artifact written on a
/// push and the first one read on a pull. The manifest's presence is
/// the only signal that a complete image exists, so no partial push
/// ever writes one.
///
/// # Examples
///
/// ```no_run
/// # use image_ferry::*;
/// # fn main() -> Result<(), TransferError> {
/// let transfer = Transfer::new("127.0.0.1:5000");
/// transfer.pull("library/debian", "stable", "debian.tar".as_ref())?;
/// # Ok(())
/// # }
/// ```
pub struct Transfer<E = NoEventHandler> {
    client: RegistryClient<E>,
    cancel: CancelToken,
}

impl Transfer<NoEventHandler> {
    pub fn new(registry: &str) -> Self {
        Transfer {
            client: RegistryClient::new(registry),
            cancel: CancelToken::new(),
        }
    }
}

impl<E> Transfer<E>
where
    E: EventHandler,
{
    /// Set an explicit per-request timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.client = self.client.timeout(timeout);
        self
    }

    /// Install a handler to receive transfer events.
    pub fn event_handler<F: EventHandler>(self, event_handler: F) -> Transfer<F> {
        Transfer {
            client: self.client.event_handler(event_handler),
            cancel: self.cancel,
        }
    }

    /// Install a shared token to abort the transfer.
    pub fn cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// The underlying registry session.
    pub fn client(&self) -> &RegistryClient<E> {
        &self.client
    }

    /// Push the image in the local `archive` to the registry.
    ///
    /// Layers already present in the registry are not re-uploaded. Any
    /// failure aborts the push before the manifest is written, leaving
    /// the registry as it was for this tag.
    pub fn push(&self, archive: &Path) -> Result<(), TransferError> {
        let scratch = try_io!(archive, tempfile::tempdir());
        let image = archive::unpack(archive, scratch.path())?;

        let events = self.client.events();
        events.push_start(image.layers.len());

        for (digest, path) in &image.layers {
            self.check_cancelled()?;

            // Trust nothing from the archive: verify the unpacked bytes
            // against the digest they claim before sending anything.
            verify_file(digest, path)?;

            if self.client.blob_exists(&image.repository, digest)? {
                events.layer_exists(digest);
                continue;
            }

            let file = try_io!(path, File::open(path));
            let length = try_io!(path, file.metadata()).len();

            events.layer_upload(digest, length);
            self.client
                .upload_blob(&image.repository, digest, BufReader::new(file), length)?;
        }

        self.check_cancelled()?;

        // The manifest goes last: its presence is the signal that every
        // layer it references is already in place.
        let manifest = Manifest::new(
            &image.repository,
            &image.tag,
            image.layers.iter().map(|(d, _)| d.clone()),
        );

        let encoded = manifest.encode()?;
        let digest = Digest::compute(&encoded);

        self.client
            .put_manifest(&image.repository, &image.tag, &digest, &manifest)?;

        events.finished();
        Ok(())
    }

    /// Pull `repository:tag` from the registry into the archive at
    /// `dest`.
    ///
    /// Every downloaded layer is verified against its digest before it
    /// is accepted. On any failure the scratch files are discarded and
    /// nothing is left at `dest`.
    pub fn pull(&self, repository: &str, tag: &str, dest: &Path) -> Result<(), TransferError> {
        let repository = Repository::parse(repository)?;
        let tag = Tag::parse(tag)?;

        let (manifest, _digest) = self.client.get_manifest(&repository, &tag)?;

        let events = self.client.events();
        events.pull_start(manifest.fs_layers.len());

        let scratch = try_io!(dest, tempfile::tempdir());
        let mut layers = Vec::with_capacity(manifest.fs_layers.len());

        for (n, digest) in manifest.layer_digests().enumerate() {
            self.check_cancelled()?;

            let path = scratch.path().join(format!("{n}.tar"));

            let body = self.client.download_blob(&repository, digest)?;
            let mut verified = digest.wrap_reader(body);
            let mut output = BufWriter::new(try_io!(&path, File::create(&path)));

            let copied = match io::copy(&mut verified, &mut output) {
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::InvalidData => {
                    return Err(TransferError::Integrity {
                        digest: digest.to_string(),
                        detail: e.to_string(),
                    })
                }
                Err(e) => return Err(TransferError::Io(e, path)),
            };

            try_io!(&path, output.into_inner().map_err(|e| e.into_error()));

            events.layer_download(digest, copied);
            layers.push((digest.clone(), path));
        }

        self.check_cancelled()?;

        if let Err(e) = archive::pack(dest, &repository, &tag, &layers) {
            // Do not leave a partially written archive behind.
            let _ = std::fs::remove_file(dest);
            return Err(e.into());
        }

        events.finished();
        Ok(())
    }

    /// Delete `repository:tag` and the layer blobs it references.
    ///
    /// Unlike push and pull, deletion is best-effort: a failing blob
    /// delete does not stop the remaining deletions, so the manifest
    /// never outlives its layers. The first error found is the one
    /// reported.
    pub fn delete(&self, repository: &str, tag: &str) -> Result<(), TransferError> {
        let repository = Repository::parse(repository)?;
        let tag = Tag::parse(tag)?;

        let (manifest, _digest) = self.client.get_manifest(&repository, &tag)?;

        let events = self.client.events();
        let mut first_error = None;

        for digest in manifest.layer_digests() {
            self.check_cancelled()?;

            match self.client.delete_blob(&repository, digest) {
                Ok(()) => events.deleted(digest.source()),

                // A blob can be gone already, for example if it was
                // shared with an image deleted before this one.
                Err(ClientError::NotFound(_)) => {}

                Err(e) => {
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }

        match self.client.delete_manifest(&repository, &tag) {
            Ok(()) => events.deleted(tag.as_str()),
            Err(e) => {
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e.into()),
            None => {
                events.finished();
                Ok(())
            }
        }
    }

    fn check_cancelled(&self) -> Result<(), TransferError> {
        if self.cancel.is_cancelled() {
            return Err(TransferError::Interrupted);
        }

        Ok(())
    }
}

/// Verify the content of `path` against `digest`.
fn verify_file(digest: &Digest, path: &Path) -> Result<(), TransferError> {
    let file = try_io!(path, File::open(path));
    let mut reader = digest.wrap_reader(BufReader::new(file));

    match io::copy(&mut reader, &mut io::sink()) {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::InvalidData => Err(TransferError::Integrity {
            digest: digest.to_string(),
            detail: e.to_string(),
        }),
        Err(e) => Err(TransferError::Io(e, path.to_owned())),
    }
}

mod blobs;


use std::{io::Read, net::SocketAddr, str::FromStr, time::Duration};

use crate::{
    digest::{Digest, DigestError},
    events::{EventHandler, NoEventHandler},
    manifest::{self, Manifest, ManifestError},
    name::{Repository, Tag},
};

const USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

/// Errors from the registry client.
#[derive(thiserror::Error, Debug)]
pub enum ClientError {
    #[error("Registry is unreachable: {0}")]
    Unreachable(String),

    #[error("{0} not found.")]
    NotFound(String),

    #[error("Registry rejected {context}: {status} {text}")]
    Protocol {
        context: String,
        status: u16,
        text: String,
    },

    #[error("Upload session {0}.")]
    InvalidLocation(&'static str),

    #[error("Missing Docker-Content-Digest header.")]
    MissingDigestHeader,

    #[error("Invalid digest from the registry: {0}")]
    Digest(#[from] DigestError),

    #[error("{0}")]
    Manifest(#[from] ManifestError),

    #[error("Failed to read a response body: {0}")]
    Body(#[from] std::io::Error),

    #[error("HTTP request failed: {0}")]
    Transport(#[from] Box<ureq::Error>),
}

impl From<ureq::Error> for ClientError {
    fn from(value: ureq::Error) -> Self {
        ClientError::Transport(Box::new(value))
    }
}

/// Session against one registry host.
///
/// It owns the HTTP agent and the [`EventHandler`], and exposes the
/// manifest and existence operations of the wire protocol. Blob
/// transfers are delegated to the transport in [`blobs`].
///
/// The client holds no locks: an existence check is advisory only, and
/// two sessions writing the same tag race with last-writer-wins.
pub struct RegistryClient<E = NoEventHandler> {
    agent: ureq::Agent,
    host: String,
    event_handler: E,
}

impl RegistryClient<NoEventHandler> {
    /// Create a client for the registry at `registry` (a `host` or
    /// `host:port` address).
    ///
    /// It tries to guess the URI scheme for the registry:
    ///
    /// * If it is a loopback IP (like `127.0.0.1`), or if the port
    ///   is `:80`, it uses `http://`.
    /// * In any other case, it uses `https://`.
    pub fn new(registry: &str) -> Self {
        RegistryClient::with_event_handler(registry, NoEventHandler)
    }
}

impl<E> RegistryClient<E>
where
    E: EventHandler,
{
    pub fn with_event_handler(registry: &str, event_handler: E) -> Self {
        RegistryClient {
            agent: build_agent(None),
            host: format!("{}{}", guess_scheme(registry), registry),
            event_handler,
        }
    }

    /// Set an explicit timeout for every request, covering the whole
    /// call (connection, headers and body).
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.agent = build_agent(Some(timeout));
        self
    }

    /// Replace the event handler, keeping the connection settings.
    pub(crate) fn event_handler<F: EventHandler>(self, event_handler: F) -> RegistryClient<F> {
        RegistryClient {
            agent: self.agent,
            host: self.host,
            event_handler,
        }
    }

    pub(crate) fn events(&self) -> &E {
        &self.event_handler
    }

    /// Check that the service root answers.
    pub fn ping(&self) -> Result<(), ClientError> {
        let url = format!("{}/v2/", self.host);

        match self.request("GET", &url).call() {
            Ok(response) if response.status() == 200 => Ok(()),
            Ok(response) => Err(unreachable_error(response)),
            Err(ureq::Error::Status(_, response)) => Err(unreachable_error(response)),
            Err(e) => Err(e.into()),
        }
    }

    /// Check if a manifest exists for `tag`.
    ///
    /// The check is advisory: nothing prevents another client from
    /// creating or deleting the manifest right after it.
    pub fn manifest_exists(&self, repository: &Repository, tag: &Tag) -> Result<bool, ClientError> {
        self.exists(
            self.manifest_url(repository, tag),
            format!("existence check for {repository}:{tag}"),
        )
    }

    /// Check if a blob exists in `repository`.
    pub fn blob_exists(&self, repository: &Repository, digest: &Digest) -> Result<bool, ClientError> {
        self.exists(
            self.blob_url(repository, digest),
            format!("existence check for {digest}"),
        )
    }

    /// Download the manifest for `tag`.
    ///
    /// On success it returns the decoded manifest and its authoritative
    /// digest, taken from the `Docker-Content-Digest` response header.
    pub fn get_manifest(
        &self,
        repository: &Repository,
        tag: &Tag,
    ) -> Result<(Manifest, Digest), ClientError> {
        let url = self.manifest_url(repository, tag);
        let request = self.request("GET", &url).set("Accept", manifest::MEDIA_TYPE);

        let response = match request.call() {
            Ok(r) => r,
            Err(ureq::Error::Status(404, _)) => {
                return Err(ClientError::NotFound(format!("Manifest {repository}:{tag}")))
            }
            Err(ureq::Error::Status(_, r)) => {
                return Err(protocol_error(format!("manifest request for {repository}:{tag}"), r))
            }
            Err(e) => return Err(e.into()),
        };

        let digest = response
            .header("Docker-Content-Digest")
            .ok_or(ClientError::MissingDigestHeader)
            .and_then(|h| Ok(Digest::try_from(h)?))?;

        let mut body = Vec::new();
        response.into_reader().read_to_end(&mut body)?;

        Ok((Manifest::decode(&body)?, digest))
    }

    /// Upload a manifest for `tag`.
    ///
    /// `digest` is the content hash of the encoded manifest; it becomes
    /// part of the upload URL.
    pub fn put_manifest(
        &self,
        repository: &Repository,
        tag: &Tag,
        digest: &Digest,
        manifest: &Manifest,
    ) -> Result<(), ClientError> {
        let url = format!("{}:{}", self.manifest_url(repository, tag), digest);
        let body = manifest.encode()?;

        let request = self
            .request("PUT", &url)
            .set("Content-Type", manifest::MEDIA_TYPE);

        let context = || format!("manifest upload for {repository}:{tag}");

        match request.send_bytes(&body) {
            Ok(response) if response.status() == 201 => Ok(()),
            Ok(response) => Err(protocol_error(context(), response)),
            Err(ureq::Error::Status(_, response)) => Err(protocol_error(context(), response)),
            Err(e) => Err(e.into()),
        }
    }

    /// Download a single blob.
    ///
    /// The returned stream is the raw response body. The transport does
    /// not verify it; callers must check the content against `digest`
    /// before trusting it.
    pub fn download_blob(
        &self,
        repository: &Repository,
        digest: &Digest,
    ) -> Result<impl Read + Send, ClientError> {
        blobs::download(self, repository, digest)
    }

    /// Upload a single blob with the two-phase chunked protocol.
    pub fn upload_blob(
        &self,
        repository: &Repository,
        digest: &Digest,
        content: impl Read,
        length: u64,
    ) -> Result<(), ClientError> {
        blobs::upload(self, repository, digest, content, length)
    }

    /// Delete the manifest for `tag`.
    pub fn delete_manifest(&self, repository: &Repository, tag: &Tag) -> Result<(), ClientError> {
        self.delete(
            self.manifest_url(repository, tag),
            format!("Manifest {repository}:{tag}"),
        )
    }

    /// Delete a blob from `repository`.
    pub fn delete_blob(&self, repository: &Repository, digest: &Digest) -> Result<(), ClientError> {
        self.delete(self.blob_url(repository, digest), format!("Blob {digest}"))
    }

    fn exists(&self, url: String, context: String) -> Result<bool, ClientError> {
        match self.request("HEAD", &url).call() {
            Ok(response) if response.status() == 200 => Ok(true),
            Ok(response) => Err(protocol_error(context, response)),
            Err(ureq::Error::Status(404, _)) => Ok(false),
            Err(ureq::Error::Status(_, response)) => Err(protocol_error(context, response)),
            Err(e) => Err(e.into()),
        }
    }

    fn delete(&self, url: String, what: String) -> Result<(), ClientError> {
        match self.request("DELETE", &url).call() {
            Ok(response) if response.status() == 200 => Ok(()),
            Ok(response) => Err(protocol_error(format!("deletion of {what}"), response)),
            Err(ureq::Error::Status(404, _)) => Err(ClientError::NotFound(what)),
            Err(ureq::Error::Status(_, response)) => {
                Err(protocol_error(format!("deletion of {what}"), response))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Build a request to the registry.
    ///
    /// Every request goes through here, so the event handler sees all
    /// the traffic.
    fn request(&self, method: &str, url: &str) -> ureq::Request {
        self.event_handler.registry_request(method, url);
        self.agent.request(method, url)
    }

    fn manifest_url(&self, repository: &Repository, tag: &Tag) -> String {
        format!("{}/v2/{}/manifests/{}", self.host, repository, tag)
    }

    fn blob_url(&self, repository: &Repository, digest: &Digest) -> String {
        format!("{}/v2/{}/blobs/{}", self.host, repository, digest)
    }

    fn uploads_url(&self, repository: &Repository) -> String {
        format!("{}/v2/{}/blobs/uploads/", self.host, repository)
    }
}

/// Build a [`ClientError::Protocol`] from a non-success response.
fn protocol_error(context: String, response: ureq::Response) -> ClientError {
    ClientError::Protocol {
        context,
        status: response.status(),
        text: response.status_text().to_owned(),
    }
}

fn unreachable_error(response: ureq::Response) -> ClientError {
    ClientError::Unreachable(format!(
        "{} {}",
        response.status(),
        response.status_text()
    ))
}

fn build_agent(timeout: Option<Duration>) -> ureq::Agent {
    let mut builder = ureq::builder().user_agent(USER_AGENT);

    if let Some(timeout) = timeout {
        builder = builder.timeout(timeout);
    }

    builder.build()
}

fn guess_scheme(registry: &str) -> &'static str {
    const HTTP: &str = "http://";
    const HTTPS: &str = "https://";

    if registry.ends_with(":80") {
        return HTTP;
    }

    if let Ok(address) = SocketAddr::from_str(registry) {
        let loopback = match address {
            SocketAddr::V4(v4) => v4.ip().is_loopback(),
            SocketAddr::V6(v6) => v6.ip().is_loopback(),
        };

        return if loopback { HTTP } else { HTTPS };
    }

    HTTPS
}

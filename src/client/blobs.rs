//! Blob transport: direct downloads and the two-phase chunked upload.

use std::io::Read;

use crate::{digest::Digest, events::EventHandler, name::Repository};

use super::{protocol_error, ClientError, RegistryClient};

const OCTET_STREAM: &str = "application/octet-stream";

pub(super) fn download<E: EventHandler>(
    client: &RegistryClient<E>,
    repository: &Repository,
    digest: &Digest,
) -> Result<impl Read + Send, ClientError> {
    let url = client.blob_url(repository, digest);

    match client.request("GET", &url).call() {
        Ok(response) if response.status() == 200 => Ok(response.into_reader()),
        Ok(response) => Err(protocol_error(format!("download of {digest}"), response)),
        Err(ureq::Error::Status(404, _)) => Err(ClientError::NotFound(format!("Blob {digest}"))),
        Err(ureq::Error::Status(_, response)) => {
            Err(protocol_error(format!("download of {digest}"), response))
        }
        Err(e) => Err(e.into()),
    }
}

/// Upload one blob.
///
/// The first phase opens an upload session; the `Location` header of
/// its response is the session token. The second phase sends the whole
/// body to the session URL, with the target digest as a query
/// parameter. A failed upload is reported as-is; resuming means
/// restarting both phases.
pub(super) fn upload<E: EventHandler>(
    client: &RegistryClient<E>,
    repository: &Repository,
    digest: &Digest,
    content: impl Read,
    length: u64,
) -> Result<(), ClientError> {
    let url = client.uploads_url(repository);

    let response = match client.request("POST", &url).call() {
        Ok(r) => r,
        Err(ureq::Error::Status(_, r)) => {
            return Err(protocol_error(format!("upload start for {digest}"), r))
        }
        Err(e) => return Err(e.into()),
    };

    if response.status() != 202 {
        return Err(protocol_error(format!("upload start for {digest}"), response));
    }

    // The session token must be exactly one Location value.
    let location = match response.all("Location")[..] {
        [single] => single.to_owned(),
        [] => return Err(ClientError::InvalidLocation("without a Location header")),
        _ => return Err(ClientError::InvalidLocation("with multiple Location headers")),
    };

    let url = completion_url(&client.host, &location, digest);

    let request = client
        .request("PUT", &url)
        .set("Content-Length", &length.to_string())
        .set("Content-Type", OCTET_STREAM);

    match request.send(content) {
        Ok(response) if response.status() == 201 => Ok(()),
        Ok(response) => Err(protocol_error(format!("upload of {digest}"), response)),
        Err(ureq::Error::Status(_, response)) => {
            Err(protocol_error(format!("upload of {digest}"), response))
        }
        Err(e) => Err(e.into()),
    }
}

/// Build the URL for the completing `PUT` from the session `Location`.
///
/// Registries may answer with an absolute URL or with a path relative
/// to the host, and may include their own query parameters.
fn completion_url(host: &str, location: &str, digest: &Digest) -> String {
    let separator = if location.contains('?') { '&' } else { '?' };

    if location.starts_with("http://") || location.starts_with("https://") {
        format!("{location}{separator}digest={digest}")
    } else {
        format!("{host}{location}{separator}digest={digest}")
    }
}

#[test]
fn completion_urls() {
    let digest = Digest::compute(b"x");

    assert_eq!(
        completion_url("http://127.0.0.1:80", "/v2/a/blobs/uploads/1", &digest),
        format!("http://127.0.0.1:80/v2/a/blobs/uploads/1?digest={digest}")
    );

    assert_eq!(
        completion_url("http://h", "https://other/u?state=x", &digest),
        format!("https://other/u?state=x&digest={digest}")
    );
}

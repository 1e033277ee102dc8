use std::{
    collections::{HashMap, HashSet},
    io::{Cursor, Read},
    sync::{Arc, Mutex},
    time::Duration,
};

use image_ferry::Digest;
use tiny_http::{Header, Method, Request, Response, Server};

const MANIFEST_MEDIA_TYPE: &str = "application/vnd.docker.distribution.manifest.v1+json";

/// Shared, inspectable state of the mock registry.
#[derive(Default)]
pub struct State {
    /// Stored blobs, keyed by digest.
    pub blobs: HashMap<String, Vec<u8>>,

    /// Stored manifests, keyed by [`State::manifest_key`].
    pub manifests: HashMap<String, Vec<u8>>,

    /// Every received request, as `METHOD path`.
    pub log: Vec<String>,

    /// Fail the Nth upload-completion PUT (1-based) with a 500.
    pub fail_upload_put: Option<usize>,

    /// Digests whose downloads return corrupted bodies.
    pub corrupt: HashSet<String>,

    uploads: usize,
    completion_puts: usize,
}

impl State {
    pub fn manifest_key(repository: &str, tag: &str) -> String {
        format!("{repository}:{tag}")
    }
}

/// Start a registry server in a random port.
///
/// Returns the port number of the server, and a handle to its state
/// to preload fixtures and inspect what the client did.
pub fn start_registry(state: State) -> (u16, Arc<Mutex<State>>) {
    let server = Server::http("127.1:0").expect("start registry server");
    let port = server.server_addr().to_ip().unwrap().port();

    let state = Arc::new(Mutex::new(state));
    let registry = Registry {
        state: state.clone(),
    };

    std::thread::spawn(move || {
        let timeout = Duration::from_secs(30);

        while let Ok(Some(request)) = server.recv_timeout(timeout) {
            registry.handle(request);
        }
    });

    (port, state)
}

struct Registry {
    state: Arc<Mutex<State>>,
}

impl Registry {
    fn handle(&self, mut request: Request) {
        let method = request.method().clone();
        let url = request.url().to_owned();

        let response = self.response_for(&method, &url, &mut request);
        request.respond(response).expect("Send response");
    }

    fn response_for(
        &self,
        method: &Method,
        url: &str,
        request: &mut Request,
    ) -> Response<Cursor<Vec<u8>>> {
        let mut state = self.state.lock().unwrap();
        state.log.push(format!("{method} {url}"));

        let (path, query) = match url.split_once('?') {
            Some((path, query)) => (path, Some(query)),
            None => (url, None),
        };

        let Some(rest) = path.strip_prefix("/v2/") else {
            return status(404);
        };

        // Service root.
        if rest.is_empty() {
            return Response::from_data(&b"{}"[..]).with_status_code(200);
        }

        // Upload initiation.
        if method == &Method::Post {
            if let Some(repo) = rest.strip_suffix("blobs/uploads/") {
                state.uploads += 1;
                let location = format!("/v2/{}blobs/uploads/{}", repo, state.uploads);

                return status(202)
                    .with_header(Header::from_bytes("Location", location).unwrap());
            }
        }

        // Upload completion.
        if method == &Method::Put && rest.contains("blobs/uploads/") {
            state.completion_puts += 1;
            if state.fail_upload_put == Some(state.completion_puts) {
                return status(500);
            }

            let digest = query
                .and_then(|q| q.split('&').find_map(|p| p.strip_prefix("digest=")))
                .expect("digest query parameter")
                .to_owned();

            let mut body = Vec::new();
            request.as_reader().read_to_end(&mut body).unwrap();

            state.blobs.insert(digest, body);
            return status(201);
        }

        if let Some((repo, target)) = rest.split_once("/manifests/") {
            return match method {
                Method::Head => {
                    let key = State::manifest_key(repo, target);
                    status(if state.manifests.contains_key(&key) { 200 } else { 404 })
                }

                Method::Get => {
                    let key = State::manifest_key(repo, target);
                    match state.manifests.get(&key) {
                        Some(body) => {
                            let digest = Digest::compute(body);

                            Response::from_data(body.clone())
                                .with_header(
                                    Header::from_bytes("Content-Type", MANIFEST_MEDIA_TYPE)
                                        .unwrap(),
                                )
                                .with_header(
                                    Header::from_bytes("Docker-Content-Digest", digest.source())
                                        .unwrap(),
                                )
                        }

                        None => status(404),
                    }
                }

                Method::Put => {
                    // The upload URL carries the manifest digest after
                    // the tag.
                    let tag = target.split_once(':').map(|(t, _)| t).unwrap_or(target);

                    let mut body = Vec::new();
                    request.as_reader().read_to_end(&mut body).unwrap();

                    state.manifests.insert(State::manifest_key(repo, tag), body);
                    status(201)
                }

                Method::Delete => {
                    let key = State::manifest_key(repo, target);
                    status(if state.manifests.remove(&key).is_some() { 200 } else { 404 })
                }

                _ => status(405),
            };
        }

        if let Some((_repo, digest)) = rest.split_once("/blobs/") {
            return match method {
                Method::Head => {
                    status(if state.blobs.contains_key(digest) { 200 } else { 404 })
                }

                Method::Get => match state.blobs.get(digest) {
                    Some(body) if state.corrupt.contains(digest) => {
                        let mut body = body.clone();
                        body.iter_mut().for_each(|b| *b = !*b);
                        Response::from_data(body)
                    }

                    Some(body) => Response::from_data(body.clone()),

                    None => status(404),
                },

                Method::Delete => {
                    status(if state.blobs.remove(digest).is_some() { 200 } else { 404 })
                }

                _ => status(405),
            };
        }

        status(404)
    }
}

fn status<S: Into<tiny_http::StatusCode>>(code: S) -> Response<Cursor<Vec<u8>>> {
    Response::from_data(Vec::new()).with_status_code(code)
}

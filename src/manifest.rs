use crate::{
    digest::Digest,
    name::{NameError, Repository, Tag},
};

/// Media type for the manifest document, used in `Accept` and
/// `Content-Type` headers.
pub(crate) const MEDIA_TYPE: &str = "application/vnd.docker.distribution.manifest.v1+json";

/// Errors from the manifest codec.
#[derive(thiserror::Error, Debug)]
pub enum ManifestError {
    #[error("Malformed manifest: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Invalid repository name in manifest: {0}")]
    Name(#[from] NameError),
}

/// One layer reference inside a [`Manifest`].
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct FsLayer {
    #[serde(rename = "blobSum")]
    pub blob_sum: Digest,
}

/// The document binding a repository name and tag to an ordered list
/// of layer digests.
///
/// The order of `fs_layers` reflects the layer application order, and
/// it is preserved by both [`encode`](Manifest::encode) and
/// [`decode`](Manifest::decode). A manifest is built fresh for every
/// push and never mutated.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Manifest {
    pub name: String,

    pub tag: String,

    #[serde(rename = "fsLayers")]
    pub fs_layers: Vec<FsLayer>,
}

impl Manifest {
    pub fn new(
        repository: &Repository,
        tag: &Tag,
        layers: impl IntoIterator<Item = Digest>,
    ) -> Manifest {
        Manifest {
            name: repository.to_string(),
            tag: tag.to_string(),
            fs_layers: layers
                .into_iter()
                .map(|blob_sum| FsLayer { blob_sum })
                .collect(),
        }
    }

    /// Serialize to the registry's JSON wire format.
    pub fn encode(&self) -> Result<Vec<u8>, ManifestError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Parse a manifest from its JSON wire format.
    ///
    /// The repository name is validated here, so manifests with invalid
    /// names are rejected at the boundary.
    pub fn decode(data: &[u8]) -> Result<Manifest, ManifestError> {
        let manifest: Manifest = serde_json::from_slice(data)?;
        Repository::parse(&manifest.name)?;
        Ok(manifest)
    }

    /// Layer digests, in application order.
    pub fn layer_digests(&self) -> impl Iterator<Item = &Digest> {
        self.fs_layers.iter().map(|l| &l.blob_sum)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn digest(content: &[u8]) -> Digest {
        Digest::compute(content)
    }

    #[test]
    fn preserve_layer_order() {
        let repository = Repository::parse("foo/bar").unwrap();
        let tag = Tag::parse("v1").unwrap();

        let layers = [digest(b"0"), digest(b"1"), digest(b"2")];

        let manifest = Manifest::new(&repository, &tag, layers.iter().cloned());
        let decoded = Manifest::decode(&manifest.encode().unwrap()).unwrap();

        assert_eq!(decoded.name, "foo/bar");
        assert_eq!(decoded.tag, "v1");

        let round_trip: Vec<_> = decoded.layer_digests().cloned().collect();
        assert_eq!(round_trip, layers);
    }

    #[test]
    fn wire_field_names() {
        let repository = Repository::parse("foo").unwrap();
        let tag = Tag::parse("t").unwrap();

        let manifest = Manifest::new(&repository, &tag, [digest(b"x")]);
        let json: serde_json::Value =
            serde_json::from_slice(&manifest.encode().unwrap()).unwrap();

        assert_eq!(json["name"], "foo");
        assert_eq!(json["tag"], "t");
        assert_eq!(json["fsLayers"][0]["blobSum"], digest(b"x").source());
    }

    #[test]
    fn reject_malformed_manifests() {
        // Missing fsLayers.
        assert!(matches!(
            Manifest::decode(br#"{"name": "foo", "tag": "t"}"#),
            Err(ManifestError::Malformed(_))
        ));

        // fsLayers is not an array.
        assert!(matches!(
            Manifest::decode(br#"{"name": "foo", "tag": "t", "fsLayers": 3}"#),
            Err(ManifestError::Malformed(_))
        ));

        // blobSum is not a digest string.
        assert!(matches!(
            Manifest::decode(br#"{"name": "foo", "tag": "t", "fsLayers": [{"blobSum": 1}]}"#),
            Err(ManifestError::Malformed(_))
        ));

        // Invalid repository name.
        let json = format!(
            r#"{{"name": "Foo", "tag": "t", "fsLayers": [{{"blobSum": "{}"}}]}}"#,
            Digest::compute(b"x")
        );
        assert!(matches!(
            Manifest::decode(json.as_bytes()),
            Err(ManifestError::Name(_))
        ));
    }
}

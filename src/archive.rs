//! Codec for the local image archive: a tar stream holding a
//! `repositories` index, one `<digest>/layer.tar` file per layer, and
//! a manifest-shaped summary.

use std::{
    collections::HashMap,
    fs::{self, File},
    io::{self, Read, Write},
    path::{Component, Path, PathBuf},
};

use crate::{
    digest::{Digest, DigestError},
    manifest::Manifest,
    name::{NameError, Repository, Tag},
};

/// File inside the archive holding the repository/tag binding.
const INDEX_PATH: &str = "repositories";

/// Summary file written next to the layers on pack.
const SUMMARY_PATH: &str = "manifest.json";

/// Name of the blob file inside each layer directory.
const LAYER_FILE: &str = "layer.tar";

#[derive(thiserror::Error, Debug)]
pub enum ArchiveError {
    #[error("I/O error in {1}: {0}")]
    Io(io::Error, PathBuf),

    #[error("Missing repositories index.")]
    MissingIndex,

    #[error("The index must contain exactly one repository and one tag.")]
    MalformedIndex,

    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Name(#[from] NameError),

    #[error("Invalid layer digest in {path}: {source}")]
    LayerDigest { path: PathBuf, source: DigestError },

    #[error("Layer {0} is empty.")]
    EmptyLayer(String),

    #[error("Cannot pack an image with no layers.")]
    NoLayers,
}

macro_rules! try_io {
    ($path:expr, $e:expr $(,)?) => {
        $e.map_err(|e| ArchiveError::Io(io::Error::from(e), $path.into()))?
    };
}

/// Contents of a local image archive, extracted to a scratch
/// directory.
#[derive(Debug)]
pub struct UnpackedImage {
    pub repository: Repository,

    pub tag: Tag,

    /// Layers in archive order, each pointing at its extracted blob
    /// file.
    pub layers: Vec<(Digest, PathBuf)>,
}

/// Read the archive at `archive`, extracting its blobs into `scratch`.
///
/// Only two kinds of entries are extracted: the `repositories` index,
/// and blob files at `<digest>/layer.tar` (the digest is taken from
/// the enclosing directory name). Everything else in the stream is
/// ignored.
pub fn unpack(archive: &Path, scratch: &Path) -> Result<UnpackedImage, ArchiveError> {
    let file = try_io!(archive, File::open(archive));
    let mut tar = tar::Archive::new(io::BufReader::new(file));

    let mut index = None;
    let mut layers = Vec::new();

    for entry in try_io!(archive, tar.entries()) {
        let mut entry = try_io!(archive, entry);
        let path = try_io!(archive, entry.path()).into_owned();

        match entry_kind(&path) {
            EntryKind::Index => {
                let mut data = Vec::new();
                try_io!(&path, entry.read_to_end(&mut data));
                index = Some(parse_index(&data)?);
            }

            EntryKind::Layer(digest_dir) => {
                let digest = Digest::try_from(digest_dir.to_owned()).map_err(|source| {
                    ArchiveError::LayerDigest {
                        path: path.clone(),
                        source,
                    }
                })?;

                let parent = scratch.join(digest_dir);
                try_io!(&parent, fs::create_dir_all(&parent));

                let target = parent.join(LAYER_FILE);
                let mut output = try_io!(&target, File::create(&target));
                try_io!(&target, io::copy(&mut entry, &mut output));

                layers.push((digest, target));
            }

            EntryKind::Other => {}
        }
    }

    let Some((repository, tag)) = index else {
        return Err(ArchiveError::MissingIndex);
    };

    Ok(UnpackedImage {
        repository,
        tag,
        layers,
    })
}

/// Write the archive for an image to `dest`.
///
/// `layers` are written in order; the index binds the tag to the top
/// (last) layer's digest. Every entry must have content: a zero-byte
/// layer means an upstream read failed, not a valid empty layer.
pub fn pack(
    dest: &Path,
    repository: &Repository,
    tag: &Tag,
    layers: &[(Digest, PathBuf)],
) -> Result<(), ArchiveError> {
    let Some((top_digest, _)) = layers.last() else {
        return Err(ArchiveError::NoLayers);
    };

    let file = try_io!(dest, File::create(dest));
    let mut builder = tar::Builder::new(io::BufWriter::new(file));

    for (digest, source) in layers {
        let mut input = try_io!(source, File::open(source));
        let size = try_io!(source, input.metadata()).len();

        if size == 0 {
            return Err(ArchiveError::EmptyLayer(digest.to_string()));
        }

        append_dir(&mut builder, dest, &format!("{digest}/"))?;

        let mut header = file_header(size);
        try_io!(
            dest,
            builder.append_data(&mut header, format!("{digest}/{LAYER_FILE}"), &mut input)
        );
    }

    // Manifest-shaped summary, preserving the layer order.
    let manifest = Manifest::new(repository, tag, layers.iter().map(|(d, _)| d.clone()));
    let summary = serde_json::to_vec(&manifest)?;
    append_file(&mut builder, dest, SUMMARY_PATH, &summary)?;

    // Single-entry index binding the tag to the top layer.
    let mut tags = HashMap::new();
    tags.insert(tag.as_str(), top_digest.source());

    let mut bindings = HashMap::new();
    bindings.insert(repository.as_str(), tags);

    let data = serde_json::to_vec(&bindings)?;
    append_file(&mut builder, dest, INDEX_PATH, &data)?;

    let mut inner = try_io!(dest, builder.into_inner());
    try_io!(dest, inner.flush());

    Ok(())
}

enum EntryKind<'a> {
    Index,
    Layer(&'a str),
    Other,
}

/// Classify a tar entry by its (normalized) path.
fn entry_kind(path: &Path) -> EntryKind<'_> {
    let mut components = path
        .components()
        .filter(|c| !matches!(c, Component::CurDir));

    match (components.next(), components.next(), components.next()) {
        (Some(Component::Normal(name)), None, _) if name.to_str() == Some(INDEX_PATH) => {
            EntryKind::Index
        }

        (Some(Component::Normal(dir)), Some(Component::Normal(name)), None)
            if name.to_str() == Some(LAYER_FILE) =>
        {
            match dir.to_str() {
                Some(dir) => EntryKind::Layer(dir),
                None => EntryKind::Other,
            }
        }

        _ => EntryKind::Other,
    }
}

/// Parse the index as a single-repository, single-tag JSON object.
fn parse_index(data: &[u8]) -> Result<(Repository, Tag), ArchiveError> {
    type Index = HashMap<String, HashMap<String, String>>;

    let index: Index = serde_json::from_slice(data)?;

    let mut repositories = index.into_iter();
    let (Some((name, tags)), None) = (repositories.next(), repositories.next()) else {
        return Err(ArchiveError::MalformedIndex);
    };

    let mut tags = tags.into_iter();
    let (Some((tag, _digest)), None) = (tags.next(), tags.next()) else {
        return Err(ArchiveError::MalformedIndex);
    };

    Ok((Repository::parse(&name)?, Tag::parse(&tag)?))
}

fn file_header(size: u64) -> tar::Header {
    let mut header = tar::Header::new_gnu();
    header.set_mode(0o644);
    header.set_entry_type(tar::EntryType::file());
    header.set_size(size);
    header.set_cksum();
    header
}

fn append_file<W: Write>(
    builder: &mut tar::Builder<W>,
    dest: &Path,
    path: &str,
    data: &[u8],
) -> Result<(), ArchiveError> {
    let mut header = file_header(data.len() as u64);
    try_io!(dest, builder.append_data(&mut header, path, data));
    Ok(())
}

fn append_dir<W: Write>(
    builder: &mut tar::Builder<W>,
    dest: &Path,
    path: &str,
) -> Result<(), ArchiveError> {
    let mut header = tar::Header::new_gnu();
    header.set_mode(0o755);
    header.set_entry_type(tar::EntryType::dir());
    header.set_size(0);
    header.set_cksum();
    try_io!(dest, builder.append_data(&mut header, path, io::empty()));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_entries() {
        assert!(matches!(entry_kind(Path::new("repositories")), EntryKind::Index));
        assert!(matches!(entry_kind(Path::new("./repositories")), EntryKind::Index));

        let layer = "sha256:0000/layer.tar";
        assert!(matches!(entry_kind(Path::new(layer)), EntryKind::Layer("sha256:0000")));

        for other in ["manifest.json", "sha256:0000/extra", "a/b/layer.tar", "layer.tar"] {
            assert!(matches!(entry_kind(Path::new(other)), EntryKind::Other), "{other}");
        }
    }

    #[test]
    fn reject_multi_entry_indexes() {
        let index = br#"{"a": {"t": "d"}, "b": {"t": "d"}}"#;
        assert!(matches!(parse_index(index), Err(ArchiveError::MalformedIndex)));

        let index = br#"{"a": {"t1": "d", "t2": "d"}}"#;
        assert!(matches!(parse_index(index), Err(ArchiveError::MalformedIndex)));

        let index = br#"{}"#;
        assert!(matches!(parse_index(index), Err(ArchiveError::MalformedIndex)));

        let (repository, tag) = parse_index(br#"{"a": {"t": "d"}}"#).unwrap();
        assert_eq!(repository.as_str(), "a");
        assert_eq!(tag.as_str(), "t");
    }
}

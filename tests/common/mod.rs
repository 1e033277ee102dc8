#![allow(dead_code)]

pub mod registry;

use std::path::{Path, PathBuf};

use image_ferry::{Digest, Repository, Tag};

/// Write `layers` as blob files under `dir` and pack them into an
/// image archive at `dir/image.tar`.
///
/// Returns the archive path and the layer digests, in order.
pub fn build_archive(
    dir: &Path,
    repository: &str,
    tag: &str,
    layers: &[&[u8]],
) -> (PathBuf, Vec<Digest>) {
    let mut packed = Vec::with_capacity(layers.len());

    for (n, content) in layers.iter().enumerate() {
        let digest = Digest::compute(content);
        let path = dir.join(format!("blob-{n}"));
        std::fs::write(&path, content).unwrap();
        packed.push((digest, path));
    }

    let archive = dir.join("image.tar");

    image_ferry::pack(
        &archive,
        &Repository::parse(repository).unwrap(),
        &Tag::parse(tag).unwrap(),
        &packed,
    )
    .expect("pack archive");

    let digests = packed.into_iter().map(|(d, _)| d).collect();
    (archive, digests)
}

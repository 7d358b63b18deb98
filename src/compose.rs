//! Composition of two persisted transform series into one. Interior
//! slices get `adjustment ∘ original` flattened to a single affine;
//! the first and last slices are anchors and pass through verbatim.

use std::fs;
use std::path::Path;

use crate::store::{read_transform_file, write_transform_file};
use crate::transform::Transform2D;

/// Combined transform equal to applying `original` first, then
/// `adjustment`. Thin wrapper kept public for callers that compose in
/// memory rather than on disk.
pub fn compose_pair(
    original: &Transform2D,
    adjustment: &Transform2D,
) -> crate::Result<Transform2D> {
    Ok(original.compose(adjustment)?)
}

/// Sorted basenames of the transform files in a directory. Shrink
/// counters saved next to the transforms are not transforms and are
/// skipped.
pub fn directory_contents(dir: &Path) -> crate::Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.ends_with(".shrinks") {
            continue;
        }
        names.push(name);
    }
    names.sort();
    Ok(names)
}

/// Compose every interior slice's original and adjustment transform into
/// `output_dir`, copying the boundary slices unchanged. Returns the
/// number of composed (non-boundary) slices.
pub fn compose_series(
    original_dir: &Path,
    adjustment_dir: &Path,
    output_dir: &Path,
) -> crate::Result<usize> {
    let basenames = directory_contents(original_dir)?;
    anyhow::ensure!(
        !basenames.is_empty(),
        "no transform files in {}",
        original_dir.display()
    );
    fs::create_dir_all(output_dir)?;

    let last = basenames.len() - 1;
    let mut composed = 0usize;
    for (i, name) in basenames.iter().enumerate() {
        let out_path = output_dir.join(name);
        if i == 0 || i == last {
            // anchor slices carry no adjustment
            fs::copy(original_dir.join(name), &out_path)?;
            continue;
        }
        let original = read_transform_file(&original_dir.join(name))?;
        let adjustment = read_transform_file(&adjustment_dir.join(name))?;
        let combined = compose_pair(&original, &adjustment)?;
        write_transform_file(&out_path, &combined)?;
        composed += 1;
    }
    log::info!(
        "composed {} of {} transforms into {}",
        composed,
        basenames.len(),
        output_dir.display()
    );
    Ok(composed)
}

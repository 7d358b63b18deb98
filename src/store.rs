//! Transform persistence: one text file per slice, keyed by the slice's
//! basename, carrying a kind tag and the flat parameter vector.

use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::stack::{Stack, StackError};
use crate::transform::{DisplacementGrid, Transform2D, TransformError};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("missing transform file for slice {index}: {path}")]
    MissingTransformFile { index: usize, path: PathBuf },
    #[error("malformed transform file {path}: {reason}")]
    Malformed { path: PathBuf, reason: String },
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Transform(#[from] TransformError),
    #[error(transparent)]
    Stack(#[from] StackError),
}

const HEADER: &str = "# stackreg transform v1";

/// Render a transform into the on-disk text format.
pub fn serialize_transform(transform: &Transform2D) -> String {
    let mut out = String::new();
    out.push_str(HEADER);
    out.push('\n');
    out.push_str(&format!("Transform: {}\n", transform.kind()));
    if let Transform2D::Deformable(grid) = transform {
        out.push_str(&format!("GridSize: {} {}\n", grid.grid_size[0], grid.grid_size[1]));
        out.push_str(&format!("Region: {} {}\n", grid.region[0], grid.region[1]));
        out.push_str(&format!("Bulk: {}\n", grid.bulk.kind()));
        out.push_str(&format!(
            "BulkParameters: {}\n",
            join_params(&grid.bulk.parameters())
        ));
    }
    out.push_str(&format!("Parameters: {}\n", join_params(&transform.parameters())));
    out
}

/// Parse the on-disk text format back into a transform.
pub fn parse_transform(content: &str, path: &Path) -> Result<Transform2D, StoreError> {
    let malformed = |reason: &str| StoreError::Malformed {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    };

    let mut kind = None;
    let mut params: Option<Vec<f64>> = None;
    let mut grid_size = None;
    let mut region = None;
    let mut bulk_kind = None;
    let mut bulk_params: Option<Vec<f64>> = None;

    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let (key, value) = line
            .split_once(':')
            .ok_or_else(|| malformed("expected 'Key: value' line"))?;
        let value = value.trim();
        match key.trim() {
            "Transform" => kind = Some(value.to_string()),
            "Parameters" => params = Some(parse_params(value, path)?),
            "GridSize" => {
                let v = parse_params(value, path)?;
                if v.len() != 2 {
                    return Err(malformed("GridSize needs two values"));
                }
                grid_size = Some([v[0] as usize, v[1] as usize]);
            }
            "Region" => {
                let v = parse_params(value, path)?;
                if v.len() != 2 {
                    return Err(malformed("Region needs two values"));
                }
                region = Some([v[0], v[1]]);
            }
            "Bulk" => bulk_kind = Some(value.to_string()),
            "BulkParameters" => bulk_params = Some(parse_params(value, path)?),
            other => return Err(malformed(&format!("unknown key '{other}'"))),
        }
    }

    let kind = kind.ok_or_else(|| malformed("no Transform line"))?;
    let params = params.unwrap_or_default();

    let mut transform = match kind.as_str() {
        "DisplacementGridTransform" => {
            let grid_size = grid_size.ok_or_else(|| malformed("deformable needs GridSize"))?;
            let region = region.ok_or_else(|| malformed("deformable needs Region"))?;
            let bulk_kind = bulk_kind.ok_or_else(|| malformed("deformable needs Bulk"))?;
            let mut bulk = transform_from_tag(&bulk_kind)
                .ok_or_else(|| malformed(&format!("unknown bulk tag '{bulk_kind}'")))?;
            bulk.set_parameters(&bulk_params.unwrap_or_default())?;
            Transform2D::Deformable(DisplacementGrid::zeroed(grid_size, region, bulk))
        }
        tag => transform_from_tag(tag).ok_or(StoreError::Transform(TransformError::UnknownTag(
            kind.clone(),
        )))?,
    };
    transform.set_parameters(&params)?;
    Ok(transform)
}

fn transform_from_tag(tag: &str) -> Option<Transform2D> {
    match tag {
        "IdentityTransform" => Some(Transform2D::Identity),
        "TranslationTransform" => Some(Transform2D::translation(0.0, 0.0)),
        "CenteredRigid2DTransform" => Some(Transform2D::rigid_identity([0.0, 0.0])),
        "CenteredSimilarity2DTransform" => Some(Transform2D::Similarity {
            scale: 1.0,
            angle: 0.0,
            center: [0.0, 0.0],
            offset: [0.0, 0.0],
        }),
        "CenteredAffineTransform" => Some(Transform2D::affine_identity([0.0, 0.0])),
        _ => None,
    }
}

fn join_params(params: &[f64]) -> String {
    params
        .iter()
        .map(|p| format!("{p:.17e}"))
        .collect::<Vec<_>>()
        .join(" ")
}

fn parse_params(value: &str, path: &Path) -> Result<Vec<f64>, StoreError> {
    value
        .split_whitespace()
        .map(|tok| {
            tok.parse::<f64>().map_err(|_| StoreError::Malformed {
                path: path.to_path_buf(),
                reason: format!("bad number '{tok}'"),
            })
        })
        .collect()
}

pub fn write_transform_file(path: &Path, transform: &Transform2D) -> Result<(), StoreError> {
    fs::write(path, serialize_transform(transform))?;
    Ok(())
}

pub fn read_transform_file(path: &Path) -> Result<Transform2D, StoreError> {
    let content = fs::read_to_string(path)?;
    parse_transform(&content, path)
}

/// Write every slice's transform into `directory`, named by basename.
pub fn save(stack: &Stack, directory: &Path) -> Result<(), StoreError> {
    fs::create_dir_all(directory)?;
    for index in 0..stack.len() {
        let path = directory.join(stack.basename(index)?);
        write_transform_file(&path, stack.transform(index)?)?;
    }
    log::info!("saved {} transforms to {}", stack.len(), directory.display());
    Ok(())
}

/// Read every slice's transform back, replacing the stack's transform
/// vector wholesale. All-or-nothing: a single absent file fails the load
/// and leaves the stack untouched.
pub fn load(stack: &mut Stack, directory: &Path) -> Result<(), StoreError> {
    let mut transforms = Vec::with_capacity(stack.len());
    for index in 0..stack.len() {
        let path = directory.join(stack.basename(index)?);
        if !path.is_file() {
            return Err(StoreError::MissingTransformFile { index, path });
        }
        transforms.push(read_transform_file(&path)?);
    }
    stack.set_transforms(transforms)?;
    log::info!(
        "loaded {} transforms from {}",
        stack.len(),
        directory.display()
    );
    Ok(())
}

/// Sparse adjustment pass: slices without a file keep their transform;
/// for the rest, the found transform's translation component is folded
/// into the existing transform.
pub fn apply_adjustments(stack: &mut Stack, directory: &Path) -> Result<usize, StoreError> {
    let mut adjusted = 0usize;
    for index in 0..stack.len() {
        let path = directory.join(stack.basename(index)?);
        if !path.is_file() {
            continue;
        }
        let adjustment = read_transform_file(&path)?;
        let translation = adjustment.translation_component().ok_or(StoreError::Transform(
            TransformError::UnsupportedTransformKind {
                kind: "DisplacementGridTransform",
                operation: "translation extraction",
            },
        ))?;
        stack.transform_mut(index)?.apply_translation(translation)?;
        adjusted += 1;
    }
    log::info!(
        "applied {} adjustments from {}",
        adjusted,
        directory.display()
    );
    Ok(adjusted)
}

/// Persist the per-slice shrink counters next to the transforms.
pub fn save_shrink_counts(stack: &Stack, directory: &Path) -> Result<(), StoreError> {
    fs::create_dir_all(directory)?;
    for index in 0..stack.len() {
        let path = directory.join(format!("{}.shrinks", stack.basename(index)?));
        fs::write(path, format!("{}\n", stack.times_too_big()[index]))?;
    }
    Ok(())
}

pub fn load_shrink_counts(directory: &Path, basenames: &[String]) -> Result<Vec<u32>, StoreError> {
    basenames
        .iter()
        .map(|name| {
            let path = directory.join(format!("{}.shrinks", name));
            let content = fs::read_to_string(&path)?;
            content
                .trim()
                .parse::<u32>()
                .map_err(|_| StoreError::Malformed {
                    path,
                    reason: "bad counter value".to_string(),
                })
        })
        .collect()
}

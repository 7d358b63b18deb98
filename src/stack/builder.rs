//! Configuration-driven stack construction. Replaces per-dataset builder
//! subclasses with one options struct and a free function.

use std::path::PathBuf;

use crate::stack::{SliceSet, Stack};

/// Everything needed to construct a stack from a directory of slice
/// images. `size`/`original_spacing` select the construction variant:
/// leave both unset for auto-fit, set `size` for an explicit output
/// frame, and set both to pair a native-resolution series into a foreign
/// output frame.
#[derive(Debug, Clone)]
pub struct StackConfig {
    pub image_dir: PathBuf,
    pub file_names: Vec<String>,
    /// Output spacing (x, y) plus the synthetic z slice spacing.
    pub spacings: [f64; 3],
    pub original_spacing: Option<[f64; 2]>,
    pub size: Option<[usize; 2]>,
    pub normalize: bool,
}

pub fn build_stack(config: &StackConfig) -> crate::Result<Stack> {
    let slices = SliceSet::load(&config.image_dir, &config.file_names, config.normalize)?;
    let loaded = slices.iter().filter(|s| s.present()).count();
    log::info!(
        "loaded {}/{} slices from {}",
        loaded,
        slices.len(),
        config.image_dir.display()
    );
    let stack = match (config.original_spacing, config.size) {
        (Some(original), Some(size)) => {
            Stack::with_original_spacings(slices, original, config.spacings, size)
        }
        (None, Some(size)) => Stack::with_size(slices, config.spacings, size),
        (None, None) => Stack::auto_fit(slices, config.spacings),
        (Some(_), None) => {
            anyhow::bail!("original_spacing requires an explicit stack size")
        }
    };
    Ok(stack)
}

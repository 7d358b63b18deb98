//! MetaImage (.mhd + .raw) output for reconstructed volumes and masks,
//! with explicit per-axis spacing so downstream viewers see the
//! synthetic slice spacing along z.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use ndarray::Array3;

/// Write a double-precision volume as `<base>.mhd` + `<base>.raw`.
pub fn write_volume(base: &Path, volume: &Array3<f64>, spacings: [f64; 3]) -> crate::Result<()> {
    let (depth, height, width) = volume.dim();
    let raw_path = raw_path(base);
    write_header(base, "MET_DOUBLE", [width, height, depth], spacings, &raw_path)?;

    let mut bytes = Vec::with_capacity(volume.len() * 8);
    for z in 0..depth {
        for y in 0..height {
            for x in 0..width {
                bytes.extend_from_slice(&volume[[z, y, x]].to_le_bytes());
            }
        }
    }
    fs::File::create(&raw_path)?.write_all(&bytes)?;
    log::info!("wrote volume {} ({}x{}x{})", base.display(), width, height, depth);
    Ok(())
}

/// Write a mask volume as `<base>.mhd` + `<base>.raw` with uchar pixels.
pub fn write_mask_volume(base: &Path, mask: &Array3<u8>, spacings: [f64; 3]) -> crate::Result<()> {
    let (depth, height, width) = mask.dim();
    let raw_path = raw_path(base);
    write_header(base, "MET_UCHAR", [width, height, depth], spacings, &raw_path)?;

    let mut bytes = Vec::with_capacity(mask.len());
    for z in 0..depth {
        for y in 0..height {
            for x in 0..width {
                bytes.push(mask[[z, y, x]]);
            }
        }
    }
    fs::File::create(&raw_path)?.write_all(&bytes)?;
    Ok(())
}

/// Read back a MET_DOUBLE volume written by `write_volume`.
pub fn read_volume(base: &Path) -> crate::Result<(Array3<f64>, [f64; 3])> {
    let header = fs::read_to_string(mhd_path(base))?;
    let mut dims = None;
    let mut spacings = None;
    let mut element_type = None;
    let mut data_file = None;
    for line in header.lines() {
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let value = value.trim();
        match key.trim() {
            "DimSize" => {
                let v: Vec<usize> = value
                    .split_whitespace()
                    .map(|t| t.parse())
                    .collect::<Result<_, _>>()?;
                anyhow::ensure!(v.len() == 3, "DimSize must have three entries");
                dims = Some([v[0], v[1], v[2]]);
            }
            "ElementSpacing" => {
                let v: Vec<f64> = value
                    .split_whitespace()
                    .map(|t| t.parse())
                    .collect::<Result<_, _>>()?;
                anyhow::ensure!(v.len() == 3, "ElementSpacing must have three entries");
                spacings = Some([v[0], v[1], v[2]]);
            }
            "ElementType" => element_type = Some(value.to_string()),
            "ElementDataFile" => data_file = Some(value.to_string()),
            _ => {}
        }
    }
    let dims = dims.ok_or_else(|| anyhow::anyhow!("header missing DimSize"))?;
    let spacings = spacings.ok_or_else(|| anyhow::anyhow!("header missing ElementSpacing"))?;
    anyhow::ensure!(
        element_type.as_deref() == Some("MET_DOUBLE"),
        "unsupported element type {:?}",
        element_type
    );
    let data_file = data_file.ok_or_else(|| anyhow::anyhow!("header missing ElementDataFile"))?;

    let dir = base.parent().unwrap_or_else(|| Path::new("."));
    let bytes = fs::read(dir.join(data_file))?;
    let [width, height, depth] = dims;
    anyhow::ensure!(
        bytes.len() == width * height * depth * 8,
        "raw data size does not match header dimensions"
    );
    let mut volume = Array3::zeros((depth, height, width));
    let mut offset = 0;
    for z in 0..depth {
        for y in 0..height {
            for x in 0..width {
                let chunk: [u8; 8] = bytes[offset..offset + 8].try_into().expect("sized above");
                volume[[z, y, x]] = f64::from_le_bytes(chunk);
                offset += 8;
            }
        }
    }
    Ok((volume, spacings))
}

fn write_header(
    base: &Path,
    element_type: &str,
    dims: [usize; 3],
    spacings: [f64; 3],
    raw_path: &Path,
) -> crate::Result<()> {
    let raw_name = raw_path
        .file_name()
        .ok_or_else(|| anyhow::anyhow!("invalid output path {}", base.display()))?
        .to_string_lossy();
    let header = format!(
        "ObjectType = Image\n\
         NDims = 3\n\
         BinaryData = True\n\
         BinaryDataByteOrderMSB = False\n\
         DimSize = {} {} {}\n\
         ElementSpacing = {} {} {}\n\
         ElementType = {}\n\
         ElementDataFile = {}\n",
        dims[0], dims[1], dims[2], spacings[0], spacings[1], spacings[2], element_type, raw_name
    );
    fs::write(mhd_path(base), header)?;
    Ok(())
}

fn mhd_path(base: &Path) -> PathBuf {
    base.with_extension("mhd")
}

fn raw_path(base: &Path) -> PathBuf {
    base.with_extension("raw")
}

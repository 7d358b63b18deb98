use std::path::Path;

use ndarray::Array2;

/// One 2D cross-section image. A missing source file is represented by a
/// zero-extent image so downstream code can skip it without special
/// casing at load time.
#[derive(Debug, Clone)]
pub struct Slice {
    pub name: String,
    pub image: Array2<f64>,
}

impl Slice {
    pub fn missing(name: &str) -> Self {
        Self {
            name: name.to_string(),
            image: Array2::zeros((0, 0)),
        }
    }

    pub fn present(&self) -> bool {
        self.image.nrows() > 0 && self.image.ncols() > 0
    }

    /// (width, height) in pixels.
    pub fn size(&self) -> [usize; 2] {
        [self.image.ncols(), self.image.nrows()]
    }

    /// File name without its extension, used to key transform files.
    pub fn basename(&self) -> &str {
        match self.name.rfind('.') {
            Some(i) => &self.name[..i],
            None => &self.name,
        }
    }
}

/// Ordered collection of slices; insertion order is the physical order
/// along the reconstructed volume's z axis and is never re-sorted.
#[derive(Debug, Clone)]
pub struct SliceSet {
    slices: Vec<Slice>,
}

impl SliceSet {
    /// Load each named file from `dir`. An absent file yields a
    /// zero-extent placeholder rather than an error.
    pub fn load(dir: &Path, file_names: &[String], normalize: bool) -> crate::Result<SliceSet> {
        let mut slices = Vec::with_capacity(file_names.len());
        for name in file_names {
            let path = dir.join(name);
            if !path.is_file() {
                log::warn!("slice {} not found, keeping placeholder", path.display());
                slices.push(Slice::missing(name));
                continue;
            }
            let gray = image::open(&path)?.to_luma8();
            let (w, h) = (gray.width() as usize, gray.height() as usize);
            let mut img = Array2::zeros((h, w));
            for y in 0..h {
                for x in 0..w {
                    img[[y, x]] = gray.get_pixel(x as u32, y as u32)[0] as f64;
                }
            }
            if normalize {
                normalize_in_place(&mut img);
            }
            slices.push(Slice {
                name: name.clone(),
                image: img,
            });
        }
        Ok(SliceSet { slices })
    }

    /// Assemble a set directly from in-memory images.
    pub fn from_images(images: Vec<(String, Array2<f64>)>) -> SliceSet {
        SliceSet {
            slices: images
                .into_iter()
                .map(|(name, image)| Slice { name, image })
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.slices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slices.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Slice> {
        self.slices.iter()
    }

    pub fn into_slices(self) -> Vec<Slice> {
        self.slices
    }
}

/// Shift to zero mean and scale to unit variance, leaving flat images
/// untouched.
fn normalize_in_place(img: &mut Array2<f64>) {
    let n = img.len() as f64;
    let mean = img.sum() / n;
    let var = img.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / n;
    let sd = var.sqrt();
    if sd > 0.0 {
        img.mapv_inplace(|v| (v - mean) / sd);
    } else {
        img.mapv_inplace(|v| v - mean);
    }
}

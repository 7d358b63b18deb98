use ndarray::Array2;

use crate::transform::Transform2D;

/// Resample `input` into an output grid of `out_size` pixels (width,
/// height) at `out_spacing`, pulling intensities through `transform`
/// with bilinear interpolation. Points mapping outside the input get 0.
pub fn resample_linear(
    input: &Array2<f64>,
    input_spacing: [f64; 2],
    transform: &Transform2D,
    out_size: [usize; 2],
    out_spacing: [f64; 2],
) -> Array2<f64> {
    let mut out = Array2::zeros((out_size[1], out_size[0]));
    if input.is_empty() {
        return out;
    }
    for y in 0..out_size[1] {
        for x in 0..out_size[0] {
            let phys = [x as f64 * out_spacing[0], y as f64 * out_spacing[1]];
            let p = transform.transform_point(phys);
            let cx = p[0] / input_spacing[0];
            let cy = p[1] / input_spacing[1];
            out[[y, x]] = bilinear(input, cx, cy);
        }
    }
    out
}

/// Nearest-neighbor variant for binary masks.
pub fn resample_nearest(
    input: &Array2<u8>,
    input_spacing: [f64; 2],
    transform: &Transform2D,
    out_size: [usize; 2],
    out_spacing: [f64; 2],
) -> Array2<u8> {
    let mut out = Array2::zeros((out_size[1], out_size[0]));
    if input.is_empty() {
        return out;
    }
    let (h, w) = input.dim();
    for y in 0..out_size[1] {
        for x in 0..out_size[0] {
            let phys = [x as f64 * out_spacing[0], y as f64 * out_spacing[1]];
            let p = transform.transform_point(phys);
            let ix = (p[0] / input_spacing[0]).round();
            let iy = (p[1] / input_spacing[1]).round();
            if ix >= 0.0 && iy >= 0.0 && (ix as usize) < w && (iy as usize) < h {
                out[[y, x]] = input[[iy as usize, ix as usize]];
            }
        }
    }
    out
}

/// Bilinear sample at a continuous index, zero outside the image.
pub fn bilinear(input: &Array2<f64>, x: f64, y: f64) -> f64 {
    let (h, w) = input.dim();
    if x < 0.0 || y < 0.0 || x > (w - 1) as f64 || y > (h - 1) as f64 {
        return 0.0;
    }
    let x0 = x.floor() as usize;
    let y0 = y.floor() as usize;
    let x1 = (x0 + 1).min(w - 1);
    let y1 = (y0 + 1).min(h - 1);
    let fx = x - x0 as f64;
    let fy = y - y0 as f64;

    input[[y0, x0]] * (1.0 - fx) * (1.0 - fy)
        + input[[y0, x1]] * fx * (1.0 - fy)
        + input[[y1, x0]] * (1.0 - fx) * fy
        + input[[y1, x1]] * fx * fy
}

/// True when the continuous index falls inside the image bounds.
pub fn inside(input_dim: (usize, usize), x: f64, y: f64) -> bool {
    let (h, w) = input_dim;
    x >= 0.0 && y >= 0.0 && x <= (w - 1) as f64 && y <= (h - 1) as f64
}

/// Block-average downsampling used by the resolution pyramid.
pub fn downsample_average(input: &Array2<f64>, factor: usize) -> Array2<f64> {
    if factor <= 1 || input.is_empty() {
        return input.clone();
    }
    let (h, w) = input.dim();
    let oh = (h + factor - 1) / factor;
    let ow = (w + factor - 1) / factor;
    let mut out = Array2::zeros((oh, ow));
    for oy in 0..oh {
        for ox in 0..ow {
            let mut sum = 0.0;
            let mut n = 0usize;
            for y in (oy * factor)..((oy * factor + factor).min(h)) {
                for x in (ox * factor)..((ox * factor + factor).min(w)) {
                    sum += input[[y, x]];
                    n += 1;
                }
            }
            out[[oy, ox]] = sum / n as f64;
        }
    }
    out
}

/// Mask pyramid companion: a block is kept if any source pixel is set.
pub fn downsample_mask(input: &Array2<u8>, factor: usize) -> Array2<u8> {
    if factor <= 1 || input.is_empty() {
        return input.clone();
    }
    let (h, w) = input.dim();
    let oh = (h + factor - 1) / factor;
    let ow = (w + factor - 1) / factor;
    let mut out = Array2::zeros((oh, ow));
    for oy in 0..oh {
        for ox in 0..ow {
            'block: for y in (oy * factor)..((oy * factor + factor).min(h)) {
                for x in (ox * factor)..((ox * factor + factor).min(w)) {
                    if input[[y, x]] != 0 {
                        out[[oy, ox]] = 255;
                        break 'block;
                    }
                }
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn identity_resample_preserves_grid() {
        let img = array![[1.0, 2.0], [3.0, 4.0]];
        let out = resample_linear(&img, [1.0, 1.0], &Transform2D::Identity, [2, 2], [1.0, 1.0]);
        assert_eq!(out, img);
    }

    #[test]
    fn translation_shifts_content() {
        let img = array![[0.0, 0.0, 0.0], [0.0, 9.0, 0.0], [0.0, 0.0, 0.0]];
        // transform points from output into input: +1 in x pulls the
        // content one pixel to the left
        let t = Transform2D::translation(1.0, 0.0);
        let out = resample_linear(&img, [1.0, 1.0], &t, [3, 3], [1.0, 1.0]);
        assert_eq!(out[[1, 0]], 9.0);
        assert_eq!(out[[1, 1]], 0.0);
    }

    #[test]
    fn outside_points_are_zero() {
        let img = array![[5.0]];
        let t = Transform2D::translation(10.0, 10.0);
        let out = resample_linear(&img, [1.0, 1.0], &t, [1, 1], [1.0, 1.0]);
        assert_eq!(out[[0, 0]], 0.0);
    }

    #[test]
    fn downsample_average_halves_dims() {
        let img = Array2::from_elem((4, 6), 2.0);
        let out = downsample_average(&img, 2);
        assert_eq!(out.dim(), (2, 3));
        assert!(out.iter().all(|&v| (v - 2.0).abs() < 1e-12));
    }

    #[test]
    fn downsample_mask_keeps_any_set_pixel() {
        let mut mask = Array2::zeros((4, 4));
        mask[[3, 3]] = 255u8;
        let out = downsample_mask(&mask, 2);
        assert_eq!(out.dim(), (2, 2));
        assert_eq!(out[[1, 1]], 255);
        assert_eq!(out[[0, 0]], 0);
    }
}

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransformError {
    #[error("transform kind {kind} does not support {operation}")]
    UnsupportedTransformKind {
        kind: &'static str,
        operation: &'static str,
    },
    #[error("{kind} expects {expected} parameters, got {got}")]
    ParameterCount {
        kind: &'static str,
        expected: usize,
        got: usize,
    },
    #[error("unknown transform tag '{0}'")]
    UnknownTag(String),
}

/// Bilinear displacement grid with an affine-representable bulk transform
/// applied first. Stands in for a full B-spline deformation field.
#[derive(Debug, Clone, PartialEq)]
pub struct DisplacementGrid {
    /// Control points along (x, y).
    pub grid_size: [usize; 2],
    /// Physical extent covered by the grid.
    pub region: [f64; 2],
    /// Per-control-point displacement, row-major, [dx, dy] each.
    pub displacements: Vec<[f64; 2]>,
    pub bulk: Box<Transform2D>,
}

impl DisplacementGrid {
    pub fn zeroed(grid_size: [usize; 2], region: [f64; 2], bulk: Transform2D) -> Self {
        Self {
            grid_size,
            region,
            displacements: vec![[0.0, 0.0]; grid_size[0] * grid_size[1]],
            bulk: Box::new(bulk),
        }
    }

    /// Bilinearly interpolated displacement at a physical point.
    fn displacement_at(&self, p: [f64; 2]) -> [f64; 2] {
        let [gw, gh] = self.grid_size;
        if gw < 2 || gh < 2 {
            return [0.0, 0.0];
        }
        // continuous grid coordinates, clamped to the covered region
        let gx = (p[0] / self.region[0] * (gw - 1) as f64).clamp(0.0, (gw - 1) as f64);
        let gy = (p[1] / self.region[1] * (gh - 1) as f64).clamp(0.0, (gh - 1) as f64);
        let x0 = gx.floor() as usize;
        let y0 = gy.floor() as usize;
        let x1 = (x0 + 1).min(gw - 1);
        let y1 = (y0 + 1).min(gh - 1);
        let fx = gx - x0 as f64;
        let fy = gy - y0 as f64;

        let at = |x: usize, y: usize| self.displacements[y * gw + x];
        let (d00, d10, d01, d11) = (at(x0, y0), at(x1, y0), at(x0, y1), at(x1, y1));
        let mut out = [0.0; 2];
        for i in 0..2 {
            out[i] = d00[i] * (1.0 - fx) * (1.0 - fy)
                + d10[i] * fx * (1.0 - fy)
                + d01[i] * (1.0 - fx) * fy
                + d11[i] * fx * fy;
        }
        out
    }
}

/// Closed set of 2D transform kinds. Matrix-offset kinds map a physical
/// point as `p' = M(p - c) + c + t`; composition flattens to Affine.
#[derive(Debug, Clone, PartialEq)]
pub enum Transform2D {
    Identity,
    Translation {
        offset: [f64; 2],
    },
    Rigid {
        angle: f64,
        center: [f64; 2],
        offset: [f64; 2],
    },
    Similarity {
        scale: f64,
        angle: f64,
        center: [f64; 2],
        offset: [f64; 2],
    },
    Affine {
        matrix: [[f64; 2]; 2],
        center: [f64; 2],
        offset: [f64; 2],
    },
    Deformable(DisplacementGrid),
}

impl Default for Transform2D {
    fn default() -> Self {
        Transform2D::Identity
    }
}

impl Transform2D {
    pub fn translation(tx: f64, ty: f64) -> Self {
        Transform2D::Translation { offset: [tx, ty] }
    }

    pub fn rigid_identity(center: [f64; 2]) -> Self {
        Transform2D::Rigid {
            angle: 0.0,
            center,
            offset: [0.0, 0.0],
        }
    }

    pub fn affine_identity(center: [f64; 2]) -> Self {
        Transform2D::Affine {
            matrix: [[1.0, 0.0], [0.0, 1.0]],
            center,
            offset: [0.0, 0.0],
        }
    }

    /// Serialization tag, also used in log messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Transform2D::Identity => "IdentityTransform",
            Transform2D::Translation { .. } => "TranslationTransform",
            Transform2D::Rigid { .. } => "CenteredRigid2DTransform",
            Transform2D::Similarity { .. } => "CenteredSimilarity2DTransform",
            Transform2D::Affine { .. } => "CenteredAffineTransform",
            Transform2D::Deformable(_) => "DisplacementGridTransform",
        }
    }

    /// Flat parameter vector, in optimizer order.
    pub fn parameters(&self) -> Vec<f64> {
        match self {
            Transform2D::Identity => vec![],
            Transform2D::Translation { offset } => vec![offset[0], offset[1]],
            Transform2D::Rigid {
                angle,
                center,
                offset,
            } => vec![*angle, center[0], center[1], offset[0], offset[1]],
            Transform2D::Similarity {
                scale,
                angle,
                center,
                offset,
            } => vec![*scale, *angle, center[0], center[1], offset[0], offset[1]],
            Transform2D::Affine {
                matrix,
                center,
                offset,
            } => vec![
                matrix[0][0],
                matrix[0][1],
                matrix[1][0],
                matrix[1][1],
                center[0],
                center[1],
                offset[0],
                offset[1],
            ],
            Transform2D::Deformable(grid) => {
                grid.displacements.iter().flat_map(|d| [d[0], d[1]]).collect()
            }
        }
    }

    pub fn parameter_count(&self) -> usize {
        match self {
            Transform2D::Identity => 0,
            Transform2D::Translation { .. } => 2,
            Transform2D::Rigid { .. } => 5,
            Transform2D::Similarity { .. } => 6,
            Transform2D::Affine { .. } => 8,
            Transform2D::Deformable(grid) => 2 * grid.displacements.len(),
        }
    }

    pub fn set_parameters(&mut self, params: &[f64]) -> Result<(), TransformError> {
        let expected = self.parameter_count();
        if params.len() != expected {
            return Err(TransformError::ParameterCount {
                kind: self.kind(),
                expected,
                got: params.len(),
            });
        }
        match self {
            Transform2D::Identity => {}
            Transform2D::Translation { offset } => {
                offset[0] = params[0];
                offset[1] = params[1];
            }
            Transform2D::Rigid {
                angle,
                center,
                offset,
            } => {
                *angle = params[0];
                *center = [params[1], params[2]];
                *offset = [params[3], params[4]];
            }
            Transform2D::Similarity {
                scale,
                angle,
                center,
                offset,
            } => {
                *scale = params[0];
                *angle = params[1];
                *center = [params[2], params[3]];
                *offset = [params[4], params[5]];
            }
            Transform2D::Affine {
                matrix,
                center,
                offset,
            } => {
                *matrix = [[params[0], params[1]], [params[2], params[3]]];
                *center = [params[4], params[5]];
                *offset = [params[6], params[7]];
            }
            Transform2D::Deformable(grid) => {
                for (i, d) in grid.displacements.iter_mut().enumerate() {
                    d[0] = params[2 * i];
                    d[1] = params[2 * i + 1];
                }
            }
        }
        Ok(())
    }

    /// Map an output-space physical point into input space (resampling
    /// convention: the transform points from the fixed frame into the
    /// moving image).
    pub fn transform_point(&self, p: [f64; 2]) -> [f64; 2] {
        match self {
            Transform2D::Identity => p,
            Transform2D::Translation { offset } => [p[0] + offset[0], p[1] + offset[1]],
            Transform2D::Rigid { .. }
            | Transform2D::Similarity { .. }
            | Transform2D::Affine { .. } => {
                let (m, b) = self.matrix_offset();
                apply_matrix_offset(m, b, p)
            }
            Transform2D::Deformable(grid) => {
                let base = grid.bulk.transform_point(p);
                let d = grid.displacement_at(p);
                [base[0] + d[0], base[1] + d[1]]
            }
        }
    }

    /// Matrix and effective offset `b` such that the mapping is
    /// `p' = M p + b`. Only valid for matrix-offset and simpler kinds.
    fn matrix_offset(&self) -> ([[f64; 2]; 2], [f64; 2]) {
        let identity = [[1.0, 0.0], [0.0, 1.0]];
        match self {
            Transform2D::Identity => (identity, [0.0, 0.0]),
            Transform2D::Translation { offset } => (identity, *offset),
            Transform2D::Rigid {
                angle,
                center,
                offset,
            } => {
                let m = rotation_matrix(*angle, 1.0);
                (m, effective_offset(m, *center, *offset))
            }
            Transform2D::Similarity {
                scale,
                angle,
                center,
                offset,
            } => {
                let m = rotation_matrix(*angle, *scale);
                (m, effective_offset(m, *center, *offset))
            }
            Transform2D::Affine {
                matrix,
                center,
                offset,
            } => (*matrix, effective_offset(*matrix, *center, *offset)),
            Transform2D::Deformable(_) => unreachable!("checked by callers"),
        }
    }

    /// Flatten into `(M, b)` with `p' = M p + b`, or fail for kinds that
    /// are not affine-representable.
    pub fn as_matrix_offset(&self) -> Result<([[f64; 2]; 2], [f64; 2]), TransformError> {
        match self {
            Transform2D::Deformable(_) => Err(TransformError::UnsupportedTransformKind {
                kind: self.kind(),
                operation: "affine flattening",
            }),
            _ => Ok(self.matrix_offset()),
        }
    }

    /// Combined transform equal to applying `self` first, then
    /// `adjustment`, flattened to a single Affine.
    pub fn compose(&self, adjustment: &Transform2D) -> Result<Transform2D, TransformError> {
        let (m1, b1) = self.as_matrix_offset()?;
        let (m2, b2) = adjustment.as_matrix_offset()?;
        let m = mat_mul(m2, m1);
        let b = [
            m2[0][0] * b1[0] + m2[0][1] * b1[1] + b2[0],
            m2[1][0] * b1[0] + m2[1][1] * b1[1] + b2[1],
        ];
        Ok(Transform2D::Affine {
            matrix: m,
            center: [0.0, 0.0],
            offset: b,
        })
    }

    /// Add a translation to the transform's offset. Matrix-offset and
    /// translation kinds only.
    pub fn apply_translation(&mut self, v: [f64; 2]) -> Result<(), TransformError> {
        match self {
            Transform2D::Translation { offset }
            | Transform2D::Rigid { offset, .. }
            | Transform2D::Similarity { offset, .. }
            | Transform2D::Affine { offset, .. } => {
                offset[0] += v[0];
                offset[1] += v[1];
                Ok(())
            }
            Transform2D::Identity | Transform2D::Deformable(_) => {
                Err(TransformError::UnsupportedTransformKind {
                    kind: self.kind(),
                    operation: "translation",
                })
            }
        }
    }

    /// Move the center of rotation without changing the overall mapping.
    pub fn move_center(&mut self, new_center: [f64; 2]) -> Result<(), TransformError> {
        match self {
            Transform2D::Rigid { .. }
            | Transform2D::Similarity { .. }
            | Transform2D::Affine { .. } => {
                let (m, b) = self.matrix_offset();
                // keep p' = M p + b fixed: t' = b + M c' - c'
                let t = [
                    b[0] + m[0][0] * new_center[0] + m[0][1] * new_center[1] - new_center[0],
                    b[1] + m[1][0] * new_center[0] + m[1][1] * new_center[1] - new_center[1],
                ];
                match self {
                    Transform2D::Rigid { center, offset, .. }
                    | Transform2D::Similarity { center, offset, .. }
                    | Transform2D::Affine { center, offset, .. } => {
                        *center = new_center;
                        *offset = t;
                    }
                    _ => unreachable!(),
                }
                Ok(())
            }
            _ => Err(TransformError::UnsupportedTransformKind {
                kind: self.kind(),
                operation: "center move",
            }),
        }
    }

    /// The transform's translation component, for kinds that carry one.
    pub fn translation_component(&self) -> Option<[f64; 2]> {
        match self {
            Transform2D::Identity => Some([0.0, 0.0]),
            Transform2D::Translation { offset }
            | Transform2D::Rigid { offset, .. }
            | Transform2D::Similarity { offset, .. }
            | Transform2D::Affine { offset, .. } => Some(*offset),
            Transform2D::Deformable(_) => None,
        }
    }

    /// Promote the current transform to a centered affine with the same
    /// mapping, seeding the next registration stage.
    pub fn promote_to_affine(&self) -> Result<Transform2D, TransformError> {
        let (m, b) = self.as_matrix_offset()?;
        let center = match self {
            Transform2D::Rigid { center, .. }
            | Transform2D::Similarity { center, .. }
            | Transform2D::Affine { center, .. } => *center,
            _ => [0.0, 0.0],
        };
        // recover the centered offset for the chosen center
        let t = [
            b[0] + m[0][0] * center[0] + m[0][1] * center[1] - center[0],
            b[1] + m[1][0] * center[0] + m[1][1] * center[1] - center[1],
        ];
        Ok(Transform2D::Affine {
            matrix: m,
            center,
            offset: t,
        })
    }
}

fn rotation_matrix(angle: f64, scale: f64) -> [[f64; 2]; 2] {
    let (s, c) = angle.sin_cos();
    [[scale * c, -scale * s], [scale * s, scale * c]]
}

/// `b = M(p - c) + c + t` rewritten as `M p + b`.
fn effective_offset(m: [[f64; 2]; 2], c: [f64; 2], t: [f64; 2]) -> [f64; 2] {
    [
        c[0] + t[0] - m[0][0] * c[0] - m[0][1] * c[1],
        c[1] + t[1] - m[1][0] * c[0] - m[1][1] * c[1],
    ]
}

fn apply_matrix_offset(m: [[f64; 2]; 2], b: [f64; 2], p: [f64; 2]) -> [f64; 2] {
    [
        m[0][0] * p[0] + m[0][1] * p[1] + b[0],
        m[1][0] * p[0] + m[1][1] * p[1] + b[1],
    ]
}

fn mat_mul(a: [[f64; 2]; 2], b: [[f64; 2]; 2]) -> [[f64; 2]; 2] {
    let mut out = [[0.0; 2]; 2];
    for i in 0..2 {
        for j in 0..2 {
            out[i][j] = a[i][0] * b[0][j] + a[i][1] * b[1][j];
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_points_close(a: [f64; 2], b: [f64; 2]) {
        assert!((a[0] - b[0]).abs() < 1e-9, "{:?} vs {:?}", a, b);
        assert!((a[1] - b[1]).abs() < 1e-9, "{:?} vs {:?}", a, b);
    }

    #[test]
    fn translation_maps_points() {
        let t = Transform2D::translation(3.0, -2.0);
        assert_points_close(t.transform_point([1.0, 1.0]), [4.0, -1.0]);
    }

    #[test]
    fn rigid_rotates_about_center() {
        let t = Transform2D::Rigid {
            angle: std::f64::consts::FRAC_PI_2,
            center: [10.0, 10.0],
            offset: [0.0, 0.0],
        };
        // the center is a fixed point
        assert_points_close(t.transform_point([10.0, 10.0]), [10.0, 10.0]);
        assert_points_close(t.transform_point([11.0, 10.0]), [10.0, 11.0]);
    }

    #[test]
    fn parameters_round_trip() {
        let mut t = Transform2D::Affine {
            matrix: [[1.1, 0.2], [-0.1, 0.9]],
            center: [5.0, 6.0],
            offset: [1.0, 2.0],
        };
        let params = t.parameters();
        let mut u = Transform2D::affine_identity([0.0, 0.0]);
        u.set_parameters(&params).unwrap();
        assert_eq!(t, u);

        assert!(t.set_parameters(&[1.0, 2.0]).is_err());
    }

    #[test]
    fn compose_with_identity_preserves_mapping() {
        let t = Transform2D::Rigid {
            angle: 0.3,
            center: [4.0, 4.0],
            offset: [1.5, -0.5],
        };
        let composed = t.compose(&Transform2D::Identity).unwrap();
        for p in [[0.0, 0.0], [7.0, 3.0], [-2.0, 5.5]] {
            assert_points_close(composed.transform_point(p), t.transform_point(p));
        }
    }

    #[test]
    fn compose_applies_in_order() {
        let first = Transform2D::translation(1.0, 0.0);
        let second = Transform2D::Rigid {
            angle: std::f64::consts::FRAC_PI_2,
            center: [0.0, 0.0],
            offset: [0.0, 0.0],
        };
        let composed = first.compose(&second).unwrap();
        // (0,0) -> translate -> (1,0) -> rotate 90 -> (0,1)
        assert_points_close(composed.transform_point([0.0, 0.0]), [0.0, 1.0]);
    }

    #[test]
    fn compose_rejects_deformable() {
        let grid = DisplacementGrid::zeroed([2, 2], [10.0, 10.0], Transform2D::Identity);
        let t = Transform2D::Deformable(grid);
        let err = t.compose(&Transform2D::Identity).unwrap_err();
        assert!(matches!(err, TransformError::UnsupportedTransformKind { .. }));
    }

    #[test]
    fn move_center_keeps_mapping() {
        let mut t = Transform2D::Rigid {
            angle: 0.7,
            center: [3.0, 1.0],
            offset: [2.0, -1.0],
        };
        let before: Vec<[f64; 2]> = [[0.0, 0.0], [5.0, 5.0], [-1.0, 2.0]]
            .iter()
            .map(|&p| t.transform_point(p))
            .collect();
        t.move_center([20.0, 20.0]).unwrap();
        for (p, expected) in [[0.0, 0.0], [5.0, 5.0], [-1.0, 2.0]].iter().zip(before) {
            assert_points_close(t.transform_point(*p), expected);
        }
    }

    #[test]
    fn apply_translation_rejects_identity() {
        let mut t = Transform2D::Identity;
        assert!(t.apply_translation([1.0, 1.0]).is_err());
    }

    #[test]
    fn deformable_adds_interpolated_displacement() {
        let mut grid = DisplacementGrid::zeroed([2, 2], [10.0, 10.0], Transform2D::Identity);
        for d in grid.displacements.iter_mut() {
            *d = [2.0, 0.0];
        }
        let t = Transform2D::Deformable(grid);
        assert_points_close(t.transform_point([5.0, 5.0]), [7.0, 5.0]);
    }
}

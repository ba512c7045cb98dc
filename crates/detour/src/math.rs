// Geometry helpers shared by the mesh and query code
// All 2D routines work on the xz plane; y is up.

pub type Vec3 = [f32; 3];

const EQUAL_THRESHOLD: f32 = 1.0 / 16384.0;

pub fn vadd(a: &Vec3, b: &Vec3) -> Vec3 {
    [a[0] + b[0], a[1] + b[1], a[2] + b[2]]
}

pub fn vsub(a: &Vec3, b: &Vec3) -> Vec3 {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

pub fn vscale(v: &Vec3, s: f32) -> Vec3 {
    [v[0] * s, v[1] * s, v[2] * s]
}

/// a + b * s
pub fn vmad(a: &Vec3, b: &Vec3, s: f32) -> Vec3 {
    [a[0] + b[0] * s, a[1] + b[1] * s, a[2] + b[2] * s]
}

pub fn vlerp(a: &Vec3, b: &Vec3, t: f32) -> Vec3 {
    [
        a[0] + (b[0] - a[0]) * t,
        a[1] + (b[1] - a[1]) * t,
        a[2] + (b[2] - a[2]) * t,
    ]
}

pub fn vmin(a: &Vec3, b: &Vec3) -> Vec3 {
    [a[0].min(b[0]), a[1].min(b[1]), a[2].min(b[2])]
}

pub fn vmax(a: &Vec3, b: &Vec3) -> Vec3 {
    [a[0].max(b[0]), a[1].max(b[1]), a[2].max(b[2])]
}

pub fn vlen_sqr(v: &Vec3) -> f32 {
    v[0] * v[0] + v[1] * v[1] + v[2] * v[2]
}

pub fn vdist_sqr(a: &Vec3, b: &Vec3) -> f32 {
    vlen_sqr(&vsub(b, a))
}

pub fn vdist(a: &Vec3, b: &Vec3) -> f32 {
    vdist_sqr(a, b).sqrt()
}

/// Squared distance on the xz plane
pub fn vdist_sqr_2d(a: &Vec3, b: &Vec3) -> f32 {
    let dx = b[0] - a[0];
    let dz = b[2] - a[2];
    dx * dx + dz * dz
}

/// Vertices closer than 1/16384 are treated as the same point
pub fn vequal(a: &Vec3, b: &Vec3) -> bool {
    vdist_sqr(a, b) < EQUAL_THRESHOLD * EQUAL_THRESHOLD
}

pub fn vnormalize(v: &Vec3) -> Vec3 {
    let len = vlen_sqr(v).sqrt();
    if len <= f32::EPSILON {
        return [0.0; 3];
    }
    vscale(v, 1.0 / len)
}

/// 2D perp-dot product on xz
pub fn vperp_2d(u: &Vec3, v: &Vec3) -> f32 {
    u[2] * v[0] - u[0] * v[2]
}

/// Twice the signed xz area of triangle abc; positive for the mesh's clockwise winding
pub fn tri_area_2d(a: &Vec3, b: &Vec3, c: &Vec3) -> f32 {
    let abx = b[0] - a[0];
    let abz = b[2] - a[2];
    let acx = c[0] - a[0];
    let acz = c[2] - a[2];
    acx * abz - abx * acz
}

/// Fan sum of `tri_area_2d` over a convex polygon
pub fn poly_area_2d(verts: &[Vec3]) -> f32 {
    (2..verts.len())
        .map(|i| tri_area_2d(&verts[0], &verts[i - 1], &verts[i]))
        .sum()
}

pub fn overlap_bounds(amin: &Vec3, amax: &Vec3, bmin: &Vec3, bmax: &Vec3) -> bool {
    (0..3).all(|i| amin[i] <= bmax[i] && amax[i] >= bmin[i])
}

pub fn overlap_quant_bounds(amin: &[u16; 3], amax: &[u16; 3], bmin: &[u16; 3], bmax: &[u16; 3]) -> bool {
    (0..3).all(|i| amin[i] <= bmax[i] && amax[i] >= bmin[i])
}

/// Height of `p` projected onto triangle abc, if p lies inside it on xz
pub fn closest_height_point_triangle(p: &Vec3, a: &Vec3, b: &Vec3, c: &Vec3) -> Option<f32> {
    const EPS: f32 = 1e-6;

    let v0 = vsub(c, a);
    let v1 = vsub(b, a);
    let v2 = vsub(p, a);

    let mut denom = v0[0] * v1[2] - v0[2] * v1[0];
    if denom.abs() < EPS {
        return None;
    }

    let mut u = v1[2] * v2[0] - v1[0] * v2[2];
    let mut v = v0[0] * v2[2] - v0[2] * v2[0];
    if denom < 0.0 {
        denom = -denom;
        u = -u;
        v = -v;
    }

    if u >= 0.0 && v >= 0.0 && (u + v) <= denom {
        Some(a[1] + (v0[1] * u + v1[1] * v) / denom)
    } else {
        None
    }
}

/// Squared xz distance from `pt` to segment pq, and the segment parameter of
/// the closest point
pub fn distance_pt_seg_sqr_2d(pt: &Vec3, p: &Vec3, q: &Vec3) -> (f32, f32) {
    let pqx = q[0] - p[0];
    let pqz = q[2] - p[2];
    let dx = pt[0] - p[0];
    let dz = pt[2] - p[2];
    let d = pqx * pqx + pqz * pqz;
    let mut t = pqx * dx + pqz * dz;
    if d > 0.0 {
        t /= d;
    }
    let t = t.clamp(0.0, 1.0);
    let dx = p[0] + t * pqx - pt[0];
    let dz = p[2] + t * pqz - pt[2];
    (dx * dx + dz * dz, t)
}

pub fn point_in_polygon(pt: &Vec3, verts: &[Vec3]) -> bool {
    let n = verts.len();
    let mut inside = false;
    let mut j = n.wrapping_sub(1);
    for i in 0..n {
        let vi = &verts[i];
        let vj = &verts[j];
        if ((vi[2] > pt[2]) != (vj[2] > pt[2]))
            && (pt[0] < (vj[0] - vi[0]) * (pt[2] - vi[2]) / (vj[2] - vi[2]) + vi[0])
        {
            inside = !inside;
        }
        j = i;
    }
    inside
}

/// Point-in-polygon test that also fills per-edge squared distances and
/// segment parameters. Edge `j` runs from `verts[j]` to `verts[j + 1]`.
pub fn distance_pt_poly_edges_sqr(
    pt: &Vec3,
    verts: &[Vec3],
    edge_dist: &mut [f32],
    edge_t: &mut [f32],
) -> bool {
    let n = verts.len();
    let mut inside = false;
    let mut j = n.wrapping_sub(1);
    for i in 0..n {
        let vi = &verts[i];
        let vj = &verts[j];
        if ((vi[2] > pt[2]) != (vj[2] > pt[2]))
            && (pt[0] < (vj[0] - vi[0]) * (pt[2] - vi[2]) / (vj[2] - vi[2]) + vi[0])
        {
            inside = !inside;
        }
        let (d, t) = distance_pt_seg_sqr_2d(pt, vj, vi);
        edge_dist[j] = d;
        edge_t[j] = t;
        j = i;
    }
    inside
}

/// Result of clipping a segment against a convex polygon on xz
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SegmentClip {
    pub tmin: f32,
    pub tmax: f32,
    /// Edge the segment enters through
    pub seg_min: Option<usize>,
    /// Edge the segment leaves through, `None` when the end point is inside
    pub seg_max: Option<usize>,
}

pub fn intersect_segment_poly_2d(p0: &Vec3, p1: &Vec3, verts: &[Vec3]) -> Option<SegmentClip> {
    const EPS: f32 = 0.000_001;

    let mut clip = SegmentClip {
        tmin: 0.0,
        tmax: 1.0,
        seg_min: None,
        seg_max: None,
    };
    let dir = vsub(p1, p0);

    let n = verts.len();
    let mut j = n.wrapping_sub(1);
    for i in 0..n {
        let edge = vsub(&verts[i], &verts[j]);
        let diff = vsub(p0, &verts[j]);
        let num = vperp_2d(&edge, &diff);
        let den = vperp_2d(&dir, &edge);
        if den.abs() < EPS {
            // Parallel to this edge
            if num < 0.0 {
                return None;
            }
            j = i;
            continue;
        }
        let t = num / den;
        if den < 0.0 {
            // Entering across this edge
            if t > clip.tmin {
                clip.tmin = t;
                clip.seg_min = Some(j);
                if clip.tmin > clip.tmax {
                    return None;
                }
            }
        } else if t < clip.tmax {
            // Leaving across this edge
            clip.tmax = t;
            clip.seg_max = Some(j);
            if clip.tmax < clip.tmin {
                return None;
            }
        }
        j = i;
    }

    Some(clip)
}

/// Pick a point inside a convex polygon from two uniform samples in [0, 1)
pub fn random_point_in_convex_poly(pts: &[Vec3], s: f32, t: f32) -> Vec3 {
    let npts = pts.len();
    let mut areas = [0.0f32; crate::DT_VERTS_PER_POLYGON];
    let mut area_sum = 0.0;
    for i in 2..npts {
        areas[i] = tri_area_2d(&pts[0], &pts[i - 1], &pts[i]);
        area_sum += areas[i].max(0.001);
    }

    // Sub-triangle weighted by area
    let thr = s * area_sum;
    let mut acc = 0.0;
    let mut u = 1.0;
    let mut tri = npts - 1;
    for (i, &dacc) in areas.iter().enumerate().take(npts).skip(2) {
        if thr >= acc && thr < acc + dacc {
            u = (thr - acc) / dacc;
            tri = i;
            break;
        }
        acc += dacc;
    }

    let v = t.sqrt();
    let a = 1.0 - v;
    let b = (1.0 - u) * v;
    let c = u * v;
    let pa = &pts[0];
    let pb = &pts[tri - 1];
    let pc = &pts[tri];

    [
        a * pa[0] + b * pb[0] + c * pc[0],
        a * pa[1] + b * pb[1] + c * pc[1],
        a * pa[2] + b * pb[2] + c * pc[2],
    ]
}

pub fn next_pow2(v: u32) -> u32 {
    v.max(1).next_power_of_two()
}

pub fn ilog2(v: u32) -> u32 {
    if v == 0 { 0 } else { v.ilog2() }
}

/// Direction on the other side of a tile border (0..8, counter to `side`)
pub fn opposite_tile(side: u8) -> u8 {
    (side + 4) & 0x7
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square() -> Vec<Vec3> {
        // Clockwise on xz, matching the mesh winding
        vec![
            [0.0, 0.0, 0.0],
            [0.0, 0.0, 1.0],
            [1.0, 0.0, 1.0],
            [1.0, 0.0, 0.0],
        ]
    }

    #[test]
    fn test_tri_area_sign() {
        let sq = square();
        assert!(tri_area_2d(&sq[0], &sq[1], &sq[2]) > 0.0);
        assert!((poly_area_2d(&sq) - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_point_in_polygon() {
        let sq = square();
        assert!(point_in_polygon(&[0.5, 0.0, 0.5], &sq));
        assert!(!point_in_polygon(&[1.5, 0.0, 0.5], &sq));
    }

    #[test]
    fn test_closest_height_on_slope() {
        let a = [0.0, 0.0, 0.0];
        let b = [0.0, 0.0, 1.0];
        let c = [1.0, 1.0, 0.0];
        let h = closest_height_point_triangle(&[0.5, 9.0, 0.25], &a, &b, &c).unwrap();
        assert!((h - 0.5).abs() < 1e-5);
        assert!(closest_height_point_triangle(&[2.0, 0.0, 2.0], &a, &b, &c).is_none());
    }

    #[test]
    fn test_segment_clip_leaving_square() {
        let sq = square();
        let clip = intersect_segment_poly_2d(&[0.5, 0.0, 0.5], &[2.5, 0.0, 0.5], &sq).unwrap();
        assert!((clip.tmax - 0.25).abs() < 1e-5);
        // Edge 2 runs from (1,1) to (1,0)
        assert_eq!(clip.seg_max, Some(2));

        let inside = intersect_segment_poly_2d(&[0.2, 0.0, 0.2], &[0.8, 0.0, 0.8], &sq).unwrap();
        assert_eq!(inside.seg_max, None);
    }

    #[test]
    fn test_distance_to_segment() {
        let (d, t) = distance_pt_seg_sqr_2d(&[0.5, 3.0, 1.0], &[0.0, 0.0, 0.0], &[1.0, 0.0, 0.0]);
        assert!((d - 1.0).abs() < 1e-6);
        assert!((t - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_random_point_stays_inside() {
        let sq = square();
        for (s, t) in [(0.0, 0.0), (0.3, 0.7), (0.99, 0.99), (0.5, 0.01)] {
            let p = random_point_in_convex_poly(&sq, s, t);
            assert!(p[0] >= -1e-5 && p[0] <= 1.0 + 1e-5);
            assert!(p[2] >= -1e-5 && p[2] <= 1.0 + 1e-5);
        }
    }

    #[test]
    fn test_bits_helpers() {
        assert_eq!(next_pow2(5), 8);
        assert_eq!(next_pow2(8), 8);
        assert_eq!(ilog2(8), 3);
        assert_eq!(ilog2(1), 0);
        assert_eq!(opposite_tile(0), 4);
        assert_eq!(opposite_tile(6), 2);
    }
}

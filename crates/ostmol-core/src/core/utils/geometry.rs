use nalgebra::{Point3, Rotation3, Unit, Vector3};
use std::f64::consts::PI;

/// Squared lengths below this are treated as degenerate.
pub const DEGENERATE_EPSILON: f64 = 1e-12;

pub fn distance(a: &Point3<f64>, b: &Point3<f64>) -> f64 {
    (b - a).norm()
}

/// Angle at vertex `b` formed by `a-b-c`, in radians within [0, pi].
///
/// Returns 0 when either arm has zero length.
pub fn angle(a: &Point3<f64>, b: &Point3<f64>, c: &Point3<f64>) -> f64 {
    let u = a - b;
    let v = c - b;
    let denom = u.norm() * v.norm();
    if denom * denom < DEGENERATE_EPSILON {
        return 0.0;
    }
    (u.dot(&v) / denom).clamp(-1.0, 1.0).acos()
}

/// Dihedral angle `a-b-c-d` in radians within (-pi, pi].
///
/// The sign follows the IUPAC convention: looking down `b -> c`, a clockwise
/// rotation from `a` to `d` is positive.
pub fn dihedral(a: &Point3<f64>, b: &Point3<f64>, c: &Point3<f64>, d: &Point3<f64>) -> f64 {
    let b1 = b - a;
    let b2 = c - b;
    let b3 = d - c;
    let n1 = b1.cross(&b2);
    let n2 = b2.cross(&b3);
    let y = b2.norm() * b1.dot(&n2);
    let x = n1.dot(&n2);
    normalize_angle(y.atan2(x))
}

/// Wraps an angle into (-pi, pi].
pub fn normalize_angle(angle: f64) -> f64 {
    let mut a = angle % (2.0 * PI);
    if a <= -PI {
        a += 2.0 * PI;
    } else if a > PI {
        a -= 2.0 * PI;
    }
    a
}

/// Whether three points are (nearly) collinear or coincident.
pub fn is_collinear(a: &Point3<f64>, b: &Point3<f64>, c: &Point3<f64>) -> bool {
    let u = b - a;
    let v = c - b;
    if u.norm_squared() < DEGENERATE_EPSILON || v.norm_squared() < DEGENERATE_EPSILON {
        return true;
    }
    u.normalize().cross(&v.normalize()).norm_squared() < 1e-10
}

/// Places atom `d` from three reference atoms using the NeRF construction.
///
/// # Arguments
///
/// * `a`, `b`, `c` - The reference atoms; `c` is the atom `d` is bonded to.
/// * `bond_length` - Length of the `c-d` bond.
/// * `bond_angle` - Angle `b-c-d` in radians.
/// * `torsion` - Dihedral `a-b-c-d` in radians.
///
/// # Return
///
/// The Cartesian position of `d`. Degenerate reference frames fall back to an
/// arbitrary but deterministic perpendicular.
pub fn place_atom(
    a: &Point3<f64>,
    b: &Point3<f64>,
    c: &Point3<f64>,
    bond_length: f64,
    bond_angle: f64,
    torsion: f64,
) -> Point3<f64> {
    let bc = c - b;
    let bcn = if bc.norm_squared() < DEGENERATE_EPSILON {
        Vector3::x()
    } else {
        bc.normalize()
    };

    let ab = b - a;
    let n_raw = ab.cross(&bcn);
    let n = if n_raw.norm_squared() < DEGENERATE_EPSILON {
        let helper = if bcn.x.abs() < 0.9 {
            Vector3::x()
        } else {
            Vector3::y()
        };
        bcn.cross(&helper).normalize()
    } else {
        n_raw.normalize()
    };
    let m = n.cross(&bcn);

    let d_local = Vector3::new(
        -bond_length * bond_angle.cos(),
        bond_length * torsion.cos() * bond_angle.sin(),
        bond_length * torsion.sin() * bond_angle.sin(),
    );

    c + bcn * d_local.x + m * d_local.y + n * d_local.z
}

/// Rotation by `angle` radians (right-handed) about the directed axis `from -> to`.
pub fn rotation_about(from: &Point3<f64>, to: &Point3<f64>, angle: f64) -> Option<Rotation3<f64>> {
    let axis = to - from;
    if axis.norm_squared() < DEGENERATE_EPSILON {
        return None;
    }
    Some(Rotation3::from_axis_angle(&Unit::new_normalize(axis), angle))
}

pub fn centroid(points: &[Point3<f64>]) -> Option<Point3<f64>> {
    if points.is_empty() {
        return None;
    }
    let sum = points
        .iter()
        .fold(Vector3::zeros(), |acc, p| acc + p.coords);
    Some(Point3::from(sum / points.len() as f64))
}

/// Axis-aligned bounding box as `(min, max)` corners.
pub fn bounds(points: &[Point3<f64>]) -> Option<(Point3<f64>, Point3<f64>)> {
    let first = points.first()?;
    Some(points.iter().fold((*first, *first), |(lo, hi), p| {
        (
            Point3::new(lo.x.min(p.x), lo.y.min(p.y), lo.z.min(p.z)),
            Point3::new(hi.x.max(p.x), hi.y.max(p.y), hi.z.max(p.z)),
        )
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(a: f64, b: f64) {
        assert!((a - b).abs() < 1e-9, "{} != {}", a, b);
    }

    #[test]
    fn angle_of_right_angle_and_degenerate_arm() {
        let a = Point3::new(1.0, 0.0, 0.0);
        let b = Point3::origin();
        let c = Point3::new(0.0, 2.0, 0.0);
        assert_close(angle(&a, &b, &c), PI / 2.0);
        assert_close(angle(&b, &b, &c), 0.0);
    }

    #[test]
    fn dihedral_sign_convention() {
        let a = Point3::new(1.0, 0.0, 0.0);
        let b = Point3::origin();
        let c = Point3::new(0.0, 0.0, 1.0);
        let d_pos = Point3::new(0.0, 1.0, 1.0);
        let d_neg = Point3::new(0.0, -1.0, 1.0);
        let d_trans = Point3::new(-1.0, 0.0, 1.0);

        assert_close(dihedral(&a, &b, &c, &d_pos), PI / 2.0);
        assert_close(dihedral(&a, &b, &c, &d_neg), -PI / 2.0);
        assert_close(dihedral(&a, &b, &c, &d_trans), PI);
    }

    #[test]
    fn dihedral_is_invariant_under_reversal() {
        let p = [
            Point3::new(0.3, -1.2, 0.5),
            Point3::new(1.1, 0.2, -0.4),
            Point3::new(2.0, 0.9, 0.7),
            Point3::new(2.5, 2.2, 0.1),
        ];
        assert_close(
            dihedral(&p[0], &p[1], &p[2], &p[3]),
            dihedral(&p[3], &p[2], &p[1], &p[0]),
        );
    }

    #[test]
    fn place_atom_reproduces_requested_internal_coordinates() {
        let a = Point3::new(0.2, -0.7, 1.3);
        let b = Point3::new(1.0, 0.4, 0.9);
        let c = Point3::new(1.8, 0.1, -0.2);
        for &(len, ang, tor) in &[(1.5, 1.9, -2.2), (1.0, 0.4, 3.0), (2.2, 2.8, 0.1)] {
            let d = place_atom(&a, &b, &c, len, ang, tor);
            assert_close(distance(&c, &d), len);
            assert_close(angle(&b, &c, &d), ang);
            assert_close(dihedral(&a, &b, &c, &d), tor);
        }
    }

    #[test]
    fn place_atom_handles_collinear_references() {
        let a = Point3::new(0.0, 0.0, 0.0);
        let b = Point3::new(1.0, 0.0, 0.0);
        let c = Point3::new(2.0, 0.0, 0.0);
        let d = place_atom(&a, &b, &c, 1.0, PI, 0.0);
        assert_close(d.x, 3.0);
        assert_close(d.y, 0.0);
        assert_close(d.z, 0.0);
    }

    #[test]
    fn rotation_about_axis_adds_to_dihedral() {
        let a = Point3::new(1.0, 0.3, -0.2);
        let b = Point3::new(0.1, 0.0, 0.0);
        let c = Point3::new(0.0, 0.2, 1.4);
        let d = Point3::new(0.9, 1.0, 1.9);
        let before = dihedral(&a, &b, &c, &d);
        let rot = rotation_about(&b, &c, 0.3).unwrap();
        let moved = c + rot * (d - c);
        assert_close(dihedral(&a, &b, &c, &moved), normalize_angle(before + 0.3));
        assert!(rotation_about(&b, &b, 0.3).is_none());
    }

    #[test]
    fn normalize_angle_wraps_into_half_open_interval() {
        assert_close(normalize_angle(2.5 * PI), 0.5 * PI);
        assert_close(normalize_angle(-PI), PI);
        assert_close(normalize_angle(0.5), 0.5);
        assert_close(normalize_angle(-4.0), -4.0 + 2.0 * PI);
    }

    #[test]
    fn centroid_and_bounds() {
        let pts = [
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(2.0, -1.0, 4.0),
            Point3::new(1.0, 4.0, -2.0),
        ];
        let c = centroid(&pts).unwrap();
        assert_close(c.x, 1.0);
        assert_close(c.y, 1.0);
        assert_close(c.z, 2.0 / 3.0);
        let (lo, hi) = bounds(&pts).unwrap();
        assert_eq!(lo, Point3::new(0.0, -1.0, -2.0));
        assert_eq!(hi, Point3::new(2.0, 4.0, 4.0));
        assert!(centroid(&[]).is_none());
    }
}

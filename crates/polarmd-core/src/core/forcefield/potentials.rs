use nalgebra::Vector3;

/// Electric conversion factor in kJ·nm/(mol·e²).
pub const ONE_4PI_EPS0: f64 = 138.935458;

/// Harmonic spring on the displacement `d = x_a - x_b`.
///
/// Returns the energy and the force acting on `a` (the force on `b` is its negative).
#[inline]
pub fn harmonic(d: &Vector3<f64>, k: f64) -> (f64, Vector3<f64>) {
    (0.5 * k * d.norm_squared(), -k * d)
}

/// Coulomb interaction for the displacement `r = x_i - x_j`.
///
/// Returns the energy and the force acting on `i`.
#[inline]
pub fn coulomb(r: &Vector3<f64>, qi: f64, qj: f64, dielectric: f64) -> (f64, Vector3<f64>) {
    let dist = r.norm();
    if dist < 1e-6 {
        return (qi.signum() * qj.signum() * 1e10, Vector3::zeros());
    }
    let energy = ONE_4PI_EPS0 * qi * qj / (dielectric * dist);
    (energy, r * (energy / (dist * dist)))
}

use nalgebra::{Point3, Vector3};

/// Periodic boundary conditions of the simulation cell.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum PeriodicBox {
    /// No periodicity; displacements are plain differences.
    #[default]
    None,
    /// An orthorhombic box with the given edge lengths.
    Rectangular(Vector3<f64>),
}

impl PeriodicBox {
    pub fn rectangular(x: f64, y: f64, z: f64) -> Self {
        PeriodicBox::Rectangular(Vector3::new(x, y, z))
    }

    /// Minimum-image displacement `a - b`.
    pub fn dx(&self, a: &Point3<f64>, b: &Point3<f64>) -> Vector3<f64> {
        let mut d = a - b;
        if let PeriodicBox::Rectangular(edges) = self {
            for k in 0..3 {
                let l = edges[k];
                if l > 0.0 {
                    d[k] -= l * (d[k] / l).round();
                }
            }
        }
        d
    }

    /// Wraps a position back into the primary cell `[0, L)`.
    pub fn wrap(&self, p: &Point3<f64>) -> Point3<f64> {
        match self {
            PeriodicBox::None => *p,
            PeriodicBox::Rectangular(edges) => {
                let mut w = *p;
                for k in 0..3 {
                    let l = edges[k];
                    if l > 0.0 {
                        w[k] -= l * (w[k] / l).floor();
                    }
                }
                w
            }
        }
    }

    pub fn is_periodic(&self) -> bool {
        !matches!(self, PeriodicBox::None)
    }
}

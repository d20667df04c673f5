use crate::config::GodunovScheme;

/// Face velocities (or cell velocities) smaller than this in magnitude are
/// treated as stagnant when upwinding.
pub const SMALL_VEL: f64 = 1e-10;

const WENO_EPS: f64 = 1e-6;

/// Five consecutive cell values along one axis, centered on the cell being
/// reconstructed: `s[2]` is the cell itself.
pub type Pencil = [f64; 5];

/// Monotonized-central limited slope of the center cell of a pencil.
pub fn mc_slope(s: &Pencil) -> f64 {
    let dl = s[2] - s[1];
    let dr = s[3] - s[2];
    let dc = 0.5 * (s[3] - s[1]);

    if dl * dr <= 0.0 {
        0.0
    } else {
        let lim = 2.0 * dl.abs().min(dr.abs());
        dc.signum() * dc.abs().min(lim)
    }
}

/// Values of the reconstructed profile at the lower (`sm`) and upper (`sp`)
/// faces of the center cell of the pencil.
pub fn edge_values(scheme: GodunovScheme, s: &Pencil) -> (f64, f64) {
    match scheme {
        GodunovScheme::Plm => {
            let slope = mc_slope(s);
            (s[2] - 0.5 * slope, s[2] + 0.5 * slope)
        }
        GodunovScheme::Ppm => ppm_edges(s, true),
        GodunovScheme::PpmNoLimiter => ppm_edges(s, false),
        GodunovScheme::WenoJs => weno_edges(s, false),
        GodunovScheme::WenoZ => weno_edges(s, true),
    }
}

/// Time-centered states at the lower (`im`) and upper (`ip`) faces of the
/// center cell, traced back over half a time step along the velocities at
/// those faces. `dtdx` is the time step over the cell size.
pub fn predict(scheme: GodunovScheme, s: &Pencil, u_lo: f64, u_hi: f64, dtdx: f64) -> (f64, f64) {
    let (sm, sp) = edge_values(scheme, s);
    let s6 = 6.0 * s[2] - 3.0 * (sm + sp);

    let ip = if u_hi > SMALL_VEL {
        let sigma = u_hi * dtdx;
        sp - 0.5 * sigma * ((sp - sm) - (1.0 - 2.0 / 3.0 * sigma) * s6)
    } else {
        sp
    };
    let im = if u_lo < -SMALL_VEL {
        let sigma = -u_lo * dtdx;
        sm + 0.5 * sigma * ((sp - sm) + (1.0 - 2.0 / 3.0 * sigma) * s6)
    } else {
        sm
    };
    (im, ip)
}

/// Face velocity from the two velocities traced to a face: the Riemann
/// solution of Burgers' equation, zero in a rarefaction fan.
pub fn upwind_velocity(lo: f64, hi: f64) -> f64 {
    let st = if lo + hi >= 0.0 { lo } else { hi };

    if (lo <= 0.0 && hi >= 0.0) || (lo + hi).abs() < SMALL_VEL {
        0.0
    } else {
        st
    }
}

/// Upwind selection of a face state; centered at a stagnant face.
pub fn upwind_state(lo: f64, hi: f64, vel: f64) -> f64 {
    if vel > SMALL_VEL {
        lo
    } else if vel < -SMALL_VEL {
        hi
    } else {
        0.5 * (lo + hi)
    }
}

/// Method-of-lines face velocity from the two limited face extrapolations.
pub fn mol_face_velocity(umns: f64, upls: f64) -> f64 {
    if umns >= 0.0 || upls <= 0.0 {
        let avg = 0.5 * (upls + umns);

        if avg >= SMALL_VEL {
            umns
        } else if avg <= -SMALL_VEL {
            upls
        } else {
            0.0
        }
    } else {
        0.0
    }
}

fn ppm_edge(a: f64, b: f64, c: f64, d: f64, limit: bool) -> f64 {
    let e = 7.0 / 12.0 * (b + c) - 1.0 / 12.0 * (a + d);

    if limit {
        e.clamp(b.min(c), b.max(c))
    } else {
        e
    }
}

fn ppm_edges(s: &Pencil, limit: bool) -> (f64, f64) {
    let mut sm = ppm_edge(s[0], s[1], s[2], s[3], limit);
    let mut sp = ppm_edge(s[1], s[2], s[3], s[4], limit);

    if limit {
        let q = s[2];

        if (sp - q) * (q - sm) <= 0.0 {
            sm = q;
            sp = q;
        } else if (sp - q).abs() >= 2.0 * (sm - q).abs() {
            sp = 3.0 * q - 2.0 * sm;
        } else if (sm - q).abs() >= 2.0 * (sp - q).abs() {
            sm = 3.0 * q - 2.0 * sp;
        }
    }
    (sm, sp)
}

/// Fifth-order WENO value at the upper face of `v[2]`.
fn weno_upper(v: &Pencil, z: bool) -> f64 {
    let b0 = 13.0 / 12.0 * (v[0] - 2.0 * v[1] + v[2]).powi(2) + 0.25 * (v[0] - 4.0 * v[1] + 3.0 * v[2]).powi(2);
    let b1 = 13.0 / 12.0 * (v[1] - 2.0 * v[2] + v[3]).powi(2) + 0.25 * (v[1] - v[3]).powi(2);
    let b2 = 13.0 / 12.0 * (v[2] - 2.0 * v[3] + v[4]).powi(2) + 0.25 * (3.0 * v[2] - 4.0 * v[3] + v[4]).powi(2);

    let d = [0.1, 0.6, 0.3];
    let beta = [b0, b1, b2];
    let tau = (b0 - b2).abs();

    let mut a = [0.0; 3];
    for k in 0..3 {
        a[k] = if z {
            d[k] * (1.0 + tau / (WENO_EPS + beta[k]))
        } else {
            d[k] / (WENO_EPS + beta[k]).powi(2)
        };
    }
    let sum: f64 = a.iter().sum();

    let p0 = (2.0 * v[0] - 7.0 * v[1] + 11.0 * v[2]) / 6.0;
    let p1 = (-v[1] + 5.0 * v[2] + 2.0 * v[3]) / 6.0;
    let p2 = (2.0 * v[2] + 5.0 * v[3] - v[4]) / 6.0;

    (a[0] * p0 + a[1] * p1 + a[2] * p2) / sum
}

fn weno_edges(s: &Pencil, z: bool) -> (f64, f64) {
    let reversed = [s[4], s[3], s[2], s[1], s[0]];
    (weno_upper(&reversed, z), weno_upper(s, z))
}

#[cfg(test)]
mod test {
    use super::*;

    const SCHEMES: [GodunovScheme; 5] = [
        GodunovScheme::Plm,
        GodunovScheme::Ppm,
        GodunovScheme::PpmNoLimiter,
        GodunovScheme::WenoJs,
        GodunovScheme::WenoZ,
    ];

    #[test]
    fn constant_data_is_preserved_by_every_scheme() {
        for scheme in SCHEMES {
            let (im, ip) = predict(scheme, &[3.0; 5], -0.4, 0.7, 0.5);
            assert!((im - 3.0).abs() < 1e-12, "{:?}", scheme);
            assert!((ip - 3.0).abs() < 1e-12, "{:?}", scheme);
        }
    }

    #[test]
    fn linear_data_gives_exact_edges() {
        let s = [0.0, 1.0, 2.0, 3.0, 4.0];
        for scheme in SCHEMES {
            let (sm, sp) = edge_values(scheme, &s);
            assert!((sm - 1.5).abs() < 1e-12, "{:?}", scheme);
            assert!((sp - 2.5).abs() < 1e-12, "{:?}", scheme);
        }
    }

    #[test]
    fn limited_schemes_do_not_overshoot_at_a_jump() {
        let s = [0.0, 0.0, 0.0, 1.0, 1.0];
        for scheme in [GodunovScheme::Plm, GodunovScheme::Ppm] {
            let (im, ip) = predict(scheme, &s, 1.0, 1.0, 0.8);
            assert!((0.0..=1.0).contains(&im) && (0.0..=1.0).contains(&ip), "{:?}", scheme);
        }
    }

    #[test]
    fn upwinding_picks_the_upstream_side() {
        assert_eq!(upwind_velocity(1.0, 2.0), 1.0);
        assert_eq!(upwind_velocity(-1.0, -2.0), -2.0);
        assert_eq!(upwind_velocity(-1.0, 1.0), 0.0);
        assert_eq!(upwind_state(1.0, 3.0, 0.0), 2.0);
        assert_eq!(upwind_state(1.0, 3.0, -1.0), 3.0);
        assert_eq!(mol_face_velocity(-1.0, 1.0), 0.0);
        assert_eq!(mol_face_velocity(2.0, 1.0), 2.0);
    }
}

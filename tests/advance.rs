use std::f64::consts::PI;
use std::sync::Arc;
use gridflow::advection::declare_mac_velocity;
use gridflow::config::{Config, DiffusionType, Scheme};
use gridflow::linear_solver::ConjugateGradient;
use gridflow::mesh::{LevelGeometry, Mesh};
use gridflow::turbulence::{Laminar, TurbulenceModel};
use gridflow::{FieldRepo, FieldState, PdeInfo, PdeSystem};

fn periodic_repo(n: i64) -> FieldRepo {
    let geom = LevelGeometry::new((n, n, n), [0.0; 3], [1.0; 3], [true; 3]);
    FieldRepo::new(Mesh::single_level(geom, 8).unwrap())
}

fn step(pde: &mut PdeSystem, repo: &mut FieldRepo, dt: f64) {
    repo.advance_states();
    pde.compute_advection_term(repo, FieldState::Old, dt).unwrap();
    pde.compute_diffusion_term(repo, FieldState::Old).unwrap();
    pde.compute_predictor_rhs(repo, dt).unwrap();
    pde.solve(repo, dt).unwrap();
}

#[test]
fn scalar_blob_is_conserved_by_every_scheme() {
    for scheme in [Scheme::Godunov, Scheme::Mol] {
        let mut repo = periodic_repo(16);
        let config = Config {
            scheme,
            diffusion_type: DiffusionType::CrankNicolson,
            ..Config::default()
        };
        let mut pde = PdeSystem::new(&mut repo, PdeInfo::scalar("tracer", false), &config, Arc::new(ConjugateGradient)).unwrap();
        let fields = *pde.fields();
        let umac = declare_mac_velocity(&mut repo).unwrap();

        repo.set_from_function(fields.field, FieldState::New, |_, x, s| {
            let r2 = (x[0] - 0.5).powi(2) + (x[1] - 0.5).powi(2) + (x[2] - 0.5).powi(2);
            s[0] = (-r2 / 0.02).exp();
        });
        repo.set_from_function(umac[0], FieldState::New, |_, _, s| s[0] = 1.0);
        repo.set_from_function(umac[1], FieldState::New, |_, _, s| s[0] = -0.5);
        repo.set_from_function(umac[2], FieldState::New, |_, _, s| s[0] = 0.25);
        repo.field_mut(fields.mueff).state_mut(FieldState::New).set_val(1e-2);

        let total = repo.volume_integral(fields.field, FieldState::New, 0);

        for _ in 0..5 {
            step(&mut pde, &mut repo, 0.02);
        }
        let after = repo.volume_integral(fields.field, FieldState::New, 0);
        assert!((after - total).abs() < 1e-8 * total, "{:?}: {} -> {}", scheme, total, after);
    }
}

#[test]
fn uniform_flow_is_preserved_by_a_full_momentum_step() {
    let mut repo = periodic_repo(16);
    let config = Config::default();
    let mut pde = PdeSystem::new(&mut repo, PdeInfo::icns(), &config, Arc::new(ConjugateGradient)).unwrap();
    let fields = *pde.fields();

    repo.field_mut(fields.density).state_mut(FieldState::New).set_val(1.0);
    repo.set_from_function(fields.field, FieldState::New, |_, _, s| {
        s[0] = 1.0;
        s[1] = -0.5;
        s[2] = 0.25;
    });
    let mut laminar = Laminar::new(1e-2, fields.mueff).density_weighted(fields.density);
    laminar.update_mueff(&mut repo).unwrap();

    step(&mut pde, &mut repo, 0.01);

    let velocity = repo.field(fields.field).state(FieldState::New);
    for (b, block) in repo.mesh().level(0).blocks.iter().enumerate() {
        for index in block.iter() {
            let u = velocity.patch(0, b);
            assert!((u.get(index, 0) - 1.0).abs() < 1e-10);
            assert!((u.get(index, 1) + 0.5).abs() < 1e-10);
            assert!((u.get(index, 2) - 0.25).abs() < 1e-10);
        }
    }
}

#[test]
fn shear_layer_decays_at_the_discrete_implicit_rate() {
    let n = 16;
    let h = 1.0 / n as f64;
    let (nu, dt) = (0.1, 0.01);
    let mut repo = periodic_repo(n);
    let config = Config {
        diffusion_type: DiffusionType::Implicit,
        ..Config::default()
    };
    let mut pde = PdeSystem::new(&mut repo, PdeInfo::icns(), &config, Arc::new(ConjugateGradient)).unwrap();
    let fields = *pde.fields();

    repo.field_mut(fields.density).state_mut(FieldState::New).set_val(1.0);
    repo.set_from_function(fields.field, FieldState::New, |_, x, s| {
        s[0] = (2.0 * PI * x[1]).sin();
        s[1] = 0.0;
        s[2] = 0.0;
    });
    Laminar::new(nu, fields.mueff).update_mueff(&mut repo).unwrap();

    let initial = repo.field(fields.field).state(FieldState::New).clone();
    step(&mut pde, &mut repo, dt);

    let lambda = (2.0 * (2.0 * PI * h).cos() - 2.0) / (h * h);
    let factor = 1.0 / (1.0 - dt * nu * lambda);
    let velocity = repo.field(fields.field).state(FieldState::New);

    for (b, block) in repo.mesh().level(0).blocks.iter().enumerate() {
        for index in block.iter() {
            let expected = factor * initial.patch(0, b).get(index, 0);
            assert!((velocity.patch(0, b).get(index, 0) - expected).abs() < 1e-8, "{:?}", index);
            assert!(velocity.patch(0, b).get(index, 1).abs() < 1e-10);
        }
    }
}

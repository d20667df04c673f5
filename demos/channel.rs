use std::error::Error;
use std::sync::Arc;
use clap::Parser;
use log::{info, LevelFilter};
use simple_logger::SimpleLogger;
use gridflow::boundary::{BcType, Orientation};
use gridflow::config::{Config, DiffusionType, Scheme};
use gridflow::index_space::Axis;
use gridflow::linear_solver::ConjugateGradient;
use gridflow::mesh::{LevelGeometry, Mesh};
use gridflow::patch::Patch;
use gridflow::time_step::estimate_dt;
use gridflow::turbulence::{Laminar, TurbulenceModel};
use gridflow::{FieldRepo, FieldState, PdeInfo, PdeSystem};




/**
 * Body-force driven flow between two no-slip walls at y = 0 and y = 1,
 * periodic in x and z. Starts from rest and relaxes toward the parabolic
 * profile u = f y (1 - y) / (2 nu).
 */
#[derive(Debug, Parser)]
#[clap(version = "0.1", about = "Laminar channel flow on a single-level mesh")]
struct Opts {
    #[clap(short = 'n', long, default_value = "16")]
    resolution: i64,

    #[clap(short = 'b', long, default_value = "8")]
    block_size: i64,

    #[clap(long, default_value = "godunov")]
    scheme: String,

    #[clap(long, default_value = "ppm")]
    godunov_type: String,

    #[clap(long, default_value = "crank_nicolson")]
    diffusion_type: String,

    #[clap(long, default_value = "0.5")]
    cfl: f64,

    #[clap(long, default_value = "0.1")]
    viscosity: f64,

    #[clap(long, default_value = "1.0")]
    forcing: f64,

    #[clap(long, default_value = "0.05")]
    max_dt: f64,

    #[clap(short = 't', long, default_value = "2.0")]
    tfinal: f64,

    #[clap(short = 'o', long, default_value = "channel.cbor")]
    output: String,
}




#[derive(serde::Serialize)]


/**
 * The solution written at the end of the run
 */
struct State {
    iteration: u64,
    time: f64,
    velocity: Vec<Patch>,
}




// ============================================================================
fn main() -> Result<(), Box<dyn Error>> {
    SimpleLogger::new().with_level(LevelFilter::Info).init()?;

    let opts = Opts::parse();
    let config = Config {
        scheme: opts.scheme.parse::<Scheme>()?,
        diffusion_type: opts.diffusion_type.parse::<DiffusionType>()?,
        godunov_type: opts.godunov_type.clone(),
        cfl: opts.cfl,
        ..Config::default()
    };
    info!("{:?}", opts);

    let n = opts.resolution;
    let geometry = LevelGeometry::new((2 * n, n, n), [0.0; 3], [2.0, 1.0, 1.0], [true, false, true]);
    let mut repo = FieldRepo::new(Mesh::single_level(geometry, opts.block_size)?);
    let mut pde = PdeSystem::new(&mut repo, PdeInfo::icns(), &config, Arc::new(ConjugateGradient))?;
    let fields = *pde.fields();

    repo.field_mut(fields.field)
        .bc_mut()
        .set(Orientation::low(Axis::J), BcType::FixedValue, &[0.0; 3])
        .set(Orientation::high(Axis::J), BcType::FixedValue, &[0.0; 3]);
    repo.field_mut(fields.density).state_mut(FieldState::New).set_val(config.rho_0);
    repo.set_from_function(fields.src_term, FieldState::New, |_, _, s| {
        s[0] = opts.forcing;
        s[1] = 0.0;
        s[2] = 0.0;
    });

    let mut turbulence = Laminar::new(opts.viscosity, fields.mueff).density_weighted(fields.density);
    let mut iteration = 0;
    let mut time = 0.0;

    while time < opts.tfinal {
        turbulence.update_mueff(&mut repo)?;

        let cfl = estimate_dt(&repo, &fields, &config, false)?;
        let dt = cfl.dt(config.cfl, opts.max_dt.min(opts.tfinal - time));

        repo.advance_states();
        pde.compute_advection_term(&mut repo, FieldState::Old, dt)?;
        pde.compute_diffusion_term(&mut repo, FieldState::Old)?;
        pde.compute_predictor_rhs(&mut repo, dt)?;

        let stats = pde.solve(&mut repo, dt)?;
        let iterations: usize = stats.iter().map(|s| s.iterations).sum();

        iteration += 1;
        time += dt;
        info!("[{}] t={:.4} dt={:.4e} solver iterations={}", iteration, time, dt, iterations);
    }

    let velocity = repo.field(fields.field).state(FieldState::New);
    let umax = repo
        .mesh()
        .level(0)
        .blocks
        .iter()
        .zip(velocity.level(0))
        .flat_map(|(block, patch)| block.iter().map(move |index| patch.get(index, 0)))
        .fold(0.0, f64::max);
    info!(
        "centerline velocity {:.4} (steady state {:.4})",
        umax,
        opts.forcing / (8.0 * opts.viscosity)
    );

    let state = State {
        iteration,
        time,
        velocity: velocity.level(0).to_vec(),
    };
    let file = std::fs::File::create(&opts.output)?;
    let mut buffer = std::io::BufWriter::new(file);
    ciborium::ser::into_writer(&state, &mut buffer)?;
    info!("wrote {}", opts.output);
    Ok(())
}

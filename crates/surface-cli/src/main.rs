//! register: command-line non-rigid surface registration.
//!
//! Deforms a floating OBJ mesh onto a target OBJ mesh and writes the result
//! with the floating mesh's original topology.
//!
//! # Logging
//!
//! Set `RUST_LOG` to control log output:
//! - `RUST_LOG=surface_register=info` - per-level progress
//! - `RUST_LOG=surface_register=debug` - per-iteration residuals
//!
//! # Example
//!
//! ```bash
//! register pyramid scan.obj template.obj -o registered.obj
//! register rigid scan.obj template.obj -o aligned.obj --allow-scaling
//! ```

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use surface_io::{read_obj_files, write_obj_files};
use surface_register::{
    CorrespondenceParams, NonrigidRegistrationParams, PyramidRegistrationParams,
    RigidRegistrationParams, nonrigid_registration, pyramid_registration, rigid_registration,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// register - deform a floating surface mesh onto a target.
#[derive(Parser)]
#[command(name = "register")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

/// Options shared by every registration mode.
#[derive(Args)]
struct CommonArgs {
    /// Floating mesh (deformed to match the target).
    floating: PathBuf,

    /// Target mesh (left untouched).
    target: PathBuf,

    /// Output path for the registered floating mesh.
    #[arg(short, long)]
    output: PathBuf,

    /// Use one-directional instead of symmetric correspondences.
    #[arg(long)]
    asymmetric: bool,

    /// Nearest neighbours per correspondence row.
    #[arg(long, default_value = "5")]
    num_neighbours: usize,

    /// Inlier cutoff in robust scales.
    #[arg(long, default_value = "4.0")]
    inlier_kappa: f64,

    /// Flag boundary vertices out of transform estimation.
    #[arg(long)]
    flag_boundaries: bool,
}

#[derive(Args)]
struct SmoothingArgs {
    /// Gaussian smoothing kernel width.
    #[arg(long, default_value = "3.0")]
    sigma: f64,

    /// Neighbours per vertex in the smoothing kernel.
    #[arg(long, default_value = "10")]
    smoothing_neighbours: usize,

    /// Viscous smoothing passes at the first iteration.
    #[arg(long, default_value = "50")]
    viscous_start: usize,

    /// Viscous smoothing passes at the last iteration.
    #[arg(long, default_value = "1")]
    viscous_end: usize,

    /// Elastic smoothing passes at the first iteration.
    #[arg(long, default_value = "50")]
    elastic_start: usize,

    /// Elastic smoothing passes at the last iteration.
    #[arg(long, default_value = "1")]
    elastic_end: usize,
}

#[derive(Subcommand)]
enum Command {
    /// Rigid (optionally similarity) alignment only.
    Rigid {
        #[command(flatten)]
        common: CommonArgs,

        /// Number of iterations.
        #[arg(long, default_value = "20")]
        iterations: usize,

        /// Also estimate a uniform scale.
        #[arg(long)]
        allow_scaling: bool,
    },

    /// Single-resolution non-rigid registration.
    Nonrigid {
        #[command(flatten)]
        common: CommonArgs,

        #[command(flatten)]
        smoothing: SmoothingArgs,

        /// Number of iterations.
        #[arg(long, default_value = "60")]
        iterations: usize,
    },

    /// Multi-resolution non-rigid registration (the usual choice).
    Pyramid {
        #[command(flatten)]
        common: CommonArgs,

        #[command(flatten)]
        smoothing: SmoothingArgs,

        /// Total iterations across all pyramid levels.
        #[arg(long, default_value = "60")]
        iterations: usize,

        /// Number of pyramid levels.
        #[arg(long, default_value = "3")]
        layers: usize,

        /// Percent of floating faces removed at the coarsest level.
        #[arg(long, default_value = "90")]
        downsample_floating: f64,

        /// Percent of target faces removed at the coarsest level.
        #[arg(long, default_value = "90")]
        downsample_target: f64,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Rigid {
            common,
            iterations,
            allow_scaling,
        } => {
            let (mut floating, target) = load_pair(&common)?;
            let params = RigidRegistrationParams::new()
                .with_num_iterations(iterations)
                .with_correspondence(correspondence_params(&common))
                .with_inlier_kappa(common.inlier_kappa)
                .with_scaling(allow_scaling);
            let result = rigid_registration(&mut floating, &target, &params)
                .context("rigid registration failed")?;
            info!(
                rms = result.rms_residual,
                iterations = result.iterations,
                "rigid registration finished"
            );
            save(&floating, &common)
        }
        Command::Nonrigid {
            common,
            smoothing,
            iterations,
        } => {
            let (mut floating, target) = load_pair(&common)?;
            let params = NonrigidRegistrationParams::new()
                .with_num_iterations(iterations)
                .with_correspondence(correspondence_params(&common))
                .with_inlier_kappa(common.inlier_kappa)
                .with_sigma_smoothing(smoothing.sigma)
                .with_num_smoothing_neighbours(smoothing.smoothing_neighbours)
                .with_viscous_ramp(smoothing.viscous_start, smoothing.viscous_end)
                .with_elastic_ramp(smoothing.elastic_start, smoothing.elastic_end);
            let result = nonrigid_registration(&mut floating, &target, &params)
                .context("non-rigid registration failed")?;
            info!(
                rms = result.rms_residual,
                iterations = result.iterations,
                "non-rigid registration finished"
            );
            save(&floating, &common)
        }
        Command::Pyramid {
            common,
            smoothing,
            iterations,
            layers,
            downsample_floating,
            downsample_target,
        } => {
            let (mut floating, target) = load_pair(&common)?;
            let params = PyramidRegistrationParams::new()
                .with_num_iterations(iterations)
                .with_num_pyramid_layers(layers)
                .with_floating_downsampling(downsample_floating, 0.0)
                .with_target_downsampling(downsample_target, 0.0)
                .with_correspondence(correspondence_params(&common))
                .with_inlier_kappa(common.inlier_kappa)
                .with_sigma_smoothing(smoothing.sigma)
                .with_viscous_ramp(smoothing.viscous_start, smoothing.viscous_end)
                .with_elastic_ramp(smoothing.elastic_start, smoothing.elastic_end);
            let result = pyramid_registration(&mut floating, &target, &params)
                .context("pyramid registration failed")?;
            info!(
                rms = result.rms_residual,
                iterations = result.iterations,
                layers = result.layers,
                "pyramid registration finished"
            );
            save(&floating, &common)
        }
    }
}

fn correspondence_params(common: &CommonArgs) -> CorrespondenceParams {
    CorrespondenceParams::new()
        .with_symmetric(!common.asymmetric)
        .with_num_neighbours(common.num_neighbours)
}

fn load_pair(
    common: &CommonArgs,
) -> Result<(surface_types::SurfaceMesh, surface_types::SurfaceMesh)> {
    let (mut floating, mut target) = read_obj_files(&common.floating, &common.target)
        .with_context(|| {
            format!(
                "loading {} and {}",
                common.floating.display(),
                common.target.display()
            )
        })?;

    if common.flag_boundaries {
        let f = floating.flag_boundary_vertices();
        let t = target.flag_boundary_vertices();
        info!(floating = f, target = t, "flagged boundary vertices");
    }

    info!(
        floating_vertices = floating.vertex_count(),
        floating_faces = floating.face_count(),
        target_vertices = target.vertex_count(),
        target_faces = target.face_count(),
        "loaded meshes"
    );
    Ok((floating, target))
}

fn save(mesh: &surface_types::SurfaceMesh, common: &CommonArgs) -> Result<()> {
    write_obj_files(mesh, &common.output)
        .with_context(|| format!("writing {}", common.output.display()))?;
    info!(output = %common.output.display(), "wrote registered mesh");
    Ok(())
}

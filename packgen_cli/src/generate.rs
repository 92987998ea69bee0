use crate::helpers;
use crate::{GlobalConfiguration, Subcommand};
use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use packgen::config::{Algorithm, GenerationConfig, InitialDistribution, SystemConfig};
use packgen::generator::PackingGenerator;
use rayon::prelude::*;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::info;

#[derive(Clone, Copy, ValueEnum)]
enum AlgorithmArg {
    LsSimple,
    LsGradual,
    ForceBiased,
    JodreyTory,
    KhirevichJodreyTory,
    MonteCarlo,
    ConjugateGradient,
    ClosestJamming,
}

impl From<AlgorithmArg> for Algorithm {
    fn from(argument: AlgorithmArg) -> Self {
        match argument {
            AlgorithmArg::LsSimple => Self::LubachevskyStillingerSimple,
            AlgorithmArg::LsGradual => Self::LubachevskyStillingerGradual,
            AlgorithmArg::ForceBiased => Self::ForceBiased,
            AlgorithmArg::JodreyTory => Self::OriginalJodreyTory,
            AlgorithmArg::KhirevichJodreyTory => Self::KhirevichJodreyTory,
            AlgorithmArg::MonteCarlo => Self::MonteCarlo,
            AlgorithmArg::ConjugateGradient => Self::ConjugateGradient,
            AlgorithmArg::ClosestJamming => Self::ClosestJamming,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum InitialArg {
    Poisson,
    PoissonInCells,
}

impl From<InitialArg> for InitialDistribution {
    fn from(argument: InitialArg) -> Self {
        match argument {
            InitialArg::Poisson => Self::Poisson,
            InitialArg::PoissonInCells => Self::PoissonInCells,
        }
    }
}

/// Generates packings and writes them as `.xyzd` files.
#[derive(Parser)]
pub struct Opts {
    /// Number of particles.
    #[arg(long, short = 'n')]
    particles: usize,
    /// Box extent: one value for a cube or three comma-separated values.
    #[arg(long, value_parser = helpers::parse_box_size)]
    box_size: [f64; 3],
    /// Target density defining the (monodisperse) particle diameter.
    #[arg(long)]
    density: f64,
    /// Generation algorithm.
    #[arg(long, value_enum, default_value = "force-biased")]
    algorithm: AlgorithmArg,
    /// Seeds to run; several seeds run as independent parallel tasks.
    #[arg(long, num_args = 1.., default_value = "0")]
    seeds: Vec<u64>,
    /// Contraction rate of the outer-diameter (or compression) schedule.
    #[arg(long, default_value_t = 1e-3)]
    contraction_rate: f64,
    /// Initial particle arrangement.
    #[arg(long, value_enum, default_value = "poisson")]
    initial: InitialArg,
    /// YAML file with a full generation configuration; overrides the
    /// algorithm, rate and arrangement flags.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Scale the stored diameters by the achieved inner ratio, so the
    /// written spheres touch instead of keeping their nominal sizes.
    #[arg(long)]
    rescale: bool,
    /// Directory the packings are written to.
    #[arg(long, default_value = ".")]
    output: PathBuf,
}

impl Opts {
    fn base_generation(&self) -> Result<GenerationConfig> {
        match &self.config {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("reading {}", path.display()))?;
                serde_yaml::from_str(&text)
                    .with_context(|| format!("parsing {}", path.display()))
            }
            None => Ok(GenerationConfig {
                algorithm: self.algorithm.into(),
                contraction_rate: self.contraction_rate,
                initial_distribution: self.initial.into(),
                ..GenerationConfig::default()
            }),
        }
    }
}

impl Subcommand for Opts {
    fn run(&self, _cfg: &GlobalConfiguration) -> Result<ExitCode> {
        let diameter = helpers::diameter_for_density(self.particles, self.box_size, self.density);
        info!(diameter, "derived the particle diameter");
        let base_generation = self.base_generation()?;

        // Independent seeds own private packings and neighbor structures;
        // they parallelise trivially.
        self.seeds
            .par_iter()
            .try_for_each(|&seed| -> Result<()> {
                let system = SystemConfig::<3> {
                    particle_count: self.particles,
                    box_size: self.box_size,
                };
                let generation = GenerationConfig {
                    seed,
                    ..base_generation.clone()
                };

                let mut generator = PackingGenerator::new(system, generation)?;
                let diameters = vec![diameter; self.particles];
                let mut packing = generator.create_packing(&diameters)?;
                let summary = generator.generate(&mut packing)?;

                if self.rescale {
                    packgen::particle::scale_diameters(
                        &mut packing,
                        generator.final_inner_diameter_ratio(),
                    );
                }

                let path = self.output.join(format!("packing_{seed}.xyzd"));
                packgen::io::write_packing(&path, &packing)
                    .with_context(|| format!("writing {}", path.display()))?;
                info!(
                    seed,
                    path = %path.display(),
                    porosity = summary.calculated_porosity,
                    iterations = summary.iterations,
                    "wrote packing"
                );
                Ok(())
            })?;

        Ok(ExitCode::SUCCESS)
    }
}

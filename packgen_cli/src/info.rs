use crate::helpers;
use crate::{GlobalConfiguration, Subcommand};
use anyhow::{Context, Result};
use clap::Parser;
use itertools::Itertools;
use packgen::cell_list::CellList;
use packgen::math::PeriodicBox;
use packgen::particle::{max_diameter, mean_diameter, min_diameter, particles_volume};
use packgen::rattlers::RattlerClassifier;
use packgen::verlet::VerletList;
use std::path::PathBuf;
use std::process::ExitCode;

/// Prints the structural summary of a stored packing.
#[derive(Parser)]
pub struct Opts {
    /// Path of the `.xyzd` packing file.
    path: PathBuf,
    /// Box extent: one value for a cube or three comma-separated values.
    #[arg(long, value_parser = helpers::parse_box_size)]
    box_size: [f64; 3],
    /// Swap the byte order of every value while reading.
    #[arg(long)]
    byte_swap: bool,
    /// Contacts a particle needs to count as mechanically stable.
    #[arg(long, default_value_t = 4)]
    min_neighbors: usize,
    /// Contraction ratio of the contact test for the rattler counts.
    #[arg(long, default_value_t = 0.999)]
    contraction: f64,
}

impl Subcommand for Opts {
    fn run(&self, _cfg: &GlobalConfiguration) -> Result<ExitCode> {
        let packing = packgen::io::read_packing(&self.path, self.byte_swap)
            .with_context(|| format!("reading {}", self.path.display()))?;
        let periodic_box = PeriodicBox::new(self.box_size);

        let density = particles_volume(&packing) / periodic_box.volume();
        let min_normalized_distance = packing
            .iter()
            .tuple_combinations()
            .map(|(first, second)| periodic_box.normalized_distance(first, second))
            .fold(f64::INFINITY, f64::min);

        let mut classifier = RattlerClassifier::new(
            VerletList::new(CellList::new(periodic_box)),
            self.min_neighbors,
        );
        classifier.set_particles(&packing);
        let mask = classifier.rattler_mask(&packing, self.contraction);
        let rattlers = packing.len()
            - RattlerClassifier::<3, VerletList<3, CellList<3>>>::non_rattler_count(&mask);

        println!("particles:               {}", packing.len());
        println!("diameters (min/mean/max): {:.6} / {:.6} / {:.6}",
            min_diameter(&packing),
            mean_diameter(&packing),
            max_diameter(&packing),
        );
        println!("density:                 {density:.6}");
        println!("porosity:                {:.6}", 1.0 - density);
        println!("min normalized distance: {min_normalized_distance:.6}");
        println!(
            "rattlers (<{} contacts at {:.3}): {rattlers}",
            self.min_neighbors, self.contraction
        );
        Ok(ExitCode::SUCCESS)
    }
}

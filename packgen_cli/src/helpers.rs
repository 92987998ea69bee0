use anyhow::{bail, Result};
use std::f64::consts::PI;

/// Parses a box extent given either as one value for a cube or as three
/// comma-separated values.
pub fn parse_box_size(argument: &str) -> Result<[f64; 3]> {
    let values: Vec<f64> = argument
        .split(',')
        .map(str::trim)
        .map(str::parse)
        .collect::<Result<_, _>>()?;

    let size = match values.as_slice() {
        [cube] => [*cube; 3],
        [x, y, z] => [*x, *y, *z],
        _ => bail!("expected one or three box extents, got {argument:?}"),
    };
    if size.iter().any(|&extent| extent <= 0.0) {
        bail!("box extents must be positive, got {argument:?}");
    }
    Ok(size)
}

/// The monodisperse diameter that puts `count` spheres at `density` in a
/// box of the given extent.
pub fn diameter_for_density(count: usize, box_size: [f64; 3], density: f64) -> f64 {
    #[allow(clippy::cast_precision_loss)]
    let count = count as f64;
    let volume: f64 = box_size.iter().product();
    (6.0 * density * volume / (count * PI)).cbrt()
}

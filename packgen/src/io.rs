//! The `.xyzd` packing format: four little-endian doubles per particle.

use crate::error::{Error, Result};
use crate::math::Vector;
use crate::particle::{Packing, Particle};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

const RECORD_SIZE: usize = 4 * 8;

/// Reads a packing of `x, y, z, diameter` records.
///
/// The format itself carries no endianness marker; `swap_bytes` is supplied
/// by the caller, who knows the provenance of the file (typically from an
/// accompanying info file).
///
/// # Errors
///
/// Returns [`Error::Io`] on read failures and [`Error::Config`] when the
/// file size is not a whole number of records.
pub fn read_packing(path: &Path, swap_bytes: bool) -> Result<Packing<3>> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut bytes = Vec::new();
    reader.read_to_end(&mut bytes)?;

    if bytes.len() % RECORD_SIZE != 0 {
        return Err(Error::Config(format!(
            "packing file {} holds {} bytes, not a whole number of {RECORD_SIZE}-byte records",
            path.display(),
            bytes.len()
        )));
    }

    let mut packing = Vec::with_capacity(bytes.len() / RECORD_SIZE);
    for (index, record) in bytes.chunks_exact(RECORD_SIZE).enumerate() {
        let mut values = [0.0_f64; 4];
        for (value, chunk) in values.iter_mut().zip(record.chunks_exact(8)) {
            let mut raw: [u8; 8] = chunk.try_into().expect("chunk of eight bytes");
            if swap_bytes {
                raw.reverse();
            }
            *value = f64::from_le_bytes(raw);
        }
        packing.push(Particle::new(
            index,
            values[3],
            Vector::from([values[0], values[1], values[2]]),
        ));
    }
    Ok(packing)
}

/// Writes a packing as little-endian `x, y, z, diameter` records.
///
/// # Errors
///
/// Returns [`Error::Io`] on write failures.
pub fn write_packing(path: &Path, packing: &Packing<3>) -> Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    for particle in packing {
        for value in [
            particle.center[0],
            particle.center[1],
            particle.center[2],
            particle.diameter,
        ] {
            writer.write_all(&value.to_le_bytes())?;
        }
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use float_cmp::assert_approx_eq;

    fn sample_packing() -> Packing<3> {
        vec![
            Particle::new(0, 1.0, Vector::from([0.25, 5.5, 9.75])),
            Particle::new(1, 0.5, Vector::from([3.0, 2.0, 1.0])),
        ]
    }

    #[test]
    fn packing_survives_a_round_trip() {
        let path = std::env::temp_dir().join("packgen_roundtrip.xyzd");
        let packing = sample_packing();

        write_packing(&path, &packing).unwrap();
        let read_back = read_packing(&path, false).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(read_back.len(), packing.len());
        for (original, restored) in packing.iter().zip(&read_back) {
            assert_eq!(original.index, restored.index);
            assert_approx_eq!(f64, original.diameter, restored.diameter, ulps = 0);
            for axis in 0..3 {
                assert_approx_eq!(f64, original.center[axis], restored.center[axis], ulps = 0);
            }
        }
    }

    #[test]
    fn byte_swapped_files_are_recovered() {
        let path = std::env::temp_dir().join("packgen_swapped.xyzd");
        let packing = sample_packing();

        // Emulate a big-endian writer.
        let mut bytes = Vec::new();
        for particle in &packing {
            for value in [
                particle.center[0],
                particle.center[1],
                particle.center[2],
                particle.diameter,
            ] {
                bytes.extend_from_slice(&value.to_be_bytes());
            }
        }
        std::fs::write(&path, &bytes).unwrap();

        let read_back = read_packing(&path, true).unwrap();
        std::fs::remove_file(&path).ok();

        assert_approx_eq!(f64, read_back[0].center[2], 9.75, ulps = 0);
        assert_approx_eq!(f64, read_back[1].diameter, 0.5, ulps = 0);
    }

    #[test]
    fn truncated_files_are_rejected() {
        let path = std::env::temp_dir().join("packgen_truncated.xyzd");
        std::fs::write(&path, [0_u8; 17]).unwrap();

        let result = read_packing(&path, false);
        std::fs::remove_file(&path).ok();
        assert!(matches!(result, Err(Error::Config(_))));
    }
}

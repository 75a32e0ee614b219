//! Binary checkpoint format for trained fields.
//!
//! File layout (all little-endian):
//! ```text
//! Magic: "UDFCKPT\0" (8 bytes)
//! Version: u32
//! Iteration counter: u64
//! Hidden layer count: u32, then one u32 width per hidden layer
//! Parameter count: u64
//! Parameters: f32 × count
//! ```

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use super::LoadError;

const MAGIC: &[u8; 8] = b"UDFCKPT\0";
const VERSION: u32 = 1;

/// A loaded checkpoint: enough to rebuild the field and resume the
/// iteration counter.
#[derive(Debug, Clone)]
pub struct Checkpoint {
    pub iteration: u64,
    pub hidden: Vec<usize>,
    pub params: Vec<f32>,
}

pub fn save_checkpoint(
    path: &Path,
    iteration: u64,
    hidden: &[usize],
    params: &[f32],
) -> Result<(), LoadError> {
    let mut w = BufWriter::new(File::create(path)?);

    std::io::Write::write_all(&mut w, MAGIC)?;
    w.write_u32::<LittleEndian>(VERSION)?;
    w.write_u64::<LittleEndian>(iteration)?;

    w.write_u32::<LittleEndian>(hidden.len() as u32)?;
    for &h in hidden {
        w.write_u32::<LittleEndian>(h as u32)?;
    }

    w.write_u64::<LittleEndian>(params.len() as u64)?;
    for &p in params {
        w.write_f32::<LittleEndian>(p)?;
    }

    Ok(())
}

pub fn load_checkpoint(path: &Path) -> Result<Checkpoint, LoadError> {
    let mut r = BufReader::new(File::open(path)?);

    let mut magic = [0u8; 8];
    std::io::Read::read_exact(&mut r, &mut magic)?;
    if &magic != MAGIC {
        return Err(LoadError::InvalidMagic("checkpoint"));
    }

    let version = r.read_u32::<LittleEndian>()?;
    if version != VERSION {
        return Err(LoadError::UnsupportedVersion(version));
    }

    let iteration = r.read_u64::<LittleEndian>()?;

    let layer_count = r.read_u32::<LittleEndian>()? as usize;
    let mut hidden = Vec::with_capacity(layer_count);
    for _ in 0..layer_count {
        hidden.push(r.read_u32::<LittleEndian>()? as usize);
    }

    let param_count = r.read_u64::<LittleEndian>()? as usize;
    let mut params = Vec::with_capacity(param_count);
    for _ in 0..param_count {
        params.push(r.read_f32::<LittleEndian>()?);
    }

    Ok(Checkpoint {
        iteration,
        hidden,
        params,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_checkpoint_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ckpt_040000.udf");

        let params: Vec<f32> = (0..257).map(|i| (i as f32) * 0.01 - 1.0).collect();
        save_checkpoint(&path, 40_000, &[64, 64], &params).unwrap();

        let loaded = load_checkpoint(&path).unwrap();
        assert_eq!(loaded.iteration, 40_000);
        assert_eq!(loaded.hidden, vec![64, 64]);
        assert_eq!(loaded.params.len(), params.len());
        for (a, b) in params.iter().zip(loaded.params.iter()) {
            assert_relative_eq!(*a, *b);
        }
    }

    #[test]
    fn test_checkpoint_rejects_wrong_magic() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bogus.udf");
        std::fs::write(&path, b"NOTACKPT00000000000000").unwrap();
        match load_checkpoint(&path) {
            Err(LoadError::InvalidMagic(_)) => {}
            other => panic!("expected InvalidMagic, got {other:?}"),
        }
    }
}

//! Query-cache artifact.
//!
//! The generated supervision set is expensive to build, so it is persisted
//! once per dataset and reloaded on later runs. Absence of the file is the
//! only cache-miss signal; a file that fails to decode is reported as an
//! error rather than silently regenerated over.
//!
//! Layout (little-endian):
//! ```text
//! Magic: "UDFQRY\0\0" (8 bytes)
//! Version: u32
//! Query count: u64
//! Cloud count: u64
//! Queries:  f32 × 3 × query count
//! Nearest:  f32 × 3 × query count
//! Cloud:    f32 × 3 × cloud count
//! ```

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use nalgebra::Vector3;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use crate::query::QuerySet;

use super::LoadError;

const MAGIC: &[u8; 8] = b"UDFQRY\0\0";
const VERSION: u32 = 1;

pub fn save_query_set(set: &QuerySet, path: &Path) -> Result<(), LoadError> {
    let mut w = BufWriter::new(File::create(path)?);

    std::io::Write::write_all(&mut w, MAGIC)?;
    w.write_u32::<LittleEndian>(VERSION)?;
    w.write_u64::<LittleEndian>(set.queries.len() as u64)?;
    w.write_u64::<LittleEndian>(set.cloud.len() as u64)?;

    for block in [&set.queries, &set.nearest, &set.cloud] {
        for p in block.iter() {
            w.write_f32::<LittleEndian>(p.x)?;
            w.write_f32::<LittleEndian>(p.y)?;
            w.write_f32::<LittleEndian>(p.z)?;
        }
    }

    Ok(())
}

pub fn load_query_set(path: &Path) -> Result<QuerySet, LoadError> {
    let mut r = BufReader::new(File::open(path)?);

    let mut magic = [0u8; 8];
    std::io::Read::read_exact(&mut r, &mut magic)?;
    if &magic != MAGIC {
        return Err(LoadError::InvalidMagic("query cache"));
    }

    let version = r.read_u32::<LittleEndian>()?;
    if version != VERSION {
        return Err(LoadError::UnsupportedVersion(version));
    }

    let query_count = r.read_u64::<LittleEndian>()? as usize;
    let cloud_count = r.read_u64::<LittleEndian>()? as usize;

    let mut read_block = |count: usize| -> Result<Vec<Vector3<f32>>, LoadError> {
        let mut block = Vec::with_capacity(count);
        for _ in 0..count {
            let x = r.read_f32::<LittleEndian>()?;
            let y = r.read_f32::<LittleEndian>()?;
            let z = r.read_f32::<LittleEndian>()?;
            block.push(Vector3::new(x, y, z));
        }
        Ok(block)
    };

    let queries = read_block(query_count)?;
    let nearest = read_block(query_count)?;
    let cloud = read_block(cloud_count)?;

    if cloud.is_empty() || queries.is_empty() {
        return Err(LoadError::InvalidFormat(
            "query cache holds no data".to_string(),
        ));
    }

    Ok(QuerySet {
        queries,
        nearest,
        cloud,
    })
}

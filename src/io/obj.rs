//! OBJ mesh export.
//!
//! ```text
//! v x y z           # Vertex positions
//! vn nx ny nz       # Vertex normals (written when present)
//! f i//i j//j k//k  # Triangles, 1-based indices
//! ```

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::core::Mesh;

use super::LoadError;

pub fn save_obj(mesh: &Mesh, path: &Path) -> Result<(), LoadError> {
    let mut file = BufWriter::new(File::create(path)?);

    for v in &mesh.vertices {
        writeln!(file, "v {} {} {}", v.x, v.y, v.z)?;
    }

    let with_normals = mesh.normals.len() == mesh.vertices.len();
    if with_normals {
        for n in &mesh.normals {
            writeln!(file, "vn {} {} {}", n.x, n.y, n.z)?;
        }
    }

    for t in &mesh.triangles {
        let (a, b, c) = (t[0] + 1, t[1] + 1, t[2] + 1);
        if with_normals {
            writeln!(file, "f {a}//{a} {b}//{b} {c}//{c}")?;
        } else {
            writeln!(file, "f {a} {b} {c}")?;
        }
    }

    Ok(())
}

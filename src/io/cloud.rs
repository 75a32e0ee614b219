//! Point cloud loaders and XYZ snapshots.
//!
//! Three input formats are accepted, dispatched on extension:
//! - `.ply`  ASCII polygon files; only the vertex element is read
//! - `.xyz`  whitespace-separated coordinate tables, one point per line
//! - `.npy`  NumPy arrays of shape (N, 3), dtype `<f4` or `<f8`, C order
//!
//! Anything else is a fatal [`LoadError::UnsupportedFormat`]; a loader never
//! yields a partial cloud.

use byteorder::{LittleEndian, ReadBytesExt};
use nalgebra::Vector3;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::Path;

use super::LoadError;

/// Load a point cloud as an N×3 float array.
pub fn load_point_cloud(path: &Path) -> Result<Vec<Vector3<f32>>, LoadError> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();

    let points = match ext.as_str() {
        "ply" => load_ply(path)?,
        "xyz" => load_xyz(path)?,
        "npy" => load_npy(path)?,
        other => return Err(LoadError::UnsupportedFormat(other.to_string())),
    };

    if points.is_empty() {
        return Err(LoadError::InvalidFormat(format!(
            "{} contains no points",
            path.display()
        )));
    }
    Ok(points)
}

/// Write a cloud as plain-text `x y z` lines (diagnostic snapshots).
pub fn save_xyz(points: &[Vector3<f32>], path: &Path) -> Result<(), LoadError> {
    let mut file = BufWriter::new(File::create(path)?);
    for p in points {
        writeln!(file, "{} {} {}", p.x, p.y, p.z)?;
    }
    Ok(())
}

fn load_xyz(path: &Path) -> Result<Vec<Vector3<f32>>, LoadError> {
    let reader = BufReader::new(File::open(path)?);
    let mut points = Vec::new();
    for (lineno, line) in reader.lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let mut it = trimmed.split_whitespace();
        let mut coord = [0.0f32; 3];
        for slot in &mut coord {
            *slot = it
                .next()
                .and_then(|t| t.parse::<f32>().ok())
                .ok_or_else(|| {
                    LoadError::InvalidFormat(format!("bad coordinate on line {}", lineno + 1))
                })?;
        }
        // Extra columns (normals, colors) are ignored.
        points.push(Vector3::new(coord[0], coord[1], coord[2]));
    }
    Ok(points)
}

fn load_ply(path: &Path) -> Result<Vec<Vector3<f32>>, LoadError> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut line = String::new();

    reader.read_line(&mut line)?;
    if line.trim() != "ply" {
        return Err(LoadError::InvalidMagic("PLY"));
    }

    let mut vertex_count = 0usize;
    let mut in_vertex_element = false;
    let mut xyz_cols = [usize::MAX; 3];
    let mut vertex_props = 0usize;

    loop {
        line.clear();
        if reader.read_line(&mut line)? == 0 {
            return Err(LoadError::InvalidFormat("missing end_header".to_string()));
        }
        let tokens: Vec<&str> = line.split_whitespace().collect();
        match tokens.as_slice() {
            ["format", kind, _] => {
                if *kind != "ascii" {
                    return Err(LoadError::InvalidFormat(format!(
                        "only ascii PLY is supported, got {kind}"
                    )));
                }
            }
            ["element", "vertex", count] => {
                vertex_count = count.parse().map_err(|_| {
                    LoadError::InvalidFormat("bad vertex count".to_string())
                })?;
                in_vertex_element = true;
            }
            ["element", ..] => in_vertex_element = false,
            ["property", _, name] if in_vertex_element => {
                match *name {
                    "x" => xyz_cols[0] = vertex_props,
                    "y" => xyz_cols[1] = vertex_props,
                    "z" => xyz_cols[2] = vertex_props,
                    _ => {}
                }
                vertex_props += 1;
            }
            ["end_header"] => break,
            _ => {}
        }
    }

    if xyz_cols.contains(&usize::MAX) {
        return Err(LoadError::InvalidFormat(
            "vertex element lacks x/y/z properties".to_string(),
        ));
    }

    let mut points = Vec::with_capacity(vertex_count);
    for _ in 0..vertex_count {
        line.clear();
        if reader.read_line(&mut line)? == 0 {
            return Err(LoadError::InvalidFormat(
                "fewer vertex lines than declared".to_string(),
            ));
        }
        let cols: Vec<&str> = line.split_whitespace().collect();
        let mut coord = [0.0f32; 3];
        for (axis, &col) in xyz_cols.iter().enumerate() {
            coord[axis] = cols
                .get(col)
                .and_then(|t| t.parse::<f32>().ok())
                .ok_or_else(|| {
                    LoadError::InvalidFormat("bad vertex coordinate".to_string())
                })?;
        }
        points.push(Vector3::new(coord[0], coord[1], coord[2]));
    }

    Ok(points)
}

/// Minimal NPY reader for (N, 3) float arrays.
fn load_npy(path: &Path) -> Result<Vec<Vector3<f32>>, LoadError> {
    let mut reader = BufReader::new(File::open(path)?);

    let mut magic = [0u8; 6];
    reader.read_exact(&mut magic)?;
    if &magic != b"\x93NUMPY" {
        return Err(LoadError::InvalidMagic("NPY"));
    }

    let major = reader.read_u8()?;
    let _minor = reader.read_u8()?;
    let header_len = match major {
        1 => reader.read_u16::<LittleEndian>()? as usize,
        2 | 3 => reader.read_u32::<LittleEndian>()? as usize,
        v => return Err(LoadError::UnsupportedVersion(v as u32)),
    };

    let mut header = vec![0u8; header_len];
    reader.read_exact(&mut header)?;
    let header = String::from_utf8_lossy(&header);

    let descr = dict_value(&header, "descr")
        .ok_or_else(|| LoadError::InvalidFormat("npy header lacks descr".to_string()))?;
    let wide = match descr.trim_matches(|c| c == '\'' || c == '"') {
        "<f4" => false,
        "<f8" => true,
        other => {
            return Err(LoadError::InvalidFormat(format!(
                "unsupported npy dtype {other}"
            )))
        }
    };

    if dict_value(&header, "fortran_order").map(|v| v.trim().to_string())
        != Some("False".to_string())
    {
        return Err(LoadError::InvalidFormat(
            "fortran-order npy arrays are not supported".to_string(),
        ));
    }

    let shape = dict_value(&header, "shape")
        .ok_or_else(|| LoadError::InvalidFormat("npy header lacks shape".to_string()))?;
    let dims: Vec<usize> = shape
        .trim_matches(|c| c == '(' || c == ')')
        .split(',')
        .map(|t| t.trim())
        .filter(|t| !t.is_empty())
        .map(|t| {
            t.parse::<usize>()
                .map_err(|_| LoadError::InvalidFormat(format!("bad npy shape token {t}")))
        })
        .collect::<Result<_, _>>()?;
    if dims.len() != 2 || dims[1] != 3 {
        return Err(LoadError::InvalidFormat(format!(
            "expected an (N, 3) array, got shape {shape}"
        )));
    }

    let n = dims[0];
    let mut points = Vec::with_capacity(n);
    for _ in 0..n {
        let mut coord = [0.0f32; 3];
        for slot in &mut coord {
            *slot = if wide {
                reader.read_f64::<LittleEndian>()? as f32
            } else {
                reader.read_f32::<LittleEndian>()?
            };
        }
        points.push(Vector3::new(coord[0], coord[1], coord[2]));
    }

    Ok(points)
}

/// Pull `'key': value` out of the NPY header dict without a real parser.
fn dict_value(header: &str, key: &str) -> Option<String> {
    let needle = format!("'{key}':");
    let start = header.find(&needle)? + needle.len();
    let rest = &header[start..];
    // Values end at the next top-level comma; shape tuples contain one, so
    // track parenthesis depth.
    let mut depth = 0i32;
    let mut end = rest.len();
    for (i, c) in rest.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => depth -= 1,
            ',' if depth == 0 => {
                end = i;
                break;
            }
            '}' if depth == 0 => {
                end = i;
                break;
            }
            _ => {}
        }
    }
    Some(rest[..end].trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    fn write_temp(name: &str, bytes: &[u8]) -> (tempfile::TempDir, std::path::PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(name);
        File::create(&path).unwrap().write_all(bytes).unwrap();
        (dir, path)
    }

    #[test]
    fn test_xyz_roundtrip() {
        let points = vec![
            Vector3::new(0.5, -1.25, 3.0),
            Vector3::new(1e-3, 2.0, -7.5),
        ];
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cloud.xyz");
        save_xyz(&points, &path).unwrap();

        let loaded = load_point_cloud(&path).unwrap();
        assert_eq!(loaded.len(), 2);
        for (a, b) in points.iter().zip(loaded.iter()) {
            assert!((a - b).norm() < 1e-6);
        }
    }

    #[test]
    fn test_ply_ascii_with_extra_properties() {
        let ply = b"ply\n\
format ascii 1.0\n\
comment made by hand\n\
element vertex 2\n\
property float x\n\
property float y\n\
property float z\n\
property uchar red\n\
end_header\n\
1.0 2.0 3.0 255\n\
-1.0 0.5 0.25 0\n";
        let (_dir, path) = write_temp("cloud.ply", ply);
        let points = load_point_cloud(&path).unwrap();
        assert_eq!(points.len(), 2);
        assert_eq!(points[0], Vector3::new(1.0, 2.0, 3.0));
        assert_eq!(points[1], Vector3::new(-1.0, 0.5, 0.25));
    }

    #[test]
    fn test_npy_f4_load() {
        // Hand-built v1.0 NPY: (2, 3) little-endian f32, C order.
        let mut header =
            b"{'descr': '<f4', 'fortran_order': False, 'shape': (2, 3), }".to_vec();
        while (10 + header.len() + 1) % 64 != 0 {
            header.push(b' ');
        }
        header.push(b'\n');

        let mut bytes = Vec::new();
        bytes.extend_from_slice(b"\x93NUMPY");
        bytes.push(1);
        bytes.push(0);
        bytes.extend_from_slice(&(header.len() as u16).to_le_bytes());
        bytes.extend_from_slice(&header);
        for v in [1.0f32, 2.0, 3.0, -4.0, -5.0, -6.0] {
            bytes.extend_from_slice(&v.to_le_bytes());
        }

        let (_dir, path) = write_temp("cloud.npy", &bytes);
        let points = load_point_cloud(&path).unwrap();
        assert_eq!(points.len(), 2);
        assert_eq!(points[1], Vector3::new(-4.0, -5.0, -6.0));
    }

    #[test]
    fn test_unsupported_extension_is_fatal() {
        let (_dir, path) = write_temp("cloud.stl", b"whatever");
        match load_point_cloud(&path) {
            Err(LoadError::UnsupportedFormat(ext)) => assert_eq!(ext, "stl"),
            other => panic!("expected UnsupportedFormat, got {other:?}"),
        }
    }
}

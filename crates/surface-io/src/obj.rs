//! Wavefront OBJ reading and writing.
//!
//! Supports the subset of OBJ relevant to registration surfaces:
//!
//! - `v x y z` - vertex positions
//! - `vn nx ny nz` - vertex normals (optional)
//! - `f a b c ...` - faces, 1-indexed, in the `a`, `a/t`, `a//n` and
//!   `a/t/n` corner forms; polygons are fan-triangulated
//!
//! Texture coordinates, groups, materials and object names are skipped.
//! Meshes without normals get them computed from face connectivity; non-unit
//! input normals are renormalized with a warning.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use nalgebra::Vector3;
use surface_types::{SurfaceMesh, Vertex};
use tracing::{debug, warn};

use crate::error::{ObjError, ObjResult};

/// Loads a registration surface from an OBJ file.
///
/// # Errors
///
/// Returns an error if the file cannot be read, a record is malformed, a
/// face references a missing vertex, or the file defines no vertices.
///
/// # Example
///
/// ```no_run
/// use surface_io::load_obj;
///
/// let mesh = load_obj("scan.obj").unwrap();
/// println!("loaded {} vertices", mesh.vertex_count());
/// ```
pub fn load_obj<P: AsRef<Path>>(path: P) -> ObjResult<SurfaceMesh> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            ObjError::FileNotFound {
                path: path.to_path_buf(),
            }
        } else {
            ObjError::Io(e)
        }
    })?;

    let reader = BufReader::new(file);

    let mut mesh = SurfaceMesh::new();
    let mut normals: Vec<Vector3<f64>> = Vec::new();
    // Corner-normal assignments, applied after parsing: vertex row -> normal row.
    let mut normal_assignments: Vec<(usize, usize)> = Vec::new();

    for (line_idx, line) in reader.lines().enumerate() {
        let line = line?;
        let line_no = line_idx + 1;
        let trimmed = line.trim();

        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        let mut tokens = trimmed.split_whitespace();
        let Some(keyword) = tokens.next() else {
            continue;
        };

        match keyword {
            "v" => {
                let [x, y, z] = parse_three_floats(&mut tokens, path, line_no, "v")?;
                mesh.push_vertex(Vertex::from_coords(x, y, z));
            }
            "vn" => {
                let [x, y, z] = parse_three_floats(&mut tokens, path, line_no, "vn")?;
                normals.push(Vector3::new(x, y, z));
            }
            "f" => {
                let mut corners: Vec<(usize, Option<usize>)> = Vec::with_capacity(4);
                for token in tokens {
                    corners.push(parse_face_corner(
                        token,
                        mesh.vertex_count(),
                        normals.len(),
                        path,
                        line_no,
                    )?);
                }
                if corners.len() < 3 {
                    return Err(ObjError::InvalidContent {
                        path: path.to_path_buf(),
                        line: line_no,
                        message: format!("face has {} corners, need at least 3", corners.len()),
                    });
                }

                for (vertex_row, normal_row) in &corners {
                    if let Some(n) = normal_row {
                        normal_assignments.push((*vertex_row, *n));
                    }
                }

                // Fan triangulation preserves winding for convex polygons.
                for i in 1..corners.len() - 1 {
                    mesh.faces.push([
                        corners[0].0 as u32,
                        corners[i].0 as u32,
                        corners[i + 1].0 as u32,
                    ]);
                }
            }
            // vt, g, o, s, usemtl, mtllib and friends carry no geometry we need.
            _ => {}
        }
    }

    if mesh.is_empty() {
        return Err(ObjError::EmptyMesh {
            path: path.to_path_buf(),
        });
    }

    if normal_assignments.is_empty() {
        debug!(path = %path.display(), "OBJ has no usable normals, computing from faces");
        mesh.compute_vertex_normals();
    } else {
        let mut fixed = 0usize;
        for (vertex_row, normal_row) in normal_assignments {
            let mut normal = normals[normal_row];
            let norm = normal.norm();
            if (norm - 1.0).abs() > 1e-6 {
                if norm < 1e-12 {
                    continue;
                }
                normal /= norm;
                fixed += 1;
            }
            mesh.vertices[vertex_row].normal = normal;
        }
        if fixed > 0 {
            warn!(
                path = %path.display(),
                count = fixed,
                "renormalized non-unit input normals"
            );
        }
    }

    debug!(
        path = %path.display(),
        vertices = mesh.vertex_count(),
        faces = mesh.face_count(),
        "loaded OBJ"
    );

    Ok(mesh)
}

/// Saves a registration surface to an OBJ file.
///
/// Writes positions, per-vertex normals, and `f v//n` faces.
///
/// # Errors
///
/// Returns an error if the file cannot be created or written.
///
/// # Example
///
/// ```no_run
/// use surface_io::save_obj;
/// use surface_types::unit_cube;
///
/// save_obj(&unit_cube(), "cube.obj").unwrap();
/// ```
pub fn save_obj<P: AsRef<Path>>(mesh: &SurfaceMesh, path: P) -> ObjResult<()> {
    let path = path.as_ref();
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);

    writeln!(writer, "# {} vertices, {} faces", mesh.vertex_count(), mesh.face_count())?;

    for v in &mesh.vertices {
        writeln!(writer, "v {} {} {}", v.position.x, v.position.y, v.position.z)?;
    }
    for v in &mesh.vertices {
        writeln!(writer, "vn {} {} {}", v.normal.x, v.normal.y, v.normal.z)?;
    }
    for face in &mesh.faces {
        writeln!(
            writer,
            "f {0}//{0} {1}//{1} {2}//{2}",
            face[0] + 1,
            face[1] + 1,
            face[2] + 1
        )?;
    }

    writer.flush()?;
    Ok(())
}

/// Loads a floating/target mesh pair in one call.
///
/// This is the usual entry point for registration: both meshes are needed
/// before anything can run.
///
/// # Errors
///
/// Returns the first error encountered while loading either mesh.
pub fn read_obj_files<P: AsRef<Path>, Q: AsRef<Path>>(
    floating_path: P,
    target_path: Q,
) -> ObjResult<(SurfaceMesh, SurfaceMesh)> {
    let floating = load_obj(floating_path)?;
    let target = load_obj(target_path)?;
    Ok((floating, target))
}

/// Saves a registered mesh to an OBJ file.
///
/// Companion to [`read_obj_files`]; identical to [`save_obj`].
///
/// # Errors
///
/// Returns an error if the file cannot be written.
pub fn write_obj_files<P: AsRef<Path>>(mesh: &SurfaceMesh, path: P) -> ObjResult<()> {
    save_obj(mesh, path)
}

fn parse_three_floats<'a, I: Iterator<Item = &'a str>>(
    tokens: &mut I,
    path: &Path,
    line: usize,
    keyword: &str,
) -> ObjResult<[f64; 3]> {
    let mut values = [0.0; 3];
    for value in &mut values {
        let token = tokens.next().ok_or_else(|| ObjError::InvalidContent {
            path: path.to_path_buf(),
            line,
            message: format!("'{keyword}' record needs three components"),
        })?;
        *value = token.parse().map_err(|_| ObjError::InvalidContent {
            path: path.to_path_buf(),
            line,
            message: format!("'{token}' is not a number"),
        })?;
    }
    Ok(values)
}

/// Parses one face corner (`a`, `a/t`, `a//n` or `a/t/n`) into 0-based
/// vertex and optional normal rows.
fn parse_face_corner(
    token: &str,
    vertex_count: usize,
    normal_count: usize,
    path: &Path,
    line: usize,
) -> ObjResult<(usize, Option<usize>)> {
    let mut parts = token.split('/');

    let vertex_part = parts.next().unwrap_or("");
    let vertex_row = resolve_index(vertex_part, vertex_count, path, line)?;

    // Skip the texture index, keep the normal index if present.
    let _texture = parts.next();
    let normal_row = match parts.next() {
        Some(normal_part) if !normal_part.is_empty() => {
            Some(resolve_index(normal_part, normal_count, path, line)?)
        }
        _ => None,
    };

    Ok((vertex_row, normal_row))
}

/// Resolves a 1-based (or negative, relative) OBJ index to a 0-based row.
fn resolve_index(token: &str, count: usize, path: &Path, line: usize) -> ObjResult<usize> {
    let index: i64 = token.parse().map_err(|_| ObjError::InvalidContent {
        path: path.to_path_buf(),
        line,
        message: format!("'{token}' is not an index"),
    })?;

    let row = if index > 0 {
        index - 1
    } else if index < 0 {
        count as i64 + index
    } else {
        -1
    };

    if row < 0 || row >= count as i64 {
        return Err(ObjError::IndexOutOfRange {
            path: path.to_path_buf(),
            line,
            index,
            vertex_count: count,
        });
    }

    Ok(row as usize)
}

//! Parametric test surfaces.
//!
//! Synthetic meshes used throughout the registration test suites. They are
//! exported so downstream crates can build scenario fixtures without
//! duplicating the generators.

use std::f64::consts::PI;

use crate::{SurfaceMesh, Vertex};

/// Creates a UV sphere of the given radius centered at the origin.
///
/// `rings` latitudinal bands and `segments` longitudinal slices; the poles
/// are single vertices. Vertex count is `rings * segments + 2` for
/// `rings >= 1`, `segments >= 3`.
///
/// # Panics
///
/// Panics if `rings < 1` or `segments < 3`.
///
/// # Example
///
/// ```
/// use surface_types::uv_sphere;
///
/// let sphere = uv_sphere(1.0, 7, 14);
/// assert_eq!(sphere.vertex_count(), 100);
/// ```
#[must_use]
pub fn uv_sphere(radius: f64, rings: usize, segments: usize) -> SurfaceMesh {
    assert!(rings >= 1, "sphere needs at least one ring");
    assert!(segments >= 3, "sphere needs at least three segments");

    let mut mesh = SurfaceMesh::with_capacity(rings * segments + 2, 2 * rings * segments);

    // North pole, ring vertices, south pole.
    mesh.push_vertex(Vertex::from_coords(0.0, 0.0, radius));
    for ring in 1..=rings {
        let theta = PI * ring as f64 / (rings + 1) as f64;
        for segment in 0..segments {
            let phi = 2.0 * PI * segment as f64 / segments as f64;
            mesh.push_vertex(Vertex::from_coords(
                radius * theta.sin() * phi.cos(),
                radius * theta.sin() * phi.sin(),
                radius * theta.cos(),
            ));
        }
    }
    mesh.push_vertex(Vertex::from_coords(0.0, 0.0, -radius));

    let ring_start = |ring: usize| 1 + (ring - 1) * segments;
    let south = (mesh.vertex_count() - 1) as u32;

    // Cap fans.
    for segment in 0..segments {
        let next = (segment + 1) % segments;
        mesh.faces.push([
            0,
            (ring_start(1) + segment) as u32,
            (ring_start(1) + next) as u32,
        ]);
        mesh.faces.push([
            south,
            (ring_start(rings) + next) as u32,
            (ring_start(rings) + segment) as u32,
        ]);
    }

    // Quad strips between rings.
    for ring in 1..rings {
        for segment in 0..segments {
            let next = (segment + 1) % segments;
            let a = (ring_start(ring) + segment) as u32;
            let b = (ring_start(ring) + next) as u32;
            let c = (ring_start(ring + 1) + next) as u32;
            let d = (ring_start(ring + 1) + segment) as u32;
            mesh.faces.push([a, c, b]);
            mesh.faces.push([a, d, c]);
        }
    }

    mesh.compute_vertex_normals();
    mesh
}

/// Creates a flat triangulated disk of the given radius in the z=0 plane.
///
/// A regular grid of `rings` concentric rings with `segments` spokes around
/// a center vertex. Vertex count is `rings * segments + 1`.
///
/// # Panics
///
/// Panics if `rings < 1` or `segments < 3`.
#[must_use]
pub fn flat_disk(radius: f64, rings: usize, segments: usize) -> SurfaceMesh {
    assert!(rings >= 1, "disk needs at least one ring");
    assert!(segments >= 3, "disk needs at least three segments");

    let mut mesh = SurfaceMesh::with_capacity(rings * segments + 1, 2 * rings * segments);

    mesh.push_vertex(Vertex::from_coords(0.0, 0.0, 0.0));
    for ring in 1..=rings {
        let r = radius * ring as f64 / rings as f64;
        for segment in 0..segments {
            let phi = 2.0 * PI * segment as f64 / segments as f64;
            mesh.push_vertex(Vertex::from_coords(r * phi.cos(), r * phi.sin(), 0.0));
        }
    }

    let ring_start = |ring: usize| 1 + (ring - 1) * segments;

    // Center fan.
    for segment in 0..segments {
        let next = (segment + 1) % segments;
        mesh.faces.push([
            0,
            (ring_start(1) + segment) as u32,
            (ring_start(1) + next) as u32,
        ]);
    }

    // Quad strips between rings, wound to match the center fan (+z).
    for ring in 1..rings {
        for segment in 0..segments {
            let next = (segment + 1) % segments;
            let a = (ring_start(ring) + segment) as u32;
            let b = (ring_start(ring) + next) as u32;
            let c = (ring_start(ring + 1) + next) as u32;
            let d = (ring_start(ring + 1) + segment) as u32;
            mesh.faces.push([a, d, c]);
            mesh.faces.push([a, c, b]);
        }
    }

    mesh.compute_vertex_normals();
    mesh
}

//! Mesh data structures and generation

use crate::backend::types::{PrimitiveTopology, Vertex};
use glam::{Vec2, Vec3};
use thiserror::Error;

/// Mesh generation error
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MeshError {
    #[error("Invalid mesh argument: {0}")]
    InvalidArgument(String),
}

/// How the index buffer of a mesh is meant to be drawn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MeshTopology {
    #[default]
    TriangleList,
    /// One continuous strip; rows are joined with degenerate triangles
    TriangleStrip,
}

impl MeshTopology {
    pub fn primitive_topology(self) -> PrimitiveTopology {
        match self {
            MeshTopology::TriangleList => PrimitiveTopology::TriangleList,
            MeshTopology::TriangleStrip => PrimitiveTopology::TriangleStrip,
        }
    }
}

/// Treatment of the first and last latitude rows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PoleMode {
    /// Keep one vertex per column on the pole rows
    #[default]
    Preserve,
    /// Snap pole rows onto the axis and drop zero-area list triangles
    Collapse,
}

/// Parameters for [`build_sphere_with`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SphereOptions {
    pub radius: f32,
    pub width_segments: u32,
    pub height_segments: u32,
    pub topology: MeshTopology,
    pub poles: PoleMode,
}

impl Default for SphereOptions {
    fn default() -> Self {
        Self {
            radius: 2.0,
            width_segments: 64,
            height_segments: 32,
            topology: MeshTopology::TriangleList,
            poles: PoleMode::Preserve,
        }
    }
}

impl SphereOptions {
    pub fn new(radius: f32, width_segments: u32, height_segments: u32) -> Self {
        Self {
            radius,
            width_segments,
            height_segments,
            ..Default::default()
        }
    }

    pub fn with_topology(mut self, topology: MeshTopology) -> Self {
        self.topology = topology;
        self
    }

    pub fn with_poles(mut self, poles: PoleMode) -> Self {
        self.poles = poles;
        self
    }

    fn validate(&self) -> Result<(), MeshError> {
        if self.width_segments < 2 {
            return Err(MeshError::InvalidArgument(format!(
                "width_segments must be at least 2, got {}",
                self.width_segments
            )));
        }
        if self.height_segments < 2 {
            return Err(MeshError::InvalidArgument(format!(
                "height_segments must be at least 2, got {}",
                self.height_segments
            )));
        }
        // Every vertex must stay addressable by a u32 index
        let vertex_count = self.width_segments as u64 * self.height_segments as u64;
        if vertex_count > u32::MAX as u64 + 1 {
            return Err(MeshError::InvalidArgument(format!(
                "{}x{} grid has {} vertices, more than u32 indices can address",
                self.width_segments, self.height_segments, vertex_count
            )));
        }
        if !self.radius.is_finite() || self.radius <= 0.0 {
            return Err(MeshError::InvalidArgument(format!(
                "radius must be finite and positive, got {}",
                self.radius
            )));
        }
        Ok(())
    }
}

/// A mesh with vertex and index data
#[derive(Debug, Clone, PartialEq)]
pub struct Mesh {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
    pub topology: MeshTopology,
    pub name: String,
}

impl Mesh {
    pub fn new(name: &str) -> Self {
        Self {
            vertices: Vec::new(),
            indices: Vec::new(),
            topology: MeshTopology::TriangleList,
            name: name.to_string(),
        }
    }

    /// Calculate vertex count
    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    /// Calculate index count
    pub fn index_count(&self) -> usize {
        self.indices.len()
    }

    /// Get vertex data as bytes
    pub fn vertex_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.vertices)
    }

    /// Get index data as bytes
    pub fn index_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.indices)
    }

    /// Full-screen quad in clip space, uv origin at the top left
    pub fn quad() -> Self {
        let mut mesh = Mesh::new("quad");
        mesh.vertices = vec![
            Vertex::new(Vec3::new(-1.0, -1.0, 0.0), Vec2::new(0.0, 1.0)),
            Vertex::new(Vec3::new(1.0, -1.0, 0.0), Vec2::new(1.0, 1.0)),
            Vertex::new(Vec3::new(1.0, 1.0, 0.0), Vec2::new(1.0, 0.0)),
            Vertex::new(Vec3::new(-1.0, 1.0, 0.0), Vec2::new(0.0, 0.0)),
        ];
        mesh.indices = vec![0, 1, 2, 0, 2, 3];
        mesh
    }
}

/// Build a UV sphere with default topology and pole handling.
///
/// Vertices span longitude -180°..180° across columns and latitude -90°..90°
/// across rows, in a z-up frame. Both seam columns and both pole rows are
/// kept as separate vertices, so the mesh has exactly
/// `width_segments * height_segments` vertices.
pub fn build_sphere(radius: f32, width_segments: u32, height_segments: u32) -> Result<Mesh, MeshError> {
    build_sphere_with(&SphereOptions::new(radius, width_segments, height_segments))
}

pub fn build_sphere_with(options: &SphereOptions) -> Result<Mesh, MeshError> {
    options.validate()?;

    let w = options.width_segments;
    let h = options.height_segments;
    let radius = options.radius;
    let collapse = options.poles == PoleMode::Collapse;

    let mut mesh = Mesh::new("sphere");
    mesh.topology = options.topology;
    mesh.vertices.reserve(w as usize * h as usize);

    let lon_step = 360.0 / (w - 1) as f32;
    let lat_step = 180.0 / (h - 1) as f32;

    for row in 0..h {
        let lat = (-90.0 + row as f32 * lat_step).to_radians();
        let pole = collapse && (row == 0 || row == h - 1);

        for col in 0..w {
            let lon = (-180.0 + col as f32 * lon_step).to_radians();

            let position = if pole {
                let sign = if row == 0 { -1.0 } else { 1.0 };
                Vec3::new(0.0, 0.0, sign * radius)
            } else {
                radius * Vec3::new(lat.cos() * lon.cos(), lat.cos() * lon.sin(), lat.sin())
            };
            let uv = Vec2::new(
                col as f32 / (w - 1) as f32,
                1.0 - row as f32 / (h - 1) as f32,
            );

            mesh.vertices.push(Vertex::new(position, uv));
        }
    }

    match options.topology {
        MeshTopology::TriangleList => {
            mesh.indices.reserve((w as usize - 1) * (h as usize - 1) * 6);
            for row in 0..h - 1 {
                let bottom_pole = collapse && row == 0;
                let top_pole = collapse && row + 1 == h - 1;

                for col in 0..w - 1 {
                    let a = row * w + col;
                    let b = a + w;

                    // (a, a + 1) sit on the first row, (b, b + 1) on the last
                    if !bottom_pole {
                        mesh.indices.extend_from_slice(&[a, b, a + 1]);
                    }
                    if !top_pole {
                        mesh.indices.extend_from_slice(&[a + 1, b, b + 1]);
                    }
                }
            }
        }
        MeshTopology::TriangleStrip => {
            mesh.indices.reserve((h as usize - 1) * 2 * w as usize + (h as usize - 2) * 2);
            for row in 0..h - 1 {
                if row > 0 {
                    // Repeat the last index and the next first one; keeps parity
                    let last = row * w + (w - 1);
                    mesh.indices.push(last);
                    mesh.indices.push(row * w);
                }
                for col in 0..w {
                    mesh.indices.push(row * w + col);
                    mesh.indices.push((row + 1) * w + col);
                }
            }
        }
    }

    Ok(mesh)
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPSILON: f32 = 1e-5;

    fn all_options() -> Vec<SphereOptions> {
        let mut out = Vec::new();
        for topology in [MeshTopology::TriangleList, MeshTopology::TriangleStrip] {
            for poles in [PoleMode::Preserve, PoleMode::Collapse] {
                for (w, h) in [(2, 2), (3, 2), (2, 3), (17, 9), (64, 32)] {
                    out.push(
                        SphereOptions::new(1.5, w, h)
                            .with_topology(topology)
                            .with_poles(poles),
                    );
                }
            }
        }
        out
    }

    #[test]
    fn vertex_count_is_grid_size() {
        for options in all_options() {
            let mesh = build_sphere_with(&options).unwrap();
            assert_eq!(
                mesh.vertex_count(),
                (options.width_segments * options.height_segments) as usize
            );
        }
    }

    #[test]
    fn vertices_lie_on_sphere() {
        for options in all_options() {
            let mesh = build_sphere_with(&options).unwrap();
            for v in &mesh.vertices {
                let len = v.position.length();
                assert!(
                    (len - options.radius).abs() < EPSILON * options.radius,
                    "length {} for radius {}",
                    len,
                    options.radius
                );
            }
        }
    }

    #[test]
    fn uvs_are_in_unit_square() {
        for options in all_options() {
            let mesh = build_sphere_with(&options).unwrap();
            for v in &mesh.vertices {
                assert!((0.0..=1.0).contains(&v.uv.x));
                assert!((0.0..=1.0).contains(&v.uv.y));
            }
        }
    }

    #[test]
    fn indices_are_in_range() {
        for options in all_options() {
            let mesh = build_sphere_with(&options).unwrap();
            let count = mesh.vertex_count() as u32;
            assert!(mesh.indices.iter().all(|&i| i < count));
        }
    }

    #[test]
    fn generation_is_deterministic() {
        let options = SphereOptions::new(2.0, 33, 17).with_topology(MeshTopology::TriangleStrip);
        let first = build_sphere_with(&options).unwrap();
        let second = build_sphere_with(&options).unwrap();
        assert_eq!(first.vertex_bytes(), second.vertex_bytes());
        assert_eq!(first.indices, second.indices);
    }

    #[test]
    fn rejects_degenerate_grids() {
        assert!(matches!(build_sphere(1.0, 1, 8), Err(MeshError::InvalidArgument(_))));
        assert!(matches!(build_sphere(1.0, 8, 1), Err(MeshError::InvalidArgument(_))));
        assert!(matches!(build_sphere(1.0, 0, 0), Err(MeshError::InvalidArgument(_))));
    }

    #[test]
    fn rejects_grids_beyond_u32_indices() {
        assert!(matches!(
            build_sphere(1.0, 65536, 65537),
            Err(MeshError::InvalidArgument(_))
        ));
        assert!(matches!(
            build_sphere(1.0, u32::MAX, u32::MAX),
            Err(MeshError::InvalidArgument(_))
        ));
        // Exactly 2^32 vertices still fits; checked without building it
        assert!(SphereOptions::new(1.0, 65536, 65536).validate().is_ok());
    }

    #[test]
    fn rejects_bad_radius() {
        for radius in [0.0, -1.0, f32::NAN, f32::INFINITY] {
            assert!(matches!(
                build_sphere(radius, 8, 8),
                Err(MeshError::InvalidArgument(_))
            ));
        }
    }

    #[test]
    fn first_vertex_is_south_pole_on_seam() {
        let mesh = build_sphere(1.0, 5, 3).unwrap();
        let v = mesh.vertices[0];
        assert!((v.position - Vec3::new(0.0, 0.0, -1.0)).length() < EPSILON);
        assert_eq!(v.uv, Vec2::new(0.0, 1.0));

        let last = mesh.vertices[mesh.vertex_count() - 1];
        assert!((last.position - Vec3::new(0.0, 0.0, 1.0)).length() < EPSILON);
        assert_eq!(last.uv, Vec2::new(1.0, 0.0));
    }

    #[test]
    fn equator_vertex_positions() {
        // 5 columns -> 90° steps, 3 rows -> equator in the middle
        let mesh = build_sphere(2.0, 5, 3).unwrap();
        let equator = &mesh.vertices[5..10];
        let expected = [
            Vec3::new(-2.0, 0.0, 0.0),
            Vec3::new(0.0, -2.0, 0.0),
            Vec3::new(2.0, 0.0, 0.0),
            Vec3::new(0.0, 2.0, 0.0),
            Vec3::new(-2.0, 0.0, 0.0),
        ];
        for (v, e) in equator.iter().zip(expected.iter()) {
            assert!((v.position - *e).length() < EPSILON, "{:?} vs {:?}", v.position, e);
        }
    }

    #[test]
    fn list_index_pattern() {
        let mesh = build_sphere(1.0, 3, 2).unwrap();
        assert_eq!(mesh.topology, MeshTopology::TriangleList);
        assert_eq!(mesh.indices, vec![0, 3, 1, 1, 3, 4, 1, 4, 2, 2, 4, 5]);
    }

    #[test]
    fn strip_has_degenerate_joins() {
        let mesh = build_sphere_with(
            &SphereOptions::new(1.0, 3, 3).with_topology(MeshTopology::TriangleStrip),
        )
        .unwrap();
        assert_eq!(
            mesh.indices,
            vec![0, 3, 1, 4, 2, 5, 5, 3, 3, 6, 4, 7, 5, 8]
        );
    }

    #[test]
    fn strip_index_count() {
        let (w, h) = (10u32, 6u32);
        let mesh = build_sphere_with(
            &SphereOptions::new(1.0, w, h).with_topology(MeshTopology::TriangleStrip),
        )
        .unwrap();
        assert_eq!(mesh.index_count() as u32, (h - 1) * 2 * w + (h - 2) * 2);
    }

    #[test]
    fn collapse_snaps_poles_and_skips_flat_triangles() {
        let (w, h) = (8u32, 5u32);
        let options = SphereOptions::new(1.0, w, h).with_poles(PoleMode::Collapse);
        let mesh = build_sphere_with(&options).unwrap();

        for col in 0..w as usize {
            assert_eq!(mesh.vertices[col].position, Vec3::new(0.0, 0.0, -1.0));
            let top = (h - 1) as usize * w as usize + col;
            assert_eq!(mesh.vertices[top].position, Vec3::new(0.0, 0.0, 1.0));
        }

        let full = ((w - 1) * (h - 1) * 6) as usize;
        let removed = ((w - 1) * 3 * 2) as usize;
        assert_eq!(mesh.index_count(), full - removed);

        for tri in mesh.indices.chunks(3) {
            let p: Vec<Vec3> = tri.iter().map(|&i| mesh.vertices[i as usize].position).collect();
            let area = (p[1] - p[0]).cross(p[2] - p[0]).length();
            assert!(area > 0.0);
        }
    }

    #[test]
    fn preserve_keeps_full_index_count() {
        let (w, h) = (8u32, 5u32);
        let mesh = build_sphere(1.0, w, h).unwrap();
        assert_eq!(mesh.index_count(), ((w - 1) * (h - 1) * 6) as usize);
    }

    #[test]
    fn quad_covers_clip_space() {
        let quad = Mesh::quad();
        assert_eq!(quad.vertex_count(), 4);
        assert_eq!(quad.index_count(), 6);
        for v in &quad.vertices {
            assert_eq!(v.position.x.abs(), 1.0);
            assert_eq!(v.position.y.abs(), 1.0);
        }
    }
}

//! Posed-mesh preparation
//!
//! Turns an evaluated mesh into triangulated, transformed geometry ready for
//! vertex emission or animation sampling: applies a node-space (or world)
//! matrix, splits quads along their shorter diagonal, ear-clips n-gons with
//! a quality-preserving ear choice, and regenerates per-corner tangents from
//! the first UV layer.
//!
//! Triangles keep the source vertex and corner ("loop") indices of the
//! evaluated mesh, so downstream consumers can re-sample attributes of the
//! same corner on a differently posed evaluation of the same object.

use glam::{Mat3, Mat4, Vec2, Vec3, Vec4};

use crate::scene::EvaluatedMesh;

/// One triangle of a prepared mesh. `vertices` index the source vertex
/// array, `loops` the per-corner attribute layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Triangle {
    pub material_slot: u32,
    pub vertices: [u32; 3],
    pub loops: [u32; 3],
}

/// Transformed, triangulated geometry of one evaluated mesh.
#[derive(Debug, Clone)]
pub struct PreparedMesh {
    /// Transformed positions, per source vertex.
    pub positions: Vec<Vec3>,
    /// Transformed unit normals, per corner.
    pub normals: Vec<Vec3>,
    /// Per-corner tangents (xyz direction + w bitangent sign); identity
    /// tangent when the mesh has no first UV layer.
    pub tangents: Vec<Vec4>,
    /// Triangles in stable material-slot order.
    pub triangles: Vec<Triangle>,
    pub has_uv0: bool,
}

/// Prepare `mesh` under `matrix`.
pub fn prepare(mesh: &EvaluatedMesh, matrix: Mat4) -> PreparedMesh {
    let positions: Vec<Vec3> = mesh
        .positions
        .iter()
        .map(|p| matrix.transform_point3(*p))
        .collect();

    let normal_matrix = Mat3::from_mat4(matrix).inverse().transpose();
    let normals: Vec<Vec3> = mesh
        .normals
        .iter()
        .map(|n| (normal_matrix * *n).normalize_or_zero())
        .collect();

    let mut triangles = Vec::new();
    for polygon in &mesh.polygons {
        triangulate_polygon(
            &positions,
            polygon.material_slot,
            &polygon.vertices,
            polygon.loop_start,
            &mut triangles,
        );
    }
    triangles.sort_by_key(|t| t.material_slot);

    let has_uv0 = !mesh.uv_layers.is_empty();
    let tangents = if has_uv0 {
        generate_tangents(&positions, &normals, &mesh.uv_layers[0], &triangles)
    } else {
        vec![Vec4::new(1.0, 0.0, 0.0, 1.0); normals.len()]
    };

    PreparedMesh {
        positions,
        normals,
        tangents,
        triangles,
        has_uv0,
    }
}

fn triangulate_polygon(
    positions: &[Vec3],
    material_slot: u32,
    ring: &[u32],
    loop_start: u32,
    out: &mut Vec<Triangle>,
) {
    let corner = |i: usize| (ring[i], loop_start + i as u32);
    match ring.len() {
        0..=2 => {}
        3 => out.push(make_triangle(material_slot, [corner(0), corner(1), corner(2)])),
        4 => {
            // Split along the shorter diagonal.
            let d02 = positions[ring[0] as usize].distance_squared(positions[ring[2] as usize]);
            let d13 = positions[ring[1] as usize].distance_squared(positions[ring[3] as usize]);
            let splits: [[usize; 3]; 2] = if d02 <= d13 {
                [[0, 1, 2], [0, 2, 3]]
            } else {
                [[1, 2, 3], [1, 3, 0]]
            };
            for split in splits {
                out.push(make_triangle(
                    material_slot,
                    [corner(split[0]), corner(split[1]), corner(split[2])],
                ));
            }
        }
        _ => ear_clip(positions, material_slot, ring, loop_start, out),
    }
}

fn make_triangle(material_slot: u32, corners: [(u32, u32); 3]) -> Triangle {
    Triangle {
        material_slot,
        vertices: [corners[0].0, corners[1].0, corners[2].0],
        loops: [corners[0].1, corners[1].1, corners[2].1],
    }
}

/// Ear clipping over the polygon projected onto its dominant plane. Among
/// all valid ears the one with the largest minimum interior angle is cut,
/// which keeps slivers out of the result.
fn ear_clip(
    positions: &[Vec3],
    material_slot: u32,
    ring: &[u32],
    loop_start: u32,
    out: &mut Vec<Triangle>,
) {
    let normal = ring_normal(positions, ring);
    let projected: Vec<Vec2> = ring
        .iter()
        .map(|&v| project_to_plane(positions[v as usize], normal))
        .collect();

    // Remaining ring as indices into `ring`.
    let mut remaining: Vec<usize> = (0..ring.len()).collect();

    while remaining.len() > 3 {
        let mut best: Option<(usize, f32)> = None;
        for slot in 0..remaining.len() {
            let prev = remaining[(slot + remaining.len() - 1) % remaining.len()];
            let curr = remaining[slot];
            let next = remaining[(slot + 1) % remaining.len()];
            if !is_ear(&projected, &remaining, prev, curr, next) {
                continue;
            }
            let quality = min_angle(projected[prev], projected[curr], projected[next]);
            if best.map(|(_, q)| quality > q).unwrap_or(true) {
                best = Some((slot, quality));
            }
        }

        // Degenerate ring (collinear or self-intersecting): fall back to
        // cutting at the current position so the loop always terminates.
        let slot = best.map(|(s, _)| s).unwrap_or(0);
        let prev = remaining[(slot + remaining.len() - 1) % remaining.len()];
        let curr = remaining[slot];
        let next = remaining[(slot + 1) % remaining.len()];
        out.push(make_triangle(
            material_slot,
            [
                (ring[prev], loop_start + prev as u32),
                (ring[curr], loop_start + curr as u32),
                (ring[next], loop_start + next as u32),
            ],
        ));
        remaining.remove(slot);
    }

    out.push(make_triangle(
        material_slot,
        [
            (ring[remaining[0]], loop_start + remaining[0] as u32),
            (ring[remaining[1]], loop_start + remaining[1] as u32),
            (ring[remaining[2]], loop_start + remaining[2] as u32),
        ],
    ));
}

fn ring_normal(positions: &[Vec3], ring: &[u32]) -> Vec3 {
    let mut normal = Vec3::ZERO;
    let n = ring.len();
    for i in 0..n {
        let a = positions[ring[i] as usize];
        let b = positions[ring[(i + 1) % n] as usize];
        normal += Vec3::new(
            (a.y - b.y) * (a.z + b.z),
            (a.z - b.z) * (a.x + b.x),
            (a.x - b.x) * (a.y + b.y),
        );
    }
    normal.normalize_or_zero()
}

fn project_to_plane(p: Vec3, normal: Vec3) -> Vec2 {
    let abs = normal.abs();
    if abs.z >= abs.x && abs.z >= abs.y {
        if normal.z >= 0.0 {
            Vec2::new(p.x, p.y)
        } else {
            Vec2::new(p.y, p.x)
        }
    } else if abs.y >= abs.x {
        if normal.y >= 0.0 {
            Vec2::new(p.z, p.x)
        } else {
            Vec2::new(p.x, p.z)
        }
    } else if normal.x >= 0.0 {
        Vec2::new(p.y, p.z)
    } else {
        Vec2::new(p.z, p.y)
    }
}

fn is_ear(projected: &[Vec2], remaining: &[usize], prev: usize, curr: usize, next: usize) -> bool {
    let a = projected[prev];
    let b = projected[curr];
    let c = projected[next];
    // Reflex corner: not an ear.
    if cross2(b - a, c - b) <= 0.0 {
        return false;
    }
    // No other remaining vertex may sit inside the candidate triangle.
    for &other in remaining {
        if other == prev || other == curr || other == next {
            continue;
        }
        if point_in_triangle(projected[other], a, b, c) {
            return false;
        }
    }
    true
}

fn cross2(a: Vec2, b: Vec2) -> f32 {
    a.x * b.y - a.y * b.x
}

fn point_in_triangle(p: Vec2, a: Vec2, b: Vec2, c: Vec2) -> bool {
    let d1 = cross2(b - a, p - a);
    let d2 = cross2(c - b, p - b);
    let d3 = cross2(a - c, p - c);
    let has_neg = d1 < 0.0 || d2 < 0.0 || d3 < 0.0;
    let has_pos = d1 > 0.0 || d2 > 0.0 || d3 > 0.0;
    !(has_neg && has_pos)
}

fn min_angle(a: Vec2, b: Vec2, c: Vec2) -> f32 {
    let angle = |u: Vec2, v: Vec2| {
        let denom = u.length() * v.length();
        if denom <= f32::EPSILON {
            0.0
        } else {
            (u.dot(v) / denom).clamp(-1.0, 1.0).acos()
        }
    };
    let at_a = angle(b - a, c - a);
    let at_b = angle(a - b, c - b);
    let at_c = angle(a - c, b - c);
    at_a.min(at_b).min(at_c)
}

/// Per-corner tangent generation from the first UV layer: per-triangle
/// direction accumulation, Gram-Schmidt orthonormalization against the
/// corner normal, cross-product handedness sign.
fn generate_tangents(
    positions: &[Vec3],
    normals: &[Vec3],
    uv0: &[Vec2],
    triangles: &[Triangle],
) -> Vec<Vec4> {
    let mut tan_u = vec![Vec3::ZERO; normals.len()];
    let mut tan_v = vec![Vec3::ZERO; normals.len()];

    for triangle in triangles {
        let [p0, p1, p2] = triangle.vertices.map(|v| positions[v as usize]);
        let [w0, w1, w2] = triangle.loops.map(|l| uv0[l as usize]);

        let e1 = p1 - p0;
        let e2 = p2 - p0;
        let d1 = w1 - w0;
        let d2 = w2 - w0;

        let denom = d1.x * d2.y - d2.x * d1.y;
        if denom.abs() <= f32::EPSILON {
            continue;
        }
        let r = 1.0 / denom;
        let sdir = (e1 * d2.y - e2 * d1.y) * r;
        let tdir = (e2 * d1.x - e1 * d2.x) * r;

        for &loop_index in &triangle.loops {
            tan_u[loop_index as usize] += sdir;
            tan_v[loop_index as usize] += tdir;
        }
    }

    normals
        .iter()
        .zip(tan_u.iter().zip(tan_v.iter()))
        .map(|(&n, (&u, &v))| {
            let tangent = (u - n * n.dot(u)).normalize_or_zero();
            if tangent == Vec3::ZERO {
                return Vec4::new(1.0, 0.0, 0.0, 1.0);
            }
            let sign = if n.cross(tangent).dot(v) < 0.0 { -1.0 } else { 1.0 };
            tangent.extend(sign)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::MeshSource;
    use glam::Quat;

    fn evaluated(mesh: MeshSource) -> EvaluatedMesh {
        let normals = vec![Vec3::Z; mesh.loop_count() as usize];
        EvaluatedMesh {
            object: crate::scene::ObjectId(0),
            positions: mesh.positions.clone(),
            polygons: mesh.polygons.clone(),
            normals: mesh.normals.clone().unwrap_or(normals),
            uv_layers: mesh.uv_layers.clone(),
            colors: mesh.colors.clone(),
            materials: mesh.materials.clone(),
            world_transform: Mat4::IDENTITY,
        }
    }

    fn unit_quad() -> MeshSource {
        let mut mesh = MeshSource::new(vec![
            Vec3::ZERO,
            Vec3::new(1.0, 0.0, 0.0),
            Vec3::new(1.0, 1.0, 0.0),
            Vec3::new(0.0, 1.0, 0.0),
        ]);
        mesh.push_polygon(0, vec![0, 1, 2, 3]);
        mesh
    }

    #[test]
    fn quad_splits_into_two_triangles() {
        let prepared = prepare(&evaluated(unit_quad()), Mat4::IDENTITY);
        assert_eq!(prepared.triangles.len(), 2);
        // Both diagonals are equal here, so the 0-2 split is chosen.
        assert_eq!(prepared.triangles[0].vertices, [0, 1, 2]);
        assert_eq!(prepared.triangles[1].vertices, [0, 2, 3]);
    }

    #[test]
    fn quad_split_prefers_shorter_diagonal() {
        // Kite shape where the 1-3 diagonal is much shorter than 0-2.
        let mut mesh = MeshSource::new(vec![
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(1.0, 0.4, 0.0),
            Vec3::new(2.0, 0.5, 0.0),
            Vec3::new(1.0, 0.6, 0.0),
        ]);
        mesh.push_polygon(0, vec![0, 1, 2, 3]);
        let prepared = prepare(&evaluated(mesh), Mat4::IDENTITY);
        assert_eq!(prepared.triangles[0].vertices, [1, 2, 3]);
        assert_eq!(prepared.triangles[1].vertices, [1, 3, 0]);
    }

    #[test]
    fn pentagon_ear_clips_into_three_triangles() {
        let mut mesh = MeshSource::new(vec![
            Vec3::new(0.0, 1.0, 0.0),
            Vec3::new(-0.95, 0.31, 0.0),
            Vec3::new(-0.59, -0.81, 0.0),
            Vec3::new(0.59, -0.81, 0.0),
            Vec3::new(0.95, 0.31, 0.0),
        ]);
        mesh.push_polygon(0, vec![0, 1, 2, 3, 4]);
        let prepared = prepare(&evaluated(mesh), Mat4::IDENTITY);
        assert_eq!(prepared.triangles.len(), 3);

        // Every source corner is used and each triangle's loops match its
        // vertices (corner indices equal ring positions for one polygon).
        for triangle in &prepared.triangles {
            assert_eq!(triangle.vertices, triangle.loops);
        }
    }

    #[test]
    fn concave_ring_avoids_the_reflex_corner_ear() {
        // Arrowhead: vertex 3 is reflex.
        let mut mesh = MeshSource::new(vec![
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(2.0, 0.0, 0.0),
            Vec3::new(2.0, 2.0, 0.0),
            Vec3::new(1.0, 0.5, 0.0),
            Vec3::new(0.0, 2.0, 0.0),
        ]);
        mesh.push_polygon(0, vec![0, 1, 2, 3, 4]);
        let prepared = prepare(&evaluated(mesh), Mat4::IDENTITY);
        assert_eq!(prepared.triangles.len(), 3);
        // No triangle may span the concavity (contain both wing tips and
        // skip the reflex vertex 3 while containing it geometrically).
        for t in &prepared.triangles {
            assert!(t.vertices.contains(&3) || !(t.vertices.contains(&2) && t.vertices.contains(&4)));
        }
    }

    #[test]
    fn transform_applies_to_positions_and_normals() {
        let rotation = Mat4::from_quat(Quat::from_rotation_x(std::f32::consts::FRAC_PI_2));
        let prepared = prepare(&evaluated(unit_quad()), rotation);
        // A +90 degree rotation about X carries +Z onto -Y.
        for n in &prepared.normals {
            assert!((*n + Vec3::Y).length() < 1e-5);
        }
        assert!((prepared.positions[2] - Vec3::new(1.0, 0.0, 1.0)).length() < 1e-5);
    }

    #[test]
    fn tangents_are_orthonormal_to_normals() {
        let mut mesh = unit_quad();
        mesh.uv_layers.push(vec![
            Vec2::new(0.0, 0.0),
            Vec2::new(1.0, 0.0),
            Vec2::new(1.0, 1.0),
            Vec2::new(0.0, 1.0),
        ]);
        let prepared = prepare(&evaluated(mesh), Mat4::IDENTITY);
        assert!(prepared.has_uv0);
        for (n, t) in prepared.normals.iter().zip(&prepared.tangents) {
            assert!((t.truncate().length() - 1.0).abs() < 1e-5);
            assert!(n.dot(t.truncate()).abs() < 1e-5);
            assert!(t.w == 1.0 || t.w == -1.0);
        }
        // A straight UV unwrap of an XY quad yields the +X tangent.
        assert!((prepared.tangents[0].truncate() - Vec3::X).length() < 1e-5);
    }

    #[test]
    fn triangles_group_by_material_slot() {
        let mut mesh = MeshSource::new(vec![
            Vec3::ZERO,
            Vec3::new(1.0, 0.0, 0.0),
            Vec3::new(0.0, 1.0, 0.0),
            Vec3::new(1.0, 1.0, 0.0),
        ]);
        mesh.push_polygon(1, vec![0, 1, 3]);
        mesh.push_polygon(0, vec![0, 3, 2]);
        let prepared = prepare(&evaluated(mesh), Mat4::IDENTITY);
        assert_eq!(prepared.triangles[0].material_slot, 0);
        assert_eq!(prepared.triangles[1].material_slot, 1);
    }
}

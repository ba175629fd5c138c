//! Triangle mesh with per-vertex support constraints and ASCII PLY I/O.
//!
//! The mesh owns vertex positions (N×3), triangular faces, and a boolean
//! constraint flag per vertex. Connectivity (unique edges with face
//! adjacency, vertex neighborhoods) is derived once at construction and is
//! immutable afterwards; the optimizer only ever mutates the positions of
//! unconstrained vertices.

use crate::types::FormFindError;
use ndarray::Array2;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

/// Undirected mesh edge with the (up to two) incident faces.
#[derive(Debug, Clone)]
pub struct MeshEdge {
    pub start: usize,
    pub end: usize,
    /// Incident face indices. `faces[1]` is `None` on a boundary edge.
    pub faces: [Option<usize>; 2],
}

impl MeshEdge {
    /// Whether this edge lies on the mesh boundary.
    pub fn is_boundary(&self) -> bool {
        self.faces[1].is_none()
    }
}

/// Triangulated structural mesh.
#[derive(Debug, Clone)]
pub struct TriMesh {
    /// Vertex positions, one row per vertex.
    pub vertices: Array2<f64>,
    /// Triangle faces as vertex-index triples.
    pub faces: Vec<[usize; 3]>,
    /// Support condition per vertex; constrained vertices never move.
    pub vertex_is_constrained: Vec<bool>,
    edges: Vec<MeshEdge>,
    neighbors: Vec<Vec<usize>>,
}

impl TriMesh {
    /// Build a mesh from raw parts, deriving connectivity.
    ///
    /// When `constrained` is `None` the constraint mask defaults to the
    /// boundary vertices (every vertex on an edge with fewer than two
    /// incident faces), which reproduces the pinned-rim setup of a
    /// grid-shell.
    pub fn from_parts(
        vertices: Array2<f64>,
        faces: Vec<[usize; 3]>,
        constrained: Option<Vec<bool>>,
    ) -> Result<Self, FormFindError> {
        let nv = vertices.nrows();
        if vertices.ncols() != 3 {
            return Err(FormFindError::MeshFormat(format!(
                "vertex array must have 3 columns, got {}",
                vertices.ncols()
            )));
        }
        for (fi, f) in faces.iter().enumerate() {
            for &v in f {
                if v >= nv {
                    return Err(FormFindError::MeshFormat(format!(
                        "face {fi} references vertex {v}, mesh has {nv} vertices"
                    )));
                }
            }
            if f[0] == f[1] || f[1] == f[2] || f[0] == f[2] {
                return Err(FormFindError::MeshFormat(format!(
                    "face {fi} is degenerate: {f:?}"
                )));
            }
        }

        let edges = build_edges(&faces)?;
        let neighbors = build_neighbors(&edges, nv);

        let vertex_is_constrained = match constrained {
            Some(mask) => {
                if mask.len() != nv {
                    return Err(FormFindError::MeshFormat(format!(
                        "constraint mask has {} entries, mesh has {nv} vertices",
                        mask.len()
                    )));
                }
                mask
            }
            None => {
                let mut mask = vec![false; nv];
                for e in &edges {
                    if e.is_boundary() {
                        mask[e.start] = true;
                        mask[e.end] = true;
                    }
                }
                mask
            }
        };

        Ok(Self {
            vertices,
            faces,
            vertex_is_constrained,
            edges,
            neighbors,
        })
    }

    pub fn num_vertices(&self) -> usize {
        self.vertices.nrows()
    }

    /// Unique undirected edges with face adjacency.
    pub fn edges(&self) -> &[MeshEdge] {
        &self.edges
    }

    /// Edge-connected neighbor vertices, per vertex.
    pub fn neighbors(&self) -> &[Vec<usize>] {
        &self.neighbors
    }

    /// Indices of unconstrained (optimizable) vertices, in vertex order.
    pub fn free_indices(&self) -> Vec<usize> {
        (0..self.num_vertices())
            .filter(|&v| !self.vertex_is_constrained[v])
            .collect()
    }

    // ── PLY I/O ───────────────────────────────────────────────

    /// Load an ASCII PLY mesh. The constraint mask is boundary-derived.
    pub fn load_ply(path: &Path) -> Result<Self, FormFindError> {
        let file = File::open(path)?;
        let (vertices, faces) = parse_ply(BufReader::new(file))?;
        Self::from_parts(vertices, faces, None)
    }

    /// Write an ASCII PLY snapshot, optionally annotating each vertex with
    /// a scalar `quality` attribute (deformation magnitude at export time).
    pub fn save_ply(&self, path: &Path, quality: Option<&[f64]>) -> Result<(), FormFindError> {
        let nv = self.num_vertices();
        if let Some(q) = quality {
            if q.len() != nv {
                return Err(FormFindError::MeshFormat(format!(
                    "quality attribute has {} entries, mesh has {nv} vertices",
                    q.len()
                )));
            }
        }

        let mut out = BufWriter::new(File::create(path)?);
        writeln!(out, "ply")?;
        writeln!(out, "format ascii 1.0")?;
        writeln!(out, "element vertex {nv}")?;
        writeln!(out, "property float x")?;
        writeln!(out, "property float y")?;
        writeln!(out, "property float z")?;
        if quality.is_some() {
            writeln!(out, "property float quality")?;
        }
        writeln!(out, "element face {}", self.faces.len())?;
        writeln!(out, "property list uchar int vertex_indices")?;
        writeln!(out, "end_header")?;

        for v in 0..nv {
            match quality {
                Some(q) => writeln!(
                    out,
                    "{} {} {} {}",
                    self.vertices[[v, 0]],
                    self.vertices[[v, 1]],
                    self.vertices[[v, 2]],
                    q[v]
                )?,
                None => writeln!(
                    out,
                    "{} {} {}",
                    self.vertices[[v, 0]],
                    self.vertices[[v, 1]],
                    self.vertices[[v, 2]]
                )?,
            }
        }
        for f in &self.faces {
            writeln!(out, "3 {} {} {}", f[0], f[1], f[2])?;
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────
//  Connectivity construction
// ─────────────────────────────────────────────────────────────

fn build_edges(faces: &[[usize; 3]]) -> Result<Vec<MeshEdge>, FormFindError> {
    let mut index: HashMap<(usize, usize), usize> = HashMap::new();
    let mut edges: Vec<MeshEdge> = Vec::new();

    for (fi, f) in faces.iter().enumerate() {
        for k in 0..3 {
            let (a, b) = (f[k], f[(k + 1) % 3]);
            let key = if a < b { (a, b) } else { (b, a) };
            match index.get(&key) {
                Some(&ei) => {
                    let e = &mut edges[ei];
                    if e.faces[1].is_some() {
                        return Err(FormFindError::MeshFormat(format!(
                            "non-manifold edge ({}, {}) shared by more than two faces",
                            key.0, key.1
                        )));
                    }
                    e.faces[1] = Some(fi);
                }
                None => {
                    index.insert(key, edges.len());
                    edges.push(MeshEdge {
                        start: key.0,
                        end: key.1,
                        faces: [Some(fi), None],
                    });
                }
            }
        }
    }
    Ok(edges)
}

fn build_neighbors(edges: &[MeshEdge], nv: usize) -> Vec<Vec<usize>> {
    let mut neighbors = vec![Vec::new(); nv];
    for e in edges {
        neighbors[e.start].push(e.end);
        neighbors[e.end].push(e.start);
    }
    neighbors
}

// ─────────────────────────────────────────────────────────────
//  ASCII PLY parsing
// ─────────────────────────────────────────────────────────────

/// Parse an ASCII PLY stream into positions and triangle faces.
///
/// The first three vertex properties must be `x y z`; any further vertex
/// properties are read and ignored. Only triangular faces are accepted.
fn parse_ply<R: BufRead>(reader: R) -> Result<(Array2<f64>, Vec<[usize; 3]>), FormFindError> {
    let mut lines = reader.lines();

    let magic = next_line(&mut lines)?;
    if magic.trim() != "ply" {
        return Err(FormFindError::MeshFormat("missing 'ply' magic line".into()));
    }

    let mut num_vertices: Option<usize> = None;
    let mut num_faces: Option<usize> = None;
    let mut vertex_props: Vec<String> = Vec::new();
    let mut current_element = String::new();

    loop {
        let line = next_line(&mut lines)?;
        let tokens: Vec<&str> = line.split_whitespace().collect();
        match tokens.as_slice() {
            ["format", "ascii", _] => {}
            ["format", other, ..] => {
                return Err(FormFindError::MeshFormat(format!(
                    "unsupported PLY format '{other}' (only ascii)"
                )));
            }
            ["comment", ..] => {}
            ["element", name, count] => {
                let n: usize = count.parse().map_err(|_| {
                    FormFindError::MeshFormat(format!("bad element count '{count}'"))
                })?;
                current_element = name.to_string();
                match current_element.as_str() {
                    "vertex" => num_vertices = Some(n),
                    "face" => num_faces = Some(n),
                    _ => {}
                }
            }
            ["property", "list", ..] => {}
            ["property", _ty, name] if current_element == "vertex" => {
                vertex_props.push(name.to_string());
            }
            ["property", ..] => {}
            ["end_header"] => break,
            [] => {}
            _ => {
                return Err(FormFindError::MeshFormat(format!(
                    "unrecognized header line '{line}'"
                )));
            }
        }
    }

    let nv = num_vertices
        .ok_or_else(|| FormFindError::MeshFormat("header missing vertex element".into()))?;
    let nf = num_faces.unwrap_or(0);
    if vertex_props.len() < 3 || vertex_props[..3] != ["x", "y", "z"] {
        return Err(FormFindError::MeshFormat(
            "first three vertex properties must be x y z".into(),
        ));
    }

    let mut vertices = Array2::<f64>::zeros((nv, 3));
    for v in 0..nv {
        let line = next_line(&mut lines)?;
        let mut it = line.split_whitespace();
        for d in 0..3 {
            let tok = it.next().ok_or_else(|| {
                FormFindError::MeshFormat(format!("vertex {v}: expected 3 coordinates"))
            })?;
            vertices[[v, d]] = tok.parse().map_err(|_| {
                FormFindError::MeshFormat(format!("vertex {v}: bad coordinate '{tok}'"))
            })?;
        }
    }

    let mut faces = Vec::with_capacity(nf);
    for f in 0..nf {
        let line = next_line(&mut lines)?;
        let nums: Vec<usize> = line
            .split_whitespace()
            .map(|t| {
                t.parse()
                    .map_err(|_| FormFindError::MeshFormat(format!("face {f}: bad index '{t}'")))
            })
            .collect::<Result<_, _>>()?;
        if nums.len() != 4 || nums[0] != 3 {
            return Err(FormFindError::MeshFormat(format!(
                "face {f}: only triangles are supported"
            )));
        }
        faces.push([nums[1], nums[2], nums[3]]);
    }

    Ok((vertices, faces))
}

fn next_line<I: Iterator<Item = std::io::Result<String>>>(
    lines: &mut I,
) -> Result<String, FormFindError> {
    match lines.next() {
        Some(Ok(l)) => Ok(l),
        Some(Err(e)) => Err(e.into()),
        None => Err(FormFindError::MeshFormat("unexpected end of file".into())),
    }
}

// ─────────────────────────────────────────────────────────────
//  Tests
// ─────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const QUAD_PLY: &str = "ply\n\
format ascii 1.0\n\
comment unit square, two triangles\n\
element vertex 4\n\
property float x\n\
property float y\n\
property float z\n\
element face 2\n\
property list uchar int vertex_indices\n\
end_header\n\
0 0 0\n\
1 0 0\n\
1 1 0\n\
0 1 0\n\
3 0 1 2\n\
3 0 2 3\n";

    #[test]
    fn parse_quad() {
        let (vertices, faces) = parse_ply(Cursor::new(QUAD_PLY)).unwrap();
        assert_eq!(vertices.nrows(), 4);
        assert_eq!(faces.len(), 2);
        assert_eq!(vertices[[2, 0]], 1.0);
        assert_eq!(faces[1], [0, 2, 3]);
    }

    #[test]
    fn quad_connectivity_and_boundary() {
        let (vertices, faces) = parse_ply(Cursor::new(QUAD_PLY)).unwrap();
        let mesh = TriMesh::from_parts(vertices, faces, None).unwrap();
        // 4 boundary edges + 1 diagonal
        assert_eq!(mesh.edges().len(), 5);
        assert_eq!(mesh.edges().iter().filter(|e| e.is_boundary()).count(), 4);
        // every vertex of the quad touches the boundary
        assert!(mesh.vertex_is_constrained.iter().all(|&c| c));
        assert!(mesh.free_indices().is_empty());
    }

    #[test]
    fn rejects_bad_face_index() {
        let vertices = Array2::zeros((3, 3));
        let err = TriMesh::from_parts(vertices, vec![[0, 1, 7]], None).unwrap_err();
        assert!(matches!(err, FormFindError::MeshFormat(_)));
    }

    #[test]
    fn rejects_binary_ply() {
        let data = "ply\nformat binary_little_endian 1.0\nend_header\n";
        assert!(parse_ply(Cursor::new(data)).is_err());
    }
}

//! Tracing label grids back into polygons.
//!
//! Regions are 4-connected: pixels touching only at a corner end up in
//! different polygons. Boundaries follow pixel edges, so every emitted
//! polygon covers exactly the pixel centres of its region.

use crate::models::{AttributeValue, Crs, Geometry, Polygon};
use landcube_core::error::{LandcubeError, Result};
use landcube_core::models::{Affine, LabelArray, PolygonId};
use std::collections::{HashMap, VecDeque};

/// Attribute holding the source grid value of each polygon
pub const VALUE_ATTRIBUTE: &str = "value";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolygonizeOptions {
    /// Grid value that produces no polygon (the background)
    pub skip_value: Option<i64>,
    /// Id of the first emitted polygon; following ones count up
    pub first_id: PolygonId,
}

impl Default for PolygonizeOptions {
    fn default() -> Self {
        Self { skip_value: Some(0), first_id: 1 }
    }
}

type Vertex = (i64, i64);

#[derive(Debug, Clone, Copy)]
struct Edge {
    from: Vertex,
    to: Vertex,
}

impl Edge {
    fn direction(&self) -> Vertex {
        (self.to.0 - self.from.0, self.to.1 - self.from.1)
    }
}

/// Polygonize every 4-connected region of equal value
///
/// Polygons are emitted in raster-scan order of each region's first pixel,
/// with the region value in the `value` attribute. Exterior rings are
/// counter-clockwise in a north-up world frame, holes clockwise.
pub fn polygonize(
    labels: &LabelArray,
    transform: &Affine,
    crs: &Crs,
    options: &PolygonizeOptions,
) -> Result<Vec<Polygon>> {
    if !transform.is_invertible() {
        return Err(LandcubeError::InvalidRaster {
            reason: "cannot polygonize with a singular affine transform".to_string(),
        });
    }

    let (components, values) = label_components(labels, options.skip_value);
    let edges = boundary_edges(labels, &components, values.len());

    let mut polygons = Vec::with_capacity(values.len());
    for (idx, (value, comp_edges)) in values.iter().zip(edges).enumerate() {
        let rings = trace_rings(&comp_edges);
        let geometry = assemble_geometry(rings, transform);
        let id = options.first_id + idx as PolygonId;
        polygons.push(
            Polygon::new(id, geometry, crs.clone())
                .with_attribute(VALUE_ATTRIBUTE, AttributeValue::Integer(*value)),
        );
    }

    tracing::debug!(regions = polygons.len(), "Polygonized label grid");
    Ok(polygons)
}

const NO_COMPONENT: usize = usize::MAX;

/// Flood-fill 4-connected regions; returns per-pixel component ids and component values
fn label_components(labels: &LabelArray, skip: Option<i64>) -> (Vec<usize>, Vec<i64>) {
    let (rows, cols) = labels.dim();
    let mut components = vec![NO_COMPONENT; rows * cols];
    let mut values = Vec::new();
    let mut queue = VecDeque::new();

    for r in 0..rows {
        for c in 0..cols {
            let value = labels[[r, c]];
            if components[r * cols + c] != NO_COMPONENT || Some(value) == skip {
                continue;
            }

            let comp = values.len();
            values.push(value);
            components[r * cols + c] = comp;
            queue.push_back((r, c));

            while let Some((pr, pc)) = queue.pop_front() {
                let mut visit = |nr: usize, nc: usize| {
                    let idx = nr * cols + nc;
                    if components[idx] == NO_COMPONENT && labels[[nr, nc]] == value {
                        components[idx] = comp;
                        queue.push_back((nr, nc));
                    }
                };
                if pr > 0 {
                    visit(pr - 1, pc);
                }
                if pr + 1 < rows {
                    visit(pr + 1, pc);
                }
                if pc > 0 {
                    visit(pr, pc - 1);
                }
                if pc + 1 < cols {
                    visit(pr, pc + 1);
                }
            }
        }
    }

    (components, values)
}

/// Directed boundary edges per component, interior on the (dy, -dx) side
fn boundary_edges(labels: &LabelArray, components: &[usize], count: usize) -> Vec<Vec<Edge>> {
    let (rows, cols) = labels.dim();
    let mut edges = vec![Vec::new(); count];
    let comp_at = |r: i64, c: i64| -> usize {
        if r < 0 || c < 0 || r >= rows as i64 || c >= cols as i64 {
            NO_COMPONENT
        } else {
            components[r as usize * cols + c as usize]
        }
    };

    for r in 0..rows as i64 {
        for c in 0..cols as i64 {
            let comp = comp_at(r, c);
            if comp == NO_COMPONENT {
                continue;
            }
            let list = &mut edges[comp];
            if comp_at(r - 1, c) != comp {
                list.push(Edge { from: (c + 1, r), to: (c, r) });
            }
            if comp_at(r, c - 1) != comp {
                list.push(Edge { from: (c, r), to: (c, r + 1) });
            }
            if comp_at(r + 1, c) != comp {
                list.push(Edge { from: (c, r + 1), to: (c + 1, r + 1) });
            }
            if comp_at(r, c + 1) != comp {
                list.push(Edge { from: (c + 1, r + 1), to: (c + 1, r) });
            }
        }
    }

    edges
}

/// Link edges into closed rings (pixel-corner coordinates, open form)
fn trace_rings(edges: &[Edge]) -> Vec<Vec<Vertex>> {
    let mut outgoing: HashMap<Vertex, Vec<usize>> = HashMap::new();
    for (i, edge) in edges.iter().enumerate() {
        outgoing.entry(edge.from).or_default().push(i);
    }

    let mut used = vec![false; edges.len()];
    let mut rings = Vec::new();

    for start in 0..edges.len() {
        if used[start] {
            continue;
        }

        let mut ring = vec![edges[start].from];
        let mut current = start;
        for _ in 0..edges.len() {
            used[current] = true;
            let edge = edges[current];
            ring.push(edge.to);

            let Some(next) = next_edge(edge, &outgoing, edges) else {
                break;
            };
            if next == start || used[next] {
                break;
            }
            current = next;
        }

        // Drop the closing vertex, it repeats the first one
        ring.pop();
        rings.push(simplify(ring));
    }

    rings
}

/// Successor of `edge`; at pinch vertices prefer the turn that stays on the same pixel
fn next_edge(edge: Edge, outgoing: &HashMap<Vertex, Vec<usize>>, edges: &[Edge]) -> Option<usize> {
    let candidates = outgoing.get(&edge.to)?;
    if candidates.len() == 1 {
        return Some(candidates[0]);
    }

    let (dx, dy) = edge.direction();
    [(dy, -dx), (dx, dy), (-dy, dx)]
        .iter()
        .find_map(|dir| candidates.iter().copied().find(|&i| edges[i].direction() == *dir))
}

/// Remove vertices lying on a straight run
fn simplify(ring: Vec<Vertex>) -> Vec<Vertex> {
    let n = ring.len();
    if n <= 3 {
        return ring;
    }
    (0..n)
        .filter(|&i| {
            let prev = ring[(i + n - 1) % n];
            let cur = ring[i];
            let next = ring[(i + 1) % n];
            let cross = (cur.0 - prev.0) * (next.1 - cur.1) - (cur.1 - prev.1) * (next.0 - cur.0);
            cross != 0
        })
        .map(|i| ring[i])
        .collect()
}

/// Twice the signed area in pixel space (y down); negative for exteriors
fn doubled_area(ring: &[Vertex]) -> i64 {
    let n = ring.len();
    (0..n)
        .map(|i| {
            let (x0, y0) = ring[i];
            let (x1, y1) = ring[(i + 1) % n];
            x0 * y1 - x1 * y0
        })
        .sum()
}

fn contains_point(ring: &[Vertex], px: f64, py: f64) -> bool {
    let n = ring.len();
    let mut inside = false;
    for i in 0..n {
        let (x0, y0) = (ring[i].0 as f64, ring[i].1 as f64);
        let (x1, y1) = (ring[(i + 1) % n].0 as f64, ring[(i + 1) % n].1 as f64);
        if (y0 <= py) != (y1 <= py) && px < x0 + (py - y0) * (x1 - x0) / (y1 - y0) {
            inside = !inside;
        }
    }
    inside
}

fn assemble_geometry(rings: Vec<Vec<Vertex>>, transform: &Affine) -> Geometry {
    let (exteriors, holes): (Vec<_>, Vec<_>) =
        rings.into_iter().partition(|ring| doubled_area(ring) < 0);

    let mut members: Vec<Vec<Vec<Vertex>>> = exteriors.into_iter().map(|ext| vec![ext]).collect();

    for hole in holes {
        // Midpoint of the first edge is never on another ring
        let (a, b) = (hole[0], hole[1 % hole.len()]);
        let (px, py) = ((a.0 + b.0) as f64 / 2.0, (a.1 + b.1) as f64 / 2.0);
        let owner = members
            .iter()
            .enumerate()
            .filter(|(_, m)| contains_point(&m[0], px, py))
            .min_by_key(|(_, m)| doubled_area(&m[0]).abs())
            .map(|(i, _)| i)
            .unwrap_or(0);
        if let Some(member) = members.get_mut(owner) {
            member.push(hole);
        }
    }

    let to_world = |ring: &Vec<Vertex>| -> Vec<[f64; 2]> {
        let mut coords: Vec<[f64; 2]> = ring
            .iter()
            .map(|&(x, y)| {
                let (wx, wy) = transform.apply(x as f64, y as f64);
                [wx, wy]
            })
            .collect();
        if let Some(first) = coords.first().copied() {
            coords.push(first);
        }
        coords
    };

    let mut polygons: Vec<Vec<Vec<[f64; 2]>>> =
        members.iter().map(|member| member.iter().map(to_world).collect()).collect();

    if polygons.len() == 1 {
        Geometry::polygon(polygons.remove(0))
    } else {
        Geometry::multi_polygon(polygons)
    }
}

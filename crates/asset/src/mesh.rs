//! CPU-side mesh built from a loaded model and the descriptor's import options.

use anyhow::{Context, Result, bail};
use corelib::{Aabb, Mat3, Mat4, Quat, Transform, Vec3};

use crate::pmd::{PmdModel, SkinWeight, Submesh};
use crate::shape::{MeshImportSpec, UpAxis};

/// Vertex with position/normal/uv. Values are in object space, Z up.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct MeshVertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub uv: [f32; 2],
}

impl MeshVertex {
    pub fn new(position: [f32; 3], normal: [f32; 3], uv: [f32; 2]) -> Self {
        Self {
            position,
            normal,
            uv,
        }
    }
}

/// Indexed triangle mesh with tightly-packed vertices.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MeshData {
    pub vertices: Vec<MeshVertex>,
    pub indices: Vec<u32>,
}

impl MeshData {
    pub fn new(vertices: Vec<MeshVertex>, indices: Vec<u32>) -> Self {
        Self { vertices, indices }
    }

    /// Returns `true` if both vertex and index buffers are non-empty.
    pub fn is_valid(&self) -> bool {
        !self.vertices.is_empty() && !self.indices.is_empty()
    }
}

/// Per-vertex offsets of one expression morph, in mesh space.
#[derive(Clone, Debug, PartialEq)]
pub struct MeshMorph {
    pub name: String,
    pub offsets: Vec<(u32, [f32; 3])>,
}

/// Skeleton node built from one model bone.
#[derive(Clone, Debug, PartialEq)]
pub struct MeshNode {
    pub name: String,
    pub parent: Option<usize>,
    /// Rest translation relative to the parent. Roots also carry the import
    /// offset.
    pub translation: Vec3,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ImportedMesh {
    pub data: MeshData,
    pub submeshes: Vec<Submesh>,
    pub skin: Vec<SkinWeight>,
    /// Edge (outline) flag per vertex.
    pub edge_vertices: Vec<bool>,
    pub morphs: Vec<MeshMorph>,
    /// One node per bone, in bone order; skin weights index into it.
    pub nodes: Vec<MeshNode>,
    /// Inverse rest-pose transform per node.
    pub inverse_bind: Vec<Mat4>,
    /// Bounds after the import offset is applied.
    pub bounds: Aabb,
    /// Translation applied by recenter/floor snapping.
    pub offset: Vec3,
}

impl ImportedMesh {
    /// Surface names in draw order.
    pub fn surfaces(&self) -> impl Iterator<Item = &str> {
        self.submeshes.iter().map(|s| s.surface.as_str())
    }

    pub fn has_edges(&self) -> bool {
        self.edge_vertices.iter().any(|&e| e)
    }

    /// Rest position of node `index` in mesh space.
    pub fn node_position(&self, index: usize) -> Option<Vec3> {
        let mut pos = Vec3::ZERO;
        let mut cur = Some(index);
        let mut steps = 0;
        while let Some(i) = cur {
            let node = self.nodes.get(i)?;
            pos += node.translation;
            cur = node.parent;
            steps += 1;
            if steps > self.nodes.len() {
                return None;
            }
        }
        Some(pos)
    }
}

/// Maps source coordinates into the engine frame: the Y-up source is swapped
/// into Z up, then the descriptor's `upAxis` rotation and unit scale apply.
#[derive(Clone, Copy, Debug)]
struct AxisMap {
    rotation: Mat3,
    unit: f32,
}

impl AxisMap {
    fn new(up: UpAxis, unit: f32) -> Self {
        let rotation = match up {
            UpAxis::Z | UpAxis::Default => Mat3::IDENTITY,
            // Half turn about Y, then a quarter turn about X.
            UpAxis::Y => Mat3::from_cols(Vec3::NEG_X, Vec3::Z, Vec3::Y),
            // Quarter turns about Y, then Z.
            UpAxis::X => Mat3::from_cols(Vec3::Y, Vec3::Z, Vec3::X),
        };
        Self { rotation, unit }
    }

    fn direction(&self, v: Vec3) -> Vec3 {
        self.rotation * Vec3::new(v.x, v.z, v.y)
    }

    fn point(&self, v: Vec3) -> Vec3 {
        self.direction(v) * self.unit
    }
}

fn import_offset(bounds: &Aabb, spec: &MeshImportSpec) -> Vec3 {
    if !bounds.is_valid() {
        return Vec3::ZERO;
    }
    let mut offset = Vec3::ZERO;
    if spec.recenter {
        offset = -bounds.center();
    }
    if spec.snap_to_floor {
        offset.z = -bounds.min.z;
    }
    offset
}

pub fn import_model(model: &PmdModel, spec: &MeshImportSpec) -> Result<ImportedMesh> {
    let axes = AxisMap::new(spec.up_axis, spec.effective_unit());

    let positions: Vec<Vec3> = model.vertices.iter().map(|v| axes.point(v.position)).collect();
    let source_bounds = Aabb::from_points(positions.iter().copied());
    let offset = import_offset(&source_bounds, spec);

    let vertices: Vec<MeshVertex> = model
        .vertices
        .iter()
        .zip(&positions)
        .map(|(v, p)| {
            MeshVertex::new(
                (*p + offset).to_array(),
                axes.direction(v.normal).to_array(),
                v.uv.to_array(),
            )
        })
        .collect();

    let vertex_count = vertices.len() as u32;
    let indices: Vec<u32> = model.indices.iter().map(|&i| u32::from(i)).collect();
    if let Some(bad) = indices.iter().find(|&&i| i >= vertex_count) {
        bail!("index {bad} out of range for {vertex_count} vertices");
    }

    let mut submeshes = model.submeshes()?;
    if !spec.material_name_prefix.is_empty() {
        for s in &mut submeshes {
            s.surface = format!("{}{}", spec.material_name_prefix, s.surface);
        }
    }

    let nodes = import_nodes(model, &axes, offset)?;
    let skin = model.skin_weights();
    if let Some(w) = skin.iter().find(|w| usize::from(w.bone) >= nodes.len()) {
        bail!(
            "vertex {} is weighted to bone {} of {}",
            w.vertex,
            w.bone,
            nodes.len()
        );
    }

    let mut mesh = ImportedMesh {
        data: MeshData::new(vertices, indices),
        submeshes,
        skin,
        edge_vertices: model.vertices.iter().map(|v| v.edge != 0).collect(),
        morphs: import_morphs(model, &axes),
        nodes,
        inverse_bind: Vec::new(),
        bounds: source_bounds.translated(offset),
        offset,
    };
    mesh.inverse_bind = (0..mesh.nodes.len())
        .map(|i| {
            mesh.node_position(i)
                .map(|p| Transform::new(p, Quat::IDENTITY).inverse_matrix())
                .context("bone hierarchy has a cycle")
        })
        .collect::<Result<_>>()?;

    log::info!(
        "Imported mesh: {} vertices, {} triangles, {} surfaces, {} nodes, {} morphs",
        mesh.data.vertices.len(),
        mesh.data.indices.len() / 3,
        mesh.submeshes.len(),
        mesh.nodes.len(),
        mesh.morphs.len()
    );
    Ok(mesh)
}

/// Children sit at their head minus the parent's head; roots at their head
/// plus the import offset.
fn import_nodes(model: &PmdModel, axes: &AxisMap, offset: Vec3) -> Result<Vec<MeshNode>> {
    model
        .bones
        .iter()
        .map(|bone| {
            let (parent, translation) = match bone.parent {
                Some(p) => {
                    let Some(parent) = model.bones.get(usize::from(p)) else {
                        bail!(
                            "bone '{}' has parent {} of {}",
                            bone.display_name(),
                            p,
                            model.bones.len()
                        );
                    };
                    (Some(usize::from(p)), axes.point(bone.head - parent.head))
                }
                None => (None, axes.point(bone.head) + offset),
            };
            Ok(MeshNode {
                name: bone.display_name(),
                parent,
                translation,
            })
        })
        .collect()
}

/// Expression morphs address vertices through the base morph (morph 0).
fn import_morphs(model: &PmdModel, axes: &AxisMap) -> Vec<MeshMorph> {
    let Some((base, expressions)) = model.morphs.split_first() else {
        return Vec::new();
    };
    expressions
        .iter()
        .map(|morph| {
            let offsets = morph
                .vertices
                .iter()
                .filter_map(|&(base_idx, delta)| {
                    let target = base.vertices.get(base_idx as usize).map(|&(v, _)| v);
                    if target.is_none() {
                        log::warn!(
                            "Morph '{}' references base entry {} of {}",
                            morph.name,
                            base_idx,
                            base.vertices.len()
                        );
                    }
                    target.map(|v| (v, axes.point(delta).to_array()))
                })
                .collect();
            MeshMorph {
                name: morph.name.to_lossy(),
                offsets,
            }
        })
        .collect()
}

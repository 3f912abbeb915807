//! PMD (Polygon Model Data) reader.
//!
//! Layout (little-endian): "Pmd", f32 version 1.0, name[20], comment[256],
//! then vertex, index, material, bone, IK, morph, display and physics
//! sections. The English, toon and physics sections are trailing extensions
//! that older exporters omit; a file ending before them is accepted.

use std::{fs, path::Path};

use anyhow::{Context, Result, bail};
use corelib::{Vec2, Vec3, Vec4};

use crate::binary::{ByteReader, RawName};

pub const PMD_MAGIC: &[u8; 3] = b"Pmd";
pub const PMD_VERSION: f32 = 1.0;

const NAME_LEN: usize = 20;
const COMMENT_LEN: usize = 256;
const GROUP_NAME_LEN: usize = 50;
const TOON_NAME_LEN: usize = 100;
const TOON_TEXTURE_COUNT: usize = 10;

const VERTEX_SIZE: usize = 38;
const MATERIAL_SIZE: usize = 70;
const BONE_SIZE: usize = 39;
const IK_MIN_SIZE: usize = 11;
const MORPH_MIN_SIZE: usize = 25;
const MORPH_VERTEX_SIZE: usize = 16;
const RIGID_BODY_SIZE: usize = 83;
const JOINT_SIZE: usize = 124;

/// Toon index meaning "no toon texture".
pub const NO_TOON: u8 = 0xFF;

#[derive(Clone, Debug, PartialEq)]
pub struct PmdVertex {
    pub position: Vec3,
    pub normal: Vec3,
    pub uv: Vec2,
    pub bones: [u16; 2],
    /// Weight of `bones[0]` in percent (0-100).
    pub weight: u8,
    /// Non-zero when the vertex takes part in edge (outline) rendering.
    pub edge: u8,
}

#[derive(Clone, Debug, PartialEq)]
pub struct PmdMaterial {
    pub diffuse: Vec4,
    pub specular_power: f32,
    pub specular: Vec3,
    pub ambient: Vec3,
    pub toon_index: u8,
    pub edge: u8,
    /// Number of consecutive indices drawn with this material.
    pub index_count: u32,
    pub texture: RawName,
}

impl PmdMaterial {
    pub fn has_toon(&self) -> bool {
        self.toon_index != NO_TOON
    }
}

pub const BONE_KIND_IK: u8 = 4;

#[derive(Clone, Debug, PartialEq)]
pub struct PmdBone {
    pub name: RawName,
    pub english_name: Option<RawName>,
    /// `None` for root bones.
    pub parent: Option<u16>,
    pub tail: Option<u16>,
    pub kind: u8,
    pub ik_target: Option<u16>,
    pub head: Vec3,
}

impl PmdBone {
    /// English name when present, otherwise the native name.
    pub fn display_name(&self) -> String {
        match &self.english_name {
            Some(n) if !n.is_empty() => n.to_lossy(),
            _ => self.name.to_lossy(),
        }
    }

    pub fn is_ik(&self) -> bool {
        self.kind == BONE_KIND_IK
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct PmdIk {
    pub destination: u16,
    pub target: u16,
    pub max_iterations: u16,
    pub max_angle: f32,
    /// Affected bones, from the effector towards the root.
    pub links: Vec<u16>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MorphKind {
    /// Type 0: the base morph (index 0) and uncategorised morphs.
    Other,
    Eyebrow,
    Eye,
    Lip,
}

impl From<u8> for MorphKind {
    fn from(v: u8) -> Self {
        match v {
            1 => Self::Eyebrow,
            2 => Self::Eye,
            3 => Self::Lip,
            _ => Self::Other,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct PmdMorph {
    pub name: RawName,
    pub english_name: Option<RawName>,
    pub kind: MorphKind,
    /// For the base morph: absolute positions keyed by model vertex.
    /// For other morphs: offsets keyed by index into the base morph.
    pub vertices: Vec<(u32, Vec3)>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct PmdRigidBody {
    pub name: RawName,
    pub bone: u16,
    pub group: u8,
    pub mask: u16,
    pub shape: u8,
    pub size: Vec3,
    pub position: Vec3,
    pub rotation: Vec3,
    pub mass: f32,
    pub linear_damping: f32,
    pub angular_damping: f32,
    pub restitution: f32,
    pub friction: f32,
    pub mode: u8,
}

#[derive(Clone, Debug, PartialEq)]
pub struct PmdJoint {
    pub name: RawName,
    pub bodies: [u32; 2],
    pub position: Vec3,
    pub rotation: Vec3,
    pub position_limits: [Vec3; 2],
    pub rotation_limits: [Vec3; 2],
    pub position_stiffness: Vec3,
    pub rotation_stiffness: Vec3,
}

/// Contiguous index range drawn with one material.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Submesh {
    pub surface: String,
    pub material: usize,
    pub start: u32,
    pub count: u32,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SkinWeight {
    pub vertex: u32,
    pub bone: u16,
    pub weight: f32,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct PmdModel {
    pub name: RawName,
    pub comment: RawName,
    pub english_name: Option<RawName>,
    pub english_comment: Option<RawName>,
    pub vertices: Vec<PmdVertex>,
    pub indices: Vec<u16>,
    pub materials: Vec<PmdMaterial>,
    pub bones: Vec<PmdBone>,
    pub iks: Vec<PmdIk>,
    pub morphs: Vec<PmdMorph>,
    pub displayed_morphs: Vec<u16>,
    pub bone_groups: Vec<RawName>,
    pub english_bone_groups: Vec<RawName>,
    /// (bone, group) pairs shown in the editor's bone panel.
    pub displayed_bones: Vec<(u16, u8)>,
    pub toon_textures: Vec<RawName>,
    pub rigid_bodies: Vec<PmdRigidBody>,
    pub joints: Vec<PmdJoint>,
}

fn optional_index(v: i16) -> Option<u16> {
    u16::try_from(v).ok()
}

pub fn load_pmd_from_path(path: impl AsRef<Path>) -> Result<PmdModel> {
    let path = path.as_ref();
    let bytes = fs::read(path)
        .with_context(|| format!("Failed to open PMD file: {}", path.display()))?;
    let model = load_pmd_from_bytes(&bytes)
        .with_context(|| format!("Failed to parse PMD file: {}", path.display()))?;
    log::info!(
        "Loaded PMD '{}' from {}: {} verts, {} tris, {} materials, {} bones, {} morphs",
        model.display_name(),
        path.display(),
        model.vertices.len(),
        model.indices.len() / 3,
        model.materials.len(),
        model.bones.len(),
        model.morphs.len()
    );
    Ok(model)
}

pub fn load_pmd_from_bytes(bytes: &[u8]) -> Result<PmdModel> {
    let mut r = ByteReader::new(bytes);
    let mut model = PmdModel::default();

    let magic = r.bytes(3, "header")?;
    if magic != PMD_MAGIC {
        bail!("Not a PMD file (bad magic {:?})", magic);
    }
    let version = r.f32("version")?;
    if version != PMD_VERSION {
        bail!("Unsupported PMD version {version}");
    }
    model.name = r.name(NAME_LEN, "model name")?;
    model.comment = r.name(COMMENT_LEN, "model comment")?;

    read_geometry(&mut r, &mut model).context("reading geometry")?;
    read_materials(&mut r, &mut model).context("reading materials")?;
    read_skeleton(&mut r, &mut model).context("reading bones")?;
    read_morphs(&mut r, &mut model).context("reading morphs")?;
    read_display(&mut r, &mut model).context("reading display lists")?;

    if r.is_empty() {
        log::debug!("PMD ends before the English section");
        return Ok(model);
    }
    read_english(&mut r, &mut model).context("reading English names")?;

    if r.is_empty() {
        return Ok(model);
    }
    for i in 0..TOON_TEXTURE_COUNT {
        model
            .toon_textures
            .push(r.name(TOON_NAME_LEN, "toon texture").with_context(|| format!("toon {i}"))?);
    }

    if r.is_empty() {
        return Ok(model);
    }
    read_physics(&mut r, &mut model).context("reading physics")?;

    if !r.is_empty() {
        log::warn!("PMD has {} trailing bytes", r.remaining());
    }
    Ok(model)
}

fn read_geometry(r: &mut ByteReader, model: &mut PmdModel) -> Result<()> {
    let count = r.u32("vertex count")? as usize;
    r.check_count(count, VERTEX_SIZE, "vertex")?;
    model.vertices.reserve(count);
    for _ in 0..count {
        model.vertices.push(PmdVertex {
            position: r.vec3("vertex position")?,
            normal: r.vec3("vertex normal")?,
            uv: r.vec2("vertex uv")?,
            bones: [r.u16("vertex bone")?, r.u16("vertex bone")?],
            weight: r.u8("vertex weight")?,
            edge: r.u8("vertex edge flag")?,
        });
    }

    let count = r.u32("index count")? as usize;
    r.check_count(count, 2, "index")?;
    model.indices.reserve(count);
    for _ in 0..count {
        model.indices.push(r.u16("index")?);
    }
    Ok(())
}

fn read_materials(r: &mut ByteReader, model: &mut PmdModel) -> Result<()> {
    let count = r.u32("material count")? as usize;
    r.check_count(count, MATERIAL_SIZE, "material")?;
    for _ in 0..count {
        model.materials.push(PmdMaterial {
            diffuse: r.vec4("diffuse")?,
            specular_power: r.f32("specular power")?,
            specular: r.vec3("specular")?,
            ambient: r.vec3("ambient")?,
            toon_index: r.u8("toon index")?,
            edge: r.u8("edge flag")?,
            index_count: r.u32("material index count")?,
            texture: r.name(NAME_LEN, "texture name")?,
        });
    }
    Ok(())
}

fn read_skeleton(r: &mut ByteReader, model: &mut PmdModel) -> Result<()> {
    let count = r.u16("bone count")? as usize;
    r.check_count(count, BONE_SIZE, "bone")?;
    for _ in 0..count {
        model.bones.push(PmdBone {
            name: r.name(NAME_LEN, "bone name")?,
            english_name: None,
            parent: optional_index(r.i16("bone parent")?),
            tail: optional_index(r.i16("bone tail")?),
            kind: r.u8("bone kind")?,
            ik_target: optional_index(r.i16("bone ik target")?),
            head: r.vec3("bone head")?,
        });
    }

    let count = r.u16("ik count")? as usize;
    r.check_count(count, IK_MIN_SIZE, "ik chain")?;
    for _ in 0..count {
        let destination = r.u16("ik destination")?;
        let target = r.u16("ik target")?;
        let link_count = r.u8("ik link count")?;
        let max_iterations = r.u16("ik iterations")?;
        let max_angle = r.f32("ik max angle")?;
        let links = (0..link_count)
            .map(|_| r.u16("ik link"))
            .collect::<Result<Vec<_>>>()?;
        model.iks.push(PmdIk {
            destination,
            target,
            max_iterations,
            max_angle,
            links,
        });
    }
    Ok(())
}

fn read_morphs(r: &mut ByteReader, model: &mut PmdModel) -> Result<()> {
    let count = r.u16("morph count")? as usize;
    r.check_count(count, MORPH_MIN_SIZE, "morph")?;
    for _ in 0..count {
        let name = r.name(NAME_LEN, "morph name")?;
        let vertex_count = r.u32("morph vertex count")? as usize;
        let kind = MorphKind::from(r.u8("morph kind")?);
        r.check_count(vertex_count, MORPH_VERTEX_SIZE, "morph vertex")?;
        let vertices = (0..vertex_count)
            .map(|_| -> Result<(u32, Vec3)> {
                Ok((r.u32("morph vertex index")?, r.vec3("morph vertex offset")?))
            })
            .collect::<Result<Vec<_>>>()?;
        model.morphs.push(PmdMorph {
            name,
            english_name: None,
            kind,
            vertices,
        });
    }
    Ok(())
}

fn read_display(r: &mut ByteReader, model: &mut PmdModel) -> Result<()> {
    let count = r.u8("displayed morph count")?;
    for _ in 0..count {
        model.displayed_morphs.push(r.u16("displayed morph")?);
    }

    let count = r.u8("bone group count")?;
    for _ in 0..count {
        model
            .bone_groups
            .push(r.name(GROUP_NAME_LEN, "bone group name")?);
    }

    let count = r.u32("displayed bone count")? as usize;
    r.check_count(count, 3, "displayed bone")?;
    for _ in 0..count {
        model
            .displayed_bones
            .push((r.u16("displayed bone")?, r.u8("displayed bone group")?));
    }
    Ok(())
}

fn read_english(r: &mut ByteReader, model: &mut PmdModel) -> Result<()> {
    if r.u8("English flag")? != 1 {
        return Ok(());
    }
    model.english_name = Some(r.name(NAME_LEN, "English model name")?);
    model.english_comment = Some(r.name(COMMENT_LEN, "English comment")?);
    for bone in &mut model.bones {
        bone.english_name = Some(r.name(NAME_LEN, "English bone name")?);
    }
    // The base morph has no English name.
    for morph in model.morphs.iter_mut().skip(1) {
        morph.english_name = Some(r.name(NAME_LEN, "English morph name")?);
    }
    for _ in 0..model.bone_groups.len() {
        model
            .english_bone_groups
            .push(r.name(GROUP_NAME_LEN, "English bone group name")?);
    }
    Ok(())
}

fn read_physics(r: &mut ByteReader, model: &mut PmdModel) -> Result<()> {
    let count = r.u32("rigid body count")? as usize;
    r.check_count(count, RIGID_BODY_SIZE, "rigid body")?;
    for _ in 0..count {
        model.rigid_bodies.push(PmdRigidBody {
            name: r.name(NAME_LEN, "rigid body name")?,
            bone: r.u16("rigid body bone")?,
            group: r.u8("rigid body group")?,
            mask: r.u16("rigid body mask")?,
            shape: r.u8("rigid body shape")?,
            size: r.vec3("rigid body size")?,
            position: r.vec3("rigid body position")?,
            rotation: r.vec3("rigid body rotation")?,
            mass: r.f32("rigid body mass")?,
            linear_damping: r.f32("rigid body damping")?,
            angular_damping: r.f32("rigid body damping")?,
            restitution: r.f32("rigid body restitution")?,
            friction: r.f32("rigid body friction")?,
            mode: r.u8("rigid body mode")?,
        });
    }

    let count = r.u32("joint count")? as usize;
    r.check_count(count, JOINT_SIZE, "joint")?;
    for _ in 0..count {
        model.joints.push(PmdJoint {
            name: r.name(NAME_LEN, "joint name")?,
            bodies: [r.u32("joint body")?, r.u32("joint body")?],
            position: r.vec3("joint position")?,
            rotation: r.vec3("joint rotation")?,
            position_limits: [r.vec3("joint limit")?, r.vec3("joint limit")?],
            rotation_limits: [r.vec3("joint limit")?, r.vec3("joint limit")?],
            position_stiffness: r.vec3("joint stiffness")?,
            rotation_stiffness: r.vec3("joint stiffness")?,
        });
    }
    Ok(())
}

impl PmdModel {
    /// English name when present, otherwise the native name.
    pub fn display_name(&self) -> String {
        match &self.english_name {
            Some(n) if !n.is_empty() => n.to_lossy(),
            _ => self.name.to_lossy(),
        }
    }

    /// Surface name of the mesh slice drawn with material `index`.
    pub fn surface_name(&self, index: usize) -> String {
        format!("{}_{}", self.display_name(), index)
    }

    pub fn surfaces(&self) -> Vec<String> {
        (0..self.materials.len()).map(|i| self.surface_name(i)).collect()
    }

    pub fn has_edge_vertices(&self) -> bool {
        self.vertices.iter().any(|v| v.edge != 0)
    }

    pub fn root_bones(&self) -> impl Iterator<Item = (usize, &PmdBone)> {
        self.bones.iter().enumerate().filter(|(_, b)| b.parent.is_none())
    }

    /// Partition the index buffer by material, in material order.
    pub fn submeshes(&self) -> Result<Vec<Submesh>> {
        let total = self.indices.len() as u64;
        let mut start: u64 = 0;
        let mut out = Vec::with_capacity(self.materials.len());
        for (i, mat) in self.materials.iter().enumerate() {
            let end = start + u64::from(mat.index_count);
            if end > total {
                bail!(
                    "material {i} draws indices {start}..{end} but the model has only {total}"
                );
            }
            out.push(Submesh {
                surface: self.surface_name(i),
                material: i,
                start: start as u32,
                count: mat.index_count,
            });
            start = end;
        }
        if start < total {
            log::warn!("{} indices are not drawn by any material", total - start);
        }
        Ok(out)
    }

    /// Two weights per vertex: `weight`% to the first bone, the rest to the
    /// second. Zero weights are skipped.
    pub fn skin_weights(&self) -> Vec<SkinWeight> {
        let mut out = Vec::with_capacity(self.vertices.len() * 2);
        for (i, v) in self.vertices.iter().enumerate() {
            let first = u32::from(v.weight.min(100));
            if first > 0 {
                out.push(SkinWeight {
                    vertex: i as u32,
                    bone: v.bones[0],
                    weight: first as f32 / 100.0,
                });
            }
            if first < 100 {
                out.push(SkinWeight {
                    vertex: i as u32,
                    bone: v.bones[1],
                    weight: (100 - first) as f32 / 100.0,
                });
            }
        }
        out
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use crate::binary::ByteWriter;

    /// One textured triangle drawn by the first of two materials, two bones,
    /// one IK chain, a base morph plus one expression and, optionally, the
    /// English/toon/physics trailer.
    pub fn triangle_pmd(with_extensions: bool) -> Vec<u8> {
        let mut w = ByteWriter::default();
        w.raw(b"Pmd").f32(1.0).padded(b"native", 20).padded(b"comment", 256);

        w.u32(3);
        for (i, pos) in [[0.0f32, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 2.0, 1.0]].iter().enumerate() {
            w.floats(pos).floats(&[0.0, 1.0, 0.0]).floats(&[0.5, 0.5]);
            w.u16(0).u16(1).u8([100, 0, 40][i]).u8(u8::from(i == 2));
        }
        w.u32(3).u16(0).u16(1).u16(2);

        w.u32(2);
        w.floats(&[0.8, 0.7, 0.6, 1.0]).f32(5.0).floats(&[0.1, 0.1, 0.1]).floats(&[0.5, 0.5, 0.5]);
        w.u8(1).u8(1).u32(3).padded(b"eye2.bmp", 20);
        w.floats(&[0.0, 0.5, 0.5, 1.0]).f32(10.0).floats(&[0.25, 0.25, 0.25]).floats(&[0.0; 3]);
        w.u8(0xFF).u8(0).u32(0).padded(b"", 20);

        w.u16(2);
        w.padded(b"root", 20).i16(-1).i16(1).u8(0).i16(0).floats(&[0.0, 0.0, 0.0]);
        w.padded(b"leg", 20).i16(0).i16(-1).u8(4).i16(0).floats(&[0.0, 1.0, 0.0]);

        w.u16(1);
        w.u16(1).u16(0).u8(1).u16(15).f32(0.5).u16(0);

        w.u16(2);
        w.padded(b"base", 20).u32(1).u8(0).u32(2).floats(&[0.0, 2.0, 1.0]);
        w.padded(b"smile", 20).u32(1).u8(3).u32(0).floats(&[0.0, 0.1, 0.0]);

        w.u8(1).u16(1);
        w.u8(1).padded(b"group", 50);
        w.u32(1).u16(1).u8(1);

        if with_extensions {
            w.u8(1).padded(b"Model", 20).padded(b"english comment", 256);
            w.padded(b"Root", 20).padded(b"Leg", 20);
            w.padded(b"Smile", 20);
            w.padded(b"Group", 50);
            for i in 1..=10 {
                w.padded(format!("toon{i:02}.bmp").as_bytes(), 100);
            }
            w.u32(0).u32(0);
        }
        w.buf
    }
}

//! Material definitions and the name/surface registry.
//!
//! Materials are declared as `singleton Material(Name) { ... };` blocks. Only
//! stage 0 of the per-stage fields is modelled.

use std::{collections::HashMap, fmt, path::Path, str::FromStr};

use anyhow::{Context, Result};
use corelib::{CoreError, CoreResult, Rgba};

use crate::pmd::PmdModel;
use crate::script::{self, ObjectDecl, ObjectKind, Script, parse_bool, writer};

pub const MATERIAL_CLASS: &str = "Material";

const DEFAULT_SPECULAR_POWER: f32 = 8.0;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum BlendOp {
    #[default]
    None,
    Mul,
    Add,
    AddAlpha,
    Sub,
    LerpAlpha,
    PreMul,
}

impl FromStr for BlendOp {
    type Err = CoreError;

    fn from_str(s: &str) -> CoreResult<Self> {
        const ALL: [BlendOp; 7] = [
            BlendOp::None,
            BlendOp::Mul,
            BlendOp::Add,
            BlendOp::AddAlpha,
            BlendOp::Sub,
            BlendOp::LerpAlpha,
            BlendOp::PreMul,
        ];
        ALL.into_iter()
            .find(|op| op.to_string().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| CoreError::Parse {
                what: "translucentBlendOp",
                value: s.to_string(),
            })
    }
}

impl fmt::Display for BlendOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::None => "None",
            Self::Mul => "Mul",
            Self::Add => "Add",
            Self::AddAlpha => "AddAlpha",
            Self::Sub => "Sub",
            Self::LerpAlpha => "LerpAlpha",
            Self::PreMul => "PreMul",
        })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct MaterialSpec {
    pub name: String,
    /// Surface this material binds to.
    pub map_to: String,
    pub diffuse_color: Rgba,
    pub specular: Rgba,
    pub specular_power: f32,
    pub toon_shade: bool,
    pub toon_shade_texture: Option<String>,
    pub diffuse_map: Option<String>,
    pub renders_edge: bool,
    pub translucent_blend_op: BlendOp,
    pub translucent: bool,
    pub double_sided: bool,
}

fn parse_f32(what: &'static str, value: &str) -> CoreResult<f32> {
    value.trim().parse().map_err(|_| CoreError::Parse {
        what,
        value: value.to_string(),
    })
}

fn parse_flag(what: &'static str, value: &str) -> CoreResult<bool> {
    parse_bool(value).ok_or_else(|| CoreError::Parse {
        what,
        value: value.to_string(),
    })
}

fn non_empty(value: &str) -> Option<String> {
    (!value.is_empty()).then(|| value.to_string())
}

fn flag_text(v: bool) -> &'static str {
    if v { "1" } else { "0" }
}

/// Make a string usable as a script identifier: ASCII punctuation and spaces
/// become `_`. Other bytes are kept as they are.
pub fn clean_name(s: &str) -> String {
    s.chars()
        .map(|c| {
            if c == ' ' || (c.is_ascii_punctuation() && c != '_') {
                '_'
            } else {
                c
            }
        })
        .collect()
}

impl MaterialSpec {
    pub fn new(name: impl Into<String>, map_to: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            map_to: map_to.into(),
            diffuse_color: Rgba::WHITE,
            specular: Rgba::WHITE,
            specular_power: DEFAULT_SPECULAR_POWER,
            toon_shade: false,
            toon_shade_texture: None,
            diffuse_map: None,
            renders_edge: false,
            translucent_blend_op: BlendOp::None,
            translucent: false,
            double_sided: false,
        }
    }

    pub fn from_object(obj: &ObjectDecl) -> CoreResult<Self> {
        let mut spec = Self::new(obj.name.clone(), "");
        for field in &obj.fields {
            let key = field.name.to_ascii_lowercase();
            let value = field.value.as_str();
            let staged = matches!(
                key.as_str(),
                "diffusecolor"
                    | "specular"
                    | "specularpower"
                    | "toonshade"
                    | "toonshadetexture"
                    | "diffusemap"
            );
            if staged && field.index.is_some_and(|i| i > 0) {
                log::warn!(
                    "{}: stage {} of '{}' ignored",
                    obj.name,
                    field.index.unwrap_or_default(),
                    field.name
                );
                continue;
            }
            match key.as_str() {
                "mapto" => spec.map_to = value.to_string(),
                "diffusecolor" => spec.diffuse_color = value.parse()?,
                "specular" => spec.specular = value.parse()?,
                "specularpower" => spec.specular_power = parse_f32("specularPower", value)?,
                "toonshade" => spec.toon_shade = parse_flag("toonShade", value)?,
                "toonshadetexture" => spec.toon_shade_texture = non_empty(value),
                "diffusemap" => spec.diffuse_map = non_empty(value),
                "rendersedge" => spec.renders_edge = parse_flag("rendersEdge", value)?,
                "translucentblendop" => spec.translucent_blend_op = value.parse()?,
                "translucent" => spec.translucent = parse_flag("translucent", value)?,
                "doublesided" => spec.double_sided = parse_flag("doubleSided", value)?,
                _ => log::warn!("{}: unknown material field '{}' ignored", obj.name, field.name),
            }
        }
        if spec.map_to.is_empty() {
            log::warn!("{}: no mapTo, material binds to nothing", spec.name);
        }
        Ok(spec)
    }

    /// Script block for this material, fields in the order the engine writes.
    pub fn to_object(&self) -> ObjectDecl {
        let mut obj = ObjectDecl::new(ObjectKind::Singleton, MATERIAL_CLASS, self.name.clone());
        obj.push_field("mapTo", None, self.map_to.clone());
        obj.push_field("diffuseColor", Some(0), self.diffuse_color.to_string());
        if let Some(map) = &self.diffuse_map {
            obj.push_field("diffuseMap", Some(0), map.clone());
        }
        obj.push_field("specular", Some(0), self.specular.to_string());
        obj.push_field("specularPower", Some(0), self.specular_power.to_string());
        obj.push_field("toonShade", Some(0), flag_text(self.toon_shade));
        if let Some(tex) = &self.toon_shade_texture {
            obj.push_field("toonShadeTexture", Some(0), tex.clone());
        }
        if self.renders_edge {
            obj.push_field("rendersEdge", None, "1");
        }
        if self.translucent {
            obj.push_field("translucent", None, "1");
        }
        if self.double_sided {
            obj.push_field("doubleSided", None, "1");
        }
        obj.push_field("translucentBlendOp", None, self.translucent_blend_op.to_string());
        obj
    }

    /// Color channels in [0, 1] and a positive specular power.
    pub fn validate(&self) -> CoreResult<()> {
        self.diffuse_color
            .validate(&format!("{}.diffuseColor", self.name))?;
        self.specular.validate(&format!("{}.specular", self.name))?;
        if self.specular_power.is_nan() || self.specular_power <= 0.0 {
            return Err(CoreError::OutOfRange {
                field: format!("{}.specularPower", self.name),
                value: self.specular_power,
            });
        }
        Ok(())
    }

    /// Material for the surface drawn with model material `index`, named after
    /// the shape file (`shape_file` without extension).
    pub fn from_pmd(model: &PmdModel, index: usize, shape_file: &str) -> Option<Self> {
        Self::from_pmd_prefixed(model, index, shape_file, "")
    }

    /// As [`MaterialSpec::from_pmd`], for a surface imported with `prefix`.
    pub fn from_pmd_prefixed(
        model: &PmdModel,
        index: usize,
        shape_file: &str,
        prefix: &str,
    ) -> Option<Self> {
        let mat = model.materials.get(index)?;
        let surface = format!("{prefix}{}", model.surface_name(index));

        let clean_file = clean_name(shape_file);
        let mut name = clean_name(&surface);
        if !name.starts_with(&clean_file) {
            name = format!("{clean_file}_{name}");
        }

        let mut spec = Self::new(name, surface);
        spec.diffuse_color = Rgba::rgb(mat.diffuse.x, mat.diffuse.y, mat.diffuse.z);
        spec.specular = Rgba::rgb(mat.specular.x, mat.specular.y, mat.specular.z);
        spec.specular_power = mat.specular_power;
        spec.toon_shade = true;
        // Index 0 shades without a ramp texture.
        if mat.has_toon() && mat.toon_index > 0 {
            spec.toon_shade_texture = Some(format!("toon{:02}", mat.toon_index));
        }
        spec.diffuse_map = non_empty(&mat.texture.to_lossy());
        spec.renders_edge = mat.edge != 0;
        Some(spec)
    }

    /// Texture names this material references.
    pub fn texture_names(&self) -> impl Iterator<Item = &str> {
        self.diffuse_map
            .as_deref()
            .into_iter()
            .chain(self.toon_shade_texture.as_deref())
    }
}

/// Outcome of binding a registry against the surfaces of one mesh.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SurfaceBindings {
    /// Every surface in mesh order with the material bound to it, if any.
    pub surfaces: Vec<(String, Option<String>)>,
    /// Materials whose `mapTo` names no surface of the mesh.
    pub inert: Vec<String>,
}

impl SurfaceBindings {
    pub fn material_for(&self, surface: &str) -> Option<&str> {
        self.surfaces
            .iter()
            .find(|(s, _)| s.eq_ignore_ascii_case(surface))
            .and_then(|(_, m)| m.as_deref())
    }

    pub fn unbound(&self) -> impl Iterator<Item = &str> {
        self.surfaces
            .iter()
            .filter(|(_, m)| m.is_none())
            .map(|(s, _)| s.as_str())
    }

    pub fn bound_count(&self) -> usize {
        self.surfaces.iter().filter(|(_, m)| m.is_some()).count()
    }
}

/// Engine object names compare without regard to ASCII case.
fn name_key(name: &str) -> String {
    name.to_ascii_lowercase()
}

/// Materials by unique name, with a `mapTo` index for surface lookup.
#[derive(Clone, Debug, Default)]
pub struct MaterialRegistry {
    materials: Vec<MaterialSpec>,
    by_name: HashMap<String, usize>,
    by_surface: HashMap<String, usize>,
}

impl MaterialRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, spec: MaterialSpec) -> CoreResult<()> {
        let key = name_key(&spec.name);
        if self.by_name.contains_key(&key) {
            return Err(CoreError::DuplicateName(spec.name));
        }
        let idx = self.materials.len();
        self.by_name.insert(key, idx);
        self.index_surface(idx, &spec);
        self.materials.push(spec);
        Ok(())
    }

    fn index_surface(&mut self, idx: usize, spec: &MaterialSpec) {
        if spec.map_to.is_empty() {
            return;
        }
        if let Some(prev) = self.by_surface.insert(name_key(&spec.map_to), idx) {
            if prev != idx {
                log::warn!(
                    "Surface '{}' mapped by '{}' and '{}'; using '{}'",
                    spec.map_to,
                    self.materials[prev].name,
                    spec.name,
                    spec.name
                );
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&MaterialSpec> {
        self.by_name.get(&name_key(name)).map(|&i| &self.materials[i])
    }

    pub fn for_surface(&self, surface: &str) -> Option<&MaterialSpec> {
        self.by_surface.get(&name_key(surface)).map(|&i| &self.materials[i])
    }

    /// Materials in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &MaterialSpec> {
        self.materials.iter()
    }

    pub fn len(&self) -> usize {
        self.materials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.materials.is_empty()
    }

    pub fn validate(&self) -> CoreResult<()> {
        self.materials.iter().try_for_each(MaterialSpec::validate)
    }

    pub fn bind_surfaces<I, S>(&self, surfaces: I) -> SurfaceBindings
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let surfaces: Vec<(String, Option<String>)> = surfaces
            .into_iter()
            .map(|s| {
                let s = s.as_ref();
                (s.to_string(), self.for_surface(s).map(|m| m.name.clone()))
            })
            .collect();
        let inert: Vec<String> = self
            .materials
            .iter()
            .filter(|m| !surfaces.iter().any(|(s, _)| s.eq_ignore_ascii_case(&m.map_to)))
            .map(|m| m.name.clone())
            .collect();
        for name in &inert {
            log::warn!("Material '{name}' maps to no surface of this mesh");
        }
        SurfaceBindings { surfaces, inert }
    }

    /// Add generated materials. Existing names are kept unless `force` is set,
    /// in which case they are overwritten. Returns the names that changed.
    pub fn merge_generated(&mut self, generated: Vec<MaterialSpec>, force: bool) -> Vec<String> {
        let mut changed = Vec::new();
        for spec in generated {
            match self.by_name.get(&name_key(&spec.name)).copied() {
                Some(idx) if force => {
                    if self.materials[idx] != spec {
                        log::debug!("Updating material '{}'", spec.name);
                        changed.push(spec.name.clone());
                        self.materials[idx] = spec;
                    }
                }
                Some(_) => log::debug!("Keeping existing material '{}'", spec.name),
                None => {
                    log::debug!("Adding material '{}'", spec.name);
                    changed.push(spec.name.clone());
                    let idx = self.materials.len();
                    self.by_name.insert(name_key(&spec.name), idx);
                    self.materials.push(spec);
                }
            }
        }
        if !changed.is_empty() {
            self.reindex_surfaces();
        }
        changed
    }

    fn reindex_surfaces(&mut self) {
        self.by_surface.clear();
        for (idx, m) in self.materials.iter().enumerate() {
            if !m.map_to.is_empty() {
                self.by_surface.insert(name_key(&m.map_to), idx);
            }
        }
    }

    pub fn from_script(script: &Script) -> Result<Self> {
        let mut registry = Self::new();
        for obj in script.objects_of_class(MATERIAL_CLASS) {
            let spec = MaterialSpec::from_object(obj)
                .with_context(|| format!("Invalid material '{}' (line {})", obj.name, obj.line))?;
            registry
                .insert(spec)
                .with_context(|| format!("Material '{}' (line {})", obj.name, obj.line))?;
        }
        Ok(registry)
    }

    pub fn load_from_str(contents: &str) -> Result<Self> {
        Self::from_script(&script::load_script_from_str(contents)?)
    }

    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let script = script::load_script_from_path(path)?;
        let registry = Self::from_script(&script)
            .with_context(|| format!("Failed to load materials from {}", path.display()))?;
        log::info!("Loaded {} materials from {}", registry.len(), path.display());
        Ok(registry)
    }

    /// The registry as a material script.
    pub fn to_script(&self) -> String {
        let objects: Vec<ObjectDecl> = self.materials.iter().map(MaterialSpec::to_object).collect();
        writer::write_objects(&objects)
    }
}

/// One generated material per model material, in model order. `prefix` is
/// the descriptor's material name prefix.
pub fn generate_materials(model: &PmdModel, shape_file: &str, prefix: &str) -> Vec<MaterialSpec> {
    (0..model.materials.len())
        .filter_map(|i| MaterialSpec::from_pmd_prefixed(model, i, shape_file, prefix))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pmd::{fixtures::triangle_pmd, load_pmd_from_bytes};

    const FACE: &str = r#"
singleton Material(Shape_face_0)
{
   mapTo = "face_0";
   diffuseColor[0] = "0.133 0.62 0.714 1";
   specular[0] = "0 0 0 1";
   specularPower[0] = "5";
   toonShade[0] = "1";
   toonShadeTexture[0] = "toon02";
   rendersEdge = "1";
   translucentBlendOp = "None";
};
"#;

    #[test]
    fn parses_material_fields() {
        let registry = MaterialRegistry::load_from_str(FACE).unwrap();
        let m = registry.get("Shape_face_0").unwrap();
        assert_eq!(m.map_to, "face_0");
        assert_eq!(m.diffuse_color, Rgba::new(0.133, 0.62, 0.714, 1.0));
        assert_eq!(m.specular, Rgba::BLACK);
        assert_eq!(m.specular_power, 5.0);
        assert!(m.toon_shade);
        assert_eq!(m.toon_shade_texture.as_deref(), Some("toon02"));
        assert!(m.renders_edge);
        assert_eq!(m.translucent_blend_op, BlendOp::None);
        assert!(m.diffuse_map.is_none());
        assert_eq!(registry.for_surface("face_0").unwrap().name, "Shape_face_0");
    }

    #[test]
    fn defaults_apply_to_missing_fields() {
        let m = MaterialRegistry::load_from_str("singleton Material(M) { mapTo = \"s\"; };")
            .unwrap()
            .get("M")
            .cloned()
            .unwrap();
        assert_eq!(m.diffuse_color, Rgba::WHITE);
        assert_eq!(m.specular_power, 8.0);
        assert!(!m.toon_shade);
    }

    #[test]
    fn other_stages_are_ignored() {
        let src = r#"singleton Material(M) {
            diffuseColor[0] = "0.5 0.5 0.5 1";
            diffuseColor[1] = "0 0 0 1";
        };"#;
        let registry = MaterialRegistry::load_from_str(src).unwrap();
        assert_eq!(registry.get("M").unwrap().diffuse_color, Rgba::new(0.5, 0.5, 0.5, 1.0));
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let mut registry = MaterialRegistry::new();
        registry.insert(MaterialSpec::new("A", "s0")).unwrap();
        let err = registry.insert(MaterialSpec::new("A", "s1")).unwrap_err();
        assert_eq!(err, CoreError::DuplicateName("A".into()));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn names_differing_only_in_case_collide() {
        let src = "singleton Material(Face) { mapTo = \"a\"; };\nsingleton Material(FACE) { mapTo = \"b\"; };";
        let err = MaterialRegistry::load_from_str(src).unwrap_err();
        assert!(format!("{err:#}").contains("Duplicate name 'FACE'"));

        let mut registry = MaterialRegistry::new();
        registry.insert(MaterialSpec::new("Face", "Body_0")).unwrap();
        assert_eq!(registry.get("face").unwrap().name, "Face");
        assert_eq!(registry.for_surface("BODY_0").unwrap().name, "Face");
        assert!(registry.bind_surfaces(["body_0"]).inert.is_empty());
    }

    #[test]
    fn later_material_wins_a_surface() {
        let mut registry = MaterialRegistry::new();
        registry.insert(MaterialSpec::new("A", "s0")).unwrap();
        registry.insert(MaterialSpec::new("B", "s0")).unwrap();
        assert_eq!(registry.for_surface("s0").unwrap().name, "B");
    }

    #[test]
    fn unmatched_map_to_is_inert() {
        let mut registry = MaterialRegistry::new();
        registry.insert(MaterialSpec::new("A", "s0")).unwrap();
        registry.insert(MaterialSpec::new("Ghost", "nowhere")).unwrap();
        let bindings = registry.bind_surfaces(["s0", "s1"]);
        assert_eq!(bindings.material_for("s0"), Some("A"));
        assert_eq!(bindings.unbound().collect::<Vec<_>>(), vec!["s1"]);
        assert_eq!(bindings.inert, vec!["Ghost".to_string()]);
        assert_eq!(bindings.bound_count(), 1);
    }

    #[test]
    fn validation_reports_offending_field() {
        let mut m = MaterialSpec::new("Bad", "s");
        m.specular = Rgba::new(0.5, 1.5, 0.0, 1.0);
        match m.validate() {
            Err(CoreError::OutOfRange { field, value }) => {
                assert_eq!(field, "Bad.specular.g");
                assert_eq!(value, 1.5);
            }
            other => panic!("unexpected {other:?}"),
        }

        let mut m = MaterialSpec::new("Dull", "s");
        m.specular_power = 0.0;
        assert!(m.validate().is_err());
    }

    #[test]
    fn blend_op_parses_any_case() {
        assert_eq!("lerpalpha".parse::<BlendOp>().unwrap(), BlendOp::LerpAlpha);
        assert_eq!("PreMul".parse::<BlendOp>().unwrap(), BlendOp::PreMul);
        assert!("Screen".parse::<BlendOp>().is_err());
    }

    #[test]
    fn clean_name_keeps_non_ascii() {
        assert_eq!(clean_name("Miku Hatsune.v2"), "Miku_Hatsune_v2");
        assert_eq!(clean_name("ùÔC\u{b}\u{1}_0"), "ùÔC\u{b}\u{1}_0");
    }

    #[test]
    fn generates_materials_from_model() {
        let model = load_pmd_from_bytes(&triangle_pmd(true)).unwrap();
        let generated = generate_materials(&model, "Model", "");
        assert_eq!(generated.len(), 2);

        let first = &generated[0];
        assert_eq!(first.name, "Model_0");
        assert_eq!(first.map_to, "Model_0");
        assert_eq!(first.diffuse_color.a, 1.0);
        assert!(first.toon_shade);
        assert_eq!(first.toon_shade_texture.as_deref(), Some("toon01"));
        assert_eq!(first.diffuse_map.as_deref(), Some("eye2.bmp"));
        assert!(first.renders_edge);

        let second = &generated[1];
        assert_eq!(second.name, "Model_1");
        assert!(second.toon_shade_texture.is_none());
        assert!(second.diffuse_map.is_none());
        assert!(!second.renders_edge);
    }

    #[test]
    fn generated_names_are_prefixed_by_shape_file() {
        let model = load_pmd_from_bytes(&triangle_pmd(true)).unwrap();
        let m = MaterialSpec::from_pmd(&model, 0, "my shape").unwrap();
        assert_eq!(m.name, "my_shape_Model_0");
        assert!(MaterialSpec::from_pmd(&model, 9, "x").is_none());

        let prefixed = generate_materials(&model, "Model", "hi_");
        assert_eq!(prefixed[0].map_to, "hi_Model_0");
        assert_eq!(prefixed[0].name, "Model_hi_Model_0");
    }

    #[test]
    fn merge_respects_force_flag() {
        let mut registry = MaterialRegistry::new();
        let mut existing = MaterialSpec::new("Model_0", "Model_0");
        existing.specular_power = 42.0;
        registry.insert(existing).unwrap();

        let model = load_pmd_from_bytes(&triangle_pmd(true)).unwrap();
        let changed = registry.merge_generated(generate_materials(&model, "Model", ""), false);
        assert_eq!(changed, vec!["Model_1".to_string()]);
        assert_eq!(registry.get("Model_0").unwrap().specular_power, 42.0);

        let changed = registry.merge_generated(generate_materials(&model, "Model", ""), true);
        assert_eq!(changed, vec!["Model_0".to_string()]);
        assert_ne!(registry.get("Model_0").unwrap().specular_power, 42.0);
        assert_eq!(registry.for_surface("Model_1").unwrap().name, "Model_1");
    }

    #[test]
    fn script_output_matches_engine_layout() {
        let registry = MaterialRegistry::load_from_str(FACE).unwrap();
        assert_eq!(registry.to_script(), FACE);
        let again = MaterialRegistry::load_from_str(&registry.to_script()).unwrap();
        assert_eq!(again.get("Shape_face_0"), registry.get("Shape_face_0"));
    }
}

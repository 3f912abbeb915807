//! Shape import descriptors (`TSShapeConstructor` blocks) and the shapes
//! they produce.
//!
//! A descriptor names a source mesh plus import options, and may define an
//! `onLoad` hook that registers animation sequences once the shape exists.

use std::{
    fmt,
    path::{Path, PathBuf},
    str::FromStr,
};

use anyhow::{Context, Result, anyhow};
use corelib::{CoreError, CoreResult};

use crate::script::{self, Call, ObjectDecl, Script, parse_bool};

/// Script class of shape descriptors.
pub const SHAPE_CONSTRUCTOR_CLASS: &str = "TSShapeConstructor";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum UpAxis {
    X,
    Y,
    Z,
    /// Z up, the frame model files are swapped into.
    #[default]
    Default,
}

impl FromStr for UpAxis {
    type Err = CoreError;

    fn from_str(s: &str) -> CoreResult<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "X_AXIS" | "X" => Ok(Self::X),
            "Y_AXIS" | "Y" => Ok(Self::Y),
            "Z_AXIS" | "Z" => Ok(Self::Z),
            "DEFAULT" | "" => Ok(Self::Default),
            _ => Err(CoreError::Parse {
                what: "up axis",
                value: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for UpAxis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::X => "X_AXIS",
            Self::Y => "Y_AXIS",
            Self::Z => "Z_AXIS",
            Self::Default => "DEFAULT",
        })
    }
}

/// How detail levels are recognised among source meshes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LodType {
    DetectDts,
    SingleSize,
    /// `mesh2`, `mesh100`: the numeric suffix is the detail size.
    #[default]
    TrailingNumber,
}

impl FromStr for LodType {
    type Err = CoreError;

    fn from_str(s: &str) -> CoreResult<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "detectdts" => Ok(Self::DetectDts),
            "singlesize" => Ok(Self::SingleSize),
            "trailingnumber" => Ok(Self::TrailingNumber),
            _ => Err(CoreError::Parse {
                what: "lod type",
                value: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for LodType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::DetectDts => "DetectDTS",
            Self::SingleSize => "SingleSize",
            Self::TrailingNumber => "TrailingNumber",
        })
    }
}

/// Import options for one mesh asset.
#[derive(Clone, Debug, PartialEq)]
pub struct MeshImportSpec {
    pub source_path: String,
    /// Non-positive means "use the source file's unit".
    pub unit: f32,
    pub up_axis: UpAxis,
    pub lod_type: LodType,
    pub ignore_node_scale: bool,
    pub recenter: bool,
    pub snap_to_floor: bool,
    pub force_material_refresh: bool,
    pub load_lights: bool,
    pub material_name_prefix: String,
}

impl MeshImportSpec {
    pub fn new(source_path: impl Into<String>) -> Self {
        Self {
            source_path: source_path.into(),
            unit: -1.0,
            up_axis: UpAxis::Default,
            lod_type: LodType::TrailingNumber,
            ignore_node_scale: false,
            recenter: false,
            snap_to_floor: false,
            force_material_refresh: false,
            load_lights: false,
            material_name_prefix: String::new(),
        }
    }

    pub fn effective_unit(&self) -> f32 {
        if self.unit > 0.0 { self.unit } else { 1.0 }
    }

    /// Read the import options from a descriptor block.
    pub fn from_object(obj: &ObjectDecl) -> CoreResult<Self> {
        let source = obj
            .field("baseShape", None)
            .ok_or(CoreError::MissingField("baseShape"))?;
        let mut spec = Self::new(source);

        for field in &obj.fields {
            let value = field.value.as_str();
            let flag = || {
                parse_bool(value).ok_or_else(|| CoreError::Parse {
                    what: "boolean",
                    value: value.to_string(),
                })
            };
            match field.name.to_ascii_lowercase().as_str() {
                "baseshape" => {}
                "unit" => {
                    spec.unit = value.trim().parse().map_err(|_| CoreError::Parse {
                        what: "unit",
                        value: value.to_string(),
                    })?
                }
                "upaxis" => spec.up_axis = value.parse()?,
                "lodtype" => spec.lod_type = value.parse()?,
                "ignorenodescale" => spec.ignore_node_scale = flag()?,
                "adjustcenter" => spec.recenter = flag()?,
                "adjustfloor" => spec.snap_to_floor = flag()?,
                "forceupdatematerials" => spec.force_material_refresh = flag()?,
                "loadlights" => spec.load_lights = flag()?,
                "matnameprefix" => spec.material_name_prefix = value.to_string(),
                _ => log::warn!(
                    "{}: ignoring unknown import option '{}'",
                    obj.name,
                    field.name
                ),
            }
        }
        Ok(spec)
    }

    /// Source path resolved against the directory holding the descriptor.
    pub fn resolve_source(&self, base_dir: &Path) -> PathBuf {
        base_dir.join(&self.source_path)
    }
}

/// One `addSequence` registration.
#[derive(Clone, Debug, PartialEq)]
pub struct SequenceImportSpec {
    pub source_file: String,
    /// Sequence selector inside the source (`"file.vmd ambient"`).
    pub source_sequence: Option<String>,
    pub name: String,
    pub start_frame: i32,
    /// `-1` selects the last frame of the source.
    pub end_frame: i32,
    /// Trailing boolean arguments; meaning is defined by the importer.
    pub flags: Vec<bool>,
}

impl SequenceImportSpec {
    pub fn new(source: &str, name: impl Into<String>, start_frame: i32, end_frame: i32) -> Self {
        let (source_file, source_sequence) = split_source(source);
        Self {
            source_file,
            source_sequence,
            name: name.into(),
            start_frame,
            end_frame,
            flags: Vec::new(),
        }
    }

    pub fn with_flags(mut self, flags: Vec<bool>) -> Self {
        self.flags = flags;
        self
    }

    /// Build from the arguments of an `addSequence` call.
    pub fn from_call(call: &Call) -> CoreResult<Self> {
        let arg = |i: usize, what: &'static str| {
            call.args.get(i).ok_or(CoreError::MissingField(what))
        };
        let int_arg = |i: usize, default: i64| -> CoreResult<i32> {
            match call.args.get(i) {
                None => Ok(default as i32),
                Some(v) => v
                    .as_i64()
                    .and_then(|n| i32::try_from(n).ok())
                    .ok_or_else(|| CoreError::Parse {
                        what: "frame",
                        value: v.to_text(),
                    }),
            }
        };

        let source = arg(0, "source")?.to_text();
        let name = arg(1, "name")?.to_text();
        let start = int_arg(2, 0)?;
        let end = int_arg(3, -1)?;
        let flags = call.args[4.min(call.args.len())..]
            .iter()
            .map(|v| {
                v.as_bool().ok_or_else(|| CoreError::Parse {
                    what: "sequence flag",
                    value: v.to_text(),
                })
            })
            .collect::<CoreResult<Vec<_>>>()?;

        Ok(Self::new(&source, name, start, end).with_flags(flags))
    }

    pub fn pad_rotation(&self) -> bool {
        self.flags.first().copied().unwrap_or(true)
    }

    pub fn pad_translation(&self) -> bool {
        self.flags.get(1).copied().unwrap_or(false)
    }

    /// Clamp the declared range to a source with `last_frame` as final frame.
    pub fn frame_range(&self, last_frame: u32) -> (u32, u32) {
        let start = (self.start_frame.max(0) as u32).min(last_frame);
        let end = if self.end_frame < 0 {
            last_frame
        } else {
            (self.end_frame as u32).min(last_frame)
        };
        (start, end.max(start))
    }
}

fn split_source(source: &str) -> (String, Option<String>) {
    let trimmed = source.trim();
    match trimmed.rsplit_once(char::is_whitespace) {
        Some((file, seq)) if !file.trim().is_empty() => {
            (file.trim().to_string(), Some(seq.to_string()))
        }
        _ => (trimmed.to_string(), None),
    }
}

/// Loaded shape: import options plus registered sequences in index order.
#[derive(Clone, Debug, PartialEq)]
pub struct Shape {
    pub name: String,
    pub import: MeshImportSpec,
    sequences: Vec<SequenceImportSpec>,
}

impl Shape {
    pub fn new(name: impl Into<String>, import: MeshImportSpec) -> Self {
        Self {
            name: name.into(),
            import,
            sequences: Vec::new(),
        }
    }

    /// Append a sequence. A name already present is replaced in place, so
    /// its index does not change.
    pub fn add_sequence(&mut self, seq: SequenceImportSpec) -> usize {
        if let Some(idx) = self.sequence_index(&seq.name) {
            log::warn!(
                "{}: sequence '{}' registered twice; replacing index {}",
                self.name,
                seq.name,
                idx
            );
            self.sequences[idx] = seq;
            return idx;
        }
        log::debug!("{}: sequence[{}] = '{}'", self.name, self.sequences.len(), seq.name);
        self.sequences.push(seq);
        self.sequences.len() - 1
    }

    pub fn sequences(&self) -> &[SequenceImportSpec] {
        &self.sequences
    }

    pub fn sequence(&self, name: &str) -> Option<&SequenceImportSpec> {
        self.sequence_index(name).map(|i| &self.sequences[i])
    }

    pub fn sequence_index(&self, name: &str) -> Option<usize> {
        self.sequences
            .iter()
            .position(|s| s.name.eq_ignore_ascii_case(name))
    }

    pub fn sequence_names(&self) -> Vec<&str> {
        self.sequences.iter().map(|s| s.name.as_str()).collect()
    }
}

/// Completion hook run once a shape is fully constructed.
pub trait ShapeHook {
    fn on_load(&self, shape: &mut Shape) -> Result<()>;
}

impl<F> ShapeHook for F
where
    F: Fn(&mut Shape) -> Result<()>,
{
    fn on_load(&self, shape: &mut Shape) -> Result<()> {
        self(shape)
    }
}

/// A parsed shape descriptor: import options and the declared `onLoad` body.
#[derive(Clone, Debug, PartialEq)]
pub struct ShapeConstructor {
    pub name: String,
    pub import: MeshImportSpec,
    pub on_load: Vec<SequenceImportSpec>,
}

impl ShapeConstructor {
    /// Extract the descriptor named `name`, or the last one declared.
    pub fn from_script(script: &Script, name: Option<&str>) -> Result<Self> {
        // Repeated singleton declarations redefine the object; keep the last.
        let obj = script
            .objects_of_class(SHAPE_CONSTRUCTOR_CLASS)
            .filter(|o| name.is_none_or(|n| o.name.eq_ignore_ascii_case(n)))
            .last()
            .ok_or_else(|| anyhow!("No {SHAPE_CONSTRUCTOR_CLASS} found in script"))?;

        let import = MeshImportSpec::from_object(obj)
            .with_context(|| format!("Invalid import options in '{}'", obj.name))?;

        let mut on_load = Vec::new();
        if let Some(func) = script.function(&obj.name, "onLoad") {
            for call in &func.body {
                if !call.method.eq_ignore_ascii_case("addSequence") {
                    log::warn!(
                        "{}::onLoad line {}: skipping unsupported call '{}'",
                        obj.name,
                        call.line,
                        call.method
                    );
                    continue;
                }
                let seq = SequenceImportSpec::from_call(call).with_context(|| {
                    format!("Invalid addSequence on line {} of {}::onLoad", call.line, obj.name)
                })?;
                on_load.push(seq);
            }
        }

        Ok(Self {
            name: obj.name.clone(),
            import,
            on_load,
        })
    }

    pub fn from_source(contents: &str) -> Result<Self> {
        Self::from_script(&script::load_script_from_str(contents)?, None)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let script = script::load_script_from_path(path)?;
        Self::from_script(&script, None)
            .with_context(|| format!("Failed to read shape descriptor: {}", path.display()))
    }

    /// Construct the shape and run the declared `onLoad` hook exactly once.
    pub fn load(&self) -> Result<Shape> {
        self.load_with(self)
    }

    /// Construct the shape and run a caller-supplied hook exactly once.
    pub fn load_with<H: ShapeHook + ?Sized>(&self, hook: &H) -> Result<Shape> {
        let mut shape = Shape::new(&self.name, self.import.clone());
        hook.on_load(&mut shape)
            .with_context(|| format!("{}::onLoad failed", self.name))?;
        log::info!(
            "Loaded shape '{}' from '{}' with {} sequence(s)",
            shape.name,
            shape.import.source_path,
            shape.sequences().len()
        );
        Ok(shape)
    }
}

impl ShapeHook for ShapeConstructor {
    fn on_load(&self, shape: &mut Shape) -> Result<()> {
        for seq in &self.on_load {
            shape.add_sequence(seq.clone());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DESCRIPTOR: &str = r#"
singleton TSShapeConstructor(MikuDAE)
{
   baseShape = "./Miku_Hatsune.pmd";
   loadLights = "0";
   unit = "1.0";
   upAxis = "DEFAULT";
   lodType = "TrailingNumber";
   ignoreNodeScale = "0";
   adjustCenter = "0";
   adjustFloor = "1";
   forceUpdateMaterials = "0";
};

function MikuDAE::onLoad(%this)
{
   %this.addSequence( "./kishimen.vmd ambient", "kishimen", 0, -1, true, false, true);
   %this.addSequence( "./err.vmd ambient", "err", 0, -1, true, false, true);
}
"#;

    #[test]
    fn reads_import_options() {
        let ctor = ShapeConstructor::from_source(DESCRIPTOR).unwrap();
        let spec = &ctor.import;
        assert_eq!(spec.source_path, "./Miku_Hatsune.pmd");
        assert_eq!(spec.unit, 1.0);
        assert_eq!(spec.up_axis, UpAxis::Default);
        assert_eq!(spec.lod_type, LodType::TrailingNumber);
        assert!(!spec.recenter);
        assert!(spec.snap_to_floor);
        assert!(!spec.force_material_refresh);
    }

    #[test]
    fn on_load_registers_sequences_in_order() {
        let shape = ShapeConstructor::from_source(DESCRIPTOR).unwrap().load().unwrap();
        assert_eq!(shape.sequence_names(), vec!["kishimen", "err"]);

        let first = &shape.sequences()[0];
        assert_eq!(first.source_file, "./kishimen.vmd");
        assert_eq!(first.source_sequence.as_deref(), Some("ambient"));
        assert_eq!((first.start_frame, first.end_frame), (0, -1));
        assert_eq!(first.flags, vec![true, false, true]);
    }

    #[test]
    fn loading_twice_is_idempotent() {
        let ctor = ShapeConstructor::from_source(DESCRIPTOR).unwrap();
        assert_eq!(ctor.load().unwrap(), ctor.load().unwrap());
    }

    #[test]
    fn custom_hook_runs_once() {
        use std::cell::Cell;

        let ctor = ShapeConstructor::from_source(DESCRIPTOR).unwrap();
        let calls = Cell::new(0);
        let hook = |shape: &mut Shape| -> Result<()> {
            calls.set(calls.get() + 1);
            shape.add_sequence(SequenceImportSpec::new("./idle.vmd", "idle", 0, 30));
            Ok(())
        };
        let shape = ctor.load_with(&hook).unwrap();
        assert_eq!(calls.get(), 1);
        assert_eq!(shape.sequence_names(), vec!["idle"]);
    }

    #[test]
    fn duplicate_sequence_replaces_in_place() {
        let mut shape = Shape::new("s", MeshImportSpec::new("a.pmd"));
        shape.add_sequence(SequenceImportSpec::new("a.vmd", "walk", 0, -1));
        shape.add_sequence(SequenceImportSpec::new("b.vmd", "run", 0, -1));
        let idx = shape.add_sequence(SequenceImportSpec::new("c.vmd", "walk", 5, 10));
        assert_eq!(idx, 0);
        assert_eq!(shape.sequence_names(), vec!["walk", "run"]);
        assert_eq!(shape.sequence("walk").unwrap().source_file, "c.vmd");
    }

    #[test]
    fn missing_base_shape_is_rejected() {
        let err = ShapeConstructor::from_source("singleton TSShapeConstructor(X) { unit = \"1\"; };")
            .unwrap_err();
        assert!(format!("{err:#}").contains("baseShape"));
    }

    #[test]
    fn other_calls_in_on_load_are_skipped() {
        let src = "singleton TSShapeConstructor(X) { baseShape = \"x.pmd\"; };\n\
                   function X::onLoad(%this) { %this.renameSequence(\"a\", \"b\"); \
                   %this.addSequence(\"w.vmd\", \"w\"); }";
        let ctor = ShapeConstructor::from_source(src).unwrap();
        assert_eq!(ctor.on_load.len(), 1);
        assert_eq!(ctor.on_load[0].end_frame, -1);
        assert_eq!(ctor.on_load[0].source_sequence, None);
    }

    #[test]
    fn frame_range_resolution() {
        let all = SequenceImportSpec::new("a.vmd", "a", 0, -1);
        assert_eq!(all.frame_range(120), (0, 120));
        let part = SequenceImportSpec::new("a.vmd", "a", 10, 500);
        assert_eq!(part.frame_range(120), (10, 120));
        let inverted = SequenceImportSpec::new("a.vmd", "a", 50, 20);
        assert_eq!(inverted.frame_range(120), (50, 50));
    }

    #[test]
    fn default_flags() {
        let seq = SequenceImportSpec::new("a.vmd", "a", 0, -1);
        assert!(seq.pad_rotation());
        assert!(!seq.pad_translation());
    }

    #[test]
    fn axis_and_lod_parse() {
        assert_eq!("Z_AXIS".parse::<UpAxis>().unwrap(), UpAxis::Z);
        assert_eq!("detectdts".parse::<LodType>().unwrap(), LodType::DetectDts);
        assert!("sideways".parse::<UpAxis>().is_err());
        assert_eq!(UpAxis::Y.to_string(), "Y_AXIS");
    }
}

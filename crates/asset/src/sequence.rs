//! Binds `addSequence` registrations to the motion files they name.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::shape::{SequenceImportSpec, Shape};
use crate::vmd::{VmdMotion, load_vmd_from_path};

pub const DEFAULT_FPS: f32 = 30.0;
pub const DEFAULT_PRIORITY: f32 = 5.0;

/// Sequence ready for the shape: clamped frame range plus timing.
#[derive(Clone, Debug, PartialEq)]
pub struct ResolvedSequence {
    pub name: String,
    pub source: PathBuf,
    pub start_frame: u32,
    pub end_frame: u32,
    pub fps: f32,
    pub priority: f32,
    pub blend: bool,
    pub pad_rotation: bool,
    pub pad_translation: bool,
    pub bone_tracks: usize,
    pub morph_tracks: usize,
    /// Morphs with keys spanning the selected range.
    pub animated_morphs: Vec<String>,
}

impl ResolvedSequence {
    pub fn from_motion(spec: &SequenceImportSpec, source: PathBuf, motion: &VmdMotion) -> Self {
        let (start_frame, end_frame) = spec.frame_range(motion.length);
        let animated_morphs = motion
            .morph_tracks
            .iter()
            .enumerate()
            .filter(|(i, _)| {
                motion.morph_animated_between(*i, start_frame as f32, end_frame as f32)
            })
            .map(|(_, t)| t.name.to_lossy())
            .collect();
        Self {
            name: spec.name.clone(),
            source,
            start_frame,
            end_frame,
            fps: DEFAULT_FPS,
            priority: DEFAULT_PRIORITY,
            blend: true,
            pad_rotation: spec.pad_rotation(),
            pad_translation: spec.pad_translation(),
            bone_tracks: motion.bone_tracks.len(),
            morph_tracks: motion.morph_tracks.len(),
            animated_morphs,
        }
    }

    pub fn start_time(&self) -> f32 {
        self.start_frame as f32 / self.fps
    }

    pub fn end_time(&self) -> f32 {
        self.end_frame as f32 / self.fps
    }

    /// Length in seconds.
    pub fn duration(&self) -> f32 {
        self.end_time() - self.start_time()
    }
}

impl Shape {
    /// Load every registered motion relative to `base_dir`, in sequence order.
    pub fn resolve_sequences(&self, base_dir: &Path) -> Result<Vec<ResolvedSequence>> {
        self.sequences()
            .iter()
            .map(|spec| {
                let path = base_dir.join(&spec.source_file);
                let motion = load_vmd_from_path(&path)
                    .with_context(|| format!("Failed to resolve sequence '{}'", spec.name))?;
                if let Some(sel) = &spec.source_sequence {
                    log::debug!(
                        "{}: selector '{}' ignored, motion files hold one sequence",
                        spec.name,
                        sel
                    );
                }
                let seq = ResolvedSequence::from_motion(spec, path, &motion);
                log::info!(
                    "Sequence '{}': frames {}..={} ({:.2}s), {} bone tracks",
                    seq.name,
                    seq.start_frame,
                    seq.end_frame,
                    seq.duration(),
                    seq.bone_tracks
                );
                Ok(seq)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shape::MeshImportSpec;
    use crate::vmd::{fixtures, load_vmd_from_bytes};

    #[test]
    fn whole_motion_timing() {
        let motion = load_vmd_from_bytes(&fixtures::simple()).unwrap();
        let spec = SequenceImportSpec::new("./dance.vmd", "dance", 0, -1);
        let seq = ResolvedSequence::from_motion(&spec, PathBuf::from("dance.vmd"), &motion);
        assert_eq!((seq.start_frame, seq.end_frame), (0, 40));
        assert_eq!(seq.fps, 30.0);
        assert_eq!(seq.priority, 5.0);
        assert!(seq.blend);
        assert!((seq.duration() - 40.0 / 30.0).abs() < 1e-6);
        assert_eq!(seq.animated_morphs, vec!["blink".to_string()]);
    }

    #[test]
    fn declared_range_is_clamped() {
        let motion = load_vmd_from_bytes(&fixtures::simple()).unwrap();
        let spec = SequenceImportSpec::new("a.vmd", "part", 10, 400);
        let seq = ResolvedSequence::from_motion(&spec, PathBuf::from("a.vmd"), &motion);
        assert_eq!((seq.start_frame, seq.end_frame), (10, 40));
        assert!(seq.pad_rotation);
        assert!(!seq.pad_translation);
    }

    #[test]
    fn resolves_files_relative_to_base() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("kishimen.vmd"), fixtures::simple()).unwrap();

        let mut shape = Shape::new("Ctor", MeshImportSpec::new("model.pmd"));
        shape.add_sequence(SequenceImportSpec::new("./kishimen.vmd", "kishimen", 0, -1));
        let resolved = shape.resolve_sequences(dir.path()).unwrap();
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].name, "kishimen");
        assert_eq!(resolved[0].bone_tracks, 2);

        shape.add_sequence(SequenceImportSpec::new("./missing.vmd", "err", 0, -1));
        let err = shape.resolve_sequences(dir.path()).unwrap_err();
        assert!(format!("{err:#}").contains("err"));
    }
}

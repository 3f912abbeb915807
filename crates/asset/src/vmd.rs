//! VMD (motion data) reader and keyframe sampling.
//!
//! Layout (little-endian): header[30] "Vocaloid Motion Data 0002", model
//! name[20], u32 bone keyframe count, bone keyframes, u32 morph keyframe
//! count, morph keyframes. Camera and light sections that may follow are not
//! read.

use std::{fs, path::Path};

use anyhow::{Context, Result, bail};
use corelib::{Quat, Transform, Vec3};

use crate::binary::{ByteReader, RawName};

pub const VMD_HEADER: &str = "Vocaloid Motion Data 0002";

const HEADER_LEN: usize = 30;
const MODEL_NAME_LEN: usize = 20;
const TRACK_NAME_LEN: usize = 15;
const INTERPOLATION_LEN: usize = 64;
const BONE_KEY_SIZE: usize = TRACK_NAME_LEN + 4 + 12 + 16 + INTERPOLATION_LEN;
const MORPH_KEY_SIZE: usize = TRACK_NAME_LEN + 4 + 4;

/// Samples per baked interpolation curve (plus one closing entry).
pub const CURVE_TABLE_SIZE: usize = 64;

const NEWTON_EPSILON: f32 = 0.0001;
const NEWTON_MAX_STEPS: usize = 32;

/// Easing for one channel between two keyframes.
#[derive(Clone, Debug, PartialEq)]
pub enum Curve {
    Linear,
    /// `table[i]` is the eased weight at `i / CURVE_TABLE_SIZE`.
    Baked(Box<[f32; CURVE_TABLE_SIZE + 1]>),
}

// Cubic Bezier through (0,0), (p1), (p2), (1,1) along one axis.
fn bezier(t: f32, p1: f32, p2: f32) -> f32 {
    (1.0 + 3.0 * p1 - 3.0 * p2) * t * t * t + (3.0 * p2 - 6.0 * p1) * t * t + 3.0 * p1 * t
}

fn bezier_derivative(t: f32, p1: f32, p2: f32) -> f32 {
    (3.0 + 9.0 * p1 - 9.0 * p2) * t * t + (6.0 * p2 - 12.0 * p1) * t + 3.0 * p1
}

impl Curve {
    /// Build the curve for `channel` (0..4 = x, y, z, rotation) from the
    /// 64-byte interpolation block. Control points live at offsets
    /// `channel`, `4 + channel`, `8 + channel`, `12 + channel` as x1, y1, x2, y2
    /// in 0..=127.
    pub fn from_block(block: &[u8], channel: usize) -> Self {
        let at = |offset: usize| block[offset + channel];
        let (x1, y1, x2, y2) = (at(0), at(4), at(8), at(12));
        if x1 == y1 && x2 == y2 {
            return Self::Linear;
        }
        let (x1, y1, x2, y2) = (
            f32::from(x1) / 127.0,
            f32::from(y1) / 127.0,
            f32::from(x2) / 127.0,
            f32::from(y2) / 127.0,
        );

        let mut table = Box::new([0.0f32; CURVE_TABLE_SIZE + 1]);
        for (d, slot) in table.iter_mut().take(CURVE_TABLE_SIZE).enumerate() {
            let input = d as f32 / CURVE_TABLE_SIZE as f32;
            // Solve bezier_x(t) == input for t.
            let mut t = input;
            for _ in 0..NEWTON_MAX_STEPS {
                let v = bezier(t, x1, x2) - input;
                if v.abs() < NEWTON_EPSILON {
                    break;
                }
                let slope = bezier_derivative(t, x1, x2);
                if slope == 0.0 {
                    break;
                }
                t -= v / slope;
            }
            *slot = bezier(t, y1, y2);
        }
        table[CURVE_TABLE_SIZE] = 1.0;
        Self::Baked(table)
    }

    /// Map linear progress `w` in [0, 1] to eased progress.
    pub fn ease(&self, w: f32) -> f32 {
        match self {
            Self::Linear => w,
            Self::Baked(table) => {
                let scaled = w.clamp(0.0, 1.0) * CURVE_TABLE_SIZE as f32;
                let idx = (scaled as usize).min(CURVE_TABLE_SIZE - 1);
                let frac = scaled - idx as f32;
                table[idx] + (table[idx + 1] - table[idx]) * frac
            }
        }
    }

    pub fn is_linear(&self) -> bool {
        matches!(self, Self::Linear)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct BoneKeyframe {
    pub track: usize,
    pub frame: u32,
    pub translation: Vec3,
    pub rotation: Quat,
    /// x, y, z translation curves then the rotation curve. Applied when
    /// interpolating *towards* this keyframe.
    pub curves: [Curve; 4],
}

#[derive(Clone, Debug, PartialEq)]
pub struct MorphKeyframe {
    pub track: usize,
    pub frame: u32,
    pub weight: f32,
}

/// Keyframes of one bone or morph: `keyframes[start..start + count]`.
#[derive(Clone, Debug, PartialEq)]
pub struct Track {
    pub name: RawName,
    pub start: usize,
    pub count: usize,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct VmdMotion {
    pub model_name: RawName,
    pub bone_tracks: Vec<Track>,
    /// Sorted by (track, frame).
    pub bone_keyframes: Vec<BoneKeyframe>,
    pub morph_tracks: Vec<Track>,
    /// Sorted by (track, frame).
    pub morph_keyframes: Vec<MorphKeyframe>,
    /// Largest keyframe index across bones and morphs.
    pub length: u32,
}

fn intern(tracks: &mut Vec<RawName>, name: RawName) -> usize {
    match tracks.iter().position(|n| *n == name) {
        Some(idx) => idx,
        None => {
            tracks.push(name);
            tracks.len() - 1
        }
    }
}

/// Compute each track's slice of a keyframe list sorted by track.
fn build_tracks<K>(names: Vec<RawName>, keys: &[K], track_of: impl Fn(&K) -> usize) -> Vec<Track> {
    let mut tracks: Vec<Track> = names
        .into_iter()
        .map(|name| Track {
            name,
            start: 0,
            count: 0,
        })
        .collect();
    for (i, key) in keys.iter().enumerate() {
        let track = &mut tracks[track_of(key)];
        if track.count == 0 {
            track.start = i;
        }
        track.count += 1;
    }
    tracks
}

pub fn load_vmd_from_path(path: impl AsRef<Path>) -> Result<VmdMotion> {
    let path = path.as_ref();
    let bytes = fs::read(path)
        .with_context(|| format!("Failed to open VMD file: {}", path.display()))?;
    let motion = load_vmd_from_bytes(&bytes)
        .with_context(|| format!("Failed to parse VMD file: {}", path.display()))?;
    log::info!(
        "Loaded VMD for '{}' from {}: {} bone tracks, {} morph tracks, {} frames",
        motion.model_name,
        path.display(),
        motion.bone_tracks.len(),
        motion.morph_tracks.len(),
        motion.length
    );
    Ok(motion)
}

pub fn load_vmd_from_bytes(bytes: &[u8]) -> Result<VmdMotion> {
    let mut r = ByteReader::new(bytes);

    let header = r.name(HEADER_LEN, "header")?;
    if !header.to_lossy().eq_ignore_ascii_case(VMD_HEADER) {
        bail!("Not a VMD file (header '{}')", header);
    }
    let mut motion = VmdMotion {
        model_name: r.name(MODEL_NAME_LEN, "model name")?,
        ..Default::default()
    };

    let count = r.u32("bone keyframe count")? as usize;
    r.check_count(count, BONE_KEY_SIZE, "bone keyframe")?;
    let mut names = Vec::new();
    motion.bone_keyframes.reserve(count);
    for i in 0..count {
        let key = (|| -> Result<BoneKeyframe> {
            let track = intern(&mut names, r.name(TRACK_NAME_LEN, "bone name")?);
            let frame = r.u32("frame")?;
            let translation = r.vec3("translation")?;
            let rotation = r.quat("rotation")?;
            let block = r.bytes(INTERPOLATION_LEN, "interpolation")?;
            Ok(BoneKeyframe {
                track,
                frame,
                translation,
                rotation,
                curves: [0, 1, 2, 3].map(|c| Curve::from_block(block, c)),
            })
        })()
        .with_context(|| format!("bone keyframe {i}"))?;
        motion.length = motion.length.max(key.frame);
        motion.bone_keyframes.push(key);
    }
    motion
        .bone_keyframes
        .sort_by_key(|k| (k.track, k.frame));
    motion.bone_tracks = build_tracks(names, &motion.bone_keyframes, |k| k.track);

    // Motions exported for cameras only may stop right after the bone section.
    if r.is_empty() {
        return Ok(motion);
    }

    let count = r.u32("morph keyframe count")? as usize;
    r.check_count(count, MORPH_KEY_SIZE, "morph keyframe")?;
    let mut names = Vec::new();
    motion.morph_keyframes.reserve(count);
    for i in 0..count {
        let key = (|| -> Result<MorphKeyframe> {
            Ok(MorphKeyframe {
                track: intern(&mut names, r.name(TRACK_NAME_LEN, "morph name")?),
                frame: r.u32("frame")?,
                weight: r.f32("weight")?,
            })
        })()
        .with_context(|| format!("morph keyframe {i}"))?;
        motion.length = motion.length.max(key.frame);
        motion.morph_keyframes.push(key);
    }
    motion
        .morph_keyframes
        .sort_by_key(|k| (k.track, k.frame));
    motion.morph_tracks = build_tracks(names, &motion.morph_keyframes, |k| k.track);

    Ok(motion)
}

/// Indices (k1, k2) of the keyframes bracketing `frame` within a track.
fn bracket(frames: impl Iterator<Item = u32> + Clone, count: usize, frame: f32) -> (usize, usize) {
    let k2 = frames
        .clone()
        .position(|f| frame <= f as f32)
        .unwrap_or(count - 1);
    (k2.saturating_sub(1), k2)
}

impl VmdMotion {
    pub fn bone_track(&self, name: &str) -> Option<usize> {
        self.bone_tracks
            .iter()
            .position(|t| t.name.to_lossy() == name)
    }

    pub fn morph_track(&self, name: &str) -> Option<usize> {
        self.morph_tracks
            .iter()
            .position(|t| t.name.to_lossy() == name)
    }

    pub fn bone_keys(&self, track: usize) -> &[BoneKeyframe] {
        self.bone_tracks
            .get(track)
            .map(|t| &self.bone_keyframes[t.start..t.start + t.count])
            .unwrap_or(&[])
    }

    pub fn morph_keys(&self, track: usize) -> &[MorphKeyframe] {
        self.morph_tracks
            .get(track)
            .map(|t| &self.morph_keyframes[t.start..t.start + t.count])
            .unwrap_or(&[])
    }

    /// Bone pose at `frame` (fractional frames allowed). Frames past the last
    /// key hold the last pose. Returns `None` for an unknown or empty track.
    pub fn sample_bone(&self, track: usize, frame: f32) -> Option<Transform> {
        let keys = self.bone_keys(track);
        let last = keys.last()?;
        let frame = frame.min(last.frame as f32);

        let (k1, k2) = bracket(keys.iter().map(|k| k.frame), keys.len(), frame);
        let (a, b) = (&keys[k1], &keys[k2]);
        let (t1, t2) = (a.frame as f32, b.frame as f32);

        if t1 == t2 || frame <= t1 {
            return Some(Transform::new(a.translation, a.rotation));
        }
        if frame >= t2 {
            return Some(Transform::new(b.translation, b.rotation));
        }

        let w = (frame - t1) / (t2 - t1);
        let lerp = |c: usize, from: f32, to: f32| {
            let e = b.curves[c].ease(w);
            from * (1.0 - e) + to * e
        };
        let translation = Vec3::new(
            lerp(0, a.translation.x, b.translation.x),
            lerp(1, a.translation.y, b.translation.y),
            lerp(2, a.translation.z, b.translation.z),
        );
        let rotation = a.rotation.slerp(b.rotation, b.curves[3].ease(w));
        Some(Transform::new(translation, rotation))
    }

    /// Morph weight at `frame`, linear between keys and held after the last.
    pub fn sample_morph(&self, track: usize, frame: f32) -> Option<f32> {
        let keys = self.morph_keys(track);
        let last = keys.last()?;
        let frame = frame.min(last.frame as f32);

        let (k1, k2) = bracket(keys.iter().map(|k| k.frame), keys.len(), frame);
        let (a, b) = (&keys[k1], &keys[k2]);
        let (t1, t2) = (a.frame as f32, b.frame as f32);
        if t1 == t2 {
            return Some(a.weight);
        }
        let w = ((frame - t1) / (t2 - t1)).clamp(0.0, 1.0);
        Some(a.weight * (1.0 - w) + b.weight * w)
    }

    /// `true` when the morph has a key inside `[start, end]` and keys continue
    /// to at least `end`.
    pub fn morph_animated_between(&self, track: usize, start: f32, end: f32) -> bool {
        let keys = self.morph_keys(track);
        let Some(first_inside) = keys
            .iter()
            .position(|k| (k.frame as f32) >= start && (k.frame as f32) <= end)
        else {
            return false;
        };
        keys[first_inside..].iter().any(|k| k.frame as f32 >= end)
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use crate::binary::ByteWriter;

    pub const LINEAR: [u8; 64] = {
        let mut block = [0u8; 64];
        // x1 == y1 == 20, x2 == y2 == 107 for all channels.
        let mut i = 0;
        while i < 4 {
            block[i] = 20;
            block[4 + i] = 20;
            block[8 + i] = 107;
            block[12 + i] = 107;
            i += 1;
        }
        block
    };

    /// Ease-in on every channel: slow start.
    pub const EASE_IN: [u8; 64] = {
        let mut block = [0u8; 64];
        let mut i = 0;
        while i < 4 {
            block[i] = 127;
            block[4 + i] = 0;
            block[8 + i] = 127;
            block[12 + i] = 127;
            i += 1;
        }
        block
    };

    pub struct BoneKey<'a> {
        pub name: &'a str,
        pub frame: u32,
        pub translation: [f32; 3],
        pub rotation: [f32; 4],
        pub curve: [u8; 64],
    }

    pub fn motion(bones: &[BoneKey], morphs: &[(&str, u32, f32)]) -> Vec<u8> {
        let mut w = ByteWriter::default();
        w.padded(super::VMD_HEADER.as_bytes(), 30).padded(b"model", 20);
        w.u32(bones.len() as u32);
        for k in bones {
            w.padded(k.name.as_bytes(), 15)
                .u32(k.frame)
                .floats(&k.translation)
                .floats(&k.rotation)
                .raw(&k.curve);
        }
        w.u32(morphs.len() as u32);
        for (name, frame, weight) in morphs {
            w.padded(name.as_bytes(), 15).u32(*frame).f32(*weight);
        }
        w.buf
    }

    pub fn simple() -> Vec<u8> {
        let id = [0.0, 0.0, 0.0, 1.0];
        motion(
            &[
                BoneKey { name: "arm", frame: 30, translation: [3.0, 0.0, 0.0], rotation: id, curve: LINEAR },
                BoneKey { name: "center", frame: 0, translation: [0.0; 3], rotation: id, curve: LINEAR },
                BoneKey { name: "arm", frame: 0, translation: [0.0; 3], rotation: id, curve: LINEAR },
                BoneKey { name: "center", frame: 10, translation: [0.0, 10.0, 0.0], rotation: id, curve: EASE_IN },
            ],
            &[("blink", 0, 0.0), ("blink", 20, 1.0), ("blink", 40, 0.0), ("smile", 5, 1.0)],
        )
    }
}

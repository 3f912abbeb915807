//! Texture references of materials, resolved on disk and probed for size.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::material::MaterialRegistry;

/// Extensions tried, in order, for names given without one.
pub const TEXTURE_EXTENSIONS: [&str; 3] = ["png", "bmp", "jpg"];

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TextureInfo {
    pub path: PathBuf,
    pub width: u32,
    pub height: u32,
}

/// Find `name` under `dir`: as given, then with each known extension.
pub fn resolve_texture(name: &str, dir: &Path) -> Option<PathBuf> {
    let direct = dir.join(name);
    if direct.is_file() {
        return Some(direct);
    }
    TEXTURE_EXTENSIONS
        .iter()
        .map(|ext| dir.join(format!("{name}.{ext}")))
        .find(|p| p.is_file())
}

/// Read only the image header for its dimensions.
pub fn probe_texture(path: impl AsRef<Path>) -> Result<TextureInfo> {
    let path = path.as_ref();
    let (width, height) = image::image_dimensions(path)
        .with_context(|| format!("Failed to read image header {:?}", path))?;
    log::debug!("Texture {:?}: {}x{}", path, width, height);
    Ok(TextureInfo {
        path: path.to_path_buf(),
        width,
        height,
    })
}

/// A material texture that could not be used.
#[derive(Clone, Debug, PartialEq)]
pub struct MissingTexture {
    pub material: String,
    pub texture: String,
    /// Empty when no file was found, otherwise why it could not be read.
    pub reason: String,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct TextureReport {
    /// (material, texture) pairs that resolved to a readable image.
    pub found: Vec<(String, TextureInfo)>,
    pub missing: Vec<MissingTexture>,
}

impl TextureReport {
    pub fn is_complete(&self) -> bool {
        self.missing.is_empty()
    }
}

/// Resolve every texture the registry references relative to `dir`.
pub fn check_textures(registry: &MaterialRegistry, dir: &Path) -> TextureReport {
    let mut report = TextureReport::default();
    for material in registry.iter() {
        for name in material.texture_names() {
            let Some(path) = resolve_texture(name, dir) else {
                log::warn!("{}: texture '{}' not found in {:?}", material.name, name, dir);
                report.missing.push(MissingTexture {
                    material: material.name.clone(),
                    texture: name.to_string(),
                    reason: String::new(),
                });
                continue;
            };
            match probe_texture(&path) {
                Ok(info) => report.found.push((material.name.clone(), info)),
                Err(e) => {
                    log::warn!("{}: {:#}", material.name, e);
                    report.missing.push(MissingTexture {
                        material: material.name.clone(),
                        texture: name.to_string(),
                        reason: format!("{e:#}"),
                    });
                }
            }
        }
    }
    log::info!(
        "Textures: {} resolved, {} missing",
        report.found.len(),
        report.missing.len()
    );
    report
}

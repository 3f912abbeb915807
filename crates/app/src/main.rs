//! Entry point for toonshape.
//! Loads a shape descriptor and a material script and reports what the engine
//! would build from them.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use asset::material::generate_materials;
use asset::pmd::{PmdModel, load_pmd_from_path};
use asset::texture::check_textures;
use asset::{ImportedMesh, MaterialRegistry, Shape, ShapeConstructor, import_model};

#[derive(Debug, Default, PartialEq)]
struct Options {
    descriptor: Option<PathBuf>,
    materials: Option<PathBuf>,
    motion_dir: Option<PathBuf>,
    write_materials: Option<PathBuf>,
    force_update: bool,
    check_textures: bool,
}

fn parse_switch(val: &str) -> bool {
    matches!(
        val.to_ascii_lowercase().as_str(),
        "1" | "true" | "on" | "yes"
    )
}

impl Options {
    fn from_args<I: IntoIterator<Item = String>>(args: I) -> Self {
        let mut opts = Self::default();
        for arg in args {
            if let Some(v) = arg.strip_prefix("--descriptor=") {
                opts.descriptor = Some(PathBuf::from(v));
            } else if let Some(v) = arg.strip_prefix("--materials=") {
                opts.materials = Some(PathBuf::from(v));
            } else if let Some(v) = arg.strip_prefix("--motion-dir=") {
                opts.motion_dir = Some(PathBuf::from(v));
            } else if let Some(v) = arg.strip_prefix("--write-materials=") {
                opts.write_materials = Some(PathBuf::from(v));
            } else if arg == "--force-update" {
                opts.force_update = true;
            } else if let Some(v) = arg.strip_prefix("--force-update=") {
                opts.force_update = parse_switch(v);
            } else if arg == "--check-textures" {
                opts.check_textures = true;
            } else if let Some(v) = arg.strip_prefix("--check-textures=") {
                opts.check_textures = parse_switch(v);
            } else if arg.starts_with("--") {
                log::warn!("Unknown option '{}' ignored", arg);
            }
        }
        opts
    }
}

fn parent_dir(path: &Path) -> PathBuf {
    path.parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Shape plus, when its base model is on disk, the imported mesh.
struct LoadedShape {
    shape: Shape,
    model: Option<(PmdModel, ImportedMesh)>,
}

fn load_shape(path: &Path, opts: &Options) -> Result<LoadedShape> {
    let shape = ShapeConstructor::from_path(path)?.load()?;
    let dir = parent_dir(path);

    for (i, seq) in shape.sequences().iter().enumerate() {
        log::info!(
            "  [{}] {} <- {} (frames {}..{}, flags {:?})",
            i,
            seq.name,
            seq.source_file,
            seq.start_frame,
            seq.end_frame,
            seq.flags
        );
    }

    let motion_dir = opts.motion_dir.clone().unwrap_or_else(|| dir.clone());
    match shape.resolve_sequences(&motion_dir) {
        Ok(resolved) => {
            for seq in &resolved {
                log::info!(
                    "  {}: {:.2}s, {} morphs animated",
                    seq.name,
                    seq.duration(),
                    seq.animated_morphs.len()
                );
            }
        }
        Err(e) => log::warn!("Sequences not resolved: {:#}", e),
    }

    let source = shape.import.resolve_source(&dir);
    let model = if source.is_file() {
        let model = load_pmd_from_path(&source)?;
        let mesh = import_model(&model, &shape.import)
            .with_context(|| format!("Failed to import {}", source.display()))?;
        let roots = mesh.nodes.iter().filter(|n| n.parent.is_none()).count();
        log::info!("  skeleton: {} nodes, {} roots", mesh.nodes.len(), roots);
        Some((model, mesh))
    } else {
        log::warn!("Base shape {} not found; skipping mesh import", source.display());
        None
    };

    Ok(LoadedShape { shape, model })
}

fn run(opts: &Options) -> Result<()> {
    if opts.descriptor.is_none() && opts.materials.is_none() {
        bail!("nothing to do: pass --descriptor=PATH and/or --materials=PATH");
    }

    let loaded = opts
        .descriptor
        .as_deref()
        .map(|p| load_shape(p, opts))
        .transpose()?;

    let mut registry = match &opts.materials {
        Some(path) => {
            let registry = MaterialRegistry::load_from_path(path)?;
            registry
                .validate()
                .with_context(|| format!("Invalid material in {}", path.display()))?;
            if opts.check_textures {
                let report = check_textures(&registry, &parent_dir(path));
                for missing in &report.missing {
                    log::warn!("  missing: {} -> {}", missing.material, missing.texture);
                }
            }
            registry
        }
        None => MaterialRegistry::new(),
    };

    let Some(LoadedShape {
        shape,
        model: Some((model, mesh)),
    }) = loaded
    else {
        if opts.write_materials.is_some() {
            log::warn!("--write-materials needs a descriptor with a loadable base shape");
        }
        return Ok(());
    };

    let shape_file = Path::new(&shape.import.source_path)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| shape.name.clone());
    let generated = generate_materials(&model, &shape_file, &shape.import.material_name_prefix);
    let force = opts.force_update || shape.import.force_material_refresh;
    let changed = registry.merge_generated(generated, force);
    log::info!("{} material(s) added or updated", changed.len());

    let bindings = registry.bind_surfaces(mesh.surfaces());
    log::info!(
        "{} of {} surfaces bound, {} inert material(s)",
        bindings.bound_count(),
        bindings.surfaces.len(),
        bindings.inert.len()
    );
    for surface in bindings.unbound() {
        log::warn!("  surface '{}' has no material", surface);
    }

    if let Some(out) = &opts.write_materials {
        std::fs::write(out, registry.to_script())
            .with_context(|| format!("Failed to write {}", out.display()))?;
        log::info!("Wrote {} materials to {}", registry.len(), out.display());
    }
    Ok(())
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let opts = Options::from_args(std::env::args().skip(1));
    log::info!("Starting toonshape: {:?}", opts);
    run(&opts)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn parses_path_options() {
        let opts = Options::from_args(args(&[
            "--descriptor=art/Miku_Hatsune.cs",
            "--materials=art/materials.cs",
            "--motion-dir=motions",
        ]));
        assert_eq!(opts.descriptor, Some(PathBuf::from("art/Miku_Hatsune.cs")));
        assert_eq!(opts.materials, Some(PathBuf::from("art/materials.cs")));
        assert_eq!(opts.motion_dir, Some(PathBuf::from("motions")));
        assert!(opts.write_materials.is_none());
    }

    #[test]
    fn parses_switches() {
        let opts = Options::from_args(args(&["--force-update", "--check-textures=off"]));
        assert!(opts.force_update);
        assert!(!opts.check_textures);
        let opts = Options::from_args(args(&["--check-textures=yes", "--bogus"]));
        assert!(opts.check_textures);
        assert!(!opts.force_update);
    }

    #[test]
    fn requires_an_input() {
        assert!(run(&Options::default()).is_err());
    }
}

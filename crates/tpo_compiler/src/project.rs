//! Example classification and project staging.
//!
//! A non-project example is mirrored into
//! `<work>/<platform>/<stem>-<path hash>/src` together with the platform's
//! toolchain config, and for host-native platforms the shim library and the
//! generated entry point. Staging is idempotent: `src/` is rebuilt from
//! scratch every time while the toolchain's own build directory survives for
//! incremental rebuilds.

use std::fs;
use std::path::{Path, PathBuf};

use tpo_common::fsutil::{remove_path, to_slash, walk_files};
use tpo_common::{ContentHash, PlatformDescriptor};
use tpo_shim::{write_sketch_wrapper, NativeShimProvisioner, ShimMode, SHIM_DIR};

use crate::error::CompilerError;

/// Manifest of staged paths written into every generated project.
pub const CLEANUP_MANIFEST: &str = "_tpo_cleanup.txt";

const SKETCH_EXT: &str = "ino";

/// What kind of input an example path is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExampleKind {
    /// A directory containing one or more `.ino` sketches.
    SketchDir,
    /// A single `.ino` file.
    SketchFile,
    /// A directory that already holds a toolchain config; built in place.
    Project,
}

/// Classifies `example`, or explains why it is not buildable.
pub fn classify_example(example: &Path, config_file: &str) -> Result<ExampleKind, String> {
    if !example.exists() {
        return Err(format!("example does not exist: {}", example.display()));
    }
    if example.is_file() {
        if has_sketch_ext(example) {
            return Ok(ExampleKind::SketchFile);
        }
        return Err(format!(
            "expected a .{SKETCH_EXT} sketch file, got {}",
            example.display()
        ));
    }
    if example.join(config_file).is_file() {
        return Ok(ExampleKind::Project);
    }
    let has_sketch = fs::read_dir(example)
        .map_err(|e| format!("cannot read {}: {e}", example.display()))?
        .filter_map(|e| e.ok())
        .any(|e| e.path().is_file() && has_sketch_ext(&e.path()));
    if has_sketch {
        Ok(ExampleKind::SketchDir)
    } else {
        Err(format!(
            "{} contains no .{SKETCH_EXT} sketch and no {config_file}",
            example.display()
        ))
    }
}

fn has_sketch_ext(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == SKETCH_EXT)
}

/// Directory name for a staged example: its stem plus a short hash of its
/// absolute path, so same-named examples from different places never collide.
pub fn project_dir_name(example: &Path) -> String {
    let absolute = fs::canonicalize(example).unwrap_or_else(|_| example.to_path_buf());
    let stem = absolute
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "example".to_string());
    let stem: String = stem
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    let hash = ContentHash::from_bytes(absolute.to_string_lossy().as_bytes());
    format!("{stem}-{}", hash.short())
}

/// Writes `contents` to `path` unless it already holds exactly those bytes.
pub(crate) fn write_if_changed(path: &Path, contents: &str) -> Result<(), CompilerError> {
    if fs::read(path).is_ok_and(|existing| existing == contents.as_bytes()) {
        return Ok(());
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| CompilerError::io(parent, e))?;
    }
    fs::write(path, contents).map_err(|e| CompilerError::io(path, e))
}

/// Stages a sketch example for `platform` under `platform_dir` and returns
/// the project directory. `shim` is the detected shim flavour and is only
/// consulted for host-native platforms.
pub fn stage_project(
    example: &Path,
    kind: &ExampleKind,
    platform: &PlatformDescriptor,
    platform_dir: &Path,
    config_file: &str,
    shim: ShimMode,
) -> Result<PathBuf, CompilerError> {
    let project = platform_dir.join(project_dir_name(example));
    let src = project.join("src");
    remove_path(&src).map_err(|e| CompilerError::io(&src, e))?;
    fs::create_dir_all(&src).map_err(|e| CompilerError::io(&src, e))?;

    let mut staged: Vec<String> = Vec::new();
    match kind {
        ExampleKind::SketchFile => {
            let name = example
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "sketch.ino".to_string());
            fs::copy(example, src.join(&name)).map_err(|e| CompilerError::io(example, e))?;
            staged.push(format!("src/{name}"));
        }
        ExampleKind::SketchDir => {
            let files = walk_files(example, true).map_err(|e| CompilerError::io(example, e))?;
            for rel in files {
                let target = src.join(&rel);
                if let Some(parent) = target.parent() {
                    fs::create_dir_all(parent).map_err(|e| CompilerError::io(parent, e))?;
                }
                let from = example.join(&rel);
                fs::copy(&from, &target).map_err(|e| CompilerError::io(&from, e))?;
                staged.push(format!("src/{}", to_slash(&rel)));
            }
        }
        ExampleKind::Project => {
            return Err(CompilerError::io(
                example,
                std::io::Error::new(std::io::ErrorKind::InvalidInput, "projects are built in place"),
            ))
        }
    }

    write_if_changed(&project.join(config_file), platform.config())?;
    staged.push(config_file.to_string());

    if platform.is_host_native() {
        NativeShimProvisioner::new().provision(&project, shim)?;
        staged.extend(shim.files().iter().map(|f| format!("{SHIM_DIR}/{}", f.name)));
        let wrapper = write_sketch_wrapper(&src, shim)?;
        if let Some(name) = wrapper.file_name() {
            staged.push(format!("src/{}", name.to_string_lossy()));
        }
    }

    staged.sort();
    let mut manifest = staged.join("\n");
    manifest.push('\n');
    write_if_changed(&project.join(CLEANUP_MANIFEST), &manifest)?;
    Ok(project)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tpo_shim::WRAPPER_FILE;

    const INI: &str = "platformio.ini";

    fn sketch_dir() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("Blink.ino"), "void setup() {}\nvoid loop() {}\n").unwrap();
        fs::write(dir.path().join("helpers.h"), "#pragma once\n").unwrap();
        dir
    }

    fn stage(example: &Path, kind: &ExampleKind, platform: &PlatformDescriptor, work: &Path) -> PathBuf {
        stage_project(example, kind, platform, work, INI, ShimMode::Standard).unwrap()
    }

    #[test]
    fn classify_variants() {
        let dir = sketch_dir();
        assert_eq!(classify_example(dir.path(), INI), Ok(ExampleKind::SketchDir));
        assert_eq!(
            classify_example(&dir.path().join("Blink.ino"), INI),
            Ok(ExampleKind::SketchFile)
        );
        fs::write(dir.path().join(INI), "[env:native]\n").unwrap();
        assert_eq!(classify_example(dir.path(), INI), Ok(ExampleKind::Project));
    }

    #[test]
    fn classify_rejects_other_inputs() {
        let dir = tempfile::tempdir().unwrap();
        assert!(classify_example(&dir.path().join("missing"), INI).is_err());
        fs::write(dir.path().join("notes.txt"), "x").unwrap();
        let err = classify_example(&dir.path().join("notes.txt"), INI).unwrap_err();
        assert!(err.contains(".ino"));
        let err = classify_example(dir.path(), INI).unwrap_err();
        assert!(err.contains("no .ino sketch"));
    }

    #[test]
    fn dir_name_is_stable_and_distinct() {
        let a = sketch_dir();
        let b = sketch_dir();
        let name_a = project_dir_name(a.path());
        assert_eq!(name_a, project_dir_name(a.path()));
        assert_ne!(name_a, project_dir_name(b.path()));
        assert_eq!(name_a.rsplit('-').next().unwrap().len(), 8);
    }

    #[test]
    fn stage_native_sketch_dir() {
        let example = sketch_dir();
        let work = tempfile::tempdir().unwrap();
        let platform = PlatformDescriptor::host_native("native", "[env:native]\nplatform = native\n");
        let project = stage(example.path(), &ExampleKind::SketchDir, &platform, work.path());

        assert!(project.join("src/Blink.ino").is_file());
        assert!(project.join("src/helpers.h").is_file());
        assert!(project.join("src").join(WRAPPER_FILE).is_file());
        assert!(project.join(SHIM_DIR).join("Arduino.h").is_file());
        assert_eq!(
            fs::read_to_string(project.join(INI)).unwrap(),
            "[env:native]\nplatform = native\n"
        );
        let manifest = fs::read_to_string(project.join(CLEANUP_MANIFEST)).unwrap();
        assert!(manifest.contains("src/Blink.ino\n"));
        assert!(manifest.contains("lib/tpo_native_shim/Arduino.h\n"));
    }

    #[test]
    fn stage_hardware_sketch_file_has_no_shim() {
        let example = sketch_dir();
        let work = tempfile::tempdir().unwrap();
        let platform = PlatformDescriptor::hardware("uno", "[env:uno]\n");
        let file = example.path().join("Blink.ino");
        let project = stage(&file, &ExampleKind::SketchFile, &platform, work.path());
        assert!(project.join("src/Blink.ino").is_file());
        assert!(!project.join("src/helpers.h").exists());
        assert!(!project.join("lib").exists());
        assert!(!project.join("src").join(WRAPPER_FILE).exists());
    }

    #[test]
    fn restaging_mirrors_removed_files() {
        let example = sketch_dir();
        let work = tempfile::tempdir().unwrap();
        let platform = PlatformDescriptor::hardware("uno", "[env:uno]\n");
        let project = stage(example.path(), &ExampleKind::SketchDir, &platform, work.path());
        fs::create_dir_all(project.join(".pio/build")).unwrap();
        fs::remove_file(example.path().join("helpers.h")).unwrap();

        let again = stage(example.path(), &ExampleKind::SketchDir, &platform, work.path());
        assert_eq!(project, again);
        assert!(!project.join("src/helpers.h").exists());
        assert!(project.join(".pio/build").is_dir());
    }

    #[test]
    fn stage_fastled_sketch_uses_fastled_shim() {
        let example = tempfile::tempdir().unwrap();
        fs::write(example.path().join("Fire.ino"), "void setup() {}\nvoid loop() {}\n").unwrap();
        fs::write(example.path().join("leds.cpp"), "#include <FastLED.h>\n").unwrap();
        let work = tempfile::tempdir().unwrap();
        let platform = PlatformDescriptor::host_native("native", "[env:native]\n");

        let mode = tpo_shim::detect_shim_mode(example.path()).unwrap();
        assert_eq!(mode, ShimMode::FastLed);
        let project =
            stage_project(example.path(), &ExampleKind::SketchDir, &platform, work.path(), INI, mode).unwrap();

        assert!(project.join(SHIM_DIR).join("fastled_arduino.cpp").is_file());
        assert!(!project.join(SHIM_DIR).join("arduino.cpp").exists());
        let wrapper = fs::read_to_string(project.join("src").join(WRAPPER_FILE)).unwrap();
        assert!(!wrapper.contains("Arduino.h"));
        let manifest = fs::read_to_string(project.join(CLEANUP_MANIFEST)).unwrap();
        assert!(manifest.contains("lib/tpo_native_shim/fastled_arduino.cpp\n"));
    }
}

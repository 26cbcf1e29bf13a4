//! Generated `main()` for running a sketch on the host.
//!
//! Host builds have no Arduino runtime to call `setup()` and `loop()`, so a
//! small translation unit includes the sketch and drives it.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::ShimError;
use crate::provision::{write_atomic, ShimMode};

const SCANNED_EXTS: &[&str] = &["ino", "cpp", "cc", "c", "h", "hpp"];

/// File name of the generated entry point inside the project's `src/`.
pub const WRAPPER_FILE: &str = "_tpo_main.cpp";

/// Whether a sketch pulls in FastLED, which brings its own Arduino header.
pub fn uses_fastled(source: &str) -> bool {
    source.lines().any(|line| {
        let line = line.trim_start();
        line.starts_with("#include")
            && (line.contains("<FastLED.h>") || line.contains("\"FastLED.h\""))
    })
}

/// Picks the shim mode for an example: a sketch file, or a directory whose
/// sources are scanned recursively. Any one file including `FastLED.h` is
/// enough to select [`ShimMode::FastLed`].
pub fn detect_shim_mode(path: &Path) -> Result<ShimMode, ShimError> {
    if path.is_file() {
        let source = read_source(path)?;
        return Ok(if uses_fastled(&source) { ShimMode::FastLed } else { ShimMode::Standard });
    }
    let mut pending = vec![path.to_path_buf()];
    while let Some(dir) = pending.pop() {
        let entries = fs::read_dir(&dir).map_err(|source| ShimError::Io {
            path: dir.clone(),
            source,
        })?;
        for entry in entries.filter_map(|e| e.ok()) {
            let path = entry.path();
            if path.is_dir() {
                if !entry.file_name().to_string_lossy().starts_with('.') {
                    pending.push(path);
                }
                continue;
            }
            let scanned = path
                .extension()
                .is_some_and(|ext| SCANNED_EXTS.iter().any(|s| ext == *s));
            if scanned && uses_fastled(&read_source(&path)?) {
                return Ok(ShimMode::FastLed);
            }
        }
    }
    Ok(ShimMode::Standard)
}

fn read_source(path: &Path) -> Result<String, ShimError> {
    let bytes = fs::read(path).map_err(|source| ShimError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Renders the wrapper translation unit for `sketch_file`.
pub fn sketch_wrapper(sketch_file: &str, mode: ShimMode) -> String {
    let mut out = String::from("// Generated by tpo. Do not edit.\n");
    if mode == ShimMode::Standard {
        out.push_str("#include \"Arduino.h\"\n");
    }
    out.push_str(&format!("#include \"{sketch_file}\"\n"));
    out.push_str(
        "\nint main() {\n    setup();\n    for (;;) {\n        loop();\n    }\n    return 0;\n}\n",
    );
    out
}

/// Writes [`WRAPPER_FILE`] into `src_dir`, wrapping the first `.ino` sketch
/// (by file name) found there. Skips the write if the bytes already match.
pub fn write_sketch_wrapper(src_dir: &Path, mode: ShimMode) -> Result<PathBuf, ShimError> {
    let sketch = first_sketch(src_dir)?.ok_or_else(|| ShimError::NoSketch {
        path: src_dir.to_path_buf(),
    })?;
    let file_name = sketch
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let wrapper = sketch_wrapper(&file_name, mode);
    let target = src_dir.join(WRAPPER_FILE);
    if fs::read(&target).is_ok_and(|existing| existing == wrapper.as_bytes()) {
        return Ok(target);
    }
    write_atomic(&target, wrapper.as_bytes())?;
    Ok(target)
}

fn first_sketch(dir: &Path) -> Result<Option<PathBuf>, ShimError> {
    let entries = fs::read_dir(dir).map_err(|source| ShimError::Io {
        path: dir.to_path_buf(),
        source,
    })?;
    let mut sketches: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == "ino"))
        .collect();
    sketches.sort();
    Ok(sketches.into_iter().next())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_sketch_includes_arduino_header() {
        let w = sketch_wrapper("Blink.ino", ShimMode::Standard);
        assert!(w.contains("#include \"Arduino.h\"\n#include \"Blink.ino\""));
        assert!(w.contains("setup();"));
        assert!(w.contains("loop();"));
    }

    #[test]
    fn fastled_sketch_skips_arduino_header() {
        let src = "#include <FastLED.h>\nvoid setup() {}\nvoid loop() {}\n";
        assert!(uses_fastled(src));
        let w = sketch_wrapper("Fire.ino", ShimMode::FastLed);
        assert!(!w.contains("Arduino.h"));
        assert!(w.contains("#include \"Fire.ino\""));
    }

    #[test]
    fn fastled_mention_in_comment_is_ignored() {
        assert!(!uses_fastled("// works with FastLED.h too\nvoid setup() {}\n"));
        assert!(uses_fastled("  #include \"FastLED.h\"\n"));
    }

    #[test]
    fn writes_wrapper_for_first_sketch() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("b.ino"), "void setup() {}\nvoid loop() {}\n").unwrap();
        fs::write(dir.path().join("a.ino"), "void setup() {}\nvoid loop() {}\n").unwrap();
        let path = write_sketch_wrapper(dir.path(), ShimMode::Standard).unwrap();
        let text = fs::read_to_string(&path).unwrap();
        assert!(text.contains("#include \"a.ino\""));

        let again = write_sketch_wrapper(dir.path(), ShimMode::Standard).unwrap();
        assert_eq!(fs::read_to_string(again).unwrap(), text);
    }

    #[test]
    fn missing_sketch_is_error() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("main.cpp"), "int main() {}\n").unwrap();
        let err = write_sketch_wrapper(dir.path(), ShimMode::Standard).unwrap_err();
        assert!(matches!(err, ShimError::NoSketch { .. }));
    }

    #[test]
    fn fastled_detected_in_sketch_file() {
        let dir = tempfile::tempdir().unwrap();
        let sketch = dir.path().join("Fire.ino");
        fs::write(&sketch, "#include <FastLED.h>\nvoid setup() {}\nvoid loop() {}\n").unwrap();
        assert_eq!(detect_shim_mode(&sketch).unwrap(), ShimMode::FastLed);
        assert_eq!(detect_shim_mode(dir.path()).unwrap(), ShimMode::FastLed);
    }

    #[test]
    fn fastled_detected_in_nested_helper_source() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("Show.ino"), "#include \"leds.h\"\nvoid setup() {}\nvoid loop() {}\n").unwrap();
        fs::create_dir(dir.path().join("effects")).unwrap();
        fs::write(dir.path().join("effects/leds.cpp"), "#include \"FastLED.h\"\nCRGB leds[8];\n").unwrap();
        assert_eq!(detect_shim_mode(dir.path()).unwrap(), ShimMode::FastLed);
    }

    #[test]
    fn plain_directory_is_standard() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("Blink.ino"), "void setup() {}\nvoid loop() {}\n").unwrap();
        fs::write(dir.path().join("README.md"), "#include <FastLED.h>\n").unwrap();
        assert_eq!(detect_shim_mode(dir.path()).unwrap(), ShimMode::Standard);
    }
}

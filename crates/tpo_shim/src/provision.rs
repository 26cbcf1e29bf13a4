//! Writing the embedded shim sources into a project.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::ShimError;

/// Version of the embedded shim sources. Bump whenever any asset changes so
/// cached host-native builds made against older shims are not reused.
pub const SHIM_VERSION: &str = "2";

/// Library directory, relative to the project root, that receives the shim.
pub const SHIM_DIR: &str = "lib/tpo_native_shim";

/// One embedded shim source file.
#[derive(Debug, Clone, Copy)]
pub struct ShimFile {
    /// File name inside [`SHIM_DIR`].
    pub name: &'static str,
    /// Exact file contents.
    pub contents: &'static str,
}

const ARDUINO_H: ShimFile = ShimFile {
    name: "Arduino.h",
    contents: include_str!("../assets/Arduino.h"),
};

/// The standard shim file set: the full Arduino core stand-in.
pub const SHIM_FILES: &[ShimFile] = &[
    ARDUINO_H,
    ShimFile {
        name: "arduino.cpp",
        contents: include_str!("../assets/arduino.cpp"),
    },
    ShimFile {
        name: "WString.cpp",
        contents: include_str!("../assets/WString.cpp"),
    },
];

/// The shim file set for sketches that use FastLED, which ships its own
/// Arduino declarations and only needs the timing and pin definitions.
pub const FASTLED_SHIM_FILES: &[ShimFile] = &[
    ARDUINO_H,
    ShimFile {
        name: "fastled_arduino.cpp",
        contents: include_str!("../assets/fastled_arduino.cpp"),
    },
];

/// Which shim flavour a project gets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ShimMode {
    /// Plain Arduino sketches.
    #[default]
    Standard,
    /// Sketches that include `FastLED.h`.
    FastLed,
}

impl ShimMode {
    /// Files installed for this mode.
    pub fn files(self) -> &'static [ShimFile] {
        match self {
            ShimMode::Standard => SHIM_FILES,
            ShimMode::FastLed => FASTLED_SHIM_FILES,
        }
    }

    /// Files that belong to the other mode only and must not be left behind.
    fn foreign_files(self) -> impl Iterator<Item = &'static ShimFile> {
        let own = self.files();
        SHIM_FILES
            .iter()
            .chain(FASTLED_SHIM_FILES)
            .filter(move |f| !own.iter().any(|o| o.name == f.name))
    }

    /// Suffix appended to the toolchain identity of builds using this mode.
    pub fn identity_suffix(self) -> &'static str {
        match self {
            ShimMode::Standard => "",
            ShimMode::FastLed => " +fastled",
        }
    }
}

impl std::fmt::Display for ShimMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ShimMode::Standard => "standard",
            ShimMode::FastLed => "fastled",
        })
    }
}

/// What a [`NativeShimProvisioner::provision`] call changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProvisionReport {
    /// Files created or rewritten.
    pub written: usize,
    /// Files already present with identical bytes.
    pub unchanged: usize,
    /// Files of the other mode that were deleted.
    pub removed: usize,
}

/// Installs the shim sources into project directories.
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeShimProvisioner;

impl NativeShimProvisioner {
    /// Creates a provisioner.
    pub fn new() -> Self {
        Self
    }

    /// The shim library directory for `project_dir`.
    pub fn shim_dir(project_dir: &Path) -> PathBuf {
        project_dir.join(SHIM_DIR)
    }

    /// Writes the `mode` file set under `project_dir/lib/tpo_native_shim/`.
    ///
    /// Idempotent: files whose bytes already match are left untouched, and
    /// files that differ (edited or from an older shim version) are replaced
    /// through a temporary file and rename. Files that only the other mode
    /// installs are removed so both implementations never link together.
    pub fn provision(&self, project_dir: &Path, mode: ShimMode) -> Result<ProvisionReport, ShimError> {
        let dir = Self::shim_dir(project_dir);
        fs::create_dir_all(&dir).map_err(|source| ShimError::Io {
            path: dir.clone(),
            source,
        })?;

        let mut report = ProvisionReport::default();
        for file in mode.foreign_files() {
            let path = dir.join(file.name);
            match fs::remove_file(&path) {
                Ok(()) => report.removed += 1,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(source) => return Err(ShimError::Io { path, source }),
            }
        }
        for file in mode.files() {
            let path = dir.join(file.name);
            if fs::read(&path).is_ok_and(|existing| existing == file.contents.as_bytes()) {
                report.unchanged += 1;
                continue;
            }
            write_atomic(&path, file.contents.as_bytes())?;
            report.written += 1;
        }

        debug!(
            dir = %dir.display(),
            written = report.written,
            unchanged = report.unchanged,
            removed = report.removed,
            %mode,
            version = SHIM_VERSION,
            "native shim provisioned"
        );
        Ok(report)
    }
}

pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), ShimError> {
    let tmp = path.with_extension(format!("tmp.{}", std::process::id()));
    fs::write(&tmp, bytes).map_err(|source| ShimError::Io {
        path: tmp.clone(),
        source,
    })?;
    fs::rename(&tmp, path).map_err(|source| {
        let _ = fs::remove_file(&tmp);
        ShimError::Io {
            path: path.to_path_buf(),
            source,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(project: &Path) -> Vec<(String, Vec<u8>)> {
        let mut files: Vec<_> = fs::read_dir(NativeShimProvisioner::shim_dir(project))
            .unwrap()
            .map(|e| e.unwrap())
            .map(|e| {
                (
                    e.file_name().to_string_lossy().into_owned(),
                    fs::read(e.path()).unwrap(),
                )
            })
            .collect();
        files.sort();
        files
    }

    #[test]
    fn provision_writes_all_files() {
        let dir = tempfile::tempdir().unwrap();
        let report = NativeShimProvisioner::new().provision(dir.path(), ShimMode::Standard).unwrap();
        assert_eq!(report.written, SHIM_FILES.len());
        assert_eq!(report.unchanged, 0);
        for file in SHIM_FILES {
            let on_disk = fs::read_to_string(dir.path().join(SHIM_DIR).join(file.name)).unwrap();
            assert_eq!(on_disk, file.contents);
        }
    }

    #[test]
    fn provision_twice_is_byte_identical() {
        let dir = tempfile::tempdir().unwrap();
        let provisioner = NativeShimProvisioner::new();
        provisioner.provision(dir.path(), ShimMode::Standard).unwrap();
        let first = snapshot(dir.path());

        let report = provisioner.provision(dir.path(), ShimMode::Standard).unwrap();
        assert_eq!(report.written, 0);
        assert_eq!(report.unchanged, SHIM_FILES.len());
        assert_eq!(snapshot(dir.path()), first);
    }

    #[test]
    fn provision_restores_edited_file() {
        let dir = tempfile::tempdir().unwrap();
        let provisioner = NativeShimProvisioner::new();
        provisioner.provision(dir.path(), ShimMode::Standard).unwrap();
        let header = dir.path().join(SHIM_DIR).join("Arduino.h");
        fs::write(&header, "// clobbered").unwrap();

        let report = provisioner.provision(dir.path(), ShimMode::Standard).unwrap();
        assert_eq!(report.written, 1);
        assert_eq!(fs::read_to_string(&header).unwrap(), SHIM_FILES[0].contents);
    }

    #[test]
    fn no_temp_files_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        NativeShimProvisioner::new().provision(dir.path(), ShimMode::Standard).unwrap();
        let names: Vec<_> = snapshot(dir.path()).into_iter().map(|(n, _)| n).collect();
        assert_eq!(names.len(), SHIM_FILES.len());
        assert!(names.iter().all(|n| !n.contains(".tmp")));
    }

    #[test]
    fn switching_modes_swaps_implementation() {
        let dir = tempfile::tempdir().unwrap();
        let provisioner = NativeShimProvisioner::new();
        provisioner.provision(dir.path(), ShimMode::Standard).unwrap();

        let report = provisioner.provision(dir.path(), ShimMode::FastLed).unwrap();
        assert_eq!(report.removed, 2);
        let names: Vec<_> = snapshot(dir.path()).into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["Arduino.h", "fastled_arduino.cpp"]);

        let report = provisioner.provision(dir.path(), ShimMode::Standard).unwrap();
        assert_eq!(report.removed, 1);
        let names: Vec<_> = snapshot(dir.path()).into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["Arduino.h", "WString.cpp", "arduino.cpp"]);
    }

    #[test]
    fn fastled_implementation_stays_out_of_arduino_header() {
        let imp = FASTLED_SHIM_FILES[1].contents;
        assert!(!imp.contains("#include \"Arduino.h\""));
        assert!(imp.contains("millis"));
        assert_eq!(ShimMode::FastLed.identity_suffix(), " +fastled");
        assert_eq!(ShimMode::Standard.identity_suffix(), "");
    }

    #[test]
    fn header_covers_core_api() {
        let header = SHIM_FILES[0].contents;
        for symbol in ["millis", "micros", "digitalRead", "class HardwareSerial", "class String", "randomSeed"] {
            assert!(header.contains(symbol), "missing {symbol}");
        }
    }
}

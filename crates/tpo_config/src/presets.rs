//! Built-in board presets.
//!
//! Each preset renders to a complete single-environment toolchain
//! configuration so that common boards can be targeted by name alone.

use tpo_common::PlatformDescriptor;

/// A built-in board definition.
struct BoardPreset {
    /// Name used on the command line and as the environment name.
    name: &'static str,
    /// Board identifier understood by the toolchain, when it differs from `name`.
    board: Option<&'static str>,
    /// Toolchain platform package.
    platform: &'static str,
    /// Framework, if any.
    framework: Option<&'static str>,
    /// Extra compiler flags.
    build_flags: &'static [&'static str],
    /// Builds run on the host.
    native: bool,
}

const PRESETS: &[BoardPreset] = &[
    BoardPreset {
        name: "native",
        board: None,
        platform: "platformio/native",
        framework: None,
        build_flags: &["-std=c++17"],
        native: true,
    },
    BoardPreset {
        name: "uno",
        board: None,
        platform: "atmelavr",
        framework: Some("arduino"),
        build_flags: &[],
        native: false,
    },
    BoardPreset {
        name: "yun",
        board: None,
        platform: "atmelavr",
        framework: Some("arduino"),
        build_flags: &[],
        native: false,
    },
    BoardPreset {
        name: "nano_every",
        board: None,
        platform: "atmelmegaavr",
        framework: Some("arduino"),
        build_flags: &[],
        native: false,
    },
    BoardPreset {
        name: "due",
        board: None,
        platform: "atmelsam",
        framework: Some("arduino"),
        build_flags: &[],
        native: false,
    },
    BoardPreset {
        name: "teensylc",
        board: None,
        platform: "teensy",
        framework: Some("arduino"),
        build_flags: &[],
        native: false,
    },
    BoardPreset {
        name: "teensy30",
        board: None,
        platform: "teensy",
        framework: Some("arduino"),
        build_flags: &[],
        native: false,
    },
    BoardPreset {
        name: "teensy31",
        board: None,
        platform: "teensy",
        framework: Some("arduino"),
        build_flags: &[],
        native: false,
    },
    BoardPreset {
        name: "teensy40",
        board: None,
        platform: "teensy",
        framework: Some("arduino"),
        build_flags: &[],
        native: false,
    },
    BoardPreset {
        name: "teensy41",
        board: None,
        platform: "teensy",
        framework: Some("arduino"),
        build_flags: &[],
        native: false,
    },
    BoardPreset {
        name: "esp32dev",
        board: None,
        platform: "espressif32",
        framework: Some("arduino"),
        build_flags: &[],
        native: false,
    },
    BoardPreset {
        name: "esp32s3",
        board: Some("esp32-s3-devkitc-1"),
        platform: "espressif32",
        framework: Some("arduino"),
        build_flags: &[],
        native: false,
    },
    BoardPreset {
        name: "rpipico",
        board: None,
        platform: "raspberrypi",
        framework: Some("arduino"),
        build_flags: &[],
        native: false,
    },
    BoardPreset {
        name: "bluepill",
        board: Some("bluepill_f103c8"),
        platform: "ststm32",
        framework: Some("arduino"),
        build_flags: &[],
        native: false,
    },
];

impl BoardPreset {
    /// Renders the preset as a toolchain configuration file.
    fn render(&self) -> String {
        let mut lines = vec![
            "[platformio]".to_string(),
            "src_dir = src".to_string(),
            String::new(),
            format!("[env:{}]", self.name),
            format!("platform = {}", self.platform),
        ];
        if !self.native {
            lines.push(format!("board = {}", self.board.unwrap_or(self.name)));
        }
        if let Some(framework) = self.framework {
            lines.push(format!("framework = {framework}"));
        }
        if self.native {
            // Libraries rarely declare native compatibility.
            lines.push("lib_compat_mode = off".to_string());
        }
        if !self.build_flags.is_empty() {
            lines.push(format!("build_flags = {}", self.build_flags.join(" ")));
        }
        lines.join("\n") + "\n"
    }

    fn descriptor(&self) -> PlatformDescriptor {
        if self.native {
            PlatformDescriptor::host_native(self.name, self.render())
        } else {
            PlatformDescriptor::hardware(self.name, self.render())
        }
    }
}

/// Looks up a built-in board preset by name.
pub fn preset(name: &str) -> Option<PlatformDescriptor> {
    PRESETS
        .iter()
        .find(|p| p.name == name)
        .map(BoardPreset::descriptor)
}

/// Names of all built-in presets, sorted.
pub fn preset_names() -> Vec<&'static str> {
    let mut names: Vec<_> = PRESETS.iter().map(|p| p.name).collect();
    names.sort_unstable();
    names
}

/// A minimal configuration for a platform with no preset or user entry.
pub fn generic_config(name: &str) -> String {
    format!("[env:{name}]\nplatform = {name}\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn native_preset_is_host_native() {
        let p = preset("native").unwrap();
        assert!(p.is_host_native());
        assert!(p.config().contains("platform = platformio/native"));
        assert!(p.config().contains("-std=c++17"));
        assert!(!p.config().contains("board ="));
    }

    #[test]
    fn uno_preset_renders_board_section() {
        let p = preset("uno").unwrap();
        assert!(!p.is_host_native());
        assert_eq!(
            p.config(),
            "[platformio]\nsrc_dir = src\n\n[env:uno]\nplatform = atmelavr\nboard = uno\nframework = arduino\n"
        );
    }

    #[test]
    fn real_board_name_is_used() {
        let p = preset("esp32s3").unwrap();
        assert!(p.config().contains("board = esp32-s3-devkitc-1"));
        assert!(p.config().contains("[env:esp32s3]"));
    }

    #[test]
    fn unknown_preset_is_none() {
        assert!(preset("nonexistent_board").is_none());
    }

    #[test]
    fn names_are_unique_and_sorted() {
        let names = preset_names();
        let unique: HashSet<_> = names.iter().collect();
        assert_eq!(unique.len(), names.len());
        let mut sorted = names.clone();
        sorted.sort_unstable();
        assert_eq!(names, sorted);
    }

    #[test]
    fn generic_config_names_environment() {
        assert_eq!(generic_config("foo"), "[env:foo]\nplatform = foo\n");
    }
}

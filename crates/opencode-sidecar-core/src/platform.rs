use serde::{Deserialize, Serialize};
use std::fmt;

/// Operating system component of a release asset name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetOs {
    Darwin,
    Linux,
    Win32,
}

impl TargetOs {
    pub const ALL: [TargetOs; 3] = [TargetOs::Darwin, TargetOs::Linux, TargetOs::Win32];

    pub fn as_str(&self) -> &'static str {
        match self {
            TargetOs::Darwin => "darwin",
            TargetOs::Linux => "linux",
            TargetOs::Win32 => "win32",
        }
    }

    /// Map an OS identifier (`std::env::consts::OS` or a `uname -s` value)
    pub fn detect(os: &str) -> Self {
        let os = os.to_ascii_lowercase();
        if os.contains("darwin") || os.contains("macos") {
            TargetOs::Darwin
        } else if os.contains("win") {
            TargetOs::Win32
        } else {
            TargetOs::Linux
        }
    }
}

impl fmt::Display for TargetOs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// CPU architecture component of a release asset name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetArch {
    Arm64,
    X64,
}

impl TargetArch {
    pub const ALL: [TargetArch; 2] = [TargetArch::Arm64, TargetArch::X64];

    pub fn as_str(&self) -> &'static str {
        match self {
            TargetArch::Arm64 => "arm64",
            TargetArch::X64 => "x64",
        }
    }

    /// Map an architecture identifier (`std::env::consts::ARCH` or `uname -m`)
    pub fn detect(arch: &str) -> Self {
        match arch.to_ascii_lowercase().as_str() {
            "arm64" | "aarch64" => TargetArch::Arm64,
            _ => TargetArch::X64,
        }
    }
}

impl fmt::Display for TargetArch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Platform {
    pub os: TargetOs,
    pub arch: TargetArch,
}

impl Platform {
    pub fn new(os: TargetOs, arch: TargetArch) -> Self {
        Self { os, arch }
    }

    /// The platform this process runs on
    pub fn current() -> Self {
        Self {
            os: TargetOs::detect(std::env::consts::OS),
            arch: TargetArch::detect(std::env::consts::ARCH),
        }
    }

    pub fn is_windows(&self) -> bool {
        self.os == TargetOs::Win32
    }

    pub fn binary_name(&self, prefix: &str) -> String {
        binary_name_for(prefix, self.os, self.arch)
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.os, self.arch)
    }
}

/// Release asset name of the opencode binary for `os`/`arch`
pub fn binary_name(os: TargetOs, arch: TargetArch) -> String {
    binary_name_for("opencode", os, arch)
}

pub fn binary_name_for(prefix: &str, os: TargetOs, arch: TargetArch) -> String {
    let mut name = format!("{prefix}-{os}-{arch}");
    if os == TargetOs::Win32 {
        name.push_str(".exe");
    }
    name
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binary_name_matrix() {
        let expected = [
            (TargetOs::Darwin, TargetArch::Arm64, "opencode-darwin-arm64"),
            (TargetOs::Darwin, TargetArch::X64, "opencode-darwin-x64"),
            (TargetOs::Linux, TargetArch::Arm64, "opencode-linux-arm64"),
            (TargetOs::Linux, TargetArch::X64, "opencode-linux-x64"),
            (TargetOs::Win32, TargetArch::Arm64, "opencode-win32-arm64.exe"),
            (TargetOs::Win32, TargetArch::X64, "opencode-win32-x64.exe"),
        ];

        for (os, arch, name) in expected {
            assert_eq!(binary_name(os, arch), name);
            // deterministic
            assert_eq!(binary_name(os, arch), binary_name(os, arch));
        }
    }

    #[test]
    fn test_every_combination_is_distinct() {
        let mut names = std::collections::HashSet::new();
        for os in TargetOs::ALL {
            for arch in TargetArch::ALL {
                assert!(names.insert(binary_name(os, arch)));
            }
        }
        assert_eq!(names.len(), 6);
    }

    #[test]
    fn test_detection() {
        assert_eq!(TargetOs::detect("macos"), TargetOs::Darwin);
        assert_eq!(TargetOs::detect("Darwin"), TargetOs::Darwin);
        assert_eq!(TargetOs::detect("windows"), TargetOs::Win32);
        assert_eq!(TargetOs::detect("WINNT"), TargetOs::Win32);
        assert_eq!(TargetOs::detect("linux"), TargetOs::Linux);
        assert_eq!(TargetOs::detect("freebsd"), TargetOs::Linux);

        assert_eq!(TargetArch::detect("aarch64"), TargetArch::Arm64);
        assert_eq!(TargetArch::detect("arm64"), TargetArch::Arm64);
        assert_eq!(TargetArch::detect("x86_64"), TargetArch::X64);
    }

    #[test]
    fn test_custom_prefix() {
        let platform = Platform::new(TargetOs::Win32, TargetArch::X64);
        assert_eq!(platform.binary_name("agent"), "agent-win32-x64.exe");
        assert_eq!(platform.to_string(), "win32-x64");
    }
}

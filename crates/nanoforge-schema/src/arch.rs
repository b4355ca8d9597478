use std::fs::File;
use std::io::Read;
use std::path::Path;

/// The `e_machine` low byte sits at offset 18 of the ELF header.
const ELF_MACHINE_OFFSET: usize = 18;
/// EM_AARCH64.
const ELF_MACHINE_AARCH64: u8 = 0xb7;

/// Target architecture of an executable or kernel image.
///
/// Detected per reconciliation call and threaded explicitly through the
/// builder and backend calls; never stored in process-wide state, so
/// concurrent reconciliations for different architectures cannot corrupt
/// each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arch {
    X86_64,
    Arm64,
}

impl Arch {
    pub fn as_str(self) -> &'static str {
        match self {
            Arch::X86_64 => "x86_64",
            Arch::Arm64 => "arm64",
        }
    }

    /// The architecture this process runs on. Unrecognized hosts fall back
    /// to x86_64, matching the detection default.
    pub fn host() -> Arch {
        match std::env::consts::ARCH {
            "aarch64" | "arm" => Arch::Arm64,
            _ => Arch::X86_64,
        }
    }

    /// Whether this architecture matches the running host, accepting both
    /// the narrow and wide (64-bit) naming variants.
    pub fn matches_host(self) -> bool {
        self == Arch::host()
    }
}

impl std::fmt::Display for Arch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classify an executable by inspecting its ELF header: the aarch64 machine
/// byte at the fixed header offset selects arm64, anything else is x86_64.
pub fn detect(path: impl AsRef<Path>) -> std::io::Result<Arch> {
    let mut file = File::open(path)?;
    let mut header = [0u8; ELF_MACHINE_OFFSET + 1];
    file.read_exact(&mut header)?;

    if header[ELF_MACHINE_OFFSET] == ELF_MACHINE_AARCH64 {
        Ok(Arch::Arm64)
    } else {
        Ok(Arch::X86_64)
    }
}

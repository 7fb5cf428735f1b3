//! Target triple and data layout constants (§6).

/// The target triple for the current host platform - the JIT back end
/// always targets the process it's running in.
pub fn get_target_triple() -> &'static str {
    #[cfg(all(target_os = "macos", target_arch = "aarch64"))]
    {
        "arm64-apple-macosx14.0.0"
    }

    #[cfg(all(target_os = "macos", target_arch = "x86_64"))]
    {
        "x86_64-apple-darwin"
    }

    #[cfg(all(target_os = "linux", target_arch = "x86_64"))]
    {
        "x86_64-unknown-linux-gnu"
    }

    #[cfg(all(target_os = "linux", target_arch = "aarch64"))]
    {
        "aarch64-unknown-linux-gnu"
    }

    #[cfg(not(any(
        all(target_os = "macos", target_arch = "aarch64"),
        all(target_os = "macos", target_arch = "x86_64"),
        all(target_os = "linux", target_arch = "x86_64"),
        all(target_os = "linux", target_arch = "aarch64")
    )))]
    {
        "unknown"
    }
}

/// The data layout string §6 mandates: little-endian, natural alignment,
/// 64-bit native integer widths, 128-bit `x86_fp80` storage, 128-bit stack
/// alignment.
pub const DATA_LAYOUT: &str = "e-m:e-i64:64-f80:128-n8:16:32:64-S128";

//! Peak working-set estimate for one clip inside the engine.
//!
//! A decoded 4:2:0 frame is `w * h * 1.5` bytes; roughly 20 of them are live
//! across decoder and encoder reference buffers, and the source bytes exist
//! twice (caller buffer plus the engine's copy). Advisory only.

/// Conservative engine memory ceiling: 1.5 GiB.
pub const DEFAULT_MEMORY_CEILING_BYTES: u64 = 1536 * 1024 * 1024;

const BYTES_PER_PIXEL: f64 = 1.5;
const LIVE_FRAMES: f64 = 20.0;
const SOURCE_COPIES: f64 = 2.0;

pub fn estimate_peak_bytes(width: u32, height: u32, byte_size: u64) -> f64 {
    let frame_bytes = width as f64 * height as f64 * BYTES_PER_PIXEL;
    frame_bytes * LIVE_FRAMES + byte_size as f64 * SOURCE_COPIES
}

/// At risk when the estimate exceeds `ceiling`. Unknown resolution is never flagged.
pub fn is_at_risk(width: u32, height: u32, byte_size: u64, ceiling: u64) -> bool {
    if width == 0 || height == 0 {
        return false;
    }
    estimate_peak_bytes(width, height, byte_size) > ceiling as f64
}

pub fn format_gib(bytes: f64) -> String {
    format!("{:.1}GB", bytes / 1024.0 / 1024.0 / 1024.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIB: u64 = 1024 * 1024;

    #[test]
    fn full_hd_small_file_is_safe() {
        // 1920*1080*1.5*20 ≈ 59 MiB
        assert!(!is_at_risk(1920, 1080, 200 * MIB, DEFAULT_MEMORY_CEILING_BYTES));
    }

    #[test]
    fn large_file_is_flagged() {
        assert!(is_at_risk(1920, 1080, 800 * MIB, DEFAULT_MEMORY_CEILING_BYTES));
    }

    #[test]
    fn unknown_resolution_is_never_flagged() {
        assert!(!is_at_risk(0, 0, u64::MAX / 4, DEFAULT_MEMORY_CEILING_BYTES));
        assert!(!is_at_risk(1920, 0, u64::MAX / 4, DEFAULT_MEMORY_CEILING_BYTES));
    }

    #[test]
    fn estimate_is_monotonic_in_every_input() {
        let base = estimate_peak_bytes(1280, 720, 10 * MIB);
        assert!(estimate_peak_bytes(1281, 720, 10 * MIB) > base);
        assert!(estimate_peak_bytes(1280, 721, 10 * MIB) > base);
        assert!(estimate_peak_bytes(1280, 720, 10 * MIB + 1) > base);
    }

    #[test]
    fn estimate_matches_formula() {
        assert_eq!(estimate_peak_bytes(100, 100, 1000), 100.0 * 100.0 * 1.5 * 20.0 + 2000.0);
    }

    #[test]
    fn gib_formatting() {
        assert_eq!(format_gib(1.5 * 1024.0 * 1024.0 * 1024.0), "1.5GB");
    }
}

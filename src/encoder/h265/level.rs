//! H.265 level limits (Tables A.8 and A.9) and level selection.

use super::H265Tier;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LevelDescriptor {
    pub name: &'static str,
    pub level_idc: u8,
    pub max_luma_ps: u32,
    /// CPB size in units of the profile's CPB factor, zero where the high
    /// tier does not exist.
    pub max_cpb_main: u32,
    pub max_cpb_high: u32,
    pub max_slice_segments_per_picture: u32,
    pub max_tile_rows: u32,
    pub max_tile_cols: u32,
    pub max_br_main: u32,
    pub max_br_high: u32,
}

const fn level(
    name: &'static str,
    level_idc: u8,
    max_luma_ps: u32,
    (max_cpb_main, max_cpb_high): (u32, u32),
    max_slice_segments_per_picture: u32,
    (max_tile_rows, max_tile_cols): (u32, u32),
    (max_br_main, max_br_high): (u32, u32),
) -> LevelDescriptor {
    LevelDescriptor {
        name,
        level_idc,
        max_luma_ps,
        max_cpb_main,
        max_cpb_high,
        max_slice_segments_per_picture,
        max_tile_rows,
        max_tile_cols,
        max_br_main,
        max_br_high,
    }
}

pub const LEVELS: &[LevelDescriptor] = &[
    level("1", 30, 36_864, (350, 0), 16, (1, 1), (128, 0)),
    level("2", 60, 122_880, (1_500, 0), 16, (1, 1), (1_500, 0)),
    level("2.1", 63, 245_760, (3_000, 0), 20, (1, 1), (3_000, 0)),
    level("3", 90, 552_960, (6_000, 0), 30, (2, 2), (6_000, 0)),
    level("3.1", 93, 983_040, (10_000, 0), 40, (3, 3), (10_000, 0)),
    level("4", 120, 2_228_224, (12_000, 30_000), 75, (5, 5), (12_000, 30_000)),
    level("4.1", 123, 2_228_224, (20_000, 50_000), 75, (5, 5), (20_000, 50_000)),
    level("5", 150, 8_912_896, (25_000, 100_000), 200, (11, 10), (25_000, 100_000)),
    level("5.1", 153, 8_912_896, (40_000, 160_000), 200, (11, 10), (40_000, 160_000)),
    level("5.2", 156, 8_912_896, (60_000, 240_000), 200, (11, 10), (60_000, 240_000)),
    level("6", 180, 35_651_584, (60_000, 240_000), 600, (22, 20), (60_000, 240_000)),
    level("6.1", 183, 35_651_584, (120_000, 480_000), 600, (22, 20), (120_000, 480_000)),
    level("6.2", 186, 35_651_584, (240_000, 800_000), 600, (22, 20), (240_000, 800_000)),
];

/// VCL CPB factor (bits per unit of MaxBR) for a format.
pub fn cpb_vcl_factor(bit_depth: u8, chroma_format_idc: u8) -> u64 {
    match (chroma_format_idc, bit_depth) {
        (3, 12..) => 3000,
        (3, 9..=10) => 2500,
        (3, _) => 2000,
        (2, 12..) => 2000,
        (2, _) => 1667,
        (_, 12..) => 1500,
        _ => 1000,
    }
}

/// Limits shared by every level check.
#[derive(Debug, Clone, Copy)]
pub struct LevelRequest {
    pub cpb_factor: u64,
    pub tier: H265Tier,
    pub bitrate: u64,
    pub width: u32,
    pub height: u32,
    pub slice_segments: u32,
    pub tile_rows: u32,
    pub tile_cols: u32,
    pub max_dec_pic_buffering: u32,
}

/// Lowest level admitting the stream at the requested tier.
pub fn guess_level(req: &LevelRequest) -> Option<&'static LevelDescriptor> {
    let pic_size = req.width as u64 * req.height as u64;

    LEVELS.iter().find(|level| {
        let max_br = match req.tier {
            H265Tier::Main => level.max_br_main,
            H265Tier::High => level.max_br_high,
        };
        if max_br == 0 || req.bitrate > req.cpb_factor * max_br as u64 {
            return false;
        }

        let max_luma_ps = level.max_luma_ps as u64;
        if pic_size > max_luma_ps {
            return false;
        }
        if (req.width as u64).pow(2) > 8 * max_luma_ps || (req.height as u64).pow(2) > 8 * max_luma_ps {
            return false;
        }
        if req.slice_segments > level.max_slice_segments_per_picture {
            return false;
        }
        if req.tile_rows > level.max_tile_rows || req.tile_cols > level.max_tile_cols {
            return false;
        }

        // maxDpbPicBuf is 6 for every profile here.
        let max_dpb_size = if pic_size <= max_luma_ps >> 2 {
            16
        } else if pic_size <= max_luma_ps >> 1 {
            12
        } else if pic_size <= 3 * max_luma_ps >> 2 {
            8
        } else {
            6
        };
        req.max_dec_pic_buffering <= max_dpb_size
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(width: u32, height: u32, bitrate: u64) -> LevelRequest {
        LevelRequest {
            cpb_factor: 1000,
            tier: H265Tier::Main,
            bitrate,
            width,
            height,
            slice_segments: 1,
            tile_rows: 1,
            tile_cols: 1,
            max_dec_pic_buffering: 2,
        }
    }

    #[test]
    fn test_1080p_main() {
        assert_eq!(guess_level(&request(1920, 1080, 0)).unwrap().level_idc, 120);
        assert_eq!(guess_level(&request(1920, 1080, 15_000_000)).unwrap().level_idc, 123);
    }

    #[test]
    fn test_high_tier_skips_low_levels() {
        let mut req = request(352, 288, 0);
        assert_eq!(guess_level(&req).unwrap().level_idc, 60);
        req.tier = H265Tier::High;
        assert_eq!(guess_level(&req).unwrap().level_idc, 120);
    }

    #[test]
    fn test_tiles_raise_the_level() {
        let mut req = request(1280, 720, 0);
        assert_eq!(guess_level(&req).unwrap().level_idc, 93);
        req.tile_cols = 4;
        assert_eq!(guess_level(&req).unwrap().level_idc, 120);
    }

    #[test]
    fn test_cpb_factor() {
        assert_eq!(cpb_vcl_factor(8, 1), 1000);
        assert_eq!(cpb_vcl_factor(12, 1), 1500);
        assert_eq!(cpb_vcl_factor(10, 2), 1667);
        assert_eq!(cpb_vcl_factor(8, 3), 2000);
    }

    #[test]
    fn test_too_large() {
        assert!(guess_level(&request(16384, 16384, 0)).is_none());
    }
}

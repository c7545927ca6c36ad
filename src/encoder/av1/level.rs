//! AV1 level limits (Annex A.3) and level selection.

use super::Av1Tier;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LevelDescriptor {
    pub name: &'static str,
    pub level_idx: u8,
    pub max_pic_size: u32,
    pub max_h_size: u32,
    pub max_v_size: u32,
    pub max_display_rate: u64,
    /// Kbit/s; zero where the high tier does not exist.
    pub max_bitrate_main: u32,
    pub max_bitrate_high: u32,
    pub max_tiles: u32,
    pub max_tile_cols: u32,
}

const fn level(
    name: &'static str,
    level_idx: u8,
    max_pic_size: u32,
    (max_h_size, max_v_size): (u32, u32),
    max_display_rate: u64,
    (max_bitrate_main, max_bitrate_high): (u32, u32),
    (max_tiles, max_tile_cols): (u32, u32),
) -> LevelDescriptor {
    LevelDescriptor {
        name,
        level_idx,
        max_pic_size,
        max_h_size,
        max_v_size,
        max_display_rate,
        max_bitrate_main,
        max_bitrate_high,
        max_tiles,
        max_tile_cols,
    }
}

pub const LEVELS: &[LevelDescriptor] = &[
    level("2.0", 0, 147_456, (2048, 1152), 4_423_680, (1_500, 0), (8, 4)),
    level("2.1", 1, 278_784, (2816, 1584), 8_363_520, (3_000, 0), (8, 4)),
    level("3.0", 4, 665_856, (4352, 2448), 19_975_680, (6_000, 0), (16, 6)),
    level("3.1", 5, 1_065_024, (5504, 3096), 31_950_720, (10_000, 0), (16, 6)),
    level("4.0", 8, 2_359_296, (6144, 3456), 70_778_880, (12_000, 30_000), (32, 8)),
    level("4.1", 9, 2_359_296, (6144, 3456), 141_557_760, (20_000, 50_000), (32, 8)),
    level("5.0", 12, 8_912_896, (8192, 4352), 267_386_880, (30_000, 100_000), (64, 8)),
    level("5.1", 13, 8_912_896, (8192, 4352), 534_773_760, (40_000, 160_000), (64, 8)),
    level("5.2", 14, 8_912_896, (8192, 4352), 1_069_547_520, (60_000, 240_000), (64, 8)),
    level("5.3", 15, 8_912_896, (8192, 4352), 1_069_547_520, (60_000, 240_000), (64, 8)),
    level("6.0", 16, 35_651_584, (16384, 8704), 1_069_547_520, (60_000, 240_000), (128, 16)),
    level("6.1", 17, 35_651_584, (16384, 8704), 2_139_095_040, (100_000, 480_000), (128, 16)),
    level("6.2", 18, 35_651_584, (16384, 8704), 4_278_190_080, (160_000, 800_000), (128, 16)),
    level("6.3", 19, 35_651_584, (16384, 8704), 4_278_190_080, (160_000, 800_000), (128, 16)),
];

#[derive(Debug, Clone, Copy)]
pub struct LevelRequest {
    pub tier: Av1Tier,
    pub bitrate: u64,
    pub width: u32,
    pub height: u32,
    pub frame_rate: (u32, u32),
    pub tiles: u32,
    pub tile_cols: u32,
}

/// Lowest level admitting the stream at the requested tier.
pub fn guess_level(req: &LevelRequest) -> Option<&'static LevelDescriptor> {
    let pic_size = req.width as u64 * req.height as u64;
    let (num, den) = req.frame_rate;
    let display_rate = pic_size * num as u64 / den.max(1) as u64;

    LEVELS.iter().find(|level| {
        let max_bitrate = match req.tier {
            Av1Tier::Main => level.max_bitrate_main,
            Av1Tier::High => level.max_bitrate_high,
        };
        if max_bitrate == 0 || req.bitrate > max_bitrate as u64 * 1000 {
            return false;
        }
        if pic_size > level.max_pic_size as u64
            || req.width > level.max_h_size
            || req.height > level.max_v_size
        {
            return false;
        }
        if display_rate > level.max_display_rate {
            return false;
        }
        req.tiles <= level.max_tiles && req.tile_cols <= level.max_tile_cols
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(width: u32, height: u32, fps: u32) -> LevelRequest {
        LevelRequest {
            tier: Av1Tier::Main,
            bitrate: 0,
            width,
            height,
            frame_rate: (fps, 1),
            tiles: 1,
            tile_cols: 1,
        }
    }

    #[test]
    fn test_common_sizes() {
        assert_eq!(guess_level(&request(1280, 720, 30)).unwrap().level_idx, 5);
        assert_eq!(guess_level(&request(1920, 1080, 30)).unwrap().level_idx, 8);
        assert_eq!(guess_level(&request(1920, 1080, 60)).unwrap().level_idx, 9);
        assert_eq!(guess_level(&request(3840, 2160, 30)).unwrap().level_idx, 12);
    }

    #[test]
    fn test_bitrate_and_tier() {
        let mut req = request(1920, 1080, 30);
        req.bitrate = 25_000_000;
        assert_eq!(guess_level(&req).unwrap().name, "5.0");
        req.tier = Av1Tier::High;
        assert_eq!(guess_level(&req).unwrap().name, "4.0");
    }

    #[test]
    fn test_tile_columns() {
        let mut req = request(1280, 720, 30);
        req.tiles = 8;
        req.tile_cols = 8;
        assert_eq!(guess_level(&req).unwrap().level_idx, 8);
    }

    #[test]
    fn test_nothing_fits() {
        assert!(guess_level(&request(32768, 32768, 30)).is_none());
    }
}

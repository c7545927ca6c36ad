//! H.264 level limits (Table A-1) and level selection.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LevelDescriptor {
    pub name: &'static str,
    pub level_idc: u8,
    /// Level 1b in Baseline/Main is signalled as 1.1 plus constraint_set3.
    pub constraint_set3_flag: bool,
    pub max_mbps: u32,
    pub max_fs: u32,
    pub max_dpb_mbs: u32,
    /// kbit/s for Baseline and Main.
    pub max_br: u32,
}

const fn level(
    name: &'static str,
    level_idc: u8,
    constraint_set3_flag: bool,
    max_mbps: u32,
    max_fs: u32,
    max_dpb_mbs: u32,
    max_br: u32,
) -> LevelDescriptor {
    LevelDescriptor {
        name,
        level_idc,
        constraint_set3_flag,
        max_mbps,
        max_fs,
        max_dpb_mbs,
        max_br,
    }
}

pub const LEVELS: &[LevelDescriptor] = &[
    level("1", 10, false, 1_485, 99, 396, 64),
    level("1b", 11, true, 1_485, 99, 396, 128),
    level("1.1", 11, false, 3_000, 396, 900, 192),
    level("1.2", 12, false, 6_000, 396, 2_376, 384),
    level("1.3", 13, false, 11_880, 396, 2_376, 768),
    level("2", 20, false, 11_880, 396, 2_376, 2_000),
    level("2.1", 21, false, 19_800, 792, 4_752, 4_000),
    level("2.2", 22, false, 20_250, 1_620, 8_100, 4_000),
    level("3", 30, false, 40_500, 1_620, 8_100, 10_000),
    level("3.1", 31, false, 108_000, 3_600, 18_000, 14_000),
    level("3.2", 32, false, 216_000, 5_120, 20_480, 20_000),
    level("4", 40, false, 245_760, 8_192, 32_768, 20_000),
    level("4.1", 41, false, 245_760, 8_192, 32_768, 50_000),
    level("4.2", 42, false, 522_240, 8_704, 34_816, 50_000),
    level("5", 50, false, 589_824, 22_080, 110_400, 135_000),
    level("5.1", 51, false, 983_040, 36_864, 184_320, 240_000),
    level("5.2", 52, false, 2_073_600, 36_864, 184_320, 240_000),
    level("6", 60, false, 4_177_920, 139_264, 696_320, 240_000),
    level("6.1", 61, false, 8_355_840, 139_264, 696_320, 480_000),
    level("6.2", 62, false, 16_711_680, 139_264, 696_320, 800_000),
];

/// Bitrate factor per profile, in bits per kbit (Table A-2, VCL).
fn bitrate_factor(profile_idc: u8) -> u64 {
    match profile_idc {
        100 => 1250,
        110 => 3000,
        122 | 244 => 4000,
        _ => 1000,
    }
}

/// Lowest level whose limits admit the stream, or `None` if none does.
/// Zero for `bitrate`, `framerate` or `dpb_frames` skips that check.
pub fn guess_level(
    profile_idc: u8,
    bitrate: u64,
    framerate: u32,
    width: u32,
    height: u32,
    dpb_frames: u32,
) -> Option<&'static LevelDescriptor> {
    let width_mbs = width.div_ceil(16) as u64;
    let height_mbs = height.div_ceil(16) as u64;
    let frame_mbs = width_mbs * height_mbs;
    let factor = bitrate_factor(profile_idc);

    LEVELS.iter().find(|level| {
        if level.constraint_set3_flag && profile_idc != 66 && profile_idc != 77 {
            return false;
        }
        if bitrate > level.max_br as u64 * factor {
            return false;
        }
        if frame_mbs > level.max_fs as u64 {
            return false;
        }
        // Neither dimension may exceed sqrt(8 * MaxFS).
        if width_mbs * width_mbs > 8 * level.max_fs as u64
            || height_mbs * height_mbs > 8 * level.max_fs as u64
        {
            return false;
        }
        if framerate > 0 && frame_mbs * framerate as u64 > level.max_mbps as u64 {
            return false;
        }
        if dpb_frames > 0 {
            let max_dpb_frames = (level.max_dpb_mbs as u64 / frame_mbs).min(16);
            if (dpb_frames as u64) > max_dpb_frames {
                return false;
            }
        }
        true
    })
}

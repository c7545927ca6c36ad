//! Rate control mode selection and the global parameters derived from it.

use tracing::{debug, info, warn};

use super::device::RateControlModes;
use super::{RateControl, RateControlMode};
use crate::error::{EncodeError, Result};

/// Most global parameters staged per sequence.
pub const MAX_GLOBAL_PARAMS: usize = 4;

/// AVBR convergence window when no GOP size is known.
const DEFAULT_AVBR_WINDOW: u32 = 60;

#[derive(Debug, Clone, Copy)]
struct ModeInfo {
    mode: RateControlMode,
    flag: RateControlModes,
    bitrate: bool,
    maxrate: bool,
    quality: bool,
    hrd: bool,
}

const MODES: [ModeInfo; 6] = [
    ModeInfo {
        mode: RateControlMode::Cqp,
        flag: RateControlModes::CQP,
        bitrate: false,
        maxrate: false,
        quality: true,
        hrd: false,
    },
    ModeInfo {
        mode: RateControlMode::Cbr,
        flag: RateControlModes::CBR,
        bitrate: true,
        maxrate: false,
        quality: false,
        hrd: true,
    },
    ModeInfo {
        mode: RateControlMode::Vbr,
        flag: RateControlModes::VBR,
        bitrate: true,
        maxrate: true,
        quality: false,
        hrd: true,
    },
    ModeInfo {
        mode: RateControlMode::Icq,
        flag: RateControlModes::ICQ,
        bitrate: false,
        maxrate: false,
        quality: true,
        hrd: false,
    },
    ModeInfo {
        mode: RateControlMode::Qvbr,
        flag: RateControlModes::QVBR,
        bitrate: true,
        maxrate: true,
        quality: true,
        hrd: true,
    },
    ModeInfo {
        mode: RateControlMode::Avbr,
        flag: RateControlModes::AVBR,
        bitrate: true,
        maxrate: false,
        quality: false,
        hrd: false,
    },
];

fn info_for(mode: RateControlMode) -> ModeInfo {
    match mode {
        RateControlMode::Cqp => MODES[0],
        RateControlMode::Cbr => MODES[1],
        RateControlMode::Vbr => MODES[2],
        RateControlMode::Icq => MODES[3],
        RateControlMode::Qvbr => MODES[4],
        RateControlMode::Avbr => MODES[5],
    }
}

impl RateControlMode {
    /// Whether the mode carries a HRD buffer model.
    pub fn has_hrd(self) -> bool {
        info_for(self).hrd
    }

    pub fn uses_quality(self) -> bool {
        info_for(self).quality
    }
}

/// Rate control parameter buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RateControlParams {
    pub bits_per_second: u32,
    pub target_percentage: u32,
    pub window_size: u32,
    pub initial_qp: u32,
    pub min_qp: u32,
    pub max_qp: u32,
    pub icq_quality_factor: u32,
    pub quality_factor: u32,
}

/// HRD parameter buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HrdParams {
    pub initial_buffer_fullness: u32,
    pub buffer_size: u32,
}

/// Parameters staged once per sequence (and max frame size, per picture).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GlobalParam {
    RateControl(RateControlParams),
    Hrd(HrdParams),
    /// `den << 16 | num`.
    FrameRate(u32),
    QualityLevel(u32),
    /// Limit in bits.
    MaxFrameSize(u32),
}

/// Everything the session decided about rate control.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateControlState {
    pub mode: RateControlMode,
    pub bits_per_second: u32,
    pub target_percentage: u32,
    pub window_size: u32,
    pub quality: i32,
    pub hrd_buffer_size: u32,
    pub hrd_initial_buffer_fullness: u32,
    pub min_qp: u32,
    pub max_qp: u32,
    /// Driver wants the chosen mode set as a config attribute.
    pub set_attribute: bool,
}

/// Options relevant to mode selection beyond the user's request.
#[derive(Debug, Clone, Copy)]
pub struct RateControlContext {
    /// Modes the driver reports, `None` when it reports nothing.
    pub supported: Option<RateControlModes>,
    pub constant_quality_only: bool,
    pub default_quality: i32,
    /// GOP length in pictures, used as the AVBR window.
    pub gop_pictures: u32,
}

fn mode_names(modes: RateControlModes) -> String {
    let names: Vec<String> = MODES
        .iter()
        .filter(|m| modes.contains(m.flag))
        .map(|m| format!("{:?}", m.mode).to_uppercase())
        .collect();
    names.join(", ")
}

fn to_u32(value: u64) -> Result<u32> {
    u32::try_from(value).map_err(|_| {
        EncodeError::InvalidConfig("RC parameters of 2^32 or greater are not supported".to_string())
    })
}

fn choose_mode(request: &RateControl, ctx: &RateControlContext) -> Result<ModeInfo> {
    let supported = ctx.supported.unwrap_or(RateControlModes::CQP);
    debug!("Driver supports RC modes {}", mode_names(supported));

    let try_mode = |mode: RateControlMode, fail: bool| -> Result<Option<ModeInfo>> {
        let info = info_for(mode);
        if supported.contains(info.flag) {
            Ok(Some(info))
        } else if fail {
            Err(EncodeError::InvalidConfig(format!(
                "driver does not support {:?} RC mode (supported modes: {})",
                mode,
                mode_names(supported)
            )))
        } else {
            debug!("Driver does not support {:?} RC mode", mode);
            Ok(None)
        }
    };

    let bitrate = request.bitrate > 0;
    let quality = request.global_quality.is_some_and(|q| q > 0);

    let mut candidates: Vec<(RateControlMode, bool)> = Vec::new();
    if let Some(mode) = request.mode {
        candidates.push((mode, true));
    }
    if request.qp.is_some() || ctx.constant_quality_only {
        candidates.push((RateControlMode::Cqp, true));
    }
    if bitrate && quality {
        candidates.push((RateControlMode::Qvbr, false));
    }
    if quality {
        candidates.push((RateControlMode::Icq, false));
        candidates.push((RateControlMode::Cqp, false));
    }
    if bitrate && request.max_bitrate == request.bitrate {
        candidates.push((RateControlMode::Cbr, false));
    }
    if bitrate {
        candidates.push((RateControlMode::Avbr, false));
        candidates.push((RateControlMode::Vbr, false));
        candidates.push((RateControlMode::Cbr, false));
    } else {
        candidates.push((RateControlMode::Icq, false));
        candidates.push((RateControlMode::Cqp, false));
    }

    for (mode, fail) in candidates {
        if let Some(info) = try_mode(mode, fail)? {
            return Ok(info);
        }
    }
    Err(EncodeError::InvalidConfig(format!(
        "driver does not support any RC mode compatible with the selected options (supported modes: {})",
        mode_names(supported)
    )))
}

/// Pick a rate control mode and derive its parameters.
pub fn init_rate_control(request: &RateControl, ctx: &RateControlContext) -> Result<RateControlState> {
    // Everything below is derived in u64 from values that fit in u32.
    for value in [
        request.bitrate,
        request.max_bitrate,
        request.buffer_size,
        request.initial_buffer_fullness,
    ] {
        to_u32(value)?;
    }
    let info = choose_mode(request, ctx)?;

    let (bits_per_second, target_percentage, mut window_size) = if info.bitrate {
        if request.bitrate == 0 {
            return Err(EncodeError::InvalidConfig(format!(
                "bitrate must be set for {:?} RC mode",
                info.mode
            )));
        }
        if info.mode == RateControlMode::Avbr {
            let window = if ctx.gop_pictures > 0 {
                ctx.gop_pictures
            } else {
                DEFAULT_AVBR_WINDOW
            };
            (request.bitrate, 100, window)
        } else if info.maxrate {
            if request.max_bitrate > 0 {
                if request.max_bitrate < request.bitrate {
                    return Err(EncodeError::InvalidConfig(format!(
                        "bitrate ({}) must not be greater than maxrate ({})",
                        request.bitrate, request.max_bitrate
                    )));
                }
                (
                    request.max_bitrate,
                    (request.bitrate * 100 / request.max_bitrate) as u32,
                    0,
                )
            } else {
                (2 * request.bitrate, 50, 0)
            }
        } else {
            if request.max_bitrate > request.bitrate {
                warn!("Max bitrate is ignored in {:?} RC mode", info.mode);
            }
            (request.bitrate, 100, 0)
        }
    } else {
        (0, 100, 0)
    };

    let quality = if info.quality {
        match (request.qp, request.global_quality) {
            (Some(qp), _) => qp,
            (None, Some(q)) if q > 0 => q,
            _ => {
                warn!("No quality level set; using default ({})", ctx.default_quality);
                ctx.default_quality
            }
        }
    } else {
        0
    };

    let (hrd_buffer_size, hrd_initial_buffer_fullness) = if info.hrd {
        let buffer = if request.buffer_size > 0 {
            request.buffer_size
        } else if request.max_bitrate > 0 {
            request.max_bitrate
        } else {
            request.bitrate
        };
        let initial = if request.initial_buffer_fullness > 0 {
            if request.initial_buffer_fullness > buffer {
                return Err(EncodeError::InvalidConfig(format!(
                    "initial buffer fullness ({}) must not exceed buffer size ({})",
                    request.initial_buffer_fullness, buffer
                )));
            }
            request.initial_buffer_fullness
        } else {
            buffer * 3 / 4
        };
        window_size = to_u32(buffer * 1000 / bits_per_second.max(1))?;
        (buffer, initial)
    } else {
        if request.buffer_size > 0 || request.initial_buffer_fullness > 0 {
            warn!("Buffering settings are ignored in {:?} RC mode", info.mode);
        }
        if info.mode != RateControlMode::Avbr {
            window_size = 1000;
        }
        (0, 0)
    };

    let state = RateControlState {
        mode: info.mode,
        bits_per_second: to_u32(bits_per_second)?,
        target_percentage,
        window_size,
        quality,
        hrd_buffer_size: to_u32(hrd_buffer_size)?,
        hrd_initial_buffer_fullness: to_u32(hrd_initial_buffer_fullness)?,
        min_qp: request.qmin.unwrap_or(0).max(0) as u32,
        max_qp: request.qmax.unwrap_or(0).max(0) as u32,
        set_attribute: ctx.supported.is_some(),
    };

    info!("RC mode: {:?}", state.mode);
    if info.quality {
        info!("RC quality: {}", state.quality);
    }
    if state.mode == RateControlMode::Avbr {
        info!(
            "RC target: {} bps converging in {} frames with {}% accuracy",
            state.bits_per_second, state.window_size, state.target_percentage
        );
    } else if info.bitrate {
        info!(
            "RC target: {}% of {} bps over {} ms",
            state.target_percentage, state.bits_per_second, state.window_size
        );
    }
    if info.hrd {
        info!(
            "RC buffer: {} bits, initial fullness {} bits",
            state.hrd_buffer_size, state.hrd_initial_buffer_fullness
        );
    }
    Ok(state)
}

impl RateControlState {
    pub fn params(&self) -> RateControlParams {
        RateControlParams {
            bits_per_second: self.bits_per_second,
            target_percentage: self.target_percentage,
            window_size: self.window_size,
            initial_qp: 0,
            min_qp: self.min_qp,
            max_qp: self.max_qp,
            icq_quality_factor: self.quality.clamp(1, 51) as u32,
            quality_factor: self.quality.max(0) as u32,
        }
    }

    /// Global parameters for this mode and frame rate.
    pub fn global_params(&self, frame_rate: (u32, u32)) -> Vec<GlobalParam> {
        let mut params = Vec::with_capacity(MAX_GLOBAL_PARAMS);
        if self.mode != RateControlMode::Cqp {
            params.push(GlobalParam::RateControl(self.params()));
        }
        if self.mode.has_hrd() {
            params.push(GlobalParam::Hrd(HrdParams {
                initial_buffer_fullness: self.hrd_initial_buffer_fullness,
                buffer_size: self.hrd_buffer_size,
            }));
        }
        let (num, den) = reduce(frame_rate.0 as u64, frame_rate.1.max(1) as u64, 65535);
        info!("RC framerate: {}/{} ({:.2} fps)", num, den, num as f64 / den as f64);
        params.push(GlobalParam::FrameRate((den << 16) | num));
        params
    }
}

fn gcd(mut a: u64, mut b: u64) -> u64 {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a
}

/// Reduce `num/den` so both terms are at most `max`, approximating with
/// continued fractions when an exact reduction does not fit.
pub fn reduce(num: u64, den: u64, max: u64) -> (u32, u32) {
    if den == 0 {
        return (0, 1);
    }
    let g = gcd(num, den).max(1);
    let (num, den) = (num / g, den / g);
    if num <= max && den <= max {
        return (num as u32, den as u32);
    }

    let (mut h0, mut h1) = (0u64, 1u64);
    let (mut k0, mut k1) = (1u64, 0u64);
    let (mut n, mut d) = (num, den);
    while d != 0 {
        let a = n / d;
        let h2 = a * h1 + h0;
        let k2 = a * k1 + k0;
        if h2 > max || k2 > max {
            break;
        }
        (h0, h1) = (h1, h2);
        (k0, k1) = (k1, k2);
        (n, d) = (d, n - a * d);
    }
    if k1 == 0 {
        // Larger than max/1: saturate.
        return (max as u32, 1);
    }
    (h1 as u32, k1 as u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(supported: Option<RateControlModes>) -> RateControlContext {
        RateControlContext {
            supported,
            constant_quality_only: false,
            default_quality: 26,
            gop_pictures: 120,
        }
    }

    fn all() -> Option<RateControlModes> {
        Some(RateControlModes::all())
    }

    #[test]
    fn test_no_bitrate_prefers_icq() {
        let state = init_rate_control(&RateControl::default(), &ctx(all())).unwrap();
        assert_eq!(state.mode, RateControlMode::Icq);
        assert_eq!(state.quality, 26);
        assert_eq!(state.window_size, 1000);
    }

    #[test]
    fn test_unreported_modes_mean_cqp() {
        let state = init_rate_control(&RateControl::default(), &ctx(None)).unwrap();
        assert_eq!(state.mode, RateControlMode::Cqp);
        assert!(!state.set_attribute);
    }

    #[test]
    fn test_explicit_mode_must_be_supported() {
        let request = RateControl {
            mode: Some(RateControlMode::Cbr),
            bitrate: 1_000_000,
            ..Default::default()
        };
        let err = init_rate_control(&request, &ctx(Some(RateControlModes::CQP))).unwrap_err();
        assert!(matches!(err, EncodeError::InvalidConfig(_)));
    }

    #[test]
    fn test_equal_maxrate_selects_cbr() {
        let request = RateControl {
            bitrate: 2_000_000,
            max_bitrate: 2_000_000,
            ..Default::default()
        };
        let state = init_rate_control(&request, &ctx(all())).unwrap();
        assert_eq!(state.mode, RateControlMode::Cbr);
        assert_eq!(state.bits_per_second, 2_000_000);
        assert_eq!(state.hrd_buffer_size, 2_000_000);
        assert_eq!(state.hrd_initial_buffer_fullness, 1_500_000);
        assert_eq!(state.window_size, 1000);
    }

    #[test]
    fn test_vbr_without_maxrate_doubles_target() {
        let request = RateControl {
            bitrate: 1_000_000,
            ..Default::default()
        };
        let modes = Some(RateControlModes::VBR | RateControlModes::CQP);
        let state = init_rate_control(&request, &ctx(modes)).unwrap();
        assert_eq!(state.mode, RateControlMode::Vbr);
        assert_eq!(state.bits_per_second, 2_000_000);
        assert_eq!(state.target_percentage, 50);
        assert_eq!(state.window_size, 500);
    }

    #[test]
    fn test_avbr_window_is_gop_length() {
        let request = RateControl {
            bitrate: 1_000_000,
            ..Default::default()
        };
        let state = init_rate_control(&request, &ctx(all())).unwrap();
        assert_eq!(state.mode, RateControlMode::Avbr);
        assert_eq!(state.window_size, 120);
        assert_eq!(state.target_percentage, 100);
    }

    #[test]
    fn test_maxrate_below_bitrate_is_rejected() {
        let request = RateControl {
            mode: Some(RateControlMode::Vbr),
            bitrate: 2_000_000,
            max_bitrate: 1_000_000,
            ..Default::default()
        };
        assert!(init_rate_control(&request, &ctx(all())).is_err());
    }

    #[test]
    fn test_large_values_rejected() {
        let request = RateControl {
            mode: Some(RateControlMode::Cbr),
            bitrate: 1 << 33,
            ..Default::default()
        };
        assert!(init_rate_control(&request, &ctx(all())).is_err());
    }

    #[test]
    fn test_huge_values_do_not_overflow() {
        let request = RateControl {
            bitrate: u64::MAX / 10,
            max_bitrate: u64::MAX / 10,
            ..Default::default()
        };
        assert!(matches!(
            init_rate_control(&request, &ctx(all())),
            Err(EncodeError::InvalidConfig(_))
        ));

        let request = RateControl {
            mode: Some(RateControlMode::Vbr),
            bitrate: 1_000_000,
            max_bitrate: 2_000_000,
            buffer_size: u64::MAX / 10,
            ..Default::default()
        };
        assert!(matches!(
            init_rate_control(&request, &ctx(all())),
            Err(EncodeError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_global_params() {
        let request = RateControl {
            bitrate: 2_000_000,
            max_bitrate: 2_000_000,
            ..Default::default()
        };
        let state = init_rate_control(&request, &ctx(all())).unwrap();
        let params = state.global_params((30000, 1001));
        assert_eq!(params.len(), 3);
        assert!(matches!(params[0], GlobalParam::RateControl(_)));
        assert!(matches!(params[1], GlobalParam::Hrd(_)));
        assert_eq!(params[2], GlobalParam::FrameRate((1001 << 16) | 30000));

        let cqp = init_rate_control(&RateControl::default(), &ctx(None)).unwrap();
        assert_eq!(cqp.global_params((25, 1)), vec![GlobalParam::FrameRate((1 << 16) | 25)]);
    }

    #[test]
    fn test_reduce() {
        assert_eq!(reduce(60, 2, 65535), (30, 1));
        assert_eq!(reduce(30000, 1001, 65535), (30000, 1001));
        let (n, d) = reduce(1_000_000, 33_333, 65535);
        assert!(n <= 65535 && d <= 65535);
        assert!((n as f64 / d as f64 - 1_000_000.0 / 33_333.0).abs() < 1e-3);
    }
}

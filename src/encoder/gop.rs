//! GOP (Group of Pictures) shape for a session.
//!
//! The shape is derived once at session start from the configuration, the
//! codec's capabilities and the number of reference frames the device can
//! take in each list. The reorder window then uses it to type pictures.

use tracing::info;

use crate::error::{EncodeError, Result};

/// Coding type of a picture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PictureType {
    /// Instantaneous decoder refresh picture.
    #[default]
    Idr,
    /// Intra picture that does not reset the decoder.
    I,
    /// Forward predicted picture.
    P,
    /// Bi-predicted picture.
    B,
}

impl PictureType {
    /// Whether this is an IDR picture.
    pub fn is_idr(&self) -> bool {
        matches!(self, Self::Idr)
    }

    /// Whether this is an intra picture (I or IDR).
    pub fn is_intra(&self) -> bool {
        matches!(self, Self::Idr | Self::I)
    }
}

/// Inputs to [`GopStructure::derive`].
#[derive(Debug, Clone, Copy)]
pub struct GopRequest {
    /// Anchor pictures (I/P) per GOP.
    pub p_per_i: u32,
    pub b_frames: u32,
    /// Desired B pyramid depth.
    pub b_depth: u32,
    pub idr_interval: u32,
    pub closed_gop: bool,
    pub intra_only: bool,
    pub b_pictures: bool,
    pub b_picture_references: bool,
    pub non_idr_key_pictures: bool,
    /// Reference frames the device accepts in L0 and L1.
    pub max_refs: (u32, u32),
}

/// Derived GOP shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GopStructure {
    /// GOP period in pictures.
    pub gop_size: u32,
    pub p_per_i: u32,
    pub b_per_p: u32,
    pub max_b_depth: u32,
    pub closed_gop: bool,
    /// Number of GOPs per IDR period.
    pub gop_per_idr: u32,
    /// Pictures held back before the first output (reorder depth).
    pub output_delay: u32,
    /// Pictures of decode delay introduced by the B pyramid.
    pub decode_delay: u32,
}

impl GopStructure {
    pub fn derive(req: GopRequest) -> Result<Self> {
        let (ref_l0, ref_l1) = req.max_refs;
        let p_per_i = req.p_per_i.max(1);

        let intra_only = req.intra_only || (req.p_per_i <= 1 && req.b_frames == 0);

        let (gop_size, b_per_p, max_b_depth) = if intra_only {
            info!("Using intra pictures only");
            (1, 0, 0)
        } else if ref_l0 < 1 {
            return Err(EncodeError::InvalidConfig(
                "device does not support any reference frames".to_string(),
            ));
        } else if !req.b_pictures || ref_l1 < 1 || req.b_frames < 1 {
            info!("Using intra and P pictures, {} anchors per GOP", p_per_i);
            (p_per_i, 0, 0)
        } else {
            let b_per_p = req.b_frames;
            let max_b_depth = if req.b_picture_references {
                let log2 = 31 - b_per_p.leading_zeros();
                req.b_depth.max(1).min(log2 + 1)
            } else {
                1
            };
            info!(
                "Using intra, P and B pictures: {} anchors per GOP, {} B per P, depth {}",
                p_per_i, b_per_p, max_b_depth
            );
            (p_per_i * (b_per_p + 1), b_per_p, max_b_depth)
        };

        let (closed_gop, gop_per_idr) = if req.non_idr_key_pictures {
            (req.closed_gop, req.idr_interval + 1)
        } else {
            (true, 1)
        };

        Ok(Self {
            gop_size,
            p_per_i: if gop_size == 1 { 1 } else { p_per_i },
            b_per_p,
            max_b_depth,
            closed_gop,
            gop_per_idr,
            output_delay: b_per_p,
            decode_delay: max_b_depth,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> GopRequest {
        GopRequest {
            p_per_i: 5,
            b_frames: 2,
            b_depth: 1,
            idr_interval: 0,
            closed_gop: false,
            intra_only: false,
            b_pictures: true,
            b_picture_references: true,
            non_idr_key_pictures: true,
            max_refs: (2, 1),
        }
    }

    #[test]
    fn test_picture_type_helpers() {
        assert!(PictureType::Idr.is_idr());
        assert!(PictureType::I.is_intra());
        assert!(!PictureType::P.is_intra());
        assert!(!PictureType::B.is_idr());
    }

    #[test]
    fn test_gop_period_counts_anchors() {
        let gop = GopStructure::derive(request()).unwrap();
        assert_eq!(gop.gop_size, 15);
        assert_eq!(gop.b_per_p, 2);
        assert_eq!(gop.max_b_depth, 1);
        assert_eq!(gop.output_delay, 2);
        assert_eq!(gop.decode_delay, 1);
        assert_eq!(gop.gop_per_idr, 1);
        assert!(!gop.closed_gop);
    }

    #[test]
    fn test_pyramid_depth_is_capped() {
        let gop = GopStructure::derive(GopRequest {
            b_frames: 7,
            b_depth: 8,
            ..request()
        })
        .unwrap();
        assert_eq!(gop.max_b_depth, 3);

        let flat = GopStructure::derive(GopRequest {
            b_frames: 7,
            b_depth: 8,
            b_picture_references: false,
            ..request()
        })
        .unwrap();
        assert_eq!(flat.max_b_depth, 1);
    }

    #[test]
    fn test_no_l1_means_no_b() {
        let gop = GopStructure::derive(GopRequest {
            max_refs: (1, 0),
            ..request()
        })
        .unwrap();
        assert_eq!(gop.b_per_p, 0);
        assert_eq!(gop.gop_size, 5);
        assert_eq!(gop.decode_delay, 0);
    }

    #[test]
    fn test_intra_only() {
        let gop = GopStructure::derive(GopRequest {
            intra_only: true,
            max_refs: (0, 0),
            ..request()
        })
        .unwrap();
        assert_eq!(gop.gop_size, 1);
        assert_eq!(gop.b_per_p, 0);
    }

    #[test]
    fn test_no_references_is_an_error() {
        let err = GopStructure::derive(GopRequest {
            max_refs: (0, 0),
            ..request()
        })
        .unwrap_err();
        assert!(matches!(err, EncodeError::InvalidConfig(_)));
    }

    #[test]
    fn test_idr_key_only_codecs_are_closed() {
        let gop = GopStructure::derive(GopRequest {
            non_idr_key_pictures: false,
            idr_interval: 3,
            ..request()
        })
        .unwrap();
        assert!(gop.closed_gop);
        assert_eq!(gop.gop_per_idr, 1);

        let open = GopStructure::derive(GopRequest {
            idr_interval: 3,
            ..request()
        })
        .unwrap();
        assert_eq!(open.gop_per_idr, 4);
    }
}

//! Tile layout in superblocks, following the limits of AV1 `tile_info()`.
//!
//! A uniform layout is preferred since it codes in a handful of bits; when
//! the requested column count cannot be reached by uniform spacing, columns
//! and rows are split evenly and coded explicitly.

use tracing::debug;

use crate::error::{EncodeError, Result};

pub const MAX_TILE_COLS: u32 = 64;
pub const MAX_TILE_ROWS: u32 = 64;
const MAX_TILE_WIDTH: u32 = 4096;
const MAX_TILE_AREA: u32 = 4096 * 2304;

/// Smallest `k` such that `block << k >= target`.
pub fn tile_log2(block: u32, target: u32) -> u32 {
    let mut k = 0;
    while (block << k) < target {
        k += 1;
    }
    k
}

fn div_ceil(a: u32, b: u32) -> u32 {
    a.div_ceil(b.max(1))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileRequest {
    pub width: u32,
    pub height: u32,
    pub use_128x128_superblock: bool,
    /// Requested columns and rows, zero to choose.
    pub cols: u32,
    pub rows: u32,
    /// Device tile limit, zero when unknown.
    pub max_tile_num_minus1: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TileLayout {
    pub sb_cols: u32,
    pub sb_rows: u32,
    pub cols: u32,
    pub rows: u32,
    pub cols_log2: u32,
    pub rows_log2: u32,
    pub min_log2_cols: u32,
    pub max_log2_cols: u32,
    pub min_log2_rows: u32,
    pub max_log2_rows: u32,
    /// Largest tile width in superblocks.
    pub max_width_sb: u32,
    pub max_area_sb: u32,
    pub uniform: bool,
    pub width_in_sbs: Vec<u32>,
    pub height_in_sbs: Vec<u32>,
}

impl TileLayout {
    pub fn tiles(&self) -> u32 {
        self.cols * self.rows
    }

    /// Largest tile height coded for explicit row sizes.
    pub fn max_height_sb(&self) -> u32 {
        let widest = self.width_in_sbs.iter().copied().max().unwrap_or(1).max(1);
        let area = if self.min_log2_tiles() > 0 {
            (self.sb_rows * self.sb_cols) >> (self.min_log2_tiles() + 1)
        } else {
            self.sb_rows * self.sb_cols
        };
        (area / widest).max(1)
    }

    fn min_log2_tiles(&self) -> u32 {
        self.min_log2_cols
            .max(tile_log2(self.max_area_sb, self.sb_rows * self.sb_cols))
    }

    pub fn search(req: &TileRequest) -> Result<Self> {
        if req.cols > MAX_TILE_COLS || req.rows > MAX_TILE_ROWS {
            return Err(EncodeError::InvalidConfig(format!(
                "invalid tile number {}x{}, should be at most {}x{}",
                req.cols, req.rows, MAX_TILE_COLS, MAX_TILE_ROWS
            )));
        }

        let mi_cols = 2 * ((req.width + 7) >> 3);
        let mi_rows = 2 * ((req.height + 7) >> 3);
        let (sb_shift, mi_shift) = if req.use_128x128_superblock { (7, 5) } else { (6, 4) };
        let sb_cols = (mi_cols + (1 << mi_shift) - 1) >> mi_shift;
        let sb_rows = (mi_rows + (1 << mi_shift) - 1) >> mi_shift;

        let max_width_sb = MAX_TILE_WIDTH >> sb_shift;
        let max_area_sb = MAX_TILE_AREA >> (2 * sb_shift);
        let min_log2_cols = tile_log2(max_width_sb, sb_cols);
        let max_log2_cols = tile_log2(1, sb_cols.min(MAX_TILE_COLS));
        let max_log2_rows = tile_log2(1, sb_rows.min(MAX_TILE_ROWS));
        let min_log2_tiles = min_log2_cols.max(tile_log2(max_area_sb, sb_rows * sb_cols));

        let cols = req.cols.clamp(div_ceil(sb_cols, max_width_sb), sb_cols);
        if req.cols != 0 && req.cols != cols {
            return Err(EncodeError::InvalidConfig(format!(
                "invalid tile cols {}, should be in range {}..={}",
                req.cols,
                div_ceil(sb_cols, max_width_sb),
                sb_cols
            )));
        }
        if req.rows > sb_rows {
            return Err(EncodeError::InvalidConfig(format!(
                "invalid tile rows {}, should be at most {}",
                req.rows, sb_rows
            )));
        }

        let cols_log2 = tile_log2(1, cols);
        let tile_width_sb = (sb_cols + (1 << cols_log2) - 1) >> cols_log2;

        let mut layout = TileLayout {
            sb_cols,
            sb_rows,
            cols,
            cols_log2,
            min_log2_cols,
            max_log2_cols,
            max_log2_rows,
            max_width_sb,
            max_area_sb,
            ..Default::default()
        };

        let mut rows = req.rows.max(1);
        let found = loop {
            if rows > sb_rows || rows > MAX_TILE_ROWS {
                break false;
            }
            let rows_log2 = tile_log2(1, rows);
            layout.rows = rows;
            layout.rows_log2 = rows_log2;

            if div_ceil(sb_cols, tile_width_sb) == cols {
                let tile_height_sb = (sb_rows + (1 << rows_log2) - 1) >> rows_log2;
                if div_ceil(sb_rows, tile_height_sb) == rows && tile_height_sb <= max_area_sb / tile_width_sb
                {
                    layout.width_in_sbs = uniform_sizes(sb_cols, tile_width_sb, cols);
                    layout.height_in_sbs = uniform_sizes(sb_rows, tile_height_sb, rows);
                    layout.uniform = true;
                    layout.min_log2_rows = min_log2_tiles.saturating_sub(cols_log2);
                    break true;
                }
            }

            layout.width_in_sbs = even_sizes(sb_cols, cols);
            let max_height_sb = layout.max_height_sb();
            if rows == rows.clamp(div_ceil(sb_rows, max_height_sb), sb_rows) {
                layout.height_in_sbs = even_sizes(sb_rows, rows);
                layout.uniform = false;
                break true;
            }

            if req.rows != 0 {
                return Err(EncodeError::InvalidConfig(format!(
                    "invalid tile rows {}, need at least {}",
                    req.rows,
                    div_ceil(sb_rows, max_height_sb)
                )));
            }
            rows += 1;
        };
        if !found {
            return Err(EncodeError::InvalidConfig(format!(
                "no tile layout with {} columns fits {}x{}",
                cols, req.width, req.height
            )));
        }

        if req.max_tile_num_minus1 > 0 && layout.tiles() - 1 > req.max_tile_num_minus1 as u32 {
            return Err(EncodeError::InvalidConfig(format!(
                "{} tiles exceed the device limit of {}",
                layout.tiles(),
                req.max_tile_num_minus1 as u32 + 1
            )));
        }

        debug!(
            "Tile layout {}x{} ({}) over {}x{} superblocks",
            layout.cols,
            layout.rows,
            if layout.uniform { "uniform" } else { "explicit" },
            sb_cols,
            sb_rows
        );
        Ok(layout)
    }
}

fn uniform_sizes(total: u32, size: u32, count: u32) -> Vec<u32> {
    let mut sizes = vec![size; count as usize];
    if let Some(last) = sizes.last_mut() {
        *last = total - size * (count - 1);
    }
    sizes
}

fn even_sizes(total: u32, count: u32) -> Vec<u32> {
    (0..count)
        .map(|i| (i + 1) * total / count - i * total / count)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn request(width: u32, height: u32, cols: u32, rows: u32) -> TileRequest {
        TileRequest {
            width,
            height,
            use_128x128_superblock: false,
            cols,
            rows,
            max_tile_num_minus1: 0,
        }
    }

    #[test]
    fn test_tile_log2() {
        assert_eq!(tile_log2(1, 1), 0);
        assert_eq!(tile_log2(1, 2), 1);
        assert_eq!(tile_log2(1, 3), 2);
        assert_eq!(tile_log2(64, 128), 1);
        assert_eq!(tile_log2(2304, 510), 0);
    }

    #[test]
    fn test_single_tile_1080p() {
        let layout = TileLayout::search(&request(1920, 1080, 0, 0)).unwrap();
        assert_eq!((layout.sb_cols, layout.sb_rows), (30, 17));
        assert_eq!((layout.cols, layout.rows), (1, 1));
        assert!(layout.uniform);
        assert_eq!(layout.width_in_sbs, vec![30]);
        assert_eq!(layout.height_in_sbs, vec![17]);
        assert_eq!((layout.max_log2_cols, layout.max_log2_rows), (5, 5));
    }

    #[test]
    fn test_uniform_grid() {
        let layout = TileLayout::search(&request(1920, 1080, 2, 2)).unwrap();
        assert!(layout.uniform);
        assert_eq!((layout.cols_log2, layout.rows_log2), (1, 1));
        assert_eq!(layout.width_in_sbs, vec![15, 15]);
        assert_eq!(layout.height_in_sbs, vec![9, 8]);
    }

    #[test]
    fn test_explicit_columns() {
        let layout = TileLayout::search(&request(1920, 1080, 3, 1)).unwrap();
        assert!(!layout.uniform);
        assert_eq!(layout.width_in_sbs, vec![10, 10, 10]);
        assert_eq!(layout.height_in_sbs, vec![17]);
        assert_eq!(layout.cols_log2, 2);
    }

    #[test]
    fn test_wide_frame_needs_two_columns() {
        let layout = TileLayout::search(&request(8192, 1080, 0, 0)).unwrap();
        assert_eq!(layout.sb_cols, 128);
        assert_eq!(layout.cols, 2);
        assert_eq!(layout.min_log2_cols, 1);
        assert!(layout.uniform);
        assert_eq!(layout.width_in_sbs, vec![64, 64]);
    }

    #[test]
    fn test_superblock_128() {
        let mut req = request(1920, 1080, 0, 0);
        req.use_128x128_superblock = true;
        let layout = TileLayout::search(&req).unwrap();
        assert_eq!((layout.sb_cols, layout.sb_rows), (15, 9));
        assert_eq!(layout.max_width_sb, 32);
    }

    #[test]
    fn test_invalid_requests() {
        assert!(TileLayout::search(&request(1920, 1080, 65, 1)).is_err());
        assert!(TileLayout::search(&request(1920, 1080, 40, 1)).is_err());
        assert!(TileLayout::search(&request(1920, 1080, 1, 18)).is_err());
    }

    #[test]
    fn test_device_tile_limit() {
        let mut req = request(1920, 1080, 4, 2);
        assert_eq!(TileLayout::search(&req).unwrap().tiles(), 8);
        req.max_tile_num_minus1 = 3;
        assert!(TileLayout::search(&req).is_err());
    }

    proptest! {
        #[test]
        fn test_sizes_cover_frame(width in 16u32..=4096, height in 16u32..=2304, cols in 0u32..=8) {
            let req = request(width, height, 0, 0);
            let sb_cols = TileLayout::search(&req).unwrap().sb_cols;
            let req = TileRequest { cols: cols.min(sb_cols), ..req };
            let layout = TileLayout::search(&req).unwrap();
            prop_assert_eq!(layout.width_in_sbs.iter().sum::<u32>(), layout.sb_cols);
            prop_assert_eq!(layout.height_in_sbs.iter().sum::<u32>(), layout.sb_rows);
            prop_assert_eq!(layout.width_in_sbs.len() as u32, layout.cols);
            prop_assert_eq!(layout.height_in_sbs.len() as u32, layout.rows);
            prop_assert!(layout.cols <= layout.sb_cols && layout.rows <= layout.sb_rows);
            prop_assert!(layout.width_in_sbs.iter().all(|&w| w >= 1 && w <= layout.max_width_sb));
        }
    }
}

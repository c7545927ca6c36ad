//! Slice and tile partitioning of a picture.
//!
//! Session setup fixes a [`SliceLayout`] from the requested slice/tile counts
//! and what the device can do. Every picture then gets its slices from the
//! layout, either as runs of block rows or as one slice per tile.

use tracing::{debug, info, warn};

use super::device::{DeviceAttributes, SliceStructure};
use crate::error::{EncodeError, Result};

/// One bitstream partition of a picture.
#[derive(Debug, Clone, Default)]
pub struct Slice<P> {
    pub index: usize,
    pub row_start: u32,
    pub row_size: u32,
    pub block_start: u32,
    pub block_size: u32,
    /// Codec slice parameters.
    pub params: P,
}

/// Uniform tile grid in slice blocks.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TileGrid {
    pub cols: u32,
    pub rows: u32,
    pub col_width: Vec<u32>,
    pub row_height: Vec<u32>,
    /// Column boundaries, `cols + 1` entries.
    pub col_bd: Vec<u32>,
    /// Row boundaries, `rows + 1` entries.
    pub row_bd: Vec<u32>,
}

impl TileGrid {
    fn uniform(cols: u32, rows: u32, block_cols: u32, block_rows: u32) -> Self {
        let split = |n: u32, total: u32| -> (Vec<u32>, Vec<u32>) {
            let mut sizes = Vec::with_capacity(n as usize);
            let mut bounds = vec![0];
            for i in 0..n {
                let size = (i + 1) * total / n - i * total / n;
                sizes.push(size);
                bounds.push(bounds[i as usize] + size);
            }
            (sizes, bounds)
        };
        let (col_width, col_bd) = split(cols, block_cols);
        let (row_height, row_bd) = split(rows, block_rows);
        Self {
            cols,
            rows,
            col_width,
            row_height,
            col_bd,
            row_bd,
        }
    }
}

/// Slice partitioning request for one session.
#[derive(Debug, Clone, Copy)]
pub struct SliceRequest {
    pub width: u32,
    pub height: u32,
    /// Slice block size, zero for codecs without slice control.
    pub block_width: u32,
    pub block_height: u32,
    pub slice_control: bool,
    pub slices: u32,
    pub tiles: Option<(u32, u32)>,
}

/// Fixed slice layout of a session.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SliceLayout {
    pub block_width: u32,
    pub block_height: u32,
    pub block_rows: u32,
    pub block_cols: u32,
    pub nb_slices: usize,
    /// Rows per slice before rounding.
    pub slice_size: u32,
    pub tiles: Option<TileGrid>,
}

impl SliceLayout {
    pub fn new(req: &SliceRequest, attrs: &DeviceAttributes) -> Result<Self> {
        if !req.slice_control {
            if req.slices > 1 {
                warn!("Multiple slices were requested but this codec does not support controlling slices");
            }
            return Ok(Self {
                nb_slices: 1,
                ..Self::default()
            });
        }

        if req.block_width == 0 || req.block_height == 0 {
            return Err(EncodeError::Invariant(
                "slice block size must be set".to_string(),
            ));
        }
        let block_rows = req.height.div_ceil(req.block_height);
        let block_cols = req.width.div_ceil(req.block_width);
        let mut layout = Self {
            block_width: req.block_width,
            block_height: req.block_height,
            block_rows,
            block_cols,
            nb_slices: 1,
            slice_size: block_rows,
            tiles: None,
        };

        let tiles = req.tiles.filter(|&(cols, rows)| cols > 0 && rows > 0);
        if req.slices <= 1 && tiles.is_none() {
            return Ok(layout);
        }

        let (Some(max_slices), Some(structure)) = (attrs.max_slices, attrs.slice_structure)
        else {
            return Err(EncodeError::InvalidConfig(
                "driver does not support encoding pictures as multiple slices".to_string(),
            ));
        };

        if let Some((cols, rows)) = tiles {
            if !attrs.tile_support {
                return Err(EncodeError::InvalidConfig(
                    "driver does not support encoding pictures as multiple tiles".to_string(),
                ));
            }
            layout.init_tiles(cols, rows, req.slices, structure)?;
        } else {
            layout.init_rows(req.slices, structure)?;
        }

        if layout.nb_slices > req.slices as usize {
            warn!(
                "Slice count rounded up to {} (from {}) due to driver constraints on slice structure",
                layout.nb_slices, req.slices
            );
        }
        if layout.nb_slices > max_slices as usize {
            return Err(EncodeError::InvalidConfig(format!(
                "driver does not support encoding with {} slices (max {})",
                layout.nb_slices, max_slices
            )));
        }
        info!("Encoding pictures with {} slices", layout.nb_slices);
        Ok(layout)
    }

    fn init_rows(&mut self, slices: u32, structure: SliceStructure) -> Result<()> {
        let requested = if slices > self.block_rows {
            warn!(
                "Not enough rows to use configured number of slices ({} < {}); using maximum",
                self.block_rows, slices
            );
            self.block_rows
        } else {
            slices
        };

        if structure.intersects(SliceStructure::ARBITRARY_ROWS | SliceStructure::ARBITRARY_MACROBLOCKS) {
            self.nb_slices = requested as usize;
            self.slice_size = self.block_rows / requested;
        } else if structure.contains(SliceStructure::POWER_OF_TWO_ROWS) {
            let mut k = 1;
            while 2 * k * (requested - 1) + 1 < self.block_rows {
                k *= 2;
            }
            self.nb_slices = self.block_rows.div_ceil(k) as usize;
            self.slice_size = k;
        } else if structure.contains(SliceStructure::EQUAL_ROWS) {
            self.nb_slices = self.block_rows as usize;
            self.slice_size = 1;
        } else {
            return Err(EncodeError::InvalidConfig(format!(
                "driver does not support any usable slice structure modes ({:#x})",
                structure.bits()
            )));
        }
        Ok(())
    }

    fn init_tiles(&mut self, cols: u32, rows: u32, slices: u32, structure: SliceStructure) -> Result<()> {
        let usable = structure.contains(SliceStructure::ARBITRARY_MACROBLOCKS)
            || (structure.contains(SliceStructure::ARBITRARY_ROWS) && cols == 1);
        if !usable {
            return Err(EncodeError::InvalidConfig(format!(
                "supported slice structure ({:#x}) doesn't work for the current tile requirement",
                structure.bits()
            )));
        }

        let mut cols = cols;
        let mut rows = rows;
        if rows > self.block_rows || cols > self.block_cols {
            rows = rows.min(self.block_rows);
            cols = cols.min(self.block_cols);
            warn!(
                "Not enough block rows/cols ({} x {}) for configured number of tiles; using allowed maximum ({} x {})",
                self.block_rows, self.block_cols, rows, cols
            );
        }

        let tiles = cols * rows;
        if slices != tiles {
            warn!(
                "The number of requested slices mismatches the configured number of tiles ({} != {}); using one slice per tile",
                slices, tiles
            );
        }
        self.nb_slices = tiles as usize;
        self.tiles = Some(TileGrid::uniform(cols, rows, self.block_cols, self.block_rows));
        info!("Encoding pictures with {} x {} tiles", rows, cols);
        Ok(())
    }

    /// Build `nb_slices` slices for one picture.
    pub fn make_slices<P: Default>(&self, nb_slices: usize) -> Result<Vec<Slice<P>>> {
        let mut slices: Vec<Slice<P>> = (0..nb_slices)
            .map(|index| Slice {
                index,
                ..Slice::default()
            })
            .collect();
        if nb_slices == 0 {
            return Ok(slices);
        }

        match &self.tiles {
            Some(grid) => {
                if nb_slices != (grid.cols * grid.rows) as usize {
                    return Err(EncodeError::Invariant(format!(
                        "{} slices for a {} x {} tile grid",
                        nb_slices, grid.cols, grid.rows
                    )));
                }
                for i in 0..grid.cols as usize {
                    for j in 0..grid.rows as usize {
                        let index = j * grid.cols as usize + i;
                        let slice = &mut slices[index];
                        slice.index = index;
                        slice.block_start = grid.col_bd[i] + grid.row_bd[j] * self.block_cols;
                        slice.block_size = grid.row_height[j] * grid.col_width[i];
                        debug!(
                            "Slice {}: ({}, {}) start at {}, {} blocks",
                            index, grid.col_bd[i], grid.row_bd[j], slice.block_start, slice.block_size
                        );
                    }
                }
            }
            None => self.fill_rows(&mut slices)?,
        }
        Ok(slices)
    }

    fn fill_rows<P>(&self, slices: &mut [Slice<P>]) -> Result<()> {
        let n = slices.len();
        for slice in slices.iter_mut() {
            slice.row_size = self.slice_size;
        }

        let rounding = self.block_rows as i64 - (n as i64) * self.slice_size as i64;
        if rounding > 0 {
            if rounding >= n as i64 {
                return Err(EncodeError::Invariant(format!(
                    "slice rounding {rounding} exceeds slice count {n}"
                )));
            }
            let rounding = rounding as usize;
            if rounding <= 2 {
                for slice in slices.iter_mut().take(rounding) {
                    slice.row_size += 1;
                }
            } else {
                for i in 0..rounding.div_ceil(2) {
                    slices[n - i - 1].row_size += 1;
                }
                for slice in slices.iter_mut().take(rounding / 2) {
                    slice.row_size += 1;
                }
            }
        } else if rounding < 0 {
            let last = &mut slices[n - 1];
            last.row_size = last.row_size.checked_sub((-rounding) as u32).ok_or_else(|| {
                EncodeError::Invariant("slice rounding exceeds the last slice".to_string())
            })?;
        }

        for i in 0..n {
            let (row_start, block_start) = if i == 0 {
                (0, 0)
            } else {
                let prev = &slices[i - 1];
                (prev.row_start + prev.row_size, prev.block_start + prev.block_size)
            };
            let slice = &mut slices[i];
            slice.row_start = row_start;
            slice.block_start = block_start;
            slice.block_size = slice.row_size * self.block_cols;
            debug!(
                "Slice {}: rows {}+{}, blocks {}+{}",
                i, slice.row_start, slice.row_size, slice.block_start, slice.block_size
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(slices: u32) -> SliceRequest {
        SliceRequest {
            width: 1920,
            height: 1080,
            block_width: 16,
            block_height: 16,
            slice_control: true,
            slices,
            tiles: None,
        }
    }

    fn attrs(structure: SliceStructure) -> DeviceAttributes {
        DeviceAttributes {
            max_slices: Some(272),
            slice_structure: Some(structure),
            tile_support: true,
            ..Default::default()
        }
    }

    #[test]
    fn test_single_slice_default() {
        let layout = SliceLayout::new(&request(1), &DeviceAttributes::default()).unwrap();
        assert_eq!(layout.block_rows, 68);
        assert_eq!(layout.block_cols, 120);
        assert_eq!(layout.nb_slices, 1);
        let slices: Vec<Slice<()>> = layout.make_slices(1).unwrap();
        assert_eq!(slices[0].row_size, 68);
        assert_eq!(slices[0].block_size, 68 * 120);
    }

    #[test]
    fn test_arbitrary_rows_rounding() {
        let layout = SliceLayout::new(&request(5), &attrs(SliceStructure::ARBITRARY_ROWS)).unwrap();
        assert_eq!(layout.nb_slices, 5);
        assert_eq!(layout.slice_size, 13);
        let slices: Vec<Slice<()>> = layout.make_slices(5).unwrap();
        // 68 = 5 * 13 + 3: two extra rows at the bottom, one at the top.
        let rows: Vec<u32> = slices.iter().map(|s| s.row_size).collect();
        assert_eq!(rows, vec![14, 13, 13, 14, 14]);
        assert_eq!(rows.iter().sum::<u32>(), 68);
        assert_eq!(slices[4].row_start, 54);
        assert_eq!(slices[4].block_start, 54 * 120);
    }

    #[test]
    fn test_power_of_two_rows() {
        let layout =
            SliceLayout::new(&request(4), &attrs(SliceStructure::POWER_OF_TWO_ROWS)).unwrap();
        // Smallest k with 2k(n-1)+1 >= 68 is 16.
        assert_eq!(layout.slice_size, 16);
        assert_eq!(layout.nb_slices, 5);
        let slices: Vec<Slice<()>> = layout.make_slices(5).unwrap();
        let rows: Vec<u32> = slices.iter().map(|s| s.row_size).collect();
        assert_eq!(rows, vec![16, 16, 16, 16, 4]);
    }

    #[test]
    fn test_equal_rows() {
        let layout = SliceLayout::new(&request(2), &attrs(SliceStructure::EQUAL_ROWS)).unwrap();
        assert_eq!(layout.nb_slices, 68);

        let limited = DeviceAttributes {
            max_slices: Some(32),
            ..attrs(SliceStructure::EQUAL_ROWS)
        };
        let err = SliceLayout::new(&request(2), &limited).unwrap_err();
        assert!(matches!(err, EncodeError::InvalidConfig(_)));

        let small = SliceRequest {
            height: 64,
            ..request(2)
        };
        let layout = SliceLayout::new(&small, &attrs(SliceStructure::EQUAL_ROWS)).unwrap();
        assert_eq!(layout.nb_slices, 4);
        assert_eq!(layout.slice_size, 1);
    }

    #[test]
    fn test_too_many_slices_clamped() {
        let small = SliceRequest {
            height: 48,
            ..request(8)
        };
        let layout = SliceLayout::new(&small, &attrs(SliceStructure::ARBITRARY_ROWS)).unwrap();
        assert_eq!(layout.nb_slices, 3);
    }

    #[test]
    fn test_no_slice_support() {
        let err = SliceLayout::new(&request(4), &DeviceAttributes::default()).unwrap_err();
        assert!(matches!(err, EncodeError::InvalidConfig(_)));
    }

    #[test]
    fn test_tiles() {
        let req = SliceRequest {
            width: 256,
            height: 128,
            block_width: 32,
            block_height: 32,
            tiles: Some((3, 2)),
            ..request(0)
        };
        let layout =
            SliceLayout::new(&req, &attrs(SliceStructure::ARBITRARY_MACROBLOCKS)).unwrap();
        let grid = layout.tiles.clone().unwrap();
        assert_eq!(grid.col_width, vec![2, 3, 3]);
        assert_eq!(grid.col_bd, vec![0, 2, 5, 8]);
        assert_eq!(grid.row_height, vec![2, 2]);
        assert_eq!(layout.nb_slices, 6);

        let slices: Vec<Slice<()>> = layout.make_slices(6).unwrap();
        assert_eq!(slices[4].block_start, 2 + 2 * 8);
        assert_eq!(slices[4].block_size, 6);
        let total: u32 = slices.iter().map(|s| s.block_size).sum();
        assert_eq!(total, 8 * 4);
    }

    #[test]
    fn test_no_slice_control() {
        let req = SliceRequest {
            slice_control: false,
            ..request(4)
        };
        let layout = SliceLayout::new(&req, &DeviceAttributes::default()).unwrap();
        assert_eq!(layout.nb_slices, 1);
        let slices: Vec<Slice<u8>> = layout.make_slices(2).unwrap();
        assert_eq!(slices.len(), 2);
        assert_eq!(slices[1].index, 1);
    }
}

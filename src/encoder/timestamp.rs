//! Decode timestamp derivation under picture reordering.

/// Ring of input presentation timestamps used to derive DTS values.
///
/// With reordering, the DTS of the n-th picture in encode order is the PTS
/// of the picture `decode_delay` places earlier in display order. The first
/// `decode_delay` pictures are shifted back by the PTS span of that delay.
#[derive(Debug, Clone)]
pub struct TimestampRing {
    ring: Vec<i64>,
    output_delay: u32,
    decode_delay: u32,
    first_pts: i64,
    dts_pts_diff: i64,
    last_pts: Option<i64>,
}

impl TimestampRing {
    pub fn new(output_delay: u32, decode_delay: u32, async_depth: u32) -> Self {
        let size = (3 * output_delay + async_depth).max(1) as usize;
        Self {
            ring: vec![0; size],
            output_delay,
            decode_delay,
            first_pts: 0,
            dts_pts_diff: 0,
            last_pts: None,
        }
    }

    /// Record the PTS of the input picture with the given display order.
    pub fn push(&mut self, input_order: i64, pts: i64) {
        if input_order == 0 {
            self.first_pts = pts;
        }
        if input_order == self.decode_delay as i64 {
            self.dts_pts_diff = pts - self.first_pts;
        }
        if self.output_delay > 0 {
            let slot = input_order.rem_euclid(self.ring.len() as i64) as usize;
            self.ring[slot] = pts;
        }
        self.last_pts = Some(pts);
    }

    /// End of stream before the initial decode delay elapsed: take the delay
    /// from whatever input we saw.
    pub fn finish(&mut self, input_order: i64) {
        if input_order < self.decode_delay as i64 {
            if let Some(last) = self.last_pts {
                self.dts_pts_diff = last - self.first_pts;
            }
        }
    }

    /// DTS for the picture with the given encode order and PTS.
    pub fn dts(&self, encode_order: i64, pts: i64) -> i64 {
        if self.output_delay == 0 {
            return pts;
        }
        let decode_delay = self.decode_delay as i64;
        if encode_order < decode_delay {
            let slot = encode_order.rem_euclid(self.ring.len() as i64) as usize;
            self.ring[slot]
                .checked_sub(self.dts_pts_diff)
                .unwrap_or(i64::MIN)
        } else {
            let slot = (encode_order - decode_delay).rem_euclid(self.ring.len() as i64) as usize;
            self.ring[slot]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_delay_passes_pts_through() {
        let mut ring = TimestampRing::new(0, 0, 2);
        ring.push(0, 100);
        assert_eq!(ring.dts(0, 100), 100);
        assert_eq!(ring.dts(5, 42), 42);
    }

    #[test]
    fn test_b_frame_reordering_is_monotonic() {
        // 2 B per P, depth 1, pts step 10.
        let mut ring = TimestampRing::new(2, 1, 2);
        for d in 0..7 {
            ring.push(d, d * 10);
        }
        let encode = [0, 3, 1, 2, 6, 4, 5];
        let dts: Vec<i64> = encode
            .iter()
            .enumerate()
            .map(|(eo, &d)| ring.dts(eo as i64, d * 10))
            .collect();
        assert_eq!(dts[0], -10);
        assert!(dts.windows(2).all(|w| w[0] <= w[1]), "{dts:?}");
        for (eo, &d) in encode.iter().enumerate() {
            assert!(dts[eo] <= d * 10);
        }
    }

    #[test]
    fn test_early_end_of_stream() {
        let mut ring = TimestampRing::new(2, 2, 0);
        ring.push(0, 0);
        ring.finish(1);
        assert_eq!(ring.dts(0, 0), 0);
    }

    #[test]
    fn test_dts_saturates() {
        let mut ring = TimestampRing::new(1, 1, 0);
        ring.push(0, i64::MIN);
        ring.push(1, i64::MIN + 5);
        assert_eq!(ring.dts(0, i64::MIN), i64::MIN);
    }
}

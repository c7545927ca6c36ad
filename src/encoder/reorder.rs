//! Picture reordering and reference bookkeeping.
//!
//! Pictures arrive in display order and are kept in a window until they are
//! fully retired. For every picture the window decides its coding type and
//! its references, and it hands pictures out in encode order.
//!
//! With two B pictures between anchors and a flat pyramid:
//! - Display order: IDR(0) B(1) B(2) P(3) B(4) B(5) P(6)
//! - Encode order:  IDR(0) P(3) B(1) B(2) P(6) B(4) B(5)
//!
//! Pictures live in a generational arena and refer to each other by
//! [`PictureId`]. A picture stays alive while other pictures count it as a
//! reference at either of two levels: level 0 counts direct use (reference
//! lists, DPB, previous picture) and is dropped once the user is complete;
//! level 1 additionally keeps pictures alive for as long as their users
//! are still tracked.

use std::collections::VecDeque;

use tracing::debug;

use super::device::{OutputBufferId, SurfaceId};
use super::gop::{GopStructure, PictureType};
use super::HdrMetadata;
use crate::error::{EncodeError, Result};

/// Maximum references per list.
pub const MAX_PICTURE_REFERENCES: usize = 2;

/// Maximum number of pictures a picture may keep in its DPB.
pub const MAX_DPB_SIZE: usize = 16;

/// Handle to a picture in the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PictureId {
    index: u32,
    generation: u32,
}

/// One unit of encode work.
#[derive(Debug)]
pub struct Picture<T> {
    pub display_order: i64,
    pub encode_order: i64,
    pub pts: i64,
    pub force_idr: bool,
    pub picture_type: PictureType,
    /// Depth in the B pyramid (0 for anchors).
    pub b_depth: u32,
    pub is_reference: bool,
    /// Issued while a picture displayed before it was still pending, so it
    /// must be shown later by a repeat header.
    pub hidden: bool,
    pub encode_issued: bool,
    pub encode_complete: bool,
    pub input_surface: SurfaceId,
    pub recon_surface: Option<SurfaceId>,
    pub output_buffer: Option<OutputBufferId>,
    /// L0 and L1 reference lists.
    pub refs: [Vec<PictureId>; 2],
    /// Pictures the decoder must still hold when this one is decoded.
    pub dpb: Vec<PictureId>,
    /// Previous picture in encode order on the top layer.
    pub prev: Option<PictureId>,
    ref_count: [u32; 2],
    ref_removed: [bool; 2],
    /// Slice count override; zero means the session default.
    pub nb_slices: usize,
    pub hdr: Option<HdrMetadata>,
    /// Bytes appended after the coded data, written by the codec.
    pub tail_data: Vec<u8>,
    /// Codec private state.
    pub codec: T,
}

impl<T: Default> Picture<T> {
    pub fn new(input_surface: SurfaceId, pts: i64) -> Self {
        Self {
            display_order: 0,
            encode_order: 0,
            pts,
            force_idr: false,
            picture_type: PictureType::Idr,
            b_depth: 0,
            is_reference: false,
            hidden: false,
            encode_issued: false,
            encode_complete: false,
            input_surface,
            recon_surface: None,
            output_buffer: None,
            refs: [Vec::new(), Vec::new()],
            dpb: Vec::new(),
            prev: None,
            ref_count: [0, 0],
            ref_removed: [false, false],
            nb_slices: 0,
            hdr: None,
            tail_data: Vec::new(),
            codec: T::default(),
        }
    }
}

impl<T> Picture<T> {
    /// Both reference lists, L0 first.
    pub fn all_refs(&self) -> impl Iterator<Item = PictureId> + '_ {
        self.refs[0].iter().chain(self.refs[1].iter()).copied()
    }

    pub fn nb_refs(&self) -> usize {
        self.refs[0].len() + self.refs[1].len()
    }

    /// Last entry of a list, which is the nearest reference in that direction.
    pub fn nearest_ref(&self, list: usize) -> Option<PictureId> {
        self.refs[list].last().copied()
    }

    pub fn ref_count(&self, level: usize) -> u32 {
        self.ref_count[level]
    }
}

#[derive(Debug)]
struct Slot<T> {
    generation: u32,
    picture: Option<Picture<T>>,
}

/// Generational arena owning every live picture.
#[derive(Debug)]
pub struct PictureArena<T> {
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
    live: usize,
}

impl<T> Default for PictureArena<T> {
    fn default() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            live: 0,
        }
    }
}

impl<T> PictureArena<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, picture: Picture<T>) -> PictureId {
        self.live += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.generation += 1;
            slot.picture = Some(picture);
            PictureId {
                index,
                generation: slot.generation,
            }
        } else {
            self.slots.push(Slot {
                generation: 0,
                picture: Some(picture),
            });
            PictureId {
                index: (self.slots.len() - 1) as u32,
                generation: 0,
            }
        }
    }

    pub fn remove(&mut self, id: PictureId) -> Option<Picture<T>> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        let picture = slot.picture.take()?;
        self.free.push(id.index);
        self.live -= 1;
        Some(picture)
    }

    pub fn get(&self, id: PictureId) -> Option<&Picture<T>> {
        let slot = self.slots.get(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.picture.as_ref()
    }

    pub fn get_mut(&mut self, id: PictureId) -> Option<&mut Picture<T>> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.picture.as_mut()
    }

    /// Like [`get`](Self::get) but a stale id is an invariant violation.
    pub fn picture(&self, id: PictureId) -> Result<&Picture<T>> {
        self.get(id)
            .ok_or_else(|| EncodeError::Invariant(format!("stale picture id {id:?}")))
    }

    pub fn picture_mut(&mut self, id: PictureId) -> Result<&mut Picture<T>> {
        self.get_mut(id)
            .ok_or_else(|| EncodeError::Invariant(format!("stale picture id {id:?}")))
    }

    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }
}

/// Outcome of [`ReorderWindow::pick_next`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pick {
    /// This picture has its type and references and can be issued.
    Ready(PictureId),
    /// Nothing can be issued until more input arrives or earlier
    /// pictures complete.
    NeedInput,
    /// End of stream reached and every picture has been encoded.
    Drained,
}

/// Display-order window of in-flight pictures.
#[derive(Debug)]
pub struct ReorderWindow<T> {
    pictures: PictureArena<T>,
    order: VecDeque<PictureId>,
    input_order: i64,
    gop_counter: u32,
    idr_counter: u32,
    next_prev: Option<PictureId>,
    end_of_stream: bool,
}

impl<T> Default for ReorderWindow<T> {
    fn default() -> Self {
        Self {
            pictures: PictureArena::new(),
            order: VecDeque::new(),
            input_order: 0,
            gop_counter: 0,
            idr_counter: 0,
            next_prev: None,
            end_of_stream: false,
        }
    }
}

impl<T> ReorderWindow<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pictures(&self) -> &PictureArena<T> {
        &self.pictures
    }

    pub fn pictures_mut(&mut self) -> &mut PictureArena<T> {
        &mut self.pictures
    }

    pub fn input_order(&self) -> i64 {
        self.input_order
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Ids in display order.
    pub fn iter(&self) -> impl Iterator<Item = PictureId> + '_ {
        self.order.iter().copied()
    }

    /// Most recently added picture.
    pub fn last(&self) -> Option<PictureId> {
        self.order.back().copied()
    }

    pub fn end_of_stream(&self) -> bool {
        self.end_of_stream
    }

    pub fn set_end_of_stream(&mut self) {
        self.end_of_stream = true;
    }

    /// Add a picture at the end of the window. Its display order is the
    /// running input counter.
    pub fn push(&mut self, mut picture: Picture<T>) -> PictureId {
        picture.display_order = self.input_order;
        self.input_order += 1;
        let id = self.pictures.insert(picture);
        self.order.push_back(id);
        id
    }

    fn at(&self, pos: usize) -> Result<PictureId> {
        self.order
            .get(pos)
            .copied()
            .ok_or_else(|| EncodeError::Invariant(format!("window position {pos} out of range")))
    }

    fn add_ref(
        &mut self,
        pic: PictureId,
        target: PictureId,
        is_ref: bool,
        in_dpb: bool,
        prev: bool,
    ) -> Result<()> {
        let target_display = self.pictures.picture(target)?.display_order;
        let picture = self.pictures.picture_mut(pic)?;
        let mut refs = 0;

        if is_ref {
            if pic == target {
                return Err(EncodeError::Invariant(
                    "picture cannot reference itself".to_string(),
                ));
            }
            let list = if target_display < picture.display_order { 0 } else { 1 };
            if picture.refs[list].len() >= MAX_PICTURE_REFERENCES {
                return Err(EncodeError::Invariant(format!(
                    "too many references in list {list}"
                )));
            }
            picture.refs[list].push(target);
            refs += 1;
        }

        if in_dpb {
            if picture.dpb.len() >= MAX_DPB_SIZE {
                return Err(EncodeError::Invariant("DPB overflow".to_string()));
            }
            picture.dpb.push(target);
            refs += 1;
        }

        if prev {
            if picture.prev.is_some() {
                return Err(EncodeError::Invariant(
                    "previous picture already set".to_string(),
                ));
            }
            picture.prev = Some(target);
            refs += 1;
        }

        let target = self.pictures.picture_mut(target)?;
        target.ref_count[0] += refs;
        target.ref_count[1] += refs;
        Ok(())
    }

    fn remove_refs(&mut self, id: PictureId, level: usize) -> Result<()> {
        let picture = self.pictures.picture(id)?;
        if picture.ref_removed[level] {
            return Ok(());
        }
        if picture.prev.is_none() && picture.picture_type != PictureType::Idr {
            return Err(EncodeError::Invariant(format!(
                "{:?} picture {} has no previous picture",
                picture.picture_type, picture.display_order
            )));
        }

        let targets: Vec<PictureId> = picture
            .all_refs()
            .chain(picture.dpb.iter().copied())
            .chain(picture.prev)
            .collect();
        for target in targets {
            let target = self.pictures.picture_mut(target)?;
            target.ref_count[level] = target.ref_count[level].checked_sub(1).ok_or_else(|| {
                EncodeError::Invariant(format!("negative reference count at level {level}"))
            })?;
        }

        self.pictures.picture_mut(id)?.ref_removed[level] = true;
        Ok(())
    }

    /// Pictures of the chain reached by following the first L1 reference.
    fn l1_chain(&self, from: PictureId) -> Result<Vec<PictureId>> {
        let mut chain = Vec::new();
        let mut next = self.pictures.picture(from)?.refs[1].first().copied();
        while let Some(id) = next {
            chain.push(id);
            next = self.pictures.picture(id)?.refs[1].first().copied();
        }
        Ok(chain)
    }

    fn set_b_pictures(
        &mut self,
        start_pos: usize,
        end_pos: usize,
        prev: PictureId,
        depth: u32,
        max_b_depth: u32,
    ) -> Result<PictureId> {
        if end_pos <= start_pos + 1 {
            return Err(EncodeError::Invariant(
                "empty B-picture range".to_string(),
            ));
        }
        let start = self.at(start_pos)?;
        let end = self.at(end_pos)?;
        let chain = self.l1_chain(end)?;

        if depth == max_b_depth || start_pos + 2 == end_pos {
            // Everything left goes on this layer as non-reference pictures.
            for pos in start_pos + 1..end_pos {
                let pic = self.at(pos)?;
                {
                    let picture = self.pictures.picture_mut(pic)?;
                    picture.picture_type = PictureType::B;
                    picture.b_depth = depth;
                }
                self.add_ref(pic, start, true, true, false)?;
                self.add_ref(pic, end, true, true, false)?;
                self.add_ref(pic, prev, false, false, true)?;
                for &r in &chain {
                    self.add_ref(pic, r, false, true, false)?;
                }
            }
            return Ok(prev);
        }

        // Split at the midpoint with a referenced B picture.
        let len = end_pos - start_pos - 1;
        let mut pos = start_pos + 1;
        let mut i = 1;
        while 2 * i < len {
            pos += 1;
            i += 1;
        }
        let pic = self.at(pos)?;
        {
            let picture = self.pictures.picture_mut(pic)?;
            picture.picture_type = PictureType::B;
            picture.b_depth = depth;
            picture.is_reference = true;
        }
        self.add_ref(pic, pic, false, true, false)?;
        self.add_ref(pic, start, true, true, false)?;
        self.add_ref(pic, end, true, true, false)?;
        self.add_ref(pic, prev, false, false, true)?;
        for &r in &chain {
            self.add_ref(pic, r, false, true, false)?;
        }

        let next = if i > 1 {
            self.set_b_pictures(start_pos, pos, pic, depth + 1, max_b_depth)?
        } else {
            pic
        };
        self.set_b_pictures(pos, end_pos, next, depth + 1, max_b_depth)
    }

    /// Choose the next picture to issue, assigning its type and references.
    /// The chosen picture is marked hidden when some picture displayed
    /// before it has not been issued yet.
    pub fn pick_next(&mut self, gop: &GopStructure) -> Result<Pick> {
        let pick = self.choose_next(gop)?;
        if let Pick::Ready(id) = pick {
            let display_order = self.pictures.picture(id)?.display_order;
            let mut hidden = false;
            for &other in &self.order {
                let picture = self.pictures.picture(other)?;
                if picture.display_order < display_order && !picture.encode_issued {
                    hidden = true;
                    break;
                }
            }
            self.pictures.picture_mut(id)?.hidden = hidden;
        }
        Ok(pick)
    }

    fn choose_next(&mut self, gop: &GopStructure) -> Result<Pick> {
        if self.order.is_empty() {
            return Ok(if self.end_of_stream {
                Pick::Drained
            } else {
                Pick::NeedInput
            });
        }

        // A queued B picture whose references have all been issued goes first.
        for &id in &self.order {
            let picture = self.pictures.picture(id)?;
            if picture.encode_issued || picture.picture_type != PictureType::B {
                continue;
            }
            let mut ready = true;
            for r in picture.all_refs() {
                if !self.pictures.picture(r)?.encode_issued {
                    ready = false;
                    break;
                }
            }
            if ready {
                debug!("Pick B-picture at depth {} to encode next", picture.b_depth);
                return Ok(Pick::Ready(id));
            }
        }

        // Find the b_per_p-th available picture to become the next anchor.
        let mut start: Option<usize> = None;
        let mut b_counter: i64 = 0;
        let closed_gop_end = (gop.closed_gop || self.idr_counter == gop.gop_per_idr) as i64;
        let gop_size = gop.gop_size as i64;
        let gop_counter = self.gop_counter as i64;
        let mut picked: Option<usize> = None;

        for pos in 0..self.order.len() {
            let picture = self.pictures.picture(self.order[pos])?;
            if picture.encode_issued {
                start = Some(pos);
                continue;
            }
            if picture.force_idr
                || b_counter == gop.b_per_p as i64
                || gop_counter + b_counter + closed_gop_end >= gop_size
            {
                picked = Some(pos);
                break;
            }
            if let Some(&next) = self.order.get(pos + 1) {
                if self.pictures.picture(next)?.force_idr {
                    picked = Some(pos);
                    break;
                }
            }
            b_counter += 1;
        }

        if picked.is_none() && self.end_of_stream {
            // The last picture must be on the top layer.
            b_counter -= 1;
            let last = self.order.len().checked_sub(1).ok_or_else(|| {
                EncodeError::Invariant("end of stream with empty window".to_string())
            })?;
            let picture = self.pictures.picture(self.order[last])?;
            if picture.encode_complete {
                return Ok(Pick::Drained);
            } else if picture.encode_issued {
                return Ok(Pick::NeedInput);
            }
            picked = Some(last);
        }

        let Some(pos) = picked else {
            debug!("Pick nothing to encode next: need more input for reference pictures");
            return Ok(Pick::NeedInput);
        };
        if self.input_order <= gop.decode_delay as i64 && !self.end_of_stream {
            debug!("Pick nothing to encode next: need more input for timestamps");
            return Ok(Pick::NeedInput);
        }

        let id = self.order[pos];
        let force_idr = self.pictures.picture(id)?.force_idr;
        let picture_type = if force_idr {
            debug!("Pick forced IDR-picture to encode next");
            self.idr_counter = 1;
            self.gop_counter = 1;
            PictureType::Idr
        } else if gop_counter + b_counter >= gop_size {
            self.gop_counter = 1;
            if self.idr_counter == gop.gop_per_idr {
                debug!("Pick new-GOP IDR-picture to encode next");
                self.idr_counter = 1;
                PictureType::Idr
            } else {
                debug!("Pick new-GOP I-picture to encode next");
                self.idr_counter += 1;
                PictureType::I
            }
        } else {
            if start.is_none() {
                return Err(EncodeError::Invariant(
                    "P picture without an issued predecessor".to_string(),
                ));
            }
            debug!("Pick P-picture to encode next");
            self.gop_counter += 1 + b_counter as u32;
            PictureType::P
        };
        {
            let picture = self.pictures.picture_mut(id)?;
            picture.picture_type = picture_type;
            picture.is_reference = true;
        }

        self.add_ref(id, id, false, true, false)?;
        if picture_type != PictureType::Idr {
            if let Some(start_pos) = start {
                let start = self.at(start_pos)?;
                self.add_ref(id, start, picture_type == PictureType::P, b_counter > 0, false)?;
            }
            if let Some(prev) = self.next_prev {
                self.add_ref(id, prev, false, false, true)?;
            }
        }

        if let Some(prev) = self.next_prev {
            let prev = self.pictures.picture_mut(prev)?;
            prev.ref_count[0] = prev.ref_count[0].saturating_sub(1);
        }
        let next_prev = if b_counter > 0 {
            let start_pos = start.ok_or_else(|| {
                EncodeError::Invariant("B pictures without a start anchor".to_string())
            })?;
            self.set_b_pictures(start_pos, pos, id, 1, gop.max_b_depth)?
        } else {
            id
        };
        self.pictures.picture_mut(next_prev)?.ref_count[0] += 1;
        self.next_prev = Some(next_prev);

        Ok(Pick::Ready(id))
    }

    /// Drop references held by complete pictures and free every complete
    /// picture nothing refers to any more. Freed pictures are returned so
    /// their resources can be released.
    pub fn clear_old(&mut self) -> Result<Vec<Picture<T>>> {
        for pos in 0..self.order.len() {
            let id = self.order[pos];
            if self.pictures.picture(id)?.encode_complete && pos + 1 < self.order.len() {
                self.remove_refs(id, 0)?;
            }
        }

        for pos in 0..self.order.len() {
            let id = self.order[pos];
            let picture = self.pictures.picture(id)?;
            if picture.encode_complete && picture.ref_count[0] == 0 {
                self.remove_refs(id, 1)?;
            }
        }

        let mut freed = Vec::new();
        let mut kept = VecDeque::with_capacity(self.order.len());
        while let Some(id) = self.order.pop_front() {
            let picture = self.pictures.picture(id)?;
            if picture.encode_complete && picture.ref_count[1] == 0 {
                if !(picture.ref_removed[0] && picture.ref_removed[1]) {
                    return Err(EncodeError::Invariant(format!(
                        "picture {} freed with references still held",
                        picture.display_order
                    )));
                }
                if self.next_prev == Some(id) {
                    self.next_prev = None;
                }
                if let Some(picture) = self.pictures.remove(id) {
                    debug!(
                        "Free picture {}/{}",
                        picture.display_order, picture.encode_order
                    );
                    freed.push(picture);
                }
            } else {
                kept.push_back(id);
            }
        }
        self.order = kept;
        Ok(freed)
    }
}

//! Offset tracking for instruction-stream edits
//!
//! A pass describes its edits against the *original* stream (strip a range,
//! widen at a position, splice a body at an anchor), emits the surviving and
//! spliced instructions as [`Emitted`] records, and hands them to
//! [`OffsetTracker::fix_jumps`], which recomputes every jump operand against
//! the edited layout and encodes the result.
//!
//! Every delta is keyed at the first [`Site`] it displaces, so the net shift
//! of a site is the sum of the deltas keyed at or before it.

use crate::bytecode::{encoded_size, pack_into, Instruction, Opcode, MAX_OPERAND, UNIT};
use crate::error::{RewriteError, RewriteResult};
use std::collections::BTreeMap;
use std::fmt;
use std::ops::Bound;

/// Upper bound on jump-width fixup rounds before giving up
pub const MAX_FIXUP_ROUNDS: usize = 64;

/// A position in original coordinates
///
/// `inner == 0` is an offset of the original stream. A spliced body lives at
/// `inner >= 1`: `Site::spliced(anchor, o)` is body offset `o` of a body
/// spliced at `anchor`. The derived ordering places a spliced body after its
/// anchor and before every later original offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Site {
    /// Original offset, or the anchor of a spliced body
    pub offset: usize,
    /// Zero for original sites, body offset plus one inside a splice
    pub inner: usize,
}

impl Site {
    /// Site of an original offset
    pub fn original(offset: usize) -> Self {
        Site { offset, inner: 0 }
    }

    /// Site of `body_offset` within a body spliced at `anchor`
    pub fn spliced(anchor: usize, body_offset: usize) -> Self {
        Site {
            offset: anchor,
            inner: body_offset + 1,
        }
    }

    pub fn is_original(&self) -> bool {
        self.inner == 0
    }

    /// Byte position before any delta is applied
    pub fn base(&self) -> usize {
        if self.inner == 0 {
            self.offset
        } else {
            self.offset + self.inner - 1
        }
    }

    /// Site `bytes` further along in the same coordinate space
    pub fn advance(&self, bytes: usize) -> Self {
        if self.inner == 0 {
            Site::original(self.offset + bytes)
        } else {
            Site {
                offset: self.offset,
                inner: self.inner + bytes,
            }
        }
    }
}

impl fmt::Display for Site {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.inner == 0 {
            write!(f, "{}", self.offset)
        } else {
            write!(f, "{}+{}", self.offset, self.inner - 1)
        }
    }
}

/// One instruction of an edited stream
///
/// `size` is the instruction's size before the edit (its original encoded
/// size, or its size in the body it was spliced from). The tracker compares
/// it with the size of the operand actually written and records the
/// difference as a width change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Emitted {
    pub site: Site,
    pub opcode: Opcode,
    /// Operand to encode; ignored for jumps, whose operand is recomputed
    pub operand: u32,
    pub size: usize,
    /// Jump destination, for jumps
    pub target: Option<Site>,
}

impl Emitted {
    /// Record an original instruction unchanged
    pub fn from_instruction(instruction: &Instruction) -> Self {
        Emitted {
            site: Site::original(instruction.offset),
            opcode: instruction.opcode,
            operand: instruction.operand,
            size: instruction.size,
            target: instruction.jump_target().map(Site::original),
        }
    }

    /// Same instruction with a different opcode and operand
    pub fn rewritten(self, opcode: Opcode, operand: u32) -> Self {
        Emitted {
            opcode,
            operand,
            ..self
        }
    }

    /// Site just past this instruction
    pub fn end(&self) -> Site {
        self.site.advance(self.size)
    }
}

/// Records edits by original position and corrects jumps after them
#[derive(Debug, Clone, Default)]
pub struct OffsetTracker {
    deltas: BTreeMap<Site, i64>,
    widths: BTreeMap<Site, i64>,
    holes: Vec<(Site, Site)>,
}

impl OffsetTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if no edit has been recorded
    pub fn is_empty(&self) -> bool {
        self.deltas.is_empty() && self.widths.is_empty()
    }

    /// Record that `[from, to)` of the original stream was deleted
    ///
    /// The deletion displaces `to` and everything after it.
    pub fn strip(&mut self, from: usize, to: usize) -> RewriteResult<()> {
        if to < from || from % UNIT != 0 || to % UNIT != 0 {
            return Err(RewriteError::InvalidPosition {
                position: from,
                len: to,
            });
        }
        if from == to {
            return Ok(());
        }
        *self.deltas.entry(Site::original(to)).or_insert(0) -= (to - from) as i64;
        self.holes.push((Site::original(from), Site::original(to)));
        Ok(())
    }

    /// Record that `units` instruction units were inserted in front of `position`
    pub fn widen(&mut self, position: usize, units: usize) {
        if units == 0 {
            return;
        }
        *self.deltas.entry(Site::original(position)).or_insert(0) += (units * UNIT) as i64;
    }

    /// Set the width change of the instruction ending at `end`
    ///
    /// Replaces any earlier width change for that instruction. Returns true
    /// if the recorded value changed.
    pub fn mark_width_change(&mut self, end: Site, delta: i64) -> bool {
        let previous = self.widths.get(&end).copied().unwrap_or(0);
        if previous == delta {
            return false;
        }
        if delta == 0 {
            self.widths.remove(&end);
        } else {
            self.widths.insert(end, delta);
        }
        true
    }

    /// Net bytes inserted (positive) or removed (negative) at or before `site`
    pub fn cumulative_offset(&self, site: Site) -> i64 {
        let stripped: i64 = self.deltas.range(..=site).map(|(_, d)| *d).sum();
        let widened: i64 = self.widths.range(..=site).map(|(_, d)| *d).sum();
        stripped + widened
    }

    /// Net delta between two sites: the deltas keyed in `(from, to]`
    ///
    /// Negated when `to` precedes `from`.
    pub fn cumulative_relative_offset(&self, from: Site, to: Site) -> i64 {
        if to < from {
            return -self.cumulative_relative_offset(to, from);
        }
        let range = (Bound::Excluded(from), Bound::Included(to));
        let stripped: i64 = self.deltas.range(range).map(|(_, d)| *d).sum();
        let widened: i64 = self.widths.range(range).map(|(_, d)| *d).sum();
        stripped + widened
    }

    /// Site that survives in place of `site`
    ///
    /// An original site strictly inside a stripped range resolves to the end
    /// of that range, the first site that still exists after it.
    pub fn resolve(&self, site: Site) -> Site {
        if !site.is_original() {
            return site;
        }
        self.holes
            .iter()
            .filter(|(from, to)| *from < site && site < *to)
            .map(|(_, to)| *to)
            .max()
            .map_or(site, |end| self.resolve(end))
    }

    /// Position of `site` in the edited stream
    pub fn new_position(&self, site: Site) -> i64 {
        let site = self.resolve(site);
        site.base() as i64 + self.cumulative_offset(site)
    }

    /// Operand an instruction must carry to reach `target`
    fn jump_operand(&self, emitted: &Emitted, target: Site) -> i64 {
        let target = self.resolve(target);
        if emitted.opcode.is_relative_jump() {
            let end = emitted.end();
            (target.base() as i64 - end.base() as i64)
                + self.cumulative_relative_offset(end, target)
        } else {
            target.base() as i64 + self.cumulative_offset(target)
        }
    }

    /// Recompute every jump operand of `stream` and encode it
    ///
    /// Width changes of non-jump instructions are registered first; jump
    /// widths are then iterated until no jump changes size, since moving one
    /// jump across the extended-operand threshold can push another across
    /// it. Running it again on the same stream produces the same bytes.
    pub fn fix_jumps(&mut self, stream: &[Emitted]) -> RewriteResult<Vec<u8>> {
        for emitted in stream.iter().filter(|e| e.target.is_none()) {
            let delta = encoded_size(emitted.operand) as i64 - emitted.size as i64;
            self.mark_width_change(emitted.end(), delta);
        }

        let mut settled = false;
        for _ in 0..MAX_FIXUP_ROUNDS {
            let mut changed = false;
            for emitted in stream {
                let Some(target) = emitted.target else {
                    continue;
                };
                let operand = self.checked_operand(emitted, target)?;
                let delta = encoded_size(operand) as i64 - emitted.size as i64;
                changed |= self.mark_width_change(emitted.end(), delta);
            }
            if !changed {
                settled = true;
                break;
            }
        }
        if !settled {
            return Err(RewriteError::FixupDiverged(MAX_FIXUP_ROUNDS));
        }

        let mut buffer = Vec::with_capacity(stream.len() * UNIT);
        for emitted in stream {
            let operand = match emitted.target {
                Some(target) => self.checked_operand(emitted, target)?,
                None => emitted.operand,
            };
            pack_into(&mut buffer, emitted.opcode, operand as i64)?;
        }
        Ok(buffer)
    }

    fn checked_operand(&self, emitted: &Emitted, target: Site) -> RewriteResult<u32> {
        let operand = self.jump_operand(emitted, target);
        if !(0..=MAX_OPERAND as i64).contains(&operand) {
            return Err(RewriteError::UnencodableOffset {
                offset: self.new_position(emitted.site).max(0) as usize,
                operand,
            });
        }
        Ok(operand as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::{decode_all, pack};
    use pretty_assertions::assert_eq;

    fn emitted(stream: &[u8]) -> Vec<Emitted> {
        decode_all(stream)
            .unwrap()
            .iter()
            .map(Emitted::from_instruction)
            .collect()
    }

    fn assemble(instructions: &[(Opcode, i64)]) -> Vec<u8> {
        instructions
            .iter()
            .flat_map(|(op, arg)| pack(*op, *arg).unwrap())
            .collect()
    }

    #[test]
    fn test_site_ordering_places_splice_between_originals() {
        assert!(Site::original(4) < Site::spliced(4, 0));
        assert!(Site::spliced(4, 0) < Site::spliced(4, 10));
        assert!(Site::spliced(4, 100) < Site::original(6));
        assert_eq!(Site::spliced(4, 6).base(), 10);
        assert_eq!(Site::spliced(4, 6).advance(2), Site::spliced(4, 8));
    }

    #[test]
    fn test_cumulative_offset_after_strip() {
        let mut tracker = OffsetTracker::new();
        tracker.strip(4, 8).unwrap();
        assert_eq!(tracker.cumulative_offset(Site::original(2)), 0);
        assert_eq!(tracker.cumulative_offset(Site::original(4)), 0);
        assert_eq!(tracker.cumulative_offset(Site::original(8)), -4);
        assert_eq!(tracker.cumulative_offset(Site::original(20)), -4);
    }

    #[test]
    fn test_cumulative_offset_after_widen() {
        let mut tracker = OffsetTracker::new();
        tracker.widen(6, 3);
        assert_eq!(tracker.cumulative_offset(Site::original(4)), 0);
        assert_eq!(tracker.cumulative_offset(Site::original(6)), 6);
    }

    #[test]
    fn test_relative_offset_only_counts_edits_between() {
        let mut tracker = OffsetTracker::new();
        tracker.strip(2, 4).unwrap();
        tracker.strip(10, 14).unwrap();
        tracker.widen(20, 1);
        let from = Site::original(4);
        assert_eq!(tracker.cumulative_relative_offset(from, Site::original(14)), -4);
        assert_eq!(tracker.cumulative_relative_offset(from, Site::original(20)), -2);
        assert_eq!(tracker.cumulative_relative_offset(Site::original(20), from), 2);
    }

    #[test]
    fn test_resolve_maps_hole_interior_to_its_end() {
        let mut tracker = OffsetTracker::new();
        tracker.strip(4, 10).unwrap();
        assert_eq!(tracker.resolve(Site::original(6)), Site::original(10));
        assert_eq!(tracker.resolve(Site::original(4)), Site::original(4));
        assert_eq!(tracker.resolve(Site::spliced(4, 2)), Site::spliced(4, 2));
        assert_eq!(tracker.new_position(Site::original(6)), 4);
        assert_eq!(tracker.new_position(Site::original(4)), 4);
    }

    #[test]
    fn test_fix_jumps_without_edits_is_identity() {
        let stream = assemble(&[
            (Opcode::LoadFast, 0),
            (Opcode::PopJumpIfFalse, 8),
            (Opcode::LoadConst, 0),
            (Opcode::ReturnValue, 0),
            (Opcode::LoadConst, 1),
            (Opcode::ReturnValue, 0),
        ]);
        let mut tracker = OffsetTracker::new();
        assert_eq!(tracker.fix_jumps(&emitted(&stream)).unwrap(), stream);
    }

    #[test]
    fn test_fix_jumps_absolute_target_after_strip() {
        // 0 LOAD_FAST; 2 POP_JUMP_IF_FALSE 10; 4 NOP; 6 NOP; 8 LOAD_CONST; 10 RETURN
        let stream = assemble(&[
            (Opcode::LoadFast, 0),
            (Opcode::PopJumpIfFalse, 10),
            (Opcode::Nop, 0),
            (Opcode::Nop, 0),
            (Opcode::LoadConst, 0),
            (Opcode::ReturnValue, 0),
        ]);
        let mut tracker = OffsetTracker::new();
        tracker.strip(4, 8).unwrap();
        let kept: Vec<Emitted> = emitted(&stream)
            .into_iter()
            .filter(|e| !(4..8).contains(&e.site.offset))
            .collect();

        let fixed = tracker.fix_jumps(&kept).unwrap();
        assert_eq!(
            fixed,
            assemble(&[
                (Opcode::LoadFast, 0),
                (Opcode::PopJumpIfFalse, 6),
                (Opcode::LoadConst, 0),
                (Opcode::ReturnValue, 0),
            ])
        );
    }

    #[test]
    fn test_fix_jumps_relative_ignores_edits_before_jump() {
        // 0 NOP; 2 JUMP_FORWARD 2 (-> 6); 4 NOP; 6 RETURN
        let stream = assemble(&[
            (Opcode::Nop, 0),
            (Opcode::JumpForward, 2),
            (Opcode::Nop, 0),
            (Opcode::ReturnValue, 0),
        ]);
        let mut tracker = OffsetTracker::new();
        tracker.strip(0, 2).unwrap();
        let kept: Vec<Emitted> = emitted(&stream).into_iter().skip(1).collect();
        assert_eq!(
            tracker.fix_jumps(&kept).unwrap(),
            assemble(&[
                (Opcode::JumpForward, 2),
                (Opcode::Nop, 0),
                (Opcode::ReturnValue, 0),
            ])
        );
    }

    #[test]
    fn test_fix_jumps_widening_ripples_to_own_target() {
        // A forward absolute jump to 254 becomes 256 once a unit is inserted
        // before its target, which needs a prefix, which shifts the target
        // by two more bytes.
        let mut ops = vec![(Opcode::JumpAbsolute, 254)];
        ops.extend(std::iter::repeat((Opcode::Nop, 0)).take(126));
        ops.push((Opcode::ReturnValue, 0));
        let stream = assemble(&ops);
        assert_eq!(stream.len(), 256);

        let mut tracker = OffsetTracker::new();
        tracker.widen(10, 1);
        let mut records = emitted(&stream);
        records.insert(
            5,
            Emitted {
                site: Site::spliced(8, 0),
                opcode: Opcode::Nop,
                operand: 0,
                size: 2,
                target: None,
            },
        );
        let fixed = tracker.fix_jumps(&records).unwrap();
        let decoded = decode_all(&fixed).unwrap();
        assert_eq!(decoded[0].opcode, Opcode::JumpAbsolute);
        assert_eq!(decoded[0].size, 4);
        assert_eq!(decoded[0].operand, 258);
        assert_eq!(decoded.last().unwrap().offset, 258);
    }

    #[test]
    fn test_fix_jumps_twice_is_stable() {
        let mut ops = vec![(Opcode::JumpAbsolute, 254)];
        ops.extend(std::iter::repeat((Opcode::Nop, 0)).take(126));
        ops.push((Opcode::ReturnValue, 0));
        let stream = assemble(&ops);

        let mut tracker = OffsetTracker::new();
        tracker.widen(4, 1);
        let mut records = emitted(&stream);
        records.insert(2, {
            let mut extra = records[1];
            extra.site = Site::spliced(2, 0);
            extra
        });
        let first = tracker.fix_jumps(&records).unwrap();
        let second = tracker.fix_jumps(&records).unwrap();
        assert_eq!(first, second);

        let mut fresh = OffsetTracker::new();
        assert_eq!(fresh.fix_jumps(&emitted(&first)).unwrap(), first);
    }

    #[test]
    fn test_fix_jumps_rejects_unencodable_target() {
        let records = vec![Emitted {
            site: Site::original(0),
            opcode: Opcode::JumpAbsolute,
            operand: 0,
            size: 2,
            target: Some(Site::original(4)),
        }];
        let mut tracker = OffsetTracker::new();
        tracker.widen(2, 40_000);
        assert!(matches!(
            tracker.fix_jumps(&records),
            Err(RewriteError::UnencodableOffset { offset: 0, .. })
        ));
    }

    #[test]
    fn test_width_change_of_non_jump_shifts_later_targets() {
        // LOAD_CONST whose index grows past 255 pushes the jump target by two.
        let stream = assemble(&[
            (Opcode::JumpAbsolute, 4),
            (Opcode::LoadConst, 0),
            (Opcode::ReturnValue, 0),
        ]);
        let mut records = emitted(&stream);
        records[1] = records[1].rewritten(Opcode::LoadConst, 300);
        let mut tracker = OffsetTracker::new();
        let fixed = tracker.fix_jumps(&records).unwrap();
        assert_eq!(
            fixed,
            assemble(&[
                (Opcode::JumpAbsolute, 6),
                (Opcode::LoadConst, 300),
                (Opcode::ReturnValue, 0),
            ])
        );
    }
}

//! Stack-frame layout: where a callee finds its parameters and its return
//! slot, bp-relative (`spec.md` §6's calling convention).
//!
//! A call site pushes, in order: the return slot (1 word), the N argument
//! words, then `CALL` pushes the saved pc and the saved bp (2 words) before
//! jumping. The callee's `FUNCPRO` sets `bp := sp` right there, so from the
//! callee's perspective the frame looks like:
//!
//! ```text
//! bp-(N+3)*W  return slot
//! bp-(N+2)*W  param 0
//! ...
//! bp-3*W      param N-1
//! bp-2*W      saved bp
//! bp-1*W      saved pc
//! bp+0        local 0
//! bp+1*W      local 1
//! ...
//! ```
//!
//! `RET` resets `sp := bp`, pops the saved bp and saved pc, which lands
//! `sp` exactly where it was right before `CALL` ran — on top of the
//! return slot and the N argument words, untouched. The caller's `POPN N`
//! then drops the arguments, leaving the return value on top of the stack.

use crate::types::WORD;

/// Bp-relative byte offset of parameter `index` (0-based) in a function
/// taking `param_count` parameters.
///
/// Assumes one word per parameter. `sema.rs` enforces that every parameter,
/// return value, and assignment target is `s32`, so this always holds; a
/// struct- or array-typed parameter is rejected before lowering ever sees it.
pub fn param_offset(param_count: usize, index: usize) -> i16 {
    -(((param_count - index) + 2) * WORD) as i16
}

/// Bp-relative byte offset of the return slot.
pub fn return_slot_offset(param_count: usize) -> i16 {
    -(((param_count + 3) * WORD) as i16)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_param_offsets_match_hand_trace() {
        assert_eq!(param_offset(1, 0), -24);
        assert_eq!(return_slot_offset(1), -32);
    }

    #[test]
    fn two_param_offsets_match_hand_trace() {
        assert_eq!(param_offset(2, 0), -32);
        assert_eq!(param_offset(2, 1), -24);
        assert_eq!(return_slot_offset(2), -40);
    }

    #[test]
    fn zero_param_function_has_only_a_return_slot() {
        assert_eq!(return_slot_offset(0), -24);
    }
}

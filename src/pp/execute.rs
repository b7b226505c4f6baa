//! Cyber 962 PP opcode group execution.
//!
//! `Cyber962PPInstructions.c`'s handler bodies are stubs in the retrieval
//! pack, so semantics here are built directly from spec.md §4.7/§8 rather
//! than ported line-by-line; the dispatch shape (one function per group,
//! matched on the classification from [`super::decode`]) mirrors
//! `core/src/game_boy/execute.rs`.

use super::decode::{AddressMode, Condition, Group};
use super::Pp;

/// Where an operand or store target resolved to.
enum Operand {
    Immediate(u32),
    Local(u16),
    Cm(u32),
}

/// Resolves an address mode to an operand/address plus how many extra
/// instruction words it consumed (0 or 1), per spec.md §4.7's table.
fn resolve(pp: &Pp, mode: AddressMode, d: u8) -> (Operand, u16) {
    match mode {
        AddressMode::NoAddress => (Operand::Immediate(d as u32), 0),
        AddressMode::Constant => {
            let next = pp.registers.read(pp.registers.p.wrapping_add(1));
            (Operand::Immediate(((d as u32) << 12) | next as u32), 1)
        }
        AddressMode::Direct => (Operand::Local(d as u16), 0),
        AddressMode::Indirect => {
            let inner = pp.registers.read(d as u16);
            (Operand::Local(inner), 0)
        }
        AddressMode::Memory => {
            if d == 0 {
                (Operand::Local(pp.registers.p), 0)
            } else {
                let base = pp.registers.read(pp.registers.p.wrapping_add(1));
                let index = pp.registers.read(d as u16);
                (Operand::Local(base.wrapping_add(index)), 1)
            }
        }
        AddressMode::Cm => (Operand::Cm(cm_address(pp.registers.a(), pp.registers.r())), 0),
    }
}

/// `A[17:0]`/`R[21:0]` combine per spec.md §4.7's CM addressing rule.
fn cm_address(a: u32, r: u32) -> u32 {
    let a18 = a & 0x3_FFFF;
    if a18 & 0x2_0000 != 0 {
        a18 & 0x1_FFFF
    } else {
        ((r << 4) + (a18 & 0x1_FFFF)) & 0x0FFF_FFFF
    }
}

fn read_operand(pp: &Pp, operand: &Operand) -> u32 {
    match *operand {
        Operand::Immediate(v) => v,
        Operand::Local(addr) => pp.registers.read(addr) as u32,
        Operand::Cm(word_index) => {
            let mut buf = [0u64; 1];
            pp.cm_port.read_words_physical(word_index as u64 * 8, &mut buf);
            (buf[0] & 0x3_FFFF) as u32
        }
    }
}

fn write_operand(pp: &mut Pp, operand: &Operand, value: u32) {
    match *operand {
        Operand::Immediate(_) => unreachable!("immediate operands are never store targets"),
        Operand::Local(addr) => pp.registers.write(addr, value as u16),
        Operand::Cm(word_index) => {
            pp.cm_port.write_words_physical(word_index as u64 * 8, &[value as u64]);
        }
    }
}

fn mask_for(long: bool) -> u32 {
    if long {
        0xFFFF
    } else {
        0x0FFF
    }
}

/// Runs one classified instruction. Returns the word count `P` should
/// advance by, or `None` if the handler already set `P` itself (branches).
/// `word` is the raw fetched instruction word, from which the `d` (and, for
/// I/O instructions, `c`) field is re-derived.
pub fn dispatch(pp: &mut Pp, group: Group, word: u16) -> Option<u16> {
    let d = super::decode::d_field(word);
    match group {
        Group::Load(mode, long) => {
            let (operand, extra) = resolve(pp, mode, d);
            let value = read_operand(pp, &operand) & mask_for(long);
            pp.registers.set_a(value);
            Some(1 + extra)
        }
        Group::Store(mode, long) => {
            let (operand, extra) = resolve(pp, mode, d);
            let value = pp.registers.a() & mask_for(long);
            write_operand(pp, &operand, value);
            Some(1 + extra)
        }
        Group::Add(mode, long) => {
            let (operand, extra) = resolve(pp, mode, d);
            let value = read_operand(pp, &operand) & mask_for(long);
            pp.registers.set_a(pp.registers.a().wrapping_add(value));
            Some(1 + extra)
        }
        Group::Subtract(mode, long) => {
            let (operand, extra) = resolve(pp, mode, d);
            let value = read_operand(pp, &operand) & mask_for(long);
            pp.registers.set_a(pp.registers.a().wrapping_sub(value));
            Some(1 + extra)
        }
        Group::Shift => {
            let a = pp.registers.a() & 0x3_FFFF;
            let shifted = if d < 0o40 {
                let n = (d as u32) % 18;
                ((a << n) | (a >> ((18 - n) % 18))) & 0x3_FFFF
            } else {
                let n = (0o77 - d) as u32;
                a >> n
            };
            pp.registers.set_a(shifted);
            Some(1)
        }
        Group::LogicalDifference(mode, long) => {
            let (operand, extra) = resolve(pp, mode, d);
            let value = read_operand(pp, &operand) & mask_for(long);
            pp.registers.set_a(pp.registers.a() ^ value);
            Some(1 + extra)
        }
        Group::LogicalProduct(mode, long) => {
            let (operand, extra) = resolve(pp, mode, d);
            let value = read_operand(pp, &operand) & mask_for(long);
            pp.registers.set_a(pp.registers.a() & value);
            Some(1 + extra)
        }
        Group::SelectiveClear => {
            pp.registers.set_a(pp.registers.a() & !(d as u32));
            Some(1)
        }
        Group::ReplaceAdd(mode, long) => {
            let (operand, extra) = resolve(pp, mode, d);
            let old = read_operand(pp, &operand) & mask_for(long);
            write_operand(pp, &operand, old.wrapping_add(pp.registers.a()) & mask_for(long));
            Some(1 + extra)
        }
        Group::ReplaceAddOne(mode, long) => {
            let (operand, extra) = resolve(pp, mode, d);
            let old = read_operand(pp, &operand) & mask_for(long);
            write_operand(pp, &operand, old.wrapping_add(1) & mask_for(long));
            Some(1 + extra)
        }
        Group::ReplaceSubtractOne(mode, long) => {
            let (operand, extra) = resolve(pp, mode, d);
            let old = read_operand(pp, &operand) & mask_for(long);
            write_operand(pp, &operand, old.wrapping_sub(1) & mask_for(long));
            Some(1 + extra)
        }
        Group::LongJump => {
            let target = pp.registers.read(pp.registers.p.wrapping_add(1));
            pp.registers.p = target;
            None
        }
        Group::ReturnJump => {
            let target = pp.registers.read(pp.registers.p.wrapping_add(1));
            let return_address = pp.registers.p.wrapping_add(2);
            pp.registers.write(target, return_address);
            pp.registers.p = target.wrapping_add(1);
            None
        }
        Group::ConditionalJump(condition) => {
            let a = pp.registers.a();
            let taken = match condition {
                Condition::Unconditional => true,
                Condition::Zero => a == 0,
                Condition::NonZero => a != 0,
                Condition::Positive => a & 0x2_0000 == 0 && a != 0,
                Condition::Negative => a & 0x2_0000 != 0,
            };
            let offset: i32 = if d <= 0o37 { d as i32 } else { -((0o77 - d) as i32) };
            if taken {
                pp.registers.p = pp.registers.p.wrapping_add(offset as u16);
                None
            } else {
                Some(1)
            }
        }
        Group::RTransferLoad => {
            if d == 0 {
                return Some(1);
            }
            let low = (pp.registers.read(d as u16) & 0x3FF) as u32;
            let high = (pp.registers.read(d.wrapping_add(1) as u16) & 0x7FF) as u32;
            pp.registers.set_r((high << 18) | (low << 6));
            Some(1)
        }
        Group::RTransferStore => {
            if d == 0 {
                return Some(1);
            }
            let r = pp.registers.r();
            pp.registers.write(d as u16, ((r >> 6) & 0x3FF) as u16);
            pp.registers.write(d.wrapping_add(1) as u16, ((r >> 18) & 0x7FF) as u16);
            Some(1)
        }
        Group::CmRead { long, multi_word } => {
            cm_read(pp, d, long, multi_word);
            Some(2)
        }
        Group::CmWrite { long, multi_word } => {
            cm_write(pp, d, long, multi_word);
            Some(2)
        }
        Group::ReadSelectiveOr => {
            read_selective(pp, d, false);
            Some(1)
        }
        Group::ReadSelectiveAnd => {
            read_selective(pp, d, true);
            Some(1)
        }
        Group::IoFunction => {
            io_function(pp, word);
            Some(1)
        }
        Group::Pass | Group::Keypoint | Group::ExchangeJump => Some(1),
    }
}

/// Dispatches an I/O family instruction on its channel's hooks, per
/// spec.md §4.7: the `s` bit distinguishes a control issue from a
/// state-check "jump" function, and `c` selects the channel.
fn io_function(pp: &Pp, word: u16) {
    let channels = match &pp.channels {
        Some(channels) => channels,
        None => return,
    };
    let c = super::decode::c_field(word) as usize;
    let Some(channel) = channels.get(c) else { return };
    let mut channel = channel.lock().expect("channel mutex poisoned");
    if super::decode::s_bit(word) {
        channel.control(word);
    } else {
        channel.check_state();
    }
}

/// Unpacks one 60-bit (classical) or 64-bit (long) CM word into PP words.
/// The stride is 5 words for the 60-bit form, 4 for the 64-bit form, per
/// spec.md §4.7.
fn cm_read(pp: &mut Pp, d: u8, long: bool, multi_word: bool) {
    let address = cm_address(pp.registers.a(), pp.registers.r());
    log::trace!("PP: CM read at word {address:#x} (long={long}, multi_word={multi_word})");
    let count = if multi_word {
        (pp.registers.read(d as u16) & if long { 0xFFFF } else { 0x0FFF }) as usize
    } else {
        1
    };
    let dest = pp.registers.read(pp.registers.p.wrapping_add(1));
    let stride = if long { 4u16 } else { 5u16 };

    let mut words = vec![0u64; count];
    pp.cm_port.read_words_physical(address as u64 * 8, &mut words);

    for (i, word) in words.iter().enumerate() {
        let base = dest.wrapping_add((i as u16).wrapping_mul(stride));
        if long {
            for slot in 0..4u16 {
                let shift = 48 - slot as u32 * 16;
                pp.registers.write(base.wrapping_add(slot), ((*word >> shift) & 0xFFFF) as u16);
            }
        } else {
            for slot in 0..5u16 {
                let shift = 48 - slot as u32 * 12;
                pp.registers.write(base.wrapping_add(slot), ((*word >> shift) & 0x0FFF) as u16);
            }
        }
    }
}

fn cm_write(pp: &mut Pp, d: u8, long: bool, multi_word: bool) {
    let address = cm_address(pp.registers.a(), pp.registers.r());
    log::trace!("PP: CM write at word {address:#x} (long={long}, multi_word={multi_word})");
    let count = if multi_word {
        (pp.registers.read(d as u16) & if long { 0xFFFF } else { 0x0FFF }) as usize
    } else {
        1
    };
    let src = pp.registers.read(pp.registers.p.wrapping_add(1));
    let stride = if long { 4u16 } else { 5u16 };

    let mut words = vec![0u64; count];
    for (i, word) in words.iter_mut().enumerate() {
        let base = src.wrapping_add((i as u16).wrapping_mul(stride));
        let mut packed = 0u64;
        if long {
            for slot in 0..4u16 {
                let shift = 48 - slot as u32 * 16;
                packed |= (pp.registers.read(base.wrapping_add(slot)) as u64) << shift;
            }
        } else {
            for slot in 0..5u16 {
                let shift = 48 - slot as u32 * 12;
                packed |= ((pp.registers.read(base.wrapping_add(slot)) & 0x0FFF) as u64) << shift;
            }
        }
        *word = packed;
    }

    pp.cm_port.write_words_physical(address as u64 * 8, &words);
}

/// `RDSL`/`RDCL`: atomic read-modify-write over the CM word at `A`/`R`,
/// combined with PP local word `d` by OR (`and_instead = false`) or AND.
fn read_selective(pp: &mut Pp, d: u8, and_instead: bool) {
    let address = cm_address(pp.registers.a(), pp.registers.r()) as u64 * 8;
    let mut transaction = pp.cm_port.begin_transaction();
    let x = transaction.read_word_unlocked(address);
    let y = pp.registers.read(d as u16) as u64;
    pp.registers.write(d as u16, x as u16);
    let combined = if and_instead { x & y } else { x | y };
    transaction.write_word_unlocked(address, combined);
    transaction.trigger_cache_evictions_for_line_range((address / 64) as u32, 1);
}

#[cfg(test)]
mod tests {
    use super::super::decode::{classify, opcode};
    use super::super::Pp;
    use crate::memory::{CMPort, CentralMemory};
    use std::sync::Arc;

    fn pp_with_memory() -> Pp {
        let cm = Arc::new(CentralMemory::new(64 * 1024, 2, &[]).unwrap());
        Pp::new(Arc::new(CMPort::new(cm, 0)))
    }

    fn run(pp: &mut Pp, word: u16) {
        pp.registers.write(pp.registers.p, word);
        pp.step();
    }

    #[test]
    fn load_no_address_sets_a_to_d() {
        let mut pp = pp_with_memory();
        // opcode 0o14, d = 5
        run(&mut pp, (0o14u16 << 6) | 5);
        assert_eq!(pp.registers.a(), 5);
    }

    #[test]
    fn load_direct_then_store_direct_round_trips() {
        let mut pp = pp_with_memory();
        pp.registers.write(100, 0x2A);
        run(&mut pp, (0o20u16 << 6) | 100); // LDD 100
        assert_eq!(pp.registers.a(), 0x2A);

        pp.registers.set_a(0x55);
        run(&mut pp, (0o34u16 << 6) | 101); // STD 101
        assert_eq!(pp.registers.read(101), 0x55);
    }

    #[test]
    fn add_no_address_accumulates() {
        let mut pp = pp_with_memory();
        run(&mut pp, (0o16u16 << 6) | 3);
        run(&mut pp, (0o16u16 << 6) | 4);
        assert_eq!(pp.registers.a(), 7);
    }

    #[test]
    fn ljm_sets_p_to_next_word_value() {
        let mut pp = pp_with_memory();
        pp.registers.write(pp.registers.p.wrapping_add(1), 0x200);
        run(&mut pp, 0o001u16 << 6);
        assert_eq!(pp.registers.p, 0x200);
    }

    #[test]
    fn rjm_stores_return_address_and_jumps_past_target() {
        let mut pp = pp_with_memory();
        let start = pp.registers.p;
        pp.registers.write(start.wrapping_add(1), 0x300);
        run(&mut pp, 0o002u16 << 6);
        assert_eq!(pp.registers.read(0x300), start.wrapping_add(2));
        assert_eq!(pp.registers.p, 0x301);
    }

    #[test]
    fn cm_block_write_then_read_round_trips_classical_form() {
        let mut pp = pp_with_memory();
        pp.registers.set_a(0x20000 | 0x40); // bit 17 set: CM address = 0x40 directly
        for i in 0..5u16 {
            pp.registers.write(500 + i, 0x0AB + i);
        }
        pp.registers.write(pp.registers.p.wrapping_add(1), 500);
        run(&mut pp, 0o062u16 << 6); // CWD

        pp.registers.write(pp.registers.p.wrapping_add(1), 600);
        run(&mut pp, 0o060u16 << 6); // CRD

        for i in 0..5u16 {
            assert_eq!(pp.registers.read(600 + i), 0x0AB + i);
        }
    }

    /// Spec.md §8 scenario 6, run as a true two-instruction sequential
    /// program (`CWM` immediately followed by `CRM`, each occupying two PP
    /// words) rather than by rewriting the opcode word at the post-step
    /// `P` between instructions — this is the form that would have masked
    /// `P` advancing by only 1 instead of 2, since the operand word at
    /// `P+1` would otherwise be re-decoded as the next instruction.
    #[test]
    fn cwm_then_crm_as_a_sequential_program_advances_p_by_two_words_each() {
        let mut pp = pp_with_memory();
        pp.registers.set_a(0x20000 | 0x40); // bit 17 set: CM address = 0x40 directly
        pp.registers.write(5, 1); // count = 1 word
        for i in 0..5u16 {
            pp.registers.write(0x10 + i, 0x0AB + i);
        }

        let start = pp.registers.p;
        pp.registers.write(start, (0o063u16 << 6) | 5); // CWM d=5
        pp.registers.write(start.wrapping_add(1), 0x10); // source base
        pp.registers.write(start.wrapping_add(2), (0o061u16 << 6) | 5); // CRM d=5
        pp.registers.write(start.wrapping_add(3), 0x20); // destination base

        pp.step(); // CWM
        assert_eq!(pp.registers.p, start.wrapping_add(2));

        pp.step(); // CRM
        assert_eq!(pp.registers.p, start.wrapping_add(4));

        for i in 0..5u16 {
            assert_eq!(pp.registers.read(0x20 + i), 0x0AB + i);
        }
    }

    #[test]
    fn classify_matches_dispatch_for_store_direct_long() {
        let word = (1u16 << 15) | (0o34 << 6) | 7;
        assert_eq!(opcode(word), 0o1034);
        let group = classify(opcode(word));
        assert!(matches!(group, crate::pp::decode::Group::Store(crate::pp::decode::AddressMode::Direct, true)));
    }
}

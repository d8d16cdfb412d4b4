//! Reference CPU model: register file, flag-producing ALU and the multi-cycle
//! control state machine with its one-word instruction lookahead. The model
//! advances one state per [`RunState::step`] call and exposes read-only views
//! of every architectural register between ticks.

use bitflags::bitflags;
use miette::{bail, Result};

use crate::air::Air;
use crate::decode::{decode, Decoded, InsnType, NextPc};
use crate::isa::{self, Opcode};

bitflags! {
    /// Condition flags. Written only by OR/AND/XOR/ADD/SUB/CMP.
    #[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
    pub struct Flags: u8 {
        /// Zero
        const Z = 1 << 0;
        /// Sign, bit 15 of the result
        const S = 1 << 1;
        /// Carry out of bit 15, or borrow
        const C = 1 << 2;
        /// Signed overflow
        const O = 1 << 3;
    }
}

/// Control FSM states, one transition per clock edge.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum State {
    Idle,
    Wait,
    Ifetch,
    Execute,
    WaitMem,
    WaitAlu,
    Writeback,
}

/// ALU with the serialized shifter. Shifts hold `busy` for one cycle per
/// shifted bit; everything else completes combinationally.
#[derive(Clone, Copy, Debug)]
struct Alu {
    out: u16,
    flags: Flags,
    busy: u8,
}

impl Alu {
    fn new() -> Self {
        Alu {
            out: 0,
            flags: Flags::empty(),
            busy: 0,
        }
    }

    fn start(&mut self, op: Opcode, a: u16, b: u16) {
        self.busy = 0;
        let mut flags = Flags::empty();
        self.out = match op {
            Opcode::Or => a | b,
            Opcode::And => a & b,
            Opcode::Xor => a ^ b,
            Opcode::Sll => {
                self.busy = (b & 0xF) as u8;
                a.wrapping_shl((b & 0xF) as u32)
            }
            Opcode::Slr => {
                self.busy = (b & 0xF) as u8;
                a.wrapping_shr((b & 0xF) as u32)
            }
            Opcode::Not => !a,
            Opcode::Neg => (!a).wrapping_add(1),
            Opcode::Add => {
                let (res, carry) = a.overflowing_add(b);
                flags.set(Flags::C, carry);
                flags.set(Flags::O, (a ^ b) & 0x8000 == 0 && (a ^ res) & 0x8000 != 0);
                res
            }
            Opcode::Sub | Opcode::Cmp => {
                let (res, borrow) = a.overflowing_sub(b);
                flags.set(Flags::C, borrow);
                flags.set(Flags::O, (a ^ b) & 0x8000 != 0 && (a ^ res) & 0x8000 != 0);
                res
            }
            Opcode::Mov => b,
            Opcode::Movhi => (b & 0xFF) << 8,
            Opcode::Movlo => a | (b & 0xFF),
            // Memory ops route through Add; branches never enable the ALU.
            _ => a,
        };
        flags.set(Flags::Z, self.out == 0);
        flags.set(Flags::S, self.out & 0x8000 != 0);
        self.flags = flags;
    }

    fn tick(&mut self) {
        self.busy = self.busy.saturating_sub(1);
    }

    fn busy(&self) -> bool {
        self.busy > 0
    }
}

/// Represents complete processor state during a run.
pub struct RunState {
    /// Unified instruction/data memory, `2^pc_width` words
    mem: Vec<u16>,
    /// Program counter, masked to `pc_width` bits
    pc: u16,
    /// 8x 16-bit registers; r0 is hardwired to zero
    reg: [u16; 8],
    /// Condition flags
    flags: Flags,
    /// Control FSM state
    state: State,
    /// Instruction in flight
    insn: u16,
    /// Lookahead fetch of the next instruction
    next_insn: u16,
    /// Memory address latch
    mem_addr: u16,
    /// Loaded word awaiting writeback
    mem_data: u16,
    /// Decode outputs for the instruction in flight
    dec: Decoded,
    alu: Alu,
    pc_mask: u16,
}

impl RunState {
    /// Model with zeroed memory.
    pub fn new(pc_width: u8) -> Self {
        assert!(
            (1..=isa::MAX_PC_WIDTH).contains(&pc_width),
            "pc width out of range"
        );
        let size = 1usize << pc_width;
        RunState {
            mem: vec![0; size],
            pc: 0,
            reg: [0; 8],
            flags: Flags::empty(),
            state: State::Idle,
            insn: 0,
            next_insn: 0,
            mem_addr: 0,
            mem_data: 0,
            dec: decode(0x3000, Flags::empty()),
            alu: Alu::new(),
            pc_mask: (size - 1) as u16,
        }
    }

    /// Load an assembled program at address 0.
    // Not generic over loaders because of the miette error
    pub fn try_from(air: &Air) -> Result<RunState> {
        Self::from_words(&air.words(), air.pc_width())
    }

    /// Load a program from rendered hex text, the way the block RAM does.
    pub fn from_hex(text: &str, pc_width: u8) -> Result<RunState> {
        Self::from_words(&crate::hex::parse(text)?, pc_width)
    }

    pub fn from_words(words: &[u16], pc_width: u8) -> Result<RunState> {
        let mut state = Self::new(pc_width);
        if words.len() > state.mem.len() {
            bail!(
                "program is {} words but memory holds {}",
                words.len(),
                state.mem.len()
            );
        }
        state.mem[..words.len()].copy_from_slice(words);
        Ok(state)
    }

    // Read-only views for tests and tooling.

    pub fn pc(&self) -> u16 {
        self.pc
    }

    pub fn reg(&self, idx: u16) -> u16 {
        self.read_reg(idx)
    }

    pub fn regs(&self) -> [u16; 8] {
        let mut out = self.reg;
        out[0] = 0;
        out
    }

    pub fn flags(&self) -> Flags {
        self.flags
    }

    pub fn mem(&self) -> &[u16] {
        &self.mem
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// Run for a fixed cycle budget. The ISA has no halt instruction, so the
    /// budget is the only terminator; callers size it to the program.
    pub fn run(&mut self, max_cycles: u64) {
        for _ in 0..max_cycles {
            self.step();
        }
    }

    /// Advance the FSM by one clock.
    pub fn step(&mut self) {
        match self.state {
            State::Idle => self.state = State::Wait,
            State::Wait => {
                self.insn = self.read_mem(self.pc);
                self.mem_addr = self.pc.wrapping_add(1) & self.pc_mask;
                self.state = State::Ifetch;
            }
            State::Ifetch => {
                self.dec = decode(self.insn, self.flags);
                // Redirect the fetch address for a taken branch; the
                // fall-through lookahead address is already latched.
                match self.dec.next_pc {
                    NextPc::Imm => {
                        self.mem_addr = self.pc.wrapping_add(self.dec.imm) & self.pc_mask;
                    }
                    NextPc::Reg => {
                        self.mem_addr = self.read_reg(self.dec.rd) & self.pc_mask;
                    }
                    NextPc::Inc => {}
                }
                self.state = State::Execute;
            }
            State::Execute => self.execute(),
            State::WaitMem => {
                if self.dec.insn_type == InsnType::MemLw {
                    self.mem_data = self.read_mem(self.mem_addr);
                } else {
                    // Taken branch: the redirected fetch lands here.
                    self.next_insn = self.read_mem(self.mem_addr);
                }
                self.state = State::Writeback;
            }
            State::WaitAlu => {
                self.alu.tick();
                if !self.alu.busy() {
                    if self.dec.reg_we {
                        self.write_reg(self.dec.regdst, self.alu.out);
                    }
                    self.pc = self.pc.wrapping_add(1) & self.pc_mask;
                    self.state = State::Writeback;
                }
            }
            State::Writeback => {
                match self.dec.insn_type {
                    InsnType::MemLw => self.write_reg(self.dec.regdst, self.mem_data),
                    InsnType::MemSw if self.dec.mem_we => {
                        self.mem[self.mem_addr as usize] = self.read_reg(self.dec.rd);
                    }
                    _ => {}
                }
                // Hand the lookahead to decode and refill it.
                self.insn = self.next_insn;
                self.mem_addr = self.pc.wrapping_add(1) & self.pc_mask;
                self.state = State::Ifetch;
            }
        }
    }

    fn execute(&mut self) {
        let dec = self.dec;
        let inc_pc = self.pc.wrapping_add(1) & self.pc_mask;

        if dec.next_pc != NextPc::Inc {
            // Taken branch. The target address was latched in IFETCH; the
            // link write happens before PC moves.
            if dec.insn_type == InsnType::BraJal {
                self.write_reg(dec.regdst, inc_pc);
            }
            self.pc = self.mem_addr;
            self.state = State::WaitMem;
            return;
        }

        if dec.alu_en {
            let (a, b) = self.alu_operands(&dec);
            self.alu.start(dec.alu_op, a, b);
            if dec.flag_we {
                self.flags = self.alu.flags;
            }
        }

        // Fall-through lookahead; mem_addr still points at PC+1.
        self.next_insn = self.read_mem(self.mem_addr);

        match dec.insn_type {
            InsnType::MemLw => {
                self.mem_addr = self.alu.out & self.pc_mask;
                self.pc = inc_pc;
                self.state = State::WaitMem;
            }
            InsnType::MemSw => {
                let addr = self.alu.out & self.pc_mask;
                // A store that lands on the next instruction slot must feed
                // the lookahead, which fetched the stale word.
                if addr == inc_pc {
                    self.next_insn = self.read_reg(dec.rd);
                }
                self.mem_addr = addr;
                self.pc = inc_pc;
                self.state = State::Writeback;
            }
            _ => {
                if self.alu.busy() {
                    self.state = State::WaitAlu;
                } else {
                    if dec.reg_we {
                        self.write_reg(dec.regdst, self.alu.out);
                    }
                    self.pc = inc_pc;
                    self.state = State::Writeback;
                }
            }
        }
    }

    fn alu_operands(&self, dec: &Decoded) -> (u16, u16) {
        match dec.insn_type {
            InsnType::AmiRegReg => (self.read_reg(dec.rd), self.read_reg(dec.rs)),
            InsnType::AmiRegImm => (self.read_reg(dec.rd), dec.imm),
            InsnType::MemLw | InsnType::MemSw => (self.read_reg(dec.rs), dec.imm),
            _ => (0, 0),
        }
    }

    fn read_reg(&self, idx: u16) -> u16 {
        let idx = (idx & 7) as usize;
        if idx == 0 {
            0
        } else {
            self.reg[idx]
        }
    }

    fn write_reg(&mut self, idx: u16, val: u16) {
        let idx = (idx & 7) as usize;
        // r0 ignores writes
        if idx != 0 {
            self.reg[idx] = val;
        }
    }

    fn read_mem(&self, addr: u16) -> u16 {
        self.mem[(addr & self.pc_mask) as usize]
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::parser::AsmParser;
    use crate::symbol::{reset_state, SrcFile};

    /// Generous per-instruction budget; every instruction retires in at most
    /// a handful of states plus the shifter's serial cycles.
    const CYCLES: u64 = 2_000;

    fn boot(src: &'static str) -> RunState {
        reset_state();
        let mut air = AsmParser::new(SrcFile::new("test.s", src), isa::DEFAULT_PC_WIDTH)
            .parse()
            .unwrap();
        air.backpatch().unwrap();
        let mut state = RunState::try_from(&air).unwrap();
        state.run(CYCLES);
        state
    }

    #[test]
    fn movhi_movlo_compose() {
        let state = boot("movhi %r1, $0xAB\nmovlo %r1, $0xCD\nj $0\n");
        assert_eq!(state.reg(1), 0xABCD);
        assert_eq!(state.flags(), Flags::empty());
    }

    #[test]
    fn memory_round_trip() {
        let state = boot(
            "movlo %r1, $7\nmovhi %r2, $0\nsw %r1, $0(%r2)\nlw %r3, $0(%r2)\n\
             j $0\n",
        );
        assert_eq!(state.reg(3), 7);
        assert_eq!(state.mem()[0], 7);
    }

    #[test]
    fn r0_ignores_writes() {
        let state = boot("movlo %r0, $5\nadd %r0, $3\nnot %r0\nj $0\n");
        assert_eq!(state.reg(0), 0);
        assert_eq!(state.regs()[0], 0);
    }

    #[test]
    fn add_flags() {
        // 0x7FFF + 1 overflows signed, no carry
        let state = boot("movhi %r1, $0x7F\nmovlo %r1, $0xFF\nadd %r1, $1\nj $0\n");
        assert_eq!(state.reg(1), 0x8000);
        assert_eq!(state.flags(), Flags::S | Flags::O);
    }

    #[test]
    fn add_carry_wraps_to_zero() {
        // 0xFFFF + 1 carries out and zeroes the result
        let state = boot("movhi %r1, $0xFF\nmovlo %r1, $0xFF\nadd %r1, $1\nj $0\n");
        assert_eq!(state.reg(1), 0);
        assert_eq!(state.flags(), Flags::Z | Flags::C);
    }

    #[test]
    fn sub_borrow() {
        // 1 - 2 borrows and goes negative
        let state = boot("movlo %r1, $1\nsub %r1, $2\nj $0\n");
        assert_eq!(state.reg(1), 0xFFFF);
        assert_eq!(state.flags(), Flags::S | Flags::C);
    }

    #[test]
    fn cmp_sets_flags_without_writeback() {
        let state = boot("movlo %r1, $9\ncmp %r1, $9\nj $0\n");
        assert_eq!(state.reg(1), 9);
        assert_eq!(state.flags(), Flags::Z);
    }

    #[test]
    fn logic_ops_clear_carry_and_overflow() {
        // Leave carry set by a sub, then run an or
        let state = boot("movlo %r1, $1\nsub %r1, $2\nor %r1, $0\nj $0\n");
        assert_eq!(state.flags(), Flags::S);
    }

    #[test]
    fn mov_leaves_flags() {
        let state = boot("cmp %r0, $0\nmovlo %r1, $5\nmov %r2, %r1\nj $0\n");
        assert_eq!(state.reg(2), 5);
        assert_eq!(state.flags(), Flags::Z);
    }

    #[test]
    fn load_does_not_touch_flags() {
        let state = boot("cmp %r0, $0\nlw %r1, $0(%r0)\nj $0\n");
        // The compare's zero flag survives the load's address add
        assert_eq!(state.flags(), Flags::Z);
    }

    #[test]
    fn branch_taken_skips() {
        let state = boot(
            "cmp %r0, $0\nje over\nmovlo %r1, $1\nover: movlo %r2, $2\n\
             j $0\n",
        );
        assert_eq!(state.reg(1), 0);
        assert_eq!(state.reg(2), 2);
    }

    #[test]
    fn branch_untaken_falls_through() {
        let state = boot("cmp %r0, $1\nje over\nmovlo %r1, $1\nover: j $0\n");
        assert_eq!(state.reg(1), 1);
    }

    #[test]
    fn backward_branch_loops() {
        // Count r1 up to 3 with a backward jne
        let state = boot(
            "top: add %r1, $1\ncmp %r1, $3\njne top\nj $0\n",
        );
        assert_eq!(state.reg(1), 3);
    }

    #[test]
    fn jal_links_and_register_branch_returns() {
        let state = boot(
            "jal sub\nmovlo %r2, $9\nj $0\nsub: movlo %r1, $1\nj %r7\n",
        );
        // Link lands on the word after the jal
        assert_eq!(state.reg(7), 1);
        assert_eq!(state.reg(1), 1);
        assert_eq!(state.reg(2), 9);
    }

    #[test]
    fn shifts_serialize_but_compute() {
        let state = boot("movlo %r1, $1\nsll %r1, $4\nmovlo %r2, $0x80\nslr %r2, $3\nj $0\n");
        assert_eq!(state.reg(1), 0x10);
        assert_eq!(state.reg(2), 0x10);
    }

    #[test]
    fn shift_by_register_amount() {
        let state = boot("movlo %r1, $2\nmovlo %r2, $3\nsll %r2, %r1\nj $0\n");
        assert_eq!(state.reg(2), 3 << 2);
    }

    #[test]
    fn shift_leaves_flags() {
        let state = boot("cmp %r0, $0\nmovlo %r1, $1\nsll %r1, $2\nj $0\n");
        assert_eq!(state.flags(), Flags::Z);
    }

    #[test]
    fn store_to_next_slot_forwards() {
        // r1 holds the encoding of `movlo %r4, $9`; storing it over the slot
        // right after the sw must execute the stored word, not the stale nop.
        let state = boot(
            "movhi %r1, $0x5C\nmovlo %r1, $0x09\nsw %r1, $3(%r0)\nnop\nj $0\n",
        );
        assert_eq!(state.mem()[3], 0x5C09);
        assert_eq!(state.reg(4), 9);
    }

    #[test]
    fn reserved_opcode_advances_pc() {
        // Two reserved encodings, then a self-jump to park
        let mut state = RunState::from_words(&[27 << 11, 28 << 11, 0xB800], 6).unwrap();
        state.run(40);
        assert_eq!(state.pc(), 2);
        assert_eq!(state.regs(), [0; 8]);
        assert_eq!(state.flags(), Flags::empty());
    }

    #[test]
    fn pc_wraps_to_width() {
        // Backward jump from address 0 lands at the top of the program space
        let mut state = RunState::from_words(&[0xB8FF], 6).unwrap();
        state.run(6);
        assert_eq!(state.pc(), 63);
    }

    #[test]
    fn program_too_large_for_memory() {
        let words = vec![0u16; 65];
        assert!(RunState::from_words(&words, 6).is_err());
    }

    #[test]
    fn neg_computes_twos_complement() {
        let state = boot("movlo %r1, $5\nneg %r1\nj $0\n");
        assert_eq!(state.reg(1), (-5i16) as u16);
    }

    #[test]
    fn not_computes_complement() {
        let state = boot("movlo %r1, $0xF0\nnot %r1\nj $0\n");
        assert_eq!(state.reg(1), 0xFF0F);
    }

    #[test]
    fn xor_and_and() {
        let state = boot(
            "movlo %r1, $0x0F\nmovlo %r2, $0x3C\nxor %r1, %r2\n\
             movlo %r3, $0x0F\nand %r3, %r2\nj $0\n",
        );
        assert_eq!(state.reg(1), 0x33);
        assert_eq!(state.reg(3), 0x0C);
    }

    #[test]
    fn overflow_definition_grid() {
        // Signed overflow over boundary operand pairs
        let cases: &[(u16, u16)] = &[
            (0x0000, 0x0000),
            (0x0001, 0x7FFF),
            (0x7FFF, 0x7FFF),
            (0x8000, 0x8000),
            (0x8000, 0x7FFF),
            (0xFFFF, 0x0001),
            (0xFFFF, 0x8000),
            (0x4000, 0x4000),
        ];
        let mut alu = Alu::new();
        for &(a, b) in cases {
            alu.start(Opcode::Add, a, b);
            let r = a.wrapping_add(b);
            let expect = (a ^ b) & 0x8000 == 0 && (a ^ r) & 0x8000 != 0;
            assert_eq!(alu.flags.contains(Flags::O), expect, "add {a:#x} {b:#x}");
            assert_eq!(alu.flags.contains(Flags::C), a.checked_add(b).is_none());

            alu.start(Opcode::Sub, a, b);
            let r = a.wrapping_sub(b);
            let expect = (a ^ b) & 0x8000 != 0 && (a ^ r) & 0x8000 != 0;
            assert_eq!(alu.flags.contains(Flags::O), expect, "sub {a:#x} {b:#x}");
            assert_eq!(alu.flags.contains(Flags::C), a.checked_sub(b).is_none());
        }
    }

    #[test]
    fn observable_states_cycle() {
        let mut state = RunState::from_words(&[0x3000], 6).unwrap();
        assert_eq!(state.state(), State::Idle);
        state.step();
        assert_eq!(state.state(), State::Wait);
        state.step();
        assert_eq!(state.state(), State::Ifetch);
        state.step();
        assert_eq!(state.state(), State::Execute);
        state.step();
        assert_eq!(state.state(), State::Writeback);
    }
}

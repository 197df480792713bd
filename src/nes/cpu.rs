use super::{
    FLAG_BREAK, FLAG_CARRY, FLAG_DECIMAL, FLAG_INTERRUPT, FLAG_NEGATIVE, FLAG_OVERFLOW,
    FLAG_UNUSED, FLAG_ZERO, Nes,
};

fn page_crossed(base: u16, addr: u16) -> bool {
    (base & 0xFF00) != (addr & 0xFF00)
}

impl Nes {
    /// Executes one instruction (or burns one DMA-stall cycle) and returns
    /// the CPU cycles consumed. Interrupts are recognized at instruction
    /// boundaries: the IRQ level lines are re-sampled here unless the
    /// previous instruction scheduled a one-instruction delay, then a
    /// pending NMI edge wins over a pending IRQ.
    pub(crate) fn step_cpu(&mut self) -> u32 {
        if self.dma_stall_cycles > 0 {
            self.dma_stall_cycles -= 1;
            self.total_cycles += 1;
            return 1;
        }

        let suppress_irq = self.irq_delay != 0;
        self.irq_delay = 0;

        if !suppress_irq && !self.get_flag(FLAG_INTERRUPT) {
            if self.mapper_irq_line() || self.apu.irq_line() {
                self.pending_irq = true;
            }
        }

        if self.pending_nmi {
            self.pending_nmi = false;
            self.service_nmi();
            self.total_cycles += 7;
            return 7;
        }

        if self.pending_irq && !self.get_flag(FLAG_INTERRUPT) {
            self.pending_irq = false;
            self.service_irq();
            self.total_cycles += 7;
            return 7;
        }

        if self.halted {
            self.total_cycles += 1;
            return 1;
        }

        let opcode = self.fetch_byte();

        // Single-byte transfers and NOP sit across decode groups.
        match opcode {
            0x8A => {
                self.a = self.x;
                self.update_zn(self.a);
                self.total_cycles += 2;
                return 2;
            }
            0x9A => {
                self.sp = self.x;
                self.total_cycles += 2;
                return 2;
            }
            0xAA => {
                self.x = self.a;
                self.update_zn(self.x);
                self.total_cycles += 2;
                return 2;
            }
            0xBA => {
                self.x = self.sp;
                self.update_zn(self.x);
                self.total_cycles += 2;
                return 2;
            }
            0xCA => {
                self.x = self.x.wrapping_sub(1);
                self.update_zn(self.x);
                self.total_cycles += 2;
                return 2;
            }
            0xEA => {
                self.total_cycles += 2;
                return 2;
            }
            _ => {}
        }

        // Two-byte unofficial NOPs used by test ROMs for timing.
        if matches!(opcode, 0x80 | 0x82 | 0x89 | 0xC2 | 0xE2) {
            self.fetch_byte();
            self.total_cycles += 2;
            return 2;
        }

        // Single-byte unofficial NOPs.
        if matches!(opcode, 0x1A | 0x3A | 0x5A | 0x7A | 0xDA | 0xFA) {
            self.total_cycles += 2;
            return 2;
        }

        // KIL: the CPU wedges until reset.
        if matches!(
            opcode,
            0x02 | 0x12 | 0x22 | 0x32 | 0x42 | 0x52 | 0x62 | 0x72 | 0x92 | 0xB2 | 0xD2 | 0xF2
        ) {
            self.halted = true;
            self.total_cycles += 2;
            return 2;
        }

        if let Some(cycles) = self.exec_unofficial(opcode) {
            self.total_cycles += cycles as u64;
            return cycles;
        }

        let cc = opcode & 0x03;
        let aaa = opcode >> 5;
        let bbb = (opcode >> 2) & 0x07;

        let cycles = match cc {
            0x01 => self.exec_group1(aaa, bbb),
            0x02 => self.exec_group2(aaa, bbb),
            0x03 => 2,
            _ => self.exec_group0(opcode),
        };

        self.total_cycles += cycles as u64;
        cycles
    }

    /// The ALU column (cc == 01): ORA AND EOR ADC STA LDA CMP SBC across the
    /// eight addressing rows.
    fn exec_group1(&mut self, aaa: u8, bbb: u8) -> u32 {
        let is_store = aaa == 4;

        if bbb == 2 {
            if is_store {
                return 2;
            }
            let value = self.fetch_byte();
            self.exec_group1_alu(aaa, value);
            return 2;
        }

        let (addr, crossed, cycles) = match bbb {
            0 => (self.addr_indx(), false, 6),
            1 => (self.addr_zp(), false, 3),
            3 => (self.addr_abs(), false, 4),
            4 => {
                let (addr, crossed) = self.addr_indy();
                (addr, crossed, 5)
            }
            5 => (self.addr_zpx(), false, 4),
            6 => {
                let (addr, crossed) = self.addr_absy();
                (addr, crossed, 4)
            }
            _ => {
                let (addr, crossed) = self.addr_absx();
                (addr, crossed, 4)
            }
        };

        if is_store {
            self.cpu_write(addr, self.a);
            // Indexed stores always pay the fix-up cycle, crossed or not.
            return match bbb {
                4 => 6,
                6 | 7 => 5,
                _ => cycles,
            };
        }

        let value = self.cpu_read(addr);
        self.exec_group1_alu(aaa, value);
        cycles + crossed as u32
    }

    fn exec_group1_alu(&mut self, aaa: u8, value: u8) {
        match aaa {
            0 => self.ora(value),
            1 => self.and(value),
            2 => self.eor(value),
            3 => self.adc(value),
            5 => {
                self.a = value;
                self.update_zn(self.a);
            }
            6 => self.compare(self.a, value),
            7 => self.sbc(value),
            _ => {}
        }
    }

    fn exec_group2(&mut self, aaa: u8, bbb: u8) -> u32 {
        match aaa {
            0 => self.exec_rmw(bbb, RmwOp::Asl),
            1 => self.exec_rmw(bbb, RmwOp::Rol),
            2 => self.exec_rmw(bbb, RmwOp::Lsr),
            3 => self.exec_rmw(bbb, RmwOp::Ror),
            4 => self.exec_stx(bbb),
            5 => self.exec_ldx(bbb),
            6 => self.exec_rmw(bbb, RmwOp::Dec),
            _ => self.exec_rmw(bbb, RmwOp::Inc),
        }
    }

    fn exec_stx(&mut self, bbb: u8) -> u32 {
        match bbb {
            1 => {
                let addr = self.addr_zp();
                self.cpu_write(addr, self.x);
                3
            }
            3 => {
                let addr = self.addr_abs();
                self.cpu_write(addr, self.x);
                4
            }
            5 => {
                let addr = self.addr_zpy();
                self.cpu_write(addr, self.x);
                4
            }
            _ => 2,
        }
    }

    fn exec_ldx(&mut self, bbb: u8) -> u32 {
        match bbb {
            0 | 2 => {
                self.x = self.fetch_byte();
                self.update_zn(self.x);
                2
            }
            1 => {
                let addr = self.addr_zp();
                self.x = self.cpu_read(addr);
                self.update_zn(self.x);
                3
            }
            3 => {
                let addr = self.addr_abs();
                self.x = self.cpu_read(addr);
                self.update_zn(self.x);
                4
            }
            5 => {
                let addr = self.addr_zpy();
                self.x = self.cpu_read(addr);
                self.update_zn(self.x);
                4
            }
            7 => {
                let (addr, crossed) = self.addr_absy();
                self.x = self.cpu_read(addr);
                self.update_zn(self.x);
                4 + crossed as u32
            }
            _ => 2,
        }
    }

    fn exec_rmw(&mut self, bbb: u8, op: RmwOp) -> u32 {
        if bbb == 2 {
            if matches!(op, RmwOp::Dec | RmwOp::Inc) {
                return 2;
            }
            self.a = self.apply_rmw(op, self.a);
            return 2;
        }

        let (addr, cycles) = match bbb {
            1 => (self.addr_zp(), 5),
            3 => (self.addr_abs(), 6),
            5 => (self.addr_zpx(), 6),
            7 => (self.addr_absx().0, 7),
            _ => return 2,
        };

        let value = self.cpu_read(addr);
        let out = self.apply_rmw(op, value);
        self.cpu_write(addr, out);
        cycles
    }

    fn apply_rmw(&mut self, op: RmwOp, value: u8) -> u8 {
        match op {
            RmwOp::Asl => self.asl(value),
            RmwOp::Rol => self.rol(value),
            RmwOp::Lsr => self.lsr(value),
            RmwOp::Ror => self.ror(value),
            RmwOp::Dec => {
                let out = value.wrapping_sub(1);
                self.update_zn(out);
                out
            }
            RmwOp::Inc => {
                let out = value.wrapping_add(1);
                self.update_zn(out);
                out
            }
        }
    }

    /// Unofficial opcodes: the cc == 11 column plus the unstable $9x/$Bx
    /// store group. Returns None for opcodes that belong to other groups.
    fn exec_unofficial(&mut self, opcode: u8) -> Option<u32> {
        match opcode {
            // SHA (indirect),Y and absolute,Y: store A & X & (high + 1),
            // with the corrupted high byte replacing the target page on a
            // carry into it.
            0x93 => {
                let (addr, crossed) = self.addr_indy();
                let value = self.sha_value(addr);
                let write_addr = self.sha_addr(addr, crossed, value);
                self.cpu_write(write_addr, value);
                return Some(6);
            }
            0x9F => {
                let (addr, crossed) = self.addr_absy();
                let value = self.sha_value(addr);
                let write_addr = self.sha_addr(addr, crossed, value);
                self.cpu_write(write_addr, value);
                return Some(5);
            }
            // TAS / SHS absolute,Y
            0x9B => {
                let (addr, crossed) = self.addr_absy();
                self.sp = self.a & self.x;
                let high = ((addr.wrapping_sub(self.y as u16)) >> 8) as u8;
                let value = self.sp & high.wrapping_add(1);
                let write_addr = self.sha_addr(addr, crossed, value);
                self.cpu_write(write_addr, value);
                return Some(5);
            }
            // SHY absolute,X
            0x9C => {
                let (addr, crossed) = self.addr_absx();
                let high = ((addr.wrapping_sub(self.x as u16)) >> 8) as u8;
                let value = self.y & high.wrapping_add(1);
                let write_addr = self.sha_addr(addr, crossed, value);
                self.cpu_write(write_addr, value);
                return Some(5);
            }
            // SHX absolute,Y
            0x9E => {
                let (addr, crossed) = self.addr_absy();
                let high = ((addr.wrapping_sub(self.y as u16)) >> 8) as u8;
                let value = self.x & high.wrapping_add(1);
                let write_addr = self.sha_addr(addr, crossed, value);
                self.cpu_write(write_addr, value);
                return Some(5);
            }
            // LAS absolute,Y
            0xBB => {
                let (addr, crossed) = self.addr_absy();
                let value = self.cpu_read(addr) & self.sp;
                self.a = value;
                self.x = value;
                self.sp = value;
                self.update_zn(value);
                return Some(4 + crossed as u32);
            }
            _ => {}
        }

        if (opcode & 0x03) != 0x03 {
            return None;
        }

        let aaa = opcode >> 5;
        let bbb = (opcode >> 2) & 0x07;

        if bbb == 2 {
            let imm = self.fetch_byte();
            match aaa {
                // ANC
                0 | 1 => {
                    self.a &= imm;
                    self.update_zn(self.a);
                    self.set_flag(FLAG_CARRY, (self.a & 0x80) != 0);
                    Some(2)
                }
                // ALR / ASR
                2 => {
                    self.a &= imm;
                    self.a = self.lsr(self.a);
                    Some(2)
                }
                // ARR
                3 => {
                    self.a &= imm;
                    let carry_in = if self.get_flag(FLAG_CARRY) { 0x80 } else { 0 };
                    self.a = (self.a >> 1) | carry_in;
                    self.update_zn(self.a);
                    self.set_flag(FLAG_CARRY, (self.a & 0x40) != 0);
                    self.set_flag(
                        FLAG_OVERFLOW,
                        (((self.a >> 6) & 0x01) ^ ((self.a >> 5) & 0x01)) != 0,
                    );
                    Some(2)
                }
                // XAA / ANE (unstable; RP2A03-friendly magic constant)
                4 => {
                    self.a = (self.a | 0xEE) & self.x & imm;
                    self.update_zn(self.a);
                    Some(2)
                }
                // LXA / OAL (unstable)
                5 => {
                    self.a = (self.a | 0xEE) & imm;
                    self.x = self.a;
                    self.update_zn(self.a);
                    Some(2)
                }
                // AXS / SBX
                6 => {
                    let in_ax = self.a & self.x;
                    self.set_flag(FLAG_CARRY, in_ax >= imm);
                    self.x = in_ax.wrapping_sub(imm);
                    self.update_zn(self.x);
                    Some(2)
                }
                // SBC immediate alias ($EB)
                _ => {
                    self.sbc(imm);
                    Some(2)
                }
            }
        } else {
            match aaa {
                // SLO / RLA / SRE / RRA / DCP / ISC
                0 | 1 | 2 | 3 | 6 | 7 => {
                    let (addr, cycles) = match bbb {
                        0 => (self.addr_indx(), 8),
                        1 => (self.addr_zp(), 5),
                        3 => (self.addr_abs(), 6),
                        4 => (self.addr_indy().0, 8),
                        5 => (self.addr_zpx(), 6),
                        6 => (self.addr_absy().0, 7),
                        _ => (self.addr_absx().0, 7),
                    };

                    let op = match aaa {
                        0 => UnofficialRmwOp::Slo,
                        1 => UnofficialRmwOp::Rla,
                        2 => UnofficialRmwOp::Sre,
                        3 => UnofficialRmwOp::Rra,
                        6 => UnofficialRmwOp::Dcp,
                        _ => UnofficialRmwOp::Isc,
                    };
                    self.exec_unofficial_rmw(addr, op);
                    Some(cycles)
                }
                // SAX
                4 => {
                    let (addr, cycles) = match bbb {
                        0 => (self.addr_indx(), 6),
                        1 => (self.addr_zp(), 3),
                        3 => (self.addr_abs(), 4),
                        5 => (self.addr_zpy(), 4),
                        _ => return None,
                    };
                    self.cpu_write(addr, self.a & self.x);
                    Some(cycles)
                }
                // LAX
                5 => {
                    let (addr, cycles) = match bbb {
                        0 => (self.addr_indx(), 6),
                        1 => (self.addr_zp(), 3),
                        3 => (self.addr_abs(), 4),
                        4 => {
                            let (addr, crossed) = self.addr_indy();
                            (addr, 5 + crossed as u32)
                        }
                        5 => (self.addr_zpy(), 4),
                        _ => {
                            let (addr, crossed) = self.addr_absy();
                            (addr, 4 + crossed as u32)
                        }
                    };
                    let value = self.cpu_read(addr);
                    self.a = value;
                    self.x = value;
                    self.update_zn(value);
                    Some(cycles)
                }
                _ => None,
            }
        }
    }

    fn sha_value(&self, addr: u16) -> u8 {
        let high = ((addr.wrapping_sub(self.y as u16)) >> 8) as u8;
        self.a & self.x & high.wrapping_add(1)
    }

    fn sha_addr(&self, addr: u16, crossed: bool, value: u8) -> u16 {
        if crossed {
            ((value as u16) << 8) | (addr & 0x00FF)
        } else {
            addr
        }
    }

    fn exec_unofficial_rmw(&mut self, addr: u16, op: UnofficialRmwOp) {
        let value = self.cpu_read(addr);
        let out = match op {
            UnofficialRmwOp::Slo => {
                let shifted = self.asl(value);
                self.a |= shifted;
                self.update_zn(self.a);
                shifted
            }
            UnofficialRmwOp::Rla => {
                let shifted = self.rol(value);
                self.a &= shifted;
                self.update_zn(self.a);
                shifted
            }
            UnofficialRmwOp::Sre => {
                let shifted = self.lsr(value);
                self.a ^= shifted;
                self.update_zn(self.a);
                shifted
            }
            UnofficialRmwOp::Rra => {
                let shifted = self.ror(value);
                self.adc(shifted);
                shifted
            }
            UnofficialRmwOp::Dcp => {
                let decremented = value.wrapping_sub(1);
                self.compare(self.a, decremented);
                decremented
            }
            UnofficialRmwOp::Isc => {
                let incremented = value.wrapping_add(1);
                self.sbc(incremented);
                incremented
            }
        };
        self.cpu_write(addr, out);
    }

    fn exec_group0(&mut self, opcode: u8) -> u32 {
        match opcode {
            // BRK: padding byte skipped, B set in the pushed copy, I set.
            0x00 => {
                self.pc = self.pc.wrapping_add(1);
                self.push_u16(self.pc);
                self.push(self.p | FLAG_BREAK | FLAG_UNUSED);
                self.set_flag(FLAG_INTERRUPT, true);
                self.pc = self.read_u16(0xFFFE);
                7
            }
            0x08 => {
                self.push(self.p | FLAG_BREAK | FLAG_UNUSED);
                3
            }
            0x10 => self.branch(!self.get_flag(FLAG_NEGATIVE)),
            0x18 => {
                self.set_flag(FLAG_CARRY, false);
                2
            }
            0x20 => {
                let addr = self.fetch_word();
                self.push_u16(self.pc.wrapping_sub(1));
                self.pc = addr;
                6
            }
            0x24 => {
                let addr = self.addr_zp();
                let value = self.cpu_read(addr);
                self.bit(value);
                3
            }
            // PLP: restored I takes effect one instruction late.
            0x28 => {
                self.p = self.pop();
                self.p &= !FLAG_BREAK;
                self.p |= FLAG_UNUSED;
                self.irq_delay = 1;
                4
            }
            0x2C => {
                let addr = self.addr_abs();
                let value = self.cpu_read(addr);
                self.bit(value);
                4
            }
            0x30 => self.branch(self.get_flag(FLAG_NEGATIVE)),
            0x38 => {
                self.set_flag(FLAG_CARRY, true);
                2
            }
            0x40 => {
                self.p = self.pop();
                self.p &= !FLAG_BREAK;
                self.p |= FLAG_UNUSED;
                self.pc = self.pop_u16();
                self.irq_delay = 1;
                6
            }
            0x48 => {
                self.push(self.a);
                3
            }
            0x4C => {
                self.pc = self.fetch_word();
                3
            }
            0x50 => self.branch(!self.get_flag(FLAG_OVERFLOW)),
            0x58 => {
                self.set_flag(FLAG_INTERRUPT, false);
                self.irq_delay = 1;
                2
            }
            0x60 => {
                self.pc = self.pop_u16().wrapping_add(1);
                6
            }
            0x68 => {
                self.a = self.pop();
                self.update_zn(self.a);
                4
            }
            0x6C => {
                let ptr = self.fetch_word();
                self.pc = self.read_u16_bug(ptr);
                5
            }
            0x70 => self.branch(self.get_flag(FLAG_OVERFLOW)),
            0x78 => {
                self.set_flag(FLAG_INTERRUPT, true);
                self.irq_delay = 1;
                2
            }
            0x84 => {
                let addr = self.addr_zp();
                self.cpu_write(addr, self.y);
                3
            }
            0x88 => {
                self.y = self.y.wrapping_sub(1);
                self.update_zn(self.y);
                2
            }
            0x8C => {
                let addr = self.addr_abs();
                self.cpu_write(addr, self.y);
                4
            }
            0x90 => self.branch(!self.get_flag(FLAG_CARRY)),
            0x94 => {
                let addr = self.addr_zpx();
                self.cpu_write(addr, self.y);
                4
            }
            0x98 => {
                self.a = self.y;
                self.update_zn(self.a);
                2
            }
            0xA0 => {
                self.y = self.fetch_byte();
                self.update_zn(self.y);
                2
            }
            0xA4 => {
                let addr = self.addr_zp();
                self.y = self.cpu_read(addr);
                self.update_zn(self.y);
                3
            }
            0xA8 => {
                self.y = self.a;
                self.update_zn(self.y);
                2
            }
            0xAC => {
                let addr = self.addr_abs();
                self.y = self.cpu_read(addr);
                self.update_zn(self.y);
                4
            }
            0xB0 => self.branch(self.get_flag(FLAG_CARRY)),
            0xB4 => {
                let addr = self.addr_zpx();
                self.y = self.cpu_read(addr);
                self.update_zn(self.y);
                4
            }
            0xB8 => {
                self.set_flag(FLAG_OVERFLOW, false);
                2
            }
            0xBC => {
                let (addr, crossed) = self.addr_absx();
                self.y = self.cpu_read(addr);
                self.update_zn(self.y);
                4 + crossed as u32
            }
            0xC0 => {
                let value = self.fetch_byte();
                self.compare(self.y, value);
                2
            }
            0xC4 => {
                let addr = self.addr_zp();
                let value = self.cpu_read(addr);
                self.compare(self.y, value);
                3
            }
            0xC8 => {
                self.y = self.y.wrapping_add(1);
                self.update_zn(self.y);
                2
            }
            0xCC => {
                let addr = self.addr_abs();
                let value = self.cpu_read(addr);
                self.compare(self.y, value);
                4
            }
            0xD0 => self.branch(!self.get_flag(FLAG_ZERO)),
            0xD8 => {
                self.set_flag(FLAG_DECIMAL, false);
                2
            }
            0xE0 => {
                let value = self.fetch_byte();
                self.compare(self.x, value);
                2
            }
            0xE4 => {
                let addr = self.addr_zp();
                let value = self.cpu_read(addr);
                self.compare(self.x, value);
                3
            }
            0xE8 => {
                self.x = self.x.wrapping_add(1);
                self.update_zn(self.x);
                2
            }
            0xEC => {
                let addr = self.addr_abs();
                let value = self.cpu_read(addr);
                self.compare(self.x, value);
                4
            }
            0xF0 => self.branch(self.get_flag(FLAG_ZERO)),
            0xF8 => {
                self.set_flag(FLAG_DECIMAL, true);
                2
            }

            // Unofficial NOP rows.
            0x04 | 0x44 | 0x64 => {
                let addr = self.addr_zp();
                let _ = self.cpu_read(addr);
                3
            }
            0x14 | 0x34 | 0x54 | 0x74 | 0xD4 | 0xF4 => {
                let addr = self.addr_zpx();
                let _ = self.cpu_read(addr);
                4
            }
            0x0C => {
                let addr = self.addr_abs();
                let _ = self.cpu_read(addr);
                4
            }
            0x1C | 0x3C | 0x5C | 0x7C | 0xDC | 0xFC => {
                let (addr, crossed) = self.addr_absx();
                let _ = self.cpu_read(addr);
                4 + crossed as u32
            }

            // Anything left decodes as a 2-cycle NOP rather than an error.
            _ => 2,
        }
    }

    fn addr_zp(&mut self) -> u16 {
        self.fetch_byte() as u16
    }

    fn addr_zpx(&mut self) -> u16 {
        self.fetch_byte().wrapping_add(self.x) as u16
    }

    fn addr_zpy(&mut self) -> u16 {
        self.fetch_byte().wrapping_add(self.y) as u16
    }

    fn addr_abs(&mut self) -> u16 {
        self.fetch_word()
    }

    fn addr_absx(&mut self) -> (u16, bool) {
        let base = self.fetch_word();
        let addr = base.wrapping_add(self.x as u16);
        (addr, page_crossed(base, addr))
    }

    fn addr_absy(&mut self) -> (u16, bool) {
        let base = self.fetch_word();
        let addr = base.wrapping_add(self.y as u16);
        (addr, page_crossed(base, addr))
    }

    fn addr_indx(&mut self) -> u16 {
        let zp = self.fetch_byte().wrapping_add(self.x);
        self.read_zp_u16(zp)
    }

    fn addr_indy(&mut self) -> (u16, bool) {
        let zp = self.fetch_byte();
        let base = self.read_zp_u16(zp);
        let addr = base.wrapping_add(self.y as u16);
        (addr, page_crossed(base, addr))
    }

    fn read_zp_u16(&mut self, addr: u8) -> u16 {
        let lo = self.cpu_read(addr as u16) as u16;
        let hi = self.cpu_read(addr.wrapping_add(1) as u16) as u16;
        (hi << 8) | lo
    }

    /// Branches: 2 cycles untaken, 3 taken, 4 when the target crosses a page.
    fn branch(&mut self, condition: bool) -> u32 {
        let offset = self.fetch_byte() as i8;
        if !condition {
            return 2;
        }
        let old_pc = self.pc;
        self.pc = self.pc.wrapping_add(offset as i16 as u16);
        if page_crossed(old_pc, self.pc) { 4 } else { 3 }
    }

    fn ora(&mut self, value: u8) {
        self.a |= value;
        self.update_zn(self.a);
    }

    fn and(&mut self, value: u8) {
        self.a &= value;
        self.update_zn(self.a);
    }

    fn eor(&mut self, value: u8) {
        self.a ^= value;
        self.update_zn(self.a);
    }

    fn bit(&mut self, value: u8) {
        self.set_flag(FLAG_ZERO, (self.a & value) == 0);
        self.set_flag(FLAG_NEGATIVE, (value & 0x80) != 0);
        self.set_flag(FLAG_OVERFLOW, (value & 0x40) != 0);
    }

    fn compare(&mut self, register: u8, value: u8) {
        let result = register.wrapping_sub(value);
        self.set_flag(FLAG_CARRY, register >= value);
        self.update_zn(result);
    }

    /// Binary-mode add; the 2A03 has no decimal circuitry so D is ignored.
    fn adc(&mut self, value: u8) {
        let carry_in = self.get_flag(FLAG_CARRY) as u16;
        let result = self.a as u16 + value as u16 + carry_in;
        let out = result as u8;

        self.set_flag(FLAG_CARRY, result > 0xFF);
        self.set_flag(FLAG_OVERFLOW, (!(self.a ^ value) & (self.a ^ out) & 0x80) != 0);

        self.a = out;
        self.update_zn(self.a);
    }

    fn sbc(&mut self, value: u8) {
        self.adc(value ^ 0xFF);
    }

    fn asl(&mut self, value: u8) -> u8 {
        self.set_flag(FLAG_CARRY, (value & 0x80) != 0);
        let result = value << 1;
        self.update_zn(result);
        result
    }

    fn lsr(&mut self, value: u8) -> u8 {
        self.set_flag(FLAG_CARRY, (value & 0x01) != 0);
        let result = value >> 1;
        self.update_zn(result);
        result
    }

    fn rol(&mut self, value: u8) -> u8 {
        let carry_in = self.get_flag(FLAG_CARRY) as u8;
        self.set_flag(FLAG_CARRY, (value & 0x80) != 0);
        let result = (value << 1) | carry_in;
        self.update_zn(result);
        result
    }

    fn ror(&mut self, value: u8) -> u8 {
        let carry_in = if self.get_flag(FLAG_CARRY) { 0x80 } else { 0 };
        self.set_flag(FLAG_CARRY, (value & 0x01) != 0);
        let result = (value >> 1) | carry_in;
        self.update_zn(result);
        result
    }
}

#[derive(Clone, Copy)]
enum RmwOp {
    Asl,
    Rol,
    Lsr,
    Ror,
    Dec,
    Inc,
}

#[derive(Clone, Copy)]
enum UnofficialRmwOp {
    Slo,
    Rla,
    Sre,
    Rra,
    Dcp,
    Isc,
}

#[cfg(test)]
mod tests {
    use super::super::mapper::{Mapper, Mirroring};
    use super::*;

    /// Builds a 32 KiB NROM image with `code` at $8000 and the reset vector
    /// pointing there.
    fn build_rom(code: &[u8]) -> Vec<u8> {
        let mut rom = vec![0u8; 16];
        rom[0..4].copy_from_slice(b"NES\x1A");
        rom[4] = 2;
        rom[5] = 1;

        let mut prg = vec![0u8; 2 * 16 * 1024];
        prg[..code.len()].copy_from_slice(code);
        prg[0x7FFC] = 0x00;
        prg[0x7FFD] = 0x80;
        rom.extend_from_slice(&prg);
        rom.extend(std::iter::repeat_n(0u8, 8 * 1024));
        rom
    }

    fn nes_with_code(code: &[u8]) -> Nes {
        let mut nes = Nes::new();
        nes.load_rom_from_bytes(&build_rom(code)).unwrap();
        nes
    }

    /// Fixed mapper whose IRQ line is held high, for interrupt tests.
    struct IrqLineMapper {
        prg: Vec<u8>,
        line: bool,
        acked: bool,
    }

    impl Mapper for IrqLineMapper {
        fn cpu_read(&mut self, addr: u16) -> u8 {
            if addr >= 0x8000 {
                self.prg[(addr as usize - 0x8000) % self.prg.len()]
            } else {
                0xFF
            }
        }
        fn cpu_write(&mut self, _addr: u16, _value: u8) {}
        fn ppu_read(&mut self, _addr: u16) -> u8 {
            0
        }
        fn ppu_write(&mut self, _addr: u16, _value: u8) {}
        fn mirroring(&self) -> Mirroring {
            Mirroring::Horizontal
        }
        fn irq_pending(&self) -> bool {
            self.line
        }
        fn irq_ack(&mut self) {
            self.acked = true;
            self.line = false;
        }
    }

    fn nes_with_irq_line(code: &[u8]) -> Nes {
        let mut prg = vec![0u8; 32 * 1024];
        prg[..code.len()].copy_from_slice(code);
        prg[0x7FFC] = 0x00;
        prg[0x7FFD] = 0x80;
        // IRQ vector at $9000.
        prg[0x7FFE] = 0x00;
        prg[0x7FFF] = 0x90;

        let mut nes = Nes::new();
        nes.mapper = Some(Box::new(IrqLineMapper {
            prg,
            line: true,
            acked: false,
        }));
        nes.power_on();
        nes
    }

    #[test]
    fn power_on_reads_reset_vector_with_documented_state() {
        let mut rom = build_rom(&[0xEA]);
        // Move the reset vector to $1234 (PRG offset $3FFC of the last bank).
        let prg_end = 16 + 2 * 16 * 1024;
        rom[prg_end - 4] = 0x34;
        rom[prg_end - 3] = 0x12;

        let mut nes = Nes::new();
        nes.load_rom_from_bytes(&rom).unwrap();

        assert_eq!(nes.pc, 0x1234);
        assert_eq!(nes.sp, 0xFD);
        assert_eq!(nes.p, 0x24);
        assert_eq!(nes.a, 0);
    }

    #[test]
    fn adc_sets_overflow_on_signed_overflow() {
        // LDA #$50; ADC #$50
        let mut nes = nes_with_code(&[0xA9, 0x50, 0x69, 0x50]);
        nes.step_cpu();
        nes.step_cpu();

        assert_eq!(nes.a, 0xA0);
        assert!(!nes.get_flag(FLAG_CARRY));
        assert!(nes.get_flag(FLAG_OVERFLOW));
        assert!(nes.get_flag(FLAG_NEGATIVE));
        assert!(!nes.get_flag(FLAG_ZERO));
    }

    #[test]
    fn sbc_sets_carry_on_no_borrow() {
        // SEC; LDA #$50; SBC #$10
        let mut nes = nes_with_code(&[0x38, 0xA9, 0x50, 0xE9, 0x10]);
        for _ in 0..3 {
            nes.step_cpu();
        }
        assert_eq!(nes.a, 0x40);
        assert!(nes.get_flag(FLAG_CARRY));
        assert!(!nes.get_flag(FLAG_OVERFLOW));
    }

    #[test]
    fn unofficial_sbc_eb_matches_official() {
        let mut nes = nes_with_code(&[0x38, 0xA9, 0x50, 0xEB, 0x10]);
        for _ in 0..3 {
            nes.step_cpu();
        }
        assert_eq!(nes.a, 0x40);
    }

    #[test]
    fn jmp_indirect_wraps_within_the_pointer_page() {
        // Pointer at $02FF: low byte from $02FF, high byte from $0200.
        let mut nes = nes_with_code(&[0x6C, 0xFF, 0x02]);
        nes.ram[0x02FF] = 0x34;
        nes.ram[0x0200] = 0x12;
        nes.ram[0x0300] = 0x77;

        nes.step_cpu();
        assert_eq!(nes.pc, 0x1234);
    }

    #[test]
    fn branch_cycles_untaken_taken_and_page_cross() {
        // BNE +0x10 with Z set: untaken.
        let mut nes = nes_with_code(&[0xA9, 0x00, 0xD0, 0x10]);
        nes.step_cpu();
        assert_eq!(nes.step_cpu(), 2);

        // BNE +0x10 with Z clear: taken, same page.
        let mut nes = nes_with_code(&[0xA9, 0x01, 0xD0, 0x10]);
        nes.step_cpu();
        assert_eq!(nes.step_cpu(), 3);
        assert_eq!(nes.pc, 0x8014);

        // Taken branch crossing into the next page costs one more.
        let mut code = vec![0xA9, 0x01];
        code.resize(0xF0, 0xEA);
        code.push(0xD0);
        code.push(0x20);
        let mut nes = nes_with_code(&code);
        nes.step_cpu();
        while nes.pc != 0x80F0 {
            nes.step_cpu();
        }
        assert_eq!(nes.step_cpu(), 4);
        assert_eq!(nes.pc, 0x8112);
    }

    #[test]
    fn indexed_reads_pay_for_page_crossing_but_stores_do_not() {
        // LDA $80F0,X with X=0x20 crosses into $8110.
        let mut nes = nes_with_code(&[0xA2, 0x20, 0xBD, 0xF0, 0x80]);
        nes.step_cpu();
        assert_eq!(nes.step_cpu(), 5);

        // Same access without crossing.
        let mut nes = nes_with_code(&[0xA2, 0x01, 0xBD, 0xF0, 0x80]);
        nes.step_cpu();
        assert_eq!(nes.step_cpu(), 4);

        // STA absolute,X is always 5, crossed or not.
        let mut nes = nes_with_code(&[0xA9, 0x55, 0xA2, 0x20, 0x9D, 0xF0, 0x02]);
        nes.step_cpu();
        nes.step_cpu();
        assert_eq!(nes.step_cpu(), 5);
        assert_eq!(nes.ram[0x0310], 0x55);
    }

    #[test]
    fn stack_wraps_within_page_one() {
        let mut nes = nes_with_code(&[0x48, 0x48, 0x48]);
        nes.sp = 0x01;
        nes.a = 0x7E;
        nes.step_cpu();
        nes.step_cpu();
        nes.step_cpu();
        assert_eq!(nes.sp, 0xFE);
        assert_eq!(nes.ram[0x0101], 0x7E);
        assert_eq!(nes.ram[0x0100], 0x7E);
        assert_eq!(nes.ram[0x01FF], 0x7E);
    }

    #[test]
    fn brk_pushes_b_set_and_vectors_through_fffe() {
        let mut rom = build_rom(&[0x00, 0xFF]);
        // IRQ/BRK vector at $9000.
        let prg_end = 16 + 2 * 16 * 1024;
        rom[prg_end - 2] = 0x00;
        rom[prg_end - 1] = 0x90;

        let mut nes = Nes::new();
        nes.load_rom_from_bytes(&rom).unwrap();
        let cycles = nes.step_cpu();

        assert_eq!(cycles, 7);
        assert_eq!(nes.pc, 0x9000);
        assert!(nes.get_flag(FLAG_INTERRUPT));
        // Pushed copy carries B and U; return address skips the pad byte.
        assert_eq!(nes.ram[0x01FB] & (FLAG_BREAK | FLAG_UNUSED), 0x30);
        assert_eq!(nes.ram[0x01FC], 0x02);
        assert_eq!(nes.ram[0x01FD], 0x80);
    }

    #[test]
    fn cli_delays_irq_recognition_by_one_instruction() {
        // CLI; NOP; NOP...
        let mut nes = nes_with_irq_line(&[0x58, 0xEA, 0xEA, 0xEA]);

        nes.step_cpu();
        assert_eq!(nes.pc, 0x8001);
        // The delay lets exactly one instruction run before the IRQ.
        nes.step_cpu();
        assert_eq!(nes.pc, 0x8002);
        let cycles = nes.step_cpu();
        assert_eq!(cycles, 7);
        assert_eq!(nes.pc, 0x9000);
        assert!(nes.get_flag(FLAG_INTERRUPT));
    }

    #[test]
    fn irq_service_acks_the_mapper_line() {
        let mut nes = nes_with_irq_line(&[0x58, 0xEA, 0xEA, 0xEA]);
        for _ in 0..3 {
            nes.step_cpu();
        }
        assert_eq!(nes.pc, 0x9000);
        let mapper = nes.mapper.take().unwrap();
        drop(nes);
        // Downcast-free check: the line was dropped by irq_ack.
        assert!(!mapper.irq_pending());
    }

    #[test]
    fn rti_restores_flags_and_delays_irq() {
        // Set up a fake interrupt frame: P with I clear, return to $8003.
        let mut nes = nes_with_irq_line(&[0x40, 0xEA, 0xEA, 0xEA, 0xEA]);
        nes.pending_irq = false;
        nes.sp = 0xFA;
        nes.ram[0x01FB] = FLAG_UNUSED;
        nes.ram[0x01FC] = 0x03;
        nes.ram[0x01FD] = 0x80;

        assert_eq!(nes.step_cpu(), 6);
        assert_eq!(nes.pc, 0x8003);
        assert!(!nes.get_flag(FLAG_INTERRUPT));
        assert_eq!(nes.irq_delay, 1);

        // One instruction runs, then the held IRQ line is taken.
        nes.step_cpu();
        assert_eq!(nes.pc, 0x8004);
        assert_eq!(nes.step_cpu(), 7);
        assert_eq!(nes.pc, 0x9000);
    }

    #[test]
    fn nmi_wins_over_pending_irq_and_pushes_b_clear() {
        let mut prg = vec![0u8; 32 * 1024];
        prg[0] = 0xEA;
        // NMI vector at $A000, reset at $8000, IRQ at $9000.
        prg[0x7FFA] = 0x00;
        prg[0x7FFB] = 0xA0;
        prg[0x7FFC] = 0x00;
        prg[0x7FFD] = 0x80;
        prg[0x7FFE] = 0x00;
        prg[0x7FFF] = 0x90;

        let mut nes = Nes::new();
        nes.mapper = Some(Box::new(IrqLineMapper {
            prg,
            line: false,
            acked: false,
        }));
        nes.power_on();
        nes.pending_nmi = true;
        nes.pending_irq = true;

        let cycles = nes.step_cpu();
        assert_eq!(cycles, 7);
        assert_eq!(nes.pc, 0xA000);
        assert!(!nes.pending_nmi);
        // B clear in the pushed status copy.
        assert_eq!(nes.ram[0x01FB] & FLAG_BREAK, 0);
    }

    #[test]
    fn dma_stall_consumes_single_cycles_without_executing() {
        let mut nes = nes_with_code(&[0xA9, 0x77]);
        nes.dma_stall_cycles = 3;
        let pc_before = nes.pc;

        for _ in 0..3 {
            assert_eq!(nes.step_cpu(), 1);
            assert_eq!(nes.pc, pc_before);
        }
        nes.step_cpu();
        assert_eq!(nes.a, 0x77);
    }

    #[test]
    fn kil_halts_the_cpu() {
        let mut nes = nes_with_code(&[0x02, 0xA9, 0x55]);
        nes.step_cpu();
        assert!(nes.halted);
        // Halted steps burn one cycle each and never reach the LDA.
        nes.step_cpu();
        nes.step_cpu();
        assert_eq!(nes.a, 0);
    }

    #[test]
    fn rmw_instructions_touch_memory_once_with_result() {
        // INC $10; DEC $10; ASL $10
        let mut nes = nes_with_code(&[0xE6, 0x10, 0xC6, 0x10, 0x06, 0x10]);
        nes.ram[0x10] = 0x41;

        assert_eq!(nes.step_cpu(), 5);
        assert_eq!(nes.ram[0x10], 0x42);
        nes.step_cpu();
        assert_eq!(nes.ram[0x10], 0x41);
        nes.step_cpu();
        assert_eq!(nes.ram[0x10], 0x82);
        assert!(!nes.get_flag(FLAG_CARRY));
        assert!(nes.get_flag(FLAG_NEGATIVE));
    }

    #[test]
    fn lax_loads_a_and_x_together() {
        let mut nes = nes_with_code(&[0xA7, 0x20]);
        nes.ram[0x20] = 0x9C;
        nes.step_cpu();
        assert_eq!(nes.a, 0x9C);
        assert_eq!(nes.x, 0x9C);
        assert!(nes.get_flag(FLAG_NEGATIVE));
    }

    #[test]
    fn sax_stores_a_and_x() {
        let mut nes = nes_with_code(&[0xA9, 0x6C, 0xA2, 0x35, 0x87, 0x40]);
        for _ in 0..3 {
            nes.step_cpu();
        }
        assert_eq!(nes.ram[0x40], 0x6C & 0x35);
    }

    #[test]
    fn dcp_decrements_then_compares() {
        let mut nes = nes_with_code(&[0xA9, 0x41, 0xC7, 0x30]);
        nes.ram[0x30] = 0x42;
        nes.step_cpu();
        nes.step_cpu();
        assert_eq!(nes.ram[0x30], 0x41);
        assert!(nes.get_flag(FLAG_ZERO));
        assert!(nes.get_flag(FLAG_CARRY));
    }
}

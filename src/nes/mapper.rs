use anyhow::Result;

use super::cartridge::Cartridge;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mirroring {
    Horizontal,
    Vertical,
    OneScreenLower,
    OneScreenUpper,
    FourScreen,
}

/// Cartridge-side address translation. `ppu_a12_clock` is fed exactly once
/// per PPU dot with the level of address line A12 for that dot's pattern
/// fetch; `ppu_on_scanline_dot_260` is the synthesized fallback clock for
/// renderers whose sprite fetches are batched rather than dot-stepped.
pub trait Mapper {
    fn cpu_read(&mut self, addr: u16) -> u8;
    fn cpu_write(&mut self, addr: u16, value: u8);
    fn ppu_read(&mut self, addr: u16) -> u8;
    fn ppu_write(&mut self, addr: u16, value: u8);
    fn mirroring(&self) -> Mirroring;
    fn irq_pending(&self) -> bool {
        false
    }
    fn irq_ack(&mut self) {}
    fn ppu_a12_clock(&mut self, _level: bool) {}
    fn ppu_on_scanline_dot_260(&mut self, _rendering: bool) {}
    fn prg_ram(&self) -> Option<&[u8]> {
        None
    }
    fn prg_ram_mut(&mut self) -> Option<&mut [u8]> {
        None
    }
}

pub fn mapper_name(mapper_id: u16) -> &'static str {
    match mapper_id {
        0 => "NROM",
        1 => "MMC1",
        4 => "MMC3",
        _ => "Unsupported",
    }
}

/// Instantiates the mapper requested by the header. Unknown IDs fall back to
/// NROM so the ROM still boots; the substitution is reported once.
pub fn create_mapper(cart: Cartridge) -> Result<Box<dyn Mapper>> {
    let mapper: Box<dyn Mapper> = match cart.mapper_id {
        0 => Box::new(Nrom::new(cart)),
        1 => Box::new(Mmc1::new(cart)),
        4 => Box::new(Mmc3::new(cart)),
        id => {
            eprintln!("mapper {id} is not implemented, substituting NROM (best effort)");
            Box::new(Nrom::new(cart))
        }
    };
    Ok(mapper)
}

fn prg_ram_with_trainer(cart: &Cartridge) -> Vec<u8> {
    let mut ram = vec![0u8; cart.prg_ram_size.max(8 * 1024)];
    if let Some(trainer) = cart.trainer.as_ref() {
        // Trainer payload lands at $7000-$71FF, i.e. offset $1000 into PRG-RAM.
        if ram.len() >= 0x1200 {
            ram[0x1000..0x1200].copy_from_slice(trainer);
        }
    }
    ram
}

struct Nrom {
    prg_rom: Vec<u8>,
    chr: Vec<u8>,
    chr_is_ram: bool,
    prg_ram: Vec<u8>,
    mirroring: Mirroring,
}

impl Nrom {
    fn new(cart: Cartridge) -> Self {
        let prg_ram = prg_ram_with_trainer(&cart);
        Self {
            prg_rom: cart.prg_rom,
            chr: cart.chr_data,
            chr_is_ram: cart.chr_is_ram,
            prg_ram,
            mirroring: cart.mirroring,
        }
    }
}

impl Mapper for Nrom {
    fn cpu_read(&mut self, addr: u16) -> u8 {
        match addr {
            0x6000..=0x7FFF => {
                let idx = (addr as usize - 0x6000) % self.prg_ram.len();
                self.prg_ram[idx]
            }
            0x8000..=0xFFFF => {
                // NROM-128 mirrors its single 16 KiB bank into both halves.
                let mut idx = addr as usize - 0x8000;
                if self.prg_rom.len() == 0x4000 {
                    idx &= 0x3FFF;
                }
                self.prg_rom[idx % self.prg_rom.len()]
            }
            _ => 0xFF,
        }
    }

    fn cpu_write(&mut self, addr: u16, value: u8) {
        if (0x6000..=0x7FFF).contains(&addr) {
            let idx = (addr as usize - 0x6000) % self.prg_ram.len();
            self.prg_ram[idx] = value;
        }
    }

    fn ppu_read(&mut self, addr: u16) -> u8 {
        self.chr[(addr as usize) % self.chr.len()]
    }

    fn ppu_write(&mut self, addr: u16, value: u8) {
        if self.chr_is_ram {
            let idx = (addr as usize) % self.chr.len();
            self.chr[idx] = value;
        }
    }

    fn mirroring(&self) -> Mirroring {
        self.mirroring
    }

    fn prg_ram(&self) -> Option<&[u8]> {
        Some(&self.prg_ram)
    }

    fn prg_ram_mut(&mut self) -> Option<&mut [u8]> {
        Some(&mut self.prg_ram)
    }
}

struct Mmc1 {
    prg_rom: Vec<u8>,
    chr: Vec<u8>,
    chr_is_ram: bool,
    prg_ram: Vec<u8>,

    // 5-bit serial load register, filled LSB-first over five writes.
    load_reg: u8,
    load_count: u8,

    control: u8,
    chr_bank0: u8,
    chr_bank1: u8,
    prg_bank: u8,
    prg_ram_write_enabled: bool,
}

impl Mmc1 {
    fn new(cart: Cartridge) -> Self {
        let prg_ram = prg_ram_with_trainer(&cart);
        Self {
            prg_rom: cart.prg_rom,
            chr: cart.chr_data,
            chr_is_ram: cart.chr_is_ram,
            prg_ram,
            load_reg: 0,
            load_count: 0,
            // PRG mode 3 at power-on: last 16 KiB bank fixed at $C000.
            control: 0x0C,
            chr_bank0: 0,
            chr_bank1: 0,
            prg_bank: 0,
            prg_ram_write_enabled: true,
        }
    }

    fn prg_bank_count_16k(&self) -> usize {
        (self.prg_rom.len() / 0x4000).max(1)
    }

    fn read_prg_bank(&self, bank: usize, offset: usize) -> u8 {
        let bank = bank % self.prg_bank_count_16k();
        let idx = bank * 0x4000 + (offset & 0x3FFF);
        self.prg_rom[idx % self.prg_rom.len()]
    }

    fn write_load_register(&mut self, addr: u16, value: u8) {
        if (value & 0x80) != 0 {
            self.load_reg = 0;
            self.load_count = 0;
            self.control |= 0x0C;
            return;
        }

        self.load_reg = (self.load_reg >> 1) | ((value & 0x01) << 4);
        self.load_count += 1;
        if self.load_count < 5 {
            return;
        }

        let data = self.load_reg & 0x1F;
        match (addr - 0x8000) >> 13 {
            0 => self.control = data,
            1 => self.chr_bank0 = data,
            2 => self.chr_bank1 = data,
            _ => {
                self.prg_bank = data & 0x0F;
                self.prg_ram_write_enabled = (data & 0x10) == 0;
            }
        }
        self.load_reg = 0;
        self.load_count = 0;
    }

    fn chr_index(&self, addr: u16) -> usize {
        let addr = addr as usize;
        let idx = if (self.control & 0x10) == 0 {
            // 8 KiB mode: chr_bank0 selects an even 4 KiB pair.
            (self.chr_bank0 as usize & 0x1E) * 0x1000 + addr
        } else if addr < 0x1000 {
            (self.chr_bank0 as usize & 0x1F) * 0x1000 + addr
        } else {
            (self.chr_bank1 as usize & 0x1F) * 0x1000 + (addr - 0x1000)
        };
        idx % self.chr.len()
    }
}

impl Mapper for Mmc1 {
    fn cpu_read(&mut self, addr: u16) -> u8 {
        match addr {
            0x6000..=0x7FFF => {
                let idx = (addr as usize - 0x6000) % self.prg_ram.len();
                self.prg_ram[idx]
            }
            0x8000..=0xFFFF => {
                let mode = (self.control >> 2) & 0x03;
                let bank = (self.prg_bank & 0x0F) as usize;
                let offset = addr as usize & 0x3FFF;
                match mode {
                    0 | 1 => {
                        // 32 KiB switching ignores the low bank bit.
                        let bank32 = bank & !1;
                        if addr < 0xC000 {
                            self.read_prg_bank(bank32, offset)
                        } else {
                            self.read_prg_bank(bank32 + 1, offset)
                        }
                    }
                    2 => {
                        if addr < 0xC000 {
                            self.read_prg_bank(0, offset)
                        } else {
                            self.read_prg_bank(bank, offset)
                        }
                    }
                    _ => {
                        if addr < 0xC000 {
                            self.read_prg_bank(bank, offset)
                        } else {
                            self.read_prg_bank(self.prg_bank_count_16k() - 1, offset)
                        }
                    }
                }
            }
            _ => 0xFF,
        }
    }

    fn cpu_write(&mut self, addr: u16, value: u8) {
        match addr {
            0x6000..=0x7FFF => {
                if self.prg_ram_write_enabled {
                    let idx = (addr as usize - 0x6000) % self.prg_ram.len();
                    self.prg_ram[idx] = value;
                }
            }
            0x8000..=0xFFFF => self.write_load_register(addr, value),
            _ => {}
        }
    }

    fn ppu_read(&mut self, addr: u16) -> u8 {
        self.chr[self.chr_index(addr)]
    }

    fn ppu_write(&mut self, addr: u16, value: u8) {
        if self.chr_is_ram {
            let idx = self.chr_index(addr);
            self.chr[idx] = value;
        }
    }

    fn mirroring(&self) -> Mirroring {
        match self.control & 0x03 {
            0 => Mirroring::OneScreenLower,
            1 => Mirroring::OneScreenUpper,
            2 => Mirroring::Vertical,
            _ => Mirroring::Horizontal,
        }
    }

    fn prg_ram(&self) -> Option<&[u8]> {
        Some(&self.prg_ram)
    }

    fn prg_ram_mut(&mut self) -> Option<&mut [u8]> {
        Some(&mut self.prg_ram)
    }
}

struct Mmc3 {
    prg_rom: Vec<u8>,
    chr: Vec<u8>,
    chr_is_ram: bool,
    prg_ram: Vec<u8>,
    mirroring: Mirroring,
    four_screen: bool,

    bank_select: u8,
    bank_regs: [u8; 8],
    prg_ram_protect: u8,

    irq_latch: u8,
    irq_counter: u8,
    irq_reload: bool,
    irq_enabled: bool,
    irq_flag: bool,

    // A12 rise filter: an edge counts only after >= 8 consecutive low dots.
    prev_a12: bool,
    a12_low_dots: u8,
    saw_rise_this_line: bool,
}

impl Mmc3 {
    fn new(cart: Cartridge) -> Self {
        let prg_ram = prg_ram_with_trainer(&cart);
        Self {
            prg_rom: cart.prg_rom,
            chr: cart.chr_data,
            chr_is_ram: cart.chr_is_ram,
            prg_ram,
            mirroring: cart.mirroring,
            four_screen: cart.four_screen,
            bank_select: 0,
            bank_regs: [0; 8],
            prg_ram_protect: 0x80,
            irq_latch: 0,
            irq_counter: 0,
            irq_reload: false,
            irq_enabled: false,
            irq_flag: false,
            prev_a12: false,
            a12_low_dots: 0,
            saw_rise_this_line: false,
        }
    }

    fn prg_bank_count_8k(&self) -> usize {
        (self.prg_rom.len() / 0x2000).max(1)
    }

    fn chr_bank_count_1k(&self) -> usize {
        (self.chr.len() / 0x0400).max(1)
    }

    fn read_prg_bank_8k(&self, bank: usize, offset: usize) -> u8 {
        let bank = bank % self.prg_bank_count_8k();
        let idx = bank * 0x2000 + (offset & 0x1FFF);
        self.prg_rom[idx % self.prg_rom.len()]
    }

    fn chr_index(&self, addr: u16) -> usize {
        let r0 = self.bank_regs[0] & 0xFE;
        let r1 = self.bank_regs[1] & 0xFE;

        // 1 KiB slot -> bank register, for both CHR A12 inversion modes.
        let banks = if (self.bank_select & 0x80) == 0 {
            [
                r0,
                r0.wrapping_add(1),
                r1,
                r1.wrapping_add(1),
                self.bank_regs[2],
                self.bank_regs[3],
                self.bank_regs[4],
                self.bank_regs[5],
            ]
        } else {
            [
                self.bank_regs[2],
                self.bank_regs[3],
                self.bank_regs[4],
                self.bank_regs[5],
                r0,
                r0.wrapping_add(1),
                r1,
                r1.wrapping_add(1),
            ]
        };

        let slot = (addr as usize & 0x1FFF) / 0x0400;
        let bank = banks[slot] as usize % self.chr_bank_count_1k();
        (bank * 0x0400 + (addr as usize & 0x03FF)) % self.chr.len()
    }

    fn clock_irq_counter(&mut self) {
        if self.irq_reload {
            self.irq_counter = self.irq_latch;
            self.irq_reload = false;
        } else if self.irq_counter == 0 {
            self.irq_counter = self.irq_latch;
        } else {
            self.irq_counter -= 1;
        }

        if self.irq_counter == 0 && self.irq_enabled {
            self.irq_flag = true;
        }
    }
}

impl Mapper for Mmc3 {
    fn cpu_read(&mut self, addr: u16) -> u8 {
        match addr {
            0x6000..=0x7FFF => {
                // Reads pass even when writes are protected.
                let idx = (addr as usize - 0x6000) % self.prg_ram.len();
                self.prg_ram[idx]
            }
            0x8000..=0xFFFF => {
                let prg_mode = (self.bank_select & 0x40) != 0;
                let last = self.prg_bank_count_8k() - 1;
                let second_last = self.prg_bank_count_8k().saturating_sub(2);
                let offset = addr as usize & 0x1FFF;

                let bank = match addr {
                    0x8000..=0x9FFF => {
                        if prg_mode {
                            second_last
                        } else {
                            self.bank_regs[6] as usize
                        }
                    }
                    0xA000..=0xBFFF => self.bank_regs[7] as usize,
                    0xC000..=0xDFFF => {
                        if prg_mode {
                            self.bank_regs[6] as usize
                        } else {
                            second_last
                        }
                    }
                    _ => last,
                };
                self.read_prg_bank_8k(bank, offset)
            }
            _ => 0xFF,
        }
    }

    fn cpu_write(&mut self, addr: u16, value: u8) {
        match addr {
            0x6000..=0x7FFF => {
                let enabled = (self.prg_ram_protect & 0x80) != 0;
                let write_protected = (self.prg_ram_protect & 0x40) != 0;
                if enabled && !write_protected {
                    let idx = (addr as usize - 0x6000) % self.prg_ram.len();
                    self.prg_ram[idx] = value;
                }
            }
            0x8000..=0x9FFF => {
                if (addr & 1) == 0 {
                    self.bank_select = value;
                } else {
                    let target = (self.bank_select & 0x07) as usize;
                    self.bank_regs[target] = if target <= 1 { value & 0xFE } else { value };
                }
            }
            0xA000..=0xBFFF => {
                if (addr & 1) == 0 {
                    if !self.four_screen {
                        self.mirroring = if (value & 1) == 0 {
                            Mirroring::Vertical
                        } else {
                            Mirroring::Horizontal
                        };
                    }
                } else {
                    self.prg_ram_protect = value;
                }
            }
            0xC000..=0xDFFF => {
                if (addr & 1) == 0 {
                    self.irq_latch = value;
                } else {
                    self.irq_reload = true;
                }
            }
            0xE000..=0xFFFF => {
                if (addr & 1) == 0 {
                    self.irq_enabled = false;
                    self.irq_flag = false;
                } else {
                    self.irq_enabled = true;
                }
            }
            _ => {}
        }
    }

    fn ppu_read(&mut self, addr: u16) -> u8 {
        self.chr[self.chr_index(addr)]
    }

    fn ppu_write(&mut self, addr: u16, value: u8) {
        if self.chr_is_ram {
            let idx = self.chr_index(addr);
            self.chr[idx] = value;
        }
    }

    fn mirroring(&self) -> Mirroring {
        if self.four_screen {
            Mirroring::FourScreen
        } else {
            self.mirroring
        }
    }

    fn irq_pending(&self) -> bool {
        self.irq_flag
    }

    fn irq_ack(&mut self) {
        self.irq_flag = false;
    }

    fn ppu_a12_clock(&mut self, level: bool) {
        if !level {
            self.a12_low_dots = self.a12_low_dots.saturating_add(1);
        } else {
            if !self.prev_a12 && self.a12_low_dots >= 8 {
                self.clock_irq_counter();
                self.saw_rise_this_line = true;
            }
            self.a12_low_dots = 0;
        }
        self.prev_a12 = level;
    }

    fn ppu_on_scanline_dot_260(&mut self, rendering: bool) {
        if !rendering {
            self.saw_rise_this_line = false;
            return;
        }
        // Synthesize one clock per visible line when no filtered edge landed.
        if !self.saw_rise_this_line {
            self.clock_irq_counter();
        }
        self.saw_rise_this_line = false;
    }

    fn prg_ram(&self) -> Option<&[u8]> {
        Some(&self.prg_ram)
    }

    fn prg_ram_mut(&mut self) -> Option<&mut [u8]> {
        Some(&mut self.prg_ram)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn patterned_banks(total_size: usize, bank_size: usize) -> Vec<u8> {
        let mut data = vec![0u8; total_size];
        for (bank, chunk) in data.chunks_mut(bank_size).enumerate() {
            chunk.fill((bank as u8).wrapping_add(1));
        }
        data
    }

    fn make_cart(
        mapper_id: u16,
        prg_rom: Vec<u8>,
        chr_data: Vec<u8>,
        chr_is_ram: bool,
    ) -> Cartridge {
        Cartridge {
            mapper_id,
            mirroring: Mirroring::Horizontal,
            four_screen: false,
            battery_backed: false,
            prg_rom,
            chr_data,
            chr_is_ram,
            prg_ram_size: 8 * 1024,
            trainer: None,
            sav_path: None,
        }
    }

    fn feed_mmc1_bits(mapper: &mut Mmc1, addr: u16, value: u8) {
        for i in 0..5 {
            mapper.cpu_write(addr, (value >> i) & 1);
        }
    }

    #[test]
    fn nrom_mirrors_16k_prg_into_both_halves() {
        let mut prg = patterned_banks(0x4000, 0x1000);
        prg[0x0000] = 0x42;
        prg[0x3FFF] = 0x24;
        let mut mapper = Nrom::new(make_cart(0, prg, vec![0; 0x2000], false));

        assert_eq!(mapper.cpu_read(0x8000), 0x42);
        assert_eq!(mapper.cpu_read(0xC000), 0x42);
        assert_eq!(mapper.cpu_read(0xBFFF), 0x24);
        assert_eq!(mapper.cpu_read(0xFFFF), 0x24);
    }

    #[test]
    fn nrom_chr_ram_is_writable_only_when_present() {
        let prg = patterned_banks(0x8000, 0x4000);
        let mut ram_mapper = Nrom::new(make_cart(0, prg.clone(), vec![0; 0x2000], true));
        ram_mapper.ppu_write(0x0123, 0xAB);
        assert_eq!(ram_mapper.ppu_read(0x0123), 0xAB);

        let mut rom_mapper = Nrom::new(make_cart(0, prg, vec![0x11; 0x2000], false));
        rom_mapper.ppu_write(0x0123, 0xAB);
        assert_eq!(rom_mapper.ppu_read(0x0123), 0x11);
    }

    #[test]
    fn mmc1_after_reset_fixes_last_bank_at_c000() {
        let prg = patterned_banks(4 * 0x4000, 0x4000);
        let chr = patterned_banks(0x2000, 0x1000);
        let mut mapper = Mmc1::new(make_cart(1, prg, chr, false));

        assert_eq!(mapper.cpu_read(0xC000), 4);
        assert_eq!(mapper.cpu_read(0xFFFF), 4);
    }

    #[test]
    fn mmc1_five_zero_writes_commit_control_zero() {
        let prg = patterned_banks(4 * 0x4000, 0x4000);
        let chr = patterned_banks(0x2000, 0x1000);
        let mut mapper = Mmc1::new(make_cart(1, prg, chr, false));

        for _ in 0..5 {
            mapper.cpu_write(0x8000, 0x00);
        }

        assert_eq!(mapper.control, 0x00);
        assert_eq!(mapper.mirroring(), Mirroring::OneScreenLower);
    }

    #[test]
    fn mmc1_reset_bit_aborts_sequence_and_forces_prg_mode_3() {
        let prg = patterned_banks(4 * 0x4000, 0x4000);
        let chr = patterned_banks(0x2000, 0x1000);
        let mut mapper = Mmc1::new(make_cart(1, prg, chr, false));

        for _ in 0..5 {
            mapper.cpu_write(0x8000, 0x00);
        }
        assert_eq!(mapper.control & 0x0C, 0x00);

        mapper.cpu_write(0x8000, 0x01);
        mapper.cpu_write(0x8000, 0x80);
        assert_eq!(mapper.load_count, 0);
        assert_eq!(mapper.control & 0x0C, 0x0C);
    }

    #[test]
    fn mmc1_serial_write_programs_prg_bank() {
        let prg = patterned_banks(4 * 0x4000, 0x4000);
        let chr = patterned_banks(0x2000, 0x1000);
        let mut mapper = Mmc1::new(make_cart(1, prg, chr, false));

        feed_mmc1_bits(&mut mapper, 0xE000, 0x01);
        assert_eq!(mapper.cpu_read(0x8000), 2);
        assert_eq!(mapper.cpu_read(0xC000), 4);
    }

    #[test]
    fn mmc1_prg_ram_write_enable_bit() {
        let prg = patterned_banks(2 * 0x4000, 0x4000);
        let chr = patterned_banks(0x2000, 0x1000);
        let mut mapper = Mmc1::new(make_cart(1, prg, chr, false));

        mapper.cpu_write(0x6000, 0xAA);
        assert_eq!(mapper.cpu_read(0x6000), 0xAA);

        // PRG bank register bit 4 set disables PRG-RAM writes.
        feed_mmc1_bits(&mut mapper, 0xE000, 0x10);
        mapper.cpu_write(0x6000, 0x55);
        assert_eq!(mapper.cpu_read(0x6000), 0xAA);

        feed_mmc1_bits(&mut mapper, 0xE000, 0x00);
        mapper.cpu_write(0x6000, 0x55);
        assert_eq!(mapper.cpu_read(0x6000), 0x55);
    }

    #[test]
    fn mmc3_prg_modes_swap_switchable_and_fixed_windows() {
        let prg = patterned_banks(8 * 0x2000, 0x2000);
        let chr = patterned_banks(8 * 0x0400, 0x0400);
        let mut mapper = Mmc3::new(make_cart(4, prg, chr, false));

        mapper.cpu_write(0x8000, 0x06);
        mapper.cpu_write(0x8001, 0x02);
        mapper.cpu_write(0x8000, 0x07);
        mapper.cpu_write(0x8001, 0x04);

        assert_eq!(mapper.cpu_read(0x8000), 3);
        assert_eq!(mapper.cpu_read(0xA000), 5);
        assert_eq!(mapper.cpu_read(0xC000), 7);
        assert_eq!(mapper.cpu_read(0xE000), 8);

        mapper.cpu_write(0x8000, 0x46);
        assert_eq!(mapper.cpu_read(0x8000), 7);
        assert_eq!(mapper.cpu_read(0xC000), 3);
    }

    #[test]
    fn mmc3_a12_rise_needs_eight_low_dots() {
        let prg = patterned_banks(4 * 0x2000, 0x2000);
        let chr = patterned_banks(8 * 0x0400, 0x0400);
        let mut mapper = Mmc3::new(make_cart(4, prg, chr, false));

        mapper.cpu_write(0xC000, 0x01);
        mapper.cpu_write(0xC001, 0x00);
        mapper.cpu_write(0xE001, 0x00);

        // Too few low dots: the rise is filtered out.
        for _ in 0..4 {
            mapper.ppu_a12_clock(false);
        }
        mapper.ppu_a12_clock(true);
        assert!(!mapper.irq_pending());

        // First accepted rise reloads the counter (latch = 1).
        for _ in 0..8 {
            mapper.ppu_a12_clock(false);
        }
        mapper.ppu_a12_clock(true);
        assert!(!mapper.irq_pending());

        // Second accepted rise decrements 1 -> 0 and latches the IRQ.
        for _ in 0..8 {
            mapper.ppu_a12_clock(false);
        }
        mapper.ppu_a12_clock(true);
        assert!(mapper.irq_pending());

        mapper.irq_ack();
        assert!(!mapper.irq_pending());
    }

    #[test]
    fn mmc3_counter_reaches_zero_on_the_expected_scanline() {
        let prg = patterned_banks(4 * 0x2000, 0x2000);
        let chr = patterned_banks(8 * 0x0400, 0x0400);
        let mut mapper = Mmc3::new(make_cart(4, prg, chr, false));

        mapper.cpu_write(0xC000, 0x05);
        mapper.cpu_write(0xC001, 0x00);
        mapper.cpu_write(0xE001, 0x00);

        // One filtered rise per scanline: reload on line 0, then count down.
        for line in 0..6 {
            for _ in 0..16 {
                mapper.ppu_a12_clock(false);
            }
            mapper.ppu_a12_clock(true);
            if line < 5 {
                assert!(!mapper.irq_pending(), "IRQ asserted early on line {line}");
            }
        }
        assert!(mapper.irq_pending());
    }

    #[test]
    fn mmc3_dot_260_synthesizes_clock_only_without_real_rise() {
        let prg = patterned_banks(4 * 0x2000, 0x2000);
        let chr = patterned_banks(8 * 0x0400, 0x0400);
        let mut mapper = Mmc3::new(make_cart(4, prg, chr, false));

        mapper.cpu_write(0xC000, 0x01);
        mapper.cpu_write(0xC001, 0x00);
        mapper.cpu_write(0xE001, 0x00);

        // No pattern activity: dot 260 supplies the scanline clocks.
        mapper.ppu_on_scanline_dot_260(true);
        assert!(!mapper.irq_pending());
        mapper.ppu_on_scanline_dot_260(true);
        assert!(mapper.irq_pending());
        mapper.irq_ack();

        // A real filtered rise suppresses the synthetic clock for its line.
        let counter_before = mapper.irq_counter;
        for _ in 0..8 {
            mapper.ppu_a12_clock(false);
        }
        mapper.ppu_a12_clock(true);
        let counter_after_rise = mapper.irq_counter;
        mapper.ppu_on_scanline_dot_260(true);
        assert_eq!(mapper.irq_counter, counter_after_rise);
        assert_ne!(counter_before, counter_after_rise);
    }

    #[test]
    fn mmc3_rendering_disabled_resets_line_flag_without_clocking() {
        let prg = patterned_banks(4 * 0x2000, 0x2000);
        let chr = patterned_banks(8 * 0x0400, 0x0400);
        let mut mapper = Mmc3::new(make_cart(4, prg, chr, false));

        mapper.cpu_write(0xC000, 0x01);
        mapper.cpu_write(0xC001, 0x00);
        mapper.cpu_write(0xE001, 0x00);

        for _ in 0..100 {
            mapper.ppu_on_scanline_dot_260(false);
        }
        assert!(!mapper.irq_pending());
    }

    #[test]
    fn mmc3_prg_ram_protect_bits() {
        let prg = patterned_banks(4 * 0x2000, 0x2000);
        let chr = patterned_banks(8 * 0x0400, 0x0400);
        let mut mapper = Mmc3::new(make_cart(4, prg, chr, false));

        mapper.cpu_write(0xA001, 0x80);
        mapper.cpu_write(0x6000, 0xAA);
        assert_eq!(mapper.cpu_read(0x6000), 0xAA);

        mapper.cpu_write(0xA001, 0xC0);
        mapper.cpu_write(0x6000, 0x55);
        assert_eq!(mapper.cpu_read(0x6000), 0xAA);
    }

    #[test]
    fn trainer_lands_at_prg_ram_offset_0x1000() {
        let prg = patterned_banks(0x8000, 0x4000);
        let mut cart = make_cart(0, prg, vec![0; 0x2000], true);
        cart.trainer = Some(vec![0x5A; 512]);
        let mapper = Nrom::new(cart);
        let ram = mapper.prg_ram().unwrap();
        assert_eq!(ram[0x0FFF], 0x00);
        assert_eq!(ram[0x1000], 0x5A);
        assert_eq!(ram[0x11FF], 0x5A);
        assert_eq!(ram[0x1200], 0x00);
    }
}

use super::mapper::{Mapper, Mirroring};
use super::palette::NES_PALETTE;

pub const FRAME_WIDTH: usize = 256;
pub const FRAME_HEIGHT: usize = 240;

const CTRL_NMI_ENABLE: u8 = 0x80;
const CTRL_SPRITE_SIZE_16: u8 = 0x20;
const CTRL_BG_TABLE: u8 = 0x10;
const CTRL_SPRITE_TABLE: u8 = 0x08;
const CTRL_VRAM_INC_32: u8 = 0x04;

const MASK_SHOW_BG_LEFT: u8 = 0x02;
const MASK_SHOW_SPRITE_LEFT: u8 = 0x04;
const MASK_SHOW_BG: u8 = 0x08;
const MASK_SHOW_SPRITES: u8 = 0x10;

const STATUS_SPRITE_OVERFLOW: u8 = 0x20;
const STATUS_SPRITE_ZERO_HIT: u8 = 0x40;
const STATUS_VBLANK: u8 = 0x80;

const PRE_RENDER_LINE: u16 = 261;

pub struct Ppu {
    ctrl: u8,
    mask: u8,
    status: u8,

    oam_addr: u8,
    pub(crate) oam: [u8; 256],

    pub(crate) ticks: u64,

    vram: [u8; 4096],
    palette_ram: [u8; 32],

    // Loopy scroll state: v/t are yyy NN YYYYY XXXXX, plus 3-bit fine X and
    // the shared $2005/$2006 write latch.
    v: u16,
    t: u16,
    fine_x: u8,
    addr_latch: bool,
    read_buffer: u8,
    open_bus: u8,

    pub(crate) scanline: u16,
    pub(crate) dot: u16,
    frame_odd: bool,
    pub(crate) nmi_occurred: bool,

    nt_latch: u8,
    at_latch: u8,
    pat_lo_latch: u8,
    pat_hi_latch: u8,
    bg_shift_pattern_lo: u16,
    bg_shift_pattern_hi: u16,
    bg_shift_attr_lo: u16,
    bg_shift_attr_hi: u16,

    // Scanline-batched sprite state: dot 65 selects into secondary OAM,
    // dot 257 fetches patterns into the line buffers below. The parallel
    // index array remembers each entry's primary OAM slot for sprite 0.
    sec_oam: [u8; 32],
    sec_oam_index: [u8; 8],
    sec_count: usize,

    line_bg_color: [u8; FRAME_WIDTH],
    line_bg_raw: [u8; FRAME_WIDTH],
    line_sp_color: [u8; FRAME_WIDTH],
    line_sp_raw: [u8; FRAME_WIDTH],
    line_sp_behind: [bool; FRAME_WIDTH],
    line_sp0_mask: [bool; FRAME_WIDTH],

    // A12 level of this dot's CHR pattern fetch, sampled once per dot.
    a12_this_dot: bool,

    frame_buffer: [u32; FRAME_WIDTH * FRAME_HEIGHT],
}

impl Ppu {
    pub fn new() -> Self {
        Self {
            ctrl: 0,
            mask: 0,
            status: 0,
            oam_addr: 0,
            oam: [0xFF; 256],
            ticks: 0,
            vram: [0; 4096],
            palette_ram: [0x0F; 32],
            v: 0,
            t: 0,
            fine_x: 0,
            addr_latch: false,
            read_buffer: 0,
            open_bus: 0,
            scanline: PRE_RENDER_LINE,
            dot: 0,
            frame_odd: false,
            nmi_occurred: false,
            nt_latch: 0,
            at_latch: 0,
            pat_lo_latch: 0,
            pat_hi_latch: 0,
            bg_shift_pattern_lo: 0,
            bg_shift_pattern_hi: 0,
            bg_shift_attr_lo: 0,
            bg_shift_attr_hi: 0,
            sec_oam: [0xFF; 32],
            sec_oam_index: [0xFF; 8],
            sec_count: 0,
            line_bg_color: [0; FRAME_WIDTH],
            line_bg_raw: [0; FRAME_WIDTH],
            line_sp_color: [0; FRAME_WIDTH],
            line_sp_raw: [0; FRAME_WIDTH],
            line_sp_behind: [false; FRAME_WIDTH],
            line_sp0_mask: [false; FRAME_WIDTH],
            a12_this_dot: false,
            frame_buffer: [0; FRAME_WIDTH * FRAME_HEIGHT],
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }

    pub fn frame_buffer(&self) -> &[u32; FRAME_WIDTH * FRAME_HEIGHT] {
        &self.frame_buffer
    }

    pub fn nmi_output(&self) -> bool {
        (self.ctrl & CTRL_NMI_ENABLE) != 0
    }

    fn rendering_enabled(&self) -> bool {
        (self.mask & (MASK_SHOW_BG | MASK_SHOW_SPRITES)) != 0
    }

    pub fn cpu_read_register(&mut self, addr: u16, mapper: &mut dyn Mapper) -> u8 {
        let value = match addr {
            0x2002 => {
                let value = (self.status & 0xE0) | (self.open_bus & 0x1F);
                self.status &= !STATUS_VBLANK;
                self.nmi_occurred = false;
                self.addr_latch = false;
                value
            }
            0x2004 => self.oam[self.oam_addr as usize],
            0x2007 => {
                let ppu_addr = self.v & 0x3FFF;
                let value = self.ppu_read(ppu_addr, mapper);
                let result = if ppu_addr >= 0x3F00 {
                    // Palette reads are live; the buffer refills from the
                    // nametable underneath the palette window.
                    self.read_buffer = self.ppu_read((ppu_addr - 0x1000) & 0x3FFF, mapper);
                    value
                } else {
                    let buffered = self.read_buffer;
                    self.read_buffer = value;
                    buffered
                };
                self.increment_vram_addr_cpu_access();
                result
            }
            _ => self.open_bus,
        };
        self.open_bus = value;
        value
    }

    pub fn cpu_write_register(&mut self, addr: u16, value: u8, mapper: &mut dyn Mapper) {
        self.open_bus = value;
        match addr {
            0x2000 => {
                self.ctrl = value;
                self.t = (self.t & !0x0C00) | (((value as u16) & 0x03) << 10);
            }
            0x2001 => {
                self.mask = value;
            }
            0x2003 => {
                self.oam_addr = value;
            }
            0x2004 => {
                self.oam[self.oam_addr as usize] = value;
                self.oam_addr = self.oam_addr.wrapping_add(1);
            }
            0x2005 => {
                if !self.addr_latch {
                    self.fine_x = value & 0x07;
                    self.t = (self.t & !0x001F) | (((value as u16) >> 3) & 0x001F);
                } else {
                    self.t = (self.t & !0x03E0) | ((((value as u16) >> 3) & 0x001F) << 5);
                    self.t = (self.t & !0x7000) | (((value as u16) & 0x07) << 12);
                }
                self.addr_latch = !self.addr_latch;
            }
            0x2006 => {
                if !self.addr_latch {
                    self.t = (self.t & 0x00FF) | (((value as u16) & 0x3F) << 8);
                } else {
                    self.t = (self.t & 0x7F00) | (value as u16);
                    self.v = self.t;
                }
                self.addr_latch = !self.addr_latch;
            }
            0x2007 => {
                let ppu_addr = self.v & 0x3FFF;
                self.ppu_write(ppu_addr, value, mapper);
                self.increment_vram_addr_cpu_access();
            }
            _ => {}
        }
    }

    /// OAM DMA target: 256 bytes land at (OAMADDR + i) mod 256, leaving
    /// OAMADDR itself unchanged.
    pub fn oam_dma(&mut self, bytes: &[u8; 256]) {
        let start = self.oam_addr;
        for (i, byte) in bytes.iter().enumerate() {
            self.oam[start.wrapping_add(i as u8) as usize] = *byte;
        }
    }

    pub fn tick(&mut self, mapper: &mut dyn Mapper) {
        self.ticks = self.ticks.wrapping_add(1);
        self.a12_this_dot = false;

        let visible_line = self.scanline < FRAME_HEIGHT as u16;
        let pre_render = self.scanline == PRE_RENDER_LINE;
        let rendering = self.rendering_enabled();

        // Background pixel sample for this dot, into the line buffers.
        if visible_line && (1..=256).contains(&self.dot) {
            let x = (self.dot - 1) as usize;
            let mut bg_pix = 0u8;
            let mut bg_pal = 0u8;

            if (self.mask & MASK_SHOW_BG) != 0 {
                let bit = 15 - self.fine_x;
                let lo = ((self.bg_shift_pattern_lo >> bit) & 1) as u8;
                let hi = ((self.bg_shift_pattern_hi >> bit) & 1) as u8;
                bg_pix = (hi << 1) | lo;

                let alo = ((self.bg_shift_attr_lo >> bit) & 1) as u8;
                let ahi = ((self.bg_shift_attr_hi >> bit) & 1) as u8;
                bg_pal = (ahi << 1) | alo;

                self.bg_shift_pattern_lo <<= 1;
                self.bg_shift_pattern_hi <<= 1;
                self.bg_shift_attr_lo <<= 1;
                self.bg_shift_attr_hi <<= 1;

                if x < 8 && (self.mask & MASK_SHOW_BG_LEFT) == 0 {
                    bg_pix = 0;
                }
            }

            self.line_bg_raw[x] = bg_pix;
            self.line_bg_color[x] = if bg_pix == 0 {
                self.universal_index()
            } else {
                self.palette_ram[((bg_pal << 2) | bg_pix) as usize] & 0x3F
            };
        }

        // Tile 0 shifter reload; coarse X is not incremented here.
        if rendering && self.dot == 1 {
            self.load_background_shifters();
        }

        let fetch_window = rendering
            && ((1..=256).contains(&self.dot) || (321..=340).contains(&self.dot))
            && (visible_line || pre_render);

        if fetch_window {
            let fine_y = (self.v >> 12) & 0x07;
            let pat_base = if (self.ctrl & CTRL_BG_TABLE) != 0 {
                0x1000
            } else {
                0x0000
            };

            match self.dot % 8 {
                1 => {
                    self.nt_latch = self.ppu_read(0x2000 | (self.v & 0x0FFF), mapper);
                }
                3 => {
                    let addr = 0x23C0
                        | (self.v & 0x0C00)
                        | ((self.v >> 4) & 0x0038)
                        | ((self.v >> 2) & 0x0007);
                    let attr = self.ppu_read(addr, mapper);
                    let shift = ((self.v >> 4) & 0x04) | (self.v & 0x02);
                    self.at_latch = (attr >> shift) & 0x03;
                }
                5 => {
                    let addr = pat_base + (self.nt_latch as u16) * 16 + fine_y;
                    self.pat_lo_latch = self.ppu_read(addr, mapper);
                    if self.dot <= 256 {
                        self.a12_this_dot |= (addr & 0x1000) != 0;
                    }
                }
                7 => {
                    let addr = pat_base + (self.nt_latch as u16) * 16 + fine_y + 8;
                    self.pat_hi_latch = self.ppu_read(addr, mapper);
                    if self.dot <= 256 {
                        self.a12_this_dot |= (addr & 0x1000) != 0;
                    }
                }
                0 => {
                    self.load_background_shifters();
                    self.increment_coarse_x();
                }
                _ => {}
            }
        }

        if visible_line && self.dot == 260 {
            mapper.ppu_on_scanline_dot_260(rendering);
        }

        if visible_line {
            if self.dot == 65 {
                self.evaluate_sprites(rendering);
            }
            if self.dot == 257 {
                self.render_sprites_for_line(mapper);
            }
            if rendering && self.dot == 256 {
                self.increment_y();
            }
        }

        // Horizontal copy runs on every rendering scanline, pre-render included.
        if rendering && self.dot == 257 {
            self.copy_horizontal_bits();
        }

        if pre_render && rendering {
            if (280..=304).contains(&self.dot) {
                self.copy_vertical_bits();
            }
            // NTSC odd-frame skip: drop dot 340 and land directly on (0, 0).
            if self.frame_odd && self.dot == 339 {
                mapper.ppu_a12_clock(false);
                self.dot = 0;
                self.end_scanline();
                self.scanline = 0;
                self.frame_odd = false;
                self.start_scanline();
                return;
            }
        }

        self.dot += 1;

        if self.scanline == 241 && self.dot == 1 {
            self.status |= STATUS_VBLANK;
            self.nmi_occurred = true;
        }

        if self.dot > 340 {
            self.dot = 0;
            self.end_scanline();
            self.scanline += 1;
            if self.scanline > PRE_RENDER_LINE {
                self.scanline = 0;
                self.frame_odd = !self.frame_odd;
            }
            self.start_scanline();
        }

        mapper.ppu_a12_clock(self.a12_this_dot);
    }

    fn start_scanline(&mut self) {
        if self.scanline == PRE_RENDER_LINE {
            self.status &= !(STATUS_VBLANK | STATUS_SPRITE_ZERO_HIT | STATUS_SPRITE_OVERFLOW);
            self.nmi_occurred = false;
        }
        self.line_bg_color = [0; FRAME_WIDTH];
        self.line_bg_raw = [0; FRAME_WIDTH];
        self.line_sp_color = [0; FRAME_WIDTH];
        self.line_sp_raw = [0; FRAME_WIDTH];
        self.line_sp_behind = [false; FRAME_WIDTH];
        self.line_sp0_mask = [false; FRAME_WIDTH];
    }

    /// Composites the finished line into the framebuffer and evaluates the
    /// sprite-0 hit rule on the raw pixel planes.
    fn end_scanline(&mut self) {
        if self.scanline >= FRAME_HEIGHT as u16 {
            return;
        }

        let show_bg = (self.mask & MASK_SHOW_BG) != 0;
        let show_sp = (self.mask & MASK_SHOW_SPRITES) != 0;
        let bg_left = (self.mask & MASK_SHOW_BG_LEFT) != 0;
        let sp_left = (self.mask & MASK_SHOW_SPRITE_LEFT) != 0;

        for x in 0..FRAME_WIDTH {
            let bg_masked = !bg_left && x < 8;
            let sp_masked = !sp_left && x < 8;

            let bg_color = if show_bg && !bg_masked {
                self.line_bg_color[x]
            } else {
                self.universal_index()
            };
            let bg_raw = if show_bg && !bg_masked {
                self.line_bg_raw[x]
            } else {
                0
            };
            let sp_color = if show_sp && !sp_masked {
                self.line_sp_color[x]
            } else {
                0
            };
            let sp_raw = if show_sp && !sp_masked {
                self.line_sp_raw[x]
            } else {
                0
            };

            let mut out = bg_color;
            if sp_raw != 0 && (!self.line_sp_behind[x] || bg_raw == 0) {
                out = sp_color;
            }
            self.frame_buffer[self.scanline as usize * FRAME_WIDTH + x] =
                NES_PALETTE[(out & 0x3F) as usize];

            if self.line_sp0_mask[x] && bg_raw != 0 && sp_raw != 0 && x < 255 && show_bg && show_sp
            {
                self.status |= STATUS_SPRITE_ZERO_HIT;
            }
        }
    }

    fn universal_index(&self) -> u8 {
        self.palette_ram[0] & 0x3F
    }

    fn load_background_shifters(&mut self) {
        self.bg_shift_pattern_lo = (self.bg_shift_pattern_lo & 0xFF00) | self.pat_lo_latch as u16;
        self.bg_shift_pattern_hi = (self.bg_shift_pattern_hi & 0xFF00) | self.pat_hi_latch as u16;

        let attr_lo = if (self.at_latch & 0x01) != 0 { 0xFF } else { 0x00 };
        let attr_hi = if (self.at_latch & 0x02) != 0 { 0xFF } else { 0x00 };
        self.bg_shift_attr_lo = (self.bg_shift_attr_lo & 0xFF00) | attr_lo;
        self.bg_shift_attr_hi = (self.bg_shift_attr_hi & 0xFF00) | attr_hi;
    }

    fn increment_coarse_x(&mut self) {
        if (self.v & 0x001F) == 31 {
            self.v &= !0x001F;
            self.v ^= 0x0400;
        } else {
            self.v += 1;
        }
    }

    fn increment_y(&mut self) {
        if (self.v & 0x7000) != 0x7000 {
            self.v += 0x1000;
            return;
        }

        self.v &= !0x7000;
        let mut y = (self.v & 0x03E0) >> 5;
        if y == 29 {
            y = 0;
            self.v ^= 0x0800;
        } else if y == 31 {
            // Coarse Y past the attribute rows wraps without a nametable flip.
            y = 0;
        } else {
            y += 1;
        }
        self.v = (self.v & !0x03E0) | (y << 5);
    }

    fn copy_horizontal_bits(&mut self) {
        self.v = (self.v & !0x041F) | (self.t & 0x041F);
    }

    fn copy_vertical_bits(&mut self) {
        self.v = (self.v & !0x7BE0) | (self.t & 0x7BE0);
    }

    fn sprite_height(&self) -> i16 {
        if (self.ctrl & CTRL_SPRITE_SIZE_16) != 0 { 16 } else { 8 }
    }

    /// Dot 65: select up to 8 sprites covering this scanline into secondary
    /// OAM; more than 8 in range sets the overflow flag (simplified rule).
    fn evaluate_sprites(&mut self, rendering: bool) {
        self.sec_count = 0;
        self.sec_oam = [0xFF; 32];
        self.sec_oam_index = [0xFF; 8];
        if !rendering {
            return;
        }

        let height = self.sprite_height();
        let scanline = self.scanline as i16;
        let mut found = 0usize;

        for i in 0..64 {
            let top = self.oam[i * 4] as i16 + 1;
            if scanline < top || scanline >= top + height {
                continue;
            }
            if found < 8 {
                self.sec_oam[found * 4..found * 4 + 4]
                    .copy_from_slice(&self.oam[i * 4..i * 4 + 4]);
                self.sec_oam_index[found] = i as u8;
                found += 1;
            } else {
                self.status |= STATUS_SPRITE_OVERFLOW;
                break;
            }
        }
        self.sec_count = found;
    }

    /// Dot 257: fetch pattern rows for the selected sprites and splat them
    /// into the sprite line buffers, first-sprite-wins per pixel.
    fn render_sprites_for_line(&mut self, mapper: &mut dyn Mapper) {
        if (self.mask & MASK_SHOW_SPRITES) == 0 {
            return;
        }

        let height = self.sprite_height();
        let scanline = self.scanline as i16;

        for s in 0..self.sec_count {
            let y = self.sec_oam[s * 4] as i16;
            let tile = self.sec_oam[s * 4 + 1];
            let attr = self.sec_oam[s * 4 + 2];
            let x = self.sec_oam[s * 4 + 3] as usize;

            let row = scanline - (y + 1);
            if row < 0 || row >= height {
                continue;
            }

            let flip_h = (attr & 0x40) != 0;
            let flip_v = (attr & 0x80) != 0;
            let behind = (attr & 0x20) != 0;
            let pal = attr & 0x03;

            let addr = self.sprite_pattern_addr(tile, row, flip_v, height);
            let p0 = self.ppu_read(addr, mapper);
            let p1 = self.ppu_read(addr + 8, mapper);

            for c in 0..8usize {
                let bit = if flip_h { c } else { 7 - c };
                let sx = x + c;
                if sx >= FRAME_WIDTH {
                    continue;
                }

                let lo = (p0 >> bit) & 1;
                let hi = (p1 >> bit) & 1;
                let pix = (hi << 1) | lo;
                if pix == 0 || self.line_sp_raw[sx] != 0 {
                    continue;
                }

                self.line_sp_raw[sx] = pix;
                self.line_sp_color[sx] = self.palette_ram[(0x10 | (pal << 2) | pix) as usize] & 0x3F;
                self.line_sp_behind[sx] = behind;
                if self.sec_oam_index[s] == 0 {
                    self.line_sp0_mask[sx] = true;
                }
            }
        }
    }

    fn sprite_pattern_addr(&self, tile: u8, row: i16, flip_v: bool, height: i16) -> u16 {
        if height == 16 {
            // 8x16 sprites: tile bit 0 picks the pattern table, the top tile
            // index is forced even.
            let table = if (tile & 0x01) != 0 { 0x1000 } else { 0x0000 };
            let top_tile = (tile & 0xFE) as u16;
            let r = if flip_v { 15 - row } else { row } as u16;
            if r < 8 {
                table + top_tile * 16 + r
            } else {
                table + (top_tile + 1) * 16 + (r - 8)
            }
        } else {
            let table = if (self.ctrl & CTRL_SPRITE_TABLE) != 0 {
                0x1000
            } else {
                0x0000
            };
            let r = if flip_v { 7 - row } else { row } as u16;
            table + (tile as u16) * 16 + r
        }
    }

    fn increment_vram_addr_cpu_access(&mut self) {
        // $2007 access during rendering steps v through the rendering paths.
        if self.rendering_enabled()
            && (self.scanline < FRAME_HEIGHT as u16 || self.scanline == PRE_RENDER_LINE)
        {
            self.increment_coarse_x();
            self.increment_y();
        } else if (self.ctrl & CTRL_VRAM_INC_32) != 0 {
            self.v = self.v.wrapping_add(32) & 0x7FFF;
        } else {
            self.v = self.v.wrapping_add(1) & 0x7FFF;
        }
    }

    fn ppu_read(&mut self, addr: u16, mapper: &mut dyn Mapper) -> u8 {
        let addr = addr & 0x3FFF;
        match addr {
            0x0000..=0x1FFF => mapper.ppu_read(addr),
            0x2000..=0x3EFF => {
                let index = mirrored_vram_index(addr, mapper.mirroring());
                self.vram[index]
            }
            _ => {
                let index = palette_index(addr);
                self.palette_ram[index] & 0x3F
            }
        }
    }

    fn ppu_write(&mut self, addr: u16, value: u8, mapper: &mut dyn Mapper) {
        let addr = addr & 0x3FFF;
        match addr {
            0x0000..=0x1FFF => mapper.ppu_write(addr, value),
            0x2000..=0x3EFF => {
                let index = mirrored_vram_index(addr, mapper.mirroring());
                self.vram[index] = value;
            }
            _ => {
                let index = palette_index(addr);
                self.palette_ram[index] = value;
            }
        }
    }
}

/// Palette index with $3F10/$14/$18/$1C mirrored onto $3F00/$04/$08/$0C.
fn palette_index(addr: u16) -> usize {
    let mut index = ((addr - 0x3F00) & 0x1F) as usize;
    if index >= 16 && (index & 0x03) == 0 {
        index -= 16;
    }
    index
}

/// Maps a $2000-$3EFF nametable address into the 4 KiB VRAM window.
fn mirrored_vram_index(addr: u16, mirroring: Mirroring) -> usize {
    let nt = ((addr - 0x2000) & 0x0FFF) as usize;
    let table = nt / 0x400;
    let offset = nt % 0x400;

    let mapped_table = match mirroring {
        Mirroring::Horizontal => {
            if table < 2 {
                0
            } else {
                1
            }
        }
        Mirroring::Vertical => table & 1,
        Mirroring::OneScreenLower => 0,
        Mirroring::OneScreenUpper => 1,
        Mirroring::FourScreen => table,
    };

    mapped_table * 0x400 + offset
}

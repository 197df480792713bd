use anyhow::{Context, Result, anyhow, bail};
use std::{fs, path::Path, path::PathBuf};

use super::mapper::Mirroring;

/// Parsed iNES / NES 2.0 image, ready to hand to `create_mapper`.
#[derive(Debug, Clone)]
pub struct Cartridge {
    pub mapper_id: u16,
    pub mirroring: Mirroring,
    pub four_screen: bool,
    pub battery_backed: bool,
    pub prg_rom: Vec<u8>,
    pub chr_data: Vec<u8>,
    pub chr_is_ram: bool,
    pub prg_ram_size: usize,
    pub trainer: Option<Vec<u8>>,
    pub sav_path: Option<PathBuf>,
}

/// NES 2.0 RAM size exponent: 0 means absent, otherwise 64 << (e - 1) bytes.
fn nes2_ram_size(exponent: u8) -> usize {
    if exponent == 0 { 0 } else { 64usize << (exponent - 1) }
}

impl Cartridge {
    pub fn from_file(path: &Path) -> Result<Self> {
        let bytes =
            fs::read(path).with_context(|| format!("failed to read ROM: {}", path.display()))?;
        let mut cart = Self::from_bytes(&bytes)?;
        cart.sav_path = Some(path.with_extension("sav"));
        Ok(cart)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < 16 {
            bail!("ROM is too small to contain an iNES header");
        }
        if &bytes[0..4] != b"NES\x1A" {
            bail!("invalid iNES header magic, expected NES<EOF>");
        }

        let prg_banks = bytes[4] as usize;
        let chr_banks = bytes[5] as usize;
        let flags6 = bytes[6];
        let flags7 = bytes[7];
        let is_nes2 = (flags7 & 0x0C) == 0x08;

        let mapper_id = ((flags6 as u16) >> 4) | ((flags7 as u16) & 0xF0);
        let four_screen = (flags6 & 0x08) != 0;
        let mirroring = if four_screen {
            Mirroring::FourScreen
        } else if (flags6 & 0x01) != 0 {
            Mirroring::Vertical
        } else {
            Mirroring::Horizontal
        };
        let trainer_present = (flags6 & 0x04) != 0;

        let (prg_ram_size, prg_nvram_size, chr_ram_size) = if is_nes2 {
            let prg_ram = nes2_ram_size(bytes[10] & 0x0F);
            let prg_nvram = nes2_ram_size(bytes[10] >> 4);
            let chr_ram = if chr_banks == 0 {
                let size = nes2_ram_size(bytes[11] & 0x0F);
                if size == 0 { 8 * 1024 } else { size }
            } else {
                0
            };
            (prg_ram, prg_nvram, chr_ram)
        } else {
            let prg_ram_units = if bytes[8] == 0 { 1 } else { bytes[8] as usize };
            let nvram = if (flags6 & 0x02) != 0 { 8 * 1024 } else { 0 };
            let chr_ram = if chr_banks == 0 { 8 * 1024 } else { 0 };
            (prg_ram_units * 8 * 1024, nvram, chr_ram)
        };

        let battery_backed = if is_nes2 {
            prg_nvram_size > 0
        } else {
            (flags6 & 0x02) != 0
        };

        let mut cursor = 16usize;
        let trainer = if trainer_present {
            if bytes.len() < cursor + 512 {
                bail!("ROM truncated: trainer block ends early");
            }
            let block = bytes[cursor..cursor + 512].to_vec();
            cursor += 512;
            Some(block)
        } else {
            None
        };

        let prg_rom_size = prg_banks.max(1) * 16 * 1024;
        if bytes.len() < cursor + prg_rom_size {
            bail!(
                "ROM truncated: expected {} PRG bytes but file ended early",
                prg_rom_size
            );
        }
        let prg_rom = bytes[cursor..cursor + prg_rom_size].to_vec();
        cursor += prg_rom_size;

        let chr_rom_size = chr_banks * 8 * 1024;
        let (chr_data, chr_is_ram) = if chr_rom_size == 0 {
            (vec![0; chr_ram_size.max(8 * 1024)], true)
        } else {
            if bytes.len() < cursor + chr_rom_size {
                bail!(
                    "ROM truncated: expected {} CHR bytes but file ended early",
                    chr_rom_size
                );
            }
            (bytes[cursor..cursor + chr_rom_size].to_vec(), false)
        };

        if prg_rom.is_empty() {
            return Err(anyhow!("invalid PRG ROM: empty payload"));
        }

        Ok(Self {
            mapper_id,
            mirroring,
            four_screen,
            battery_backed,
            prg_rom,
            chr_data,
            chr_is_ram,
            prg_ram_size: prg_ram_size.max(prg_nvram_size),
            trainer,
            sav_path: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_rom(prg_banks: u8, chr_banks: u8, flags6: u8, flags7: u8) -> Vec<u8> {
        let mut rom = vec![0u8; 16];
        rom[0..4].copy_from_slice(b"NES\x1A");
        rom[4] = prg_banks;
        rom[5] = chr_banks;
        rom[6] = flags6;
        rom[7] = flags7;
        if (flags6 & 0x04) != 0 {
            rom.extend(std::iter::repeat_n(0xAAu8, 512));
        }
        rom.extend(std::iter::repeat_n(0x11u8, prg_banks as usize * 16 * 1024));
        rom.extend(std::iter::repeat_n(0x22u8, chr_banks as usize * 8 * 1024));
        rom
    }

    #[test]
    fn rejects_bad_magic_and_short_files() {
        assert!(Cartridge::from_bytes(&[0u8; 4]).is_err());

        let mut rom = build_rom(1, 1, 0, 0);
        rom[0] = b'X';
        assert!(Cartridge::from_bytes(&rom).is_err());
    }

    #[test]
    fn rejects_truncated_prg_and_chr() {
        let rom = build_rom(2, 1, 0, 0);
        assert!(Cartridge::from_bytes(&rom[..16 + 0x4000]).is_err());

        let full = build_rom(1, 1, 0, 0);
        assert!(Cartridge::from_bytes(&full[..full.len() - 1]).is_err());
    }

    #[test]
    fn parses_mapper_id_mirroring_and_battery() {
        let cart = Cartridge::from_bytes(&build_rom(1, 1, 0x13, 0x40)).unwrap();
        assert_eq!(cart.mapper_id, 0x41);
        assert_eq!(cart.mirroring, Mirroring::Vertical);
        assert!(cart.battery_backed);
        assert_eq!(cart.prg_rom.len(), 16 * 1024);
        assert_eq!(cart.chr_data.len(), 8 * 1024);
        assert!(!cart.chr_is_ram);
    }

    #[test]
    fn four_screen_bit_wins_over_mirroring_bit() {
        let cart = Cartridge::from_bytes(&build_rom(1, 1, 0x09, 0)).unwrap();
        assert!(cart.four_screen);
        assert_eq!(cart.mirroring, Mirroring::FourScreen);
    }

    #[test]
    fn chr_ram_allocated_when_no_chr_banks() {
        let cart = Cartridge::from_bytes(&build_rom(1, 0, 0, 0)).unwrap();
        assert!(cart.chr_is_ram);
        assert_eq!(cart.chr_data.len(), 8 * 1024);
    }

    #[test]
    fn trainer_block_is_captured() {
        let cart = Cartridge::from_bytes(&build_rom(1, 1, 0x04, 0)).unwrap();
        let trainer = cart.trainer.expect("trainer present");
        assert_eq!(trainer.len(), 512);
        assert!(trainer.iter().all(|&b| b == 0xAA));
        assert_eq!(cart.prg_rom[0], 0x11);
    }

    #[test]
    fn nes2_ram_exponents_size_prg_ram_and_nvram() {
        // PRG-RAM exponent 7 -> 4 KiB, NVRAM exponent 8 -> 8 KiB.
        let mut rom = build_rom(1, 1, 0x02, 0x08);
        rom[10] = 0x87;
        let cart = Cartridge::from_bytes(&rom).unwrap();
        assert_eq!(cart.prg_ram_size, 8 * 1024);
        assert!(cart.battery_backed);

        let mut no_nvram = build_rom(1, 1, 0x02, 0x08);
        no_nvram[10] = 0x07;
        let cart = Cartridge::from_bytes(&no_nvram).unwrap();
        assert_eq!(cart.prg_ram_size, 4 * 1024);
        assert!(!cart.battery_backed);
    }

    #[test]
    fn nes2_chr_ram_exponent_sizes_chr() {
        let mut rom = build_rom(1, 0, 0, 0x08);
        rom[11] = 0x08; // 64 << 7 = 8 KiB
        let cart = Cartridge::from_bytes(&rom).unwrap();
        assert!(cart.chr_is_ram);
        assert_eq!(cart.chr_data.len(), 8 * 1024);
    }

    #[test]
    fn ines_prg_ram_defaults_to_8k() {
        let cart = Cartridge::from_bytes(&build_rom(1, 1, 0, 0)).unwrap();
        assert_eq!(cart.prg_ram_size, 8 * 1024);
    }
}

// NTSC master palette, ARGB8888.
pub(crate) const NES_PALETTE: [u32; 64] = [
    0xFF66_6666, 0xFF00_2A88, 0xFF14_12A7, 0xFF3B_00A4, 0xFF5C_007E, 0xFF6E_0040, 0xFF6C_0700,
    0xFF56_1D00, 0xFF33_3500, 0xFF0B_4800, 0xFF00_5200, 0xFF00_4F08, 0xFF00_404D, 0xFF00_0000,
    0xFF00_0000, 0xFF00_0000, 0xFFAD_ADAD, 0xFF15_5FD9, 0xFF42_40FF, 0xFF75_27FE, 0xFFA0_1ACC,
    0xFFB7_1E7B, 0xFFB5_3120, 0xFF99_4E00, 0xFF6B_6D00, 0xFF38_8700, 0xFF0E_9300, 0xFF00_8F32,
    0xFF00_7C8D, 0xFF00_0000, 0xFF00_0000, 0xFF00_0000, 0xFFFF_FFFF, 0xFF64_B0FF, 0xFF92_90FF,
    0xFFC6_76FF, 0xFFF3_6CFF, 0xFFFF_6EBC, 0xFFFF_7D6A, 0xFFEA_9E22, 0xFFBC_BE00, 0xFF88_D800,
    0xFF5C_E430, 0xFF45_E082, 0xFF48_CDDE, 0xFF4F_4F4F, 0xFF00_0000, 0xFF00_0000, 0xFFFF_FFFF,
    0xFFC0_E0FF, 0xFFD3_D2FF, 0xFFE8_C8FF, 0xFFFB_C2FF, 0xFFFF_C4EA, 0xFFFF_C9C9, 0xFFF2_D3A6,
    0xFFE5_DE8A, 0xFFCC_EA8E, 0xFFB7_F4A5, 0xFFA9_F4C7, 0xFFA7_E9EE, 0xFFA8_A8A8, 0xFF00_0000,
    0xFF00_0000,
];

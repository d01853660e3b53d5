//! Fr32 padding.
//!
//! Every 254 bits of payload are followed by two zero bits so that each
//! 32-byte leaf of the piece tree is a valid BLS12-381 scalar. A block of
//! 127 unpadded bytes therefore expands to exactly 128 padded bytes.

/// Unpadded bytes per Fr32 block.
pub const UNPADDED_BLOCK: usize = 127;

/// Padded bytes per Fr32 block.
pub const PADDED_BLOCK: usize = 128;

/// Pad one 127-byte block into 128 bytes.
pub fn pad_block(input: &[u8; UNPADDED_BLOCK], out: &mut [u8; PADDED_BLOCK]) {
    out[..32].copy_from_slice(&input[..32]);
    out[31] &= 0x3f;

    for i in 32..64 {
        out[i] = (input[i] << 2) | (input[i - 1] >> 6);
    }
    out[63] &= 0x3f;

    for i in 64..96 {
        out[i] = (input[i] << 4) | (input[i - 1] >> 4);
    }
    out[95] &= 0x3f;

    for i in 96..127 {
        out[i] = (input[i] << 6) | (input[i - 1] >> 2);
    }
    out[127] = input[126] >> 2;
}

/// Padded size of the smallest power-of-two piece that holds `size` payload bytes.
pub fn padded_piece_size(size: u64) -> u64 {
    let blocks = size.div_ceil(UNPADDED_BLOCK as u64).max(1);
    (blocks * PADDED_BLOCK as u64).next_power_of_two()
}

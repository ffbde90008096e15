//! 7-bit parity code appended to every frame.
//!
//! The covered bytes are expanded into individual bits (LSB first) and six
//! parity bits are taken over `(offset, stride)` selections of that bit
//! array. A seventh bit is the parity of the first six. The bits are packed
//! MSB first into the low 7 bits of the frame's last byte.
//!
//! The code detects every single-bit error. It does not catch two flips
//! whose bit indices are congruent modulo 6: such a pair lands in the same
//! class of every selection and the parities cancel out.

/// `(offset, stride)` selections, in output order (bit 6 down to bit 1).
const SELECTIONS: [(usize, usize); 6] = [(0, 1), (0, 2), (1, 2), (0, 3), (1, 3), (2, 3)];

/// Mask of the significant code bits.
pub const CODE_MASK: u8 = 0x7f;

fn expand(bytes: &[u8]) -> Vec<u8> {
    let mut bits = Vec::with_capacity(bytes.len() * 8);
    for &byte in bytes {
        for shift in 0..8 {
            bits.push((byte >> shift) & 1);
        }
    }
    bits
}

fn parity(bits: &[u8], offset: usize, stride: usize) -> u8 {
    bits.iter().skip(offset).step_by(stride).fold(0, |acc, bit| acc ^ bit)
}

/// Computes the code over `bytes` (the frame without its last byte).
pub fn compute(bytes: &[u8]) -> u8 {
    let bits = expand(bytes);
    let mut code = 0u8;
    let mut summary = 0u8;
    for (index, &(offset, stride)) in SELECTIONS.iter().enumerate() {
        let bit = parity(&bits, offset, stride);
        summary ^= bit;
        code |= bit << (6 - index);
    }
    code | summary
}

/// Returns `true` when the last byte of `frame` matches the code of the
/// bytes before it. Empty input never verifies.
pub fn verify(frame: &[u8]) -> bool {
    match frame.split_last() {
        Some((&code, body)) => compute(body) == code,
        None => false,
    }
}

/// Writes the code of `frame[..len - 1]` into the last byte.
pub fn seal(frame: &mut [u8]) {
    if let Some(last) = frame.len().checked_sub(1) {
        frame[last] = compute(&frame[..last]);
    }
}

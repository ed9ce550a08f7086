//! Bit strings for JTAG shift payloads
//!
//! A [`BitBuffer`] holds an arbitrary number of bits packed LSB first into
//! 32-bit words: bit `k` lives in word `k / 32` at position `k % 32`. This
//! is the layout JTAG controllers shift out of TDI and into TDO, so a buffer
//! can be handed to a transport without repacking.

use std::fmt;

const WORD_BITS: usize = 32;

fn words_for(len: usize) -> usize {
    len.div_ceil(WORD_BITS)
}

/// An owned, growable bit string
///
/// Bits at positions beyond [`len`](Self::len) are always zero, so two
/// buffers holding the same bits compare equal word for word.
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct BitBuffer {
    words: Vec<u32>,
    len: usize,
}

impl BitBuffer {
    /// Create an empty buffer
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a buffer of `len` zero bits
    pub fn zeroed(len: usize) -> Self {
        Self {
            words: vec![0; words_for(len)],
            len,
        }
    }

    /// Create a buffer of `len` one bits
    pub fn ones(len: usize) -> Self {
        let mut buf = Self {
            words: vec![u32::MAX; words_for(len)],
            len,
        };
        buf.mask_tail();
        buf
    }

    /// Create a buffer of `len` bits holding the low bits of `value`
    ///
    /// `len` may exceed 32; the extra bits are zero.
    pub fn from_u32(value: u32, len: usize) -> Self {
        Self::from_u64(u64::from(value), len)
    }

    /// Create a buffer of `len` bits holding the low bits of `value`
    pub fn from_u64(value: u64, len: usize) -> Self {
        let mut buf = Self::zeroed(len);
        if let Some(w) = buf.words.get_mut(0) {
            *w = value as u32;
        }
        if let Some(w) = buf.words.get_mut(1) {
            *w = (value >> 32) as u32;
        }
        buf.mask_tail();
        buf
    }

    /// Create a buffer of `len` bits from packed words
    ///
    /// Missing words read as zero; surplus words and bits are dropped.
    pub fn from_words(words: &[u32], len: usize) -> Self {
        let mut buf = Self::zeroed(len);
        for (dst, src) in buf.words.iter_mut().zip(words) {
            *dst = *src;
        }
        buf.mask_tail();
        buf
    }

    /// Number of bits held
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the buffer holds no bits
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The packed words, `ceil(len / 32)` of them
    pub fn words(&self) -> &[u32] {
        &self.words
    }

    /// Get one packed word
    pub fn word(&self, index: usize) -> Option<u32> {
        self.words.get(index).copied()
    }

    /// Get bit `index`, or `None` past the end
    pub fn get(&self, index: usize) -> Option<bool> {
        if index >= self.len {
            return None;
        }
        Some(self.words[index / WORD_BITS] >> (index % WORD_BITS) & 1 == 1)
    }

    /// Set bit `index`; returns `false` (and changes nothing) past the end
    pub fn set(&mut self, index: usize, bit: bool) -> bool {
        if index >= self.len {
            return false;
        }
        let mask = 1u32 << (index % WORD_BITS);
        let word = &mut self.words[index / WORD_BITS];
        if bit {
            *word |= mask;
        } else {
            *word &= !mask;
        }
        true
    }

    /// Append one bit
    pub fn push(&mut self, bit: bool) {
        if self.len % WORD_BITS == 0 {
            self.words.push(0);
        }
        self.len += 1;
        self.set(self.len - 1, bit);
    }

    /// Remove all bits, keeping the allocation
    pub fn clear(&mut self) {
        self.words.clear();
        self.len = 0;
    }

    /// The first 32 bits as an integer (missing bits read as zero)
    pub fn to_u32(&self) -> u32 {
        self.word(0).unwrap_or(0)
    }

    /// The first 64 bits as an integer (missing bits read as zero)
    pub fn to_u64(&self) -> u64 {
        u64::from(self.word(0).unwrap_or(0)) | u64::from(self.word(1).unwrap_or(0)) << 32
    }

    /// Number of one bits
    pub fn count_ones(&self) -> u32 {
        self.words.iter().map(|w| w.count_ones()).sum()
    }

    /// Compare against `actual` word by word
    ///
    /// Returns the first differing word as `(index, expected, actual)`.
    /// Only the first `self.len()` bits take part; a shorter `actual`
    /// reads as zero past its end.
    pub fn first_mismatch(&self, actual: &BitBuffer) -> Option<(usize, u32, u32)> {
        self.words.iter().enumerate().find_map(|(i, &expected)| {
            let mut got = actual.word(i).unwrap_or(0);
            if i + 1 == self.words.len() {
                got &= tail_mask(self.len);
            }
            (got != expected).then_some((i, expected, got))
        })
    }

    fn mask_tail(&mut self) {
        let mask = tail_mask(self.len);
        if let Some(last) = self.words.last_mut() {
            *last &= mask;
        }
    }
}

/// Mask of valid bits in the last word of a `len`-bit buffer
fn tail_mask(len: usize) -> u32 {
    match len % WORD_BITS {
        0 => u32::MAX,
        rem => (1u32 << rem) - 1,
    }
}

impl fmt::Debug for BitBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BitBuffer({} bits: {})", self.len, self)
    }
}

/// Hex, most significant word first (the way SVF prints TDI/TDO)
impl fmt::Display for BitBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.words.is_empty() {
            return write!(f, "0");
        }
        for (i, w) in self.words.iter().rev().enumerate() {
            if i == 0 {
                write!(f, "{:X}", w)?;
            } else {
                write!(f, "{:08X}", w)?;
            }
        }
        Ok(())
    }
}

impl FromIterator<bool> for BitBuffer {
    fn from_iter<I: IntoIterator<Item = bool>>(iter: I) -> Self {
        let mut buf = BitBuffer::new();
        for bit in iter {
            buf.push(bit);
        }
        buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ones_masks_tail() {
        let buf = BitBuffer::ones(544);
        assert_eq!(buf.words().len(), 17);
        assert_eq!(buf.count_ones(), 544);

        let buf = BitBuffer::ones(40);
        assert_eq!(buf.words(), &[u32::MAX, 0xFF]);
    }

    #[test]
    fn test_get_set_bounds() {
        let mut buf = BitBuffer::zeroed(95);
        assert!(buf.set(94, true));
        assert!(!buf.set(95, true));
        assert_eq!(buf.get(94), Some(true));
        assert_eq!(buf.get(93), Some(false));
        assert_eq!(buf.get(95), None);
        assert_eq!(buf.word(2), Some(1 << 30));
    }

    #[test]
    fn test_push_and_collect() {
        let buf: BitBuffer = [true, false, true, true].into_iter().collect();
        assert_eq!(buf.len(), 4);
        assert_eq!(buf.to_u32(), 0b1101);

        let mut buf = BitBuffer::new();
        for i in 0..33 {
            buf.push(i == 32);
        }
        assert_eq!(buf.words(), &[0, 1]);
    }

    #[test]
    fn test_from_value() {
        assert_eq!(BitBuffer::from_u32(0x0620, 16).to_u32(), 0x0620);
        assert_eq!(BitBuffer::from_u32(0xFFFF_FFFF, 8).to_u32(), 0xFF);
        let wide = BitBuffer::from_u64(0x1234_5678_9ABC_DEF0, 64);
        assert_eq!(wide.to_u64(), 0x1234_5678_9ABC_DEF0);
        assert_eq!(BitBuffer::from_words(&[1, 2, 3], 40).words(), &[1, 2]);
    }

    #[test]
    fn test_first_mismatch_ignores_padding() {
        let expected = BitBuffer::from_words(&[0xAAAA_AAAA, 0x5], 36);
        let same = BitBuffer::from_words(&[0xAAAA_AAAA, 0xF5], 40);
        assert_eq!(expected.first_mismatch(&same), None);

        let other = BitBuffer::from_words(&[0xAAAA_AAAA, 0x4], 36);
        assert_eq!(expected.first_mismatch(&other), Some((1, 0x5, 0x4)));

        let short = BitBuffer::zeroed(0);
        assert_eq!(expected.first_mismatch(&short), Some((0, 0xAAAA_AAAA, 0)));
    }

    #[test]
    fn test_display() {
        assert_eq!(BitBuffer::from_words(&[0x1, 0x4000_0000], 63).to_string(), "4000000000000001");
        assert_eq!(BitBuffer::new().to_string(), "0");
    }
}

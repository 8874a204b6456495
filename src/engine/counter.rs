//! Fixed-width big-endian counter with wraparound arithmetic.

/// Unsigned counter stored as big-endian bytes, arithmetic modulo 2^(8·width).
#[derive(Clone, PartialEq, Eq)]
pub(crate) struct Counter {
    bytes: Vec<u8>,
}

impl Counter {
    pub(crate) fn zeroed(width: usize) -> Self {
        Self {
            bytes: vec![0u8; width],
        }
    }

    /// Overwrites the counter with `prefix` followed by zero padding.
    ///
    /// `prefix` must not be wider than the counter.
    pub(crate) fn load(&mut self, prefix: &[u8]) {
        debug_assert!(prefix.len() <= self.bytes.len());
        let (head, tail) = self.bytes.split_at_mut(prefix.len());
        head.copy_from_slice(prefix);
        tail.fill(0);
    }

    #[inline]
    pub(crate) fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub(crate) fn increment(&mut self) {
        for byte in self.bytes.iter_mut().rev() {
            let (sum, carry) = byte.overflowing_add(1);
            *byte = sum;
            if !carry {
                break;
            }
        }
    }

    /// Adds a signed amount, wrapping at the counter width.
    ///
    /// Negative amounts borrow through every byte, which is the same as adding
    /// their two's complement sign-extended to the counter width.
    pub(crate) fn add_signed(&mut self, delta: i128) {
        if delta == 0 {
            return;
        }
        let width = self.bytes.len();
        let fill = if delta < 0 { 0xFF } else { 0x00 };
        let raw = delta.to_be_bytes();
        let mut addend = vec![fill; width];
        if width >= raw.len() {
            addend[width - raw.len()..].copy_from_slice(&raw);
        } else {
            addend.copy_from_slice(&raw[raw.len() - width..]);
        }

        let mut carry = 0u16;
        for (byte, add) in self.bytes.iter_mut().zip(addend.iter()).rev() {
            let sum = *byte as u16 + *add as u16 + carry;
            *byte = sum as u8;
            carry = sum >> 8;
        }
    }
}

impl std::fmt::Debug for Counter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let hex: String = self.bytes.iter().map(|b| format!("{:02x}", b)).collect();
        f.debug_tuple("Counter").field(&hex).finish()
    }
}

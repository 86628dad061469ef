#[macro_export]
macro_rules! ensure_err {
    ($cond:expr, $err:expr) => {
        if !$cond {
            return Err($err);
        }
    };
}

/// XOR `mask` into `dst` in place. Operands must be equal length.
pub(crate) fn xor_in_place(dst: &mut [u8], mask: &[u8]) {
    debug_assert_eq!(dst.len(), mask.len());
    for (d, m) in dst.iter_mut().zip(mask) {
        *d ^= m;
    }
}

/// Copy `data` into a fresh buffer zero-padded to a whole number of
/// `block_size`-byte blocks. Empty input stays empty.
pub(crate) fn zero_pad(data: &[u8], block_size: usize) -> Vec<u8> {
    let mut out = data.to_vec();
    out.resize(data.len().next_multiple_of(block_size), 0);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_pad() {
        assert_eq!(zero_pad(b"", 8), b"");
        assert_eq!(zero_pad(b"12345678", 8), b"12345678");
        assert_eq!(zero_pad(b"123456789", 8), b"123456789\0\0\0\0\0\0\0");
    }

    #[test]
    fn test_xor_in_place() {
        let mut dst = [0x0F, 0xF0, 0xAA];
        xor_in_place(&mut dst, &[0xFF, 0xFF, 0x55]);
        assert_eq!(dst, [0xF0, 0x0F, 0xFF]);
    }
}

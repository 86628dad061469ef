//! Key serial number handling for both DUKPT variants.
//!
//! A KSN carries the device identity in its high bytes and the transaction
//! counter in its low bits. Advancing the counter skips values with too
//! many set bits, which bounds the cost of re-deriving a transaction key.

use crate::{ensure_err, Error, Result};

/// Serialized TDES KSN length.
pub const TDES_KSN_LEN: usize = 10;
/// Serialized AES KSN length.
pub const AES_KSN_LEN: usize = 12;

/// 10-byte TDES key serial number (ANSI X9.24-1:2009).
///
/// The 21 low bits are the transaction counter; the 59 bits above them
/// name the key set and device.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct KsnTdes([u8; TDES_KSN_LEN]);

impl KsnTdes {
    /// Highest counter value the scheme permits.
    pub const TC_MAX: u32 = 0x1F_F800;
    const TC_MASK: u32 = 0x1F_FFFF;
    const MAX_SET_BITS: u32 = 10;

    pub fn new(bytes: [u8; TDES_KSN_LEN]) -> Self {
        Self(bytes)
    }

    /// Serialize from a possibly short KSN, left-padding with `0xFF`.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        ensure_err!(
            bytes.len() <= TDES_KSN_LEN,
            Error::InvalidKsnLength(bytes.len())
        );
        let mut out = [0xFF; TDES_KSN_LEN];
        out[TDES_KSN_LEN - bytes.len()..].copy_from_slice(bytes);
        Ok(Self(out))
    }

    pub fn as_bytes(&self) -> &[u8; TDES_KSN_LEN] {
        &self.0
    }

    /// The 21-bit transaction counter.
    pub fn transaction_counter(&self) -> u32 {
        (u32::from(self.0[7] & 0x1F) << 16) | (u32::from(self.0[8]) << 8) | u32::from(self.0[9])
    }

    /// Copy with the counter bits zeroed, the base register for key
    /// derivation.
    pub fn clear_counter(&self) -> Self {
        let mut bytes = self.0;
        bytes[7] &= 0xE0;
        bytes[8] = 0;
        bytes[9] = 0;
        Self(bytes)
    }

    /// A counter is usable when at most ten of its bits are set.
    pub fn is_valid(&self) -> bool {
        self.transaction_counter().count_ones() <= Self::MAX_SET_BITS
    }

    /// Error form of [`is_valid`] for callers that require a usable
    /// counter before deriving.
    ///
    /// [`is_valid`]: KsnTdes::is_valid
    pub fn ensure_valid(&self) -> Result<()> {
        ensure_err!(self.is_valid(), Error::InvalidCounter);
        Ok(())
    }

    /// Advance to the next usable counter value.
    pub fn next(&self) -> Result<Self> {
        let mut tc = self.transaction_counter();
        ensure_err!(tc <= Self::TC_MAX, Error::CounterExhausted);
        tc = (tc + 1) & Self::TC_MASK;
        while tc <= Self::TC_MAX && tc.count_ones() > Self::MAX_SET_BITS {
            tc += tc & tc.wrapping_neg();
        }
        ensure_err!(tc <= Self::TC_MAX, Error::CounterExhausted);

        let mut bytes = self.0;
        bytes[7] = (bytes[7] & 0xE0) | (tc >> 16) as u8;
        bytes[8] = (tc >> 8) as u8;
        bytes[9] = tc as u8;
        Ok(Self(bytes))
    }
}

/// 12-byte AES key serial number (ANSI X9.24-3:2017): an 8-byte initial
/// key id followed by a 32-bit big-endian transaction counter.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct KsnAes([u8; AES_KSN_LEN]);

impl KsnAes {
    /// Highest counter value the scheme permits.
    pub const TC_MAX: u32 = 0xFFFF_0000;
    const MAX_SET_BITS: u32 = 16;

    pub fn new(bytes: [u8; AES_KSN_LEN]) -> Self {
        Self(bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let bytes: [u8; AES_KSN_LEN] = bytes
            .try_into()
            .map_err(|_| Error::InvalidKsnLength(bytes.len()))?;
        Ok(Self(bytes))
    }

    /// Assemble from the device's initial key id and a counter value. A
    /// fresh device starts at counter zero and advances with [`next`].
    ///
    /// [`next`]: KsnAes::next
    pub fn from_parts(initial_key_id: [u8; 8], tc: u32) -> Self {
        let mut bytes = [0; AES_KSN_LEN];
        bytes[..8].copy_from_slice(&initial_key_id);
        bytes[8..].copy_from_slice(&tc.to_be_bytes());
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; AES_KSN_LEN] {
        &self.0
    }

    /// The 8-byte initial key id.
    pub fn initial_key_id(&self) -> [u8; 8] {
        self.0[..8].try_into().unwrap()
    }

    /// Bytes 4..8, the id half carried into derivation data.
    pub fn derivation_id(&self) -> [u8; 4] {
        self.0[4..8].try_into().unwrap()
    }

    pub fn transaction_counter(&self) -> u32 {
        u32::from_be_bytes(self.0[8..].try_into().unwrap())
    }

    /// Usable when the counter is non-zero with at most sixteen set bits.
    pub fn is_valid(&self) -> bool {
        let tc = self.transaction_counter();
        tc != 0 && tc.count_ones() <= Self::MAX_SET_BITS
    }

    /// Error form of [`is_valid`] for callers that require a usable
    /// counter before deriving.
    ///
    /// [`is_valid`]: KsnAes::is_valid
    pub fn ensure_valid(&self) -> Result<()> {
        ensure_err!(self.is_valid(), Error::InvalidCounter);
        Ok(())
    }

    /// Advance to the next usable counter value.
    pub fn next(&self) -> Result<Self> {
        let tc = self.transaction_counter();
        ensure_err!(tc <= Self::TC_MAX, Error::CounterExhausted);
        let mut tc = tc + 1;
        while tc.count_ones() > Self::MAX_SET_BITS {
            // Every value past the maximum has more than sixteen set bits,
            // so exhaustion surfaces as overflow while skipping.
            tc = tc
                .checked_add(tc & tc.wrapping_neg())
                .ok_or(Error::CounterExhausted)?;
        }
        ensure_err!(tc <= Self::TC_MAX, Error::CounterExhausted);
        Ok(Self::from_parts(self.initial_key_id(), tc))
    }
}

#[cfg(test)]
mod tests {
    use {super::*, hex_literal::hex};

    #[test]
    fn test_tdes_serialize_pads_left() {
        let ksn = KsnTdes::from_slice(&hex!("9876543210E00001")).unwrap();
        assert_eq!(ksn.as_bytes(), &hex!("FFFF9876543210E00001"));
        assert_eq!(ksn.transaction_counter(), 1);

        let full = KsnTdes::new(hex!("FFFF9876543210E00001"));
        assert_eq!(ksn, full);
    }

    #[test]
    fn test_tdes_long_input_rejected() {
        assert_eq!(
            KsnTdes::from_slice(&[0; 11]).unwrap_err(),
            Error::InvalidKsnLength(11)
        );
    }

    #[test]
    fn test_tdes_counter_extraction() {
        let ksn = KsnTdes::new(hex!("FFFF9876543210FFFFFF"));
        assert_eq!(ksn.transaction_counter(), 0x1F_FFFF);
        assert_eq!(
            ksn.clear_counter().as_bytes(),
            &hex!("FFFF9876543210E00000")
        );
    }

    #[test]
    fn test_tdes_next() {
        let ksn = KsnTdes::new(hex!("FFFF9876543210E00001"));
        let next = ksn.next().unwrap();
        assert_eq!(next.as_bytes(), &hex!("FFFF9876543210E00002"));
    }

    #[test]
    fn test_tdes_next_skips_dense_counters() {
        // 0x7FE carries ten set bits; 0x7FF would carry eleven, so the
        // counter jumps straight to 0x800.
        let ksn = KsnTdes::new(hex!("FFFF9876543210E007FE"));
        assert!(ksn.is_valid());
        let next = ksn.next().unwrap();
        assert_eq!(next.transaction_counter(), 0x800);
        assert!(next.is_valid());
    }

    #[test]
    fn test_tdes_exhaustion() {
        // 0x1FF800 is the largest usable counter; everything past it is
        // either too dense or out of range.
        let ksn = KsnTdes::new(hex!("FFFF9876543210FFF800"));
        assert!(ksn.is_valid());
        assert_eq!(ksn.next().unwrap_err(), Error::CounterExhausted);

        let ksn = KsnTdes::new(hex!("FFFF9876543210FFF801"));
        assert!(!ksn.is_valid());
        assert_eq!(ksn.next().unwrap_err(), Error::CounterExhausted);
    }

    #[test]
    fn test_aes_parts() {
        let ksn = KsnAes::new(hex!("123456789012345600000001"));
        assert_eq!(ksn.initial_key_id(), hex!("1234567890123456"));
        assert_eq!(ksn.derivation_id(), hex!("90123456"));
        assert_eq!(ksn.transaction_counter(), 1);
        assert_eq!(KsnAes::from_parts(hex!("1234567890123456"), 1), ksn);
    }

    #[test]
    fn test_aes_length_rejected() {
        assert_eq!(
            KsnAes::from_slice(&[0; 10]).unwrap_err(),
            Error::InvalidKsnLength(10)
        );
    }

    #[test]
    fn test_aes_validity() {
        assert!(!KsnAes::new(hex!("123456789012345600000000")).is_valid());
        assert!(KsnAes::new(hex!("123456789012345600000001")).is_valid());
        assert!(KsnAes::new(hex!("12345678901234560000FFFF")).is_valid());
        // Seventeen set bits.
        assert!(!KsnAes::new(hex!("12345678901234560001FFFF")).is_valid());

        assert_eq!(
            KsnAes::new(hex!("123456789012345600000000"))
                .ensure_valid()
                .unwrap_err(),
            Error::InvalidCounter
        );
        assert!(KsnAes::new(hex!("123456789012345600000001"))
            .ensure_valid()
            .is_ok());
    }

    #[test]
    fn test_aes_next_sequence() {
        let mut ksn = KsnAes::from_parts(hex!("1234567890123456"), 0);
        for tc in 1..=8 {
            ksn = ksn.next().unwrap();
            assert!(ksn.is_valid());
            assert_eq!(ksn.transaction_counter(), tc);
        }
    }

    #[test]
    fn test_aes_next_skips_dense_counters() {
        // 0x1FFFE has sixteen set bits; 0x1FFFF would have seventeen.
        let ksn = KsnAes::from_parts(hex!("1234567890123456"), 0x1FFFE);
        let next = ksn.next().unwrap();
        assert_eq!(next.transaction_counter(), 0x20000);
    }

    #[test]
    fn test_aes_exhaustion() {
        let ksn = KsnAes::from_parts(hex!("1234567890123456"), 0xFFFF_0001);
        assert_eq!(ksn.next().unwrap_err(), Error::CounterExhausted);

        // The maximum itself has nowhere left to go.
        let ksn = KsnAes::from_parts(hex!("1234567890123456"), 0xFFFF_0000);
        assert_eq!(ksn.next().unwrap_err(), Error::CounterExhausted);
    }
}

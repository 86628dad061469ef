//! ISO 9564-1:2017 format 4, the AES-era PIN block.

use {
    super::{pack_nibbles, pin_digits, unpack_nibbles},
    crate::{encryption::BlockCipher, ensure_err, utils::xor_in_place, Error, Result},
    rand::Rng as _,
};

const BLOCK_LEN: usize = 16;

/// Format-4 codec over an opaque 16-byte block cipher.
///
/// The PIN field carries the PIN with `A` fill and eight random bytes; the
/// PAN field binds the account number. The block is
/// `E(E(pin_field) XOR pan_field)` and decoding inverts it.
pub struct Iso4<C> {
    cipher: C,
}

impl<C: BlockCipher> Iso4<C> {
    pub fn new(cipher: C) -> Self {
        Self { cipher }
    }

    pub fn encode(&self, pin: &str, pan: &str) -> Result<[u8; BLOCK_LEN]> {
        ensure_err!(
            self.cipher.block_size() == BLOCK_LEN,
            Error::InvalidBlockLength(self.cipher.block_size())
        );
        let mut field = pin_field(pin)?;
        self.cipher.encrypt_block(&mut field)?;
        xor_in_place(&mut field, &pan_field(pan)?);
        self.cipher.encrypt_block(&mut field)?;
        Ok(field)
    }

    pub fn decode(&self, block: &[u8; BLOCK_LEN], pan: &str) -> Result<String> {
        ensure_err!(
            self.cipher.block_size() == BLOCK_LEN,
            Error::InvalidBlockLength(self.cipher.block_size())
        );
        let mut field = *block;
        self.cipher.decrypt_block(&mut field)?;
        xor_in_place(&mut field, &pan_field(pan)?);
        self.cipher.decrypt_block(&mut field)?;
        parse_pin_field(&field)
    }
}

/// PIN field: control `4`, length, digits, `A` fill, then eight random
/// bytes.
fn pin_field(pin: &str) -> Result<[u8; BLOCK_LEN]> {
    let pin = pin_digits(pin)?;
    let mut nibbles = [0xA_u8; 16];
    nibbles[0] = 0x4;
    nibbles[1] = pin.len() as u8;
    for (slot, d) in nibbles[2..2 + pin.len()].iter_mut().zip(pin) {
        *slot = d - b'0';
    }

    let mut field = [0u8; BLOCK_LEN];
    field[..8].copy_from_slice(&pack_nibbles::<8>(&nibbles));
    rand::thread_rng().fill(&mut field[8..]);
    Ok(field)
}

fn parse_pin_field(field: &[u8; BLOCK_LEN]) -> Result<String> {
    let nibbles = unpack_nibbles(&field[..8]);
    ensure_err!(
        nibbles[0] == 0x4,
        Error::FormatterFailure("pin block control field mismatch")
    );
    let len = nibbles[1] as usize;
    ensure_err!(
        (4..=12).contains(&len),
        Error::FormatterFailure("pin length out of range")
    );
    let digits = &nibbles[2..2 + len];
    ensure_err!(
        digits.iter().all(|&d| d <= 9),
        Error::FormatterFailure("pin digits out of range")
    );
    ensure_err!(
        nibbles[2 + len..].iter().all(|&n| n == 0xA),
        Error::FormatterFailure("pin block fill mismatch")
    );
    Ok(digits.iter().map(|&d| char::from(b'0' + d)).collect())
}

/// PAN field: the count of digits beyond twelve, the PAN, zero fill.
/// Accounts shorter than twelve digits are used right-justified over
/// twelve with leading zeros.
fn pan_field(pan: &str) -> Result<[u8; BLOCK_LEN]> {
    ensure_err!(
        !pan.is_empty() && pan.bytes().all(|b| b.is_ascii_digit()),
        Error::FormatterFailure("pan must be numeric")
    );
    ensure_err!(
        pan.len() <= 19,
        Error::FormatterFailure("pan longer than 19 digits")
    );

    let digits = pan.as_bytes();
    let mut nibbles = [0u8; 32];
    if digits.len() >= 12 {
        nibbles[0] = (digits.len() - 12) as u8;
        for (slot, d) in nibbles[1..=digits.len()].iter_mut().zip(digits) {
            *slot = d - b'0';
        }
    } else {
        for (slot, d) in nibbles[13 - digits.len()..13].iter_mut().zip(digits) {
            *slot = d - b'0';
        }
    }
    Ok(pack_nibbles(&nibbles))
}

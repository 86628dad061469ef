//! The 8-byte PIN-block codecs.

use {
    super::{pack_nibbles, pan_field, pin_digits, unpack_nibbles, PinFormat},
    crate::{ensure_err, utils::xor_in_place, Error, Result},
    rand::Rng as _,
};

/// Clear block with a control nibble, a length nibble, the PIN and fill.
fn length_block(control: u8, pin: &[u8], mut fill: impl FnMut() -> u8) -> [u8; 8] {
    let mut nibbles = [0u8; 16];
    nibbles[0] = control;
    nibbles[1] = pin.len() as u8;
    for (slot, d) in nibbles[2..2 + pin.len()].iter_mut().zip(pin) {
        *slot = d - b'0';
    }
    for slot in nibbles[2 + pin.len()..].iter_mut() {
        *slot = fill();
    }
    pack_nibbles(&nibbles)
}

fn length_decode(block: &[u8; 8], control: u8) -> Result<String> {
    let nibbles = unpack_nibbles(block);
    ensure_err!(
        nibbles[0] == control,
        Error::FormatterFailure("pin block control field mismatch")
    );
    collect_pin(&nibbles[1..])
}

/// Read a length nibble followed by that many PIN digits.
fn collect_pin(nibbles: &[u8]) -> Result<String> {
    let len = nibbles[0] as usize;
    ensure_err!(
        (4..=12).contains(&len),
        Error::FormatterFailure("pin length out of range")
    );
    digits_to_string(&nibbles[1..1 + len])
}

fn digits_to_string(digits: &[u8]) -> Result<String> {
    ensure_err!(
        digits.iter().all(|&d| d <= 9),
        Error::FormatterFailure("pin digits out of range")
    );
    Ok(digits.iter().map(|&d| char::from(b'0' + d)).collect())
}

/// ISO 9564-1 format 0 (ANSI X9.8): length-prefixed PIN with `F` fill,
/// XORed with the PAN field.
#[derive(Debug)]
pub(super) struct Iso0;

impl PinFormat for Iso0 {
    fn encode(&self, pin: &str, pan: &str) -> Result<[u8; 8]> {
        let mut block = length_block(0x0, pin_digits(pin)?, || 0xF);
        xor_in_place(&mut block, &pan_field(pan)?);
        Ok(block)
    }

    fn decode(&self, block: &[u8; 8], pan: &str) -> Result<String> {
        let mut clear = *block;
        xor_in_place(&mut clear, &pan_field(pan)?);
        length_decode(&clear, 0x0)
    }
}

/// ISO 9564-1 format 1: length-prefixed PIN with random fill, no PAN.
#[derive(Debug)]
pub(super) struct Iso1;

impl PinFormat for Iso1 {
    fn encode(&self, pin: &str, _pan: &str) -> Result<[u8; 8]> {
        let mut rng = rand::thread_rng();
        Ok(length_block(0x1, pin_digits(pin)?, || {
            rng.gen_range(0..=0xF)
        }))
    }

    fn decode(&self, block: &[u8; 8], _pan: &str) -> Result<String> {
        length_decode(block, 0x1)
    }
}

/// ISO 9564-1 format 2: length-prefixed PIN with `F` fill, no PAN.
#[derive(Debug)]
pub(super) struct Iso2;

impl PinFormat for Iso2 {
    fn encode(&self, pin: &str, _pan: &str) -> Result<[u8; 8]> {
        Ok(length_block(0x2, pin_digits(pin)?, || 0xF))
    }

    fn decode(&self, block: &[u8; 8], _pan: &str) -> Result<String> {
        length_decode(block, 0x2)
    }
}

/// ISO 9564-1 format 3: like format 0 but filled with random `A`..`F`
/// digits.
#[derive(Debug)]
pub(super) struct Iso3;

impl PinFormat for Iso3 {
    fn encode(&self, pin: &str, pan: &str) -> Result<[u8; 8]> {
        let mut rng = rand::thread_rng();
        let mut block = length_block(0x3, pin_digits(pin)?, || rng.gen_range(0xA..=0xF));
        xor_in_place(&mut block, &pan_field(pan)?);
        Ok(block)
    }

    fn decode(&self, block: &[u8; 8], pan: &str) -> Result<String> {
        let mut clear = *block;
        xor_in_place(&mut clear, &pan_field(pan)?);
        length_decode(&clear, 0x3)
    }
}

/// ECI-2: a four-digit PIN followed by twelve random digits.
#[derive(Debug)]
pub(super) struct Eci2;

impl PinFormat for Eci2 {
    fn encode(&self, pin: &str, _pan: &str) -> Result<[u8; 8]> {
        let pin = pin_digits(pin)?;
        ensure_err!(
            pin.len() == 4,
            Error::FormatterFailure("eci-2 pins are exactly 4 digits")
        );
        let mut rng = rand::thread_rng();
        let mut nibbles = [0u8; 16];
        for (slot, d) in nibbles[..4].iter_mut().zip(pin) {
            *slot = d - b'0';
        }
        for slot in nibbles[4..].iter_mut() {
            *slot = rng.gen_range(0..=9);
        }
        Ok(pack_nibbles(&nibbles))
    }

    fn decode(&self, block: &[u8; 8], _pan: &str) -> Result<String> {
        let nibbles = unpack_nibbles(block);
        digits_to_string(&nibbles[..4])
    }
}

/// ECI-3: length-prefixed PIN with random digit fill.
#[derive(Debug)]
pub(super) struct Eci3;

impl PinFormat for Eci3 {
    fn encode(&self, pin: &str, _pan: &str) -> Result<[u8; 8]> {
        let pin = pin_digits(pin)?;
        let mut rng = rand::thread_rng();
        let mut nibbles = [0u8; 16];
        nibbles[0] = pin.len() as u8;
        for (slot, d) in nibbles[1..1 + pin.len()].iter_mut().zip(pin) {
            *slot = d - b'0';
        }
        for slot in nibbles[1 + pin.len()..].iter_mut() {
            *slot = rng.gen_range(0..=9);
        }
        Ok(pack_nibbles(&nibbles))
    }

    fn decode(&self, block: &[u8; 8], _pan: &str) -> Result<String> {
        collect_pin(&unpack_nibbles(block))
    }
}

/// VISA-2: length-prefixed PIN with zero fill.
#[derive(Debug)]
pub(super) struct Visa2;

impl PinFormat for Visa2 {
    fn encode(&self, pin: &str, _pan: &str) -> Result<[u8; 8]> {
        let pin = pin_digits(pin)?;
        let mut nibbles = [0u8; 16];
        nibbles[0] = pin.len() as u8;
        for (slot, d) in nibbles[1..1 + pin.len()].iter_mut().zip(pin) {
            *slot = d - b'0';
        }
        Ok(pack_nibbles(&nibbles))
    }

    fn decode(&self, block: &[u8; 8], _pan: &str) -> Result<String> {
        collect_pin(&unpack_nibbles(block))
    }
}

/// VISA-3: the PIN, an `F` sentinel, then zero fill.
#[derive(Debug)]
pub(super) struct Visa3;

impl PinFormat for Visa3 {
    fn encode(&self, pin: &str, _pan: &str) -> Result<[u8; 8]> {
        let pin = pin_digits(pin)?;
        let mut nibbles = [0u8; 16];
        for (slot, d) in nibbles[..pin.len()].iter_mut().zip(pin) {
            *slot = d - b'0';
        }
        nibbles[pin.len()] = 0xF;
        Ok(pack_nibbles(&nibbles))
    }

    fn decode(&self, block: &[u8; 8], _pan: &str) -> Result<String> {
        let nibbles = unpack_nibbles(block);
        let len = nibbles
            .iter()
            .position(|&n| n == 0xF)
            .ok_or(Error::FormatterFailure("pin sentinel missing"))?;
        ensure_err!(
            (4..=12).contains(&len),
            Error::FormatterFailure("pin length out of range")
        );
        digits_to_string(&nibbles[..len])
    }
}

#[cfg(test)]
mod tests {
    use {super::super::formatter, super::*, hex_literal::hex};

    // Worked format-0 example: 0412 34FF FFFF FFFF xor the PAN field of
    // 4012345678909.
    #[test]
    fn test_iso0_block() {
        let block = Iso0.encode("1234", "4012345678909").unwrap();
        assert_eq!(block, hex!("041274EDCBA9876F"));
        assert_eq!(Iso0.decode(&block, "4012345678909").unwrap(), "1234");
    }

    #[test]
    fn test_iso2_block() {
        let block = Iso2.encode("92389", "4111111111111111").unwrap();
        assert_eq!(block, hex!("2592389FFFFFFFFF"));
    }

    #[test]
    fn test_visa3_block() {
        let block = Visa3.encode("1234", "").unwrap();
        assert_eq!(block, hex!("1234F00000000000"));
        assert_eq!(Visa3.decode(&block, "").unwrap(), "1234");
    }

    #[test]
    fn test_round_trips() {
        let pan = "4111111111111111";
        for name in [
            "ISO-0", "ISO-1", "ISO-2", "ISO-3", "ANSI", "ECI1", "ECI2", "ECI3", "ECI4", "VISA1",
            "VISA2", "VISA3", "VISA4",
        ] {
            let codec = formatter(name).unwrap();
            let block = codec.encode("1234", pan).unwrap();
            assert_eq!(codec.decode(&block, pan).unwrap(), "1234", "{name}");
        }

        // Longer PINs, for the formats that take them.
        for name in ["ISO-0", "ISO-1", "ISO-2", "ISO-3", "ECI3", "VISA2", "VISA3"] {
            let codec = formatter(name).unwrap();
            let block = codec.encode("123456789012", pan).unwrap();
            assert_eq!(codec.decode(&block, pan).unwrap(), "123456789012", "{name}");
        }
    }

    #[test]
    fn test_iso0_rejects_bad_pin() {
        assert_eq!(
            Iso0.encode("12", "4111111111111111").unwrap_err(),
            Error::FormatterFailure("pin must be 4 to 12 digits")
        );
        assert_eq!(
            Iso0.encode("12E4", "4111111111111111").unwrap_err(),
            Error::FormatterFailure("pin must be numeric")
        );
    }

    #[test]
    fn test_eci2_is_four_digits_only() {
        assert_eq!(
            Eci2.encode("12345", "").unwrap_err(),
            Error::FormatterFailure("eci-2 pins are exactly 4 digits")
        );
    }

    #[test]
    fn test_decode_rejects_wrong_control() {
        let block = Iso2.encode("1234", "").unwrap();
        assert_eq!(
            Iso1.decode(&block, "").unwrap_err(),
            Error::FormatterFailure("pin block control field mismatch")
        );
    }
}

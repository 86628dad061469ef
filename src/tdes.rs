//! TDES DUKPT per ANSI X9.24-1:2009 Annex A: initial-key derivation, the
//! non-reversible transaction-key walk, and the PIN, MAC and data
//! operations with their table A-1 key variants.

use {
    crate::{
        encryption::{tdes_cbc_decrypt, tdes_cbc_encrypt, DesEcb, TdesEcb, DES_BLOCK_LEN},
        ensure_err,
        ksn::KsnTdes,
        pinblock,
        utils::{xor_in_place, zero_pad},
        Action, Error, Result,
    },
    zeroize::Zeroize,
};

const KEY_LEN: usize = 16;
const TC_BITS: u32 = 21;

// A.2 step 4 / A.6 key variant constant.
const KEY_VARIANT: [u8; KEY_LEN] = [
    0xC0, 0xC0, 0xC0, 0xC0, 0x00, 0x00, 0x00, 0x00, //
    0xC0, 0xC0, 0xC0, 0xC0, 0x00, 0x00, 0x00, 0x00,
];

// Table A-1: which two bytes of the transaction key get inverted for each
// working-key purpose.
const PIN_KEY_VARIANT: (usize, usize) = (7, 15);
const MAC_REQUEST_VARIANT: (usize, usize) = (6, 14);
const MAC_RESPONSE_VARIANT: (usize, usize) = (4, 12);
const DATA_REQUEST_VARIANT: (usize, usize) = (5, 13);
const DATA_RESPONSE_VARIANT: (usize, usize) = (3, 11);

/// Derive a device's initial key from the base derivative key and its key
/// serial number (A.6).
pub fn derive_initial_key(bdk: &[u8], ksn: &KsnTdes) -> Result<[u8; KEY_LEN]> {
    ensure_err!(bdk.len() == KEY_LEN, Error::InvalidKeyLength(bdk.len()));

    let base = ksn.clear_counter();
    let block: [u8; DES_BLOCK_LEN] = base.as_bytes()[..DES_BLOCK_LEN].try_into().unwrap();
    let left = TdesEcb::new(bdk)?.encrypt(&block);

    let mut variant = [0u8; KEY_LEN];
    variant.copy_from_slice(bdk);
    xor_in_place(&mut variant, &KEY_VARIANT);
    let right = TdesEcb::new(&variant)?.encrypt(&block);
    variant.zeroize();

    let mut ik = [0u8; KEY_LEN];
    ik[..8].copy_from_slice(&left);
    ik[8..].copy_from_slice(&right);
    Ok(ik)
}

/// Derive the current transaction key by replaying the set bits of the
/// 21-bit counter, high bit first, through the non-reversible key
/// generation subroutine (A.3).
pub fn derive_transaction_key(ik: &[u8], ksn: &KsnTdes) -> Result<[u8; KEY_LEN]> {
    ensure_err!(ik.len() == KEY_LEN, Error::InvalidKeyLength(ik.len()));

    let tc = ksn.transaction_counter();
    let mut key = [0u8; KEY_LEN];
    key.copy_from_slice(ik);
    let mut register = *ksn.clear_counter().as_bytes();

    for bit in (1..=TC_BITS).rev() {
        let mask = 1u32 << (bit - 1);
        if tc & mask == 0 {
            continue;
        }
        register[7] |= (mask >> 16) as u8;
        register[8] |= (mask >> 8) as u8;
        register[9] |= mask as u8;

        let next = non_reversible_key(&register, &key)?;
        key.zeroize();
        key = next;
    }
    Ok(key)
}

/// Non-reversible key generation (A.2): advance the key register by one
/// counter bit without exposing its predecessor.
fn non_reversible_key(register: &[u8; 10], key: &[u8; KEY_LEN]) -> Result<[u8; KEY_LEN]> {
    let mut reg1: [u8; DES_BLOCK_LEN] = register[2..].try_into().unwrap();

    let mut reg2 = reg1;
    xor_in_place(&mut reg2, &key[8..]);
    let mut reg2 = DesEcb::new(&key[..8])?.encrypt(&reg2);
    xor_in_place(&mut reg2, &key[8..]);

    let mut variant = *key;
    xor_in_place(&mut variant, &KEY_VARIANT);
    xor_in_place(&mut reg1, &variant[8..]);
    let mut reg1 = DesEcb::new(&variant[..8])?.encrypt(&reg1);
    xor_in_place(&mut reg1, &variant[8..]);
    variant.zeroize();

    let mut out = [0u8; KEY_LEN];
    out[..8].copy_from_slice(&reg1);
    out[8..].copy_from_slice(&reg2);
    Ok(out)
}

fn key_variant(current_key: &[u8], (i, j): (usize, usize)) -> Result<[u8; KEY_LEN]> {
    ensure_err!(
        current_key.len() == KEY_LEN,
        Error::InvalidKeyLength(current_key.len())
    );
    let mut key = [0u8; KEY_LEN];
    key.copy_from_slice(current_key);
    key[i] ^= 0xFF;
    key[j] ^= 0xFF;
    Ok(key)
}

fn resolve_iv(iv: Option<&[u8]>) -> Result<[u8; DES_BLOCK_LEN]> {
    match iv {
        None => Ok([0; DES_BLOCK_LEN]),
        Some(iv) => iv
            .try_into()
            .map_err(|_| Error::InvalidBlockLength(iv.len())),
    }
}

/// Encrypt a PIN under the transaction key's PIN variant (A.4.1). The
/// format name selects one of the 8-byte PIN-block codecs.
pub fn encrypt_pin(current_key: &[u8], pin: &str, pan: &str, format: &str) -> Result<[u8; 8]> {
    let formatter = pinblock::formatter(format)?;
    let block = formatter.encode(pin, pan)?;

    let mut pin_key = key_variant(current_key, PIN_KEY_VARIANT)?;
    let cipher = TdesEcb::new(&pin_key)?;
    pin_key.zeroize();
    Ok(cipher.encrypt(&block))
}

/// Decrypt an 8-byte PIN-block ciphertext and recover the PIN digits.
pub fn decrypt_pin(
    current_key: &[u8],
    ciphertext: &[u8],
    pan: &str,
    format: &str,
) -> Result<String> {
    let formatter = pinblock::formatter(format)?;
    let block: [u8; DES_BLOCK_LEN] = ciphertext
        .try_into()
        .map_err(|_| Error::InvalidBlockLength(ciphertext.len()))?;

    let mut pin_key = key_variant(current_key, PIN_KEY_VARIANT)?;
    let cipher = TdesEcb::new(&pin_key)?;
    pin_key.zeroize();
    formatter.decode(&cipher.decrypt(&block), pan)
}

/// ISO 16609 C.4 retail MAC over the zero-padded message, under the
/// request or response MAC variant. Callers commonly keep the first four
/// bytes.
pub fn generate_mac(current_key: &[u8], data: &[u8], action: Action) -> Result<[u8; 8]> {
    let variant = match action {
        Action::Request => MAC_REQUEST_VARIANT,
        Action::Response => MAC_RESPONSE_VARIANT,
    };
    let mut mac_key = key_variant(current_key, variant)?;
    let left = DesEcb::new(&mac_key[..8])?;
    let right = DesEcb::new(&mac_key[8..])?;
    mac_key.zeroize();

    let padded = zero_pad(data, DES_BLOCK_LEN);
    let mut state = [0u8; DES_BLOCK_LEN];
    for block in padded.chunks_exact(DES_BLOCK_LEN) {
        xor_in_place(&mut state, block);
        state = left.encrypt(&state);
    }
    Ok(left.encrypt(&right.decrypt(&state)))
}

/// One-way data key of A.4.1 figure A-2: each half of the variant key,
/// 3DES-encrypted under the whole variant key.
fn data_key(current_key: &[u8], action: Action) -> Result<[u8; KEY_LEN]> {
    let variant = match action {
        Action::Request => DATA_REQUEST_VARIANT,
        Action::Response => DATA_RESPONSE_VARIANT,
    };
    let mut variant_key = key_variant(current_key, variant)?;
    let cipher = TdesEcb::new(&variant_key)?;
    let left_half: [u8; DES_BLOCK_LEN] = variant_key[..8].try_into().unwrap();
    let right_half: [u8; DES_BLOCK_LEN] = variant_key[8..].try_into().unwrap();
    variant_key.zeroize();

    let mut key = [0u8; KEY_LEN];
    key[..8].copy_from_slice(&cipher.encrypt(&left_half));
    key[8..].copy_from_slice(&cipher.encrypt(&right_half));
    Ok(key)
}

/// 3DES-CBC encrypt `data` (zero-padded to a block multiple) under the
/// derived one-way data key. `iv` defaults to the zero vector and must
/// otherwise be exactly one block.
pub fn encrypt_data(
    current_key: &[u8],
    iv: Option<&[u8]>,
    data: &[u8],
    action: Action,
) -> Result<Vec<u8>> {
    let mut key = data_key(current_key, action)?;
    let iv = resolve_iv(iv)?;
    let mut buf = zero_pad(data, DES_BLOCK_LEN);
    tdes_cbc_encrypt(&key, &iv, &mut buf)?;
    key.zeroize();
    Ok(buf)
}

/// Invert [`encrypt_data`]. The ciphertext must be a whole number of
/// blocks; the caller recovers the unpadded length.
pub fn decrypt_data(
    current_key: &[u8],
    iv: Option<&[u8]>,
    ciphertext: &[u8],
    action: Action,
) -> Result<Vec<u8>> {
    ensure_err!(
        ciphertext.len() % DES_BLOCK_LEN == 0,
        Error::InvalidBlockLength(ciphertext.len())
    );
    let mut key = data_key(current_key, action)?;
    let iv = resolve_iv(iv)?;
    let mut buf = ciphertext.to_vec();
    tdes_cbc_decrypt(&key, &iv, &mut buf)?;
    key.zeroize();
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use {super::*, hex_literal::hex};

    const BDK: [u8; 16] = hex!("0123456789ABCDEFFEDCBA9876543210");
    const PIN: &str = "1234";
    const PAN: &str = "4012345678909";
    const DATA: &[u8] = b"4012345678909D987";

    struct Transaction {
        ksn: [u8; 10],
        transaction_key: [u8; 16],
        pin_ciphertext: [u8; 8],
        data_request: [u8; 24],
        data_response: [u8; 24],
        mac_request: [u8; 8],
        mac_response: [u8; 8],
    }

    // ANSI X9.24-1:2009 A.4.2, the initial sequence of transactions.
    const SEQUENCE: [Transaction; 5] = [
        Transaction {
            ksn: hex!("FFFF9876543210E00001"),
            transaction_key: hex!("042666B49184CFA368DE9628D0397BC9"),
            pin_ciphertext: hex!("1B9C1845EB993A7A"),
            data_request: hex!("FC0D53B7EA1FDA9EE68AAF2E70D9B9506229BE2AA993F04F"),
            data_response: hex!("1FCC89AF66222F27B903898BB2BC8589CDBFDE5EC6AFCC25"),
            mac_request: hex!("9CCC78173FC4FB64"),
            mac_response: hex!("20364223C1FF00FA"),
        },
        Transaction {
            ksn: hex!("FFFF9876543210E00002"),
            transaction_key: hex!("C46551CEF9FD24B0AA9AD834130D3BC7"),
            pin_ciphertext: hex!("10A01C8D02C69107"),
            data_request: hex!("A2B4E70F846E63D68775B7215EB4563DFD3037244C61CC13"),
            data_response: hex!("5B692A6B1FDD5E25B0DEFAFDE1672E402F8011360CFF3508"),
            mac_request: hex!("F608A9BCA6FFC311"),
            mac_response: hex!("D1FCA6BEF05D24D2"),
        },
        Transaction {
            ksn: hex!("FFFF9876543210E00003"),
            transaction_key: hex!("0DF3D9422ACA56E547676D07AD6BADFA"),
            pin_ciphertext: hex!("18DC07B94797B466"),
            data_request: hex!("BD751E65F10E75B6C1D5B1D283496A36C2DE21D993C387A7"),
            data_response: hex!("345992D4163E4926C927BFD8ABD5D76F087A9CE81D5A27B8"),
            mac_request: hex!("20B59A4FEAC937E3"),
            mac_response: hex!("BAD4CC9CC2AE326C"),
        },
        Transaction {
            ksn: hex!("FFFF9876543210E00004"),
            transaction_key: hex!("279C0F6AEED0BE652B2C733E1383AE91"),
            pin_ciphertext: hex!("0BC79509D5645DF7"),
            data_request: hex!("1118F50947441BBDA3C8C70220021A12EC31CC473F7215F4"),
            data_response: hex!("418C7413576C0D1819E785D3807AF32334231FDEC23414DB"),
            mac_request: hex!("C7BFA6CC44161828"),
            mac_response: hex!("1EB08AEECE6FF0C2"),
        },
        Transaction {
            ksn: hex!("FFFF9876543210E00005"),
            transaction_key: hex!("5F8DC6D2C845C125508DDC048093B83F"),
            pin_ciphertext: hex!("5BC0AF22AD87B327"),
            data_request: hex!("9FD7BD1EC28845ACA93367A9DA9317BD555C6B33AE22D365"),
            data_response: hex!("7D4C109E49E83355A556AE949EED359F4404E7A2F0167C00"),
            mac_request: hex!("0202B96339022058"),
            mac_response: hex!("5CBE3E81D1D2A0FB"),
        },
    ];

    // A.6 example, with the KSN given in its short 8-byte form.
    #[test]
    fn test_derive_initial_key() {
        let ksn = KsnTdes::from_slice(&hex!("9876543210E00001")).unwrap();
        let ik = derive_initial_key(&BDK, &ksn).unwrap();
        assert_eq!(ik, hex!("6AC292FAA1315B4D858AB3A3D7D5933A"));
    }

    // The initial key depends only on the cleared KSN, not on the counter.
    #[test]
    fn test_initial_key_ignores_counter() {
        let first = KsnTdes::new(hex!("FFFF9876543210E00001"));
        let later = KsnTdes::new(hex!("FFFF9876543210E003FF"));
        assert_eq!(
            derive_initial_key(&BDK, &first).unwrap(),
            derive_initial_key(&BDK, &later).unwrap()
        );
    }

    #[test]
    fn test_transaction_sequence() {
        for item in &SEQUENCE {
            let ksn = KsnTdes::new(item.ksn);
            let ik = derive_initial_key(&BDK, &ksn).unwrap();
            let ctk = derive_transaction_key(&ik, &ksn).unwrap();
            assert_eq!(ctk, item.transaction_key);

            let pin_ct = encrypt_pin(&ctk, PIN, PAN, "ISO-0").unwrap();
            assert_eq!(pin_ct, item.pin_ciphertext);
            assert_eq!(decrypt_pin(&ctk, &pin_ct, PAN, "ISO-0").unwrap(), PIN);

            let enc = encrypt_data(&ctk, None, DATA, Action::Request).unwrap();
            assert_eq!(enc, item.data_request);
            let dec = decrypt_data(&ctk, None, &enc, Action::Request).unwrap();
            assert_eq!(dec.len(), 24);
            assert_eq!(&dec[..DATA.len()], DATA);

            let enc = encrypt_data(&ctk, None, DATA, Action::Response).unwrap();
            assert_eq!(enc, item.data_response);
            let dec = decrypt_data(&ctk, None, &enc, Action::Response).unwrap();
            assert_eq!(&dec[..DATA.len()], DATA);

            assert_eq!(
                generate_mac(&ctk, DATA, Action::Request).unwrap(),
                item.mac_request
            );
            assert_eq!(
                generate_mac(&ctk, DATA, Action::Response).unwrap(),
                item.mac_response
            );
        }
    }

    #[test]
    fn test_short_bdk_rejected() {
        let ksn = KsnTdes::new(SEQUENCE[0].ksn);
        assert_eq!(
            derive_initial_key(&BDK[..15], &ksn).unwrap_err(),
            Error::InvalidKeyLength(15)
        );
        assert_eq!(
            derive_transaction_key(&BDK[..15], &ksn).unwrap_err(),
            Error::InvalidKeyLength(15)
        );
    }

    #[test]
    fn test_unknown_format_rejected() {
        let ctk = SEQUENCE[0].transaction_key;
        assert_eq!(
            encrypt_pin(&ctk, PIN, PAN, "XYZ").unwrap_err(),
            Error::UnsupportedPinFormat("XYZ".into())
        );
    }

    #[test]
    fn test_iv_must_be_one_block() {
        let ctk = SEQUENCE[0].transaction_key;
        assert_eq!(
            encrypt_data(&ctk, Some(&[0; 9]), DATA, Action::Request).unwrap_err(),
            Error::InvalidBlockLength(9)
        );
        assert_eq!(
            decrypt_data(&ctk, Some(&[0; 4]), &[0; 8], Action::Request).unwrap_err(),
            Error::InvalidBlockLength(4)
        );
    }

    #[test]
    fn test_ragged_ciphertext_rejected() {
        let ctk = SEQUENCE[0].transaction_key;
        assert_eq!(
            decrypt_data(&ctk, None, &[0; 12], Action::Request).unwrap_err(),
            Error::InvalidBlockLength(12)
        );
    }

    // An explicit zero IV is the same as the default.
    #[test]
    fn test_explicit_zero_iv() {
        let ctk = SEQUENCE[0].transaction_key;
        assert_eq!(
            encrypt_data(&ctk, Some(&[0; 8]), DATA, Action::Request).unwrap(),
            encrypt_data(&ctk, None, DATA, Action::Request).unwrap()
        );
    }
}

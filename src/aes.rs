//! AES DUKPT per ANSI X9.24-3:2017: derivation-data construction, the
//! initial and transaction key derivations, and the per-purpose working
//! keys with the operations layered on them.

use {
    crate::{
        encryption::{aes_cbc_decrypt, aes_cbc_encrypt, aes_cmac, hmac_sha256, AesEcb, AES_BLOCK_LEN},
        ensure_err,
        ksn::KsnAes,
        pinblock::Iso4,
        utils::zero_pad,
        Action, Error, Result,
    },
    zeroize::Zeroize,
};

const DERIVATION_VERSION: u8 = 0x01;

/// Key types of 6.2.1/6.2.2. The name tags (`"AES128"`, `"HMAC256"`, …)
/// are the caller-facing spelling.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeyType {
    Tdes2,
    Tdes3,
    Aes128,
    Aes192,
    Aes256,
    Hmac128,
    Hmac192,
    Hmac256,
}

impl KeyType {
    /// Parse a caller-facing tag, case-insensitively.
    pub fn from_name(name: &str) -> Result<Self> {
        match name.to_uppercase().as_str() {
            "TDES2" => Ok(Self::Tdes2),
            "TDES3" => Ok(Self::Tdes3),
            "AES128" => Ok(Self::Aes128),
            "AES192" => Ok(Self::Aes192),
            "AES256" => Ok(Self::Aes256),
            "HMAC128" => Ok(Self::Hmac128),
            "HMAC192" => Ok(Self::Hmac192),
            "HMAC256" => Ok(Self::Hmac256),
            _ => Err(Error::UnsupportedKeyType(name.to_string())),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Tdes2 => "TDES2",
            Self::Tdes3 => "TDES3",
            Self::Aes128 => "AES128",
            Self::Aes192 => "AES192",
            Self::Aes256 => "AES256",
            Self::Hmac128 => "HMAC128",
            Self::Hmac192 => "HMAC192",
            Self::Hmac256 => "HMAC256",
        }
    }

    /// 6.3.2 table 3 algorithm indicator.
    fn algorithm(self) -> u16 {
        match self {
            Self::Tdes2 => 0x0000,
            Self::Tdes3 => 0x0001,
            Self::Aes128 => 0x0002,
            Self::Aes192 => 0x0003,
            Self::Aes256 => 0x0004,
            Self::Hmac128 | Self::Hmac192 | Self::Hmac256 => 0x0005,
        }
    }

    /// Key length in bits, as carried in derivation data.
    fn bits(self) -> u16 {
        match self {
            Self::Tdes2 | Self::Aes128 | Self::Hmac128 => 0x0080,
            Self::Tdes3 | Self::Aes192 | Self::Hmac192 => 0x00C0,
            Self::Aes256 | Self::Hmac256 => 0x0100,
        }
    }

    /// Key length in bytes.
    pub fn key_len(self) -> usize {
        usize::from(self.bits()) / 8
    }

    /// The AES type keying a BDK or initial key of the given length.
    fn of_key_len(len: usize) -> Result<Self> {
        match len {
            16 => Ok(Self::Aes128),
            24 => Ok(Self::Aes192),
            32 => Ok(Self::Aes256),
            n => Err(Error::InvalidKeyLength(n)),
        }
    }
}

/// 6.3.2 table 2 key-usage indicators, the code points carried in
/// derivation data.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u16)]
pub enum KeyUsage {
    KeyEncryption = 0x0002,
    PinEncryption = 0x1000,
    MessageGeneration = 0x2000,
    MessageVerification = 0x2001,
    MessageAuthentication = 0x2002,
    DataEncrypt = 0x3000,
    DataDecrypt = 0x3001,
    DataEncryption = 0x3002,
    KeyDerivation = 0x8000,
    InitialKey = 0x8001,
}

impl KeyUsage {
    fn code(self) -> u16 {
        self as u16
    }
}

/// 6.3.2 derivation data: the 16-byte block AES-ECB-encrypted for each
/// chunk of derived key material.
struct DerivationData {
    block_counter: u8,
    key_usage: KeyUsage,
    key_type: KeyType,
    id: [u8; 8],
}

impl DerivationData {
    fn new(key_usage: KeyUsage, key_type: KeyType, id: [u8; 8]) -> Self {
        Self {
            block_counter: 0x01,
            key_usage,
            key_type,
            id,
        }
    }

    fn to_bytes(&self) -> [u8; AES_BLOCK_LEN] {
        let mut out = [0u8; AES_BLOCK_LEN];
        out[0] = DERIVATION_VERSION;
        out[1] = self.block_counter;
        out[2..4].copy_from_slice(&self.key_usage.code().to_be_bytes());
        out[4..6].copy_from_slice(&self.key_type.algorithm().to_be_bytes());
        out[6..8].copy_from_slice(&self.key_type.bits().to_be_bytes());
        out[8..].copy_from_slice(&self.id);
        out
    }
}

/// Id field for every derivation after the initial key: the KSN's
/// derivation id followed by a counter value.
fn counter_id(ksn: &KsnAes, tc: u32) -> [u8; 8] {
    let mut id = [0u8; 8];
    id[..4].copy_from_slice(&ksn.derivation_id());
    id[4..].copy_from_slice(&tc.to_be_bytes());
    id
}

/// 6.3.1 derivation: encrypt the derivation data under `key`, bumping the
/// block counter per 16-byte block, and keep the leftmost key-length
/// bytes.
fn derive_key(key: &[u8], data: &mut DerivationData) -> Result<Vec<u8>> {
    let out_len = data.key_type.key_len();
    let cipher = AesEcb::new(key)?;
    let mut derived = Vec::with_capacity(out_len.next_multiple_of(AES_BLOCK_LEN));
    while derived.len() < out_len {
        derived.extend_from_slice(&cipher.encrypt(&data.to_bytes()));
        data.block_counter += 1;
    }
    derived.truncate(out_len);
    Ok(derived)
}

/// Derive a device's initial key from the base derivative key and its
/// 8-byte initial key id (6.3.1).
pub fn derive_initial_key(bdk: &[u8], initial_key_id: &[u8; 8]) -> Result<Vec<u8>> {
    let key_type = KeyType::of_key_len(bdk.len())?;
    let mut data = DerivationData::new(KeyUsage::InitialKey, key_type, *initial_key_id);
    derive_key(bdk, &mut data)
}

/// Derive the current transaction key by walking the set bits of the
/// 32-bit transaction counter, high bit first (6.1, 6.3.1).
pub fn derive_transaction_key(ik: &[u8], ksn: &KsnAes) -> Result<Vec<u8>> {
    let key_type = KeyType::of_key_len(ik.len())?;
    let tc = ksn.transaction_counter();
    let mut key = ik.to_vec();
    let mut working_tc = 0u32;

    for shift in (0..u32::BITS).rev() {
        let mask = 1u32 << shift;
        if tc & mask == 0 {
            continue;
        }
        working_tc |= mask;
        let mut data =
            DerivationData::new(KeyUsage::KeyDerivation, key_type, counter_id(ksn, working_tc));
        let next = derive_key(&key, &mut data)?;
        key.zeroize();
        key = next;
    }
    Ok(key)
}

/// Derive a working key for one purpose from the current transaction key
/// (6.3.3).
pub fn derive_working_key(
    current_key: &[u8],
    ksn: &KsnAes,
    key_usage: KeyUsage,
    key_type: KeyType,
) -> Result<Vec<u8>> {
    let mut data = DerivationData::new(
        key_usage,
        key_type,
        counter_id(ksn, ksn.transaction_counter()),
    );
    derive_key(current_key, &mut data)
}

fn check_working_key(key_len: usize, key_type: KeyType) -> Result<()> {
    ensure_err!(
        matches!(key_len, 16 | 24 | 32),
        Error::InvalidKeyLength(key_len)
    );
    ensure_err!(
        matches!(key_type, KeyType::Aes128 | KeyType::Aes192 | KeyType::Aes256),
        Error::UnsupportedKeyType(key_type.name().to_string())
    );
    ensure_err!(key_len == key_type.key_len(), Error::KeyTypeMismatch);
    Ok(())
}

fn check_working_key_hmac(key_len: usize, key_type: KeyType) -> Result<()> {
    ensure_err!(
        matches!(key_len, 16 | 24 | 32),
        Error::InvalidKeyLength(key_len)
    );
    ensure_err!(
        matches!(
            key_type,
            KeyType::Hmac128 | KeyType::Hmac192 | KeyType::Hmac256
        ),
        Error::UnsupportedKeyType(key_type.name().to_string())
    );
    ensure_err!(key_len == key_type.key_len(), Error::KeyTypeMismatch);
    Ok(())
}

fn mac_usage(action: Action) -> KeyUsage {
    match action {
        Action::Request => KeyUsage::MessageGeneration,
        Action::Response => KeyUsage::MessageVerification,
    }
}

fn data_usage(action: Action) -> KeyUsage {
    match action {
        Action::Request => KeyUsage::DataEncrypt,
        Action::Response => KeyUsage::DataDecrypt,
    }
}

fn resolve_iv(iv: Option<&[u8]>) -> Result<[u8; AES_BLOCK_LEN]> {
    match iv {
        None => Ok([0; AES_BLOCK_LEN]),
        Some(iv) => iv
            .try_into()
            .map_err(|_| Error::InvalidBlockLength(iv.len())),
    }
}

/// Encrypt a PIN under the transaction key: derive the PIN-encryption
/// working key and run the ISO 9564 format-4 codec over it (9.4.2).
pub fn encrypt_pin(
    current_key: &[u8],
    ksn: &KsnAes,
    pin: &str,
    pan: &str,
    key_type: KeyType,
) -> Result<[u8; 16]> {
    check_working_key(current_key.len(), key_type)?;
    let mut pin_key = derive_working_key(current_key, ksn, KeyUsage::PinEncryption, key_type)?;
    let cipher = AesEcb::new(&pin_key)?;
    pin_key.zeroize();
    Iso4::new(cipher).encode(pin, pan)
}

/// Decrypt a format-4 PIN block and recover the PIN digits.
pub fn decrypt_pin(
    current_key: &[u8],
    ksn: &KsnAes,
    ciphertext: &[u8],
    pan: &str,
    key_type: KeyType,
) -> Result<String> {
    check_working_key(current_key.len(), key_type)?;
    let block: [u8; AES_BLOCK_LEN] = ciphertext
        .try_into()
        .map_err(|_| Error::InvalidBlockLength(ciphertext.len()))?;
    let mut pin_key = derive_working_key(current_key, ksn, KeyUsage::PinEncryption, key_type)?;
    let cipher = AesEcb::new(&pin_key)?;
    pin_key.zeroize();
    Iso4::new(cipher).decode(&block, pan)
}

/// AES-CMAC over `data` (6.3.1, 6.3.4); the action selects the
/// message-generation or message-verification working key.
pub fn generate_cmac(
    current_key: &[u8],
    ksn: &KsnAes,
    data: &[u8],
    key_type: KeyType,
    action: Action,
) -> Result<[u8; 16]> {
    check_working_key(current_key.len(), key_type)?;
    let mut mac_key = derive_working_key(current_key, ksn, mac_usage(action), key_type)?;
    let mac = aes_cmac(&mac_key, data)?;
    mac_key.zeroize();
    Ok(mac)
}

/// HMAC-SHA-256 over `data`; the key type must name the HMAC family and
/// match the transaction key's length.
pub fn generate_hmac(
    current_key: &[u8],
    ksn: &KsnAes,
    data: &[u8],
    key_type: KeyType,
    action: Action,
) -> Result<[u8; 32]> {
    check_working_key_hmac(current_key.len(), key_type)?;
    let mut mac_key = derive_working_key(current_key, ksn, mac_usage(action), key_type)?;
    let mac = hmac_sha256(&mac_key, data);
    mac_key.zeroize();
    Ok(mac)
}

/// AES-CBC encrypt `data` (zero-padded to a block multiple) under the
/// data working key for the action. `iv` defaults to the zero vector and
/// must otherwise be exactly one block (6.3.3, 6.5.4).
pub fn encrypt_data(
    current_key: &[u8],
    ksn: &KsnAes,
    iv: Option<&[u8]>,
    data: &[u8],
    key_type: KeyType,
    action: Action,
) -> Result<Vec<u8>> {
    check_working_key(current_key.len(), key_type)?;
    let mut data_key = derive_working_key(current_key, ksn, data_usage(action), key_type)?;
    let iv = resolve_iv(iv)?;
    let mut buf = zero_pad(data, AES_BLOCK_LEN);
    aes_cbc_encrypt(&data_key, &iv, &mut buf)?;
    data_key.zeroize();
    Ok(buf)
}

/// Invert [`encrypt_data`]. The ciphertext must be a whole number of
/// blocks; the caller recovers the unpadded length.
pub fn decrypt_data(
    current_key: &[u8],
    ksn: &KsnAes,
    iv: Option<&[u8]>,
    ciphertext: &[u8],
    key_type: KeyType,
    action: Action,
) -> Result<Vec<u8>> {
    check_working_key(current_key.len(), key_type)?;
    ensure_err!(
        ciphertext.len() % AES_BLOCK_LEN == 0,
        Error::InvalidBlockLength(ciphertext.len())
    );
    let mut data_key = derive_working_key(current_key, ksn, data_usage(action), key_type)?;
    let iv = resolve_iv(iv)?;
    let mut buf = ciphertext.to_vec();
    aes_cbc_decrypt(&data_key, &iv, &mut buf)?;
    data_key.zeroize();
    Ok(buf)
}

//! Block-cipher adapters shared by both derivation engines.
//!
//! The ECB adapters run exactly one block at a time and never pad; the CBC
//! and MAC helpers below them expect buffers the caller has already padded
//! to a whole number of blocks.

// The extern crate needs the leading `::` to stay distinct from the
// crate's own `aes` module.
use ::aes::{Aes128, Aes192, Aes256};
use {
    crate::{ensure_err, Error, Result},
    cbc::{Decryptor as CbcDec, Encryptor as CbcEnc},
    cipher::{
        block_padding::NoPadding, BlockDecrypt as _, BlockDecryptMut as _, BlockEncrypt as _,
        BlockEncryptMut as _, InnerIvInit as _, KeyInit as _, KeyIvInit as _,
    },
    cmac::{Cmac, Mac},
    des::{Des, TdesEde2, TdesEde3},
    hmac::Hmac,
    sha2::Sha256,
};

/// DES and 3DES block length.
pub const DES_BLOCK_LEN: usize = 8;
/// AES block length, shared by all key sizes.
pub const AES_BLOCK_LEN: usize = 16;

/// Object-safe view of an ECB adapter for callers that treat the cipher as
/// an opaque block transform, such as the ISO 9564 format-4 codec.
pub trait BlockCipher {
    fn block_size(&self) -> usize;
    fn encrypt_block(&self, block: &mut [u8]) -> Result<()>;
    fn decrypt_block(&self, block: &mut [u8]) -> Result<()>;
}

/// Single-DES in ECB mode.
#[derive(Debug)]
pub struct DesEcb(Des);

impl DesEcb {
    pub fn new(key: &[u8]) -> Result<Self> {
        let des = Des::new_from_slice(key).map_err(|_| Error::InvalidKeyLength(key.len()))?;
        Ok(Self(des))
    }

    pub fn encrypt(&self, block: &[u8; DES_BLOCK_LEN]) -> [u8; DES_BLOCK_LEN] {
        let mut out = *block;
        self.0.encrypt_block((&mut out).into());
        out
    }

    pub fn decrypt(&self, block: &[u8; DES_BLOCK_LEN]) -> [u8; DES_BLOCK_LEN] {
        let mut out = *block;
        self.0.decrypt_block((&mut out).into());
        out
    }
}

/// 3DES in ECB mode. A 16-byte key runs as two-key EDE (K1 ‖ K2 ‖ K1), a
/// 24-byte key as three-key EDE.
#[derive(Debug)]
pub struct TdesEcb(Tdes);

#[derive(Debug)]
enum Tdes {
    Ede2(TdesEde2),
    Ede3(TdesEde3),
}

impl TdesEcb {
    pub fn new(key: &[u8]) -> Result<Self> {
        let tdes = match key.len() {
            16 => Tdes::Ede2(TdesEde2::new_from_slice(key).unwrap()),
            24 => Tdes::Ede3(TdesEde3::new_from_slice(key).unwrap()),
            n => return Err(Error::InvalidKeyLength(n)),
        };
        Ok(Self(tdes))
    }

    pub fn encrypt(&self, block: &[u8; DES_BLOCK_LEN]) -> [u8; DES_BLOCK_LEN] {
        let mut out = *block;
        match &self.0 {
            Tdes::Ede2(c) => c.encrypt_block((&mut out).into()),
            Tdes::Ede3(c) => c.encrypt_block((&mut out).into()),
        }
        out
    }

    pub fn decrypt(&self, block: &[u8; DES_BLOCK_LEN]) -> [u8; DES_BLOCK_LEN] {
        let mut out = *block;
        match &self.0 {
            Tdes::Ede2(c) => c.decrypt_block((&mut out).into()),
            Tdes::Ede3(c) => c.decrypt_block((&mut out).into()),
        }
        out
    }
}

/// AES in ECB mode; the variant follows the key length.
#[derive(Debug)]
pub struct AesEcb(Aes);

#[derive(Debug)]
enum Aes {
    Aes128(Aes128),
    Aes192(Aes192),
    Aes256(Aes256),
}

impl AesEcb {
    pub fn new(key: &[u8]) -> Result<Self> {
        let aes = match key.len() {
            16 => Aes::Aes128(Aes128::new_from_slice(key).unwrap()),
            24 => Aes::Aes192(Aes192::new_from_slice(key).unwrap()),
            32 => Aes::Aes256(Aes256::new_from_slice(key).unwrap()),
            n => return Err(Error::InvalidKeyLength(n)),
        };
        Ok(Self(aes))
    }

    pub fn encrypt(&self, block: &[u8; AES_BLOCK_LEN]) -> [u8; AES_BLOCK_LEN] {
        let mut out = *block;
        match &self.0 {
            Aes::Aes128(c) => c.encrypt_block((&mut out).into()),
            Aes::Aes192(c) => c.encrypt_block((&mut out).into()),
            Aes::Aes256(c) => c.encrypt_block((&mut out).into()),
        }
        out
    }

    pub fn decrypt(&self, block: &[u8; AES_BLOCK_LEN]) -> [u8; AES_BLOCK_LEN] {
        let mut out = *block;
        match &self.0 {
            Aes::Aes128(c) => c.decrypt_block((&mut out).into()),
            Aes::Aes192(c) => c.decrypt_block((&mut out).into()),
            Aes::Aes256(c) => c.decrypt_block((&mut out).into()),
        }
        out
    }
}

impl BlockCipher for DesEcb {
    fn block_size(&self) -> usize {
        DES_BLOCK_LEN
    }

    fn encrypt_block(&self, block: &mut [u8]) -> Result<()> {
        let len = block.len();
        let block: &mut [u8; DES_BLOCK_LEN] =
            block.try_into().map_err(|_| Error::InvalidBlockLength(len))?;
        *block = self.encrypt(block);
        Ok(())
    }

    fn decrypt_block(&self, block: &mut [u8]) -> Result<()> {
        let len = block.len();
        let block: &mut [u8; DES_BLOCK_LEN] =
            block.try_into().map_err(|_| Error::InvalidBlockLength(len))?;
        *block = self.decrypt(block);
        Ok(())
    }
}

impl BlockCipher for TdesEcb {
    fn block_size(&self) -> usize {
        DES_BLOCK_LEN
    }

    fn encrypt_block(&self, block: &mut [u8]) -> Result<()> {
        let len = block.len();
        let block: &mut [u8; DES_BLOCK_LEN] =
            block.try_into().map_err(|_| Error::InvalidBlockLength(len))?;
        *block = self.encrypt(block);
        Ok(())
    }

    fn decrypt_block(&self, block: &mut [u8]) -> Result<()> {
        let len = block.len();
        let block: &mut [u8; DES_BLOCK_LEN] =
            block.try_into().map_err(|_| Error::InvalidBlockLength(len))?;
        *block = self.decrypt(block);
        Ok(())
    }
}

impl BlockCipher for AesEcb {
    fn block_size(&self) -> usize {
        AES_BLOCK_LEN
    }

    fn encrypt_block(&self, block: &mut [u8]) -> Result<()> {
        let len = block.len();
        let block: &mut [u8; AES_BLOCK_LEN] =
            block.try_into().map_err(|_| Error::InvalidBlockLength(len))?;
        *block = self.encrypt(block);
        Ok(())
    }

    fn decrypt_block(&self, block: &mut [u8]) -> Result<()> {
        let len = block.len();
        let block: &mut [u8; AES_BLOCK_LEN] =
            block.try_into().map_err(|_| Error::InvalidBlockLength(len))?;
        *block = self.decrypt(block);
        Ok(())
    }
}

/// 3DES-CBC encrypt a pre-padded buffer in place under a 16-byte key.
pub fn tdes_cbc_encrypt(key: &[u8], iv: &[u8; DES_BLOCK_LEN], data: &mut [u8]) -> Result<()> {
    ensure_err!(
        data.len() % DES_BLOCK_LEN == 0,
        Error::InvalidBlockLength(data.len())
    );
    let cipher = TdesEde2::new_from_slice(key).map_err(|_| Error::InvalidKeyLength(key.len()))?;
    let mode = CbcEnc::inner_iv_slice_init(cipher, iv).unwrap();
    let len = data.len();
    mode.encrypt_padded_mut::<NoPadding>(data, len).unwrap();
    Ok(())
}

/// 3DES-CBC decrypt a whole number of blocks in place under a 16-byte key.
pub fn tdes_cbc_decrypt(key: &[u8], iv: &[u8; DES_BLOCK_LEN], data: &mut [u8]) -> Result<()> {
    ensure_err!(
        data.len() % DES_BLOCK_LEN == 0,
        Error::InvalidBlockLength(data.len())
    );
    let cipher = TdesEde2::new_from_slice(key).map_err(|_| Error::InvalidKeyLength(key.len()))?;
    let mode = CbcDec::inner_iv_slice_init(cipher, iv).unwrap();
    mode.decrypt_padded_mut::<NoPadding>(data).unwrap();
    Ok(())
}

/// AES-CBC encrypt a pre-padded buffer in place.
pub fn aes_cbc_encrypt(key: &[u8], iv: &[u8; AES_BLOCK_LEN], data: &mut [u8]) -> Result<()> {
    ensure_err!(
        data.len() % AES_BLOCK_LEN == 0,
        Error::InvalidBlockLength(data.len())
    );
    let len = data.len();
    match key.len() {
        16 => {
            let mode = CbcEnc::<Aes128>::new_from_slices(key, iv).unwrap();
            mode.encrypt_padded_mut::<NoPadding>(data, len).unwrap();
        }
        24 => {
            let mode = CbcEnc::<Aes192>::new_from_slices(key, iv).unwrap();
            mode.encrypt_padded_mut::<NoPadding>(data, len).unwrap();
        }
        32 => {
            let mode = CbcEnc::<Aes256>::new_from_slices(key, iv).unwrap();
            mode.encrypt_padded_mut::<NoPadding>(data, len).unwrap();
        }
        n => return Err(Error::InvalidKeyLength(n)),
    }
    Ok(())
}

/// AES-CBC decrypt a whole number of blocks in place.
pub fn aes_cbc_decrypt(key: &[u8], iv: &[u8; AES_BLOCK_LEN], data: &mut [u8]) -> Result<()> {
    ensure_err!(
        data.len() % AES_BLOCK_LEN == 0,
        Error::InvalidBlockLength(data.len())
    );
    match key.len() {
        16 => {
            let mode = CbcDec::<Aes128>::new_from_slices(key, iv).unwrap();
            mode.decrypt_padded_mut::<NoPadding>(data).unwrap();
        }
        24 => {
            let mode = CbcDec::<Aes192>::new_from_slices(key, iv).unwrap();
            mode.decrypt_padded_mut::<NoPadding>(data).unwrap();
        }
        32 => {
            let mode = CbcDec::<Aes256>::new_from_slices(key, iv).unwrap();
            mode.decrypt_padded_mut::<NoPadding>(data).unwrap();
        }
        n => return Err(Error::InvalidKeyLength(n)),
    }
    Ok(())
}

/// AES-CMAC (NIST SP 800-38B); the AES variant follows the key length.
pub fn aes_cmac(key: &[u8], data: &[u8]) -> Result<[u8; AES_BLOCK_LEN]> {
    let tag = match key.len() {
        16 => {
            let mut mac = <Cmac<Aes128> as Mac>::new_from_slice(key).unwrap();
            mac.update(data);
            mac.finalize().into_bytes()
        }
        24 => {
            let mut mac = <Cmac<Aes192> as Mac>::new_from_slice(key).unwrap();
            mac.update(data);
            mac.finalize().into_bytes()
        }
        32 => {
            let mut mac = <Cmac<Aes256> as Mac>::new_from_slice(key).unwrap();
            mac.update(data);
            mac.finalize().into_bytes()
        }
        n => return Err(Error::InvalidKeyLength(n)),
    };
    Ok(tag.into())
}

/// HMAC-SHA-256. The mac itself takes any key length; DUKPT-level key-type
/// checks happen in the caller.
pub fn hmac_sha256(key: &[u8], data: &[u8]) -> [u8; 32] {
    let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(key).unwrap();
    mac.update(data);
    mac.finalize().into_bytes().into()
}

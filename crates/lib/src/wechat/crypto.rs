//! Message encryption for compatible and safe mode.
//!
//! Payloads are AES-256-CBC under the key decoded from `encoding_aes_key`, IV = first 16 key
//! bytes. Plaintext layout: 16 random bytes, 4-byte big-endian message length, message, app id,
//! then PKCS#7 padding to a 32-byte boundary.

use super::message::{cdata_element, end, start, text_element, MessageError};
use super::signature::{constant_time_eq, msg_signature};
use aes::cipher::{block_padding::NoPadding, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig, STANDARD};
use base64::{alphabet, Engine};
use quick_xml::Writer;
use serde::Deserialize;

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

/// Length of `encoding_aes_key` as shown in the official account console.
pub const ENCODING_AES_KEY_LEN: usize = 43;

const PAD_BLOCK: usize = 32;
const RANDOM_LEN: usize = 16;

/// Console keys do not always have zero trailing bits.
const KEY_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_allow_trailing_bits(true),
);

#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("encoding_aes_key must be 43 base64 characters")]
    InvalidKey,
    #[error("invalid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("aes: {0}")]
    Cipher(&'static str),
    #[error("malformed decrypted payload: {0}")]
    Malformed(&'static str),
    #[error("payload is for app id {0}")]
    AppIdMismatch(String),
    #[error("msg_signature mismatch")]
    SignatureMismatch,
    #[error("callback body has no <Encrypt> element")]
    MissingEncrypt,
    #[error(transparent)]
    Message(#[from] MessageError),
    #[error("random bytes: {0}")]
    Random(String),
}

#[derive(Debug, Default, Deserialize)]
struct EncryptedBody {
    #[serde(rename = "Encrypt", default)]
    encrypt: String,
}

/// Encrypts and decrypts callback payloads for one official account.
pub struct MessageCrypto {
    key: [u8; 32],
    app_id: String,
}

impl MessageCrypto {
    pub fn new(encoding_aes_key: &str, app_id: &str) -> Result<Self, CryptoError> {
        let encoded = encoding_aes_key.trim();
        if encoded.len() != ENCODING_AES_KEY_LEN {
            return Err(CryptoError::InvalidKey);
        }
        let key: [u8; 32] = KEY_ENGINE
            .decode(format!("{}=", encoded))?
            .try_into()
            .map_err(|_| CryptoError::InvalidKey)?;
        Ok(Self {
            key,
            app_id: app_id.to_string(),
        })
    }

    /// Decrypt a base64 `<Encrypt>` value and check it was sealed for our app id.
    pub fn decrypt(&self, encrypted: &str) -> Result<String, CryptoError> {
        let mut buf = STANDARD.decode(encrypted.trim())?;
        let plain = Aes256CbcDec::new_from_slices(&self.key, &self.key[..16])
            .map_err(|_| CryptoError::Cipher("invalid key length"))?
            .decrypt_padded_mut::<NoPadding>(&mut buf)
            .map_err(|_| CryptoError::Cipher("ciphertext is not a whole number of blocks"))?;

        let pad = *plain.last().ok_or(CryptoError::Malformed("empty"))? as usize;
        if pad == 0 || pad > PAD_BLOCK || pad > plain.len() {
            return Err(CryptoError::Malformed("bad padding"));
        }
        let content = &plain[..plain.len() - pad];
        if content.len() < RANDOM_LEN + 4 {
            return Err(CryptoError::Malformed("too short"));
        }
        let mut len_bytes = [0u8; 4];
        len_bytes.copy_from_slice(&content[RANDOM_LEN..RANDOM_LEN + 4]);
        let len = u32::from_be_bytes(len_bytes) as usize;
        let rest = &content[RANDOM_LEN + 4..];
        if len > rest.len() {
            return Err(CryptoError::Malformed("length exceeds payload"));
        }
        let (msg, app_id) = rest.split_at(len);
        if app_id != self.app_id.as_bytes() {
            return Err(CryptoError::AppIdMismatch(
                String::from_utf8_lossy(app_id).into_owned(),
            ));
        }
        String::from_utf8(msg.to_vec()).map_err(|_| CryptoError::Malformed("message is not utf-8"))
    }

    /// Encrypt `plaintext` for our app id, returning base64.
    pub fn encrypt(&self, plaintext: &str) -> Result<String, CryptoError> {
        let mut random = [0u8; RANDOM_LEN];
        getrandom::getrandom(&mut random).map_err(|e| CryptoError::Random(e.to_string()))?;
        self.encrypt_with(random, plaintext)
    }

    fn encrypt_with(&self, random: [u8; RANDOM_LEN], plaintext: &str) -> Result<String, CryptoError> {
        let mut buf = Vec::with_capacity(RANDOM_LEN + 4 + plaintext.len() + self.app_id.len() + PAD_BLOCK);
        buf.extend_from_slice(&random);
        buf.extend_from_slice(&(plaintext.len() as u32).to_be_bytes());
        buf.extend_from_slice(plaintext.as_bytes());
        buf.extend_from_slice(self.app_id.as_bytes());
        let pad = PAD_BLOCK - buf.len() % PAD_BLOCK;
        buf.resize(buf.len() + pad, pad as u8);
        let len = buf.len();
        let sealed = Aes256CbcEnc::new_from_slices(&self.key, &self.key[..16])
            .map_err(|_| CryptoError::Cipher("invalid key length"))?
            .encrypt_padded_mut::<NoPadding>(&mut buf, len)
            .map_err(|_| CryptoError::Cipher("plaintext is not a whole number of blocks"))?;
        Ok(STANDARD.encode(sealed))
    }

    /// Check `msg_signature` over the body's `<Encrypt>` and return the decrypted message XML.
    pub fn open(
        &self,
        token: &str,
        timestamp: &str,
        nonce: &str,
        signature: &str,
        body: &str,
    ) -> Result<String, CryptoError> {
        let envelope: EncryptedBody =
            quick_xml::de::from_str(body).map_err(MessageError::from)?;
        if envelope.encrypt.is_empty() {
            return Err(CryptoError::MissingEncrypt);
        }
        let expected = msg_signature(token, timestamp, nonce, &envelope.encrypt);
        if !constant_time_eq(&expected, &signature.trim().to_ascii_lowercase()) {
            return Err(CryptoError::SignatureMismatch);
        }
        self.decrypt(&envelope.encrypt)
    }

    /// Encrypt a passive reply and wrap it in the signed envelope WeChat expects.
    pub fn seal(
        &self,
        token: &str,
        timestamp: i64,
        nonce: &str,
        reply_xml: &str,
    ) -> Result<String, CryptoError> {
        let encrypt = self.encrypt(reply_xml)?;
        let timestamp = timestamp.to_string();
        let signature = msg_signature(token, &timestamp, nonce, &encrypt);

        let mut w = Writer::new(Vec::new());
        start(&mut w, "xml")?;
        cdata_element(&mut w, "Encrypt", &encrypt)?;
        cdata_element(&mut w, "MsgSignature", &signature)?;
        text_element(&mut w, "TimeStamp", &timestamp)?;
        cdata_element(&mut w, "Nonce", nonce)?;
        end(&mut w, "xml")?;
        String::from_utf8(w.into_inner())
            .map_err(|e| CryptoError::Message(MessageError::Encode(e.to_string())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "abcdefghijklmnopqrstuvwxyz0123456789ABCDEFG";
    const APP_ID: &str = "wx_test_app";
    const MESSAGE: &str = "<xml><Content><![CDATA[hello]]></Content></xml>";
    // MESSAGE sealed for APP_ID under KEY with random prefix "0123456789abcdef".
    const SEALED: &str = "Q3stYC6hdFzMh9T8HCvyDHbN6Fa9cLm9zFzeI/qFIuHpaVjY+9V07So4UCQVPmCHdg+1x7elCwIxFy1BcXzorUXKeoeXXSnG4VZNGjAh90+uIwzbGX3nNuKXSKLv5s6s";

    fn crypto() -> MessageCrypto {
        MessageCrypto::new(KEY, APP_ID).unwrap()
    }

    #[test]
    fn key_must_be_43_characters() {
        assert!(matches!(MessageCrypto::new("short", APP_ID), Err(CryptoError::InvalidKey)));
        assert!(MessageCrypto::new(&format!(" {} ", KEY), APP_ID).is_ok());
        let bad = format!("{}!", &KEY[..42]);
        assert!(matches!(MessageCrypto::new(&bad, APP_ID), Err(CryptoError::Base64(_))));
    }

    #[test]
    fn encrypt_matches_known_ciphertext() {
        let sealed = crypto().encrypt_with(*b"0123456789abcdef", MESSAGE).unwrap();
        assert_eq!(sealed, SEALED);
    }

    #[test]
    fn decrypts_known_ciphertext() {
        assert_eq!(crypto().decrypt(SEALED).unwrap(), MESSAGE);
    }

    #[test]
    fn random_prefix_differs_between_calls() {
        let c = crypto();
        let a = c.encrypt(MESSAGE).unwrap();
        let b = c.encrypt(MESSAGE).unwrap();
        assert_ne!(a, b);
        assert_eq!(c.decrypt(&a).unwrap(), MESSAGE);
        assert_eq!(c.decrypt(&b).unwrap(), MESSAGE);
    }

    #[test]
    fn other_app_id_is_rejected() {
        let other = MessageCrypto::new(KEY, "wx_other").unwrap();
        match other.decrypt(SEALED) {
            Err(CryptoError::AppIdMismatch(id)) => assert_eq!(id, APP_ID),
            other => panic!("expected app id mismatch, got {:?}", other),
        }
    }

    #[test]
    fn truncated_ciphertext_is_rejected() {
        let bytes = STANDARD.decode(SEALED).unwrap();
        let cut = STANDARD.encode(&bytes[..bytes.len() - 1]);
        assert!(matches!(crypto().decrypt(&cut), Err(CryptoError::Cipher(_))));
    }

    #[test]
    fn open_checks_msg_signature() {
        let body = format!(
            "<xml><ToUserName><![CDATA[gh_account]]></ToUserName><Encrypt><![CDATA[{}]]></Encrypt></xml>",
            SEALED
        );
        let sig = msg_signature("tok", "1700000000", "n1", SEALED);
        let c = crypto();
        assert_eq!(c.open("tok", "1700000000", "n1", &sig, &body).unwrap(), MESSAGE);
        assert!(matches!(
            c.open("tok", "1700000000", "n2", &sig, &body),
            Err(CryptoError::SignatureMismatch)
        ));
        assert!(matches!(
            c.open("tok", "1700000000", "n1", &sig, "<xml><ToUserName>a</ToUserName></xml>"),
            Err(CryptoError::MissingEncrypt)
        ));
    }

    #[test]
    fn sealed_reply_opens_again() {
        let c = crypto();
        let envelope = c.seal("tok", 1_700_000_000, "n1", MESSAGE).unwrap();
        assert!(envelope.starts_with("<xml><Encrypt><![CDATA["));
        assert!(envelope.contains("<TimeStamp>1700000000</TimeStamp>"));
        assert!(envelope.contains("<Nonce><![CDATA[n1]]></Nonce>"));

        let sig = envelope
            .split("<MsgSignature><![CDATA[")
            .nth(1)
            .and_then(|s| s.split("]]>").next())
            .unwrap();
        assert_eq!(c.open("tok", "1700000000", "n1", sig, &envelope).unwrap(), MESSAGE);
    }
}

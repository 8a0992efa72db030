//! WeChat official account integration: callback signatures, message XML, message encryption,
//! media uploads.
//!
//! The HTTP side lives in the gateway; this module only knows the platform's formats.

mod crypto;
mod media;
mod message;
mod signature;

pub use crypto::{CryptoError, MessageCrypto, ENCODING_AES_KEY_LEN};
pub use media::{MediaUploader, UploadError, WechatMediaClient};
pub use message::{EventType, InboundMessage, MessageError, MsgType, Reply};
pub use signature::{msg_signature, sign, CallbackQuery, SignatureError};

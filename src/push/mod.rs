pub use self::{
    encryption::{encrypt, EncryptionError, CONTENT_ENCODING},
    vapid::{VapidAuthorization, VapidKeys, VapidSigner},
};

pub mod encryption;
pub mod vapid;

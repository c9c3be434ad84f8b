pub mod custody;

pub use custody::{AesKeyCustody, KeyCustody, SigningSecret};

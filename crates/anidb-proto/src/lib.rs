//! Wire codec (C2) and field-mask registry (C3) for the anidb UDP protocol.

pub mod codec;
pub mod error;
pub mod masks;

pub use codec::*;
pub use error::ProtoError;
pub use masks::*;

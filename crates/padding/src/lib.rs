//! Padding support for the naive forward proxy.
//!
//! Three pieces, matching the upstream protocol's own split:
//! - [`codec`]: the length-obfuscating frame codec (component A).
//! - [`registry`]: process-wide, per-upstream padding-capability bookkeeping
//!   (component B).
//! - [`detector`]: decides, for a single connection, which direction (if
//!   any) gets padded (component C).

mod codec;
mod detector;
mod error;
mod registry;

pub use codec::{PaddingCodec, PaddingReadState, PaddingWriteState, DEFAULT_MAX_PADDED_FRAMES};
pub use detector::{Decision, PaddingDetector};
pub use error::PaddingError;
pub use registry::PaddingRegistry;

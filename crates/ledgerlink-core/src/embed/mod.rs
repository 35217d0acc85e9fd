//! Embedded-mode integration with the parent frame.
//!
//! - `protocol`: wire messages, the origin allow-list, and the outbound port
//! - `bridge`: the credential handshake and the control-message loop

pub mod bridge;
pub mod protocol;

pub use bridge::{Dispatch, FrameBridge, IgnoreReason};
pub use protocol::{FrameEvent, InboundMessage, OriginAllowList, OutboundMessage, ParentPort};

//! Shared message model and push-channel codec for `HomeChat`.

pub mod codec;
pub mod conversation;
pub mod event;
pub mod message;

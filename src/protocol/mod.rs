pub mod event;

pub use event::{decode_frame, Action, DecodeError, EntityType, EventKey, InboundEvent, RawEvent};

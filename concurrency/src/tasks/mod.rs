//! Actors driven by runtime tasks.

mod actor;

pub use actor::{
    Actor, ActorRef, InitResult, MessageResponse, RequestResponse, DEFAULT_MAILBOX_CAPACITY,
};

//! # roomcast-concurrency
//!
//! Erlang-style actors on top of the roomcast runtime.
//!
//! An actor is a value that owns its state and is driven by a single task
//! draining a bounded mailbox one event at a time. Nothing else touches the
//! state, so handlers need no locks.
//!
//! - **[`tasks::Actor`]** - the callbacks an actor implements
//! - **[`tasks::ActorRef`]** - the cloneable handle used to talk to it
//!
//! ```ignore
//! use roomcast_concurrency::tasks::{Actor, ActorRef, MessageResponse, RequestResponse};
//!
//! struct Counter { count: u64 }
//!
//! impl Actor for Counter {
//!     type Request = ();
//!     type Message = u64;
//!     type Reply = u64;
//!     type Error = ();
//!
//!     async fn handle_request(&mut self, _: (), _: &ActorRef<Self>) -> RequestResponse<Self> {
//!         RequestResponse::Reply(self.count)
//!     }
//!
//!     async fn handle_message(&mut self, by: u64, _: &ActorRef<Self>) -> MessageResponse {
//!         self.count += by;
//!         MessageResponse::NoReply
//!     }
//! }
//!
//! let counter = Counter { count: 0 }.start();
//! counter.send(2).await?;
//! assert_eq!(counter.request(()).await?, 2);
//! ```
//!
//! ## Mailboxes
//!
//! Mailboxes are bounded. [`tasks::ActorRef::send`] waits for space,
//! [`tasks::ActorRef::try_send`] fails with [`ActorError::MailboxFull`]
//! instead. Messages from one sender are handled in the order they were sent.

pub mod error;
pub mod tasks;

pub use error::ActorError;

//! The [`Actor`] trait and its [`ActorRef`] handle.
//!
//! An actor runs as one spawned task. It goes through `init`, drains its
//! mailbox until a handler asks to stop or every handle is dropped, and then
//! runs `teardown`. A panicking handler ends the actor, not the process.
use crate::error::ActorError;
use futures::future::FutureExt as _;
use roomcast_rt::tasks::{self as rt, mpsc, oneshot, timeout, CancellationToken};
use std::{any::type_name, fmt, future::Future, panic::AssertUnwindSafe, time::Duration};

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Mailbox size used by [`Actor::start`].
pub const DEFAULT_MAILBOX_CAPACITY: usize = 256;

/// What travels through a mailbox.
enum Envelope<A: Actor> {
    Call {
        message: A::Request,
        reply_to: oneshot::Sender<Result<A::Reply, ActorError>>,
    },
    Cast(A::Message),
}

/// Outcome of [`Actor::handle_request`].
pub enum RequestResponse<A: Actor> {
    Reply(A::Reply),
    /// Answer, then leave the main loop.
    Stop(A::Reply),
    /// The actor takes no requests.
    Unused,
}

/// Outcome of [`Actor::handle_message`].
pub enum MessageResponse {
    NoReply,
    Stop,
    /// The actor takes no messages.
    Unused,
}

/// Outcome of [`Actor::init`]. `NoSuccess` skips the main loop but still
/// runs `teardown`.
pub enum InitResult<A: Actor> {
    Success(A),
    NoSuccess(A),
}

pub trait Actor: Send + Sized + 'static {
    type Request: Send;
    type Message: Send;
    type Reply: Send;
    type Error: fmt::Debug + Send;

    fn start(self) -> ActorRef<Self> {
        self.start_with_capacity(DEFAULT_MAILBOX_CAPACITY)
    }

    /// Spawns the actor with room for `capacity` queued events.
    /// [`ActorRef::send`] waits once it is reached.
    fn start_with_capacity(self, capacity: usize) -> ActorRef<Self> {
        let (mailbox, inbox) = mpsc::channel(capacity.max(1));
        let handle = ActorRef {
            mailbox,
            stopped: CancellationToken::new(),
        };
        let life = lifecycle(self, handle.clone(), inbox);

        #[cfg(debug_assertions)]
        let life = slow_poll::WarnOnBlocking::new(life);

        // Watched through the handle's token
        drop(rt::spawn(life));
        handle
    }

    fn init(
        self,
        _handle: &ActorRef<Self>,
    ) -> impl Future<Output = Result<InitResult<Self>, Self::Error>> + Send {
        async { Ok(InitResult::Success(self)) }
    }

    fn handle_request(
        &mut self,
        _message: Self::Request,
        _handle: &ActorRef<Self>,
    ) -> impl Future<Output = RequestResponse<Self>> + Send {
        async { RequestResponse::Unused }
    }

    fn handle_message(
        &mut self,
        _message: Self::Message,
        _handle: &ActorRef<Self>,
    ) -> impl Future<Output = MessageResponse> + Send {
        async { MessageResponse::Unused }
    }

    /// Runs once the mailbox is closed, also after a `NoSuccess` init.
    fn teardown(
        self,
        _handle: &ActorRef<Self>,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send {
        async { Ok(()) }
    }
}

async fn lifecycle<A: Actor>(
    actor: A,
    handle: ActorRef<A>,
    mut inbox: mpsc::Receiver<Envelope<A>>,
) {
    let actor_name = type_name::<A>();
    let last_state = match actor.init(&handle).await {
        Ok(InitResult::Success(mut actor)) => {
            while let Some(envelope) = inbox.recv().await {
                if !dispatch(&mut actor, &handle, envelope).await {
                    break;
                }
            }
            tracing::trace!(actor = actor_name, "leaving main loop");
            Some(actor)
        }
        Ok(InitResult::NoSuccess(actor)) => Some(actor),
        Err(error) => {
            tracing::error!(actor = actor_name, ?error, "{}", ActorError::Initialization);
            None
        }
    };

    // The mailbox closes before the token fires, so a cancelled token
    // always means sends fail
    inbox.close();
    handle.stopped.cancel();

    if let Some(actor) = last_state {
        if let Err(error) = actor.teardown(&handle).await {
            tracing::error!(actor = actor_name, ?error, "teardown failed");
        }
    }
}

/// Handles one envelope. Returns false when the actor should stop.
async fn dispatch<A: Actor>(actor: &mut A, handle: &ActorRef<A>, envelope: Envelope<A>) -> bool {
    match envelope {
        Envelope::Call { message, reply_to } => {
            let handled = AssertUnwindSafe(actor.handle_request(message, handle))
                .catch_unwind()
                .await;
            let (keep_going, reply) = match handled {
                Ok(RequestResponse::Reply(reply)) => (true, Ok(reply)),
                Ok(RequestResponse::Stop(reply)) => (false, Ok(reply)),
                Ok(RequestResponse::Unused) => {
                    tracing::error!(actor = type_name::<A>(), "request not handled");
                    (false, Err(ActorError::RequestUnused))
                }
                Err(panic) => {
                    tracing::error!(actor = type_name::<A>(), ?panic, "request handler panicked");
                    (false, Err(ActorError::Callback))
                }
            };
            if reply_to.send(reply).is_err() {
                tracing::debug!(actor = type_name::<A>(), "requester went away before the reply");
            }
            keep_going
        }
        Envelope::Cast(message) => {
            let handled = AssertUnwindSafe(actor.handle_message(message, handle))
                .catch_unwind()
                .await;
            match handled {
                Ok(MessageResponse::NoReply) => true,
                Ok(MessageResponse::Stop) => false,
                Ok(MessageResponse::Unused) => {
                    tracing::error!(actor = type_name::<A>(), "message not handled");
                    false
                }
                Err(panic) => {
                    tracing::error!(actor = type_name::<A>(), ?panic, "message handler panicked");
                    false
                }
            }
        }
    }
}

/// Cloneable address of a running actor.
pub struct ActorRef<A: Actor> {
    mailbox: mpsc::Sender<Envelope<A>>,
    stopped: CancellationToken,
}

impl<A: Actor> Clone for ActorRef<A> {
    fn clone(&self) -> Self {
        Self {
            mailbox: self.mailbox.clone(),
            stopped: self.stopped.clone(),
        }
    }
}

impl<A: Actor> fmt::Debug for ActorRef<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActorRef")
            .field("actor", &type_name::<A>())
            .field("running", &self.is_running())
            .finish()
    }
}

impl<A: Actor> ActorRef<A> {
    pub async fn request(&self, message: A::Request) -> Result<A::Reply, ActorError> {
        self.request_with_timeout(message, DEFAULT_REQUEST_TIMEOUT)
            .await
    }

    pub async fn request_with_timeout(
        &self,
        message: A::Request,
        wait: Duration,
    ) -> Result<A::Reply, ActorError> {
        let (reply_to, reply) = oneshot::channel();
        self.mailbox
            .send(Envelope::Call { message, reply_to })
            .await?;
        timeout(wait, reply)
            .await
            .map_err(|_elapsed| ActorError::RequestTimeout)?
            .unwrap_or(Err(ActorError::Server))
    }

    /// Enqueues a message, waiting for mailbox space.
    pub async fn send(&self, message: A::Message) -> Result<(), ActorError> {
        Ok(self.mailbox.send(Envelope::Cast(message)).await?)
    }

    /// Enqueues a message or fails at once with
    /// [`ActorError::MailboxFull`]. The message is lost either way.
    pub fn try_send(&self, message: A::Message) -> Result<(), ActorError> {
        Ok(self.mailbox.try_send(Envelope::Cast(message))?)
    }

    pub fn is_running(&self) -> bool {
        !self.stopped.is_cancelled() && !self.mailbox.is_closed()
    }

    /// True when both handles address the same actor instance.
    pub fn same_actor(&self, other: &ActorRef<A>) -> bool {
        self.mailbox.same_channel(&other.mailbox)
    }

    /// Fires once the actor has left its main loop. Cancelling it only
    /// makes the handle report the actor as stopped.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.stopped.clone()
    }
}

#[cfg(debug_assertions)]
mod slow_poll {
    use std::future::Future;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use std::time::{Duration, Instant};

    const SLOW_POLL: Duration = Duration::from_millis(10);

    pin_project_lite::pin_project! {
        /// Logs every poll of the wrapped future that holds the worker
        /// thread for longer than [`SLOW_POLL`].
        pub struct WarnOnBlocking<F> {
            #[pin]
            inner: F,
        }
    }

    impl<F: Future> WarnOnBlocking<F> {
        pub fn new(inner: F) -> Self {
            Self { inner }
        }
    }

    impl<F: Future> Future for WarnOnBlocking<F> {
        type Output = F::Output;

        fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<F::Output> {
            let started = Instant::now();
            let poll = self.project().inner.poll(cx);
            let held = started.elapsed();
            if held > SLOW_POLL {
                tracing::warn!(future = std::any::type_name::<F>(), ?held, "actor blocked its worker thread");
            }
            poll
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    };

    /// Keeps the last lines it was given.
    struct Scrollback {
        lines: Vec<String>,
    }

    enum Query {
        Len,
        Push(String),
        Nap(Duration),
        Explode,
        Close,
    }

    enum Note {
        Push(String),
        Hold(oneshot::Receiver<()>),
    }

    impl Actor for Scrollback {
        type Request = Query;
        type Message = Note;
        type Reply = usize;
        type Error = ();

        async fn handle_request(&mut self, query: Query, _: &ActorRef<Self>) -> RequestResponse<Self> {
            match query {
                Query::Len => RequestResponse::Reply(self.lines.len()),
                Query::Push(line) => {
                    self.lines.push(line);
                    RequestResponse::Reply(self.lines.len())
                }
                Query::Nap(nap) => {
                    rt::sleep(nap).await;
                    RequestResponse::Reply(self.lines.len())
                }
                Query::Explode => panic!("scrollback exploded"),
                Query::Close => RequestResponse::Stop(self.lines.len()),
            }
        }

        async fn handle_message(&mut self, note: Note, _: &ActorRef<Self>) -> MessageResponse {
            match note {
                Note::Push(line) => self.lines.push(line),
                Note::Hold(release) => {
                    let _ = release.await;
                }
            }
            MessageResponse::NoReply
        }
    }

    fn scrollback() -> Scrollback {
        Scrollback { lines: Vec::new() }
    }

    #[test]
    pub fn requests_see_earlier_messages() {
        let runtime = rt::Runtime::new().unwrap();
        runtime.block_on(async move {
            let log = scrollback().start();
            assert_eq!(log.request(Query::Len).await, Ok(0));
            assert_eq!(log.request(Query::Push("a".into())).await, Ok(1));

            log.send(Note::Push("b".into())).await.unwrap();
            log.send(Note::Push("c".into())).await.unwrap();
            assert_eq!(log.request(Query::Len).await, Ok(3));
            assert_eq!(log.request(Query::Close).await, Ok(3));
        });
    }

    #[test]
    pub fn slow_reply_times_out() {
        let runtime = rt::Runtime::new().unwrap();
        runtime.block_on(async move {
            let log = scrollback().start();
            let reply = log
                .request_with_timeout(Query::Nap(Duration::from_millis(200)), Duration::from_millis(50))
                .await;
            assert_eq!(reply, Err(ActorError::RequestTimeout));
        });
    }

    #[test]
    pub fn try_send_fails_on_a_full_mailbox() {
        let runtime = rt::Runtime::new().unwrap();
        runtime.block_on(async move {
            let log = scrollback().start_with_capacity(1);
            let (release, hold) = oneshot::channel();

            // Parked on `hold`, so the next note fills the only slot
            log.try_send(Note::Hold(hold)).unwrap();
            rt::sleep(Duration::from_millis(20)).await;
            log.try_send(Note::Push("queued".into())).unwrap();
            assert_eq!(
                log.try_send(Note::Push("lost".into())),
                Err(ActorError::MailboxFull)
            );

            release.send(()).unwrap();
            assert_eq!(log.request(Query::Len).await, Ok(1));
        });
    }

    #[test]
    pub fn closed_actor_refuses_sends() {
        let runtime = rt::Runtime::new().unwrap();
        runtime.block_on(async move {
            let log = scrollback().start();
            assert!(log.is_running());

            log.request(Query::Close).await.unwrap();
            log.cancellation_token().cancelled().await;

            assert!(!log.is_running());
            assert_eq!(log.send(Note::Push("late".into())).await, Err(ActorError::Server));
        });
    }

    #[test]
    pub fn panic_stops_one_actor() {
        let runtime = rt::Runtime::new().unwrap();
        runtime.block_on(async move {
            let doomed = scrollback().start();
            let bystander = scrollback().start();
            bystander.send(Note::Push("still here".into())).await.unwrap();

            assert_eq!(doomed.request(Query::Explode).await, Err(ActorError::Callback));
            doomed.cancellation_token().cancelled().await;
            assert!(!doomed.is_running());

            assert_eq!(bystander.request(Query::Len).await, Ok(1));
        });
    }

    #[test]
    pub fn handles_compare_by_actor() {
        let runtime = rt::Runtime::new().unwrap();
        runtime.block_on(async move {
            let log = scrollback().start();
            let other = scrollback().start();
            assert!(log.same_actor(&log.clone()));
            assert!(!log.same_actor(&other));
        });
    }

    struct Refuses {
        cleaned_up: Arc<AtomicBool>,
    }

    impl Actor for Refuses {
        type Request = ();
        type Message = ();
        type Reply = ();
        type Error = ();

        async fn init(self, _: &ActorRef<Self>) -> Result<InitResult<Self>, ()> {
            Ok(InitResult::NoSuccess(self))
        }

        async fn teardown(self, _: &ActorRef<Self>) -> Result<(), ()> {
            self.cleaned_up.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    pub fn refused_init_still_tears_down() {
        let runtime = rt::Runtime::new().unwrap();
        runtime.block_on(async move {
            let cleaned_up = Arc::new(AtomicBool::new(false));
            let actor = Refuses {
                cleaned_up: cleaned_up.clone(),
            }
            .start();

            actor.cancellation_token().cancelled().await;
            rt::sleep(Duration::from_millis(20)).await;
            assert!(cleaned_up.load(Ordering::SeqCst));
            assert!(actor.request(()).await.is_err());
        });
    }
}

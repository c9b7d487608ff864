use roomcast_rt::tasks::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ActorError {
    #[error("actor callback panicked")]
    Callback,
    #[error("actor failed to initialize")]
    Initialization,
    #[error("actor is not running")]
    Server,
    #[error("actor mailbox is full")]
    MailboxFull,
    #[error("request timed out")]
    RequestTimeout,
    #[error("unsupported request on this actor")]
    RequestUnused,
}

impl<T> From<mpsc::SendError<T>> for ActorError {
    fn from(_value: mpsc::SendError<T>) -> Self {
        Self::Server
    }
}

impl<T> From<mpsc::TrySendError<T>> for ActorError {
    fn from(value: mpsc::TrySendError<T>) -> Self {
        match value {
            mpsc::TrySendError::Full(_) => Self::MailboxFull,
            mpsc::TrySendError::Closed(_) => Self::Server,
        }
    }
}

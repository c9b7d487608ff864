//! Tokio.rs reexports to prevent tokio dependencies within external code
pub mod mpsc;
pub mod oneshot;

pub use tokio::{
    runtime::Runtime,
    select,
    task::{spawn, JoinHandle},
    time::{interval, sleep, timeout, timeout_at, Instant, MissedTickBehavior},
};
pub use tokio_util::sync::CancellationToken;

pub mod watch {
    pub use tokio::sync::watch::{channel, Receiver, Sender};
}

pub mod net {
    pub use tokio::net::{TcpListener, TcpStream};
}

pub mod io {
    pub use tokio::io::{duplex, AsyncRead, AsyncWrite, AsyncWriteExt, DuplexStream};
}

pub mod codec {
    pub use tokio_util::codec::{
        Decoder, Encoder, Framed, FramedParts, LengthDelimitedCodec, LinesCodec, LinesCodecError,
    };
}

use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TunnelError {
    #[error("no tunnel session for cluster {0}")]
    NoSession(String),

    #[error("failed to dial {addr} through cluster {cluster_id}: {source}")]
    Dial {
        cluster_id: String,
        addr: String,
        #[source]
        source: io::Error,
    },
}

impl From<TunnelError> for io::Error {
    fn from(err: TunnelError) -> Self {
        let kind = match &err {
            TunnelError::NoSession(_) => io::ErrorKind::NotConnected,
            TunnelError::Dial { source, .. } => source.kind(),
        };
        io::Error::new(kind, err)
    }
}

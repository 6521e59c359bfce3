pub mod report;
pub mod slack;
pub mod terminal;

use std::fmt;

use error_stack::Report;
use futures::future::BoxFuture;

use crate::error::NotifierError;

/// Operator channel a message belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    Trade,
    Asset,
    Error,
}

impl Channel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Trade => "trade",
            Self::Asset => "asset",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sink for operator messages.
pub trait Notifier: Send + Sync {
    fn notify<'a>(
        &'a self,
        channel: Channel,
        text: &'a str,
    ) -> BoxFuture<'a, Result<(), Report<NotifierError>>>;
}

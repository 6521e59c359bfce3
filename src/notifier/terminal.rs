use error_stack::Report;
use futures::future::BoxFuture;

use crate::error::NotifierError;
use crate::notifier::{Channel, Notifier};

/// Writes messages to the log instead of a chat service.
pub struct TerminalNotifier;

impl Notifier for TerminalNotifier {
    fn notify<'a>(
        &'a self,
        channel: Channel,
        text: &'a str,
    ) -> BoxFuture<'a, Result<(), Report<NotifierError>>> {
        Box::pin(async move {
            match channel {
                Channel::Error => tracing::error!(channel = %channel, "{text}"),
                Channel::Trade => tracing::warn!(channel = %channel, "{text}"),
                Channel::Asset => tracing::info!(channel = %channel, "{text}"),
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn terminal_notifier_accepts_every_channel() {
        let notifier = TerminalNotifier;
        for channel in [Channel::Trade, Channel::Asset, Channel::Error] {
            notifier.notify(channel, "hello").await.unwrap();
        }
    }
}

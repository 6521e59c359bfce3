use error_stack::{Report, ResultExt};
use futures::future::BoxFuture;
use serde::Deserialize;
use serde_json::json;

use crate::config::SlackConfig;
use crate::error::NotifierError;
use crate::notifier::{Channel, Notifier};

const POST_MESSAGE_URL: &str = "https://slack.com/api/chat.postMessage";

/// Posts to one Slack channel per [`Channel`] through `chat.postMessage`.
pub struct SlackNotifier {
    client: reqwest::Client,
    token: String,
    trade_channel: String,
    asset_channel: String,
    error_channel: String,
}

impl SlackNotifier {
    pub fn new(config: &SlackConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            token: config.token.clone(),
            trade_channel: config.trade_channel.clone(),
            asset_channel: config.asset_channel.clone(),
            error_channel: config.error_channel.clone(),
        }
    }

    fn channel_id(&self, channel: Channel) -> &str {
        match channel {
            Channel::Trade => &self.trade_channel,
            Channel::Asset => &self.asset_channel,
            Channel::Error => &self.error_channel,
        }
    }
}

/// Slack answers HTTP 200 even on failure; `ok` tells the outcome.
#[derive(Debug, Deserialize)]
struct PostMessageResponse {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
}

impl PostMessageResponse {
    fn into_result(self, channel: Channel) -> Result<(), Report<NotifierError>> {
        if self.ok {
            return Ok(());
        }
        Err(Report::new(NotifierError::Send {
            channel: channel.to_string(),
        })
        .attach(format!(
            "slack error: {}",
            self.error.unwrap_or_else(|| "unknown".into())
        )))
    }
}

impl Notifier for SlackNotifier {
    fn notify<'a>(
        &'a self,
        channel: Channel,
        text: &'a str,
    ) -> BoxFuture<'a, Result<(), Report<NotifierError>>> {
        Box::pin(async move {
            let context = || NotifierError::Send {
                channel: channel.to_string(),
            };
            let response: PostMessageResponse = self
                .client
                .post(POST_MESSAGE_URL)
                .bearer_auth(&self.token)
                .json(&json!({ "channel": self.channel_id(channel), "text": text }))
                .send()
                .await
                .change_context_lazy(context)?
                .json()
                .await
                .change_context_lazy(context)?;

            response.into_result(channel)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> SlackConfig {
        SlackConfig {
            token: "xoxb-test".into(),
            trade_channel: "C-TRADE".into(),
            asset_channel: "C-ASSET".into(),
            error_channel: "C-ERROR".into(),
        }
    }

    #[test]
    fn channels_map_to_configured_ids() {
        let notifier = SlackNotifier::new(&config());
        assert_eq!(notifier.channel_id(Channel::Trade), "C-TRADE");
        assert_eq!(notifier.channel_id(Channel::Asset), "C-ASSET");
        assert_eq!(notifier.channel_id(Channel::Error), "C-ERROR");
    }

    #[test]
    fn not_ok_response_is_an_error() {
        let response: PostMessageResponse =
            serde_json::from_str(r#"{"ok":false,"error":"channel_not_found"}"#).unwrap();
        let err = response.into_result(Channel::Trade).unwrap_err();
        assert!(format!("{err:?}").contains("channel_not_found"));

        let ok: PostMessageResponse = serde_json::from_str(r#"{"ok":true,"ts":"1.2"}"#).unwrap();
        assert!(ok.into_result(Channel::Asset).is_ok());
    }

    /// Integration test: requires a real token. Run with `cargo test -- --ignored`
    #[tokio::test]
    #[ignore]
    async fn integration_post_message() {
        let token = std::env::var("SLACK_API_TOKEN").unwrap();
        let channel = std::env::var("SLACK_TEST_CHANNEL").unwrap();
        let notifier = SlackNotifier::new(&SlackConfig {
            token,
            trade_channel: channel.clone(),
            asset_channel: channel.clone(),
            error_channel: channel,
        });
        notifier.notify(Channel::Trade, "integration test").await.unwrap();
    }
}

//! Event service (`ver10/events/wsdl`), pull-point subscriptions only
//!
//! `pull_messages`, `renew` and `unsubscribe` are sent to the subscription
//! reference address returned by `create_pull_point_subscription`, not to the
//! event service address.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::instrument;
use url::Url;

use onvif_core::NormalizedValue;

use crate::client::OnvifClient;
use crate::error::{OnvifError, Result};
use crate::services::{iso_duration, text_element};
use crate::transport::{parse_service_url, RequestOptions};
use crate::types::*;

const NS_WSNT: &str = "http://docs.oasis-open.org/wsn/b-2";
const TOPIC_DIALECT: &str = "http://www.onvif.org/ver10/tev/topicExpression/ConcreteSet";

/// Options for `create_pull_point_subscription`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PullPointOptions {
    /// Topic expression to filter on, e.g. `tns1:VideoSource/MotionAlarm`
    pub topic_filter: Option<String>,
    pub initial_termination_time: Option<Duration>,
}

fn subscription_url(subscription: &PullPointSubscription) -> Result<Url> {
    parse_service_url(&subscription.address)
}

fn wsnt_body(action: &str, inner: &str) -> String {
    format!(
        r#"<wsnt:{a} xmlns:wsnt="{ns}">{inner}</wsnt:{a}>"#,
        a = action,
        ns = NS_WSNT,
        inner = inner
    )
}

impl OnvifClient {
    #[instrument(skip(self))]
    pub async fn get_event_properties(&self) -> Result<NormalizedValue> {
        self.call(ServiceKind::Events, "GetEventProperties", "", &[])
            .await
    }

    #[instrument(skip(self))]
    pub async fn create_pull_point_subscription(
        &self,
        options: PullPointOptions,
    ) -> Result<PullPointSubscription> {
        let mut inner = String::new();
        if let Some(topic) = &options.topic_filter {
            inner.push_str(&format!(
                r#"<tev:Filter><wsnt:TopicExpression xmlns:wsnt="{}" Dialect="{}">{}</wsnt:TopicExpression></tev:Filter>"#,
                NS_WSNT,
                TOPIC_DIALECT,
                onvif_core::xml_escape(topic)
            ));
        }
        if let Some(termination) = options.initial_termination_time {
            inner.push_str(&text_element(
                "tev:InitialTerminationTime",
                &iso_duration(termination),
            ));
        }

        let value = self
            .call(ServiceKind::Events, "CreatePullPointSubscription", &inner, &[])
            .await?;
        PullPointSubscription::from_value(&value).ok_or_else(|| OnvifError::Protocol {
            message: "CreatePullPointSubscription response has no SubscriptionReference"
                .to_string(),
            fault: None,
            xml: None,
        })
    }

    #[instrument(skip(self))]
    pub async fn pull_messages(
        &self,
        subscription: &PullPointSubscription,
        timeout: Duration,
        message_limit: u32,
    ) -> Result<PullMessagesResult> {
        let inner = format!(
            "{}{}",
            text_element("tev:Timeout", &iso_duration(timeout)),
            text_element("tev:MessageLimit", &message_limit.to_string())
        );
        let options = RequestOptions::new(Self::body(ServiceKind::Events, "PullMessages", &inner))
            .url(subscription_url(subscription)?);
        let value = self
            .invoke(options, "PullMessages", &["notificationMessage"])
            .await?;
        Ok(PullMessagesResult::from_value(&value))
    }

    /// Extend a subscription; returns the new termination time
    #[instrument(skip(self))]
    pub async fn renew(
        &self,
        subscription: &PullPointSubscription,
        termination: Duration,
    ) -> Result<Option<DateTime<Utc>>> {
        let inner = text_element("wsnt:TerminationTime", &iso_duration(termination));
        let options =
            RequestOptions::new(wsnt_body("Renew", &inner)).url(subscription_url(subscription)?);
        let value = self.invoke(options, "Renew", &[]).await?;
        Ok(value
            .get("terminationTime")
            .and_then(NormalizedValue::as_datetime))
    }

    #[instrument(skip(self))]
    pub async fn unsubscribe(&self, subscription: &PullPointSubscription) -> Result<()> {
        let options =
            RequestOptions::new(wsnt_body("Unsubscribe", "")).url(subscription_url(subscription)?);
        self.invoke(options, "Unsubscribe", &[]).await?;
        Ok(())
    }
}

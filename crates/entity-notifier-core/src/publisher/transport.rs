//! Publish transport.
//!
//! A publish is a topic, a serialized body and a flat set of string
//! attributes. [`SnsTransport`] sends that through the AWS SNS `Publish`
//! API and reads back the message id and, for FIFO topics, the sequence
//! number.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use aws_sdk_sns::error::DisplayErrorContext;
use aws_sdk_sns::types::MessageAttributeValue;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishRequest {
    pub topic_arn: String,
    pub message: String,
    pub message_attributes: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishReceipt {
    pub message_id: Option<String>,
    pub sequence_number: Option<String>,
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("status: {status} from SNS: {message}")]
    Status { status: u16, message: String },

    #[error("publish request failed: {0}")]
    Request(String),

    #[error("invalid message attribute {name}: {reason}")]
    Attribute { name: String, reason: String },

    #[error("failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),
}

#[async_trait]
pub trait PublishTransport: Send + Sync {
    async fn publish(&self, request: PublishRequest) -> Result<PublishReceipt, TransportError>;
}

/// SNS publish transport.
#[derive(Debug, Clone)]
pub struct SnsTransport {
    client: aws_sdk_sns::Client,
}

impl SnsTransport {
    /// Client from the default AWS credential and region chain. `endpoint`
    /// overrides the service URL, e.g. for a local SNS emulator.
    pub async fn connect(endpoint: Option<&str>) -> Self {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
        if let Some(endpoint) = endpoint {
            debug!(endpoint, "using custom SNS endpoint");
            loader = loader.endpoint_url(endpoint);
        }
        let shared = loader.load().await;
        Self::from_client(aws_sdk_sns::Client::new(&shared))
    }

    pub fn from_client(client: aws_sdk_sns::Client) -> Self {
        Self { client }
    }
}

/// Every attribute goes out with `DataType` `String`.
fn sns_attributes(
    attributes: BTreeMap<String, String>,
) -> Result<HashMap<String, MessageAttributeValue>, TransportError> {
    attributes
        .into_iter()
        .map(|(name, value)| {
            let attribute = MessageAttributeValue::builder()
                .data_type("String")
                .string_value(value)
                .build()
                .map_err(|e| TransportError::Attribute {
                    name: name.clone(),
                    reason: e.to_string(),
                })?;
            Ok((name, attribute))
        })
        .collect()
}

fn receipt(
    topic_arn: &str,
    message_id: Option<&str>,
    sequence_number: Option<&str>,
) -> PublishReceipt {
    if message_id.is_none() {
        warn!(topic_arn, "SNS accepted the publish without a message id");
    }
    PublishReceipt {
        message_id: message_id.map(str::to_string),
        sequence_number: sequence_number.map(str::to_string),
    }
}

#[async_trait]
impl PublishTransport for SnsTransport {
    async fn publish(&self, request: PublishRequest) -> Result<PublishReceipt, TransportError> {
        let attributes = sns_attributes(request.message_attributes)?;
        let output = self
            .client
            .publish()
            .topic_arn(&request.topic_arn)
            .message(request.message)
            .set_message_attributes(Some(attributes))
            .send()
            .await
            .map_err(|e| {
                let message = DisplayErrorContext(&e).to_string();
                match e.raw_response() {
                    Some(response) => TransportError::Status {
                        status: response.status().as_u16(),
                        message,
                    },
                    None => TransportError::Request(message),
                }
            })?;

        Ok(receipt(
            &request.topic_arn,
            output.message_id(),
            output.sequence_number(),
        ))
    }
}

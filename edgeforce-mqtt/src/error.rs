/// Errors an [`crate::MqttClient`] publish call can fail with.
#[derive(Debug, thiserror::Error)]
pub enum MqttError {
    #[error("MQTT client is disabled by configuration")]
    Disabled,
    #[error("MQTT publish circuit breaker is open")]
    BreakerOpen,
    #[error("not currently connected to the broker")]
    NotConnected,
    #[error("payload serialization failed: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("publish failed: {0}")]
    Publish(#[from] rumqttc::ClientError),
}

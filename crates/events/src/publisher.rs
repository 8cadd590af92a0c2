//! Encoding publish helpers.

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, instrument};

use crate::Envelope;
use crate::broker::{BrokerError, Channel, ChannelGuard, Connection};
use crate::codec::{BitcodeCodec, Codec, CodecError, JsonCodec};

#[derive(Debug, Error)]
pub enum PublishError {
    #[error(transparent)]
    Encode(#[from] CodecError),

    #[error("could not open channel: {0}")]
    OpenChannel(#[source] BrokerError),

    #[error("could not publish to '{exchange}' with key '{routing_key}': {source}")]
    Publish {
        exchange: String,
        routing_key: String,
        #[source]
        source: BrokerError,
    },
}

/// Encode `value` with `codec` and publish it on `channel`.
#[instrument(skip(channel, value, codec), fields(content_type = codec.content_type()), err)]
pub fn publish<Ch, T, D>(
    channel: &Ch,
    exchange: &str,
    routing_key: &str,
    value: &T,
    codec: &D,
) -> Result<(), PublishError>
where
    Ch: Channel,
    D: Codec<T>,
{
    let body = codec.encode(value)?;
    let size = body.len();

    channel
        .publish(Envelope::new(exchange, routing_key, codec.content_type(), body))
        .map_err(|source| PublishError::Publish {
            exchange: exchange.to_string(),
            routing_key: routing_key.to_string(),
            source,
        })?;

    debug!(bytes = size, "message published");
    Ok(())
}

pub fn publish_json<Ch, T>(
    channel: &Ch,
    exchange: &str,
    routing_key: &str,
    value: &T,
) -> Result<(), PublishError>
where
    Ch: Channel,
    T: Serialize + serde::de::DeserializeOwned,
{
    publish::<Ch, T, JsonCodec>(channel, exchange, routing_key, value, &JsonCodec)
}

pub fn publish_bitcode<Ch, T>(
    channel: &Ch,
    exchange: &str,
    routing_key: &str,
    value: &T,
) -> Result<(), PublishError>
where
    Ch: Channel,
    T: Serialize + serde::de::DeserializeOwned,
{
    publish::<Ch, T, BitcodeCodec>(channel, exchange, routing_key, value, &BitcodeCodec)
}

/// Publishing session that owns one channel for its lifetime.
#[derive(Debug)]
pub struct Publisher<Ch: Channel> {
    channel: ChannelGuard<Ch>,
}

impl<Ch: Channel> Publisher<Ch> {
    pub fn open<C>(connection: &C) -> Result<Self, PublishError>
    where
        C: Connection<Channel = Ch>,
    {
        let channel = connection.open_channel().map_err(PublishError::OpenChannel)?;
        Ok(Self::new(channel))
    }

    pub fn new(channel: Ch) -> Self {
        Self {
            channel: ChannelGuard::new(channel),
        }
    }

    pub fn publish<T, D>(
        &self,
        exchange: &str,
        routing_key: &str,
        value: &T,
        codec: &D,
    ) -> Result<(), PublishError>
    where
        D: Codec<T>,
    {
        publish::<Ch, T, D>(&self.channel, exchange, routing_key, value, codec)
    }

    pub fn publish_json<T>(&self, exchange: &str, routing_key: &str, value: &T) -> Result<(), PublishError>
    where
        T: Serialize + serde::de::DeserializeOwned,
    {
        publish_json(&*self.channel, exchange, routing_key, value)
    }

    pub fn publish_bitcode<T>(&self, exchange: &str, routing_key: &str, value: &T) -> Result<(), PublishError>
    where
        T: Serialize + serde::de::DeserializeOwned,
    {
        publish_bitcode(&*self.channel, exchange, routing_key, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{BITCODE_CONTENT_TYPE, JSON_CONTENT_TYPE};
    use crate::testing::{MockConnection, MockFailure};
    use peril_core::{PlayingState, RecognitionOfWar, Player};

    #[test]
    fn json_publish_carries_content_type_and_body() {
        let conn = MockConnection::default();
        let publisher = Publisher::open(&conn).unwrap();

        publisher
            .publish_json("peril_direct", "pause", &PlayingState { is_paused: true })
            .unwrap();

        let published = conn.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].exchange(), "peril_direct");
        assert_eq!(published[0].routing_key(), "pause");
        assert_eq!(published[0].content_type(), JSON_CONTENT_TYPE);
        let decoded: PlayingState = serde_json::from_slice(published[0].body()).unwrap();
        assert!(decoded.is_paused);
    }

    #[test]
    fn bitcode_publish_decodes_with_the_same_codec() {
        let conn = MockConnection::default();
        let publisher = Publisher::open(&conn).unwrap();
        let war = RecognitionOfWar {
            attacker: Player { username: "alice".into() },
            defender: Player { username: "bob".into() },
        };

        publisher.publish_bitcode("peril_topic", "war.alice", &war).unwrap();

        let envelope = conn.published().remove(0);
        assert_eq!(envelope.content_type(), BITCODE_CONTENT_TYPE);
        let decoded: RecognitionOfWar = BitcodeCodec.decode(envelope.body()).unwrap();
        assert_eq!(decoded, war);
    }

    #[test]
    fn dropping_the_publisher_closes_its_channel() {
        let conn = MockConnection::default();
        drop(Publisher::open(&conn).unwrap());
        assert_eq!(conn.log(), vec!["open".to_string(), "close".to_string()]);
    }

    #[test]
    fn open_failure_is_reported() {
        let conn = MockConnection::failing(MockFailure::Open);
        assert!(matches!(Publisher::open(&conn), Err(PublishError::OpenChannel(_))));
    }
}

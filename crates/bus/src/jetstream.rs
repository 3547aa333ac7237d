//! NATS JetStream implementation of [`Bus`].
//!
//! Startup ensures the durable `JOBS` stream on the dispatch subject and the
//! durable `WORKERS` pull consumer (ackWait 60 s, maxDeliver 3). Dedup uses
//! the `Nats-Msg-Id` header via the JetStream publish builder.

use std::time::Duration;

use async_nats::jetstream::{self, consumer, stream};
use async_trait::async_trait;
use futures_util::StreamExt;

use bs_domain::stream::BoxStream;
use bs_domain::{Error, Result};

use crate::subjects::{
    ACK_WAIT_SECS, JOBS_DISPATCH, JOBS_STREAM, MAX_DELIVER, WORKERS_CONSUMER,
};
use crate::{Acker, Bus, BusMessage, JobDelivery};

pub struct JetStreamBus {
    client: async_nats::Client,
    js: jetstream::Context,
}

impl JetStreamBus {
    /// Connect and ensure the durable stream + consumer exist.
    pub async fn connect(url: &str) -> Result<Self> {
        let client = async_nats::connect(url)
            .await
            .map_err(|e| Error::Bus(format!("connecting to {url}: {e}")))?;
        let js = jetstream::new(client.clone());

        let stream = js
            .get_or_create_stream(stream::Config {
                name: JOBS_STREAM.to_string(),
                subjects: vec![JOBS_DISPATCH.to_string()],
                ..Default::default()
            })
            .await
            .map_err(bus_err)?;

        stream
            .get_or_create_consumer(
                WORKERS_CONSUMER,
                consumer::pull::Config {
                    durable_name: Some(WORKERS_CONSUMER.to_string()),
                    ack_wait: Duration::from_secs(ACK_WAIT_SECS),
                    max_deliver: MAX_DELIVER,
                    ..Default::default()
                },
            )
            .await
            .map_err(bus_err)?;

        tracing::info!(url, stream = JOBS_STREAM, consumer = WORKERS_CONSUMER, "bus ready");
        Ok(Self { client, js })
    }
}

fn bus_err<E: std::fmt::Display>(e: E) -> Error {
    Error::Bus(e.to_string())
}

struct JsAcker {
    message: jetstream::Message,
}

#[async_trait]
impl Acker for JsAcker {
    async fn ack(&self) {
        if let Err(e) = self.message.ack().await {
            tracing::warn!(error = %e, "job ack failed; message will be redelivered");
        }
    }
}

#[async_trait]
impl Bus for JetStreamBus {
    async fn publish(&self, subject: &str, payload: Vec<u8>) -> Result<()> {
        self.client
            .publish(subject.to_string(), payload.into())
            .await
            .map_err(bus_err)
    }

    async fn publish_job(&self, payload: Vec<u8>, msg_id: &str) -> Result<()> {
        let publish = jetstream::context::Publish::build()
            .message_id(msg_id.to_string())
            .payload(payload.into());
        self.js
            .send_publish(JOBS_DISPATCH.to_string(), publish)
            .await
            .map_err(bus_err)?
            .await
            .map_err(bus_err)?;
        Ok(())
    }

    async fn subscribe(&self, subject: &str) -> Result<BoxStream<'static, BusMessage>> {
        let mut sub = self
            .client
            .subscribe(subject.to_string())
            .await
            .map_err(bus_err)?;
        Ok(Box::pin(async_stream::stream! {
            while let Some(msg) = sub.next().await {
                yield BusMessage {
                    subject: msg.subject.to_string(),
                    payload: msg.payload.to_vec(),
                };
            }
        }))
    }

    async fn consume_jobs(&self) -> Result<BoxStream<'static, JobDelivery>> {
        let stream = self.js.get_stream(JOBS_STREAM).await.map_err(bus_err)?;
        let consumer: consumer::PullConsumer = stream
            .get_consumer(WORKERS_CONSUMER)
            .await
            .map_err(bus_err)?;
        let mut messages = consumer.messages().await.map_err(bus_err)?;
        Ok(Box::pin(async_stream::stream! {
            while let Some(next) = messages.next().await {
                match next {
                    Ok(message) => {
                        let payload = message.payload.to_vec();
                        yield JobDelivery::new(payload, Box::new(JsAcker { message }));
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "job consumer error; continuing");
                    }
                }
            }
        }))
    }
}

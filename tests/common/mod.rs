// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! In-memory broker implementing the transport seams, with knobs to refuse
//! connections, fail publishes and drop every open connection. It also
//! records whether two channel opens ever ran at the same time.

#![allow(dead_code)]

use async_trait::async_trait;
use events_gateway::{
    client::AmqpClient,
    errors::AmqpError,
    queue::QueueDefinition,
    transport::{
        AmqpChannel, AmqpConnection, ChannelSettings, Connector, DeliveryAcker, DeliveryStream,
        InboundDelivery,
    },
};
use futures_util::StreamExt;
use lapin::BasicProperties;
use std::{
    collections::{HashMap, VecDeque},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};
use tokio::sync::mpsc;

#[derive(Debug, Clone)]
pub struct Message {
    pub payload: Vec<u8>,
    pub properties: BasicProperties,
}

#[derive(Default)]
struct BrokerState {
    down: bool,
    epoch: u64,
    fail_publishes: usize,
    queues: HashMap<String, VecDeque<Message>>,
    declared: HashMap<String, bool>,
    consumers: HashMap<String, Consumer>,
    dials: usize,
    connection_closes: usize,
    channels_opened: usize,
    opening: usize,
    overlapping_opens: usize,
    cancels: usize,
    published: Vec<Message>,
    acks: usize,
    rejects: Vec<bool>,
}

struct Consumer {
    tag: String,
    sender: mpsc::UnboundedSender<Message>,
}

#[derive(Clone, Default)]
pub struct FakeBroker {
    state: Arc<Mutex<BrokerState>>,
}

impl FakeBroker {
    pub fn new() -> FakeBroker {
        FakeBroker::default()
    }

    pub fn connector(&self) -> Arc<dyn Connector> {
        Arc::new(FakeConnector {
            broker: self.clone(),
        })
    }

    pub fn client(&self) -> Arc<AmqpClient> {
        Arc::new(AmqpClient::new(
            self.connector(),
            ChannelSettings {
                prefetch_count: 1,
                confirm_timeout: Duration::from_secs(1),
            },
        ))
    }

    /// Refuses (or accepts again) new connections.
    pub fn set_down(&self, down: bool) {
        self.state.lock().unwrap().down = down;
    }

    /// The next `count` publishes fail like a dropped channel would.
    pub fn fail_next_publishes(&self, count: usize) {
        self.state.lock().unwrap().fail_publishes = count;
    }

    /// Kills every open connection, channel and subscription.
    pub fn drop_connections(&self) {
        let mut state = self.state.lock().unwrap();
        state.epoch += 1;
        state.consumers.clear();
    }

    pub fn queued(&self, queue: &str) -> Vec<Message> {
        let state = self.state.lock().unwrap();
        state
            .queues
            .get(queue)
            .map(|messages| messages.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn published(&self) -> Vec<Message> {
        self.state.lock().unwrap().published.clone()
    }

    pub fn dials(&self) -> usize {
        self.state.lock().unwrap().dials
    }

    pub fn connection_closes(&self) -> usize {
        self.state.lock().unwrap().connection_closes
    }

    /// Channel opens that started while another one was still running.
    pub fn overlapping_opens(&self) -> usize {
        self.state.lock().unwrap().overlapping_opens
    }

    pub fn channels_opened(&self) -> usize {
        self.state.lock().unwrap().channels_opened
    }

    pub fn cancels(&self) -> usize {
        self.state.lock().unwrap().cancels
    }

    pub fn acks(&self) -> usize {
        self.state.lock().unwrap().acks
    }

    pub fn rejects(&self) -> Vec<bool> {
        self.state.lock().unwrap().rejects.clone()
    }

    pub fn is_declared_durable(&self, queue: &str) -> Option<bool> {
        self.state.lock().unwrap().declared.get(queue).copied()
    }

    fn epoch(&self) -> u64 {
        self.state.lock().unwrap().epoch
    }

    fn route(state: &mut BrokerState, queue: &str, message: Message) {
        if let Some(consumer) = state.consumers.get(queue) {
            if consumer.sender.send(message.clone()).is_ok() {
                return;
            }
            state.consumers.remove(queue);
        }
        state
            .queues
            .entry(queue.to_owned())
            .or_default()
            .push_back(message);
    }
}

struct FakeConnector {
    broker: FakeBroker,
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(&self) -> Result<Arc<dyn AmqpConnection>, AmqpError> {
        tokio::task::yield_now().await;

        let mut state = self.broker.state.lock().unwrap();
        if state.down {
            return Err(AmqpError::ConnectionError("connection refused".to_owned()));
        }
        state.dials += 1;

        Ok(Arc::new(FakeConnection {
            broker: self.broker.clone(),
            epoch: state.epoch,
            open: AtomicBool::new(true),
        }))
    }
}

struct FakeConnection {
    broker: FakeBroker,
    epoch: u64,
    open: AtomicBool,
}

impl FakeConnection {
    fn alive(&self) -> bool {
        self.open.load(Ordering::SeqCst) && self.broker.epoch() == self.epoch
    }
}

#[async_trait]
impl AmqpConnection for FakeConnection {
    async fn open_channel(
        &self,
        settings: &ChannelSettings,
    ) -> Result<Arc<dyn AmqpChannel>, AmqpError> {
        if !self.alive() {
            return Err(AmqpError::ChannelClosedError);
        }

        {
            let mut state = self.broker.state.lock().unwrap();
            state.opening += 1;
            if state.opening > 1 {
                state.overlapping_opens += 1;
            }
        }

        // open, qos and confirm-select are three round trips on a real broker
        for _ in 0..3 {
            tokio::task::yield_now().await;
        }
        assert!(settings.prefetch_count > 0, "channels need a prefetch bound");

        let mut state = self.broker.state.lock().unwrap();
        state.opening -= 1;
        state.channels_opened += 1;

        Ok(Arc::new(FakeChannel {
            broker: self.broker.clone(),
            epoch: self.epoch,
            open: AtomicBool::new(true),
        }))
    }

    fn is_connected(&self) -> bool {
        self.alive()
    }

    async fn close(&self) -> Result<(), AmqpError> {
        self.open.store(false, Ordering::SeqCst);
        self.broker.state.lock().unwrap().connection_closes += 1;
        Ok(())
    }
}

struct FakeChannel {
    broker: FakeBroker,
    epoch: u64,
    open: AtomicBool,
}

impl FakeChannel {
    fn alive(&self) -> bool {
        self.open.load(Ordering::SeqCst) && self.broker.epoch() == self.epoch
    }
}

#[async_trait]
impl AmqpChannel for FakeChannel {
    fn is_open(&self) -> bool {
        self.alive()
    }

    async fn declare_queue(&self, def: &QueueDefinition) -> Result<(), AmqpError> {
        if !self.alive() {
            return Err(AmqpError::ChannelClosedError);
        }
        let mut state = self.broker.state.lock().unwrap();
        state
            .declared
            .insert(def.name().to_owned(), def.is_durable());
        state.queues.entry(def.name().to_owned()).or_default();
        Ok(())
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &[u8],
        properties: BasicProperties,
    ) -> Result<(), AmqpError> {
        tokio::task::yield_now().await;

        if !self.alive() {
            return Err(AmqpError::ChannelClosedError);
        }

        let mut state = self.broker.state.lock().unwrap();
        if state.fail_publishes > 0 {
            state.fail_publishes -= 1;
            return Err(AmqpError::PublishingError(
                "connection reset by peer".to_owned(),
            ));
        }

        assert_eq!(exchange, "", "events go through the default exchange");
        let message = Message {
            payload: payload.to_vec(),
            properties,
        };
        state.published.push(message.clone());
        FakeBroker::route(&mut state, routing_key, message);

        Ok(())
    }

    async fn consume(&self, queue: &str, consumer_tag: &str) -> Result<DeliveryStream, AmqpError> {
        if !self.alive() {
            return Err(AmqpError::ChannelClosedError);
        }

        let (sender, receiver) = mpsc::unbounded_channel();
        {
            let mut state = self.broker.state.lock().unwrap();
            if let Some(waiting) = state.queues.get_mut(queue) {
                for message in waiting.drain(..) {
                    let _ = sender.send(message);
                }
            }
            state.consumers.insert(
                queue.to_owned(),
                Consumer {
                    tag: consumer_tag.to_owned(),
                    sender,
                },
            );
        }

        let subscription = Subscription {
            broker: self.broker.clone(),
            queue: queue.to_owned(),
            receiver,
        };

        Ok(
            futures_util::stream::unfold(subscription, |mut subscription| async move {
                let message = subscription.receiver.recv().await?;
                let delivery = InboundDelivery::new(
                    message.payload.clone(),
                    message.properties.clone(),
                    false,
                    Box::new(FakeAcker {
                        broker: subscription.broker.clone(),
                        queue: subscription.queue.clone(),
                        message,
                    }),
                );
                Some((Ok(delivery), subscription))
            })
            .boxed(),
        )
    }

    async fn cancel(&self, consumer_tag: &str) -> Result<(), AmqpError> {
        if !self.alive() {
            return Err(AmqpError::ChannelClosedError);
        }

        let mut state = self.broker.state.lock().unwrap();
        state.cancels += 1;
        state
            .consumers
            .retain(|_, consumer| consumer.tag != consumer_tag);
        Ok(())
    }

    async fn close(&self) -> Result<(), AmqpError> {
        self.open.store(false, Ordering::SeqCst);
        Ok(())
    }
}

/// Receiving end of a consumer; messages it never handed out go back to the
/// queue when it is dropped.
struct Subscription {
    broker: FakeBroker,
    queue: String,
    receiver: mpsc::UnboundedReceiver<Message>,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.receiver.close();
        let mut undelivered = vec![];
        while let Ok(message) = self.receiver.try_recv() {
            undelivered.push(message);
        }
        if undelivered.is_empty() {
            return;
        }

        let mut state = self.broker.state.lock().unwrap();
        let queue = state.queues.entry(self.queue.clone()).or_default();
        for message in undelivered.into_iter().rev() {
            queue.push_front(message);
        }
    }
}

struct FakeAcker {
    broker: FakeBroker,
    queue: String,
    message: Message,
}

#[async_trait]
impl DeliveryAcker for FakeAcker {
    async fn ack(&self) -> Result<(), AmqpError> {
        self.broker.state.lock().unwrap().acks += 1;
        Ok(())
    }

    async fn reject(&self, requeue: bool) -> Result<(), AmqpError> {
        let mut state = self.broker.state.lock().unwrap();
        state.rejects.push(requeue);
        if requeue {
            state
                .queues
                .entry(self.queue.clone())
                .or_default()
                .push_back(self.message.clone());
        }
        Ok(())
    }
}

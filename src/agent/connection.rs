//! MQTT connection lifecycle (spec.md §5): a `statum` state machine mirroring
//! the teacher's `MQTTConnection<S: MQTTState>` shape, specialized to this
//! protocol's three phases: `Initializing` (build the client, register the
//! LWT), `Connected` (CONNACK accepted, presence announced and static topics
//! subscribed), `Running` (the single task that owns the event loop for the
//! rest of the process).
//!
//! Everything that can mutate `InstanceSet`, `PendingCall` or the MQTT
//! client lives behind this one task's `tokio::select!`, which is what lets
//! `Dispatcher` stay lock-free (spec.md §5).

use std::sync::Arc;
use std::time::Duration;

use rumqttc::{AsyncClient, ConnectReturnCode, Event, EventLoop, LastWill, MqttOptions, Packet, QoS, Transport};
use statum::{machine, state};
use tokio::sync::{mpsc, oneshot};
use tracing::{error, info, warn};

use super::adapter::{CompletionSender, ExecutionAdapter};
use super::dispatch::{DispatchOutcome, Dispatcher, ReplyMessage};
use crate::config::{AgentOptions, BrokerScheme};
use crate::identity::AgentIdentity;
use crate::protocol::{envelope, presence, topic};

#[state]
#[derive(Debug, Clone, Copy)]
pub enum ConnectionState {
    Initializing,
    Connected,
    Running,
}

#[machine]
pub struct AgentConnection<S: ConnectionState> {
    options: AgentOptions,
    identity: AgentIdentity,
    client: AsyncClient,
    event_loop: Option<EventLoop>,
    dispatcher: Dispatcher,
    adapter: Arc<dyn ExecutionAdapter>,
    completion_tx: mpsc::UnboundedSender<(u64, String)>,
    completion_rx: Option<mpsc::UnboundedReceiver<(u64, String)>>,
}

impl<S: ConnectionState> AgentConnection<S> {
    fn agent_name(&self) -> String {
        self.options.agent.clone().unwrap_or_else(|| self.identity.agent_name.clone())
    }
}

impl AgentConnection<Initializing> {
    pub fn build(options: AgentOptions, identity: AgentIdentity, adapter: Arc<dyn ExecutionAdapter>) -> Self {
        let agent_name = options.agent.clone().unwrap_or_else(|| identity.agent_name.clone());

        let mut mqtt_options = MqttOptions::new(
            identity.client_id.clone(),
            options.host.clone(),
            options.port.parse().unwrap_or_else(|_| options.scheme.default_port()),
        );
        mqtt_options.set_keep_alive(Duration::from_secs(30));

        if let (Some(username), Some(password)) = (&options.username, &options.password) {
            mqtt_options.set_credentials(username, password);
        } else if let Some(token) = &options.token {
            mqtt_options.set_credentials(token, "");
        }

        if matches!(options.scheme, BrokerScheme::Tls) {
            mqtt_options.set_transport(Transport::tls_with_default_config());
        }

        let will_topic = topic::agent_info_topic(&options.domain, &agent_name);
        let will_payload = presence::agent_offline_payload(&identity.hostname);
        mqtt_options.set_last_will(LastWill::new(will_topic, will_payload, QoS::AtLeastOnce, true));

        let (client, event_loop) = AsyncClient::new(mqtt_options, 64);
        let dispatcher = Dispatcher::new(options.functions.clone());
        let (completion_tx, completion_rx) = mpsc::unbounded_channel();

        Self::new(
            options,
            identity,
            client,
            Some(event_loop),
            dispatcher,
            adapter,
            completion_tx,
            Some(completion_rx),
        )
    }

    /// Drives the event loop until CONNACK is accepted, retrying on
    /// transport errors (spec.md §7's TransportError row: logged, no
    /// publishes issued) rather than giving up.
    pub async fn connect(mut self) -> AgentConnection<Connected> {
        let event_loop = self.event_loop.as_mut().expect("event loop present while initializing");
        loop {
            match event_loop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(ack))) if ack.code == ConnectReturnCode::Success => {
                    info!(
                        broker = %self.options.host,
                        domain = %self.options.domain,
                        agent = %self.agent_name(),
                        "connected to broker"
                    );
                    break;
                }
                Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                    error!(?ack.code, "broker rejected connection, retrying");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
                Ok(_) => {}
                Err(error) => {
                    warn!(%error, "error while waiting for CONNACK, retrying");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
        self.transition()
    }
}

impl AgentConnection<Connected> {
    /// Publishes the initial `agentInfo`/`classInfo` and subscribes to the
    /// static call topics (spec.md §4.3).
    pub async fn announce(self) -> AgentConnection<Running> {
        let agent_name = self.agent_name();

        let online = presence::agent_online_payload(&self.identity.hostname, &self.options.version);
        if let Err(error) = self
            .client
            .publish(topic::agent_info_topic(&self.options.domain, &agent_name), QoS::AtLeastOnce, true, online)
            .await
        {
            error!(%error, "failed to publish agentInfo");
        }

        if let Err(error) = self
            .client
            .subscribe(topic::static_topic_filter(&self.options.domain, &agent_name), QoS::AtLeastOnce)
            .await
        {
            error!(%error, "failed to subscribe to static topics");
        }

        if let Err(error) = self
            .client
            .publish(
                topic::class_info_topic(&self.options.domain, &agent_name),
                QoS::AtLeastOnce,
                true,
                self.dispatcher.class_info_payload(),
            )
            .await
        {
            error!(%error, "failed to publish classInfo");
        }

        self.transition()
    }
}

impl AgentConnection<Running> {
    /// Main event loop (spec.md §5): a single task polls the MQTT event loop
    /// and drains adapter completions, so the instance registry, pending
    /// call map and MQTT client all stay single-threaded and lock-free.
    pub async fn run(mut self, mut shutdown: oneshot::Receiver<()>) {
        let mut event_loop = self.event_loop.take().expect("event loop present while running");
        let mut completion_rx = self.completion_rx.take().expect("completion channel present while running");
        let agent_name = self.agent_name();

        loop {
            tokio::select! {
                biased;

                _ = &mut shutdown => {
                    info!("shutdown requested, publishing offline presence");
                    let offline = presence::agent_offline_payload(&self.identity.hostname);
                    let _ = self
                        .client
                        .publish(topic::agent_info_topic(&self.options.domain, &agent_name), QoS::AtLeastOnce, true, offline)
                        .await;
                    let _ = tokio::time::timeout(Duration::from_secs(3), self.client.disconnect()).await;
                    return;
                }

                notification = event_loop.poll() => {
                    match notification {
                        Ok(Event::Incoming(Packet::Publish(publish))) => {
                            self.handle_publish(&publish.topic, &publish.payload, &agent_name).await;
                        }
                        Ok(_) => {}
                        Err(error) => {
                            warn!(%error, "transport error, mqtt client will retry per its own policy");
                        }
                    }
                }

                Some((call_id, result)) = completion_rx.recv() => {
                    let outcome = envelope::parse_adapter_result(&result);
                    if let Some(reply) = self.dispatcher.resolve(call_id, outcome) {
                        self.publish_reply(reply).await;
                    }
                }
            }
        }
    }

    async fn handle_publish(&mut self, topic: &str, payload: &[u8], agent_name: &str) {
        match self.dispatcher.handle_publish(topic, payload) {
            DispatchOutcome::Dropped => {}
            DispatchOutcome::Reply(reply) => self.publish_reply(reply).await,
            DispatchOutcome::InstanceCreated { reply, subscribe_filter } => {
                self.publish_reply(reply).await;
                if let Err(error) = self.client.subscribe(subscribe_filter, QoS::AtLeastOnce).await {
                    error!(%error, "failed to subscribe to new instance topics");
                }
                self.publish_class_info(agent_name).await;
            }
            DispatchOutcome::InstanceDeleted { reply, unsubscribe_filter } => {
                self.publish_reply(reply).await;
                if let Err(error) = self.client.unsubscribe(unsubscribe_filter).await {
                    error!(%error, "failed to unsubscribe from deleted instance topics");
                }
                self.publish_class_info(agent_name).await;
            }
            DispatchOutcome::Invoke(call) => {
                self.adapter.invoke(call, CompletionSender::new(self.completion_tx.clone()));
            }
        }
    }

    async fn publish_reply(&self, reply: ReplyMessage) {
        if let Err(error) = self.client.publish(reply.topic, QoS::AtLeastOnce, false, reply.payload).await {
            error!(%error, "failed to publish reply");
        }
    }

    async fn publish_class_info(&self, agent_name: &str) {
        let payload = self.dispatcher.class_info_payload();
        if let Err(error) = self
            .client
            .publish(topic::class_info_topic(&self.options.domain, agent_name), QoS::AtLeastOnce, true, payload)
            .await
        {
            error!(%error, "failed to publish classInfo");
        }
    }
}

//! Synchronization dispatcher: the command loop coupling the orchestrator
//! to the local event queue.
//!
//! One task owns both channels, the engine, the registry, and the model.
//! Every write on either channel originates here, so frames never
//! interleave. The loop is strictly request/reply on the command channel;
//! next-event and receive notifications go out on the notify channel.

use tandem_engine::EventQueue;
use tandem_protocol::{
    AddNode, ChannelListener, Command, ConfigureCellRadio, ConfigureWifiRadio, FramedChannel, Init,
    NodeKind, PortExchange, ProtocolError, ReceiveMessage, RemoveNode, SendMessage, TimeMessage,
    UpdateNode, PROTOCOL_VERSION,
};

use crate::config::FederateConfig;
use crate::model::NetworkModel;
use crate::notifier::NextEventNotifier;
use crate::registry::{NodeHandle, NodeRegistry, Position};

/// Sends at absolute time zero are bumped to this: the engine will not
/// transmit at the same instant the simulation starts.
const MIN_SEND_TIME_NS: i64 = 1;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
    #[error("handshake failed: {0}")]
    Handshake(String),
    #[error("unrecognized command (code {0}) on the command channel")]
    UnrecognizedCommand(u32),
    #[error("command {0} is not valid on the command channel")]
    MisdirectedCommand(Command),
    #[error("protocol violation: {0}")]
    Violation(String),
}

/// Dispatcher lifecycle. Terminal once shutting down; the channels are
/// never recreated within a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    AwaitingInit,
    Running,
    ShuttingDown,
}

/// Work items on the local event queue. Plain data; execution happens in
/// the dispatcher so per-node ordering rules apply uniformly.
#[derive(Debug, Clone, PartialEq)]
enum SimEvent {
    CreateNode {
        node_id: u32,
        kind: NodeKind,
        position: Position,
    },
    MoveNode {
        node_id: u32,
        position: Position,
    },
    RemoveNode {
        node_id: u32,
    },
    ConfigureWifi {
        node_id: u32,
        on: bool,
        ip: u32,
        power_mw: f64,
    },
    ConfigureCell {
        node_id: u32,
        on: bool,
        ip: u32,
    },
    SendWifi {
        node_id: u32,
        dest: u32,
        message_id: u32,
        length: u32,
    },
    SendCell {
        node_id: u32,
        dest: u32,
        message_id: u32,
        length: u32,
    },
    DeliverWifi {
        node: NodeHandle,
        message_id: u32,
        rssi: i32,
    },
    DeliverCell {
        node: NodeHandle,
        message_id: u32,
    },
}

/// A receipt to report on the notify channel after an event executed.
enum Report {
    Wifi(ReceiveMessage),
    Cell(ReceiveMessage),
}

/// A federate with its notify listener bound but the session not yet
/// established. Split from the handshake so the assigned port can be
/// observed (and logged) before the orchestrator connects.
pub struct BoundFederate<M> {
    notify_listener: ChannelListener,
    config: FederateConfig,
    model: M,
}

impl<M: NetworkModel> BoundFederate<M> {
    pub fn notify_port(&self) -> Result<u16, SessionError> {
        Ok(self.notify_listener.local_port()?)
    }

    /// Run the startup handshake:
    /// 1. accept the notify channel and announce INIT on it,
    /// 2. bind the command listener and send its port over the notify
    ///    channel, then accept,
    /// 3. expect INIT + a valid Init payload; reply SUCCESS, or reply
    ///    SHUT_DOWN and fail the session.
    pub async fn handshake(self) -> Result<Dispatcher<M>, SessionError> {
        let retry = self.config.channel.retry_policy();

        tracing::info!("waiting for orchestrator on the notify channel");
        let mut notify = self.notify_listener.accept(retry).await?;
        notify.write_command(Command::Init).await?;

        let command_listener =
            ChannelListener::bind(&self.config.channel.host, self.config.channel.command_port)
                .await?;
        let command_port = command_listener.local_port()?;
        tracing::info!(command_port, "announcing command channel");
        notify
            .write_message(&PortExchange { port: u32::from(command_port) })
            .await?;
        let mut command = command_listener.accept(retry).await?;

        let first = command.read_command().await?;
        if first != Command::Init {
            return Err(SessionError::Handshake(format!(
                "expected INIT as first command, got {first}"
            )));
        }
        let init: Init = command.read_message().await?;
        if init.protocol_version != PROTOCOL_VERSION {
            command.write_command(Command::ShutDown).await?;
            return Err(SessionError::Handshake(format!(
                "protocol version mismatch: peer {}, ours {}",
                init.protocol_version, PROTOCOL_VERSION
            )));
        }
        if init.start_time < 0 || init.end_time < 0 || init.end_time < init.start_time {
            command.write_command(Command::ShutDown).await?;
            return Err(SessionError::Handshake(format!(
                "meaningless session times: start={} end={}",
                init.start_time, init.end_time
            )));
        }
        command.write_command(Command::Success).await?;
        tracing::info!(
            start = init.start_time,
            end = init.end_time,
            "session established"
        );

        Ok(Dispatcher {
            command,
            notify,
            engine: EventQueue::new(),
            registry: NodeRegistry::new(),
            notifier: NextEventNotifier::new(self.config.session.reported_times_cap),
            model: self.model,
            lenient_decode: self.config.session.lenient_decode,
            state: SessionState::Running,
            did_run_on_start: false,
            advance_grants: 0,
        })
    }
}

pub struct Dispatcher<M> {
    command: FramedChannel,
    notify: FramedChannel,
    engine: EventQueue<SimEvent>,
    registry: NodeRegistry,
    notifier: NextEventNotifier,
    model: M,
    lenient_decode: bool,
    state: SessionState,
    did_run_on_start: bool,
    advance_grants: u64,
}

impl<M: NetworkModel> Dispatcher<M> {
    /// Bind the notify listener. The session starts with `handshake`.
    pub async fn bind(config: FederateConfig, model: M) -> Result<BoundFederate<M>, SessionError> {
        let notify_listener =
            ChannelListener::bind(&config.channel.host, config.channel.notify_port).await?;
        Ok(BoundFederate {
            notify_listener,
            config,
            model,
        })
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// The command loop. Returns cleanly on SHUT_DOWN; channel failures and
    /// protocol desyncs propagate as errors.
    pub async fn run(&mut self) -> Result<(), SessionError> {
        tracing::info!("entering command loop");
        while self.state == SessionState::Running {
            self.dispatch_command().await?;
        }
        tracing::info!(
            advance_grants = self.advance_grants,
            notifications = self.notifier.reported_count(),
            events = self.engine.event_count(),
            "command loop finished"
        );
        Ok(())
    }

    async fn dispatch_command(&mut self) -> Result<(), SessionError> {
        let command = self.command.read_command().await?;
        match command {
            Command::Init => {
                // Not permitted after the handshake; complain but keep the
                // session, matching the reference federate.
                tracing::error!("INIT received after session establishment, ignoring");
            }
            Command::AddNode => self.handle_add_node().await?,
            Command::UpdateNode => self.handle_update_node().await?,
            Command::RemoveNode => self.handle_remove_node().await?,
            Command::AdvanceTime => {
                let target: TimeMessage = self.command.read_message().await?;
                self.advance_to(target.time).await?;
            }
            Command::ConfWifiRadio => self.handle_configure_wifi().await?,
            Command::ConfCellRadio => self.handle_configure_cell().await?,
            Command::SendWifiMsg => self.handle_send(true).await?,
            Command::SendCellMsg => self.handle_send(false).await?,
            Command::ShutDown => {
                tracing::info!("SHUT_DOWN received");
                self.model.on_shutdown(&self.registry);
                self.engine.stop();
                self.state = SessionState::ShuttingDown;
            }
            Command::Unrecognized(raw) => {
                // Fatal desynchronization: bail out rather than guess.
                self.state = SessionState::ShuttingDown;
                return Err(SessionError::UnrecognizedCommand(raw));
            }
            other => {
                // Known command, wrong direction (SUCCESS, END, NEXT_EVENT,
                // RECV_*). Equally fatal.
                self.state = SessionState::ShuttingDown;
                return Err(SessionError::MisdirectedCommand(other));
            }
        }
        Ok(())
    }

    async fn handle_add_node(&mut self) -> Result<(), SessionError> {
        let msg: AddNode = self.command.read_message().await?;
        let position = Position {
            x: msg.x,
            y: msg.y,
            z: msg.z,
        };
        tracing::debug!(
            node = msg.node_id,
            kind = ?msg.kind,
            time = msg.time,
            "ADD_NODE"
        );

        if !self.did_run_on_start {
            // Setup phase: topology must exist before the engine first
            // runs, so creation applies immediately.
            let result = match msg.kind {
                NodeKind::Radio => self.registry.create_radio_node(msg.node_id, position),
                NodeKind::Wired => self.registry.create_wired_node(msg.node_id, position),
                NodeKind::Enb => self.registry.create_cell_tower(msg.node_id, position),
            };
            if let Err(e) = result {
                tracing::error!(node = msg.node_id, %e, "node creation failed");
            }
        } else if msg.kind == NodeKind::Enb {
            tracing::error!("cell towers can only be added before the first advance");
            self.state = SessionState::ShuttingDown;
            return Err(SessionError::Violation(
                "late cell tower addition".to_string(),
            ));
        } else {
            let delay = msg.time - self.engine.now();
            self.schedule_notified(
                delay,
                SimEvent::CreateNode {
                    node_id: msg.node_id,
                    kind: msg.kind,
                    position,
                },
            )
            .await?;
        }
        self.command.write_command(Command::Success).await?;
        Ok(())
    }

    async fn handle_update_node(&mut self) -> Result<(), SessionError> {
        let msg: UpdateNode = self.command.read_message().await?;
        let delay = msg.time - self.engine.now();
        // Each batched move becomes its own event at the same time, so
        // per-node ordering rules apply uniformly.
        for m in &msg.moves {
            tracing::debug!(node = m.node_id, time = msg.time, "UPDATE_NODE");
            self.schedule_notified(
                delay,
                SimEvent::MoveNode {
                    node_id: m.node_id,
                    position: Position {
                        x: m.x,
                        y: m.y,
                        z: m.z,
                    },
                },
            )
            .await?;
        }
        self.command.write_command(Command::Success).await?;
        Ok(())
    }

    async fn handle_remove_node(&mut self) -> Result<(), SessionError> {
        let msg: RemoveNode = self.command.read_message().await?;
        tracing::debug!(node = msg.node_id, time = msg.time, "REMOVE_NODE");
        let delay = msg.time - self.engine.now();
        self.schedule_notified(delay, SimEvent::RemoveNode { node_id: msg.node_id })
            .await?;
        self.command.write_command(Command::Success).await?;
        Ok(())
    }

    async fn handle_configure_wifi(&mut self) -> Result<(), SessionError> {
        match self.command.read_message::<ConfigureWifiRadio>().await {
            Ok(msg) => {
                tracing::debug!(node = msg.node_id, time = msg.time, "CONF_WIFI_RADIO");
                let delay = msg.time - self.engine.now();
                self.schedule_notified(
                    delay,
                    SimEvent::ConfigureWifi {
                        node_id: msg.node_id,
                        on: msg.radio_on,
                        ip: msg.ip_address,
                        power_mw: msg.transmit_power_mw,
                    },
                )
                .await?;
            }
            Err(e) => self.tolerate_decode_failure("CONF_WIFI_RADIO", e)?,
        }
        self.command.write_command(Command::Success).await?;
        Ok(())
    }

    async fn handle_configure_cell(&mut self) -> Result<(), SessionError> {
        match self.command.read_message::<ConfigureCellRadio>().await {
            Ok(msg) => {
                tracing::debug!(node = msg.node_id, time = msg.time, "CONF_CELL_RADIO");
                let delay = msg.time - self.engine.now();
                self.schedule_notified(
                    delay,
                    SimEvent::ConfigureCell {
                        node_id: msg.node_id,
                        on: msg.radio_on,
                        ip: msg.ip_address,
                    },
                )
                .await?;
            }
            Err(e) => self.tolerate_decode_failure("CONF_CELL_RADIO", e)?,
        }
        self.command.write_command(Command::Success).await?;
        Ok(())
    }

    async fn handle_send(&mut self, wifi: bool) -> Result<(), SessionError> {
        match self.command.read_message::<SendMessage>().await {
            Ok(msg) => {
                tracing::debug!(
                    node = msg.node_id,
                    message_id = msg.message_id,
                    time = msg.time,
                    length = msg.length,
                    wifi,
                    "send request"
                );
                let time = if msg.time == 0 { MIN_SEND_TIME_NS } else { msg.time };
                let delay = time - self.engine.now();
                let event = if wifi {
                    SimEvent::SendWifi {
                        node_id: msg.node_id,
                        dest: msg.dest_address,
                        message_id: msg.message_id,
                        length: msg.length,
                    }
                } else {
                    SimEvent::SendCell {
                        node_id: msg.node_id,
                        dest: msg.dest_address,
                        message_id: msg.message_id,
                        length: msg.length,
                    }
                };
                self.schedule_notified(delay, event).await?;
            }
            Err(e) => self.tolerate_decode_failure("send request", e)?,
        }
        self.command.write_command(Command::Success).await?;
        Ok(())
    }

    /// Run the engine up to `target` and confirm on the notify channel.
    async fn advance_to(&mut self, target: i64) -> Result<(), SessionError> {
        if target == 0 {
            // Synchronization point only: topology setup is complete, run
            // the one-time startup hook, but execute nothing.
            tracing::debug!("ADVANCE_TIME 0, sync point");
            self.run_on_start_once();
            self.write_end_reply().await?;
            return Ok(());
        }

        self.run_on_start_once();
        self.advance_grants += 1;

        if target < self.engine.now() {
            tracing::warn!(
                target,
                now = self.engine.now(),
                "advance target below current time, nothing to run"
            );
        }

        while !self.engine.is_finished() {
            match self.engine.next_event_time() {
                Some(t) if t <= target => {
                    if let Some((ts, event)) = self.engine.run_one_event() {
                        let reports = self.execute(ts, event);
                        self.write_reports(reports).await?;
                    }
                }
                _ => break,
            }
        }

        self.write_end_reply().await?;
        Ok(())
    }

    fn run_on_start_once(&mut self) {
        if !self.did_run_on_start {
            self.model.on_start();
            self.did_run_on_start = true;
        }
    }

    /// The advance acknowledgement goes on the notify channel, not the
    /// command channel: "request accepted" and "time has moved" are
    /// deliberately decoupled.
    async fn write_end_reply(&mut self) -> Result<(), SessionError> {
        self.notify.write_command(Command::End).await?;
        self.notify
            .write_message(&TimeMessage {
                time: self.engine.now(),
            })
            .await?;
        Ok(())
    }

    /// Schedule a dispatcher-submitted event and report its fire time if it
    /// is news to the orchestrator. Internal follow-up events (deliveries)
    /// bypass this and go straight to the engine.
    async fn schedule_notified(&mut self, delay: i64, event: SimEvent) -> Result<(), SessionError> {
        let Ok(ts) = self.engine.schedule(delay, event) else {
            tracing::warn!("schedule on stopped engine ignored");
            return Ok(());
        };
        if self.notifier.observe(ts) {
            self.notify.write_command(Command::NextEvent).await?;
            self.notify.write_message(&TimeMessage { time: ts }).await?;
        }
        Ok(())
    }

    /// Execute one event against registry and model. Returns receipts to
    /// put on the notify channel; writing them stays up here so every
    /// channel write goes through the dispatcher task.
    fn execute(&mut self, ts: i64, event: SimEvent) -> Vec<Report> {
        match event {
            SimEvent::CreateNode {
                node_id,
                kind,
                position,
            } => {
                let result = match kind {
                    NodeKind::Radio => self.registry.create_radio_node(node_id, position),
                    NodeKind::Wired => self.registry.create_wired_node(node_id, position),
                    NodeKind::Enb => self.registry.create_cell_tower(node_id, position),
                };
                if let Err(e) = result {
                    tracing::error!(node = node_id, %e, "node creation failed");
                }
                Vec::new()
            }
            SimEvent::MoveNode { node_id, position } => {
                if let Err(e) = self.registry.update_position(node_id, position) {
                    tracing::error!(node = node_id, %e, "position update failed");
                }
                Vec::new()
            }
            SimEvent::RemoveNode { node_id } => {
                if let Err(e) = self.registry.deactivate(node_id) {
                    tracing::error!(node = node_id, %e, "node removal failed");
                }
                Vec::new()
            }
            SimEvent::ConfigureWifi {
                node_id,
                on,
                ip,
                power_mw,
            } => {
                if let Err(e) = self.registry.configure_wifi(node_id, on, ip, power_mw) {
                    tracing::error!(node = node_id, %e, "wifi configuration failed");
                }
                Vec::new()
            }
            SimEvent::ConfigureCell { node_id, on, ip } => {
                if let Err(e) = self.registry.configure_cell(node_id, on, ip) {
                    tracing::error!(node = node_id, %e, "cell configuration failed");
                }
                Vec::new()
            }
            SimEvent::SendWifi {
                node_id,
                dest,
                message_id,
                length,
            } => {
                match self.registry.handle_of(node_id) {
                    Ok(sender) => {
                        let deliveries =
                            self.model
                                .wifi_deliveries(&self.registry, sender, dest, message_id, length);
                        for d in deliveries {
                            // Engine-internal follow-up: no next-event report.
                            let _ = self.engine.schedule(
                                d.delay,
                                SimEvent::DeliverWifi {
                                    node: d.node,
                                    message_id: d.message_id,
                                    rssi: d.rssi,
                                },
                            );
                        }
                    }
                    Err(e) => tracing::error!(node = node_id, %e, "wifi send failed"),
                }
                Vec::new()
            }
            SimEvent::SendCell {
                node_id,
                dest,
                message_id,
                length,
            } => {
                match self.registry.handle_of(node_id) {
                    Ok(sender) => {
                        let deliveries =
                            self.model
                                .cell_deliveries(&self.registry, sender, dest, message_id, length);
                        for d in deliveries {
                            let _ = self.engine.schedule(
                                d.delay,
                                SimEvent::DeliverCell {
                                    node: d.node,
                                    message_id: d.message_id,
                                },
                            );
                        }
                    }
                    Err(e) => tracing::error!(node = node_id, %e, "cell send failed"),
                }
                Vec::new()
            }
            SimEvent::DeliverWifi {
                node,
                message_id,
                rssi,
            } => match self.registry.external_of(node) {
                Ok(external) if self.registry.is_active(node) => {
                    vec![Report::Wifi(ReceiveMessage {
                        time: ts,
                        node_id: external,
                        message_id,
                        rssi,
                    })]
                }
                _ => {
                    tracing::debug!(%node, message_id, "delivery to missing or deactivated node dropped");
                    Vec::new()
                }
            },
            SimEvent::DeliverCell { node, message_id } => match self.registry.external_of(node) {
                Ok(external) if self.registry.is_active(node) => {
                    vec![Report::Cell(ReceiveMessage {
                        time: ts,
                        node_id: external,
                        message_id,
                        rssi: 0,
                    })]
                }
                _ => {
                    tracing::debug!(%node, message_id, "delivery to missing or deactivated node dropped");
                    Vec::new()
                }
            },
        }
    }

    async fn write_reports(&mut self, reports: Vec<Report>) -> Result<(), SessionError> {
        for report in reports {
            match report {
                Report::Wifi(msg) => {
                    self.notify.write_command(Command::RecvWifiMsg).await?;
                    self.notify.write_message(&msg).await?;
                }
                Report::Cell(msg) => {
                    self.notify.write_command(Command::RecvCellMsg).await?;
                    self.notify.write_message(&msg).await?;
                }
            }
        }
        Ok(())
    }

    /// Lenient mode logs the malformed payload and moves on (the SUCCESS
    /// reply still goes out); strict mode ends the session.
    fn tolerate_decode_failure(
        &mut self,
        what: &str,
        e: ProtocolError,
    ) -> Result<(), SessionError> {
        if self.lenient_decode && !e.is_fatal() {
            tracing::error!(%e, what, "malformed payload ignored");
            Ok(())
        } else {
            self.state = SessionState::ShuttingDown;
            Err(SessionError::Protocol(e))
        }
    }
}

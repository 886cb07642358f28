//! Test harness: an in-process federate plus a socket-level orchestrator
//! double speaking the real wire protocol.

use tandem_federate::config::FederateConfig;
use tandem_federate::{Dispatcher, NetworkModel, RangeModel, SessionError};
use tandem_protocol::{
    AddNode, Command, ConfigureWifiRadio, FramedChannel, Init, NodeKind, NodeMove, PortExchange,
    ReceiveMessage, RemoveNode, RetryPolicy, SendMessage, TimeMessage, UpdateNode,
    PROTOCOL_VERSION,
};
use tokio::task::JoinHandle;

/// Loopback config with ephemeral ports and short poll windows.
pub fn test_config() -> FederateConfig {
    let mut cfg = FederateConfig::default();
    cfg.channel.host = "127.0.0.1".into();
    cfg.channel.notify_port = 0;
    cfg.channel.command_port = 0;
    cfg.channel.poll_timeout_ms = 200;
    cfg
}

pub struct FederateHandle {
    pub task: JoinHandle<Result<(), SessionError>>,
    pub notify_port: u16,
}

/// Bind and run a federate with the built-in range model in a background
/// task. The handshake runs inside the task; connect an `Orchestrator` to
/// drive it.
pub async fn spawn_federate(cfg: FederateConfig) -> anyhow::Result<FederateHandle> {
    let model = RangeModel::new(
        cfg.model.wifi_range,
        cfg.model.link_delay_ns,
        cfg.model.cell_delay_ns,
    );
    spawn_federate_with_model(cfg, model).await
}

/// Same, with a caller-supplied network model (for hook and delivery spies).
pub async fn spawn_federate_with_model<M>(
    cfg: FederateConfig,
    model: M,
) -> anyhow::Result<FederateHandle>
where
    M: NetworkModel + Send + 'static,
{
    let bound = Dispatcher::bind(cfg, model).await?;
    let notify_port = bound.notify_port()?;
    let task = tokio::spawn(async move {
        let mut dispatcher = bound.handshake().await?;
        dispatcher.run().await
    });
    Ok(FederateHandle { task, notify_port })
}

/// The orchestrator side of the coupling: two framed channels plus a log of
/// everything the federate volunteered on the notify channel.
pub struct Orchestrator {
    pub notify: FramedChannel,
    pub command: FramedChannel,
    pub notifications: Vec<i64>,
    pub wifi_receipts: Vec<ReceiveMessage>,
    pub cell_receipts: Vec<ReceiveMessage>,
}

#[allow(dead_code)]
impl Orchestrator {
    /// Connect both channels: notify first, then the command port announced
    /// over it.
    pub async fn connect(notify_port: u16) -> anyhow::Result<Self> {
        let retry = RetryPolicy::default();
        let mut notify = FramedChannel::connect("127.0.0.1", notify_port, retry).await?;
        let first = notify.read_command().await?;
        anyhow::ensure!(first == Command::Init, "expected INIT announcement, got {first}");
        let exchange: PortExchange = notify.read_message().await?;
        let command =
            FramedChannel::connect("127.0.0.1", exchange.port as u16, retry).await?;
        Ok(Self {
            notify,
            command,
            notifications: Vec::new(),
            wifi_receipts: Vec::new(),
            cell_receipts: Vec::new(),
        })
    }

    pub async fn init(&mut self, start: i64, end: i64) -> anyhow::Result<Command> {
        self.init_versioned(PROTOCOL_VERSION, start, end).await
    }

    pub async fn init_versioned(
        &mut self,
        version: u32,
        start: i64,
        end: i64,
    ) -> anyhow::Result<Command> {
        self.command.write_command(Command::Init).await?;
        self.command
            .write_message(&Init {
                protocol_version: version,
                start_time: start,
                end_time: end,
            })
            .await?;
        Ok(self.command.read_command().await?)
    }

    pub async fn add_node(
        &mut self,
        time: i64,
        node_id: u32,
        kind: NodeKind,
        x: f64,
        y: f64,
    ) -> anyhow::Result<Command> {
        self.command.write_command(Command::AddNode).await?;
        self.command
            .write_message(&AddNode {
                time,
                node_id,
                kind,
                x,
                y,
                z: 0.0,
            })
            .await?;
        Ok(self.command.read_command().await?)
    }

    pub async fn update_nodes(
        &mut self,
        time: i64,
        moves: &[(u32, f64, f64)],
    ) -> anyhow::Result<Command> {
        self.command.write_command(Command::UpdateNode).await?;
        self.command
            .write_message(&UpdateNode {
                time,
                moves: moves
                    .iter()
                    .map(|&(node_id, x, y)| NodeMove { node_id, x, y, z: 0.0 })
                    .collect(),
            })
            .await?;
        Ok(self.command.read_command().await?)
    }

    pub async fn remove_node(&mut self, time: i64, node_id: u32) -> anyhow::Result<Command> {
        self.command.write_command(Command::RemoveNode).await?;
        self.command
            .write_message(&RemoveNode { time, node_id })
            .await?;
        Ok(self.command.read_command().await?)
    }

    pub async fn configure_wifi(
        &mut self,
        time: i64,
        node_id: u32,
        ip: u32,
        power_mw: f64,
    ) -> anyhow::Result<Command> {
        self.command.write_command(Command::ConfWifiRadio).await?;
        self.command
            .write_message(&ConfigureWifiRadio {
                time,
                node_id,
                radio_on: true,
                ip_address: ip,
                transmit_power_mw: power_mw,
            })
            .await?;
        Ok(self.command.read_command().await?)
    }

    pub async fn send_wifi(
        &mut self,
        time: i64,
        node_id: u32,
        dest: u32,
        message_id: u32,
        length: u32,
    ) -> anyhow::Result<Command> {
        self.command.write_command(Command::SendWifiMsg).await?;
        self.command
            .write_message(&SendMessage {
                time,
                node_id,
                dest_address: dest,
                message_id,
                length,
            })
            .await?;
        Ok(self.command.read_command().await?)
    }

    /// Request a time advance and drain the notify channel until the END
    /// confirmation. Next-event and receive notifications picked up along
    /// the way land in the public logs. Returns the granted time.
    pub async fn advance(&mut self, target: i64) -> anyhow::Result<i64> {
        self.command.write_command(Command::AdvanceTime).await?;
        self.command
            .write_message(&TimeMessage { time: target })
            .await?;
        loop {
            match self.notify.read_command().await? {
                Command::NextEvent => {
                    let t: TimeMessage = self.notify.read_message().await?;
                    self.notifications.push(t.time);
                }
                Command::RecvWifiMsg => {
                    let msg: ReceiveMessage = self.notify.read_message().await?;
                    self.wifi_receipts.push(msg);
                }
                Command::RecvCellMsg => {
                    let msg: ReceiveMessage = self.notify.read_message().await?;
                    self.cell_receipts.push(msg);
                }
                Command::End => {
                    let t: TimeMessage = self.notify.read_message().await?;
                    return Ok(t.time);
                }
                other => anyhow::bail!("unexpected {other} on the notify channel"),
            }
        }
    }

    pub async fn shutdown(&mut self) -> anyhow::Result<()> {
        self.command.write_command(Command::ShutDown).await?;
        Ok(())
    }
}

/// Spawn a federate and complete the handshake with default session times.
pub async fn establish(cfg: FederateConfig) -> anyhow::Result<(FederateHandle, Orchestrator)> {
    let federate = spawn_federate(cfg).await?;
    let mut orchestrator = Orchestrator::connect(federate.notify_port).await?;
    let reply = orchestrator.init(0, 1_000_000_000_000).await?;
    anyhow::ensure!(reply == Command::Success, "handshake refused: {reply}");
    Ok((federate, orchestrator))
}

use shuttle_core::{
    AgentId, Filter, Gateway, GatewayConfig, GenericMessage, Performative, Received, ShellExecReq,
    Timeout,
};
use tokio::signal;
use tracing::{error, info, warn};

const SHELL_SERVICE: &str = "org.arl.fjage.shell.Services.SHELL";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    // Logging / tracing
    let filter =
        std::env::var("RUST_LOG").unwrap_or_else(|_| "info,shuttle_core=info,bus_probe=info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .compact()
        .init();

    // Defaults + env + optional TOML overlay
    let cfg = GatewayConfig::load();
    info!(target = "bus_probe", host = %cfg.host, port = cfg.port, "Connecting to master container");

    let gw = Gateway::connect_with(cfg).await?;
    info!(target = "bus_probe", name = %gw.name(), peer = %gw.peer_addr(), "Connected");

    // 1) Directory lookups for every service named on the command line
    for service in std::env::args().skip(1) {
        let agents = gw.agents_for_service(&service, None).await?;
        if agents.is_empty() {
            warn!(target = "bus_probe", service = %service, "No agent provides service");
        } else {
            let names: Vec<String> = agents.iter().map(AgentId::to_wire).collect();
            info!(target = "bus_probe", service = %service, agents = ?names, "Service providers");
        }
    }

    // 2) Optional shell command through the shell agent
    if let Ok(cmd) = std::env::var("PROBE_SHELL_CMD") {
        match gw.agent_for_service(SHELL_SERVICE, None).await? {
            Some(shell) => {
                let mut req = ShellExecReq::command(shell, cmd);
                match gw.request(&mut req, Timeout::millis(5000)).await? {
                    Some(rsp) => info!(target = "bus_probe", perf = ?rsp.header().and_then(|h| h.perf), "Shell answered"),
                    None => warn!(target = "bus_probe", "Shell did not answer in time"),
                }
            }
            None => warn!(target = "bus_probe", "No shell agent on the bus"),
        }
    }

    // 3) Listen on topics (comma separated, agent names map to their notifications)
    let topics = std::env::var("PROBE_TOPICS").unwrap_or_default();
    for topic in topics.split(',').map(str::trim).filter(|t| !t.is_empty()) {
        match topic.strip_prefix('@') {
            Some(agent) => gw.subscribe(AgentId::new(agent)),
            None => gw.subscribe(topic),
        };
    }
    if let Ok(target) = std::env::var("PROBE_ANNOUNCE") {
        let mut hello = GenericMessage::new(Performative::Inform, Gateway::topic(target.as_str()));
        hello.put("probe", gw.name());
        gw.send(&mut hello).await?;
    }
    info!(target = "bus_probe", topics = ?gw.subscriptions(), "Listening; Ctrl-C to stop");

    loop {
        tokio::select! {
            _ = signal::ctrl_c() => {
                info!(target = "bus_probe", "Interrupted");
                break;
            }
            received = gw.receive(Filter::Any, Timeout::Blocking) => match received {
                Ok(Some(msg)) => log_message(&msg),
                Ok(None) => {}
                Err(e) => {
                    error!(target = "bus_probe", error = %e, "Session ended");
                    break;
                }
            }
        }
    }

    gw.close().await;
    Ok(())
}

fn log_message(msg: &Received) {
    match msg {
        Received::Generic(m) => info!(
            target = "bus_probe",
            sender = ?m.header.sender.as_ref().map(AgentId::to_wire),
            perf = ?m.header.perf,
            map = %serde_json::Value::Object(m.map.clone()),
            "GenericMessage"
        ),
        Received::Raw(env) => info!(
            target = "bus_probe",
            msg_type = ?env.msg_type(),
            body = %serde_json::Value::Object(env.as_map().clone()),
            "Unregistered message"
        ),
        other => info!(target = "bus_probe", message = ?other, "Message"),
    }
}

use super::*;
use shuttle_core::{AgentId, Timeout};

#[tokio::test]
async fn test_agents_reply_shape() {
    let master = FakeMaster::start().await;
    let (_gw, mut peer) = connect(&master, "gw").await;

    let reply = peer.ask(json!({"action": "agents"})).await;
    assert_eq!(reply["inResponseTo"], "agents");
    assert_eq!(reply["agentIDs"], json!(["gw"]));
    assert!(reply.get("action").is_none());
}

#[tokio::test]
async fn test_contains_agent_checks_own_name() {
    let master = FakeMaster::start().await;
    let (_gw, mut peer) = connect(&master, "gw").await;

    let yes = peer.ask(json!({"action": "containsAgent", "agentID": "gw"})).await;
    assert_eq!(yes["answer"], true);
    let no = peer.ask(json!({"action": "containsAgent", "agentID": "shell"})).await;
    assert_eq!(no["answer"], false);
}

#[tokio::test]
async fn test_service_requests_answer_empty() {
    let master = FakeMaster::start().await;
    let (_gw, mut peer) = connect(&master, "gw").await;

    let services = peer.ask(json!({"action": "services"})).await;
    assert_eq!(services["services"], json!([]));

    let one = peer
        .ask(json!({"action": "agentForService", "service": "SHELL"}))
        .await;
    assert_eq!(one["inResponseTo"], "agentForService");
    assert!(one.get("agentID").is_none());

    let all = peer
        .ask(json!({"action": "agentsForService", "service": "SHELL"}))
        .await;
    assert_eq!(all["agentIDs"], json!([]));
}

#[tokio::test]
async fn test_agent_for_service_found() {
    let master = FakeMaster::start().await;
    let (gw, mut peer) = connect(&master, "gw").await;

    let (found, ()) = tokio::join!(
        gw.agent_for_service("org.arl.fjage.shell.Services.SHELL", Timeout::millis(1000)),
        async {
            let query = peer.expect_action("agentForService").await;
            assert_eq!(query["service"], "org.arl.fjage.shell.Services.SHELL");
            peer.push(json!({"id": query["id"], "inResponseTo": "agentForService", "agentID": "shell"}))
                .await;
        }
    );
    assert_eq!(found.unwrap(), Some(AgentId::new("shell")));
}

#[tokio::test]
async fn test_agent_for_service_empty_answer_is_none() {
    let master = FakeMaster::start().await;
    let (gw, mut peer) = connect(&master, "gw").await;

    let (found, ()) = tokio::join!(
        gw.agent_for_service("NOBODY", None),
        peer.answer_next("agentForService", json!({"agentID": ""}))
    );
    assert_eq!(found.unwrap(), None);
}

#[tokio::test]
async fn test_agent_for_service_times_out() {
    let master = FakeMaster::start().await;
    let (gw, mut peer) = connect(&master, "gw").await;

    let started = tokio::time::Instant::now();
    let found = gw
        .agent_for_service("SLOW", Timeout::millis(150))
        .await
        .unwrap();
    assert!(found.is_none());
    assert!(started.elapsed() >= Duration::from_millis(150));

    // The master saw the query; answering late must not disturb the gateway
    let query = peer.expect_action("agentForService").await;
    peer.push(json!({"id": query["id"], "inResponseTo": "agentForService", "agentID": "late"}))
        .await;
    let reply = peer.ask(json!({"action": "agents"})).await;
    assert_eq!(reply["agentIDs"], json!(["gw"]));
    assert_eq!(gw.pending_messages(), 0);
}

#[tokio::test]
async fn test_agents_for_service_lists_providers() {
    let master = FakeMaster::start().await;
    let (gw, mut peer) = connect(&master, "gw").await;

    let (agents, ()) = tokio::join!(
        gw.agents_for_service("NAV", None),
        peer.answer_next("agentsForService", json!({"agentIDs": ["nav", "nav2"]}))
    );
    assert_eq!(
        agents.unwrap(),
        vec![AgentId::new("nav"), AgentId::new("nav2")]
    );

    let empty = gw
        .agents_for_service("NAV", Timeout::millis(50))
        .await
        .unwrap();
    assert!(empty.is_empty());
}

use super::*;
use serde::{Deserialize, Serialize};
use shuttle_core::{
    AgentId, Filter, GenericMessage, Message, MessageRegistry, MessageType, Performative,
    Received, ShellExecReq, ShuttleError, Timeout,
};

fn inform(msg_id: &str, recipient: &str) -> Value {
    json!({
        "msgID": msg_id,
        "perf": "INFORM",
        "recipient": recipient,
        "sender": "nav",
        "msgType": "org.arl.fjage.Message"
    })
}

#[tokio::test]
async fn test_delivery_then_receive() {
    let master = FakeMaster::start().await;
    let (gw, mut peer) = connect(&master, "gw").await;

    peer.deliver(inform("m1", "gw")).await;
    let got = gw
        .receive(Filter::Any, Timeout::millis(1000))
        .await
        .unwrap()
        .expect("delivered message");
    let header = got.header().expect("typed message");
    assert_eq!(header.msg_id(), "m1");
    assert_eq!(header.sender, Some(AgentId::new("nav")));
    assert_eq!(header.perf, Some(Performative::Inform));
}

#[tokio::test]
async fn test_message_for_other_agent_is_not_queued() {
    let master = FakeMaster::start().await;
    let (gw, mut peer) = connect(&master, "gw").await;

    peer.deliver(inform("m1", "someone-else")).await;
    // Round trip a request so the delivery has been dispatched
    peer.ask(json!({"action": "agents"})).await;
    assert_eq!(gw.pending_messages(), 0);
    assert!(gw.try_receive(Filter::Any).await.unwrap().is_none());
}

#[tokio::test]
async fn test_topic_subscription_controls_delivery() {
    let master = FakeMaster::start().await;
    let (gw, mut peer) = connect(&master, "gw").await;

    peer.deliver(inform("before", "#status")).await;
    peer.ask(json!({"action": "agents"})).await;
    assert!(gw.subscribe("status"));
    assert!(!gw.subscribe("status"));
    peer.deliver(inform("during-1", "#status")).await;
    peer.deliver(inform("during-2", "#status")).await;
    peer.ask(json!({"action": "agents"})).await;
    assert_eq!(gw.pending_messages(), 2);

    assert!(gw.unsubscribe("status"));
    peer.deliver(inform("after", "#status")).await;
    peer.ask(json!({"action": "agents"})).await;
    assert_eq!(gw.pending_messages(), 2);
}

#[tokio::test]
async fn test_agent_notifications_use_ntf_topic() {
    let master = FakeMaster::start().await;
    let (gw, mut peer) = connect(&master, "gw").await;

    gw.subscribe(AgentId::new("nav"));
    assert_eq!(gw.subscriptions(), vec!["nav__ntf".to_string()]);
    assert_eq!(Gateway::topic(AgentId::new("nav")).to_wire(), "#nav__ntf");

    peer.deliver(inform("n1", "#nav__ntf")).await;
    let got = gw.receive(Filter::Any, Timeout::millis(1000)).await.unwrap();
    assert!(got.is_some());
}

#[tokio::test]
async fn test_unfiltered_receive_is_newest_first() {
    let master = FakeMaster::start().await;
    let (gw, mut peer) = connect(&master, "gw").await;

    for id in ["a", "b", "c"] {
        peer.deliver(inform(id, "gw")).await;
    }
    peer.ask(json!({"action": "agents"})).await;

    let mut order = Vec::new();
    while let Some(msg) = gw.try_receive(Filter::Any).await.unwrap() {
        order.push(msg.header().unwrap().msg_id().to_string());
    }
    assert_eq!(order, vec!["c", "b", "a"]);
}

#[tokio::test]
async fn test_send_frame_shape() {
    let master = FakeMaster::start().await;
    let (gw, mut peer) = connect(&master, "gw").await;

    let mut msg = Message::new(Performative::Request, AgentId::new("shell"));
    gw.send(&mut msg).await.unwrap();
    assert_eq!(msg.sender, Some(AgentId::new("gw")));

    let frame = peer.expect_action("send").await;
    assert_eq!(frame["relay"], true);
    let wire = &frame["message"];
    assert_eq!(wire["msgID"], msg.msg_id());
    assert_eq!(wire["recipient"], "shell");
    assert_eq!(wire["sender"], "gw");
    assert_eq!(wire["perf"], "REQUEST");
    assert_eq!(wire["msgType"], "org.arl.fjage.Message");
    assert!(wire.get("inReplyTo").is_none());
    assert!(frame.get("map").is_none());
}

#[tokio::test]
async fn test_send_without_recipient_fails() {
    let master = FakeMaster::start().await;
    let (gw, mut peer) = connect(&master, "gw").await;

    let mut msg = Message::default();
    let err = gw.send(&mut msg).await.unwrap_err();
    assert!(matches!(err, ShuttleError::NoRecipient));
    assert!(peer.try_next_frame(Duration::from_millis(100)).await.is_none());
}

#[tokio::test]
async fn test_request_correlates_reply() {
    let master = FakeMaster::start().await;
    let (gw, mut peer) = connect(&master, "gw").await;

    let mut req = ShellExecReq::command(AgentId::new("shell"), "ps");
    let (rsp, ()) = tokio::join!(gw.request(&mut req, Timeout::millis(1000)), async {
        let frame = peer.expect_action("send").await;
        let msg_id = frame["message"]["msgID"].clone();
        assert_eq!(frame["message"]["cmd"], "ps");
        assert_eq!(frame["message"]["msgType"], "org.arl.fjage.shell.ShellExecReq");
        // An unrelated message arriving first must stay queued
        peer.deliver(inform("noise", "gw")).await;
        peer.deliver(json!({
            "msgID": "r1",
            "perf": "AGREE",
            "recipient": "gw",
            "sender": "shell",
            "inReplyTo": msg_id,
            "msgType": "org.arl.fjage.Message"
        }))
        .await;
    });

    let rsp = rsp.unwrap().expect("reply");
    let header = rsp.header().unwrap();
    assert_eq!(header.in_reply_to.as_deref(), Some(req.header.msg_id()));
    assert_eq!(header.perf, Some(Performative::Agree));
    assert_eq!(gw.pending_messages(), 1);
}

#[tokio::test]
async fn test_request_without_reply_returns_none() {
    let master = FakeMaster::start().await;
    let (gw, _peer) = connect(&master, "gw").await;

    let mut req = Message::new(Performative::Request, AgentId::new("shell"));
    let rsp = gw.request(&mut req, Timeout::millis(100)).await.unwrap();
    assert!(rsp.is_none());
}

#[tokio::test]
async fn test_generic_message_map_round_trip() {
    let master = FakeMaster::start().await;
    let (gw, mut peer) = connect(&master, "gw").await;

    let mut out = GenericMessage::new(Performative::Inform, AgentId::new("gw"));
    out.put("speed", 3.5);
    out.put("label", "north");
    out.put("waypoints", json!([[0, 0], [10, 5]]));
    gw.send(&mut out).await.unwrap();

    // The master relays the send frame back unchanged
    let frame = peer.expect_action("send").await;
    assert_eq!(frame["map"]["label"], "north");
    assert!(frame["message"].get("map").is_none());
    peer.push(frame).await;

    let back = gw
        .receive_as::<GenericMessage>(Timeout::millis(1000))
        .await
        .unwrap()
        .expect("generic message");
    assert_eq!(back.map, out.map);
    assert_eq!(back.header.msg_id(), out.header.msg_id());
}

#[tokio::test]
async fn test_type_filter_selects_by_local_name() {
    let master = FakeMaster::start().await;
    let (gw, mut peer) = connect(&master, "gw").await;

    peer.deliver(inform("plain", "gw")).await;
    peer.push(json!({
        "action": "send",
        "message": {"msgID": "g1", "recipient": "gw", "msgType": "org.arl.fjage.GenericMessage"},
        "map": {"k": "v"}
    }))
    .await;

    let got = gw
        .receive(Filter::of_type::<GenericMessage>(), Timeout::millis(1000))
        .await
        .unwrap()
        .and_then(Received::into_generic)
        .expect("generic message");
    assert_eq!(got.get("k"), Some(&json!("v")));
    assert_eq!(gw.pending_messages(), 1);
}

#[derive(Debug, Serialize, Deserialize)]
struct DepthReading {
    #[serde(flatten)]
    header: Message,
    depth: f64,
}

impl MessageType for DepthReading {
    const TYPE_TAG: &'static str = "org.example.sonar.DepthReading";

    fn header(&self) -> &Message {
        &self.header
    }

    fn header_mut(&mut self) -> &mut Message {
        &mut self.header
    }
}

#[tokio::test]
async fn test_custom_registry_and_raw_fallback() {
    let master = FakeMaster::start().await;
    let mut registry = MessageRegistry::with_builtins();
    registry.register_type::<DepthReading>();
    let config = shuttle_core::GatewayConfig::new("127.0.0.1", master.port()).with_name("gw");
    let (gw, peer) = tokio::join!(
        Gateway::connect_with_registry(config, registry),
        master.accept()
    );
    let (gw, mut peer) = (gw.unwrap(), peer);

    peer.deliver(json!({"msgID": "d1", "recipient": "gw", "msgType": "org.example.sonar.DepthReading", "depth": 42.5}))
        .await;
    peer.deliver(json!({"msgID": "u1", "recipient": "gw", "msgType": "org.example.Unknown", "x": 1}))
        .await;

    let custom = gw
        .receive(Filter::InReplyTo("none".into()), Timeout::NonBlocking)
        .await
        .unwrap();
    assert!(custom.is_none());

    let d = gw
        .receive(Filter::matching(|e| e.msg_id() == Some("d1")), Timeout::millis(1000))
        .await
        .unwrap();
    match d {
        Some(Received::Custom(c)) => assert_eq!(c.downcast::<DepthReading>().unwrap().depth, 42.5),
        other => panic!("expected custom message, got {other:?}"),
    }
    let u = gw
        .receive(Filter::Any, Timeout::millis(1000))
        .await
        .unwrap()
        .and_then(Received::into_raw)
        .expect("raw envelope");
    assert_eq!(u.get("x"), Some(&json!(1)));
}

#[tokio::test]
async fn test_receive_as_leaves_undecodable_message_queued() {
    let master = FakeMaster::start().await;
    let (gw, mut peer) = connect(&master, "gw").await;

    peer.deliver(json!({
        "msgID": "bad-cmd",
        "recipient": "gw",
        "msgType": "org.arl.fjage.shell.ShellExecReq",
        "cmd": {"not": "a string"}
    }))
    .await;
    peer.ask(json!({"action": "agents"})).await;

    let got = gw
        .receive_as::<ShellExecReq>(Timeout::NonBlocking)
        .await
        .unwrap();
    assert!(got.is_none());
    assert_eq!(gw.pending_messages(), 1);

    let kept = gw
        .receive_raw(Filter::Any, Timeout::NonBlocking)
        .await
        .unwrap()
        .expect("message still queued");
    assert_eq!(kept.message.msg_id(), Some("bad-cmd"));
}

#[tokio::test]
async fn test_braces_inside_strings_survive_framing() {
    let master = FakeMaster::start().await;
    let (gw, mut peer) = connect(&master, "gw").await;

    let mut req = ShellExecReq::command(AgentId::new("gw"), "def f() { println '}' }");
    gw.send(&mut req).await.unwrap();
    let frame = peer.expect_action("send").await;
    assert_eq!(frame["message"]["cmd"], "def f() { println '}' }");
    peer.push(frame).await;

    let back = gw
        .receive_as::<ShellExecReq>(Timeout::millis(1000))
        .await
        .unwrap()
        .expect("shell request");
    assert_eq!(back.cmd.as_deref(), Some("def f() { println '}' }"));
}

#[tokio::test]
async fn test_concurrent_non_blocking_receives_never_duplicate() {
    let master = FakeMaster::start().await;
    let (gw, mut peer) = connect(&master, "gw").await;
    let gw = Arc::new(gw);

    for i in 0..50 {
        peer.deliver(inform(&format!("m{i}"), "gw")).await;
    }
    peer.ask(json!({"action": "agents"})).await;

    let mut tasks = Vec::new();
    for _ in 0..4 {
        let gw = Arc::clone(&gw);
        tasks.push(tokio::spawn(async move {
            let mut ids = Vec::new();
            while let Some(d) = gw.receive_raw(Filter::Any, Timeout::NonBlocking).await.unwrap() {
                ids.push(d.message.msg_id().unwrap().to_string());
            }
            ids
        }));
    }
    let mut all = HashSet::new();
    let mut total = 0;
    for task in tasks {
        for id in task.await.unwrap() {
            total += 1;
            all.insert(id);
        }
    }
    assert_eq!(total, 50);
    assert_eq!(all.len(), 50);
}

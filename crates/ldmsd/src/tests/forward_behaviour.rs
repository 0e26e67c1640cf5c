//! Behavioural tests for requests forwarded along an aggregation chain.

use std::cell::RefCell;

use ldmsd_wire::MessageType;
use rstest::fixture;
use rstest_bdd_macros::{given, scenario, then, when};
use serde_json::{Value, json};

use crate::forward::FORWARD_FAILED;
use crate::reassembly::IndexKind;
use crate::status;

use super::status_named;
use super::support::{Cluster, SET_SCHEMA, StepResult};

struct ChainWorld {
    cluster: Cluster,
    reply: Option<Value>,
}

impl ChainWorld {
    fn reply(&self) -> &Value {
        self.reply.as_ref().expect("the client should have a reply")
    }

    fn hop(&self, hop: u32) -> &Value {
        &self.reply()["result"][hop.to_string().as_str()]
    }
}

#[fixture]
fn world() -> RefCell<ChainWorld> {
    RefCell::new(ChainWorld {
        cluster: Cluster::new(),
        reply: None,
    })
}

#[given("an aggregation chain agg2 to agg1 to node1")]
fn given_chain(world: &RefCell<ChainWorld>) {
    let world = world.borrow();
    assert_eq!(world.cluster.agg2.topology().names(), vec!["agg1"]);
    assert_eq!(world.cluster.agg1.topology().names(), vec!["node1"]);
}

#[given("the link from {daemon} to its producer rejects sends")]
fn given_link_rejects(world: &RefCell<ChainWorld>, daemon: String) {
    world.borrow().cluster.uplink(&daemon).a_to_b.fail_sends(status::EIO);
}

#[given("node1 cannot answer agg1")]
fn given_node_cannot_answer(world: &RefCell<ChainWorld>) {
    world.borrow().cluster.lower.b_to_a.fail_sends(status::EIO);
}

#[given("{daemon} forgets the set {instance}")]
fn given_forgotten_set(world: &RefCell<ChainWorld>, daemon: String, instance: String) {
    let world = world.borrow();
    assert!(world.cluster.engine(&daemon).sets().remove(&instance).is_some());
}

#[when("the client sends a forward test without a hop limit")]
fn when_forward_unlimited(world: &RefCell<ChainWorld>) {
    send(world, &json!({ "request": "test_protocol", "mode": "forward" }));
}

#[when("the client sends a forward test with {hops} hops")]
fn when_forward_limited(world: &RefCell<ChainWorld>, hops: i64) {
    send(
        world,
        &json!({ "request": "test_protocol", "mode": "forward", "num_hops": hops }),
    );
}

#[when("the client asks for the route of {instance}")]
fn when_route(world: &RefCell<ChainWorld>, instance: String) {
    send(
        world,
        &json!({ "request": "set_route", "spec": { "instance": instance } }),
    );
}

#[when("the link from {daemon} to its producer is torn down")]
fn when_link_torn_down(world: &RefCell<ChainWorld>, daemon: String) {
    let mut world = world.borrow_mut();
    world.cluster.uplink(&daemon).a_to_b.disconnect();
    world.reply = world.cluster.client.capture.replies().pop();
}

fn send(world: &RefCell<ChainWorld>, request: &Value) {
    let mut world = world.borrow_mut();
    let client = &world.cluster.client;
    client.capture.clear();
    let payload = serde_json::to_vec(request).expect("serialize request");
    client.send(MessageType::Request, client.next_msg_no(), &payload);
    world.reply = world.cluster.client.capture.replies().pop();
}

#[then("the client has no reply yet")]
fn then_no_reply(world: &RefCell<ChainWorld>) {
    assert!(world.borrow().reply.is_none());
}

#[then("the chain reply status is {status}")]
fn then_chain_status(world: &RefCell<ChainWorld>, status: String) -> StepResult {
    let expected = status_named(&status)?;
    let world = world.borrow();
    if world.reply()["status"] == expected {
        Ok(())
    } else {
        Err(format!("expected status {status}, got {}", world.reply()))
    }
}

#[then("the chain reply says forwarding failed")]
fn then_forwarding_failed(world: &RefCell<ChainWorld>) {
    assert_eq!(world.borrow().reply()["msg"], FORWARD_FAILED);
}

#[then("the hops are {daemons}")]
fn then_hops(world: &RefCell<ChainWorld>, daemons: String) {
    let expected: serde_json::Map<String, Value> = daemons
        .split(',')
        .enumerate()
        .map(|(hop, name)| (hop.to_string(), json!(name)))
        .collect();
    assert_eq!(world.borrow().reply()["hops"], Value::Object(expected));
}

#[then("the route names instance {instance} with schema meminfo")]
fn then_route_header(world: &RefCell<ChainWorld>, instance: String) {
    let world = world.borrow();
    let result = &world.reply()["result"];
    assert_eq!(result["instance"], json!(instance));
    assert_eq!(result["schema"], json!(SET_SCHEMA));
}

#[then("route hop {hop} is an aggregated set on {daemon} from {producer}")]
fn then_aggregated_hop(world: &RefCell<ChainWorld>, hop: u32, daemon: String, producer: String) {
    let world = world.borrow();
    assert_eq!(
        *world.hop(hop),
        json!({ "name": daemon, "type": "aggregated set", "producer": producer })
    );
}

#[then("route hop {hop} is a sampled set on {daemon} by {plugin}")]
fn then_sampled_hop(world: &RefCell<ChainWorld>, hop: u32, daemon: String, plugin: String) {
    let world = world.borrow();
    assert_eq!(
        *world.hop(hop),
        json!({ "name": daemon, "type": "sampled set", "plugin": plugin })
    );
}

#[then("route hop {hop} says the set does not exist")]
fn then_missing_hop(world: &RefCell<ChainWorld>, hop: u32) {
    let world = world.borrow();
    assert_eq!(world.hop(hop)["msg"], "The set does not exist.");
}

#[then("no request is left pending in the chain")]
fn then_nothing_pending(world: &RefCell<ChainWorld>) {
    let world = world.borrow();
    for engine in [&world.cluster.agg2, &world.cluster.agg1, &world.cluster.node1] {
        assert_eq!(
            engine.reassembler().len(IndexKind::Request),
            0,
            "{} kept a request",
            engine.name()
        );
        assert_eq!(
            engine.reassembler().len(IndexKind::Response),
            0,
            "{} kept a response",
            engine.name()
        );
    }
}

#[scenario(path = "tests/features/forwarding.feature")]
fn forwarding(#[from(world)] world: RefCell<ChainWorld>) {
    drop(world);
}

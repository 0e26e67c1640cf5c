//! A three-daemon aggregation chain joined by loopback transports.
//!
//! `agg2` pulls from `agg1`, which pulls from the sampler daemon `node1`.
//! The set `node1/meminfo` is sampled on `node1` and aggregated on both
//! aggregators. Requests enter the chain at `agg2` through a [`Client`].

use std::sync::Arc;

use serde_json::{Map, Value, json};

use super::transport::Client;
use crate::cfgobj::CfgObjType;
use crate::engine::Engine;
use crate::topology::{SetEntry, SetOrigin};
use crate::transport::{SecurityContext, Transport};
use crate::transport::loopback::{self, LoopbackPair};

pub const SET_INSTANCE: &str = "node1/meminfo";
pub const SET_SCHEMA: &str = "meminfo";
pub const LINK_RECORD: usize = 256;

pub struct Cluster {
    pub node1: Arc<Engine>,
    pub agg1: Arc<Engine>,
    pub agg2: Arc<Engine>,
    /// `agg1` to `node1` and back.
    pub lower: LoopbackPair,
    /// `agg2` to `agg1` and back.
    pub upper: LoopbackPair,
    pub client: Client,
}

impl Cluster {
    #[must_use]
    pub fn new() -> Self {
        let node1 = Engine::builder("node1").build();
        let agg1 = Engine::builder("agg1").build();
        let agg2 = Engine::builder("agg2").build();

        node1.sets().insert(
            SET_INSTANCE,
            SetEntry {
                schema: SET_SCHEMA.to_owned(),
                origin: SetOrigin::Sampler("meminfo".to_owned()),
            },
        );
        agg1.sets().insert(SET_INSTANCE, aggregated("node1"));
        agg2.sets().insert(SET_INSTANCE, aggregated("agg1"));

        let lower = loopback::connect(&agg1, &node1, LINK_RECORD);
        let upper = loopback::connect(&agg2, &agg1, LINK_RECORD);
        add_producer(&agg1, "node1", lower.a_to_b.clone());
        add_producer(&agg2, "agg1", upper.a_to_b.clone());

        let client = Client::new(Arc::clone(&agg2));
        Self {
            node1,
            agg1,
            agg2,
            lower,
            upper,
            client,
        }
    }

    /// Engine named `name`.
    #[must_use]
    pub fn engine(&self, name: &str) -> &Arc<Engine> {
        match name {
            "node1" => &self.node1,
            "agg1" => &self.agg1,
            "agg2" => &self.agg2,
            other => panic!("no daemon named {other}"),
        }
    }

    /// Loopback pair whose `a_to_b` side leaves `name` towards its producer.
    #[must_use]
    pub fn uplink(&self, name: &str) -> &LoopbackPair {
        match name {
            "agg1" => &self.lower,
            "agg2" => &self.upper,
            other => panic!("{other} has no producer"),
        }
    }

    pub fn request(&self, document: &Value) -> Value {
        self.client.request(document)
    }
}

impl Default for Cluster {
    fn default() -> Self {
        Self::new()
    }
}

fn aggregated(producer: &str) -> SetEntry {
    SetEntry {
        schema: SET_SCHEMA.to_owned(),
        origin: SetOrigin::Producer(producer.to_owned()),
    }
}

fn add_producer(engine: &Engine, name: &str, link: Arc<dyn Transport>) {
    let producer = attrs(json!({ "host": "localhost", "port": 10001 }));
    engine
        .objects()
        .create(CfgObjType::Prdcr, name, producer, true, SecurityContext::current())
        .expect("create producer");
    engine.attach_producer(name, link).expect("attach producer");
}

/// Attributes map from a JSON literal.
#[must_use]
pub fn attrs(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        other => panic!("expected an object, got {other}"),
    }
}

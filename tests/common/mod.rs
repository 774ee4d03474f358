#![allow(dead_code)]

use std::{
    convert::Infallible,
    sync::{
        atomic::{AtomicI64, Ordering},
        Arc,
    },
    time::Duration,
};

use agora::{
    transport::loopback::LoopbackNetwork, Action, Component, LocalityId, Runtime, RuntimeConfig,
};
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize)]
pub struct Counter {
    pub x: AtomicI64,
}

impl Component for Counter {
    const COMPONENT_ID: &'static str = "tests::counter";
}

pub fn get_x() -> Action<Counter, (), i64> {
    Action::new("get_x")
}

pub fn add() -> Action<Counter, i64, i64> {
    Action::new("add")
}

pub fn fail() -> Action<Counter, String, ()> {
    Action::new("fail")
}

/// Sleeps for the given number of milliseconds before returning the counter.
pub fn slow() -> Action<Counter, u64, i64> {
    Action::new("slow")
}

pub struct Cluster {
    pub network: LoopbackNetwork,
    pub runtimes: Vec<Runtime>,
}

impl Cluster {
    pub fn locality(&self, n: usize) -> LocalityId {
        self.runtimes[n].here()
    }

    pub fn localities(&self) -> Vec<LocalityId> {
        self.runtimes.iter().map(Runtime::here).collect()
    }
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Starts `size` localities numbered from 1, each with `Counter` and its actions registered.
pub fn cluster(size: u32) -> Cluster {
    cluster_with(size, RuntimeConfig::default())
}

pub fn cluster_with(size: u32, config: RuntimeConfig) -> Cluster {
    init_tracing();
    let network = LoopbackNetwork::new();
    let runtimes = (1..=size)
        .map(|n| {
            let runtime = Runtime::builder()
                .config(config.clone())
                .build(network.endpoint(LocalityId::new(n)));
            register_counter(&runtime);
            runtime
        })
        .collect();
    Cluster { network, runtimes }
}

pub fn register_counter(runtime: &Runtime) {
    runtime
        .register_component(|x: i64| {
            if x < 0 {
                return Err("counter cannot start negative");
            }
            Ok(Counter {
                x: AtomicI64::new(x),
            })
        })
        .unwrap();
    runtime.register_migratable::<Counter>().unwrap();
    runtime
        .register_action(&get_x(), |counter: &Counter, ()| {
            Ok::<_, Infallible>(counter.x.load(Ordering::SeqCst))
        })
        .unwrap();
    runtime
        .register_action(&add(), |counter: &Counter, n: i64| {
            Ok::<_, Infallible>(counter.x.fetch_add(n, Ordering::SeqCst) + n)
        })
        .unwrap();
    runtime
        .register_action(&fail(), |_: &Counter, reason: String| Err::<(), _>(reason))
        .unwrap();
    runtime
        .register_async_action(&slow(), |counter: Arc<Counter>, millis: u64| async move {
            tokio::time::sleep(Duration::from_millis(millis)).await;
            Ok::<_, Infallible>(counter.x.load(Ordering::SeqCst))
        })
        .unwrap();
}

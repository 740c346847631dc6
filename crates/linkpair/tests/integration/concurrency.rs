//! Concurrent pair operations through one manager.

use std::sync::Arc;
use std::time::Duration;

use linkpair::mock::MockNetwork;
use linkpair::{LinkManager, LinkPair, ManagerConfig, Result, VethConfig};

use crate::common::init_tracing;

fn pair_config(i: usize) -> VethConfig {
    VethConfig {
        local_name: format!("a{i}"),
        peer_name: format!("b{i}"),
        peer_namespace: "blue".into(),
        local_ip_addr: vec![format!("10.1.{i}.1/24").parse().unwrap()],
        peer_ip_addr: vec![format!("10.1.{i}.2/24").parse().unwrap()],
        ..Default::default()
    }
}

#[tokio::test(start_paused = true)]
async fn test_sessions_bounded_by_capacity() -> Result<()> {
    init_tracing();
    let net = MockNetwork::new().with_delay(Duration::from_millis(10));
    net.add_namespace("blue");
    let manager = Arc::new(LinkManager::new(net.clone(), ManagerConfig { max_concurrent: 3 })?);

    let tasks: Vec<_> = (0..20)
        .map(|i| {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move {
                let mut pair = LinkPair::from_config(&pair_config(i))?;
                pair.create(&manager).await?;
                pair.setup(&manager).await
            })
        })
        .collect();

    for task in tasks {
        task.await.unwrap()?;
    }

    assert_eq!(net.peak_sessions(), 3);
    assert_eq!(net.active_sessions(), 0);
    assert_eq!(manager.gate().available(), 3);
    assert_eq!(net.links("").len(), 20);
    assert_eq!(net.links("blue").len(), 20);
    assert!(net.links("blue").iter().all(|l| l.up && l.addresses.len() == 1));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_single_slot_serializes() -> Result<()> {
    init_tracing();
    let net = MockNetwork::new().with_delay(Duration::from_millis(5));
    net.add_namespace("blue");
    let manager = Arc::new(LinkManager::new(net.clone(), ManagerConfig { max_concurrent: 1 })?);

    let tasks: Vec<_> = (0..5)
        .map(|i| {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move {
                let mut pair = LinkPair::from_config(&pair_config(i))?;
                pair.create(&manager).await?;
                pair.delete(&manager).await
            })
        })
        .collect();

    for task in tasks {
        task.await.unwrap()?;
    }

    assert_eq!(net.peak_sessions(), 1);
    assert!(net.links("").is_empty());
    assert!(net.links("blue").is_empty());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_pair_steps_not_interleaved() -> Result<()> {
    init_tracing();
    let net = MockNetwork::new().with_delay(Duration::from_millis(5));
    for ns in ["blue", "red", "green"] {
        net.add_namespace(ns);
    }
    let manager = Arc::new(LinkManager::new(net.clone(), ManagerConfig { max_concurrent: 1 })?);

    let mut first = LinkPair::from_config(&pair_config(0))?;
    let mut second = LinkPair::from_config(&VethConfig {
        local_namespace: "red".into(),
        peer_namespace: "green".into(),
        ..pair_config(1)
    })?;
    first.create(&manager).await?;
    second.create(&manager).await?;

    let before = net.calls().len();
    let tasks: Vec<_> = [first, second]
        .into_iter()
        .map(|mut pair| {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move { pair.setup(&manager).await })
        })
        .collect();
    for task in tasks {
        task.await.unwrap()?;
    }

    // Each pair's setup runs as one uninterrupted block of calls.
    let owners: Vec<bool> = net.calls()[before..]
        .iter()
        .map(|c| c.starts_with(':') || c.starts_with("blue:"))
        .collect();
    let switches = owners.windows(2).filter(|w| w[0] != w[1]).count();
    assert_eq!(switches, 1, "{:?}", &net.calls()[before..]);
    Ok(())
}

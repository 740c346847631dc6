//! Pair lifecycle scenarios against the in-memory backend.

use linkpair::mock::MockNetwork;
use linkpair::{Error, LinkManager, LinkPair, ManagerConfig, Result, VethConfig};

use crate::common::init_tracing;

fn blue_pair_config() -> VethConfig {
    serde_json::from_str(
        r#"{
            "localName": "veth-h",
            "peerName": "eth0",
            "peerNamespace": "blue",
            "localIpAddr": ["10.0.0.1/24"],
            "peerIpAddr": ["10.0.0.2/24", "fd00::2/64"],
            "peerProps": {"rate": "100mbit", "latency": "20ms", "loss": 0.5}
        }"#,
    )
    .unwrap()
}

fn setup() -> (MockNetwork, LinkManager<MockNetwork>) {
    init_tracing();
    let net = MockNetwork::new();
    net.add_namespace("blue");
    let manager = LinkManager::new(net.clone(), ManagerConfig::default()).unwrap();
    (net, manager)
}

fn sorted_addresses(net: &MockNetwork, ns: &str, name: &str) -> Vec<String> {
    let mut addrs: Vec<String> = net
        .link(ns, name)
        .unwrap()
        .addresses
        .iter()
        .map(|a| a.to_string())
        .collect();
    addrs.sort();
    addrs
}

#[tokio::test]
async fn test_pair_lifecycle_across_namespaces() -> Result<()> {
    let (net, manager) = setup();
    let mut pair = LinkPair::from_config(&blue_pair_config())?;

    pair.create(&manager).await?;
    assert!(pair.local.link().is_some());
    assert!(pair.peer.link().is_none());
    assert!(net.link("blue", "eth0").is_some());
    assert!(net.link("", "eth0").is_none());

    pair.setup(&manager).await?;

    let local = net.link("", "veth-h").unwrap();
    assert!(local.up);
    assert_eq!(local.mtu, 1500);
    assert_eq!(sorted_addresses(&net, "", "veth-h"), vec!["10.0.0.1/24"]);
    assert_eq!(net.qdiscs("", "veth-h")[0].kind, "noqueue");

    let peer = net.link("blue", "eth0").unwrap();
    assert!(peer.up);
    let addrs = sorted_addresses(&net, "blue", "eth0");
    assert_eq!(addrs.len(), 3, "{addrs:?}");
    assert!(addrs.contains(&"10.0.0.2/24".to_string()));
    assert!(addrs.contains(&"fd00::2/64".to_string()));
    assert!(addrs.iter().any(|a| a.starts_with("fe80::")));

    let kinds: Vec<String> = net.qdiscs("blue", "eth0").into_iter().map(|q| q.kind).collect();
    assert_eq!(kinds, vec!["netem", "tbf"]);

    pair.delete(&manager).await?;
    assert!(net.link("", "veth-h").is_none());
    assert!(net.link("blue", "eth0").is_none());
    assert!(pair.local.link().is_none());
    assert_eq!(net.active_sessions(), 0);
    Ok(())
}

#[tokio::test]
async fn test_create_name_collision() -> Result<()> {
    let (net, manager) = setup();
    net.add_link("", "veth-h");

    let mut pair = LinkPair::from_config(&blue_pair_config())?;
    let err = pair.create(&manager).await.unwrap_err();
    assert!(matches!(&err, Error::NameExists { name } if name == "veth-h"), "{err}");
    assert!(net.link("blue", "eth0").is_none());

    // A clash on the peer side is reported the same way.
    net.delete_link_named("", "veth-h");
    net.add_link("blue", "eth0");
    let err = pair.create(&manager).await.unwrap_err();
    assert!(err.is_already_exists(), "{err}");
    assert!(net.link("", "veth-h").is_none());
    Ok(())
}

#[tokio::test]
async fn test_setup_is_repeatable() -> Result<()> {
    let (net, manager) = setup();
    let mut pair = LinkPair::from_config(&blue_pair_config())?;
    pair.create(&manager).await?;

    pair.setup(&manager).await?;
    let addrs = sorted_addresses(&net, "blue", "eth0");
    let qdiscs = net.qdiscs("blue", "eth0");

    pair.setup(&manager).await?;
    assert_eq!(sorted_addresses(&net, "blue", "eth0"), addrs);
    assert_eq!(net.qdiscs("blue", "eth0"), qdiscs);
    Ok(())
}

#[tokio::test]
async fn test_delete_stops_at_first_failure() -> Result<()> {
    let (net, manager) = setup();
    let mut pair = LinkPair::from_config(&blue_pair_config())?;
    pair.create(&manager).await?;

    net.fail_next("delete_link", libc::EBUSY);
    let err = pair.delete(&manager).await.unwrap_err();
    assert!(err.is_busy(), "{err}");
    assert!(err.to_string().contains("veth-h"), "{err}");
    assert!(net.link("", "veth-h").is_some());
    assert!(!net.calls().iter().any(|c| c.starts_with("blue:")));

    pair.delete(&manager).await?;
    assert!(net.link("blue", "eth0").is_none());
    Ok(())
}

#[tokio::test]
async fn test_set_call_order() -> Result<()> {
    let (net, manager) = setup();
    let mut config = blue_pair_config();
    config.local_addr = "02:00:00:00:00:01".into();
    config.local_ip_addr = vec!["fd00::1/64".parse()?];
    let mut pair = LinkPair::from_config(&config)?;
    pair.create(&manager).await?;

    let before = net.calls().len();
    manager.set(&mut pair.local).await?;
    assert_eq!(
        net.calls()[before..],
        [
            ":enter",
            ":link_by_index",
            ":set_link_up",
            ":set_mtu",
            ":set_hardware_address",
            ":addresses",
            ":write_sysctl",
            ":add_address",
        ]
    );
    Ok(())
}

#[tokio::test]
async fn test_failed_step_is_not_rolled_back() -> Result<()> {
    let (net, manager) = setup();
    let mut pair = LinkPair::from_config(&blue_pair_config())?;
    pair.create(&manager).await?;
    pair.open(&manager).await?;

    net.fail_next("set_mtu", libc::EINVAL);
    let err = manager.set(&mut pair.peer).await.unwrap_err();
    assert_eq!(err.errno(), Some(libc::EINVAL));

    let peer = net.link("blue", "eth0").unwrap();
    assert!(peer.up);
    assert!(peer.addresses.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_open_missing_peer() -> Result<()> {
    let (net, manager) = setup();
    // A standalone local link with nothing on the other side.
    net.add_link("", "veth-h");
    let mut pair = LinkPair::from_config(&blue_pair_config())?;

    let err = pair.open(&manager).await.unwrap_err();
    assert!(matches!(&err, Error::LinkNotFound { name } if name == "eth0"), "{err}");
    assert!(pair.local.link().is_some());
    assert!(pair.peer.link().is_none());
    Ok(())
}

#[tokio::test]
async fn test_removing_peer_takes_local_end() -> Result<()> {
    let (net, manager) = setup();
    let mut pair = LinkPair::from_config(&blue_pair_config())?;
    pair.create(&manager).await?;
    net.delete_link_named("blue", "eth0");

    assert!(net.link("", "veth-h").is_none());
    let err = pair.open(&manager).await.unwrap_err();
    assert!(matches!(&err, Error::LinkNotFound { name } if name == "veth-h"), "{err}");
    Ok(())
}

#[tokio::test]
async fn test_clear_then_reapply_properties() -> Result<()> {
    let (net, manager) = setup();
    let mut pair = LinkPair::from_config(&blue_pair_config())?;
    pair.create(&manager).await?;
    pair.setup(&manager).await?;

    manager.clear_properties(&mut pair.peer).await?;
    let qdiscs = net.qdiscs("blue", "eth0");
    assert_eq!(qdiscs.len(), 1);
    assert_eq!(qdiscs[0].kind, "noqueue");

    pair.peer.properties = Some(serde_json::from_str(r#"{"rate": "1gbit"}"#).unwrap());
    manager.set_properties(&mut pair.peer).await?;
    let kinds: Vec<String> = net.qdiscs("blue", "eth0").into_iter().map(|q| q.kind).collect();
    assert_eq!(kinds, vec!["tbf"]);
    Ok(())
}

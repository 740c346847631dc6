//! Pair lifecycle against the running kernel.
//!
//! Each test works in fresh namespaces created with `ip netns add`.

use linkpair::{Error, LinkManager, LinkPair, ManagerConfig, Result, VethConfig};

use crate::common::{TestNamespace, init_tracing};

fn config(local: &TestNamespace, peer: &TestNamespace) -> VethConfig {
    VethConfig {
        local_name: "veth-l".into(),
        peer_name: "veth-p".into(),
        local_namespace: local.name().into(),
        peer_namespace: peer.name().into(),
        peer_addr: "02:00:00:00:00:02".into(),
        local_ip_addr: vec!["10.9.0.1/24".parse().unwrap()],
        peer_ip_addr: vec!["10.9.0.2/24".parse().unwrap(), "fd09::2/64".parse().unwrap()],
        mtu: 1400,
        peer_props: Some(
            serde_json::from_str(r#"{"rate": "10mbit", "latency": "10ms", "loss": 1}"#).unwrap(),
        ),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_kernel_pair_lifecycle() -> Result<()> {
    require_root!();
    init_tracing();

    let left = TestNamespace::new("left")?;
    let right = TestNamespace::new("right")?;
    let manager = LinkManager::kernel(ManagerConfig::default())?;
    let mut pair = LinkPair::from_config(&config(&left, &right))?;

    pair.create(&manager).await?;
    pair.setup(&manager).await?;

    let link = right.exec("ip", &["-o", "link", "show", "dev", "veth-p"])?;
    assert!(link.contains("mtu 1400"), "{link}");
    assert!(link.contains("02:00:00:00:00:02"), "{link}");

    let addrs = right.exec("ip", &["-o", "addr", "show", "dev", "veth-p"])?;
    assert!(addrs.contains("10.9.0.2/24"), "{addrs}");
    assert!(addrs.contains("fd09::2/64"), "{addrs}");

    let qdiscs = right.exec("tc", &["qdisc", "show", "dev", "veth-p"])?;
    assert!(qdiscs.contains("netem 1:"), "{qdiscs}");
    assert!(qdiscs.contains("tbf a: parent 1:1"), "{qdiscs}");

    // Applying the same properties again replaces the chain in place.
    manager.set_properties(&mut pair.peer).await?;
    let again = right.exec("tc", &["qdisc", "show", "dev", "veth-p"])?;
    assert_eq!(qdiscs.lines().count(), again.lines().count());

    manager.clear_properties(&mut pair.peer).await?;
    let cleared = right.exec("tc", &["qdisc", "show", "dev", "veth-p"])?;
    assert!(!cleared.contains("netem"), "{cleared}");

    pair.delete(&manager).await?;
    assert!(left.exec("ip", &["link", "show", "veth-l"]).is_err());
    assert!(right.exec("ip", &["link", "show", "veth-p"]).is_err());
    Ok(())
}

#[tokio::test]
async fn test_kernel_name_collision() -> Result<()> {
    require_root!();
    init_tracing();

    let left = TestNamespace::new("dup-l")?;
    let right = TestNamespace::new("dup-r")?;
    left.exec("ip", &["link", "add", "veth-l", "type", "dummy"])?;

    let manager = LinkManager::kernel(ManagerConfig::default())?;
    let mut pair = LinkPair::from_config(&config(&left, &right))?;
    let err = pair.create(&manager).await.unwrap_err();
    assert!(matches!(err, Error::NameExists { .. }), "{err}");
    Ok(())
}

#[tokio::test]
async fn test_kernel_missing_namespace() -> Result<()> {
    require_root!();
    init_tracing();

    let manager = LinkManager::kernel(ManagerConfig::default())?;
    let mut pair = LinkPair::from_config(&VethConfig {
        local_name: "veth-l".into(),
        peer_name: "veth-p".into(),
        local_namespace: "lp-does-not-exist".into(),
        ..Default::default()
    })?;
    let err = pair.create(&manager).await.unwrap_err();
    assert!(matches!(err, Error::Namespace { .. }), "{err}");
    Ok(())
}

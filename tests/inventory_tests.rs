//! Inventory loading and role selection tests

use herdsman::executor::Runtime;
use herdsman::inventory::{Inventory, InventoryError};
use pretty_assertions::assert_eq;
use tempfile::tempdir;

const CLUSTER: &str = r#"
hosts:
  - name: node1
    address: 192.168.0.11
    internal_address: 10.0.0.11
    user: ubuntu
    private_key_file: ~/.ssh/id_ed25519
  - name: node2
    address: 192.168.0.12
    port: 2222
    arch: arm64
  - name: node3
    address: 192.168.0.13
    vars:
      labels: [gpu]
roleGroups:
  etcd: [node1]
  master: [node1]
  worker: [node2, node3]
"#;

fn names(hosts: &[std::sync::Arc<herdsman::inventory::Host>]) -> Vec<String> {
    hosts.iter().map(|h| h.name.clone()).collect()
}

#[test]
fn test_load_from_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("inventory.yml");
    std::fs::write(&path, CLUSTER).unwrap();

    let inv = Inventory::load(&path).unwrap();
    assert_eq!(inv.len(), 3);
    assert_eq!(inv.source(), Some(path.as_path()));
    assert_eq!(inv.roles().collect::<Vec<_>>(), vec!["etcd", "master", "worker"]);

    let node1 = inv.get_host("node1").unwrap();
    assert_eq!(node1.address(), "192.168.0.11");
    assert_eq!(node1.internal_address(), "10.0.0.11");
    assert_eq!(node1.port, 22);
    assert_eq!(node1.arch, "amd64");
    assert!(node1.has_role("etcd"));
    assert!(node1.has_role("master"));

    let node2 = inv.get_host("node2").unwrap();
    assert_eq!(node2.port, 2222);
    assert_eq!(node2.arch, "arm64");
    assert!(inv.get_host("node3").unwrap().get_var("labels").is_some());
}

#[test]
fn test_missing_file() {
    let err = Inventory::load("/nonexistent/inventory.yml").unwrap_err();
    assert!(matches!(err, InventoryError::Io { .. }));
}

#[test]
fn test_roles_select_in_declaration_order() {
    let inv = Inventory::from_yaml_str(CLUSTER).unwrap();
    assert_eq!(names(&inv.hosts_by_role("worker")), vec!["node2", "node3"]);
    assert_eq!(names(&inv.hosts_by_role("all")), vec!["node1", "node2", "node3"]);
    assert!(inv.hosts_by_role("registry").is_empty());
}

#[test]
fn test_deleted_host_leaves_every_role() {
    let runtime = Runtime::local(Inventory::from_yaml_str(CLUSTER).unwrap());
    runtime.delete_host("node2").unwrap();

    assert_eq!(names(&runtime.hosts_by_role("worker")), vec!["node3"]);
    assert_eq!(names(&runtime.all_hosts()), vec!["node1", "node3"]);
    assert!(runtime.host_is_deprecated("node2"));
    assert!(runtime.delete_host("node9").is_err());
}

#[test]
fn test_host_cache_is_shared_between_handles() {
    let inv = Inventory::from_yaml_str(CLUSTER).unwrap();
    let a = inv.get_host("node1").unwrap();
    let b = inv.hosts_by_role("master").remove(0);
    a.cache().set("kubelet_version", "v1.29.3".to_string());
    assert_eq!(b.cache().get_string("kubelet_version").as_deref(), Some("v1.29.3"));
    assert!(inv.get_host("node2").unwrap().cache().is_empty());
}

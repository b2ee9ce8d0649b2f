use netrole_core::backends::mock::{Action, MockSystem};
use netrole_core::config::{ManagerConfig, PathsConfig};
use netrole_core::{Error, RoleManager, ValidationError};
use std::sync::Arc;
use tempfile::TempDir;

const ARP: &str = "\
IP address       HW type     Flags       HW address            Mask     Device
192.168.50.23    0x1         0x2         02:00:00:00:00:23     *        wlan1
192.168.50.31    0x1         0x2         02:00:00:00:00:31     *        wlan1
";

fn setup() -> (TempDir, Arc<MockSystem>, RoleManager) {
    let dir = tempfile::tempdir().unwrap();
    let cfg = ManagerConfig {
        paths: PathsConfig {
            roles_file: dir.path().join("roles.json"),
            legacy_ap_conf: dir.path().join("ap.conf"),
            artifact_dir: dir.path().join("artifacts"),
            ..PathsConfig::default()
        },
        ..ManagerConfig::default()
    };
    let mock = Arc::new(MockSystem::new());
    mock.add_interface("wlan0", "wifi");
    mock.add_interface("wlan1", "wifi");
    let manager = RoleManager::new(cfg, mock.clone(), mock.clone(), mock.clone());
    (dir, mock, manager)
}

#[tokio::test]
async fn station_without_lease_or_arp_still_appears() {
    let (_dir, mock, manager) = setup();
    manager.assign_role("wlan1", "listener").await.unwrap();
    mock.set_station_dump(
        "wlan1",
        "Station 02:00:00:00:00:99 (on wlan1)\n\tsignal:  \t-61 dBm\n\tconnected time:\t7 seconds\n",
    );
    mock.set_leases("wlan1", "1700000000 02:00:00:00:00:42 192.168.50.42 tablet *\n");

    let list = manager.list_clients(None).await.unwrap();
    assert_eq!(list.interface, "wlan1");
    assert_eq!(list.clients.len(), 1);
    let c = &list.clients[0];
    assert_eq!(c.mac, "02:00:00:00:00:99");
    assert_eq!(c.ip, "");
    assert_eq!(c.hostname, "");
    assert_eq!(c.signal, "-61 dBm");
    assert_eq!(c.connected_duration, "00:00:07");
}

#[tokio::test]
async fn scan_sweeps_then_picks_up_static_devices() {
    let (_dir, mock, manager) = setup();
    manager.assign_role("wlan1", "listener").await.unwrap();
    mock.set_arp_table(ARP);
    mock.set_leases("wlan1", "1700000000 02:00:00:00:00:23 192.168.50.23 phone *\n");

    let list = manager.scan_clients("wlan1").await.unwrap();
    assert!(list.scanned);
    assert!(mock.actions().contains(&Action::PingSweep(245)));
    // only the lease with a completed ARP entry; the static device has
    // neither a lease nor an association
    let macs: Vec<&str> = list.clients.iter().map(|c| c.mac.as_str()).collect();
    assert_eq!(macs, vec!["02:00:00:00:00:23"]);
    assert_eq!(list.clients[0].hostname, "phone");
}

#[tokio::test]
async fn scan_requires_an_ap_address() {
    let (_dir, _mock, manager) = setup();
    manager.assign_role("wlan1", "show_network").await.unwrap();
    let err = manager.scan_clients("wlan1").await.unwrap_err();
    assert!(matches!(err, Error::Validation(ValidationError::NoApAddress)));
    assert_eq!(err.to_string(), "No AP IP configured");
}

#[tokio::test]
async fn missing_interface_has_no_clients() {
    let (_dir, mock, manager) = setup();
    mock.set_station_dump("wlan7", "Station 02:00:00:00:00:01 (on wlan7)\n");
    let list = manager.list_clients(Some("wlan7")).await.unwrap();
    assert!(list.clients.is_empty());

    // no AP assigned: falls back to wlan0
    let list = manager.list_clients(None).await.unwrap();
    assert_eq!(list.interface, "wlan0");
}

#[tokio::test]
async fn status_and_self_test() {
    let (_dir, mock, manager) = setup();
    manager.assign_role("wlan1", "listener").await.unwrap();
    mock.set_service_state("listener-ap", "active");
    mock.add_address("wlan1", "192.168.50.1".parse().unwrap(), 24);
    mock.add_process("hostapd.*wlan1");
    mock.set_setting("EnableTethering", "1");
    mock.set_station_dump("wlan1", "Station 02:00:00:00:00:05 (on wlan1)\n");

    let status = manager.status().await;
    assert_eq!(status.services["listener-ap"], "active");
    assert_eq!(status.services["dnsmasq"], "inactive");
    assert!(!status.firewall_active);
    assert_eq!(status.tether_label, "enabled");
    assert_eq!(status.client_count, 1);
    assert_eq!(status.access_points.len(), 1);
    assert_eq!(status.access_points[0].ssid, "SHOW_AUDIO");
    assert_eq!(status.access_points[0].live_ip, "192.168.50.1/24");

    let report = manager.self_test().await;
    assert!(!report.all_pass);
    let failed: Vec<&str> = report
        .results
        .iter()
        .filter(|r| !r.pass)
        .map(|r| r.test.as_str())
        .collect();
    assert_eq!(failed, vec!["nftables firewall"]);

    mock.add_firewall_table("listener_wlan1");
    assert!(manager.self_test().await.all_pass);
    assert!(manager.status().await.firewall_active);
}

#[tokio::test]
async fn interface_inventory_carries_roles() {
    let (_dir, mock, manager) = setup();
    manager.assign_role("wlan1", "sbs").await.unwrap();
    mock.add_address("wlan1", "192.168.40.1".parse().unwrap(), 24);

    let views = manager.interfaces().await;
    assert_eq!(views.len(), 2);
    assert_eq!(views[1].info.name, "wlan1");
    assert_eq!(views[1].role, "sbs");
    assert_eq!(views[1].ip, "192.168.40.1");
    assert_eq!(views[0].role, "");

    let json = serde_json::to_value(&views[1]).unwrap();
    assert_eq!(json["type"], "wifi");
    assert_eq!(json["name"], "wlan1");
}

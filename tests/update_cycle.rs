extern crate chrono;
extern crate crypto;
extern crate hex;
#[macro_use]
extern crate maplit;
extern crate ota;
#[macro_use]
extern crate serde_json;

mod support;

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

use ota::client::{self, OtaClient, UpdateCheck};
use ota::datatype::{Config, InstallCode, SecondaryKind};
use ota::download::FlowControlToken;
use ota::http::TestClient;
use ota::keys::KeyManager;
use ota::pacman::PacMan;
use ota::storage::MemStorage;

use support::{firmware_meta, provisioned_storage, server_routes, signer, test_dir};


const PRIMARY_SERIAL: &'static str = "CA:FE:A6:D2:84:9D";

fn test_config(reason: &str) -> (Config, String) {
    let dir = test_dir(reason);
    let mut config = Config::default();
    config.tls = Some(Default::default());
    config.uptane.primary_ecu_serial = Some(PRIMARY_SERIAL.into());
    config.uptane.director_server = "http://localhost:8001/director".parse().expect("director url");
    config.uptane.repo_server = "http://localhost:8002/repo".parse().expect("repo url");
    config.uptane.staging_path = format!("{}/staging", dir);
    config.uptane.sentinel_path = format!("{}/boot", dir);
    (config, dir)
}

fn new_client(config: &Config, storage: MemStorage, http: TestClient, pacman: PacMan) -> OtaClient {
    let keys = KeyManager::new(format!("{}/run", config.uptane.staging_path));
    OtaClient::new(config, Box::new(storage), Box::new(http), keys, pacman, Vec::new())
}


#[test]
fn noop_check_reports_no_updates() {
    let (config, dir) = test_config("ota-cycle-noop");
    let signer = signer(7);
    let http = TestClient::from_routes(server_routes(&signer, HashMap::new()));
    let storage = provisioned_storage(&[(PRIMARY_SERIAL, "test-hw")]);
    let pacman = PacMan::Test { filename: format!("{}/tpm", dir), succeeds: true, completion: false };
    let mut ota = new_client(&config, storage, http, pacman);

    ota.initialize().expect("initialize");
    match ota.fetch_meta().expect("fetch_meta") {
        UpdateCheck::NoUpdatesAvailable => (),
        UpdateCheck::UpdatesAvailable(targets) => panic!("unexpected updates: {:?}", targets)
    }
    ota.put_manifest().expect("put_manifest");
    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn single_primary_update_installs_and_reports() {
    let (config, dir) = test_config("ota-cycle-primary");
    let signer = signer(7);
    let body = b"primary firmware\n".to_vec();
    assert_eq!(body.len(), 17);

    let assignments = hashmap!{
        "primary_firmware.txt".to_string() => firmware_meta(Some(PRIMARY_SERIAL), &body)
    };
    let http = TestClient::from_routes(server_routes(&signer, assignments));
    http.add_route("repo/targets/primary_firmware.txt", body.clone());

    let storage = provisioned_storage(&[(PRIMARY_SERIAL, "test-hw")]);
    let pacman = PacMan::Test { filename: format!("{}/tpm", dir), succeeds: true, completion: false };
    let mut ota = new_client(&config, storage, http, pacman);
    ota.initialize().expect("initialize");

    let targets = match ota.fetch_meta().expect("fetch_meta") {
        UpdateCheck::UpdatesAvailable(targets) => targets,
        UpdateCheck::NoUpdatesAvailable => panic!("expected an update")
    };
    assert_eq!(targets.len(), 1);
    assert_eq!(targets[0].serial, PRIMARY_SERIAL);
    assert_eq!(targets[0].image.filepath, "primary_firmware.txt");
    assert_eq!(targets[0].image.fileinfo.length, 17);

    let token = FlowControlToken::default();
    let staged = ota.download_images(&targets, &token).expect("download");
    assert_eq!(staged.len(), 1);

    let reports = ota.uptane_install(&targets).expect("install");
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].1.code, InstallCode::OK);

    ota.put_manifest().expect("put_manifest");
    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn pending_install_completes_after_reboot() {
    let (config, dir) = test_config("ota-cycle-pending");
    let signer = signer(7);
    let body = b"rebooting firmware".to_vec();
    let assignments = hashmap!{
        "os_image.img".to_string() => firmware_meta(Some(PRIMARY_SERIAL), &body)
    };
    let http = TestClient::from_routes(server_routes(&signer, assignments));
    http.add_route("repo/targets/os_image.img", body.clone());

    let storage = provisioned_storage(&[(PRIMARY_SERIAL, "test-hw")]);
    let pacman = PacMan::Test { filename: format!("{}/tpm", dir), succeeds: true, completion: true };
    let mut ota = new_client(&config, storage, http, pacman);
    ota.initialize().expect("initialize");

    let targets = match ota.fetch_meta().expect("fetch_meta") {
        UpdateCheck::UpdatesAvailable(targets) => targets,
        UpdateCheck::NoUpdatesAvailable => panic!("expected an update")
    };
    let token = FlowControlToken::default();
    ota.download_images(&targets, &token).expect("download");

    let reports = ota.uptane_install(&targets).expect("install");
    assert_eq!(reports[0].1.code, InstallCode::NEED_COMPLETION);
    // pending recorded and sentinel written, current untouched
    assert!(ota.has_pending_update().expect("pending"));
    assert!(Path::new(&format!("{}/boot/need_reboot", dir)).exists());

    // the backend finalizes on the next boot
    ota.complete_install().expect("complete_install");
    assert!(!ota.has_pending_update().expect("pending cleared"));
    assert!(!Path::new(&format!("{}/boot/need_reboot", dir)).exists());

    ota.put_manifest().expect("put_manifest");
    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn corrupt_artifact_fails_download() {
    let (config, dir) = test_config("ota-cycle-corrupt");
    let signer = signer(7);
    let body = b"expected contents".to_vec();
    let assignments = hashmap!{
        "fw.img".to_string() => firmware_meta(Some(PRIMARY_SERIAL), &body)
    };
    let http = TestClient::from_routes(server_routes(&signer, assignments));
    http.add_route("repo/targets/fw.img", b"tampered contents".to_vec());

    let storage = provisioned_storage(&[(PRIMARY_SERIAL, "test-hw")]);
    let pacman = PacMan::Test { filename: format!("{}/tpm", dir), succeeds: true, completion: false };
    let mut ota = new_client(&config, storage, http, pacman);
    ota.initialize().expect("initialize");

    let targets = match ota.fetch_meta().expect("fetch_meta") {
        UpdateCheck::UpdatesAvailable(targets) => targets,
        UpdateCheck::NoUpdatesAvailable => panic!("expected an update")
    };
    let token = FlowControlToken::default();
    assert!(ota.download_images(&targets, &token).is_err());
    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn offline_secondary_is_migrated_into_storage() {
    let (mut config, dir) = test_config("ota-cycle-migrate");
    config.secondaries.push(ota::datatype::SecondaryConfig {
        kind:          SecondaryKind::Ip,
        ecu_serial:    None,
        hardware_id:   None,
        ip:            Some("127.0.0.1".into()),
        port:          Some(9061),
        metadata_path: None,
        verification:  None,
    });

    // legacy store knows the ECU serial but has no secondary_info row
    let storage = provisioned_storage(&[(PRIMARY_SERIAL, "test-hw"), ("sec-legacy", "sec-hw")]);
    let secondaries = client::build_secondaries(&config, &storage, Duration::from_millis(100));
    assert_eq!(secondaries.len(), 1);

    let signer = signer(7);
    let http = TestClient::from_routes(server_routes(&signer, HashMap::new()));
    let keys = KeyManager::new(format!("{}/run", dir));
    let pacman = PacMan::Test { filename: format!("{}/tpm", dir), succeeds: true, completion: false };
    let mut ota = OtaClient::new(&config, Box::new(storage), Box::new(http), keys, pacman, secondaries);
    ota.initialize().expect("initialize");

    let known = ota.secondaries_info().expect("secondaries info");
    assert_eq!(known.len(), 1);
    assert_eq!(known[0].serial, "sec-legacy");
    assert_eq!(known[0].kind, "IP");
    assert_eq!(known[0].extra["ip"], json!("127.0.0.1"));
    assert_eq!(known[0].extra["port"], json!(9061));
    assert_eq!(known[0].extra["verification_type"], json!("Full"));
    let _ = fs::remove_dir_all(&dir);
}

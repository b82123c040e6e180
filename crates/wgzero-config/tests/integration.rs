use std::cell::{Cell, RefCell};
use std::fs;
use std::rc::Rc;

use tempfile::TempDir;

use wgzero_config::keys::{KeyError, KeyGenerator};
use wgzero_config::migrate::{
    LegacyFlagPolicy, Migration, MigrationError, MigrationRunner, StepError,
};
use wgzero_config::record::{Hook, InterfaceRecord, PeerRecord};
use wgzero_config::store::{
    BackupRetention, ConfigStore, InitOptions, StoreError, StoreLayout, StoreOptions,
};
use wgzero_config::tunnel::{TunnelController, TunnelError};

// -- Mock collaborators --

#[derive(Default)]
struct TestKeys {
    issued: Cell<usize>,
}

impl KeyGenerator for TestKeys {
    fn generate_private_key(&self) -> Result<String, KeyError> {
        let n = self.issued.get();
        self.issued.set(n + 1);
        Ok(format!("private-{n}"))
    }

    fn public_key(&self, private_key: &str) -> Result<String, KeyError> {
        Ok(format!("public-of-{private_key}"))
    }

    fn generate_preshared_key(&self) -> Result<String, KeyError> {
        Ok("psk".to_string())
    }
}

/// Records calls; `up` fails the first `failing_ups` times.
#[derive(Default)]
struct RecordingTunnel {
    calls: RefCell<Vec<&'static str>>,
    failing_ups: Cell<usize>,
}

impl TunnelController for RecordingTunnel {
    fn up(&self) -> Result<(), TunnelError> {
        self.calls.borrow_mut().push("up");
        if self.failing_ups.get() > 0 {
            self.failing_ups.set(self.failing_ups.get() - 1);
            return Err(TunnelError::Unsupported);
        }
        Ok(())
    }

    fn down(&self) -> Result<(), TunnelError> {
        self.calls.borrow_mut().push("down");
        Ok(())
    }
}

// -- Helpers --

const SCENARIO: &str = "\
[Interface]
Address = 10.0.0.1/24
ListenPort = 51820
PrivateKey = AAAA

[Peer]
PublicKey = BBBB
AllowedIPs = 10.0.0.2/32, 10.0.0.3/32
#!Enabled = true
";

fn options(dir: &TempDir) -> StoreOptions {
    StoreOptions {
        layout: StoreLayout::new(dir.path(), "wg0"),
        ..StoreOptions::default()
    }
}

fn write_config(dir: &TempDir, text: &str) {
    fs::write(dir.path().join("wg0.conf"), text).unwrap();
}

fn read_config(dir: &TempDir) -> String {
    fs::read_to_string(dir.path().join("wg0.conf")).unwrap()
}

fn load(dir: &TempDir) -> ConfigStore<TestKeys> {
    ConfigStore::load_existing(options(dir), TestKeys::default()).unwrap()
}

// -- Store --

#[test]
fn concrete_scenario() {
    let dir = TempDir::new().unwrap();
    write_config(&dir, SCENARIO);
    let mut store = load(&dir);

    assert_eq!(store.interface().addresses(), Some(vec!["10.0.0.1/24".to_string()]));
    assert_eq!(store.interface().public_key(), Some("public-of-AAAA"));
    let peer = &store.peers()[0];
    assert_eq!(
        peer.allowed_ips(),
        Some(vec!["10.0.0.2/32".to_string(), "10.0.0.3/32".to_string()])
    );
    assert_eq!(peer.enabled(), Some(true));

    store.peers_mut()[0].set_enabled(false);
    let text = store.render();
    assert!(text.contains("\n#$AllowedIPs = 10.0.0.2/32, 10.0.0.3/32\n"));
    assert!(text.contains("\n#!Enabled = false\n"));
    assert!(!text.contains("\nAllowedIPs"));
}

#[test]
fn setter_built_store_round_trips() {
    let dir = TempDir::new().unwrap();
    let mut store = ConfigStore::init(
        options(&dir),
        TestKeys::default(),
        &InitOptions {
            dns: vec!["1.1.1.1".into(), "9.9.9.9".into()],
            mtu: Some(1420),
            post_up: vec!["iptables -A FORWARD -i wg0 -j ACCEPT".into()],
            ..InitOptions::default()
        },
    )
    .unwrap();
    store.interface_mut().set_host_address("vpn.example.com").unwrap();
    store.create_peer("phone", true, true).unwrap();
    store.create_peer("laptop", false, false).unwrap();
    store.peers_mut()[1].set_endpoint(Some("198.51.100.4:51820")).unwrap();
    store.peers_mut()[1].set_persistent_keepalive(Some(25));
    store.save().unwrap();

    let reloaded = load(&dir);
    assert_eq!(reloaded.summary(), store.summary());
    assert_eq!(reloaded.interface().private_key(), store.interface().private_key());
    assert_eq!(
        reloaded.interface().hook(Hook::PostUp),
        Some(vec!["iptables -A FORWARD -i wg0 -j ACCEPT".to_string()])
    );
    for (a, b) in reloaded.peers().iter().zip(store.peers()) {
        assert_eq!(a.preshared_key(), b.preshared_key());
        assert_eq!(a.private_key(), b.private_key());
    }
    assert_eq!(reloaded.render(), store.render());
}

#[test]
fn created_peers_get_consecutive_addresses() {
    let dir = TempDir::new().unwrap();
    let mut store =
        ConfigStore::init(options(&dir), TestKeys::default(), &InitOptions::default()).unwrap();
    store.create_peer("a", false, false).unwrap();
    store.create_peer("b", false, false).unwrap();
    let routes: Vec<_> = store.peers().iter().map(|p| p.allowed_ips().unwrap()).collect();
    assert_eq!(routes, vec![vec!["10.1.3.2/32"], vec!["10.1.3.3/32"]]);
}

#[test]
fn soft_disable_survives_save_and_load() {
    let dir = TempDir::new().unwrap();
    write_config(&dir, SCENARIO);
    let mut store = load(&dir);
    store.peer_mut("BBBB").unwrap().set_enabled(false);
    store.save().unwrap();

    let mut store = load(&dir);
    let peer = store.peer("BBBB").unwrap();
    assert_eq!(peer.enabled(), Some(false));
    assert_eq!(
        peer.allowed_ips(),
        Some(vec!["10.0.0.2/32".to_string(), "10.0.0.3/32".to_string()])
    );

    store.peer_mut("BBBB").unwrap().set_enabled(true);
    store.save().unwrap();
    let text = read_config(&dir);
    assert!(text.contains("\nAllowedIPs = 10.0.0.2/32, 10.0.0.3/32\n"));
    assert!(!text.contains("#$"));
}

#[test]
fn enforce_fields_is_idempotent() {
    let dir = TempDir::new().unwrap();
    write_config(&dir, "[Interface]\nPrivateKey = AAAA\n\n[Peer]\nPublicKey = BBBB\nAllowedIPs = 10.0.0.2/32\n");
    let mut store = load(&dir);
    let once = store.render();
    store.enforce_fields().unwrap();
    assert_eq!(store.render(), once);

    assert!(once.contains("#!Name = Unnamed Peer: 'BBBB'"));
    assert!(once.contains("#!Enabled = true"));
    assert!(once.contains("#!WGZERO_Version = 0"));
    assert!(once.contains("#!Host = 127.0.0.1"));
}

#[test]
fn public_key_follows_private_key() {
    let dir = TempDir::new().unwrap();
    write_config(&dir, "[Interface]\nPrivateKey = AAAA\n#!PublicKey = stale\n");
    let mut store = load(&dir);
    assert_eq!(store.interface().public_key(), Some("public-of-AAAA"));

    store.interface_mut().set_private_key("CCCC").unwrap();
    store.enforce_fields().unwrap();
    assert_eq!(store.interface().public_key(), Some("public-of-CCCC"));
}

#[test]
fn removed_peer_leaves_no_trace() {
    let dir = TempDir::new().unwrap();
    write_config(&dir, SCENARIO);
    let mut store = load(&dir);
    store.remove_peer("BBBB").unwrap();
    store.save().unwrap();
    let text = read_config(&dir);
    assert!(!text.contains("[Peer]"));
    assert!(!text.contains("BBBB"));
}

#[test]
fn backup_then_revert_restores_bytes() {
    let dir = TempDir::new().unwrap();
    write_config(&dir, SCENARIO);
    let mut store = load(&dir);
    store.backup_fs_copy().unwrap();

    store.interface_mut().set_listen_port(51999).unwrap();
    store.save().unwrap();
    assert!(read_config(&dir).contains("ListenPort = 51999"));

    store.revert().unwrap();
    assert_eq!(read_config(&dir), SCENARIO);
    store.reload().unwrap();
    assert_eq!(store.interface().listen_port(), Some(51820));
}

#[test]
fn backup_copies_disk_not_memory() {
    let dir = TempDir::new().unwrap();
    write_config(&dir, SCENARIO);
    let mut store = load(&dir);
    store.interface_mut().set_listen_port(1).unwrap();
    let stamped = store.backup_fs_copy().unwrap();

    assert_eq!(fs::read_to_string(stamped).unwrap(), SCENARIO);
    let latest = store.layout().latest_backup_path();
    assert_eq!(fs::read_to_string(latest).unwrap(), SCENARIO);
}

#[test]
fn retention_keeps_latest_and_newest() {
    let dir = TempDir::new().unwrap();
    write_config(&dir, SCENARIO);
    let mut store = ConfigStore::load_existing(
        StoreOptions {
            retention: BackupRetention::KeepLatest(2),
            ..options(&dir)
        },
        TestKeys::default(),
    )
    .unwrap();

    let mut made = Vec::new();
    for port in [1, 2, 3, 4] {
        store.interface_mut().set_listen_port(port).unwrap();
        store.save().unwrap();
        made.push(store.backup_fs_copy().unwrap());
    }

    let kept = store.layout().timestamped_backups().unwrap();
    assert_eq!(kept, made[2..].to_vec());
    let latest = fs::read_to_string(store.layout().latest_backup_path()).unwrap();
    assert!(latest.contains("ListenPort = 4"));
}

#[test]
fn unbounded_retention_keeps_everything() {
    let dir = TempDir::new().unwrap();
    write_config(&dir, SCENARIO);
    let mut store = load(&dir);
    for _ in 0..3 {
        store.backup_fs_copy().unwrap();
    }
    assert_eq!(store.layout().timestamped_backups().unwrap().len(), 3);

    let deleted = store.trim_backups(1).unwrap();
    assert_eq!(deleted.len(), 2);
    assert_eq!(store.layout().timestamped_backups().unwrap().len(), 1);
    assert!(store.layout().latest_backup_path().exists());
}

#[test]
fn trimming_leaves_other_interfaces_alone() {
    let dir = TempDir::new().unwrap();
    write_config(&dir, SCENARIO);
    let mut store = load(&dir);
    let backups = store.layout().backup_dir();
    fs::create_dir_all(&backups).unwrap();
    let neighbours = [
        backups.join("wg0_home_latest.conf"),
        backups.join("wg0_home_2025-01-01_00-00-00_000.conf"),
    ];
    for path in &neighbours {
        fs::write(path, "[Interface]\nPrivateKey = CCCC\n").unwrap();
    }

    let made = [store.backup_fs_copy().unwrap(), store.backup_fs_copy().unwrap()];
    assert_eq!(store.layout().timestamped_backups().unwrap(), made.to_vec());

    let deleted = store.trim_backups(0).unwrap();
    assert_eq!(deleted, made.to_vec());
    for path in &neighbours {
        assert!(path.exists(), "{} was deleted", path.display());
    }
    assert!(store.layout().latest_backup_path().exists());
}

#[test]
fn commit_reloads_tunnel() {
    let dir = TempDir::new().unwrap();
    let tunnel = RecordingTunnel::default();
    let mut store =
        ConfigStore::init(options(&dir), TestKeys::default(), &InitOptions::default()).unwrap();
    store.commit(&tunnel).unwrap();
    assert!(store.config_exists());
    assert_eq!(*tunnel.calls.borrow(), vec!["down", "up"]);

    store.interface_mut().set_listen_port(51821).unwrap();
    store.commit(&tunnel).unwrap();
    assert!(store.layout().latest_backup_path().exists());
    assert!(read_config(&dir).contains("ListenPort = 51821"));
}

#[test]
fn failed_commit_reverts_file_and_memory() {
    let dir = TempDir::new().unwrap();
    write_config(&dir, SCENARIO);
    let mut store = load(&dir);
    let tunnel = RecordingTunnel {
        failing_ups: Cell::new(1),
        ..RecordingTunnel::default()
    };

    store.interface_mut().set_listen_port(51999).unwrap();
    let err = store.commit(&tunnel).unwrap_err();
    match err {
        StoreError::CommitFailed { cause, recovery } => {
            assert!(matches!(*cause, StoreError::Tunnel(_)));
            assert!(recovery.is_none());
        }
        other => panic!("expected commit failure, got {other:?}"),
    }
    assert_eq!(read_config(&dir), SCENARIO);
    assert_eq!(store.interface().listen_port(), Some(51820));
    assert_eq!(*tunnel.calls.borrow(), vec!["down", "up", "down", "up"]);
}

// -- Migrations --

type Log = Rc<RefCell<Vec<String>>>;

struct Step {
    name: &'static str,
    log: Log,
    fail: bool,
}

impl Migration for Step {
    fn name(&self) -> &str {
        self.name
    }

    fn apply(
        &self,
        _interface: &mut InterfaceRecord,
        peers: &mut [PeerRecord],
    ) -> Result<(), StepError> {
        self.log.borrow_mut().push(self.name.to_string());
        if self.fail {
            return Err(format!("{} exploded", self.name).into());
        }
        for peer in peers {
            peer.set_name(self.name)?;
        }
        Ok(())
    }
}

fn runner(log: &Log, failing: Option<&'static str>) -> MigrationRunner {
    let steps = ["m0", "m1", "m2"]
        .into_iter()
        .map(|name| {
            Box::new(Step {
                name,
                log: Rc::clone(log),
                fail: failing == Some(name),
            }) as Box<dyn Migration>
        })
        .collect();
    MigrationRunner::new(steps)
}

fn versioned(version: u32) -> String {
    format!("{SCENARIO}#!Name = original\n").replace(
        "PrivateKey = AAAA\n",
        &format!("PrivateKey = AAAA\n#!WGZERO_Version = {version}\n"),
    )
}

#[test]
fn migrations_apply_from_current_version_once() {
    let dir = TempDir::new().unwrap();
    write_config(&dir, &versioned(1));
    let mut store = load(&dir);
    let log = Log::default();
    let runner = runner(&log, None);

    let report = runner.execute(&mut store).unwrap();
    assert_eq!(*log.borrow(), vec!["m1", "m2"]);
    assert_eq!(report.applied, vec!["m1", "m2"]);
    assert_eq!((report.from_version, report.to_version), (1, 3));
    assert_eq!(store.interface().config_version(), 3);
    assert_eq!(store.peers()[0].name(), Some("m2"));

    let again = runner.execute(&mut store).unwrap();
    assert!(again.is_noop());
    assert_eq!(log.borrow().len(), 2);
}

#[test]
fn migrations_stay_in_memory_by_default() {
    let dir = TempDir::new().unwrap();
    write_config(&dir, &versioned(0));
    let before = read_config(&dir);
    let mut store = load(&dir);
    runner(&Log::default(), None).execute(&mut store).unwrap();
    assert_eq!(read_config(&dir), before);
}

#[test]
fn persisted_migrations_are_saved() {
    let dir = TempDir::new().unwrap();
    write_config(&dir, &versioned(0));
    let mut store = load(&dir);
    runner(&Log::default(), None)
        .persist(true)
        .execute(&mut store)
        .unwrap();

    let reloaded = load(&dir);
    assert_eq!(reloaded.interface().config_version(), 3);
    assert!(store.layout().latest_backup_path().exists());
}

#[test]
fn failed_migration_rolls_back() {
    let dir = TempDir::new().unwrap();
    write_config(&dir, &versioned(1));
    let before = read_config(&dir);
    let mut store = load(&dir);
    let log = Log::default();

    let err = runner(&log, Some("m2"))
        .persist(true)
        .execute(&mut store)
        .unwrap_err();
    match &err {
        MigrationError::RolledBack {
            index, name, revert, ..
        } => {
            assert_eq!(*index, 2);
            assert_eq!(name, "m2");
            assert!(revert.is_none());
        }
        other => panic!("expected rollback, got {other:?}"),
    }
    assert_eq!(*log.borrow(), vec!["m1", "m2"]);
    assert_eq!(store.interface().config_version(), 1);
    assert_eq!(read_config(&dir), before);
}

#[test]
fn failed_in_memory_migration_reports_step() {
    let dir = TempDir::new().unwrap();
    write_config(&dir, &versioned(0));
    let mut store = load(&dir);
    let err = runner(&Log::default(), Some("m1"))
        .execute(&mut store)
        .unwrap_err();
    assert_eq!(err.index(), Some(1));
    assert!(matches!(err, MigrationError::Step { .. }));
    assert_eq!(store.interface().config_version(), 0);
}

#[test]
fn newer_document_is_left_alone() {
    let dir = TempDir::new().unwrap();
    write_config(&dir, &versioned(7));
    let mut store = load(&dir);
    let log = Log::default();
    let report = runner(&log, None).execute(&mut store).unwrap();
    assert!(report.is_noop());
    assert!(log.borrow().is_empty());
    assert_eq!(store.interface().config_version(), 7);
}

#[test]
fn standard_migration_upgrades_legacy_peer_metadata() {
    let dir = TempDir::new().unwrap();
    write_config(
        &dir,
        "[Interface]\nPrivateKey = AAAA\n\n[Peer]\nPublicKey = BBBB\nAllowedIPs = 10.0.0.2/32\n#!privateKey = client\n#!enabled = false\n",
    );
    let mut store = load(&dir);
    MigrationRunner::standard(LegacyFlagPolicy::AssumeEnabled)
        .persist(true)
        .execute(&mut store)
        .unwrap();

    let text = read_config(&dir);
    assert!(text.contains("#!PrivateKey = client"));
    assert!(text.contains("#!Enabled = false"));
    assert!(text.contains("#$AllowedIPs = 10.0.0.2/32"));
    assert!(!text.contains("#!privateKey"));
    assert!(!text.contains("#!enabled"));
    assert!(text.contains("#!WGZERO_Version = 1"));

    let reloaded = load(&dir);
    assert_eq!(reloaded.peers()[0].allowed_ips(), Some(vec!["10.0.0.2/32".to_string()]));
    assert_eq!(reloaded.peers()[0].enabled(), Some(false));
}

#[test]
fn recorded_version_key_is_honoured() {
    let dir = TempDir::new().unwrap();
    write_config(&dir, "[Interface]\nPrivateKey = AAAA\n#!WGZERO_Version = 1\n");
    let mut store = load(&dir);
    assert_eq!(store.interface().config_version(), 1);

    let report = MigrationRunner::standard(LegacyFlagPolicy::AssumeEnabled)
        .persist(true)
        .execute(&mut store)
        .unwrap();
    assert!(report.is_noop());
    assert_eq!(store.interface().config_version(), 1);

    store.save().unwrap();
    let text = read_config(&dir);
    assert_eq!(text.matches("WGZERO_Version").count(), 1);
    assert!(!text.contains("ConfigVersion"));
}

//! Startup recovery against a real plugin root.

use std::path::PathBuf;

use plugvisor_plugins::{Manager, PluginError};
use plugvisor_test::{
    MockExecutor, MockMounter, MountCall, PluginFixture, TestRoots, capture_logs, test_plugin_id,
    write_raw_config,
};

#[tokio::test]
async fn test_reload_loads_only_full_id_directories() {
    let roots = TestRoots::new();
    PluginFixture::new(1, "sshfs:latest").write(&roots.root());
    PluginFixture::new(2, "nfs:latest").write(&roots.root());

    // Neither of these is a plugin directory.
    let decoy = PluginFixture::new(3, "decoy:latest").to_json().to_string();
    write_raw_config(&roots.root(), "not-a-plugin", &decoy);
    write_raw_config(&roots.root(), &"AB".repeat(32), &decoy);
    std::fs::write(roots.root().join("stray-file"), b"x").unwrap();

    let executor = MockExecutor::new();
    let manager = roots.manager(&executor).await.unwrap();

    let names: Vec<String> = manager.list().await.into_iter().map(|r| r.name).collect();
    assert_eq!(names, vec!["nfs:latest", "sshfs:latest"]);
    assert!(manager.controller(&test_plugin_id(1)).await.is_some());
    assert!(manager.controller(&test_plugin_id(2)).await.is_some());
    assert!(manager.controller(&test_plugin_id(3)).await.is_none());
    assert!(executor.calls().is_empty());
}

#[tokio::test]
async fn test_reload_derives_rootfs() {
    let roots = TestRoots::new();
    let fixture = PluginFixture::new(1, "sshfs:latest");
    fixture.write(&roots.root());

    let manager = roots.manager(&MockExecutor::new()).await.unwrap();
    let record = manager.inspect("sshfs:latest").await.unwrap();
    assert_eq!(
        record.rootfs,
        roots.root().join(fixture.id().as_str()).join("rootfs")
    );
    assert_eq!(
        record.runtime_source_path,
        roots.exec_root().join(fixture.id().as_str())
    );
}

#[tokio::test]
async fn test_empty_root_yields_empty_store() {
    let roots = TestRoots::new();
    let manager = roots.manager(&MockExecutor::new()).await.unwrap();
    assert!(manager.store().is_empty().await);
}

#[tokio::test]
async fn test_missing_roots_are_created() {
    let roots = TestRoots::new();
    let executor = MockExecutor::new();
    let mut config = roots.config(&executor, &MockMounter::new());
    config.root = roots.root().join("nested").join("plugins");
    config.exec_root = roots.exec_root().join("nested").join("run");

    Manager::new(config.clone()).await.unwrap();
    assert!(config.root.is_dir());
    assert!(config.exec_root.is_dir());

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = std::fs::metadata(&config.root).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o700);
    }
}

#[tokio::test]
async fn test_corrupt_record_fails_construction() {
    let roots = TestRoots::new();
    PluginFixture::new(1, "sshfs:latest").write(&roots.root());
    write_raw_config(&roots.root(), test_plugin_id(2).as_str(), "{not json");

    let executor = MockExecutor::new();
    let config = roots.config(&executor, &MockMounter::new());
    let store = config.store.clone();

    let err = Manager::new(config).await.unwrap_err();
    let message = err.to_string();
    assert!(message.starts_with("failed to restore plugins: "), "{message}");
    assert!(message.contains("error decoding"), "{message}");
    assert!(matches!(err, PluginError::Restore(inner) if matches!(*inner, PluginError::DecodeRecord { .. })));

    // Nothing was published and nothing was started.
    assert!(store.is_empty().await);
    assert!(executor.calls().is_empty());
}

#[tokio::test]
async fn test_missing_record_file_fails_construction() {
    let roots = TestRoots::new();
    let dir = roots.root().join(test_plugin_id(4).as_str());
    std::fs::create_dir_all(&dir).unwrap();

    let err = roots.manager(&MockExecutor::new()).await.unwrap_err();
    let message = err.to_string();
    assert!(message.contains("error reading"), "{message}");
    assert!(message.contains(&dir.join("config.json").display().to_string()), "{message}");
}

#[tokio::test]
async fn test_refused_client_fails_construction() {
    let roots = TestRoots::new();
    let err = roots
        .manager(&MockExecutor::new().refusing_client())
        .await
        .unwrap_err();
    assert!(matches!(err, PluginError::ClientUnavailable(_)));
}

#[tokio::test]
async fn test_reattach_failure_is_isolated() {
    let roots = TestRoots::new();
    let broken = PluginFixture::new(1, "broken:latest").enabled();
    let healthy = PluginFixture::new(2, "healthy:latest").enabled();
    broken.write(&roots.root());
    healthy.write(&roots.root());

    let executor = MockExecutor::new();
    executor.fail_restore(broken.id());
    let manager = roots.manager(&executor).await.unwrap();

    assert_eq!(manager.store().len().await, 2);

    let broken_record = manager.inspect("broken:latest").await.unwrap();
    assert_eq!(broken_record.rootfs, PathBuf::new());
    assert_eq!(executor.create_count(broken.id()), 0);

    let healthy_record = manager.inspect("healthy:latest").await.unwrap();
    assert_eq!(
        healthy_record.rootfs,
        roots.root().join(healthy.id().as_str()).join("rootfs")
    );
    assert_eq!(executor.create_count(healthy.id()), 1);
}

#[tokio::test]
async fn test_propagated_mount_created_for_docker_volume_driver() {
    let roots = TestRoots::new();
    let fixture = PluginFixture::new(1, "volumes:latest")
        .with_type("docker.volumedriver/1.0")
        .with_propagated_mount("/mnt/../data");
    fixture.write(&roots.root());

    let manager = roots.manager(&MockExecutor::new()).await.unwrap();
    let record = manager.inspect("volumes:latest").await.unwrap();

    let expected = roots
        .root()
        .join(fixture.id().as_str())
        .join("rootfs")
        .join("mnt")
        .join("data");
    assert_eq!(record.propagated_mount.as_deref(), Some(expected.as_path()));
    assert!(expected.is_dir());
}

#[tokio::test]
async fn test_propagated_mount_ignored_without_matching_capability() {
    let roots = TestRoots::new();
    let third_party = PluginFixture::new(1, "acme:latest")
        .with_type("acme.volumedriver/1.0")
        .with_propagated_mount("/data");
    let next_version = PluginFixture::new(2, "next:latest")
        .with_type("docker.graphdriver/2.0")
        .with_propagated_mount("/data");
    third_party.write(&roots.root());
    next_version.write(&roots.root());

    let manager = roots.manager(&MockExecutor::new()).await.unwrap();
    for (name, fixture) in [("acme:latest", &third_party), ("next:latest", &next_version)] {
        let record = manager.inspect(name).await.unwrap();
        assert_eq!(record.propagated_mount, None);
        assert!(
            !roots
                .root()
                .join(fixture.id().as_str())
                .join("rootfs")
                .join("data")
                .exists()
        );
    }
}

#[tokio::test]
async fn test_enabled_plugin_is_started_without_live_restore() {
    let roots = TestRoots::new();
    let fixture = PluginFixture::new(7, "sshfs:latest")
        .enabled()
        .with_env("DEBUG", "0", true)
        .with_setting("DEBUG=1");
    fixture.write(&roots.root());

    let executor = MockExecutor::new();
    let manager = roots.manager(&executor).await.unwrap();

    assert_eq!(executor.restored(), vec![fixture.id().to_string()]);
    let created = executor.created();
    assert_eq!(created.len(), 1);
    let (id, spec) = &created[0];
    assert_eq!(id, fixture.id().as_str());
    assert_eq!(spec.rootfs, roots.root().join(id).join("rootfs"));
    assert_eq!(spec.args, vec!["/bin/plugin"]);
    assert_eq!(spec.env, vec!["DEBUG=1"]);
    assert_eq!(spec.runtime_dir, roots.exec_root().join(id));
    assert!(spec.runtime_dir.is_dir());

    let controller = manager.controller(fixture.id()).await.unwrap();
    assert!(controller.restart);
    assert!(!controller.exit.is_closed());
    assert!(manager.inspect("sshfs:latest").await.unwrap().enabled);
}

#[tokio::test]
async fn test_live_restore_adopts_running_plugin() {
    let roots = TestRoots::new();
    let fixture = PluginFixture::new(1, "sshfs:latest").enabled();
    fixture.write(&roots.root());

    let executor = MockExecutor::new();
    executor.set_pids(fixture.id(), vec![4242]);
    let config = roots
        .config(&executor, &MockMounter::new())
        .with_live_restore(true);
    let manager = Manager::new(config).await.unwrap();

    assert_eq!(executor.restored(), vec![fixture.id().to_string()]);
    assert_eq!(executor.create_count(fixture.id()), 0);
    let controller = manager.controller(fixture.id()).await.unwrap();
    assert!(controller.restart);
    assert_eq!(controller.pid, Some(4242));
}

#[tokio::test]
async fn test_live_restore_starts_plugin_that_is_gone() {
    let roots = TestRoots::new();
    let fixture = PluginFixture::new(1, "sshfs:latest").enabled();
    fixture.write(&roots.root());

    let executor = MockExecutor::new();
    let config = roots
        .config(&executor, &MockMounter::new())
        .with_live_restore(true);
    Manager::new(config).await.unwrap();

    assert_eq!(executor.create_count(fixture.id()), 1);
}

#[tokio::test]
async fn test_recovery_retries_failed_starts() {
    let roots = TestRoots::new();
    let fixture = PluginFixture::new(1, "flaky:latest").enabled();
    fixture.write(&roots.root());

    let executor = MockExecutor::new();
    executor.fail_create(fixture.id(), 2);
    let manager = roots.manager(&executor).await.unwrap();

    assert_eq!(executor.create_count(fixture.id()), 3);
    assert!(manager.controller(fixture.id()).await.unwrap().restart);
}

#[tokio::test]
async fn test_recovery_gives_up_after_retries() {
    let roots = TestRoots::new();
    let fixture = PluginFixture::new(1, "dead:latest")
        .enabled()
        .with_type("docker.volumedriver/1.0")
        .with_propagated_mount("/data");
    fixture.write(&roots.root());

    let executor = MockExecutor::new();
    executor.fail_create_always(fixture.id());
    let mounter = MockMounter::new();
    let manager = Manager::new(roots.config(&executor, &mounter)).await.unwrap();

    // One attempt plus two retries, each undoing its mount setup.
    assert_eq!(executor.create_count(fixture.id()), 3);
    let shared = mounter
        .calls()
        .into_iter()
        .filter(|c| matches!(c, MountCall::MakeRshared(_)))
        .count();
    assert_eq!(shared, 3);
    assert_eq!(mounter.unmounted().len(), 3);
    assert!(!manager.controller(fixture.id()).await.unwrap().restart);
}

#[tokio::test]
async fn test_recovery_gives_up_when_mount_cannot_be_shared() {
    let roots = TestRoots::new();
    let fixture = PluginFixture::new(1, "volumes:latest")
        .enabled()
        .with_type("docker.volumedriver/1.0")
        .with_propagated_mount("/data");
    fixture.write(&roots.root());

    let executor = MockExecutor::new();
    let mounter = MockMounter::new().failing_make_rshared();
    let manager = Manager::new(roots.config(&executor, &mounter)).await.unwrap();

    // Every attempt stops before the engine is asked for a process.
    assert_eq!(executor.create_count(fixture.id()), 0);
    let shared = mounter
        .calls()
        .into_iter()
        .filter(|c| matches!(c, MountCall::MakeRshared(_)))
        .count();
    assert_eq!(shared, 3);
    assert!(mounter.unmounted().is_empty());
    assert!(!manager.controller(fixture.id()).await.unwrap().restart);
}

#[tokio::test]
async fn test_propagated_mount_dir_failure_is_isolated() {
    let (logs, _guard) = capture_logs("plugvisor_plugins=error");

    let roots = TestRoots::new();
    let blocked = PluginFixture::new(1, "volumes:latest")
        .enabled()
        .with_type("docker.volumedriver/1.0")
        .with_propagated_mount("/data");
    let healthy = PluginFixture::new(2, "healthy:latest").enabled();
    let blocked_dir = blocked.write(&roots.root());
    healthy.write(&roots.root());
    // A file where the rootfs should be makes the mount point uncreatable.
    std::fs::write(blocked_dir.join("rootfs"), b"not a directory").unwrap();

    let executor = MockExecutor::new();
    let manager = roots.manager(&executor).await.unwrap();

    assert_eq!(executor.create_count(blocked.id()), 0);
    assert_eq!(executor.create_count(healthy.id()), 1);
    assert_eq!(manager.store().len().await, 2);

    let failures = logs.lines_with("Failed to restore plugin");
    assert_eq!(failures.len(), 1);
    assert!(failures[0].contains(&format!("plugin_id={}", blocked.id())));
}

#[tokio::test]
async fn test_from_config_bridges_plugins_section() {
    let roots = TestRoots::new();
    let plugins = plugvisor_config::PluginsConfig {
        root: roots.root(),
        exec_root: roots.exec_root(),
        live_restore: true,
        enable_retries: 5,
        retry_backoff_ms: 20,
        shutdown_timeout_secs: 3,
    };
    let config = plugvisor_plugins::ManagerConfig::from_config(
        &plugins,
        std::sync::Arc::new(MockExecutor::new()),
        std::sync::Arc::default(),
    );
    assert_eq!(config.root, roots.root());
    assert!(config.live_restore_enabled);
    assert_eq!(config.enable_retries, 5);
    assert_eq!(config.retry_backoff, std::time::Duration::from_millis(20));
    assert_eq!(config.default_timeout_secs, 3);
}

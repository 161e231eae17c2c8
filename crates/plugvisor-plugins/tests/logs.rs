//! Plugin output forwarding.

use plugvisor_test::{MockExecutor, PluginFixture, TestRoots, capture_logs};

#[tokio::test]
async fn test_plugin_output_is_logged_per_line() {
    let (logs, _guard) = capture_logs("plugvisor::plugin=info");

    let roots = TestRoots::new();
    let fixture = PluginFixture::new(1, "sshfs:latest").enabled();
    fixture.write(&roots.root());

    let executor = MockExecutor::new();
    executor.set_output(fixture.id(), b"listening on plugin.sock\nready\n", b"warning: slow disk\n");
    let manager = roots.manager(&executor).await.unwrap();

    manager.wait_log_streams().await;
    assert_eq!(manager.active_log_streams(), 0);

    let stdout = logs.lines_with("stream=\"stdout\"");
    let stderr = logs.lines_with("stream=\"stderr\"");
    assert_eq!(stdout.len(), 2);
    assert_eq!(stderr.len(), 1);
    assert!(stdout[0].contains("listening on plugin.sock"));
    assert!(stderr[0].contains("warning: slow disk"));
    assert!(stdout.iter().all(|l| l.contains(&format!("plugin={}", fixture.id()))));
    assert!(stdout.iter().all(|l| l.contains("plugvisor::plugin")));
}

#[tokio::test]
async fn test_manager_diagnostics_carry_plugin_id() {
    let (logs, _guard) = capture_logs("plugvisor_plugins=debug");

    let roots = TestRoots::new();
    let fixture = PluginFixture::new(1, "sshfs:latest").enabled();
    fixture.write(&roots.root());

    let executor = MockExecutor::new();
    executor.fail_restore(fixture.id());
    roots.manager(&executor).await.unwrap();

    let failures = logs.lines_with("Failed to restore plugin");
    assert_eq!(failures.len(), 1);
    assert!(failures[0].contains(&format!("plugin_id={}", fixture.id())));
}

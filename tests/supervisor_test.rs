// Integration tests for the supervisor control loop

use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::broadcast;
use warden::config::{DescriptorFile, DescriptorSet};
use warden::process::{
    InstanceInfo, InstanceState, LifecycleEvent, Launcher, SupervisorHandle,
};

const EVENT_TIMEOUT: Duration = Duration::from_secs(10);

fn descriptors(toml_src: &str, profile: Option<&str>) -> DescriptorSet {
    let file = DescriptorFile::parse_toml(toml_src).unwrap();
    DescriptorSet::from_raw(file.descriptors, profile)
}

fn supervisor(log_dir: &TempDir) -> SupervisorHandle {
    SupervisorHandle::spawn(Launcher::new(log_dir.path(), 1024 * 1024), 1024)
}

/// Wait for the first event matching `pred`, returning everything seen on the way
async fn events_until<F>(rx: &mut broadcast::Receiver<LifecycleEvent>, mut pred: F) -> Vec<LifecycleEvent>
where
    F: FnMut(&LifecycleEvent) -> bool,
{
    let mut seen = Vec::new();
    loop {
        let event = tokio::time::timeout(EVENT_TIMEOUT, rx.recv())
            .await
            .expect("timed out waiting for lifecycle event")
            .expect("event stream closed");
        let done = pred(&event);
        seen.push(event);
        if done {
            return seen;
        }
    }
}

async fn wait_for<F>(handle: &SupervisorHandle, mut pred: F) -> Vec<InstanceInfo>
where
    F: FnMut(&[InstanceInfo]) -> bool,
{
    let deadline = tokio::time::Instant::now() + EVENT_TIMEOUT;
    loop {
        let list = handle.list().await.unwrap();
        if pred(&list) {
            return list;
        }
        assert!(tokio::time::Instant::now() < deadline, "condition not reached: {:?}", list);
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

fn all_in(list: &[InstanceInfo], state: InstanceState) -> bool {
    !list.is_empty() && list.iter().all(|i| i.state == state)
}

#[tokio::test]
async fn test_rapid_crashes_back_off_then_give_up() {
    let temp_dir = TempDir::new().unwrap();
    let handle = supervisor(&temp_dir);
    let mut events = handle.subscribe();

    let report = handle
        .start(descriptors(
            r#"
            name = "crasher"
            script = "/bin/sh"
            args = ["-c", "exit 1"]
            max_restarts = 3
            restart_delay_ms = 50
            max_restart_delay_ms = 5000
            min_uptime_ms = 10000
            stdio = "null"
            "#,
            None,
        ))
        .await
        .unwrap();
    assert_eq!(report.started, vec!["crasher"]);

    let seen = events_until(&mut events, |e| matches!(e, LifecycleEvent::GivenUp { .. })).await;

    let delays: Vec<Duration> = seen
        .iter()
        .filter_map(|e| match e {
            LifecycleEvent::RestartScheduled { delay, .. } => Some(*delay),
            _ => None,
        })
        .collect();
    assert_eq!(
        delays,
        vec![
            Duration::from_millis(50),
            Duration::from_millis(100),
            Duration::from_millis(200)
        ]
    );

    let launches = seen
        .iter()
        .filter(|e| matches!(e, LifecycleEvent::Launched { .. }))
        .count();
    assert_eq!(launches, 4);

    let list = handle.list().await.unwrap();
    assert_eq!(list.len(), 1);
    assert_eq!(list[0].state, InstanceState::GivenUp);
    assert_eq!(list[0].restarts, 3);
    assert!(list[0].pid.is_none());
}

#[tokio::test]
async fn test_clean_exit_without_autorestart_gives_up() {
    let temp_dir = TempDir::new().unwrap();
    let handle = supervisor(&temp_dir);
    let mut events = handle.subscribe();

    handle
        .start(descriptors(
            r#"
            name = "oneshot"
            script = "/bin/true"
            autorestart = false
            stdio = "null"
            "#,
            None,
        ))
        .await
        .unwrap();

    let seen = events_until(&mut events, |e| matches!(e, LifecycleEvent::GivenUp { .. })).await;
    match seen.last() {
        Some(LifecycleEvent::GivenUp { reason, .. }) => assert_eq!(reason, "autorestart disabled"),
        other => panic!("unexpected event {:?}", other),
    }
    assert!(!seen
        .iter()
        .any(|e| matches!(e, LifecycleEvent::RestartScheduled { .. })));
}

#[tokio::test]
async fn test_reload_with_new_profile_replaces_instance_once() {
    let temp_dir = TempDir::new().unwrap();
    let handle = supervisor(&temp_dir);
    let source = r#"
        name = "web"
        script = "/bin/sh"
        args = ["-c", "exec sleep 30"]
        stdio = "null"

        [env_blue]
        COLOR = "blue"

        [env_green]
        COLOR = "green"
    "#;

    handle.start(descriptors(source, Some("blue"))).await.unwrap();
    let list = wait_for(&handle, |l| all_in(l, InstanceState::Running)).await;
    let old_pid = list[0].pid.unwrap();
    assert_eq!(list[0].profile.as_deref(), Some("blue"));

    let mut events = handle.subscribe();
    let report = handle.reload(descriptors(source, Some("green"))).await.unwrap();
    assert_eq!(report.replaced, vec!["web"]);

    let seen = events_until(&mut events, |e| matches!(e, LifecycleEvent::Launched { .. })).await;
    let stop_order: Vec<&str> = seen
        .iter()
        .map(|e| match e {
            LifecycleEvent::Stopping { .. } => "stopping",
            LifecycleEvent::Exited { .. } => "exited",
            LifecycleEvent::Stopped { .. } => "stopped",
            LifecycleEvent::Launched { .. } => "launched",
            _ => "other",
        })
        .collect();
    assert_eq!(stop_order, vec!["stopping", "exited", "stopped", "launched"]);

    let list = wait_for(&handle, |l| all_in(l, InstanceState::Running)).await;
    assert_eq!(list.len(), 1);
    assert_eq!(list[0].profile.as_deref(), Some("green"));
    assert_ne!(list[0].pid, Some(old_pid));

    // No second replacement follows
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(matches!(
        events.try_recv(),
        Err(broadcast::error::TryRecvError::Empty)
    ));

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_reload_unchanged_is_noop() {
    let temp_dir = TempDir::new().unwrap();
    let handle = supervisor(&temp_dir);
    let source = r#"
        name = "steady"
        script = "/bin/sleep"
        args = ["30"]
        instances = 2
        stdio = "null"
    "#;

    handle.start(descriptors(source, None)).await.unwrap();
    let before = wait_for(&handle, |l| l.len() == 2 && all_in(l, InstanceState::Running)).await;

    let mut events = handle.subscribe();
    let report = handle.reload(descriptors(source, None)).await.unwrap();
    assert_eq!(report.unchanged, vec!["steady"]);
    assert!(report.replaced.is_empty() && report.started.is_empty());

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(matches!(
        events.try_recv(),
        Err(broadcast::error::TryRecvError::Empty)
    ));

    let after = handle.list().await.unwrap();
    let pids = |l: &[InstanceInfo]| l.iter().map(|i| i.pid).collect::<Vec<_>>();
    assert_eq!(pids(&before), pids(&after));
    assert!(after.iter().all(|i| i.restarts == 0));

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_stop_is_permanent() {
    let temp_dir = TempDir::new().unwrap();
    let handle = supervisor(&temp_dir);

    handle
        .start(descriptors(
            r#"
            name = "sleeper"
            script = "/bin/sleep"
            args = ["30"]
            restart_delay_ms = 10
            stdio = "null"
            "#,
            None,
        ))
        .await
        .unwrap();
    wait_for(&handle, |l| all_in(l, InstanceState::Running)).await;

    let mut events = handle.subscribe();
    handle.stop("sleeper").await.unwrap();

    let list = handle.list().await.unwrap();
    assert!(all_in(&list, InstanceState::Stopped));
    assert!(list[0].pid.is_none());

    tokio::time::sleep(Duration::from_millis(300)).await;
    let list = handle.list().await.unwrap();
    assert!(all_in(&list, InstanceState::Stopped));

    while let Ok(event) = events.try_recv() {
        assert!(!matches!(event, LifecycleEvent::Launched { .. }), "relaunched after stop");
    }
}

#[tokio::test]
async fn test_stop_escalates_to_kill() {
    let temp_dir = TempDir::new().unwrap();
    let handle = supervisor(&temp_dir);

    handle
        .start(descriptors(
            r#"
            name = "stubborn"
            script = "/bin/sh"
            args = ["-c", "trap '' TERM; exec sleep 30"]
            stop_timeout_ms = 200
            stdio = "null"
            "#,
            None,
        ))
        .await
        .unwrap();
    wait_for(&handle, |l| all_in(l, InstanceState::Running)).await;

    let mut events = handle.subscribe();
    tokio::time::timeout(EVENT_TIMEOUT, handle.stop("stubborn"))
        .await
        .expect("stop did not complete")
        .unwrap();

    let mut killed = false;
    while let Ok(event) = events.try_recv() {
        killed |= matches!(event, LifecycleEvent::Killed { .. });
    }
    assert!(killed, "expected SIGKILL after the grace period");
}

#[tokio::test]
async fn test_scaling_never_exceeds_desired_count() {
    let temp_dir = TempDir::new().unwrap();
    let handle = supervisor(&temp_dir);
    let source = |instances: usize| {
        format!(
            r#"
            name = "pool"
            script = "/bin/sleep"
            args = ["30"]
            instances = {}
            exec_mode = "cluster"
            stdio = "null"
            "#,
            instances
        )
    };

    handle.start(descriptors(&source(3), None)).await.unwrap();
    let list = wait_for(&handle, |l| l.len() == 3 && all_in(l, InstanceState::Running)).await;
    let survivor = list[0].pid;

    let report = handle.reload(descriptors(&source(1), None)).await.unwrap();
    assert_eq!(report.scaled, vec!["pool"]);

    let list = wait_for(&handle, |l| {
        let running = l.iter().filter(|i| i.state == InstanceState::Running).count();
        assert!(running <= 3);
        l.len() == 1
    })
    .await;
    assert_eq!(list[0].index, 0);
    assert_eq!(list[0].pid, survivor);

    handle.reload(descriptors(&source(2), None)).await.unwrap();
    wait_for(&handle, |l| {
        let running = l.iter().filter(|i| i.state == InstanceState::Running).count();
        assert!(running <= 2);
        l.len() == 2 && all_in(l, InstanceState::Running)
    })
    .await;

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_reload_removes_missing_names() {
    let temp_dir = TempDir::new().unwrap();
    let handle = supervisor(&temp_dir);

    handle
        .start(descriptors(
            r#"
            [[processes]]
            name = "keep"
            script = "/bin/sleep"
            args = ["30"]
            stdio = "null"

            [[processes]]
            name = "drop"
            script = "/bin/sleep"
            args = ["30"]
            stdio = "null"
            "#,
            None,
        ))
        .await
        .unwrap();
    wait_for(&handle, |l| l.len() == 2 && all_in(l, InstanceState::Running)).await;

    let report = handle
        .reload(descriptors(
            r#"
            name = "keep"
            script = "/bin/sleep"
            args = ["30"]
            stdio = "null"
            "#,
            None,
        ))
        .await
        .unwrap();
    assert_eq!(report.removed, vec!["drop"]);
    assert_eq!(report.unchanged, vec!["keep"]);

    let list = wait_for(&handle, |l| l.len() == 1).await;
    assert_eq!(list[0].name, "keep");

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_invalid_descriptor_rejected_alone() {
    let temp_dir = TempDir::new().unwrap();
    let handle = supervisor(&temp_dir);

    let report = handle
        .start(descriptors(
            r#"
            [[processes]]
            name = "good"
            script = "/bin/sleep"
            args = ["30"]
            stdio = "null"

            [[processes]]
            name = "bad"
            script = "/nonexistent/binary"
            instances = 0
            "#,
            None,
        ))
        .await
        .unwrap();

    assert_eq!(report.started, vec!["good"]);
    assert_eq!(report.rejected.len(), 1);
    assert_eq!(report.rejected[0].name, "bad");

    let list = wait_for(&handle, |l| all_in(l, InstanceState::Running)).await;
    assert_eq!(list.len(), 1);

    let again = handle
        .start(descriptors(
            r#"
            name = "good"
            script = "/bin/sleep"
            args = ["30"]
            stdio = "null"
            "#,
            None,
        ))
        .await
        .unwrap();
    assert!(again.started.is_empty());
    assert!(again.rejected[0].reason.contains("already running"));

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_launch_failure_goes_through_policy() {
    let temp_dir = TempDir::new().unwrap();
    let script = temp_dir.path().join("vanishing.sh");
    std::fs::write(&script, "#!/bin/sh\nsleep 30\n").unwrap();
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
    }

    let set = descriptors(
        &format!(
            r#"
            name = "vanishing"
            script = "{}"
            max_restarts = 2
            restart_delay_ms = 20
            stdio = "null"
            "#,
            script.display()
        ),
        None,
    );
    assert!(set.rejected.is_empty());
    std::fs::remove_file(&script).unwrap();

    let handle = supervisor(&temp_dir);
    let mut events = handle.subscribe();
    handle.start(set).await.unwrap();

    let seen = events_until(&mut events, |e| matches!(e, LifecycleEvent::GivenUp { .. })).await;
    let failures = seen
        .iter()
        .filter(|e| matches!(e, LifecycleEvent::LaunchFailed { .. }))
        .count();
    assert_eq!(failures, 3);
}

#[tokio::test]
async fn test_stop_unknown_name() {
    let temp_dir = TempDir::new().unwrap();
    let handle = supervisor(&temp_dir);

    let result = handle.stop("nobody").await;
    assert!(matches!(result, Err(warden::error::WardenError::ProcessNotFound(_))));
}

#[tokio::test]
async fn test_shutdown_stops_everything() {
    let temp_dir = TempDir::new().unwrap();
    let handle = supervisor(&temp_dir);

    handle
        .start(descriptors(
            r#"
            name = "fleet"
            script = "/bin/sleep"
            args = ["30"]
            instances = 3
            stdio = "null"
            "#,
            None,
        ))
        .await
        .unwrap();
    let list = wait_for(&handle, |l| l.len() == 3 && all_in(l, InstanceState::Running)).await;
    let pids: Vec<u32> = list.iter().filter_map(|i| i.pid).collect();

    handle.shutdown().await.unwrap();

    for pid in pids {
        let alive = nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid as i32), None).is_ok();
        assert!(!alive, "pid {} survived shutdown", pid);
    }
    assert!(matches!(
        handle.list().await,
        Err(warden::error::WardenError::SupervisorGone)
    ));
}

#[tokio::test]
async fn test_stop_cancels_scheduled_restart() {
    let temp_dir = TempDir::new().unwrap();
    let handle = supervisor(&temp_dir);
    let mut events = handle.subscribe();

    handle
        .start(descriptors(
            r#"
            name = "flaky"
            script = "/bin/sh"
            args = ["-c", "exit 1"]
            restart_delay_ms = 30000
            max_restart_delay_ms = 60000
            stdio = "null"
            "#,
            None,
        ))
        .await
        .unwrap();
    events_until(&mut events, |e| matches!(e, LifecycleEvent::RestartScheduled { .. })).await;

    let list = handle.list().await.unwrap();
    assert!(all_in(&list, InstanceState::RestartScheduled));

    let mut after_stop = handle.subscribe();
    handle.stop("flaky").await.unwrap();

    let list = handle.list().await.unwrap();
    assert!(all_in(&list, InstanceState::Stopped));

    tokio::time::sleep(Duration::from_millis(300)).await;
    while let Ok(event) = after_stop.try_recv() {
        assert!(!matches!(event, LifecycleEvent::Launched { .. }), "restart fired after stop");
    }
    assert!(all_in(&handle.list().await.unwrap(), InstanceState::Stopped));
}

fn pid_alive(pid: u32) -> bool {
    nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid as i32), None).is_ok()
}

const STUBBORN: &str = r#"
    name = "stubborn"
    script = "/bin/sh"
    args = ["-c", "trap '' TERM; exec sleep 30"]
    stop_timeout_ms = 500
    stdio = "null"
"#;

#[tokio::test]
async fn test_readd_waits_for_removed_instance_to_exit() {
    let temp_dir = TempDir::new().unwrap();
    let handle = supervisor(&temp_dir);

    handle.start(descriptors(STUBBORN, None)).await.unwrap();
    let list = wait_for(&handle, |l| all_in(l, InstanceState::Running)).await;
    let old_pid = list[0].pid.unwrap();

    let report = handle.reload(DescriptorSet::default()).await.unwrap();
    assert_eq!(report.removed, vec!["stubborn"]);

    let report = handle.reload(descriptors(STUBBORN, None)).await.unwrap();
    assert_eq!(report.started, vec!["stubborn"]);

    // The old process keeps its slot until it is gone
    let list = handle.list().await.unwrap();
    assert_eq!(list.len(), 1);
    assert_eq!(list[0].state, InstanceState::Stopping);
    assert_eq!(list[0].pid, Some(old_pid));

    let list = wait_for(&handle, |l| {
        assert!(l.len() <= 1, "two instances for one slot: {:?}", l);
        all_in(l, InstanceState::Running) && l[0].pid != Some(old_pid)
    })
    .await;
    assert_eq!(list.len(), 1);
    assert!(!pid_alive(old_pid), "old pid {} survived its grace period", old_pid);

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_scale_down_then_up_restores_count() {
    let temp_dir = TempDir::new().unwrap();
    let handle = supervisor(&temp_dir);
    let source = |instances: usize| format!("{}instances = {}\n", STUBBORN, instances);

    handle.start(descriptors(&source(2), None)).await.unwrap();
    let list = wait_for(&handle, |l| l.len() == 2 && all_in(l, InstanceState::Running)).await;
    let first = list[0].pid;
    let second = list[1].pid.unwrap();

    let report = handle.reload(descriptors(&source(1), None)).await.unwrap();
    assert_eq!(report.scaled, vec!["stubborn"]);
    let report = handle.reload(descriptors(&source(2), None)).await.unwrap();
    assert_eq!(report.scaled, vec!["stubborn"]);

    let list = wait_for(&handle, |l| {
        l.len() == 2 && all_in(l, InstanceState::Running) && l[1].pid != Some(second)
    })
    .await;
    assert_eq!(list[0].pid, first);
    assert!(!pid_alive(second));

    // Stays at the desired count
    tokio::time::sleep(Duration::from_millis(300)).await;
    let list = handle.list().await.unwrap();
    assert_eq!(list.len(), 2);
    assert!(all_in(&list, InstanceState::Running));

    handle.shutdown().await.unwrap();
}

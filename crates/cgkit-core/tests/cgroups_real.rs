//! Integration tests for the synchronous cgroup filesystem operations.
//!
//! These tests require:
//! - Linux with cgroup v1 support
//! - Root (they mount and unmount fresh hierarchies)
//! - The freezer subsystem enabled and not attached elsewhere
//!
//! Tests are automatically skipped if requirements are not met.

#![cfg(target_os = "linux")]

mod support;

use cgkit_core::cgroups;
use cgkit_core::{test_log, Error};
use support::{ChildProcess, TestHierarchy};

#[test]
fn test_available_reports_proc_cgroups() {
    // Purely informational; availability depends on the kernel.
    let available = cgroups::available();
    test_log!(INFO, "cgroup availability", available = available);
}

#[test]
fn test_subsystem_queries_live() {
    if !cgroups::available() {
        test_log!(INFO, "Skipping: /proc/cgroups not present");
        return;
    }

    let names = cgroups::subsystems().unwrap();
    test_log!(INFO, "enabled subsystems", count = names.len());

    // Unknown subsystems must be an error, not false.
    assert!(matches!(
        cgroups::enabled("definitely-not-a-subsystem"),
        Err(Error::SubsystemMissing { .. })
    ));
    assert!(matches!(
        cgroups::busy("definitely-not-a-subsystem"),
        Err(Error::SubsystemMissing { .. })
    ));

    for name in &names {
        assert!(cgroups::enabled(name).unwrap());
    }
}

#[test]
fn test_s1_create_remove_lifecycle() {
    support::init_logging();
    let Some(hierarchy) = TestHierarchy::mount("freezer") else {
        test_log!(INFO, "Skipping: cannot mount a freezer hierarchy");
        return;
    };
    let h = hierarchy.path();

    assert!(cgroups::mounted(h, "freezer").unwrap());
    assert!(cgroups::hierarchies().unwrap().contains(&h.canonicalize().unwrap()));
    assert!(cgroups::subsystems_of(h).unwrap().contains("freezer"));

    cgroups::create(h, "a").unwrap();
    assert!(cgroups::exists(h, "a").unwrap());
    assert_eq!(cgroups::nested(h, "").unwrap(), vec!["a".to_string()]);

    cgroups::remove(h, "a").unwrap();
    assert!(!cgroups::exists(h, "a").unwrap());
    assert!(cgroups::nested(h, "").unwrap().is_empty());

    drop(hierarchy);
}

#[test]
fn test_s2_remove_refuses_nested_cgroups() {
    support::init_logging();
    let Some(hierarchy) = TestHierarchy::mount("freezer") else {
        test_log!(INFO, "Skipping: cannot mount a freezer hierarchy");
        return;
    };
    let h = hierarchy.path();

    cgroups::create(h, "a").unwrap();
    cgroups::create(h, "a/b").unwrap();

    let err = cgroups::remove(h, "a").unwrap_err();
    assert!(matches!(err, Error::NestedCgroups { .. }), "got {err}");

    cgroups::remove(h, "a/b").unwrap();
    cgroups::remove(h, "a").unwrap();
}

#[test]
fn test_enumerate_is_postorder() {
    support::init_logging();
    let Some(hierarchy) = TestHierarchy::mount("freezer") else {
        test_log!(INFO, "Skipping: cannot mount a freezer hierarchy");
        return;
    };
    let h = hierarchy.path();

    for cgroup in ["a", "a/b", "a/c", "a/c/d", "e"] {
        cgroups::create(h, cgroup).unwrap();
    }

    let all = cgroups::nested(h, "").unwrap();
    assert_eq!(all, vec!["a/b", "a/c/d", "a/c", "a", "e"]);

    // Scoped to a subtree the root itself is excluded.
    let under_a = cgroups::nested(h, "a").unwrap();
    assert_eq!(under_a, vec!["a/b", "a/c/d", "a/c"]);
}

#[test]
fn test_control_write_read_round_trip() {
    support::init_logging();
    let Some(hierarchy) = TestHierarchy::mount("freezer") else {
        test_log!(INFO, "Skipping: cannot mount a freezer hierarchy");
        return;
    };
    let h = hierarchy.path();

    cgroups::create(h, "a").unwrap();

    assert_eq!(cgroups::read(h, "a", "freezer.state").unwrap().trim(), "THAWED");

    cgroups::write(h, "a", "notify_on_release", "1").unwrap();
    assert_eq!(cgroups::read(h, "a", "notify_on_release").unwrap().trim(), "1");

    assert!(cgroups::exists_control(h, "a", "freezer.state").unwrap());
    assert!(!cgroups::exists_control(h, "a", "bogus.control").unwrap());

    cgroups::remove(h, "a").unwrap();
}

#[test]
fn test_verification_gate_errors() {
    support::init_logging();
    let Some(hierarchy) = TestHierarchy::mount("freezer") else {
        test_log!(INFO, "Skipping: cannot mount a freezer hierarchy");
        return;
    };
    let h = hierarchy.path();

    assert!(matches!(
        cgroups::read(h, "missing", "freezer.state"),
        Err(Error::CgroupMissing { .. })
    ));

    cgroups::create(h, "a").unwrap();
    assert!(matches!(
        cgroups::read(h, "a", "memory.oom_control"),
        Err(Error::ControlMissing { .. })
    ));

    // An unmounted path fails every verified operation.
    let bogus = std::path::Path::new("/definitely/not/mounted");
    assert!(matches!(
        cgroups::exists(bogus, "a"),
        Err(Error::NotMounted { .. })
    ));

    cgroups::remove(h, "a").unwrap();
}

#[test]
fn test_assign_and_tasks() {
    support::init_logging();
    let Some(hierarchy) = TestHierarchy::mount("freezer") else {
        test_log!(INFO, "Skipping: cannot mount a freezer hierarchy");
        return;
    };
    let h = hierarchy.path();

    cgroups::create(h, "a").unwrap();
    assert!(cgroups::tasks(h, "a").unwrap().is_empty());

    let child = ChildProcess::spawn_sleep().unwrap();
    cgroups::assign(h, "a", child.pid()).unwrap();

    let pids = cgroups::tasks(h, "a").unwrap();
    assert!(pids.contains(&child.pid()), "assigned pid not in tasks");

    // Enrollment moved the pid out of the root cgroup of this hierarchy.
    assert!(!cgroups::tasks(h, "").unwrap().contains(&child.pid()));

    // Move it back so the cgroup can be removed.
    cgroups::assign(h, "", child.pid()).unwrap();
    assert!(!cgroups::tasks(h, "a").unwrap().contains(&child.pid()));

    cgroups::remove(h, "a").unwrap();
}

#[test]
fn test_kill_signals_all_tasks() {
    support::init_logging();
    let Some(hierarchy) = TestHierarchy::mount("freezer") else {
        test_log!(INFO, "Skipping: cannot mount a freezer hierarchy");
        return;
    };
    let h = hierarchy.path();

    cgroups::create(h, "a").unwrap();

    let mut child = ChildProcess::spawn_sleep().unwrap();
    cgroups::assign(h, "a", child.pid()).unwrap();

    cgroups::kill(h, "a", libc::SIGKILL).unwrap();

    let status = child.wait_for_exit().unwrap();
    assert!(!status.success());

    // The kernel drops exiting tasks from the tasks file on its own.
    let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
    while !cgroups::tasks(h, "a").unwrap().is_empty() {
        assert!(std::time::Instant::now() < deadline, "cgroup never drained");
        std::thread::sleep(std::time::Duration::from_millis(10));
    }

    cgroups::remove(h, "a").unwrap();
}

#[test]
fn test_mount_refuses_busy_subsystem() {
    support::init_logging();
    let Some(hierarchy) = TestHierarchy::mount("freezer") else {
        test_log!(INFO, "Skipping: cannot mount a freezer hierarchy");
        return;
    };

    // The freezer is now attached to our own hierarchy, so a second mount
    // anywhere else must refuse.
    assert!(cgroups::busy("freezer").unwrap());

    let scratch = tempfile::tempdir().unwrap();
    let err = cgroups::mount(&scratch.path().join("second"), "freezer").unwrap_err();
    assert!(matches!(err, Error::SubsystemBusy { .. }), "got {err}");

    drop(hierarchy);

    // After unmount the subsystem is free again.
    assert!(!cgroups::busy("freezer").unwrap());
}

#[test]
fn test_cpuset_controls_copied_from_parent() {
    support::init_logging();
    let Some(hierarchy) = TestHierarchy::mount("cpuset") else {
        test_log!(INFO, "Skipping: cannot mount a cpuset hierarchy");
        return;
    };
    let h = hierarchy.path();

    cgroups::create(h, "a").unwrap();

    let parent_cpus = cgroups::read(h, "", "cpuset.cpus").unwrap();
    let parent_mems = cgroups::read(h, "", "cpuset.mems").unwrap();
    assert_eq!(
        cgroups::read(h, "a", "cpuset.cpus").unwrap().trim(),
        parent_cpus.trim()
    );
    assert_eq!(
        cgroups::read(h, "a", "cpuset.mems").unwrap().trim(),
        parent_mems.trim()
    );

    // The copy is what makes the cgroup able to host tasks at all.
    let child = ChildProcess::spawn_sleep().unwrap();
    cgroups::assign(h, "a", child.pid()).unwrap();
    cgroups::assign(h, "", child.pid()).unwrap();

    cgroups::remove(h, "a").unwrap();
}

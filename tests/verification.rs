// tests/verification.rs

//! Verification harness and report aggregation tests.

mod common;

use common::{FakeProbe, FakeSystem, plan};
use converge::plan::TagFilter;
use converge::report::{EXIT_FAILURE, EXIT_INDETERMINATE, EXIT_OK, aggregate, summary_lines};
use converge::runner::CommandOutput;
use converge::verify::{Harness, Verdict};

const WORKSTATION: &str = r#"
[plan]
version = 1
name = "workstation"

[[group]]
name = "docker"
tags = ["docker"]

[[group.assert]]
kind = "package"
name = "docker-ce"

[[group.assert]]
kind = "service"
unit = "docker.service"
state = "enabled"

[[group]]
name = "embedded"
tags = ["embedded"]

[[group.assert]]
kind = "package"
name = "openocd"

[[check]]
name = "docker-cli"
type = "command"
command = ["docker", "--version"]
expect = "^Docker version"
tags = ["docker"]

[[check]]
name = "arm-toolchain"
type = "command"
command = ["arm-none-eabi-gcc", "--version"]
tags = ["embedded"]

[[check]]
name = "editor-launches"
type = "command"
command = ["code", "--version"]
requires_display = true
"#;

#[test]
fn test_results_in_plan_order() {
    let system = FakeSystem::new();
    system.install("docker-ce", "5:27.1");
    let probe = FakeProbe::new(&system).with_command(
        "docker --version",
        CommandOutput::ok("Docker version 27.1.1, build 6312585\n"),
    );

    let results = Harness::new(&probe).verify(&plan(WORKSTATION), &TagFilter::all());
    let names: Vec<_> = results.iter().map(|r| r.check_name.as_str()).collect();
    assert_eq!(
        names,
        vec![
            "docker/package:docker-ce",
            "docker/service:docker.service",
            "embedded/package:openocd",
            "check/docker-cli",
            "check/arm-toolchain",
            "check/editor-launches",
        ]
    );

    let verdicts: Vec<_> = results.iter().map(|r| r.verdict).collect();
    assert_eq!(
        verdicts,
        vec![
            Verdict::Passed,
            // No service manager behind the probe
            Verdict::Indeterminate,
            Verdict::Failed,
            Verdict::Passed,
            // Tool missing entirely
            Verdict::Failed,
            // Headless
            Verdict::Indeterminate,
        ]
    );
}

#[test]
fn test_tag_filter_limits_verification() {
    let system = FakeSystem::new();
    system.install("openocd", "0.12.0");
    let probe = FakeProbe::new(&system).with_command(
        "arm-none-eabi-gcc --version",
        CommandOutput::ok("arm-none-eabi-gcc (15:13.2.rel1-2) 13.2.1\n"),
    );

    let filter = TagFilter::new(["embedded"], Vec::<String>::new());
    let results = Harness::new(&probe).verify(&plan(WORKSTATION), &filter);
    let names: Vec<_> = results.iter().map(|r| r.check_name.as_str()).collect();
    assert_eq!(names, vec!["embedded/package:openocd", "check/arm-toolchain"]);
    assert!(results.iter().all(|r| r.passed()));
    assert_eq!(results[1].detail, "arm-none-eabi-gcc (15:13.2.rel1-2) 13.2.1");
}

#[test]
fn test_expect_mismatch_fails() {
    let system = FakeSystem::new();
    let probe = FakeProbe::new(&system)
        .with_command("docker --version", CommandOutput::ok("podman version 4.9\n"));

    let filter = TagFilter::new(["docker"], Vec::<String>::new());
    let results = Harness::new(&probe).verify(&plan(WORKSTATION), &filter);
    let cli = results.iter().find(|r| r.check_name == "check/docker-cli").unwrap();
    assert_eq!(cli.verdict, Verdict::Failed);
    assert!(cli.detail.contains("does not match"));
}

#[test]
fn test_display_makes_gui_check_determinate() {
    let system = FakeSystem::new();
    let mut probe = FakeProbe::new(&system)
        .with_command("code --version", CommandOutput::ok("1.92.0\n"));
    probe.display = true;

    let plan = plan(WORKSTATION);
    let check = plan.checks.iter().find(|c| c.name == "editor-launches").unwrap();
    let result = Harness::new(&probe).verify_check(check, None);
    assert!(result.passed());
    assert_eq!(result.detail, "1.92.0");
}

#[test]
fn test_strict_exit_codes() {
    let system = FakeSystem::new();
    system.install("docker-ce", "5:27.1");
    let probe = FakeProbe::new(&system)
        .with_command("docker --version", CommandOutput::ok("Docker version 27.1.1\n"));

    // Untagged checks are not selected by --tags docker
    let plan = plan(WORKSTATION);
    let filter = TagFilter::new(["docker"], Vec::<String>::new());
    let results = Harness::new(&probe).verify(&plan, &filter);
    let summary = aggregate(None, &results);

    assert!(summary.overall_ok);
    assert_eq!(summary.counts.passed, 2);
    assert_eq!(summary.counts.indeterminate, 1);
    assert_eq!(summary.exit_code(false), EXIT_OK);
    assert_eq!(summary.exit_code(true), EXIT_INDETERMINATE);

    let lines = summary_lines(&summary);
    assert!(
        lines
            .iter()
            .any(|l| l.starts_with("[INFO] indeterminate: docker/service:docker.service"))
    );
    assert!(lines.last().unwrap().starts_with("[PASS] "));
}

#[test]
fn test_any_failure_wins_over_indeterminate() {
    let system = FakeSystem::new();
    let probe = FakeProbe::new(&system);

    let results = Harness::new(&probe).verify(&plan(WORKSTATION), &TagFilter::all());
    let summary = aggregate(None, &results);

    assert!(!summary.overall_ok);
    assert_eq!(summary.exit_code(true), EXIT_FAILURE);
    assert_eq!(
        summary.failures[0],
        "docker/package:docker-ce: expected docker-ce installed, observed not installed"
    );
    assert!(summary_lines(&summary).last().unwrap().starts_with("[FAIL] "));
}

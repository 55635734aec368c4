// build.rs

use clap::{Arg, ArgAction, Command};
use clap_mangen::Man;
use std::env;
use std::fs;
use std::path::PathBuf;

const DEFAULT_PLAN_PATH: &str = "/etc/converge/plan.toml";

/// Common argument: plan file path
fn plan_arg() -> Arg {
    Arg::new("plan")
        .short('p')
        .long("plan")
        .value_name("PATH")
        .default_value(DEFAULT_PLAN_PATH)
        .help("Path to the plan file")
}

/// Common argument: plan variable override
fn var_arg() -> Arg {
    Arg::new("var")
        .long("var")
        .value_name("KEY=VALUE")
        .action(ArgAction::Append)
        .help("Override a plan variable (repeatable)")
}

fn tags_arg() -> Arg {
    Arg::new("tags")
        .short('t')
        .long("tags")
        .value_name("TAGS")
        .help("Only assertions with one of these tags (comma-separated)")
}

fn skip_tags_arg() -> Arg {
    Arg::new("skip_tags")
        .long("skip-tags")
        .value_name("TAGS")
        .help("Exclude assertions with any of these tags (comma-separated)")
}

/// Common argument: target root directory
fn root_arg() -> Arg {
    Arg::new("root")
        .short('r')
        .long("root")
        .default_value("/")
        .help("Target root directory")
}

fn format_arg() -> Arg {
    Arg::new("format")
        .long("format")
        .value_parser(["text", "json"])
        .default_value("text")
        .help("Output format")
}

fn build_cli() -> Command {
    Command::new("converge")
        .version(env!("CARGO_PKG_VERSION"))
        .author("Converge Contributors")
        .about("Declarative workstation convergence with independent verification")
        .subcommand_required(true)
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .action(ArgAction::Count)
                .global(true)
                .help("Increase log verbosity (-v info, -vv debug); RUST_LOG overrides"),
        )
        .subcommand(
            Command::new("run")
                .about("Converge the system towards the plan")
                .arg(plan_arg())
                .arg(var_arg())
                .arg(tags_arg())
                .arg(skip_tags_arg())
                .arg(
                    Arg::new("check")
                        .long("check")
                        .visible_alias("dry-run")
                        .action(ArgAction::SetTrue)
                        .help("Only check; report what would change without applying"),
                )
                .arg(root_arg())
                .arg(
                    Arg::new("timeout")
                        .long("timeout")
                        .help("Default per-assertion timeout (e.g. 30s, 10m)"),
                )
                .arg(Arg::new("lock").long("lock").help("Advisory lock file for mutating runs"))
                .arg(format_arg())
                .arg(
                    Arg::new("verify")
                        .long("verify")
                        .action(ArgAction::SetTrue)
                        .help("Run the verification harness after converging"),
                ),
        )
        .subcommand(
            Command::new("verify")
                .about("Verify the system against the plan without changing anything")
                .arg(plan_arg())
                .arg(var_arg())
                .arg(tags_arg())
                .arg(skip_tags_arg())
                .arg(root_arg())
                .arg(format_arg())
                .arg(
                    Arg::new("strict")
                        .long("strict")
                        .action(ArgAction::SetTrue)
                        .help("Treat indeterminate results as exit code 2"),
                ),
        )
        .subcommand(
            Command::new("plan")
                .about("Plan inspection")
                .subcommand_required(true)
                .subcommand(
                    Command::new("list")
                        .about("List groups and assertions, marking what the tags select")
                        .arg(plan_arg())
                        .arg(var_arg())
                        .arg(tags_arg())
                        .arg(skip_tags_arg()),
                )
                .subcommand(
                    Command::new("validate")
                        .about("Load the plan and validate every assertion")
                        .arg(plan_arg())
                        .arg(var_arg()),
                ),
        )
        .subcommand(
            Command::new("init")
                .about("Write a starter workstation plan")
                .arg(
                    Arg::new("output")
                        .short('o')
                        .long("output")
                        .default_value(DEFAULT_PLAN_PATH)
                        .help("Where to write the plan"),
                )
                .arg(
                    Arg::new("user")
                        .short('u')
                        .long("user")
                        .help("User to add to device and docker groups"),
                )
                .arg(
                    Arg::new("force")
                        .short('f')
                        .long("force")
                        .action(ArgAction::SetTrue)
                        .help("Overwrite an existing file"),
                ),
        )
        .subcommand(
            Command::new("completions")
                .about("Generate shell completion scripts")
                .arg(
                    Arg::new("shell")
                        .required(true)
                        .value_parser(["bash", "zsh", "fish", "powershell", "elvish"])
                        .help("Shell type"),
                ),
        )
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    // Create man directory - use CARGO_MANIFEST_DIR which is always set by cargo
    let manifest_dir = match env::var("CARGO_MANIFEST_DIR") {
        Ok(dir) => PathBuf::from(dir),
        Err(e) => {
            println!("cargo:warning=CARGO_MANIFEST_DIR not set: {}", e);
            return;
        }
    };
    let man_dir = manifest_dir.join("man");

    if let Err(e) = fs::create_dir_all(&man_dir) {
        println!("cargo:warning=Failed to create man directory: {}", e);
        return;
    }

    let man = Man::new(build_cli());
    let mut buffer = Vec::new();

    if let Err(e) = man.render(&mut buffer) {
        println!("cargo:warning=Failed to render man page: {}", e);
        return;
    }

    let man_path = man_dir.join("converge.1");
    if let Err(e) = fs::write(&man_path, buffer) {
        println!("cargo:warning=Failed to write man page: {}", e);
    }
}

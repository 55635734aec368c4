// src/scaffold.rs

//! Starter plan written by `converge init`
//!
//! A Debian/Ubuntu developer workstation: base tooling, Docker from the
//! upstream repository, an editor with extensions, an embedded ARM
//! toolchain with ST-Link udev rules, and device-access groups.

use crate::error::{Error, Result};

const USER_PLACEHOLDER: &str = "__USER__";

const WORKSTATION_TEMPLATE: &str =
    r#"# Workstation plan. Edit freely; `converge plan validate` checks it.

[plan]
version = 1
name = "workstation"

[settings]
timeout = "15m"

[vars]
user = "__USER__"
release = "noble"
arch = "amd64"
base_packages = ["git", "curl", "ca-certificates", "gnupg", "build-essential"]
embedded_packages = ["stlink-tools", "openocd", "gcc-arm-none-eabi", "gdb-multiarch"]
device_groups = ["dialout", "plugdev"]
extensions = [
    "rust-lang.rust-analyzer",
    "ms-vscode.cpptools",
    "marus25.cortex-debug",
]

# Always selected, even with --tags
[[group]]
name = "base"
tags = ["base", "always"]

[[group.assert]]
kind = "package"
for_each = "base_packages"
name = "{{ item }}"
update_cache = true

[[group]]
name = "docker"
tags = ["docker"]

[[group.assert]]
kind = "repository"
name = "docker"
uri = "https://download.docker.com/linux/ubuntu"
suite = "{{ release }}"
components = ["stable"]
arch = "{{ arch }}"
key_url = "https://download.docker.com/linux/ubuntu/gpg"

[[group.assert]]
kind = "package"
for_each = ["docker-ce", "docker-ce-cli", "containerd.io", "docker-compose-plugin"]
name = "{{ item }}"
from = "docker"

[[group.assert]]
kind = "service"
unit = "docker.service"
state = "enabled"

[[group.assert]]
kind = "group-member"
user = "{{ user }}"
group = "docker"
create = true

[[group]]
name = "editor"
tags = ["editor"]

[[group.assert]]
kind = "repository"
name = "vscode"
uri = "https://packages.microsoft.com/repos/code"
suite = "stable"
components = ["main"]
arch = "{{ arch }}"
key_url = "https://packages.microsoft.com/keys/microsoft.asc"

[[group.assert]]
kind = "package"
name = "code"
from = "vscode"

[[group.assert]]
kind = "extension"
for_each = "extensions"
name = "{{ item }}"
user = "{{ user }}"
tags = ["extensions"]
timeout = "5m"

[[group]]
name = "embedded"
tags = ["embedded"]

[[group.assert]]
kind = "package"
for_each = "embedded_packages"
name = "{{ item }}"

[[group.assert]]
kind = "file"
path = "/etc/udev/rules.d/49-stlinkv2.rules"
mode = "0644"
on_change = ["udevadm", "control", "--reload-rules"]
content = '''
# ST-Link/V2 and V2-1 programmers
SUBSYSTEMS=="usb", ATTRS{idVendor}=="0483", ATTRS{idProduct}=="3748", MODE="0660", GROUP="plugdev"
SUBSYSTEMS=="usb", ATTRS{idVendor}=="0483", ATTRS{idProduct}=="374b", MODE="0660", GROUP="plugdev"
'''

[[group]]
name = "access"
tags = ["access"]

[[group.assert]]
kind = "group-member"
for_each = "device_groups"
user = "{{ user }}"
group = "{{ item }}"
create = true

# Opt-in: run with --tags ssh
[[group.assert]]
kind = "package"
name = "openssh-server"
tags = ["ssh", "never"]

[[group.assert]]
kind = "service"
unit = "ssh.service"
state = "enabled"
tags = ["ssh", "never"]

[[check]]
name = "docker-socket"
type = "socket"
path = "/var/run/docker.sock"
tags = ["docker"]

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
expect = "arm-none-eabi-gcc"
tags = ["embedded"]

[[check]]
name = "stlink-rules"
type = "path"
path = "/etc/udev/rules.d/49-stlinkv2.rules"
tags = ["embedded"]

[[check]]
name = "editor-launches"
type = "command"
command = ["code", "--version"]
requires_display = true
tags = ["editor"]
"#;

/// Render the workstation plan for `user`
pub fn workstation_plan(user: &str) -> Result<String> {
    let valid = !user.is_empty()
        && !user.starts_with('-')
        && user
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
    if !valid {
        return Err(Error::Config(format!("Invalid user name '{}'", user)));
    }
    Ok(WORKSTATION_TEMPLATE.replace(USER_PLACEHOLDER, user))
}

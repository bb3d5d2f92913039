//! Repair script executed inside the recovery chroot.

use crate::config::RepairConfig;

/// Render the repair procedure as a POSIX shell script.
///
/// `set -eu` makes the first failing command abort the whole script, so the
/// chroot invocation succeeds only if every stage did.
pub fn render_script(repair: &RepairConfig) -> String {
    let mut script = String::from("#!/bin/sh\nset -eu\n\n");

    if !repair.packages.is_empty() && !repair.install_command.trim().is_empty() {
        script.push_str("echo '>>> reinstalling boot packages'\n");
        if !repair.refresh_command.trim().is_empty() {
            script.push_str(&format!("{}\n", repair.refresh_command.trim()));
        }
        script.push_str(&format!("{} {}\n\n", repair.install_command.trim(), repair.packages.join(" ")));
    }

    let stages = [
        ("regenerating initramfs", &repair.initramfs_command),
        ("reinstalling bootloader", &repair.bootloader_command),
        ("regenerating boot configuration", &repair.boot_config_command),
    ];
    for (label, command) in stages {
        let command = command.trim();
        if command.is_empty() {
            continue;
        }
        script.push_str(&format!("echo '>>> {}'\n{}\n\n", label, command));
    }

    script.push_str("echo '>>> repair complete'\n");
    script
}

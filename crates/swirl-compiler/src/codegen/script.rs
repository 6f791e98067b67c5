// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Launch script generation.

use std::fmt::Write;
use std::path::Path;

use swirl_dsl::{Connection, Location, ModelError};

pub const SCRIPT_NAME: &str = "run.sh";

/// Crate name generated programs use for the runtime.
pub const RUNTIME_CRATE: &str = "swirl_runtime";
/// File name of the prebuilt runtime library inside the runtime directory.
pub const RUNTIME_RLIB: &str = "libswirl_runtime.rlib";
/// Overrides the runtime directory recorded in the script at launch time.
pub const RUNTIME_DIR_ENV: &str = "SWIRL_RUNTIME_DIR";

/// `value` as a single-quoted shell word.
fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "'\\''"))
}

/// Source of `run.sh` starting every program in `locations`.
///
/// The script builds each program next to its source against the prebuilt
/// runtime library in `runtime_dir`, copies the binaries of remote locations
/// and waits for the copies, then starts every location in the background.
/// An interrupt kills the whole process group. The exit status is 1 if any
/// location failed.
pub fn emit_script(locations: &[&Location], runtime_dir: &Path) -> Result<String, ModelError> {
    let mut script = String::from(
        "#!/bin/sh\n\
         # Generated by swirlc. Do not edit.\n\
         SCRIPT_DIR=\"$(cd \"$(dirname \"$0\")\" && pwd)\"\n",
    );
    let _ = write!(
        script,
        "RUNTIME_DIR={dir}\n\
         if [ -n \"${RUNTIME_DIR_ENV}\" ]; then\n    \
             RUNTIME_DIR=\"${RUNTIME_DIR_ENV}\"\n\
         fi\n\
         if [ ! -f \"$RUNTIME_DIR/{RUNTIME_RLIB}\" ]; then\n    \
             echo \"{RUNTIME_RLIB} not found in $RUNTIME_DIR\" >&2\n    \
             exit 1\n\
         fi\n\n\
         trap 'echo \"Force termination\"; kill 0' INT\n\n",
        dir = shell_quote(&runtime_dir.display().to_string()),
    );

    for location in locations {
        let name = &location.name;
        let _ = writeln!(
            script,
            "rustc --edition 2021 -O \
             --extern {RUNTIME_CRATE}=\"$RUNTIME_DIR/{RUNTIME_RLIB}\" \
             -L dependency=\"$RUNTIME_DIR/deps\" \
             -o \"$SCRIPT_DIR/{name}\" \"$SCRIPT_DIR/{name}.rs\" || exit 1"
        );
    }

    let mut copies = 0;
    for location in locations {
        if let Some(copy) = location.copy_command(&format!("\"$SCRIPT_DIR/{}\"", location.name))? {
            if copies == 0 {
                script.push('\n');
            }
            let _ = writeln!(script, "{copy} &");
            copies += 1;
        }
    }
    if copies > 0 {
        script.push_str("wait\n");
    }

    script.push_str("\npids=\"\"\n");
    for location in locations {
        let start = match location.connection()? {
            Connection::Local => format!("\"$SCRIPT_DIR/{}\"", location.name),
            _ => location.wrap_command(&format!("./{}", location.name))?,
        };
        let _ = writeln!(script, "{start} &");
        script.push_str("pids=\"$pids $!\"\n");
    }

    script.push_str(
        "\nstatus=0\n\
         for pid in $pids; do\n    \
             wait \"$pid\" || status=1\n\
         done\n\
         exit $status\n",
    );
    Ok(script)
}

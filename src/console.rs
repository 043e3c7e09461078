//! Real console discovery from the kernel command line.
//!
//! The kernel routes boot messages to the device(s) named by `console=`
//! parameters; to mirror its output we must find the same devices. The last
//! `console=` token is the kernel's primary console, so tokens are scanned
//! right to left.

use std::fs::{File, OpenOptions};
use std::io::Read;
use std::os::unix::fs::OpenOptionsExt;

use nix::mount::{mount, umount, MsFlags};
use nix::sys::stat::stat;

use crate::error::StartupError;

/// Upper bound on fan-out targets.
pub const MAX_CONSOLES: usize = 16;

/// The kernel command line is bounded by COMMAND_LINE_SIZE (arch dependent,
/// at most 4096).
const KERNEL_COMMAND_LENGTH: usize = 4096;

/// Mapping from a `console=` value prefix to candidate device paths. The
/// digit suffix of the value is appended to the pattern. Ordered; first
/// matching prefix wins.
struct DeviceTemplate {
    prefix: &'static str,
    patterns: [Option<&'static str>; 2],
}

const TEMPLATES: &[DeviceTemplate] = &[
    DeviceTemplate {
        prefix: "ttyB",
        patterns: [Some("/dev/ttyB"), None],
    },
    DeviceTemplate {
        prefix: "ttySC",
        patterns: [Some("/dev/ttySC"), Some("/dev/ttsc/")],
    },
    DeviceTemplate {
        prefix: "ttyS",
        patterns: [Some("/dev/ttyS"), Some("/dev/tts/")],
    },
    DeviceTemplate {
        prefix: "tty",
        patterns: [Some("/dev/tty"), Some("/dev/vc/")],
    },
    DeviceTemplate {
        prefix: "hvc",
        patterns: [Some("/dev/hvc"), Some("/dev/hvc/")],
    },
];

/// Devices to try when the command line names no usable console. Tried left
/// to right, as opposed to the command-line scan.
const DEFAULT_CONSOLES: &[&str] = &["tty0", "hvc0", "ttyS0", "ttySC0", "ttyB0"];

/// Resolve the real console device paths, kernel-precedence order.
///
/// Fatal if the command line cannot be read or nothing resolves.
pub fn discover() -> Result<Vec<String>, StartupError> {
    let cmdline = read_kernel_cmdline()?;
    let found = discover_in(&cmdline, &mut |path| probe_device(path));
    if found.is_empty() {
        return Err(StartupError::NoConsole);
    }
    Ok(found)
}

/// Pure discovery core, parameterized over the device probe so tests can run
/// against synthetic device sets.
pub fn discover_in(cmdline: &str, probe: &mut impl FnMut(&str) -> bool) -> Vec<String> {
    let mut found: Vec<String> = Vec::new();

    // The kernel gives the last console= token precedence, so scan in
    // reverse to discover it first.
    for token in cmdline.split_whitespace().rev() {
        let Some(value) = token.strip_prefix("console=") else {
            continue;
        };
        let Some(path) = resolve(value, probe) else {
            continue;
        };
        let path = remap_virtual_console(path);
        if found.contains(&path) {
            continue;
        }
        found.push(path);
        if found.len() >= MAX_CONSOLES {
            break;
        }
    }
    if !found.is_empty() {
        return found;
    }

    for name in DEFAULT_CONSOLES {
        if let Some(path) = resolve(name, probe) {
            return vec![remap_virtual_console(path)];
        }
    }
    Vec::new()
}

/// Map a `console=` value to a device path we can open, if any.
///
/// A template matches when the value starts with its prefix followed by a
/// digit. The suffix is truncated at a comma (serial options such as
/// `115200n8`) and substituted into each pattern in turn; the first path
/// that probes successfully wins.
fn resolve(value: &str, probe: &mut impl FnMut(&str) -> bool) -> Option<String> {
    for template in TEMPLATES {
        let Some(suffix) = value.strip_prefix(template.prefix) else {
            continue;
        };
        if !suffix.chars().next().is_some_and(|c| c.is_ascii_digit()) {
            continue;
        }
        let suffix = suffix.split(',').next().unwrap_or(suffix);
        for pattern in template.patterns.iter().flatten() {
            let path = format!("{pattern}{suffix}");
            if probe(&path) {
                return Some(path);
            }
        }
    }
    None
}

/// Virtual-console index 0 is not writable as a plain tty here; use the
/// first real VC instead.
fn remap_virtual_console(path: String) -> String {
    match path.as_str() {
        "/dev/tty0" => "/dev/tty1".to_string(),
        "/dev/vc/0" => "/dev/vc/1".to_string(),
        _ => path,
    }
}

fn probe_device(path: &str) -> bool {
    OpenOptions::new()
        .read(true)
        .custom_flags(libc::O_NONBLOCK)
        .open(path)
        .is_ok()
}

/// Read `/proc/cmdline`, mounting `/proc` first if this runs before anything
/// else has (same st_dev as `/` means it is not a mountpoint yet).
fn read_kernel_cmdline() -> Result<String, StartupError> {
    let mounted_here = ensure_proc_mounted()?;
    let result = read_cmdline_file();
    if mounted_here {
        let _ = umount("/proc");
    }
    result
}

fn ensure_proc_mounted() -> Result<bool, StartupError> {
    let root = stat("/").map_err(|e| StartupError::Cmdline(e.into()))?;
    let proc_dir = stat("/proc").map_err(|e| StartupError::Cmdline(e.into()))?;
    if root.st_dev != proc_dir.st_dev {
        return Ok(false);
    }
    mount(
        Some("proc"),
        "/proc",
        Some("proc"),
        MsFlags::empty(),
        None::<&str>,
    )
    .map_err(|e| StartupError::ProcMount(e.into()))?;
    Ok(true)
}

fn read_cmdline_file() -> Result<String, StartupError> {
    let mut file = File::open("/proc/cmdline").map_err(StartupError::Cmdline)?;
    let mut buf = vec![0u8; KERNEL_COMMAND_LENGTH];
    let n = file.read(&mut buf).map_err(StartupError::Cmdline)?;
    Ok(String::from_utf8_lossy(&buf[..n]).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn discover_with(cmdline: &str, existing: &[&str]) -> Vec<String> {
        let devices: HashSet<&str> = existing.iter().copied().collect();
        discover_in(cmdline, &mut |path| devices.contains(path))
    }

    #[test]
    fn last_console_token_wins_first_position() {
        let found = discover_with(
            "root=/dev/sda1 console=ttyS0 console=ttyS1 quiet",
            &["/dev/ttyS0", "/dev/ttyS1"],
        );
        assert_eq!(found, vec!["/dev/ttyS1", "/dev/ttyS0"]);
    }

    #[test]
    fn serial_options_are_truncated_at_the_comma() {
        let found = discover_with("console=ttyS1,115200n8", &["/dev/ttyS1"]);
        assert_eq!(found, vec!["/dev/ttyS1"]);
    }

    #[test]
    fn unresolvable_tokens_fall_through_to_the_next() {
        // Only the tty0 probe succeeds; ttyS1 yields nothing.
        let found = discover_with(
            "console=tty0 console=ttyS1,115200",
            &["/dev/tty0"],
        );
        assert_eq!(found, vec!["/dev/tty1"]);
    }

    #[test]
    fn duplicate_tokens_yield_one_entry() {
        let found = discover_with(
            "console=ttyS0 console=ttyS0",
            &["/dev/ttyS0"],
        );
        assert_eq!(found, vec!["/dev/ttyS0"]);
    }

    #[test]
    fn remap_makes_tty0_and_tty1_collapse() {
        let found = discover_with(
            "console=tty0 console=tty1",
            &["/dev/tty0", "/dev/tty1"],
        );
        assert_eq!(found, vec!["/dev/tty1"]);
    }

    #[test]
    fn secondary_pattern_is_tried_when_primary_is_absent() {
        let found = discover_with("console=ttyS2", &["/dev/tts/2"]);
        assert_eq!(found, vec!["/dev/tts/2"]);
    }

    #[test]
    fn prefix_without_digit_does_not_match() {
        assert!(discover_with("console=ttyUSB0", &["/dev/ttyUSB0"]).is_empty());
        assert!(discover_with("console=ttyS", &["/dev/ttyS"]).is_empty());
    }

    #[test]
    fn console_must_be_a_whole_token_prefix() {
        assert!(discover_with("xconsole=tty1", &["/dev/tty1"]).is_empty());
    }

    #[test]
    fn falls_back_to_default_devices() {
        let found = discover_with("root=/dev/sda1 quiet", &["/dev/hvc0"]);
        assert_eq!(found, vec!["/dev/hvc0"]);
    }

    #[test]
    fn default_fallback_prefers_the_virtual_console() {
        let found = discover_with("", &["/dev/hvc0", "/dev/tty0"]);
        assert_eq!(found, vec!["/dev/tty1"]);
    }

    #[test]
    fn nothing_resolvable_returns_empty() {
        assert!(discover_with("console=ttyS0", &[]).is_empty());
    }

    #[test]
    fn entry_count_is_capped() {
        let values: Vec<String> =
            (0..32).map(|i| format!("console=ttyS{i}")).collect();
        let cmdline = values.join(" ");
        let devices: Vec<String> =
            (0..32).map(|i| format!("/dev/ttyS{i}")).collect();
        let set: HashSet<&str> = devices.iter().map(String::as_str).collect();
        let found = discover_in(&cmdline, &mut |path| set.contains(path));
        assert_eq!(found.len(), MAX_CONSOLES);
    }

    #[test]
    fn longer_prefixes_shadow_shorter_ones() {
        // ttySC5 must resolve through the ttySC row, not tty + "SC5".
        let found = discover_with("console=ttySC5", &["/dev/ttySC5", "/dev/ttySC"]);
        assert_eq!(found, vec!["/dev/ttySC5"]);
    }
}

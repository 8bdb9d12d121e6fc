//! Autostart and uninstall registration
//!
//! Everything lives under HKCU so no elevation is needed:
//! - `...\CurrentVersion\Run\PCVolumeMqtt` starts the bridge at logon
//! - `...\CurrentVersion\Uninstall\PCVolumeMqtt` lists it in "Apps & features"
//!
//! `--uninstall` removes both and deletes the executable once the process
//! has exited.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

pub const RUN_KEY: &str = r"SOFTWARE\Microsoft\Windows\CurrentVersion\Run";
pub const UNINSTALL_KEY: &str = r"SOFTWARE\Microsoft\Windows\CurrentVersion\Uninstall\PCVolumeMqtt";

/// Registry value / key name
pub const APP_ID: &str = "PCVolumeMqtt";
pub const DISPLAY_NAME: &str = "PC Volume MQTT";
pub const PUBLISHER: &str = "pc-ha-control";

/// Command line stored as the uninstall entry
pub fn uninstall_string(exe: &Path) -> String {
    format!("\"{}\" --uninstall", exe.display())
}

/// Arguments for `cmd.exe` that delete `exe` after a short delay
pub fn self_delete_args(exe: &Path) -> String {
    format!("/C timeout 2 && del \"{}\"", exe.display())
}

fn current_exe() -> Result<PathBuf> {
    std::env::current_exe().context("Failed to resolve the executable path")
}

#[cfg(windows)]
pub fn register() -> Result<()> {
    let exe = current_exe()?;
    let exe_text = exe.display().to_string();

    registry::Key::create(RUN_KEY)?.set_string(APP_ID, &exe_text)?;

    let uninstall = registry::Key::create(UNINSTALL_KEY)?;
    uninstall.set_string("DisplayName", DISPLAY_NAME)?;
    uninstall.set_string("DisplayIcon", &exe_text)?;
    uninstall.set_string("Publisher", PUBLISHER)?;
    uninstall.set_string("UninstallString", &uninstall_string(&exe))?;

    tracing::debug!("Autostart registered for {}", exe_text);
    Ok(())
}

#[cfg(windows)]
pub fn uninstall() -> Result<()> {
    use std::os::windows::process::CommandExt;

    const CREATE_NO_WINDOW: u32 = 0x0800_0000;

    registry::Key::create(RUN_KEY)?.delete_value(APP_ID)?;
    registry::delete_tree(UNINSTALL_KEY)?;
    tracing::info!("Autostart and uninstall entries removed");

    let exe = current_exe()?;
    std::process::Command::new("cmd.exe")
        .raw_arg(self_delete_args(&exe))
        .creation_flags(CREATE_NO_WINDOW)
        .spawn()
        .context("Failed to schedule self deletion")?;
    tracing::info!("Scheduled deletion of {}", exe.display());
    Ok(())
}

#[cfg(not(windows))]
pub fn register() -> Result<()> {
    tracing::warn!("Autostart registration is only supported on Windows");
    Ok(())
}

#[cfg(not(windows))]
pub fn uninstall() -> Result<()> {
    tracing::warn!("Uninstall is only supported on Windows");
    Ok(())
}

#[cfg(windows)]
mod registry {
    use anyhow::{Context, Result};
    use windows::core::PCWSTR;
    use windows::Win32::Foundation::{ERROR_FILE_NOT_FOUND, WIN32_ERROR};
    use windows::Win32::System::Registry::{
        RegCloseKey, RegCreateKeyExW, RegDeleteTreeW, RegDeleteValueW, RegSetValueExW, HKEY,
        HKEY_CURRENT_USER, KEY_READ, KEY_WRITE, REG_OPTION_NON_VOLATILE, REG_SZ,
    };

    fn wide(text: &str) -> Vec<u16> {
        text.encode_utf16().chain(std::iter::once(0)).collect()
    }

    fn check(status: WIN32_ERROR, what: &str) -> Result<()> {
        status.ok().with_context(|| what.to_string())
    }

    /// Open HKCU subkey, closed on drop
    pub struct Key(HKEY);

    impl Key {
        pub fn create(path: &str) -> Result<Self> {
            let path_w = wide(path);
            let mut hkey = HKEY::default();
            let status = unsafe {
                RegCreateKeyExW(
                    HKEY_CURRENT_USER,
                    PCWSTR(path_w.as_ptr()),
                    0,
                    PCWSTR::null(),
                    REG_OPTION_NON_VOLATILE,
                    KEY_READ | KEY_WRITE,
                    None,
                    &mut hkey,
                    None,
                )
            };
            check(status, &format!("Failed to open HKCU\\{}", path))?;
            Ok(Self(hkey))
        }

        pub fn set_string(&self, name: &str, value: &str) -> Result<()> {
            let name_w = wide(name);
            let data: Vec<u8> = wide(value).iter().flat_map(|c| c.to_le_bytes()).collect();
            let status =
                unsafe { RegSetValueExW(self.0, PCWSTR(name_w.as_ptr()), 0, REG_SZ, Some(&data)) };
            check(status, &format!("Failed to write registry value {}", name))
        }

        /// Delete a value; a missing value is not an error
        pub fn delete_value(&self, name: &str) -> Result<()> {
            let name_w = wide(name);
            let status = unsafe { RegDeleteValueW(self.0, PCWSTR(name_w.as_ptr())) };
            if status == ERROR_FILE_NOT_FOUND {
                return Ok(());
            }
            check(status, &format!("Failed to delete registry value {}", name))
        }
    }

    impl Drop for Key {
        fn drop(&mut self) {
            let _ = unsafe { RegCloseKey(self.0) };
        }
    }

    /// Delete an HKCU subtree; a missing key is not an error
    pub fn delete_tree(path: &str) -> Result<()> {
        let path_w = wide(path);
        let status = unsafe { RegDeleteTreeW(HKEY_CURRENT_USER, PCWSTR(path_w.as_ptr())) };
        if status == ERROR_FILE_NOT_FOUND {
            return Ok(());
        }
        check(status, &format!("Failed to delete HKCU\\{}", path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uninstall_string_quotes_path() {
        let exe = Path::new(r"C:\Tools\pc-volume-mqtt.exe");
        assert_eq!(
            uninstall_string(exe),
            r#""C:\Tools\pc-volume-mqtt.exe" --uninstall"#
        );
    }

    #[test]
    fn test_self_delete_waits_then_deletes() {
        let exe = Path::new(r"C:\Program Files\PC Volume MQTT\pc-volume-mqtt.exe");
        assert_eq!(
            self_delete_args(exe),
            r#"/C timeout 2 && del "C:\Program Files\PC Volume MQTT\pc-volume-mqtt.exe""#
        );
    }

    #[test]
    fn test_registry_locations() {
        assert!(RUN_KEY.ends_with(r"CurrentVersion\Run"));
        assert!(UNINSTALL_KEY.ends_with(APP_ID));
    }
}

use std::env;
use std::path::PathBuf;

const APP_DIR: &str = "conductor";

/// Get XDG config directory for conductor
/// Falls back to ~/.config/conductor if XDG_CONFIG_HOME is not set
pub fn get_config_dir() -> PathBuf {
    match non_empty_var("XDG_CONFIG_HOME") {
        Some(xdg_config) => PathBuf::from(xdg_config).join(APP_DIR),
        None => home_dir().join(".config").join(APP_DIR),
    }
}

/// Get XDG data directory for conductor
/// Falls back to ~/.local/share/conductor if XDG_DATA_HOME is not set
///
/// This is the "state dir" holding `lifecycle.log` and `controller.log`.
pub fn get_data_dir() -> PathBuf {
    match non_empty_var("XDG_DATA_HOME") {
        Some(xdg_data) => PathBuf::from(xdg_data).join(APP_DIR),
        None => home_dir().join(".local").join("share").join(APP_DIR),
    }
}

/// Home directory, `/tmp` when it cannot be determined.
pub fn home_dir() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from("/tmp"))
}

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_config_dir_with_xdg() {
        env::set_var("XDG_CONFIG_HOME", "/custom/config");
        assert_eq!(get_config_dir(), PathBuf::from("/custom/config/conductor"));
        env::remove_var("XDG_CONFIG_HOME");
    }

    #[test]
    #[serial]
    fn test_data_dir_with_xdg() {
        env::set_var("XDG_DATA_HOME", "/custom/data");
        assert_eq!(get_data_dir(), PathBuf::from("/custom/data/conductor"));
        env::remove_var("XDG_DATA_HOME");
    }

    #[test]
    #[serial]
    fn test_empty_xdg_falls_back_to_home() {
        env::set_var("XDG_DATA_HOME", "");
        assert_eq!(
            get_data_dir(),
            home_dir().join(".local").join("share").join("conductor")
        );
        env::remove_var("XDG_DATA_HOME");
    }
}

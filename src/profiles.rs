//! Saved connection profiles
//!
//! Each profile is a TOML file `<name>.toml` in the profile directory
//! (`~/.sslvpn` by default). A plain-text `default` file names the profile
//! used when `connect` gets neither a server nor a profile.

use crate::config::Config;
use crate::error::{Result, VpnError};
use crate::protocol::constants::DEFAULT_PORT;
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

const PROFILE_EXTENSION: &str = "toml";
const DEFAULT_MARKER: &str = "default";

/// A named set of connection parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub server: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default)]
    pub ignore_cert_errors: bool,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

impl Profile {
    /// A profile needs a server, a port and a username
    pub fn validate(&self) -> Result<()> {
        if self.server.trim().is_empty() {
            return Err(VpnError::Config("Profile server cannot be empty".into()));
        }
        if self.port == 0 {
            return Err(VpnError::Config("Profile port cannot be zero".into()));
        }
        if self.username.trim().is_empty() {
            return Err(VpnError::Config("Profile username cannot be empty".into()));
        }
        Ok(())
    }

    /// Client configuration for this profile with all other settings defaulted
    pub fn to_config(&self) -> Config {
        let mut config = Config::new(self.server.clone(), self.port, self.username.clone());
        config.auth.password = self.password.clone();
        config.server.ignore_cert_errors = self.ignore_cert_errors;
        config
    }
}

/// Directory of saved profiles
#[derive(Debug, Clone)]
pub struct ProfileStore {
    dir: PathBuf,
}

impl ProfileStore {
    /// Open (creating if needed) the store at `dir`
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| {
            VpnError::Config(format!(
                "Cannot create profile directory {}: {e}",
                dir.display()
            ))
        })?;
        Ok(Self { dir })
    }

    /// Open the store in `~/.sslvpn`
    pub fn open_default() -> Result<Self> {
        let home = dirs::home_dir()
            .ok_or_else(|| VpnError::Config("Cannot determine home directory".into()))?;
        Self::new(home.join(".sslvpn"))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write `profile` under `name`, replacing any existing one
    pub fn save(&self, name: &str, profile: &Profile) -> Result<()> {
        profile.validate()?;
        let text = toml::to_string_pretty(profile)
            .map_err(|e| VpnError::Config(format!("Failed to serialize profile: {e}")))?;
        write_private(&self.path_for(name)?, &text)?;
        log::debug!("Saved profile '{name}'");
        Ok(())
    }

    /// Load a profile; `None` when it does not exist
    pub fn load(&self, name: &str) -> Result<Option<Profile>> {
        match fs::read_to_string(self.path_for(name)?) {
            Ok(text) => Ok(Some(toml::from_str(&text)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Names of all saved profiles, sorted
    pub fn list(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(PROFILE_EXTENSION) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) {
                names.push(stem.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    /// Remove a profile. Returns false when it did not exist.
    pub fn delete(&self, name: &str) -> Result<bool> {
        match fs::remove_file(self.path_for(name)?) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Name of the default profile, if one is set
    pub fn default_profile(&self) -> Result<Option<String>> {
        match fs::read_to_string(self.dir.join(DEFAULT_MARKER)) {
            Ok(text) => {
                let name = text.trim();
                Ok((!name.is_empty()).then(|| name.to_string()))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Mark `name` as the default profile. The profile must exist.
    pub fn set_default(&self, name: &str) -> Result<()> {
        if self.load(name)?.is_none() {
            return Err(VpnError::Config(format!("Profile '{name}' does not exist")));
        }
        fs::write(self.dir.join(DEFAULT_MARKER), name)?;
        Ok(())
    }

    fn path_for(&self, name: &str) -> Result<PathBuf> {
        let valid = !name.is_empty()
            && name != DEFAULT_MARKER
            && !name.starts_with('.')
            && !name.contains(['/', '\\']);
        if !valid {
            return Err(VpnError::Config(format!("Invalid profile name: {name:?}")));
        }
        Ok(self.dir.join(format!("{name}.{PROFILE_EXTENSION}")))
    }
}

/// Write `contents` readable by the owner only; profiles may hold passwords
fn write_private(path: &Path, contents: &str) -> Result<()> {
    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = options.open(path)?;
    // Files from older saves keep their mode on truncate
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(fs::Permissions::from_mode(0o600))?;
    }
    file.write_all(contents.as_bytes())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(server: &str, username: &str) -> Profile {
        Profile {
            server: server.to_string(),
            port: 443,
            username: username.to_string(),
            password: None,
            ignore_cert_errors: false,
        }
    }

    #[test]
    fn test_save_load_list_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = ProfileStore::new(dir.path().join("profiles")).unwrap();

        let mut office = profile("vpn.office.example", "alice");
        office.password = Some("s3cret".into());
        store.save("office", &office).unwrap();
        store.save("lab", &profile("10.0.0.1", "bob")).unwrap();

        assert_eq!(store.load("office").unwrap(), Some(office));
        assert_eq!(store.load("missing").unwrap(), None);
        assert_eq!(store.list().unwrap(), vec!["lab", "office"]);

        assert!(store.delete("lab").unwrap());
        assert!(!store.delete("lab").unwrap());
        assert_eq!(store.list().unwrap(), vec!["office"]);
    }

    #[cfg(unix)]
    #[test]
    fn test_profile_files_are_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let store = ProfileStore::new(dir.path()).unwrap();
        let mut office = profile("vpn.office.example", "alice");
        office.password = Some("s3cret".into());

        store.save("office", &office).unwrap();
        let mode = fs::metadata(dir.path().join("office.toml"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);

        // An existing world-readable file is tightened on save
        let lab = dir.path().join("lab.toml");
        fs::write(&lab, "").unwrap();
        fs::set_permissions(&lab, fs::Permissions::from_mode(0o644)).unwrap();
        store.save("lab", &office).unwrap();
        let mode = fs::metadata(&lab).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_default_profile() {
        let dir = tempfile::tempdir().unwrap();
        let store = ProfileStore::new(dir.path()).unwrap();
        assert_eq!(store.default_profile().unwrap(), None);

        assert!(store.set_default("office").is_err());
        store.save("office", &profile("gw", "alice")).unwrap();
        store.set_default("office").unwrap();
        assert_eq!(store.default_profile().unwrap().as_deref(), Some("office"));

        // The marker file is not a profile
        assert_eq!(store.list().unwrap(), vec!["office"]);
    }

    #[test]
    fn test_validation() {
        assert!(profile("gw", "alice").validate().is_ok());
        assert!(profile("", "alice").validate().is_err());
        assert!(profile("gw", " ").validate().is_err());

        let dir = tempfile::tempdir().unwrap();
        let store = ProfileStore::new(dir.path()).unwrap();
        assert!(store.save("bad", &profile("gw", "")).is_err());
        assert!(store.save("../escape", &profile("gw", "alice")).is_err());
    }

    #[test]
    fn test_profile_to_config() {
        let mut saved = profile("gw.example.net", "carol");
        saved.port = 8443;
        saved.ignore_cert_errors = true;

        let config = saved.to_config();
        assert_eq!(config.server.hostname, "gw.example.net");
        assert_eq!(config.server.port, 8443);
        assert!(config.server.ignore_cert_errors);
        assert!(config.validate().is_ok());
    }
}

use crate::error::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Launch profile: the most specific configuration layer. Every connection
/// field is optional and falls back to the tool options when unset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Profile {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub private_key_file: Option<PathBuf>,
    #[serde(default)]
    pub force_ipv4: Option<bool>,
    #[serde(default)]
    pub app_folder: Option<String>,
    #[serde(default)]
    pub additional_entries: Option<String>,
    #[serde(default)]
    pub command_line_args: String,
    #[serde(default)]
    pub created_at: i64,
    #[serde(default)]
    pub updated_at: i64,
}

impl Profile {
    pub fn new(name: String) -> Self {
        let now = chrono::Utc::now().timestamp();
        Self {
            id: Uuid::new_v4().to_string(),
            name,
            host: None,
            port: None,
            username: None,
            private_key_file: None,
            force_ipv4: None,
            app_folder: None,
            additional_entries: None,
            command_line_args: String::new(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// Profile file format
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfilesFile {
    #[serde(default)]
    pub profiles: Vec<Profile>,
}

/// Profile manager
pub struct ProfileManager {
    profiles: HashMap<String, Profile>,
    config_path: PathBuf,
}

impl ProfileManager {
    pub fn load(config_dir: &Path) -> AppResult<Self> {
        let config_path = config_dir.join("profiles.toml");
        let profiles = if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            let file: ProfilesFile = toml::from_str(&content)?;
            file.profiles
                .into_iter()
                .map(|p| (p.id.clone(), p))
                .collect()
        } else {
            HashMap::new()
        };

        Ok(Self {
            profiles,
            config_path,
        })
    }

    pub fn save(&self) -> AppResult<()> {
        let mut profiles: Vec<_> = self.profiles.values().cloned().collect();
        profiles.sort_by(|a, b| a.name.cmp(&b.name));
        let file = ProfilesFile { profiles };
        let content = toml::to_string_pretty(&file)?;
        if let Some(parent) = self.config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.config_path, content)?;
        Ok(())
    }

    pub fn list(&self) -> Vec<Profile> {
        let mut profiles: Vec<_> = self.profiles.values().cloned().collect();
        profiles.sort_by(|a, b| a.name.cmp(&b.name));
        profiles
    }

    pub fn get(&self, id: &str) -> Option<Profile> {
        self.profiles.get(id).cloned()
    }

    /// Look a profile up by id first, then by name
    pub fn find(&self, id_or_name: &str) -> AppResult<Profile> {
        self.get(id_or_name)
            .or_else(|| {
                self.profiles
                    .values()
                    .find(|p| p.name == id_or_name)
                    .cloned()
            })
            .ok_or_else(|| AppError::Config(format!("Profile not found: {}", id_or_name)))
    }

    pub fn add(&mut self, profile: Profile) -> AppResult<()> {
        self.profiles.insert(profile.id.clone(), profile);
        self.save()
    }

    pub fn update(&mut self, profile: Profile) -> AppResult<()> {
        if !self.profiles.contains_key(&profile.id) {
            return Err(AppError::Config(format!("Profile not found: {}", profile.id)));
        }
        let mut profile = profile;
        profile.updated_at = chrono::Utc::now().timestamp();
        self.profiles.insert(profile.id.clone(), profile);
        self.save()
    }

    pub fn delete(&mut self, id: &str) -> AppResult<()> {
        self.profiles
            .remove(id)
            .ok_or_else(|| AppError::Config(format!("Profile not found: {}", id)))?;
        self.save()
    }
}

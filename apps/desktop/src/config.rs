use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
};

pub const DEFAULT_CONFIG_FILE: &str = "peerchat.toml";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub data_dir: PathBuf,
    pub stun_server: String,
    pub transcript_limit: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            stun_server: "stun:stun.l.google.com:19302".to_string(),
            transcript_limit: 500,
        }
    }
}

pub fn load_settings(path: Option<&Path>) -> Settings {
    let mut settings = Settings::default();

    let path = path
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
    if let Ok(raw) = fs::read_to_string(&path) {
        if let Ok(file_cfg) = toml::from_str::<HashMap<String, String>>(&raw) {
            if let Some(v) = file_cfg.get("data_dir") {
                settings.data_dir = PathBuf::from(v);
            }
            if let Some(v) = file_cfg.get("stun_server") {
                settings.stun_server = v.clone();
            }
            if let Some(v) = file_cfg.get("transcript_limit") {
                if let Ok(parsed) = v.parse::<usize>() {
                    settings.transcript_limit = parsed;
                }
            }
        }
    }

    if let Ok(v) = std::env::var("APP__DATA_DIR") {
        settings.data_dir = PathBuf::from(v);
    }
    if let Ok(v) = std::env::var("APP__STUN_SERVER") {
        settings.stun_server = v;
    }
    if let Ok(v) = std::env::var("APP__TRANSCRIPT_LIMIT") {
        if let Ok(parsed) = v.parse::<usize>() {
            settings.transcript_limit = parsed;
        }
    }

    settings
}

#[cfg(test)]
mod tests {
    use std::time::{SystemTime, UNIX_EPOCH};

    use super::*;

    #[test]
    fn defaults_apply_without_a_config_file() {
        let settings = load_settings(Some(Path::new("/nonexistent/peerchat.toml")));
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn toml_file_overrides_defaults() {
        let suffix = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos();
        let dir = std::env::temp_dir().join(format!("peerchat_config_test_{suffix}"));
        fs::create_dir_all(&dir).expect("temp dir");
        let path = dir.join("peerchat.toml");
        fs::write(
            &path,
            "data_dir = \"/tmp/chat\"\nstun_server = \"stun:example.org:3478\"\ntranscript_limit = \"64\"\n",
        )
        .expect("write config");

        let settings = load_settings(Some(&path));
        assert_eq!(settings.data_dir, PathBuf::from("/tmp/chat"));
        assert_eq!(settings.stun_server, "stun:example.org:3478");
        assert_eq!(settings.transcript_limit, 64);

        fs::remove_dir_all(dir).expect("cleanup");
    }

    #[test]
    fn unparseable_transcript_limit_keeps_the_default() {
        let suffix = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos();
        let dir = std::env::temp_dir().join(format!("peerchat_config_bad_limit_{suffix}"));
        fs::create_dir_all(&dir).expect("temp dir");
        let path = dir.join("peerchat.toml");
        fs::write(&path, "transcript_limit = \"lots\"\n").expect("write config");

        let settings = load_settings(Some(&path));
        assert_eq!(
            settings.transcript_limit,
            Settings::default().transcript_limit
        );

        fs::remove_dir_all(dir).expect("cleanup");
    }
}

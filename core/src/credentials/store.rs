//! Environment-style credential file (`KEY=VALUE` per line).
//!
//! The file is created from a commented template on first use. `set`
//! changes one key and `save` writes the file back with comments, blank
//! lines and unknown keys left exactly as they were.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::info;

pub const API_URL: &str = "RUNAI_API_URL";
pub const CLIENT_ID: &str = "RUNAI_CLIENT_ID";
pub const CLIENT_SECRET: &str = "RUNAI_CLIENT_SECRET";
pub const CLUSTER_ID: &str = "RUNAI_CLUSTER_ID";

/// Written when the credential file does not exist yet.
pub const TEMPLATE: &str = "\
# Run:ai API credentials
# Create an application in the Run:ai UI and paste its client id and secret.
RUNAI_API_URL=
RUNAI_CLIENT_ID=
RUNAI_CLIENT_SECRET=
# Filled in automatically by `gpuops discover-cluster`.
RUNAI_CLUSTER_ID=
";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("cannot read '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot write '{path}': {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("missing required keys: {}", .0.join(", "))]
    Missing(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Line {
    Entry {
        key: String,
        value: String,
        raw: String,
    },
    Other(String),
}

/// Parsed credential file, line by line.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EnvFile {
    lines: Vec<Line>,
}

/// The values the REST client needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub api_url: String,
    pub client_id: String,
    pub client_secret: String,
    pub cluster_id: Option<String>,
}

impl EnvFile {
    pub fn parse(content: &str) -> Self {
        let lines = content
            .lines()
            .map(|raw| match parse_entry(raw) {
                Some((key, value)) => Line::Entry {
                    key,
                    value,
                    raw: raw.to_string(),
                },
                None => Line::Other(raw.to_string()),
            })
            .collect();
        EnvFile { lines }
    }

    pub fn load(path: &Path) -> Result<Self, StoreError> {
        let content = std::fs::read_to_string(path).map_err(|source| StoreError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self::parse(&content))
    }

    /// Load the file, writing the template first if it does not exist.
    /// The flag is true when the file was just created.
    pub fn load_or_create(path: &Path) -> Result<(Self, bool), StoreError> {
        if path.exists() {
            return Ok((Self::load(path)?, false));
        }
        std::fs::write(path, TEMPLATE).map_err(|source| StoreError::Write {
            path: path.to_path_buf(),
            source,
        })?;
        info!(path = %path.display(), "created credential template");
        Ok((Self::parse(TEMPLATE), true))
    }

    /// Value of `key`, if present and non-empty. The last occurrence wins.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.lines
            .iter()
            .rev()
            .find_map(|l| match l {
                Line::Entry { key: k, value, .. } if k == key => Some(value.as_str()),
                _ => None,
            })
            .filter(|v| !v.is_empty())
    }

    /// Set `key`, rewriting its line in place or appending a new one.
    pub fn set(&mut self, key: &str, value: &str) {
        let raw = format!("{}={}", key, value);
        let existing = self
            .lines
            .iter_mut()
            .rev()
            .find(|l| matches!(l, Line::Entry { key: k, .. } if k == key));
        match existing {
            Some(line) => {
                *line = Line::Entry {
                    key: key.to_string(),
                    value: value.to_string(),
                    raw,
                }
            }
            None => self.lines.push(Line::Entry {
                key: key.to_string(),
                value: value.to_string(),
                raw,
            }),
        }
    }

    pub fn keys(&self) -> Vec<&str> {
        self.lines
            .iter()
            .filter_map(|l| match l {
                Line::Entry { key, .. } => Some(key.as_str()),
                Line::Other(_) => None,
            })
            .collect()
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        for line in &self.lines {
            match line {
                Line::Entry { raw, .. } | Line::Other(raw) => out.push_str(raw),
            }
            out.push('\n');
        }
        out
    }

    pub fn save(&self, path: &Path) -> Result<(), StoreError> {
        std::fs::write(path, self.render()).map_err(|source| StoreError::Write {
            path: path.to_path_buf(),
            source,
        })
    }

    /// The API credentials, failing with every missing key named.
    pub fn credentials(&self) -> Result<Credentials, StoreError> {
        let missing: Vec<String> = [API_URL, CLIENT_ID, CLIENT_SECRET]
            .iter()
            .filter(|k| self.get(k).is_none())
            .map(|k| k.to_string())
            .collect();
        if !missing.is_empty() {
            return Err(StoreError::Missing(missing));
        }
        Ok(Credentials {
            api_url: self.get(API_URL).unwrap_or_default().trim_end_matches('/').to_string(),
            client_id: self.get(CLIENT_ID).unwrap_or_default().to_string(),
            client_secret: self.get(CLIENT_SECRET).unwrap_or_default().to_string(),
            cluster_id: self.get(CLUSTER_ID).map(str::to_string),
        })
    }
}

fn parse_entry(raw: &str) -> Option<(String, String)> {
    let line = raw.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    let line = line.strip_prefix("export ").unwrap_or(line);
    let (key, value) = line.split_once('=')?;
    let key = key.trim();
    if key.is_empty() || key.contains(char::is_whitespace) {
        return None;
    }
    Some((key.to_string(), strip_quotes(value.trim()).to_string()))
}

fn strip_quotes(s: &str) -> &str {
    if s.len() >= 2
        && ((s.starts_with('"') && s.ends_with('"')) || (s.starts_with('\'') && s.ends_with('\'')))
    {
        &s[1..s.len() - 1]
    } else {
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
# credentials
RUNAI_API_URL=https://runai.example.com/
export RUNAI_CLIENT_ID=\"gpuops\"
RUNAI_CLIENT_SECRET='s3cret'

OTHER_TOOL_TOKEN=keep-me
RUNAI_CLUSTER_ID=
";

    #[test]
    fn parse_and_get() {
        let env = EnvFile::parse(SAMPLE);
        assert_eq!(env.get(API_URL), Some("https://runai.example.com/"));
        assert_eq!(env.get(CLIENT_ID), Some("gpuops"));
        assert_eq!(env.get(CLIENT_SECRET), Some("s3cret"));
        assert_eq!(env.get(CLUSTER_ID), None);
        assert_eq!(env.get("OTHER_TOOL_TOKEN"), Some("keep-me"));
        assert_eq!(env.keys().len(), 5);
    }

    #[test]
    fn render_is_unchanged_without_edits() {
        assert_eq!(EnvFile::parse(SAMPLE).render(), SAMPLE);
    }

    #[test]
    fn set_rewrites_in_place_and_preserves_the_rest() {
        let mut env = EnvFile::parse(SAMPLE);
        env.set(CLUSTER_ID, "c0ffee");
        let out = env.render();
        assert!(out.ends_with("RUNAI_CLUSTER_ID=c0ffee\n"));
        assert!(out.starts_with("# credentials\n"));
        assert!(out.contains("OTHER_TOOL_TOKEN=keep-me\n"));
        assert!(out.contains("export RUNAI_CLIENT_ID=\"gpuops\"\n"));
        assert_eq!(out.lines().count(), SAMPLE.lines().count());
    }

    #[test]
    fn set_appends_new_key() {
        let mut env = EnvFile::parse("A=1\n");
        env.set("B", "2");
        assert_eq!(env.render(), "A=1\nB=2\n");
    }

    #[test]
    fn credentials_trims_trailing_slash() {
        let creds = EnvFile::parse(SAMPLE).credentials().unwrap();
        assert_eq!(creds.api_url, "https://runai.example.com");
        assert_eq!(creds.cluster_id, None);
    }

    #[test]
    fn credentials_reports_all_missing_keys() {
        let err = EnvFile::parse(TEMPLATE).credentials().unwrap_err();
        assert_eq!(
            err.to_string(),
            "missing required keys: RUNAI_API_URL, RUNAI_CLIENT_ID, RUNAI_CLIENT_SECRET"
        );
    }

    #[test]
    fn load_or_create_writes_template_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".env");
        let (env, created) = EnvFile::load_or_create(&path).unwrap();
        assert!(created);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), TEMPLATE);
        assert_eq!(env.get(API_URL), None);

        let (_, created_again) = EnvFile::load_or_create(&path).unwrap();
        assert!(!created_again);
    }

    #[test]
    fn save_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".env");
        let mut env = EnvFile::parse(SAMPLE);
        env.set(CLUSTER_ID, "abc");
        env.save(&path).unwrap();
        let loaded = EnvFile::load(&path).unwrap();
        assert_eq!(loaded.get(CLUSTER_ID), Some("abc"));
        assert_eq!(loaded, env);
    }

    #[test]
    fn malformed_lines_are_kept_verbatim() {
        let env = EnvFile::parse("not a pair\nKEY WITH SPACE=1\n=nokey\n");
        assert!(env.keys().is_empty());
        assert_eq!(env.render(), "not a pair\nKEY WITH SPACE=1\n=nokey\n");
    }
}

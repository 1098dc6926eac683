use std::path::{Path, PathBuf};

use anyhow::Context as _;

/// Loads endpoint settings from a dotenv file into the process environment.
///
/// An explicit `path` must exist. Without one, `.env` is looked up from the
/// working directory upwards and a missing file is not an error. Variables
/// already set in the environment are never overridden.
pub fn load_env(path: Option<&Path>) -> anyhow::Result<Option<PathBuf>> {
    match path {
        Some(path) => {
            dotenvy::from_path(path).with_context(|| format!("loading {}", path.display()))?;
            Ok(Some(path.to_path_buf()))
        }
        None => match dotenvy::dotenv() {
            Ok(found) => Ok(Some(found)),
            Err(err) if err.not_found() => Ok(None),
            Err(err) => Err(err).context("loading .env"),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_missing_file_is_an_error() {
        let missing = std::env::temp_dir().join("flow-chat-no-such-file.env");
        let err = load_env(Some(&missing)).expect_err("missing env file");
        assert!(format!("{err:#}").contains("flow-chat-no-such-file.env"));
    }

    #[test]
    fn explicit_file_is_loaded_without_overriding_existing_values() {
        let path = std::env::temp_dir().join(format!("flow-chat-{}.env", std::process::id()));
        std::fs::write(&path, "FLOW_CHAT_TEST_LOADED=from-file\nPATH=from-file\n").expect("write");
        let loaded = load_env(Some(&path)).expect("load");
        assert_eq!(loaded.as_deref(), Some(path.as_path()));
        assert_eq!(
            std::env::var("FLOW_CHAT_TEST_LOADED").as_deref(),
            Ok("from-file")
        );
        assert_ne!(std::env::var("PATH").as_deref(), Ok("from-file"));
        let _ = std::fs::remove_file(&path);
    }
}

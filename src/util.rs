use std::env;
use std::iter::repeat;
use std::path::{Path, PathBuf};
use std::str::FromStr;

pub fn find_first_subpath<P: AsRef<Path>, F: Fn(&Path) -> bool>(
    root: impl AsRef<Path>,
    subpaths: &[P],
    search: F,
) -> Option<PathBuf> {
    subpaths
        .iter()
        .zip(repeat(root.as_ref()))
        .map(|(b, a)| a.join(b))
        .find(|it: &PathBuf| search(it))
}

/// Reads and parses an environment variable, falling back to `default` when
/// it's missing or malformed.
pub fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|it| it.trim().parse().ok())
        .unwrap_or(default)
}

/// Comma separated list from an environment variable.
pub fn env_list(key: &str) -> Option<Vec<String>> {
    env::var(key).ok().map(|it| {
        it.split(',')
            .map(str::trim)
            .filter(|it| !it.is_empty())
            .map(str::to_string)
            .collect()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_existing_subpath_is_found() {
        let dir = tempfile::tempdir().expect("unable to create temp dir");
        std::fs::write(dir.path().join("settings.yaml"), "").unwrap();

        let found = find_first_subpath(dir.path(), &["settings.yml", "settings.yaml"], Path::exists);
        assert_eq!(found, Some(dir.path().join("settings.yaml")));

        let missing = find_first_subpath(dir.path(), &["other.yml"], Path::exists);
        assert!(missing.is_none());
    }

    #[test]
    fn env_or_falls_back_on_garbage() {
        env::set_var("TEMPO_TEST_ENV_OR", "not a number");
        assert_eq!(env_or("TEMPO_TEST_ENV_OR", 7u32), 7);
        env::set_var("TEMPO_TEST_ENV_OR", " 12 ");
        assert_eq!(env_or("TEMPO_TEST_ENV_OR", 7u32), 12);
    }

    #[test]
    fn env_list_skips_empty_items() {
        env::set_var("TEMPO_TEST_ENV_LIST", "a@example.com, ,b@example.com,");
        assert_eq!(
            env_list("TEMPO_TEST_ENV_LIST"),
            Some(vec!["a@example.com".to_string(), "b@example.com".to_string()])
        );
    }
}

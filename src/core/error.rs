use rusqlite;
use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ChassisError {
    #[error("SQLite error: {0}")]
    RusqliteError(#[from] rusqlite::Error),
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),
    #[error("Configuration error: {0}")]
    Configuration(String),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Circular module dependency detected for module '{module}': {}", path.join(" -> "))]
    CircularDependency { module: String, path: Vec<String> },
    #[error("Unknown module '{name}'{}", chain_suffix(chain))]
    UnknownModule { name: String, chain: Vec<String> },
    #[error("{file}:{line}: XML import error: {message}")]
    XmlImport {
        file: String,
        line: usize,
        message: String,
    },
    #[error("Patch error in fragment '{fragment}' (xpath '{xpath}'): {message}")]
    Patch {
        fragment: String,
        xpath: String,
        message: String,
    },
    #[error("Not found: {0}")]
    NotFound(String),
}

fn chain_suffix(chain: &[String]) -> String {
    if chain.is_empty() {
        String::new()
    } else {
        format!(" required by '{}'", chain.join(" -> "))
    }
}

impl ChassisError {
    /// Whether this error may be degraded to a warning on passive
    /// (non-synchronizing) read paths. Structural and metadata errors
    /// during discovery never degrade.
    pub fn is_record_level(&self) -> bool {
        matches!(
            self,
            ChassisError::XmlImport { .. } | ChassisError::Patch { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_circular_dependency_message_contains_path() {
        let err = ChassisError::CircularDependency {
            module: "a".to_string(),
            path: vec!["a".to_string(), "b".to_string()],
        };
        let msg = err.to_string();
        assert!(msg.contains("a -> b"));
        assert!(msg.contains("'a'"));
    }

    #[test]
    fn test_unknown_module_message_with_chain() {
        let err = ChassisError::UnknownModule {
            name: "ghost".to_string(),
            chain: vec!["base".to_string(), "ext".to_string()],
        };
        assert!(err.to_string().contains("required by 'base -> ext'"));

        let bare = ChassisError::UnknownModule {
            name: "ghost".to_string(),
            chain: vec![],
        };
        assert!(!bare.to_string().contains("required by"));
    }
}

//! Clone engine configuration.

use orgclone_core::defaults;

/// Concurrency limits for a clone job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloneConfig {
    /// Maximum concurrent row inserts within one entity type.
    pub row_concurrency: usize,
    /// Maximum entity types of the same rank cloned concurrently.
    pub type_concurrency: usize,
}

impl Default for CloneConfig {
    fn default() -> Self {
        Self {
            row_concurrency: defaults::ROW_CONCURRENCY,
            type_concurrency: defaults::TYPE_CONCURRENCY,
        }
    }
}

impl CloneConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `ORGCLONE_ROW_CONCURRENCY` | `4` | Concurrent row inserts per type |
    /// | `ORGCLONE_TYPE_CONCURRENCY` | `2` | Concurrent types per rank |
    pub fn from_env() -> Self {
        Self {
            row_concurrency: parse_limit(
                std::env::var("ORGCLONE_ROW_CONCURRENCY").ok(),
                defaults::ROW_CONCURRENCY,
            ),
            type_concurrency: parse_limit(
                std::env::var("ORGCLONE_TYPE_CONCURRENCY").ok(),
                defaults::TYPE_CONCURRENCY,
            ),
        }
    }

    /// Set maximum concurrent row inserts (at least 1).
    pub fn with_row_concurrency(mut self, n: usize) -> Self {
        self.row_concurrency = n.max(1);
        self
    }

    /// Set maximum concurrent types per rank (at least 1).
    pub fn with_type_concurrency(mut self, n: usize) -> Self {
        self.type_concurrency = n.max(1);
        self
    }

    /// Fully sequential: one type, one row at a time.
    pub fn sequential() -> Self {
        Self {
            row_concurrency: 1,
            type_concurrency: 1,
        }
    }
}

fn parse_limit(raw: Option<String>, default: usize) -> usize {
    raw.and_then(|v| v.trim().parse::<usize>().ok())
        .unwrap_or(default)
        .max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CloneConfig::default();
        assert_eq!(config.row_concurrency, defaults::ROW_CONCURRENCY);
        assert_eq!(config.type_concurrency, defaults::TYPE_CONCURRENCY);
    }

    #[test]
    fn test_builder_clamps_to_one() {
        let config = CloneConfig::default()
            .with_row_concurrency(0)
            .with_type_concurrency(3);
        assert_eq!(config.row_concurrency, 1);
        assert_eq!(config.type_concurrency, 3);
    }

    #[test]
    fn test_parse_limit() {
        assert_eq!(parse_limit(None, 8), 8);
        assert_eq!(parse_limit(Some("16".to_string()), 8), 16);
        assert_eq!(parse_limit(Some(" 4 ".to_string()), 8), 4);
        assert_eq!(parse_limit(Some("zero".to_string()), 8), 8);
        assert_eq!(parse_limit(Some("0".to_string()), 8), 1);
    }
}

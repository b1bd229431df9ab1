use crate::error::{AppError, AppResult};
use serde::{Deserialize, Serialize};

/// One additional "copy this to there" instruction: source relative to the
/// project directory, target relative to the remote app folder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentEntry {
    pub source: String,
    pub target: String,
}

/// Parse `source1|target1;source2|target2`.
///
/// Empty segments are ignored, so a trailing `;` is accepted. A segment
/// without exactly one `|`, or with an empty side, rejects the whole string.
pub fn parse_deployment_entries(value: &str) -> AppResult<Vec<DeploymentEntry>> {
    let mut entries = Vec::new();

    for segment in value.split(';') {
        if segment.trim().is_empty() {
            continue;
        }

        let parts: Vec<&str> = segment.split('|').collect();
        if parts.len() != 2 {
            return Err(AppError::ConfigurationFormat(format!(
                "deployment entry '{}' must have the form source|target",
                segment
            )));
        }

        let source = parts[0].trim();
        let target = parts[1].trim();
        if source.is_empty() || target.is_empty() {
            return Err(AppError::ConfigurationFormat(format!(
                "deployment entry '{}' has an empty source or target",
                segment
            )));
        }

        entries.push(DeploymentEntry {
            source: source.to_string(),
            target: target.to_string(),
        });
    }

    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_string_is_empty_list() {
        assert!(parse_deployment_entries("").unwrap().is_empty());
        assert!(parse_deployment_entries("  ").unwrap().is_empty());
    }

    #[test]
    fn test_preserves_order_and_count() {
        let entries =
            parse_deployment_entries("appsettings.Production.json|appsettings.json;wwwroot|wwwroot;;data/db.sqlite|db.sqlite;")
                .unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].source, "appsettings.Production.json");
        assert_eq!(entries[0].target, "appsettings.json");
        assert_eq!(entries[1].source, "wwwroot");
        assert_eq!(entries[2].target, "db.sqlite");
    }

    #[test]
    fn test_missing_separator_names_segment() {
        let err = parse_deployment_entries("a|b;broken;c|d").unwrap_err();
        match err {
            AppError::ConfigurationFormat(msg) => assert!(msg.contains("'broken'")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_empty_side_rejected() {
        for input in ["|target", "source|", "a|b;x| ", "a|b|c"] {
            let err = parse_deployment_entries(input).unwrap_err();
            assert!(matches!(err, AppError::ConfigurationFormat(_)), "{input}");
        }
    }
}

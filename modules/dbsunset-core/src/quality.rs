//! Quality assurance scoring over a discovery result.

use serde::{Deserialize, Serialize};

use dbsunset_common::{DiscoveryResult, SourceType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QaStatus {
    Pass,
    Warning,
    Fail,
}

impl std::fmt::Display for QaStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            QaStatus::Pass => "pass",
            QaStatus::Warning => "warning",
            QaStatus::Fail => "fail",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QaCheck {
    pub name: String,
    pub status: QaStatus,
    /// Reviewer confidence in the verdict, 0–100.
    pub confidence: u8,
    pub description: String,
}

/// Pass iff references were found and at least 80% of the matched files are
/// high confidence.
pub fn reference_removal_check(discovery: &DiscoveryResult) -> QaCheck {
    let matched = discovery.files.len();
    let high = discovery.confidence_distribution.high;

    if discovery.total_files_scanned == 0 {
        return QaCheck {
            name: "database_reference_removal".into(),
            status: QaStatus::Fail,
            confidence: 0,
            description: "No files were analyzed - repository may be empty or inaccessible"
                .into(),
        };
    }
    if matched == 0 {
        return QaCheck {
            name: "database_reference_removal".into(),
            status: QaStatus::Warning,
            confidence: 50,
            description: format!(
                "No {} references found - database may already be removed",
                discovery.database_name
            ),
        };
    }

    if high as f64 / matched as f64 >= 0.8 {
        QaCheck {
            name: "database_reference_removal".into(),
            status: QaStatus::Pass,
            confidence: 95,
            description: format!(
                "References identified with high confidence ({high}/{matched} files)"
            ),
        }
    } else {
        QaCheck {
            name: "database_reference_removal".into(),
            status: QaStatus::Warning,
            confidence: 70,
            description: format!(
                "References found but only {high}/{matched} files are high confidence"
            ),
        }
    }
}

/// Pass iff discovery classified at least two distinct source types.
pub fn rule_compliance_check(discovery: &DiscoveryResult) -> QaCheck {
    let type_count = discovery.files_by_type.len();
    let total: usize = discovery.files_by_type.values().map(|v| v.len()).sum();

    if type_count >= 2 {
        QaCheck {
            name: "rule_compliance".into(),
            status: QaStatus::Pass,
            confidence: if type_count >= 3 && total >= 5 { 90 } else { 75 },
            description: format!(
                "Pattern discovery classified {type_count} source types across {total} files"
            ),
        }
    } else {
        QaCheck {
            name: "rule_compliance".into(),
            status: QaStatus::Warning,
            confidence: 60,
            description: format!(
                "Limited source type diversity ({type_count} types) - scope may be narrow"
            ),
        }
    }
}

/// Warn when many application-code files (Python, Shell) reference the
/// database; those carry the real runtime risk.
pub fn service_integrity_check(discovery: &DiscoveryResult) -> QaCheck {
    let critical: usize = [SourceType::Python, SourceType::Shell]
        .iter()
        .map(|t| {
            discovery
                .files_by_type
                .get(t)
                .map(|files| files.iter().map(|f| f.match_count).sum())
                .unwrap_or(0)
        })
        .sum();

    if critical > 5 {
        QaCheck {
            name: "service_integrity".into(),
            status: QaStatus::Warning,
            confidence: 85,
            description: format!(
                "High service integrity risk - {critical} application code matches reference the database"
            ),
        }
    } else if critical > 0 {
        QaCheck {
            name: "service_integrity".into(),
            status: QaStatus::Pass,
            confidence: 80,
            description: format!("Moderate risk - {critical} application code matches"),
        }
    } else {
        QaCheck {
            name: "service_integrity".into(),
            status: QaStatus::Pass,
            confidence: 95,
            description: "Minimal service integrity risk - no application code affected".into(),
        }
    }
}

/// Actionable follow-ups derived from the check outcomes.
pub fn recommendations(checks: &[QaCheck], discovery: &DiscoveryResult) -> Vec<String> {
    let mut recs = vec![
        "Monitor application logs for database connection errors".to_string(),
        "Update runbooks and documentation to reflect the decommissioning".to_string(),
    ];

    for check in checks {
        match (check.name.as_str(), check.status) {
            ("service_integrity", QaStatus::Warning) => {
                recs.push(
                    "Test affected services in staging before merging the PR".to_string(),
                );
                recs.push("Plan a phased rollout with a rollback path".to_string());
            }
            ("database_reference_removal", QaStatus::Warning) => {
                recs.push("Review low-confidence matches manually".to_string());
            }
            ("rule_compliance", QaStatus::Warning) => {
                recs.push("Consider widening search patterns for better coverage".to_string());
            }
            _ => {}
        }
    }

    if discovery.confidence_distribution.low > 0 {
        recs.push(format!(
            "{} low-confidence file(s) may be false positives",
            discovery.confidence_distribution.low
        ));
    }

    recs
}

#[cfg(test)]
mod tests {
    use super::*;
    use dbsunset_common::{FileMatch, PatternMatch, RepoRef, RepoStats};

    fn file(path: &str, source_type: SourceType, confidence: f64, matches: usize) -> FileMatch {
        FileMatch {
            path: path.to_string(),
            source_type,
            confidence,
            match_count: matches,
            pattern_matches: (0..matches)
                .map(|i| PatternMatch {
                    pattern: "orders".into(),
                    line_number: i as u32 + 1,
                    line_content: "orders".into(),
                })
                .collect(),
        }
    }

    fn discovery(files: Vec<FileMatch>, scanned: usize) -> DiscoveryResult {
        DiscoveryResult::from_matches(
            "orders",
            RepoRef::parse("https://github.com/acme/repo").unwrap(),
            scanned,
            files,
            RepoStats::default(),
        )
    }

    #[test]
    fn high_confidence_discovery_passes_reference_check() {
        let d = discovery(
            vec![
                file("a.sql", SourceType::Sql, 0.9, 1),
                file("b.yml", SourceType::Config, 0.85, 1),
            ],
            10,
        );
        assert_eq!(reference_removal_check(&d).status, QaStatus::Pass);
    }

    #[test]
    fn low_confidence_discovery_warns() {
        let d = discovery(
            vec![
                file("a.sql", SourceType::Sql, 0.9, 1),
                file("b.yml", SourceType::Config, 0.4, 1),
            ],
            10,
        );
        assert_eq!(reference_removal_check(&d).status, QaStatus::Warning);
    }

    #[test]
    fn empty_repository_fails_reference_check() {
        let d = discovery(Vec::new(), 0);
        assert_eq!(reference_removal_check(&d).status, QaStatus::Fail);
    }

    #[test]
    fn two_source_types_pass_rule_compliance() {
        let d = discovery(
            vec![
                file("a.sql", SourceType::Sql, 0.9, 1),
                file("b.yml", SourceType::Config, 0.9, 1),
            ],
            10,
        );
        assert_eq!(rule_compliance_check(&d).status, QaStatus::Pass);
    }

    #[test]
    fn single_source_type_warns_on_rule_compliance() {
        let d = discovery(vec![file("a.sql", SourceType::Sql, 0.9, 1)], 10);
        assert_eq!(rule_compliance_check(&d).status, QaStatus::Warning);
    }

    #[test]
    fn many_code_matches_warn_on_service_integrity() {
        let d = discovery(
            vec![
                file("a.py", SourceType::Python, 0.9, 4),
                file("b.sh", SourceType::Shell, 0.9, 3),
            ],
            10,
        );
        let check = service_integrity_check(&d);
        assert_eq!(check.status, QaStatus::Warning);
    }

    #[test]
    fn few_code_matches_pass_service_integrity() {
        let d = discovery(vec![file("a.py", SourceType::Python, 0.9, 2)], 10);
        assert_eq!(service_integrity_check(&d).status, QaStatus::Pass);
    }

    #[test]
    fn warnings_produce_recommendations() {
        let d = discovery(vec![file("a.py", SourceType::Python, 0.4, 6)], 10);
        let checks = vec![
            reference_removal_check(&d),
            rule_compliance_check(&d),
            service_integrity_check(&d),
        ];
        let recs = recommendations(&checks, &d);
        assert!(recs.iter().any(|r| r.contains("staging")));
        assert!(recs.iter().any(|r| r.contains("low-confidence")));
        assert!(recs.len() >= 4);
    }
}

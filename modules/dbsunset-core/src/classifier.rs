//! Source type classification: map `(path, content)` to a source type,
//! detected frameworks, and a confidence score.

use std::sync::Arc;

use regex::Regex;
use tracing::warn;

use dbsunset_common::{ClassificationResult, SourceType};

/// Additive signal weights. Content regexes count once each no matter how
/// often they match.
const EXTENSION_WEIGHT: f64 = 0.4;
const FILE_NAME_WEIGHT: f64 = 0.3;
const DIRECTORY_WEIGHT: f64 = 0.2;
const CONTENT_WEIGHT: f64 = 0.1;

/// Scores below this floor are not classifications.
const UNKNOWN_THRESHOLD: f64 = 0.1;

struct TypeSignals {
    source_type: SourceType,
    extensions: &'static [&'static str],
    file_names: &'static [&'static str],
    directories: &'static [&'static str],
    content_patterns: Vec<(String, Regex)>,
}

pub struct SourceTypeClassifier {
    signals: Vec<TypeSignals>,
    framework_patterns: Vec<(&'static str, Vec<Regex>)>,
}

impl Default for SourceTypeClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl SourceTypeClassifier {
    pub fn new() -> Self {
        Self {
            signals: build_signals(),
            framework_patterns: build_framework_patterns(),
        }
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Classify a single file. Ties resolve toward the type declared first
    /// in [`SourceType::candidates`], reflecting decommissioning risk.
    pub fn classify(&self, path: &str, content: Option<&str>) -> ClassificationResult {
        let path_lower = path.to_lowercase();
        let extension = file_extension(&path_lower);
        let file_name = file_name(path);

        let mut matched_patterns = Vec::new();
        let mut scores: Vec<(SourceType, f64)> = Vec::with_capacity(self.signals.len());

        for signals in &self.signals {
            let mut score = 0.0;

            if let Some(ref ext) = extension {
                if signals.extensions.contains(&ext.as_str()) {
                    score += EXTENSION_WEIGHT;
                    matched_patterns.push(format!("extension:{ext}"));
                }
            }
            if signals.file_names.contains(&file_name) {
                score += FILE_NAME_WEIGHT;
                matched_patterns.push(format!("filename:{file_name}"));
            }
            for dir in signals.directories {
                if path_lower.contains(dir) {
                    score += DIRECTORY_WEIGHT;
                    matched_patterns.push(format!("directory:{dir}"));
                }
            }
            if let Some(content) = content {
                for (raw, regex) in &signals.content_patterns {
                    if regex.is_match(content) {
                        score += CONTENT_WEIGHT;
                        matched_patterns.push(format!("content:{raw}"));
                    }
                }
            }

            scores.push((signals.source_type, score));
        }

        // Strict comparison keeps the earlier (higher-risk) type on ties.
        let (best_type, best_score) = scores
            .iter()
            .copied()
            .fold((SourceType::Unknown, 0.0), |acc, (ty, score)| {
                if score > acc.1 {
                    (ty, score)
                } else {
                    acc
                }
            });

        if best_score < UNKNOWN_THRESHOLD {
            return ClassificationResult::unknown();
        }

        let detected_frameworks = match content {
            Some(content) => self.detect_frameworks(content),
            None => Vec::new(),
        };

        ClassificationResult {
            source_type: best_type,
            confidence: best_score.min(1.0),
            matched_patterns,
            detected_frameworks,
            rule_files: vec!["general".to_string(), best_type.as_str().to_string()],
        }
    }

    fn detect_frameworks(&self, content: &str) -> Vec<String> {
        let mut frameworks = Vec::new();
        for (name, patterns) in &self.framework_patterns {
            if patterns.iter().any(|p| p.is_match(content)) {
                frameworks.push((*name).to_string());
            }
        }
        frameworks
    }
}

/// Database search patterns tailored to a source type. The returned strings
/// are regular expressions; the database name is regex-escaped before
/// substitution, so names with metacharacters are safe.
pub fn search_patterns(source_type: SourceType, database_name: &str) -> Vec<String> {
    let db = regex::escape(database_name);
    let base = name_variants(database_name)
        .into_iter()
        .map(|v| format!(r"\b{}\b", regex::escape(&v)));

    let typed: Vec<String> = match source_type {
        SourceType::Infrastructure => vec![
            format!(r#"resource\s+"[^"]*"\s+"{db}""#),
            format!(r#"name\s*[:=]\s*['"]?{db}['"]?"#),
            format!(r#"database\s*[:=]\s*['"]?{db}['"]?"#),
        ],
        SourceType::Config => vec![
            format!(r"{db}[_-]?(database|db)[_-]?url"),
            format!(r"{db}_DATABASE_URL"),
            format!(r"{db}[_-]?connection"),
            format!(r"(host|database|db)\s*[:=]\s*['\x22]?{db}['\x22]?"),
        ],
        SourceType::Sql => vec![
            format!(r"CREATE\s+DATABASE\s+{db}"),
            format!(r"CREATE\s+SCHEMA\s+{db}"),
            format!(r"USE\s+{db}"),
            format!(r"FROM\s+{db}\."),
        ],
        SourceType::Python => vec![
            format!(r"DATABASES\s*=.*{db}"),
            format!(r"class\s+\w*{db}\w*\("),
            format!(r"{db}[_-]?(model|engine|connection)"),
        ],
        SourceType::Shell => vec![
            format!(r"{db}_[A-Z_]+="),
            format!(r"(psql|mysql|createdb|dropdb|pg_dump)\b.*{db}"),
            format!(r"(DB_NAME|DATABASE)=['\x22]?{db}['\x22]?"),
        ],
        SourceType::Documentation | SourceType::Unknown => Vec::new(),
    };

    typed.into_iter().chain(base).collect()
}

/// Spelling variants a database identifier shows up under: as given, with
/// hyphens and underscores swapped. Matching is case-insensitive, so case
/// variants need no expansion.
pub fn name_variants(database_name: &str) -> Vec<String> {
    let mut variants = vec![database_name.to_string()];
    let underscored = database_name.replace('-', "_");
    let dashed = database_name.replace('_', "-");
    for variant in [underscored, dashed] {
        if !variants.contains(&variant) {
            variants.push(variant);
        }
    }
    variants
}

fn file_extension(path_lower: &str) -> Option<String> {
    std::path::Path::new(path_lower)
        .extension()
        .map(|ext| format!(".{}", ext.to_string_lossy()))
}

fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

fn compile(patterns: &[&str]) -> Vec<(String, Regex)> {
    patterns
        .iter()
        .filter_map(|raw| {
            match Regex::new(&format!("(?im){raw}")) {
                Ok(regex) => Some(((*raw).to_string(), regex)),
                Err(e) => {
                    // A broken built-in pattern is skipped, never fatal.
                    warn!(pattern = raw, error = %e, "Skipping invalid classifier pattern");
                    None
                }
            }
        })
        .collect()
}

fn build_signals() -> Vec<TypeSignals> {
    vec![
        TypeSignals {
            source_type: SourceType::Infrastructure,
            extensions: &[".tf", ".tfvars", ".hcl", ".nomad"],
            file_names: &[
                "Dockerfile",
                "docker-compose.yml",
                "docker-compose.yaml",
                "Vagrantfile",
                "Jenkinsfile",
                "Makefile",
            ],
            directories: &[
                "terraform/",
                "helm/",
                "k8s/",
                "kubernetes/",
                "charts/",
                "manifests/",
                "deployment/",
                "infra/",
            ],
            content_patterns: compile(&[
                r#"resource\s+"[^"]+"\s+"[^"]+""#,
                r"apiVersion:\s*v\d+",
                r"kind:\s*(Deployment|Service|ConfigMap|Secret)",
                r"FROM\s+[\w\-./]+",
                r"helm\s+(install|upgrade|delete)",
            ]),
        },
        TypeSignals {
            source_type: SourceType::Config,
            extensions: &[
                ".yml",
                ".yaml",
                ".json",
                ".toml",
                ".ini",
                ".conf",
                ".config",
                ".properties",
                ".env",
            ],
            file_names: &[
                ".env",
                ".env.local",
                ".env.production",
                "config.yml",
                "application.yml",
                "settings.yml",
                "config.json",
            ],
            directories: &["config/", "configs/", "settings/", "env/"],
            content_patterns: compile(&[
                r"database[_-]?url[:\s]",
                r"db[_-]?(host|port|name|user)[:\s]",
                r"connection[_-]?string[:\s]",
                r#"jdbc:[^"'\s]+"#,
                r#"postgresql://[^"'\s]+"#,
                r#"mysql://[^"'\s]+"#,
            ]),
        },
        TypeSignals {
            source_type: SourceType::Sql,
            extensions: &[".sql", ".ddl", ".dml", ".dump", ".backup"],
            file_names: &["schema.sql", "dump.sql", "backup.sql", "migration.sql"],
            directories: &[
                "sql/",
                "migrations/",
                "database/",
                "db/",
                "schemas/",
                "dumps/",
                "backups/",
            ],
            content_patterns: compile(&[
                r"CREATE\s+(TABLE|DATABASE|SCHEMA|INDEX)",
                r"DROP\s+(TABLE|DATABASE|SCHEMA|INDEX)",
                r"ALTER\s+TABLE",
                r"INSERT\s+INTO",
                r"SELECT\s+.*\s+FROM",
                r"DELETE\s+FROM",
            ]),
        },
        TypeSignals {
            source_type: SourceType::Python,
            extensions: &[".py", ".pyw", ".pyx", ".pyi"],
            file_names: &[
                "manage.py",
                "wsgi.py",
                "asgi.py",
                "settings.py",
                "models.py",
            ],
            directories: &["python/", "src/", "app/", "apps/"],
            content_patterns: compile(&[
                r"from\s+django",
                r"import\s+django",
                r"from\s+sqlalchemy",
                r"import\s+sqlalchemy",
                r"class\s+\w+\(models\.Model\)",
                r"class\s+\w+\(db\.Model\)",
                r"@app\.route",
                r"def\s+\w+\(request",
            ]),
        },
        TypeSignals {
            source_type: SourceType::Shell,
            extensions: &[".sh", ".bash", ".zsh"],
            file_names: &["entrypoint.sh", "run.sh", "deploy.sh", "setup.sh"],
            directories: &["scripts/", "bin/", "hooks/"],
            content_patterns: compile(&[
                r"^#!/bin/(ba|z)?sh",
                r"^#!/usr/bin/env\s+(ba|z)?sh",
                r"\bexport\s+[A-Z_]+=",
                r"\bset\s+-e",
            ]),
        },
        TypeSignals {
            source_type: SourceType::Documentation,
            extensions: &[".md", ".rst", ".txt", ".adoc", ".wiki"],
            file_names: &[
                "README.md",
                "CHANGELOG.md",
                "CONTRIBUTING.md",
                "ARCHITECTURE.md",
                "API.md",
            ],
            directories: &["docs/", "documentation/", "wiki/"],
            content_patterns: compile(&[
                r"#\s+.*database",
                r"##\s+.*schema",
                r"```sql",
                r"```python",
            ]),
        },
    ]
}

fn build_framework_patterns() -> Vec<(&'static str, Vec<Regex>)> {
    let compile_all = |patterns: &[&str]| -> Vec<Regex> {
        compile(patterns).into_iter().map(|(_, r)| r).collect()
    };
    vec![
        (
            "terraform",
            compile_all(&[r"terraform\s*\{", r#"provider\s+"[^"]+""#, r#"resource\s+"[^"]+""#]),
        ),
        ("kubernetes", compile_all(&[r"apiVersion:", r"kind:\s*\w+"])),
        ("helm", compile_all(&[r"Chart\.yaml", r"\{\{\s*\.Values", r"templates/"])),
        ("docker", compile_all(&[r"^FROM\s+", r"^RUN\s+", r"^COPY\s+", r"^ADD\s+"])),
        (
            "django",
            compile_all(&[r"from\s+django", r"DJANGO_SETTINGS_MODULE", r"manage\.py"]),
        ),
        (
            "flask",
            compile_all(&[r"from\s+flask", r"@app\.route", r"Flask\(__name__\)"]),
        ),
        (
            "fastapi",
            compile_all(&[r"from\s+fastapi", r"@app\.(get|post|put|delete)", r"FastAPI\("]),
        ),
        (
            "sqlalchemy",
            compile_all(&[r"from\s+sqlalchemy", r"declarative_base", r"Column\("]),
        ),
        (
            "alembic",
            compile_all(&[r"from\s+alembic", r"revision\s*=", r"down_revision\s*="]),
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terraform_file_classifies_as_infrastructure() {
        let classifier = SourceTypeClassifier::new();
        let result = classifier.classify(
            "terraform/rds.tf",
            Some(r#"resource "aws_db_instance" "orders" { name = "orders" }"#),
        );
        assert_eq!(result.source_type, SourceType::Infrastructure);
        assert!(result.confidence >= 0.7);
        assert!(result.detected_frameworks.contains(&"terraform".to_string()));
    }

    #[test]
    fn sql_file_classifies_by_extension_and_content() {
        let classifier = SourceTypeClassifier::new();
        let result = classifier.classify(
            "migrations/001_init.sql",
            Some("CREATE DATABASE periodic_table;\nCREATE TABLE elements (id int);"),
        );
        assert_eq!(result.source_type, SourceType::Sql);
        assert!(result.confidence >= 0.7);
    }

    #[test]
    fn yaml_in_config_dir_is_config() {
        let classifier = SourceTypeClassifier::new();
        let result = classifier.classify(
            "config/database.yml",
            Some("production:\n  database: postgres_air\n  db_host: localhost\n"),
        );
        assert_eq!(result.source_type, SourceType::Config);
    }

    #[test]
    fn shell_script_with_shebang_is_shell() {
        let classifier = SourceTypeClassifier::new();
        let result = classifier.classify(
            "scripts/deploy.sh",
            Some("#!/bin/bash\nset -e\nexport ORDERS_DB_HOST=db.internal\n"),
        );
        assert_eq!(result.source_type, SourceType::Shell);
    }

    #[test]
    fn django_frameworks_are_detected() {
        let classifier = SourceTypeClassifier::new();
        let result = classifier.classify(
            "app/settings.py",
            Some("from django.conf import settings\nDATABASES = {}\n"),
        );
        assert_eq!(result.source_type, SourceType::Python);
        assert!(result.detected_frameworks.contains(&"django".to_string()));
    }

    #[test]
    fn unmatched_path_is_unknown_with_zero_confidence() {
        let classifier = SourceTypeClassifier::new();
        let result = classifier.classify("binary.dat", None);
        assert_eq!(result.source_type, SourceType::Unknown);
        assert_eq!(result.confidence, 0.0);
        assert!(result.detected_frameworks.is_empty());
        assert!(result.rule_files.is_empty());
    }

    #[test]
    fn confidence_is_clamped_to_one() {
        let classifier = SourceTypeClassifier::new();
        // Extension + name + directory + several content patterns.
        let result = classifier.classify(
            "sql/migrations/schema.sql",
            Some(
                "CREATE TABLE a (id int);\nINSERT INTO a VALUES (1);\n\
                 ALTER TABLE a ADD b int;\nDELETE FROM a;\nSELECT x FROM a;",
            ),
        );
        assert_eq!(result.source_type, SourceType::Sql);
        assert!(result.confidence <= 1.0);
    }

    #[test]
    fn adding_content_signals_never_decreases_confidence() {
        let classifier = SourceTypeClassifier::new();
        let without = classifier.classify("db/schema.sql", None);
        let with = classifier.classify("db/schema.sql", Some("CREATE TABLE t (id int);"));
        assert!(with.confidence >= without.confidence);
    }

    #[test]
    fn search_patterns_compile_for_hyphenated_names() {
        for source_type in SourceType::candidates() {
            for pattern in search_patterns(*source_type, "user-data") {
                let compiled = Regex::new(&format!("(?i){pattern}"));
                assert!(compiled.is_ok(), "pattern failed to compile: {pattern}");
            }
        }
    }

    #[test]
    fn search_patterns_match_name_variants() {
        let patterns = search_patterns(SourceType::Unknown, "user-data");
        let haystacks = ["user_data", "user-data", "USER_DATA"];
        for haystack in haystacks {
            let hit = patterns.iter().any(|p| {
                Regex::new(&format!("(?i){p}"))
                    .map(|r| r.is_match(haystack))
                    .unwrap_or(false)
            });
            assert!(hit, "no variant pattern matched {haystack}");
        }
    }

    #[test]
    fn sql_search_patterns_cover_create_database() {
        let patterns = search_patterns(SourceType::Sql, "periodic_table");
        let regex = patterns
            .iter()
            .find(|p| p.contains("CREATE"))
            .expect("CREATE DATABASE pattern");
        let compiled = Regex::new(&format!("(?i){regex}")).unwrap();
        assert!(compiled.is_match("CREATE DATABASE periodic_table;"));
    }
}

//! Built-in rule catalog, keyed by source type. Patterns carry the
//! `{{TARGET_DB}}` token, substituted with the regex-escaped database name
//! when an engine is built.

use std::collections::BTreeMap;

use dbsunset_common::{CommentStyle, Rule, RuleAction, SourceType};

fn rule(
    id: &str,
    description: &str,
    patterns: &[&str],
    action: RuleAction,
    frameworks: &[&str],
    comment_style: Option<CommentStyle>,
) -> Rule {
    Rule {
        id: id.to_string(),
        description: description.to_string(),
        patterns: patterns.iter().map(|p| p.to_string()).collect(),
        action,
        required_frameworks: frameworks.iter().map(|f| f.to_string()).collect(),
        comment_style,
    }
}

pub(crate) fn builtin_rules() -> BTreeMap<SourceType, Vec<Rule>> {
    let mut rules = BTreeMap::new();

    rules.insert(
        SourceType::Infrastructure,
        vec![
            rule(
                "terraform_resource_removal",
                "Remove Terraform database resources",
                &[
                    r#"resource\s+"[^"]*database[^"]*"\s+"{{TARGET_DB}}""#,
                    r#"resource\s+"[^"]*rds[^"]*"\s+"{{TARGET_DB}}""#,
                    r#"resource\s+"[^"]*postgresql[^"]*"\s+"{{TARGET_DB}}""#,
                ],
                RuleAction::CommentOut,
                &["terraform"],
                Some(CommentStyle::Hash),
            ),
            rule(
                "helm_values_cleanup",
                "Remove database entries from values.yaml",
                &[
                    r"^(\s*){{TARGET_DB}}:\s*$",
                    r"^(\s*)database:\s*{{TARGET_DB}}\s*$",
                    r#"^(\s*)name:\s*['"]?{{TARGET_DB}}['"]?\s*$"#,
                ],
                RuleAction::CommentOut,
                &["helm"],
                Some(CommentStyle::Hash),
            ),
            rule(
                "kubernetes_manifest_cleanup",
                "Remove Kubernetes database resources",
                &[
                    r"name:\s*{{TARGET_DB}}[-_].*",
                    r"{{TARGET_DB}}[-_]database",
                    r#"DATABASE_NAME:\s*['"]{{TARGET_DB}}['"]"#,
                ],
                RuleAction::CommentOut,
                &["kubernetes"],
                Some(CommentStyle::Hash),
            ),
            rule(
                "docker_compose_cleanup",
                "Remove Docker Compose database services",
                &[
                    r"^\s*{{TARGET_DB}}[-_]?(db|database):\s*$",
                    r"POSTGRES_DB:\s*{{TARGET_DB}}",
                    r"DATABASE_NAME:\s*{{TARGET_DB}}",
                ],
                RuleAction::CommentOut,
                &["docker"],
                Some(CommentStyle::Hash),
            ),
        ],
    );

    rules.insert(
        SourceType::Config,
        vec![
            rule(
                "database_url_removal",
                "Remove database connection URLs",
                &[
                    r"{{TARGET_DB}}_DATABASE_URL\s*=.*",
                    r"DATABASE_URL.*{{TARGET_DB}}.*",
                    r"{{TARGET_DB}}_CONNECTION_STRING\s*=.*",
                ],
                RuleAction::CommentOut,
                &[],
                None,
            ),
            rule(
                "database_host_removal",
                "Remove database host configurations",
                &[
                    r"{{TARGET_DB}}_HOST\s*[=:].*",
                    r"{{TARGET_DB}}_PORT\s*[=:].*",
                    r"{{TARGET_DB}}_USER\s*[=:].*",
                    r"{{TARGET_DB}}_PASSWORD\s*[=:].*",
                ],
                RuleAction::CommentOut,
                &[],
                None,
            ),
            rule(
                "yaml_config_cleanup",
                "Remove YAML database configurations",
                &[
                    r"^(\s*){{TARGET_DB}}:\s*$",
                    r"^(\s*)database:\s*{{TARGET_DB}}\s*$",
                    r"^(\s*)host:\s*{{TARGET_DB}}[-_].*",
                ],
                RuleAction::CommentOut,
                &[],
                Some(CommentStyle::Hash),
            ),
            rule(
                "helm_values_deprecation",
                "Mark Helm values and YAML examples as deprecated",
                &[
                    r#"name:\s*['"]{{TARGET_DB}}['"]"#,
                    r"{{TARGET_DB}}[-_].*:",
                ],
                RuleAction::AddDeprecationNotice,
                &["helm"],
                Some(CommentStyle::Hash),
            ),
        ],
    );

    rules.insert(
        SourceType::Sql,
        vec![
            rule(
                "create_database_removal",
                "Comment out CREATE DATABASE statements",
                &[
                    r"CREATE\s+DATABASE\s+{{TARGET_DB}}\s*;?",
                    r"CREATE\s+SCHEMA\s+{{TARGET_DB}}\s*;?",
                ],
                RuleAction::CommentOut,
                &[],
                Some(CommentStyle::DoubleDash),
            ),
            rule(
                "use_database_removal",
                "Comment out USE database statements",
                &[
                    r"USE\s+{{TARGET_DB}}\s*;?",
                    r"\\connect\s+{{TARGET_DB}}\s*;?",
                    r"\\c\s+{{TARGET_DB}}\s*;?",
                ],
                RuleAction::CommentOut,
                &[],
                Some(CommentStyle::DoubleDash),
            ),
            rule(
                "table_references_cleanup",
                "Comment out table references with database prefix",
                &[
                    r"FROM\s+{{TARGET_DB}}\.\w+",
                    r"INSERT\s+INTO\s+{{TARGET_DB}}\.\w+",
                    r"UPDATE\s+{{TARGET_DB}}\.\w+",
                    r"DELETE\s+FROM\s+{{TARGET_DB}}\.\w+",
                ],
                RuleAction::CommentOut,
                &[],
                Some(CommentStyle::DoubleDash),
            ),
        ],
    );

    rules.insert(
        SourceType::Python,
        vec![
            rule(
                "django_database_config",
                "Remove Django database configurations",
                &[
                    r"'{{TARGET_DB}}':\s*\{",
                    r#""{{TARGET_DB}}":\s*\{"#,
                    r"{{TARGET_DB}}_DATABASE\s*=.*",
                ],
                RuleAction::CommentOut,
                &["django"],
                Some(CommentStyle::Hash),
            ),
            rule(
                "sqlalchemy_engine_removal",
                "Remove SQLAlchemy engine configurations",
                &[
                    r"{{TARGET_DB}}_engine\s*=.*create_engine.*",
                    r"{{TARGET_DB}}_SESSION\s*=.*",
                    r"{{TARGET_DB}}_connection\s*=.*",
                ],
                RuleAction::CommentOut,
                &["sqlalchemy"],
                Some(CommentStyle::Hash),
            ),
            rule(
                "model_references_cleanup",
                "Comment out database model references",
                &[
                    r"class\s+{{TARGET_DB}}\w*\(.*Model.*\):",
                    r"from\s+\S*{{TARGET_DB}}\S*\s+import",
                    r"import\s+\S*{{TARGET_DB}}\S*",
                ],
                RuleAction::CommentOut,
                &[],
                Some(CommentStyle::Hash),
            ),
            rule(
                "connection_string_cleanup",
                "Remove database connection strings",
                &[
                    r"{{TARGET_DB}}_DATABASE_URL\s*=.*",
                    r"postgresql://\S*{{TARGET_DB}}\S*",
                    r"mysql://\S*{{TARGET_DB}}\S*",
                ],
                RuleAction::CommentOut,
                &[],
                Some(CommentStyle::Hash),
            ),
            rule(
                "test_data_deprecation",
                "Mark test data and examples as deprecated",
                &[
                    r#"\(\s*"{{TARGET_DB}}"\s*,.*\)"#,
                    r#""{{TARGET_DB}}":\s*\("#,
                    r#""{{TARGET_DB}}"[,\s]*$"#,
                ],
                RuleAction::AddDeprecationNotice,
                &[],
                Some(CommentStyle::Hash),
            ),
        ],
    );

    rules.insert(
        SourceType::Shell,
        vec![
            rule(
                "database_variable_removal",
                "Remove database variable assignments",
                &[
                    r"^(\s*){{TARGET_DB}}_[A-Z_]*=.*$",
                    r"^(\s*)export\s+{{TARGET_DB}}_[A-Z_]*=.*$",
                    r#"^(\s*)DB_NAME=['"]?{{TARGET_DB}}['"]?.*$"#,
                    r#"^(\s*)DATABASE=['"]?{{TARGET_DB}}['"]?.*$"#,
                ],
                RuleAction::CommentOut,
                &[],
                Some(CommentStyle::Hash),
            ),
            rule(
                "database_command_removal",
                "Remove database-related commands",
                &[
                    r"psql.*{{TARGET_DB}}.*",
                    r"mysql.*{{TARGET_DB}}.*",
                    r"createdb\s+{{TARGET_DB}}",
                    r"dropdb\s+{{TARGET_DB}}",
                    r"pg_dump.*{{TARGET_DB}}.*",
                    r"mysqldump.*{{TARGET_DB}}.*",
                ],
                RuleAction::CommentOut,
                &[],
                Some(CommentStyle::Hash),
            ),
            rule(
                "deployment_script_cleanup",
                "Remove deployment steps for the database",
                &[
                    r"deploy\S*\s+.*{{TARGET_DB}}.*",
                    r"setup\S*\s+.*{{TARGET_DB}}.*",
                    r"configure\S*\s+.*{{TARGET_DB}}.*",
                ],
                RuleAction::CommentOut,
                &[],
                Some(CommentStyle::Hash),
            ),
        ],
    );

    rules.insert(
        SourceType::Documentation,
        vec![
            rule(
                "markdown_references_update",
                "Mark markdown database references with deprecation notices",
                &[
                    r"#.*{{TARGET_DB}}.*",
                    r"`{{TARGET_DB}}`",
                ],
                RuleAction::AddDeprecationNotice,
                &[],
                None,
            ),
            rule(
                "code_block_cleanup",
                "Mark code blocks referencing the database as deprecated",
                &[r"```.*{{TARGET_DB}}.*"],
                RuleAction::AddDeprecationNotice,
                &[],
                None,
            ),
            rule(
                "table_references_deprecate",
                "Mark table and list entries referencing the database",
                &[
                    r"\|.*{{TARGET_DB}}.*\|",
                    r"^\s*\*.*{{TARGET_DB}}.*",
                    r"^\s*-.*{{TARGET_DB}}.*",
                ],
                RuleAction::AddDeprecationNotice,
                &[],
                None,
            ),
            rule(
                "example_configuration_deprecate",
                "Mark example configurations as deprecated",
                &[
                    r#""{{TARGET_DB}}":\s*\{"#,
                    r#""{{TARGET_DB}}":\s*\("#,
                    r#""{{TARGET_DB}}"[,\s]*$"#,
                ],
                RuleAction::AddDeprecationNotice,
                &[],
                None,
            ),
        ],
    );

    rules
}

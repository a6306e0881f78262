//! Pattern discovery scenarios over the scripted pack backend.

use std::collections::BTreeMap;

use dbsunset_common::{RepoRef, SourceType};
use dbsunset_core::classifier::SourceTypeClassifier;
use dbsunset_core::patterns::PatternDiscoveryEngine;
use dbsunset_core::testing::{MockRepo, MockRepomixBackend};
use mcp_client::PackClient;

fn engine() -> PatternDiscoveryEngine {
    PatternDiscoveryEngine::new(SourceTypeClassifier::shared())
}

fn pack_client(files: BTreeMap<String, String>) -> PackClient {
    PackClient::new(MockRepomixBackend::new(MockRepo::new(files)))
}

fn repo() -> RepoRef {
    RepoRef::parse("https://github.com/acme/legacy-service").unwrap()
}

#[tokio::test]
async fn sql_create_database_is_discovered_with_high_confidence() {
    let mut files = BTreeMap::new();
    files.insert(
        "db/schema.sql".to_string(),
        "CREATE DATABASE periodic_table;\nCREATE TABLE elements (id int);\n".to_string(),
    );
    files.insert(
        "src/unrelated.py".to_string(),
        "print('nothing to see')\n".to_string(),
    );

    let outcome = engine()
        .discover(&pack_client(files), "periodic_table", &repo())
        .await
        .unwrap();

    let result = &outcome.result;
    assert_eq!(result.files.len(), 1);
    let file = &result.files[0];
    assert_eq!(file.path, "db/schema.sql");
    assert_eq!(file.source_type, SourceType::Sql);
    assert!(file.confidence >= 0.8);
    assert!(!file.pattern_matches.is_empty());
    assert!(file
        .pattern_matches
        .iter()
        .any(|m| m.line_content.contains("CREATE DATABASE periodic_table")));
    assert_eq!(result.confidence_distribution.high, 1);
    assert_eq!(outcome.contents["db/schema.sql"].lines().count(), 2);
}

#[tokio::test]
async fn yaml_database_entry_is_classified_as_config() {
    let mut files = BTreeMap::new();
    files.insert(
        "config/database.yml".to_string(),
        "production:\n  database: postgres_air\n  host: db.internal\n".to_string(),
    );

    let outcome = engine()
        .discover(&pack_client(files), "postgres_air", &repo())
        .await
        .unwrap();

    let result = &outcome.result;
    assert_eq!(result.files.len(), 1);
    assert_eq!(result.files[0].source_type, SourceType::Config);
    assert!(result.files_by_type.contains_key(&SourceType::Config));
}

#[tokio::test]
async fn empty_repository_is_not_an_error() {
    let outcome = engine()
        .discover(&pack_client(BTreeMap::new()), "orders", &repo())
        .await
        .unwrap();

    assert_eq!(outcome.result.total_files_scanned, 0);
    assert!(outcome.result.files.is_empty());
    assert!(outcome.result.files_by_type.is_empty());
}

#[tokio::test]
async fn repository_without_references_yields_no_matches() {
    let mut files = BTreeMap::new();
    files.insert(
        "src/main.py".to_string(),
        "print('hello')\n".to_string(),
    );

    let outcome = engine()
        .discover(&pack_client(files), "orders", &repo())
        .await
        .unwrap();

    assert_eq!(outcome.result.total_files_scanned, 1);
    assert!(outcome.result.files.is_empty());
}

#[tokio::test]
async fn hyphenated_database_names_match_all_variants() {
    let mut files = BTreeMap::new();
    files.insert(
        "app/settings.py".to_string(),
        "DB_PRIMARY = \"USER_DATA\"\n".to_string(),
    );
    files.insert(
        ".env".to_string(),
        "DATABASE=user-data\n".to_string(),
    );

    let outcome = engine()
        .discover(&pack_client(files), "user-data", &repo())
        .await
        .unwrap();

    let paths: Vec<&str> = outcome.result.files.iter().map(|f| f.path.as_str()).collect();
    assert!(paths.contains(&"app/settings.py"), "matched: {paths:?}");
    assert!(paths.contains(&".env"), "matched: {paths:?}");
}

#[tokio::test]
async fn comment_only_references_are_rejected() {
    let mut files = BTreeMap::new();
    files.insert(
        "db/old.sql".to_string(),
        "-- orders used to live here\n-- DROP DATABASE orders;\nSELECT 1;\n".to_string(),
    );
    files.insert(
        "db/live.sql".to_string(),
        "USE orders;\n".to_string(),
    );

    let outcome = engine()
        .discover(&pack_client(files), "orders", &repo())
        .await
        .unwrap();

    let paths: Vec<&str> = outcome.result.files.iter().map(|f| f.path.as_str()).collect();
    assert_eq!(paths, vec!["db/live.sql"]);
}

#[tokio::test]
async fn grouping_and_distribution_stay_consistent() {
    let mut files = BTreeMap::new();
    files.insert(
        "db/schema.sql".to_string(),
        "CREATE DATABASE orders;\n".to_string(),
    );
    files.insert(
        "config/app.yml".to_string(),
        "database: orders\n".to_string(),
    );
    files.insert(
        "scripts/backup.sh".to_string(),
        "#!/bin/bash\npg_dump orders > backup.sql\n".to_string(),
    );

    let outcome = engine()
        .discover(&pack_client(files), "orders", &repo())
        .await
        .unwrap();

    let result = &outcome.result;
    let grouped: usize = result.files_by_type.values().map(|v| v.len()).sum();
    assert_eq!(grouped, result.files.len());

    let dist = &result.confidence_distribution;
    assert_eq!(dist.high + dist.medium + dist.low, result.files.len());
    for file in &result.files {
        assert!(!file.pattern_matches.is_empty());
        assert!(file.confidence >= 0.0 && file.confidence <= 1.0);
    }
}

#[tokio::test]
async fn duplicate_hits_merge_into_one_file_match() {
    let mut files = BTreeMap::new();
    // Matches the literal pass, the type-filtered pass, and the semantic
    // CREATE DATABASE pass; all must merge into a single FileMatch.
    files.insert(
        "db/schema.sql".to_string(),
        "CREATE DATABASE orders;\nUSE orders;\n".to_string(),
    );

    let outcome = engine()
        .discover(&pack_client(files), "orders", &repo())
        .await
        .unwrap();

    assert_eq!(outcome.result.files.len(), 1);
    let file = &outcome.result.files[0];
    assert_eq!(file.match_count, file.pattern_matches.len());

    // Deduplicated by (pattern, line).
    let mut seen = std::collections::HashSet::new();
    for m in &file.pattern_matches {
        assert!(seen.insert((m.pattern.clone(), m.line_number)));
    }
}

//! Contextual rules engine: deterministic edits keyed on source type and
//! detected frameworks.

mod catalog;

use std::collections::BTreeMap;

use regex::Regex;
use tracing::debug;

use dbsunset_common::{
    ClassificationResult, CommentStyle, FileProcessingResult, Rule, RuleAction, RuleResult,
    SourceType,
};

/// Line prefixes that already mark a comment; such lines are never
/// commented again.
const COMMENT_PREFIXES: &[&str] = &["#", "//", "/*", "*", "--"];

const DEPRECATION_TOKEN: &str = "DEPRECATED:";

/// A rule with its patterns substituted for one database and compiled once.
/// Rules whose patterns fail to compile stay in the list so their failure is
/// reported per file, without stopping the others.
pub struct CompiledRule {
    pub rule: Rule,
    regexes: Vec<Regex>,
    compile_errors: Vec<String>,
}

impl CompiledRule {
    fn matches_line(&self, line: &str) -> bool {
        self.regexes.iter().any(|r| r.is_match(line))
    }
}

pub struct ContextualRulesEngine {
    database_name: String,
    compiled: BTreeMap<SourceType, Vec<CompiledRule>>,
}

impl ContextualRulesEngine {
    /// Build the engine for one database: substitute `{{TARGET_DB}}` with
    /// the regex-escaped name and compile every pattern up front.
    pub fn new(database_name: &str) -> Self {
        Self::with_rules(database_name, catalog::builtin_rules())
    }

    pub fn with_rules(database_name: &str, rules: BTreeMap<SourceType, Vec<Rule>>) -> Self {
        let escaped = regex::escape(database_name);
        let compiled = rules
            .into_iter()
            .map(|(source_type, rules)| {
                let compiled_rules = rules
                    .into_iter()
                    .map(|rule| {
                        let mut regexes = Vec::new();
                        let mut compile_errors = Vec::new();
                        for pattern in &rule.patterns {
                            let substituted = pattern.replace("{{TARGET_DB}}", &escaped);
                            match Regex::new(&format!("(?i){substituted}")) {
                                Ok(regex) => regexes.push(regex),
                                Err(e) => compile_errors
                                    .push(format!("pattern '{pattern}' failed to compile: {e}")),
                            }
                        }
                        CompiledRule {
                            rule,
                            regexes,
                            compile_errors,
                        }
                    })
                    .collect();
                (source_type, compiled_rules)
            })
            .collect();

        Self {
            database_name: database_name.to_string(),
            compiled,
        }
    }

    pub fn database_name(&self) -> &str {
        &self.database_name
    }

    /// Rules applicable to `(source_type, frameworks)`: a rule is selected
    /// when its framework requirements are empty or intersect the detected
    /// set. Order is catalog insertion order; every selected rule runs.
    pub fn rules_for(&self, source_type: SourceType, frameworks: &[String]) -> Vec<&CompiledRule> {
        self.compiled
            .get(&source_type)
            .map(|rules| {
                rules
                    .iter()
                    .filter(|c| {
                        c.rule.required_frameworks.is_empty()
                            || c.rule
                                .required_frameworks
                                .iter()
                                .any(|f| frameworks.contains(f))
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Plain rule records for the same selection, used as background
    /// context in agent prompts.
    pub fn rule_definitions_for(
        &self,
        source_type: SourceType,
        frameworks: &[String],
    ) -> Vec<&Rule> {
        self.rules_for(source_type, frameworks)
            .into_iter()
            .map(|c| &c.rule)
            .collect()
    }

    /// Apply every selected rule to the file, feeding each rule the output
    /// of the previous one. A failing rule is recorded and the rest
    /// continue.
    pub fn process_file(
        &self,
        path: &str,
        content: &str,
        classification: &ClassificationResult,
    ) -> FileProcessingResult {
        let rules = self.rules_for(
            classification.source_type,
            &classification.detected_frameworks,
        );

        let mut current = content.to_string();
        let mut rule_results = Vec::new();
        let mut total_changes = 0;

        for compiled in rules {
            let (result, modified) = self.apply_rule(compiled, &current);
            total_changes += result.changes_made;
            rule_results.push(result);
            if let Some(modified) = modified {
                current = modified;
            }
        }

        debug!(
            path,
            source_type = %classification.source_type,
            changes = total_changes,
            "Rules applied"
        );

        FileProcessingResult {
            file_path: path.to_string(),
            source_type: classification.source_type,
            rules_applied: rule_results,
            total_changes,
            success: true,
            error: None,
            modified_content: (total_changes > 0).then_some(current),
        }
    }

    fn apply_rule(&self, compiled: &CompiledRule, content: &str) -> (RuleResult, Option<String>) {
        if !compiled.compile_errors.is_empty() {
            return (
                RuleResult {
                    rule_id: compiled.rule.id.clone(),
                    applied: false,
                    changes_made: 0,
                    warnings: Vec::new(),
                    errors: compiled.compile_errors.clone(),
                },
                None,
            );
        }

        let (modified, changes) = match compiled.rule.action {
            RuleAction::CommentOut => comment_out(content, compiled, compiled.rule.comment_style),
            RuleAction::AddDeprecationNotice => add_deprecation_notice(
                content,
                compiled,
                compiled.rule.comment_style,
                &self.database_name,
            ),
            RuleAction::RemoveMatchingLines => remove_matching_lines(content, compiled),
        };

        (
            RuleResult {
                rule_id: compiled.rule.id.clone(),
                applied: changes > 0,
                changes_made: changes,
                warnings: Vec::new(),
                errors: Vec::new(),
            },
            (changes > 0).then_some(modified),
        )
    }
}

fn is_comment_line(line: &str) -> bool {
    let stripped = line.trim_start();
    COMMENT_PREFIXES.iter().any(|p| stripped.starts_with(p))
}

/// Comment prefix when the rule does not declare one: SQL-like statements
/// end in a semicolon, everything else gets a hash.
fn heuristic_prefix(line: &str) -> &'static str {
    if line.trim_end().ends_with(';') {
        CommentStyle::DoubleDash.prefix()
    } else {
        CommentStyle::Hash.prefix()
    }
}

fn prefix_for(style: Option<CommentStyle>, line: &str) -> &'static str {
    match style {
        Some(style) => style.prefix(),
        None => heuristic_prefix(line),
    }
}

fn comment_out(
    content: &str,
    compiled: &CompiledRule,
    style: Option<CommentStyle>,
) -> (String, usize) {
    let mut out = Vec::new();
    let mut changes = 0;

    for line in content.lines() {
        if compiled.matches_line(line) && !is_comment_line(line) {
            out.push(format!("{} {line}", prefix_for(style, line)));
            changes += 1;
        } else {
            out.push(line.to_string());
        }
    }

    (rejoin(content, out), changes)
}

fn add_deprecation_notice(
    content: &str,
    compiled: &CompiledRule,
    style: Option<CommentStyle>,
    database_name: &str,
) -> (String, usize) {
    let lines: Vec<&str> = content.lines().collect();
    let mut out = Vec::new();
    let mut changes = 0;
    let mut prev_matched = false;

    for (i, line) in lines.iter().enumerate() {
        let matched = compiled.matches_line(line);
        if matched && !prev_matched {
            // Start of a contiguous match region. One notice per region;
            // never a second one for a region that already carries it.
            let already_noticed = line.contains(DEPRECATION_TOKEN)
                || (i > 0 && lines[i - 1].contains(DEPRECATION_TOKEN));
            if !already_noticed {
                let prefix = prefix_for(style, line);
                out.push(notice_line(prefix, database_name, line));
                changes += 1;
            }
        }
        out.push((*line).to_string());
        prev_matched = matched;
    }

    (rejoin(content, out), changes)
}

fn notice_line(prefix: &str, database_name: &str, line: &str) -> String {
    let lower = line.to_lowercase();
    let base = format!("{prefix} {DEPRECATION_TOKEN} {database_name} database has been decommissioned");
    if ["test", "example", "demo", "sample"]
        .iter()
        .any(|kw| lower.contains(kw))
    {
        format!("{base} - update test/example data")
    } else {
        base
    }
}

fn remove_matching_lines(content: &str, compiled: &CompiledRule) -> (String, usize) {
    let mut out = Vec::new();
    let mut changes = 0;

    for line in content.lines() {
        if compiled.matches_line(line) {
            changes += 1;
        } else {
            out.push(line.to_string());
        }
    }

    (rejoin(content, out), changes)
}

/// Reassemble lines, preserving a trailing newline if the input had one.
fn rejoin(original: &str, lines: Vec<String>) -> String {
    let mut joined = lines.join("\n");
    if original.ends_with('\n') {
        joined.push('\n');
    }
    joined
}

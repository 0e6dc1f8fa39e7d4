//! Grammar Linter: validates the prose grammar the local synthesizer expands.
//!
//! Usage: grammar_linter [grammar.ron ...]
//!
//! Several files are merged in order, later rules overriding earlier ones.
//! Without a path the bundled grammar is checked.
use clap::Parser;
use std::path::PathBuf;
use std::process;

use novel_engine::core::backend::synth::{BOUND_FIELDS, ENTRY_RULES};
use novel_engine::core::grammar::{GrammarSet, TemplateSegment};
use novel_engine::genre_templates::GenreLibrary;

const KNOWN_CORPORA: &[&str] = &["research"];
const MIN_ALTERNATIVES: usize = 3;

#[derive(Debug, Parser)]
#[command(name = "grammar_linter", about = "Check a prose grammar for gaps")]
struct Args {
    /// Grammar RON files; the bundled prose grammar when omitted.
    grammars: Vec<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let grammar = if args.grammars.is_empty() {
        GenreLibrary::load()?.grammar().clone()
    } else {
        let mut merged = GrammarSet::default();
        for path in &args.grammars {
            merged.merge(GrammarSet::load_from_ron(path)?);
            println!("  Loaded: {}", path.display());
        }
        merged
    };
    println!("Loaded {} grammar rules", grammar.rules.len());

    let (errors, warnings) = lint(&grammar);

    println!("\n=== Grammar Lint Report ===\n");
    if errors.is_empty() && warnings.is_empty() {
        println!("All checks passed!");
    }
    for warning in &warnings {
        println!("WARNING: {warning}");
    }
    for error in &errors {
        println!("ERROR: {error}");
    }
    println!("\nSummary: {} errors, {} warnings", errors.len(), warnings.len());

    if !errors.is_empty() {
        process::exit(1);
    }
    Ok(())
}

fn lint(grammar: &GrammarSet) -> (Vec<String>, Vec<String>) {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    for entry in ENTRY_RULES {
        if !grammar.has_rule(entry) {
            errors.push(format!("Entry rule '{entry}' is missing"));
        }
    }

    for (rule, target) in grammar.dangling_refs() {
        errors.push(format!("Rule '{rule}' references non-existent rule '{target}'"));
    }

    for (name, rule) in &grammar.rules {
        // Variants (`name#variant`) are allowed to be narrow.
        if !name.contains('#') && rule.alternatives.len() < MIN_ALTERNATIVES {
            warnings.push(format!(
                "Rule '{name}' has only {} alternatives (minimum {MIN_ALTERNATIVES} recommended)",
                rule.alternatives.len()
            ));
        }

        let base = name.split('#').next().unwrap_or(name);
        let all_self_ref = !rule.alternatives.is_empty()
            && rule.alternatives.iter().all(|a| {
                a.template
                    .segments
                    .iter()
                    .any(|s| matches!(s, TemplateSegment::RuleRef(r) if r == base))
            });
        if all_self_ref {
            errors.push(format!("Rule '{name}' has no non-recursive alternative"));
        }

        for alt in &rule.alternatives {
            for segment in &alt.template.segments {
                match segment {
                    TemplateSegment::Field { binding, field, .. } => {
                        // Expansion fails on any field the synthesizer never binds.
                        let key = format!("{binding}.{field}");
                        if !BOUND_FIELDS.contains(&key.as_str()) {
                            errors.push(format!("Rule '{name}' uses unbound field '{key}'"));
                        }
                    }
                    TemplateSegment::MarkovRef { corpus, .. } => {
                        if !KNOWN_CORPORA.contains(&corpus.as_str()) {
                            warnings.push(format!("Rule '{name}' references unknown Markov corpus '{corpus}'"));
                        }
                    }
                    _ => {}
                }
            }
        }
    }

    (errors, warnings)
}

//! Stochastic grammar runtime: template parsing, RON loading, and
//! tag-driven expansion.
//!
//! A rule name may carry variants written `name#variant`. Expanding `name`
//! considers the base rule and all of its variants, keeps those whose
//! `requires`/`excludes` tags match the context, and draws from the most
//! specific (largest `requires`) group.

use rand::distributions::WeightedIndex;
use rand::prelude::Distribution;
use rand::rngs::StdRng;
use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;

use crate::core::markov::{MarkovError, MarkovModel};
use crate::schema::character::Pronouns;

/// Nested rule references deeper than this abort the expansion.
pub const MAX_DEPTH: usize = 16;

#[derive(Debug, Error)]
pub enum GrammarError {
    #[error("template parse error: {0}")]
    TemplateParse(String),
    #[error("rule not found: {0}")]
    RuleNotFound(String),
    #[error("no alternative of rule '{0}' matches the current tags")]
    NoEligibleAlternative(String),
    #[error("field '{0}' is not bound")]
    UnboundField(String),
    #[error("pronoun reference with no pronouns bound")]
    UnboundPronoun,
    #[error("markov corpus '{0}' is not loaded")]
    MissingCorpus(String),
    #[error("expansion exceeded depth {MAX_DEPTH} at rule '{0}'")]
    RecursionLimit(String),
    #[error("markov error: {0}")]
    Markov(#[from] MarkovError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("RON deserialization error: {0}")]
    Ron(#[from] ron::error::SpannedError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PronounForm {
    Subject,
    Object,
    Possessive,
    Reflexive,
}

/// A segment of a parsed template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TemplateSegment {
    /// Literal text, emitted as-is.
    Literal(String),
    /// Reference to another grammar rule: `{rule_name}`.
    RuleRef(String),
    /// Reference to a Markov generator: `{markov:corpus:tag}`. Tag `any` means untagged.
    MarkovRef { corpus: String, tag: Option<String> },
    /// Bound field interpolation: `{pov.name}`. `{Pov.name}` capitalises the value.
    Field {
        binding: String,
        field: String,
        capitalize: bool,
    },
    /// Pronoun of the point-of-view character: `{subject}`, `{Possessive}`, ...
    PronounRef { form: PronounForm, capitalize: bool },
}

/// A parsed template — a sequence of segments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Template {
    pub segments: Vec<TemplateSegment>,
}

impl Template {
    /// Parse a template string into a sequence of segments.
    ///
    /// Syntax:
    /// - `{rule_name}` → `RuleRef`
    /// - `{markov:corpus:tag}` → `MarkovRef`
    /// - `{binding.field}` → `Field`
    /// - `{subject}` / `{object}` / `{possessive}` / `{reflexive}` → `PronounRef`
    /// - `{{` and `}}` → literal braces
    pub fn parse(input: &str) -> Result<Template, GrammarError> {
        let mut segments = Vec::new();
        let mut literal_buf = String::new();
        let chars: Vec<char> = input.chars().collect();
        let len = chars.len();
        let mut i = 0;

        while i < len {
            match chars[i] {
                '{' if i + 1 < len && chars[i + 1] == '{' => {
                    literal_buf.push('{');
                    i += 2;
                }
                '{' => {
                    if !literal_buf.is_empty() {
                        segments.push(TemplateSegment::Literal(std::mem::take(&mut literal_buf)));
                    }
                    let start = i + 1;
                    let mut end = start;
                    while end < len && chars[end] != '}' {
                        if chars[end] == '{' {
                            return Err(GrammarError::TemplateParse(
                                "nested braces are not allowed".to_string(),
                            ));
                        }
                        end += 1;
                    }
                    if end == len {
                        return Err(GrammarError::TemplateParse("unclosed brace".to_string()));
                    }
                    let content: String = chars[start..end].iter().collect();
                    if content.trim().is_empty() {
                        return Err(GrammarError::TemplateParse("empty braces".to_string()));
                    }
                    segments.push(Self::parse_segment(content.trim())?);
                    i = end + 1;
                }
                '}' if i + 1 < len && chars[i + 1] == '}' => {
                    literal_buf.push('}');
                    i += 2;
                }
                '}' => {
                    return Err(GrammarError::TemplateParse(
                        "unmatched closing brace".to_string(),
                    ));
                }
                c => {
                    literal_buf.push(c);
                    i += 1;
                }
            }
        }

        if !literal_buf.is_empty() {
            segments.push(TemplateSegment::Literal(literal_buf));
        }

        Ok(Template { segments })
    }

    fn parse_segment(content: &str) -> Result<TemplateSegment, GrammarError> {
        let lowered = content.to_lowercase();
        let capitalize = content.chars().next().is_some_and(char::is_uppercase);

        let form = match lowered.as_str() {
            "subject" => Some(PronounForm::Subject),
            "object" => Some(PronounForm::Object),
            "possessive" => Some(PronounForm::Possessive),
            "reflexive" => Some(PronounForm::Reflexive),
            _ => None,
        };
        if let Some(form) = form {
            return Ok(TemplateSegment::PronounRef { form, capitalize });
        }

        if let Some(rest) = content.strip_prefix("markov:") {
            return match rest.split_once(':') {
                Some((corpus, tag)) if !corpus.is_empty() && !tag.is_empty() => {
                    Ok(TemplateSegment::MarkovRef {
                        corpus: corpus.to_string(),
                        tag: (tag != "any").then(|| tag.to_string()),
                    })
                }
                _ => Err(GrammarError::TemplateParse(format!(
                    "invalid markov ref '{content}': expected markov:corpus:tag"
                ))),
            };
        }

        if let Some((binding, field)) = content.split_once('.') {
            if binding.is_empty() || field.is_empty() {
                return Err(GrammarError::TemplateParse(format!(
                    "invalid field reference '{content}'"
                )));
            }
            return Ok(TemplateSegment::Field {
                binding: binding.to_lowercase(),
                field: field.to_string(),
                capitalize,
            });
        }

        Ok(TemplateSegment::RuleRef(content.to_string()))
    }
}

/// A weighted text alternative within a grammar rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alternative {
    pub weight: u32,
    pub template: Template,
}

/// A single grammar rule with tag preconditions and weighted alternatives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GrammarRule {
    pub name: String,
    pub requires: Vec<String>,
    pub excludes: Vec<String>,
    pub alternatives: Vec<Alternative>,
}

impl GrammarRule {
    fn eligible(&self, tags: &FxHashSet<String>) -> bool {
        self.requires.iter().all(|t| tags.contains(t))
            && !self.excludes.iter().any(|t| tags.contains(t))
    }
}

/// Everything an expansion may read: active tags, bound fields, the
/// POV character's pronouns, and trained Markov corpora.
#[derive(Debug, Default)]
pub struct SelectionContext<'a> {
    pub tags: FxHashSet<String>,
    /// Keyed `binding.field`, e.g. `pov.name`.
    pub fields: FxHashMap<String, String>,
    pub pronouns: Option<Pronouns>,
    pub markov_models: FxHashMap<String, &'a MarkovModel>,
}

impl<'a> SelectionContext<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tag(&mut self, tag: impl Into<String>) -> &mut Self {
        self.tags.insert(tag.into());
        self
    }

    pub fn bind(&mut self, binding: &str, field: &str, value: impl Into<String>) -> &mut Self {
        self.fields.insert(format!("{binding}.{field}"), value.into());
        self
    }
}

/// A set of named grammar rules.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct GrammarSet {
    pub rules: BTreeMap<String, GrammarRule>,
}

// The RON format is a map of name -> Rule(...) with plain-text alternatives.

#[derive(Debug, Deserialize)]
struct RonAlternative {
    weight: u32,
    text: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename = "Rule")]
struct RonRule {
    #[serde(default)]
    requires: Vec<String>,
    #[serde(default)]
    excludes: Vec<String>,
    alternatives: Vec<RonAlternative>,
}

impl GrammarSet {
    /// Load a grammar set from a RON file.
    pub fn load_from_ron(path: &Path) -> Result<GrammarSet, GrammarError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse_ron(&contents)
    }

    /// Parse a grammar set from a RON string.
    pub fn parse_ron(input: &str) -> Result<GrammarSet, GrammarError> {
        let raw: BTreeMap<String, RonRule> = ron::from_str(input)?;
        let mut rules = BTreeMap::new();

        for (name, ron_rule) in raw {
            let alternatives = ron_rule
                .alternatives
                .into_iter()
                .map(|alt| {
                    Ok(Alternative {
                        weight: alt.weight,
                        template: Template::parse(&alt.text)?,
                    })
                })
                .collect::<Result<Vec<_>, GrammarError>>()?;
            rules.insert(
                name.clone(),
                GrammarRule {
                    name,
                    requires: ron_rule.requires,
                    excludes: ron_rule.excludes,
                    alternatives,
                },
            );
        }

        Ok(GrammarSet { rules })
    }

    /// Merge another grammar set into this one. Rules from `other`
    /// override rules in `self` with the same name.
    pub fn merge(&mut self, other: GrammarSet) {
        self.rules.extend(other.rules);
    }

    /// True if `name` or any `name#variant` rule exists.
    pub fn has_rule(&self, name: &str) -> bool {
        self.family(name).next().is_some()
    }

    /// Rule references that no rule (or variant family) satisfies.
    pub fn dangling_refs(&self) -> Vec<(String, String)> {
        let mut out = Vec::new();
        for (name, rule) in &self.rules {
            for alt in &rule.alternatives {
                for seg in &alt.template.segments {
                    if let TemplateSegment::RuleRef(target) = seg {
                        if !self.has_rule(target) {
                            out.push((name.clone(), target.clone()));
                        }
                    }
                }
            }
        }
        out
    }

    /// Expand the rule `name` against the context.
    pub fn expand(
        &self,
        name: &str,
        ctx: &SelectionContext<'_>,
        rng: &mut StdRng,
    ) -> Result<String, GrammarError> {
        let mut out = String::new();
        self.expand_into(name, ctx, rng, 0, &mut out)?;
        Ok(out)
    }

    fn family<'s>(&'s self, name: &'s str) -> impl Iterator<Item = &'s GrammarRule> + 's {
        self.rules
            .range::<str, _>((std::ops::Bound::Included(name), std::ops::Bound::Unbounded))
            .take_while(move |(k, _)| k.starts_with(name))
            .filter(move |(k, _)| {
                k.len() == name.len() || k.as_bytes().get(name.len()) == Some(&b'#')
            })
            .map(|(_, rule)| rule)
    }

    fn expand_into(
        &self,
        name: &str,
        ctx: &SelectionContext<'_>,
        rng: &mut StdRng,
        depth: usize,
        out: &mut String,
    ) -> Result<(), GrammarError> {
        if depth >= MAX_DEPTH {
            return Err(GrammarError::RecursionLimit(name.to_string()));
        }

        let family: Vec<&GrammarRule> = self.family(name).collect();
        if family.is_empty() {
            return Err(GrammarError::RuleNotFound(name.to_string()));
        }
        let eligible: Vec<&GrammarRule> = family
            .into_iter()
            .filter(|r| r.eligible(&ctx.tags))
            .collect();
        let specificity = eligible
            .iter()
            .map(|r| r.requires.len())
            .max()
            .ok_or_else(|| GrammarError::NoEligibleAlternative(name.to_string()))?;
        let alternatives: Vec<&Alternative> = eligible
            .iter()
            .filter(|r| r.requires.len() == specificity)
            .flat_map(|r| r.alternatives.iter())
            .filter(|a| a.weight > 0)
            .collect();

        let weights: Vec<u32> = alternatives.iter().map(|a| a.weight).collect();
        let dist = WeightedIndex::new(&weights)
            .map_err(|_| GrammarError::NoEligibleAlternative(name.to_string()))?;
        let chosen = alternatives[dist.sample(rng)];

        for seg in &chosen.template.segments {
            match seg {
                TemplateSegment::Literal(text) => out.push_str(text),
                TemplateSegment::RuleRef(rule) => {
                    self.expand_into(rule, ctx, rng, depth + 1, out)?
                }
                TemplateSegment::MarkovRef { corpus, tag } => {
                    let model = ctx
                        .markov_models
                        .get(corpus)
                        .ok_or_else(|| GrammarError::MissingCorpus(corpus.clone()))?;
                    out.push_str(&model.generate(rng, tag.as_deref(), 6, 28)?);
                }
                TemplateSegment::Field {
                    binding,
                    field,
                    capitalize,
                } => {
                    let key = format!("{binding}.{field}");
                    let value = ctx
                        .fields
                        .get(&key)
                        .ok_or(GrammarError::UnboundField(key))?;
                    push_cased(out, value, *capitalize);
                }
                TemplateSegment::PronounRef { form, capitalize } => {
                    let p = ctx.pronouns.ok_or(GrammarError::UnboundPronoun)?;
                    let word = match form {
                        PronounForm::Subject => p.subject(),
                        PronounForm::Object => p.object(),
                        PronounForm::Possessive => p.possessive(),
                        PronounForm::Reflexive => p.reflexive(),
                    };
                    push_cased(out, word, *capitalize);
                }
            }
        }
        Ok(())
    }
}

fn push_cased(out: &mut String, value: &str, capitalize: bool) {
    if capitalize {
        out.push_str(&capitalize_first(value));
    } else {
        out.push_str(value);
    }
}

pub fn capitalize_first(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) => c.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Collapse runs of whitespace and capitalise the opening letter.
pub fn tidy(text: &str) -> String {
    let joined = text.split_whitespace().collect::<Vec<_>>().join(" ");
    let fixed = joined
        .replace(" ,", ",")
        .replace(" .", ".")
        .replace("..", ".");
    capitalize_first(&fixed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    const SMALL: &str = r#"{
        "opening": Rule(
            requires: [],
            alternatives: [
                (weight: 1, text: "{Pov.name} woke in {world.place}."),
            ],
        ),
        "opening#tense": Rule(
            requires: ["tension:high"],
            alternatives: [
                (weight: 1, text: "{Subject} ran."),
            ],
        ),
        "opening#tense_night": Rule(
            requires: ["tension:high", "time:night"],
            excludes: ["pov:antagonist"],
            alternatives: [
                (weight: 1, text: "Under the dark, {subject} ran for {possessive} life."),
            ],
        ),
        "loop": Rule(
            requires: [],
            alternatives: [(weight: 1, text: "again {loop}")],
        ),
    }"#;

    fn ctx() -> SelectionContext<'static> {
        let mut ctx = SelectionContext::new();
        ctx.bind("pov", "name", "ada Vell").bind("world", "place", "the harbour");
        ctx.pronouns = Some(Pronouns::SheHer);
        ctx
    }

    #[test]
    fn parse_literal_only() {
        let t = Template::parse("Hello, world.").unwrap();
        assert_eq!(
            t.segments,
            vec![TemplateSegment::Literal("Hello, world.".to_string())]
        );
    }

    #[test]
    fn parse_markov_ref_with_any_tag() {
        let t = Template::parse("{markov:research:any}").unwrap();
        assert_eq!(
            t.segments[0],
            TemplateSegment::MarkovRef {
                corpus: "research".to_string(),
                tag: None,
            }
        );
        let t = Template::parse("{markov:research:tense}").unwrap();
        assert!(matches!(&t.segments[0], TemplateSegment::MarkovRef { tag: Some(t), .. } if t == "tense"));
    }

    #[test]
    fn parse_fields_and_pronouns() {
        let t = Template::parse("{Subject} met {other.name} and {possessive} rival.").unwrap();
        assert_eq!(
            t.segments[0],
            TemplateSegment::PronounRef {
                form: PronounForm::Subject,
                capitalize: true
            }
        );
        assert_eq!(
            t.segments[2],
            TemplateSegment::Field {
                binding: "other".to_string(),
                field: "name".to_string(),
                capitalize: false
            }
        );
        assert!(matches!(
            t.segments[4],
            TemplateSegment::PronounRef {
                form: PronounForm::Possessive,
                capitalize: false
            }
        ));
    }

    #[test]
    fn parse_errors() {
        assert!(Template::parse("Bad {} here").is_err());
        assert!(Template::parse("Bad {outer{inner}} here").is_err());
        assert!(Template::parse("Bad {unclosed here").is_err());
        assert!(Template::parse("Bad } here").is_err());
        assert!(Template::parse("{markov:only}").is_err());
        assert!(Template::parse("{.name}").is_err());
    }

    #[test]
    fn parse_escaped_braces() {
        let t = Template::parse("Use {{braces}} here.").unwrap();
        assert_eq!(
            t.segments,
            vec![TemplateSegment::Literal("Use {braces} here.".to_string())]
        );
    }

    #[test]
    fn expand_uses_base_rule_without_tags() {
        let gs = GrammarSet::parse_ron(SMALL).unwrap();
        let mut rng = StdRng::seed_from_u64(1);
        let text = gs.expand("opening", &ctx(), &mut rng).unwrap();
        assert_eq!(text, "Ada Vell woke in the harbour.");
    }

    #[test]
    fn expand_prefers_most_specific_variant() {
        let gs = GrammarSet::parse_ron(SMALL).unwrap();
        let mut c = ctx();
        c.tag("tension:high");
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(gs.expand("opening", &c, &mut rng).unwrap(), "She ran.");

        c.tag("time:night");
        assert_eq!(
            gs.expand("opening", &c, &mut rng).unwrap(),
            "Under the dark, she ran for her life."
        );

        c.tag("pov:antagonist");
        assert_eq!(gs.expand("opening", &c, &mut rng).unwrap(), "She ran.");
    }

    #[test]
    fn expand_errors() {
        let gs = GrammarSet::parse_ron(SMALL).unwrap();
        let mut rng = StdRng::seed_from_u64(1);
        assert!(matches!(
            gs.expand("missing", &ctx(), &mut rng),
            Err(GrammarError::RuleNotFound(_))
        ));
        assert!(matches!(
            gs.expand("loop", &ctx(), &mut rng),
            Err(GrammarError::RecursionLimit(_))
        ));
        assert!(matches!(
            gs.expand("opening", &SelectionContext::new(), &mut rng),
            Err(GrammarError::UnboundField(_))
        ));
    }

    #[test]
    fn family_does_not_capture_prefixed_names() {
        let ron = r#"{
            "scene": Rule(alternatives: [(weight: 1, text: "a")]),
            "scene_break": Rule(alternatives: [(weight: 1, text: "b")]),
        }"#;
        let gs = GrammarSet::parse_ron(ron).unwrap();
        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..10 {
            assert_eq!(gs.expand("scene", &SelectionContext::new(), &mut rng).unwrap(), "a");
        }
    }

    #[test]
    fn dangling_refs_reported() {
        let ron = r#"{
            "a": Rule(alternatives: [(weight: 1, text: "{b} and {c}")]),
            "b#x": Rule(requires: ["x"], alternatives: [(weight: 1, text: "b")]),
        }"#;
        let gs = GrammarSet::parse_ron(ron).unwrap();
        assert_eq!(gs.dangling_refs(), vec![("a".to_string(), "c".to_string())]);
    }

    #[test]
    fn load_test_grammar_from_ron() {
        let path = std::path::PathBuf::from("tests/fixtures/test_grammar.ron");
        let gs = GrammarSet::load_from_ron(&path).unwrap();
        assert_eq!(gs.rules.len(), 3);
        let greeting = &gs.rules["greeting"];
        assert_eq!(greeting.alternatives.len(), 3);
        assert!(greeting.requires.is_empty());
        assert_eq!(gs.rules["tense_observation"].requires, vec!["mood:tense".to_string()]);
    }

    #[test]
    fn merge_precedence() {
        let mut base = GrammarSet::parse_ron(
            r#"{
                "shared": Rule(alternatives: [(weight: 1, text: "base version")]),
                "base_only": Rule(alternatives: [(weight: 1, text: "only in base")]),
            }"#,
        )
        .unwrap();
        let over = GrammarSet::parse_ron(
            r#"{ "shared": Rule(requires: ["mood:tense"], alternatives: [(weight: 2, text: "override")]) }"#,
        )
        .unwrap();
        base.merge(over);
        assert_eq!(base.rules["shared"].alternatives[0].weight, 2);
        assert!(base.rules.contains_key("base_only"));
    }

    #[test]
    fn tidy_normalises_spacing() {
        assert_eq!(tidy("  the  rain ,  it fell .. "), "The rain, it fell.");
    }
}

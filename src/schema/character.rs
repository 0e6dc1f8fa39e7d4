use serde::{Deserialize, Serialize};
use std::fmt;

/// Newtype wrapper for character IDs. Unique within one cast.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CharacterId(pub u64);

impl fmt::Display for CharacterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "c{}", self.0)
    }
}

/// Pronoun set for a character, used by the grammar expansion system
/// to resolve `{possessive}` and other pronoun template references.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Pronouns {
    /// she/her/her/herself
    SheHer,
    /// he/him/his/himself
    HeHim,
    /// they/them/their/themselves
    TheyThem,
}

impl Default for Pronouns {
    fn default() -> Self {
        Self::TheyThem
    }
}

impl Pronouns {
    /// Nominative/subject form: "she", "he", "they".
    pub fn subject(&self) -> &'static str {
        match self {
            Self::SheHer => "she",
            Self::HeHim => "he",
            Self::TheyThem => "they",
        }
    }

    /// Accusative/object form: "her", "him", "them".
    pub fn object(&self) -> &'static str {
        match self {
            Self::SheHer => "her",
            Self::HeHim => "him",
            Self::TheyThem => "them",
        }
    }

    /// Possessive determiner: "her", "his", "their".
    pub fn possessive(&self) -> &'static str {
        match self {
            Self::SheHer => "her",
            Self::HeHim => "his",
            Self::TheyThem => "their",
        }
    }

    /// Reflexive: "herself", "himself", "themselves".
    pub fn reflexive(&self) -> &'static str {
        match self {
            Self::SheHer => "herself",
            Self::HeHim => "himself",
            Self::TheyThem => "themselves",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Protagonist,
    Antagonist,
    Supporting,
    Minor,
}

impl Role {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Protagonist => "protagonist",
            Self::Antagonist => "antagonist",
            Self::Supporting => "supporting",
            Self::Minor => "minor",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelationKind {
    Ally,
    Rival,
    Family,
    Romantic,
}

impl RelationKind {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Ally => "ally",
            Self::Rival => "rival",
            Self::Family => "family",
            Self::Romantic => "romantic",
        }
    }
}

/// A typed edge from the owning character to `target`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Relationship {
    pub target: CharacterId,
    pub kind: RelationKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Character {
    pub id: CharacterId,
    pub name: String,
    pub pronouns: Pronouns,
    pub role: Role,
    pub traits: Vec<String>,
    pub flaw: String,
    pub motivation: String,
    pub backstory: String,
    pub internal_conflict: String,
    pub arc: String,
    pub relationships: Vec<Relationship>,
}

impl Character {
    /// The given name, used for mention detection and informal prose.
    pub fn first_name(&self) -> &str {
        self.name.split_whitespace().next().unwrap_or(&self.name)
    }

    pub fn relation_to(&self, other: CharacterId) -> Option<RelationKind> {
        self.relationships
            .iter()
            .find(|r| r.target == other)
            .map(|r| r.kind)
    }
}

/// The full set of characters for one novel. Names are unique.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cast {
    pub characters: Vec<Character>,
}

impl Cast {
    pub fn get(&self, id: CharacterId) -> Option<&Character> {
        self.characters.iter().find(|c| c.id == id)
    }

    pub fn by_role(&self, role: Role) -> impl Iterator<Item = &Character> {
        self.characters.iter().filter(move |c| c.role == role)
    }

    pub fn protagonist(&self) -> Option<&Character> {
        self.by_role(Role::Protagonist).next()
    }

    pub fn count(&self, role: Role) -> usize {
        self.by_role(role).count()
    }

    pub fn contains_name(&self, name: &str) -> bool {
        self.characters.iter().any(|c| c.name == name)
    }

    /// Character profiles, as written to the companion artifact.
    pub fn render(&self) -> String {
        let mut out = vec!["CHARACTER PROFILES".to_string(), "=".repeat(60), String::new()];
        for c in &self.characters {
            out.push(format!("{} ({})", c.name.to_uppercase(), c.role));
            out.push("-".repeat(40));
            out.push(format!("Traits: {}", c.traits.join(", ")));
            out.push(format!("Flaw: {}", c.flaw));
            out.push(format!("Motivation: {}", c.motivation));
            out.push(format!("Backstory: {}", c.backstory));
            out.push(format!("Internal conflict: {}", c.internal_conflict));
            out.push(format!("Arc: {}", c.arc));
            if !c.relationships.is_empty() {
                let rels: Vec<String> = c
                    .relationships
                    .iter()
                    .filter_map(|r| {
                        self.get(r.target)
                            .map(|t| format!("{} ({})", t.name, r.kind.label()))
                    })
                    .collect();
                out.push(format!("Relationships: {}", rels.join(", ")));
            }
            out.push(String::new());
        }
        out.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_character(id: u64, name: &str, role: Role) -> Character {
        Character {
            id: CharacterId(id),
            name: name.to_string(),
            pronouns: Pronouns::SheHer,
            role,
            traits: vec!["observant".to_string()],
            flaw: "stubborn".to_string(),
            motivation: "to find the truth".to_string(),
            backstory: "grew up above a bookshop".to_string(),
            internal_conflict: "duty against desire".to_string(),
            arc: "learns to trust".to_string(),
            relationships: Vec::new(),
        }
    }

    #[test]
    fn first_name_splits_on_whitespace() {
        let c = make_character(1, "Margaret Thornfield", Role::Protagonist);
        assert_eq!(c.first_name(), "Margaret");
        let mono = make_character(2, "Ash", Role::Minor);
        assert_eq!(mono.first_name(), "Ash");
    }

    #[test]
    fn pronoun_forms() {
        assert_eq!(Pronouns::HeHim.possessive(), "his");
        assert_eq!(Pronouns::SheHer.object(), "her");
        assert_eq!(Pronouns::TheyThem.reflexive(), "themselves");
        assert_eq!(Pronouns::default(), Pronouns::TheyThem);
    }

    #[test]
    fn cast_lookup_by_role() {
        let mut a = make_character(1, "Margaret Thornfield", Role::Protagonist);
        let b = make_character(2, "Victor Crane", Role::Antagonist);
        a.relationships.push(Relationship {
            target: b.id,
            kind: RelationKind::Rival,
        });
        let cast = Cast {
            characters: vec![a, b],
        };
        assert_eq!(cast.protagonist().map(|c| c.id), Some(CharacterId(1)));
        assert_eq!(cast.count(Role::Antagonist), 1);
        assert_eq!(cast.count(Role::Supporting), 0);
        assert!(cast.contains_name("Victor Crane"));
        assert_eq!(
            cast.characters[0].relation_to(CharacterId(2)),
            Some(RelationKind::Rival)
        );
    }

    #[test]
    fn render_names_relationships() {
        let mut a = make_character(1, "Margaret Thornfield", Role::Protagonist);
        let b = make_character(2, "Victor Crane", Role::Antagonist);
        a.relationships.push(Relationship {
            target: b.id,
            kind: RelationKind::Rival,
        });
        let text = Cast {
            characters: vec![a, b],
        }
        .render();
        assert!(text.contains("MARGARET THORNFIELD (protagonist)"));
        assert!(text.contains("Relationships: Victor Crane (rival)"));
    }
}

//! Cast stage: sizes the cast to the novel, names every character uniquely
//! and wires symmetric relationships.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::Rng;
use rustc_hash::FxHashSet;

use crate::core::grammar::capitalize_first;
use crate::core::seed::rng_for;
use crate::genre_templates::{GenreLibrary, NameBank};
use crate::schema::character::{
    Cast, Character, CharacterId, Pronouns, RelationKind, Relationship, Role,
};
use crate::schema::genre::Genre;
use crate::schema::world::WorldModel;

/// Random draws before falling back to an ordered scan of the name bank.
const NAME_ATTEMPTS: usize = 64;

const TRAIT_FLAW_PAIRS: &[(&str, &str)] = &[
    ("courageous", "impulsive in ways that put others at risk"),
    ("intelligent", "arrogant about the limits of what they know"),
    ("compassionate", "naive about people who would exploit that kindness"),
    ("determined", "stubborn long after flexibility would serve better"),
    ("loyal", "blind to the faults of the people they have chosen"),
    ("resourceful", "secretive in ways that make real trust impossible"),
    ("empathetic", "so open to the pain of others that it paralyses them"),
    ("patient", "passive when something urgently needs doing"),
    ("honest", "blunt enough to wound without meaning to"),
    ("protective", "controlling of the very things they try to keep safe"),
    ("curious", "reckless in the pursuit of answers"),
    ("adaptable", "without a fixed centre that others can rely on"),
];

const SECONDARY_TRAITS: &[&str] = &[
    "dry-humoured", "watchful", "restless", "methodical", "warm", "guarded", "quick-tongued",
    "meticulous", "proud", "gentle", "sardonic", "earnest",
];

const BACKSTORIES: &[&str] = &[
    "grew up having to rely on no one but themselves",
    "lost someone irreplaceable young and has carried the absence ever since",
    "was once betrayed by a person they trusted completely",
    "spent years chasing a goal that turned out to be hollow",
    "carries a secret they have never told anyone",
    "was raised inside a system they have since come to doubt",
    "survived something that changed them in ways nobody else can see",
    "has always felt like an outsider, even among friends",
    "made a serious mistake long ago and is still paying for it",
    "was handed advantages others were denied and never decided what to do with them",
];

const MOTIVATIONS: &[&str] = &[
    "to protect the people closest to them, whatever it costs",
    "to prove they are more than anyone assumed",
    "to find the truth, even if it is not the truth they wanted",
    "to put right something that was done wrong",
    "to build something that will outlast them",
    "to find a place where belonging does not have to be earned",
    "to earn forgiveness, from someone else or from themselves",
    "to stop something terrible from happening again",
    "to understand why their life turned out the way it did",
    "to be truly known by at least one other person",
];

const INTERNAL_CONFLICTS: &[&str] = &[
    "the gap between what they feel and what they think they ought to feel",
    "a persistent doubt about whether they are as good as they want to be",
    "a habit of self-sabotage they can see but cannot stop",
    "the distance between their private self and the one they show the world",
    "an old loyalty at odds with a newer, clearer understanding",
    "the fear that they are repeating their parents' mistakes",
    "an ambition they have never allowed themselves to admit",
    "the suspicion that they do not deserve what they have been given",
];

const TWO_ANTAGONIST_GENRES: &[Genre] = &[
    Genre::Thriller,
    Genre::Mystery,
    Genre::Fantasy,
    Genre::Horror,
    Genre::SciFi,
    Genre::Adventure,
];

/// Character counts for a novel of `chapters` chapters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CastSize {
    pub antagonists: usize,
    pub supporting: usize,
    pub minor: usize,
}

impl CastSize {
    pub fn for_novel(genre: Genre, chapters: u32) -> Self {
        let n = chapters as usize;
        let antagonists = match genre {
            Genre::LiteraryFiction => 0,
            g if n >= 20 && TWO_ANTAGONIST_GENRES.contains(&g) => 2,
            _ => 1,
        };
        Self {
            antagonists,
            supporting: (n / 5).max(2),
            minor: (n / 8).max(2),
        }
    }

    pub fn total(&self) -> usize {
        1 + self.antagonists + self.supporting + self.minor
    }
}

pub struct CastBuilder<'a> {
    library: &'a GenreLibrary,
}

impl<'a> CastBuilder<'a> {
    pub fn new(library: &'a GenreLibrary) -> Self {
        Self { library }
    }

    pub fn build(&self, world: &WorldModel, chapters: u32, seed: u64) -> Cast {
        let genre = world.genre;
        let size = CastSize::for_novel(genre, chapters);
        let bank = self.library.names(genre);
        let mut rng = rng_for(seed, &["cast", genre.slug(), &world.title]);
        let mut names = NamePicker::new(bank);

        let roles = std::iter::once(Role::Protagonist)
            .chain(std::iter::repeat(Role::Antagonist).take(size.antagonists))
            .chain(std::iter::repeat(Role::Supporting).take(size.supporting))
            .chain(std::iter::repeat(Role::Minor).take(size.minor));

        let mut characters: Vec<Character> = roles
            .enumerate()
            .map(|(i, role)| {
                let (name, pronouns) = names.next(&mut rng);
                make_character(CharacterId(i as u64 + 1), name, pronouns, role, &mut rng)
            })
            .collect();

        wire_relationships(&mut characters, genre, &mut rng);

        tracing::info!(
            characters = characters.len(),
            antagonists = size.antagonists,
            supporting = size.supporting,
            minor = size.minor,
            "cast built"
        );
        Cast { characters }
    }
}

struct NamePicker<'b> {
    bank: &'b NameBank,
    used: FxHashSet<String>,
    used_first: FxHashSet<String>,
}

impl<'b> NamePicker<'b> {
    fn new(bank: &'b NameBank) -> Self {
        Self {
            bank,
            used: FxHashSet::default(),
            used_first: FxHashSet::default(),
        }
    }

    /// Resamples on collision, preferring unused given names; never fails.
    fn next(&mut self, rng: &mut StdRng) -> (String, Pronouns) {
        let bank = self.bank;
        for _ in 0..NAME_ATTEMPTS {
            let (Some((first, pronouns)), Some(last)) =
                (bank.first.choose(rng), bank.last.choose(rng))
            else {
                break;
            };
            let candidate = format!("{first} {last}");
            if !self.used.contains(&candidate) && !self.used_first.contains(first) {
                return self.claim(candidate, first, *pronouns);
            }
        }
        for (first, pronouns) in &bank.first {
            for last in &bank.last {
                let candidate = format!("{first} {last}");
                if !self.used.contains(&candidate) {
                    return self.claim(candidate, first, *pronouns);
                }
            }
        }
        // Only reachable when the bank is smaller than the cast.
        let mut k = self.used.len() + 1;
        loop {
            let candidate = format!("Stranger {k}");
            if !self.used.contains(&candidate) {
                return self.claim(candidate, "Stranger", Pronouns::TheyThem);
            }
            k += 1;
        }
    }

    fn claim(&mut self, name: String, first: &str, pronouns: Pronouns) -> (String, Pronouns) {
        self.used.insert(name.clone());
        self.used_first.insert(first.to_string());
        (name, pronouns)
    }
}

fn pick<R: Rng>(items: &[&str], rng: &mut R) -> String {
    items.choose(rng).map(|s| s.to_string()).unwrap_or_default()
}

fn make_character(
    id: CharacterId,
    name: String,
    pronouns: Pronouns,
    role: Role,
    rng: &mut StdRng,
) -> Character {
    let (main_trait, flaw) = TRAIT_FLAW_PAIRS
        .choose(rng)
        .copied()
        .unwrap_or(("observant", "distracted"));
    let mut traits = vec![main_trait.to_string()];
    traits.push(pick(SECONDARY_TRAITS, rng));
    let backstory = pick(BACKSTORIES, rng);
    let motivation = pick(MOTIVATIONS, rng);
    let internal_conflict = pick(INTERNAL_CONFLICTS, rng);

    let arc = match role {
        Role::Protagonist => format!(
            "{name} starts out as someone who {backstory}. The need {motivation} drives \
             {} forward even as the cost grows, until {} must face {internal_conflict} \
             and becomes capable of finishing what {} began.",
            pronouns.object(),
            pronouns.subject(),
            pronouns.subject(),
        ),
        Role::Antagonist => format!(
            "{name} is the shadow of what the protagonist fears becoming. The drive \
             {motivation} mirrors the protagonist's own, but the methods do not. The arc \
             ends in transformation or in a defeat that shows what the protagonist chose \
             differently."
        ),
        Role::Supporting | Role::Minor => format!(
            "{name} enters as a {role} character with a life beyond the plot, driven \
             {motivation}. {} path crosses the protagonist's at the turning points.",
            capitalize_first(pronouns.possessive()),
        ),
    };

    Character {
        id,
        name,
        pronouns,
        role,
        traits,
        flaw: flaw.to_string(),
        motivation,
        backstory,
        internal_conflict,
        arc,
        relationships: Vec::new(),
    }
}

/// Adds `kind` in both directions, ignoring pairs already related.
fn link(characters: &mut [Character], a: CharacterId, b: CharacterId, kind: RelationKind) {
    if a == b {
        return;
    }
    let related = characters
        .iter()
        .find(|c| c.id == a)
        .is_some_and(|c| c.relation_to(b).is_some());
    if related {
        return;
    }
    for (from, to) in [(a, b), (b, a)] {
        if let Some(c) = characters.iter_mut().find(|c| c.id == from) {
            c.relationships.push(Relationship { target: to, kind });
        }
    }
}

fn ids_of(characters: &[Character], role: Role) -> Vec<CharacterId> {
    characters
        .iter()
        .filter(|c| c.role == role)
        .map(|c| c.id)
        .collect()
}

fn wire_relationships(characters: &mut [Character], genre: Genre, rng: &mut StdRng) {
    let Some(hero) = ids_of(characters, Role::Protagonist).first().copied() else {
        return;
    };
    let antagonists = ids_of(characters, Role::Antagonist);
    let supporting = ids_of(characters, Role::Supporting);
    let minors = ids_of(characters, Role::Minor);

    for &villain in &antagonists {
        link(characters, hero, villain, RelationKind::Rival);
    }
    if let [first, second, ..] = antagonists[..] {
        link(characters, first, second, RelationKind::Ally);
    }

    let family_at = if rng.gen_bool(0.5) {
        supporting.len().checked_sub(1).filter(|&i| i > 0)
    } else {
        None
    };
    for (i, &friend) in supporting.iter().enumerate() {
        let kind = match (genre, i) {
            (Genre::Romance, 0) => RelationKind::Romantic,
            _ if Some(i) == family_at => RelationKind::Family,
            _ => RelationKind::Ally,
        };
        link(characters, hero, friend, kind);
    }

    for (i, &minor) in minors.iter().enumerate() {
        if let Some(&friend) = supporting.get(i % supporting.len().max(1)) {
            link(characters, minor, friend, RelationKind::Ally);
        }
    }
}

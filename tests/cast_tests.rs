use std::collections::BTreeSet;

use novel_engine::core::cast::{CastBuilder, CastSize};
use novel_engine::core::research::{OfflineProvider, ResearchBriefBuilder};
use novel_engine::core::world::WorldBuilder;
use novel_engine::genre_templates::GenreLibrary;
use novel_engine::schema::character::{Cast, Role};
use novel_engine::schema::genre::Genre;
use proptest::prelude::*;

fn cast_for(lib: &GenreLibrary, genre: Genre, chapters: u32, seed: u64) -> Cast {
    let idea = "A bell-founder's apprentice hears the bells speak";
    let brief = ResearchBriefBuilder::new(&OfflineProvider, lib).build(idea, genre);
    let world = WorldBuilder::new(lib).build(idea, &brief, seed);
    CastBuilder::new(lib).build(&world, chapters, seed)
}

fn genre_strategy() -> impl Strategy<Value = Genre> {
    prop::sample::select(Genre::ALL.to_vec())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn names_are_unique(genre in genre_strategy(), chapters in 1u32..=50, seed in any::<u64>()) {
        let lib = GenreLibrary::load().unwrap();
        let cast = cast_for(&lib, genre, chapters, seed);
        let names: BTreeSet<&str> = cast.characters.iter().map(|c| c.name.as_str()).collect();
        prop_assert_eq!(names.len(), cast.characters.len());
        let ids: BTreeSet<_> = cast.characters.iter().map(|c| c.id).collect();
        prop_assert_eq!(ids.len(), cast.characters.len());
    }

    #[test]
    fn relationships_are_symmetric(genre in genre_strategy(), chapters in 1u32..=50, seed in any::<u64>()) {
        let lib = GenreLibrary::load().unwrap();
        let cast = cast_for(&lib, genre, chapters, seed);
        for c in &cast.characters {
            for r in &c.relationships {
                prop_assert_ne!(r.target, c.id);
                let other = cast.get(r.target);
                prop_assert!(other.is_some(), "{} relates to a missing character", c.name);
                prop_assert_eq!(other.and_then(|o| o.relation_to(c.id)), Some(r.kind));
            }
        }
    }

    #[test]
    fn sizing_matches_the_chapter_count(genre in genre_strategy(), chapters in 1u32..=50, seed in any::<u64>()) {
        let lib = GenreLibrary::load().unwrap();
        let cast = cast_for(&lib, genre, chapters, seed);
        let size = CastSize::for_novel(genre, chapters);
        prop_assert_eq!(cast.count(Role::Protagonist), 1);
        prop_assert_eq!(cast.count(Role::Antagonist), size.antagonists);
        prop_assert_eq!(cast.count(Role::Supporting), size.supporting);
        prop_assert_eq!(cast.count(Role::Minor), size.minor);
        prop_assert_eq!(cast.characters.len(), size.total());
    }
}

#[test]
fn worked_example_sizes() {
    let size = CastSize::for_novel(Genre::Mystery, 5);
    assert_eq!(size.supporting, 2);
    assert_eq!(size.minor, 2);
    assert_eq!(size.antagonists, 1);
    assert_eq!(CastSize::for_novel(Genre::Mystery, 40).supporting, 8);
    assert_eq!(CastSize::for_novel(Genre::LiteraryFiction, 10).antagonists, 0);
}

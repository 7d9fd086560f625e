use super::{abc_app, create_app, dog, seed_animals, BreedEmbedder};
use crate::app::Recompute;

fn assert_close(actual: f32, expected: f32) {
    assert!(
        (actual - expected).abs() < 1e-4,
        "expected {expected}, got {actual}"
    );
}

#[test]
fn dwell_view_and_like_rank_liked_first() {
    let (app, _tmp, user) = abc_app();

    app.record_interest(user, "A", Some(50)).unwrap();
    app.set_like(user, "B", true).unwrap();

    let outcome = app.recompute_preference_vector(user).unwrap();
    assert_eq!(
        outcome,
        Recompute::Stored {
            dimension: 3,
            contributing: 2
        }
    );

    let pref = app.preference_vector(user).unwrap();
    assert_close(pref.vector[0], 0.2873);
    assert_close(pref.vector[1], 0.9578);
    assert_close(pref.vector[2], 0.0);

    let norm: f32 = pref.vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    assert_close(norm, 1.0);

    assert_eq!(app.recommend(user, Some(3)).unwrap(), vec!["B", "A", "C"]);
    assert_eq!(app.recommend(user, Some(1)).unwrap(), vec!["B"]);
}

#[test]
fn no_signals_falls_back_to_store_order() {
    let (app, _tmp, user) = abc_app();

    assert_eq!(
        app.recompute_preference_vector(user).unwrap(),
        Recompute::Cleared
    );

    let first = app.recommend(user, Some(2)).unwrap();
    assert_eq!(first, vec!["A", "B"]);
    assert_eq!(app.recommend(user, Some(2)).unwrap(), first);
    assert_eq!(app.recommend(user, None).unwrap(), vec!["A", "B", "C"]);
}

#[test]
fn repeated_views_add_up_without_cap() {
    let (app, _tmp, user) = abc_app();

    // two quick views of C outweigh one of A
    app.record_interest(user, "A", Some(0)).unwrap();
    app.record_interest(user, "C", Some(0)).unwrap();
    app.record_interest(user, "C", Some(0)).unwrap();
    app.recompute_preference_vector(user).unwrap();

    assert_eq!(app.recommend(user, Some(3)).unwrap(), vec!["C", "A", "B"]);
}

#[test]
fn unliked_animal_stops_contributing() {
    let (app, _tmp, user) = abc_app();

    app.set_like(user, "C", true).unwrap();
    app.record_interest(user, "A", Some(0)).unwrap();
    app.recompute_preference_vector(user).unwrap();
    assert_eq!(app.recommend(user, Some(1)).unwrap(), vec!["C"]);

    app.set_like(user, "C", false).unwrap();
    app.recompute_preference_vector(user).unwrap();
    assert_eq!(app.recommend(user, Some(1)).unwrap(), vec!["A"]);
}

#[test]
fn mismatched_dimensions_never_recommended() {
    let embedder = BreedEmbedder::new(&[
        ("alpha", vec![1.0, 0.0, 0.0]),
        ("beta", vec![0.0, 1.0, 0.0]),
        ("wide", vec![1.0, 1.0, 0.0, 0.0]),
    ]);
    let (app, tmp) = create_app(embedder, None);
    seed_animals(
        &app,
        tmp.path(),
        vec![dog("A", "alpha"), dog("B", "beta"), dog("W", "wide")],
    );
    app.generate_all_embeddings().unwrap();
    let user = app.add_user("tester").unwrap().id;

    // A fixes the dimension; W is skipped when building the preference
    app.record_interest(user, "A", Some(10)).unwrap();
    app.set_like(user, "W", true).unwrap();

    assert_eq!(
        app.recompute_preference_vector(user).unwrap(),
        Recompute::Stored {
            dimension: 3,
            contributing: 1
        }
    );

    let recommended = app.recommend(user, Some(10)).unwrap();
    assert_eq!(recommended, vec!["A", "B"]);
    assert!(!recommended.contains(&"W".to_string()));
}

#[test]
fn animals_without_embeddings_are_skipped() {
    let embedder = BreedEmbedder::new(&[("alpha", vec![0.0, 2.0])]);
    let (app, tmp) = create_app(embedder, None);
    seed_animals(&app, tmp.path(), vec![dog("A", "alpha"), dog("X", "mystery")]);

    let report = app.generate_all_embeddings().unwrap();
    assert_eq!(report.counts().success_count, 2);
    assert_eq!(report.counts().fail_count, 0);

    let user = app.add_user("tester").unwrap().id;
    app.set_like(user, "X", true).unwrap();
    assert_eq!(
        app.recompute_preference_vector(user).unwrap(),
        Recompute::Cleared
    );

    app.set_like(user, "A", true).unwrap();
    app.recompute_preference_vector(user).unwrap();
    let pref = app.preference_vector(user).unwrap();
    assert_eq!(pref.vector, vec![0.0, 1.0]);
    assert_eq!(app.recommend(user, None).unwrap(), vec!["A"]);
}

//! Encounter driver: checkpoints and the step cap.

use keeper_core::testing::{monster_action, sample_encounter, valid_action, MockOracle};
use keeper_core::state::StateError;
use keeper_core::{CombatOutcome, Encounter, Intent, KeeperConfig, KeeperError, TurnOrchestrator};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tempfile::TempDir;

fn orchestrator(oracle: MockOracle, max_steps: usize) -> TurnOrchestrator<MockOracle, StdRng> {
    TurnOrchestrator::new(oracle)
        .with_rng(StdRng::seed_from_u64(42))
        .with_config(KeeperConfig::new().with_max_steps(max_steps))
}

#[test]
fn test_save_and_resume() {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");

    let mut oracle = MockOracle::new();
    oracle
        .queue_intent(Intent::DirectAction)
        .queue_action(valid_action("Amelia wings the ghoul.", vec![]))
        .queue_monster(monster_action("The ghoul hisses.", vec![]));
    let mut encounter = Encounter::new(orchestrator(oracle, 50), sample_encounter());

    encounter.advance("").unwrap();
    encounter.advance("I shoot").unwrap();
    let path = encounter.save_in(temp_dir.path()).unwrap();
    assert!(path.exists());

    let resumed = Encounter::resume(orchestrator(MockOracle::new(), 50), &path).unwrap();

    assert_eq!(resumed.state(), encounter.state());
    assert_eq!(resumed.id(), encounter.id());
    assert_eq!(resumed.steps_taken(), 2);
    assert_eq!(resumed.state().round_number, 2);
    assert!(resumed.requires_player_input());
}

#[test]
fn test_checkpoint_is_camel_case_json() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("cellar.json");

    let mut encounter = Encounter::new(orchestrator(MockOracle::new(), 50), sample_encounter());
    encounter.advance("").unwrap();
    encounter.save(&path).unwrap();

    let json: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    let state = &json["state"];
    assert_eq!(state["roundNumber"], 1);
    assert_eq!(state["initiativeOrder"][0], "amelia");
    assert_eq!(state["participants"][0]["type"], "investigator");
    assert_eq!(state["participants"][0]["stats"]["maxHP"], 12);
    assert_eq!(state["map"]["zones"]["cellar"]["adjacentZones"][0], "stairs");
}

#[test]
fn test_resume_missing_file_is_io_error() {
    let temp_dir = TempDir::new().unwrap();
    let result = Encounter::resume(orchestrator(MockOracle::new(), 50), temp_dir.path().join("nope.json"));
    assert!(matches!(result, Err(KeeperError::Io(_))));
}

#[test]
fn test_resume_garbage_is_serialization_error() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("broken.json");
    std::fs::write(&path, "{ not json").unwrap();

    let result = Encounter::resume(orchestrator(MockOracle::new(), 50), &path);
    assert!(matches!(result, Err(KeeperError::Serialization(_))));
}

#[test]
fn test_resume_rejects_duplicate_participants() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("twins.json");

    let encounter = Encounter::new(orchestrator(MockOracle::new(), 50), sample_encounter());
    encounter.save(&path).unwrap();

    let mut json: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    json["state"]["participants"][1]["id"] = serde_json::Value::from("amelia");
    std::fs::write(&path, serde_json::to_string(&json).unwrap()).unwrap();

    let result = Encounter::resume(orchestrator(MockOracle::new(), 50), &path);
    assert!(matches!(
        result,
        Err(KeeperError::State(StateError::DuplicateParticipant(ref id))) if id.as_str() == "amelia"
    ));
}

#[test]
fn test_endless_fight_hits_step_cap() {
    // Every input is chatter, so nobody ever gets hurt.
    let mut encounter = Encounter::new(orchestrator(MockOracle::new(), 5), sample_encounter());

    let outcome = encounter.run(|_| Some("lovely weather".to_string())).unwrap();

    assert_eq!(outcome, Some(CombatOutcome::StepLimit));
    assert_eq!(encounter.steps_taken(), 5);
    assert!(encounter.is_over());
    assert!(encounter
        .state()
        .combat_log()
        .last()
        .unwrap()
        .contains("Step limit of 5 reached"));
}

#[test]
fn test_run_to_victory() {
    let mut oracle = MockOracle::new();
    oracle.queue_intent(Intent::DirectAction);
    let dead_ghoul = {
        let mut ghoul = sample_encounter().participants[1].clone();
        ghoul.stats.set_hp(0);
        ghoul
    };
    oracle.queue_action(valid_action("A point-blank shot: 1d10+2 = 12.", vec![dead_ghoul]));

    let mut encounter = Encounter::new(orchestrator(oracle, 50), sample_encounter());
    let outcome = encounter.run(|_| Some("I shoot it in the head".to_string())).unwrap();

    assert_eq!(outcome, Some(CombatOutcome::Victory));
    assert_eq!(encounter.steps_taken(), 2);
}

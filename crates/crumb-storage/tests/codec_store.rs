//! End-to-end tests for the codec backed by a durable compaction store
//!
//! These tests verify round-trips across every token shape, chain
//! navigation, collision handling, restart survival, concurrent access,
//! and retention sweeps.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crumb_core::{
    CallbackCodec, CodecError, FieldKind, History, Invocation, Mapping, Persistence, Reference,
    Schema, SchemaRegistry, TokenShape, Value,
};
use crumb_storage::{Blake3Hasher, CompactionStore, Digest, ReferenceHasher, StorageError, StoreConfig};
use tempfile::TempDir;

fn schemas() -> Arc<SchemaRegistry> {
    let registry = SchemaRegistry::new()
        .with(Schema::new("open_menu").unwrap().field("page", FieldKind::Int))
        .unwrap()
        .with(Schema::new("set_value").unwrap().field("v", FieldKind::Int))
        .unwrap()
        .with(Schema::new("rename").unwrap().field("title", FieldKind::Str))
        .unwrap()
        .with(
            Schema::new("toggle")
                .unwrap()
                .field("path", FieldKind::Str)
                .field("on", FieldKind::Bool)
                .field("ratio", FieldKind::Float),
        )
        .unwrap()
        .with(
            Schema::new("search")
                .unwrap()
                .field("query", FieldKind::Str)
                .optional("filters", FieldKind::Any),
        )
        .unwrap();
    Arc::new(registry)
}

fn open_store(dir: &TempDir) -> Arc<CompactionStore> {
    Arc::new(CompactionStore::open(StoreConfig::at(dir.path().join("crumb.redb"))).unwrap())
}

fn create_codec() -> (CallbackCodec, Arc<CompactionStore>, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let store = open_store(&temp_dir);
    let codec = CallbackCodec::new(schemas(), store.clone());
    (codec, store, temp_dir)
}

fn menu(page: i64) -> Invocation {
    Invocation::new("open_menu").unwrap().arg("page", page)
}

fn set_value(v: i64) -> Invocation {
    Invocation::new("set_value").unwrap().arg("v", v)
}

fn history_of(codec: &CallbackCodec, invocations: &[Invocation]) -> History {
    let mut history = History::new();
    for invocation in invocations {
        let token = codec.encode(invocation, &History::new()).unwrap();
        let text = codec.resolve(&token.to_string()).unwrap();
        history.push(text).unwrap();
    }
    history
}

// ============================================================================
// Round Trips
// ============================================================================

#[test]
fn test_round_trip_all_shapes() {
    let (codec, _store, _temp) = create_codec();

    let cases: Vec<(Invocation, History)> = vec![
        (menu(2), History::new()),
        (set_value(-7).extra("source", "slider"), History::new()),
        (set_value(5), history_of(&codec, &[menu(1)])),
        (
            Invocation::new("search")
                .unwrap()
                .arg("query", "rust")
                .arg("filters", Value::Null),
            history_of(&codec, &[menu(1), menu(2), menu(3)]),
        ),
        (
            Invocation::new("rename").unwrap().arg("title", "héllo wörld ✓"),
            history_of(&codec, &[menu(9)]),
        ),
    ];

    for (invocation, history) in cases {
        let token = codec.encode(&invocation, &history).unwrap();
        assert!(token.len() <= 64, "token too long: {token}");
        let decoded = codec.decode(&token.to_string()).unwrap();
        assert_eq!(decoded.invocation, invocation);
        assert_eq!(decoded.history, history);
    }
}

#[test]
fn test_encode_rejects_invocations_that_cannot_round_trip() {
    let (codec, store, _temp) = create_codec();
    let history = history_of(&codec, &[menu(1), menu(2), menu(3), menu(4)]);

    let rejected = [
        menu(2).arg("origin", "home"),
        Invocation::new("open_menu").unwrap(),
        Invocation::new("unregistered").unwrap(),
        Invocation::new("search").unwrap().arg("query", "q").extra("filters", 1),
    ];
    for invocation in &rejected {
        let err = codec.encode(invocation, &history).unwrap_err();
        assert!(matches!(err, CodecError::SchemaMismatch(_)), "{invocation:?}: {err}");
    }
    // nothing was compacted for the rejected long chains
    assert_eq!(store.stats().unwrap().cached, 0);

    // undeclared keys round-trip when carried as extras
    let invocation = menu(2).extra("origin", "home");
    let token = codec.encode(&invocation, &history).unwrap();
    let decoded = codec.decode(&token.to_string()).unwrap();
    assert_eq!(decoded.invocation, invocation);
    assert_eq!(decoded.history, history);
}

#[test]
fn test_round_trip_compact() {
    let (codec, _store, _temp) = create_codec();
    let toggle = Invocation::new("toggle")
        .unwrap()
        .arg("path", "ui.dark-mode")
        .arg("on", false)
        .arg("ratio", 1.5);

    let token = codec.encode_compact(&toggle).unwrap();
    assert_eq!(token.shape(), TokenShape::Compact);
    assert_eq!(codec.decode(&token.to_string()).unwrap().invocation, toggle);
}

#[test]
fn test_round_trip_nested_values() {
    let (codec, _store, _temp) = create_codec();

    let mut filters = Mapping::new();
    filters.insert("tags".into(), Value::from(vec!["a;b", "c'd", "e\"f"]));
    filters.insert("limit".into(), Value::from(25));
    filters.insert("exact".into(), Value::from(true));
    let search = Invocation::new("search")
        .unwrap()
        .arg("query", "{weird} ~input")
        .arg("filters", Value::Map(filters));

    let token = codec.encode(&search, &History::new()).unwrap();
    assert_eq!(token.shape(), TokenShape::Hashed);
    assert_eq!(codec.decode(&token.to_string()).unwrap().invocation, search);
}

#[test]
fn test_separator_and_quotes_survive_chaining() {
    let (codec, _store, _temp) = create_codec();
    let title = "a;b'c\"d}{~;";
    let rename = Invocation::new("rename").unwrap().arg("title", title);

    let first = codec.encode(&rename, &History::new()).unwrap().to_string();
    let chained = codec.append(&first, &set_value(1)).unwrap().to_string();

    let decoded = codec.decode(&chained).unwrap();
    assert_eq!(decoded.invocation, set_value(1));
    assert_eq!(decoded.history.len(), 1);

    let previous = codec.decode(decoded.history.last().unwrap()).unwrap();
    assert_eq!(previous.invocation.arguments["title"], Value::from(title));
}

// ============================================================================
// Scenarios
// ============================================================================

#[test]
fn test_scenario_single_invocation() {
    let (codec, _store, _temp) = create_codec();

    let token = codec.encode(&menu(2), &History::new()).unwrap().to_string();
    assert!(token.starts_with('~'));
    assert!(token.contains("{page:2}"));

    let decoded = codec.decode(&token).unwrap();
    assert_eq!(decoded.invocation.identifier, "open_menu");
    assert_eq!(decoded.invocation.arguments["page"], Value::Int(2));
    assert!(decoded.history.is_empty());
}

#[test]
fn test_scenario_history_and_back() {
    let (codec, _store, _temp) = create_codec();

    let original = codec.encode(&menu(2), &History::new()).unwrap().to_string();
    let token = codec.append(&original, &set_value(5)).unwrap().to_string();

    let decoded = codec.decode(&token).unwrap();
    assert_eq!(decoded.invocation, set_value(5));
    assert_eq!(decoded.history.entries(), &[original.clone()]);
    assert_eq!(
        codec.decode(decoded.history.last().unwrap()).unwrap().invocation,
        menu(2)
    );

    let (remaining, popped) = codec.pop(&token).unwrap();
    assert_eq!(popped, set_value(5));
    assert_eq!(remaining.unwrap().to_string(), original);
}

#[test]
fn test_scenario_restart_survival() {
    let temp_dir = TempDir::new().unwrap();
    let payload = format!("~{{note:'{}'}}annotate", "n".repeat(102));
    assert_eq!(payload.len(), 120);

    let token = {
        let store = open_store(&temp_dir);
        let token = store.encode(&payload, Persistence::Deferred).unwrap();
        assert!(token.starts_with("<<") && token.ends_with(">>"));
        assert_eq!(token.len(), 20);
        token
        // dropping the store flushes the deferred record
    };

    let store = open_store(&temp_dir);
    assert_eq!(store.stats().unwrap().cached, 0);
    assert_eq!(store.decode(&token).unwrap(), payload);
}

#[test]
fn test_codec_tokens_survive_restart() {
    let temp_dir = TempDir::new().unwrap();
    let (token, history) = {
        let store = open_store(&temp_dir);
        let codec = CallbackCodec::new(schemas(), store.clone());
        let history = history_of(&codec, &[menu(1), menu(2), menu(3), menu(4)]);
        let token = codec.encode(&set_value(42), &history).unwrap();
        assert_eq!(token.shape(), TokenShape::Hashed);
        (token.to_string(), history)
    };

    let store = open_store(&temp_dir);
    let codec = CallbackCodec::new(schemas(), store);
    let decoded = codec.decode(&token).unwrap();
    assert_eq!(decoded.invocation, set_value(42));
    assert_eq!(decoded.history, history);
}

// ============================================================================
// Back Navigation
// ============================================================================

#[test]
fn test_pop_append_inverse_long_chain() {
    let (codec, _store, _temp) = create_codec();
    let history = history_of(&codec, &[menu(1), menu(2), menu(3), menu(4), menu(5)]);
    let base = codec.encode(&menu(6), &history).unwrap();
    assert_eq!(base.shape(), TokenShape::Hashed);

    let extended = codec.append(&base.to_string(), &set_value(3)).unwrap();
    let (remaining, popped) = codec.pop(&extended.to_string()).unwrap();
    assert_eq!(popped, set_value(3));
    assert_eq!(remaining, Some(base));
}

#[test]
fn test_pop_walks_back_to_root() {
    let (codec, _store, _temp) = create_codec();
    let mut token = codec.encode(&menu(0), &History::new()).unwrap().to_string();
    for page in 1..6 {
        token = codec.append(&token, &menu(page)).unwrap().to_string();
    }

    let mut seen = Vec::new();
    let mut current = Some(token);
    while let Some(token) = current {
        let (remaining, popped) = codec.pop(&token).unwrap();
        seen.push(popped.arguments["page"].as_i64().unwrap());
        current = remaining.map(|t| t.to_string());
    }
    assert_eq!(seen, vec![5, 4, 3, 2, 1, 0]);
}

// ============================================================================
// Compaction
// ============================================================================

/// Sends every payload to the same first slot; probes use BLAKE3
struct CollidingHasher;

impl ReferenceHasher for CollidingHasher {
    fn digest(&self, data: &[u8]) -> Digest {
        if data.len() == 32 {
            Blake3Hasher.digest(data)
        } else {
            [7u8; 32]
        }
    }
}

/// Never leaves the first slot
struct StuckHasher;

impl ReferenceHasher for StuckHasher {
    fn digest(&self, _data: &[u8]) -> Digest {
        [7u8; 32]
    }
}

fn long_payload(tag: &str) -> String {
    format!("~{{note:'{}'}}{tag}", "z".repeat(70))
}

#[test]
fn test_idempotent_compaction() {
    let (codec, store, _temp) = create_codec();
    let history = history_of(&codec, &[menu(1), menu(2), menu(3), menu(4)]);

    let first = codec.encode(&set_value(1), &history).unwrap();
    let second = codec.encode(&set_value(1), &history).unwrap();
    assert_eq!(first, second);
    assert_eq!(store.stats().unwrap().durable, 1);
}

#[test]
fn test_immediate_encode_after_deferred_is_durable() {
    let (codec, store, _temp) = create_codec();
    let history = history_of(&codec, &[menu(1), menu(2), menu(3), menu(4)]);

    let deferred = codec.encode_with(&set_value(1), &history, Persistence::Deferred).unwrap();
    assert_eq!(store.stats().unwrap().durable, 0);

    let immediate = codec.encode_with(&set_value(1), &history, Persistence::Immediate).unwrap();
    assert_eq!(immediate, deferred);
    let stats = store.stats().unwrap();
    assert_eq!(stats.dirty, 0);
    assert_eq!(stats.durable, 1);
}

#[test]
fn test_forced_collision_keeps_both() {
    let temp_dir = TempDir::new().unwrap();
    let store = CompactionStore::open(StoreConfig::at(temp_dir.path().join("c.redb")))
        .unwrap()
        .with_hasher(CollidingHasher);

    let a = store.encode(&long_payload("a"), Persistence::Immediate).unwrap();
    let b = store.encode(&long_payload("b"), Persistence::Immediate).unwrap();
    assert_ne!(a, b);

    assert_eq!(store.decode(&a).unwrap(), long_payload("a"));
    assert_eq!(store.decode(&b).unwrap(), long_payload("b"));

    // same content lands on the same probed slot again
    assert_eq!(store.encode(&long_payload("b"), Persistence::Immediate).unwrap(), b);
}

#[test]
fn test_probe_exhaustion() {
    let store = CompactionStore::open(StoreConfig {
        max_probes: 4,
        ..Default::default()
    })
    .unwrap()
    .with_hasher(StuckHasher);

    store.encode(&long_payload("a"), Persistence::Immediate).unwrap();
    let err = store.encode(&long_payload("b"), Persistence::Immediate).unwrap_err();
    assert!(matches!(err, StorageError::ProbesExhausted(4)));

    let store = Arc::new(store);
    let codec = CallbackCodec::new(schemas(), store);
    let history = history_of(&codec, &[menu(1), menu(2), menu(3), menu(4)]);
    let err = codec.encode(&set_value(1), &history).unwrap_err();
    assert!(matches!(err, CodecError::Store(_)));
    assert!(!err.is_routine());
}

#[test]
fn test_unresolvable_reference_surfaces() {
    let (codec, _store, _temp) = create_codec();
    let forged = format!("<<{}>>", "F".repeat(16));
    let err = codec.decode(&forged).unwrap_err();
    assert!(matches!(err, CodecError::UnresolvableReference(_)));
}

// ============================================================================
// Concurrency
// ============================================================================

#[test]
fn test_concurrent_encoders() {
    let (codec, store, _temp) = create_codec();
    let codec = Arc::new(codec);
    let shared = history_of(&codec, &[menu(1), menu(2), menu(3), menu(4)]);

    let handles: Vec<_> = (0..8)
        .map(|worker| {
            let codec = Arc::clone(&codec);
            let shared = shared.clone();
            thread::spawn(move || {
                let mut tokens = Vec::new();
                for i in 0..25 {
                    let invocation = set_value(worker * 100 + i);
                    let token = codec
                        .encode_with(&invocation, &shared, Persistence::Deferred)
                        .unwrap();
                    tokens.push((invocation, token.to_string()));
                }
                // every worker also encodes one common chain
                let common = codec.encode(&set_value(-1), &shared).unwrap();
                (tokens, common.to_string())
            })
        })
        .collect();

    let mut commons = Vec::new();
    for handle in handles {
        let (tokens, common) = handle.join().unwrap();
        for (invocation, token) in tokens {
            let decoded = codec.decode(&token).unwrap();
            assert_eq!(decoded.invocation, invocation);
            assert_eq!(decoded.history, shared);
        }
        commons.push(common);
    }
    commons.dedup();
    assert_eq!(commons.len(), 1);

    store.flush().unwrap();
    assert_eq!(store.stats().unwrap().durable, 8 * 25 + 1);
}

// ============================================================================
// Retention
// ============================================================================

#[test]
fn test_resolve_refreshes_and_sweep_respects_cutoff() {
    let temp_dir = TempDir::new().unwrap();
    let store = open_store(&temp_dir);

    let a = store.encode(&long_payload("a"), Persistence::Immediate).unwrap();
    let b = store.encode(&long_payload("b"), Persistence::Immediate).unwrap();
    let ref_a = Reference::from_token(&a).unwrap();
    let ref_b = Reference::from_token(&b).unwrap();

    thread::sleep(Duration::from_millis(20));
    let cutoff = chrono::Utc::now().timestamp_millis();
    thread::sleep(Duration::from_millis(20));

    store.decode(&a).unwrap();
    let touched = store.record(&ref_a).unwrap().unwrap().last_touched_millis;
    assert!(touched >= cutoff);

    assert_eq!(store.stale(cutoff).unwrap(), vec![ref_b.clone()]);
    assert_eq!(store.sweep(cutoff).unwrap(), 1);

    assert_eq!(store.decode(&a).unwrap(), long_payload("a"));
    assert!(matches!(store.decode(&b), Err(StorageError::NotFound(_))));
    assert!(store.record(&ref_b).unwrap().is_none());

    // an old cutoff removes nothing
    assert_eq!(store.sweep(0).unwrap(), 0);
    assert_eq!(store.stats().unwrap().durable, 1);
}

#[test]
fn test_in_memory_sweep() {
    let store = CompactionStore::in_memory();
    store.encode(&long_payload("a"), Persistence::Deferred).unwrap();
    store.encode(&long_payload("b"), Persistence::Deferred).unwrap();

    assert_eq!(store.sweep(0).unwrap(), 0);
    assert_eq!(store.sweep(i64::MAX).unwrap(), 2);
    assert_eq!(store.stats().unwrap().cached, 0);
}

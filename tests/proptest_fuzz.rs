//! Property-based tests (fuzzing) for sync layer resilience.
//!
//! Uses proptest to generate random/malformed inputs and verify the queue,
//! processor and timer never panic, only return clean errors.
//!
//! Run with: `cargo test --test proptest_fuzz`

use std::sync::Arc;

use proptest::prelude::*;
use serde_json::{json, Value};

use fastlandz_sync::storage::memory::{MemoryLocalStore, MemoryRemoteStore};
use fastlandz_sync::storage::{LocalStore, StorageError};
use fastlandz_sync::{
    FastState, OperationKind, OperationProcessor, OperationQueue, QueuedOperation, Settled,
};

// =============================================================================
// Strategies for generating test data
// =============================================================================

/// Generate arbitrary JSON values (including invalid structures)
fn arbitrary_json_strategy() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(|n| Value::Number(n.into())),
        ".*".prop_map(Value::String),
    ];

    leaf.prop_recursive(
        4,  // depth
        64, // max nodes
        10, // items per collection
        |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..10).prop_map(Value::Array),
                prop::collection::hash_map(".*", inner, 0..10)
                    .prop_map(|m| Value::Object(m.into_iter().collect())),
            ]
        },
    )
}

fn kind_strategy() -> impl Strategy<Value = OperationKind> {
    prop_oneof![
        Just(OperationKind::ProgressUpdate),
        Just(OperationKind::JournalCreate),
        Just(OperationKind::JournalUpdate),
        Just(OperationKind::FastSessionUpdate),
        "[a-z_]{1,20}".prop_map(OperationKind::from),
    ]
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("test runtime")
}

// =============================================================================
// Deserialization Fuzz Tests
// =============================================================================

proptest! {
    /// Queue entries should never panic on arbitrary bytes
    #[test]
    fn fuzz_operation_from_random_bytes(bytes in prop::collection::vec(any::<u8>(), 0..4096)) {
        let result: Result<QueuedOperation, _> = serde_json::from_slice(&bytes);
        let _ = result;
    }

    /// Whatever sits under the queue key, reading it is Ok or Corruption
    #[test]
    fn fuzz_queue_load_arbitrary_json(stored in arbitrary_json_strategy()) {
        let rt = runtime();
        let outcome = rt.block_on(async {
            let local = Arc::new(MemoryLocalStore::new());
            local.set(OperationQueue::DEFAULT_KEY, &stored.to_string()).await.unwrap();
            OperationQueue::new(local).list().await
        });

        match outcome {
            Ok(_) => {}
            Err(StorageError::Corruption { key, .. }) => prop_assert_eq!(key, OperationQueue::DEFAULT_KEY),
            Err(e) => prop_assert!(false, "unexpected error: {}", e),
        }
    }

    /// Kind names survive a trip through the stored representation
    #[test]
    fn fuzz_kind_name_preserved(kind in kind_strategy()) {
        let op = QueuedOperation::new(kind.clone(), json!({}));
        let raw = serde_json::to_string(&op).unwrap();
        let back: QueuedOperation = serde_json::from_str(&raw).unwrap();
        prop_assert_eq!(back.kind, kind);
    }
}

// =============================================================================
// Processor Fuzz Tests
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Arbitrary payloads produce an outcome, never a panic
    #[test]
    fn fuzz_processor_arbitrary_payload(kind in kind_strategy(), payload in arbitrary_json_strategy()) {
        let rt = runtime();
        let known = !matches!(kind, OperationKind::Unknown(_));
        let outcome = rt.block_on(async {
            let processor = OperationProcessor::new(Arc::new(MemoryRemoteStore::new()));
            processor.process(&QueuedOperation::new(kind, payload)).await
        });

        if !known {
            prop_assert!(!outcome.is_success());
        }
    }
}

// =============================================================================
// State Machine Properties
// =============================================================================

proptest! {
    /// An operation is dropped exactly on its `max_retries`-th failure
    #[test]
    fn prop_retry_budget(outcomes in prop::collection::vec(any::<bool>(), 1..20), max_retries in 1u32..6) {
        let mut op = QueuedOperation::new(OperationKind::ProgressUpdate, json!({}));
        let mut failures = 0;

        for succeeded in outcomes {
            match op.clone().begin().settle(succeeded, max_retries) {
                Settled::Succeeded(_) => {
                    prop_assert!(succeeded);
                    return Ok(());
                }
                Settled::Requeued(next) => {
                    failures += 1;
                    prop_assert!(failures < max_retries);
                    prop_assert_eq!(next.retry_count, failures);
                    op = next;
                }
                Settled::Dropped(last) => {
                    failures += 1;
                    prop_assert_eq!(failures, max_retries);
                    prop_assert_eq!(last.retry_count, max_retries);
                    return Ok(());
                }
            }
        }
    }

    /// Remaining time stays within [0, duration] across any pause/resume sequence
    #[test]
    fn prop_timer_bounds(
        hours in 1u32..72,
        steps in prop::collection::vec((0i64..3_600_000, any::<bool>()), 0..20),
    ) {
        let start = 1_767_225_600_000i64;
        let mut state = FastState::started(start, hours);
        let mut now = start;

        for (advance, toggle) in steps {
            now += advance;
            if toggle {
                state = if state.is_paused { state.resumed(now) } else { state.paused(now) };
            }
            let remaining = state.remaining_ms(now);
            prop_assert!(remaining >= 0);
            prop_assert!(remaining <= state.duration_ms());
            prop_assert!(state.total_paused_ms >= 0);
            prop_assert!(state.elapsed_ms(now) <= now - start);
        }
    }
}

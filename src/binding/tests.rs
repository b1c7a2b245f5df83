// src/binding/tests.rs

use super::*;
use crate::xadapter::{MockXAdapter, RecordedCall};
use anyhow::anyhow;
use std::sync::atomic::{AtomicUsize, Ordering};

/// A binding over a fresh mock, with the construction calls already cleared.
fn mock_binding() -> (CoreBinding<MockXAdapter>, MockXAdapter) {
    let mock = MockXAdapter::new();
    let binding = CoreBinding::open(mock.clone(), &BindingConfig::default())
        .expect("mock display should open");
    mock.clear_calls();
    (binding, mock)
}

#[test_log::test]
fn intern_then_get_name_round_trips() {
    let (binding, mock) = mock_binding();
    for name in ["_NET_WM_NAME", "UTF8_STRING", "PRIMARY", "XdndAware"] {
        let atom = binding.atom_from_name(name).unwrap();
        assert_ne!(atom, 0);
        assert_eq!(binding.get_atom_name(atom).unwrap(), Some(name.as_bytes().to_vec()));
    }
    assert_eq!(mock.outstanding_buffers(), 0);
}

#[test_log::test]
fn atom_from_name_always_creates() {
    let (binding, mock) = mock_binding();
    binding.atom_from_name("_NEW_ATOM").unwrap();
    assert_eq!(
        mock.get_calls(),
        vec![RecordedCall::InternAtom {
            name: "_NEW_ATOM".to_string(),
            only_if_exists: false
        }]
    );
}

#[test_log::test]
fn integer_atoms_skip_the_server() {
    let (binding, mock) = mock_binding();
    let id: Atom = 12345;
    assert_eq!(binding.intern_atom(id).unwrap(), id);
    assert_eq!(binding.atom_from_id(id).unwrap(), id);
    assert!(mock.get_calls().is_empty());

    let atom = binding.intern_atom("WM_NAME").unwrap();
    assert_eq!(atom, 39);
    assert_eq!(mock.get_calls().len(), 1);
}

#[test_log::test]
fn interior_nul_in_name_is_rejected() {
    let (binding, mock) = mock_binding();
    let err = binding.atom_from_name("BAD\0").unwrap_err();
    assert!(matches!(err, BindingError::InvalidAtomName(_)));
    assert!(mock.get_calls().is_empty());
}

#[test_log::test]
fn intern_atoms_creates_every_name_in_one_call() {
    let (binding, mock) = mock_binding();
    binding
        .intern_atoms(&["_NET_SUPPORTED", "_NET_ACTIVE_WINDOW", "PRIMARY"])
        .unwrap();

    assert_eq!(
        mock.get_calls(),
        vec![RecordedCall::InternAtoms {
            names: vec![
                "_NET_SUPPORTED".to_string(),
                "_NET_ACTIVE_WINDOW".to_string(),
                "PRIMARY".to_string()
            ],
            only_if_exists: false,
        }]
    );
    assert!(mock.atom("_NET_SUPPORTED").is_some());
    assert!(mock.atom("_NET_ACTIVE_WINDOW").is_some());
}

#[test_log::test]
fn intern_atoms_releases_arrays_for_empty_and_single_batches() {
    let (binding, _mock) = mock_binding();

    binding.intern_atoms(&[]).unwrap();
    let stats = binding.arena_stats();
    assert_eq!(stats.allocated, 2);
    assert_eq!(stats.live(), 0);

    binding.intern_atoms(&["WM_CLASS"]).unwrap();
    let stats = binding.arena_stats();
    assert_eq!(stats.allocated, 4);
    assert_eq!(stats.live(), 0);
}

#[test_log::test]
fn failed_batch_is_fatal_and_still_releases_arrays() {
    let (binding, mock) = mock_binding();
    mock.fail_batch_intern(true);

    let err = binding.intern_atoms(&["A", "B"]).unwrap_err();
    assert!(matches!(err, BindingError::BatchInternFailed { requested: 2 }));
    assert!(err.is_fatal());
    assert_eq!(binding.arena_stats().live(), 0);
}

#[test_log::test]
fn oversized_batch_is_rejected_with_its_own_diagnostic() {
    assert_eq!(batch_count(3).unwrap(), 3);
    assert_eq!(batch_count(c_int::MAX as usize).unwrap(), c_int::MAX);

    let err = batch_count(usize::MAX).unwrap_err();
    assert!(matches!(err, BindingError::BatchTooLarge { count: usize::MAX }));
    assert!(err.is_fatal());
}

#[test_log::test]
fn unnamed_atom_is_absent_not_an_error() {
    let (binding, mock) = mock_binding();
    assert_eq!(binding.get_atom_name(987_654).unwrap(), None);
    assert_eq!(binding.get_atom_name_lossy(987_654).unwrap(), None);
    assert_eq!(mock.outstanding_buffers(), 0);
}

#[test_log::test]
fn server_buffer_is_freed_right_after_copying() {
    let (binding, mock) = mock_binding();
    assert_eq!(binding.get_atom_name_lossy(1).unwrap().as_deref(), Some("PRIMARY"));
    assert_eq!(
        mock.get_calls(),
        vec![RecordedCall::GetAtomName { atom: 1 }, RecordedCall::Free]
    );
    assert_eq!(mock.outstanding_buffers(), 0);
    assert_eq!(mock.unknown_frees(), 0);
}

#[test_log::test]
fn error_text_for_known_and_unknown_codes() {
    let (binding, mock) = mock_binding();
    assert_eq!(
        binding.get_error_text(3).unwrap(),
        "BadWindow (invalid Window parameter)"
    );

    let unknown = binding.get_error_text(42).unwrap();
    assert_eq!(unknown, "42");
    assert!(unknown.len() < ERROR_TEXT_LEN);
    assert!(mock.get_calls().contains(&RecordedCall::GetErrorText {
        code: 42,
        length: ERROR_TEXT_LEN as c_int
    }));
}

#[test_log::test]
fn error_text_is_capped_and_decoded_byte_per_char() {
    let (binding, mock) = mock_binding();
    mock.set_error_text(200, &[b'x'; 300]);
    let text = binding.get_error_text(200).unwrap();
    assert_eq!(text.len(), ERROR_TEXT_LEN - 1);

    mock.set_error_text(201, b"caf\xe9");
    assert_eq!(binding.get_error_text(201).unwrap(), "caf\u{e9}");
}

#[test_log::test]
fn error_text_passes_resolved_text_through() {
    let (binding, mock) = mock_binding();
    assert_eq!(binding.get_error_text("already text").unwrap(), "already text");
    assert!(mock.get_calls().is_empty());
}

#[test_log::test]
fn ungrab_defaults_to_current_time() {
    let (binding, mock) = mock_binding();
    assert_eq!(binding.ungrab_keyboard(None).unwrap(), 1);
    assert_eq!(binding.ungrab_pointer(Some(777)).unwrap(), 1);
    assert_eq!(
        mock.get_calls(),
        vec![
            RecordedCall::UngrabKeyboard { time: CURRENT_TIME },
            RecordedCall::UngrabPointer { time: 777 },
        ]
    );
}

#[test_log::test]
fn rejecting_guard_runs_before_any_native_call() {
    let (binding, mock) = mock_binding();
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = hits.clone();
    binding.set_context_check(move || {
        counter.fetch_add(1, Ordering::SeqCst);
        Err(anyhow!("X lock not held"))
    });

    let results = vec![
        binding.atom_from_id(1).map(|_| ()),
        binding.atom_from_name("WM_NAME").map(|_| ()),
        binding.intern_atom("WM_NAME").map(|_| ()),
        binding.intern_atoms(&["WM_NAME"]),
        binding.get_atom_name(1).map(|_| ()),
        binding.get_error_text(2).map(|_| ()),
        binding.get_error_text("text").map(|_| ()),
        binding.ungrab_keyboard(None).map(|_| ()),
        binding.ungrab_pointer(None).map(|_| ()),
    ];
    for result in &results {
        match result {
            Err(BindingError::ContextCheck(e)) => assert_eq!(e.to_string(), "X lock not held"),
            other => panic!("expected guard rejection, got {:?}", other),
        }
    }
    assert_eq!(hits.load(Ordering::SeqCst), results.len());
    assert!(mock.get_calls().is_empty());
    assert_eq!(binding.arena_stats().allocated, 0);

    binding.clear_context_check();
    assert!(binding.atom_from_id(1).is_ok());
}

#[test_log::test]
fn guard_rejection_wins_over_a_closed_display() {
    let (binding, mock) = mock_binding();
    binding.display().invalidate();
    binding.set_context_check(|| Err(anyhow!("X lock not held")));

    let results = vec![
        binding.atom_from_id(1).map(|_| ()),
        binding.atom_from_name("WM_NAME").map(|_| ()),
        binding.intern_atoms(&["WM_NAME"]),
        binding.get_atom_name(1).map(|_| ()),
        binding.get_error_text(2).map(|_| ()),
        binding.ungrab_keyboard(None).map(|_| ()),
        binding.ungrab_pointer(None).map(|_| ()),
    ];
    for result in &results {
        match result {
            Err(BindingError::ContextCheck(e)) => assert_eq!(e.to_string(), "X lock not held"),
            other => panic!("expected guard rejection, got {:?}", other),
        }
    }
    assert!(mock.get_calls().is_empty());
    assert_eq!(binding.arena_stats().allocated, 0);
}

#[test_log::test]
fn closed_display_is_reported_for_every_server_operation() {
    let (binding, mock) = mock_binding();
    binding.display().invalidate();

    assert!(matches!(
        binding.atom_from_name("WM_NAME"),
        Err(BindingError::DisplayClosed)
    ));
    assert!(matches!(
        binding.intern_atoms(&["WM_NAME"]),
        Err(BindingError::DisplayClosed)
    ));
    assert!(matches!(binding.get_atom_name(1), Err(BindingError::DisplayClosed)));
    assert!(matches!(binding.get_error_text(1), Err(BindingError::DisplayClosed)));
    assert!(matches!(binding.ungrab_keyboard(None), Err(BindingError::DisplayClosed)));
    assert!(matches!(binding.ungrab_pointer(None), Err(BindingError::DisplayClosed)));
    assert!(mock.get_calls().is_empty());

    // Identity atoms and resolved text never needed the display.
    assert_eq!(binding.atom_from_id(7).unwrap(), 7);
    assert_eq!(binding.get_error_text("ok").unwrap(), "ok");
    assert!(binding.info().closed);
}

#[test_log::test]
fn display_name_and_info() {
    let mock = MockXAdapter::new();
    let config = BindingConfig {
        display: Some(":42".to_string()),
        synchronize: true,
        ..BindingConfig::default()
    };
    let binding = CoreBinding::open(mock, &config).unwrap();
    assert_eq!(binding.display_name(), b":42");
    assert_eq!(binding.to_string(), "X11CoreBindings(:42)");

    binding.set_context_check(|| Err(anyhow!("X lock not held")));
    assert_eq!(binding.display_name(), b":42");
    let info = binding.info();
    assert_eq!(
        info,
        BindingInfo {
            display: ":42".to_string(),
            synchronized: true,
            context_check: true,
            closed: false,
        }
    );
    let json = serde_json::to_value(&info).unwrap();
    assert_eq!(json["display"], ":42");
}

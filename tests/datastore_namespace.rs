mod common;

use rtmpc_link::{
    datastore::{
        namespace::{DimensionTable, SUPERVISION_LEN, Section, ServerType, TagField},
        server::DataStore,
    },
    error::LinkError,
};

use common::{dims, server_options, started_store};

fn expected_tag_count(server_type: ServerType, store_params: bool, store_predictions: bool) -> usize {
    // X, Z, Y, U, XInit, UOpt, Flags, Switches
    let mut n = 8;
    if store_params {
        n += 2; // P, TVParameters
    }
    if store_predictions {
        n += 2;
    }
    if server_type.has_estimator() {
        n += 3;
    }
    if server_type.has_monitoring() {
        n += 3;
    }
    n
}

#[test]
fn tag_count_and_lengths_follow_dimensions() {
    for server_type in [ServerType::Basic, ServerType::WithEstimator, ServerType::WithMonitoring] {
        for (store_params, store_predictions) in [(false, false), (true, false), (true, true), (false, true)] {
            let mut options = server_options(server_type);
            options.store_params = store_params;
            options.store_predictions = store_predictions;
            options.n_steps_pred = 5;

            let store = DataStore::new(options, dims()).unwrap();
            assert_eq!(
                store.tag_count(),
                expected_tag_count(server_type, store_params, store_predictions),
                "{:?} params={} predictions={}",
                server_type,
                store_params,
                store_predictions
            );
            assert_eq!(store.tag_count(), store.namespace().tag_count());

            assert_eq!(store.tag_len("States.X"), Some(4));
            assert_eq!(store.tag_len("Measurements"), Some(4));
            assert_eq!(store.tag_len("Inputs"), Some(2));
            assert_eq!(store.tag_len("OptimalOutputs"), Some(2));
            assert_eq!(store.tag_len("Flags"), Some(SUPERVISION_LEN));
            assert_eq!(store.tag_len("Switches"), Some(SUPERVISION_LEN));
            if store_predictions {
                assert_eq!(store.tag_len("PredictedStates"), Some(20));
                assert_eq!(store.tag_len("PredictedOutputs"), Some(10));
            }
            if server_type.has_monitoring() {
                assert_eq!(store.tag_len("Monitoring.Aux"), Some(3));
            }
        }
    }
}

#[test]
fn zero_dimensions_are_never_empty() {
    let store = DataStore::new(server_options(ServerType::WithMonitoring), DimensionTable::default()).unwrap();
    for spec in &store.namespace().tags {
        assert_eq!(store.tag_len(spec.field.path()), Some(spec.len));
        assert!(spec.len >= 1, "{} is empty", spec.field.path());
    }
    assert_eq!(store.tag_len("States.Z"), Some(1));
    assert_eq!(store.tag_len("Flags"), Some(SUPERVISION_LEN));
}

#[test]
fn tags_start_zeroed() {
    let store = DataStore::new(server_options(ServerType::WithEstimator), dims()).unwrap();
    assert_eq!(store.snapshot("States.X"), Some(vec![0.0; 4]));
    assert_eq!(store.snapshot("Switches"), Some(vec![0.0; SUPERVISION_LEN]));
    assert_eq!(store.snapshot("Nope"), None);
}

#[test]
fn estimator_section_depends_on_server_type() {
    let basic = DataStore::new(server_options(ServerType::Basic), dims()).unwrap();
    assert!(basic.namespace().section_fields(Section::EstimatorData).is_empty());
    assert!(!basic.namespace().contains(TagField::XHat));

    let with_estimator = DataStore::new(server_options(ServerType::WithEstimator), dims()).unwrap();
    assert_eq!(
        with_estimator.namespace().section_fields(Section::EstimatorData),
        vec![TagField::XHat, TagField::ZHat, TagField::PHat]
    );
    assert_eq!(with_estimator.namespace().index, 2);
}

#[test]
fn start_and_stop_are_idempotent() {
    let mut store = started_store(ServerType::Basic);
    assert!(store.is_running());
    let addr = store.local_addr().unwrap();
    assert_ne!(addr.port(), 0);

    store.start().unwrap();
    assert_eq!(store.local_addr(), Some(addr));

    store.stop().unwrap();
    assert!(!store.is_running());
    store.stop().unwrap();
    assert!(!store.is_running());
}

#[test]
fn failed_start_leaves_store_retryable() {
    let mut first = started_store(ServerType::Basic);
    let port = first.local_addr().unwrap().port();

    let mut options = server_options(ServerType::Basic);
    options.port = port;
    let mut second = DataStore::new(options, dims()).unwrap();

    let err = second.start().unwrap_err();
    assert!(matches!(err, LinkError::Server(_)));
    assert!(!second.is_running());
    assert_eq!(second.tag_count(), first.tag_count());

    first.stop().unwrap();
    second.start().unwrap();
    assert!(second.is_running());
    assert_eq!(second.local_addr().map(|a| a.port()), Some(port));
}

#[test]
fn invalid_endpoint_is_a_config_error() {
    let mut options = server_options(ServerType::Basic);
    options.address = "tcp:///no-host".into();
    assert!(matches!(DataStore::new(options, dims()), Err(LinkError::Config(_))));
}

mod common;

use std::sync::Arc;

use parking_lot::Mutex;

use rtmpc_link::{
    client::supervision::{Selector, Slot},
    config::ClientType,
    datastore::namespace::{ServerType, TagField},
    engine::{Estimate, FilterStep, OptimalControlSolver, PlantIntegrator, PlantStep, SolveOutcome},
    error::{LinkError, StepFailure},
    realtime::{
        controller::RealtimeController,
        estimator::{EstimatorCapability, EstimatorKind, RealtimeEstimator},
        module::{CycleOutcome, RealtimeModule, StatusCheck, shared},
        simulator::RealtimeSimulator,
        trigger::PeriodicTrigger,
    },
    utils::metrics::Telemetry,
};

use common::{manual_client, module_options, started_store};

const X0: [f64; 4] = [1.0, 0.5, 134.14, 130.0];

/// Publishes a fixed state and mirrors it as the measurement.
struct HoldPlant {
    x: Vec<f64>,
}

impl PlantIntegrator for HoldPlant {
    fn make_step(&mut self, u: &[f64]) -> Result<PlantStep, StepFailure> {
        self.x[0] += u[0];
        Ok(PlantStep {
            x: self.x.clone(),
            y: self.x.clone(),
            ..PlantStep::default()
        })
    }
}

/// Remembers every warm start and answers with a fixed input.
struct RecordingSolver {
    seen: Arc<Mutex<Vec<Vec<f64>>>>,
    u: Vec<f64>,
}

impl RecordingSolver {
    fn new(u: Vec<f64>) -> (Self, Arc<Mutex<Vec<Vec<f64>>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        (Self { seen: seen.clone(), u }, seen)
    }
}

impl OptimalControlSolver for RecordingSolver {
    fn make_step(&mut self, x0: &[f64]) -> Result<SolveOutcome, StepFailure> {
        self.seen.lock().push(x0.to_vec());
        Ok(SolveOutcome {
            u: self.u.clone(),
            ..SolveOutcome::default()
        })
    }
}

struct InfeasibleSolver;

impl OptimalControlSolver for InfeasibleSolver {
    fn make_step(&mut self, _x0: &[f64]) -> Result<SolveOutcome, StepFailure> {
        Err(StepFailure::new("nlp", "infeasible"))
    }
}

/// Returns a fixed estimate and remembers its inputs.
struct FixedFilter {
    inputs: Arc<Mutex<Option<(Vec<f64>, Vec<f64>, Vec<f64>)>>>,
}

impl FilterStep for FixedFilter {
    fn make_step(&mut self, y: &[f64], u: &[f64], p: &[f64]) -> Result<Estimate, StepFailure> {
        *self.inputs.lock() = Some((y.to_vec(), u.to_vec(), p.to_vec()));
        Ok(Estimate {
            x_hat: vec![0.1, 0.2, 0.3, 0.4],
            z_hat: None,
            p_hat: Some(vec![5.0, 6.0]),
        })
    }
}

fn hold_plant() -> HoldPlant {
    HoldPlant { x: X0.to_vec() }
}

#[test]
fn controller_status_gate_follows_switches_and_flags() {
    let store = started_store(ServerType::WithEstimator);
    let mut operator = manual_client(&store);
    let (solver, _) = RecordingSolver::new(vec![0.0, 0.0]);
    let mut controller = RealtimeController::new(
        store.client_options(ClientType::Controller),
        module_options(true, false),
        solver,
    )
    .unwrap();

    // Not initialised yet.
    assert_eq!(controller.check_status(), StatusCheck::NotConnected);
    assert!(controller.init(&[0.0, 0.0]));

    assert_eq!(controller.check_status(), StatusCheck::NotManuallyEnabled);
    assert!(!controller.state().ready);

    operator.set_switch(Slot::Controller, true).unwrap();
    assert_eq!(controller.check_status(), StatusCheck::Ready);
    assert!(controller.state().ready);

    operator.set_flag(Slot::Controller, true).unwrap();
    assert_eq!(controller.check_status(), StatusCheck::SelfFault);
    operator.set_switch(Slot::Controller, false).unwrap();
    assert!(!controller.check_status().is_ready());
    operator.set_switch(Slot::Controller, true).unwrap();
    operator.set_flag(Slot::Controller, false).unwrap();

    operator.set_flag(Slot::Simulator, true).unwrap();
    assert_eq!(controller.check_status(), StatusCheck::UpstreamFault(Slot::Simulator));
    operator.update_flags(Selector::All, &[0.0, 0.0, 1.0, 0.0, 0.0]).unwrap();
    assert_eq!(controller.check_status(), StatusCheck::UpstreamFault(Slot::Estimator));

    // Flags of slots outside the dependency chain do not matter.
    operator.update_flags(Selector::All, &[0.0, 0.0, 0.0, 1.0, 1.0]).unwrap();
    assert_eq!(controller.check_status(), StatusCheck::Ready);

    controller.stop();
    assert_eq!(controller.check_status(), StatusCheck::NotConnected);
    assert_eq!(controller.asynchronous_step(), CycleOutcome::Disabled);

    controller.start().unwrap();
    assert!(controller.state().enabled);
    assert_eq!(controller.check_status(), StatusCheck::Ready);
}

#[test]
fn ungated_controller_runs_without_switch() {
    let store = started_store(ServerType::WithEstimator);
    let (solver, seen) = RecordingSolver::new(vec![0.7, -0.7]);
    let mut controller = RealtimeController::new(
        store.client_options(ClientType::Controller),
        module_options(false, false),
        solver,
    )
    .unwrap();
    assert!(controller.init(&[0.0, 0.0]));

    assert!(controller.asynchronous_step().is_completed());
    assert_eq!(seen.lock().len(), 1);
    assert_eq!(store.snapshot(TagField::UOpt.path()), Some(vec![0.7, -0.7]));
    assert_eq!(controller.state().iter_count, 1);
    assert!(controller.last_residual().is_some());
}

#[test]
fn skipped_cycle_does_not_touch_outputs() {
    let store = started_store(ServerType::WithEstimator);
    let (solver, seen) = RecordingSolver::new(vec![9.0, 9.0]);
    let mut controller = RealtimeController::new(
        store.client_options(ClientType::Controller),
        module_options(true, false),
        solver,
    )
    .unwrap();
    assert!(controller.init(&[0.3, -0.2]));

    assert_eq!(
        controller.asynchronous_step(),
        CycleOutcome::Skipped(StatusCheck::NotManuallyEnabled)
    );
    assert!(seen.lock().is_empty());
    assert_eq!(store.snapshot(TagField::UOpt.path()), Some(vec![0.3, -0.2]));
    assert_eq!(controller.state().iter_count, 0);
}

#[test]
fn failed_solve_leaves_optimal_outputs_unchanged() {
    let store = started_store(ServerType::WithEstimator);
    let mut operator = manual_client(&store);
    let mut controller = RealtimeController::new(
        store.client_options(ClientType::Controller),
        module_options(true, false),
        InfeasibleSolver,
    )
    .unwrap();
    assert!(controller.init(&[0.3, -0.2]));
    operator.set_switch(Slot::Controller, true).unwrap();

    let outcome = controller.asynchronous_step();
    assert!(matches!(outcome, CycleOutcome::StepFailed(ref reason) if reason.contains("infeasible")));
    assert_eq!(store.snapshot(TagField::UOpt.path()), Some(vec![0.3, -0.2]));
    assert_eq!(controller.state().iter_count, 0);
    // A failed step is local to the cycle.
    assert!(controller.state().enabled);
}

#[test]
fn output_feedback_controller_warm_starts_from_estimate() {
    let store = started_store(ServerType::WithEstimator);
    let mut operator = manual_client(&store);
    operator.write_field(TagField::X, &[1.0, 2.0, 3.0, 4.0]).unwrap();
    operator.write_field(TagField::XHat, &[9.0, 8.0, 7.0, 6.0]).unwrap();

    let (solver, seen) = RecordingSolver::new(vec![0.0, 0.0]);
    let mut controller = RealtimeController::new(
        store.client_options(ClientType::Controller),
        module_options(false, true),
        solver,
    )
    .unwrap();
    assert!(controller.init(&[0.0, 0.0]));
    assert!(controller.asynchronous_step().is_completed());

    assert_eq!(seen.lock().as_slice(), &[vec![9.0, 8.0, 7.0, 6.0]]);
    assert_eq!(store.snapshot(TagField::XInit.path()), Some(vec![9.0, 8.0, 7.0, 6.0]));
}

#[test]
fn output_feedback_needs_an_estimator_section() {
    let store = started_store(ServerType::Basic);
    let (solver, _) = RecordingSolver::new(vec![0.0, 0.0]);
    let result = RealtimeController::new(
        store.client_options(ClientType::Controller),
        module_options(false, true),
        solver,
    );
    assert!(matches!(result, Err(LinkError::Config(_))));
}

#[test]
fn simulator_runs_regardless_of_flags_and_switches() {
    let store = started_store(ServerType::WithEstimator);
    let mut operator = manual_client(&store);
    let mut simulator = RealtimeSimulator::new(
        store.client_options(ClientType::Simulator),
        module_options(true, false),
        hold_plant(),
    )
    .unwrap();
    assert!(simulator.init(&X0));
    assert_eq!(store.snapshot(TagField::X.path()), Some(X0.to_vec()));

    operator.update_flags(Selector::All, &[1.0; 5]).unwrap();
    operator.write_field(TagField::UOpt, &[0.5, 0.0]).unwrap();

    assert!(simulator.asynchronous_step().is_completed());
    let expected = vec![1.5, 0.5, 134.14, 130.0];
    assert_eq!(store.snapshot(TagField::X.path()), Some(expected.clone()));
    assert_eq!(store.snapshot(TagField::Y.path()), Some(expected));
    assert_eq!(store.snapshot(TagField::U.path()), Some(vec![0.5, 0.0]));
    assert_eq!(simulator.state().iter_count, 1);
}

#[test]
fn critical_fault_disables_until_restart() {
    let mut store = started_store(ServerType::WithEstimator);
    let mut simulator = RealtimeSimulator::new(
        store.client_options(ClientType::Simulator),
        module_options(false, false),
        hold_plant(),
    )
    .unwrap();
    assert!(simulator.init(&X0));

    store.stop().unwrap();
    assert!(matches!(simulator.asynchronous_step(), CycleOutcome::Faulted(_)));
    assert!(!simulator.state().enabled);
    assert_eq!(simulator.asynchronous_step(), CycleOutcome::Disabled);

    // Nothing to reconnect to.
    assert!(matches!(simulator.start(), Err(LinkError::Connection { .. })));
    assert!(!simulator.state().enabled);
}

#[test]
fn init_against_unreachable_store_leaves_module_disabled() {
    let mut store = started_store(ServerType::WithEstimator);
    let options = store.client_options(ClientType::Simulator);
    store.stop().unwrap();

    let mut simulator = RealtimeSimulator::new(options, module_options(false, false), hold_plant()).unwrap();
    assert!(!simulator.init(&X0));
    assert!(!simulator.state().enabled);
    assert!(!simulator.state().initialized);

    let module = shared(simulator);
    assert!(matches!(
        PeriodicTrigger::for_module(module),
        Err(LinkError::NotInitialized(_))
    ));
}

#[test]
fn state_feedback_estimator_copies_the_plant_state() {
    let store = started_store(ServerType::WithEstimator);
    let mut operator = manual_client(&store);
    let mut estimator = RealtimeEstimator::new(
        store.client_options(ClientType::Estimator),
        module_options(false, false),
        EstimatorKind::StateFeedback,
    )
    .unwrap();
    assert_eq!(estimator.capability(), EstimatorCapability::StateFeedback);
    assert!(estimator.init(&X0));
    assert_eq!(store.snapshot(TagField::XHat.path()), Some(X0.to_vec()));

    operator.write_field(TagField::X, &[2.0, 3.0, 4.0, 5.0]).unwrap();
    assert!(estimator.asynchronous_step().is_completed());
    assert_eq!(store.snapshot(TagField::XHat.path()), Some(vec![2.0, 3.0, 4.0, 5.0]));
}

#[test]
fn filter_estimator_feeds_measurements_and_publishes_parameters() {
    let store = started_store(ServerType::WithEstimator);
    let mut operator = manual_client(&store);
    operator.write_field(TagField::Y, &[1.0, 1.0, 2.0, 2.0]).unwrap();
    operator.write_field(TagField::UOpt, &[0.4, 0.6]).unwrap();
    operator.write_field(TagField::P, &[3.0, 4.0]).unwrap();

    let inputs = Arc::new(Mutex::new(None));
    let filter = FixedFilter { inputs: inputs.clone() };
    let mut estimator = RealtimeEstimator::new(
        store.client_options(ClientType::Estimator),
        module_options(false, false),
        EstimatorKind::ExtendedKalman(Box::new(filter)),
    )
    .unwrap();
    assert_eq!(estimator.capability(), EstimatorCapability::ExtendedKalman);
    assert!(estimator.init(&X0));

    assert!(estimator.asynchronous_step().is_completed());
    assert_eq!(
        inputs.lock().clone(),
        Some((vec![1.0, 1.0, 2.0, 2.0], vec![0.4, 0.6], vec![3.0, 4.0]))
    );
    assert_eq!(store.snapshot(TagField::XHat.path()), Some(vec![0.1, 0.2, 0.3, 0.4]));
    assert_eq!(store.snapshot(TagField::PHat.path()), Some(vec![5.0, 6.0]));
}

#[test]
fn estimator_is_gated_on_the_simulator_flag() {
    let store = started_store(ServerType::WithEstimator);
    let mut operator = manual_client(&store);
    let mut estimator = RealtimeEstimator::new(
        store.client_options(ClientType::Estimator),
        module_options(false, false),
        EstimatorKind::StateFeedback,
    )
    .unwrap();
    assert!(estimator.init(&X0));

    operator.set_flag(Slot::Simulator, true).unwrap();
    assert_eq!(
        estimator.asynchronous_step(),
        CycleOutcome::Skipped(StatusCheck::UpstreamFault(Slot::Simulator))
    );
    // The controller's flag is not upstream of the estimator.
    operator.update_flags(Selector::All, &[1.0, 0.0, 0.0, 0.0, 0.0]).unwrap();
    assert!(estimator.asynchronous_step().is_completed());
}

#[test]
fn construction_rejects_mismatched_setups() {
    let basic = started_store(ServerType::Basic);
    assert!(matches!(
        RealtimeEstimator::new(
            basic.client_options(ClientType::Estimator),
            module_options(false, false),
            EstimatorKind::StateFeedback,
        ),
        Err(LinkError::Config(_))
    ));

    let store = started_store(ServerType::WithEstimator);
    assert!(matches!(
        RealtimeSimulator::new(
            store.client_options(ClientType::Controller),
            module_options(false, false),
            hold_plant(),
        ),
        Err(LinkError::Config(_))
    ));

    let (solver, _) = RecordingSolver::new(vec![0.0, 0.0]);
    let mut bad_cycle = module_options(false, false);
    bad_cycle.cycle_time = 0.0;
    assert!(matches!(
        RealtimeController::new(store.client_options(ClientType::Controller), bad_cycle, solver),
        Err(LinkError::Config(_))
    ));
}

#[test]
fn completed_cycles_publish_monitoring_diagnostics() {
    let store = started_store(ServerType::WithMonitoring);
    let mut simulator = RealtimeSimulator::new(
        store.client_options(ClientType::Simulator),
        module_options(false, false),
        hold_plant(),
    )
    .unwrap();
    assert!(simulator.init(&X0));
    assert!(simulator.asynchronous_step().is_completed());

    let iterations = store.snapshot(TagField::Iterations.path()).unwrap();
    assert_eq!(iterations, vec![0.0, 1.0, 0.0, 0.0, 0.0]);
    let step_times = store.snapshot(TagField::StepTimes.path()).unwrap();
    assert!(step_times[Slot::Simulator.index()] >= 0.0);
    assert_eq!(step_times[Slot::Controller.index()], 0.0);
}

#[test]
fn telemetry_counts_every_outcome() {
    let store = started_store(ServerType::WithEstimator);
    let mut operator = manual_client(&store);
    let telemetry = Telemetry::new();
    let (solver, _) = RecordingSolver::new(vec![0.1, 0.1]);
    let mut controller = RealtimeController::new(
        store.client_options(ClientType::Controller),
        module_options(true, false),
        solver,
    )
    .unwrap()
    .with_telemetry(telemetry.clone());
    assert!(controller.init(&[0.0, 0.0]));

    assert!(matches!(controller.asynchronous_step(), CycleOutcome::Skipped(_)));
    operator.set_switch(Slot::Controller, true).unwrap();
    assert!(controller.asynchronous_step().is_completed());

    let metrics = telemetry.metrics.lock();
    let role = metrics.role(Slot::Controller);
    assert_eq!(role.cycles, 2);
    assert_eq!(role.completed, 1);
    assert_eq!(role.skipped, 1);
    assert_eq!(role.step_time_us.len(), 1);
    assert_eq!(metrics.role(Slot::Simulator).cycles, 0);
    drop(metrics);

    let events = telemetry.recorder.drain();
    assert_eq!(events.len(), 2);
    assert!(events[0].to_csv_row().contains("CycleSkipped"));
}

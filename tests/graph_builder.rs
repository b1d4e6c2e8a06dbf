// tests/graph_builder.rs

use std::error::Error;

use tractflow::dag::{build_graph, CommandTemplate, StepDescriptor};
use tractflow::errors::GraphError;
use tractflow_test_utils::builders::StepBuilder;
use tractflow_test_utils::init_tracing;

type TestResult = Result<(), Box<dyn Error>>;

#[test]
fn empty_pipeline_is_rejected() {
    init_tracing();
    assert_eq!(build_graph(vec![]).unwrap_err(), GraphError::EmptyPipeline);
}

#[test]
fn duplicate_step_ids_are_rejected() {
    let steps = vec![
        StepBuilder::new("a").build(),
        StepBuilder::new("b").build(),
        StepBuilder::new("a").build(),
    ];

    let err = build_graph(steps).unwrap_err();
    assert_eq!(err, GraphError::DuplicateStepId("a".to_string()));
    assert_eq!(err.step(), Some("a"));
}

#[test]
fn self_reference_is_rejected() {
    let steps = vec![StepBuilder::new("a").after("a").build()];

    let err = build_graph(steps).unwrap_err();
    assert!(matches!(err, GraphError::SelfReference { ref step, .. } if step == "a"));
}

#[test]
fn reference_to_unknown_step_is_dangling() {
    let steps = vec![StepBuilder::new("b").after("ghost").build()];

    match build_graph(steps).unwrap_err() {
        GraphError::DanglingReference { step, input, target } => {
            assert_eq!(step, "b");
            assert_eq!(input, "ghost");
            assert!(target.contains("ghost"));
        }
        other => panic!("expected DanglingReference, got {other:?}"),
    }
}

#[test]
fn reference_to_unknown_output_is_dangling() {
    let steps = vec![
        StepBuilder::new("a").build(),
        StepDescriptor::new("b", CommandTemplate::new("tool"))
            .step_input("x", "a", "missing")
            .output("out", "b.out"),
    ];

    match build_graph(steps).unwrap_err() {
        GraphError::DanglingReference { step, target, .. } => {
            assert_eq!(step, "b");
            assert!(target.contains("missing"), "target was {target}");
        }
        other => panic!("expected DanglingReference, got {other:?}"),
    }
}

#[test]
fn cycles_are_rejected() {
    let steps = vec![
        StepBuilder::new("a").after("c").build(),
        StepBuilder::new("b").after("a").build(),
        StepBuilder::new("c").after("b").build(),
    ];

    match build_graph(steps).unwrap_err() {
        GraphError::CyclicDependency { step } => {
            assert!(["a", "b", "c"].contains(&step.as_str()));
        }
        other => panic!("expected CyclicDependency, got {other:?}"),
    }
}

#[test]
fn duplicate_output_names_are_rejected() {
    let step = StepDescriptor::new("a", CommandTemplate::new("tool"))
        .output("out", "one.txt")
        .output("out", "two.txt");

    assert_eq!(
        build_graph(vec![step]).unwrap_err(),
        GraphError::DuplicateOutput {
            step: "a".to_string(),
            output: "out".to_string(),
        }
    );
}

#[test]
fn duplicate_input_names_are_rejected() {
    let step = StepDescriptor::new("a", CommandTemplate::new("tool"))
        .external_input("in", "/data/x")
        .external_input("in", "/data/y")
        .output("out", "a.out");

    assert!(matches!(
        build_graph(vec![step]).unwrap_err(),
        GraphError::DuplicateInput { .. }
    ));
}

#[test]
fn output_paths_must_stay_inside_the_working_directory() {
    for bad in ["../escape.txt", "/abs/path.txt", "", "nested/../../x"] {
        let step = StepDescriptor::new("a", CommandTemplate::new("tool")).output("out", bad);
        assert!(
            matches!(
                build_graph(vec![step]).unwrap_err(),
                GraphError::InvalidOutputPath { .. }
            ),
            "path {bad:?} should be rejected"
        );
    }

    let nested = StepDescriptor::new("a", CommandTemplate::new("tool")).output("out", "sub/dir/x.txt");
    assert!(build_graph(vec![nested]).is_ok());
}

#[test]
fn outputs_cannot_shadow_engine_managed_files() {
    for reserved in [
        "command.txt",
        "./stdout.log",
        "stderr.log",
        "inputs",
        "inputs/t1/T1w.nii.gz",
    ] {
        let step = StepDescriptor::new("a", CommandTemplate::new("true")).output("out", reserved);
        match build_graph(vec![step]).unwrap_err() {
            GraphError::InvalidOutputPath { step, output, .. } => {
                assert_eq!(step, "a");
                assert_eq!(output, "out");
            }
            other => panic!("{reserved:?}: expected InvalidOutputPath, got {other:?}"),
        }
    }

    // Same names below a subdirectory are ordinary outputs.
    let step = StepDescriptor::new("a", CommandTemplate::new("tool"))
        .output("log", "logs/stderr.log")
        .output("cmd", "qc/command.txt");
    assert!(build_graph(vec![step]).is_ok());
}

#[test]
fn non_finite_parameters_are_rejected() {
    let step = StepBuilder::new("a").param("frac", f64::NAN).build();

    assert!(matches!(
        build_graph(vec![step]).unwrap_err(),
        GraphError::InvalidParameter { ref param, .. } if param == "frac"
    ));
}

#[test]
fn unknown_placeholders_are_rejected_at_build_time() {
    let step = StepDescriptor::new(
        "a",
        CommandTemplate::new("tool").args(["{inputs.nope}", "{outputs.out}"]),
    )
    .output("out", "a.out");

    assert_eq!(
        build_graph(vec![step]).unwrap_err(),
        GraphError::UnknownPlaceholder {
            step: "a".to_string(),
            placeholder: "{inputs.nope}".to_string(),
        }
    );
}

#[test]
fn diamond_graph_exposes_dependencies_and_order() -> TestResult {
    init_tracing();
    let steps = vec![
        StepBuilder::new("d").after("b").after("c").build(),
        StepBuilder::new("b").after("a").build(),
        StepBuilder::new("a").external("src", "/data/in.nii").build(),
        StepBuilder::new("c").after("a").build(),
    ];

    let graph = build_graph(steps)?;

    assert_eq!(graph.len(), 4);
    assert_eq!(graph.roots(), vec!["a"]);
    assert_eq!(graph.dependencies_of("d"), ["b".to_string(), "c".to_string()]);
    assert_eq!(graph.dependents_of("a").len(), 2);
    assert_eq!(
        graph.descendants_of("a").into_iter().collect::<Vec<_>>(),
        vec!["b", "c", "d"]
    );

    let order = graph.topo_order();
    let pos = |id: &str| order.iter().position(|s| s == id).unwrap();
    assert!(pos("a") < pos("b"));
    assert!(pos("a") < pos("c"));
    assert!(pos("b") < pos("d"));
    assert!(pos("c") < pos("d"));

    let dot = graph.to_dot();
    assert!(dot.contains("digraph"));
    assert!(dot.contains("out -> b"));

    Ok(())
}

#[test]
fn reading_two_outputs_of_one_producer_is_a_single_dependency() -> TestResult {
    let producer = StepDescriptor::new("flirt", CommandTemplate::new("flirt"))
        .output("out_file", "t1.nii.gz")
        .output("out_matrix_file", "t1.mat");
    let consumer = StepDescriptor::new("concat", CommandTemplate::new("convert_xfm"))
        .step_input("image", "flirt", "out_file")
        .step_input("matrix", "flirt", "out_matrix_file")
        .output("out", "x.mat");

    let graph = build_graph(vec![producer, consumer])?;
    assert_eq!(graph.dependencies_of("concat"), ["flirt".to_string()]);
    assert_eq!(graph.dependents_of("flirt"), ["concat".to_string()]);
    Ok(())
}

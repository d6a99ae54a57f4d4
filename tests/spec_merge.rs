// tests/spec_merge.rs

use std::collections::BTreeMap;

use proptest::prelude::*;

use runplane::run::{EnvEntry, K8sSpec, PortSpec, ResourceSpec, merge_k8s};
use runplane_test_utils::builders::labels;

fn envs(pairs: &[(&str, &str)]) -> Vec<EnvEntry> {
    pairs
        .iter()
        .map(|(name, value)| EnvEntry {
            name: name.to_string(),
            value: value.to_string(),
        })
        .collect()
}

#[test]
fn run_overrides_win_and_task_defaults_fill_gaps() {
    let task = K8sSpec {
        envs: envs(&[("A", "task"), ("B", "task")]),
        secrets: vec!["db".to_string(), "s3".to_string()],
        resources: ResourceSpec {
            cpu_request: Some("500m".to_string()),
            memory_limit: Some("1Gi".to_string()),
            ..Default::default()
        },
        labels: labels(&[("team", "ml"), ("tier", "batch")]),
        replicas: Some(2),
        backoff_limit: Some(4),
        service_ports: vec![PortSpec {
            port: 80,
            target_port: Some(8080),
            name: None,
        }],
        ..Default::default()
    };
    let run = K8sSpec {
        envs: envs(&[("B", "run"), ("C", "run")]),
        secrets: vec!["s3".to_string(), "api".to_string()],
        resources: ResourceSpec {
            cpu_request: Some("2".to_string()),
            ..Default::default()
        },
        labels: labels(&[("tier", "interactive")]),
        schedule: Some("*/5 * * * *".to_string()),
        ..Default::default()
    };

    let merged = merge_k8s(&run, &task);

    assert_eq!(merged.envs, envs(&[("A", "task"), ("B", "run"), ("C", "run")]));
    assert_eq!(merged.secrets, ["db", "s3", "api"]);
    assert_eq!(merged.resources.cpu_request.as_deref(), Some("2"));
    assert_eq!(merged.resources.memory_limit.as_deref(), Some("1Gi"));
    assert_eq!(merged.labels, labels(&[("team", "ml"), ("tier", "interactive")]));
    assert_eq!(merged.replicas, Some(2));
    assert_eq!(merged.backoff_limit, Some(4));
    assert_eq!(merged.schedule.as_deref(), Some("*/5 * * * *"));
    assert_eq!(merged.service_ports, task.service_ports);
}

#[test]
fn merging_with_nothing_changes_nothing() {
    let spec = K8sSpec {
        envs: envs(&[("A", "1")]),
        secrets: vec!["db".to_string()],
        node_selector: BTreeMap::from([("pool".to_string(), "gpu".to_string())]),
        runtime_class: Some("nvidia".to_string()),
        ..Default::default()
    };
    let empty = K8sSpec::default();

    assert_eq!(merge_k8s(&spec, &empty), spec);
    assert_eq!(merge_k8s(&empty, &spec), spec);
}

fn env_list() -> impl Strategy<Value = Vec<EnvEntry>> {
    // Unique names per side, drawn from a small alphabet so sides overlap.
    prop::collection::btree_map("[A-F]", "[a-z]{1,3}", 0..6).prop_map(|map| {
        map.into_iter()
            .map(|(name, value)| EnvEntry { name, value })
            .collect()
    })
}

proptest! {
    #[test]
    fn every_env_name_appears_once_with_the_run_value_winning(
        run in env_list(),
        task in env_list(),
    ) {
        let run_spec = K8sSpec { envs: run.clone(), ..Default::default() };
        let task_spec = K8sSpec { envs: task.clone(), ..Default::default() };

        let merged = merge_k8s(&run_spec, &task_spec).envs;

        let mut seen = std::collections::BTreeSet::new();
        for entry in &merged {
            prop_assert!(seen.insert(entry.name.clone()), "duplicate env {}", entry.name);
        }

        for entry in &task {
            let expected = run.iter().find(|r| r.name == entry.name).unwrap_or(entry);
            prop_assert!(merged.contains(expected));
        }
        for entry in &run {
            prop_assert!(merged.contains(entry));
        }

        // Run entries keep their order at the tail.
        prop_assert_eq!(&merged[merged.len() - run.len()..], &run[..]);
    }
}

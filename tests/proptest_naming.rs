//! Property-based tests using proptest
//!
//! These tests verify resource naming and the per-dataset fan-out using
//! randomized demo names and dataset folder sets.

use demo_data::dataset::DatasetFolders;
use demo_data::stack::naming::{Namer, Scope};
use demo_data::stack::query::preview_query_logical_name;
use demo_data::stack::{DemoStack, StackProps};
use proptest::prelude::*;
use std::collections::{BTreeSet, HashSet};
use std::path::PathBuf;

fn arb_demo_name() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9]{0,15}"
}

fn arb_logical_name() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9_-]{0,30}"
}

/// Dataset folder names as they appear in IMDB style asset trees
fn arb_folders() -> impl Strategy<Value = BTreeSet<String>> {
    prop::collection::btree_set("[a-z]{1,8}(\\.[a-z]{1,8})?", 0..12)
}

fn arb_scope() -> impl Strategy<Value = Scope> {
    prop_oneof![Just(Scope::Account), Just(Scope::Global)]
}

fn props(folders: &BTreeSet<String>) -> StackProps {
    StackProps {
        demo_name: "workshop".to_string(),
        account: "111122223333".to_string(),
        region: "eu-central-1".to_string(),
        assets_dir: PathBuf::from("/nonexistent/assets"),
        scripts_dir: PathBuf::from("/nonexistent/scripts"),
        datasets: DatasetFolders::new(folders.iter().cloned()),
        max_azs: 3,
    }
}

proptest! {
    /// The same inputs always produce the same name
    #[test]
    fn naming_is_deterministic(
        demo in arb_demo_name(),
        logical in arb_logical_name(),
        scope in arb_scope(),
    ) {
        let a = Namer::new(&demo, "111122223333", "eu-central-1");
        let b = Namer::new(&demo, "111122223333", "eu-central-1");
        prop_assert_eq!(
            a.name_resource(&logical, scope, "-"),
            b.name_resource(&logical, scope, "-")
        );
    }

    /// Names carry the project prefix first and the demo name last
    #[test]
    fn naming_layout(
        demo in arb_demo_name(),
        logical in arb_logical_name(),
    ) {
        let namer = Namer::new(&demo, "111122223333", "eu-central-1");
        let global = namer.name_resource(&logical, Scope::Global, "-");
        prop_assert!(global.starts_with("demo-"));
        let demo_suffix = format!("-{}", demo);
        prop_assert!(global.ends_with(&demo_suffix));
        prop_assert!(global.contains("-111122223333-eu-central-1-"));

        let local = namer.name_resource(&logical, Scope::Account, "-");
        prop_assert_eq!(local, format!("demo-{}-{}", logical, demo));
    }

    /// Two deployments with different demo names never share a name
    #[test]
    fn demo_names_do_not_collide(
        demo_a in arb_demo_name(),
        demo_b in arb_demo_name(),
        logical in arb_logical_name(),
        scope in arb_scope(),
    ) {
        prop_assume!(demo_a != demo_b);
        let a = Namer::new(&demo_a, "111122223333", "eu-central-1");
        let b = Namer::new(&demo_b, "111122223333", "eu-central-1");
        prop_assert_ne!(
            a.name_resource(&logical, scope, "-"),
            b.name_resource(&logical, scope, "-")
        );
    }

    /// One preview query per folder, each with a distinct name
    #[test]
    fn preview_queries_fan_out_per_folder(folders in arb_folders()) {
        let mut stack = DemoStack::new(props(&folders)).unwrap();
        stack.with_athena(false).unwrap();

        let athena = stack.athena().unwrap();
        prop_assert_eq!(athena.preview_queries.len(), folders.len());

        let graph = stack.graph();
        let names: HashSet<&str> = athena
            .preview_queries
            .iter()
            .filter_map(|q| graph.get(q).and_then(|r| r.property_str("Name")))
            .collect();
        prop_assert_eq!(names.len(), folders.len());
        for folder in &folders {
            let expected = format!("demo_{}_workshop", preview_query_logical_name(folder));
            prop_assert!(names.contains(expected.as_str()));
        }

        for query in graph.of_kind("athena-named-query") {
            prop_assert!(query.depends_on.contains(&athena.workgroup.logical_id));
        }
        prop_assert!(graph.validate().is_ok());
    }

    /// The crawler has one S3 target per folder
    #[test]
    fn crawler_targets_fan_out_per_folder(folders in arb_folders()) {
        let stack = DemoStack::new(props(&folders)).unwrap();
        let crawler = stack.graph().get(&stack.catalog().crawler).unwrap();
        let targets = crawler.properties["Targets"]["S3Targets"].as_array().unwrap();
        prop_assert_eq!(targets.len(), folders.len());
    }
}

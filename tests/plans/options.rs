use std::collections::HashMap;

use test_case::test_case;

use loadgraph::domain_graph::config::DomainModelConfig;
use loadgraph::domain_graph::errors::DomainGraphError;
use loadgraph::domain_graph::model::FetchProfile;
use loadgraph::fetch_strategy::{FetchStyle, LoadOptions};
use loadgraph::load_plan::Fetch;
use loadgraph::plan_builder::association_key::AssociationKey;
use loadgraph::plan_builder::build_entity_load_plan;
use loadgraph::plan_builder::errors::PlanBuildError;

use crate::fixtures::*;

fn lazy_orders_graph() -> loadgraph::domain_graph::DomainGraph {
    let order = entity(
        "Order",
        "orders",
        simple_id("id", &["id"]),
        vec![basic("memo", &["memo"])],
    );
    let customer = entity(
        "Customer",
        "customers",
        simple_id("id", &["id"]),
        vec![collection_assoc(
            "orders",
            collection(
                "Customer.orders",
                "orders",
                &["customer_id"],
                entity_elements("Order", &["id"]),
            ),
            AssociationKey::new("orders", ["customer_id"]),
            FetchStyle::Select,
            true,
        )],
    );
    let mut graph = graph(vec![order, customer]);
    graph.add_fetch_profile(FetchProfile {
        name: "customer-with-orders".to_string(),
        overrides: HashMap::from([("Customer.orders".to_string(), FetchStyle::Join)]),
    });
    graph
}

#[test]
fn inactive_profile_leaves_collection_delayed() {
    let graph = lazy_orders_graph();
    let plan = build_entity_load_plan(&graph, "Customer", &LoadOptions::default()).unwrap();
    let root = plan.root_entity_return().unwrap();

    let Fetch::Collection(orders) = &root.fetches[0] else {
        panic!("expected a collection fetch for `orders`");
    };
    assert_eq!(orders.strategy.style, FetchStyle::Select);
    assert!(orders.element.is_none());
    assert!(orders.space_uid.is_none());
}

#[test]
fn active_profile_flips_collection_to_join_fetch() {
    let graph = lazy_orders_graph();
    let options = LoadOptions::default().with_fetch_profile("customer-with-orders");
    let plan = build_entity_load_plan(&graph, "Customer", &options).unwrap();
    let root = plan.root_entity_return().unwrap();

    let Fetch::Collection(orders) = &root.fetches[0] else {
        panic!("expected a collection fetch for `orders`");
    };
    assert!(orders.strategy.is_join());
    assert!(orders.element.is_some());
    assert!(orders.space_uid.is_some());
}

#[test]
fn unknown_active_profile_is_rejected() {
    let graph = lazy_orders_graph();
    let options = LoadOptions::default().with_fetch_profile("no-such-profile");
    let err = build_entity_load_plan(&graph, "Customer", &options).unwrap_err();
    assert_eq!(
        err,
        PlanBuildError::Graph(DomainGraphError::FetchProfile {
            profile: "no-such-profile".to_string()
        })
    );
}

fn chain_graph() -> loadgraph::domain_graph::DomainGraph {
    let a = entity(
        "A",
        "a",
        simple_id("id", &["id"]),
        vec![entity_assoc(
            "b",
            "B",
            AssociationKey::new("a", ["b_id"]),
            FetchStyle::Join,
            false,
            false,
        )],
    );
    let b = entity(
        "B",
        "b",
        simple_id("id", &["id"]),
        vec![entity_assoc(
            "c",
            "C",
            AssociationKey::new("b", ["c_id"]),
            FetchStyle::Join,
            false,
            false,
        )],
    );
    let c = entity("C", "c", simple_id("id", &["id"]), vec![basic("v", &["v"])]);
    graph(vec![a, b, c])
}

#[test_case(None, 3 ; "unbounded depth joins the whole chain")]
#[test_case(Some(1), 2 ; "depth one keeps only the first join")]
#[test_case(Some(0), 1 ; "depth zero demotes every join")]
fn max_fetch_depth_bounds_the_joined_subgraph(
    max_fetch_depth: Option<usize>,
    expected_spaces: usize,
) {
    let graph = chain_graph();
    let options = LoadOptions {
        max_fetch_depth,
        ..LoadOptions::default()
    };
    let plan = build_entity_load_plan(&graph, "A", &options).unwrap();
    assert_eq!(plan.query_spaces.len(), expected_spaces);
}

#[test]
fn demoted_deep_association_still_has_a_fetch_node() {
    let graph = chain_graph();
    let options = LoadOptions {
        max_fetch_depth: Some(1),
        ..LoadOptions::default()
    };
    let plan = build_entity_load_plan(&graph, "A", &options).unwrap();
    let root = plan.root_entity_return().unwrap();
    let Fetch::Entity(b_fetch) = &root.fetches[0] else {
        panic!("expected entity fetch for `b`");
    };
    let Fetch::Entity(c_fetch) = &b_fetch.fetches[0] else {
        panic!("expected entity fetch for `b.c`");
    };
    assert_eq!(c_fetch.strategy.style, FetchStyle::Select);
    assert!(c_fetch.fetches.is_empty());
}

#[test]
fn second_joined_collection_is_demoted_to_select() {
    let customer = entity(
        "Customer",
        "customers",
        simple_id("id", &["id"]),
        vec![
            collection_assoc(
                "tags",
                collection(
                    "Customer.tags",
                    "customer_tags",
                    &["customer_id"],
                    basic_elements(&["tag"]),
                ),
                AssociationKey::new("customer_tags", ["customer_id"]),
                FetchStyle::Join,
                false,
            ),
            collection_assoc(
                "notes",
                collection(
                    "Customer.notes",
                    "customer_notes",
                    &["customer_id"],
                    basic_elements(&["note"]),
                ),
                AssociationKey::new("customer_notes", ["customer_id"]),
                FetchStyle::Join,
                false,
            ),
        ],
    );
    let graph = graph(vec![customer]);

    let plan = build_entity_load_plan(&graph, "Customer", &LoadOptions::default()).unwrap();
    let root = plan.root_entity_return().unwrap();
    assert_eq!(root.fetches.len(), 2);

    let Fetch::Collection(tags) = &root.fetches[0] else {
        panic!("expected a collection fetch for `tags`");
    };
    let Fetch::Collection(notes) = &root.fetches[1] else {
        panic!("expected a collection fetch for `notes`");
    };
    assert!(tags.strategy.is_join());
    assert_eq!(notes.strategy.style, FetchStyle::Select);
}

#[test]
fn enabled_filter_forces_collection_off_the_join_path() {
    let mut orders = collection(
        "Customer.orders",
        "orders",
        &["customer_id"],
        basic_elements(&["id"]),
    );
    orders.filters = vec!["activeOrders".to_string()];
    let customer = entity(
        "Customer",
        "customers",
        simple_id("id", &["id"]),
        vec![collection_assoc(
            "orders",
            orders,
            AssociationKey::new("orders", ["customer_id"]),
            FetchStyle::Join,
            false,
        )],
    );
    let graph = graph(vec![customer]);

    let unfiltered =
        build_entity_load_plan(&graph, "Customer", &LoadOptions::default()).unwrap();
    let Fetch::Collection(orders) = &unfiltered.root_entity_return().unwrap().fetches[0] else {
        panic!("expected a collection fetch");
    };
    assert!(orders.strategy.is_join());

    let options = LoadOptions::default().with_filter("activeOrders");
    let filtered = build_entity_load_plan(&graph, "Customer", &options).unwrap();
    let Fetch::Collection(orders) = &filtered.root_entity_return().unwrap().fetches[0] else {
        panic!("expected a collection fetch");
    };
    assert_eq!(orders.strategy.style, FetchStyle::Select);
}

#[test]
fn yaml_model_builds_the_same_plan_as_the_programmatic_model() -> anyhow::Result<()> {
    let yaml = r#"
name: shop_model
entities:
  - name: Order
    table: orders
    id:
      attribute: id
      columns: [id]
    attributes:
      - name: memo
        basic: { columns: [memo] }
      - name: customer
        nullable: true
        association:
          entity: Customer
          key: { table: orders, columns: [customer_id] }
          fetch: { lazy: false, style: join }
  - name: Customer
    table: customers
    id:
      attribute: id
      columns: [id]
    attributes:
      - name: name
        basic: { columns: [name] }
      - name: orders
        association:
          collection:
            role: Customer.orders
            table: orders
            key_columns: [customer_id]
            element: { entity: { target: Order, columns: [id] } }
          key: { table: orders, columns: [customer_id] }
          fetch: { lazy: false, style: join }
"#;
    let configured = DomainModelConfig::from_yaml_str(yaml)?.to_domain_graph()?;
    let programmatic = order_customer_graph();

    let options = LoadOptions::default();
    let from_config = build_entity_load_plan(&configured, "Order", &options)?;
    let from_code = build_entity_load_plan(&programmatic, "Order", &options)?;
    assert_eq!(from_config, from_code);
    Ok(())
}

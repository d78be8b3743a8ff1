use loadgraph::domain_graph::model::CollectionPart;
use loadgraph::fetch_strategy::{FetchStyle, LoadOptions};
use loadgraph::load_plan::{
    CollectionElementGraph, CollectionIndexGraph, Disposition, Fetch,
};
use loadgraph::plan_builder::association_key::AssociationKey;
use loadgraph::plan_builder::{build_collection_load_plan, build_entity_load_plan};

use crate::fixtures::*;

#[test]
fn root_collection_of_basic_elements_is_sole_return() {
    let customer = entity(
        "Customer",
        "customers",
        simple_id("id", &["id"]),
        vec![collection_assoc(
            "tags",
            collection(
                "Customer.tags",
                "customer_tags",
                &["customer_id"],
                basic_elements(&["tag"]),
            ),
            AssociationKey::new("customer_tags", ["customer_id"]),
            FetchStyle::Select,
            true,
        )],
    );
    let graph = graph(vec![customer]);

    let plan =
        build_collection_load_plan(&graph, "Customer.tags", &LoadOptions::default()).unwrap();
    assert_eq!(plan.disposition, Disposition::CollectionInitializer);
    assert_eq!(plan.returns.len(), 1);

    let root = plan.root_collection_return().unwrap();
    assert_eq!(root.role, "Customer.tags");
    // basic-typed elements never produce a fetch-owner frame
    assert_eq!(root.element, Some(CollectionElementGraph::Basic));
    assert!(root.index.is_none());
    assert_eq!(plan.query_spaces.len(), 1);
}

#[test]
fn root_collection_with_entity_elements_walks_the_element_graph() {
    let graph = order_customer_graph();

    let plan =
        build_collection_load_plan(&graph, "Customer.orders", &LoadOptions::default()).unwrap();
    let root = plan.root_collection_return().unwrap();
    let Some(CollectionElementGraph::Entity(element)) = &root.element else {
        panic!("expected an entity element graph");
    };
    assert_eq!(element.entity_name, "Order");
    assert_eq!(element.path.full_path(), "<elements>");

    // Order.customer reuses the root collection's key; a root-collection
    // registration carries no entity reference, so nothing is built for it
    assert!(element.fetches.is_empty());
}

#[test]
fn collection_fetch_under_entity_builds_element_back_reference() {
    // walking from Customer: the `orders` collection joins, and the element
    // Order's `customer` attribute resolves through the registry back to the
    // root Customer
    let graph = order_customer_graph();

    let plan = build_entity_load_plan(&graph, "Customer", &LoadOptions::default()).unwrap();
    let root = plan.root_entity_return().unwrap();

    let Fetch::Collection(orders) = &root.fetches[0] else {
        panic!("expected a collection fetch for `orders`");
    };
    assert_eq!(orders.role, "Customer.orders");
    assert!(orders.strategy.is_join());

    let Some(CollectionElementGraph::Entity(element)) = &orders.element else {
        panic!("expected an entity element graph");
    };
    assert_eq!(element.entity_name, "Order");
    assert_eq!(element.fetches.len(), 1);

    let Fetch::BidirectionalEntity(customer) = &element.fetches[0] else {
        panic!("expected a bidirectional reference for the element's `customer`");
    };
    assert_eq!(customer.entity_name, "Customer");
    assert_eq!(customer.target.space_uid, root.space_uid);
    assert!(customer.target.path.is_root());
}

#[test]
fn map_collection_with_entity_index_builds_index_graph() {
    let category = entity(
        "Category",
        "categories",
        simple_id("id", &["id"]),
        vec![basic("label", &["label"])],
    );
    let mut items = collection(
        "Catalog.itemsByCategory",
        "catalog_items",
        &["catalog_id"],
        basic_elements(&["sku"]),
    );
    items.index = Some(CollectionPart::Entity {
        target: "Category".to_string(),
        columns: vec!["category_id".to_string()],
    });
    let catalog = entity(
        "Catalog",
        "catalogs",
        simple_id("id", &["id"]),
        vec![collection_assoc(
            "itemsByCategory",
            items,
            AssociationKey::new("catalog_items", ["catalog_id"]),
            FetchStyle::Join,
            false,
        )],
    );
    let graph = graph(vec![category, catalog]);

    let plan = build_entity_load_plan(&graph, "Catalog", &LoadOptions::default()).unwrap();
    let root = plan.root_entity_return().unwrap();
    let Fetch::Collection(items) = &root.fetches[0] else {
        panic!("expected a collection fetch");
    };

    let Some(CollectionIndexGraph::Entity(index)) = &items.index else {
        panic!("expected an entity index graph");
    };
    assert_eq!(index.entity_name, "Category");
    assert_eq!(index.path.full_path(), "itemsByCategory.<index>");
    assert_eq!(items.element, Some(CollectionElementGraph::Basic));
}

#[test]
fn composite_elements_own_their_attribute_fetches() {
    let supplier = entity(
        "Supplier",
        "suppliers",
        simple_id("id", &["id"]),
        vec![basic("name", &["name"])],
    );
    let line_element = CollectionPart::Composite(composite(
        "OrderLine",
        vec![
            basic("qty", &["qty"]),
            entity_assoc(
                "supplier",
                "Supplier",
                AssociationKey::new("order_lines", ["supplier_id"]),
                FetchStyle::Join,
                false,
                false,
            ),
        ],
    ));
    let order = entity(
        "Order",
        "orders",
        simple_id("id", &["id"]),
        vec![collection_assoc(
            "lines",
            collection("Order.lines", "order_lines", &["order_id"], line_element),
            AssociationKey::new("order_lines", ["order_id"]),
            FetchStyle::Join,
            false,
        )],
    );
    let graph = graph(vec![supplier, order]);

    let plan = build_entity_load_plan(&graph, "Order", &LoadOptions::default()).unwrap();
    let root = plan.root_entity_return().unwrap();
    let Fetch::Collection(lines) = &root.fetches[0] else {
        panic!("expected a collection fetch for `lines`");
    };

    let Some(CollectionElementGraph::Composite(element)) = &lines.element else {
        panic!("expected a composite element graph");
    };
    assert_eq!(element.name, "OrderLine");
    assert_eq!(element.fetches.len(), 1);
    let Fetch::Entity(supplier_fetch) = &element.fetches[0] else {
        panic!("expected an entity fetch for the element's `supplier`");
    };
    assert_eq!(supplier_fetch.entity_name, "Supplier");
}

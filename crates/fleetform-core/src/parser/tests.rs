use super::*;
use crate::model::{AttrValue, ReplaceStrategy, ResourceAddress};

#[test]
fn test_parse_simple_resource() {
    let kdl = r#"
        resource "network" "main" {
            auto_create_subnetworks #false
            routing_mode "REGIONAL"
        }
    "#;

    let decls = parse_kdl_string(kdl).unwrap();
    assert_eq!(decls.len(), 1);

    let decl = &decls[0];
    assert_eq!(decl.address, ResourceAddress::new("network", "main"));
    assert_eq!(
        decl.attributes.get("auto_create_subnetworks"),
        Some(&AttrValue::Bool(false))
    );
    assert_eq!(
        decl.attributes.get("routing_mode"),
        Some(&AttrValue::String("REGIONAL".to_string()))
    );
    assert!(decl.depends_on.is_empty());
    assert!(!decl.flags.deletion_protected);
}

#[test]
fn test_parse_preserves_declaration_order() {
    let kdl = r#"
        resource "subnetwork" "b" { network "x"; ip_cidr_range "10.1.0.0/20" }
        resource "network" "a" {}
        resource "router" "c" { network "x" }
    "#;

    let names: Vec<String> = parse_kdl_string(kdl)
        .unwrap()
        .into_iter()
        .map(|d| d.address.name)
        .collect();
    assert_eq!(names, vec!["b", "a", "c"]);
}

#[test]
fn test_parse_reference() {
    let kdl = r#"
        resource "subnetwork" "nodes" {
            network (ref)"network.main.self_link"
            ip_cidr_range "10.0.0.0/20"
        }
    "#;

    let decl = &parse_kdl_string(kdl).unwrap()[0];
    match decl.attributes.get("network") {
        Some(AttrValue::Ref(r)) => {
            assert_eq!(r.target, ResourceAddress::new("network", "main"));
            assert_eq!(r.attribute, "self_link");
        }
        other => panic!("expected reference, got {:?}", other),
    }
}

#[test]
fn test_parse_invalid_reference() {
    let kdl = r#"
        resource "subnetwork" "nodes" {
            network (ref)"network.main"
        }
    "#;
    assert!(parse_kdl_string(kdl).is_err());
}

#[test]
fn test_parse_list_and_nested_block() {
    let kdl = r#"
        resource "database-instance" "main" {
            database_version "POSTGRES_15"
            region "asia-northeast1"
            settings {
                tier "db-custom-2-7680"
                ip_configuration {
                    ipv4_enabled #false
                    private_network (ref)"network.main.self_link"
                }
                database_flags "max_connections=200" "log_min_duration_statement=500"
            }
        }
    "#;

    let decl = &parse_kdl_string(kdl).unwrap()[0];
    let Some(AttrValue::Block(settings)) = decl.attributes.get("settings") else {
        panic!("settings should be a block");
    };
    assert_eq!(
        settings.get("tier"),
        Some(&AttrValue::String("db-custom-2-7680".to_string()))
    );
    assert!(matches!(settings.get("database_flags"), Some(AttrValue::List(v)) if v.len() == 2));

    let Some(AttrValue::Block(ip)) = settings.get("ip_configuration") else {
        panic!("ip_configuration should be a block");
    };
    assert!(matches!(ip.get("private_network"), Some(AttrValue::Ref(_))));

    // references inside nested blocks are still discovered
    assert_eq!(decl.attributes["settings"].references().len(), 1);
}

#[test]
fn test_parse_repeated_nodes_become_list() {
    let kdl = r#"
        resource "subnetwork" "nodes" {
            network "default"
            ip_cidr_range "10.0.0.0/20"
            secondary_ip_range range_name="pods" ip_cidr_range="10.4.0.0/14"
            secondary_ip_range range_name="services" ip_cidr_range="10.8.0.0/20"
        }
    "#;

    let decl = &parse_kdl_string(kdl).unwrap()[0];
    let Some(AttrValue::List(ranges)) = decl.attributes.get("secondary_ip_range") else {
        panic!("secondary_ip_range should be a list");
    };
    assert_eq!(ranges.len(), 2);
    let AttrValue::Block(first) = &ranges[0] else {
        panic!("range should be a block");
    };
    assert_eq!(
        first.get("range_name"),
        Some(&AttrValue::String("pods".to_string()))
    );
}

#[test]
fn test_parse_lifecycle_flags() {
    let kdl = r#"
        resource "database-instance" "main" {
            database_version "POSTGRES_15"
            region "asia-northeast1"
            settings { tier "db-f1-micro" }
            depends-on "service-networking-connection.private_vpc"
            deletion-protected #true
            replace-strategy "create-first"
        }
    "#;

    let decl = &parse_kdl_string(kdl).unwrap()[0];
    assert_eq!(
        decl.depends_on,
        vec![ResourceAddress::new(
            "service-networking-connection",
            "private_vpc"
        )]
    );
    assert!(decl.flags.deletion_protected);
    assert_eq!(decl.flags.replace_strategy, Some(ReplaceStrategy::CreateFirst));
    // lifecycle nodes are not attributes
    assert!(!decl.attributes.contains_key("depends-on"));
    assert!(!decl.attributes.contains_key("deletion-protected"));
}

#[test]
fn test_parse_bare_deletion_protected() {
    let kdl = r#"
        resource "network" "main" {
            deletion-protected
        }
    "#;
    assert!(parse_kdl_string(kdl).unwrap()[0].flags.deletion_protected);
}

#[test]
fn test_parse_unknown_replace_strategy() {
    let kdl = r#"
        resource "network" "main" {
            replace-strategy "sideways"
        }
    "#;
    let err = parse_kdl_string(kdl).unwrap_err();
    assert!(err.to_string().contains("sideways"));
}

#[test]
fn test_parse_resource_requires_type_and_name() {
    assert!(parse_kdl_string(r#"resource "network" {}"#).is_err());
}

#[test]
fn test_parse_unknown_top_level_node() {
    let err = parse_kdl_string(r#"service "api" {}"#).unwrap_err();
    assert!(err.to_string().contains("service"));
}

#[test]
fn test_parse_integer_and_float() {
    let kdl = r#"
        resource "redis-instance" "cache" {
            tier "BASIC"
            memory_size_gb 4
            ratio 0.5
        }
    "#;
    let decl = &parse_kdl_string(kdl).unwrap()[0];
    assert_eq!(decl.attributes.get("memory_size_gb"), Some(&AttrValue::Int(4)));
    assert_eq!(decl.attributes.get("ratio"), Some(&AttrValue::Float(0.5)));
}

#[test]
fn test_parse_kdl_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("infra.kdl");
    std::fs::write(&path, r#"resource "network" "main" {}"#).unwrap();

    let decls = parse_kdl_file(&path).unwrap();
    assert_eq!(decls.len(), 1);
}

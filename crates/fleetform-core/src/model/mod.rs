//! Declaration model
//!
//! Types shared by the parser, the schema registry and the graph builder.

mod resource;
mod value;

// Re-exports
pub use resource::*;
pub use value::*;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_round_trip() {
        let address: ResourceAddress = "database-instance.main".parse().unwrap();
        assert_eq!(address.resource_type, "database-instance");
        assert_eq!(address.name, "main");
        assert_eq!(address.to_string(), "database-instance.main");
    }

    #[test]
    fn test_address_rejects_missing_name() {
        assert!("network".parse::<ResourceAddress>().is_err());
        assert!(".main".parse::<ResourceAddress>().is_err());
    }

    #[test]
    fn test_reference_with_nested_path() {
        let reference: Reference = "cluster.primary.master_auth.cluster_ca_certificate"
            .parse()
            .unwrap();
        assert_eq!(reference.target, ResourceAddress::new("cluster", "primary"));
        assert_eq!(reference.attribute, "master_auth.cluster_ca_certificate");
        assert_eq!(reference.root_attribute(), "master_auth");
    }

    #[test]
    fn test_reference_requires_attribute() {
        assert!("network.main".parse::<Reference>().is_err());
    }

    #[test]
    fn test_collect_references_recursively() {
        let value = AttrValue::Block(
            [
                (
                    "network".to_string(),
                    AttrValue::Ref("network.main.self_link".parse().unwrap()),
                ),
                (
                    "ranges".to_string(),
                    AttrValue::List(vec![
                        AttrValue::String("10.0.0.0/20".into()),
                        AttrValue::Ref("global-address.psa.address".parse().unwrap()),
                    ]),
                ),
            ]
            .into_iter()
            .collect(),
        );

        let refs = value.references();
        assert_eq!(refs.len(), 2);
        assert_eq!(refs[0].target.name, "main");
        assert_eq!(refs[1].target.resource_type, "global-address");
    }

    #[test]
    fn test_resolve_unknown_reference() {
        let value = AttrValue::List(vec![
            AttrValue::Int(1),
            AttrValue::Ref("network.main.id".parse().unwrap()),
        ]);
        assert_eq!(value.resolve(&|_| None), None);
        assert_eq!(
            value.resolve(&|_| Some(serde_json::json!("net-1"))),
            Some(serde_json::json!([1, "net-1"]))
        );
    }
}

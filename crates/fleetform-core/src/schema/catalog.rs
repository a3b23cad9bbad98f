//! Built-in resource types
//!
//! Network, cluster, database and cache resources of a typical private GKE/Cloud SQL
//! deployment. Additional types are added through `SchemaRegistry::register`.

use super::{AttributeSchema as A, ResourceType, ValueKind::*};
use crate::model::ReplaceStrategy;

pub fn builtin_types() -> Vec<ResourceType> {
    vec![
        network(),
        subnetwork(),
        router(),
        router_nat(),
        cluster(),
        node_pool(),
        service_account(),
        iam_member(),
        global_address(),
        service_networking_connection(),
        database_instance(),
        database(),
        database_user(),
        redis_instance(),
    ]
}

fn network() -> ResourceType {
    ResourceType::new("network")
        .attribute(A::optional("name", Scalar).forces_replace())
        .attribute(A::optional("auto_create_subnetworks", Scalar).forces_replace())
        .attribute(A::optional("routing_mode", Scalar))
        .attribute(A::optional("description", Scalar).forces_replace())
        .attribute(A::computed("id", Scalar))
        .attribute(A::computed("self_link", Scalar))
}

fn subnetwork() -> ResourceType {
    ResourceType::new("subnetwork")
        .attribute(A::optional("name", Scalar).forces_replace())
        .attribute(A::required("network", Scalar).forces_replace())
        .attribute(A::required("ip_cidr_range", Scalar))
        .attribute(A::optional("region", Scalar).forces_replace())
        .attribute(A::optional("private_ip_google_access", Scalar))
        .attribute(A::optional("secondary_ip_range", List))
        .attribute(A::computed("id", Scalar))
        .attribute(A::computed("self_link", Scalar))
        .attribute(A::computed("gateway_address", Scalar))
}

fn router() -> ResourceType {
    ResourceType::new("router")
        .attribute(A::optional("name", Scalar).forces_replace())
        .attribute(A::required("network", Scalar).forces_replace())
        .attribute(A::optional("region", Scalar).forces_replace())
        .attribute(A::optional("bgp", NestedBlock))
        .attribute(A::computed("id", Scalar))
        .attribute(A::computed("self_link", Scalar))
}

fn router_nat() -> ResourceType {
    ResourceType::new("router-nat")
        .attribute(A::optional("name", Scalar).forces_replace())
        .attribute(A::required("router", Scalar).forces_replace())
        .attribute(A::optional("region", Scalar).forces_replace())
        .attribute(A::required("nat_ip_allocate_option", Scalar))
        .attribute(A::required("source_subnetwork_ip_ranges_to_nat", Scalar))
        .attribute(A::optional("log_config", NestedBlock))
        .attribute(A::computed("id", Scalar))
}

fn cluster() -> ResourceType {
    ResourceType::new("cluster")
        .attribute(A::optional("name", Scalar).forces_replace())
        .attribute(A::required("location", Scalar).forces_replace())
        .attribute(A::optional("network", Scalar).forces_replace())
        .attribute(A::optional("subnetwork", Scalar).forces_replace())
        .attribute(A::optional("remove_default_node_pool", Scalar).forces_replace())
        .attribute(A::optional("initial_node_count", Scalar).forces_replace())
        .attribute(A::optional("ip_allocation_policy", NestedBlock).forces_replace())
        .attribute(A::optional("private_cluster_config", NestedBlock).forces_replace())
        .attribute(A::optional("master_authorized_networks_config", NestedBlock))
        .attribute(A::optional("release_channel", NestedBlock))
        .attribute(A::optional("workload_identity_config", NestedBlock))
        .attribute(A::computed("id", Scalar))
        .attribute(A::computed("endpoint", Scalar))
        .attribute(A::computed("master_version", Scalar))
        .attribute(A::computed("self_link", Scalar))
        .attribute(A::computed("master_auth", NestedBlock).sensitive())
}

fn node_pool() -> ResourceType {
    ResourceType::new("node-pool")
        .attribute(A::optional("name", Scalar).forces_replace())
        .attribute(A::required("cluster", Scalar).forces_replace())
        .attribute(A::required("location", Scalar).forces_replace())
        .attribute(A::optional("node_count", Scalar))
        .attribute(A::optional("autoscaling", NestedBlock))
        .attribute(A::optional("node_config", NestedBlock).forces_replace())
        .attribute(A::optional("management", NestedBlock))
        .attribute(A::computed("id", Scalar))
        .attribute(A::computed("instance_group_urls", List))
}

fn service_account() -> ResourceType {
    ResourceType::new("service-account")
        .attribute(A::required("account_id", Scalar).forces_replace())
        .attribute(A::optional("display_name", Scalar))
        .attribute(A::optional("description", Scalar))
        .attribute(A::computed("id", Scalar))
        .attribute(A::computed("email", Scalar))
        .attribute(A::computed("unique_id", Scalar))
}

fn iam_member() -> ResourceType {
    // Bindings carry no name, so the successor can exist alongside the old one
    ResourceType::new("iam-member")
        .attribute(A::required("project", Scalar).forces_replace())
        .attribute(A::required("role", Scalar).forces_replace())
        .attribute(A::required("member", Scalar).forces_replace())
        .attribute(A::computed("id", Scalar))
        .attribute(A::computed("etag", Scalar))
        .with_replace_strategy(ReplaceStrategy::CreateFirst)
}

fn global_address() -> ResourceType {
    ResourceType::new("global-address")
        .attribute(A::optional("name", Scalar).forces_replace())
        .attribute(A::optional("purpose", Scalar).forces_replace())
        .attribute(A::optional("address_type", Scalar).forces_replace())
        .attribute(A::optional("prefix_length", Scalar).forces_replace())
        .attribute(A::optional("network", Scalar).forces_replace())
        .attribute(A::computed("id", Scalar))
        .attribute(A::computed("address", Scalar))
        .attribute(A::computed("self_link", Scalar))
}

fn service_networking_connection() -> ResourceType {
    ResourceType::new("service-networking-connection")
        .attribute(A::required("network", Scalar).forces_replace())
        .attribute(A::required("service", Scalar).forces_replace())
        .attribute(A::required("reserved_peering_ranges", List))
        .attribute(A::computed("id", Scalar))
        .attribute(A::computed("peering", Scalar))
}

fn database_instance() -> ResourceType {
    ResourceType::new("database-instance")
        .attribute(A::optional("name", Scalar).forces_replace())
        .attribute(A::required("database_version", Scalar).forces_replace())
        .attribute(A::required("region", Scalar).forces_replace())
        .attribute(A::required("settings", NestedBlock))
        .attribute(A::optional("root_password", Scalar).sensitive())
        .attribute(A::computed("id", Scalar))
        .attribute(A::computed("connection_name", Scalar))
        .attribute(A::computed("private_ip_address", Scalar))
        .attribute(A::computed("self_link", Scalar))
}

fn database() -> ResourceType {
    ResourceType::new("database")
        .attribute(A::required("name", Scalar).forces_replace())
        .attribute(A::required("instance", Scalar).forces_replace())
        .attribute(A::optional("charset", Scalar).forces_replace())
        .attribute(A::optional("collation", Scalar).forces_replace())
        .attribute(A::computed("id", Scalar))
}

fn database_user() -> ResourceType {
    ResourceType::new("database-user")
        .attribute(A::required("name", Scalar).forces_replace())
        .attribute(A::required("instance", Scalar).forces_replace())
        .attribute(A::optional("password", Scalar).sensitive())
        .attribute(A::computed("id", Scalar))
}

fn redis_instance() -> ResourceType {
    ResourceType::new("redis-instance")
        .attribute(A::optional("name", Scalar).forces_replace())
        .attribute(A::required("tier", Scalar).forces_replace())
        .attribute(A::required("memory_size_gb", Scalar))
        .attribute(A::optional("region", Scalar).forces_replace())
        .attribute(A::optional("authorized_network", Scalar).forces_replace())
        .attribute(A::optional("connect_mode", Scalar).forces_replace())
        .attribute(A::optional("redis_version", Scalar))
        .attribute(A::optional("auth_enabled", Scalar))
        .attribute(A::computed("id", Scalar))
        .attribute(A::computed("host", Scalar))
        .attribute(A::computed("port", Scalar))
        .attribute(A::computed("current_location_id", Scalar))
}

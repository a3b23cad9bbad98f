#![allow(dead_code, deprecated)]

use assert_cmd::Command;
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

pub const NETWORK_AND_SUBNET: &str = r#"
resource "network" "main" {
    name "prod-vpc"
    auto_create_subnetworks #false
}

resource "subnetwork" "app" {
    name "app"
    network (ref)"network.main.id"
    region "us-central1"
    ip_cidr_range "10.0.0.0/24"
}
"#;

pub struct TestProject {
    pub root: TempDir,
}

impl TestProject {
    pub fn new() -> Self {
        let root = tempfile::tempdir().unwrap();
        Self { root }
    }

    pub fn write_infra_kdl(&self, content: &str) {
        fs::write(self.root.path().join("infra.kdl"), content).unwrap();
    }

    pub fn path(&self) -> PathBuf {
        self.root.path().to_path_buf()
    }

    pub fn fleetform_dir(&self) -> PathBuf {
        self.root.path().join(".fleetform")
    }

    /// `fleetform` running inside the project, isolated from the caller's env
    pub fn cmd(&self) -> Command {
        let mut cmd = Command::cargo_bin("fleetform").unwrap();
        cmd.current_dir(self.root.path())
            .env_remove("FLEETFORM_CONFIG_PATH")
            .env_remove("FLEETFORM_PARALLELISM")
            .env_remove("RUST_LOG");
        cmd
    }

    /// Parsed `.fleetform/state.json`
    pub fn state(&self) -> serde_json::Value {
        let content = fs::read_to_string(self.fleetform_dir().join("state.json")).unwrap();
        serde_json::from_str(&content).unwrap()
    }

    /// Edits the persisted simulated cloud behind fleetform's back
    pub fn edit_cloud(&self, edit: impl FnOnce(&mut serde_json::Value)) {
        let path = self.fleetform_dir().join("cloud.json");
        let mut cloud: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        edit(&mut cloud);
        fs::write(&path, serde_json::to_string_pretty(&cloud).unwrap()).unwrap();
    }
}
